//! Security Manager Protocol
//!
//! Pairing is not implemented. Every connection routes CID 0x0006 to an
//! [`SmpHandler`]; the default [`RejectPairing`] answers any pairing or
//! security request with Pairing Failed (Pairing Not Supported). The link
//! itself stays up.

pub mod constants;
pub mod crypto;

pub use constants::*;
pub use crypto::{Block, PairingCrypto, Unsupported};

use log::debug;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SmpError {
    #[error("empty SMP PDU")]
    EmptyPdu,

    #[error("pairing failed: reason {0:#04x}")]
    PairingFailed(u8),

    #[error("{0} is not supported")]
    Unsupported(&'static str),
}

/// Receives every PDU arriving on the SMP channel of a connection.
///
/// A returned PDU is written back on the same channel.
pub trait SmpHandler: Send + Sync {
    fn handle(&self, handle: u16, pdu: &[u8]) -> Result<Option<Vec<u8>>, SmpError>;
}

/// Default handler: pairing is not supported
#[derive(Debug, Default, Clone, Copy)]
pub struct RejectPairing;

impl SmpHandler for RejectPairing {
    fn handle(&self, handle: u16, pdu: &[u8]) -> Result<Option<Vec<u8>>, SmpError> {
        let code = *pdu.first().ok_or(SmpError::EmptyPdu)?;
        match code {
            SMP_PAIRING_REQUEST | SMP_SECURITY_REQUEST => {
                debug!("smp: rejecting pairing on {:#05x}", handle);
                Ok(Some(vec![SMP_PAIRING_FAILED, SMP_REASON_PAIRING_NOT_SUPPORTED]))
            }
            SMP_PAIRING_FAILED => {
                let reason = pdu.get(1).copied().unwrap_or(SMP_REASON_UNSPECIFIED_REASON);
                debug!("smp: peer failed pairing on {:#05x}: {:#04x}", handle, reason);
                Ok(None)
            }
            other => {
                debug!("smp: ignoring code {:#04x} on {:#05x}", other, handle);
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reject_pairing_request() {
        let rsp = RejectPairing.handle(0x40, &[SMP_PAIRING_REQUEST, 0x03, 0x00, 0x01, 0x10, 0x07, 0x07]);
        assert_eq!(rsp.unwrap(), Some(vec![0x05, 0x05]));
    }

    #[test]
    fn test_reject_security_request() {
        let rsp = RejectPairing.handle(0x40, &[SMP_SECURITY_REQUEST, 0x01]).unwrap();
        assert_eq!(rsp, Some(vec![SMP_PAIRING_FAILED, SMP_REASON_PAIRING_NOT_SUPPORTED]));
    }

    #[test]
    fn test_other_codes_ignored() {
        assert_eq!(RejectPairing.handle(0x40, &[SMP_PAIRING_FAILED, 0x08]).unwrap(), None);
        assert!(matches!(RejectPairing.handle(0x40, &[]), Err(SmpError::EmptyPdu)));
    }

    #[test]
    fn test_unsupported_crypto() {
        let crypto = Unsupported;
        let zero = [0u8; 16];
        assert!(matches!(crypto.s1(&zero, &zero, &zero), Err(SmpError::Unsupported("s1"))));
        assert_ne!(crypto.random(), [0u8; 16]);
    }
}
