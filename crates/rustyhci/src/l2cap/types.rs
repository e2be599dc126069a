//! Type definitions for L2CAP operations

use super::constants::*;
use crate::context::ContextError;
use crate::error::{CodecError, HciError};
use thiserror::Error;

/// Reason carried by a peer's Command Reject
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    NotUnderstood,
    SignalingMtuExceeded { mtu: u16 },
    InvalidCid { local: u16, remote: u16 },
    Other(u16),
}

impl RejectReason {
    /// Build from the reason code and the reject's trailing data
    pub fn from_wire(reason: u16, data: &[u8]) -> Self {
        let word = |i: usize| {
            data.get(i..i + 2)
                .map(|b| u16::from_le_bytes([b[0], b[1]]))
                .unwrap_or(0)
        };
        match reason {
            L2CAP_REJECT_NOT_UNDERSTOOD => RejectReason::NotUnderstood,
            L2CAP_REJECT_MTU_EXCEEDED => RejectReason::SignalingMtuExceeded { mtu: word(0) },
            L2CAP_REJECT_INVALID_CID => RejectReason::InvalidCid {
                local: word(0),
                remote: word(2),
            },
            other => RejectReason::Other(other),
        }
    }
}

/// Error types specific to L2CAP operations
#[derive(Debug, Error)]
pub enum L2capError {
    #[error("command rejected: {0:?}")]
    Rejected(RejectReason),

    #[error("signal identifier mismatch: sent {expected}, got {got}")]
    IdMismatch { expected: u8, got: u8 },

    #[error("signal code mismatch: expected {expected:#04x}, got {got:#04x}")]
    CodeMismatch { expected: u8, got: u8 },

    #[error("signaling timeout")]
    Timeout,

    #[error("connection closed")]
    ClosedPipe,

    #[error("unexpected end of PDU")]
    UnexpectedEof,

    #[error("PDU of {len} bytes exceeds MPS {mps}")]
    FragmentTooLarge { len: usize, mps: u16 },

    #[error("connection refused, result {0:#06x}")]
    ConnectionRefused(u16),

    #[error("configuration failed, result {0:#06x}")]
    ConfigFailed(u16),

    #[error("information type {0:#06x} not supported by peer")]
    InfoNotSupported(u16),

    #[error("transport not initialised")]
    NotInitialised,

    #[error("HCI error: {0}")]
    Hci(#[from] HciError),

    #[error("malformed PDU: {0}")]
    Codec(#[from] CodecError),

    #[error("{0}")]
    Context(#[from] ContextError),
}

/// Result type for L2CAP operations
pub type L2capResult<T> = std::result::Result<T, L2capError>;

/// A connection-oriented channel opened on a BR/EDR link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Channel {
    pub psm: u16,
    pub local_cid: u16,
    pub remote_cid: u16,
    /// Largest SDU the peer accepts on this channel
    pub tx_mtu: u16,
}
