//! Attribute Protocol (ATT) implementation
//!
//! This module provides the client half of ATT: PDU codecs, the error
//! taxonomy carried by Error Responses, and a transactional client that
//! runs over the fixed ATT channel of an LE connection.

pub mod client;
pub mod constants;
pub mod error;
pub mod pdu;

#[cfg(test)]
pub(crate) mod mock;
#[cfg(test)]
mod tests;

pub use self::client::{AttClient, ValueHandler};
pub use self::constants::*;
pub use self::error::{AttError, AttErrorCode, AttResult};
pub use self::pdu::AttPacket;
