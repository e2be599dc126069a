//! Error types for the rustyhci library
//!
//! This module defines the transport-level error types and the crate-wide
//! [`Error`] that every layer converts into.

use crate::att::AttError;
use crate::gatt::GattError;
use crate::hci::status;
use crate::l2cap::L2capError;
use crate::rfcomm::RfcommError;
use crate::smp::SmpError;
use thiserror::Error;

/// Errors produced by the pure marshal/unmarshal functions
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("short buffer: need {need} bytes, have {have}")]
    ShortBuffer { need: usize, have: usize },

    #[error("invalid value {value:#x} for {field}")]
    InvalidValue { field: &'static str, value: u32 },

    #[error("unknown opcode {0:#06x}")]
    UnknownOpcode(u16),

    #[error("unexpected end of buffer")]
    Truncated,
}

impl CodecError {
    /// Convenience constructor used by length checks
    pub fn short(need: usize, have: usize) -> Self {
        CodecError::ShortBuffer { need, have }
    }

    /// Fail with `ShortBuffer` unless `buf` holds at least `need` bytes
    pub fn check(buf: &[u8], need: usize) -> std::result::Result<(), CodecError> {
        if buf.len() < need {
            Err(CodecError::short(need, buf.len()))
        } else {
            Ok(())
        }
    }

    pub fn is_short(&self) -> bool {
        matches!(self, CodecError::ShortBuffer { .. } | CodecError::Truncated)
    }
}

impl From<std::io::Error> for CodecError {
    fn from(_: std::io::Error) -> Self {
        CodecError::Truncated
    }
}

/// Errors raised by the HCI socket and the transport loop
#[derive(Error, Debug)]
pub enum HciError {
    #[error("Failed to open HCI socket: {0}")]
    SocketError(#[from] std::io::Error),

    #[error("Failed to bind to HCI device: {0}")]
    BindError(std::io::Error),

    #[error("Failed to send HCI command: {0}")]
    SendError(std::io::Error),

    #[error("Failed to receive HCI packet: {0}")]
    ReceiveError(std::io::Error),

    #[error("No usable HCI controller found")]
    NoController,

    #[error("HCI transport closed")]
    TransportClosed,

    #[error("controller error {code:#04x}: {}", status::status_name(*code))]
    Controller { code: u8 },

    #[error("unsupported packet type {0:#04x}")]
    UnsupportedPacket(u8),

    #[error("unknown event {0:#04x}")]
    UnknownEvent(u8),

    #[error("malformed packet: {0}")]
    Codec(#[from] CodecError),

    #[error("connection canceled")]
    ConnectionCanceled,

    #[error("operation canceled")]
    Canceled,

    #[error("deadline exceeded")]
    DeadlineExceeded,

    #[error("Unsupported operation")]
    Unsupported,
}

impl HciError {
    /// Returns the raw controller status code if this is a controller error
    pub fn controller_code(&self) -> Option<u8> {
        match self {
            HciError::Controller { code } => Some(*code),
            _ => None,
        }
    }
}

impl From<crate::context::ContextError> for HciError {
    fn from(err: crate::context::ContextError) -> Self {
        match err {
            crate::context::ContextError::Canceled => HciError::Canceled,
            crate::context::ContextError::DeadlineExceeded => HciError::DeadlineExceeded,
        }
    }
}

/// Crate-wide error type
#[derive(Error, Debug)]
pub enum Error {
    #[error("HCI error: {0}")]
    Hci(#[from] HciError),

    #[error("L2CAP error: {0}")]
    L2cap(#[from] L2capError),

    #[error("ATT error: {0}")]
    Att(#[from] AttError),

    #[error("GATT error: {0}")]
    Gatt(#[from] GattError),

    #[error("SMP error: {0}")]
    Smp(#[from] SmpError),

    #[error("RFCOMM error: {0}")]
    Rfcomm(#[from] RfcommError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Context error: {0}")]
    Context(#[from] crate::context::ContextError),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Device not found")]
    NotFound,
}

pub type Result<T> = std::result::Result<T, Error>;
