//! Error handling for the ATT protocol
use super::constants::*;
use crate::context::ContextError;
use crate::error::CodecError;
use crate::l2cap::L2capError;
use std::fmt;
use thiserror::Error;

/// ATT error codes carried in an Error Response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttErrorCode {
    InvalidHandle,
    ReadNotPermitted,
    WriteNotPermitted,
    InvalidPdu,
    InsufficientAuthentication,
    RequestNotSupported,
    InvalidOffset,
    InsufficientAuthorization,
    PrepareQueueFull,
    /// Normal terminator of the discovery loops
    AttributeNotFound,
    AttributeNotLong,
    InsufficientEncryptionKeySize,
    InvalidAttributeValueLength,
    Unlikely,
    InsufficientEncryption,
    UnsupportedGroupType,
    InsufficientResources,
    DatabaseOutOfSync,
    ValueNotAllowed,
    /// 0x80..=0x9F, defined by the higher layer application
    ApplicationError(u8),
    /// 0xE0..=0xFF, defined by a profile
    CommonProfileError(u8),
    Unknown(u8),
}

impl From<u8> for AttErrorCode {
    fn from(code: u8) -> Self {
        match code {
            ATT_ERROR_INVALID_HANDLE => AttErrorCode::InvalidHandle,
            ATT_ERROR_READ_NOT_PERMITTED => AttErrorCode::ReadNotPermitted,
            ATT_ERROR_WRITE_NOT_PERMITTED => AttErrorCode::WriteNotPermitted,
            ATT_ERROR_INVALID_PDU => AttErrorCode::InvalidPdu,
            ATT_ERROR_INSUFFICIENT_AUTHENTICATION => AttErrorCode::InsufficientAuthentication,
            ATT_ERROR_REQUEST_NOT_SUPPORTED => AttErrorCode::RequestNotSupported,
            ATT_ERROR_INVALID_OFFSET => AttErrorCode::InvalidOffset,
            ATT_ERROR_INSUFFICIENT_AUTHORIZATION => AttErrorCode::InsufficientAuthorization,
            ATT_ERROR_PREPARE_QUEUE_FULL => AttErrorCode::PrepareQueueFull,
            ATT_ERROR_ATTRIBUTE_NOT_FOUND => AttErrorCode::AttributeNotFound,
            ATT_ERROR_ATTRIBUTE_NOT_LONG => AttErrorCode::AttributeNotLong,
            ATT_ERROR_INSUFFICIENT_ENCRYPTION_KEY_SIZE => {
                AttErrorCode::InsufficientEncryptionKeySize
            }
            ATT_ERROR_INVALID_ATTRIBUTE_VALUE_LENGTH => AttErrorCode::InvalidAttributeValueLength,
            ATT_ERROR_UNLIKELY => AttErrorCode::Unlikely,
            ATT_ERROR_INSUFFICIENT_ENCRYPTION => AttErrorCode::InsufficientEncryption,
            ATT_ERROR_UNSUPPORTED_GROUP_TYPE => AttErrorCode::UnsupportedGroupType,
            ATT_ERROR_INSUFFICIENT_RESOURCES => AttErrorCode::InsufficientResources,
            ATT_ERROR_DATABASE_OUT_OF_SYNC => AttErrorCode::DatabaseOutOfSync,
            ATT_ERROR_VALUE_NOT_ALLOWED => AttErrorCode::ValueNotAllowed,
            ATT_ERROR_APPLICATION_ERROR_START..=ATT_ERROR_APPLICATION_ERROR_END => {
                AttErrorCode::ApplicationError(code)
            }
            ATT_ERROR_COMMON_PROFILE_ERROR_START..=0xFF => AttErrorCode::CommonProfileError(code),
            _ => AttErrorCode::Unknown(code),
        }
    }
}

impl From<AttErrorCode> for u8 {
    fn from(code: AttErrorCode) -> u8 {
        match code {
            AttErrorCode::InvalidHandle => ATT_ERROR_INVALID_HANDLE,
            AttErrorCode::ReadNotPermitted => ATT_ERROR_READ_NOT_PERMITTED,
            AttErrorCode::WriteNotPermitted => ATT_ERROR_WRITE_NOT_PERMITTED,
            AttErrorCode::InvalidPdu => ATT_ERROR_INVALID_PDU,
            AttErrorCode::InsufficientAuthentication => ATT_ERROR_INSUFFICIENT_AUTHENTICATION,
            AttErrorCode::RequestNotSupported => ATT_ERROR_REQUEST_NOT_SUPPORTED,
            AttErrorCode::InvalidOffset => ATT_ERROR_INVALID_OFFSET,
            AttErrorCode::InsufficientAuthorization => ATT_ERROR_INSUFFICIENT_AUTHORIZATION,
            AttErrorCode::PrepareQueueFull => ATT_ERROR_PREPARE_QUEUE_FULL,
            AttErrorCode::AttributeNotFound => ATT_ERROR_ATTRIBUTE_NOT_FOUND,
            AttErrorCode::AttributeNotLong => ATT_ERROR_ATTRIBUTE_NOT_LONG,
            AttErrorCode::InsufficientEncryptionKeySize => {
                ATT_ERROR_INSUFFICIENT_ENCRYPTION_KEY_SIZE
            }
            AttErrorCode::InvalidAttributeValueLength => ATT_ERROR_INVALID_ATTRIBUTE_VALUE_LENGTH,
            AttErrorCode::Unlikely => ATT_ERROR_UNLIKELY,
            AttErrorCode::InsufficientEncryption => ATT_ERROR_INSUFFICIENT_ENCRYPTION,
            AttErrorCode::UnsupportedGroupType => ATT_ERROR_UNSUPPORTED_GROUP_TYPE,
            AttErrorCode::InsufficientResources => ATT_ERROR_INSUFFICIENT_RESOURCES,
            AttErrorCode::DatabaseOutOfSync => ATT_ERROR_DATABASE_OUT_OF_SYNC,
            AttErrorCode::ValueNotAllowed => ATT_ERROR_VALUE_NOT_ALLOWED,
            AttErrorCode::ApplicationError(code)
            | AttErrorCode::CommonProfileError(code)
            | AttErrorCode::Unknown(code) => code,
        }
    }
}

impl fmt::Display for AttErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AttErrorCode::InvalidHandle => "invalid handle",
            AttErrorCode::ReadNotPermitted => "read not permitted",
            AttErrorCode::WriteNotPermitted => "write not permitted",
            AttErrorCode::InvalidPdu => "invalid PDU",
            AttErrorCode::InsufficientAuthentication => "insufficient authentication",
            AttErrorCode::RequestNotSupported => "request not supported",
            AttErrorCode::InvalidOffset => "invalid offset",
            AttErrorCode::InsufficientAuthorization => "insufficient authorization",
            AttErrorCode::PrepareQueueFull => "prepare queue full",
            AttErrorCode::AttributeNotFound => "attribute not found",
            AttErrorCode::AttributeNotLong => "attribute not long",
            AttErrorCode::InsufficientEncryptionKeySize => "insufficient encryption key size",
            AttErrorCode::InvalidAttributeValueLength => "invalid attribute value length",
            AttErrorCode::Unlikely => "unlikely error",
            AttErrorCode::InsufficientEncryption => "insufficient encryption",
            AttErrorCode::UnsupportedGroupType => "unsupported group type",
            AttErrorCode::InsufficientResources => "insufficient resources",
            AttErrorCode::DatabaseOutOfSync => "database out of sync",
            AttErrorCode::ValueNotAllowed => "value not allowed",
            AttErrorCode::ApplicationError(code) => {
                return write!(f, "application error {:#04x}", code)
            }
            AttErrorCode::CommonProfileError(code) => {
                return write!(f, "common profile error {:#04x}", code)
            }
            AttErrorCode::Unknown(code) => return write!(f, "unknown error {:#04x}", code),
        };
        f.write_str(name)
    }
}

/// ATT Error type
#[derive(Debug, Error)]
pub enum AttError {
    #[error("{code} (request {request:#04x}, handle {handle:#06x})")]
    Protocol {
        request: u8,
        handle: u16,
        code: AttErrorCode,
    },

    #[error("L2CAP error: {0}")]
    L2cap(#[from] L2capError),

    #[error("malformed PDU: {0}")]
    Codec(#[from] CodecError),

    #[error("{0}")]
    Context(#[from] ContextError),

    #[error("transaction timed out")]
    Timeout,

    #[error("connection closed")]
    ClosedPipe,

    #[error("unexpected response opcode {got:#04x}, want {want:#04x}")]
    UnexpectedResponse { want: u8, got: u8 },

    #[error("value of {len} bytes does not fit MTU {mtu}")]
    ValueTooLong { len: usize, mtu: u16 },

    #[error("no subscription on handle {0:#06x}")]
    NotSubscribed(u16),

    #[error("long read of {0} bytes passed the largest blob offset")]
    OffsetOverflow(usize),
}

impl AttError {
    /// Error code from the peer's Error Response, if that is what this is
    pub fn code(&self) -> Option<AttErrorCode> {
        match self {
            AttError::Protocol { code, .. } => Some(*code),
            _ => None,
        }
    }

    pub fn handle(&self) -> Option<u16> {
        match self {
            AttError::Protocol { handle, .. } => Some(*handle),
            _ => None,
        }
    }

    /// The server has no attribute in the requested range
    pub fn is_attribute_not_found(&self) -> bool {
        self.code() == Some(AttErrorCode::AttributeNotFound)
    }
}

/// ATT Result type
pub type AttResult<T> = Result<T, AttError>;
