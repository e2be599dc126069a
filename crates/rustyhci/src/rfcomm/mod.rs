//! RFCOMM serial port emulation over a BR/EDR L2CAP channel
//!
//! Only the initiating side is implemented: [`RfcommClient`] opens a single
//! server channel with credit based flow control when the peer supports it.

pub mod client;
pub mod constants;
pub mod frame;

pub use client::RfcommClient;
pub use frame::{Frame, FrameType, MuxMessage, ParamNegotiation};

use crate::context::ContextError;
use crate::error::CodecError;
use crate::l2cap::L2capError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RfcommError {
    #[error("invalid server channel {0}")]
    InvalidChannel(u8),

    #[error("dlci {0} refused by peer")]
    Refused(u8),

    #[error("timed out waiting for {0}")]
    Timeout(&'static str),

    #[error("frame check sequence mismatch")]
    BadFcs,

    #[error("channel closed")]
    Closed,

    #[error("L2CAP error: {0}")]
    L2cap(#[from] L2capError),

    #[error("malformed frame: {0}")]
    Codec(#[from] CodecError),

    #[error("{0}")]
    Context(#[from] ContextError),
}

pub type RfcommResult<T> = std::result::Result<T, RfcommError>;
