//! L2CAP (Logical Link Control and Adaptation Protocol)
//!
//! This module provides:
//! - ACL fragmentation on write and recombination on read ([`Conn`])
//! - Channel ID dispatch to signaling, ATT, SMP and dynamic channels
//! - The signaling state machine for both LE and ACL-U links ([`SigHandler`])
//! - Codecs for signaling commands and configuration options

pub mod conn;
pub mod constants;
pub mod options;
pub mod packet;
pub mod psm;
pub mod sig_handler;
pub mod signaling;
pub mod types;

pub use self::conn::{Conn, ConnSetup, LinkType};
pub use self::options::{ConfigOption, OptionValue};
pub use self::packet::{BoundaryFlag, Pdu};
pub use self::sig_handler::{clamp_timeout, SigHandler, DEFAULT_SIGNAL_TIMEOUT};
pub use self::signaling::{SignalCommand, SignalingMessage};
pub use self::types::{Channel, L2capError, L2capResult, RejectReason};
