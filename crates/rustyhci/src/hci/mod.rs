//! Bluetooth HCI (Host Controller Interface) implementation
//!
//! Wire codecs for commands and events, the ACL buffer pool, the raw
//! user-channel socket and the [`Hci`] transport that ties them together.

pub mod command;
pub mod config;
pub mod constants;
pub mod event;
pub mod pool;
pub mod socket;
pub mod status;
pub mod transport;

#[cfg(test)]
pub(crate) mod mock;
#[cfg(test)]
mod tests;

pub use command::{CommandResponse, HciCommand};
pub use config::{AdvParams, ConnParams, HciConfig, ScanParams};
pub use event::{CompletedPacketsLayout, HciEvent, InquiryResponse, LeAdvertisingReport};
pub use pool::Pool;
pub use socket::{HciSocket, Socket};
pub use transport::{AcceptKind, AdvHandler, Hci, InquiryHandler};
