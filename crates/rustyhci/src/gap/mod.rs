//! Generic Access Profile
//!
//! [`Device`] is the entry point: it owns the transport and schedules
//! scanning, inquiry, connection setup and advertising on it.

pub mod adv;
pub mod constants;
pub mod device;
pub mod history;
pub mod types;

pub use adv::{AdvPacket, Advertisement};
pub use constants::*;
pub use device::{Device, DeviceOptions};
pub use history::ScanHistory;
pub use types::*;
