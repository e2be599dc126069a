//! RustyHCI - a host-side Bluetooth stack over a raw HCI user channel
//!
//! The controller is driven directly through an `HCI_CHANNEL_USER` socket;
//! no kernel Bluetooth stack is involved above the driver. On top of the
//! transport this crate provides L2CAP with its signaling channel, an ATT
//! and GATT client, RFCOMM for BR/EDR serial ports and a stub Security
//! Manager that declines pairing. [`Device`] ties them together and
//! schedules scanning, inquiry, connection setup and advertising.

pub mod att;
pub mod context;
pub mod error;
pub mod gap;
pub mod gatt;
pub mod hci;
pub mod l2cap;
pub mod rfcomm;
pub mod smp;
pub mod uuid;

// Re-export common types for convenience
pub use att::{AttClient, AttError};
pub use context::{Context, ContextError};
pub use error::{Error, HciError, Result};
pub use gap::{AddressType, AdvPacket, Advertisement, BdAddr, Device, DeviceOptions};
pub use gatt::{Characteristic, Descriptor, GattClient, GattError, Profile, Property, Service};
pub use hci::{Hci, HciCommand, HciConfig, HciEvent, HciSocket, InquiryResponse};
pub use l2cap::{Conn, L2capError};
pub use rfcomm::{RfcommClient, RfcommError};
pub use smp::{RejectPairing, SmpHandler};
pub use uuid::Uuid;
