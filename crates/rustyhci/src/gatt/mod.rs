//! GATT (Generic Attribute Profile) implementation
//!
//! This module provides profile discovery and characteristic access on top
//! of the ATT client for Bluetooth LE devices.

pub mod client;
pub mod types;

#[cfg(test)]
mod tests;

pub use client::{GattClient, GattError, GattResult};
pub use types::{Attribute, Characteristic, Descriptor, Profile, Property, Service};
