//! Common types for GATT operations
//!
//! A [`Profile`] owns services, services own characteristics and
//! characteristics own descriptors. Handles and end handles are the ones
//! reported by the server during discovery.

use crate::uuid::{self, Uuid};
use bitflags::bitflags;

bitflags! {
    /// Characteristic properties as defined in the Bluetooth specification
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Property: u8 {
        const BROADCAST = 0x01;
        const READ = 0x02;
        const WRITE_WITHOUT_RESPONSE = 0x04;
        const WRITE = 0x08;
        const NOTIFY = 0x10;
        const INDICATE = 0x20;
        const AUTHENTICATED_SIGNED_WRITES = 0x40;
        const EXTENDED_PROPERTIES = 0x80;
    }
}

/// A GATT descriptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Descriptor {
    pub uuid: Uuid,
    pub handle: u16,
    /// Last value read or written through the client
    pub value: Vec<u8>,
}

impl Descriptor {
    pub fn new(uuid: Uuid, handle: u16) -> Self {
        Self {
            uuid,
            handle,
            value: Vec::new(),
        }
    }

    pub fn is_cccd(&self) -> bool {
        self.uuid == uuid::CLIENT_CHAR_CONFIG
    }
}

/// A GATT characteristic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Characteristic {
    pub uuid: Uuid,
    /// Declaration handle
    pub handle: u16,
    pub properties: Property,
    pub value_handle: u16,
    /// Last handle belonging to this characteristic
    pub end_handle: u16,
    pub descriptors: Vec<Descriptor>,
    /// Client Characteristic Configuration descriptor, if discovered
    pub cccd: Option<Descriptor>,
    /// Last value read or written through the client
    pub value: Vec<u8>,
}

impl Characteristic {
    pub fn new(uuid: Uuid, handle: u16, properties: Property, value_handle: u16) -> Self {
        Self {
            uuid,
            handle,
            properties,
            value_handle,
            end_handle: value_handle,
            descriptors: Vec::new(),
            cccd: None,
            value: Vec::new(),
        }
    }

    /// Attach a discovered descriptor, remembering the CCCD
    pub fn add_descriptor(&mut self, descriptor: Descriptor) {
        if descriptor.is_cccd() {
            self.cccd = Some(descriptor.clone());
        }
        self.descriptors.push(descriptor);
    }

    pub fn can_read(&self) -> bool {
        self.properties.contains(Property::READ)
    }

    pub fn can_write(&self) -> bool {
        self.properties.contains(Property::WRITE)
    }

    pub fn can_write_without_response(&self) -> bool {
        self.properties.contains(Property::WRITE_WITHOUT_RESPONSE)
    }

    pub fn can_notify(&self) -> bool {
        self.properties.contains(Property::NOTIFY)
    }

    pub fn can_indicate(&self) -> bool {
        self.properties.contains(Property::INDICATE)
    }

    pub fn find_descriptor(&self, uuid: &Uuid) -> Option<&Descriptor> {
        self.descriptors.iter().find(|d| d.uuid == *uuid)
    }
}

/// A GATT service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Service {
    pub uuid: Uuid,
    /// Start handle for this service
    pub handle: u16,
    /// End handle for this service
    pub end_handle: u16,
    pub characteristics: Vec<Characteristic>,
}

impl Service {
    pub fn new(uuid: Uuid, handle: u16, end_handle: u16) -> Self {
        Self {
            uuid,
            handle,
            end_handle,
            characteristics: Vec::new(),
        }
    }

    pub fn find_characteristic(&self, uuid: &Uuid) -> Option<&Characteristic> {
        self.characteristics.iter().find(|c| c.uuid == *uuid)
    }
}

/// Any of the three discovered entities
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attribute<'a> {
    Service(&'a Service),
    Characteristic(&'a Characteristic),
    Descriptor(&'a Descriptor),
}

impl Attribute<'_> {
    pub fn uuid(&self) -> Uuid {
        match self {
            Attribute::Service(s) => s.uuid,
            Attribute::Characteristic(c) => c.uuid,
            Attribute::Descriptor(d) => d.uuid,
        }
    }

    pub fn handle(&self) -> u16 {
        match self {
            Attribute::Service(s) => s.handle,
            Attribute::Characteristic(c) => c.handle,
            Attribute::Descriptor(d) => d.handle,
        }
    }
}

/// The discovered attribute tree of one peer
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Profile {
    pub services: Vec<Service>,
}

impl Profile {
    pub fn new(services: Vec<Service>) -> Self {
        Self { services }
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    /// First service, characteristic or descriptor with this UUID, searched
    /// in that order
    pub fn find(&self, uuid: &Uuid) -> Option<Attribute<'_>> {
        self.find_service(uuid)
            .map(Attribute::Service)
            .or_else(|| self.find_characteristic(uuid).map(Attribute::Characteristic))
            .or_else(|| self.find_descriptor(uuid).map(Attribute::Descriptor))
    }

    pub fn find_service(&self, uuid: &Uuid) -> Option<&Service> {
        self.services.iter().find(|s| s.uuid == *uuid)
    }

    pub fn find_characteristic(&self, uuid: &Uuid) -> Option<&Characteristic> {
        self.characteristics().find(|c| c.uuid == *uuid)
    }

    pub fn find_descriptor(&self, uuid: &Uuid) -> Option<&Descriptor> {
        self.characteristics()
            .flat_map(|c| c.descriptors.iter())
            .find(|d| d.uuid == *uuid)
    }

    /// Characteristic owning `value_handle`
    pub fn characteristic_by_handle(&self, value_handle: u16) -> Option<&Characteristic> {
        self.characteristics()
            .find(|c| c.value_handle == value_handle)
    }

    pub fn characteristics(&self) -> impl Iterator<Item = &Characteristic> {
        self.services.iter().flat_map(|s| s.characteristics.iter())
    }
}
