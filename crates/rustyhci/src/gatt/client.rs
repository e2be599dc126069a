//! GATT Client implementation
//!
//! A thin layer over [`AttClient`] that discovers the peer's services,
//! characteristics and descriptors into a [`Profile`] and offers value
//! access in terms of those entities.

use crate::att::{AttClient, AttError, AttResult, ATT_HANDLE_MAX, ATT_HANDLE_MIN};
use crate::context::{Context, Signal};
use crate::error::HciError;
use crate::gap::Address;
use crate::gatt::types::{Characteristic, Descriptor, Profile, Service};
use crate::l2cap::conn::lock;
use crate::l2cap::Conn;
use crate::uuid::Uuid;
use log::{debug, info};
use std::sync::{Arc, Mutex, RwLock};

/// Error types specific to GATT operations
#[derive(Debug, thiserror::Error)]
pub enum GattError {
    #[error("ATT error: {0}")]
    Att(#[from] AttError),

    #[error("Service {0} not found")]
    ServiceNotFound(Uuid),

    #[error("Characteristic {0} not found")]
    CharacteristicNotFound(Uuid),

    #[error("Characteristic {0:#06x} has no client configuration descriptor")]
    NoCccd(u16),

    #[error("Characteristic {handle:#06x} does not support {operation}")]
    NotPermitted {
        handle: u16,
        operation: &'static str,
    },
}

pub type GattResult<T> = Result<T, GattError>;

pub struct GattClient {
    att: AttClient,
    /// Held for the whole of every client initiated operation
    busy: Mutex<()>,
    profile: RwLock<Option<Arc<Profile>>>,
}

impl std::fmt::Debug for GattClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GattClient")
            .field("conn", &self.att.conn().handle())
            .field("peer", &self.att.conn().peer())
            .field("discovered", &self.profile().is_some())
            .finish()
    }
}

fn matches(filter: &[Uuid], uuid: &Uuid) -> bool {
    filter.is_empty() || filter.contains(uuid)
}

impl GattClient {
    /// Create a new GATT client on an established LE connection
    pub fn new(conn: Arc<Conn>) -> Self {
        Self {
            att: AttClient::new(conn),
            busy: Mutex::new(()),
            profile: RwLock::new(None),
        }
    }

    pub fn conn(&self) -> &Arc<Conn> {
        self.att.conn()
    }

    pub fn att(&self) -> &AttClient {
        &self.att
    }

    /// Address of the remote device
    pub fn addr(&self) -> Address {
        self.att.conn().peer()
    }

    /// Fired once the underlying connection is gone
    pub fn disconnected(&self) -> Signal {
        self.att.conn().disconnected()
    }

    /// Ask the controller to drop the connection
    pub fn close(&self) -> Result<(), HciError> {
        self.att.conn().close()
    }

    /// The cached profile, if discovery has run
    pub fn profile(&self) -> Option<Arc<Profile>> {
        self.profile
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Look up a discovered service by UUID
    pub fn service(&self, uuid: &Uuid) -> GattResult<Service> {
        self.profile()
            .and_then(|p| p.find_service(uuid).cloned())
            .ok_or(GattError::ServiceNotFound(*uuid))
    }

    /// Look up a discovered characteristic by UUID
    pub fn characteristic(&self, uuid: &Uuid) -> GattResult<Characteristic> {
        self.profile()
            .and_then(|p| p.find_characteristic(uuid).cloned())
            .ok_or(GattError::CharacteristicNotFound(*uuid))
    }

    pub fn exchange_mtu(&self, ctx: &Context, mtu: u16) -> GattResult<u16> {
        let _busy = lock(&self.busy);
        Ok(self.att.exchange_mtu(ctx, mtu)?)
    }

    /// Primary services whose UUID is in `filter` (all when empty)
    pub fn discover_services(&self, ctx: &Context, filter: &[Uuid]) -> GattResult<Vec<Service>> {
        let _busy = lock(&self.busy);
        self.services(ctx, filter)
    }

    /// Characteristics of `service` whose UUID is in `filter`
    pub fn discover_characteristics(
        &self,
        ctx: &Context,
        filter: &[Uuid],
        service: &Service,
    ) -> GattResult<Vec<Characteristic>> {
        let _busy = lock(&self.busy);
        self.characteristics(ctx, filter, service)
    }

    /// Descriptors of `characteristic` whose UUID is in `filter`
    pub fn discover_descriptors(
        &self,
        ctx: &Context,
        filter: &[Uuid],
        characteristic: &Characteristic,
    ) -> GattResult<Vec<Descriptor>> {
        let _busy = lock(&self.busy);
        self.descriptors(ctx, filter, characteristic)
    }

    fn services(&self, ctx: &Context, filter: &[Uuid]) -> GattResult<Vec<Service>> {
        let mut services = self
            .att
            .discover_primary_services(ctx, ATT_HANDLE_MIN, ATT_HANDLE_MAX)?;
        services.retain(|s| matches(filter, &s.uuid));
        Ok(services)
    }

    fn characteristics(
        &self,
        ctx: &Context,
        filter: &[Uuid],
        service: &Service,
    ) -> GattResult<Vec<Characteristic>> {
        let mut chars = self
            .att
            .discover_characteristics(ctx, service.handle, service.end_handle)?;
        chars.retain(|c| matches(filter, &c.uuid));
        Ok(chars)
    }

    fn descriptors(
        &self,
        ctx: &Context,
        filter: &[Uuid],
        characteristic: &Characteristic,
    ) -> GattResult<Vec<Descriptor>> {
        let start = characteristic.value_handle.saturating_add(1);
        let mut descriptors = self
            .att
            .find_descriptors(ctx, start, characteristic.end_handle)?;
        descriptors.retain(|d| matches(filter, &d.uuid));
        Ok(descriptors)
    }

    /// Discover the whole attribute tree. A cached profile is returned as
    /// is unless `force` is set.
    pub fn discover_profile(&self, ctx: &Context, force: bool) -> GattResult<Arc<Profile>> {
        self.discover_profile_filtered(ctx, &[], force)
    }

    /// Discover only the services in `filter`, with all their
    /// characteristics and descriptors
    pub fn discover_profile_filtered(
        &self,
        ctx: &Context,
        filter: &[Uuid],
        force: bool,
    ) -> GattResult<Arc<Profile>> {
        let _busy = lock(&self.busy);
        if !force {
            if let Some(profile) = self.profile() {
                return Ok(profile);
            }
        }

        let mut services = self.services(ctx, filter)?;
        for service in services.iter_mut() {
            let mut chars = self.characteristics(ctx, &[], service)?;
            for c in chars.iter_mut() {
                for d in self.descriptors(ctx, &[], c)? {
                    c.add_descriptor(d);
                }
            }
            service.characteristics = chars;
        }

        let profile = Arc::new(Profile::new(services));
        *self.profile.write().unwrap_or_else(|e| e.into_inner()) = Some(profile.clone());
        info!(
            "gatt: {} profile has {} services",
            self.addr(),
            profile.services.len()
        );
        Ok(profile)
    }

    // Remember the last value seen for a characteristic or descriptor handle
    fn cache_value(&self, handle: u16, value: &[u8]) {
        let mut guard = self.profile.write().unwrap_or_else(|e| e.into_inner());
        let profile = match guard.as_mut() {
            Some(profile) => Arc::make_mut(profile),
            None => return,
        };
        for c in profile
            .services
            .iter_mut()
            .flat_map(|s| s.characteristics.iter_mut())
        {
            if c.value_handle == handle {
                c.value = value.to_vec();
                return;
            }
            if let Some(d) = c.descriptors.iter_mut().find(|d| d.handle == handle) {
                d.value = value.to_vec();
                if let Some(cccd) = c.cccd.as_mut().filter(|cccd| cccd.handle == handle) {
                    cccd.value = value.to_vec();
                }
                return;
            }
        }
    }

    /// Read a characteristic value, following up with blob reads when it
    /// does not fit one PDU
    pub fn read_characteristic(&self, ctx: &Context, c: &Characteristic) -> GattResult<Vec<u8>> {
        let _busy = lock(&self.busy);
        let value = self.att.read(ctx, c.value_handle)?;
        self.cache_value(c.value_handle, &value);
        Ok(value)
    }

    pub fn read_long_characteristic(
        &self,
        ctx: &Context,
        c: &Characteristic,
    ) -> GattResult<Vec<u8>> {
        let _busy = lock(&self.busy);
        let value = self.att.read_long(ctx, c.value_handle)?;
        self.cache_value(c.value_handle, &value);
        Ok(value)
    }

    pub fn read_descriptor(&self, ctx: &Context, d: &Descriptor) -> GattResult<Vec<u8>> {
        let _busy = lock(&self.busy);
        let value = self.att.read(ctx, d.handle)?;
        self.cache_value(d.handle, &value);
        Ok(value)
    }

    /// Read the values of several characteristics in one request
    pub fn read_multiple(&self, ctx: &Context, chars: &[&Characteristic]) -> GattResult<Vec<u8>> {
        let _busy = lock(&self.busy);
        let handles: Vec<u16> = chars.iter().map(|c| c.value_handle).collect();
        Ok(self.att.read_multiple(ctx, &handles)?)
    }

    /// Write a characteristic value, with or without response
    pub fn write_characteristic(
        &self,
        ctx: &Context,
        c: &Characteristic,
        value: &[u8],
        no_response: bool,
    ) -> GattResult<()> {
        let _busy = lock(&self.busy);
        if no_response {
            self.att.write_command(ctx, c.value_handle, value)?;
        } else {
            self.att.write(ctx, c.value_handle, value)?;
        }
        self.cache_value(c.value_handle, value);
        Ok(())
    }

    pub fn write_descriptor(&self, ctx: &Context, d: &Descriptor, value: &[u8]) -> GattResult<()> {
        let _busy = lock(&self.busy);
        self.att.write(ctx, d.handle, value)?;
        self.cache_value(d.handle, value);
        Ok(())
    }

    /// Route notifications (or indications) of `c` to `handler`
    pub fn subscribe<F>(
        &self,
        ctx: &Context,
        c: &Characteristic,
        indicate: bool,
        handler: F,
    ) -> GattResult<()>
    where
        F: FnMut(u16, &[u8]) -> AttResult<()> + Send + 'static,
    {
        let cccd = c.cccd.as_ref().ok_or(GattError::NoCccd(c.handle))?;
        let (supported, operation) = if indicate {
            (c.can_indicate(), "indications")
        } else {
            (c.can_notify(), "notifications")
        };
        if !supported {
            return Err(GattError::NotPermitted {
                handle: c.handle,
                operation,
            });
        }

        let _busy = lock(&self.busy);
        self.att
            .subscribe(ctx, c.value_handle, cccd.handle, indicate, handler)?;
        debug!("gatt: subscribed to {:#06x}", c.value_handle);
        Ok(())
    }

    pub fn unsubscribe(&self, ctx: &Context, c: &Characteristic, indicate: bool) -> GattResult<()> {
        let _busy = lock(&self.busy);
        self.att.unsubscribe(ctx, c.value_handle, indicate)?;
        Ok(())
    }

    /// Turn off every subscription made through this client
    pub fn clear_subscriptions(&self, ctx: &Context) -> GattResult<()> {
        let _busy = lock(&self.busy);
        self.att.clear_subscriptions(ctx)?;
        Ok(())
    }
}
