//! Device-wide API
//!
//! [`Device`] owns one [`Hci`] transport and schedules the controller
//! level procedures on it: scanning, inquiry, dialing, accepting and
//! advertising. Scan and inquiry are paused while a dial is in progress and
//! restored once it finishes.

use crate::context::{Context, POLL_INTERVAL};
use crate::error::{Error, HciError, Result};
use crate::gap::adv::{self, AdvPacket, Advertisement};
use crate::gap::constants::*;
use crate::gap::types::{AddressType, BdAddr};
use crate::gatt::GattClient;
use crate::hci::config::{AdvParams, ConnParams, HciConfig};
use crate::hci::constants::{GIAC_LAP, INQUIRY_LENGTH_MAX, INQUIRY_LENGTH_UNIT_MS};
use crate::hci::status;
use crate::hci::{AcceptKind, Hci, HciCommand, InquiryResponse, Socket};
use crate::l2cap::conn::lock;
use crate::l2cap::Conn;
use crate::rfcomm::RfcommClient;
use crate::smp::SmpHandler;
use crate::uuid::Uuid;
use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Time allowed for cleanup commands issued after the caller's context ended
const CLEANUP_TIMEOUT: Duration = Duration::from_secs(1);

/// Time allowed for controller initialisation
const INIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Options used when opening a [`Device`]
#[derive(Clone, Default)]
pub struct DeviceOptions {
    pub hci: HciConfig,
    /// Pairing policy, `None` for the default that rejects pairing
    pub smp: Option<Arc<dyn SmpHandler>>,
    pub conn_params: ConnParams,
    pub adv_params: AdvParams,
}

impl std::fmt::Debug for DeviceOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceOptions")
            .field("hci", &self.hci)
            .field("smp", &self.smp.is_some())
            .field("conn_params", &self.conn_params)
            .field("adv_params", &self.adv_params)
            .finish()
    }
}

impl DeviceOptions {
    pub fn with_hci_config(mut self, config: HciConfig) -> Self {
        self.hci = config;
        self
    }

    pub fn with_smp_handler(mut self, handler: Arc<dyn SmpHandler>) -> Self {
        self.smp = Some(handler);
        self
    }

    pub fn with_conn_params(mut self, params: ConnParams) -> Self {
        self.conn_params = params;
        self
    }

    pub fn with_adv_params(mut self, params: AdvParams) -> Self {
        self.adv_params = params;
        self
    }
}

#[derive(Debug, Clone, Copy)]
struct InquiryState {
    length: u8,
    num_responses: u8,
}

// What a dial paused and must restore
#[derive(Debug, Default)]
struct Suspended {
    scan: bool,
    inquiry: Option<InquiryState>,
}

/// A local Bluetooth controller
pub struct Device {
    hci: Hci,
    options: DeviceOptions,
    /// `Some(allow_duplicates)` while a scan runs
    scanning: Mutex<Option<bool>>,
    inquiring: Mutex<Option<InquiryState>>,
    /// Page parameters learned from inquiry, used when paging
    inquired: Arc<Mutex<HashMap<BdAddr, InquiryResponse>>>,
    dialing: Mutex<()>,
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("hci", &self.hci)
            .field("scanning", &lock(&self.scanning).is_some())
            .field("inquiring", &lock(&self.inquiring).is_some())
            .finish()
    }
}

fn cleanup_ctx() -> Context {
    Context::background().with_timeout(CLEANUP_TIMEOUT)
}

/// Inquiry length field for the time left on `ctx`
pub(crate) fn inquiry_length(remaining: Duration) -> u8 {
    let units = remaining.as_millis() / INQUIRY_LENGTH_UNIT_MS as u128;
    units.clamp(1, INQUIRY_LENGTH_MAX as u128) as u8
}

impl Device {
    /// Open the controller named in `options` and initialise it
    pub fn open(options: DeviceOptions) -> Result<Self> {
        let hci = Hci::open(options.hci.clone())?;
        Self::with_hci(hci, options)
    }

    /// Run a device over an already open socket
    pub fn with_socket(socket: Arc<dyn Socket>, options: DeviceOptions) -> Result<Self> {
        let hci = Hci::with_socket(socket, options.hci.clone());
        Self::with_hci(hci, options)
    }

    fn with_hci(hci: Hci, options: DeviceOptions) -> Result<Self> {
        if let Some(smp) = &options.smp {
            hci.set_smp_handler(smp.clone());
        }
        let ctx = Context::background().with_timeout(INIT_TIMEOUT);
        if let Err(e) = hci.init(&ctx) {
            if let Err(close_err) = hci.close() {
                warn!("gap: close after failed init: {}", close_err);
            }
            return Err(e.into());
        }
        Ok(Self {
            hci,
            options,
            scanning: Mutex::new(None),
            inquiring: Mutex::new(None),
            inquired: Arc::new(Mutex::new(HashMap::new())),
            dialing: Mutex::new(()),
        })
    }

    pub fn hci(&self) -> &Hci {
        &self.hci
    }

    /// Public address of the controller
    pub fn addr(&self) -> BdAddr {
        self.hci.addr()
    }

    /// Latest advertisement seen from `addr`
    pub fn advertisement(&self, addr: &BdAddr) -> Option<Advertisement> {
        self.hci.last_advertisement(addr)
    }

    pub fn is_scanning(&self) -> bool {
        lock(&self.scanning).is_some()
    }

    // Block until `ctx` ends, or fail if the transport goes away first
    fn wait(&self, ctx: &Context) -> Result<()> {
        let done = self.hci.done();
        while ctx.err().is_none() {
            if done.wait_timeout(POLL_INTERVAL) {
                return Err(HciError::TransportClosed.into());
            }
        }
        Ok(())
    }

    /// Scan for LE advertisements until `ctx` is canceled or expires.
    ///
    /// Every advertisement (joined with its scan response when one arrives)
    /// is handed to `handler` on the transport's reader thread.
    pub fn scan<F>(&self, ctx: &Context, allow_duplicates: bool, handler: F) -> Result<()>
    where
        F: FnMut(Advertisement) -> Result<()> + Send + 'static,
    {
        self.hci.set_adv_handler(Some(Arc::new(Mutex::new(handler))));
        let result = self.run_scan(ctx, allow_duplicates);
        self.hci.set_adv_handler(None);
        result
    }

    fn run_scan(&self, ctx: &Context, allow_duplicates: bool) -> Result<()> {
        self.hci.send(ctx, &self.hci.scan_params().to_command())?;
        self.hci.send(
            ctx,
            &HciCommand::LeSetScanEnable {
                enable: true,
                filter_duplicates: !allow_duplicates,
            },
        )?;
        *lock(&self.scanning) = Some(allow_duplicates);
        debug!("device: scanning (duplicates {})", allow_duplicates);

        let result = self.wait(ctx);

        *lock(&self.scanning) = None;
        if result.is_ok() {
            let stop = HciCommand::LeSetScanEnable {
                enable: false,
                filter_duplicates: false,
            };
            if let Err(e) = self.hci.send(&cleanup_ctx(), &stop) {
                warn!("device: stop scan: {}", e);
            }
        }
        result
    }

    /// Scan until an advertisement accepted by `filter` shows up, then dial it
    pub fn connect<F>(&self, ctx: &Context, filter: F) -> Result<GattClient>
    where
        F: Fn(&Advertisement) -> bool + Send + 'static,
    {
        let found: Arc<Mutex<Option<Advertisement>>> = Arc::new(Mutex::new(None));
        let scan_ctx = ctx.child();

        let slot = found.clone();
        let stop = scan_ctx.clone();
        self.scan(&scan_ctx, false, move |adv| {
            if adv.connectable() && filter(&adv) {
                let mut slot = lock(&slot);
                if slot.is_none() {
                    *slot = Some(adv);
                    stop.cancel();
                }
            }
            Ok(())
        })?;

        let target = lock(&found).take();
        match target {
            Some(adv) => {
                info!("device: connecting to {}", adv.address);
                self.dial(ctx, adv.address.addr, adv.address.addr_type)
            }
            None => match ctx.err() {
                Some(err) => Err(err.into()),
                None => Err(Error::NotFound),
            },
        }
    }

    /// Run a BR/EDR inquiry for as long as `ctx` allows.
    ///
    /// `ctx` must carry a deadline; it is converted into the inquiry length
    /// in units of 1.28 s.
    pub fn inquire<F>(&self, ctx: &Context, num_responses: u8, handler: F) -> Result<()>
    where
        F: FnMut(InquiryResponse) -> Result<()> + Send + 'static,
    {
        let remaining = ctx.remaining().ok_or_else(|| {
            Error::InvalidParameter("inquiry requires a context with a deadline".into())
        })?;
        let state = InquiryState {
            length: inquiry_length(remaining),
            num_responses,
        };

        let seen = self.inquired.clone();
        let mut handler = handler;
        self.hci.set_inquiry_handler(Some(Arc::new(Mutex::new(
            move |rsp: InquiryResponse| {
                lock(&seen).insert(BdAddr::new(rsp.bd_addr), rsp.clone());
                handler(rsp)
            },
        ))));

        let result = self.run_inquiry(ctx, state);
        self.hci.set_inquiry_handler(None);
        result
    }

    fn run_inquiry(&self, ctx: &Context, state: InquiryState) -> Result<()> {
        let complete = self.hci.inquiry_complete();
        self.hci.send(
            ctx,
            &HciCommand::Inquiry {
                lap: GIAC_LAP,
                length: state.length,
                num_responses: state.num_responses,
            },
        )?;
        *lock(&self.inquiring) = Some(state);
        debug!("device: inquiry for {} units", state.length);

        let done = self.hci.done();
        let result = loop {
            if complete.wait_timeout(POLL_INTERVAL) {
                break Ok(());
            }
            if done.is_set() {
                break Err(HciError::TransportClosed.into());
            }
            if ctx.err().is_some() {
                if let Err(e) = self.hci.send(&cleanup_ctx(), &HciCommand::InquiryCancel) {
                    warn!("device: cancel inquiry: {}", e);
                }
                break Ok(());
            }
        };
        *lock(&self.inquiring) = None;
        result
    }

    // Pause scan and inquiry for the duration of a dial
    fn suspend(&self, ctx: &Context) -> Result<Suspended> {
        let mut suspended = Suspended::default();
        if lock(&self.scanning).is_some() {
            self.hci.send(
                ctx,
                &HciCommand::LeSetScanEnable {
                    enable: false,
                    filter_duplicates: false,
                },
            )?;
            suspended.scan = true;
        }
        let inquiry = *lock(&self.inquiring);
        if let Some(state) = inquiry {
            self.hci.send(ctx, &HciCommand::InquiryCancel)?;
            suspended.inquiry = Some(state);
        }
        Ok(suspended)
    }

    fn resume(&self, suspended: Suspended) {
        let ctx = cleanup_ctx();
        let scan = *lock(&self.scanning);
        if let (true, Some(allow_duplicates)) = (suspended.scan, scan) {
            let cmd = HciCommand::LeSetScanEnable {
                enable: true,
                filter_duplicates: !allow_duplicates,
            };
            if let Err(e) = self.hci.send(&ctx, &cmd) {
                warn!("device: resume scan: {}", e);
            }
        }
        let inquiring = lock(&self.inquiring).is_some();
        if let (Some(state), true) = (suspended.inquiry, inquiring) {
            let cmd = HciCommand::Inquiry {
                lap: GIAC_LAP,
                length: state.length,
                num_responses: state.num_responses,
            };
            if let Err(e) = self.hci.send(&ctx, &cmd) {
                warn!("device: resume inquiry: {}", e);
            }
        }
    }

    // Wait for the connection a create-connection command started. When the
    // caller gives up, `cancel` is issued; a controller that answers Command
    // Disallowed has already connected and that connection is returned.
    fn await_conn(
        &self,
        ctx: &Context,
        kind: AcceptKind,
        cancel: HciCommand,
    ) -> std::result::Result<Arc<Conn>, HciError> {
        let cause = match self.hci.accept(ctx, kind) {
            Ok(conn) => return Ok(conn),
            Err(e @ (HciError::Canceled | HciError::DeadlineExceeded)) => e,
            Err(e) => return Err(e),
        };

        debug!("device: dial abandoned ({}), canceling", cause);
        let cleanup = cleanup_ctx();
        match self.hci.send(&cleanup, &cancel) {
            Ok(()) => {
                // The controller reports the abandoned attempt as a failed
                // connection complete; a connection can still win the race.
                match self.hci.accept(&cleanup, kind) {
                    Ok(conn) => Ok(conn),
                    Err(_) => Err(HciError::ConnectionCanceled),
                }
            }
            Err(HciError::Controller { code }) if code == status::COMMAND_DISALLOWED => {
                debug!("device: cancel disallowed, collecting connection");
                self.hci.accept(&cleanup, kind)
            }
            Err(e) => Err(e),
        }
    }

    fn dial_le(
        &self,
        ctx: &Context,
        addr: BdAddr,
        addr_type: AddressType,
    ) -> std::result::Result<Arc<Conn>, HciError> {
        self.hci.clear_accept(AcceptKind::LeMaster);
        self.hci
            .send(ctx, &self.options.conn_params.create_command(addr, addr_type))?;
        self.await_conn(ctx, AcceptKind::LeMaster, HciCommand::LeCreateConnectionCancel)
    }

    /// Connect to an LE peripheral and return a GATT client for it
    pub fn dial(&self, ctx: &Context, addr: BdAddr, addr_type: AddressType) -> Result<GattClient> {
        let _dialing = lock(&self.dialing);
        info!("device: dialing {}", addr);

        let suspended = self.suspend(ctx)?;
        let result = self.dial_le(ctx, addr, addr_type);
        self.resume(suspended);

        Ok(GattClient::new(result?))
    }

    /// Page a BR/EDR device and return the ACL connection
    pub fn dial_bredr(&self, ctx: &Context, addr: BdAddr) -> Result<Arc<Conn>> {
        let _dialing = lock(&self.dialing);
        info!("device: paging {}", addr);

        let (page_scan_repetition_mode, clock_offset) = lock(&self.inquired)
            .get(&addr)
            .map(|r| (r.page_scan_repetition_mode, r.clock_offset | 0x8000))
            .unwrap_or((PAGE_SCAN_REPETITION_MODE_R1, 0));
        let cmd = HciCommand::CreateConnection {
            bd_addr: addr.bytes,
            packet_type: ACL_PACKET_TYPES,
            page_scan_repetition_mode,
            clock_offset,
            allow_role_switch: ALLOW_ROLE_SWITCH,
        };

        let suspended = self.suspend(ctx)?;
        self.hci.clear_accept(AcceptKind::BrEdrMaster);
        let result = self.hci.send(ctx, &cmd).and_then(|()| {
            self.await_conn(
                ctx,
                AcceptKind::BrEdrMaster,
                HciCommand::CreateConnectionCancel { bd_addr: addr.bytes },
            )
        });
        self.resume(suspended);
        Ok(result?)
    }

    /// Page `addr` and open RFCOMM server channel `channel` on it
    pub fn dial_rfcomm(&self, ctx: &Context, addr: BdAddr, channel: u8) -> Result<RfcommClient> {
        let conn = self.dial_bredr(ctx, addr)?;
        match RfcommClient::dial(ctx, conn.clone(), channel) {
            Ok(client) => Ok(client),
            Err(e) => {
                if let Err(close) = conn.close() {
                    debug!("device: close after failed rfcomm dial: {}", close);
                }
                Err(e.into())
            }
        }
    }

    /// Wait for a central to connect while advertising
    pub fn accept(&self, ctx: &Context) -> Result<GattClient> {
        let conn = self.hci.accept(ctx, AcceptKind::LeSlave)?;
        info!("device: accepted {}", conn.peer());
        Ok(GattClient::new(conn))
    }

    /// Start advertising `adv`, answering scan requests with `scan_response`
    pub fn advertise(&self, ctx: &Context, adv: &AdvPacket, scan_response: &AdvPacket) -> Result<()> {
        if self.hci.is_advertising() {
            self.hci
                .send(ctx, &HciCommand::LeSetAdvertiseEnable { enable: false })?;
        }
        self.hci.send(ctx, &self.options.adv_params.to_command())?;
        self.hci.send(
            ctx,
            &HciCommand::LeSetAdvertisingData {
                data: adv.bytes().to_vec(),
            },
        )?;
        self.hci.send(
            ctx,
            &HciCommand::LeSetScanResponseData {
                data: scan_response.bytes().to_vec(),
            },
        )?;
        self.hci
            .send(ctx, &HciCommand::LeSetAdvertiseEnable { enable: true })?;
        self.hci.set_advertising(true);
        Ok(())
    }

    /// Advertise `name` and `services`. A name that does not fit next to the
    /// services is moved to the scan response.
    pub fn advertise_name_and_services(
        &self,
        ctx: &Context,
        name: &str,
        services: &[Uuid],
    ) -> Result<()> {
        let (adv, rsp) = adv::name_and_services(name, services);
        self.advertise(ctx, &adv, &rsp)
    }

    pub fn advertise_manufacturer_data(
        &self,
        ctx: &Context,
        company_id: u16,
        data: &[u8],
    ) -> Result<()> {
        let mut adv = AdvPacket::new();
        adv.append_flags(FLAG_LE_GENERAL_DISCOVERABLE | FLAG_BR_EDR_NOT_SUPPORTED);
        if !adv.append_manufacturer_data(company_id, data) {
            return Err(Error::InvalidParameter(format!(
                "{} bytes of manufacturer data do not fit an advertisement",
                data.len()
            )));
        }
        self.advertise(ctx, &adv, &AdvPacket::new())
    }

    /// Advertise a raw iBeacon payload (the bytes after the company id)
    pub fn advertise_ibeacon_data(&self, ctx: &Context, data: &[u8]) -> Result<()> {
        self.advertise_manufacturer_data(ctx, IBEACON_COMPANY_ID, data)
    }

    pub fn advertise_ibeacon(
        &self,
        ctx: &Context,
        uuid: Uuid,
        major: u16,
        minor: u16,
        power: i8,
    ) -> Result<()> {
        self.advertise(ctx, &adv::ibeacon(uuid, major, minor, power), &AdvPacket::new())
    }

    pub fn stop_advertising(&self, ctx: &Context) -> Result<()> {
        self.hci.set_advertising(false);
        self.hci
            .send(ctx, &HciCommand::LeSetAdvertiseEnable { enable: false })?;
        Ok(())
    }

    /// Disconnect everything and shut the transport down
    pub fn stop(&self) -> Result<()> {
        self.hci.close()?;
        Ok(())
    }
}
