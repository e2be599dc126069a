//! HCI transport
//!
//! [`Hci`] owns the controller socket and a reader thread. Commands are
//! issued through [`Hci::send`], which gates on the controller's command
//! credit and waits for the matching Command Complete or Command Status.
//! Everything else the reader sees is dispatched here: ACL data goes to the
//! owning [`Conn`], connection events feed the accept queues, advertising
//! reports feed the scan history.

use crate::context::{Context, Signal, POLL_INTERVAL};
use crate::error::{CodecError, HciError};
use crate::gap::adv::Advertisement;
use crate::gap::history::ScanHistory;
use crate::gap::types::{Address, AddressType, BdAddr, Role};
use crate::hci::command::{
    CommandResponse, HciCommand, LeReadAdvertisingChannelTxPowerRp, LeReadBufferSizeRp,
    ReadBdAddrRp, ReadBufferSizeRp,
};
use crate::hci::config::{HciConfig, ScanParams};
use crate::hci::constants::*;
use crate::hci::event::*;
use crate::hci::pool::Pool;
use crate::hci::socket::{HciSocket, Socket};
use crate::hci::status;
use crate::l2cap::conn::{Conn, ConnSetup, LinkType};
use crate::smp::{RejectPairing, SmpHandler};
use log::{debug, error, info, trace, warn};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicI8, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, RecvTimeoutError, SyncSender};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, RwLock};
use std::thread::{self, JoinHandle};
use std::time::Instant;

/// Receives every advertisement produced by a scan
pub type AdvHandler = Arc<Mutex<dyn FnMut(Advertisement) -> crate::error::Result<()> + Send>>;

/// Receives every device found by an inquiry
pub type InquiryHandler = Arc<Mutex<dyn FnMut(InquiryResponse) -> crate::error::Result<()> + Send>>;

/// Which accept queue a connection event lands in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcceptKind {
    /// LE connections this side initiated
    LeMaster,
    /// LE connections the peer initiated while we advertised
    LeSlave,
    /// BR/EDR connections this side initiated
    BrEdrMaster,
}

fn lock<T: ?Sized>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

// Command credit granted by the controller
struct Credits {
    count: Mutex<usize>,
    cond: Condvar,
    cap: usize,
}

impl Credits {
    fn new(cap: usize) -> Self {
        Self {
            count: Mutex::new(1),
            cond: Condvar::new(),
            cap,
        }
    }

    fn acquire(&self, ctx: &Context, done: &Signal) -> Result<(), HciError> {
        let mut count = lock(&self.count);
        loop {
            if *count > 0 {
                *count -= 1;
                return Ok(());
            }
            if let Some(err) = ctx.err() {
                return Err(err.into());
            }
            if done.is_set() {
                return Err(HciError::TransportClosed);
            }
            count = self
                .cond
                .wait_timeout(count, POLL_INTERVAL)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|e| e.into_inner().0);
        }
    }

    // Controller reported how many commands it will accept now
    fn set(&self, n: usize) {
        *lock(&self.count) = n.min(self.cap);
        self.cond.notify_all();
    }

    fn give_back(&self) {
        let mut count = lock(&self.count);
        *count = (*count + 1).min(self.cap);
        drop(count);
        self.cond.notify_all();
    }

    fn available(&self) -> usize {
        *lock(&self.count)
    }
}

// Connections (or connection failures) waiting for a dialer or acceptor
#[derive(Default)]
struct AcceptQueue {
    queue: Mutex<VecDeque<Result<Arc<Conn>, HciError>>>,
    cond: Condvar,
}

impl AcceptQueue {
    fn push(&self, item: Result<Arc<Conn>, HciError>) {
        lock(&self.queue).push_back(item);
        self.cond.notify_all();
    }

    fn pop(&self, ctx: &Context, done: &Signal) -> Result<Arc<Conn>, HciError> {
        let mut queue = lock(&self.queue);
        loop {
            if let Some(item) = queue.pop_front() {
                return item;
            }
            if let Some(err) = ctx.err() {
                return Err(err.into());
            }
            if done.is_set() {
                return Err(HciError::TransportClosed);
            }
            queue = self
                .cond
                .wait_timeout(queue, POLL_INTERVAL)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|e| e.into_inner().0);
        }
    }

    fn clear(&self) {
        lock(&self.queue).clear();
    }
}

/// Shared transport state. Connections hold a weak reference to it.
pub(crate) struct HciInner {
    config: HciConfig,
    socket: Arc<dyn Socket>,
    credits: Credits,
    pending: Mutex<HashMap<u16, SyncSender<Vec<u8>>>>,
    pending_cond: Condvar,
    conns: Mutex<HashMap<u16, Arc<Conn>>>,
    pool: RwLock<Option<Arc<Pool>>>,
    addr: Mutex<BdAddr>,
    tx_power: AtomicI8,
    scan_params: Mutex<ScanParams>,
    advertising: AtomicBool,
    adv_handler: Mutex<Option<AdvHandler>>,
    inquiry_handler: Mutex<Option<InquiryHandler>>,
    inquiry_done: Mutex<Option<Signal>>,
    history: Mutex<ScanHistory>,
    le_master: AcceptQueue,
    le_slave: AcceptQueue,
    bredr_master: AcceptQueue,
    smp: RwLock<Arc<dyn SmpHandler>>,
    reader: Mutex<Option<JoinHandle<()>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    closing: AtomicBool,
    done: Signal,
}

// Removes a pending-command record when the sender returns
struct PendingGuard<'a> {
    inner: &'a HciInner,
    opcode: u16,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        lock(&self.inner.pending).remove(&self.opcode);
        self.inner.pending_cond.notify_all();
    }
}

impl HciInner {
    fn conns(&self) -> MutexGuard<'_, HashMap<u16, Arc<Conn>>> {
        lock(&self.conns)
    }

    pub(crate) fn pool(&self) -> Option<Arc<Pool>> {
        self.pool.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub(crate) fn done(&self) -> &Signal {
        &self.done
    }

    /// Run `f` on a housekeeping thread that `close` waits for
    pub(crate) fn spawn_worker<F>(&self, name: &str, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        match thread::Builder::new().name(name.to_string()).spawn(f) {
            Ok(handle) => {
                let mut workers = lock(&self.workers);
                workers.retain(|h| !h.is_finished());
                workers.push(handle);
            }
            Err(e) => error!("hci: spawn {}: {}", name, e),
        }
    }

    // Wait until no other command with this opcode is in flight, then claim it
    fn register(
        &self,
        ctx: &Context,
        opcode: u16,
    ) -> Result<(PendingGuard<'_>, Receiver<Vec<u8>>), HciError> {
        let mut table = lock(&self.pending);
        loop {
            if !table.contains_key(&opcode) {
                let (tx, rx) = sync_channel(1);
                table.insert(opcode, tx);
                return Ok((PendingGuard { inner: self, opcode }, rx));
            }
            if let Some(err) = ctx.err() {
                return Err(err.into());
            }
            if self.done.is_set() {
                return Err(HciError::TransportClosed);
            }
            table = self
                .pending_cond
                .wait_timeout(table, POLL_INTERVAL)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|e| e.into_inner().0);
        }
    }

    pub(crate) fn send_with<R: CommandResponse>(
        &self,
        ctx: &Context,
        cmd: &HciCommand,
    ) -> Result<R, HciError> {
        if self.done.is_set() {
            return Err(HciError::TransportClosed);
        }

        let opcode = cmd.opcode();
        let (_guard, rx) = self.register(ctx, opcode)?;
        self.credits.acquire(ctx, &self.done)?;

        let mut buf = [0u8; 1 + HCI_COMMAND_HDR_SIZE + HCI_MAX_PARAM_LEN];
        let n = match cmd.marshal(&mut buf) {
            Ok(n) => n,
            Err(e) => {
                self.credits.give_back();
                return Err(e.into());
            }
        };

        trace!("hci: > {:04x} {}", opcode, hex::encode(&buf[4..n]));
        if let Err(e) = self.socket.write(&buf[..n]) {
            self.credits.give_back();
            return Err(e);
        }

        loop {
            match rx.recv_timeout(POLL_INTERVAL) {
                Ok(rsp) => {
                    if let Some(&code) = rsp.first() {
                        if code != status::SUCCESS {
                            return Err(HciError::Controller { code });
                        }
                    }
                    match R::unmarshal(rsp.get(1..).unwrap_or(&[])) {
                        Ok(r) => return Ok(r),
                        Err(e) => warn!("hci: ignoring response to {:04x}: {}", opcode, e),
                    }
                }
                Err(RecvTimeoutError::Timeout) => {
                    if let Some(err) = ctx.err() {
                        return Err(err.into());
                    }
                    if self.done.is_set() {
                        return Err(HciError::TransportClosed);
                    }
                }
                Err(RecvTimeoutError::Disconnected) => return Err(HciError::TransportClosed),
            }
        }
    }

    pub(crate) fn send(&self, ctx: &Context, cmd: &HciCommand) -> Result<(), HciError> {
        self.send_with::<()>(ctx, cmd)
    }

    fn deliver(&self, opcode: u16, rsp: Vec<u8>) {
        match lock(&self.pending).get(&opcode) {
            Some(tx) => {
                if tx.try_send(rsp).is_err() {
                    warn!("hci: duplicate response for {:04x}", opcode);
                }
            }
            None => warn!("hci: stale response for {:04x}", opcode),
        }
    }

    fn read_loop(self: Arc<Self>) {
        let mut buf = vec![0u8; HCI_MAX_FRAME_SIZE];
        loop {
            let n = match self.socket.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    if !self.done.is_set() {
                        error!("hci: read: {}", e);
                    }
                    break;
                }
            };
            if let Err(e) = self.handle_packet(&buf[..n]) {
                warn!("hci: {}", e);
            }
        }
        debug!("hci: reader exiting");
        self.done.fire();
    }

    fn handle_packet(self: &Arc<Self>, pkt: &[u8]) -> Result<(), HciError> {
        let Some((&kind, body)) = pkt.split_first() else {
            return Ok(());
        };
        match kind {
            HCI_ACL_PKT => self.handle_acl(body),
            HCI_EVENT_PKT => self.handle_event(body),
            HCI_VENDOR_PKT => Ok(()),
            other => Err(HciError::UnsupportedPacket(other)),
        }
    }

    fn handle_acl(&self, data: &[u8]) -> Result<(), HciError> {
        CodecError::check(data, HCI_ACL_HDR_SIZE)?;
        let handle = u16::from_le_bytes([data[0], data[1]]) & HANDLE_MASK;

        // The map guard must be gone before any per-connection lock
        let conn = self.conns().get(&handle).cloned();
        match conn.and_then(|c| c.packet_sender()) {
            Some(tx) => {
                if tx.send(data.to_vec()).is_err() {
                    debug!("hci: conn {:#05x} no longer reading", handle);
                }
            }
            None => trace!("hci: dropping ACL for unknown handle {:#05x}", handle),
        }
        Ok(())
    }

    fn handle_event(self: &Arc<Self>, data: &[u8]) -> Result<(), HciError> {
        let event = HciEvent::parse(data)?;
        let params = event.parameters.as_slice();

        match event.event_code {
            EVT_CMD_COMPLETE => {
                let cc = CommandComplete::decode(params)?;
                self.credits.set(cc.num_hci_command_packets as usize);
                if cc.opcode != 0 {
                    self.deliver(cc.opcode, cc.return_parameters);
                }
            }
            EVT_CMD_STATUS => {
                let cs = CommandStatus::decode(params)?;
                self.credits.set(cs.num_hci_command_packets as usize);
                if cs.opcode != 0 {
                    self.deliver(cs.opcode, vec![cs.status]);
                }
            }
            EVT_DISCONN_COMPLETE => self.handle_disconnection(params)?,
            EVT_NUM_COMPLETED_PACKETS => {
                let ncp =
                    NumberOfCompletedPackets::decode(params, self.config.completed_packets_layout)?;
                if let Some(pool) = self.pool() {
                    for (handle, n) in ncp.entries {
                        pool.release(handle, n as usize);
                    }
                }
            }
            EVT_CONN_COMPLETE => self.handle_conn_complete(params)?,
            EVT_INQUIRY_RESULT | EVT_INQUIRY_RESULT_WITH_RSSI | EVT_EXTENDED_INQUIRY_RESULT => {
                let result = InquiryResult::decode(event.event_code, params)?;
                self.dispatch_inquiry(result.responses);
            }
            EVT_INQUIRY_COMPLETE => {
                let ev = InquiryComplete::decode(params)?;
                debug!("hci: inquiry complete, status {:#04x}", ev.status);
                if let Some(signal) = lock(&self.inquiry_done).take() {
                    signal.fire();
                }
            }
            EVT_LE_META_EVENT => self.handle_le_meta(params)?,
            EVT_ENCRYPTION_CHANGE => {
                let ev = EncryptionChange::decode(params)?;
                debug!(
                    "hci: conn {:#05x} encryption {} (status {:#04x})",
                    ev.handle, ev.enabled, ev.status
                );
            }
            EVT_HARDWARE_ERROR => error!("hci: hardware error {:02x?}", params),
            EVT_CONN_REQUEST
            | EVT_READ_REMOTE_VERSION_COMPLETE
            | EVT_MAX_SLOTS_CHANGE
            | EVT_PAGE_SCAN_REPETITION_MODE_CHANGE
            | EVT_ENCRYPTION_KEY_REFRESH_COMPLETE => {
                debug!("hci: ignoring event {:#04x}", event.event_code)
            }
            EVT_VENDOR => {}
            other => {
                self.credits.set(1);
                return Err(HciError::UnknownEvent(other));
            }
        }
        Ok(())
    }

    fn handle_le_meta(self: &Arc<Self>, params: &[u8]) -> Result<(), HciError> {
        let Some((&subevent, body)) = params.split_first() else {
            return Err(CodecError::short(1, 0).into());
        };

        match subevent {
            EVT_LE_CONN_COMPLETE => self.handle_le_conn_complete(body)?,
            EVT_LE_ADVERTISING_REPORT => {
                let reports = LeAdvertisingReport::decode_all(body)?;
                self.handle_adv_reports(&reports);
            }
            EVT_LE_CONN_UPDATE_COMPLETE => {
                let ev = LeConnectionUpdateComplete::decode(body)?;
                debug!(
                    "hci: conn {:#05x} updated: interval {} latency {} timeout {} (status {:#04x})",
                    ev.handle, ev.conn_interval, ev.conn_latency, ev.supervision_timeout, ev.status
                );
            }
            EVT_LE_LTK_REQUEST => {
                let ev = LeLongTermKeyRequest::decode(body)?;
                let inner = Arc::clone(self);
                self.spawn_worker("hci-ltk", move || {
                    let ctx = Context::background();
                    let cmd = HciCommand::LeLongTermKeyRequestNegativeReply { handle: ev.handle };
                    if let Err(e) = inner.send(&ctx, &cmd) {
                        warn!("hci: LTK negative reply for {:#05x}: {}", ev.handle, e);
                    }
                });
            }
            EVT_LE_READ_REMOTE_FEATURES_COMPLETE => {}
            other => debug!("hci: ignoring LE sub-event {:#04x}", other),
        }
        Ok(())
    }

    fn new_conn(
        self: &Arc<Self>,
        handle: u16,
        role: Role,
        link: LinkType,
        peer: Address,
    ) -> Option<Arc<Conn>> {
        let Some(pool) = self.pool() else {
            error!("hci: connection {:#05x} completed before init", handle);
            return None;
        };
        let smp = self.smp.read().unwrap_or_else(|e| e.into_inner()).clone();
        let setup = ConnSetup {
            handle,
            role,
            link,
            peer,
            queue_depth: self.config.conn_queue_depth,
        };
        let conn = Conn::new(
            setup,
            Arc::downgrade(self),
            Arc::clone(&self.socket),
            pool,
            self.done.clone(),
            smp,
        );
        self.conns().insert(handle, Arc::clone(&conn));
        Some(conn)
    }

    fn handle_le_conn_complete(self: &Arc<Self>, params: &[u8]) -> Result<(), HciError> {
        let ev = LeConnectionComplete::decode(params)?;
        if ev.status != status::SUCCESS {
            let err = if ev.status == status::UNKNOWN_CONNECTION_ID {
                HciError::ConnectionCanceled
            } else {
                HciError::Controller { code: ev.status }
            };
            self.le_master.push(Err(err));
            return Ok(());
        }

        let role = Role::from(ev.role);
        let peer = Address::new(
            BdAddr::new(ev.peer_address),
            AddressType::from(ev.peer_address_type),
        );
        info!("hci: LE connection {:#05x} to {} as {:?}", ev.handle, peer, role);

        if let Some(conn) = self.new_conn(ev.handle, role, LinkType::Le, peer) {
            match role {
                Role::Master => self.le_master.push(Ok(conn)),
                Role::Slave => self.le_slave.push(Ok(conn)),
            }
        }
        Ok(())
    }

    fn handle_conn_complete(self: &Arc<Self>, params: &[u8]) -> Result<(), HciError> {
        let ev = ConnectionComplete::decode(params)?;
        if ev.status != status::SUCCESS {
            let err = if ev.status == status::UNKNOWN_CONNECTION_ID {
                HciError::ConnectionCanceled
            } else {
                HciError::Controller { code: ev.status }
            };
            self.bredr_master.push(Err(err));
            return Ok(());
        }
        if ev.link_type != LINK_TYPE_ACL {
            debug!("hci: ignoring link type {} on {:#05x}", ev.link_type, ev.handle);
            return Ok(());
        }

        let peer = Address::new(BdAddr::new(ev.bd_addr), AddressType::Public);
        info!("hci: BR/EDR connection {:#05x} to {}", ev.handle, peer);
        if let Some(conn) = self.new_conn(ev.handle, Role::Master, LinkType::AclU, peer) {
            self.bredr_master.push(Ok(conn));
        }
        Ok(())
    }

    fn handle_disconnection(self: &Arc<Self>, params: &[u8]) -> Result<(), HciError> {
        let ev = DisconnectionComplete::decode(params)?;
        if ev.status != status::SUCCESS {
            warn!(
                "hci: disconnect of {:#05x} failed: {}",
                ev.handle,
                status::status_name(ev.status)
            );
            return Ok(());
        }

        let conn = self.conns().get(&ev.handle).cloned();
        let Some(conn) = conn else {
            debug!("hci: disconnection of unknown handle {:#05x}", ev.handle);
            return Ok(());
        };

        conn.mark_disconnected(ev.reason);
        if let Some(pool) = self.pool() {
            pool.release_all(ev.handle);
        }
        self.conns().remove(&ev.handle);
        info!(
            "hci: conn {:#05x} disconnected: {}",
            ev.handle,
            status::status_name(ev.reason)
        );

        if conn.role() == Role::Slave && self.advertising.load(Ordering::SeqCst) {
            let inner = Arc::clone(self);
            self.spawn_worker("hci-adv", move || {
                let ctx = Context::background();
                let cmd = HciCommand::LeSetAdvertiseEnable { enable: true };
                if let Err(e) = inner.send(&ctx, &cmd) {
                    warn!("hci: re-enable advertising: {}", e);
                }
            });
        }
        Ok(())
    }

    fn handle_adv_reports(&self, reports: &[LeAdvertisingReport]) {
        let now = Instant::now();
        let handler = lock(&self.adv_handler).clone();

        for report in reports {
            let adv = lock(&self.history).process(report, now);
            let Some(adv) = adv else {
                error!(
                    "hci: scan response from {} without a prior advertisement",
                    BdAddr::new(report.address)
                );
                continue;
            };
            if let Some(handler) = &handler {
                let mut f = lock(handler);
                if let Err(e) = (*f)(adv) {
                    warn!("hci: advertisement handler: {}", e);
                }
            }
        }

        lock(&self.history).evict(now);
    }

    fn dispatch_inquiry(&self, responses: Vec<InquiryResponse>) {
        let Some(handler) = lock(&self.inquiry_handler).clone() else {
            return;
        };
        self.spawn_worker("hci-inquiry", move || {
            for response in responses {
                let mut f = lock(&handler);
                if let Err(e) = (*f)(response) {
                    warn!("hci: inquiry handler: {}", e);
                }
            }
        });
    }
}

/// Handle to one controller
#[derive(Clone)]
pub struct Hci {
    inner: Arc<HciInner>,
}

impl std::fmt::Debug for Hci {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hci")
            .field("addr", &self.addr())
            .field("closed", &self.inner.done.is_set())
            .finish()
    }
}

impl Hci {
    /// Open the controller named by `config.dev_id` and start reading
    pub fn open(config: HciConfig) -> Result<Self, HciError> {
        let socket = HciSocket::open(config.dev_id)?;
        Ok(Self::with_socket(Arc::new(socket), config))
    }

    /// Run the transport over an already open socket
    pub fn with_socket(socket: Arc<dyn Socket>, config: HciConfig) -> Self {
        let credits = Credits::new(config.command_credits.max(1));
        let inner = Arc::new(HciInner {
            config,
            socket,
            credits,
            pending: Mutex::new(HashMap::new()),
            pending_cond: Condvar::new(),
            conns: Mutex::new(HashMap::new()),
            pool: RwLock::new(None),
            addr: Mutex::new(BdAddr::default()),
            tx_power: AtomicI8::new(0),
            scan_params: Mutex::new(ScanParams::default()),
            advertising: AtomicBool::new(false),
            adv_handler: Mutex::new(None),
            inquiry_handler: Mutex::new(None),
            inquiry_done: Mutex::new(None),
            history: Mutex::new(ScanHistory::default()),
            le_master: AcceptQueue::default(),
            le_slave: AcceptQueue::default(),
            bredr_master: AcceptQueue::default(),
            smp: RwLock::new(Arc::new(RejectPairing)),
            reader: Mutex::new(None),
            workers: Mutex::new(Vec::new()),
            closing: AtomicBool::new(false),
            done: Signal::new(),
        });

        let reader = Arc::clone(&inner);
        match thread::Builder::new()
            .name("hci-reader".into())
            .spawn(move || reader.read_loop())
        {
            Ok(handle) => *lock(&inner.reader) = Some(handle),
            Err(e) => {
                error!("hci: spawn reader: {}", e);
                inner.done.fire();
            }
        }

        Self { inner }
    }

    /// Bring the controller to a known state and size the ACL pool
    pub fn init(&self, ctx: &Context) -> Result<(), HciError> {
        let inner = &self.inner;
        inner.send(ctx, &HciCommand::Reset)?;

        let rp: ReadBdAddrRp = inner.send_with(ctx, &HciCommand::ReadBdAddr)?;
        *lock(&inner.addr) = BdAddr::new(rp.bd_addr);

        let bs: ReadBufferSizeRp = inner.send_with(ctx, &HciCommand::ReadBufferSize)?;
        let mut acl_len = bs.acl_data_packet_length;
        let mut acl_cnt = bs.total_acl_data_packets;

        let le: LeReadBufferSizeRp = inner.send_with(ctx, &HciCommand::LeReadBufferSize)?;
        if le.le_acl_data_packet_length != 0 && le.total_le_acl_data_packets != 0 {
            acl_len = le.le_acl_data_packet_length;
            acl_cnt = le.total_le_acl_data_packets as u16;
        }

        let tx: LeReadAdvertisingChannelTxPowerRp =
            inner.send_with(ctx, &HciCommand::LeReadAdvertisingChannelTxPower)?;
        inner.tx_power.store(tx.tx_power_level, Ordering::SeqCst);

        inner.send(
            ctx,
            &HciCommand::LeSetEventMask {
                event_mask: DEFAULT_LE_EVENT_MASK,
            },
        )?;
        inner.send(
            ctx,
            &HciCommand::SetEventMask {
                event_mask: DEFAULT_EVENT_MASK,
            },
        )?;
        inner.send(
            ctx,
            &HciCommand::WriteLeHostSupport {
                supported: 1,
                simultaneous: 0,
            },
        )?;

        let pool = Pool::new(acl_len, acl_cnt);
        info!(
            "hci: {} ready, {} ACL buffers of {} bytes",
            self.addr(),
            pool.count(),
            pool.buffer_capacity()
        );
        *inner.pool.write().unwrap_or_else(|e| e.into_inner()) = Some(Arc::new(pool));
        *lock(&inner.scan_params) = ScanParams::default();
        Ok(())
    }

    /// Issue a command that returns only a status
    pub fn send(&self, ctx: &Context, cmd: &HciCommand) -> Result<(), HciError> {
        self.inner.send(ctx, cmd)
    }

    /// Issue a command and decode its return parameters
    pub fn send_with<R: CommandResponse>(&self, ctx: &Context, cmd: &HciCommand) -> Result<R, HciError> {
        self.inner.send_with(ctx, cmd)
    }

    pub fn addr(&self) -> BdAddr {
        *lock(&self.inner.addr)
    }

    pub fn tx_power(&self) -> i8 {
        self.inner.tx_power.load(Ordering::SeqCst)
    }

    /// ACL transmit pool, present once `init` has succeeded
    pub fn pool(&self) -> Option<Arc<Pool>> {
        self.inner.pool()
    }

    /// Commands the controller will currently accept
    pub fn command_credits(&self) -> usize {
        self.inner.credits.available()
    }

    pub fn conn(&self, handle: u16) -> Option<Arc<Conn>> {
        self.inner.conns().get(&handle).cloned()
    }

    pub fn conns(&self) -> Vec<Arc<Conn>> {
        self.inner.conns().values().cloned().collect()
    }

    pub fn scan_params(&self) -> ScanParams {
        *lock(&self.inner.scan_params)
    }

    pub fn set_scan_params(&self, params: ScanParams) {
        *lock(&self.inner.scan_params) = params;
    }

    pub fn set_adv_handler(&self, handler: Option<AdvHandler>) {
        *lock(&self.inner.adv_handler) = handler;
    }

    pub fn set_inquiry_handler(&self, handler: Option<InquiryHandler>) {
        *lock(&self.inner.inquiry_handler) = handler;
    }

    /// Arm a signal fired by the next Inquiry Complete
    pub fn inquiry_complete(&self) -> Signal {
        let signal = Signal::new();
        *lock(&self.inner.inquiry_done) = Some(signal.clone());
        signal
    }

    pub fn set_smp_handler(&self, handler: Arc<dyn SmpHandler>) {
        *self.inner.smp.write().unwrap_or_else(|e| e.into_inner()) = handler;
    }

    /// Record whether advertising is on, so it can be resumed after a
    /// slave connection drops
    pub fn set_advertising(&self, enabled: bool) {
        self.inner.advertising.store(enabled, Ordering::SeqCst);
    }

    pub fn is_advertising(&self) -> bool {
        self.inner.advertising.load(Ordering::SeqCst)
    }

    /// Advertisement last seen from `addr`, joined with its scan response
    pub fn last_advertisement(&self, addr: &BdAddr) -> Option<Advertisement> {
        lock(&self.inner.history).get(&addr.to_string()).cloned()
    }

    fn queue(&self, kind: AcceptKind) -> &AcceptQueue {
        match kind {
            AcceptKind::LeMaster => &self.inner.le_master,
            AcceptKind::LeSlave => &self.inner.le_slave,
            AcceptKind::BrEdrMaster => &self.inner.bredr_master,
        }
    }

    /// Wait for the next connection event of `kind`
    pub fn accept(&self, ctx: &Context, kind: AcceptKind) -> Result<Arc<Conn>, HciError> {
        self.queue(kind).pop(ctx, &self.inner.done)
    }

    /// Drop connection events of `kind` nobody has collected
    pub fn clear_accept(&self, kind: AcceptKind) {
        self.queue(kind).clear();
    }

    /// Fires when the transport has shut down
    pub fn done(&self) -> Signal {
        self.inner.done.clone()
    }

    /// Disconnect every connection, close the socket and wait for the
    /// reader and housekeeping threads.
    pub fn close(&self) -> Result<(), HciError> {
        let inner = &self.inner;
        if inner.closing.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let deadline = Instant::now() + inner.config.close_timeout;
        for conn in self.conns() {
            let now = Instant::now();
            if now >= deadline {
                warn!("hci: close timed out with connections open");
                break;
            }
            let ctx = Context::background()
                .with_timeout(inner.config.close_conn_timeout.min(deadline - now));
            if let Err(e) = conn.close_with(&ctx) {
                debug!("hci: close {:#05x}: {}", conn.handle(), e);
                continue;
            }
            conn.disconnected()
                .wait_timeout(ctx.remaining().unwrap_or_default());
        }

        let result = inner.socket.close();
        inner.done.fire();

        let leftover: Vec<Arc<Conn>> = inner.conns().drain().map(|(_, c)| c).collect();
        for conn in leftover {
            conn.mark_disconnected(status::LOCAL_HOST_TERMINATED);
            if let Some(pool) = inner.pool() {
                pool.release_all(conn.handle());
            }
        }

        let me = thread::current().id();
        if let Some(reader) = lock(&inner.reader).take() {
            if reader.thread().id() != me && reader.join().is_err() {
                error!("hci: reader panicked");
            }
        }
        loop {
            let batch = std::mem::take(&mut *lock(&inner.workers));
            if batch.is_empty() {
                break;
            }
            for worker in batch {
                if worker.thread().id() != me && worker.join().is_err() {
                    error!("hci: worker panicked");
                }
            }
        }

        result
    }
}
