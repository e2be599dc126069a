//! ACL connection
//!
//! A [`Conn`] is created by the transport when a connection completes. It owns
//! two bounded queues: raw ACL packets pushed by the transport reader, and
//! reassembled L2CAP PDUs waiting for [`Conn::read`]. A recombine worker sits
//! between them and routes signaling and SMP traffic itself.
//!
//! Outbound SDUs are cut into PDUs of at most `tx_mtu` bytes, and each PDU
//! into ACL fragments that fit a pool buffer. The pool lock is held across the
//! fragments of one PDU so they reach the controller back to back.

use super::constants::*;
use super::packet::{AclHeader, BoundaryFlag, L2capHeader, Pdu};
use super::sig_handler::SigHandler;
use super::signaling::SignalingMessage;
use super::options::ConfigOption;
use super::types::{Channel, L2capError, L2capResult};
use crate::context::{Context, Signal, POLL_INTERVAL};
use crate::error::HciError;
use crate::gap::types::{Address, Role};
use crate::hci::config::ConnParams;
use crate::hci::constants::{HANDLE_MASK, HCI_ACL_HDR_SIZE, HCI_ACL_PKT};
use crate::hci::command::HciCommand;
use crate::hci::pool::Pool;
use crate::hci::socket::Socket;
use crate::hci::status;
use crate::hci::transport::HciInner;
use crate::smp::SmpHandler;
use log::{debug, error, trace, warn};
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU8, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::thread;
use std::time::Duration;

/// Deadline for replies the connection sends on its own behalf
const REPLY_TIMEOUT: Duration = Duration::from_secs(2);

/// Deadline for [`Conn::close`]
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

pub(crate) fn lock<T: ?Sized>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// Logical transport the connection runs over
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkType {
    Le,
    AclU,
}

impl LinkType {
    pub fn default_mtu(self) -> u16 {
        match self {
            LinkType::Le => L2CAP_LE_DEFAULT_MTU,
            LinkType::AclU => L2CAP_ACL_DEFAULT_MTU,
        }
    }

    pub fn signaling_cid(self) -> u16 {
        match self {
            LinkType::Le => L2CAP_CID_LE_SIGNALING,
            LinkType::AclU => L2CAP_CID_SIGNALING,
        }
    }
}

/// What the transport knows about a connection when it completes
#[derive(Debug, Clone)]
pub struct ConnSetup {
    pub handle: u16,
    pub role: Role,
    pub link: LinkType,
    pub peer: Address,
    /// Depth of the inbound packet and PDU queues
    pub queue_depth: usize,
}

// A PDU whose first fragment has arrived
struct Partial {
    cid: u16,
    length: usize,
    data: Vec<u8>,
}

pub struct Conn {
    handle: u16,
    role: Role,
    link: LinkType,
    peer: Address,

    hci: Weak<HciInner>,
    socket: Arc<dyn Socket>,
    pool: Arc<Pool>,
    transport_done: Signal,

    in_pkt: Mutex<Option<SyncSender<Vec<u8>>>>,
    in_pdu: Mutex<Receiver<Pdu>>,
    done: Signal,
    reason: AtomicU8,

    rx_mtu: AtomicU16,
    tx_mtu: AtomicU16,
    rx_mps: AtomicU16,
    credit_mode: AtomicBool,

    sig: SigHandler,
    smp: Arc<dyn SmpHandler>,
}

impl std::fmt::Debug for Conn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Conn")
            .field("handle", &self.handle)
            .field("role", &self.role)
            .field("link", &self.link)
            .field("peer", &self.peer)
            .field("done", &self.done.is_set())
            .finish()
    }
}

impl Conn {
    /// Create the connection and start its recombine worker
    pub(crate) fn new(
        setup: ConnSetup,
        hci: Weak<HciInner>,
        socket: Arc<dyn Socket>,
        pool: Arc<Pool>,
        transport_done: Signal,
        smp: Arc<dyn SmpHandler>,
    ) -> Arc<Self> {
        let depth = setup.queue_depth.max(1);
        let (pkt_tx, pkt_rx) = sync_channel(depth);
        let (pdu_tx, pdu_rx) = sync_channel(depth);
        let mtu = setup.link.default_mtu();

        let conn = Arc::new(Self {
            handle: setup.handle,
            role: setup.role,
            link: setup.link,
            peer: setup.peer,
            hci,
            socket,
            pool,
            transport_done,
            in_pkt: Mutex::new(Some(pkt_tx)),
            in_pdu: Mutex::new(pdu_rx),
            done: Signal::new(),
            reason: AtomicU8::new(0),
            rx_mtu: AtomicU16::new(mtu),
            tx_mtu: AtomicU16::new(mtu),
            rx_mps: AtomicU16::new(mtu),
            credit_mode: AtomicBool::new(false),
            sig: SigHandler::new(setup.link.signaling_cid(), mtu),
            smp,
        });

        let weak = Arc::downgrade(&conn);
        let name = format!("conn-{:03x}", setup.handle);
        let worker = move || recombine(weak, pkt_rx, pdu_tx);
        match conn.hci.upgrade() {
            Some(hci) => hci.spawn_worker(&name, worker),
            None => {
                if let Err(e) = thread::Builder::new().name(name).spawn(worker) {
                    error!("l2cap: spawn recombine worker: {}", e);
                }
            }
        }
        conn
    }

    pub fn handle(&self) -> u16 {
        self.handle
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn link(&self) -> LinkType {
        self.link
    }

    pub fn peer(&self) -> Address {
        self.peer
    }

    /// Sender the transport reader pushes raw ACL packets into, until the
    /// connection goes away
    pub(crate) fn packet_sender(&self) -> Option<SyncSender<Vec<u8>>> {
        lock(&self.in_pkt).clone()
    }

    #[cfg(test)]
    pub(crate) fn hold_inbound(&self) -> MutexGuard<'_, Option<SyncSender<Vec<u8>>>> {
        lock(&self.in_pkt)
    }

    /// Tear down local state once the controller reports the link gone
    pub(crate) fn mark_disconnected(&self, reason: u8) {
        if self.done.fire() {
            self.reason.store(reason, Ordering::SeqCst);
            debug!(
                "l2cap: conn {:#05x} done: {}",
                self.handle,
                status::status_name(reason)
            );
        }
        lock(&self.in_pkt).take();
    }

    /// One-shot fired when the connection is gone
    pub fn disconnected(&self) -> Signal {
        self.done.clone()
    }

    pub fn is_disconnected(&self) -> bool {
        self.done.is_set()
    }

    /// Reason the controller gave for the disconnect
    pub fn disconnect_reason(&self) -> Option<u8> {
        self.done
            .is_set()
            .then(|| self.reason.load(Ordering::SeqCst))
    }

    pub fn rx_mtu(&self) -> u16 {
        self.rx_mtu.load(Ordering::SeqCst)
    }

    /// Set the receive MTU; the receive MPS follows it
    pub fn set_rx_mtu(&self, mtu: u16) {
        self.rx_mtu.store(mtu, Ordering::SeqCst);
        self.rx_mps.store(mtu, Ordering::SeqCst);
    }

    pub fn tx_mtu(&self) -> u16 {
        self.tx_mtu.load(Ordering::SeqCst)
    }

    pub fn set_tx_mtu(&self, mtu: u16) {
        self.tx_mtu.store(mtu, Ordering::SeqCst);
    }

    pub fn rx_mps(&self) -> u16 {
        self.rx_mps.load(Ordering::SeqCst)
    }

    /// In LE credit based mode the first PDU of every SDU carries the SDU length
    pub fn set_credit_mode(&self, enabled: bool) {
        self.credit_mode.store(enabled, Ordering::SeqCst);
    }

    pub(crate) fn hci(&self) -> Option<Arc<HciInner>> {
        self.hci.upgrade()
    }

    pub(crate) fn sig(&self) -> &SigHandler {
        &self.sig
    }

    /// Wait for the next PDU addressed to ATT or a dynamic channel
    pub fn read(&self, ctx: &Context) -> L2capResult<Pdu> {
        let rx = lock(&self.in_pdu);
        loop {
            if let Some(err) = ctx.err() {
                return Err(err.into());
            }
            match rx.recv_timeout(POLL_INTERVAL) {
                Ok(pdu) => return Ok(pdu),
                Err(RecvTimeoutError::Timeout) => {
                    if self.done.is_set() {
                        return Err(L2capError::ClosedPipe);
                    }
                }
                Err(RecvTimeoutError::Disconnected) => return Err(L2capError::ClosedPipe),
            }
        }
    }

    /// Send an SDU on `cid`, returning the number of SDU bytes written
    pub fn write(&self, ctx: &Context, cid: u16, sdu: &[u8]) -> L2capResult<usize> {
        if self.done.is_set() {
            return Err(L2capError::ClosedPipe);
        }
        let mtu = self.tx_mtu().max(1) as usize;

        if self.credit_mode.load(Ordering::SeqCst) {
            let first = sdu.len().min(mtu.saturating_sub(2));
            let mut head = Vec::with_capacity(2 + first);
            head.extend_from_slice(&(sdu.len() as u16).to_le_bytes());
            head.extend_from_slice(&sdu[..first]);
            self.send_pdu(ctx, cid, &head)?;
            for chunk in sdu[first..].chunks(mtu) {
                self.send_pdu(ctx, cid, chunk)?;
            }
        } else if sdu.is_empty() {
            self.send_pdu(ctx, cid, sdu)?;
        } else {
            for chunk in sdu.chunks(mtu) {
                self.send_pdu(ctx, cid, chunk)?;
            }
        }
        Ok(sdu.len())
    }

    /// Send one L2CAP PDU as a run of ACL fragments
    pub(crate) fn send_pdu(&self, ctx: &Context, cid: u16, payload: &[u8]) -> L2capResult<()> {
        let mut frame = Vec::with_capacity(L2CAP_HEADER_SIZE + payload.len());
        frame.extend_from_slice(&L2capHeader::new(payload.len() as u16, cid).to_bytes());
        frame.extend_from_slice(payload);

        let max = self.pool.payload_capacity().max(1);
        let _guard = self.pool.lock();
        for (i, chunk) in frame.chunks(max).enumerate() {
            let mut buf = self.pool.acquire(self.handle, ctx, &self.transport_done)?;
            if self.done.is_set() {
                self.pool.recycle(buf);
                self.pool.release(self.handle, 1);
                return Err(L2capError::ClosedPipe);
            }

            let boundary = if i == 0 {
                BoundaryFlag::HostStart
            } else {
                BoundaryFlag::Continuing
            };
            let word = (self.handle & HANDLE_MASK) | ((boundary.bits() as u16) << 12);
            buf.push(HCI_ACL_PKT);
            buf.extend_from_slice(&word.to_le_bytes());
            buf.extend_from_slice(&(chunk.len() as u16).to_le_bytes());
            buf.extend_from_slice(chunk);

            trace!("l2cap: tx {:#05x} cid {:#06x} {}", self.handle, cid, hex::encode(buf.as_slice()));
            match self.socket.write(buf.as_slice()) {
                Ok(_) => self.pool.recycle(buf),
                Err(e) => {
                    self.pool.recycle(buf);
                    self.pool.release(self.handle, 1);
                    return Err(e.into());
                }
            }
        }

        if self.done.is_set() {
            self.pool.release_all(self.handle);
        }
        Ok(())
    }

    /// Ask the controller to disconnect (remote user terminated)
    pub fn close(&self) -> Result<(), HciError> {
        self.close_with(&Context::background().with_timeout(CLOSE_TIMEOUT))
    }

    pub fn close_with(&self, ctx: &Context) -> Result<(), HciError> {
        let hci = self.hci.upgrade().ok_or(HciError::TransportClosed)?;
        hci.send(
            ctx,
            &HciCommand::Disconnect {
                handle: self.handle,
                reason: status::REMOTE_USER_TERMINATED,
            },
        )
    }

    /// Request new LE connection parameters
    pub fn update_params(&self, ctx: &Context, params: &ConnParams) -> Result<(), HciError> {
        let hci = self.hci.upgrade().ok_or(HciError::TransportClosed)?;
        hci.send(ctx, &params.update_command(self.handle))
    }

    /// Issue a signaling request and wait for its response
    pub fn signal(
        &self,
        ctx: &Context,
        request: SignalingMessage,
        timeout: Duration,
    ) -> L2capResult<SignalingMessage> {
        self.sig.signal(self, ctx, request, timeout)
    }

    /// Send configuration options for the channel whose remote end is `dcid`
    pub fn configure(
        &self,
        ctx: &Context,
        dcid: u16,
        options: &[ConfigOption],
        timeout: Duration,
    ) -> L2capResult<Vec<ConfigOption>> {
        self.sig.configuration_request(self, ctx, dcid, options, timeout)
    }

    /// Query the peer with an L2CAP Information Request
    pub fn information_request(&self, ctx: &Context, info_type: u16) -> L2capResult<Vec<u8>> {
        self.sig.information_request(self, ctx, info_type)
    }

    /// Open a dynamic channel to `psm` and configure our receive MTU on it
    pub fn connect_channel(&self, ctx: &Context, psm: u16, mtu: u16) -> L2capResult<Channel> {
        self.sig.connect_channel(self, ctx, psm, mtu)
    }

    pub fn disconnect_channel(&self, ctx: &Context, channel: &Channel) -> L2capResult<()> {
        self.sig.disconnect_channel(self, ctx, channel)
    }

    /// Current state of a dynamic channel opened on this connection
    pub fn channel(&self, local_cid: u16) -> Option<Channel> {
        self.sig.channel(local_cid)
    }

    fn dispatch(&self, pdu: Pdu, to_reader: &SyncSender<Pdu>) -> bool {
        match pdu.cid {
            L2CAP_CID_SIGNALING | L2CAP_CID_LE_SIGNALING => {
                self.sig.handle(self, pdu.cid, &pdu.payload);
                true
            }
            L2CAP_CID_SMP => {
                match self.smp.handle(self.handle, &pdu.payload) {
                    Ok(Some(reply)) => {
                        let ctx = Context::background().with_timeout(REPLY_TIMEOUT);
                        if let Err(e) = self.send_pdu(&ctx, L2CAP_CID_SMP, &reply) {
                            warn!("l2cap: SMP reply on {:#05x}: {}", self.handle, e);
                        }
                    }
                    Ok(None) => {}
                    Err(e) => warn!("l2cap: SMP on {:#05x}: {}", self.handle, e),
                }
                true
            }
            cid if cid == L2CAP_CID_ATT || cid >= L2CAP_CID_DYNAMIC_START => {
                self.deliver(pdu, to_reader)
            }
            other => {
                debug!("l2cap: dropping PDU for cid {:#06x} on {:#05x}", other, self.handle);
                true
            }
        }
    }

    // Hand a PDU to the reader side, giving up once the connection is gone
    fn deliver(&self, mut pdu: Pdu, to_reader: &SyncSender<Pdu>) -> bool {
        loop {
            match to_reader.try_send(pdu) {
                Ok(()) => return true,
                Err(TrySendError::Full(back)) => {
                    if self.done.is_set() || self.transport_done.is_set() {
                        return false;
                    }
                    pdu = back;
                    thread::sleep(POLL_INTERVAL);
                }
                Err(TrySendError::Disconnected(_)) => return false,
            }
        }
    }

    // Tear the link down from the recombine worker without blocking it
    fn fail(&self, err: L2capError) {
        error!("l2cap: conn {:#05x}: {}", self.handle, err);
        let Some(hci) = self.hci.upgrade() else {
            return;
        };
        let handle = self.handle;
        let inner = Arc::clone(&hci);
        hci.spawn_worker("conn-close", move || {
            let ctx = Context::background().with_timeout(CLOSE_TIMEOUT);
            let cmd = HciCommand::Disconnect {
                handle,
                reason: status::REMOTE_USER_TERMINATED,
            };
            if let Err(e) = inner.send(&ctx, &cmd) {
                warn!("l2cap: disconnect {:#05x}: {}", handle, e);
            }
        });
    }
}

// Reassemble ACL fragments into PDUs and dispatch them by CID
fn recombine(conn: Weak<Conn>, rx: Receiver<Vec<u8>>, to_reader: SyncSender<Pdu>) {
    let mut partial: Option<Partial> = None;
    let mut failed = false;

    for pkt in rx.iter() {
        if failed {
            continue;
        }
        let Some(conn) = conn.upgrade() else {
            break;
        };

        let hdr = match AclHeader::decode(&pkt) {
            Ok(hdr) => hdr,
            Err(e) => {
                warn!("l2cap: bad ACL header on {:#05x}: {}", conn.handle, e);
                continue;
            }
        };
        let body = &pkt[HCI_ACL_HDR_SIZE..];
        let data = &body[..body.len().min(hdr.length as usize)];

        let complete = if hdr.boundary.is_start() {
            if let Some(p) = partial.take() {
                warn!(
                    "l2cap: conn {:#05x} discarding incomplete PDU for cid {:#06x}",
                    conn.handle, p.cid
                );
            }
            let l2 = match L2capHeader::decode(data) {
                Ok(l2) => l2,
                Err(e) => {
                    warn!("l2cap: bad L2CAP header on {:#05x}: {}", conn.handle, e);
                    continue;
                }
            };
            let mps = conn.rx_mps();
            if l2.cid == L2CAP_CID_ATT && l2.length > mps {
                conn.fail(L2capError::FragmentTooLarge {
                    len: l2.length as usize,
                    mps,
                });
                failed = true;
                continue;
            }

            let length = l2.length as usize;
            let mut buf = Vec::with_capacity(length);
            let payload = &data[L2CAP_HEADER_SIZE..];
            buf.extend_from_slice(&payload[..payload.len().min(length)]);
            if buf.len() < length {
                partial = Some(Partial {
                    cid: l2.cid,
                    length,
                    data: buf,
                });
                None
            } else {
                Some(Pdu {
                    cid: l2.cid,
                    payload: buf,
                })
            }
        } else {
            match partial.as_mut() {
                None => {
                    warn!("l2cap: conn {:#05x} continuation without a start", conn.handle);
                    None
                }
                Some(p) => {
                    let want = p.length - p.data.len();
                    p.data.extend_from_slice(&data[..data.len().min(want)]);
                    if p.data.len() == p.length {
                        partial.take().map(|p| Pdu {
                            cid: p.cid,
                            payload: p.data,
                        })
                    } else {
                        None
                    }
                }
            }
        };

        if let Some(pdu) = complete {
            trace!("l2cap: rx {:#05x} cid {:#06x} {} bytes", conn.handle, pdu.cid, pdu.payload.len());
            if !conn.dispatch(pdu, &to_reader) {
                break;
            }
        }
    }

    if let Some(p) = partial {
        debug!("l2cap: {} for cid {:#06x}", L2capError::UnexpectedEof, p.cid);
    }
}
