//! ATT client
//!
//! One [`AttClient`] drives the ATT bearer of one LE connection. A reader
//! thread takes every PDU the connection delivers on the ATT channel and
//! either completes the outstanding request, hands a notification or
//! indication to its subscriber, or answers a request from the peer.
//! Requests issued through the client are serialised: each public operation
//! holds the transaction lock until its last response has arrived.

use super::constants::*;
use super::error::{AttError, AttErrorCode, AttResult};
use super::pdu::*;
use crate::context::{Context, POLL_INTERVAL};
use crate::gatt::types::{Characteristic, Descriptor, Property, Service};
use crate::l2cap::conn::lock;
use crate::l2cap::constants::L2CAP_CID_ATT;
use crate::l2cap::{Conn, L2capError};
use crate::uuid::{self, Uuid};
use log::{debug, trace, warn};
use std::collections::HashMap;
use std::sync::mpsc::{sync_channel, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

/// Callback for notification and indication values
pub type ValueHandler = Arc<Mutex<dyn FnMut(u16, &[u8]) -> AttResult<()> + Send>>;

// How long the reader waits to hand a reply to the controller
const REPLY_TIMEOUT: Duration = Duration::from_secs(2);

// Responses buffered between the reader and the waiting request
const RESPONSE_QUEUE: usize = 4;

struct Subscription {
    cccd: u16,
    bits: u16,
    notify: Option<ValueHandler>,
    indicate: Option<ValueHandler>,
}

// State shared with the reader thread
struct Shared {
    conn: Arc<Conn>,
    rsp_tx: SyncSender<Vec<u8>>,
    subs: Mutex<HashMap<u16, Subscription>>,
}

pub struct AttClient {
    shared: Arc<Shared>,
    txn: Mutex<Receiver<Vec<u8>>>,
    timeout: Mutex<Duration>,
    stop: Context,
}

impl std::fmt::Debug for AttClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttClient")
            .field("handle", &self.shared.conn.handle())
            .field("mtu", &self.mtu())
            .finish()
    }
}

impl AttClient {
    /// Attach a client to `conn` and start reading its ATT channel
    pub fn new(conn: Arc<Conn>) -> Self {
        let (rsp_tx, rsp_rx) = sync_channel(RESPONSE_QUEUE);
        let shared = Arc::new(Shared {
            conn,
            rsp_tx,
            subs: Mutex::new(HashMap::new()),
        });
        let stop = Context::background();

        let name = format!("att-{:03x}", shared.conn.handle());
        let worker = {
            let shared = shared.clone();
            let stop = stop.clone();
            move || serve(shared, stop)
        };
        match shared.conn.hci() {
            Some(hci) => hci.spawn_worker(&name, worker),
            None => {
                if let Err(e) = thread::Builder::new().name(name).spawn(worker) {
                    warn!("att: spawn reader: {}", e);
                }
            }
        }

        Self {
            shared,
            txn: Mutex::new(rsp_rx),
            timeout: Mutex::new(ATT_TRANSACTION_TIMEOUT),
            stop,
        }
    }

    pub fn conn(&self) -> &Arc<Conn> {
        &self.shared.conn
    }

    /// Current ATT MTU for outgoing PDUs
    pub fn mtu(&self) -> u16 {
        self.shared.conn.tx_mtu().max(ATT_DEFAULT_MTU)
    }

    /// Override the per-request timeout
    pub fn set_transaction_timeout(&self, timeout: Duration) {
        *lock(&self.timeout) = timeout;
    }

    // Take the transaction lock
    fn begin(&self) -> MutexGuard<'_, Receiver<Vec<u8>>> {
        lock(&self.txn)
    }

    // Send one request and wait for its response. The caller holds `rx`.
    fn transact(
        &self,
        rx: &Receiver<Vec<u8>>,
        ctx: &Context,
        request: &[u8],
    ) -> AttResult<Vec<u8>> {
        let conn = &self.shared.conn;
        let opcode = request.first().copied().unwrap_or_default();

        while let Ok(stale) = rx.try_recv() {
            debug!("att: discarding stale response {:#04x}", stale[0]);
        }
        trace!("att: {:#05x} req {}", conn.handle(), hex::encode(request));
        conn.write(ctx, L2CAP_CID_ATT, request)?;

        let deadline = Instant::now() + *lock(&self.timeout);
        loop {
            if let Some(err) = ctx.err() {
                return Err(err.into());
            }
            if Instant::now() >= deadline {
                warn!("att: {:#05x} request {:#04x} timed out", conn.handle(), opcode);
                return Err(AttError::Timeout);
            }
            let rsp = match rx.recv_timeout(POLL_INTERVAL) {
                Ok(rsp) => rsp,
                Err(RecvTimeoutError::Timeout) => {
                    if conn.is_disconnected() {
                        return Err(AttError::ClosedPipe);
                    }
                    continue;
                }
                Err(RecvTimeoutError::Disconnected) => return Err(AttError::ClosedPipe),
            };

            if rsp[0] == ATT_ERROR_RSP {
                let err = ErrorResponse::parse(&rsp)?;
                if err.request_opcode != opcode {
                    warn!(
                        "att: error response for {:#04x} while waiting on {:#04x}",
                        err.request_opcode, opcode
                    );
                    continue;
                }
                return Err(AttError::Protocol {
                    request: opcode,
                    handle: err.handle,
                    code: err.error_code,
                });
            }
            if rsp[0] != opcode.wrapping_add(1) {
                warn!("att: response {:#04x} does not match {:#04x}", rsp[0], opcode);
                continue;
            }
            return Ok(rsp);
        }
    }

    /// Negotiate the ATT MTU, returning the value both sides use
    pub fn exchange_mtu(&self, ctx: &Context, mtu: u16) -> AttResult<u16> {
        let rx = self.begin();
        let conn = &self.shared.conn;
        let mtu = mtu.clamp(ATT_DEFAULT_MTU, ATT_MAX_MTU);
        if conn.rx_mtu() < mtu {
            conn.set_rx_mtu(mtu);
        }

        let req = ExchangeMtuRequest { client_mtu: mtu };
        let rsp = ExchangeMtuResponse::parse(&self.transact(&rx, ctx, &req.serialize())?)?;
        let negotiated = mtu.min(rsp.server_mtu).max(ATT_DEFAULT_MTU);
        conn.set_tx_mtu(negotiated);
        debug!("att: {:#05x} mtu {}", conn.handle(), negotiated);
        Ok(negotiated)
    }

    /// All primary services between `start` and `end`
    pub fn discover_primary_services(
        &self,
        ctx: &Context,
        start: u16,
        end: u16,
    ) -> AttResult<Vec<Service>> {
        let rx = self.begin();
        let mut services = Vec::new();
        let mut start = start;

        while start <= end {
            let req = ReadByGroupTypeRequest {
                start_handle: start,
                end_handle: end,
                group_type: uuid::PRIMARY_SERVICE,
            };
            let rsp = match self.transact(&rx, ctx, &req.serialize()) {
                Ok(rsp) => ReadByGroupTypeResponse::parse(&rsp)?,
                Err(e) if e.is_attribute_not_found() => break,
                Err(e) => return Err(e),
            };

            let last = match rsp.entries.last() {
                Some(entry) => entry.end_group_handle,
                None => break,
            };
            for entry in rsp.entries {
                match Uuid::try_from_slice_le(&entry.value) {
                    Some(uuid) => {
                        services.push(Service::new(uuid, entry.handle, entry.end_group_handle))
                    }
                    None => warn!("att: service {:#06x} has a malformed uuid", entry.handle),
                }
            }
            if last == ATT_HANDLE_MAX || last < start {
                break;
            }
            start = last + 1;
        }
        Ok(services)
    }

    /// Characteristic declarations between `start` and `end`. Each end
    /// handle runs up to the next declaration, the last one up to `end`.
    pub fn discover_characteristics(
        &self,
        ctx: &Context,
        start: u16,
        end: u16,
    ) -> AttResult<Vec<Characteristic>> {
        let rx = self.begin();
        let mut chars: Vec<Characteristic> = Vec::new();
        let mut start = start;

        while start <= end {
            let req = ReadByTypeRequest {
                start_handle: start,
                end_handle: end,
                attribute_type: uuid::CHARACTERISTIC,
            };
            let rsp = match self.transact(&rx, ctx, &req.serialize()) {
                Ok(rsp) => ReadByTypeResponse::parse(&rsp)?,
                Err(e) if e.is_attribute_not_found() => break,
                Err(e) => return Err(e),
            };

            let last = match rsp.entries.last() {
                Some(entry) => entry.handle,
                None => break,
            };
            for entry in rsp.entries {
                // properties, value handle, uuid
                let v = &entry.value;
                if v.len() < 5 {
                    warn!("att: characteristic {:#06x} declaration too short", entry.handle);
                    continue;
                }
                let uuid = match Uuid::try_from_slice_le(&v[3..]) {
                    Some(uuid) => uuid,
                    None => {
                        warn!("att: characteristic {:#06x} has a malformed uuid", entry.handle);
                        continue;
                    }
                };
                if let Some(prev) = chars.last_mut() {
                    prev.end_handle = entry.handle.saturating_sub(1);
                }
                let mut c = Characteristic::new(
                    uuid,
                    entry.handle,
                    Property::from_bits_truncate(v[0]),
                    u16::from_le_bytes([v[1], v[2]]),
                );
                c.end_handle = end;
                chars.push(c);
            }
            if last >= end || last == ATT_HANDLE_MAX || last < start {
                break;
            }
            start = last + 1;
        }
        Ok(chars)
    }

    /// Descriptors between `start` and `end`
    pub fn find_descriptors(
        &self,
        ctx: &Context,
        start: u16,
        end: u16,
    ) -> AttResult<Vec<Descriptor>> {
        let rx = self.begin();
        let mut descriptors = Vec::new();
        let mut start = start;

        while start <= end {
            let req = FindInformationRequest {
                start_handle: start,
                end_handle: end,
            };
            let rsp = match self.transact(&rx, ctx, &req.serialize()) {
                Ok(rsp) => FindInformationResponse::parse(&rsp)?,
                Err(e) if e.is_attribute_not_found() => break,
                Err(e) => return Err(e),
            };

            let last = match rsp.entries.last() {
                Some((handle, _)) => *handle,
                None => break,
            };
            descriptors.extend(
                rsp.entries
                    .into_iter()
                    .map(|(handle, uuid)| Descriptor::new(uuid, handle)),
            );
            if last >= end || last == ATT_HANDLE_MAX || last < start {
                break;
            }
            start = last + 1;
        }
        Ok(descriptors)
    }

    /// Read an attribute value with a single request
    pub fn read(&self, ctx: &Context, handle: u16) -> AttResult<Vec<u8>> {
        let rx = self.begin();
        let rsp = self.transact(&rx, ctx, &ReadRequest { handle }.serialize())?;
        Ok(ReadResponse::parse(&rsp)?.value)
    }

    /// Read a value longer than one PDU with follow-up blob reads
    pub fn read_long(&self, ctx: &Context, handle: u16) -> AttResult<Vec<u8>> {
        let rx = self.begin();
        let rsp = self.transact(&rx, ctx, &ReadRequest { handle }.serialize())?;
        let mut value = ReadResponse::parse(&rsp)?.value;

        let full = self.mtu() as usize - 1;
        let mut chunk = value.len();
        while chunk >= full {
            let offset = u16::try_from(value.len()).map_err(|_| AttError::OffsetOverflow(value.len()))?;
            let req = ReadBlobRequest { handle, offset };
            match self.transact(&rx, ctx, &req.serialize()) {
                Ok(rsp) => {
                    let part = ReadBlobResponse::parse(&rsp)?.value;
                    chunk = part.len();
                    value.extend_from_slice(&part);
                }
                Err(e)
                    if matches!(
                        e.code(),
                        Some(AttErrorCode::AttributeNotLong) | Some(AttErrorCode::InvalidOffset)
                    ) =>
                {
                    break
                }
                Err(e) => return Err(e),
            }
        }
        Ok(value)
    }

    /// Read several values in one request; the values come back concatenated
    pub fn read_multiple(&self, ctx: &Context, handles: &[u16]) -> AttResult<Vec<u8>> {
        let rx = self.begin();
        let req = ReadMultipleRequest {
            handles: handles.to_vec(),
        };
        let rsp = self.transact(&rx, ctx, &req.serialize())?;
        Ok(ReadMultipleResponse::parse(&rsp)?.values)
    }

    fn check_len(&self, value: &[u8]) -> AttResult<()> {
        let mtu = self.mtu();
        if value.len() > mtu as usize - 3 {
            return Err(AttError::ValueTooLong {
                len: value.len(),
                mtu,
            });
        }
        Ok(())
    }

    /// Write a value and wait for the server to acknowledge it
    pub fn write(&self, ctx: &Context, handle: u16, value: &[u8]) -> AttResult<()> {
        self.check_len(value)?;
        let rx = self.begin();
        self.write_locked(&rx, ctx, handle, value)
    }

    fn write_locked(
        &self,
        rx: &Receiver<Vec<u8>>,
        ctx: &Context,
        handle: u16,
        value: &[u8],
    ) -> AttResult<()> {
        let req = WriteRequest {
            handle,
            value: value.to_vec(),
        };
        WriteResponse::parse(&self.transact(rx, ctx, &req.serialize())?)?;
        Ok(())
    }

    /// Write a value without response
    pub fn write_command(&self, ctx: &Context, handle: u16, value: &[u8]) -> AttResult<()> {
        self.check_len(value)?;
        let _rx = self.begin();
        let cmd = WriteCommand {
            handle,
            value: value.to_vec(),
        };
        self.shared.conn.write(ctx, L2CAP_CID_ATT, &cmd.serialize())?;
        Ok(())
    }

    /// Enable notifications (or indications) on `value_handle` by writing its
    /// CCCD, and route them to `handler`
    pub fn subscribe<F>(
        &self,
        ctx: &Context,
        value_handle: u16,
        cccd_handle: u16,
        indicate: bool,
        handler: F,
    ) -> AttResult<()>
    where
        F: FnMut(u16, &[u8]) -> AttResult<()> + Send + 'static,
    {
        let rx = self.begin();
        let bit = if indicate { CCCD_INDICATE } else { CCCD_NOTIFY };
        let handler: ValueHandler = Arc::new(Mutex::new(handler));

        // Install first so a value sent right after the write is not lost
        let (bits, previous) = {
            let mut subs = lock(&self.shared.subs);
            let sub = subs.entry(value_handle).or_insert(Subscription {
                cccd: cccd_handle,
                bits: 0,
                notify: None,
                indicate: None,
            });
            let previous = if indicate {
                sub.indicate.replace(handler)
            } else {
                sub.notify.replace(handler)
            };
            sub.cccd = cccd_handle;
            (sub.bits | bit, previous)
        };

        if let Err(e) = self.write_locked(&rx, ctx, cccd_handle, &bits.to_le_bytes()) {
            let mut subs = lock(&self.shared.subs);
            if let Some(sub) = subs.get_mut(&value_handle) {
                if indicate {
                    sub.indicate = previous;
                } else {
                    sub.notify = previous;
                }
                if sub.bits == 0 {
                    subs.remove(&value_handle);
                }
            }
            return Err(e);
        }

        if let Some(sub) = lock(&self.shared.subs).get_mut(&value_handle) {
            sub.bits = bits;
        }
        Ok(())
    }

    /// Undo one half of a subscription
    pub fn unsubscribe(&self, ctx: &Context, value_handle: u16, indicate: bool) -> AttResult<()> {
        let rx = self.begin();
        let bit = if indicate { CCCD_INDICATE } else { CCCD_NOTIFY };
        let (cccd, bits) = lock(&self.shared.subs)
            .get(&value_handle)
            .map(|s| (s.cccd, s.bits & !bit))
            .ok_or(AttError::NotSubscribed(value_handle))?;

        self.write_locked(&rx, ctx, cccd, &bits.to_le_bytes())?;

        let mut subs = lock(&self.shared.subs);
        if bits == 0 {
            subs.remove(&value_handle);
        } else if let Some(sub) = subs.get_mut(&value_handle) {
            sub.bits = bits;
            if indicate {
                sub.indicate = None;
            } else {
                sub.notify = None;
            }
        }
        Ok(())
    }

    /// Write zero to every subscribed CCCD and forget all subscriptions
    pub fn clear_subscriptions(&self, ctx: &Context) -> AttResult<()> {
        let rx = self.begin();
        let mut cccds: Vec<u16> = lock(&self.shared.subs).values().map(|s| s.cccd).collect();
        cccds.sort_unstable();
        cccds.dedup();

        let mut result = Ok(());
        for cccd in cccds {
            if let Err(e) = self.write_locked(&rx, ctx, cccd, &0u16.to_le_bytes()) {
                warn!("att: clearing cccd {:#06x}: {}", cccd, e);
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }
        lock(&self.shared.subs).clear();
        result
    }

    /// Value handles with a live subscription
    pub fn subscriptions(&self) -> Vec<u16> {
        let mut handles: Vec<u16> = lock(&self.shared.subs).keys().copied().collect();
        handles.sort_unstable();
        handles
    }
}

impl Drop for AttClient {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

// Reader loop: runs until the connection closes or the client is dropped
fn serve(shared: Arc<Shared>, stop: Context) {
    let handle = shared.conn.handle();
    loop {
        let pdu = match shared.conn.read(&stop) {
            Ok(pdu) => pdu,
            Err(L2capError::Context(_)) => return,
            Err(e) => {
                debug!("att: {:#05x} reader done: {}", handle, e);
                return;
            }
        };
        if pdu.cid != L2CAP_CID_ATT {
            debug!("att: {:#05x} ignoring pdu on cid {:#06x}", handle, pdu.cid);
            continue;
        }
        shared.dispatch(&stop, &pdu.payload);
    }
}

impl Shared {
    fn dispatch(&self, stop: &Context, data: &[u8]) {
        let opcode = match data.first() {
            Some(op) => *op,
            None => return,
        };
        trace!("att: {:#05x} rx {}", self.conn.handle(), hex::encode(data));

        match opcode {
            ATT_HANDLE_VALUE_NTF => match HandleValueNotification::parse(data) {
                Ok(ntf) => self.deliver(ntf.handle, &ntf.value, false),
                Err(e) => warn!("att: malformed notification: {}", e),
            },
            ATT_HANDLE_VALUE_IND => {
                match HandleValueIndication::parse(data) {
                    Ok(ind) => self.deliver(ind.handle, &ind.value, true),
                    Err(e) => warn!("att: malformed indication: {}", e),
                }
                self.reply(stop, &HandleValueConfirmation.serialize());
            }
            op if is_response(op) => match self.rsp_tx.try_send(data.to_vec()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => warn!("att: response {:#04x} dropped", op),
                Err(TrySendError::Disconnected(_)) => {}
            },
            ATT_EXCHANGE_MTU_REQ => match ExchangeMtuRequest::parse(data) {
                Ok(req) => {
                    let rx_mtu = self.conn.rx_mtu().max(ATT_DEFAULT_MTU);
                    let tx_mtu = req.client_mtu.min(rx_mtu).max(ATT_DEFAULT_MTU);
                    self.conn.set_tx_mtu(tx_mtu);
                    self.reply(stop, &ExchangeMtuResponse { server_mtu: rx_mtu }.serialize());
                }
                Err(e) => {
                    warn!("att: malformed mtu request: {}", e);
                    let rsp = ErrorResponse::new(opcode, 0, AttErrorCode::InvalidPdu);
                    self.reply(stop, &rsp.serialize());
                }
            },
            op if is_command(op) => trace!("att: ignoring command {:#04x}", op),
            op => {
                let rsp = ErrorResponse::new(op, 0, AttErrorCode::RequestNotSupported);
                self.reply(stop, &rsp.serialize());
            }
        }
    }

    fn deliver(&self, value_handle: u16, value: &[u8], indication: bool) {
        let handler = lock(&self.subs).get(&value_handle).and_then(|s| {
            if indication {
                s.indicate.clone()
            } else {
                s.notify.clone()
            }
        });
        let handler = match handler {
            Some(h) => h,
            None => {
                warn!("att: no subscriber for handle {:#06x}", value_handle);
                return;
            }
        };

        let result = {
            let mut f = lock(&handler);
            (*f)(value_handle, value)
        };
        if let Err(e) = result {
            warn!("att: handler for {:#06x} failed: {}", value_handle, e);
        }
    }

    fn reply(&self, stop: &Context, pdu: &[u8]) {
        let ctx = stop.with_timeout(REPLY_TIMEOUT);
        if let Err(e) = self.conn.write(&ctx, L2CAP_CID_ATT, pdu) {
            warn!("att: {:#05x} reply {:#04x}: {}", self.conn.handle(), pdu[0], e);
        }
    }
}
