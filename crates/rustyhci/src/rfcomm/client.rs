//! RFCOMM serial port client
//!
//! [`RfcommClient::dial`] opens an L2CAP channel to the RFCOMM PSM, starts
//! the multiplexer, negotiates parameters for one server channel and opens
//! it. A reader worker answers multiplexer commands from the peer, tracks
//! credits and queues received data for [`RfcommClient::read`].

use super::constants::*;
use super::frame::{dlci, Frame, FrameType, MuxMessage, ParamNegotiation};
use super::{RfcommError, RfcommResult};
use crate::context::{Context, POLL_INTERVAL};
use crate::l2cap::conn::lock;
use crate::l2cap::psm::PSM_RFCOMM;
use crate::l2cap::{Channel, Conn, L2capError};
use log::{debug, info, trace, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

/// Time allowed for the peer to answer a frame or multiplexer command
const REPLY_TIMEOUT: Duration = Duration::from_secs(10);

const CONTROL_QUEUE: usize = 8;
const DATA_QUEUE: usize = 32;

// Frames the setup and teardown sequences wait for
#[derive(Debug)]
enum Control {
    Frame(Frame),
    Mux(MuxMessage),
}

struct Shared {
    conn: Arc<Conn>,
    channel: Channel,
    dlci: u8,
    credit_flow: AtomicBool,
    tx_credits: Mutex<u32>,
    credit_cond: Condvar,
    /// Credits the peer still holds for sending to us
    rx_credits: Mutex<u8>,
    closed: AtomicBool,
}

impl Shared {
    fn send(&self, ctx: &Context, frame: &Frame) -> RfcommResult<()> {
        trace!("rfcomm: > {:?}", frame);
        self.conn.write(ctx, self.channel.remote_cid, &frame.encode())?;
        Ok(())
    }

    fn add_credits(&self, n: u8) {
        *lock(&self.tx_credits) += n as u32;
        self.credit_cond.notify_all();
    }

    fn take_credit(&self, ctx: &Context) -> RfcommResult<()> {
        let mut credits = lock(&self.tx_credits);
        loop {
            if *credits > 0 {
                *credits -= 1;
                return Ok(());
            }
            if let Some(err) = ctx.err() {
                return Err(err.into());
            }
            if self.closed.load(Ordering::SeqCst) {
                return Err(RfcommError::Closed);
            }
            credits = self
                .credit_cond
                .wait_timeout(credits, POLL_INTERVAL)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|e| e.into_inner().0);
        }
    }

    // Top the peer back up once it has used half of its credits
    fn consume_rx_credit(&self, ctx: &Context) {
        if !self.credit_flow.load(Ordering::SeqCst) {
            return;
        }
        let grant = {
            let mut rx = lock(&self.rx_credits);
            *rx = rx.saturating_sub(1);
            if *rx > RFCOMM_DEFAULT_CREDITS / 2 {
                return;
            }
            let grant = RFCOMM_DEFAULT_CREDITS - *rx;
            *rx = RFCOMM_DEFAULT_CREDITS;
            grant
        };
        if let Err(e) = self.send(ctx, &Frame::credit(self.dlci, true, grant, Vec::new())) {
            warn!("rfcomm: granting {} credits: {}", grant, e);
        }
    }
}

pub struct RfcommClient {
    shared: Arc<Shared>,
    control: Mutex<Receiver<Control>>,
    data: Mutex<Receiver<Vec<u8>>>,
    mtu: u16,
    stop: Context,
}

impl std::fmt::Debug for RfcommClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RfcommClient")
            .field("conn", &self.shared.conn.handle())
            .field("dlci", &self.shared.dlci)
            .field("mtu", &self.mtu)
            .finish()
    }
}

impl RfcommClient {
    /// Open RFCOMM server channel `channel` on a BR/EDR connection
    pub fn dial(ctx: &Context, conn: Arc<Conn>, channel: u8) -> RfcommResult<Self> {
        if !(RFCOMM_CHANNEL_MIN..=RFCOMM_CHANNEL_MAX).contains(&channel) {
            return Err(RfcommError::InvalidChannel(channel));
        }
        let l2 = conn.connect_channel(ctx, PSM_RFCOMM, RFCOMM_L2CAP_MTU)?;

        let mut client = Self::start(conn.clone(), l2, dlci(channel));
        match client.establish(ctx) {
            Ok(()) => {
                info!(
                    "rfcomm: channel {} open on {:#05x}, mtu {}",
                    channel,
                    conn.handle(),
                    client.mtu
                );
                Ok(client)
            }
            Err(e) => {
                client.stop.cancel();
                let cleanup = Context::background().with_timeout(Duration::from_secs(1));
                if let Err(close) = conn.disconnect_channel(&cleanup, &l2) {
                    debug!("rfcomm: releasing l2cap channel: {}", close);
                }
                Err(e)
            }
        }
    }

    fn start(conn: Arc<Conn>, channel: Channel, dlci: u8) -> Self {
        let shared = Arc::new(Shared {
            conn,
            channel,
            dlci,
            credit_flow: AtomicBool::new(false),
            tx_credits: Mutex::new(0),
            credit_cond: Condvar::new(),
            rx_credits: Mutex::new(0),
            closed: AtomicBool::new(false),
        });
        let (control_tx, control_rx) = sync_channel(CONTROL_QUEUE);
        let (data_tx, data_rx) = sync_channel(DATA_QUEUE);
        let stop = Context::background();

        let reader = Reader {
            shared: shared.clone(),
            control: control_tx,
            data: data_tx,
            stop: stop.clone(),
        };
        match shared.conn.hci() {
            Some(hci) => hci.spawn_worker("rfcomm-reader", move || reader.serve()),
            None => {
                if let Err(e) = thread::Builder::new()
                    .name("rfcomm-reader".into())
                    .spawn(move || reader.serve())
                {
                    warn!("rfcomm: spawn reader: {}", e);
                    shared.closed.store(true, Ordering::SeqCst);
                }
            }
        }

        Self {
            shared,
            control: Mutex::new(control_rx),
            data: Mutex::new(data_rx),
            mtu: RFCOMM_DEFAULT_MTU,
            stop,
        }
    }

    // Wait for a control frame or message that `pick` accepts
    fn wait_control<T, F>(&self, ctx: &Context, what: &'static str, mut pick: F) -> RfcommResult<T>
    where
        F: FnMut(Control) -> Option<RfcommResult<T>>,
    {
        let rx = lock(&self.control);
        let deadline = Instant::now() + REPLY_TIMEOUT;
        loop {
            if let Some(err) = ctx.err() {
                return Err(err.into());
            }
            match rx.recv_timeout(POLL_INTERVAL) {
                Ok(control) => match pick(control) {
                    Some(result) => return result,
                    None => continue,
                },
                Err(RecvTimeoutError::Timeout) => {
                    if Instant::now() >= deadline {
                        return Err(RfcommError::Timeout(what));
                    }
                }
                Err(RecvTimeoutError::Disconnected) => return Err(RfcommError::Closed),
            }
        }
    }

    // SABM on `dlci` answered by UA, or refused with DM
    fn open_dlc(&self, ctx: &Context, dlci: u8) -> RfcommResult<()> {
        self.shared.send(ctx, &Frame::sabm(dlci, true))?;
        self.wait_control(ctx, "UA", |control| match control {
            Control::Frame(f) if f.dlci == dlci && f.frame_type == FrameType::Ua => Some(Ok(())),
            Control::Frame(f) if f.dlci == dlci && f.frame_type == FrameType::Dm => {
                Some(Err(RfcommError::Refused(dlci)))
            }
            _ => None,
        })
    }

    fn mux(&self, ctx: &Context, msg: &MuxMessage) -> RfcommResult<()> {
        self.shared
            .send(ctx, &Frame::uih(RFCOMM_DLCI_CONTROL, true, msg.encode()))
    }

    fn establish(&mut self, ctx: &Context) -> RfcommResult<()> {
        let dlci = self.shared.dlci;
        self.open_dlc(ctx, RFCOMM_DLCI_CONTROL)?;

        let l2_mtu = self
            .shared
            .conn
            .channel(self.shared.channel.local_cid)
            .map_or(self.shared.channel.tx_mtu, |ch| ch.tx_mtu);
        // Address, control, two length bytes, credits and FCS
        let l2_room = l2_mtu.saturating_sub(6);
        let offer = ParamNegotiation {
            dlci,
            credit_flow: true,
            priority: 7,
            max_frame_size: RFCOMM_DEFAULT_MTU.min(l2_room),
            credits: RFCOMM_DEFAULT_CREDITS,
        };
        self.mux(
            ctx,
            &MuxMessage::Pn {
                command: true,
                params: offer,
            },
        )?;
        let agreed = self.wait_control(ctx, "PN response", |control| match control {
            Control::Mux(MuxMessage::Pn {
                command: false,
                params,
            }) if params.dlci == dlci => Some(Ok(params)),
            Control::Mux(MuxMessage::Nsc { .. }) => Some(Err(RfcommError::Refused(dlci))),
            _ => None,
        })?;

        self.mtu = agreed.max_frame_size.min(offer.max_frame_size).max(1);
        if agreed.credit_flow {
            self.shared.credit_flow.store(true, Ordering::SeqCst);
            *lock(&self.shared.rx_credits) = RFCOMM_DEFAULT_CREDITS;
            self.shared.add_credits(agreed.credits);
        }
        debug!(
            "rfcomm: dlci {} mtu {} credit flow {}",
            dlci, self.mtu, agreed.credit_flow
        );

        self.open_dlc(ctx, dlci)?;

        self.mux(
            ctx,
            &MuxMessage::Msc {
                command: true,
                dlci,
                signals: RFCOMM_V24_DEFAULT,
            },
        )?;
        self.wait_control(ctx, "MSC response", |control| match control {
            Control::Mux(MuxMessage::Msc {
                command: false,
                dlci: d,
                ..
            }) if d == dlci => Some(Ok(())),
            _ => None,
        })
    }

    pub fn conn(&self) -> &Arc<Conn> {
        &self.shared.conn
    }

    /// Largest payload of one frame
    pub fn mtu(&self) -> u16 {
        self.mtu
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// Send `data`, split into frames of at most `mtu` bytes
    pub fn write(&self, ctx: &Context, data: &[u8]) -> RfcommResult<usize> {
        if self.is_closed() {
            return Err(RfcommError::Closed);
        }
        let credit_flow = self.shared.credit_flow.load(Ordering::SeqCst);
        for chunk in data.chunks(self.mtu as usize) {
            if credit_flow {
                self.shared.take_credit(ctx)?;
            }
            self.shared
                .send(ctx, &Frame::uih(self.shared.dlci, true, chunk.to_vec()))?;
        }
        Ok(data.len())
    }

    /// Next chunk of data received from the peer
    pub fn read(&self, ctx: &Context) -> RfcommResult<Vec<u8>> {
        let rx = lock(&self.data);
        loop {
            if let Some(err) = ctx.err() {
                return Err(err.into());
            }
            match rx.recv_timeout(POLL_INTERVAL) {
                Ok(data) => return Ok(data),
                Err(RecvTimeoutError::Timeout) => {
                    if self.is_closed() {
                        return Err(RfcommError::Closed);
                    }
                }
                Err(RecvTimeoutError::Disconnected) => return Err(RfcommError::Closed),
            }
        }
    }

    /// Close the data channel, the multiplexer and the L2CAP channel
    pub fn close(&self, ctx: &Context) -> RfcommResult<()> {
        if !self.shared.closed.swap(true, Ordering::SeqCst) {
            for dlci in [self.shared.dlci, RFCOMM_DLCI_CONTROL] {
                self.shared.send(ctx, &Frame::disc(dlci, true))?;
                let answered = self.wait_control(ctx, "UA", |control| match control {
                    Control::Frame(f)
                        if f.dlci == dlci
                            && matches!(f.frame_type, FrameType::Ua | FrameType::Dm) =>
                    {
                        Some(Ok(()))
                    }
                    _ => None,
                });
                if let Err(e) = answered {
                    debug!("rfcomm: disc dlci {}: {}", dlci, e);
                }
            }
        }
        self.stop.cancel();
        self.shared
            .conn
            .disconnect_channel(ctx, &self.shared.channel)?;
        Ok(())
    }
}

impl Drop for RfcommClient {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

struct Reader {
    shared: Arc<Shared>,
    control: SyncSender<Control>,
    data: SyncSender<Vec<u8>>,
    stop: Context,
}

impl Reader {
    fn serve(self) {
        let shared = &self.shared;
        loop {
            let pdu = match shared.conn.read(&self.stop) {
                Ok(pdu) => pdu,
                Err(L2capError::Context(_)) => break,
                Err(e) => {
                    debug!("rfcomm: reader exiting: {}", e);
                    break;
                }
            };
            if pdu.cid != shared.channel.local_cid {
                trace!("rfcomm: ignoring pdu on cid {:#06x}", pdu.cid);
                continue;
            }
            match Frame::decode(&pdu.payload) {
                Ok(frame) => {
                    if !self.handle(frame) {
                        break;
                    }
                }
                Err(e) => warn!("rfcomm: dropping frame: {}", e),
            }
        }
        shared.closed.store(true, Ordering::SeqCst);
        shared.credit_cond.notify_all();
    }

    fn forward(&self, control: Control) {
        if let Err(TrySendError::Full(c)) = self.control.try_send(control) {
            warn!("rfcomm: control queue full, dropping {:?}", c);
        }
    }

    // Returns false once the session is gone
    fn handle(&self, frame: Frame) -> bool {
        let shared = &self.shared;
        trace!("rfcomm: < {:?}", frame);
        match frame.frame_type {
            FrameType::Uih if frame.dlci == RFCOMM_DLCI_CONTROL => {
                match MuxMessage::decode(&frame.data) {
                    Ok(msg) if msg.is_command() => self.answer(msg),
                    Ok(msg) => self.forward(Control::Mux(msg)),
                    Err(e) => warn!("rfcomm: bad multiplexer message: {}", e),
                }
                true
            }
            FrameType::Uih => {
                if frame.dlci != shared.dlci {
                    debug!("rfcomm: data for unknown dlci {}", frame.dlci);
                    return true;
                }
                if let Some(credits) = frame.credits {
                    shared.add_credits(credits);
                }
                if frame.data.is_empty() {
                    return true;
                }
                shared.consume_rx_credit(&self.stop);
                let mut data = frame.data;
                loop {
                    match self.data.try_send(data) {
                        Ok(()) => return true,
                        Err(TrySendError::Full(back)) => {
                            if self.stop.sleep(POLL_INTERVAL).is_err() {
                                return false;
                            }
                            data = back;
                        }
                        Err(TrySendError::Disconnected(_)) => return false,
                    }
                }
            }
            FrameType::Disc => {
                if let Err(e) = shared.send(&self.stop, &Frame::ua(frame.dlci, false)) {
                    debug!("rfcomm: answering disc: {}", e);
                }
                if frame.dlci == shared.dlci || frame.dlci == RFCOMM_DLCI_CONTROL {
                    info!("rfcomm: peer closed dlci {}", frame.dlci);
                    shared.closed.store(true, Ordering::SeqCst);
                }
                true
            }
            FrameType::Sabm => {
                // Peer-initiated channels are not served
                if let Err(e) = shared.send(&self.stop, &Frame::dm(frame.dlci, false)) {
                    debug!("rfcomm: refusing sabm: {}", e);
                }
                true
            }
            FrameType::Ua | FrameType::Dm => {
                if frame.frame_type == FrameType::Dm && frame.dlci == shared.dlci {
                    shared.closed.store(true, Ordering::SeqCst);
                }
                self.forward(Control::Frame(frame));
                true
            }
        }
    }

    fn answer(&self, msg: MuxMessage) {
        let reply = match msg {
            MuxMessage::Msc { dlci, signals, .. } => MuxMessage::Msc {
                command: false,
                dlci,
                signals,
            },
            MuxMessage::Test { data, .. } => MuxMessage::Test {
                command: false,
                data,
            },
            MuxMessage::Pn { params, .. } => MuxMessage::Pn {
                command: false,
                params,
            },
            MuxMessage::Other { kind, .. } => MuxMessage::Nsc {
                rejected: (kind << 2) | RFCOMM_CR | RFCOMM_EA,
            },
            MuxMessage::Nsc { .. } => return,
        };
        let frame = Frame::uih(RFCOMM_DLCI_CONTROL, true, reply.encode());
        if let Err(e) = self.shared.send(&self.stop, &frame) {
            debug!("rfcomm: answering multiplexer command: {}", e);
        }
    }
}
