//! Signaling channel state machine
//!
//! One [`SigHandler`] per connection serves whichever signaling CID the link
//! uses. Outbound requests are serialised: the caller holds the response
//! receiver for the whole request/response cycle, and the identifier only
//! advances once a matching response has been accepted.
//!
//! Inbound requests are answered from the recombine worker. Anything that
//! needs an HCI command round trip is pushed to a transport worker so the
//! recombine worker never waits on the transport reader.

use super::conn::{lock, Conn};
use super::constants::*;
use super::options::{chunk_options, ConfigOption, OptionValue};
use super::signaling::{SignalCommand, SignalId, SignalingMessage};
use super::types::{Channel, L2capError, L2capResult, RejectReason};
use crate::context::{Context, POLL_INTERVAL};
use crate::gap::types::Role;
use crate::hci::command::HciCommand;
use crate::hci::config::ConnParams;
use log::{debug, info, trace, warn};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Timeout used for requests this side originates
pub const DEFAULT_SIGNAL_TIMEOUT: Duration = Duration::from_secs(5);

// Replies written from the recombine worker
const REPLY_TIMEOUT: Duration = Duration::from_secs(2);

// Configuration rounds before giving up on a peer that keeps continuing
const MAX_CONFIG_ROUNDS: usize = 16;

/// Clamp a signaling timeout into the permitted 1 to 60 second window
pub fn clamp_timeout(timeout: Duration) -> Duration {
    timeout.clamp(
        Duration::from_secs(L2CAP_SIG_TIMEOUT_MIN_SECS),
        Duration::from_secs(L2CAP_SIG_TIMEOUT_MAX_SECS),
    )
}

pub struct SigHandler {
    cid: u16,
    next_id: Mutex<SignalId>,
    rsp_tx: SyncSender<SignalCommand>,
    rsp_rx: Mutex<Receiver<SignalCommand>>,
    pending: AtomicBool,
    rx_mtu: AtomicU16,
    tx_mtu: AtomicU16,
    ext_features: u32,
    fixed_channels: u64,
    peer_features: Mutex<Option<u32>>,
    channels: Mutex<HashMap<u16, Channel>>,
    next_cid: Mutex<u16>,
}

impl SigHandler {
    pub(crate) fn new(cid: u16, mtu: u16) -> Self {
        let (rsp_tx, rsp_rx) = sync_channel(1);
        Self {
            cid,
            next_id: Mutex::new(1),
            rsp_tx,
            rsp_rx: Mutex::new(rsp_rx),
            pending: AtomicBool::new(false),
            rx_mtu: AtomicU16::new(mtu),
            tx_mtu: AtomicU16::new(mtu),
            ext_features: L2CAP_DEFAULT_EXTENDED_FEATURES,
            fixed_channels: L2CAP_DEFAULT_FIXED_CHANNELS,
            peer_features: Mutex::new(None),
            channels: Mutex::new(HashMap::new()),
            next_cid: Mutex::new(L2CAP_CID_DYNAMIC_START),
        }
    }

    /// Signaling CID used for outbound requests
    pub fn cid(&self) -> u16 {
        self.cid
    }

    /// Identifier the next request will carry
    pub fn next_id(&self) -> SignalId {
        *lock(&self.next_id)
    }

    pub fn rx_mtu(&self) -> u16 {
        self.rx_mtu.load(Ordering::SeqCst)
    }

    pub fn set_rx_mtu(&self, mtu: u16) {
        self.rx_mtu.store(mtu, Ordering::SeqCst);
    }

    pub fn tx_mtu(&self) -> u16 {
        self.tx_mtu.load(Ordering::SeqCst)
    }

    pub fn set_tx_mtu(&self, mtu: u16) {
        self.tx_mtu.store(mtu, Ordering::SeqCst);
    }

    /// Extended feature mask learned from the peer, if it was asked
    pub fn peer_features(&self) -> Option<u32> {
        *lock(&self.peer_features)
    }

    fn peer_supports_efs(&self) -> bool {
        self.peer_features()
            .is_some_and(|mask| mask & L2CAP_FEAT_EXTENDED_FLOW_SPEC != 0)
    }

    pub fn channel(&self, local_cid: u16) -> Option<Channel> {
        lock(&self.channels).get(&local_cid).copied()
    }

    fn alloc_cid(&self) -> u16 {
        let channels = lock(&self.channels);
        let mut next = lock(&self.next_cid);
        loop {
            let cid = *next;
            *next = if cid == L2CAP_CID_DYNAMIC_END {
                L2CAP_CID_DYNAMIC_START
            } else {
                cid + 1
            };
            if !channels.contains_key(&cid) {
                return cid;
            }
        }
    }

    /// Send `request` and wait for the response carrying the same identifier
    pub fn signal(
        &self,
        conn: &Conn,
        ctx: &Context,
        request: SignalingMessage,
        timeout: Duration,
    ) -> L2capResult<SignalingMessage> {
        let rx = lock(&self.rsp_rx);
        while let Ok(stale) = rx.try_recv() {
            debug!("l2cap: dropping stale signal {:#04x}", stale.message.code());
        }

        let id = self.next_id();
        let expected = request.code() + 1;
        let cmd = SignalCommand::new(id, request);

        self.pending.store(true, Ordering::SeqCst);
        let result = self.exchange(conn, ctx, &rx, &cmd, clamp_timeout(timeout));
        self.pending.store(false, Ordering::SeqCst);
        let rsp = result?;

        if rsp.identifier != id {
            return Err(L2capError::IdMismatch {
                expected: id,
                got: rsp.identifier,
            });
        }
        if let SignalingMessage::CommandReject { reason, data } = &rsp.message {
            return Err(L2capError::Rejected(RejectReason::from_wire(*reason, data)));
        }
        if rsp.message.code() != expected {
            return Err(L2capError::CodeMismatch {
                expected,
                got: rsp.message.code(),
            });
        }

        let mut next = lock(&self.next_id);
        *next = next.wrapping_add(1).max(1);
        Ok(rsp.message)
    }

    fn exchange(
        &self,
        conn: &Conn,
        ctx: &Context,
        rx: &Receiver<SignalCommand>,
        cmd: &SignalCommand,
        timeout: Duration,
    ) -> L2capResult<SignalCommand> {
        conn.send_pdu(ctx, self.cid, &cmd.encode())?;

        let deadline = Instant::now() + timeout;
        loop {
            if let Some(err) = ctx.err() {
                return Err(err.into());
            }
            if conn.is_disconnected() {
                return Err(L2capError::ClosedPipe);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(L2capError::Timeout);
            }
            match rx.recv_timeout(POLL_INTERVAL.min(deadline - now)) {
                Ok(rsp) => return Ok(rsp),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return Err(L2capError::ClosedPipe),
            }
        }
    }

    /// Send `options` for the channel whose remote end is `dcid`.
    ///
    /// Options are packed so each request stays under the signaling MTU.
    /// Unless the peer reported Extended Flow Specification support, every
    /// chunk but the last carries the continuation flag. Returns the options
    /// the peer sent back.
    pub fn configuration_request(
        &self,
        conn: &Conn,
        ctx: &Context,
        dcid: u16,
        options: &[ConfigOption],
        timeout: Duration,
    ) -> L2capResult<Vec<ConfigOption>> {
        let limit = (self.tx_mtu() as usize)
            .saturating_sub(L2CAP_CONFIG_REQ_OVERHEAD)
            .max(1);
        let chunks = chunk_options(options, limit);
        let last = chunks.len().saturating_sub(1);
        let continuation = if self.peer_supports_efs() {
            0
        } else {
            L2CAP_CONF_FLAG_CONTINUATION
        };
        let mut accepted = Vec::new();

        for (i, chunk) in chunks.into_iter().enumerate() {
            let mut flags = if i < last { continuation } else { 0 };
            let mut opts = chunk;
            let mut rounds = 0;
            loop {
                rounds += 1;
                if rounds > MAX_CONFIG_ROUNDS {
                    return Err(L2capError::ConfigFailed(L2CAP_CONF_REJECTED));
                }
                let request = SignalingMessage::ConfigurationRequest {
                    destination_cid: dcid,
                    flags,
                    options: std::mem::take(&mut opts),
                };
                let (rsp_flags, result, options) = match self.signal(conn, ctx, request, timeout)? {
                    SignalingMessage::ConfigurationResponse {
                        flags,
                        result,
                        options,
                        ..
                    } => (flags, result, options),
                    other => {
                        return Err(L2capError::CodeMismatch {
                            expected: L2CAP_CONFIGURE_RESPONSE,
                            got: other.code(),
                        })
                    }
                };
                if result != L2CAP_CONF_SUCCESS && result != L2CAP_CONF_PENDING {
                    return Err(L2capError::ConfigFailed(result));
                }
                accepted.extend(options);

                // The peer still has options for the final round; keep asking
                if i == last && rsp_flags & L2CAP_CONF_FLAG_CONTINUATION != 0 {
                    flags = 0;
                    continue;
                }
                break;
            }
        }
        Ok(accepted)
    }

    /// Ask the peer for `info_type` and return its data. An extended
    /// features answer is remembered for later configuration requests.
    pub fn information_request(
        &self,
        conn: &Conn,
        ctx: &Context,
        info_type: u16,
    ) -> L2capResult<Vec<u8>> {
        let rsp = self.signal(
            conn,
            ctx,
            SignalingMessage::InformationRequest { info_type },
            DEFAULT_SIGNAL_TIMEOUT,
        )?;
        let (result, data) = match rsp {
            SignalingMessage::InformationResponse { result, data, .. } => (result, data),
            other => {
                return Err(L2capError::CodeMismatch {
                    expected: L2CAP_INFORMATION_RESPONSE,
                    got: other.code(),
                })
            }
        };
        if result != L2CAP_IR_SUCCESS {
            return Err(L2capError::InfoNotSupported(info_type));
        }

        if info_type == L2CAP_INFO_EXTENDED_FEATURES {
            let bytes: [u8; 4] = data
                .get(..4)
                .and_then(|b| b.try_into().ok())
                .ok_or(L2capError::UnexpectedEof)?;
            let mask = u32::from_le_bytes(bytes);
            debug!("l2cap: conn {:#05x} peer features {:#010x}", conn.handle(), mask);
            *lock(&self.peer_features) = Some(mask);
        }
        Ok(data)
    }

    /// Open a channel to `psm` and configure `mtu` as our receive MTU on it
    pub fn connect_channel(
        &self,
        conn: &Conn,
        ctx: &Context,
        psm: u16,
        mtu: u16,
    ) -> L2capResult<Channel> {
        let local_cid = self.alloc_cid();
        let rsp = self.signal(
            conn,
            ctx,
            SignalingMessage::ConnectionRequest {
                psm,
                source_cid: local_cid,
            },
            DEFAULT_SIGNAL_TIMEOUT,
        )?;
        let (destination_cid, result) = match rsp {
            SignalingMessage::ConnectionResponse {
                destination_cid,
                result,
                ..
            } => (destination_cid, result),
            other => {
                return Err(L2capError::CodeMismatch {
                    expected: L2CAP_CONNECTION_RESPONSE,
                    got: other.code(),
                })
            }
        };
        if result != L2CAP_CR_SUCCESS {
            return Err(L2capError::ConnectionRefused(result));
        }

        lock(&self.channels).insert(
            local_cid,
            Channel {
                psm,
                local_cid,
                remote_cid: destination_cid,
                tx_mtu: L2CAP_ACL_DEFAULT_MTU,
            },
        );
        info!(
            "l2cap: channel psm {:#06x} open on {:#05x}: {:#06x} -> {:#06x}",
            psm,
            conn.handle(),
            local_cid,
            destination_cid
        );

        if mtu > conn.rx_mtu() {
            conn.set_rx_mtu(mtu);
        }
        let options = [ConfigOption::mtu(mtu)];
        if let Err(e) = self.configuration_request(conn, ctx, destination_cid, &options, DEFAULT_SIGNAL_TIMEOUT) {
            lock(&self.channels).remove(&local_cid);
            return Err(e);
        }

        self.channel(local_cid).ok_or(L2capError::ClosedPipe)
    }

    pub fn disconnect_channel(&self, conn: &Conn, ctx: &Context, channel: &Channel) -> L2capResult<()> {
        lock(&self.channels).remove(&channel.local_cid);
        self.signal(
            conn,
            ctx,
            SignalingMessage::DisconnectionRequest {
                destination_cid: channel.remote_cid,
                source_cid: channel.local_cid,
            },
            DEFAULT_SIGNAL_TIMEOUT,
        )?;
        Ok(())
    }

    /// Handle one PDU that arrived on signaling CID `cid`
    pub(crate) fn handle(&self, conn: &Conn, cid: u16, payload: &[u8]) {
        let mtu = self.rx_mtu();
        if payload.len() > mtu as usize {
            let id = payload.get(1).copied().unwrap_or(0);
            warn!(
                "l2cap: {} byte signaling PDU exceeds MTU {} on {:#05x}",
                payload.len(),
                mtu,
                conn.handle()
            );
            self.reply(
                conn,
                cid,
                id,
                SignalingMessage::CommandReject {
                    reason: L2CAP_REJECT_MTU_EXCEEDED,
                    data: mtu.to_le_bytes().to_vec(),
                },
            );
            return;
        }

        let commands = match SignalCommand::parse_all(payload) {
            Ok(commands) => commands,
            Err(e) => {
                warn!("l2cap: malformed signaling PDU on {:#05x}: {}", conn.handle(), e);
                let id = payload.get(1).copied().unwrap_or(0);
                self.reply(conn, cid, id, not_understood());
                return;
            }
        };
        for cmd in commands {
            self.dispatch(conn, cid, cmd);
        }
    }

    fn dispatch(&self, conn: &Conn, cid: u16, cmd: SignalCommand) {
        let id = cmd.identifier;
        trace!("l2cap: signal {:#04x} id {} on {:#05x}", cmd.message.code(), id, conn.handle());

        match cmd.message {
            SignalingMessage::CommandReject { .. } => self.forward(cmd),

            SignalingMessage::ConnectionRequest { psm, source_cid } => {
                let local_cid = self.alloc_cid();
                lock(&self.channels).insert(
                    local_cid,
                    Channel {
                        psm,
                        local_cid,
                        remote_cid: source_cid,
                        tx_mtu: L2CAP_ACL_DEFAULT_MTU,
                    },
                );
                self.reply(
                    conn,
                    cid,
                    id,
                    SignalingMessage::ConnectionResponse {
                        destination_cid: local_cid,
                        source_cid,
                        result: L2CAP_CR_SUCCESS,
                        status: L2CAP_CS_NO_INFO,
                    },
                );
            }

            SignalingMessage::ConfigurationRequest {
                destination_cid,
                flags,
                options,
            } => {
                let rsp = self.peer_configuration(conn, destination_cid, flags, options);
                self.reply(conn, cid, id, rsp);
            }

            SignalingMessage::ConnectionResponse { result, .. }
                if result == L2CAP_CR_PENDING =>
            {
                debug!("l2cap: connection pending on {:#05x}", conn.handle());
            }
            SignalingMessage::ConfigurationResponse { result, .. }
                if result == L2CAP_CONF_PENDING =>
            {
                debug!("l2cap: configuration pending on {:#05x}", conn.handle());
            }

            SignalingMessage::DisconnectionRequest {
                destination_cid,
                source_cid,
            } => {
                let known = lock(&self.channels).remove(&destination_cid).is_some();
                if !known && destination_cid != L2CAP_CID_ATT {
                    self.reply(
                        conn,
                        cid,
                        id,
                        SignalingMessage::CommandReject {
                            reason: L2CAP_REJECT_INVALID_CID,
                            data: [destination_cid.to_le_bytes(), source_cid.to_le_bytes()].concat(),
                        },
                    );
                } else if !known && source_cid != L2CAP_CID_ATT {
                    debug!("l2cap: ignoring disconnect of scid {:#06x}", source_cid);
                } else {
                    self.reply(
                        conn,
                        cid,
                        id,
                        SignalingMessage::DisconnectionResponse {
                            destination_cid,
                            source_cid,
                        },
                    );
                }
            }

            SignalingMessage::EchoRequest { data } => {
                self.reply(conn, cid, id, SignalingMessage::EchoResponse { data });
            }

            SignalingMessage::InformationRequest { info_type } => {
                let (result, data) = match info_type {
                    L2CAP_INFO_CONNECTIONLESS_MTU => {
                        (L2CAP_IR_SUCCESS, conn.tx_mtu().to_le_bytes().to_vec())
                    }
                    L2CAP_INFO_EXTENDED_FEATURES => {
                        (L2CAP_IR_SUCCESS, self.ext_features.to_le_bytes().to_vec())
                    }
                    L2CAP_INFO_FIXED_CHANNELS => {
                        (L2CAP_IR_SUCCESS, self.fixed_channels.to_le_bytes().to_vec())
                    }
                    _ => (L2CAP_IR_NOT_SUPPORTED, Vec::new()),
                };
                self.reply(
                    conn,
                    cid,
                    id,
                    SignalingMessage::InformationResponse {
                        info_type,
                        result,
                        data,
                    },
                );
            }

            SignalingMessage::CreateChannelRequest { source_cid, .. } => {
                self.reply(
                    conn,
                    cid,
                    id,
                    SignalingMessage::CreateChannelResponse {
                        destination_cid: self.alloc_cid(),
                        source_cid,
                        result: L2CAP_CR_SUCCESS,
                        status: L2CAP_CS_NO_INFO,
                    },
                );
            }

            SignalingMessage::MoveChannelRequest { initiator_cid, .. } => {
                self.reply(
                    conn,
                    cid,
                    id,
                    SignalingMessage::MoveChannelResponse {
                        initiator_cid,
                        result: L2CAP_MR_NOT_ALLOWED,
                    },
                );
            }

            SignalingMessage::ConnectionParameterUpdateRequest {
                interval_min,
                interval_max,
                latency,
                timeout,
            } => {
                if conn.role() == Role::Slave {
                    self.reply(conn, cid, id, not_understood());
                    return;
                }
                self.reply(
                    conn,
                    cid,
                    id,
                    SignalingMessage::ConnectionParameterUpdateResponse {
                        result: L2CAP_CPU_ACCEPTED,
                    },
                );
                let params = ConnParams::default()
                    .with_interval(interval_min, interval_max)
                    .with_latency(latency)
                    .with_supervision_timeout(timeout);
                update_connection(conn, params.update_command(conn.handle()));
            }

            SignalingMessage::LeCreditBasedConnectionRequest { le_psm, .. } => {
                debug!("l2cap: ignoring LE credit based connection to {:#06x}", le_psm);
            }
            SignalingMessage::LeFlowControlCredit { cid: ch, credits } => {
                trace!("l2cap: {} credits for {:#06x}", credits, ch);
            }

            message => {
                let cmd = SignalCommand::new(id, message);
                if self.pending.load(Ordering::SeqCst) {
                    self.forward(cmd);
                } else if cmd.message.is_response() {
                    debug!("l2cap: unsolicited response {:#04x}", cmd.message.code());
                } else {
                    self.reply(conn, cid, id, not_understood());
                }
            }
        }
    }

    // Apply a peer's configuration request and build our response
    fn peer_configuration(
        &self,
        conn: &Conn,
        destination_cid: u16,
        flags: u16,
        options: Vec<ConfigOption>,
    ) -> SignalingMessage {
        let mut accepted = Vec::new();
        let mut unknown = Vec::new();

        for opt in options {
            match opt.value {
                OptionValue::Mtu(mtu) => {
                    conn.set_tx_mtu(mtu);
                    if let Some(ch) = lock(&self.channels).get_mut(&destination_cid) {
                        ch.tx_mtu = mtu;
                    }
                    accepted.push(opt);
                }
                OptionValue::Unknown(..) if !opt.hint => unknown.push(opt),
                _ => {}
            }
        }

        let source_cid = lock(&self.channels)
            .get(&destination_cid)
            .map(|ch| ch.remote_cid)
            .unwrap_or(destination_cid);
        let (result, options) = if unknown.is_empty() {
            (L2CAP_CONF_SUCCESS, accepted)
        } else {
            (L2CAP_CONF_UNKNOWN, unknown)
        };
        SignalingMessage::ConfigurationResponse {
            source_cid,
            flags: flags & L2CAP_CONF_FLAG_CONTINUATION,
            result,
            options,
        }
    }

    fn forward(&self, cmd: SignalCommand) {
        match self.rsp_tx.try_send(cmd) {
            Ok(()) => {}
            Err(TrySendError::Full(cmd)) | Err(TrySendError::Disconnected(cmd)) => {
                warn!(
                    "l2cap: dropping signal {:#04x} id {}, response slot busy",
                    cmd.message.code(),
                    cmd.identifier
                );
            }
        }
    }

    fn reply(&self, conn: &Conn, cid: u16, id: SignalId, message: SignalingMessage) {
        let ctx = Context::background().with_timeout(REPLY_TIMEOUT);
        let bytes = SignalCommand::new(id, message).encode();
        if let Err(e) = conn.send_pdu(&ctx, cid, &bytes) {
            warn!("l2cap: signaling reply on {:#05x}: {}", conn.handle(), e);
        }
    }
}

fn not_understood() -> SignalingMessage {
    SignalingMessage::CommandReject {
        reason: L2CAP_REJECT_NOT_UNDERSTOOD,
        data: Vec::new(),
    }
}

// Run the HCI update on a transport worker; the recombine worker must not wait
fn update_connection(conn: &Conn, cmd: HciCommand) {
    let Some(hci) = conn.hci() else {
        return;
    };
    let handle = conn.handle();
    let inner = std::sync::Arc::clone(&hci);
    hci.spawn_worker("conn-update", move || {
        let ctx = Context::background().with_timeout(REPLY_TIMEOUT);
        if let Err(e) = inner.send(&ctx, &cmd) {
            warn!("l2cap: connection update on {:#05x}: {}", handle, e);
        }
    });
}
