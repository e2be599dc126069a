//! Scripted controller for tests
//!
//! [`MockController`] implements [`Socket`]. Commands are answered the moment
//! they are written: Command Status for the commands a real controller
//! acknowledges that way, Command Complete with programmable return
//! parameters for the rest. ACL traffic is reassembled per handle, recorded,
//! acknowledged with Number Of Completed Packets and optionally handed to a
//! responder that can answer on the same link.

use crate::context::{Context, Signal, POLL_INTERVAL};
use crate::error::HciError;
use crate::hci::command::HciCommand;
use crate::hci::config::HciConfig;
use crate::hci::constants::*;
use crate::hci::event::{
    event_packet, le_meta_packet, CommandComplete, CommandStatus, ConnectionComplete,
    DisconnectionComplete, LeConnectionComplete,
};
use crate::hci::socket::Socket;
use crate::hci::status;
use crate::hci::transport::Hci;
use crate::l2cap::packet::{acl_packet, AclHeader, BoundaryFlag, L2capHeader};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Address reported by Read BD_ADDR, wire order
pub const TEST_BD_ADDR: [u8; 6] = [0x00, 0x11, 0x22, 0x33, 0x44, 0x55];

/// Answers one reassembled PDU with `(cid, payload)` replies
pub type AclResponder = Box<dyn FnMut(u16, u16, &[u8]) -> Vec<(u16, Vec<u8>)> + Send>;

/// One L2CAP PDU the host sent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentPdu {
    pub handle: u16,
    pub cid: u16,
    pub payload: Vec<u8>,
}

struct Partial {
    cid: u16,
    length: usize,
    data: Vec<u8>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

pub struct MockController {
    written: Mutex<Vec<Vec<u8>>>,
    pdus: Mutex<Vec<SentPdu>>,
    partial: Mutex<HashMap<u16, Partial>>,
    inbound_tx: Mutex<Sender<Vec<u8>>>,
    inbound_rx: Mutex<Receiver<Vec<u8>>>,
    responses: Mutex<HashMap<u16, Vec<u8>>>,
    followups: Mutex<HashMap<u16, VecDeque<Vec<Vec<u8>>>>>,
    silent: Mutex<HashSet<u16>>,
    acl_responder: Mutex<Option<AclResponder>>,
    auto_complete: AtomicBool,
    fail_close: AtomicBool,
    credits: Mutex<u8>,
    closed: Signal,
}

impl MockController {
    /// A controller that answers the init sequence with 27 byte ACL buffers
    /// and 7 packets, no LE buffers, and TX power 0
    pub fn new() -> Arc<Self> {
        let (tx, rx) = channel();
        let mock = Self {
            written: Mutex::new(Vec::new()),
            pdus: Mutex::new(Vec::new()),
            partial: Mutex::new(HashMap::new()),
            inbound_tx: Mutex::new(tx),
            inbound_rx: Mutex::new(rx),
            responses: Mutex::new(HashMap::new()),
            followups: Mutex::new(HashMap::new()),
            silent: Mutex::new(HashSet::new()),
            acl_responder: Mutex::new(None),
            auto_complete: AtomicBool::new(true),
            fail_close: AtomicBool::new(false),
            credits: Mutex::new(1),
            closed: Signal::new(),
        };

        let mut bd_addr = vec![0x00];
        bd_addr.extend_from_slice(&TEST_BD_ADDR);
        mock.set_response(&HciCommand::ReadBdAddr, bd_addr);
        mock.set_response(
            &HciCommand::ReadBufferSize,
            vec![0x00, 27, 0x00, 0x00, 7, 0x00, 0x00, 0x00],
        );
        mock.set_response(&HciCommand::LeReadBufferSize, vec![0x00, 0x00, 0x00, 0x00]);
        mock.set_response(&HciCommand::LeReadAdvertisingChannelTxPower, vec![0x00, 0x00]);
        Arc::new(mock)
    }

    /// Return parameters (status first) for the command's opcode. For
    /// commands answered with Command Status only the first byte is used.
    pub fn set_response(&self, cmd: &HciCommand, params: Vec<u8>) {
        lock(&self.responses).insert(cmd.opcode(), params);
    }

    /// Packets injected once, right after the next answer to this command
    pub fn add_followup(&self, cmd: &HciCommand, packets: Vec<Vec<u8>>) {
        lock(&self.followups)
            .entry(cmd.opcode())
            .or_default()
            .push_back(packets);
    }

    /// Never answer this command
    pub fn set_silent(&self, cmd: &HciCommand) {
        lock(&self.silent).insert(cmd.opcode());
    }

    pub fn set_acl_responder(&self, responder: AclResponder) {
        *lock(&self.acl_responder) = Some(responder);
    }

    /// Whether every ACL packet is acknowledged with Number Of Completed Packets
    pub fn set_auto_complete(&self, enabled: bool) {
        self.auto_complete.store(enabled, Ordering::SeqCst);
    }

    /// Make `close` report an error after firing the closed signal
    pub fn set_close_error(&self, fail: bool) {
        self.fail_close.store(fail, Ordering::SeqCst);
    }

    /// Credits advertised in every Command Complete / Command Status
    pub fn set_credits(&self, credits: u8) {
        *lock(&self.credits) = credits;
    }

    pub fn inject(&self, packet: Vec<u8>) {
        let _ = lock(&self.inbound_tx).send(packet);
    }

    /// Inject a single-fragment L2CAP PDU from the peer
    pub fn inject_pdu(&self, handle: u16, cid: u16, payload: &[u8]) {
        let mut frame = L2capHeader::new(payload.len() as u16, cid).to_bytes().to_vec();
        frame.extend_from_slice(payload);
        self.inject(acl_packet(handle, BoundaryFlag::ControllerStart, &frame));
    }

    pub fn written(&self) -> Vec<Vec<u8>> {
        lock(&self.written).clone()
    }

    /// Every command written so far, in order
    pub fn commands(&self) -> Vec<HciCommand> {
        self.written()
            .iter()
            .filter(|p| p.first() == Some(&HCI_COMMAND_PKT))
            .filter_map(|p| HciCommand::from_packet(p).ok())
            .collect()
    }

    /// Raw ACL packets written so far, with their packet type byte
    pub fn acl_packets(&self) -> Vec<Vec<u8>> {
        self.written()
            .into_iter()
            .filter(|p| p.first() == Some(&HCI_ACL_PKT))
            .collect()
    }

    pub fn pdus(&self) -> Vec<SentPdu> {
        lock(&self.pdus).clone()
    }

    /// Poll until `pred` holds or `timeout` passes
    pub fn wait_for<F>(&self, timeout: Duration, mut pred: F) -> bool
    where
        F: FnMut(&Self) -> bool,
    {
        let deadline = Instant::now() + timeout;
        loop {
            if pred(self) {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }

    fn answer_command(&self, packet: &[u8]) {
        if packet.len() < 1 + HCI_COMMAND_HDR_SIZE {
            return;
        }
        let opcode = u16::from_le_bytes([packet[1], packet[2]]);
        if lock(&self.silent).contains(&opcode) {
            return;
        }
        let credits = *lock(&self.credits);
        let params = lock(&self.responses)
            .get(&opcode)
            .cloned()
            .unwrap_or_else(|| vec![status::SUCCESS]);

        let cmd = HciCommand::from_packet(packet).ok();
        let by_status = matches!(
            cmd,
            Some(HciCommand::Inquiry { .. })
                | Some(HciCommand::CreateConnection { .. })
                | Some(HciCommand::Disconnect { .. })
                | Some(HciCommand::LeCreateConnection { .. })
                | Some(HciCommand::LeConnectionUpdate { .. })
        );

        if by_status {
            let cs = CommandStatus {
                status: params.first().copied().unwrap_or(status::SUCCESS),
                num_hci_command_packets: credits,
                opcode,
            };
            self.inject(event_packet(EVT_CMD_STATUS, &cs.encode()));
        } else {
            let cc = CommandComplete {
                num_hci_command_packets: credits,
                opcode,
                return_parameters: params.clone(),
            };
            self.inject(event_packet(EVT_CMD_COMPLETE, &cc.encode()));
        }

        if let Some(HciCommand::Disconnect { handle, .. }) = cmd {
            if params.first() == Some(&status::SUCCESS) {
                let ev = DisconnectionComplete {
                    status: status::SUCCESS,
                    handle,
                    reason: status::LOCAL_HOST_TERMINATED,
                };
                self.inject(event_packet(EVT_DISCONN_COMPLETE, &ev.encode()));
            }
        }

        let followup = lock(&self.followups)
            .get_mut(&opcode)
            .and_then(|q| q.pop_front());
        for pkt in followup.into_iter().flatten() {
            self.inject(pkt);
        }
    }

    fn absorb_acl(&self, packet: &[u8]) {
        let Ok(hdr) = AclHeader::decode(&packet[1..]) else {
            return;
        };
        let data = &packet[1 + HCI_ACL_HDR_SIZE..];

        if self.auto_complete.load(Ordering::SeqCst) {
            let mut params = vec![1u8];
            params.extend_from_slice(&hdr.handle.to_le_bytes());
            params.extend_from_slice(&1u16.to_le_bytes());
            self.inject(event_packet(EVT_NUM_COMPLETED_PACKETS, &params));
        }

        let done = {
            let mut partial = lock(&self.partial);
            if hdr.boundary.is_start() {
                let Ok(l2) = L2capHeader::decode(data) else {
                    return;
                };
                partial.insert(
                    hdr.handle,
                    Partial {
                        cid: l2.cid,
                        length: l2.length as usize,
                        data: data[4..].to_vec(),
                    },
                );
            } else if let Some(p) = partial.get_mut(&hdr.handle) {
                p.data.extend_from_slice(data);
            }
            match partial.get(&hdr.handle) {
                Some(p) if p.data.len() >= p.length => partial.remove(&hdr.handle),
                _ => None,
            }
        };

        let Some(p) = done else {
            return;
        };
        lock(&self.pdus).push(SentPdu {
            handle: hdr.handle,
            cid: p.cid,
            payload: p.data.clone(),
        });

        let replies = match lock(&self.acl_responder).as_mut() {
            Some(responder) => responder(hdr.handle, p.cid, &p.data),
            None => Vec::new(),
        };
        for (cid, payload) in replies {
            self.inject_pdu(hdr.handle, cid, &payload);
        }
    }
}

impl Socket for MockController {
    fn read(&self, buf: &mut [u8]) -> Result<usize, HciError> {
        let rx = lock(&self.inbound_rx);
        loop {
            if self.closed.is_set() {
                return Ok(0);
            }
            match rx.recv_timeout(POLL_INTERVAL) {
                Ok(pkt) => {
                    let n = pkt.len().min(buf.len());
                    buf[..n].copy_from_slice(&pkt[..n]);
                    return Ok(n);
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return Ok(0),
            }
        }
    }

    fn write(&self, buf: &[u8]) -> Result<usize, HciError> {
        if self.closed.is_set() {
            return Err(HciError::TransportClosed);
        }
        lock(&self.written).push(buf.to_vec());
        match buf.first() {
            Some(&HCI_COMMAND_PKT) => self.answer_command(buf),
            Some(&HCI_ACL_PKT) => self.absorb_acl(buf),
            _ => {}
        }
        Ok(buf.len())
    }

    fn close(&self) -> Result<(), HciError> {
        self.closed.fire();
        if self.fail_close.load(Ordering::SeqCst) {
            return Err(HciError::SocketError(std::io::Error::new(
                std::io::ErrorKind::Other,
                "mock close failure",
            )));
        }
        Ok(())
    }

    fn closed(&self) -> Signal {
        self.closed.clone()
    }
}

/// Transport over `mock`, initialised
pub fn init_hci(mock: &Arc<MockController>) -> Hci {
    init_hci_with(mock, HciConfig::default())
}

pub fn init_hci_with(mock: &Arc<MockController>, config: HciConfig) -> Hci {
    let socket: Arc<dyn Socket> = Arc::clone(mock) as Arc<dyn Socket>;
    let hci = Hci::with_socket(socket, config);
    hci.init(&Context::background().with_timeout(Duration::from_secs(5)))
        .expect("init");
    hci
}

/// LE Connection Complete for `handle` with the given role byte
pub fn le_conn_complete(handle: u16, role: u8, peer: [u8; 6]) -> Vec<u8> {
    let ev = LeConnectionComplete {
        status: status::SUCCESS,
        handle,
        role,
        peer_address_type: 0,
        peer_address: peer,
        conn_interval: 0x0018,
        conn_latency: 0,
        supervision_timeout: 0x0048,
        master_clock_accuracy: 0,
    };
    le_meta_packet(EVT_LE_CONN_COMPLETE, &ev.encode())
}

/// LE Connection Complete failure carrying `code`
pub fn le_conn_failed(code: u8) -> Vec<u8> {
    let ev = LeConnectionComplete {
        status: code,
        handle: 0,
        role: 0,
        peer_address_type: 0,
        peer_address: [0; 6],
        conn_interval: 0,
        conn_latency: 0,
        supervision_timeout: 0,
        master_clock_accuracy: 0,
    };
    le_meta_packet(EVT_LE_CONN_COMPLETE, &ev.encode())
}

/// BR/EDR ACL Connection Complete
pub fn conn_complete(handle: u16, peer: [u8; 6]) -> Vec<u8> {
    let ev = ConnectionComplete {
        status: status::SUCCESS,
        handle,
        bd_addr: peer,
        link_type: LINK_TYPE_ACL,
        encryption_enabled: 0,
    };
    event_packet(EVT_CONN_COMPLETE, &ev.encode())
}

/// Bring up an LE connection on `hci` and wait for it to be registered
pub fn connect_le(
    mock: &Arc<MockController>,
    hci: &Hci,
    handle: u16,
    role: u8,
) -> Arc<crate::l2cap::conn::Conn> {
    mock.inject(le_conn_complete(handle, role, [0xFF, 0xEE, 0xDD, 0xCC, 0xBB, 0xAA]));
    let deadline = Instant::now() + Duration::from_secs(2);
    loop {
        if let Some(conn) = hci.conn(handle) {
            return conn;
        }
        assert!(Instant::now() < deadline, "connection {handle:#x} never registered");
        std::thread::sleep(POLL_INTERVAL);
    }
}
