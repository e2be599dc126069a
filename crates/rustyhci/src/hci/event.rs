//! HCI event structures and parsing
//!
//! [`HciEvent`] splits a raw event into its code and parameter bytes. The
//! typed structs below decode the parameters of the events the transport
//! acts on, and encode them back, which the mock controller relies on.

use crate::error::CodecError;
use crate::hci::constants::*;
use byteorder::{LittleEndian, ReadBytesExt};
use std::io::{Cursor, Read};

/// HCI Event packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HciEvent {
    pub event_code: u8,
    pub parameters: Vec<u8>,
}

impl HciEvent {
    /// Parse an HCI event from raw bytes, without the packet type byte
    pub fn parse(data: &[u8]) -> Result<Self, CodecError> {
        CodecError::check(data, HCI_EVENT_HDR_SIZE)?;

        let event_code = data[0];
        let len = data[1] as usize;
        CodecError::check(data, HCI_EVENT_HDR_SIZE + len)?;

        Ok(HciEvent {
            event_code,
            parameters: data[HCI_EVENT_HDR_SIZE..HCI_EVENT_HDR_SIZE + len].to_vec(),
        })
    }

    /// Encode as a full packet including the packet type byte
    pub fn to_packet(&self) -> Vec<u8> {
        event_packet(self.event_code, &self.parameters)
    }
}

/// Frame event parameters as `[0x04, code, len, params...]`
pub fn event_packet(event_code: u8, params: &[u8]) -> Vec<u8> {
    let mut packet = Vec::with_capacity(3 + params.len());
    packet.push(HCI_EVENT_PKT);
    packet.push(event_code);
    packet.push(params.len() as u8);
    packet.extend_from_slice(params);
    packet
}

/// Frame an LE meta sub-event as a full packet
pub fn le_meta_packet(subevent: u8, params: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(1 + params.len());
    body.push(subevent);
    body.extend_from_slice(params);
    event_packet(EVT_LE_META_EVENT, &body)
}

fn read_addr(rdr: &mut Cursor<&[u8]>) -> Result<[u8; 6], CodecError> {
    let mut addr = [0u8; 6];
    rdr.read_exact(&mut addr)?;
    Ok(addr)
}

/// Command Complete (0x0E)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandComplete {
    pub num_hci_command_packets: u8,
    pub opcode: u16,
    /// Return parameters, starting with the status byte when present
    pub return_parameters: Vec<u8>,
}

impl CommandComplete {
    pub fn decode(params: &[u8]) -> Result<Self, CodecError> {
        CodecError::check(params, 3)?;
        Ok(Self {
            num_hci_command_packets: params[0],
            opcode: u16::from_le_bytes([params[1], params[2]]),
            return_parameters: params[3..].to_vec(),
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(3 + self.return_parameters.len());
        out.push(self.num_hci_command_packets);
        out.extend_from_slice(&self.opcode.to_le_bytes());
        out.extend_from_slice(&self.return_parameters);
        out
    }
}

/// Command Status (0x0F)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandStatus {
    pub status: u8,
    pub num_hci_command_packets: u8,
    pub opcode: u16,
}

impl CommandStatus {
    pub fn decode(params: &[u8]) -> Result<Self, CodecError> {
        CodecError::check(params, 4)?;
        Ok(Self {
            status: params[0],
            num_hci_command_packets: params[1],
            opcode: u16::from_le_bytes([params[2], params[3]]),
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = vec![self.status, self.num_hci_command_packets];
        out.extend_from_slice(&self.opcode.to_le_bytes());
        out
    }
}

/// Disconnection Complete (0x05)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisconnectionComplete {
    pub status: u8,
    pub handle: u16,
    pub reason: u8,
}

impl DisconnectionComplete {
    pub fn decode(params: &[u8]) -> Result<Self, CodecError> {
        CodecError::check(params, 4)?;
        Ok(Self {
            status: params[0],
            handle: u16::from_le_bytes([params[1], params[2]]) & HANDLE_MASK,
            reason: params[3],
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = vec![self.status];
        out.extend_from_slice(&self.handle.to_le_bytes());
        out.push(self.reason);
        out
    }
}

/// Wire layout of Number Of Completed Packets entries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompletedPacketsLayout {
    /// `H1, N1, H2, N2, ...` as produced by common controller firmware
    #[default]
    Interleaved,
    /// `H1, H2, ..., N1, N2, ...` as written in the core specification
    Grouped,
}

/// Number Of Completed Packets (0x13)
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NumberOfCompletedPackets {
    /// `(handle, completed)` pairs
    pub entries: Vec<(u16, u16)>,
}

impl NumberOfCompletedPackets {
    pub fn decode(params: &[u8], layout: CompletedPacketsLayout) -> Result<Self, CodecError> {
        CodecError::check(params, 1)?;
        let n = params[0] as usize;
        let body = &params[1..];
        CodecError::check(body, n * 4)?;

        let word = |i: usize| u16::from_le_bytes([body[2 * i], body[2 * i + 1]]);
        let entries = (0..n)
            .map(|i| match layout {
                CompletedPacketsLayout::Interleaved => (word(2 * i) & HANDLE_MASK, word(2 * i + 1)),
                CompletedPacketsLayout::Grouped => (word(i) & HANDLE_MASK, word(n + i)),
            })
            .collect();
        Ok(Self { entries })
    }

    pub fn encode(&self, layout: CompletedPacketsLayout) -> Vec<u8> {
        let mut out = vec![self.entries.len() as u8];
        match layout {
            CompletedPacketsLayout::Interleaved => {
                for (handle, count) in &self.entries {
                    out.extend_from_slice(&handle.to_le_bytes());
                    out.extend_from_slice(&count.to_le_bytes());
                }
            }
            CompletedPacketsLayout::Grouped => {
                for (handle, _) in &self.entries {
                    out.extend_from_slice(&handle.to_le_bytes());
                }
                for (_, count) in &self.entries {
                    out.extend_from_slice(&count.to_le_bytes());
                }
            }
        }
        out
    }
}

/// One device found during inquiry
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct InquiryResponse {
    /// Wire order (least significant byte first)
    pub bd_addr: [u8; 6],
    pub page_scan_repetition_mode: u8,
    pub class_of_device: [u8; 3],
    pub clock_offset: u16,
    /// Present for results with RSSI and extended results
    pub rssi: Option<i8>,
    /// Extended inquiry response data, empty for the other result kinds
    pub eir: Vec<u8>,
}

/// Inquiry Result (0x02), Inquiry Result with RSSI (0x22) and
/// Extended Inquiry Result (0x2F)
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct InquiryResult {
    pub responses: Vec<InquiryResponse>,
}

/// Size of the EIR field of an Extended Inquiry Result
pub const EIR_LEN: usize = 240;

impl InquiryResult {
    /// Decode any of the three inquiry result events by code
    pub fn decode(event_code: u8, params: &[u8]) -> Result<Self, CodecError> {
        match event_code {
            EVT_INQUIRY_RESULT => Self::decode_standard(params),
            EVT_INQUIRY_RESULT_WITH_RSSI => Self::decode_with_rssi(params),
            EVT_EXTENDED_INQUIRY_RESULT => Self::decode_extended(params),
            other => Err(CodecError::InvalidValue {
                field: "inquiry event code",
                value: other as u32,
            }),
        }
    }

    // Fields are laid out column by column: all addresses, then all modes...
    fn decode_standard(params: &[u8]) -> Result<Self, CodecError> {
        CodecError::check(params, 1)?;
        let n = params[0] as usize;
        CodecError::check(params, 1 + n * 14)?;

        let addr_at = 1;
        let psrm_at = addr_at + n * 6;
        let reserved_at = psrm_at + n;
        let cod_at = reserved_at + n * 2;
        let clock_at = cod_at + n * 3;

        let responses = (0..n)
            .map(|i| {
                let mut bd_addr = [0u8; 6];
                bd_addr.copy_from_slice(&params[addr_at + i * 6..addr_at + i * 6 + 6]);
                let mut class_of_device = [0u8; 3];
                class_of_device.copy_from_slice(&params[cod_at + i * 3..cod_at + i * 3 + 3]);
                InquiryResponse {
                    bd_addr,
                    page_scan_repetition_mode: params[psrm_at + i],
                    class_of_device,
                    clock_offset: u16::from_le_bytes([
                        params[clock_at + i * 2],
                        params[clock_at + i * 2 + 1],
                    ]),
                    rssi: None,
                    eir: Vec::new(),
                }
            })
            .collect();
        Ok(Self { responses })
    }

    fn decode_with_rssi(params: &[u8]) -> Result<Self, CodecError> {
        CodecError::check(params, 1)?;
        let n = params[0] as usize;
        CodecError::check(params, 1 + n * 14)?;

        let addr_at = 1;
        let psrm_at = addr_at + n * 6;
        let reserved_at = psrm_at + n;
        let cod_at = reserved_at + n;
        let clock_at = cod_at + n * 3;
        let rssi_at = clock_at + n * 2;

        let responses = (0..n)
            .map(|i| {
                let mut bd_addr = [0u8; 6];
                bd_addr.copy_from_slice(&params[addr_at + i * 6..addr_at + i * 6 + 6]);
                let mut class_of_device = [0u8; 3];
                class_of_device.copy_from_slice(&params[cod_at + i * 3..cod_at + i * 3 + 3]);
                InquiryResponse {
                    bd_addr,
                    page_scan_repetition_mode: params[psrm_at + i],
                    class_of_device,
                    clock_offset: u16::from_le_bytes([
                        params[clock_at + i * 2],
                        params[clock_at + i * 2 + 1],
                    ]),
                    rssi: Some(params[rssi_at + i] as i8),
                    eir: Vec::new(),
                }
            })
            .collect();
        Ok(Self { responses })
    }

    fn decode_extended(params: &[u8]) -> Result<Self, CodecError> {
        CodecError::check(params, 15)?;
        let mut rdr = Cursor::new(params);
        let _num = rdr.read_u8()?;
        let bd_addr = read_addr(&mut rdr)?;
        let page_scan_repetition_mode = rdr.read_u8()?;
        let _reserved = rdr.read_u8()?;
        let mut class_of_device = [0u8; 3];
        rdr.read_exact(&mut class_of_device)?;
        let clock_offset = rdr.read_u16::<LittleEndian>()?;
        let rssi = rdr.read_i8()?;

        let eir_at = rdr.position() as usize;
        let eir_end = params.len().min(eir_at + EIR_LEN);
        let eir = trim_eir(&params[eir_at..eir_end]);

        Ok(Self {
            responses: vec![InquiryResponse {
                bd_addr,
                page_scan_repetition_mode,
                class_of_device,
                clock_offset,
                rssi: Some(rssi),
                eir,
            }],
        })
    }

    /// Encode as the given inquiry result event kind
    pub fn encode(&self, event_code: u8) -> Vec<u8> {
        let n = self.responses.len();
        let mut out = vec![n as u8];
        match event_code {
            EVT_EXTENDED_INQUIRY_RESULT => {
                if let Some(r) = self.responses.first() {
                    out[0] = 1;
                    out.extend_from_slice(&r.bd_addr);
                    out.push(r.page_scan_repetition_mode);
                    out.push(0);
                    out.extend_from_slice(&r.class_of_device);
                    out.extend_from_slice(&r.clock_offset.to_le_bytes());
                    out.push(r.rssi.unwrap_or(0) as u8);
                    let mut eir = r.eir.clone();
                    eir.resize(EIR_LEN, 0);
                    out.extend_from_slice(&eir);
                }
            }
            _ => {
                let with_rssi = event_code == EVT_INQUIRY_RESULT_WITH_RSSI;
                self.responses.iter().for_each(|r| out.extend_from_slice(&r.bd_addr));
                self.responses.iter().for_each(|r| out.push(r.page_scan_repetition_mode));
                let reserved = if with_rssi { n } else { n * 2 };
                out.extend(std::iter::repeat(0).take(reserved));
                self.responses.iter().for_each(|r| out.extend_from_slice(&r.class_of_device));
                self.responses
                    .iter()
                    .for_each(|r| out.extend_from_slice(&r.clock_offset.to_le_bytes()));
                if with_rssi {
                    self.responses.iter().for_each(|r| out.push(r.rssi.unwrap_or(0) as u8));
                }
            }
        }
        out
    }
}

// EIR is zero padded; keep only the significant AD structures
fn trim_eir(eir: &[u8]) -> Vec<u8> {
    let mut i = 0;
    while i < eir.len() {
        let len = eir[i] as usize;
        if len == 0 {
            break;
        }
        i += 1 + len;
    }
    eir[..i.min(eir.len())].to_vec()
}

/// Inquiry Complete (0x01)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InquiryComplete {
    pub status: u8,
}

impl InquiryComplete {
    pub fn decode(params: &[u8]) -> Result<Self, CodecError> {
        CodecError::check(params, 1)?;
        Ok(Self { status: params[0] })
    }
}

/// Connection Complete (0x03)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionComplete {
    pub status: u8,
    pub handle: u16,
    pub bd_addr: [u8; 6],
    pub link_type: u8,
    pub encryption_enabled: u8,
}

impl ConnectionComplete {
    pub fn decode(params: &[u8]) -> Result<Self, CodecError> {
        CodecError::check(params, 11)?;
        let mut rdr = Cursor::new(params);
        Ok(Self {
            status: rdr.read_u8()?,
            handle: rdr.read_u16::<LittleEndian>()? & HANDLE_MASK,
            bd_addr: read_addr(&mut rdr)?,
            link_type: rdr.read_u8()?,
            encryption_enabled: rdr.read_u8()?,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = vec![self.status];
        out.extend_from_slice(&self.handle.to_le_bytes());
        out.extend_from_slice(&self.bd_addr);
        out.push(self.link_type);
        out.push(self.encryption_enabled);
        out
    }
}

/// Encryption Change (0x08)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncryptionChange {
    pub status: u8,
    pub handle: u16,
    pub enabled: u8,
}

impl EncryptionChange {
    pub fn decode(params: &[u8]) -> Result<Self, CodecError> {
        CodecError::check(params, 4)?;
        Ok(Self {
            status: params[0],
            handle: u16::from_le_bytes([params[1], params[2]]) & HANDLE_MASK,
            enabled: params[3],
        })
    }
}

/// LE Connection Complete (0x3E:0x01), parameters after the subcode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeConnectionComplete {
    pub status: u8,
    pub handle: u16,
    pub role: u8,
    pub peer_address_type: u8,
    pub peer_address: [u8; 6],
    pub conn_interval: u16,
    pub conn_latency: u16,
    pub supervision_timeout: u16,
    pub master_clock_accuracy: u8,
}

impl LeConnectionComplete {
    pub fn decode(params: &[u8]) -> Result<Self, CodecError> {
        CodecError::check(params, 18)?;
        let mut rdr = Cursor::new(params);
        Ok(Self {
            status: rdr.read_u8()?,
            handle: rdr.read_u16::<LittleEndian>()? & HANDLE_MASK,
            role: rdr.read_u8()?,
            peer_address_type: rdr.read_u8()?,
            peer_address: read_addr(&mut rdr)?,
            conn_interval: rdr.read_u16::<LittleEndian>()?,
            conn_latency: rdr.read_u16::<LittleEndian>()?,
            supervision_timeout: rdr.read_u16::<LittleEndian>()?,
            master_clock_accuracy: rdr.read_u8()?,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = vec![self.status];
        out.extend_from_slice(&self.handle.to_le_bytes());
        out.push(self.role);
        out.push(self.peer_address_type);
        out.extend_from_slice(&self.peer_address);
        out.extend_from_slice(&self.conn_interval.to_le_bytes());
        out.extend_from_slice(&self.conn_latency.to_le_bytes());
        out.extend_from_slice(&self.supervision_timeout.to_le_bytes());
        out.push(self.master_clock_accuracy);
        out
    }
}

/// LE Advertising Report Event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeAdvertisingReport {
    pub event_type: u8,
    pub address_type: u8,
    /// Wire order (least significant byte first)
    pub address: [u8; 6],
    pub data: Vec<u8>,
    pub rssi: i8,
}

impl LeAdvertisingReport {
    /// Decode every report of one LE Advertising Report sub-event.
    ///
    /// Each report is `event_type, address_type, address, length, data, rssi`.
    pub fn decode_all(params: &[u8]) -> Result<Vec<Self>, CodecError> {
        CodecError::check(params, 1)?;
        let n = params[0] as usize;
        let mut rdr = Cursor::new(&params[1..]);
        let mut reports = Vec::with_capacity(n);

        for _ in 0..n {
            let event_type = rdr.read_u8()?;
            let address_type = rdr.read_u8()?;
            let address = read_addr(&mut rdr)?;
            let len = rdr.read_u8()? as usize;
            let mut data = vec![0u8; len];
            rdr.read_exact(&mut data)?;
            let rssi = rdr.read_i8()?;
            reports.push(Self {
                event_type,
                address_type,
                address,
                data,
                rssi,
            });
        }
        Ok(reports)
    }

    pub fn encode_all(reports: &[Self]) -> Vec<u8> {
        let mut out = vec![reports.len() as u8];
        for r in reports {
            out.push(r.event_type);
            out.push(r.address_type);
            out.extend_from_slice(&r.address);
            out.push(r.data.len() as u8);
            out.extend_from_slice(&r.data);
            out.push(r.rssi as u8);
        }
        out
    }
}

/// LE Connection Update Complete (0x3E:0x03)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeConnectionUpdateComplete {
    pub status: u8,
    pub handle: u16,
    pub conn_interval: u16,
    pub conn_latency: u16,
    pub supervision_timeout: u16,
}

impl LeConnectionUpdateComplete {
    pub fn decode(params: &[u8]) -> Result<Self, CodecError> {
        CodecError::check(params, 9)?;
        let mut rdr = Cursor::new(params);
        Ok(Self {
            status: rdr.read_u8()?,
            handle: rdr.read_u16::<LittleEndian>()? & HANDLE_MASK,
            conn_interval: rdr.read_u16::<LittleEndian>()?,
            conn_latency: rdr.read_u16::<LittleEndian>()?,
            supervision_timeout: rdr.read_u16::<LittleEndian>()?,
        })
    }
}

/// LE Long Term Key Request (0x3E:0x05)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeLongTermKeyRequest {
    pub handle: u16,
    pub random_number: u64,
    pub encrypted_diversifier: u16,
}

impl LeLongTermKeyRequest {
    pub fn decode(params: &[u8]) -> Result<Self, CodecError> {
        CodecError::check(params, 12)?;
        let mut rdr = Cursor::new(params);
        Ok(Self {
            handle: rdr.read_u16::<LittleEndian>()? & HANDLE_MASK,
            random_number: rdr.read_u64::<LittleEndian>()?,
            encrypted_diversifier: rdr.read_u16::<LittleEndian>()?,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(12);
        out.extend_from_slice(&self.handle.to_le_bytes());
        out.extend_from_slice(&self.random_number.to_le_bytes());
        out.extend_from_slice(&self.encrypted_diversifier.to_le_bytes());
        out
    }
}
