//! HCI command codecs
//!
//! Every command the host issues is a variant of [`HciCommand`]. A command
//! knows its opcode, its parameter bytes and how to read itself back from a
//! captured packet. Return parameters of Command Complete events are decoded
//! through the [`CommandResponse`] types at the bottom of this file.

use crate::error::CodecError;
use crate::hci::constants::*;
use byteorder::{LittleEndian, ReadBytesExt};
use std::io::{Cursor, Read};

/// Length of the advertising and scan response data fields
pub const ADV_DATA_LEN: usize = 31;

/// Length of the local name field
pub const LOCAL_NAME_LEN: usize = 248;

/// HCI commands issued by the host
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum HciCommand {
    // Link Control Commands (OGF: 0x01)
    Inquiry {
        lap: [u8; 3],
        length: u8,
        num_responses: u8,
    },
    InquiryCancel,
    PeriodicInquiryMode {
        max_period_length: u16,
        min_period_length: u16,
        lap: [u8; 3],
        length: u8,
        num_responses: u8,
    },
    ExitPeriodicInquiryMode,
    CreateConnection {
        bd_addr: [u8; 6],
        packet_type: u16,
        page_scan_repetition_mode: u8,
        clock_offset: u16,
        allow_role_switch: u8,
    },
    CreateConnectionCancel {
        bd_addr: [u8; 6],
    },
    Disconnect {
        handle: u16,
        reason: u8,
    },

    // Host Controller Commands (OGF: 0x03)
    SetEventMask {
        event_mask: u64,
    },
    Reset,
    WriteLocalName {
        name: Vec<u8>,
    },
    WritePageTimeout {
        timeout: u16,
    },
    WriteScanEnable {
        scan_enable: u8,
    },
    WriteClassOfDevice {
        class_of_device: [u8; 3],
    },
    WriteLeHostSupport {
        supported: u8,
        simultaneous: u8,
    },

    // Informational Parameters (OGF: 0x04)
    ReadBufferSize,
    ReadBdAddr,

    // LE Commands (OGF: 0x08)
    LeSetEventMask {
        event_mask: u64,
    },
    LeReadBufferSize,
    LeSetRandomAddress {
        addr: [u8; 6],
    },
    LeSetAdvertisingParameters {
        interval_min: u16,
        interval_max: u16,
        advertising_type: u8,
        own_address_type: u8,
        direct_address_type: u8,
        direct_address: [u8; 6],
        channel_map: u8,
        filter_policy: u8,
    },
    LeReadAdvertisingChannelTxPower,
    LeSetAdvertisingData {
        data: Vec<u8>,
    },
    LeSetScanResponseData {
        data: Vec<u8>,
    },
    LeSetAdvertiseEnable {
        enable: bool,
    },
    LeSetScanParameters {
        scan_type: u8,
        scan_interval: u16,
        scan_window: u16,
        own_address_type: u8,
        filter_policy: u8,
    },
    LeSetScanEnable {
        enable: bool,
        filter_duplicates: bool,
    },
    LeCreateConnection {
        scan_interval: u16,
        scan_window: u16,
        initiator_filter_policy: u8,
        peer_address_type: u8,
        peer_address: [u8; 6],
        own_address_type: u8,
        conn_interval_min: u16,
        conn_interval_max: u16,
        conn_latency: u16,
        supervision_timeout: u16,
        min_ce_length: u16,
        max_ce_length: u16,
    },
    LeCreateConnectionCancel,
    LeConnectionUpdate {
        handle: u16,
        conn_interval_min: u16,
        conn_interval_max: u16,
        conn_latency: u16,
        supervision_timeout: u16,
        min_ce_length: u16,
        max_ce_length: u16,
    },
    LeLongTermKeyRequestNegativeReply {
        handle: u16,
    },
}

impl HciCommand {
    /// Get the OGF and OCF for this command
    pub fn opcode_parts(&self) -> (u8, u16) {
        match self {
            // Link Control Commands
            Self::Inquiry { .. } => (OGF_LINK_CTL, OCF_INQUIRY),
            Self::InquiryCancel => (OGF_LINK_CTL, OCF_INQUIRY_CANCEL),
            Self::PeriodicInquiryMode { .. } => (OGF_LINK_CTL, OCF_PERIODIC_INQUIRY_MODE),
            Self::ExitPeriodicInquiryMode => (OGF_LINK_CTL, OCF_EXIT_PERIODIC_INQUIRY_MODE),
            Self::CreateConnection { .. } => (OGF_LINK_CTL, OCF_CREATE_CONNECTION),
            Self::CreateConnectionCancel { .. } => (OGF_LINK_CTL, OCF_CREATE_CONNECTION_CANCEL),
            Self::Disconnect { .. } => (OGF_LINK_CTL, OCF_DISCONNECT),

            // Host Controller Commands
            Self::SetEventMask { .. } => (OGF_HOST_CTL, OCF_SET_EVENT_MASK),
            Self::Reset => (OGF_HOST_CTL, OCF_RESET),
            Self::WriteLocalName { .. } => (OGF_HOST_CTL, OCF_WRITE_LOCAL_NAME),
            Self::WritePageTimeout { .. } => (OGF_HOST_CTL, OCF_WRITE_PAGE_TIMEOUT),
            Self::WriteScanEnable { .. } => (OGF_HOST_CTL, OCF_WRITE_SCAN_ENABLE),
            Self::WriteClassOfDevice { .. } => (OGF_HOST_CTL, OCF_WRITE_CLASS_OF_DEVICE),
            Self::WriteLeHostSupport { .. } => (OGF_HOST_CTL, OCF_WRITE_LE_HOST_SUPPORT),

            // Informational Parameters
            Self::ReadBufferSize => (OGF_INFO_PARAM, OCF_READ_BUFFER_SIZE),
            Self::ReadBdAddr => (OGF_INFO_PARAM, OCF_READ_BD_ADDR),

            // LE Commands
            Self::LeSetEventMask { .. } => (OGF_LE, OCF_LE_SET_EVENT_MASK),
            Self::LeReadBufferSize => (OGF_LE, OCF_LE_READ_BUFFER_SIZE),
            Self::LeSetRandomAddress { .. } => (OGF_LE, OCF_LE_SET_RANDOM_ADDRESS),
            Self::LeSetAdvertisingParameters { .. } => (OGF_LE, OCF_LE_SET_ADVERTISING_PARAMETERS),
            Self::LeReadAdvertisingChannelTxPower => {
                (OGF_LE, OCF_LE_READ_ADVERTISING_PHYSICAL_CHANNEL_TX_POWER)
            }
            Self::LeSetAdvertisingData { .. } => (OGF_LE, OCF_LE_SET_ADVERTISING_DATA),
            Self::LeSetScanResponseData { .. } => (OGF_LE, OCF_LE_SET_SCAN_RESPONSE_DATA),
            Self::LeSetAdvertiseEnable { .. } => (OGF_LE, OCF_LE_SET_ADVERTISING_ENABLE),
            Self::LeSetScanParameters { .. } => (OGF_LE, OCF_LE_SET_SCAN_PARAMETERS),
            Self::LeSetScanEnable { .. } => (OGF_LE, OCF_LE_SET_SCAN_ENABLE),
            Self::LeCreateConnection { .. } => (OGF_LE, OCF_LE_CREATE_CONNECTION),
            Self::LeCreateConnectionCancel => (OGF_LE, OCF_LE_CREATE_CONNECTION_CANCEL),
            Self::LeConnectionUpdate { .. } => (OGF_LE, OCF_LE_CONNECTION_UPDATE),
            Self::LeLongTermKeyRequestNegativeReply { .. } => (OGF_LE, OCF_LE_LTK_NEGATIVE_REPLY),
        }
    }

    /// The 16-bit opcode `(ogf << 10) | ocf`
    pub fn opcode(&self) -> u16 {
        let (ogf, ocf) = self.opcode_parts();
        opcode(ogf, ocf)
    }

    /// Number of parameter bytes this command marshals to
    pub fn param_len(&self) -> usize {
        self.parameters().len()
    }

    /// Convert the command to its raw parameter bytes
    pub fn parameters(&self) -> Vec<u8> {
        match self {
            Self::InquiryCancel
            | Self::ExitPeriodicInquiryMode
            | Self::Reset
            | Self::ReadBufferSize
            | Self::ReadBdAddr
            | Self::LeReadBufferSize
            | Self::LeReadAdvertisingChannelTxPower
            | Self::LeCreateConnectionCancel => vec![],

            Self::Inquiry {
                lap,
                length,
                num_responses,
            } => {
                let mut params = Vec::with_capacity(5);
                params.extend_from_slice(lap);
                params.push(*length);
                params.push(*num_responses);
                params
            }

            Self::PeriodicInquiryMode {
                max_period_length,
                min_period_length,
                lap,
                length,
                num_responses,
            } => {
                let mut params = Vec::with_capacity(9);
                params.extend_from_slice(&max_period_length.to_le_bytes());
                params.extend_from_slice(&min_period_length.to_le_bytes());
                params.extend_from_slice(lap);
                params.push(*length);
                params.push(*num_responses);
                params
            }

            Self::CreateConnection {
                bd_addr,
                packet_type,
                page_scan_repetition_mode,
                clock_offset,
                allow_role_switch,
            } => {
                let mut params = Vec::with_capacity(13);
                params.extend_from_slice(bd_addr);
                params.extend_from_slice(&packet_type.to_le_bytes());
                params.push(*page_scan_repetition_mode);
                params.push(0); // reserved
                params.extend_from_slice(&clock_offset.to_le_bytes());
                params.push(*allow_role_switch);
                params
            }

            Self::CreateConnectionCancel { bd_addr } => bd_addr.to_vec(),

            Self::Disconnect { handle, reason } => {
                let mut params = Vec::with_capacity(3);
                params.extend_from_slice(&handle.to_le_bytes());
                params.push(*reason);
                params
            }

            Self::SetEventMask { event_mask } | Self::LeSetEventMask { event_mask } => {
                event_mask.to_le_bytes().to_vec()
            }

            Self::WriteLocalName { name } => {
                let mut params = vec![0u8; LOCAL_NAME_LEN];
                let n = name.len().min(LOCAL_NAME_LEN);
                params[..n].copy_from_slice(&name[..n]);
                params
            }

            Self::WritePageTimeout { timeout } => timeout.to_le_bytes().to_vec(),

            Self::WriteScanEnable { scan_enable } => vec![*scan_enable],

            Self::WriteClassOfDevice { class_of_device } => class_of_device.to_vec(),

            Self::WriteLeHostSupport {
                supported,
                simultaneous,
            } => vec![*supported, *simultaneous],

            Self::LeSetRandomAddress { addr } => addr.to_vec(),

            Self::LeSetAdvertisingParameters {
                interval_min,
                interval_max,
                advertising_type,
                own_address_type,
                direct_address_type,
                direct_address,
                channel_map,
                filter_policy,
            } => {
                let mut params = Vec::with_capacity(15);
                params.extend_from_slice(&interval_min.to_le_bytes());
                params.extend_from_slice(&interval_max.to_le_bytes());
                params.push(*advertising_type);
                params.push(*own_address_type);
                params.push(*direct_address_type);
                params.extend_from_slice(direct_address);
                params.push(*channel_map);
                params.push(*filter_policy);
                params
            }

            Self::LeSetAdvertisingData { data } | Self::LeSetScanResponseData { data } => {
                let mut params = vec![0u8; 1 + ADV_DATA_LEN];
                let n = data.len().min(ADV_DATA_LEN);
                params[0] = n as u8;
                params[1..1 + n].copy_from_slice(&data[..n]);
                params
            }

            Self::LeSetAdvertiseEnable { enable } => vec![*enable as u8],

            Self::LeSetScanParameters {
                scan_type,
                scan_interval,
                scan_window,
                own_address_type,
                filter_policy,
            } => {
                let mut params = Vec::with_capacity(7);
                params.push(*scan_type);
                params.extend_from_slice(&scan_interval.to_le_bytes());
                params.extend_from_slice(&scan_window.to_le_bytes());
                params.push(*own_address_type);
                params.push(*filter_policy);
                params
            }

            Self::LeSetScanEnable {
                enable,
                filter_duplicates,
            } => vec![*enable as u8, *filter_duplicates as u8],

            Self::LeCreateConnection {
                scan_interval,
                scan_window,
                initiator_filter_policy,
                peer_address_type,
                peer_address,
                own_address_type,
                conn_interval_min,
                conn_interval_max,
                conn_latency,
                supervision_timeout,
                min_ce_length,
                max_ce_length,
            } => {
                let mut params = Vec::with_capacity(25);
                params.extend_from_slice(&scan_interval.to_le_bytes());
                params.extend_from_slice(&scan_window.to_le_bytes());
                params.push(*initiator_filter_policy);
                params.push(*peer_address_type);
                params.extend_from_slice(peer_address);
                params.push(*own_address_type);
                params.extend_from_slice(&conn_interval_min.to_le_bytes());
                params.extend_from_slice(&conn_interval_max.to_le_bytes());
                params.extend_from_slice(&conn_latency.to_le_bytes());
                params.extend_from_slice(&supervision_timeout.to_le_bytes());
                params.extend_from_slice(&min_ce_length.to_le_bytes());
                params.extend_from_slice(&max_ce_length.to_le_bytes());
                params
            }

            Self::LeConnectionUpdate {
                handle,
                conn_interval_min,
                conn_interval_max,
                conn_latency,
                supervision_timeout,
                min_ce_length,
                max_ce_length,
            } => {
                let mut params = Vec::with_capacity(14);
                params.extend_from_slice(&handle.to_le_bytes());
                params.extend_from_slice(&conn_interval_min.to_le_bytes());
                params.extend_from_slice(&conn_interval_max.to_le_bytes());
                params.extend_from_slice(&conn_latency.to_le_bytes());
                params.extend_from_slice(&supervision_timeout.to_le_bytes());
                params.extend_from_slice(&min_ce_length.to_le_bytes());
                params.extend_from_slice(&max_ce_length.to_le_bytes());
                params
            }

            Self::LeLongTermKeyRequestNegativeReply { handle } => handle.to_le_bytes().to_vec(),
        }
    }

    /// Marshal the full command packet into `buf`, returning the bytes used.
    ///
    /// The packet is `[0x01, opcode_lo, opcode_hi, param_len, params...]`.
    pub fn marshal(&self, buf: &mut [u8]) -> Result<usize, CodecError> {
        let params = self.parameters();
        let total = 1 + HCI_COMMAND_HDR_SIZE + params.len();
        CodecError::check(buf, total)?;

        let opcode = self.opcode();
        buf[0] = HCI_COMMAND_PKT;
        buf[1..3].copy_from_slice(&opcode.to_le_bytes());
        buf[3] = params.len() as u8;
        buf[4..total].copy_from_slice(&params);
        Ok(total)
    }

    /// Convert the command to a raw HCI packet
    pub fn to_packet(&self) -> Vec<u8> {
        let params = self.parameters();
        let mut packet = Vec::with_capacity(1 + HCI_COMMAND_HDR_SIZE + params.len());
        packet.push(HCI_COMMAND_PKT);
        packet.extend_from_slice(&self.opcode().to_le_bytes());
        packet.push(params.len() as u8);
        packet.extend_from_slice(&params);
        packet
    }

    /// Parse a command packet, including the leading packet type byte
    pub fn from_packet(packet: &[u8]) -> Result<Self, CodecError> {
        CodecError::check(packet, 1 + HCI_COMMAND_HDR_SIZE)?;
        if packet[0] != HCI_COMMAND_PKT {
            return Err(CodecError::InvalidValue {
                field: "packet type",
                value: packet[0] as u32,
            });
        }
        let opcode = u16::from_le_bytes([packet[1], packet[2]]);
        let len = packet[3] as usize;
        CodecError::check(&packet[4..], len)?;
        Self::unmarshal(opcode, &packet[4..4 + len])
    }

    /// Rebuild a command from its opcode and parameter bytes
    pub fn unmarshal(opcode_value: u16, params: &[u8]) -> Result<Self, CodecError> {
        let ogf = (opcode_value >> 10) as u8;
        let ocf = opcode_value & 0x03FF;
        let mut rdr = Cursor::new(params);

        let cmd = match (ogf, ocf) {
            (OGF_LINK_CTL, OCF_INQUIRY) => {
                CodecError::check(params, 5)?;
                Self::Inquiry {
                    lap: read_array(&mut rdr)?,
                    length: rdr.read_u8()?,
                    num_responses: rdr.read_u8()?,
                }
            }
            (OGF_LINK_CTL, OCF_INQUIRY_CANCEL) => Self::InquiryCancel,
            (OGF_LINK_CTL, OCF_PERIODIC_INQUIRY_MODE) => {
                CodecError::check(params, 9)?;
                Self::PeriodicInquiryMode {
                    max_period_length: rdr.read_u16::<LittleEndian>()?,
                    min_period_length: rdr.read_u16::<LittleEndian>()?,
                    lap: read_array(&mut rdr)?,
                    length: rdr.read_u8()?,
                    num_responses: rdr.read_u8()?,
                }
            }
            (OGF_LINK_CTL, OCF_EXIT_PERIODIC_INQUIRY_MODE) => Self::ExitPeriodicInquiryMode,
            (OGF_LINK_CTL, OCF_CREATE_CONNECTION) => {
                CodecError::check(params, 13)?;
                let bd_addr = read_array(&mut rdr)?;
                let packet_type = rdr.read_u16::<LittleEndian>()?;
                let page_scan_repetition_mode = rdr.read_u8()?;
                let _reserved = rdr.read_u8()?;
                Self::CreateConnection {
                    bd_addr,
                    packet_type,
                    page_scan_repetition_mode,
                    clock_offset: rdr.read_u16::<LittleEndian>()?,
                    allow_role_switch: rdr.read_u8()?,
                }
            }
            (OGF_LINK_CTL, OCF_CREATE_CONNECTION_CANCEL) => {
                CodecError::check(params, 6)?;
                Self::CreateConnectionCancel {
                    bd_addr: read_array(&mut rdr)?,
                }
            }
            (OGF_LINK_CTL, OCF_DISCONNECT) => {
                CodecError::check(params, 3)?;
                Self::Disconnect {
                    handle: rdr.read_u16::<LittleEndian>()?,
                    reason: rdr.read_u8()?,
                }
            }
            (OGF_HOST_CTL, OCF_SET_EVENT_MASK) => {
                CodecError::check(params, 8)?;
                Self::SetEventMask {
                    event_mask: rdr.read_u64::<LittleEndian>()?,
                }
            }
            (OGF_HOST_CTL, OCF_RESET) => Self::Reset,
            (OGF_HOST_CTL, OCF_WRITE_LOCAL_NAME) => {
                CodecError::check(params, LOCAL_NAME_LEN)?;
                let end = params[..LOCAL_NAME_LEN]
                    .iter()
                    .position(|&b| b == 0)
                    .unwrap_or(LOCAL_NAME_LEN);
                Self::WriteLocalName {
                    name: params[..end].to_vec(),
                }
            }
            (OGF_HOST_CTL, OCF_WRITE_PAGE_TIMEOUT) => {
                CodecError::check(params, 2)?;
                Self::WritePageTimeout {
                    timeout: rdr.read_u16::<LittleEndian>()?,
                }
            }
            (OGF_HOST_CTL, OCF_WRITE_SCAN_ENABLE) => {
                CodecError::check(params, 1)?;
                Self::WriteScanEnable {
                    scan_enable: params[0],
                }
            }
            (OGF_HOST_CTL, OCF_WRITE_CLASS_OF_DEVICE) => {
                CodecError::check(params, 3)?;
                Self::WriteClassOfDevice {
                    class_of_device: read_array(&mut rdr)?,
                }
            }
            (OGF_HOST_CTL, OCF_WRITE_LE_HOST_SUPPORT) => {
                CodecError::check(params, 2)?;
                Self::WriteLeHostSupport {
                    supported: params[0],
                    simultaneous: params[1],
                }
            }
            (OGF_INFO_PARAM, OCF_READ_BUFFER_SIZE) => Self::ReadBufferSize,
            (OGF_INFO_PARAM, OCF_READ_BD_ADDR) => Self::ReadBdAddr,
            (OGF_LE, OCF_LE_SET_EVENT_MASK) => {
                CodecError::check(params, 8)?;
                Self::LeSetEventMask {
                    event_mask: rdr.read_u64::<LittleEndian>()?,
                }
            }
            (OGF_LE, OCF_LE_READ_BUFFER_SIZE) => Self::LeReadBufferSize,
            (OGF_LE, OCF_LE_SET_RANDOM_ADDRESS) => {
                CodecError::check(params, 6)?;
                Self::LeSetRandomAddress {
                    addr: read_array(&mut rdr)?,
                }
            }
            (OGF_LE, OCF_LE_SET_ADVERTISING_PARAMETERS) => {
                CodecError::check(params, 15)?;
                Self::LeSetAdvertisingParameters {
                    interval_min: rdr.read_u16::<LittleEndian>()?,
                    interval_max: rdr.read_u16::<LittleEndian>()?,
                    advertising_type: rdr.read_u8()?,
                    own_address_type: rdr.read_u8()?,
                    direct_address_type: rdr.read_u8()?,
                    direct_address: read_array(&mut rdr)?,
                    channel_map: rdr.read_u8()?,
                    filter_policy: rdr.read_u8()?,
                }
            }
            (OGF_LE, OCF_LE_READ_ADVERTISING_PHYSICAL_CHANNEL_TX_POWER) => {
                Self::LeReadAdvertisingChannelTxPower
            }
            (OGF_LE, OCF_LE_SET_ADVERTISING_DATA) => Self::LeSetAdvertisingData {
                data: read_adv_data(params)?,
            },
            (OGF_LE, OCF_LE_SET_SCAN_RESPONSE_DATA) => Self::LeSetScanResponseData {
                data: read_adv_data(params)?,
            },
            (OGF_LE, OCF_LE_SET_ADVERTISING_ENABLE) => {
                CodecError::check(params, 1)?;
                Self::LeSetAdvertiseEnable {
                    enable: params[0] != 0,
                }
            }
            (OGF_LE, OCF_LE_SET_SCAN_PARAMETERS) => {
                CodecError::check(params, 7)?;
                Self::LeSetScanParameters {
                    scan_type: rdr.read_u8()?,
                    scan_interval: rdr.read_u16::<LittleEndian>()?,
                    scan_window: rdr.read_u16::<LittleEndian>()?,
                    own_address_type: rdr.read_u8()?,
                    filter_policy: rdr.read_u8()?,
                }
            }
            (OGF_LE, OCF_LE_SET_SCAN_ENABLE) => {
                CodecError::check(params, 2)?;
                Self::LeSetScanEnable {
                    enable: params[0] != 0,
                    filter_duplicates: params[1] != 0,
                }
            }
            (OGF_LE, OCF_LE_CREATE_CONNECTION) => {
                CodecError::check(params, 25)?;
                Self::LeCreateConnection {
                    scan_interval: rdr.read_u16::<LittleEndian>()?,
                    scan_window: rdr.read_u16::<LittleEndian>()?,
                    initiator_filter_policy: rdr.read_u8()?,
                    peer_address_type: rdr.read_u8()?,
                    peer_address: read_array(&mut rdr)?,
                    own_address_type: rdr.read_u8()?,
                    conn_interval_min: rdr.read_u16::<LittleEndian>()?,
                    conn_interval_max: rdr.read_u16::<LittleEndian>()?,
                    conn_latency: rdr.read_u16::<LittleEndian>()?,
                    supervision_timeout: rdr.read_u16::<LittleEndian>()?,
                    min_ce_length: rdr.read_u16::<LittleEndian>()?,
                    max_ce_length: rdr.read_u16::<LittleEndian>()?,
                }
            }
            (OGF_LE, OCF_LE_CREATE_CONNECTION_CANCEL) => Self::LeCreateConnectionCancel,
            (OGF_LE, OCF_LE_CONNECTION_UPDATE) => {
                CodecError::check(params, 14)?;
                Self::LeConnectionUpdate {
                    handle: rdr.read_u16::<LittleEndian>()?,
                    conn_interval_min: rdr.read_u16::<LittleEndian>()?,
                    conn_interval_max: rdr.read_u16::<LittleEndian>()?,
                    conn_latency: rdr.read_u16::<LittleEndian>()?,
                    supervision_timeout: rdr.read_u16::<LittleEndian>()?,
                    min_ce_length: rdr.read_u16::<LittleEndian>()?,
                    max_ce_length: rdr.read_u16::<LittleEndian>()?,
                }
            }
            (OGF_LE, OCF_LE_LTK_NEGATIVE_REPLY) => {
                CodecError::check(params, 2)?;
                Self::LeLongTermKeyRequestNegativeReply {
                    handle: rdr.read_u16::<LittleEndian>()?,
                }
            }
            _ => return Err(CodecError::UnknownOpcode(opcode_value)),
        };
        Ok(cmd)
    }
}

fn read_array<const N: usize>(rdr: &mut Cursor<&[u8]>) -> Result<[u8; N], CodecError> {
    let mut out = [0u8; N];
    rdr.read_exact(&mut out)?;
    Ok(out)
}

fn read_adv_data(params: &[u8]) -> Result<Vec<u8>, CodecError> {
    CodecError::check(params, 1 + ADV_DATA_LEN)?;
    let n = (params[0] as usize).min(ADV_DATA_LEN);
    Ok(params[1..1 + n].to_vec())
}

/// Return parameters of a Command Complete event.
///
/// `unmarshal` receives the bytes that follow the status byte.
pub trait CommandResponse: Sized {
    fn unmarshal(params: &[u8]) -> Result<Self, CodecError>;
}

impl CommandResponse for () {
    fn unmarshal(_params: &[u8]) -> Result<Self, CodecError> {
        Ok(())
    }
}

/// Read BD_ADDR return parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadBdAddrRp {
    /// Wire order (least significant byte first)
    pub bd_addr: [u8; 6],
}

impl CommandResponse for ReadBdAddrRp {
    fn unmarshal(params: &[u8]) -> Result<Self, CodecError> {
        CodecError::check(params, 6)?;
        let mut bd_addr = [0u8; 6];
        bd_addr.copy_from_slice(&params[..6]);
        Ok(Self { bd_addr })
    }
}

/// Read Buffer Size return parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReadBufferSizeRp {
    pub acl_data_packet_length: u16,
    pub sync_data_packet_length: u8,
    pub total_acl_data_packets: u16,
    pub total_sync_data_packets: u16,
}

impl CommandResponse for ReadBufferSizeRp {
    fn unmarshal(params: &[u8]) -> Result<Self, CodecError> {
        CodecError::check(params, 7)?;
        let mut rdr = Cursor::new(params);
        Ok(Self {
            acl_data_packet_length: rdr.read_u16::<LittleEndian>()?,
            sync_data_packet_length: rdr.read_u8()?,
            total_acl_data_packets: rdr.read_u16::<LittleEndian>()?,
            total_sync_data_packets: rdr.read_u16::<LittleEndian>()?,
        })
    }
}

/// LE Read Buffer Size return parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LeReadBufferSizeRp {
    pub le_acl_data_packet_length: u16,
    pub total_le_acl_data_packets: u8,
}

impl CommandResponse for LeReadBufferSizeRp {
    fn unmarshal(params: &[u8]) -> Result<Self, CodecError> {
        CodecError::check(params, 3)?;
        Ok(Self {
            le_acl_data_packet_length: u16::from_le_bytes([params[0], params[1]]),
            total_le_acl_data_packets: params[2],
        })
    }
}

/// LE Read Advertising Channel TX Power return parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LeReadAdvertisingChannelTxPowerRp {
    pub tx_power_level: i8,
}

impl CommandResponse for LeReadAdvertisingChannelTxPowerRp {
    fn unmarshal(params: &[u8]) -> Result<Self, CodecError> {
        CodecError::check(params, 1)?;
        Ok(Self {
            tx_power_level: params[0] as i8,
        })
    }
}
