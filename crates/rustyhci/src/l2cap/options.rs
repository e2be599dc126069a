//! Configuration options
//!
//! Each option is `type (u8), length (u8), value`. The top bit of the type
//! byte is the hint flag; it is kept on decode so options re-encode to the
//! same bytes. Options this side does not know are carried as raw bytes.

use super::constants::*;
use crate::error::CodecError;
use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Cursor;

/// Quality of service flow specification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QosFlowSpec {
    pub flags: u8,
    pub service_type: u8,
    pub token_rate: u32,
    pub token_bucket_size: u32,
    pub peak_bandwidth: u32,
    pub latency: u32,
    pub delay_variation: u32,
}

/// Retransmission and flow control
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RetransmissionFlowControl {
    pub mode: u8,
    pub tx_window_size: u8,
    pub max_transmit: u8,
    pub retransmission_timeout: u16,
    pub monitor_timeout: u16,
    pub max_pdu_size: u16,
}

/// Extended flow specification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExtendedFlowSpec {
    pub identifier: u8,
    pub service_type: u8,
    pub max_sdu_size: u16,
    pub sdu_inter_arrival_time: u32,
    pub access_latency: u32,
    pub flush_timeout: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptionValue {
    Mtu(u16),
    FlushTimeout(u16),
    Qos(QosFlowSpec),
    RetransmissionFlowControl(RetransmissionFlowControl),
    Fcs(u8),
    ExtendedFlowSpec(ExtendedFlowSpec),
    ExtendedWindowSize(u16),
    /// Option type without the hint bit, and its raw value
    Unknown(u8, Vec<u8>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigOption {
    pub hint: bool,
    pub value: OptionValue,
}

impl ConfigOption {
    pub fn new(value: OptionValue) -> Self {
        Self { hint: false, value }
    }

    pub fn hint(value: OptionValue) -> Self {
        Self { hint: true, value }
    }

    pub fn mtu(mtu: u16) -> Self {
        Self::new(OptionValue::Mtu(mtu))
    }

    pub fn option_type(&self) -> u8 {
        match &self.value {
            OptionValue::Mtu(_) => L2CAP_CONF_MTU,
            OptionValue::FlushTimeout(_) => L2CAP_CONF_FLUSH_TIMEOUT,
            OptionValue::Qos(_) => L2CAP_CONF_QOS,
            OptionValue::RetransmissionFlowControl(_) => L2CAP_CONF_RFC,
            OptionValue::Fcs(_) => L2CAP_CONF_FCS,
            OptionValue::ExtendedFlowSpec(_) => L2CAP_CONF_EFS,
            OptionValue::ExtendedWindowSize(_) => L2CAP_CONF_EWS,
            OptionValue::Unknown(t, _) => *t & !L2CAP_CONF_HINT,
        }
    }

    fn value_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        match &self.value {
            OptionValue::Mtu(v) | OptionValue::FlushTimeout(v) | OptionValue::ExtendedWindowSize(v) => {
                out.extend_from_slice(&v.to_le_bytes())
            }
            OptionValue::Qos(q) => {
                out.push(q.flags);
                out.push(q.service_type);
                out.extend_from_slice(&q.token_rate.to_le_bytes());
                out.extend_from_slice(&q.token_bucket_size.to_le_bytes());
                out.extend_from_slice(&q.peak_bandwidth.to_le_bytes());
                out.extend_from_slice(&q.latency.to_le_bytes());
                out.extend_from_slice(&q.delay_variation.to_le_bytes());
            }
            OptionValue::RetransmissionFlowControl(r) => {
                out.push(r.mode);
                out.push(r.tx_window_size);
                out.push(r.max_transmit);
                out.extend_from_slice(&r.retransmission_timeout.to_le_bytes());
                out.extend_from_slice(&r.monitor_timeout.to_le_bytes());
                out.extend_from_slice(&r.max_pdu_size.to_le_bytes());
            }
            OptionValue::Fcs(v) => out.push(*v),
            OptionValue::ExtendedFlowSpec(e) => {
                out.push(e.identifier);
                out.push(e.service_type);
                out.extend_from_slice(&e.max_sdu_size.to_le_bytes());
                out.extend_from_slice(&e.sdu_inter_arrival_time.to_le_bytes());
                out.extend_from_slice(&e.access_latency.to_le_bytes());
                out.extend_from_slice(&e.flush_timeout.to_le_bytes());
            }
            OptionValue::Unknown(_, data) => out.extend_from_slice(data),
        }
        out
    }

    /// Encoded size including the two byte option header
    pub fn encoded_len(&self) -> usize {
        2 + self.value_bytes().len()
    }

    pub fn encode_into(&self, out: &mut Vec<u8>) {
        let value = self.value_bytes();
        let mut t = self.option_type();
        if self.hint {
            t |= L2CAP_CONF_HINT;
        }
        out.push(t);
        out.push(value.len() as u8);
        out.extend_from_slice(&value);
    }

    fn decode_value(option_type: u8, data: &[u8]) -> Result<OptionValue, CodecError> {
        let expect = |n: usize| {
            if data.len() == n {
                Ok(())
            } else {
                Err(CodecError::InvalidValue {
                    field: "config option length",
                    value: data.len() as u32,
                })
            }
        };
        let mut rdr = Cursor::new(data);

        Ok(match option_type {
            L2CAP_CONF_MTU => {
                expect(2)?;
                OptionValue::Mtu(rdr.read_u16::<LittleEndian>()?)
            }
            L2CAP_CONF_FLUSH_TIMEOUT => {
                expect(2)?;
                OptionValue::FlushTimeout(rdr.read_u16::<LittleEndian>()?)
            }
            L2CAP_CONF_QOS => {
                expect(22)?;
                OptionValue::Qos(QosFlowSpec {
                    flags: rdr.read_u8()?,
                    service_type: rdr.read_u8()?,
                    token_rate: rdr.read_u32::<LittleEndian>()?,
                    token_bucket_size: rdr.read_u32::<LittleEndian>()?,
                    peak_bandwidth: rdr.read_u32::<LittleEndian>()?,
                    latency: rdr.read_u32::<LittleEndian>()?,
                    delay_variation: rdr.read_u32::<LittleEndian>()?,
                })
            }
            L2CAP_CONF_RFC => {
                expect(9)?;
                OptionValue::RetransmissionFlowControl(RetransmissionFlowControl {
                    mode: rdr.read_u8()?,
                    tx_window_size: rdr.read_u8()?,
                    max_transmit: rdr.read_u8()?,
                    retransmission_timeout: rdr.read_u16::<LittleEndian>()?,
                    monitor_timeout: rdr.read_u16::<LittleEndian>()?,
                    max_pdu_size: rdr.read_u16::<LittleEndian>()?,
                })
            }
            L2CAP_CONF_FCS => {
                expect(1)?;
                OptionValue::Fcs(rdr.read_u8()?)
            }
            L2CAP_CONF_EFS => {
                expect(16)?;
                OptionValue::ExtendedFlowSpec(ExtendedFlowSpec {
                    identifier: rdr.read_u8()?,
                    service_type: rdr.read_u8()?,
                    max_sdu_size: rdr.read_u16::<LittleEndian>()?,
                    sdu_inter_arrival_time: rdr.read_u32::<LittleEndian>()?,
                    access_latency: rdr.read_u32::<LittleEndian>()?,
                    flush_timeout: rdr.read_u32::<LittleEndian>()?,
                })
            }
            L2CAP_CONF_EWS => {
                expect(2)?;
                OptionValue::ExtendedWindowSize(rdr.read_u16::<LittleEndian>()?)
            }
            other => OptionValue::Unknown(other, data.to_vec()),
        })
    }
}

/// Serialise options back to back
pub fn encode_options(options: &[ConfigOption]) -> Vec<u8> {
    let mut out = Vec::new();
    for opt in options {
        opt.encode_into(&mut out);
    }
    out
}

/// Parse a run of options
pub fn decode_options(data: &[u8]) -> Result<Vec<ConfigOption>, CodecError> {
    let mut options = Vec::new();
    let mut offset = 0;

    while offset < data.len() {
        CodecError::check(&data[offset..], 2)?;
        let raw_type = data[offset];
        let len = data[offset + 1] as usize;
        let start = offset + 2;
        CodecError::check(&data[start..], len)?;

        let value = ConfigOption::decode_value(raw_type & !L2CAP_CONF_HINT, &data[start..start + len])?;
        options.push(ConfigOption {
            hint: raw_type & L2CAP_CONF_HINT != 0,
            value,
        });
        offset = start + len;
    }

    Ok(options)
}

/// Group options into runs whose encoded size stays within `limit`.
///
/// Options are never split; one larger than `limit` travels alone.
pub fn chunk_options(options: &[ConfigOption], limit: usize) -> Vec<Vec<ConfigOption>> {
    let mut chunks: Vec<Vec<ConfigOption>> = Vec::new();
    let mut current = Vec::new();
    let mut size = 0;

    for opt in options {
        let len = opt.encoded_len();
        if !current.is_empty() && size + len > limit {
            chunks.push(std::mem::take(&mut current));
            size = 0;
        }
        current.push(opt.clone());
        size += len;
    }
    if !current.is_empty() || chunks.is_empty() {
        chunks.push(current);
    }
    chunks
}
