//! ACL and L2CAP framing
//!
//! An ACL packet is `handle|flags (u16), length (u16), data`. The first
//! fragment of an L2CAP PDU carries the basic header `length (u16), cid (u16)`.

use super::constants::*;
use crate::error::CodecError;
use crate::hci::constants::{HANDLE_MASK, HCI_ACL_HDR_SIZE, HCI_ACL_PKT};
use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Cursor;

/// Packet boundary flag of an ACL fragment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundaryFlag {
    /// First fragment, non-automatically-flushable
    HostStart,
    /// Continuation of the current PDU
    Continuing,
    /// First fragment, automatically flushable
    ControllerStart,
}

impl BoundaryFlag {
    pub fn bits(self) -> u8 {
        match self {
            BoundaryFlag::HostStart => ACL_START_NO_FLUSH,
            BoundaryFlag::Continuing => ACL_CONTINUING,
            BoundaryFlag::ControllerStart => ACL_START,
        }
    }

    pub fn from_bits(bits: u8) -> Result<Self, CodecError> {
        match bits & 0x03 {
            ACL_START_NO_FLUSH => Ok(BoundaryFlag::HostStart),
            ACL_CONTINUING => Ok(BoundaryFlag::Continuing),
            ACL_START => Ok(BoundaryFlag::ControllerStart),
            other => Err(CodecError::InvalidValue {
                field: "ACL boundary flag",
                value: other as u32,
            }),
        }
    }

    pub fn is_start(self) -> bool {
        self != BoundaryFlag::Continuing
    }
}

/// ACL data header, without the HCI packet type byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AclHeader {
    pub handle: u16,
    pub boundary: BoundaryFlag,
    pub length: u16,
}

impl AclHeader {
    pub fn decode(data: &[u8]) -> Result<Self, CodecError> {
        CodecError::check(data, HCI_ACL_HDR_SIZE)?;
        let mut rdr = Cursor::new(data);
        let word = rdr.read_u16::<LittleEndian>()?;
        let length = rdr.read_u16::<LittleEndian>()?;
        Ok(Self {
            handle: word & HANDLE_MASK,
            boundary: BoundaryFlag::from_bits((word >> 12) as u8)?,
            length,
        })
    }

    /// Write the header into `buf`, which must hold four bytes
    pub fn encode(&self, buf: &mut [u8]) -> Result<(), CodecError> {
        CodecError::check(buf, HCI_ACL_HDR_SIZE)?;
        // broadcast flags stay zero
        let word = (self.handle & HANDLE_MASK) | ((self.boundary.bits() as u16) << 12);
        buf[..2].copy_from_slice(&word.to_le_bytes());
        buf[2..4].copy_from_slice(&self.length.to_le_bytes());
        Ok(())
    }
}

/// Basic L2CAP header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct L2capHeader {
    pub length: u16,
    pub cid: u16,
}

impl L2capHeader {
    pub fn new(length: u16, cid: u16) -> Self {
        Self { length, cid }
    }

    pub fn decode(data: &[u8]) -> Result<Self, CodecError> {
        CodecError::check(data, L2CAP_HEADER_SIZE)?;
        Ok(Self {
            length: u16::from_le_bytes([data[0], data[1]]),
            cid: u16::from_le_bytes([data[2], data[3]]),
        })
    }

    pub fn to_bytes(&self) -> [u8; L2CAP_HEADER_SIZE] {
        let mut out = [0u8; L2CAP_HEADER_SIZE];
        out[..2].copy_from_slice(&self.length.to_le_bytes());
        out[2..].copy_from_slice(&self.cid.to_le_bytes());
        out
    }
}

/// A complete L2CAP PDU as dispatched to a channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pdu {
    pub cid: u16,
    pub payload: Vec<u8>,
}

/// Frame `payload` for `cid` as a single B-frame
pub fn b_frame(cid: u16, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(L2CAP_HEADER_SIZE + payload.len());
    out.extend_from_slice(&L2capHeader::new(payload.len() as u16, cid).to_bytes());
    out.extend_from_slice(payload);
    out
}

/// Split one framed PDU into full HCI ACL packets of at most `max_data`
/// payload bytes each.
pub fn fragment(handle: u16, pdu: &[u8], max_data: usize) -> Vec<Vec<u8>> {
    let max_data = max_data.max(1);
    pdu.chunks(max_data)
        .enumerate()
        .map(|(i, chunk)| {
            let boundary = if i == 0 {
                BoundaryFlag::HostStart
            } else {
                BoundaryFlag::Continuing
            };
            acl_packet(handle, boundary, chunk)
        })
        .collect()
}

/// One HCI ACL packet, including the packet type byte
pub fn acl_packet(handle: u16, boundary: BoundaryFlag, data: &[u8]) -> Vec<u8> {
    let word = (handle & HANDLE_MASK) | ((boundary.bits() as u16) << 12);
    let mut out = Vec::with_capacity(1 + HCI_ACL_HDR_SIZE + data.len());
    out.push(HCI_ACL_PKT);
    out.extend_from_slice(&word.to_le_bytes());
    out.extend_from_slice(&(data.len() as u16).to_le_bytes());
    out.extend_from_slice(data);
    out
}
