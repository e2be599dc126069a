//! ATT PDU codecs
//!
//! Each PDU is a struct implementing [`AttPacket`]. Parsing checks the opcode
//! and the minimum length and fails with a [`CodecError`]; serializing always
//! produces the full PDU including the opcode byte.

use super::constants::*;
use super::error::AttErrorCode;
use crate::error::CodecError;
use crate::uuid::Uuid;
use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Cursor;

/// ATT packet formats
pub trait AttPacket: Sized {
    /// Opcode for this packet
    fn opcode() -> u8;

    /// Parse packet from bytes
    fn parse(data: &[u8]) -> Result<Self, CodecError>;

    /// Serialize packet to bytes
    fn serialize(&self) -> Vec<u8>;
}

/// Commands never get a response
pub fn is_command(opcode: u8) -> bool {
    opcode & ATT_COMMAND_FLAG != 0
}

/// Opcodes that complete a client request
pub fn is_response(opcode: u8) -> bool {
    matches!(
        opcode,
        ATT_ERROR_RSP
            | ATT_EXCHANGE_MTU_RSP
            | ATT_FIND_INFO_RSP
            | ATT_FIND_BY_TYPE_VALUE_RSP
            | ATT_READ_BY_TYPE_RSP
            | ATT_READ_RSP
            | ATT_READ_BLOB_RSP
            | ATT_READ_MULTIPLE_RSP
            | ATT_READ_BY_GROUP_TYPE_RSP
            | ATT_WRITE_RSP
            | ATT_PREPARE_WRITE_RSP
            | ATT_EXECUTE_WRITE_RSP
    )
}

// Check the opcode and minimum size, returning the bytes after the opcode
fn body(data: &[u8], opcode: u8, min_len: usize) -> Result<&[u8], CodecError> {
    CodecError::check(data, min_len.max(1))?;
    if data[0] != opcode {
        return Err(CodecError::InvalidValue {
            field: "opcode",
            value: data[0] as u32,
        });
    }
    Ok(&data[1..])
}

fn uuid_from(data: &[u8]) -> Result<Uuid, CodecError> {
    Uuid::try_from_slice_le(data).ok_or(CodecError::InvalidValue {
        field: "uuid length",
        value: data.len() as u32,
    })
}

/// Error response packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorResponse {
    /// Request opcode in error
    pub request_opcode: u8,
    /// Attribute handle in error
    pub handle: u16,
    pub error_code: AttErrorCode,
}

impl AttPacket for ErrorResponse {
    fn opcode() -> u8 {
        ATT_ERROR_RSP
    }

    fn parse(data: &[u8]) -> Result<Self, CodecError> {
        let mut cursor = Cursor::new(body(data, Self::opcode(), 5)?);
        let request_opcode = cursor.read_u8()?;
        let handle = cursor.read_u16::<LittleEndian>()?;
        let error_code = cursor.read_u8()?.into();
        Ok(Self {
            request_opcode,
            handle,
            error_code,
        })
    }

    fn serialize(&self) -> Vec<u8> {
        let mut packet = Vec::with_capacity(5);
        packet.push(Self::opcode());
        packet.push(self.request_opcode);
        packet.extend_from_slice(&self.handle.to_le_bytes());
        packet.push(self.error_code.into());
        packet
    }
}

impl ErrorResponse {
    pub fn new(request_opcode: u8, handle: u16, error_code: AttErrorCode) -> Self {
        Self {
            request_opcode,
            handle,
            error_code,
        }
    }
}

/// Exchange MTU Request packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeMtuRequest {
    /// Client Rx MTU size
    pub client_mtu: u16,
}

impl AttPacket for ExchangeMtuRequest {
    fn opcode() -> u8 {
        ATT_EXCHANGE_MTU_REQ
    }

    fn parse(data: &[u8]) -> Result<Self, CodecError> {
        let mut cursor = Cursor::new(body(data, Self::opcode(), 3)?);
        Ok(Self {
            client_mtu: cursor.read_u16::<LittleEndian>()?,
        })
    }

    fn serialize(&self) -> Vec<u8> {
        let mut packet = Vec::with_capacity(3);
        packet.push(Self::opcode());
        packet.extend_from_slice(&self.client_mtu.to_le_bytes());
        packet
    }
}

/// Exchange MTU Response packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeMtuResponse {
    /// Server Rx MTU size
    pub server_mtu: u16,
}

impl AttPacket for ExchangeMtuResponse {
    fn opcode() -> u8 {
        ATT_EXCHANGE_MTU_RSP
    }

    fn parse(data: &[u8]) -> Result<Self, CodecError> {
        let mut cursor = Cursor::new(body(data, Self::opcode(), 3)?);
        Ok(Self {
            server_mtu: cursor.read_u16::<LittleEndian>()?,
        })
    }

    fn serialize(&self) -> Vec<u8> {
        let mut packet = Vec::with_capacity(3);
        packet.push(Self::opcode());
        packet.extend_from_slice(&self.server_mtu.to_le_bytes());
        packet
    }
}

/// Find Information Request packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FindInformationRequest {
    pub start_handle: u16,
    pub end_handle: u16,
}

impl AttPacket for FindInformationRequest {
    fn opcode() -> u8 {
        ATT_FIND_INFO_REQ
    }

    fn parse(data: &[u8]) -> Result<Self, CodecError> {
        let mut cursor = Cursor::new(body(data, Self::opcode(), 5)?);
        Ok(Self {
            start_handle: cursor.read_u16::<LittleEndian>()?,
            end_handle: cursor.read_u16::<LittleEndian>()?,
        })
    }

    fn serialize(&self) -> Vec<u8> {
        let mut packet = Vec::with_capacity(5);
        packet.push(Self::opcode());
        packet.extend_from_slice(&self.start_handle.to_le_bytes());
        packet.extend_from_slice(&self.end_handle.to_le_bytes());
        packet
    }
}

/// Find Information Response packet
///
/// Format `0x01` carries 16-bit UUIDs (4-byte records), format `0x02`
/// carries 128-bit UUIDs (18-byte records).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FindInformationResponse {
    pub format: u8,
    pub entries: Vec<(u16, Uuid)>,
}

impl FindInformationResponse {
    fn record_size(format: u8) -> Result<usize, CodecError> {
        match format {
            ATT_FIND_INFO_FORMAT_16BIT => Ok(4),
            ATT_FIND_INFO_FORMAT_128BIT => Ok(18),
            other => Err(CodecError::InvalidValue {
                field: "find information format",
                value: other as u32,
            }),
        }
    }
}

impl AttPacket for FindInformationResponse {
    fn opcode() -> u8 {
        ATT_FIND_INFO_RSP
    }

    fn parse(data: &[u8]) -> Result<Self, CodecError> {
        let rest = body(data, Self::opcode(), 2)?;
        let format = rest[0];
        let size = Self::record_size(format)?;

        let mut entries = Vec::new();
        for record in rest[1..].chunks(size) {
            CodecError::check(record, size)?;
            let handle = u16::from_le_bytes([record[0], record[1]]);
            entries.push((handle, uuid_from(&record[2..])?));
        }
        Ok(Self { format, entries })
    }

    fn serialize(&self) -> Vec<u8> {
        let mut packet = vec![Self::opcode(), self.format];
        for (handle, uuid) in &self.entries {
            packet.extend_from_slice(&handle.to_le_bytes());
            if self.format == ATT_FIND_INFO_FORMAT_16BIT {
                packet.extend_from_slice(&uuid.as_u16().unwrap_or(0).to_le_bytes());
            } else {
                packet.extend_from_slice(uuid.as_bytes_le());
            }
        }
        packet
    }
}

/// Read By Type Request packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadByTypeRequest {
    pub start_handle: u16,
    pub end_handle: u16,
    pub attribute_type: Uuid,
}

impl AttPacket for ReadByTypeRequest {
    fn opcode() -> u8 {
        ATT_READ_BY_TYPE_REQ
    }

    fn parse(data: &[u8]) -> Result<Self, CodecError> {
        let rest = body(data, Self::opcode(), 7)?;
        let mut cursor = Cursor::new(rest);
        Ok(Self {
            start_handle: cursor.read_u16::<LittleEndian>()?,
            end_handle: cursor.read_u16::<LittleEndian>()?,
            attribute_type: uuid_from(&rest[4..])?,
        })
    }

    fn serialize(&self) -> Vec<u8> {
        let mut packet = Vec::with_capacity(21);
        packet.push(Self::opcode());
        packet.extend_from_slice(&self.start_handle.to_le_bytes());
        packet.extend_from_slice(&self.end_handle.to_le_bytes());
        packet.extend_from_slice(&self.attribute_type.to_wire());
        packet
    }
}

/// One `(handle, value)` record of a Read By Type Response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeData {
    pub handle: u16,
    pub value: Vec<u8>,
}

/// Read By Type Response packet; every record is `length` bytes long
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadByTypeResponse {
    pub length: u8,
    pub entries: Vec<AttributeData>,
}

impl AttPacket for ReadByTypeResponse {
    fn opcode() -> u8 {
        ATT_READ_BY_TYPE_RSP
    }

    fn parse(data: &[u8]) -> Result<Self, CodecError> {
        let rest = body(data, Self::opcode(), 2)?;
        let length = rest[0];
        if length < 2 {
            return Err(CodecError::InvalidValue {
                field: "read by type length",
                value: length as u32,
            });
        }

        let mut entries = Vec::new();
        for record in rest[1..].chunks(length as usize) {
            CodecError::check(record, length as usize)?;
            entries.push(AttributeData {
                handle: u16::from_le_bytes([record[0], record[1]]),
                value: record[2..].to_vec(),
            });
        }
        Ok(Self { length, entries })
    }

    fn serialize(&self) -> Vec<u8> {
        let mut packet = vec![Self::opcode(), self.length];
        for entry in &self.entries {
            packet.extend_from_slice(&entry.handle.to_le_bytes());
            packet.extend_from_slice(&entry.value);
        }
        packet
    }
}

/// Read Request packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadRequest {
    pub handle: u16,
}

impl AttPacket for ReadRequest {
    fn opcode() -> u8 {
        ATT_READ_REQ
    }

    fn parse(data: &[u8]) -> Result<Self, CodecError> {
        let mut cursor = Cursor::new(body(data, Self::opcode(), 3)?);
        Ok(Self {
            handle: cursor.read_u16::<LittleEndian>()?,
        })
    }

    fn serialize(&self) -> Vec<u8> {
        let mut packet = Vec::with_capacity(3);
        packet.push(Self::opcode());
        packet.extend_from_slice(&self.handle.to_le_bytes());
        packet
    }
}

/// Read Response packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadResponse {
    pub value: Vec<u8>,
}

impl AttPacket for ReadResponse {
    fn opcode() -> u8 {
        ATT_READ_RSP
    }

    fn parse(data: &[u8]) -> Result<Self, CodecError> {
        Ok(Self {
            value: body(data, Self::opcode(), 1)?.to_vec(),
        })
    }

    fn serialize(&self) -> Vec<u8> {
        let mut packet = Vec::with_capacity(1 + self.value.len());
        packet.push(Self::opcode());
        packet.extend_from_slice(&self.value);
        packet
    }
}

/// Read Blob Request packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadBlobRequest {
    pub handle: u16,
    pub offset: u16,
}

impl AttPacket for ReadBlobRequest {
    fn opcode() -> u8 {
        ATT_READ_BLOB_REQ
    }

    fn parse(data: &[u8]) -> Result<Self, CodecError> {
        let mut cursor = Cursor::new(body(data, Self::opcode(), 5)?);
        Ok(Self {
            handle: cursor.read_u16::<LittleEndian>()?,
            offset: cursor.read_u16::<LittleEndian>()?,
        })
    }

    fn serialize(&self) -> Vec<u8> {
        let mut packet = Vec::with_capacity(5);
        packet.push(Self::opcode());
        packet.extend_from_slice(&self.handle.to_le_bytes());
        packet.extend_from_slice(&self.offset.to_le_bytes());
        packet
    }
}

/// Read Blob Response packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadBlobResponse {
    pub value: Vec<u8>,
}

impl AttPacket for ReadBlobResponse {
    fn opcode() -> u8 {
        ATT_READ_BLOB_RSP
    }

    fn parse(data: &[u8]) -> Result<Self, CodecError> {
        Ok(Self {
            value: body(data, Self::opcode(), 1)?.to_vec(),
        })
    }

    fn serialize(&self) -> Vec<u8> {
        let mut packet = Vec::with_capacity(1 + self.value.len());
        packet.push(Self::opcode());
        packet.extend_from_slice(&self.value);
        packet
    }
}

/// Read Multiple Request packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadMultipleRequest {
    pub handles: Vec<u16>,
}

impl AttPacket for ReadMultipleRequest {
    fn opcode() -> u8 {
        ATT_READ_MULTIPLE_REQ
    }

    fn parse(data: &[u8]) -> Result<Self, CodecError> {
        let rest = body(data, Self::opcode(), 5)?;
        if rest.len() % 2 != 0 {
            return Err(CodecError::Truncated);
        }
        let handles = rest
            .chunks_exact(2)
            .map(|h| u16::from_le_bytes([h[0], h[1]]))
            .collect();
        Ok(Self { handles })
    }

    fn serialize(&self) -> Vec<u8> {
        let mut packet = Vec::with_capacity(1 + 2 * self.handles.len());
        packet.push(Self::opcode());
        for handle in &self.handles {
            packet.extend_from_slice(&handle.to_le_bytes());
        }
        packet
    }
}

/// Read Multiple Response packet: the concatenated values
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadMultipleResponse {
    pub values: Vec<u8>,
}

impl AttPacket for ReadMultipleResponse {
    fn opcode() -> u8 {
        ATT_READ_MULTIPLE_RSP
    }

    fn parse(data: &[u8]) -> Result<Self, CodecError> {
        Ok(Self {
            values: body(data, Self::opcode(), 1)?.to_vec(),
        })
    }

    fn serialize(&self) -> Vec<u8> {
        let mut packet = Vec::with_capacity(1 + self.values.len());
        packet.push(Self::opcode());
        packet.extend_from_slice(&self.values);
        packet
    }
}

/// Read By Group Type Request packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadByGroupTypeRequest {
    pub start_handle: u16,
    pub end_handle: u16,
    pub group_type: Uuid,
}

impl AttPacket for ReadByGroupTypeRequest {
    fn opcode() -> u8 {
        ATT_READ_BY_GROUP_TYPE_REQ
    }

    fn parse(data: &[u8]) -> Result<Self, CodecError> {
        let rest = body(data, Self::opcode(), 7)?;
        let mut cursor = Cursor::new(rest);
        Ok(Self {
            start_handle: cursor.read_u16::<LittleEndian>()?,
            end_handle: cursor.read_u16::<LittleEndian>()?,
            group_type: uuid_from(&rest[4..])?,
        })
    }

    fn serialize(&self) -> Vec<u8> {
        let mut packet = Vec::with_capacity(21);
        packet.push(Self::opcode());
        packet.extend_from_slice(&self.start_handle.to_le_bytes());
        packet.extend_from_slice(&self.end_handle.to_le_bytes());
        packet.extend_from_slice(&self.group_type.to_wire());
        packet
    }
}

/// One record of a Read By Group Type Response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupData {
    pub handle: u16,
    pub end_group_handle: u16,
    pub value: Vec<u8>,
}

/// Read By Group Type Response packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadByGroupTypeResponse {
    pub length: u8,
    pub entries: Vec<GroupData>,
}

impl AttPacket for ReadByGroupTypeResponse {
    fn opcode() -> u8 {
        ATT_READ_BY_GROUP_TYPE_RSP
    }

    fn parse(data: &[u8]) -> Result<Self, CodecError> {
        let rest = body(data, Self::opcode(), 2)?;
        let length = rest[0];
        if length < 4 {
            return Err(CodecError::InvalidValue {
                field: "read by group type length",
                value: length as u32,
            });
        }

        let mut entries = Vec::new();
        for record in rest[1..].chunks(length as usize) {
            CodecError::check(record, length as usize)?;
            entries.push(GroupData {
                handle: u16::from_le_bytes([record[0], record[1]]),
                end_group_handle: u16::from_le_bytes([record[2], record[3]]),
                value: record[4..].to_vec(),
            });
        }
        Ok(Self { length, entries })
    }

    fn serialize(&self) -> Vec<u8> {
        let mut packet = vec![Self::opcode(), self.length];
        for entry in &self.entries {
            packet.extend_from_slice(&entry.handle.to_le_bytes());
            packet.extend_from_slice(&entry.end_group_handle.to_le_bytes());
            packet.extend_from_slice(&entry.value);
        }
        packet
    }
}

/// Write Request packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteRequest {
    pub handle: u16,
    pub value: Vec<u8>,
}

impl AttPacket for WriteRequest {
    fn opcode() -> u8 {
        ATT_WRITE_REQ
    }

    fn parse(data: &[u8]) -> Result<Self, CodecError> {
        let rest = body(data, Self::opcode(), 3)?;
        Ok(Self {
            handle: u16::from_le_bytes([rest[0], rest[1]]),
            value: rest[2..].to_vec(),
        })
    }

    fn serialize(&self) -> Vec<u8> {
        let mut packet = Vec::with_capacity(3 + self.value.len());
        packet.push(Self::opcode());
        packet.extend_from_slice(&self.handle.to_le_bytes());
        packet.extend_from_slice(&self.value);
        packet
    }
}

/// Write Response packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteResponse;

impl AttPacket for WriteResponse {
    fn opcode() -> u8 {
        ATT_WRITE_RSP
    }

    fn parse(data: &[u8]) -> Result<Self, CodecError> {
        body(data, Self::opcode(), 1)?;
        Ok(Self)
    }

    fn serialize(&self) -> Vec<u8> {
        vec![Self::opcode()]
    }
}

/// Write Command packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteCommand {
    pub handle: u16,
    pub value: Vec<u8>,
}

impl AttPacket for WriteCommand {
    fn opcode() -> u8 {
        ATT_WRITE_CMD
    }

    fn parse(data: &[u8]) -> Result<Self, CodecError> {
        let rest = body(data, Self::opcode(), 3)?;
        Ok(Self {
            handle: u16::from_le_bytes([rest[0], rest[1]]),
            value: rest[2..].to_vec(),
        })
    }

    fn serialize(&self) -> Vec<u8> {
        let mut packet = Vec::with_capacity(3 + self.value.len());
        packet.push(Self::opcode());
        packet.extend_from_slice(&self.handle.to_le_bytes());
        packet.extend_from_slice(&self.value);
        packet
    }
}

/// Handle Value Notification packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandleValueNotification {
    pub handle: u16,
    pub value: Vec<u8>,
}

impl AttPacket for HandleValueNotification {
    fn opcode() -> u8 {
        ATT_HANDLE_VALUE_NTF
    }

    fn parse(data: &[u8]) -> Result<Self, CodecError> {
        let rest = body(data, Self::opcode(), 3)?;
        Ok(Self {
            handle: u16::from_le_bytes([rest[0], rest[1]]),
            value: rest[2..].to_vec(),
        })
    }

    fn serialize(&self) -> Vec<u8> {
        let mut packet = Vec::with_capacity(3 + self.value.len());
        packet.push(Self::opcode());
        packet.extend_from_slice(&self.handle.to_le_bytes());
        packet.extend_from_slice(&self.value);
        packet
    }
}

/// Handle Value Indication packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandleValueIndication {
    pub handle: u16,
    pub value: Vec<u8>,
}

impl AttPacket for HandleValueIndication {
    fn opcode() -> u8 {
        ATT_HANDLE_VALUE_IND
    }

    fn parse(data: &[u8]) -> Result<Self, CodecError> {
        let rest = body(data, Self::opcode(), 3)?;
        Ok(Self {
            handle: u16::from_le_bytes([rest[0], rest[1]]),
            value: rest[2..].to_vec(),
        })
    }

    fn serialize(&self) -> Vec<u8> {
        let mut packet = Vec::with_capacity(3 + self.value.len());
        packet.push(Self::opcode());
        packet.extend_from_slice(&self.handle.to_le_bytes());
        packet.extend_from_slice(&self.value);
        packet
    }
}

/// Handle Value Confirmation packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandleValueConfirmation;

impl AttPacket for HandleValueConfirmation {
    fn opcode() -> u8 {
        ATT_HANDLE_VALUE_CONF
    }

    fn parse(data: &[u8]) -> Result<Self, CodecError> {
        body(data, Self::opcode(), 1)?;
        Ok(Self)
    }

    fn serialize(&self) -> Vec<u8> {
        vec![Self::opcode()]
    }
}
