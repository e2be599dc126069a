use rand::RngCore;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::num::ParseIntError;
use std::str::FromStr;

/// Represents a Bluetooth UUID.
///
/// On the wire a UUID is 2, 4 or 16 bytes, little-endian. The original length
/// is kept so the UUID can be written back in the form it was received in;
/// equality and hashing always use the canonical 128-bit form.
#[derive(Clone, Copy)]
pub struct Uuid {
    bytes: [u8; 16],
    len: u8,
}

/// The base UUID "00000000-0000-1000-8000-00805F9B34FB" (little-endian).
const BASE_UUID_BYTES: [u8; 16] = [
    0xFB, 0x34, 0x9B, 0x5F, 0x80, 0x00, 0x00, 0x80, 0x00, 0x10, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
];

/// Offset within the base UUID where the 16/32-bit value is inserted.
const BASE_OFFSET: usize = 12;

// Well-known 16-bit UUIDs
pub const GAP_SERVICE: Uuid = Uuid::from_u16(0x1800);
pub const GATT_SERVICE: Uuid = Uuid::from_u16(0x1801);
pub const DEVICE_INFO_SERVICE: Uuid = Uuid::from_u16(0x180A);
pub const BATTERY_SERVICE: Uuid = Uuid::from_u16(0x180F);
pub const HEART_RATE_SERVICE: Uuid = Uuid::from_u16(0x180D);
pub const PRIMARY_SERVICE: Uuid = Uuid::from_u16(0x2800);
pub const SECONDARY_SERVICE: Uuid = Uuid::from_u16(0x2801);
pub const INCLUDE: Uuid = Uuid::from_u16(0x2802);
pub const CHARACTERISTIC: Uuid = Uuid::from_u16(0x2803);
pub const CHAR_EXTENDED_PROPERTIES: Uuid = Uuid::from_u16(0x2900);
pub const CHAR_USER_DESCRIPTION: Uuid = Uuid::from_u16(0x2901);
pub const CLIENT_CHAR_CONFIG: Uuid = Uuid::from_u16(0x2902);
pub const SERVER_CHAR_CONFIG: Uuid = Uuid::from_u16(0x2903);
pub const CHAR_PRESENTATION_FORMAT: Uuid = Uuid::from_u16(0x2904);
pub const DEVICE_NAME: Uuid = Uuid::from_u16(0x2A00);
pub const APPEARANCE: Uuid = Uuid::from_u16(0x2A01);
pub const SERVICE_CHANGED: Uuid = Uuid::from_u16(0x2A05);
pub const SERIAL_PORT: Uuid = Uuid::from_u16(0x1101);

impl Uuid {
    /// Creates a new 128-bit UUID directly from 16 bytes (little-endian).
    pub const fn from_bytes_le(bytes: [u8; 16]) -> Self {
        Uuid { bytes, len: 16 }
    }

    /// Creates a new 128-bit UUID directly from 16 bytes (big-endian).
    pub fn from_bytes_be(mut bytes: [u8; 16]) -> Self {
        bytes.reverse();
        Uuid { bytes, len: 16 }
    }

    /// Creates a UUID from a 16-bit SIG-assigned value.
    pub const fn from_u16(uuid16: u16) -> Self {
        let mut bytes = BASE_UUID_BYTES;
        bytes[BASE_OFFSET] = uuid16 as u8;
        bytes[BASE_OFFSET + 1] = (uuid16 >> 8) as u8;
        Uuid { bytes, len: 2 }
    }

    /// Creates a UUID from a 32-bit SIG-assigned value.
    pub const fn from_u32(uuid32: u32) -> Self {
        let mut bytes = BASE_UUID_BYTES;
        bytes[BASE_OFFSET] = uuid32 as u8;
        bytes[BASE_OFFSET + 1] = (uuid32 >> 8) as u8;
        bytes[BASE_OFFSET + 2] = (uuid32 >> 16) as u8;
        bytes[BASE_OFFSET + 3] = (uuid32 >> 24) as u8;
        Uuid { bytes, len: 4 }
    }

    /// Tries to create a UUID from a little-endian byte slice of length 2, 4 or 16.
    pub fn try_from_slice_le(slice: &[u8]) -> Option<Self> {
        match slice.len() {
            2 => Some(Uuid::from_u16(u16::from_le_bytes([slice[0], slice[1]]))),
            4 => Some(Uuid::from_u32(u32::from_le_bytes([
                slice[0], slice[1], slice[2], slice[3],
            ]))),
            16 => {
                let mut bytes = [0u8; 16];
                bytes.copy_from_slice(slice);
                Some(Uuid::from_bytes_le(bytes))
            }
            _ => None,
        }
    }

    /// Generates a random (Version 4) UUID.
    pub fn new_random_v4() -> Self {
        let mut bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut bytes);

        // version 4, variant 1, laid out big-endian then stored little-endian
        bytes[6] = (bytes[6] & 0x0F) | 0x40;
        bytes[8] = (bytes[8] & 0x3F) | 0x80;
        Uuid::from_bytes_be(bytes)
    }

    /// Returns the canonical 16 bytes in little-endian order.
    pub const fn as_bytes_le(&self) -> &[u8; 16] {
        &self.bytes
    }

    /// Returns the canonical 16 bytes in big-endian order.
    pub fn as_bytes_be(&self) -> [u8; 16] {
        let mut bytes = self.bytes;
        bytes.reverse();
        bytes
    }

    /// Wire length of this UUID (2, 4 or 16).
    pub fn len(&self) -> usize {
        self.len as usize
    }

    /// Always false, a UUID has at least two bytes on the wire.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// The little-endian wire form in the UUID's own length.
    pub fn to_wire(&self) -> Vec<u8> {
        match self.len {
            2 => self.bytes[BASE_OFFSET..BASE_OFFSET + 2].to_vec(),
            4 => self.bytes[BASE_OFFSET..BASE_OFFSET + 4].to_vec(),
            _ => self.bytes.to_vec(),
        }
    }

    /// The shortest wire form this UUID can be written in.
    pub fn shortest(&self) -> Self {
        if let Some(v) = self.as_u16() {
            Uuid::from_u16(v)
        } else if let Some(v) = self.as_u32() {
            Uuid::from_u32(v)
        } else {
            Uuid::from_bytes_le(self.bytes)
        }
    }

    fn is_sig_assigned(&self) -> bool {
        self.bytes[0..BASE_OFFSET] == BASE_UUID_BYTES[0..BASE_OFFSET]
    }

    /// The 16-bit value if this is a SIG-assigned 16-bit UUID.
    pub fn as_u16(&self) -> Option<u16> {
        if self.is_sig_assigned()
            && self.bytes[BASE_OFFSET + 2] == 0
            && self.bytes[BASE_OFFSET + 3] == 0
        {
            Some(u16::from_le_bytes([
                self.bytes[BASE_OFFSET],
                self.bytes[BASE_OFFSET + 1],
            ]))
        } else {
            None
        }
    }

    /// The 32-bit value if this is a SIG-assigned UUID.
    pub fn as_u32(&self) -> Option<u32> {
        if self.is_sig_assigned() {
            Some(u32::from_le_bytes([
                self.bytes[BASE_OFFSET],
                self.bytes[BASE_OFFSET + 1],
                self.bytes[BASE_OFFSET + 2],
                self.bytes[BASE_OFFSET + 3],
            ]))
        } else {
            None
        }
    }
}

impl From<u16> for Uuid {
    fn from(uuid16: u16) -> Self {
        Uuid::from_u16(uuid16)
    }
}

impl From<u32> for Uuid {
    fn from(uuid32: u32) -> Self {
        Uuid::from_u32(uuid32)
    }
}

impl From<[u8; 16]> for Uuid {
    /// Assumes bytes are in little-endian order.
    fn from(bytes: [u8; 16]) -> Self {
        Uuid::from_bytes_le(bytes)
    }
}

impl PartialEq for Uuid {
    fn eq(&self, other: &Self) -> bool {
        self.bytes == other.bytes
    }
}

impl Eq for Uuid {}

impl PartialOrd for Uuid {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Uuid {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.as_bytes_be().cmp(&other.as_bytes_be())
    }
}

impl PartialEq<u16> for Uuid {
    fn eq(&self, other: &u16) -> bool {
        self.as_u16() == Some(*other)
    }
}

impl PartialEq<Uuid> for u16 {
    fn eq(&self, other: &Uuid) -> bool {
        other.as_u16() == Some(*self)
    }
}

impl Hash for Uuid {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.bytes.hash(state);
    }
}

impl fmt::Display for Uuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.len == 2 {
            if let Some(v) = self.as_u16() {
                return write!(f, "{:04x}", v);
            }
        }
        let b = self.as_bytes_be();
        write!(f, "{:02x}{:02x}{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
            b[8], b[9], b[10], b[11], b[12], b[13], b[14], b[15]
        )
    }
}

impl fmt::Debug for Uuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(u16_val) = self.as_u16() {
            write!(f, "Uuid(0x{:04X})", u16_val)
        } else if let Some(u32_val) = self.as_u32() {
            write!(f, "Uuid(0x{:08X})", u32_val)
        } else {
            write!(f, "Uuid({})", self)
        }
    }
}

#[derive(Debug)]
pub enum UuidParseError {
    InvalidLength,
    InvalidFormat,
    HexError(hex::FromHexError),
}

impl fmt::Display for UuidParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UuidParseError::InvalidLength => write!(f, "invalid UUID length"),
            UuidParseError::InvalidFormat => write!(f, "invalid UUID format"),
            UuidParseError::HexError(e) => write!(f, "invalid UUID hex: {}", e),
        }
    }
}

impl std::error::Error for UuidParseError {}

impl From<hex::FromHexError> for UuidParseError {
    fn from(err: hex::FromHexError) -> Self {
        UuidParseError::HexError(err)
    }
}

impl From<ParseIntError> for UuidParseError {
    fn from(_: ParseIntError) -> Self {
        UuidParseError::InvalidFormat
    }
}

impl FromStr for Uuid {
    type Err = UuidParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.chars().any(|c| !c.is_ascii_hexdigit() && c != '-') {
            return Err(UuidParseError::InvalidFormat);
        }
        let cleaned: String = s.chars().filter(|c| c.is_ascii_hexdigit()).collect();

        match cleaned.len() {
            4 => Ok(Uuid::from_u16(u16::from_str_radix(&cleaned, 16)?)),
            8 => Ok(Uuid::from_u32(u32::from_str_radix(&cleaned, 16)?)),
            32 => {
                let mut bytes_be = [0u8; 16];
                hex::decode_to_slice(&cleaned, &mut bytes_be)?;
                Ok(Uuid::from_bytes_be(bytes_be))
            }
            _ => Err(UuidParseError::InvalidLength),
        }
    }
}
