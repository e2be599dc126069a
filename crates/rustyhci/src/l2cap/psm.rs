//! Protocol/Service Multiplexer values
//!
//! See the assigned numbers for logical link control.

/// Service Discovery Protocol
pub const PSM_SDP: u16 = 0x0001;
/// RFCOMM
pub const PSM_RFCOMM: u16 = 0x0003;
pub const PSM_BNEP: u16 = 0x000F;
pub const PSM_HID_CONTROL: u16 = 0x0011;
pub const PSM_HID_INTERRUPT: u16 = 0x0013;
pub const PSM_AVCTP: u16 = 0x0017;
pub const PSM_AVDTP: u16 = 0x0019;
/// ATT over BR/EDR
pub const PSM_ATT: u16 = 0x001F;

/// First PSM available for dynamic assignment
pub const PSM_DYNAMIC_START: u16 = 0x1001;

/// PSMs must be odd with the low bit of the upper byte clear
pub fn is_valid_psm(psm: u16) -> bool {
    psm & 0x0001 == 0x0001 && psm & 0x0100 == 0
}
