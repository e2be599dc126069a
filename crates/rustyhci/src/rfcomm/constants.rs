// RFCOMM frame types (control field without the P/F bit)
pub const RFCOMM_SABM: u8 = 0x2F;
pub const RFCOMM_UA: u8 = 0x63;
pub const RFCOMM_DM: u8 = 0x0F;
pub const RFCOMM_DISC: u8 = 0x43;
pub const RFCOMM_UIH: u8 = 0xEF;

pub const RFCOMM_PF: u8 = 0x10;
pub const RFCOMM_EA: u8 = 0x01;
pub const RFCOMM_CR: u8 = 0x02;

/// Multiplexer control channel
pub const RFCOMM_DLCI_CONTROL: u8 = 0;

// Multiplexer control message types
pub const RFCOMM_MCC_PN: u8 = 0x20;
pub const RFCOMM_MCC_TEST: u8 = 0x08;
pub const RFCOMM_MCC_FCON: u8 = 0x28;
pub const RFCOMM_MCC_FCOFF: u8 = 0x18;
pub const RFCOMM_MCC_MSC: u8 = 0x38;
pub const RFCOMM_MCC_NSC: u8 = 0x04;
pub const RFCOMM_MCC_RPN: u8 = 0x24;
pub const RFCOMM_MCC_RLS: u8 = 0x14;

// Convergence layer values carried in PN
pub const RFCOMM_CFC_REQUEST: u8 = 0xF0;
pub const RFCOMM_CFC_ACCEPT: u8 = 0xE0;

// V.24 signals sent in MSC: RTC, RTR, DV
pub const RFCOMM_V24_DEFAULT: u8 = 0x8D;

/// Valid server channels
pub const RFCOMM_CHANNEL_MIN: u8 = 1;
pub const RFCOMM_CHANNEL_MAX: u8 = 30;

/// Largest information field we offer in PN
pub const RFCOMM_DEFAULT_MTU: u16 = 127;
/// Credits granted to the peer
pub const RFCOMM_DEFAULT_CREDITS: u8 = 7;
/// L2CAP MTU requested for the RFCOMM channel
pub const RFCOMM_L2CAP_MTU: u16 = 672;

/// Remaining FCS after checking a valid frame
pub const RFCOMM_FCS_GOOD: u8 = 0xCF;
