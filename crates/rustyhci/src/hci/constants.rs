//! HCI protocol constants
//!
//! This module contains constants used in the Bluetooth HCI protocol.

// HCI packet types
pub const HCI_COMMAND_PKT: u8 = 0x01;
pub const HCI_ACL_PKT: u8 = 0x02;
pub const HCI_SCO_PKT: u8 = 0x03;
pub const HCI_EVENT_PKT: u8 = 0x04;
pub const HCI_ISO_PKT: u8 = 0x05;
pub const HCI_VENDOR_PKT: u8 = 0xFF;

// Header sizes, not counting the packet type byte
pub const HCI_COMMAND_HDR_SIZE: usize = 3;
pub const HCI_EVENT_HDR_SIZE: usize = 2;
pub const HCI_ACL_HDR_SIZE: usize = 4;

// Maximum size of HCI command parameters
pub const HCI_MAX_PARAM_LEN: usize = 255;
pub const HCI_MAX_EVENT_SIZE: usize = 260;
pub const HCI_MAX_FRAME_SIZE: usize = 1028;

// Common OGF (Opcode Group Field) values
pub const OGF_LINK_CTL: u8 = 0x01;
pub const OGF_LINK_POLICY: u8 = 0x02;
pub const OGF_HOST_CTL: u8 = 0x03;
pub const OGF_INFO_PARAM: u8 = 0x04;
pub const OGF_STATUS_PARAM: u8 = 0x05;
pub const OGF_LE: u8 = 0x08;

// Link Control Commands (OGF: 0x01)
pub const OCF_INQUIRY: u16 = 0x0001;
pub const OCF_INQUIRY_CANCEL: u16 = 0x0002;
pub const OCF_PERIODIC_INQUIRY_MODE: u16 = 0x0003;
pub const OCF_EXIT_PERIODIC_INQUIRY_MODE: u16 = 0x0004;
pub const OCF_CREATE_CONNECTION: u16 = 0x0005;
pub const OCF_DISCONNECT: u16 = 0x0006;
pub const OCF_CREATE_CONNECTION_CANCEL: u16 = 0x0008;

// Host Controller Commands (OGF: 0x03)
pub const OCF_SET_EVENT_MASK: u16 = 0x0001;
pub const OCF_RESET: u16 = 0x0003;
pub const OCF_WRITE_LOCAL_NAME: u16 = 0x0013;
pub const OCF_WRITE_PAGE_TIMEOUT: u16 = 0x0018;
pub const OCF_WRITE_SCAN_ENABLE: u16 = 0x001A;
pub const OCF_WRITE_CLASS_OF_DEVICE: u16 = 0x0024;
pub const OCF_WRITE_LE_HOST_SUPPORT: u16 = 0x006D;

// Informational Parameters (OGF: 0x04)
pub const OCF_READ_BUFFER_SIZE: u16 = 0x0005;
pub const OCF_READ_BD_ADDR: u16 = 0x0009;

// LE Command OCF values (OGF: 0x08)
pub const OCF_LE_SET_EVENT_MASK: u16 = 0x0001;
pub const OCF_LE_READ_BUFFER_SIZE: u16 = 0x0002;
pub const OCF_LE_SET_RANDOM_ADDRESS: u16 = 0x0005;
pub const OCF_LE_SET_ADVERTISING_PARAMETERS: u16 = 0x0006;
pub const OCF_LE_READ_ADVERTISING_PHYSICAL_CHANNEL_TX_POWER: u16 = 0x0007;
pub const OCF_LE_SET_ADVERTISING_DATA: u16 = 0x0008;
pub const OCF_LE_SET_SCAN_RESPONSE_DATA: u16 = 0x0009;
pub const OCF_LE_SET_ADVERTISING_ENABLE: u16 = 0x000A;
pub const OCF_LE_SET_SCAN_PARAMETERS: u16 = 0x000B;
pub const OCF_LE_SET_SCAN_ENABLE: u16 = 0x000C;
pub const OCF_LE_CREATE_CONNECTION: u16 = 0x000D;
pub const OCF_LE_CREATE_CONNECTION_CANCEL: u16 = 0x000E;
pub const OCF_LE_CONNECTION_UPDATE: u16 = 0x0013;
pub const OCF_LE_LTK_NEGATIVE_REPLY: u16 = 0x001B;

/// Build an opcode from its group and command fields
pub const fn opcode(ogf: u8, ocf: u16) -> u16 {
    ((ogf as u16) << 10) | (ocf & 0x03FF)
}

// HCI Events
pub const EVT_INQUIRY_COMPLETE: u8 = 0x01;
pub const EVT_INQUIRY_RESULT: u8 = 0x02;
pub const EVT_CONN_COMPLETE: u8 = 0x03;
pub const EVT_CONN_REQUEST: u8 = 0x04;
pub const EVT_DISCONN_COMPLETE: u8 = 0x05;
pub const EVT_ENCRYPTION_CHANGE: u8 = 0x08;
pub const EVT_READ_REMOTE_VERSION_COMPLETE: u8 = 0x0C;
pub const EVT_CMD_COMPLETE: u8 = 0x0E;
pub const EVT_CMD_STATUS: u8 = 0x0F;
pub const EVT_HARDWARE_ERROR: u8 = 0x10;
pub const EVT_NUM_COMPLETED_PACKETS: u8 = 0x13;
pub const EVT_MAX_SLOTS_CHANGE: u8 = 0x1B;
pub const EVT_PAGE_SCAN_REPETITION_MODE_CHANGE: u8 = 0x20;
pub const EVT_INQUIRY_RESULT_WITH_RSSI: u8 = 0x22;
pub const EVT_EXTENDED_INQUIRY_RESULT: u8 = 0x2F;
pub const EVT_ENCRYPTION_KEY_REFRESH_COMPLETE: u8 = 0x30;
pub const EVT_LE_META_EVENT: u8 = 0x3E;
pub const EVT_VENDOR: u8 = 0xFF;

// LE Meta Events
pub const EVT_LE_CONN_COMPLETE: u8 = 0x01;
pub const EVT_LE_ADVERTISING_REPORT: u8 = 0x02;
pub const EVT_LE_CONN_UPDATE_COMPLETE: u8 = 0x03;
pub const EVT_LE_READ_REMOTE_FEATURES_COMPLETE: u8 = 0x04;
pub const EVT_LE_LTK_REQUEST: u8 = 0x05;

// Event masks programmed during initialisation
pub const DEFAULT_EVENT_MASK: u64 = 0x3DBF_F807_FFFB_FFFF;
pub const DEFAULT_LE_EVENT_MASK: u64 = 0x0000_0000_0000_001F;

// LE advertising report event types
pub const ADV_IND: u8 = 0x00;
pub const ADV_DIRECT_IND: u8 = 0x01;
pub const ADV_SCAN_IND: u8 = 0x02;
pub const ADV_NONCONN_IND: u8 = 0x03;
pub const SCAN_RSP: u8 = 0x04;

// Connection roles reported in connection complete events
pub const ROLE_MASTER: u8 = 0x00;
pub const ROLE_SLAVE: u8 = 0x01;

/// Remote user terminated connection
pub const DISCONNECT_REASON_REMOTE_USER: u8 = 0x13;

/// General inquiry access code
pub const GIAC_LAP: [u8; 3] = [0x33, 0x8B, 0x9E];

/// Inquiry length unit
pub const INQUIRY_LENGTH_UNIT_MS: u64 = 1280;
pub const INQUIRY_LENGTH_MAX: u8 = 0x30;

/// Connection handles occupy the low 12 bits
pub const HANDLE_MASK: u16 = 0x0FFF;

// Link types reported in Connection Complete
pub const LINK_TYPE_SCO: u8 = 0x00;
pub const LINK_TYPE_ACL: u8 = 0x01;
