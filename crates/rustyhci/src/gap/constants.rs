// Address types
pub const PUBLIC_DEVICE_ADDRESS: u8 = 0x00;
pub const RANDOM_DEVICE_ADDRESS: u8 = 0x01;

// LE Scan parameters
pub const LE_SCAN_PASSIVE: u8 = 0x00;
pub const LE_SCAN_ACTIVE: u8 = 0x01;
pub const LE_SCAN_INTERVAL: u16 = 0x0010; // 10 ms
pub const LE_SCAN_WINDOW: u16 = 0x0010; // 10 ms

// LE Connection parameters
pub const LE_CONN_SCAN_INTERVAL: u16 = 0x0004; // 2.5 ms
pub const LE_CONN_SCAN_WINDOW: u16 = 0x0004; // 2.5 ms
pub const LE_CONN_INTERVAL_MIN: u16 = 0x0006; // 7.5 ms
pub const LE_CONN_INTERVAL_MAX: u16 = 0x0006; // 7.5 ms
pub const LE_CONN_LATENCY: u16 = 0x0000; // 0
pub const LE_SUPERVISION_TIMEOUT: u16 = 0x0048; // 720 ms
pub const LE_MIN_CE_LENGTH: u16 = 0x0000; // 0 ms
pub const LE_MAX_CE_LENGTH: u16 = 0x0000; // 0 ms

// LE Advertising parameters
pub const LE_ADV_INTERVAL_MIN: u16 = 0x0020; // 20 ms
pub const LE_ADV_INTERVAL_MAX: u16 = 0x0020; // 20 ms
pub const LE_ADV_CHANNEL_MAP_ALL: u8 = 0x07;

// Advertising PDU types used with LE Set Advertising Parameters
pub const ADV_TYPE_IND: u8 = 0x00;
pub const ADV_TYPE_DIRECT_IND: u8 = 0x01;
pub const ADV_TYPE_SCAN_IND: u8 = 0x02;
pub const ADV_TYPE_NONCONN_IND: u8 = 0x03;

// BR/EDR connection defaults
pub const ACL_PACKET_TYPES: u16 = 0xCC18; // DM1, DH1, DM3, DH3, DM5, DH5
pub const PAGE_SCAN_REPETITION_MODE_R1: u8 = 0x01;
pub const ALLOW_ROLE_SWITCH: u8 = 0x01;

// Advertising Data Types
pub const ADV_TYPE_FLAGS: u8 = 0x01;
pub const ADV_TYPE_16BIT_SERVICE_UUID_PARTIAL: u8 = 0x02;
pub const ADV_TYPE_16BIT_SERVICE_UUID_COMPLETE: u8 = 0x03;
pub const ADV_TYPE_32BIT_SERVICE_UUID_PARTIAL: u8 = 0x04;
pub const ADV_TYPE_32BIT_SERVICE_UUID_COMPLETE: u8 = 0x05;
pub const ADV_TYPE_128BIT_SERVICE_UUID_PARTIAL: u8 = 0x06;
pub const ADV_TYPE_128BIT_SERVICE_UUID_COMPLETE: u8 = 0x07;
pub const ADV_TYPE_SHORT_LOCAL_NAME: u8 = 0x08;
pub const ADV_TYPE_COMPLETE_LOCAL_NAME: u8 = 0x09;
pub const ADV_TYPE_TX_POWER_LEVEL: u8 = 0x0A;
pub const ADV_TYPE_CLASS_OF_DEVICE: u8 = 0x0D;
pub const ADV_TYPE_16BIT_SOLICITATION: u8 = 0x14;
pub const ADV_TYPE_128BIT_SOLICITATION: u8 = 0x15;
pub const ADV_TYPE_SERVICE_DATA_16BIT: u8 = 0x16;
pub const ADV_TYPE_APPEARANCE: u8 = 0x19;
pub const ADV_TYPE_MANUFACTURER_SPECIFIC: u8 = 0xFF;

// Flags AD values
pub const FLAG_LE_LIMITED_DISCOVERABLE: u8 = 0x01;
pub const FLAG_LE_GENERAL_DISCOVERABLE: u8 = 0x02;
pub const FLAG_BR_EDR_NOT_SUPPORTED: u8 = 0x04;
pub const FLAG_LE_BR_EDR_CONTROLLER: u8 = 0x08;
pub const FLAG_LE_BR_EDR_HOST: u8 = 0x10;

/// Maximum length of advertising or scan response data
pub const MAX_ADV_DATA_LEN: usize = 31;

/// Apple company identifier used by iBeacon frames
pub const IBEACON_COMPANY_ID: u16 = 0x004C;

/// Scan history entries older than this are evicted
pub const SCAN_HISTORY_HORIZON_SECS: u64 = 5 * 60;
