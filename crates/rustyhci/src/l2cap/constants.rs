// Fixed channel identifiers
pub const L2CAP_CID_NULL: u16 = 0x0000;
pub const L2CAP_CID_SIGNALING: u16 = 0x0001;
pub const L2CAP_CID_CONNECTIONLESS: u16 = 0x0002;
pub const L2CAP_CID_ATT: u16 = 0x0004;
pub const L2CAP_CID_LE_SIGNALING: u16 = 0x0005;
pub const L2CAP_CID_SMP: u16 = 0x0006;
pub const L2CAP_CID_DYNAMIC_START: u16 = 0x0040;
pub const L2CAP_CID_DYNAMIC_END: u16 = 0xFFFF;

/// Basic L2CAP header: length + CID
pub const L2CAP_HEADER_SIZE: usize = 4;
/// Signaling command header: code + identifier + length
pub const L2CAP_SIG_HEADER_SIZE: usize = 4;
/// Signaling header plus the fixed part of a Configuration Request
pub const L2CAP_CONFIG_REQ_OVERHEAD: usize = 8;

// Default MTUs
pub const L2CAP_LE_DEFAULT_MTU: u16 = 23;
pub const L2CAP_ACL_DEFAULT_MTU: u16 = 48;
pub const L2CAP_DEFAULT_FLUSH_TIMEOUT: u16 = 0xFFFF;

// ACL boundary flags
pub const ACL_START_NO_FLUSH: u8 = 0x00;
pub const ACL_CONTINUING: u8 = 0x01;
pub const ACL_START: u8 = 0x02;

// Signaling command codes
pub const L2CAP_COMMAND_REJECT: u8 = 0x01;
pub const L2CAP_CONNECTION_REQUEST: u8 = 0x02;
pub const L2CAP_CONNECTION_RESPONSE: u8 = 0x03;
pub const L2CAP_CONFIGURE_REQUEST: u8 = 0x04;
pub const L2CAP_CONFIGURE_RESPONSE: u8 = 0x05;
pub const L2CAP_DISCONNECTION_REQUEST: u8 = 0x06;
pub const L2CAP_DISCONNECTION_RESPONSE: u8 = 0x07;
pub const L2CAP_ECHO_REQUEST: u8 = 0x08;
pub const L2CAP_ECHO_RESPONSE: u8 = 0x09;
pub const L2CAP_INFORMATION_REQUEST: u8 = 0x0A;
pub const L2CAP_INFORMATION_RESPONSE: u8 = 0x0B;
pub const L2CAP_CREATE_CHANNEL_REQUEST: u8 = 0x0C;
pub const L2CAP_CREATE_CHANNEL_RESPONSE: u8 = 0x0D;
pub const L2CAP_MOVE_CHANNEL_REQUEST: u8 = 0x0E;
pub const L2CAP_MOVE_CHANNEL_RESPONSE: u8 = 0x0F;
pub const L2CAP_MOVE_CHANNEL_CONFIRMATION: u8 = 0x10;
pub const L2CAP_MOVE_CHANNEL_CONFIRMATION_RESPONSE: u8 = 0x11;
pub const L2CAP_CONNECTION_PARAMETER_UPDATE_REQUEST: u8 = 0x12;
pub const L2CAP_CONNECTION_PARAMETER_UPDATE_RESPONSE: u8 = 0x13;
pub const L2CAP_LE_CREDIT_BASED_CONNECTION_REQUEST: u8 = 0x14;
pub const L2CAP_LE_CREDIT_BASED_CONNECTION_RESPONSE: u8 = 0x15;
pub const L2CAP_LE_FLOW_CONTROL_CREDIT: u8 = 0x16;

// Command Reject reasons
pub const L2CAP_REJECT_NOT_UNDERSTOOD: u16 = 0x0000;
pub const L2CAP_REJECT_MTU_EXCEEDED: u16 = 0x0001;
pub const L2CAP_REJECT_INVALID_CID: u16 = 0x0002;

// Connection Response results
pub const L2CAP_CR_SUCCESS: u16 = 0x0000;
pub const L2CAP_CR_PENDING: u16 = 0x0001;
pub const L2CAP_CR_BAD_PSM: u16 = 0x0002;
pub const L2CAP_CR_SEC_BLOCK: u16 = 0x0003;
pub const L2CAP_CR_NO_MEM: u16 = 0x0004;

// Connection Response status
pub const L2CAP_CS_NO_INFO: u16 = 0x0000;
pub const L2CAP_CS_AUTHEN_PEND: u16 = 0x0001;
pub const L2CAP_CS_AUTHOR_PEND: u16 = 0x0002;

// Configuration Response results
pub const L2CAP_CONF_SUCCESS: u16 = 0x0000;
pub const L2CAP_CONF_UNACCEPTABLE: u16 = 0x0001;
pub const L2CAP_CONF_REJECTED: u16 = 0x0002;
pub const L2CAP_CONF_UNKNOWN: u16 = 0x0003;
pub const L2CAP_CONF_PENDING: u16 = 0x0004;
pub const L2CAP_CONF_FLOW_SPEC_REJECTED: u16 = 0x0005;

/// Continuation flag of Configuration Request/Response
pub const L2CAP_CONF_FLAG_CONTINUATION: u16 = 0x0001;

// Configuration option types
pub const L2CAP_CONF_MTU: u8 = 0x01;
pub const L2CAP_CONF_FLUSH_TIMEOUT: u8 = 0x02;
pub const L2CAP_CONF_QOS: u8 = 0x03;
pub const L2CAP_CONF_RFC: u8 = 0x04;
pub const L2CAP_CONF_FCS: u8 = 0x05;
pub const L2CAP_CONF_EFS: u8 = 0x06;
pub const L2CAP_CONF_EWS: u8 = 0x07;
/// Set on options the receiver may skip
pub const L2CAP_CONF_HINT: u8 = 0x80;

// Information Request types
pub const L2CAP_INFO_CONNECTIONLESS_MTU: u16 = 0x0001;
pub const L2CAP_INFO_EXTENDED_FEATURES: u16 = 0x0002;
pub const L2CAP_INFO_FIXED_CHANNELS: u16 = 0x0003;

// Information Response results
pub const L2CAP_IR_SUCCESS: u16 = 0x0000;
pub const L2CAP_IR_NOT_SUPPORTED: u16 = 0x0001;

// Move Channel Response results
pub const L2CAP_MR_NOT_ALLOWED: u16 = 0x0006;

// Connection Parameter Update Response results
pub const L2CAP_CPU_ACCEPTED: u16 = 0x0000;
pub const L2CAP_CPU_REJECTED: u16 = 0x0001;

/// Extended feature mask bit for Extended Flow Specification on BR/EDR
pub const L2CAP_FEAT_EXTENDED_FLOW_SPEC: u32 = 0x0000_0100;

/// Extended features advertised in Information Responses: fixed channels
pub const L2CAP_DEFAULT_EXTENDED_FEATURES: u32 = 0x0000_0080;
/// Fixed channels advertised in Information Responses: signaling
pub const L2CAP_DEFAULT_FIXED_CHANNELS: u64 = 0x0000_0000_0000_0002;

/// Bounds applied to signaling timeouts, in seconds
pub const L2CAP_SIG_TIMEOUT_MIN_SECS: u64 = 1;
pub const L2CAP_SIG_TIMEOUT_MAX_SECS: u64 = 60;
