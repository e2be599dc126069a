//! Transport and link configuration
//!
//! Plain structs with defaults and `with_*` builders. Nothing here is read
//! from the environment.

use crate::gap::constants::*;
use crate::gap::types::{AddressType, BdAddr};
use crate::hci::command::HciCommand;
use crate::hci::event::CompletedPacketsLayout;
use std::time::Duration;

/// Capacity of the command credit channel
pub const DEFAULT_COMMAND_CREDITS: usize = 16;

/// Depth of each connection's inbound packet and PDU queues
pub const DEFAULT_CONN_QUEUE_DEPTH: usize = 16;

/// Transport configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HciConfig {
    /// Controller to open, `None` for the first that binds
    pub dev_id: Option<u16>,
    /// Layout of Number Of Completed Packets events
    pub completed_packets_layout: CompletedPacketsLayout,
    /// Upper bound on command credits
    pub command_credits: usize,
    /// Per-connection queue depth
    pub conn_queue_depth: usize,
    /// Time allowed for each connection to disconnect on close
    pub close_conn_timeout: Duration,
    /// Time allowed for all connections to disconnect on close
    pub close_timeout: Duration,
}

impl Default for HciConfig {
    fn default() -> Self {
        Self {
            dev_id: None,
            completed_packets_layout: CompletedPacketsLayout::Interleaved,
            command_credits: DEFAULT_COMMAND_CREDITS,
            conn_queue_depth: DEFAULT_CONN_QUEUE_DEPTH,
            close_conn_timeout: Duration::from_millis(200),
            close_timeout: Duration::from_secs(2),
        }
    }
}

impl HciConfig {
    pub fn with_dev_id(mut self, dev_id: u16) -> Self {
        self.dev_id = Some(dev_id);
        self
    }

    pub fn with_completed_packets_layout(mut self, layout: CompletedPacketsLayout) -> Self {
        self.completed_packets_layout = layout;
        self
    }

    pub fn with_command_credits(mut self, credits: usize) -> Self {
        self.command_credits = credits.max(1);
        self
    }

    pub fn with_conn_queue_depth(mut self, depth: usize) -> Self {
        self.conn_queue_depth = depth.max(1);
        self
    }

    pub fn with_close_timeouts(mut self, per_conn: Duration, total: Duration) -> Self {
        self.close_conn_timeout = per_conn;
        self.close_timeout = total;
        self
    }
}

/// LE scan parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanParams {
    pub scan_type: u8,
    pub scan_interval: u16,
    pub scan_window: u16,
    pub own_address_type: u8,
    pub filter_policy: u8,
}

impl Default for ScanParams {
    fn default() -> Self {
        Self {
            scan_type: LE_SCAN_ACTIVE,
            scan_interval: LE_SCAN_INTERVAL,
            scan_window: LE_SCAN_WINDOW,
            own_address_type: PUBLIC_DEVICE_ADDRESS,
            filter_policy: 0,
        }
    }
}

impl ScanParams {
    pub fn with_passive(mut self) -> Self {
        self.scan_type = LE_SCAN_PASSIVE;
        self
    }

    pub fn with_timing(mut self, interval: u16, window: u16) -> Self {
        self.scan_interval = interval;
        self.scan_window = window.min(interval);
        self
    }

    pub fn to_command(&self) -> HciCommand {
        HciCommand::LeSetScanParameters {
            scan_type: self.scan_type,
            scan_interval: self.scan_interval,
            scan_window: self.scan_window,
            own_address_type: self.own_address_type,
            filter_policy: self.filter_policy,
        }
    }
}

/// LE advertising parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdvParams {
    pub interval_min: u16,
    pub interval_max: u16,
    pub advertising_type: u8,
    pub own_address_type: u8,
    pub channel_map: u8,
    pub filter_policy: u8,
}

impl Default for AdvParams {
    fn default() -> Self {
        Self {
            interval_min: LE_ADV_INTERVAL_MIN,
            interval_max: LE_ADV_INTERVAL_MAX,
            advertising_type: ADV_TYPE_IND,
            own_address_type: PUBLIC_DEVICE_ADDRESS,
            channel_map: LE_ADV_CHANNEL_MAP_ALL,
            filter_policy: 0,
        }
    }
}

impl AdvParams {
    pub fn with_interval(mut self, min: u16, max: u16) -> Self {
        self.interval_min = min;
        self.interval_max = max.max(min);
        self
    }

    pub fn with_advertising_type(mut self, advertising_type: u8) -> Self {
        self.advertising_type = advertising_type;
        self
    }

    pub fn to_command(&self) -> HciCommand {
        HciCommand::LeSetAdvertisingParameters {
            interval_min: self.interval_min,
            interval_max: self.interval_max,
            advertising_type: self.advertising_type,
            own_address_type: self.own_address_type,
            direct_address_type: 0,
            direct_address: [0; 6],
            channel_map: self.channel_map,
            filter_policy: self.filter_policy,
        }
    }
}

/// LE connection parameters, used for create-connection and updates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnParams {
    pub scan_interval: u16,
    pub scan_window: u16,
    pub own_address_type: u8,
    pub conn_interval_min: u16,
    pub conn_interval_max: u16,
    pub conn_latency: u16,
    pub supervision_timeout: u16,
    pub min_ce_length: u16,
    pub max_ce_length: u16,
}

impl Default for ConnParams {
    fn default() -> Self {
        Self {
            scan_interval: LE_CONN_SCAN_INTERVAL,
            scan_window: LE_CONN_SCAN_WINDOW,
            own_address_type: PUBLIC_DEVICE_ADDRESS,
            conn_interval_min: LE_CONN_INTERVAL_MIN,
            conn_interval_max: LE_CONN_INTERVAL_MAX,
            conn_latency: LE_CONN_LATENCY,
            supervision_timeout: LE_SUPERVISION_TIMEOUT,
            min_ce_length: LE_MIN_CE_LENGTH,
            max_ce_length: LE_MAX_CE_LENGTH,
        }
    }
}

impl ConnParams {
    pub fn with_interval(mut self, min: u16, max: u16) -> Self {
        self.conn_interval_min = min;
        self.conn_interval_max = max.max(min);
        self
    }

    pub fn with_latency(mut self, latency: u16) -> Self {
        self.conn_latency = latency;
        self
    }

    pub fn with_supervision_timeout(mut self, timeout: u16) -> Self {
        self.supervision_timeout = timeout;
        self
    }

    pub fn create_command(&self, peer: BdAddr, peer_type: AddressType) -> HciCommand {
        HciCommand::LeCreateConnection {
            scan_interval: self.scan_interval,
            scan_window: self.scan_window,
            initiator_filter_policy: 0,
            peer_address_type: peer_type.into(),
            peer_address: peer.bytes,
            own_address_type: self.own_address_type,
            conn_interval_min: self.conn_interval_min,
            conn_interval_max: self.conn_interval_max,
            conn_latency: self.conn_latency,
            supervision_timeout: self.supervision_timeout,
            min_ce_length: self.min_ce_length,
            max_ce_length: self.max_ce_length,
        }
    }

    pub fn update_command(&self, handle: u16) -> HciCommand {
        HciCommand::LeConnectionUpdate {
            handle,
            conn_interval_min: self.conn_interval_min,
            conn_interval_max: self.conn_interval_max,
            conn_latency: self.conn_latency,
            supervision_timeout: self.supervision_timeout,
            min_ce_length: self.min_ce_length,
            max_ce_length: self.max_ce_length,
        }
    }
}
