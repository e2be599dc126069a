//! Scan history
//!
//! Remembers the last advertisement seen from each address so a scan
//! response can be joined to the advertisement it answers.

use crate::gap::adv::Advertisement;
use crate::gap::constants::SCAN_HISTORY_HORIZON_SECS;
use crate::hci::constants::{ADV_IND, ADV_SCAN_IND, SCAN_RSP};
use crate::hci::event::LeAdvertisingReport;
use std::collections::HashMap;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct Entry {
    adv: Advertisement,
    seen: Instant,
}

#[derive(Debug, Clone)]
pub struct ScanHistory {
    entries: HashMap<String, Entry>,
    horizon: Duration,
}

impl Default for ScanHistory {
    fn default() -> Self {
        Self::new(Duration::from_secs(SCAN_HISTORY_HORIZON_SECS))
    }
}

impl ScanHistory {
    pub fn new(horizon: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            horizon,
        }
    }

    /// Record a report and return the advertisement to deliver.
    ///
    /// A scan response is joined to the last ADV_IND or ADV_SCAN_IND from
    /// the same address. `None` means the scan response had nothing to join.
    pub fn process(&mut self, report: &LeAdvertisingReport, now: Instant) -> Option<Advertisement> {
        let incoming = Advertisement::from_report(report);
        let key = incoming.address.to_string();

        if report.event_type == SCAN_RSP {
            let entry = self.entries.get_mut(&key)?;
            if entry.adv.event_type != ADV_IND && entry.adv.event_type != ADV_SCAN_IND {
                return None;
            }
            entry.adv.scan_response = Some(report.data.clone());
            entry.adv.rssi = report.rssi;
            entry.seen = now;
            return Some(entry.adv.clone());
        }

        self.entries.insert(
            key,
            Entry {
                adv: incoming.clone(),
                seen: now,
            },
        );
        Some(incoming)
    }

    /// Drop entries last seen before `now - horizon`
    pub fn evict(&mut self, now: Instant) {
        let horizon = self.horizon;
        self.entries
            .retain(|_, e| now.saturating_duration_since(e.seen) <= horizon);
    }

    pub fn get(&self, addr: &str) -> Option<&Advertisement> {
        self.entries.get(addr).map(|e| &e.adv)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
