//! Advertising data
//!
//! [`Advertisement`] is what scanning reports to the caller: one advertising
//! report, optionally joined with the scan response that followed it.
//! [`AdvPacket`] builds the 31-byte payloads used when advertising.

use crate::gap::constants::*;
use crate::gap::types::{Address, AddressType, BdAddr};
use crate::hci::constants::{ADV_DIRECT_IND, ADV_IND};
use crate::hci::event::LeAdvertisingReport;
use crate::uuid::Uuid;

/// Parse advertisement data into `(type, data)` structures
pub fn parse_advertising_data(data: &[u8]) -> Vec<(u8, Vec<u8>)> {
    let mut result = Vec::new();
    let mut i = 0;

    while i < data.len() {
        let length = data[i] as usize;
        if length == 0 || i + length >= data.len() {
            break;
        }

        let ad_type = data[i + 1];
        let ad_data = data[i + 2..i + 1 + length].to_vec();

        result.push((ad_type, ad_data));

        i += 1 + length;
    }

    result
}

/// One received advertisement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertisement {
    pub event_type: u8,
    pub address: Address,
    pub rssi: i8,
    /// Advertising data as received
    pub data: Vec<u8>,
    /// Scan response joined to this advertisement, if one arrived
    pub scan_response: Option<Vec<u8>>,
}

impl Advertisement {
    pub fn from_report(report: &LeAdvertisingReport) -> Self {
        Self {
            event_type: report.event_type,
            address: Address::new(
                BdAddr::new(report.address),
                AddressType::from(report.address_type),
            ),
            rssi: report.rssi,
            data: report.data.clone(),
            scan_response: None,
        }
    }

    pub fn addr(&self) -> BdAddr {
        self.address.addr
    }

    /// Whether the advertiser accepts connections
    pub fn connectable(&self) -> bool {
        self.event_type == ADV_IND || self.event_type == ADV_DIRECT_IND
    }

    /// AD structures of the advertising data followed by the scan response
    pub fn fields(&self) -> Vec<(u8, Vec<u8>)> {
        let mut fields = parse_advertising_data(&self.data);
        if let Some(rsp) = &self.scan_response {
            fields.extend(parse_advertising_data(rsp));
        }
        fields
    }

    fn field(&self, ad_type: u8) -> Option<Vec<u8>> {
        self.fields()
            .into_iter()
            .find(|(t, _)| *t == ad_type)
            .map(|(_, d)| d)
    }

    /// Complete local name, or the shortened one when that is all there is
    pub fn local_name(&self) -> Option<String> {
        self.field(ADV_TYPE_COMPLETE_LOCAL_NAME)
            .or_else(|| self.field(ADV_TYPE_SHORT_LOCAL_NAME))
            .map(|d| String::from_utf8_lossy(&d).into_owned())
    }

    pub fn flags(&self) -> Option<u8> {
        self.field(ADV_TYPE_FLAGS).and_then(|d| d.first().copied())
    }

    pub fn tx_power_level(&self) -> Option<i8> {
        self.field(ADV_TYPE_TX_POWER_LEVEL)
            .and_then(|d| d.first().map(|&b| b as i8))
    }

    /// Manufacturer specific data, company identifier included
    pub fn manufacturer_data(&self) -> Option<Vec<u8>> {
        self.field(ADV_TYPE_MANUFACTURER_SPECIFIC)
    }

    /// Every advertised service UUID, complete or partial lists
    pub fn services(&self) -> Vec<Uuid> {
        let mut uuids = Vec::new();
        for (t, d) in self.fields() {
            let width = match t {
                ADV_TYPE_16BIT_SERVICE_UUID_PARTIAL | ADV_TYPE_16BIT_SERVICE_UUID_COMPLETE => 2,
                ADV_TYPE_32BIT_SERVICE_UUID_PARTIAL | ADV_TYPE_32BIT_SERVICE_UUID_COMPLETE => 4,
                ADV_TYPE_128BIT_SERVICE_UUID_PARTIAL | ADV_TYPE_128BIT_SERVICE_UUID_COMPLETE => 16,
                _ => continue,
            };
            uuids.extend(d.chunks_exact(width).filter_map(Uuid::try_from_slice_le));
        }
        uuids
    }

    /// Service data keyed by 16-bit service UUID
    pub fn service_data(&self) -> Vec<(Uuid, Vec<u8>)> {
        self.fields()
            .into_iter()
            .filter(|(t, d)| *t == ADV_TYPE_SERVICE_DATA_16BIT && d.len() >= 2)
            .map(|(_, d)| (Uuid::from_u16(u16::from_le_bytes([d[0], d[1]])), d[2..].to_vec()))
            .collect()
    }

    /// True if any of `filter` is advertised, or `filter` is empty
    pub fn matches_services(&self, filter: &[Uuid]) -> bool {
        filter.is_empty() || self.services().iter().any(|u| filter.contains(u))
    }
}

/// Builder for advertising and scan response payloads
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdvPacket {
    buf: Vec<u8>,
}

impl AdvPacket {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Room left for one more field, header included
    pub fn remaining(&self) -> usize {
        MAX_ADV_DATA_LEN - self.buf.len()
    }

    /// Append one AD structure, returning false if it does not fit
    pub fn append_field(&mut self, ad_type: u8, data: &[u8]) -> bool {
        if 2 + data.len() > self.remaining() {
            return false;
        }
        self.buf.push(1 + data.len() as u8);
        self.buf.push(ad_type);
        self.buf.extend_from_slice(data);
        true
    }

    pub fn append_flags(&mut self, flags: u8) -> bool {
        self.append_field(ADV_TYPE_FLAGS, &[flags])
    }

    /// Append the complete name, or as much of it as fits as a short name
    pub fn append_name(&mut self, name: &str) -> bool {
        if self.append_field(ADV_TYPE_COMPLETE_LOCAL_NAME, name.as_bytes()) {
            return true;
        }
        let room = self.remaining().saturating_sub(2);
        if room == 0 {
            return false;
        }
        let mut cut = room.min(name.len());
        while !name.is_char_boundary(cut) {
            cut -= 1;
        }
        cut > 0 && self.append_field(ADV_TYPE_SHORT_LOCAL_NAME, &name.as_bytes()[..cut])
    }

    pub fn append_manufacturer_data(&mut self, company_id: u16, data: &[u8]) -> bool {
        let mut body = company_id.to_le_bytes().to_vec();
        body.extend_from_slice(data);
        self.append_field(ADV_TYPE_MANUFACTURER_SPECIFIC, &body)
    }

    /// Append complete service lists grouped by UUID width.
    ///
    /// Stops at the first list that does not fit and returns false.
    pub fn append_uuid_fit(&mut self, uuids: &[Uuid]) -> bool {
        let mut by16 = Vec::new();
        let mut by32 = Vec::new();
        let mut by128 = Vec::new();
        for u in uuids {
            let short = u.shortest();
            match short.len() {
                2 => by16.extend(short.to_wire()),
                4 => by32.extend(short.to_wire()),
                _ => by128.extend(short.to_wire()),
            }
        }

        let lists = [
            (ADV_TYPE_16BIT_SERVICE_UUID_COMPLETE, by16),
            (ADV_TYPE_32BIT_SERVICE_UUID_COMPLETE, by32),
            (ADV_TYPE_128BIT_SERVICE_UUID_COMPLETE, by128),
        ];
        for (t, data) in lists.iter() {
            if !data.is_empty() && !self.append_field(*t, data) {
                return false;
            }
        }
        true
    }
}

/// Advertising data and scan response announcing a name and services.
///
/// The name goes into the advertising data when it fits after the services;
/// otherwise it is moved to the scan response.
pub fn name_and_services(name: &str, uuids: &[Uuid]) -> (AdvPacket, AdvPacket) {
    let mut adv = AdvPacket::new();
    let mut rsp = AdvPacket::new();
    adv.append_flags(FLAG_LE_GENERAL_DISCOVERABLE | FLAG_BR_EDR_NOT_SUPPORTED);
    adv.append_uuid_fit(uuids);

    if !name.is_empty()
        && !adv.append_field(ADV_TYPE_COMPLETE_LOCAL_NAME, name.as_bytes())
    {
        rsp.append_name(name);
    }
    (adv, rsp)
}

/// Advertising data carrying an iBeacon frame
pub fn ibeacon(uuid: Uuid, major: u16, minor: u16, power: i8) -> AdvPacket {
    let mut body = vec![0x02, 0x15];
    body.extend_from_slice(&uuid.as_bytes_be());
    body.extend_from_slice(&major.to_be_bytes());
    body.extend_from_slice(&minor.to_be_bytes());
    body.push(power as u8);

    let mut adv = AdvPacket::new();
    adv.append_flags(FLAG_LE_GENERAL_DISCOVERABLE | FLAG_BR_EDR_NOT_SUPPORTED);
    adv.append_manufacturer_data(IBEACON_COMPANY_ID, &body);
    adv
}
