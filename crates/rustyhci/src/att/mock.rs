//! In-memory ATT server answering the host through the mock controller

use super::constants::*;
use super::error::AttErrorCode;
use super::pdu::*;
use crate::hci::mock::AclResponder;
use crate::l2cap::constants::L2CAP_CID_ATT;
use crate::uuid::{self, Uuid};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

struct Attr {
    handle: u16,
    typ: Uuid,
    value: Vec<u8>,
}

#[derive(Default)]
pub struct FakeServer {
    attrs: Vec<Attr>,
    mtu: u16,
    server_mtu: u16,
    errors: HashMap<(u8, u16), u8>,
    /// Every (handle, value) written with a request or command
    pub writes: Vec<(u16, Vec<u8>)>,
    /// Every request opcode seen, in order
    pub requests: Vec<u8>,
    pub confirmations: usize,
}

pub type SharedServer = Arc<Mutex<FakeServer>>;

pub fn lock(server: &SharedServer) -> MutexGuard<'_, FakeServer> {
    server.lock().unwrap_or_else(|e| e.into_inner())
}

impl FakeServer {
    pub fn new() -> Self {
        Self {
            mtu: ATT_DEFAULT_MTU,
            server_mtu: 185,
            ..Default::default()
        }
    }

    fn next_handle(&self) -> u16 {
        self.attrs.last().map_or(1, |a| a.handle + 1)
    }

    fn push(&mut self, typ: Uuid, value: Vec<u8>) -> u16 {
        let handle = self.next_handle();
        self.attrs.push(Attr { handle, typ, value });
        handle
    }

    /// Skip handles so the next attribute lands on `handle`
    pub fn skip_to(&mut self, handle: u16) {
        if let Some(last) = self.attrs.last() {
            assert!(handle > last.handle);
        }
        self.attrs.push(Attr {
            handle: handle - 1,
            typ: Uuid::from_u16(0xFFFF),
            value: Vec::new(),
        });
    }

    pub fn add_service(&mut self, uuid: Uuid) -> u16 {
        self.push(uuid::PRIMARY_SERVICE, uuid.to_wire())
    }

    /// Declaration plus value; returns the value handle
    pub fn add_characteristic(&mut self, uuid: Uuid, properties: u8, value: &[u8]) -> u16 {
        let value_handle = self.next_handle() + 1;
        let mut decl = vec![properties];
        decl.extend_from_slice(&value_handle.to_le_bytes());
        decl.extend_from_slice(&uuid.to_wire());
        self.push(uuid::CHARACTERISTIC, decl);
        self.push(uuid, value.to_vec())
    }

    pub fn add_descriptor(&mut self, uuid: Uuid, value: &[u8]) -> u16 {
        self.push(uuid, value.to_vec())
    }

    pub fn set_server_mtu(&mut self, mtu: u16) {
        self.server_mtu = mtu;
    }

    /// Answer `request` on `handle` with an Error Response
    pub fn fail(&mut self, request: u8, handle: u16, code: u8) {
        self.errors.insert((request, handle), code);
    }

    pub fn value(&self, handle: u16) -> Option<Vec<u8>> {
        self.attr(handle).map(|a| a.value.clone())
    }

    fn attr(&self, handle: u16) -> Option<&Attr> {
        self.attrs.iter().find(|a| a.handle == handle)
    }

    fn group_end(&self, service: u16) -> u16 {
        self.attrs
            .iter()
            .skip_while(|a| a.handle <= service)
            .take_while(|a| a.typ != uuid::PRIMARY_SERVICE)
            .last()
            .map_or(service, |a| a.handle)
    }

    fn error(request: u8, handle: u16, code: u8) -> Vec<u8> {
        ErrorResponse::new(request, handle, AttErrorCode::from(code)).serialize()
    }

    /// Answer one ATT PDU, `None` for PDUs that need no answer
    pub fn handle(&mut self, pdu: &[u8]) -> Option<Vec<u8>> {
        let opcode = *pdu.first()?;
        if opcode == ATT_HANDLE_VALUE_CONF {
            self.confirmations += 1;
            return None;
        }
        self.requests.push(opcode);

        let room = self.mtu as usize - 2;
        let rsp = match opcode {
            ATT_EXCHANGE_MTU_REQ => {
                let req = ExchangeMtuRequest::parse(pdu).ok()?;
                self.mtu = req.client_mtu.min(self.server_mtu).max(ATT_DEFAULT_MTU);
                ExchangeMtuResponse {
                    server_mtu: self.server_mtu,
                }
                .serialize()
            }
            ATT_READ_BY_GROUP_TYPE_REQ => {
                let req = ReadByGroupTypeRequest::parse(pdu).ok()?;
                if let Some(code) = self.errors.get(&(opcode, req.start_handle)) {
                    return Some(Self::error(opcode, req.start_handle, *code));
                }
                let mut entries: Vec<GroupData> = Vec::new();
                for a in self.attrs.iter().filter(|a| {
                    a.handle >= req.start_handle
                        && a.handle <= req.end_handle
                        && a.typ == req.group_type
                }) {
                    let len = 4 + a.value.len();
                    if let Some(first) = entries.first() {
                        if 4 + first.value.len() != len || (entries.len() + 1) * len > room {
                            break;
                        }
                    }
                    entries.push(GroupData {
                        handle: a.handle,
                        end_group_handle: self.group_end(a.handle),
                        value: a.value.clone(),
                    });
                }
                match entries.first().map(|e| (4 + e.value.len()) as u8) {
                    None => Self::error(opcode, req.start_handle, ATT_ERROR_ATTRIBUTE_NOT_FOUND),
                    Some(length) => ReadByGroupTypeResponse { length, entries }.serialize(),
                }
            }
            ATT_READ_BY_TYPE_REQ => {
                let req = ReadByTypeRequest::parse(pdu).ok()?;
                let mut entries: Vec<AttributeData> = Vec::new();
                for a in self.attrs.iter().filter(|a| {
                    a.handle >= req.start_handle
                        && a.handle <= req.end_handle
                        && a.typ == req.attribute_type
                }) {
                    let len = 2 + a.value.len();
                    if let Some(first) = entries.first() {
                        if 2 + first.value.len() != len || (entries.len() + 1) * len > room {
                            break;
                        }
                    }
                    entries.push(AttributeData {
                        handle: a.handle,
                        value: a.value.clone(),
                    });
                }
                match entries.first().map(|e| (2 + e.value.len()) as u8) {
                    None => Self::error(opcode, req.start_handle, ATT_ERROR_ATTRIBUTE_NOT_FOUND),
                    Some(length) => ReadByTypeResponse { length, entries }.serialize(),
                }
            }
            ATT_FIND_INFO_REQ => {
                let req = FindInformationRequest::parse(pdu).ok()?;
                let mut format = 0;
                let mut entries = Vec::new();
                for a in self
                    .attrs
                    .iter()
                    .filter(|a| a.handle >= req.start_handle && a.handle <= req.end_handle)
                {
                    let f = if a.typ.as_u16().is_some() {
                        ATT_FIND_INFO_FORMAT_16BIT
                    } else {
                        ATT_FIND_INFO_FORMAT_128BIT
                    };
                    let size = if f == ATT_FIND_INFO_FORMAT_16BIT { 4 } else { 18 };
                    if format == 0 {
                        format = f;
                    }
                    if f != format || (entries.len() + 1) * size > room - 1 {
                        break;
                    }
                    entries.push((a.handle, a.typ));
                }
                if entries.is_empty() {
                    Self::error(opcode, req.start_handle, ATT_ERROR_ATTRIBUTE_NOT_FOUND)
                } else {
                    FindInformationResponse { format, entries }.serialize()
                }
            }
            ATT_READ_REQ => {
                let req = ReadRequest::parse(pdu).ok()?;
                if let Some(code) = self.errors.get(&(opcode, req.handle)) {
                    return Some(Self::error(opcode, req.handle, *code));
                }
                match self.attr(req.handle) {
                    None => Self::error(opcode, req.handle, ATT_ERROR_INVALID_HANDLE),
                    Some(a) => {
                        let n = a.value.len().min(self.mtu as usize - 1);
                        ReadResponse {
                            value: a.value[..n].to_vec(),
                        }
                        .serialize()
                    }
                }
            }
            ATT_READ_BLOB_REQ => {
                let req = ReadBlobRequest::parse(pdu).ok()?;
                if let Some(code) = self.errors.get(&(opcode, req.handle)) {
                    return Some(Self::error(opcode, req.handle, *code));
                }
                match self.attr(req.handle) {
                    None => Self::error(opcode, req.handle, ATT_ERROR_INVALID_HANDLE),
                    Some(a) if req.offset as usize > a.value.len() => {
                        Self::error(opcode, req.handle, ATT_ERROR_INVALID_OFFSET)
                    }
                    Some(a) => {
                        let start = req.offset as usize;
                        let end = a.value.len().min(start + self.mtu as usize - 1);
                        ReadBlobResponse {
                            value: a.value[start..end].to_vec(),
                        }
                        .serialize()
                    }
                }
            }
            ATT_READ_MULTIPLE_REQ => {
                let req = ReadMultipleRequest::parse(pdu).ok()?;
                let mut values = Vec::new();
                for handle in req.handles {
                    match self.attr(handle) {
                        Some(a) => values.extend_from_slice(&a.value),
                        None => return Some(Self::error(opcode, handle, ATT_ERROR_INVALID_HANDLE)),
                    }
                }
                values.truncate(self.mtu as usize - 1);
                ReadMultipleResponse { values }.serialize()
            }
            ATT_WRITE_REQ | ATT_WRITE_CMD => {
                let mut raw = pdu.to_vec();
                raw[0] = ATT_WRITE_REQ;
                let req = WriteRequest::parse(&raw).ok()?;
                if let Some(code) = self.errors.get(&(opcode, req.handle)) {
                    return Some(Self::error(opcode, req.handle, *code));
                }
                self.writes.push((req.handle, req.value.clone()));
                let found = self
                    .attrs
                    .iter_mut()
                    .find(|a| a.handle == req.handle)
                    .map(|a| a.value = req.value)
                    .is_some();
                if opcode == ATT_WRITE_CMD {
                    return None;
                }
                if found {
                    WriteResponse.serialize()
                } else {
                    Self::error(opcode, req.handle, ATT_ERROR_INVALID_HANDLE)
                }
            }
            op if is_command(op) || is_response(op) => return None,
            op => Self::error(op, 0, ATT_ERROR_REQUEST_NOT_SUPPORTED),
        };
        Some(rsp)
    }
}

/// Responder that routes ATT PDUs from the host into `server`
pub fn responder(server: &SharedServer) -> AclResponder {
    let server = server.clone();
    Box::new(move |_: u16, cid: u16, payload: &[u8]| {
        if cid != L2CAP_CID_ATT {
            return Vec::new();
        }
        lock(&server)
            .handle(payload)
            .map(|rsp| vec![(L2CAP_CID_ATT, rsp)])
            .unwrap_or_default()
    })
}

/// A small GATT database: GAP service with a device name, and a heart rate
/// style service with a notifiable measurement and its CCCD
pub fn sample_server() -> SharedServer {
    let mut s = FakeServer::new();
    s.add_service(uuid::GAP_SERVICE); // 0x0001
    s.add_characteristic(uuid::DEVICE_NAME, 0x02, b"rusty"); // 0x0002, 0x0003
    s.add_service(uuid::HEART_RATE_SERVICE); // 0x0004
    s.add_characteristic(Uuid::from_u16(0x2A37), 0x10, &[0x00, 0x48]); // 0x0005, 0x0006
    s.add_descriptor(uuid::CLIENT_CHAR_CONFIG, &[0x00, 0x00]); // 0x0007
    s.add_characteristic(Uuid::from_u16(0x2A38), 0x0A, &[0x01]); // 0x0008, 0x0009
    Arc::new(Mutex::new(s))
}
