//! Tests for the ATT client and PDU codecs

use super::constants::*;
use super::mock::{lock, responder, sample_server, FakeServer};
use super::pdu::*;
use super::*;
use crate::context::{Context, ContextError};
use crate::hci::constants::ROLE_MASTER;
use crate::hci::mock::{connect_le, init_hci, MockController};
use crate::hci::Hci;
use crate::l2cap::constants::L2CAP_CID_ATT;
use crate::l2cap::{Conn, L2capError};
use crate::uuid::{self, Uuid};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const HANDLE: u16 = 0x0040;
const WAIT: Duration = Duration::from_secs(2);

fn ctx() -> Context {
    Context::background().with_timeout(Duration::from_secs(5))
}

fn setup() -> (Arc<MockController>, Hci, Arc<Conn>, AttClient) {
    let mock = MockController::new();
    let hci = init_hci(&mock);
    let conn = connect_le(&mock, &hci, HANDLE, ROLE_MASTER);
    let client = AttClient::new(conn.clone());
    (mock, hci, conn, client)
}

fn teardown(hci: Hci, client: AttClient) {
    drop(client);
    hci.close().unwrap();
}

// Everything the host sent on the ATT channel
fn att_sent(mock: &MockController) -> Vec<Vec<u8>> {
    mock.pdus()
        .into_iter()
        .filter(|p| p.cid == L2CAP_CID_ATT)
        .map(|p| p.payload)
        .collect()
}

type Received = Arc<Mutex<Vec<(u16, Vec<u8>)>>>;

fn recorder() -> (Received, impl FnMut(u16, &[u8]) -> AttResult<()> + Send + 'static) {
    let seen: Received = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let handler = move |handle: u16, value: &[u8]| {
        sink.lock().unwrap().push((handle, value.to_vec()));
        Ok(())
    };
    (seen, handler)
}

#[test]
fn test_error_code_mapping() {
    assert_eq!(AttErrorCode::from(0x0A), AttErrorCode::AttributeNotFound);
    assert_eq!(AttErrorCode::from(0x06), AttErrorCode::RequestNotSupported);
    assert_eq!(AttErrorCode::from(0x85), AttErrorCode::ApplicationError(0x85));
    assert_eq!(AttErrorCode::from(0xFD), AttErrorCode::CommonProfileError(0xFD));
    assert_eq!(AttErrorCode::from(0x50), AttErrorCode::Unknown(0x50));

    assert_eq!(u8::from(AttErrorCode::InvalidOffset), 0x07);
    assert_eq!(u8::from(AttErrorCode::ApplicationError(0x90)), 0x90);
    assert_eq!(AttErrorCode::AttributeNotFound.to_string(), "attribute not found");
}

#[test]
fn test_attribute_not_found_is_distinguished() {
    let err = AttError::Protocol {
        request: ATT_READ_BY_GROUP_TYPE_REQ,
        handle: 0x0001,
        code: AttErrorCode::AttributeNotFound,
    };
    assert!(err.is_attribute_not_found());
    assert_eq!(err.handle(), Some(0x0001));
    assert!(!AttError::Timeout.is_attribute_not_found());
}

#[test]
fn test_opcode_classes() {
    assert!(is_command(ATT_WRITE_CMD));
    assert!(is_command(ATT_SIGNED_WRITE_CMD));
    assert!(!is_command(ATT_WRITE_REQ));
    assert!(is_response(ATT_READ_RSP));
    assert!(is_response(ATT_ERROR_RSP));
    assert!(!is_response(ATT_HANDLE_VALUE_NTF));
    assert!(!is_response(ATT_READ_REQ));
}

#[test]
fn test_parse_error_response() {
    let rsp = ErrorResponse::parse(&[0x01, 0x10, 0x01, 0x00, 0x0A]).unwrap();
    assert_eq!(rsp.request_opcode, ATT_READ_BY_GROUP_TYPE_REQ);
    assert_eq!(rsp.handle, 0x0001);
    assert_eq!(rsp.error_code, AttErrorCode::AttributeNotFound);
    assert_eq!(rsp.serialize(), vec![0x01, 0x10, 0x01, 0x00, 0x0A]);

    assert!(ErrorResponse::parse(&[0x01, 0x10, 0x01]).unwrap_err().is_short());
    assert!(ErrorResponse::parse(&[0x0B, 0x10, 0x01, 0x00, 0x0A]).is_err());
}

#[test]
fn test_request_wire_format() {
    let req = ReadByGroupTypeRequest {
        start_handle: 0x0001,
        end_handle: 0xFFFF,
        group_type: uuid::PRIMARY_SERVICE,
    };
    assert_eq!(req.serialize(), vec![0x10, 0x01, 0x00, 0xFF, 0xFF, 0x00, 0x28]);

    let req = ReadByTypeRequest {
        start_handle: 0x0004,
        end_handle: 0x0009,
        attribute_type: uuid::CHARACTERISTIC,
    };
    assert_eq!(req.serialize(), vec![0x08, 0x04, 0x00, 0x09, 0x00, 0x03, 0x28]);
    assert_eq!(ReadByTypeRequest::parse(&req.serialize()).unwrap(), req);

    let req = ReadBlobRequest {
        handle: 0x0003,
        offset: 22,
    };
    assert_eq!(req.serialize(), vec![0x0C, 0x03, 0x00, 0x16, 0x00]);
}

#[test]
fn test_parse_find_information_formats() {
    let rsp = FindInformationResponse::parse(&[0x05, 0x01, 0x07, 0x00, 0x02, 0x29]).unwrap();
    assert_eq!(rsp.entries, vec![(0x0007, uuid::CLIENT_CHAR_CONFIG)]);

    let custom: Uuid = "12345678-1234-5678-1234-56789abcdef0".parse().unwrap();
    let mut pdu = vec![0x05, 0x02, 0x10, 0x00];
    pdu.extend_from_slice(custom.as_bytes_le());
    let rsp = FindInformationResponse::parse(&pdu).unwrap();
    assert_eq!(rsp.entries, vec![(0x0010, custom)]);

    // A partial record is malformed
    assert!(FindInformationResponse::parse(&[0x05, 0x01, 0x07, 0x00, 0x02]).is_err());
    // So is an unknown format
    assert!(FindInformationResponse::parse(&[0x05, 0x03, 0x07, 0x00, 0x02, 0x29]).is_err());
}

#[test]
fn test_parse_read_by_group_type_response() {
    let pdu = [
        0x11, 0x06, 0x01, 0x00, 0x03, 0x00, 0x00, 0x18, 0x04, 0x00, 0x09, 0x00, 0x0D, 0x18,
    ];
    let rsp = ReadByGroupTypeResponse::parse(&pdu).unwrap();
    assert_eq!(rsp.entries.len(), 2);
    assert_eq!(rsp.entries[0].handle, 0x0001);
    assert_eq!(rsp.entries[0].end_group_handle, 0x0003);
    assert_eq!(rsp.entries[1].value, vec![0x0D, 0x18]);
    assert_eq!(rsp.serialize(), pdu.to_vec());

    assert!(ReadByGroupTypeResponse::parse(&[0x11, 0x02, 0x01, 0x00]).is_err());
}

#[test]
fn test_exchange_mtu() {
    let (mock, hci, conn, client) = setup();
    let server = sample_server();
    mock.set_acl_responder(responder(&server));

    assert_eq!(client.mtu(), ATT_DEFAULT_MTU);
    let mtu = client.exchange_mtu(&ctx(), ATT_MAX_MTU).unwrap();
    assert_eq!(mtu, 185);
    assert_eq!(client.mtu(), 185);
    assert_eq!(conn.tx_mtu(), 185);
    assert_eq!(conn.rx_mtu(), ATT_MAX_MTU);
    assert_eq!(att_sent(&mock)[0], vec![0x02, 0x05, 0x02]);

    teardown(hci, client);
}

#[test]
fn test_discover_primary_services() {
    let (mock, hci, _conn, client) = setup();
    let server = sample_server();
    mock.set_acl_responder(responder(&server));

    let services = client
        .discover_primary_services(&ctx(), ATT_HANDLE_MIN, ATT_HANDLE_MAX)
        .unwrap();
    assert_eq!(services.len(), 2);
    assert_eq!(services[0].uuid, uuid::GAP_SERVICE);
    assert_eq!((services[0].handle, services[0].end_handle), (0x0001, 0x0003));
    assert_eq!(services[1].uuid, uuid::HEART_RATE_SERVICE);
    assert_eq!((services[1].handle, services[1].end_handle), (0x0004, 0x0009));

    // The second request starts after the last end handle and ends the loop
    let sent = att_sent(&mock);
    assert_eq!(sent.len(), 2);
    assert_eq!(&sent[1][..3], &[0x10, 0x0A, 0x00]);

    teardown(hci, client);
}

#[test]
fn test_discovery_ends_on_attribute_not_found() {
    let (mock, hci, _conn, client) = setup();
    let server = sample_server();
    lock(&server).fail(ATT_READ_BY_GROUP_TYPE_REQ, 0x0001, ATT_ERROR_ATTRIBUTE_NOT_FOUND);
    mock.set_acl_responder(responder(&server));

    let services = client
        .discover_primary_services(&ctx(), ATT_HANDLE_MIN, ATT_HANDLE_MAX)
        .unwrap();
    assert!(services.is_empty());

    teardown(hci, client);
}

#[test]
fn test_discovery_propagates_other_errors() {
    let (mock, hci, _conn, client) = setup();
    let server = sample_server();
    lock(&server).fail(ATT_READ_BY_GROUP_TYPE_REQ, 0x0001, ATT_ERROR_UNLIKELY);
    mock.set_acl_responder(responder(&server));

    let err = client
        .discover_primary_services(&ctx(), ATT_HANDLE_MIN, ATT_HANDLE_MAX)
        .unwrap_err();
    assert_eq!(err.code(), Some(AttErrorCode::Unlikely));

    teardown(hci, client);
}

#[test]
fn test_discover_characteristics_fixes_end_handles() {
    let (mock, hci, _conn, client) = setup();
    let server = sample_server();
    mock.set_acl_responder(responder(&server));

    let chars = client.discover_characteristics(&ctx(), 0x0004, 0x0009).unwrap();
    assert_eq!(chars.len(), 2);
    assert_eq!(chars[0].uuid, Uuid::from_u16(0x2A37));
    assert_eq!(chars[0].handle, 0x0005);
    assert_eq!(chars[0].value_handle, 0x0006);
    assert_eq!(chars[0].end_handle, 0x0007);
    assert!(chars[0].can_notify());
    assert_eq!(chars[1].handle, 0x0008);
    assert_eq!(chars[1].end_handle, 0x0009);
    assert!(chars[1].can_read() && chars[1].can_write());

    teardown(hci, client);
}

#[test]
fn test_find_descriptors() {
    let (mock, hci, _conn, client) = setup();
    let server = sample_server();
    mock.set_acl_responder(responder(&server));

    let descriptors = client.find_descriptors(&ctx(), 0x0007, 0x0007).unwrap();
    assert_eq!(descriptors.len(), 1);
    assert_eq!(descriptors[0].handle, 0x0007);
    assert!(descriptors[0].is_cccd());

    // Empty range needs no request
    let before = att_sent(&mock).len();
    assert!(client.find_descriptors(&ctx(), 0x000A, 0x0009).unwrap().is_empty());
    assert_eq!(att_sent(&mock).len(), before);

    teardown(hci, client);
}

#[test]
fn test_read_and_read_multiple() {
    let (mock, hci, _conn, client) = setup();
    let server = sample_server();
    mock.set_acl_responder(responder(&server));

    assert_eq!(client.read(&ctx(), 0x0003).unwrap(), b"rusty".to_vec());
    assert_eq!(
        client.read_multiple(&ctx(), &[0x0006, 0x0009]).unwrap(),
        vec![0x00, 0x48, 0x01]
    );

    let err = client.read(&ctx(), 0x0050).unwrap_err();
    match err {
        AttError::Protocol {
            request,
            handle,
            code,
        } => {
            assert_eq!(request, ATT_READ_REQ);
            assert_eq!(handle, 0x0050);
            assert_eq!(code, AttErrorCode::InvalidHandle);
        }
        other => panic!("unexpected {other:?}"),
    }

    teardown(hci, client);
}

#[test]
fn test_read_long_uses_blob_reads() {
    let (mock, hci, _conn, client) = setup();
    let value: Vec<u8> = (0..50).collect();
    let mut s = FakeServer::new();
    s.add_service(uuid::GAP_SERVICE);
    let handle = s.add_characteristic(uuid::DEVICE_NAME, 0x02, &value);
    let server = Arc::new(Mutex::new(s));
    mock.set_acl_responder(responder(&server));

    assert_eq!(client.read_long(&ctx(), handle).unwrap(), value);
    assert_eq!(
        lock(&server).requests,
        vec![ATT_READ_REQ, ATT_READ_BLOB_REQ, ATT_READ_BLOB_REQ]
    );
    let sent = att_sent(&mock);
    assert_eq!(sent[1][3..5], 22u16.to_le_bytes());
    assert_eq!(sent[2][3..5], 44u16.to_le_bytes());

    teardown(hci, client);
}

#[test]
fn test_read_long_stops_when_attribute_not_long() {
    let (mock, hci, _conn, client) = setup();
    let value = vec![0x5A; 22];
    let mut s = FakeServer::new();
    s.add_service(uuid::GAP_SERVICE);
    let handle = s.add_characteristic(uuid::DEVICE_NAME, 0x02, &value);
    s.fail(ATT_READ_BLOB_REQ, handle, ATT_ERROR_ATTRIBUTE_NOT_LONG);
    let server = Arc::new(Mutex::new(s));
    mock.set_acl_responder(responder(&server));

    assert_eq!(client.read_long(&ctx(), handle).unwrap(), value);

    teardown(hci, client);
}

#[test]
fn test_read_long_stops_at_largest_offset() {
    let (mock, hci, _conn, client) = setup();
    let mut s = FakeServer::new();
    s.add_service(uuid::GAP_SERVICE);
    let handle = s.add_characteristic(uuid::DEVICE_NAME, 0x02, &vec![0x5A; 70_000]);
    s.set_server_mtu(ATT_MAX_MTU);
    let server = Arc::new(Mutex::new(s));
    mock.set_acl_responder(responder(&server));
    assert_eq!(client.exchange_mtu(&ctx(), ATT_MAX_MTU).unwrap(), ATT_MAX_MTU);

    let ctx = Context::background().with_timeout(Duration::from_secs(30));
    let err = client.read_long(&ctx, handle).unwrap_err();
    assert!(matches!(err, AttError::OffsetOverflow(n) if n > u16::MAX as usize));

    // Offsets only ever grow
    let offsets: Vec<u16> = att_sent(&mock)
        .iter()
        .filter(|p| p[0] == ATT_READ_BLOB_REQ)
        .map(|p| u16::from_le_bytes([p[3], p[4]]))
        .collect();
    assert!(offsets.windows(2).all(|w| w[0] < w[1]));

    teardown(hci, client);
}

#[test]
fn test_write_and_write_command() {
    let (mock, hci, _conn, client) = setup();
    let server = sample_server();
    mock.set_acl_responder(responder(&server));

    client.write(&ctx(), 0x0009, &[0x07]).unwrap();
    assert_eq!(lock(&server).value(0x0009), Some(vec![0x07]));

    client.write_command(&ctx(), 0x0009, &[0x08]).unwrap();
    assert!(mock.wait_for(WAIT, |_| lock(&server).value(0x0009) == Some(vec![0x08])));
    assert_eq!(att_sent(&mock).last().unwrap(), &vec![0x52, 0x09, 0x00, 0x08]);

    lock(&server).fail(ATT_WRITE_REQ, 0x0009, ATT_ERROR_WRITE_NOT_PERMITTED);
    let err = client.write(&ctx(), 0x0009, &[0x09]).unwrap_err();
    assert_eq!(err.code(), Some(AttErrorCode::WriteNotPermitted));

    teardown(hci, client);
}

#[test]
fn test_write_longer_than_mtu_rejected() {
    let (mock, hci, _conn, client) = setup();
    let err = client.write(&ctx(), 0x0009, &[0u8; 21]).unwrap_err();
    assert!(matches!(err, AttError::ValueTooLong { len: 21, mtu: 23 }));
    assert!(att_sent(&mock).is_empty());

    teardown(hci, client);
}

#[test]
fn test_notification_dispatch() {
    let (mock, hci, _conn, client) = setup();
    let mut s = FakeServer::new();
    s.skip_to(0x0028);
    s.add_service(uuid::HEART_RATE_SERVICE); // 0x0028
    let value_handle = s.add_characteristic(Uuid::from_u16(0x2A37), 0x10, &[0x00]);
    let cccd = s.add_descriptor(uuid::CLIENT_CHAR_CONFIG, &[0x00, 0x00]);
    assert_eq!((value_handle, cccd), (0x002A, 0x002B));
    let server = Arc::new(Mutex::new(s));
    mock.set_acl_responder(responder(&server));

    let (seen, handler) = recorder();
    client.subscribe(&ctx(), value_handle, cccd, false, handler).unwrap();
    assert_eq!(lock(&server).writes, vec![(0x002B, vec![0x01, 0x00])]);
    assert_eq!(client.subscriptions(), vec![0x002A]);

    mock.inject_pdu(HANDLE, L2CAP_CID_ATT, &[0x1B, 0x2A, 0x00, 0xDE, 0xAD, 0xBE, 0xEF]);
    assert!(mock.wait_for(WAIT, |_| !seen.lock().unwrap().is_empty()));
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(
        *seen.lock().unwrap(),
        vec![(0x002A, vec![0xDE, 0xAD, 0xBE, 0xEF])]
    );

    teardown(hci, client);
}

#[test]
fn test_indication_is_confirmed() {
    let (mock, hci, _conn, client) = setup();
    let server = sample_server();
    mock.set_acl_responder(responder(&server));

    let (notified, on_notify) = recorder();
    let (indicated, on_indicate) = recorder();
    client.subscribe(&ctx(), 0x0006, 0x0007, true, on_indicate).unwrap();
    client.subscribe(&ctx(), 0x0006, 0x0007, false, on_notify).unwrap();
    assert_eq!(
        lock(&server).writes,
        vec![(0x0007, vec![0x02, 0x00]), (0x0007, vec![0x03, 0x00])]
    );

    mock.inject_pdu(HANDLE, L2CAP_CID_ATT, &[0x1D, 0x06, 0x00, 0x11]);
    assert!(mock.wait_for(WAIT, |_| lock(&server).confirmations == 1));
    assert_eq!(*indicated.lock().unwrap(), vec![(0x0006, vec![0x11])]);
    assert!(notified.lock().unwrap().is_empty());

    // Unknown handles are dropped but indications are still confirmed
    mock.inject_pdu(HANDLE, L2CAP_CID_ATT, &[0x1D, 0x99, 0x00, 0x22]);
    assert!(mock.wait_for(WAIT, |_| lock(&server).confirmations == 2));
    assert_eq!(indicated.lock().unwrap().len(), 1);

    teardown(hci, client);
}

#[test]
fn test_unsubscribe_and_clear() {
    let (mock, hci, _conn, client) = setup();
    let server = sample_server();
    mock.set_acl_responder(responder(&server));

    let (_, on_notify) = recorder();
    let (_, on_indicate) = recorder();
    client.subscribe(&ctx(), 0x0006, 0x0007, false, on_notify).unwrap();
    client.subscribe(&ctx(), 0x0006, 0x0007, true, on_indicate).unwrap();

    client.unsubscribe(&ctx(), 0x0006, true).unwrap();
    assert_eq!(lock(&server).writes.last(), Some(&(0x0007, vec![0x01, 0x00])));
    assert_eq!(client.subscriptions(), vec![0x0006]);

    client.clear_subscriptions(&ctx()).unwrap();
    assert_eq!(lock(&server).writes.last(), Some(&(0x0007, vec![0x00, 0x00])));
    assert!(client.subscriptions().is_empty());

    let err = client.unsubscribe(&ctx(), 0x0006, false).unwrap_err();
    assert!(matches!(err, AttError::NotSubscribed(0x0006)));

    teardown(hci, client);
}

#[test]
fn test_failed_subscribe_leaves_no_subscription() {
    let (mock, hci, _conn, client) = setup();
    let server = sample_server();
    lock(&server).fail(ATT_WRITE_REQ, 0x0007, ATT_ERROR_WRITE_NOT_PERMITTED);
    mock.set_acl_responder(responder(&server));

    let (_, handler) = recorder();
    assert!(client.subscribe(&ctx(), 0x0006, 0x0007, false, handler).is_err());
    assert!(client.subscriptions().is_empty());

    teardown(hci, client);
}

#[test]
fn test_peer_requests_answered() {
    let (mock, hci, conn, client) = setup();

    // Exchange MTU gets our receive MTU
    mock.inject_pdu(HANDLE, L2CAP_CID_ATT, &[0x02, 0x00, 0x02]);
    assert!(mock.wait_for(WAIT, |m| att_sent(m).contains(&vec![0x03, 0x17, 0x00])));
    assert_eq!(conn.tx_mtu(), ATT_DEFAULT_MTU);

    // Every other request is not supported
    mock.inject_pdu(HANDLE, L2CAP_CID_ATT, &[0x0A, 0x01, 0x00]);
    assert!(mock.wait_for(WAIT, |m| att_sent(m)
        .contains(&vec![0x01, 0x0A, 0x00, 0x00, 0x06])));

    // Commands are ignored
    mock.inject_pdu(HANDLE, L2CAP_CID_ATT, &[0x52, 0x01, 0x00, 0xAA]);
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(att_sent(&mock).len(), 2);

    teardown(hci, client);
}

#[test]
fn test_stale_error_response_skipped() {
    let (mock, hci, _conn, client) = setup();
    mock.set_acl_responder(Box::new(|_: u16, cid: u16, payload: &[u8]| {
        if cid != L2CAP_CID_ATT || payload[0] != ATT_READ_REQ {
            return Vec::new();
        }
        vec![
            (L2CAP_CID_ATT, vec![0x01, 0x08, 0x01, 0x00, 0x0A]),
            (L2CAP_CID_ATT, vec![0x0B, 0x42]),
        ]
    }));

    assert_eq!(client.read(&ctx(), 0x0003).unwrap(), vec![0x42]);

    teardown(hci, client);
}

#[test]
fn test_transaction_timeout() {
    let (_mock, hci, _conn, client) = setup();
    client.set_transaction_timeout(Duration::from_millis(100));
    assert!(matches!(client.read(&ctx(), 0x0003), Err(AttError::Timeout)));

    teardown(hci, client);
}

#[test]
fn test_request_honours_context() {
    let (_mock, hci, _conn, client) = setup();
    let short = Context::background().with_timeout(Duration::from_millis(100));
    assert!(matches!(
        client.read(&short, 0x0003),
        Err(AttError::Context(ContextError::DeadlineExceeded))
    ));

    teardown(hci, client);
}

#[test]
fn test_request_on_closed_connection() {
    let (mock, hci, conn, client) = setup();
    conn.close().unwrap();
    assert!(mock.wait_for(WAIT, |_| conn.is_disconnected()));

    match client.read(&ctx(), 0x0003) {
        Err(AttError::L2cap(L2capError::ClosedPipe)) | Err(AttError::ClosedPipe) => {}
        other => panic!("unexpected {other:?}"),
    }

    teardown(hci, client);
}
