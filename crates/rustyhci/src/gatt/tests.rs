//! Tests for GATT profile discovery and characteristic access

use super::*;
use crate::att::constants::*;
use crate::att::mock::{lock, responder, sample_server, SharedServer};
use crate::att::{AttError, AttErrorCode};
use crate::context::Context;
use crate::hci::constants::ROLE_MASTER;
use crate::hci::mock::{connect_le, init_hci, MockController};
use crate::hci::Hci;
use crate::l2cap::constants::L2CAP_CID_ATT;
use crate::uuid::{self, Uuid};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const HANDLE: u16 = 0x0041;
const WAIT: Duration = Duration::from_secs(2);
const MEASUREMENT: Uuid = Uuid::from_u16(0x2A37);
const CONTROL_POINT: Uuid = Uuid::from_u16(0x2A38);

fn ctx() -> Context {
    Context::background().with_timeout(Duration::from_secs(5))
}

fn setup() -> (Arc<MockController>, Hci, SharedServer, GattClient) {
    let mock = MockController::new();
    let hci = init_hci(&mock);
    let server = sample_server();
    mock.set_acl_responder(responder(&server));
    let conn = connect_le(&mock, &hci, HANDLE, ROLE_MASTER);
    (mock, hci, server, GattClient::new(conn))
}

fn teardown(hci: Hci, client: GattClient) {
    drop(client);
    hci.close().unwrap();
}

#[test]
fn test_characteristic_properties() {
    let c = Characteristic::new(MEASUREMENT, 0x0005, Property::NOTIFY | Property::READ, 0x0006);
    assert!(c.can_notify());
    assert!(c.can_read());
    assert!(!c.can_indicate());
    assert!(!c.can_write());
    assert!(c.cccd.is_none());

    let mut c = c;
    c.add_descriptor(Descriptor::new(uuid::CLIENT_CHAR_CONFIG, 0x0007));
    assert_eq!(c.cccd.as_ref().map(|d| d.handle), Some(0x0007));
    assert!(c.find_descriptor(&uuid::CLIENT_CHAR_CONFIG).is_some());
}

#[test]
fn test_discover_profile() {
    let (_mock, hci, server, client) = setup();
    assert!(client.profile().is_none());

    let profile = client.discover_profile(&ctx(), false).unwrap();
    assert_eq!(profile.services.len(), 2);

    let gap = &profile.services[0];
    assert_eq!(gap.uuid, uuid::GAP_SERVICE);
    assert_eq!((gap.handle, gap.end_handle), (0x0001, 0x0003));
    assert_eq!(gap.characteristics.len(), 1);
    assert!(gap.characteristics[0].descriptors.is_empty());

    let hr = &profile.services[1];
    assert_eq!(hr.uuid, uuid::HEART_RATE_SERVICE);
    assert_eq!((hr.handle, hr.end_handle), (0x0004, 0x0009));
    let measurement = hr.find_characteristic(&MEASUREMENT).unwrap();
    assert_eq!(measurement.value_handle, 0x0006);
    assert_eq!(measurement.end_handle, 0x0007);
    assert_eq!(measurement.descriptors.len(), 1);
    assert_eq!(measurement.cccd.as_ref().map(|d| d.handle), Some(0x0007));
    let control = hr.find_characteristic(&CONTROL_POINT).unwrap();
    assert_eq!(control.end_handle, 0x0009);
    assert!(control.cccd.is_none());

    assert!(matches!(
        profile.find(&uuid::CLIENT_CHAR_CONFIG),
        Some(Attribute::Descriptor(d)) if d.handle == 0x0007
    ));
    assert_eq!(profile.characteristic_by_handle(0x0003).map(|c| c.uuid), Some(uuid::DEVICE_NAME));

    // Group type x2, by type x2 per service, find information for the CCCD
    assert_eq!(lock(&server).requests.len(), 7);

    // Cached unless forced
    client.discover_profile(&ctx(), false).unwrap();
    assert_eq!(lock(&server).requests.len(), 7);
    let again = client.discover_profile(&ctx(), true).unwrap();
    assert_eq!(lock(&server).requests.len(), 14);
    assert_eq!(*again, *profile);

    teardown(hci, client);
}

#[test]
fn test_discover_profile_filtered() {
    let (_mock, hci, _server, client) = setup();

    let profile = client
        .discover_profile_filtered(&ctx(), &[uuid::HEART_RATE_SERVICE], false)
        .unwrap();
    assert_eq!(profile.services.len(), 1);
    assert_eq!(profile.services[0].characteristics.len(), 2);
    assert!(profile.find_service(&uuid::GAP_SERVICE).is_none());

    teardown(hci, client);
}

#[test]
fn test_discover_with_filters() {
    let (_mock, hci, _server, client) = setup();

    let services = client.discover_services(&ctx(), &[]).unwrap();
    assert_eq!(services.len(), 2);

    let chars = client
        .discover_characteristics(&ctx(), &[CONTROL_POINT], &services[1])
        .unwrap();
    assert_eq!(chars.len(), 1);
    assert_eq!(chars[0].value_handle, 0x0009);

    let all = client.discover_characteristics(&ctx(), &[], &services[1]).unwrap();
    let descriptors = client
        .discover_descriptors(&ctx(), &[uuid::CLIENT_CHAR_CONFIG], &all[0])
        .unwrap();
    assert_eq!(descriptors, vec![Descriptor::new(uuid::CLIENT_CHAR_CONFIG, 0x0007)]);

    // Discovery alone does not populate the cache
    assert!(client.profile().is_none());

    teardown(hci, client);
}

#[test]
fn test_failed_discovery_keeps_previous_profile() {
    let (_mock, hci, server, client) = setup();

    let first = client.discover_profile(&ctx(), false).unwrap();
    lock(&server).fail(ATT_READ_BY_GROUP_TYPE_REQ, 0x0001, ATT_ERROR_UNLIKELY);

    let err = client.discover_profile(&ctx(), true).unwrap_err();
    match err {
        GattError::Att(AttError::Protocol { code, .. }) => {
            assert_eq!(code, AttErrorCode::Unlikely)
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(client.profile().as_deref(), Some(&*first));

    teardown(hci, client);
}

#[test]
fn test_lookup_requires_discovery() {
    let (_mock, hci, _server, client) = setup();

    assert!(matches!(
        client.characteristic(&uuid::DEVICE_NAME),
        Err(GattError::CharacteristicNotFound(_))
    ));
    client.discover_profile(&ctx(), false).unwrap();
    assert_eq!(client.characteristic(&uuid::DEVICE_NAME).unwrap().value_handle, 0x0003);
    assert_eq!(client.service(&uuid::HEART_RATE_SERVICE).unwrap().handle, 0x0004);
    assert!(matches!(
        client.service(&uuid::SERIAL_PORT),
        Err(GattError::ServiceNotFound(_))
    ));

    teardown(hci, client);
}

#[test]
fn test_read_updates_cached_value() {
    let (_mock, hci, _server, client) = setup();
    client.discover_profile(&ctx(), false).unwrap();

    let name = client.characteristic(&uuid::DEVICE_NAME).unwrap();
    assert!(name.value.is_empty());
    assert_eq!(client.read_characteristic(&ctx(), &name).unwrap(), b"rusty".to_vec());
    assert_eq!(client.characteristic(&uuid::DEVICE_NAME).unwrap().value, b"rusty".to_vec());

    let measurement = client.characteristic(&MEASUREMENT).unwrap();
    let cccd = measurement.cccd.clone().unwrap();
    assert_eq!(client.read_descriptor(&ctx(), &cccd).unwrap(), vec![0x00, 0x00]);

    let control = client.characteristic(&CONTROL_POINT).unwrap();
    assert_eq!(
        client.read_multiple(&ctx(), &[&name, &control]).unwrap(),
        b"rusty\x01".to_vec()
    );

    teardown(hci, client);
}

#[test]
fn test_write_characteristic() {
    let (mock, hci, server, client) = setup();
    client.discover_profile(&ctx(), false).unwrap();
    let control = client.characteristic(&CONTROL_POINT).unwrap();

    client.write_characteristic(&ctx(), &control, &[0x05], false).unwrap();
    assert_eq!(lock(&server).value(0x0009), Some(vec![0x05]));

    client.write_characteristic(&ctx(), &control, &[0x06], true).unwrap();
    assert!(mock.wait_for(WAIT, |_| lock(&server).writes.len() == 2));
    assert_eq!(lock(&server).requests.last(), Some(&ATT_WRITE_CMD));
    assert_eq!(client.characteristic(&CONTROL_POINT).unwrap().value, vec![0x06]);

    teardown(hci, client);
}

#[test]
fn test_subscribe_checks_characteristic() {
    let (_mock, hci, server, client) = setup();
    client.discover_profile(&ctx(), false).unwrap();

    let name = client.characteristic(&uuid::DEVICE_NAME).unwrap();
    let err = client.subscribe(&ctx(), &name, false, |_, _| Ok(())).unwrap_err();
    assert!(matches!(err, GattError::NoCccd(0x0002)));

    let measurement = client.characteristic(&MEASUREMENT).unwrap();
    let err = client
        .subscribe(&ctx(), &measurement, true, |_, _| Ok(()))
        .unwrap_err();
    assert!(matches!(err, GattError::NotPermitted { handle: 0x0005, .. }));
    assert!(lock(&server).writes.is_empty());

    teardown(hci, client);
}

#[test]
fn test_subscribe_and_notify() {
    let (mock, hci, server, client) = setup();
    client.discover_profile(&ctx(), false).unwrap();
    let measurement = client.characteristic(&MEASUREMENT).unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    client
        .subscribe(&ctx(), &measurement, false, move |handle, value| {
            sink.lock().unwrap().push((handle, value.to_vec()));
            Ok(())
        })
        .unwrap();
    assert_eq!(lock(&server).writes, vec![(0x0007, vec![0x01, 0x00])]);

    mock.inject_pdu(HANDLE, L2CAP_CID_ATT, &[0x1B, 0x06, 0x00, 0x00, 0x52]);
    assert!(mock.wait_for(WAIT, |_| !seen.lock().unwrap().is_empty()));
    assert_eq!(*seen.lock().unwrap(), vec![(0x0006, vec![0x00, 0x52])]);

    client.unsubscribe(&ctx(), &measurement, false).unwrap();
    assert_eq!(lock(&server).writes.last(), Some(&(0x0007, vec![0x00, 0x00])));
    assert!(client.att().subscriptions().is_empty());

    client.clear_subscriptions(&ctx()).unwrap();

    teardown(hci, client);
}

#[test]
fn test_exchange_mtu_through_gatt() {
    let (_mock, hci, _server, client) = setup();

    assert_eq!(client.exchange_mtu(&ctx(), 247).unwrap(), 185);
    assert_eq!(client.conn().tx_mtu(), 185);
    assert_eq!(client.addr().to_string(), client.conn().peer().to_string());

    teardown(hci, client);
}
