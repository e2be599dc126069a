//! Unit tests for HCI packet parsing, serialization and the transport

use super::command::*;
use super::config::HciConfig;
use super::constants::*;
use super::event::*;
use super::mock::{connect_le, init_hci, init_hci_with, le_conn_complete, MockController};
use super::status;
use super::transport::{AcceptKind, AdvHandler};
use crate::context::Context;
use crate::error::HciError;
use crate::gap::adv::Advertisement;
use crate::gap::types::{BdAddr, Role};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn ctx() -> Context {
    Context::background().with_timeout(Duration::from_secs(2))
}

#[test]
fn test_hci_command_serialization() {
    let packet = HciCommand::Reset.to_packet();
    assert_eq!(packet[0], HCI_COMMAND_PKT);
    assert_eq!(u16::from_le_bytes([packet[1], packet[2]]), 0x0C03);
    assert_eq!(packet[3], 0);

    let command = HciCommand::LeSetScanParameters {
        scan_type: 0x01,
        scan_interval: 0x0010,
        scan_window: 0x0010,
        own_address_type: 0x00,
        filter_policy: 0x00,
    };
    let packet = command.to_packet();
    assert_eq!(u16::from_le_bytes([packet[1], packet[2]]), 0x200B);
    assert_eq!(packet[3], 7);
    assert_eq!(&packet[4..], &[0x01, 0x10, 0x00, 0x10, 0x00, 0x00, 0x00]);

    let packet = HciCommand::Disconnect {
        handle: 0x0040,
        reason: 0x13,
    }
    .to_packet();
    assert_eq!(packet, vec![0x01, 0x06, 0x04, 0x03, 0x40, 0x00, 0x13]);
}

#[test]
fn test_command_parse_back() {
    let commands = vec![
        HciCommand::Inquiry {
            lap: GIAC_LAP,
            length: 0x08,
            num_responses: 0,
        },
        HciCommand::InquiryCancel,
        HciCommand::PeriodicInquiryMode {
            max_period_length: 0x0010,
            min_period_length: 0x000C,
            lap: GIAC_LAP,
            length: 0x08,
            num_responses: 4,
        },
        HciCommand::CreateConnection {
            bd_addr: [1, 2, 3, 4, 5, 6],
            packet_type: 0xCC18,
            page_scan_repetition_mode: 2,
            clock_offset: 0x9234,
            allow_role_switch: 1,
        },
        HciCommand::CreateConnectionCancel {
            bd_addr: [1, 2, 3, 4, 5, 6],
        },
        HciCommand::Disconnect {
            handle: 0x0040,
            reason: status::REMOTE_USER_TERMINATED,
        },
        HciCommand::SetEventMask {
            event_mask: 0x3DBF_F807_FFFB_FFFF,
        },
        HciCommand::Reset,
        HciCommand::WriteLocalName {
            name: b"rustyhci".to_vec(),
        },
        HciCommand::WritePageTimeout { timeout: 0x2000 },
        HciCommand::WriteScanEnable { scan_enable: 0x03 },
        HciCommand::WriteClassOfDevice {
            class_of_device: [0x0C, 0x02, 0x5A],
        },
        HciCommand::WriteLeHostSupport {
            supported: 1,
            simultaneous: 0,
        },
        HciCommand::ReadBufferSize,
        HciCommand::ReadBdAddr,
        HciCommand::LeSetEventMask {
            event_mask: DEFAULT_LE_EVENT_MASK,
        },
        HciCommand::LeReadBufferSize,
        HciCommand::LeSetRandomAddress {
            addr: [0xC1, 0x02, 0x03, 0x04, 0x05, 0x06],
        },
        HciCommand::LeSetAdvertisingParameters {
            interval_min: 0x0800,
            interval_max: 0x0800,
            advertising_type: 0,
            own_address_type: 0,
            direct_address_type: 0,
            direct_address: [0; 6],
            channel_map: 0x07,
            filter_policy: 0,
        },
        HciCommand::LeReadAdvertisingChannelTxPower,
        HciCommand::LeSetAdvertisingData {
            data: vec![0x02, 0x01, 0x06],
        },
        HciCommand::LeSetScanResponseData {
            data: vec![0x05, 0x09, b'r', b'u', b's', b't'],
        },
        HciCommand::LeSetAdvertiseEnable { enable: true },
        HciCommand::LeSetScanParameters {
            scan_type: 0x01,
            scan_interval: 0x0010,
            scan_window: 0x0010,
            own_address_type: 0,
            filter_policy: 0,
        },
        HciCommand::LeSetScanEnable {
            enable: true,
            filter_duplicates: false,
        },
        HciCommand::LeCreateConnection {
            scan_interval: 0x0060,
            scan_window: 0x0030,
            initiator_filter_policy: 0,
            peer_address_type: 1,
            peer_address: [1, 2, 3, 4, 5, 6],
            own_address_type: 0,
            conn_interval_min: 6,
            conn_interval_max: 12,
            conn_latency: 0,
            supervision_timeout: 0x48,
            min_ce_length: 0,
            max_ce_length: 0,
        },
        HciCommand::LeCreateConnectionCancel,
        HciCommand::LeConnectionUpdate {
            handle: 0x0040,
            conn_interval_min: 24,
            conn_interval_max: 40,
            conn_latency: 4,
            supervision_timeout: 0x01F4,
            min_ce_length: 0,
            max_ce_length: 0,
        },
        HciCommand::LeLongTermKeyRequestNegativeReply { handle: 0x0040 },
    ];
    for command in commands {
        let packet = command.to_packet();
        assert_eq!(packet[3] as usize, packet.len() - 4, "{command:?}");
        assert_eq!(HciCommand::from_packet(&packet).unwrap(), command);
    }

    assert!(HciCommand::from_packet(&[HCI_COMMAND_PKT, 0xFF, 0xFF, 0x00]).is_err());
}

#[test]
fn test_periodic_inquiry_length() {
    let command = HciCommand::PeriodicInquiryMode {
        max_period_length: 0x0010,
        min_period_length: 0x000C,
        lap: GIAC_LAP,
        length: 0x08,
        num_responses: 0,
    };
    assert_eq!(command.param_len(), 9);
    assert_eq!(command.to_packet()[3], 9);
}

#[test]
fn test_marshal_short_buffer() {
    let command = HciCommand::LeSetEventMask {
        event_mask: DEFAULT_LE_EVENT_MASK,
    };
    let mut buf = [0u8; 6];
    let err = command.marshal(&mut buf).unwrap_err();
    assert!(err.is_short());

    let mut buf = [0u8; 12];
    assert_eq!(command.marshal(&mut buf).unwrap(), 12);
}

#[test]
fn test_event_parse() {
    let event = HciEvent::parse(&[EVT_CMD_STATUS, 0x04, 0x00, 0x01, 0x06, 0x04]).unwrap();
    assert_eq!(event.event_code, EVT_CMD_STATUS);
    let cs = CommandStatus::decode(&event.parameters).unwrap();
    assert_eq!(cs.opcode, 0x0406);
    assert_eq!(cs.num_hci_command_packets, 1);

    // Declared length longer than the buffer
    assert!(HciEvent::parse(&[EVT_CMD_STATUS, 0x04, 0x00]).unwrap_err().is_short());
    assert!(CommandComplete::decode(&[0x01, 0x03]).is_err());
}

#[test]
fn test_completed_packets_layouts() {
    let params = [2, 0x40, 0x00, 0x03, 0x00, 0x41, 0x00, 0x01, 0x00];

    let interleaved = NumberOfCompletedPackets::decode(&params, CompletedPacketsLayout::Interleaved).unwrap();
    assert_eq!(interleaved.entries, vec![(0x40, 3), (0x41, 1)]);

    let grouped = NumberOfCompletedPackets::decode(&params, CompletedPacketsLayout::Grouped).unwrap();
    assert_eq!(grouped.entries, vec![(0x40, 0x41), (0x03, 0x01)]);
}

#[test]
fn test_event_round_trips() {
    let cc = CommandComplete {
        num_hci_command_packets: 1,
        opcode: 0x1009,
        return_parameters: vec![0x00, 0x06, 0x05, 0x04, 0x03, 0x02, 0x01],
    };
    assert_eq!(CommandComplete::decode(&cc.encode()).unwrap(), cc);

    let cs = CommandStatus {
        status: status::COMMAND_DISALLOWED,
        num_hci_command_packets: 1,
        opcode: 0x200D,
    };
    assert_eq!(CommandStatus::decode(&cs.encode()).unwrap(), cs);

    let dc = DisconnectionComplete {
        status: 0,
        handle: 0x0041,
        reason: status::REMOTE_USER_TERMINATED,
    };
    assert_eq!(DisconnectionComplete::decode(&dc.encode()).unwrap(), dc);

    let conn = ConnectionComplete {
        status: 0,
        handle: 0x000B,
        bd_addr: [1, 2, 3, 4, 5, 6],
        link_type: 0x01,
        encryption_enabled: 0,
    };
    assert_eq!(ConnectionComplete::decode(&conn.encode()).unwrap(), conn);

    let le = LeConnectionComplete {
        status: 0,
        handle: 0x0040,
        role: ROLE_SLAVE,
        peer_address_type: 1,
        peer_address: [0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF],
        conn_interval: 0x0018,
        conn_latency: 0,
        supervision_timeout: 0x0048,
        master_clock_accuracy: 1,
    };
    assert_eq!(LeConnectionComplete::decode(&le.encode()).unwrap(), le);

    let ltk = LeLongTermKeyRequest {
        handle: 0x0042,
        random_number: 0x0123_4567_89AB_CDEF,
        encrypted_diversifier: 0xBEEF,
    };
    assert_eq!(LeLongTermKeyRequest::decode(&ltk.encode()).unwrap(), ltk);
}

#[test]
fn test_completed_packets_round_trip() {
    let ev = NumberOfCompletedPackets {
        entries: vec![(0x0040, 3), (0x0041, 1), (0x0042, 7)],
    };
    for layout in [CompletedPacketsLayout::Interleaved, CompletedPacketsLayout::Grouped] {
        let params = ev.encode(layout);
        assert_eq!(params.len(), 1 + 3 * 4);
        assert_eq!(NumberOfCompletedPackets::decode(&params, layout).unwrap(), ev);
    }
}

#[test]
fn test_inquiry_result_round_trip() {
    let first = InquiryResponse {
        bd_addr: [1, 2, 3, 4, 5, 6],
        page_scan_repetition_mode: 1,
        class_of_device: [0x0C, 0x02, 0x5A],
        clock_offset: 0x1234,
        rssi: None,
        eir: Vec::new(),
    };
    let second = InquiryResponse {
        bd_addr: [6, 5, 4, 3, 2, 1],
        page_scan_repetition_mode: 2,
        class_of_device: [0x04, 0x04, 0x24],
        clock_offset: 0x9234,
        rssi: None,
        eir: Vec::new(),
    };

    let standard = InquiryResult {
        responses: vec![first.clone(), second.clone()],
    };
    let params = standard.encode(EVT_INQUIRY_RESULT);
    assert_eq!(params.len(), 1 + 2 * 14);
    assert_eq!(InquiryResult::decode(EVT_INQUIRY_RESULT, &params).unwrap(), standard);

    let with_rssi = InquiryResult {
        responses: vec![
            InquiryResponse {
                rssi: Some(-60),
                ..first.clone()
            },
            InquiryResponse {
                rssi: Some(-72),
                ..second
            },
        ],
    };
    let params = with_rssi.encode(EVT_INQUIRY_RESULT_WITH_RSSI);
    assert_eq!(params.len(), 1 + 2 * 14);
    assert_eq!(
        InquiryResult::decode(EVT_INQUIRY_RESULT_WITH_RSSI, &params).unwrap(),
        with_rssi
    );

    let extended = InquiryResult {
        responses: vec![InquiryResponse {
            rssi: Some(-45),
            eir: vec![0x05, 0x09, b'r', b'u', b's', b't', 0x02, 0x0A, 0x04],
            ..first
        }],
    };
    let params = extended.encode(EVT_EXTENDED_INQUIRY_RESULT);
    assert_eq!(params.len(), 15 + EIR_LEN);
    assert_eq!(
        InquiryResult::decode(EVT_EXTENDED_INQUIRY_RESULT, &params).unwrap(),
        extended
    );

    assert!(InquiryResult::decode(EVT_CONN_COMPLETE, &params).is_err());
}

#[test]
fn test_advertising_report_decode() {
    let report = LeAdvertisingReport {
        event_type: ADV_IND,
        address_type: 0,
        address: [0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF],
        data: vec![0x02, 0x01, 0x06],
        rssi: -40,
    };
    let params = LeAdvertisingReport::encode_all(&[report.clone()]);
    assert_eq!(params[0], 1);
    assert_eq!(params[params.len() - 1], 0xD8);
    assert_eq!(LeAdvertisingReport::decode_all(&params).unwrap(), vec![report]);

    // Truncated report data
    assert!(LeAdvertisingReport::decode_all(&params[..8]).is_err());
}

#[test]
fn test_init_sequence() {
    let mock = MockController::new();
    let hci = init_hci(&mock);

    assert_eq!(hci.addr().to_string(), "55:44:33:22:11:00");
    let pool = hci.pool().unwrap();
    assert_eq!(pool.count(), 6);
    assert_eq!(pool.buffer_capacity(), 32);
    assert_eq!(hci.tx_power(), 0);

    let commands = mock.commands();
    assert_eq!(
        commands,
        vec![
            HciCommand::Reset,
            HciCommand::ReadBdAddr,
            HciCommand::ReadBufferSize,
            HciCommand::LeReadBufferSize,
            HciCommand::LeReadAdvertisingChannelTxPower,
            HciCommand::LeSetEventMask {
                event_mask: 0x0000_0000_0000_001F
            },
            HciCommand::SetEventMask {
                event_mask: 0x3DBF_F807_FFFB_FFFF
            },
            HciCommand::WriteLeHostSupport {
                supported: 1,
                simultaneous: 0
            },
        ]
    );
    hci.close().unwrap();
}

#[test]
fn test_init_prefers_le_buffers() {
    let mock = MockController::new();
    mock.set_response(&HciCommand::LeReadBufferSize, vec![0x00, 251, 0x00, 4]);
    let hci = init_hci(&mock);

    let pool = hci.pool().unwrap();
    assert_eq!(pool.count(), 3);
    assert_eq!(pool.buffer_capacity(), 1 + 4 + 251);
    hci.close().unwrap();
}

#[test]
fn test_controller_status_error() {
    let mock = MockController::new();
    let hci = init_hci(&mock);

    mock.set_response(&HciCommand::LeSetAdvertiseEnable { enable: true }, vec![status::COMMAND_DISALLOWED]);
    let err = hci
        .send(&ctx(), &HciCommand::LeSetAdvertiseEnable { enable: true })
        .unwrap_err();
    assert_eq!(err.controller_code(), Some(status::COMMAND_DISALLOWED));
    hci.close().unwrap();
}

#[test]
fn test_malformed_response_is_ignored() {
    let mock = MockController::new();
    let hci = init_hci(&mock);

    // A short, stale answer arrives first; the real one follows
    let opcode = HciCommand::ReadBdAddr.opcode();
    mock.set_silent(&HciCommand::ReadBdAddr);
    let cc = move |params: Vec<u8>| {
        CommandComplete {
            num_hci_command_packets: 1,
            opcode,
            return_parameters: params,
        }
        .encode()
    };

    let m = Arc::clone(&mock);
    let injector = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(50));
        m.inject(event_packet(EVT_CMD_COMPLETE, &cc(vec![0x00, 0x01])));
        std::thread::sleep(Duration::from_millis(50));
        m.inject(event_packet(
            EVT_CMD_COMPLETE,
            &cc(vec![0x00, 0x06, 0x05, 0x04, 0x03, 0x02, 0x01]),
        ));
    });

    let rp: ReadBdAddrRp = hci.send_with(&ctx(), &HciCommand::ReadBdAddr).unwrap();
    assert_eq!(rp.bd_addr, [0x06, 0x05, 0x04, 0x03, 0x02, 0x01]);
    injector.join().unwrap();
    hci.close().unwrap();
}

#[test]
fn test_send_times_out() {
    let mock = MockController::new();
    let hci = init_hci(&mock);

    mock.set_silent(&HciCommand::LeSetScanEnable {
        enable: true,
        filter_duplicates: false,
    });
    let ctx = Context::background().with_timeout(Duration::from_millis(50));
    let err = hci
        .send(
            &ctx,
            &HciCommand::LeSetScanEnable {
                enable: true,
                filter_duplicates: false,
            },
        )
        .unwrap_err();
    assert!(matches!(err, HciError::DeadlineExceeded));
    hci.close().unwrap();
}

#[test]
fn test_command_credits_follow_controller() {
    let mock = MockController::new();
    let hci = init_hci(&mock);
    assert_eq!(hci.command_credits(), 1);

    mock.set_credits(5);
    hci.send(&ctx(), &HciCommand::Reset).unwrap();
    assert!(mock.wait_for(Duration::from_secs(1), |_| hci.command_credits() == 5));

    // Capped at the configured channel capacity
    mock.set_credits(200);
    hci.send(&ctx(), &HciCommand::Reset).unwrap();
    assert!(mock.wait_for(Duration::from_secs(1), |_| hci.command_credits() == 16));
    hci.close().unwrap();
}

#[test]
fn test_unknown_event_keeps_transport() {
    let mock = MockController::new();
    let hci = init_hci(&mock);

    mock.inject(event_packet(0x77, &[0x01, 0x02]));
    mock.inject(vec![HCI_SCO_PKT, 0x00, 0x00, 0x00]);
    hci.send(&ctx(), &HciCommand::Reset).unwrap();
    assert!(!hci.done().is_set());
    hci.close().unwrap();
}

#[test]
fn test_send_after_close() {
    let mock = MockController::new();
    let hci = init_hci(&mock);
    hci.close().unwrap();

    let err = hci.send(&ctx(), &HciCommand::Reset).unwrap_err();
    assert!(matches!(err, HciError::TransportClosed));
    assert!(hci.done().is_set());
}

#[test]
fn test_advertisement_delivery() {
    let mock = MockController::new();
    let hci = init_hci(&mock);

    let seen: Arc<Mutex<Vec<Advertisement>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let handler: AdvHandler = Arc::new(Mutex::new(move |adv: Advertisement| -> crate::error::Result<()> {
        sink.lock().unwrap().push(adv);
        Ok(())
    }));
    hci.set_adv_handler(Some(handler));

    let report = LeAdvertisingReport {
        event_type: ADV_IND,
        address_type: 0,
        address: [0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF],
        data: vec![0x02, 0x01, 0x06],
        rssi: -40,
    };
    mock.inject(le_meta_packet(
        EVT_LE_ADVERTISING_REPORT,
        &LeAdvertisingReport::encode_all(&[report]),
    ));

    assert!(mock.wait_for(Duration::from_secs(1), |_| seen.lock().unwrap().len() == 1));
    let adv = seen.lock().unwrap()[0].clone();
    assert_eq!(adv.addr().to_string(), "ff:ee:dd:cc:bb:aa");
    assert_eq!(adv.rssi, -40);
    assert_eq!(adv.flags(), Some(0x06));
    hci.close().unwrap();
}

#[test]
fn test_scan_response_joins_advertisement() {
    let mock = MockController::new();
    let hci = init_hci(&mock);

    let seen: Arc<Mutex<Vec<Advertisement>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    hci.set_adv_handler(Some(Arc::new(Mutex::new(move |adv: Advertisement| -> crate::error::Result<()> {
        sink.lock().unwrap().push(adv);
        Ok(())
    }))));

    let address = [0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF];
    let reports = [
        LeAdvertisingReport {
            event_type: ADV_IND,
            address_type: 0,
            address,
            data: vec![0x02, 0x01, 0x06],
            rssi: -40,
        },
        LeAdvertisingReport {
            event_type: SCAN_RSP,
            address_type: 0,
            address,
            data: vec![0x05, 0x09, 0x41, 0x42, 0x43, 0x44],
            rssi: -41,
        },
    ];
    mock.inject(le_meta_packet(
        EVT_LE_ADVERTISING_REPORT,
        &LeAdvertisingReport::encode_all(&reports),
    ));

    assert!(mock.wait_for(Duration::from_secs(1), |_| seen.lock().unwrap().len() == 2));
    let combined = seen.lock().unwrap()[1].clone();
    assert_eq!(combined.local_name().as_deref(), Some("ABCD"));
    assert_eq!(combined.flags(), Some(0x06));

    let last = hci.last_advertisement(&BdAddr::new(address)).unwrap();
    assert_eq!(last.local_name().as_deref(), Some("ABCD"));
    hci.close().unwrap();
}

#[test]
fn test_orphan_scan_response_dropped() {
    let mock = MockController::new();
    let hci = init_hci(&mock);

    let count = Arc::new(Mutex::new(0));
    let sink = Arc::clone(&count);
    hci.set_adv_handler(Some(Arc::new(Mutex::new(move |_adv: Advertisement| -> crate::error::Result<()> {
        *sink.lock().unwrap() += 1;
        Ok(())
    }))));

    let report = LeAdvertisingReport {
        event_type: SCAN_RSP,
        address_type: 0,
        address: [1, 2, 3, 4, 5, 6],
        data: vec![0x05, 0x09, 0x41, 0x42, 0x43, 0x44],
        rssi: -50,
    };
    mock.inject(le_meta_packet(
        EVT_LE_ADVERTISING_REPORT,
        &LeAdvertisingReport::encode_all(&[report]),
    ));
    hci.send(&ctx(), &HciCommand::Reset).unwrap();
    assert_eq!(*count.lock().unwrap(), 0);
    hci.close().unwrap();
}

#[test]
fn test_le_connection_routed_by_role() {
    let mock = MockController::new();
    let hci = init_hci(&mock);

    mock.inject(le_conn_complete(0x0040, ROLE_MASTER, [1, 2, 3, 4, 5, 6]));
    mock.inject(le_conn_complete(0x0041, ROLE_SLAVE, [6, 5, 4, 3, 2, 1]));

    let master = hci.accept(&ctx(), AcceptKind::LeMaster).unwrap();
    assert_eq!(master.handle(), 0x0040);
    assert_eq!(master.role(), Role::Master);
    assert_eq!(master.rx_mtu(), 23);

    let slave = hci.accept(&ctx(), AcceptKind::LeSlave).unwrap();
    assert_eq!(slave.handle(), 0x0041);
    assert_eq!(slave.peer().addr.to_string(), "06:05:04:03:02:01");
    hci.close().unwrap();
}

#[test]
fn test_completed_packets_release_per_handle() {
    let mock = MockController::new();
    mock.set_auto_complete(false);
    let hci = init_hci(&mock);
    let a = connect_le(&mock, &hci, 0x0040, ROLE_MASTER);
    let b = connect_le(&mock, &hci, 0x0041, ROLE_MASTER);

    a.write(&ctx(), 0x0004, &[0x0A, 0x01, 0x00]).unwrap();
    a.write(&ctx(), 0x0004, &[0x0A, 0x02, 0x00]).unwrap();
    a.write(&ctx(), 0x0004, &[0x0A, 0x03, 0x00]).unwrap();
    b.write(&ctx(), 0x0004, &[0x0A, 0x04, 0x00]).unwrap();

    let pool = hci.pool().unwrap();
    assert_eq!(pool.outstanding(0x0040), 3);
    assert_eq!(pool.outstanding(0x0041), 1);
    assert_eq!(pool.available(), 2);

    // Interleaved: handle, count, handle, count
    mock.inject(event_packet(
        EVT_NUM_COMPLETED_PACKETS,
        &[2, 0x40, 0x00, 0x02, 0x00, 0x41, 0x00, 0x01, 0x00],
    ));
    assert!(mock.wait_for(Duration::from_secs(1), |_| pool.available() == 5));
    assert_eq!(pool.outstanding(0x0040), 1);
    assert_eq!(pool.outstanding(0x0041), 0);
    hci.close().unwrap();
}

#[test]
fn test_disconnection_reclaims_buffers() {
    let mock = MockController::new();
    mock.set_auto_complete(false);
    let hci = init_hci(&mock);
    let conn = connect_le(&mock, &hci, 0x0040, ROLE_MASTER);

    conn.write(&ctx(), 0x0004, &[0x0A, 0x01, 0x00]).unwrap();
    conn.write(&ctx(), 0x0004, &[0x0A, 0x02, 0x00]).unwrap();
    let pool = hci.pool().unwrap();
    assert_eq!(pool.outstanding(0x0040), 2);

    conn.close().unwrap();
    assert!(conn.disconnected().wait_timeout(Duration::from_secs(1)));
    assert!(mock.wait_for(Duration::from_secs(1), |_| hci.conn(0x0040).is_none()));
    assert_eq!(pool.outstanding(0x0040), 0);
    assert_eq!(pool.available(), pool.count());
    assert_eq!(conn.disconnect_reason(), Some(status::LOCAL_HOST_TERMINATED));

    let err = conn.write(&ctx(), 0x0004, &[0x0A]).unwrap_err();
    assert!(matches!(err, crate::l2cap::L2capError::ClosedPipe));
    hci.close().unwrap();
}

#[test]
fn test_slave_disconnect_resumes_advertising() {
    let mock = MockController::new();
    let hci = init_hci(&mock);
    hci.set_advertising(true);
    let conn = connect_le(&mock, &hci, 0x0041, ROLE_SLAVE);

    mock.inject(event_packet(
        EVT_DISCONN_COMPLETE,
        &DisconnectionComplete {
            status: 0,
            handle: 0x0041,
            reason: status::REMOTE_USER_TERMINATED,
        }
        .encode(),
    ));
    assert!(conn.disconnected().wait_timeout(Duration::from_secs(1)));
    assert!(mock.wait_for(Duration::from_secs(1), |m| m
        .commands()
        .contains(&HciCommand::LeSetAdvertiseEnable { enable: true })));
    hci.close().unwrap();
}

#[test]
fn test_ltk_request_negative_reply() {
    let mock = MockController::new();
    let hci = init_hci(&mock);

    let ev = LeLongTermKeyRequest {
        handle: 0x0040,
        random_number: 0,
        encrypted_diversifier: 0,
    };
    mock.inject(le_meta_packet(EVT_LE_LTK_REQUEST, &ev.encode()));
    assert!(mock.wait_for(Duration::from_secs(1), |m| m
        .commands()
        .contains(&HciCommand::LeLongTermKeyRequestNegativeReply { handle: 0x0040 })));
    hci.close().unwrap();
}

#[test]
fn test_close_disconnects_connections() {
    let mock = MockController::new();
    let hci = init_hci_with(&mock, HciConfig::default().with_command_credits(4));
    let conn = connect_le(&mock, &hci, 0x0040, ROLE_MASTER);

    hci.close().unwrap();
    assert!(conn.is_disconnected());
    assert!(mock.commands().contains(&HciCommand::Disconnect {
        handle: 0x0040,
        reason: status::REMOTE_USER_TERMINATED
    }));
    assert!(hci.conns().is_empty());
}

#[test]
fn test_acl_routing_releases_conn_map() {
    let mock = MockController::new();
    let hci = init_hci(&mock);
    let conn = connect_le(&mock, &hci, 0x0040, ROLE_MASTER);

    // Stall the reader on the connection's inbound lock
    let held = conn.hold_inbound();
    mock.inject_pdu(0x0040, 0x0004, &[0x0A, 0x01, 0x00]);
    std::thread::sleep(Duration::from_millis(50));

    let (tx, rx) = std::sync::mpsc::channel();
    let lookup = &hci;
    let found = std::thread::scope(|s| {
        s.spawn(move || {
            let _ = tx.send(lookup.conn(0x0040).is_some());
        });
        let found = rx.recv_timeout(Duration::from_secs(1));
        drop(held);
        found
    });
    assert_eq!(found, Ok(true));
    hci.close().unwrap();
}
