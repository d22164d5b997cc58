//! Bridge behavior driven through the mock stack.
//!
//! Every test scripts native completions by hand, so ordering is exact.

use blebridge_core::mock::{MockStack, RecordingSink, StackCall};
use blebridge_core::uuid::{CLIENT_CHARACTERISTIC_CONFIGURATION, uuid_from_u16};
use blebridge_core::{
    AdapterState, AttributePath, Bridge, BridgeConfig, Call, CallbackId, CharProperties,
    ConnectInfo, ConnectionState, DeviceHandle, NativeCharacteristic, NativeDescriptor,
    Link, NativeError, NativeEvent, NativeService, ObjectHandle, PeripheralId, Reply, WriteKind,
};
use uuid::Uuid;

const LOCATOR: &str = "AA:BB:CC:DD:EE:FF";
const CONNECT: CallbackId = CallbackId(100);

type TestBridge = Bridge<MockStack, RecordingSink>;

fn peripheral() -> PeripheralId {
    PeripheralId::new(LOCATOR)
}

/// Link of the session `device`; the device handle is its generation.
fn link(device: DeviceHandle) -> Link {
    Link::new(peripheral(), device.get())
}

fn service_uuid() -> Uuid {
    uuid_from_u16(0x180D)
}

fn characteristic_uuid() -> Uuid {
    uuid_from_u16(0x2A37)
}

fn characteristic_path() -> AttributePath {
    AttributePath::characteristic(service_uuid(), characteristic_uuid())
}

fn bridge_in(state: AdapterState) -> (TestBridge, MockStack, RecordingSink) {
    let stack = MockStack::new().with_peripheral(LOCATOR);
    let sink = RecordingSink::new();
    let mut bridge = Bridge::new(stack.clone(), sink.clone(), BridgeConfig::default());
    bridge
        .handle_event(NativeEvent::AdapterStateChanged(state))
        .unwrap();
    (bridge, stack, sink)
}

fn connected() -> (TestBridge, MockStack, RecordingSink, DeviceHandle) {
    let (mut bridge, stack, sink) = bridge_in(AdapterState::PoweredOn);
    bridge.call(
        Call::Connect {
            locator: LOCATOR.into(),
        },
        CONNECT,
    );
    bridge
        .handle_event(NativeEvent::Connected {
            link: link(DeviceHandle(1)),
        })
        .unwrap();
    (bridge, stack, sink, DeviceHandle(1))
}

/// Discover one service holding one characteristic with `properties`.
fn discover(
    bridge: &mut TestBridge,
    sink: &RecordingSink,
    device: DeviceHandle,
    properties: CharProperties,
) -> ObjectHandle {
    bridge.call(Call::Services { device }, CallbackId(101));
    bridge
        .handle_event(NativeEvent::ServicesDiscovered {
            link: link(device),
            result: Ok(vec![NativeService {
                uuid: service_uuid(),
                primary: true,
            }]),
        })
        .unwrap();
    let Some(Reply::Services(services)) = sink.replies_for(CallbackId(101)).pop() else {
        panic!("expected services reply");
    };

    bridge.call(
        Call::Characteristics {
            device,
            service: services[0].handle,
        },
        CallbackId(102),
    );
    bridge
        .handle_event(NativeEvent::CharacteristicsDiscovered {
            link: link(device),
            service: AttributePath::service(service_uuid()),
            result: Ok(vec![NativeCharacteristic {
                service: service_uuid(),
                uuid: characteristic_uuid(),
                properties,
            }]),
        })
        .unwrap();
    let Some(Reply::Characteristics(characteristics)) = sink.replies_for(CallbackId(102)).pop()
    else {
        panic!("expected characteristics reply");
    };
    characteristics[0].handle
}

fn value(bytes: &[u8]) -> NativeEvent {
    NativeEvent::CharacteristicValue {
        link: link(DeviceHandle(1)),
        characteristic: characteristic_path(),
        result: Ok(bytes.to_vec()),
    }
}

#[test]
fn test_connect_reports_connecting_then_connected() {
    let (_bridge, _stack, sink, device) = connected();
    assert_eq!(
        sink.replies_for(CONNECT),
        vec![
            Reply::Connection(ConnectInfo {
                device_handle: device,
                state: ConnectionState::Connecting,
            }),
            Reply::Connection(ConnectInfo {
                device_handle: device,
                state: ConnectionState::Connected,
            }),
        ]
    );
    assert!(!sink.is_terminated(CONNECT));
}

#[test]
fn test_second_connect_to_same_device_is_rejected() {
    let (mut bridge, _stack, sink, _device) = connected();
    bridge.call(
        Call::Connect {
            locator: LOCATOR.into(),
        },
        CallbackId(7),
    );
    assert_eq!(sink.error_code(CallbackId(7)).as_deref(), Some("ALREADY_CONNECTED"));
    assert_eq!(bridge.session_count(), 1);
}

#[test]
fn test_queued_commands_complete_in_fifo_order() {
    let (mut bridge, stack, sink, device) = connected();
    stack.clear_calls();

    bridge.call(Call::Rssi { device }, CallbackId(1));
    bridge.call(Call::Services { device }, CallbackId(2));
    bridge.call(Call::Rssi { device }, CallbackId(3));

    // Only the head of the queue reaches the stack.
    assert_eq!(stack.calls(), vec![StackCall::ReadRssi(link(device))]);
    assert_eq!(bridge.session(device).unwrap().queue().len(), 3);

    bridge
        .handle_event(NativeEvent::RssiRead {
            link: link(device),
            result: Ok(-40),
        })
        .unwrap();
    assert_eq!(stack.last_call(), Some(StackCall::DiscoverServices(link(device))));

    bridge
        .handle_event(NativeEvent::ServicesDiscovered {
            link: link(device),
            result: Ok(Vec::new()),
        })
        .unwrap();
    bridge
        .handle_event(NativeEvent::RssiRead {
            link: link(device),
            result: Ok(-41),
        })
        .unwrap();

    assert_eq!(sink.replies_for(CallbackId(1)), vec![Reply::Rssi(-40)]);
    assert_eq!(sink.replies_for(CallbackId(2)), vec![Reply::Services(Vec::new())]);
    assert_eq!(sink.replies_for(CallbackId(3)), vec![Reply::Rssi(-41)]);
    for channel in 1..=3 {
        assert!(sink.is_terminated(CallbackId(channel)));
    }
    assert!(bridge.session(device).unwrap().queue().is_empty());

    let snapshot = bridge.metrics().snapshot();
    assert_eq!(snapshot.commands_issued, 3);
    assert_eq!(snapshot.commands_completed, 3);
    assert_eq!(snapshot.commands_pending(), 0);
}

#[test]
fn test_failed_command_still_advances_queue() {
    let (mut bridge, stack, sink, device) = connected();
    bridge.call(Call::Rssi { device }, CallbackId(1));
    bridge.call(Call::Services { device }, CallbackId(2));

    bridge
        .handle_event(NativeEvent::RssiRead {
            link: link(device),
            result: Err(NativeError::new("link busy")),
        })
        .unwrap();

    assert_eq!(
        sink.error_code(CallbackId(1)).as_deref(),
        Some("NATIVE_OPERATION_FAILED")
    );
    assert_eq!(stack.last_call(), Some(StackCall::DiscoverServices(link(device))));
    assert_eq!(bridge.metrics().snapshot().commands_failed, 1);
}

#[test]
fn test_mismatched_completion_is_a_protocol_violation() {
    let (mut bridge, _stack, sink, device) = connected();
    bridge.call(Call::Rssi { device }, CallbackId(1));

    let err = bridge
        .handle_event(NativeEvent::ServicesDiscovered {
            link: link(device),
            result: Ok(Vec::new()),
        })
        .unwrap_err();

    assert!(err.is_protocol_violation());
    assert!(sink.replies_for(CallbackId(1)).is_empty());
    assert_eq!(bridge.session(device).unwrap().queue().len(), 1);
    assert_eq!(bridge.metrics().snapshot().protocol_violations, 1);
}

#[test]
fn test_completion_for_wrong_attribute_is_a_protocol_violation() {
    let (mut bridge, _stack, sink, device) = connected();
    bridge.call(Call::Services { device }, CallbackId(101));
    bridge
        .handle_event(NativeEvent::ServicesDiscovered {
            link: link(device),
            result: Ok(vec![NativeService {
                uuid: service_uuid(),
                primary: true,
            }]),
        })
        .unwrap();
    let Some(Reply::Services(services)) = sink.replies_for(CallbackId(101)).pop() else {
        panic!("expected services reply");
    };

    bridge.call(
        Call::Characteristics {
            device,
            service: services[0].handle,
        },
        CallbackId(1),
    );
    let err = bridge
        .handle_event(NativeEvent::CharacteristicsDiscovered {
            link: link(device),
            service: AttributePath::service(uuid_from_u16(0x180F)),
            result: Ok(Vec::new()),
        })
        .unwrap_err();
    assert!(err.is_protocol_violation());
}

#[test]
fn test_completion_with_empty_queue_is_a_protocol_violation() {
    let (mut bridge, _stack, _sink, device) = connected();
    let err = bridge
        .handle_event(NativeEvent::RssiRead {
            link: link(device),
            result: Ok(-40),
        })
        .unwrap_err();
    assert!(err.is_protocol_violation());
}

#[test]
fn test_disable_notification_terminates_subscription() {
    for with_update in [false, true] {
        let (mut bridge, stack, sink, device) = connected();
        let characteristic = discover(&mut bridge, &sink, device, CharProperties::NOTIFY);

        bridge.call(
            Call::EnableNotification {
                device,
                characteristic,
            },
            CallbackId(10),
        );
        if with_update {
            bridge.handle_event(value(&[1, 2])).unwrap();
            assert_eq!(sink.replies_for(CallbackId(10)), vec![Reply::Data(vec![1, 2])]);
            assert!(!sink.is_terminated(CallbackId(10)));
        }

        bridge.call(
            Call::DisableNotification {
                device,
                characteristic,
            },
            CallbackId(11),
        );

        assert!(sink.is_terminated(CallbackId(10)));
        assert_eq!(sink.replies_for(CallbackId(11)), vec![Reply::NoResult]);
        assert!(
            bridge
                .session(device)
                .unwrap()
                .callbacks()
                .get(&characteristic_path())
                .is_none()
        );
        assert_eq!(
            stack.count(|c| matches!(c, StackCall::SetNotify { enabled: false, .. })),
            1
        );
    }
}

#[test]
fn test_notifications_keep_the_channel_open() {
    let (mut bridge, _stack, sink, device) = connected();
    let characteristic = discover(&mut bridge, &sink, device, CharProperties::NOTIFY);
    bridge.call(
        Call::EnableNotification {
            device,
            characteristic,
        },
        CallbackId(10),
    );

    bridge.handle_event(value(&[1])).unwrap();
    bridge.handle_event(value(&[2])).unwrap();

    assert_eq!(
        sink.replies_for(CallbackId(10)),
        vec![Reply::Data(vec![1]), Reply::Data(vec![2])]
    );
    assert!(!sink.is_terminated(CallbackId(10)));
    assert_eq!(bridge.metrics().snapshot().value_updates_delivered, 2);
}

#[test]
fn test_second_read_overwrites_first() {
    let (mut bridge, stack, sink, device) = connected();
    let characteristic = discover(&mut bridge, &sink, device, CharProperties::READ);

    bridge.call(
        Call::ReadCharacteristic {
            device,
            characteristic,
        },
        CallbackId(20),
    );
    bridge.call(
        Call::ReadCharacteristic {
            device,
            characteristic,
        },
        CallbackId(21),
    );
    bridge.handle_event(value(&[0xAB])).unwrap();

    assert!(sink.replies_for(CallbackId(20)).is_empty());
    assert_eq!(sink.replies_for(CallbackId(21)), vec![Reply::Data(vec![0xAB])]);
    assert!(sink.is_terminated(CallbackId(21)));
    assert_eq!(
        stack.count(|c| matches!(c, StackCall::ReadCharacteristic(..))),
        2
    );

    // The one-shot entry is gone; a second value is dropped.
    bridge.handle_event(value(&[0xCD])).unwrap();
    assert_eq!(sink.replies_for(CallbackId(21)).len(), 1);
    assert_eq!(bridge.metrics().snapshot().value_updates_dropped, 1);
}

#[test]
fn test_read_error_terminates_channel() {
    let (mut bridge, _stack, sink, device) = connected();
    let characteristic = discover(&mut bridge, &sink, device, CharProperties::READ);
    bridge.call(
        Call::ReadCharacteristic {
            device,
            characteristic,
        },
        CallbackId(20),
    );
    bridge
        .handle_event(NativeEvent::CharacteristicValue {
            link: link(device),
            characteristic: characteristic_path(),
            result: Err(NativeError::new("insufficient authentication")),
        })
        .unwrap();
    assert_eq!(
        sink.error_code(CallbackId(20)).as_deref(),
        Some("NATIVE_OPERATION_FAILED")
    );
    assert!(sink.is_terminated(CallbackId(20)));
}

#[test]
fn test_scan_waits_for_power_on() {
    let (mut bridge, stack, sink) = bridge_in(AdapterState::PoweredOff);
    bridge.call(Call::StartScan, CallbackId(1));

    let starts = |stack: &MockStack| stack.count(|c| matches!(c, StackCall::StartScan { .. }));
    assert_eq!(starts(&stack), 0);
    assert!(bridge.scan_is_waiting());

    bridge
        .handle_event(NativeEvent::AdapterStateChanged(AdapterState::PoweredOn))
        .unwrap();
    assert_eq!(starts(&stack), 1);
    assert!(!bridge.scan_is_waiting());

    bridge
        .handle_event(NativeEvent::AdapterStateChanged(AdapterState::PoweredOn))
        .unwrap();
    assert_eq!(starts(&stack), 1);
    assert!(sink.replies_for(CallbackId(1)).is_empty());
}

#[test]
fn test_stop_scan_while_powered_off_ends_the_waiting_scan() {
    let (mut bridge, stack, sink) = bridge_in(AdapterState::PoweredOff);
    bridge.call(Call::StartScan, CallbackId(1));
    bridge.call(Call::StopScan, CallbackId(2));

    assert_eq!(sink.replies_for(CallbackId(1)), vec![Reply::NoResult]);
    assert!(sink.is_terminated(CallbackId(1)));
    assert_eq!(sink.replies_for(CallbackId(2)), vec![Reply::NoResult]);
    assert!(!bridge.scan_is_waiting());
    // No native scan was ever running.
    assert!(stack.calls().is_empty());

    // Power-on does not revive it.
    bridge
        .handle_event(NativeEvent::AdapterStateChanged(AdapterState::PoweredOn))
        .unwrap();
    assert!(stack.calls().is_empty());
    assert_eq!(sink.replies_for(CallbackId(1)).len(), 1);
}

#[test]
fn test_scan_results_stream_on_scan_channel() {
    let (mut bridge, _stack, sink) = bridge_in(AdapterState::PoweredOn);
    bridge.call(Call::StartScan, CallbackId(1));

    let mut advertisement = blebridge_core::Advertisement::new(peripheral());
    advertisement.rssi = Some(-60);
    advertisement.local_name = Some("Sensor".into());
    bridge
        .handle_event(NativeEvent::DeviceDiscovered(advertisement))
        .unwrap();

    let replies = sink.replies_for(CallbackId(1));
    let [Reply::Scan(record)] = replies.as_slice() else {
        panic!("expected one scan record, got {:?}", replies);
    };
    assert_eq!(record.address, LOCATOR);
    assert_eq!(record.rssi, -60);
    assert!(!sink.is_terminated(CallbackId(1)));

    bridge.call(Call::StopScan, CallbackId(2));
    assert!(sink.is_terminated(CallbackId(1)));
    assert!(sink.is_terminated(CallbackId(2)));
}

#[test]
fn test_write_without_response_completes_immediately() {
    let (mut bridge, stack, sink, device) = connected();
    let characteristic = discover(
        &mut bridge,
        &sink,
        device,
        CharProperties::WRITE_WITHOUT_RESPONSE,
    );

    bridge.call(
        Call::WriteCharacteristic {
            device,
            characteristic,
            value: vec![1, 2, 3],
        },
        CallbackId(30),
    );

    assert_eq!(sink.replies_for(CallbackId(30)), vec![Reply::Ok]);
    assert!(sink.is_terminated(CallbackId(30)));
    assert!(bridge.session(device).unwrap().queue().is_empty());
    assert!(matches!(
        stack.last_call(),
        Some(StackCall::WriteCharacteristic {
            kind: WriteKind::WithoutResponse,
            ..
        })
    ));
}

#[test]
fn test_write_with_response_waits_for_acknowledgment() {
    let (mut bridge, stack, sink, device) = connected();
    let characteristic = discover(
        &mut bridge,
        &sink,
        device,
        CharProperties::WRITE | CharProperties::WRITE_WITHOUT_RESPONSE,
    );

    bridge.call(
        Call::WriteCharacteristic {
            device,
            characteristic,
            value: vec![9],
        },
        CallbackId(30),
    );
    assert!(sink.replies_for(CallbackId(30)).is_empty());
    assert!(matches!(
        stack.last_call(),
        Some(StackCall::WriteCharacteristic {
            kind: WriteKind::WithResponse,
            ..
        })
    ));

    bridge
        .handle_event(NativeEvent::CharacteristicWritten {
            link: link(device),
            characteristic: characteristic_path(),
            result: Ok(()),
        })
        .unwrap();
    assert_eq!(sink.replies_for(CallbackId(30)), vec![Reply::Ok]);
}

#[test]
fn test_write_to_read_only_characteristic_is_refused() {
    let (mut bridge, _stack, sink, device) = connected();
    let characteristic = discover(&mut bridge, &sink, device, CharProperties::READ);
    bridge.call(
        Call::WriteCharacteristic {
            device,
            characteristic,
            value: vec![1],
        },
        CallbackId(30),
    );
    assert_eq!(
        sink.error_code(CallbackId(30)).as_deref(),
        Some("OPERATION_NOT_PERMITTED")
    );
}

#[test]
fn test_client_configuration_write_is_not_forwarded() {
    let (mut bridge, stack, sink, device) = connected();
    let characteristic = discover(&mut bridge, &sink, device, CharProperties::NOTIFY);

    bridge.call(
        Call::Descriptors {
            device,
            characteristic,
        },
        CallbackId(40),
    );
    bridge
        .handle_event(NativeEvent::DescriptorsDiscovered {
            link: link(device),
            characteristic: characteristic_path(),
            result: Ok(vec![NativeDescriptor {
                service: service_uuid(),
                characteristic: characteristic_uuid(),
                uuid: CLIENT_CHARACTERISTIC_CONFIGURATION,
            }]),
        })
        .unwrap();
    let Some(Reply::Descriptors(descriptors)) = sink.replies_for(CallbackId(40)).pop() else {
        panic!("expected descriptors reply");
    };

    bridge.call(
        Call::WriteDescriptor {
            device,
            descriptor: descriptors[0].handle,
            value: vec![0x01, 0x00],
        },
        CallbackId(41),
    );
    assert_eq!(sink.replies_for(CallbackId(41)), vec![Reply::Ok]);
    assert_eq!(
        stack.count(|c| matches!(c, StackCall::WriteDescriptor { .. })),
        0
    );
}

#[test]
fn test_rediscovery_returns_the_same_handles() {
    let (mut bridge, _stack, sink, device) = connected();
    let first = discover(&mut bridge, &sink, device, CharProperties::READ);
    let second = discover(&mut bridge, &sink, device, CharProperties::READ);
    assert_eq!(first, second);
    assert_eq!(bridge.session(device).unwrap().registry().len(), 2);
}

#[test]
fn test_teardown_invalidates_every_handle() {
    let (mut bridge, _stack, sink, device) = connected();
    let characteristic = discover(&mut bridge, &sink, device, CharProperties::READ);
    assert!(
        bridge
            .session(device)
            .unwrap()
            .resolve_characteristic(characteristic)
            .is_ok()
    );

    bridge.call(Call::Close { device }, CallbackId(50));
    assert_eq!(sink.replies_for(CallbackId(50)), vec![Reply::NoResult]);
    assert!(sink.is_terminated(CONNECT));
    assert!(bridge.session(device).is_none());

    bridge.call(
        Call::ReadCharacteristic {
            device,
            characteristic,
        },
        CallbackId(51),
    );
    assert_eq!(
        sink.error_code(CallbackId(51)).as_deref(),
        Some("DEVICE_NOT_FOUND")
    );
}

#[test]
fn test_sibling_attributes_sharing_a_uuid_are_counted() {
    let (mut bridge, _stack, sink, device) = connected();
    let hid = uuid_from_u16(0x1812);
    let report = uuid_from_u16(0x2A4D);

    bridge.call(Call::Services { device }, CallbackId(101));
    bridge
        .handle_event(NativeEvent::ServicesDiscovered {
            link: link(device),
            result: Ok(vec![NativeService {
                uuid: hid,
                primary: true,
            }]),
        })
        .unwrap();
    let Some(Reply::Services(services)) = sink.replies_for(CallbackId(101)).pop() else {
        panic!("expected services reply");
    };
    assert_eq!(bridge.metrics().snapshot().duplicate_attributes, 0);

    bridge.call(
        Call::Characteristics {
            device,
            service: services[0].handle,
        },
        CallbackId(102),
    );
    let input = NativeCharacteristic {
        service: hid,
        uuid: report,
        properties: CharProperties::READ | CharProperties::NOTIFY,
    };
    let output = NativeCharacteristic {
        service: hid,
        uuid: report,
        properties: CharProperties::READ | CharProperties::WRITE,
    };
    bridge
        .handle_event(NativeEvent::CharacteristicsDiscovered {
            link: link(device),
            service: AttributePath::service(hid),
            result: Ok(vec![input, output]),
        })
        .unwrap();

    let Some(Reply::Characteristics(characteristics)) = sink.replies_for(CallbackId(102)).pop()
    else {
        panic!("expected characteristics reply");
    };
    // Both are reported, folded into one handle.
    assert_eq!(characteristics.len(), 2);
    assert_eq!(characteristics[0].handle, characteristics[1].handle);
    assert_eq!(bridge.session(device).unwrap().registry().len(), 2);
    assert_eq!(bridge.metrics().snapshot().duplicate_attributes, 1);
}

#[test]
fn test_wrong_kind_of_handle_is_not_found() {
    let (mut bridge, _stack, sink, device) = connected();
    let characteristic = discover(&mut bridge, &sink, device, CharProperties::READ);
    bridge.call(
        Call::Characteristics {
            device,
            service: characteristic,
        },
        CallbackId(60),
    );
    assert_eq!(
        sink.error_code(CallbackId(60)).as_deref(),
        Some("OBJECT_NOT_FOUND")
    );
}

#[test]
fn test_pending_command_is_dropped_on_disconnect() {
    let (mut bridge, stack, sink, device) = connected();
    bridge.call(Call::Rssi { device }, CallbackId(5));
    bridge.call(Call::Rssi { device }, CallbackId(6));

    bridge.call(Call::Close { device }, CallbackId(7));
    assert_eq!(
        stack.last_call(),
        Some(StackCall::CancelConnection(link(device)))
    );

    // A late completion is attributed to nobody.
    bridge
        .handle_event(NativeEvent::RssiRead {
            link: link(device),
            result: Ok(-50),
        })
        .unwrap();

    assert!(sink.replies_for(CallbackId(5)).is_empty());
    assert!(sink.replies_for(CallbackId(6)).is_empty());
    let snapshot = bridge.metrics().snapshot();
    assert_eq!(snapshot.commands_dropped, 2);
    assert_eq!(snapshot.stale_events, 1);
    assert_eq!(snapshot.sessions_closed, 1);
}

#[test]
fn test_late_events_of_a_closed_link_do_not_reach_the_reconnected_session() {
    let (mut bridge, stack, sink, old) = connected();
    bridge.call(Call::Rssi { device: old }, CallbackId(5));
    bridge.call(Call::Close { device: old }, CallbackId(7));

    // Same peripheral, new session.
    bridge.call(
        Call::Connect {
            locator: LOCATOR.into(),
        },
        CallbackId(8),
    );
    let device = DeviceHandle(2);
    assert_eq!(stack.last_call(), Some(StackCall::Connect(link(device))));
    bridge
        .handle_event(NativeEvent::Connected { link: link(device) })
        .unwrap();

    // The old read completes while the new queue is empty.
    bridge
        .handle_event(NativeEvent::RssiRead {
            link: link(old),
            result: Ok(-50),
        })
        .unwrap();
    assert_eq!(bridge.metrics().snapshot().stale_events, 1);

    // A late completion must not satisfy the new session's own read.
    bridge.call(Call::Rssi { device }, CallbackId(9));
    bridge
        .handle_event(NativeEvent::RssiRead {
            link: link(old),
            result: Ok(-51),
        })
        .unwrap();
    assert!(sink.replies_for(CallbackId(9)).is_empty());
    bridge
        .handle_event(NativeEvent::RssiRead {
            link: link(device),
            result: Ok(-42),
        })
        .unwrap();
    assert_eq!(sink.replies_for(CallbackId(9)), vec![Reply::Rssi(-42)]);

    // The disconnect caused by the old close leaves the new session alone.
    bridge
        .handle_event(NativeEvent::Disconnected {
            link: link(old),
            error: None,
        })
        .unwrap();
    assert!(bridge.session(device).is_some());
    assert_eq!(
        sink.replies_for(CallbackId(8)),
        vec![
            Reply::Connection(ConnectInfo {
                device_handle: device,
                state: ConnectionState::Connecting,
            }),
            Reply::Connection(ConnectInfo {
                device_handle: device,
                state: ConnectionState::Connected,
            }),
        ]
    );
    assert!(sink.replies_for(CallbackId(5)).is_empty());

    let snapshot = bridge.metrics().snapshot();
    assert_eq!(snapshot.stale_events, 3);
    assert_eq!(snapshot.protocol_violations, 0);
}

#[test]
fn test_unsolicited_disconnect_ends_session() {
    let (mut bridge, stack, sink, device) = connected();
    stack.clear_calls();
    bridge
        .handle_event(NativeEvent::Disconnected {
            link: link(device),
            error: Some(NativeError::new("supervision timeout")),
        })
        .unwrap();

    assert_eq!(
        sink.replies_for(CONNECT).last(),
        Some(&Reply::Connection(ConnectInfo {
            device_handle: device,
            state: ConnectionState::Disconnected,
        }))
    );
    assert!(sink.is_terminated(CONNECT));
    assert_eq!(bridge.session_count(), 0);
    // The link is already down.
    assert!(stack.calls().is_empty());
}

#[test]
fn test_connect_failure_frees_the_device() {
    let (mut bridge, _stack, sink) = bridge_in(AdapterState::PoweredOn);
    bridge.call(
        Call::Connect {
            locator: LOCATOR.into(),
        },
        CONNECT,
    );
    bridge
        .handle_event(NativeEvent::ConnectFailed {
            link: link(DeviceHandle(1)),
            error: NativeError::new("peer removed pairing"),
        })
        .unwrap();

    assert_eq!(sink.error_code(CONNECT).as_deref(), Some("CONNECT_FAILED"));
    assert_eq!(bridge.session_count(), 0);

    bridge.call(
        Call::Connect {
            locator: LOCATOR.into(),
        },
        CallbackId(2),
    );
    assert_eq!(bridge.session_count(), 1);
}

#[test]
fn test_reset_frees_everything() {
    let (mut bridge, stack, sink, _device) = connected();
    bridge.call(Call::StartScan, CallbackId(1));
    bridge.call(Call::Reset, CallbackId(2));

    assert_eq!(sink.replies_for(CallbackId(2)), vec![Reply::Ok]);
    assert!(sink.is_terminated(CallbackId(1)));
    assert!(sink.is_terminated(CONNECT));
    assert_eq!(bridge.session_count(), 0);
    assert_eq!(stack.count(|c| matches!(c, StackCall::StopScan)), 1);
    assert_eq!(
        stack.count(|c| matches!(c, StackCall::CancelConnection(_))),
        1
    );
}
