//! Drives `BleAdapter` against the simulated stack the way an application would.

use ble_session_bridge::infrastructure::bluetooth::completion::OperationKind;
use ble_session_bridge::infrastructure::bluetooth::protocol::{self, CameraAction};
use ble_session_bridge::infrastructure::bluetooth::sim::{Callback, SimPeripheral, SimulatedStack};
use ble_session_bridge::infrastructure::bluetooth::stack::{
    uuid_to_le, BondState, ConnectionState, NativeCharacteristic, NativeDescriptor, ResponseType, StackEvent,
};
use ble_session_bridge::infrastructure::bluetooth::status::{GattStatus, Status};
use ble_session_bridge::{
    Adapter, Address, BleAdapter, ConnectionHandle, ConnectionStatus, DeviceCharacteristic, Error, ScanResult,
    ScannedDevice, SessionManager, Settings, MAX_WRITE_LEN,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout, Instant};
use uuid::Uuid;

const RING: Address = Address::new([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]);
const HEADPHONES: Address = Address::new([0x10, 0x20, 0x30, 0x40, 0x50, 0x60]);

fn settings() -> Settings {
    let mut settings = Settings::default();
    settings.radio_enable_retry_delay_ms = 10;
    settings
}

fn ring_stack() -> SimulatedStack {
    let stack = SimulatedStack::new();
    stack.add_peripheral(SimPeripheral::new(HEADPHONES, "Headphones").with_rssi(-70));
    stack.add_peripheral(SimPeripheral::ring(RING, "R02-ABCD").with_rssi(-40));
    stack
}

async fn open(stack: &SimulatedStack, settings: Settings) -> Arc<BleAdapter> {
    SessionManager::new()
        .enable(Arc::new(stack.clone()), settings)
        .await
        .expect("session should come up")
}

/// Polls `condition` until it holds or a second has passed.
async fn eventually(condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(1);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        sleep(Duration::from_millis(5)).await;
    }
    condition()
}

async fn command_characteristics(
    adapter: &BleAdapter,
    conn: ConnectionHandle,
) -> (DeviceCharacteristic, DeviceCharacteristic) {
    let services = adapter.get_services(conn).await.expect("discovery");
    let command = services
        .iter()
        .find(|s| s.uuid == protocol::COMMAND_SERVICE_UUID)
        .expect("command service");
    let write = command.characteristic(protocol::COMMAND_WRITE_UUID).cloned().expect("write");
    let read = command.characteristic(protocol::COMMAND_READ_UUID).cloned().expect("read");
    (write, read)
}

fn native(uuid: Uuid) -> NativeCharacteristic {
    NativeCharacteristic {
        uuid_le: uuid_to_le(uuid),
        handle: 0,
        descriptor: NativeDescriptor::default(),
    }
}

#[tokio::test]
async fn ring_session_from_scan_to_close() {
    let stack = ring_stack();
    let adapter = open(&stack, settings()).await;

    let (found_tx, mut found_rx) = mpsc::unbounded_channel::<ScannedDevice>();
    adapter
        .scan(Arc::new(move |result: &ScanResult<'_>| {
            let _ = found_tx.send(result.to_owned_device());
        }))
        .unwrap();

    let ring = loop {
        let device = timeout(Duration::from_secs(5), found_rx.recv())
            .await
            .expect("scan result in time")
            .expect("scan channel open");
        if device.address == RING {
            break device;
        }
    };
    assert_eq!(ring.name, "R02-ABCD");
    assert_eq!(ring.rssi, -40);
    assert_eq!(ring.tx_power, Some(0));

    adapter.stop_scan().unwrap();
    assert!(!adapter.is_scanning());
    assert!(!stack.is_scanning());

    let conn = timeout(Duration::from_secs(10), adapter.connect(RING))
        .await
        .expect("connect in time")
        .unwrap();
    assert_eq!(adapter.connection(), Some((RING, ConnectionStatus::Connected)));

    let (write, read) = command_characteristics(&adapter, conn).await;
    assert!(read.is_notify);
    assert_eq!(stack.live_clones(), 1);

    let notifications = adapter.set_notify(conn, &read).await.unwrap();
    assert_eq!(stack.notify_enabled(), vec![protocol::COMMAND_READ_UUID]);

    let packet = protocol::make_camera_packet(CameraAction::EnableCameraGesture);
    assert_eq!(&packet[..2], &[0x02, 0x04]);
    timeout(Duration::from_secs(5), adapter.write(conn, &write, &packet))
        .await
        .expect("write in time")
        .unwrap();

    let writes = stack.writes();
    let last = writes.last().expect("a recorded write");
    assert_eq!(last.characteristic, protocol::COMMAND_WRITE_UUID);
    assert_eq!(last.response, ResponseType::Required);
    assert_eq!(last.data, packet.to_vec());

    // The ring echoes camera commands on its notify characteristic.
    let echo = notifications.recv_timeout(Duration::from_secs(2)).await.expect("echo");
    assert_eq!(echo.characteristic, protocol::COMMAND_READ_UUID);
    assert_eq!(echo.data, packet.to_vec());

    adapter
        .write(conn, &write, &protocol::blink_twice_packet())
        .await
        .unwrap();
    let gesture = notifications.recv_timeout(Duration::from_secs(2)).await.expect("gesture");
    assert!(protocol::is_camera_take_photo(&gesture.data));

    timeout(Duration::from_secs(10), adapter.disconnect(conn))
        .await
        .expect("disconnect in time")
        .unwrap();
    assert_eq!(stack.total_releases(), 1);
    assert_eq!(stack.live_clones(), 0);
    assert_eq!(adapter.connection(), None);
    assert_eq!(stack.counters().gatt_client_deregistrations, 1);

    adapter.close();
    assert_eq!(stack.total_releases(), 1);
    assert_eq!(stack.sessions_closed(), 1);
}

#[tokio::test]
async fn connect_timeout_discards_late_callback() {
    let stack = ring_stack();
    let mut settings = settings();
    settings.timeouts.connect_ms = 200;
    let adapter = open(&stack, settings).await;

    stack.suppress(Callback::Connected);
    let err = adapter.connect(RING).await.unwrap_err();
    assert_eq!(err, Error::Timeout(OperationKind::Connect));
    assert!(err.is_timeout());
    assert_eq!(adapter.connection(), None);

    let late = stack.last_connection().expect("connect was requested");
    stack.inject(StackEvent::ConnectionStateChanged {
        state: ConnectionState::Connected,
        gatt_status: GattStatus::SUCCESS,
        conn: late,
        address: RING,
    });
    sleep(Duration::from_millis(50)).await;
    assert_eq!(adapter.connection(), None);

    stack.unsuppress(Callback::Connected);
    let conn = adapter.connect(RING).await.unwrap();
    assert_ne!(conn, late);
    assert_eq!(adapter.connection(), Some((RING, ConnectionStatus::Connected)));

    adapter.close();
}

#[tokio::test]
async fn scan_is_single_flight() {
    let stack = ring_stack();
    let adapter = open(&stack, settings()).await;

    assert_eq!(adapter.stop_scan(), Err(Error::NotInProgress));
    adapter.scan(Arc::new(|_: &ScanResult<'_>| {})).unwrap();
    assert_eq!(
        adapter.scan(Arc::new(|_: &ScanResult<'_>| {})),
        Err(Error::AlreadyInProgress)
    );
    adapter.stop_scan().unwrap();
    assert_eq!(adapter.stop_scan(), Err(Error::NotInProgress));
    assert_eq!(stack.counters().scans_started, 1);
    assert_eq!(stack.counters().scans_stopped, 1);

    adapter.close();
}

#[tokio::test]
async fn long_writes_are_cut_to_the_limit() {
    let stack = ring_stack();
    let adapter = open(&stack, settings()).await;
    let conn = adapter.connect(RING).await.unwrap();
    let (write, _) = command_characteristics(&adapter, conn).await;

    adapter.write(conn, &write, &[0xAA; 32]).await.unwrap();

    let writes = stack.writes();
    assert_eq!(writes.len(), 1);
    assert_eq!(writes[0].data, vec![0xAA; MAX_WRITE_LEN]);

    adapter.close();
}

#[tokio::test]
async fn failed_link_reports_gatt_status() {
    let stack = ring_stack();
    let adapter = open(&stack, settings()).await;

    stack.set_connect_gatt_status(Some(GattStatus::ERROR));
    assert_eq!(
        adapter.connect(RING).await,
        Err(Error::ConnectionFailed {
            address: RING,
            gatt_status: GattStatus::ERROR,
        })
    );
    assert_eq!(adapter.connection(), None);

    // Nobody answers at an address the radio cannot see.
    let missing = Address::new([0, 0, 0, 0, 0, 1]);
    assert!(matches!(
        adapter.connect(missing).await,
        Err(Error::ConnectionFailed { address, .. }) if address == missing
    ));

    stack.set_connect_gatt_status(None);
    adapter.connect(RING).await.unwrap();

    adapter.close();
}

#[tokio::test]
async fn second_connect_is_rejected_while_linked() {
    let stack = ring_stack();
    let adapter = open(&stack, settings()).await;
    adapter.connect(RING).await.unwrap();

    assert_eq!(adapter.connect(HEADPHONES).await, Err(Error::AlreadyConnected(RING)));

    adapter.close();
}

#[tokio::test]
async fn link_loss_releases_the_catalog() {
    let stack = ring_stack();
    let adapter = open(&stack, settings()).await;
    let conn = adapter.connect(RING).await.unwrap();
    let (write, _) = command_characteristics(&adapter, conn).await;
    assert_eq!(stack.live_clones(), 1);

    stack.drop_link(conn);
    assert!(eventually(|| stack.live_clones() == 0).await);
    assert_eq!(adapter.connection(), Some((RING, ConnectionStatus::Disconnected)));
    assert_eq!(adapter.write(conn, &write, &[0x01]).await, Err(Error::NotConnected));

    // Disconnect on a dead link just tidies up.
    adapter.disconnect(conn).await.unwrap();
    assert_eq!(adapter.connection(), None);
    assert_eq!(stack.total_releases(), 1);

    let again = adapter.connect(RING).await.unwrap();
    assert_ne!(again, conn);

    adapter.close();
    assert_eq!(stack.total_releases(), 1);
}

#[tokio::test]
async fn rediscovery_releases_the_previous_catalog() {
    let stack = ring_stack();
    let adapter = open(&stack, settings()).await;
    let conn = adapter.connect(RING).await.unwrap();

    let first = adapter.get_services(conn).await.unwrap();
    let second = adapter.get_services(conn).await.unwrap();
    assert_eq!(first.len(), second.len());
    assert_eq!(stack.clones_made(), 2);
    assert_eq!(stack.live_clones(), 1);
    assert_eq!(stack.total_releases(), 1);

    // Closing without a disconnect still releases the live catalog, once.
    adapter.close();
    assert_eq!(stack.live_clones(), 0);
    assert_eq!(stack.total_releases(), 2);
}

#[tokio::test]
async fn empty_notifications_are_dropped() {
    let stack = ring_stack();
    let adapter = open(&stack, settings()).await;
    let conn = adapter.connect(RING).await.unwrap();
    let (_, read) = command_characteristics(&adapter, conn).await;
    let notifications = adapter.set_notify(conn, &read).await.unwrap();

    stack.notify(conn, protocol::COMMAND_READ_UUID, &[]);
    stack.notify(conn, protocol::COMMAND_READ_UUID, &[1, 2, 3]);

    let received = notifications.recv_timeout(Duration::from_secs(1)).await.expect("notification");
    assert_eq!(received.data, vec![1, 2, 3]);
    assert!(notifications.recv_timeout(Duration::from_millis(50)).await.is_none());

    adapter.close();
}

#[tokio::test]
async fn pairing_and_bond_requirement() {
    let stack = ring_stack();
    let mut settings = settings();
    settings.require_bond_before_connect = true;
    let adapter = open(&stack, settings).await;

    assert!(!adapter.is_bonded(RING).unwrap());
    assert_eq!(adapter.connect(RING).await, Err(Error::PairRequired(RING)));

    adapter.bond_if_needed(RING).await.unwrap();
    assert!(stack.is_bonded(RING));
    assert!(adapter.is_bonded(RING).unwrap());

    // Already bonded: the stack answers straight away.
    adapter.pair(RING).await.unwrap();

    adapter.connect(RING).await.unwrap();

    let counters = stack.counters();
    assert!(counters.device_lists_fetched > 0);
    assert_eq!(counters.device_lists_fetched, counters.device_lists_freed);

    adapter.close();
}

#[tokio::test]
async fn closed_session_rejects_everything() {
    let stack = ring_stack();
    let adapter = open(&stack, settings()).await;
    adapter.close();
    adapter.close();

    assert!(adapter.is_closed());
    assert_eq!(stack.sessions_closed(), 1);
    assert_eq!(adapter.scan(Arc::new(|_: &ScanResult<'_>| {})), Err(Error::SessionClosed));
    assert_eq!(adapter.connect(RING).await, Err(Error::SessionClosed));
    assert_eq!(adapter.radio_state(), Err(Error::SessionClosed));
    assert_eq!(adapter.is_bonded(RING), Err(Error::SessionClosed));
}

#[tokio::test]
async fn notifications_keep_stack_order() {
    let stack = ring_stack();
    let adapter = open(&stack, settings()).await;
    let conn = adapter.connect(RING).await.unwrap();
    let (_, read) = command_characteristics(&adapter, conn).await;
    let notifications = adapter.set_notify(conn, &read).await.unwrap();

    for byte in 1..=3 {
        stack.notify(conn, protocol::COMMAND_READ_UUID, &[byte]);
    }
    let mut received = Vec::new();
    for byte in 4..=6 {
        let next = notifications.recv_timeout(Duration::from_secs(1)).await.expect("notification");
        received.extend(next.data);
        stack.notify(conn, protocol::COMMAND_READ_UUID, &[byte]);
    }
    while let Some(next) = notifications.recv_timeout(Duration::from_millis(200)).await {
        received.extend(next.data);
    }

    assert_eq!(received, vec![1, 2, 3, 4, 5, 6]);
    adapter.close();
}

#[tokio::test]
async fn close_ends_the_notification_stream() {
    let stack = ring_stack();
    let adapter = open(&stack, settings()).await;
    let conn = adapter.connect(RING).await.unwrap();
    let (_, read) = command_characteristics(&adapter, conn).await;
    let notifications = adapter.set_notify(conn, &read).await.unwrap();

    let waiting = tokio::spawn(async move { notifications.recv().await });
    sleep(Duration::from_millis(20)).await;
    adapter.close();

    let ended = timeout(Duration::from_secs(2), waiting)
        .await
        .expect("receiver woke up after close")
        .unwrap();
    assert!(ended.is_none());
}

#[tokio::test]
async fn link_dropped_with_error_status_is_treated_as_lost() {
    let stack = ring_stack();
    let adapter = open(&stack, settings()).await;
    let conn = adapter.connect(RING).await.unwrap();
    command_characteristics(&adapter, conn).await;
    assert_eq!(stack.live_clones(), 1);

    // Supervision timeout reported by the controller.
    stack.inject(StackEvent::ConnectionStateChanged {
        state: ConnectionState::Disconnected,
        gatt_status: GattStatus::CONN_TIMEOUT,
        conn,
        address: RING,
    });
    assert!(eventually(|| stack.live_clones() == 0).await);
    assert_eq!(adapter.connection(), Some((RING, ConnectionStatus::Disconnected)));

    let again = adapter.connect(RING).await.unwrap();
    assert_ne!(again, conn);

    adapter.close();
}

#[tokio::test]
async fn disconnect_completes_on_callback_with_error_status() {
    let stack = ring_stack();
    let adapter = open(&stack, settings()).await;
    let conn = adapter.connect(RING).await.unwrap();
    stack.suppress(Callback::Disconnected);

    let (result, ()) = timeout(Duration::from_secs(2), async {
        tokio::join!(adapter.disconnect(conn), async {
            sleep(Duration::from_millis(50)).await;
            stack.inject(StackEvent::ConnectionStateChanged {
                state: ConnectionState::Disconnected,
                gatt_status: GattStatus::CONN_TIMEOUT,
                conn,
                address: RING,
            });
        })
    })
    .await
    .expect("disconnect should not wait out its timeout");
    assert_eq!(result, Ok(()));
    assert_eq!(adapter.connection(), None);

    adapter.close();
}

#[tokio::test]
async fn peripheral_without_services_reports_none_available() {
    let stack = ring_stack();
    let beacon = Address::new([0x02, 0x00, 0x00, 0x00, 0x00, 0x01]);
    stack.add_peripheral(SimPeripheral::new(beacon, "Beacon"));
    let adapter = open(&stack, settings()).await;

    let conn = adapter.connect(beacon).await.unwrap();
    assert_eq!(adapter.get_services(conn).await.err(), Some(Error::NoServicesAvailable));
    assert_eq!(stack.clones_made(), 0);

    adapter.close();
}

#[tokio::test]
async fn pair_times_out_and_ignores_the_late_bond() {
    let stack = ring_stack();
    let mut settings = settings();
    settings.timeouts.pair_ms = 200;
    let adapter = open(&stack, settings).await;

    stack.suppress(Callback::Bonded);
    assert_eq!(adapter.pair(RING).await, Err(Error::Timeout(OperationKind::Pair)));

    stack.inject(StackEvent::BondStateChanged {
        status: Status::OK,
        address: Some(RING),
        state: BondState::Bonded,
    });
    sleep(Duration::from_millis(50)).await;

    // The next pairing gets its own answer, not the stale one.
    stack.unsuppress(Callback::Bonded);
    stack.set_callback_status(Callback::Bonded, Status::AUTH_REJECTED);
    let err = adapter.pair(HEADPHONES).await.unwrap_err();
    assert_eq!(err.native_status(), Some(Status::AUTH_REJECTED));
    assert!(!stack.is_bonded(HEADPHONES));

    adapter.close();
}

#[tokio::test]
async fn disconnect_timeout_still_tears_the_link_down() {
    let stack = ring_stack();
    let mut settings = settings();
    settings.timeouts.disconnect_ms = 200;
    let adapter = open(&stack, settings).await;
    let conn = adapter.connect(RING).await.unwrap();
    command_characteristics(&adapter, conn).await;

    stack.suppress(Callback::Disconnected);
    assert_eq!(adapter.disconnect(conn).await, Err(Error::Timeout(OperationKind::Disconnect)));
    assert_eq!(stack.counters().gatt_client_deregistrations, 1);
    assert_eq!(stack.live_clones(), 0);
    assert_eq!(adapter.connection(), None);

    stack.unsuppress(Callback::Disconnected);
    adapter.connect(RING).await.unwrap();

    adapter.close();
}

#[tokio::test]
async fn late_write_and_descriptor_completions_are_discarded() {
    let stack = ring_stack();
    let mut settings = settings();
    settings.timeouts.write_ms = 200;
    settings.timeouts.notify_ms = 200;
    let adapter = open(&stack, settings).await;
    let conn = adapter.connect(RING).await.unwrap();
    let (write, read) = command_characteristics(&adapter, conn).await;

    stack.suppress(Callback::CharacteristicWritten);
    stack.suppress(Callback::DescriptorWritten);
    assert_eq!(
        adapter.write(conn, &write, &[0xAA]).await,
        Err(Error::Timeout(OperationKind::CharacteristicWrite))
    );
    assert_eq!(
        adapter.set_notify(conn, &read).await.err(),
        Some(Error::Timeout(OperationKind::DescriptorWrite))
    );

    stack.inject(StackEvent::CharacteristicWritten {
        conn,
        characteristic: native(protocol::COMMAND_WRITE_UUID),
        status: Status::OK,
    });
    stack.inject(StackEvent::DescriptorWritten {
        conn,
        characteristic: native(protocol::COMMAND_READ_UUID),
        status: Status::OK,
    });
    sleep(Duration::from_millis(50)).await;

    stack.unsuppress(Callback::CharacteristicWritten);
    stack.unsuppress(Callback::DescriptorWritten);
    adapter.write(conn, &write, &[0xAA]).await.unwrap();
    adapter.set_notify(conn, &read).await.unwrap();
    assert_eq!(stack.writes().len(), 2);

    adapter.close();
}
