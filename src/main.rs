use anyhow::{bail, Context, Result};
use ble_session_bridge::infrastructure::bluetooth::protocol::{self, CameraAction, RingPacket};
use ble_session_bridge::infrastructure::bluetooth::sim::{SimPeripheral, SimulatedStack};
use ble_session_bridge::infrastructure::logging;
use ble_session_bridge::{
    enable, Adapter, Address, BleAdapter, ConnectionHandle, DeviceCharacteristic, NotificationChannel,
    ScanResult, ScannedDevice, SettingsService,
};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

const DEMO_RING: Address = Address::new([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]);
const GESTURE_WINDOW: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> Result<()> {
    let mut settings_service = SettingsService::new().context("loading settings")?;
    let settings = settings_service.get().clone();
    let _log_guard = logging::init_logger(&settings.log_settings)?;
    info!("Starting BLE session bridge demo");
    if let Some(last) = settings.last_connected_address {
        info!(address = %last, "Last connected device");
    }

    // Optional first argument: connect to this address without scanning
    let target: Option<Address> = std::env::args()
        .nth(1)
        .map(|arg| arg.parse::<Address>())
        .transpose()
        .context("first argument must be a device address")?;

    let stack = SimulatedStack::new();
    stack.add_peripheral(SimPeripheral::new(Address::new([0x10, 0x20, 0x30, 0x40, 0x50, 0x60]), "Headphones"));
    stack.add_peripheral(SimPeripheral::ring(DEMO_RING, "R02-ABCD").with_rssi(-40));

    let adapter = enable(Arc::new(stack), settings.clone())
        .await
        .context("enabling radio session")?;

    let address = match target {
        Some(address) => address,
        None => {
            find_device(&adapter, &settings.device_name_prefix, settings.scan_budget())
                .await?
                .address
        }
    };

    let outcome = run_ring_session(&adapter, address).await;
    if outcome.is_ok() {
        if let Err(e) = settings_service.record_connection(address) {
            warn!(error = %e, "Could not remember device");
        }
    }

    adapter.close();
    outcome
}

/// Scan until a device whose name starts with `prefix` shows up.
async fn find_device(adapter: &BleAdapter, prefix: &str, budget: Duration) -> Result<ScannedDevice> {
    info!(prefix, "Scanning for device");

    let (found_tx, mut found_rx) = mpsc::unbounded_channel();
    let seen = Mutex::new(HashSet::new());
    let wanted = prefix.to_string();

    adapter
        .scan(Arc::new(move |result: &ScanResult<'_>| {
            let first_sighting = seen
                .lock()
                .map(|mut seen| seen.insert(result.address()))
                .unwrap_or(false);
            if !first_sighting {
                return;
            }

            let device = result.to_owned_device();
            info!(
                name = %device.name,
                address = %device.address,
                rssi = device.rssi,
                tx_power = ?device.tx_power,
                "Found device"
            );
            if device.name.starts_with(&wanted) {
                let _ = found_tx.send(device);
            }
        }))
        .context("starting scan")?;

    let found = tokio::time::timeout(budget, found_rx.recv()).await;
    adapter.stop_scan().context("stopping scan")?;

    match found {
        Ok(Some(device)) => Ok(device),
        _ => bail!("no {prefix} device found within {budget:?}"),
    }
}

struct RingLink {
    conn: ConnectionHandle,
    write: DeviceCharacteristic,
    read: DeviceCharacteristic,
}

async fn run_ring_session(adapter: &BleAdapter, address: Address) -> Result<()> {
    let conn = adapter.connect(address).await.context("connecting")?;
    let outcome = match find_command_characteristics(adapter, conn).await {
        Ok(link) => watch_gestures(adapter, &link).await,
        Err(e) => Err(e),
    };

    adapter.disconnect(conn).await.context("disconnecting")?;
    outcome
}

async fn find_command_characteristics(adapter: &BleAdapter, conn: ConnectionHandle) -> Result<RingLink> {
    let services = adapter.get_services(conn).await.context("discovering services")?;

    let mut write = None;
    let mut read = None;
    for service in &services {
        info!(uuid = %service.uuid, kind = ?service.service_type, "Service");
        for characteristic in adapter.get_characteristics(service) {
            debug!(
                uuid = %characteristic.uuid,
                notify = characteristic.is_notify,
                write_type = ?characteristic.write_type,
                "Characteristic"
            );
            match characteristic.uuid {
                uuid if uuid == protocol::COMMAND_WRITE_UUID => write = Some(characteristic),
                uuid if uuid == protocol::COMMAND_READ_UUID => read = Some(characteristic),
                _ => {}
            }
        }
    }

    Ok(RingLink {
        conn,
        write: write.context("command write characteristic not found")?,
        read: read.context("command read characteristic not found")?,
    })
}

async fn watch_gestures(adapter: &BleAdapter, link: &RingLink) -> Result<()> {
    let notifications = adapter
        .set_notify(link.conn, &link.read)
        .await
        .context("enabling notifications")?;

    adapter
        .write(link.conn, &link.write, &protocol::make_camera_packet(CameraAction::EnableCameraGesture))
        .await
        .context("enabling camera gesture")?;
    // Blink so the wearer knows the ring is listening
    adapter
        .write(link.conn, &link.write, &protocol::blink_twice_packet())
        .await
        .context("blinking")?;

    info!(window = ?GESTURE_WINDOW, "Waiting for gestures");
    log_notifications(&notifications, GESTURE_WINDOW).await;

    adapter
        .write(link.conn, &link.write, &protocol::make_camera_packet(CameraAction::DisableCameraGesture))
        .await
        .context("disabling camera gesture")?;
    Ok(())
}

async fn log_notifications(notifications: &NotificationChannel, window: Duration) {
    let deadline = Instant::now() + window;
    while let Some(notification) = notifications
        .recv_timeout(deadline.saturating_duration_since(Instant::now()))
        .await
    {
        if protocol::is_camera_take_photo(&notification.data) {
            info!("Take-photo gesture received");
            continue;
        }
        match RingPacket::parse(&notification.data) {
            Ok(packet) => info!(command = packet.command, action = ?packet.camera_action(), "Ring reply"),
            Err(e) => warn!(error = %e, data = ?notification.data, "Unrecognised notification"),
        }
    }
}
