//! Bluetooth Service Module
//!
//! The caller-facing capability set. [`BleAdapter`] coordinates scanning,
//! connections, GATT discovery and characteristic I/O over one session.

use crate::domain::address::Address;
use crate::domain::models::{ConnectionStatus, RadioState};
use crate::domain::settings::{Settings, Timeouts};
use crate::error::Result;
use crate::infrastructure::bluetooth::characteristic::NotificationChannel;
use crate::infrastructure::bluetooth::gatt::{DeviceCharacteristic, DeviceService};
use crate::infrastructure::bluetooth::scanner::ScanCallback;
use crate::infrastructure::bluetooth::session::{CleanupAction, SessionCore};
use crate::infrastructure::bluetooth::stack::{ConnectionHandle, RadioStack};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

/// Operations a central-role BLE session offers.
///
/// Blocking operations suspend until the stack's callback arrives or the
/// configured timeout elapses.
#[async_trait]
pub trait Adapter: Send + Sync {
    /// Start scanning. `on_result` runs on the stack's dispatch thread.
    fn scan(&self, on_result: ScanCallback) -> Result<()>;

    fn stop_scan(&self) -> Result<()>;

    fn radio_state(&self) -> Result<RadioState>;

    async fn enable_radio(&self) -> Result<()>;

    async fn connect(&self, address: Address) -> Result<ConnectionHandle>;

    async fn disconnect(&self, conn: ConnectionHandle) -> Result<()>;

    async fn pair(&self, address: Address) -> Result<()>;

    fn is_bonded(&self, address: Address) -> Result<bool>;

    /// Discover services and replace the connection's catalog.
    async fn get_services(&self, conn: ConnectionHandle) -> Result<Vec<DeviceService>>;

    fn get_characteristics(&self, service: &DeviceService) -> Vec<DeviceCharacteristic> {
        service.characteristics().cloned().collect()
    }

    async fn write(&self, conn: ConnectionHandle, characteristic: &DeviceCharacteristic, data: &[u8]) -> Result<()>;

    async fn set_notify(&self, conn: ConnectionHandle, characteristic: &DeviceCharacteristic)
        -> Result<NotificationChannel>;

    fn close(&self);
}

/// The one [`Adapter`] implementation, backed by a [`RadioStack`].
#[derive(Debug)]
pub struct BleAdapter {
    core: Arc<SessionCore>,
}

impl BleAdapter {
    pub(crate) async fn open(stack: Arc<dyn RadioStack>, settings: Settings) -> Result<Self> {
        let core = SessionCore::open(stack, settings).await?;
        Ok(Self { core })
    }

    fn timeouts(&self) -> &Timeouts {
        &self.core.settings.timeouts
    }

    pub fn settings(&self) -> &Settings {
        &self.core.settings
    }

    pub fn is_scanning(&self) -> bool {
        self.core.scanner.is_scanning()
    }

    pub fn is_closed(&self) -> bool {
        self.core.is_closed()
    }

    /// Address and state of the session's link, if any.
    pub fn connection(&self) -> Option<(Address, ConnectionStatus)> {
        self.core.connections.current()
    }

    /// Pair only if the device is not bonded yet.
    pub async fn bond_if_needed(&self, address: Address) -> Result<()> {
        self.core.bond_if_needed(address, self.timeouts().pair()).await
    }

    /// Run `action` when the session closes, after earlier registrations.
    pub fn register_cleanup(&self, action: CleanupAction) {
        self.core.register_cleanup(action);
    }
}

#[async_trait]
impl Adapter for BleAdapter {
    fn scan(&self, on_result: ScanCallback) -> Result<()> {
        let session = self.core.handle()?;
        self.core.scanner.start(self.core.stack.as_ref(), session, on_result)
    }

    fn stop_scan(&self) -> Result<()> {
        self.core.handle()?;
        self.core.scanner.stop(self.core.stack.as_ref())
    }

    fn radio_state(&self) -> Result<RadioState> {
        self.core.radio_state()
    }

    async fn enable_radio(&self) -> Result<()> {
        self.core.enable_radio().await
    }

    async fn connect(&self, address: Address) -> Result<ConnectionHandle> {
        self.core.connect(address, self.timeouts().connect()).await
    }

    async fn disconnect(&self, conn: ConnectionHandle) -> Result<()> {
        self.core.disconnect(conn, self.timeouts().disconnect()).await
    }

    async fn pair(&self, address: Address) -> Result<()> {
        self.core.pair(address, self.timeouts().pair()).await
    }

    fn is_bonded(&self, address: Address) -> Result<bool> {
        self.core.is_bonded(address)
    }

    async fn get_services(&self, conn: ConnectionHandle) -> Result<Vec<DeviceService>> {
        let timeouts = self.timeouts();
        self.core
            .get_services(conn, timeouts.discovery(), timeouts.database())
            .await
    }

    async fn write(&self, conn: ConnectionHandle, characteristic: &DeviceCharacteristic, data: &[u8]) -> Result<()> {
        self.core
            .write_characteristic(conn, characteristic, data, self.timeouts().write())
            .await
    }

    async fn set_notify(
        &self,
        conn: ConnectionHandle,
        characteristic: &DeviceCharacteristic,
    ) -> Result<NotificationChannel> {
        self.core
            .set_notify(conn, characteristic, self.timeouts().notify())
            .await
    }

    fn close(&self) {
        info!("Closing session");
        self.core.close();
    }
}
