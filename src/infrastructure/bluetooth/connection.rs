//! BLE Connection Module
//!
//! Handles connect/disconnect, pairing and the bonded-device check, plus
//! the connection and bond callbacks that complete them.

use crate::domain::address::Address;
use crate::domain::models::ConnectionStatus;
use crate::error::{Error, Result};
use crate::infrastructure::bluetooth::completion::{Completion, Correlation, OperationKind};
use crate::infrastructure::bluetooth::gatt::GattCatalog;
use crate::infrastructure::bluetooth::session::{lock, SessionCore};
use crate::infrastructure::bluetooth::stack::{
    BondState, ConnectionHandle, ConnectionState, DeviceList, RadioStack, SessionHandle,
};
use crate::infrastructure::bluetooth::status::{self, GattStatus, Status};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// The session's single link.
pub(crate) struct ConnectionRecord {
    pub(crate) handle: Option<ConnectionHandle>,
    pub(crate) address: Address,
    pub(crate) status: ConnectionStatus,
    pub(crate) catalog: Option<GattCatalog>,
}

impl ConnectionRecord {
    fn is(&self, conn: ConnectionHandle) -> bool {
        self.handle == Some(conn)
    }
}

#[derive(Default)]
pub(crate) struct ConnectionManager {
    record: Mutex<Option<ConnectionRecord>>,
    gatt_client_registered: AtomicBool,
}

impl ConnectionManager {
    /// Registers the GATT client unless it already is. Synchronous: the
    /// stack reports this registration through the request status.
    pub(crate) fn ensure_gatt_client(&self, stack: &dyn RadioStack, session: SessionHandle) -> Result<()> {
        if self.gatt_client_registered.load(Ordering::SeqCst) {
            return Ok(());
        }
        status::check(stack.register_gatt_client(session))
            .inspect_err(|e| error!(error = %e, "GATT client registration failed"))?;
        self.gatt_client_registered.store(true, Ordering::SeqCst);
        info!("GATT client registered");
        Ok(())
    }

    fn deregister_gatt_client(&self, stack: &dyn RadioStack, session: SessionHandle) {
        if !self.gatt_client_registered.swap(false, Ordering::SeqCst) {
            return;
        }
        match status::check(stack.deregister_gatt_client(session)) {
            Ok(()) => debug!("GATT client deregistered"),
            Err(e) => warn!(error = %e, "GATT client deregistration failed"),
        }
    }

    fn begin_connecting(&self, address: Address) -> Result<()> {
        let mut record = lock(&self.record);
        if let Some(existing) = record.as_ref() {
            if existing.status != ConnectionStatus::Disconnected {
                return Err(Error::AlreadyConnected(existing.address));
            }
        }
        // A link-lost record is replaced here; its catalog is already gone.
        *record = Some(ConnectionRecord {
            handle: None,
            address,
            status: ConnectionStatus::Connecting,
            catalog: None,
        });
        Ok(())
    }

    fn mark_connected(&self, address: Address, handle: ConnectionHandle) {
        let mut record = lock(&self.record);
        *record = Some(ConnectionRecord {
            handle: Some(handle),
            address,
            status: ConnectionStatus::Connected,
            catalog: None,
        });
    }

    fn abort_connecting(&self, address: Address) {
        let mut record = lock(&self.record);
        if record
            .as_ref()
            .is_some_and(|r| r.address == address && r.status == ConnectionStatus::Connecting)
        {
            *record = None;
        }
    }

    /// Fails with `NotConnected` unless `conn` is the live link.
    pub(crate) fn require(&self, conn: ConnectionHandle) -> Result<()> {
        match lock(&self.record).as_ref() {
            Some(r) if r.is(conn) && r.status == ConnectionStatus::Connected => Ok(()),
            _ => Err(Error::NotConnected),
        }
    }

    pub(crate) fn status_of(&self, conn: ConnectionHandle) -> Option<ConnectionStatus> {
        lock(&self.record).as_ref().filter(|r| r.is(conn)).map(|r| r.status)
    }

    pub(crate) fn current(&self) -> Option<(Address, ConnectionStatus)> {
        lock(&self.record).as_ref().map(|r| (r.address, r.status))
    }

    fn take(&self, conn: ConnectionHandle) -> Option<ConnectionRecord> {
        let mut record = lock(&self.record);
        if record.as_ref().is_some_and(|r| r.is(conn)) {
            record.take()
        } else {
            None
        }
    }

    /// Stores a fresh catalog on the live link. The superseded one, if any,
    /// is released once the lock is dropped.
    pub(crate) fn replace_catalog(&self, conn: ConnectionHandle, catalog: GattCatalog) -> Result<()> {
        let superseded = {
            let mut record = lock(&self.record);
            match record.as_mut() {
                Some(r) if r.is(conn) && r.status == ConnectionStatus::Connected => r.catalog.replace(catalog),
                _ => {
                    drop(record);
                    drop(catalog);
                    return Err(Error::NotConnected);
                }
            }
        };
        if superseded.is_some() {
            debug!(%conn, "Releasing superseded GATT catalog");
        }
        Ok(())
    }

    /// Marks the link down after an unsolicited disconnect. Returns the
    /// catalog so it is released outside the lock.
    fn link_lost(&self, conn: ConnectionHandle) -> Option<GattCatalog> {
        let mut record = lock(&self.record);
        match record.as_mut() {
            Some(r) if r.is(conn) => {
                r.status = ConnectionStatus::Disconnected;
                r.catalog.take()
            }
            _ => None,
        }
    }

    pub(crate) fn clear(&self) {
        let record = lock(&self.record).take();
        drop(record);
    }
}

/// Bonded device list that hands the native buffer back when dropped.
struct BondedDevices<'a> {
    stack: &'a dyn RadioStack,
    list: Option<DeviceList>,
}

impl<'a> BondedDevices<'a> {
    fn fetch(stack: &'a dyn RadioStack) -> Result<Self> {
        let list = stack.bonded_devices().map_err(|code| {
            error!(status = %code, "Failed to get bonded devices");
            status::to_error(code)
        })?;
        Ok(Self {
            stack,
            list: Some(list),
        })
    }

    fn devices(&self) -> &[Address] {
        self.list.as_ref().map(|l| l.devices.as_slice()).unwrap_or_default()
    }
}

impl Drop for BondedDevices<'_> {
    fn drop(&mut self) {
        if let Some(list) = self.list.take() {
            self.stack.free_device_list(list);
        }
    }
}

impl SessionCore {
    pub(crate) async fn connect(&self, address: Address, timeout: Duration) -> Result<ConnectionHandle> {
        let session = self.handle()?;
        self.connections.ensure_gatt_client(self.stack.as_ref(), session)?;

        if self.settings.require_bond_before_connect && !self.is_bonded(address)? {
            warn!(%address, "Device is not bonded");
            return Err(Error::PairRequired(address));
        }

        let waiter = self
            .bridge
            .begin_operation(OperationKind::Connect, Correlation::Address(address))?;
        self.connections.begin_connecting(address)?;

        info!(%address, "Connecting to device");
        if let Err(e) = status::check(self.stack.connect(session, address)) {
            error!(%address, error = %e, "Connect request failed");
            self.connections.abort_connecting(address);
            return Err(e);
        }

        match waiter.wait(timeout).await.and_then(Completion::into_connection) {
            Ok(handle) => {
                self.connections.mark_connected(address, handle);
                info!(%address, conn = %handle, "Connected");
                Ok(handle)
            }
            Err(e) => {
                self.connections.abort_connecting(address);
                Err(e)
            }
        }
    }

    /// Ends the link. The GATT client is deregistered and the connection's
    /// catalog released whatever the outcome.
    pub(crate) async fn disconnect(&self, conn: ConnectionHandle, timeout: Duration) -> Result<()> {
        let session = self.handle()?;
        let outcome = match self.connections.status_of(conn) {
            None => return Err(Error::NotConnected),
            Some(ConnectionStatus::Disconnected) => {
                debug!(%conn, "Link already down, tidying up");
                Ok(())
            }
            Some(_) => self.request_disconnect(conn, timeout).await,
        };

        self.connections.deregister_gatt_client(self.stack.as_ref(), session);
        drop(self.connections.take(conn));
        if outcome.is_ok() {
            info!(%conn, "Disconnected");
        }
        outcome
    }

    async fn request_disconnect(&self, conn: ConnectionHandle, timeout: Duration) -> Result<()> {
        let waiter = self
            .bridge
            .begin_operation(OperationKind::Disconnect, Correlation::Connection(conn))?;
        debug!(%conn, "Requesting disconnect");
        status::check(self.stack.disconnect(conn))
            .inspect_err(|e| error!(%conn, error = %e, "Disconnect request failed"))?;
        waiter.wait(timeout).await.map(|_| ())
    }

    pub(crate) fn is_bonded(&self, address: Address) -> Result<bool> {
        self.handle()?;
        let bonded = BondedDevices::fetch(self.stack.as_ref())?;
        debug!(count = bonded.devices().len(), "Bonded devices");
        Ok(bonded.devices().contains(&address))
    }

    /// Starts bonding with `address`. A device that is already bonded
    /// succeeds immediately.
    pub(crate) async fn pair(&self, address: Address, timeout: Duration) -> Result<()> {
        self.handle()?;
        let waiter = self
            .bridge
            .begin_operation(OperationKind::Pair, Correlation::Address(address))?;

        info!(%address, "Pairing with device");
        let status = self.stack.pair(address);
        if status == Status::DONE {
            info!(%address, "Device already paired");
            return Ok(());
        }
        status::check(status).inspect_err(|e| error!(%address, error = %e, "Pair request failed"))?;

        waiter.wait(timeout).await?;
        info!(%address, "Paired");
        Ok(())
    }

    pub(crate) async fn bond_if_needed(&self, address: Address, timeout: Duration) -> Result<()> {
        if self.is_bonded(address)? {
            debug!(%address, "Already bonded");
            return Ok(());
        }
        self.pair(address, timeout).await
    }

    pub(crate) fn on_connection_state(
        &self,
        state: ConnectionState,
        gatt_status: GattStatus,
        conn: ConnectionHandle,
        address: Address,
    ) {
        debug!(?state, %gatt_status, %conn, %address, "Connection state changed");

        // A failed status fails a pending connect. A Disconnected event with
        // a failed status and no connect pending is the link dropping.
        if !gatt_status.is_success() {
            let failed_attempt = self.bridge.is_pending(OperationKind::Connect)
                && self.bridge.complete(
                    OperationKind::Connect,
                    Correlation::Address(address),
                    Err(Error::ConnectionFailed { address, gatt_status }),
                );
            if failed_attempt {
                error!(%address, %gatt_status, ?state, "Connection attempt failed");
                return;
            }
            if state != ConnectionState::Disconnected {
                warn!(%address, %gatt_status, ?state, "Ignoring connection event with failed status");
                return;
            }
            warn!(%conn, %address, %gatt_status, "Disconnected with failed status");
        }

        match state {
            ConnectionState::Connected => {
                self.bridge.complete(
                    OperationKind::Connect,
                    Correlation::Address(address),
                    Ok(Completion::Connected(conn)),
                );
            }
            ConnectionState::Disconnected => {
                let expected = self.bridge.is_pending(OperationKind::Disconnect);
                let delivered = self.bridge.complete(
                    OperationKind::Disconnect,
                    Correlation::Connection(conn),
                    Ok(Completion::Done),
                );
                if !delivered && !expected {
                    warn!(%conn, %address, "Link lost");
                    drop(self.connections.link_lost(conn));
                }
            }
            ConnectionState::Connecting | ConnectionState::Disconnecting => {}
        }
    }

    pub(crate) fn on_bond_state(&self, status: Status, address: Option<Address>, state: BondState) {
        let correlation = address.map(Correlation::Address).unwrap_or(Correlation::Any);

        if status == Status::DONE {
            info!(?address, "Device already bonded");
            self.bridge.complete(OperationKind::Pair, correlation, Ok(Completion::Done));
            return;
        }
        if let Err(e) = status::check(status) {
            error!(?address, error = %e, "Bonding failed");
            self.bridge.complete(OperationKind::Pair, correlation, Err(e));
            return;
        }

        match state {
            BondState::Bonded => {
                info!(?address, "Bonded");
                self.bridge.complete(OperationKind::Pair, correlation, Ok(Completion::Done));
            }
            BondState::Bonding => debug!(?address, "Bonding in progress"),
            BondState::None => info!(?address, "Bond removed"),
        }
    }
}
