//! GATT service catalog for one connection.
//!
//! The stack hands the database over only for the duration of a callback,
//! so the dispatcher clones it and wraps the clone in a [`GattCatalog`].
//! The clone must go back to the stack exactly once: explicit
//! [`GattCatalog::release`], `Drop`, and the session's cleanup backstop all
//! go through the same [`ReleaseOnce`] guard.

use crate::error::{Error, Result};
use crate::infrastructure::bluetooth::completion::{Completion, Correlation, OperationKind};
use crate::infrastructure::bluetooth::session::SessionCore;
use crate::infrastructure::bluetooth::stack::{
    service_type, ConnectionHandle, GattDbSnapshot, NativeCharacteristic, NativeService, RadioStack,
    SnapshotId,
};
use crate::infrastructure::bluetooth::status;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceType {
    Primary,
    Secondary,
    Included,
    Other(u8),
}

impl From<u8> for ServiceType {
    fn from(raw: u8) -> Self {
        match raw {
            service_type::PRIMARY => ServiceType::Primary,
            service_type::SECONDARY => ServiceType::Secondary,
            service_type::INCLUDED => ServiceType::Included,
            other => ServiceType::Other(other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteType {
    NoResponse,
    Default,
    Signed,
    Unspecified(u8),
}

impl From<u8> for WriteType {
    fn from(raw: u8) -> Self {
        match raw {
            1 => WriteType::NoResponse,
            2 => WriteType::Default,
            3 => WriteType::Signed,
            other => WriteType::Unspecified(other),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceCharacteristic {
    pub uuid: Uuid,
    pub service_uuid: Uuid,
    pub handle: u16,
    pub is_notify: bool,
    pub notify_configured: bool,
    pub write_type: WriteType,
    pub(crate) native: NativeCharacteristic,
}

impl DeviceCharacteristic {
    fn from_native(service_uuid: Uuid, native: &NativeCharacteristic) -> Self {
        Self {
            uuid: native.uuid(),
            service_uuid,
            handle: native.handle,
            is_notify: native.descriptor.is_notify,
            notify_configured: native.descriptor.is_set,
            write_type: WriteType::from(native.descriptor.write_type),
            native: native.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceService {
    pub uuid: Uuid,
    pub handle: u16,
    pub service_type: ServiceType,
    characteristics: Vec<DeviceCharacteristic>,
}

impl DeviceService {
    fn from_native(native: &NativeService) -> Self {
        let uuid = native.uuid();
        Self {
            uuid,
            handle: native.handle,
            service_type: ServiceType::from(native.service_type),
            characteristics: native
                .characteristics
                .iter()
                .map(|c| DeviceCharacteristic::from_native(uuid, c))
                .collect(),
        }
    }

    /// Restartable: each call yields a fresh iterator from the first entry.
    pub fn characteristics(&self) -> std::slice::Iter<'_, DeviceCharacteristic> {
        self.characteristics.iter()
    }

    pub fn characteristic(&self, uuid: Uuid) -> Option<&DeviceCharacteristic> {
        self.characteristics.iter().find(|c| c.uuid == uuid)
    }
}

type ReleaseAction = Box<dyn FnOnce() + Send>;

/// Runs a release action at most once, whoever asks first.
pub(crate) struct ReleaseOnce {
    released: AtomicBool,
    action: Mutex<Option<ReleaseAction>>,
}

impl ReleaseOnce {
    pub(crate) fn new(action: ReleaseAction) -> Arc<Self> {
        Arc::new(Self {
            released: AtomicBool::new(false),
            action: Mutex::new(Some(action)),
        })
    }

    /// Returns `true` only for the call that actually ran the action.
    pub(crate) fn release(&self) -> bool {
        if self.released.swap(true, Ordering::SeqCst) {
            return false;
        }
        let action = self
            .action
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match action {
            Some(action) => {
                action();
                true
            }
            None => false,
        }
    }

    pub(crate) fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }
}

/// Owned catalog of a connection's services, backed by a cloned database.
pub struct GattCatalog {
    connection: ConnectionHandle,
    snapshot: SnapshotId,
    services: Vec<DeviceService>,
    release: Arc<ReleaseOnce>,
}

impl GattCatalog {
    /// Takes ownership of a clone made by the stack and arranges for it to be
    /// handed back on release.
    pub(crate) fn adopt(stack: Arc<dyn RadioStack>, connection: ConnectionHandle, clone: GattDbSnapshot) -> Self {
        let snapshot = clone.id;
        let services = clone.services.iter().map(DeviceService::from_native).collect();
        let release = ReleaseOnce::new(Box::new(move || match status::check(stack.release_gatt_db(snapshot)) {
            Ok(()) => debug!(snapshot = snapshot.0, "Released GATT database clone"),
            Err(e) => error!(snapshot = snapshot.0, error = %e, "Failed to release GATT database clone"),
        }));

        Self {
            connection,
            snapshot,
            services,
            release,
        }
    }

    pub fn connection(&self) -> ConnectionHandle {
        self.connection
    }

    pub fn snapshot_id(&self) -> SnapshotId {
        self.snapshot
    }

    pub fn services(&self) -> std::slice::Iter<'_, DeviceService> {
        self.services.iter()
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    pub fn find_characteristic(&self, uuid: Uuid) -> Option<&DeviceCharacteristic> {
        self.services.iter().find_map(|s| s.characteristic(uuid))
    }

    pub fn is_released(&self) -> bool {
        self.release.is_released()
    }

    pub fn release(&self) {
        self.release.release();
    }

    pub(crate) fn release_guard(&self) -> Arc<ReleaseOnce> {
        Arc::clone(&self.release)
    }
}

impl fmt::Debug for GattCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GattCatalog")
            .field("connection", &self.connection)
            .field("snapshot", &self.snapshot)
            .field("services", &self.services.len())
            .field("released", &self.is_released())
            .finish()
    }
}

impl Drop for GattCatalog {
    fn drop(&mut self) {
        self.release.release();
    }
}

impl SessionCore {
    pub(crate) async fn discover_services(&self, conn: ConnectionHandle, timeout: Duration) -> Result<()> {
        let session = self.handle()?;
        self.connections.require(conn)?;

        let waiter = self
            .bridge
            .begin_operation(OperationKind::ServiceDiscovery, Correlation::Connection(conn))?;
        debug!(%conn, "Requesting service discovery");
        if let Err(e) = status::check(self.stack.discover_all_services(session, conn)) {
            error!(%conn, error = %e, "Service discovery request failed");
            return Err(e);
        }

        waiter.wait(timeout).await?;
        info!(%conn, "Service discovery complete");
        Ok(())
    }

    pub(crate) async fn fetch_database(&self, conn: ConnectionHandle, timeout: Duration) -> Result<GattCatalog> {
        self.handle()?;
        self.connections.require(conn)?;

        let waiter = self
            .bridge
            .begin_operation(OperationKind::DatabaseFetch, Correlation::Connection(conn))?;
        if let Err(e) = status::check(self.stack.fetch_gatt_db(conn)) {
            error!(%conn, error = %e, "GATT database request failed");
            return Err(e);
        }

        match waiter.wait(timeout).await?.into_catalog()? {
            Some(catalog) => {
                info!(%conn, services = catalog.len(), "GATT database received");
                Ok(catalog)
            }
            None => {
                warn!(%conn, "Peripheral exposes no GATT services");
                Err(Error::NoServicesAvailable)
            }
        }
    }

    /// Discovers services, fetches the database and stores the resulting
    /// catalog on the connection, releasing any catalog it replaces.
    pub(crate) async fn get_services(
        &self,
        conn: ConnectionHandle,
        discovery_timeout: Duration,
        database_timeout: Duration,
    ) -> Result<Vec<DeviceService>> {
        self.discover_services(conn, discovery_timeout).await?;
        let catalog = self.fetch_database(conn, database_timeout).await?;
        let services: Vec<DeviceService> = catalog.services().cloned().collect();
        self.connections.replace_catalog(conn, catalog)?;
        Ok(services)
    }

    /// Called on the dispatch thread while the stack-owned snapshot is valid.
    pub(crate) fn on_gatt_database(&self, conn: ConnectionHandle, snapshot: Option<&GattDbSnapshot>) {
        let result = match snapshot.filter(|s| !s.services.is_empty()) {
            None => Ok(Completion::Database(None)),
            Some(snapshot) => match self.stack.clone_gatt_db(snapshot) {
                Ok(clone) => {
                    let catalog = GattCatalog::adopt(Arc::clone(&self.stack), conn, clone);
                    self.cleanup.register_release(catalog.release_guard());
                    Ok(Completion::Database(Some(catalog)))
                }
                Err(code) => {
                    error!(%conn, status = %code, "Failed to clone GATT database");
                    Err(status::to_error(code))
                }
            },
        };

        self.bridge
            .complete(OperationKind::DatabaseFetch, Correlation::Connection(conn), result);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::bluetooth::stack::{uuid_to_le, NativeDescriptor};
    use std::sync::atomic::AtomicUsize;

    fn native_char(uuid: &str, notify: bool, write_type: u8) -> NativeCharacteristic {
        NativeCharacteristic {
            uuid_le: uuid_to_le(Uuid::parse_str(uuid).unwrap()),
            handle: 0x10,
            descriptor: NativeDescriptor {
                is_notify: notify,
                is_set: false,
                write_type,
            },
        }
    }

    #[test]
    fn service_view_carries_parent_uuid_and_decoded_fields() {
        let native = NativeService {
            uuid_le: uuid_to_le(Uuid::parse_str("6e40fff0-b5a3-f393-e0a9-e50e24dcca9e").unwrap()),
            handle: 1,
            service_type: service_type::SECONDARY,
            characteristics: vec![
                native_char("6e400002-b5a3-f393-e0a9-e50e24dcca9e", false, 2),
                native_char("6e400003-b5a3-f393-e0a9-e50e24dcca9e", true, 9),
            ],
        };

        let service = DeviceService::from_native(&native);
        assert_eq!(service.service_type, ServiceType::Secondary);
        assert_eq!(service.characteristics().count(), 2);
        assert_eq!(service.characteristics().count(), 2);

        let notify = service
            .characteristic(Uuid::parse_str("6e400003-b5a3-f393-e0a9-e50e24dcca9e").unwrap())
            .unwrap();
        assert!(notify.is_notify);
        assert_eq!(notify.service_uuid, service.uuid);
        assert_eq!(notify.write_type, WriteType::Unspecified(9));
        assert_eq!(service.characteristics().next().unwrap().write_type, WriteType::Default);
    }

    #[test]
    fn release_once_runs_action_a_single_time() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let guard = ReleaseOnce::new(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        assert!(guard.release());
        assert!(!guard.release());
        assert!(guard.is_released());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn release_once_is_race_free() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let guard = ReleaseOnce::new(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let guard = Arc::clone(&guard);
                std::thread::spawn(move || guard.release())
            })
            .collect();
        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|released| *released)
            .count();
        assert_eq!(winners, 1);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
