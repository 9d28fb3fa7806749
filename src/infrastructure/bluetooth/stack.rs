//! Radio stack boundary.
//!
//! [`RadioStack`] lists the outbound requests the bridge makes. Each call
//! returns immediately with a [`Status`]; the real outcome of asynchronous
//! requests arrives later as a [`StackEvent`] handed to the session's
//! [`EventHandler`] on the stack's single dispatch thread.
//!
//! Events are passed by reference: anything they point at belongs to the
//! stack and is only valid for the duration of the callback.

use crate::domain::address::Address;
use crate::infrastructure::bluetooth::status::{GattStatus, Status};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionHandle(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScanInstance(pub u64);

/// Opaque handle for one established link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionHandle(pub u64);

impl fmt::Display for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

/// Identifies a GATT database buffer, either the stack's own or a clone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SnapshotId(pub u64);

/// Raw radio state codes returned by [`RadioStack::radio_state`].
pub mod radio_state {
    pub const DISABLED: i32 = 0;
    pub const ENABLED: i32 = 1;
    pub const ENABLING: i32 = 2;
    pub const DISABLING: i32 = 3;
}

/// Raw service type codes carried by [`NativeService`].
pub mod service_type {
    pub const PRIMARY: u8 = 0;
    pub const SECONDARY: u8 = 1;
    pub const INCLUDED: u8 = 2;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseType {
    NoResponse,
    Required,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    Failed,
    Queued,
    Started,
    Paused,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnecting,
    Disconnected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BondState {
    None,
    Bonding,
    Bonded,
}

/// One advertisement as reported by the stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanRecord {
    pub address: Address,
    pub rssi: i8,
    /// Raw advertisement payload (length/type/value AD structures).
    pub adv_data: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NativeDescriptor {
    pub is_notify: bool,
    pub is_set: bool,
    pub write_type: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeCharacteristic {
    /// UUID bytes in the stack's little-endian order.
    pub uuid_le: [u8; 16],
    pub handle: u16,
    pub descriptor: NativeDescriptor,
}

impl NativeCharacteristic {
    pub fn uuid(&self) -> Uuid {
        uuid_from_le(self.uuid_le)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeService {
    pub uuid_le: [u8; 16],
    pub handle: u16,
    pub service_type: u8,
    pub characteristics: Vec<NativeCharacteristic>,
}

impl NativeService {
    pub fn uuid(&self) -> Uuid {
        uuid_from_le(self.uuid_le)
    }
}

/// A GATT database buffer. Stack-owned when delivered in an event; a clone
/// returned by [`RadioStack::clone_gatt_db`] must be released exactly once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GattDbSnapshot {
    pub id: SnapshotId,
    pub services: Vec<NativeService>,
}

/// Bonded device list allocated by the stack. Must be handed back through
/// [`RadioStack::free_device_list`].
#[derive(Debug, PartialEq, Eq)]
pub struct DeviceList {
    pub id: u64,
    pub devices: Vec<Address>,
}

/// Inbound callbacks from the radio stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StackEvent {
    SessionStateChanged {
        session: SessionHandle,
        state: u32,
    },
    AdapterStateChanged {
        state: i32,
    },
    BleRegistered {
        status: Status,
    },
    BeaconClientRegistered {
        status: Status,
    },
    GattClientServiceRegistered {
        status: Status,
    },
    ScanStateChanged {
        instance: ScanInstance,
        state: ScanState,
        interval: u32,
        window: u32,
    },
    ScanResult {
        instance: ScanInstance,
        record: ScanRecord,
    },
    ConnectionStateChanged {
        state: ConnectionState,
        gatt_status: GattStatus,
        conn: ConnectionHandle,
        address: Address,
    },
    BondStateChanged {
        status: Status,
        address: Option<Address>,
        state: BondState,
    },
    ServicesDiscovered {
        conn: ConnectionHandle,
        status: Status,
    },
    GattDatabase {
        conn: ConnectionHandle,
        snapshot: Option<GattDbSnapshot>,
    },
    CharacteristicRead {
        conn: ConnectionHandle,
        characteristic: NativeCharacteristic,
        status: Status,
    },
    CharacteristicWritten {
        conn: ConnectionHandle,
        characteristic: NativeCharacteristic,
        status: Status,
    },
    Notification {
        conn: ConnectionHandle,
        characteristic: NativeCharacteristic,
        value: Vec<u8>,
    },
    DescriptorWritten {
        conn: ConnectionHandle,
        characteristic: NativeCharacteristic,
        status: Status,
    },
    DescriptorRead {
        conn: ConnectionHandle,
        characteristic: NativeCharacteristic,
        status: Status,
    },
    ExecuteWrite {
        conn: ConnectionHandle,
        status: Status,
    },
}

/// Receives [`StackEvent`]s on the dispatch thread. Implementations must
/// return quickly and must never wait on anything the caller side holds.
pub trait EventHandler: Send + Sync {
    fn on_event(&self, event: &StackEvent);
}

pub type EventSink = Arc<dyn EventHandler>;

/// Outbound requests to the radio stack, one per public operation.
pub trait RadioStack: Send + Sync + 'static {
    fn init(&self) -> Status;
    fn open_session(&self, sink: EventSink) -> Result<SessionHandle, Status>;
    fn close_session(&self, session: SessionHandle) -> Status;

    fn radio_state(&self) -> Result<i32, Status>;
    fn enable_radio(&self, session: SessionHandle) -> Status;

    fn register_ble(&self, session: SessionHandle) -> Status;
    fn register_gatt_client(&self, session: SessionHandle) -> Status;
    fn deregister_gatt_client(&self, session: SessionHandle) -> Status;
    fn register_beacon_client(&self, session: SessionHandle) -> Status;

    fn start_scan(&self, session: SessionHandle) -> Result<ScanInstance, Status>;
    fn stop_scan(&self, instance: ScanInstance) -> Status;

    fn connect(&self, session: SessionHandle, address: Address) -> Status;
    fn disconnect(&self, conn: ConnectionHandle) -> Status;

    fn pair(&self, address: Address) -> Status;
    fn bonded_devices(&self) -> Result<DeviceList, Status>;
    fn free_device_list(&self, list: DeviceList);

    fn discover_all_services(&self, session: SessionHandle, conn: ConnectionHandle) -> Status;
    fn fetch_gatt_db(&self, conn: ConnectionHandle) -> Status;
    fn clone_gatt_db(&self, snapshot: &GattDbSnapshot) -> Result<GattDbSnapshot, Status>;
    fn release_gatt_db(&self, snapshot: SnapshotId) -> Status;

    fn write_characteristic(
        &self,
        session: SessionHandle,
        conn: ConnectionHandle,
        characteristic: &NativeCharacteristic,
        response: ResponseType,
        data: &[u8],
    ) -> Status;
    fn set_notification(
        &self,
        session: SessionHandle,
        conn: ConnectionHandle,
        characteristic: &NativeCharacteristic,
        enabled: bool,
    ) -> Status;
}

/// The stack stores UUIDs least-significant byte first.
pub fn uuid_from_le(mut bytes: [u8; 16]) -> Uuid {
    bytes.reverse();
    Uuid::from_bytes(bytes)
}

pub fn uuid_to_le(uuid: Uuid) -> [u8; 16] {
    let mut bytes = *uuid.as_bytes();
    bytes.reverse();
    bytes
}
