//! In-process radio stack.
//!
//! Implements [`RadioStack`] with its own dispatch thread fed by a queue, so
//! callbacks always arrive after the request returns and never on the
//! caller's thread. Tests and the demo binary use the knobs (failures,
//! swallowed callbacks, injected events) and counters to drive and observe
//! the bridge.

use crate::domain::address::Address;
use crate::infrastructure::bluetooth::protocol::{self, CameraAction};
use crate::infrastructure::bluetooth::session::lock;
use crate::infrastructure::bluetooth::stack::{
    radio_state, service_type, uuid_to_le, BondState, ConnectionHandle, ConnectionState, DeviceList,
    EventSink, GattDbSnapshot, NativeCharacteristic, NativeDescriptor, NativeService, RadioStack,
    ResponseType, ScanInstance, ScanRecord, ScanState, SessionHandle, SnapshotId, StackEvent,
};
use crate::infrastructure::bluetooth::status::{GattStatus, Status};
use std::collections::{HashMap, HashSet};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, Weak};
use tracing::{debug, trace};
use uuid::Uuid;

/// Outbound requests that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Request {
    Init,
    OpenSession,
    CloseSession,
    RadioState,
    EnableRadio,
    RegisterBle,
    RegisterGattClient,
    RegisterBeacon,
    StartScan,
    StopScan,
    Connect,
    Disconnect,
    Pair,
    BondedDevices,
    DiscoverServices,
    FetchDatabase,
    CloneDatabase,
    Write,
    SetNotification,
}

/// Callbacks that can be swallowed or given a failure status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Callback {
    BleRegistered,
    BeaconRegistered,
    ScanResults,
    Connected,
    Disconnected,
    Bonded,
    ServicesDiscovered,
    GattDatabase,
    CharacteristicWritten,
    DescriptorWritten,
}

/// Maps a write on a peripheral to the notifications it sends back, as
/// `(characteristic, payload)` pairs.
pub type Responder = Arc<dyn Fn(Uuid, &[u8]) -> Vec<(Uuid, Vec<u8>)> + Send + Sync>;

#[derive(Clone)]
pub struct SimPeripheral {
    pub address: Address,
    pub name: Option<String>,
    pub rssi: i8,
    pub tx_power: Option<i8>,
    pub bonded: bool,
    pub services: Vec<NativeService>,
    responder: Option<Responder>,
}

/// One characteristic of a simulated service: uuid, notify flag, write type.
pub type CharacteristicSpec = (Uuid, bool, u8);

impl SimPeripheral {
    pub fn new(address: Address, name: &str) -> Self {
        Self {
            address,
            name: Some(name.to_string()),
            rssi: -60,
            tx_power: None,
            bonded: false,
            services: Vec::new(),
            responder: None,
        }
    }

    pub fn unnamed(address: Address) -> Self {
        Self {
            name: None,
            ..Self::new(address, "")
        }
    }

    pub fn with_rssi(mut self, rssi: i8) -> Self {
        self.rssi = rssi;
        self
    }

    pub fn with_tx_power(mut self, tx_power: i8) -> Self {
        self.tx_power = Some(tx_power);
        self
    }

    pub fn bonded(mut self) -> Self {
        self.bonded = true;
        self
    }

    pub fn with_service(mut self, uuid: Uuid, characteristics: &[CharacteristicSpec]) -> Self {
        let base = (self.services.len() as u16 + 1) * 0x10;
        self.services.push(NativeService {
            uuid_le: uuid_to_le(uuid),
            handle: base,
            service_type: service_type::PRIMARY,
            characteristics: characteristics
                .iter()
                .enumerate()
                .map(|(i, (uuid, notify, write_type))| NativeCharacteristic {
                    uuid_le: uuid_to_le(*uuid),
                    handle: base + 1 + i as u16,
                    descriptor: NativeDescriptor {
                        is_notify: *notify,
                        is_set: false,
                        write_type: *write_type,
                    },
                })
                .collect(),
        });
        self
    }

    pub fn with_responder(mut self, responder: Responder) -> Self {
        self.responder = Some(responder);
        self
    }

    /// A smart ring exposing the command and device information services.
    /// It acknowledges camera commands and answers a blink with a
    /// "take photo" gesture.
    pub fn ring(address: Address, name: &str) -> Self {
        Self::new(address, name)
            .with_tx_power(0)
            .with_service(
                protocol::COMMAND_SERVICE_UUID,
                &[
                    (protocol::COMMAND_WRITE_UUID, false, 2),
                    (protocol::COMMAND_READ_UUID, true, 0),
                ],
            )
            .with_service(
                protocol::DEVICE_INFO_SERVICE_UUID,
                &[
                    (protocol::DEVICE_INFO_HARDWARE_UUID, false, 0),
                    (protocol::DEVICE_INFO_FIRMWARE_UUID, false, 0),
                ],
            )
            .with_responder(Arc::new(|written: Uuid, data: &[u8]| {
                if written != protocol::COMMAND_WRITE_UUID || data.is_empty() {
                    return Vec::new();
                }
                let reply = match data[0] {
                    protocol::CMD_CAMERA => data.to_vec(),
                    protocol::CMD_BLINK_TWICE => protocol::make_camera_packet(CameraAction::TakePhoto).to_vec(),
                    _ => return Vec::new(),
                };
                vec![(protocol::COMMAND_READ_UUID, reply)]
            }))
    }

    fn adv_data(&self) -> Vec<u8> {
        let mut adv = vec![0x02, 0x01, 0x06];
        if let Some(name) = &self.name {
            let bytes = name.as_bytes();
            adv.push(bytes.len() as u8 + 1);
            adv.push(0x09);
            adv.extend_from_slice(bytes);
        }
        if let Some(tx_power) = self.tx_power {
            adv.extend([0x02, 0x0A, tx_power as u8]);
        }
        adv
    }

    fn characteristic(&self, uuid: Uuid) -> Option<&NativeCharacteristic> {
        self.services
            .iter()
            .flat_map(|s| s.characteristics.iter())
            .find(|c| c.uuid() == uuid)
    }
}

/// Request counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimCounters {
    pub init_calls: u32,
    pub sessions_opened: u32,
    pub sessions_closed: u32,
    pub gatt_client_registrations: u32,
    pub gatt_client_deregistrations: u32,
    pub scans_started: u32,
    pub scans_stopped: u32,
    pub device_lists_fetched: u32,
    pub device_lists_freed: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteRecord {
    pub conn: ConnectionHandle,
    pub characteristic: Uuid,
    pub response: ResponseType,
    pub data: Vec<u8>,
}

struct SimState {
    sink: Option<EventSink>,
    session: Option<SessionHandle>,
    next_id: u64,
    radio: i32,
    enable_requested: bool,
    polls_until_enabled: u32,
    peripherals: Vec<SimPeripheral>,
    scan: Option<ScanInstance>,
    advertisement_repeats: usize,
    links: HashMap<ConnectionHandle, Address>,
    last_connection: Option<ConnectionHandle>,
    failures: HashMap<Request, Status>,
    suppressed: HashSet<Callback>,
    callback_status: HashMap<Callback, Status>,
    connect_gatt_status: Option<GattStatus>,
    clone_releases: HashMap<SnapshotId, u32>,
    counters: SimCounters,
    writes: Vec<WriteRecord>,
    notify_enabled: Vec<Uuid>,
}

impl SimState {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn failure(&self, request: Request) -> Option<Status> {
        self.failures.get(&request).copied()
    }

    fn callback_status(&self, callback: Callback) -> Status {
        self.callback_status.get(&callback).copied().unwrap_or(Status::OK)
    }

    fn peripheral(&self, address: Address) -> Option<&SimPeripheral> {
        self.peripherals.iter().find(|p| p.address == address)
    }

    fn peripheral_mut(&mut self, address: Address) -> Option<&mut SimPeripheral> {
        self.peripherals.iter_mut().find(|p| p.address == address)
    }
}

struct SimInner {
    state: Mutex<SimState>,
    queue: Mutex<mpsc::Sender<StackEvent>>,
}

impl SimInner {
    fn emit(&self, state: &SimState, callback: Option<Callback>, event: StackEvent) {
        if let Some(callback) = callback {
            if state.suppressed.contains(&callback) {
                debug!(?callback, "Swallowing simulated callback");
                return;
            }
        }
        trace!(?event, "Queueing simulated callback");
        if lock(&self.queue).send(event).is_err() {
            debug!("Simulated dispatch thread gone");
        }
    }
}

/// Cheap to clone; clones share one simulated radio.
#[derive(Clone)]
pub struct SimulatedStack {
    inner: Arc<SimInner>,
}

impl Default for SimulatedStack {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedStack {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel::<StackEvent>();
        let inner = Arc::new(SimInner {
            state: Mutex::new(SimState {
                sink: None,
                session: None,
                next_id: 0,
                radio: radio_state::ENABLED,
                enable_requested: false,
                polls_until_enabled: 0,
                peripherals: Vec::new(),
                scan: None,
                advertisement_repeats: 2,
                links: HashMap::new(),
                last_connection: None,
                failures: HashMap::new(),
                suppressed: HashSet::new(),
                callback_status: HashMap::new(),
                connect_gatt_status: None,
                clone_releases: HashMap::new(),
                counters: SimCounters::default(),
                writes: Vec::new(),
                notify_enabled: Vec::new(),
            }),
            queue: Mutex::new(tx),
        });

        let weak: Weak<SimInner> = Arc::downgrade(&inner);
        std::thread::spawn(move || {
            while let Ok(event) = rx.recv() {
                let Some(inner) = weak.upgrade() else { break };
                let sink = lock(&inner.state).sink.clone();
                drop(inner);
                if let Some(sink) = sink {
                    sink.on_event(&event);
                }
            }
        });

        Self { inner }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, SimState> {
        lock(&self.inner.state)
    }

    // Knobs

    pub fn add_peripheral(&self, peripheral: SimPeripheral) {
        self.state().peripherals.push(peripheral);
    }

    /// Start with the radio off. After an enable request it needs `polls`
    /// state queries before it reports enabled.
    pub fn set_radio_disabled_for(&self, polls: u32) {
        let mut st = self.state();
        st.radio = radio_state::DISABLED;
        st.enable_requested = false;
        st.polls_until_enabled = polls;
    }

    pub fn fail_request(&self, request: Request, status: Status) {
        self.state().failures.insert(request, status);
    }

    pub fn clear_failure(&self, request: Request) {
        self.state().failures.remove(&request);
    }

    pub fn suppress(&self, callback: Callback) {
        self.state().suppressed.insert(callback);
    }

    pub fn unsuppress(&self, callback: Callback) {
        self.state().suppressed.remove(&callback);
    }

    /// Status carried by future callbacks of this kind.
    pub fn set_callback_status(&self, callback: Callback, status: Status) {
        self.state().callback_status.insert(callback, status);
    }

    /// Link-layer status for future connection attempts; `None` for success.
    pub fn set_connect_gatt_status(&self, status: Option<GattStatus>) {
        self.state().connect_gatt_status = status;
    }

    pub fn set_advertisement_repeats(&self, repeats: usize) {
        self.state().advertisement_repeats = repeats;
    }

    /// Queue an arbitrary event, e.g. a late or stale callback.
    pub fn inject(&self, event: StackEvent) {
        let st = self.state();
        self.inner.emit(&st, None, event);
    }

    /// Push a notification from the peripheral behind `conn`.
    pub fn notify(&self, conn: ConnectionHandle, characteristic: Uuid, value: &[u8]) {
        let st = self.state();
        let native = st
            .links
            .get(&conn)
            .and_then(|address| st.peripheral(*address))
            .and_then(|p| p.characteristic(characteristic).cloned())
            .unwrap_or_else(|| NativeCharacteristic {
                uuid_le: uuid_to_le(characteristic),
                handle: 0,
                descriptor: NativeDescriptor::default(),
            });
        self.inner.emit(
            &st,
            None,
            StackEvent::Notification {
                conn,
                characteristic: native,
                value: value.to_vec(),
            },
        );
    }

    /// Drop the link from the peripheral side.
    pub fn drop_link(&self, conn: ConnectionHandle) {
        let mut st = self.state();
        if let Some(address) = st.links.remove(&conn) {
            self.inner.emit(
                &st,
                None,
                StackEvent::ConnectionStateChanged {
                    state: ConnectionState::Disconnected,
                    gatt_status: GattStatus::SUCCESS,
                    conn,
                    address,
                },
            );
        }
    }

    // Observations

    pub fn counters(&self) -> SimCounters {
        self.state().counters.clone()
    }

    pub fn init_calls(&self) -> u32 {
        self.state().counters.init_calls
    }

    pub fn sessions_opened(&self) -> u32 {
        self.state().counters.sessions_opened
    }

    pub fn sessions_closed(&self) -> u32 {
        self.state().counters.sessions_closed
    }

    /// Cloned databases not yet released.
    pub fn live_clones(&self) -> usize {
        self.state().clone_releases.values().filter(|n| **n == 0).count()
    }

    pub fn clones_made(&self) -> usize {
        self.state().clone_releases.len()
    }

    pub fn release_count(&self, snapshot: SnapshotId) -> u32 {
        self.state().clone_releases.get(&snapshot).copied().unwrap_or(0)
    }

    pub fn total_releases(&self) -> u32 {
        self.state().clone_releases.values().sum()
    }

    pub fn writes(&self) -> Vec<WriteRecord> {
        self.state().writes.clone()
    }

    pub fn notify_enabled(&self) -> Vec<Uuid> {
        self.state().notify_enabled.clone()
    }

    pub fn last_connection(&self) -> Option<ConnectionHandle> {
        self.state().last_connection
    }

    pub fn is_scanning(&self) -> bool {
        self.state().scan.is_some()
    }

    pub fn is_bonded(&self, address: Address) -> bool {
        self.state().peripheral(address).is_some_and(|p| p.bonded)
    }
}

impl RadioStack for SimulatedStack {
    fn init(&self) -> Status {
        let mut st = self.state();
        st.counters.init_calls += 1;
        st.failure(Request::Init).unwrap_or(Status::OK)
    }

    fn open_session(&self, sink: EventSink) -> Result<SessionHandle, Status> {
        let mut st = self.state();
        if let Some(status) = st.failure(Request::OpenSession) {
            return Err(status);
        }
        let session = SessionHandle(st.next_id());
        st.session = Some(session);
        st.sink = Some(sink);
        st.counters.sessions_opened += 1;
        self.inner
            .emit(&st, None, StackEvent::SessionStateChanged { session, state: 1 });
        Ok(session)
    }

    fn close_session(&self, session: SessionHandle) -> Status {
        let mut st = self.state();
        st.counters.sessions_closed += 1;
        if let Some(status) = st.failure(Request::CloseSession) {
            return status;
        }
        if st.session != Some(session) {
            return Status::BAD_PARAM;
        }
        st.session = None;
        st.sink = None;
        st.scan = None;
        st.links.clear();
        Status::OK
    }

    fn radio_state(&self) -> Result<i32, Status> {
        let mut st = self.state();
        if let Some(status) = st.failure(Request::RadioState) {
            return Err(status);
        }
        if st.radio != radio_state::ENABLED && st.enable_requested {
            if st.polls_until_enabled == 0 {
                st.radio = radio_state::ENABLED;
            } else {
                st.polls_until_enabled -= 1;
                st.radio = radio_state::ENABLING;
            }
        }
        Ok(st.radio)
    }

    fn enable_radio(&self, _session: SessionHandle) -> Status {
        let mut st = self.state();
        if let Some(status) = st.failure(Request::EnableRadio) {
            return status;
        }
        st.enable_requested = true;
        self.inner.emit(
            &st,
            None,
            StackEvent::AdapterStateChanged {
                state: radio_state::ENABLING,
            },
        );
        Status::OK
    }

    fn register_ble(&self, _session: SessionHandle) -> Status {
        let st = self.state();
        if let Some(status) = st.failure(Request::RegisterBle) {
            return status;
        }
        let status = st.callback_status(Callback::BleRegistered);
        self.inner
            .emit(&st, Some(Callback::BleRegistered), StackEvent::BleRegistered { status });
        Status::OK
    }

    fn register_gatt_client(&self, _session: SessionHandle) -> Status {
        let mut st = self.state();
        if let Some(status) = st.failure(Request::RegisterGattClient) {
            return status;
        }
        st.counters.gatt_client_registrations += 1;
        self.inner.emit(
            &st,
            None,
            StackEvent::GattClientServiceRegistered { status: Status::OK },
        );
        Status::OK
    }

    fn deregister_gatt_client(&self, _session: SessionHandle) -> Status {
        self.state().counters.gatt_client_deregistrations += 1;
        Status::OK
    }

    fn register_beacon_client(&self, _session: SessionHandle) -> Status {
        let st = self.state();
        if let Some(status) = st.failure(Request::RegisterBeacon) {
            return status;
        }
        let status = st.callback_status(Callback::BeaconRegistered);
        self.inner.emit(
            &st,
            Some(Callback::BeaconRegistered),
            StackEvent::BeaconClientRegistered { status },
        );
        Status::OK
    }

    fn start_scan(&self, _session: SessionHandle) -> Result<ScanInstance, Status> {
        let mut st = self.state();
        if let Some(status) = st.failure(Request::StartScan) {
            return Err(status);
        }
        let instance = ScanInstance(st.next_id());
        st.scan = Some(instance);
        st.counters.scans_started += 1;

        self.inner.emit(
            &st,
            None,
            StackEvent::ScanStateChanged {
                instance,
                state: ScanState::Started,
                interval: 96,
                window: 48,
            },
        );
        for _ in 0..st.advertisement_repeats {
            for peripheral in &st.peripherals {
                let record = ScanRecord {
                    address: peripheral.address,
                    rssi: peripheral.rssi,
                    adv_data: peripheral.adv_data(),
                };
                self.inner
                    .emit(&st, Some(Callback::ScanResults), StackEvent::ScanResult { instance, record });
            }
        }
        Ok(instance)
    }

    fn stop_scan(&self, instance: ScanInstance) -> Status {
        let mut st = self.state();
        if let Some(status) = st.failure(Request::StopScan) {
            return status;
        }
        if st.scan != Some(instance) {
            return Status::BAD_PARAM;
        }
        st.scan = None;
        st.counters.scans_stopped += 1;
        self.inner.emit(
            &st,
            None,
            StackEvent::ScanStateChanged {
                instance,
                state: ScanState::Stopped,
                interval: 0,
                window: 0,
            },
        );
        Status::OK
    }

    fn connect(&self, _session: SessionHandle, address: Address) -> Status {
        let mut st = self.state();
        if let Some(status) = st.failure(Request::Connect) {
            return status;
        }
        let conn = ConnectionHandle(st.next_id());
        st.last_connection = Some(conn);

        let gatt_status = match (st.peripheral(address), st.connect_gatt_status) {
            (None, _) => GattStatus::CONN_TIMEOUT,
            (Some(_), Some(status)) => status,
            (Some(_), None) => GattStatus::SUCCESS,
        };
        let state = if gatt_status.is_success() {
            st.links.insert(conn, address);
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected
        };

        self.inner.emit(
            &st,
            Some(Callback::Connected),
            StackEvent::ConnectionStateChanged {
                state,
                gatt_status,
                conn,
                address,
            },
        );
        Status::OK
    }

    fn disconnect(&self, conn: ConnectionHandle) -> Status {
        let mut st = self.state();
        if let Some(status) = st.failure(Request::Disconnect) {
            return status;
        }
        let Some(address) = st.links.remove(&conn) else {
            return Status::BAD_PARAM;
        };
        self.inner.emit(
            &st,
            Some(Callback::Disconnected),
            StackEvent::ConnectionStateChanged {
                state: ConnectionState::Disconnected,
                gatt_status: GattStatus::SUCCESS,
                conn,
                address,
            },
        );
        Status::OK
    }

    fn pair(&self, address: Address) -> Status {
        let mut st = self.state();
        if let Some(status) = st.failure(Request::Pair) {
            return status;
        }
        let status = st.callback_status(Callback::Bonded);
        match st.peripheral_mut(address) {
            None => return Status::BAD_PARAM,
            Some(p) if p.bonded => return Status::DONE,
            Some(p) => p.bonded = status.is_ok(),
        }

        self.inner.emit(
            &st,
            None,
            StackEvent::BondStateChanged {
                status: Status::OK,
                address: Some(address),
                state: BondState::Bonding,
            },
        );
        let state = if status.is_ok() { BondState::Bonded } else { BondState::None };
        self.inner.emit(
            &st,
            Some(Callback::Bonded),
            StackEvent::BondStateChanged {
                status,
                address: Some(address),
                state,
            },
        );
        Status::OK
    }

    fn bonded_devices(&self) -> Result<DeviceList, Status> {
        let mut st = self.state();
        if let Some(status) = st.failure(Request::BondedDevices) {
            return Err(status);
        }
        st.counters.device_lists_fetched += 1;
        let devices = st.peripherals.iter().filter(|p| p.bonded).map(|p| p.address).collect();
        Ok(DeviceList {
            id: st.next_id(),
            devices,
        })
    }

    fn free_device_list(&self, _list: DeviceList) {
        self.state().counters.device_lists_freed += 1;
    }

    fn discover_all_services(&self, _session: SessionHandle, conn: ConnectionHandle) -> Status {
        let st = self.state();
        if let Some(status) = st.failure(Request::DiscoverServices) {
            return status;
        }
        if !st.links.contains_key(&conn) {
            return Status::BAD_PARAM;
        }
        let status = st.callback_status(Callback::ServicesDiscovered);
        self.inner.emit(
            &st,
            Some(Callback::ServicesDiscovered),
            StackEvent::ServicesDiscovered { conn, status },
        );
        Status::OK
    }

    fn fetch_gatt_db(&self, conn: ConnectionHandle) -> Status {
        let mut st = self.state();
        if let Some(status) = st.failure(Request::FetchDatabase) {
            return status;
        }
        let Some(address) = st.links.get(&conn).copied() else {
            return Status::BAD_PARAM;
        };
        let services = st.peripheral(address).map(|p| p.services.clone()).unwrap_or_default();
        let snapshot = (!services.is_empty()).then(|| GattDbSnapshot {
            id: SnapshotId(st.next_id()),
            services,
        });
        self.inner.emit(
            &st,
            Some(Callback::GattDatabase),
            StackEvent::GattDatabase { conn, snapshot },
        );
        Status::OK
    }

    fn clone_gatt_db(&self, snapshot: &GattDbSnapshot) -> Result<GattDbSnapshot, Status> {
        let mut st = self.state();
        if let Some(status) = st.failure(Request::CloneDatabase) {
            return Err(status);
        }
        let id = SnapshotId(st.next_id());
        st.clone_releases.insert(id, 0);
        Ok(GattDbSnapshot {
            id,
            services: snapshot.services.clone(),
        })
    }

    fn release_gatt_db(&self, snapshot: SnapshotId) -> Status {
        let mut st = self.state();
        match st.clone_releases.get_mut(&snapshot) {
            Some(count) => {
                *count += 1;
                if *count > 1 {
                    Status::BAD_PARAM
                } else {
                    Status::OK
                }
            }
            None => Status::BAD_PARAM,
        }
    }

    fn write_characteristic(
        &self,
        _session: SessionHandle,
        conn: ConnectionHandle,
        characteristic: &NativeCharacteristic,
        response: ResponseType,
        data: &[u8],
    ) -> Status {
        let mut st = self.state();
        if let Some(status) = st.failure(Request::Write) {
            return status;
        }
        let Some(address) = st.links.get(&conn).copied() else {
            return Status::BAD_PARAM;
        };
        st.writes.push(WriteRecord {
            conn,
            characteristic: characteristic.uuid(),
            response,
            data: data.to_vec(),
        });

        let status = st.callback_status(Callback::CharacteristicWritten);
        self.inner.emit(
            &st,
            Some(Callback::CharacteristicWritten),
            StackEvent::CharacteristicWritten {
                conn,
                characteristic: characteristic.clone(),
                status,
            },
        );

        let replies = match st.peripheral(address) {
            Some(p) => match &p.responder {
                Some(responder) => responder(characteristic.uuid(), data)
                    .into_iter()
                    .filter_map(|(uuid, value)| p.characteristic(uuid).cloned().map(|c| (c, value)))
                    .collect(),
                None => Vec::new(),
            },
            None => Vec::new(),
        };
        for (native, value) in replies {
            self.inner.emit(
                &st,
                None,
                StackEvent::Notification {
                    conn,
                    characteristic: native,
                    value,
                },
            );
        }
        Status::OK
    }

    fn set_notification(
        &self,
        _session: SessionHandle,
        conn: ConnectionHandle,
        characteristic: &NativeCharacteristic,
        enabled: bool,
    ) -> Status {
        let mut st = self.state();
        if let Some(status) = st.failure(Request::SetNotification) {
            return status;
        }
        if !st.links.contains_key(&conn) {
            return Status::BAD_PARAM;
        }
        let uuid = characteristic.uuid();
        if enabled {
            st.notify_enabled.push(uuid);
        } else {
            st.notify_enabled.retain(|u| *u != uuid);
        }

        let status = st.callback_status(Callback::DescriptorWritten);
        self.inner.emit(
            &st,
            Some(Callback::DescriptorWritten),
            StackEvent::DescriptorWritten {
                conn,
                characteristic: characteristic.clone(),
                status,
            },
        );
        Status::OK
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::bluetooth::stack::EventHandler;
    use std::time::Duration;

    struct Collect(Mutex<mpsc::Sender<StackEvent>>);

    impl EventHandler for Collect {
        fn on_event(&self, event: &StackEvent) {
            let _ = self.0.lock().unwrap().send(event.clone());
        }
    }

    fn open(sim: &SimulatedStack) -> (SessionHandle, mpsc::Receiver<StackEvent>) {
        let (tx, rx) = mpsc::channel();
        let session = sim.open_session(Arc::new(Collect(Mutex::new(tx)))).unwrap();
        (session, rx)
    }

    fn next(rx: &mpsc::Receiver<StackEvent>) -> StackEvent {
        rx.recv_timeout(Duration::from_secs(2)).unwrap()
    }

    #[test]
    fn callbacks_arrive_on_dispatch_thread_in_order() {
        let sim = SimulatedStack::new();
        let (session, rx) = open(&sim);
        assert!(matches!(next(&rx), StackEvent::SessionStateChanged { .. }));

        assert_eq!(sim.register_ble(session), Status::OK);
        assert_eq!(sim.register_beacon_client(session), Status::OK);
        assert_eq!(next(&rx), StackEvent::BleRegistered { status: Status::OK });
        assert_eq!(next(&rx), StackEvent::BeaconClientRegistered { status: Status::OK });
    }

    #[test]
    fn suppressed_callbacks_are_swallowed() {
        let sim = SimulatedStack::new();
        let (session, rx) = open(&sim);
        let _ = next(&rx);

        sim.suppress(Callback::BleRegistered);
        assert_eq!(sim.register_ble(session), Status::OK);
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
    }

    #[test]
    fn ring_advertises_name_and_tx_power() {
        let sim = SimulatedStack::new();
        let address = Address::new([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]);
        sim.add_peripheral(SimPeripheral::ring(address, "R02-ABCD").with_rssi(-40));
        sim.set_advertisement_repeats(1);
        let (session, rx) = open(&sim);
        let _ = next(&rx);

        sim.start_scan(session).unwrap();
        assert!(matches!(next(&rx), StackEvent::ScanStateChanged { state: ScanState::Started, .. }));
        match next(&rx) {
            StackEvent::ScanResult { record, .. } => {
                assert_eq!(record.address, address);
                assert_eq!(record.rssi, -40);
                let name_at = record.adv_data.windows(8).position(|w| w == b"R02-ABCD");
                assert!(name_at.is_some());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn double_release_is_reported() {
        let sim = SimulatedStack::new();
        let original = GattDbSnapshot {
            id: SnapshotId(999),
            services: Vec::new(),
        };
        let clone = sim.clone_gatt_db(&original).unwrap();
        assert_eq!(sim.live_clones(), 1);

        assert_eq!(sim.release_gatt_db(clone.id), Status::OK);
        assert_eq!(sim.release_gatt_db(clone.id), Status::BAD_PARAM);
        assert_eq!(sim.release_count(clone.id), 2);
        assert_eq!(sim.live_clones(), 0);
    }

    #[test]
    fn radio_needs_enable_request_and_polls() {
        let sim = SimulatedStack::new();
        sim.set_radio_disabled_for(1);
        assert_eq!(sim.radio_state(), Ok(radio_state::DISABLED));

        sim.enable_radio(SessionHandle(1));
        assert_eq!(sim.radio_state(), Ok(radio_state::ENABLING));
        assert_eq!(sim.radio_state(), Ok(radio_state::ENABLED));
    }
}
