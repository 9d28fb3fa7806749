//! Routes stack callbacks to the component that owns them.
//!
//! Runs on the stack's dispatch thread: handlers copy what they need out of
//! the event, complete a waiter or push a notification, and return.

use crate::domain::models::RadioState;
use crate::infrastructure::bluetooth::completion::{Completion, Correlation, OperationKind};
use crate::infrastructure::bluetooth::session::SessionCore;
use crate::infrastructure::bluetooth::stack::{EventHandler, StackEvent};
use crate::infrastructure::bluetooth::status::{self, Status};
use std::sync::Weak;
use tracing::{debug, error, info};

pub(crate) struct Dispatcher {
    core: Weak<SessionCore>,
}

impl Dispatcher {
    pub(crate) fn new(core: Weak<SessionCore>) -> Self {
        Self { core }
    }
}

fn done(status: Status) -> crate::error::Result<Completion> {
    status::check(status).map(|()| Completion::Done)
}

impl EventHandler for Dispatcher {
    fn on_event(&self, event: &StackEvent) {
        let Some(core) = self.core.upgrade() else {
            debug!("Session gone, dropping stack event");
            return;
        };

        match event {
            StackEvent::SessionStateChanged { session, state } => {
                debug!(session = session.0, state, "Session state changed");
            }
            StackEvent::AdapterStateChanged { state } => match RadioState::from_raw(*state) {
                Some(radio) => info!(?radio, "Radio state changed"),
                None => debug!(state, "Radio reported an unknown state"),
            },
            StackEvent::BleRegistered { status } => {
                debug!(%status, "BLE registration callback");
                core.bridge
                    .complete(OperationKind::BleRegistration, Correlation::Any, done(*status));
            }
            StackEvent::BeaconClientRegistered { status } => {
                debug!(%status, "Beacon client registration callback");
                core.bridge
                    .complete(OperationKind::BeaconRegistration, Correlation::Any, done(*status));
            }
            StackEvent::GattClientServiceRegistered { status } => {
                if status.is_ok() {
                    info!("GATT client service registered");
                } else {
                    error!(%status, "GATT client service registration failed");
                }
            }
            StackEvent::ScanStateChanged {
                instance,
                state,
                interval,
                window,
            } => core.scanner.on_state_changed(*instance, *state, *interval, *window),
            StackEvent::ScanResult { instance, record } => core.scanner.deliver(*instance, record),
            StackEvent::ConnectionStateChanged {
                state,
                gatt_status,
                conn,
                address,
            } => core.on_connection_state(*state, *gatt_status, *conn, *address),
            StackEvent::BondStateChanged { status, address, state } => {
                core.on_bond_state(*status, *address, *state)
            }
            StackEvent::ServicesDiscovered { conn, status } => {
                debug!(%conn, %status, "Services discovered callback");
                core.bridge.complete(
                    OperationKind::ServiceDiscovery,
                    Correlation::Connection(*conn),
                    done(*status),
                );
            }
            StackEvent::GattDatabase { conn, snapshot } => core.on_gatt_database(*conn, snapshot.as_ref()),
            StackEvent::CharacteristicRead {
                conn,
                characteristic,
                status,
            } => {
                debug!(%conn, uuid = %characteristic.uuid(), %status, "Characteristic read callback");
            }
            StackEvent::CharacteristicWritten {
                conn,
                characteristic,
                status,
            } => {
                debug!(%conn, uuid = %characteristic.uuid(), %status, "Characteristic write callback");
                core.bridge.complete(
                    OperationKind::CharacteristicWrite,
                    Correlation::Connection(*conn),
                    done(*status),
                );
            }
            StackEvent::Notification {
                conn,
                characteristic,
                value,
            } => core.on_notification(*conn, characteristic, value),
            StackEvent::DescriptorWritten {
                conn,
                characteristic,
                status,
            } => {
                debug!(%conn, uuid = %characteristic.uuid(), %status, "Descriptor write callback");
                core.bridge.complete(
                    OperationKind::DescriptorWrite,
                    Correlation::Connection(*conn),
                    done(*status),
                );
            }
            StackEvent::DescriptorRead {
                conn,
                characteristic,
                status,
            } => {
                debug!(%conn, uuid = %characteristic.uuid(), %status, "Descriptor read callback");
            }
            StackEvent::ExecuteWrite { conn, status } => {
                debug!(%conn, %status, "Execute write callback");
            }
        }
    }
}
