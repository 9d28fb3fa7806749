//! Completion bridge: turns stack callbacks into awaitable results.
//!
//! A caller registers interest in one [`OperationKind`] with
//! [`CompletionBridge::begin_operation`], issues the native request, then
//! awaits the returned [`Waiter`]. The dispatch thread calls
//! [`CompletionBridge::complete`] when the matching callback arrives.
//!
//! Each kind has at most one outstanding waiter. Slots carry a ticket so a
//! waiter that gave up (timeout, error, cancellation) only ever removes its
//! own slot; a completion that finds no matching slot is dropped.

use crate::domain::address::Address;
use crate::error::{Error, Result};
use crate::infrastructure::bluetooth::gatt::GattCatalog;
use crate::infrastructure::bluetooth::stack::ConnectionHandle;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    BleRegistration,
    BeaconRegistration,
    Connect,
    Pair,
    ServiceDiscovery,
    DatabaseFetch,
    Disconnect,
    CharacteristicWrite,
    DescriptorWrite,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OperationKind::BleRegistration => "BLE registration",
            OperationKind::BeaconRegistration => "beacon client registration",
            OperationKind::Connect => "connect",
            OperationKind::Pair => "pairing",
            OperationKind::ServiceDiscovery => "service discovery",
            OperationKind::DatabaseFetch => "GATT database fetch",
            OperationKind::Disconnect => "disconnect",
            OperationKind::CharacteristicWrite => "characteristic write",
            OperationKind::DescriptorWrite => "descriptor write",
        };
        f.write_str(name)
    }
}

/// What a waiter is waiting for, beyond its kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Correlation {
    Any,
    Address(Address),
    Connection(ConnectionHandle),
}

impl Correlation {
    fn matches(&self, other: &Correlation) -> bool {
        match (self, other) {
            (Correlation::Any, _) | (_, Correlation::Any) => true,
            (a, b) => a == b,
        }
    }
}

/// Payloads delivered through the session's bridge.
#[derive(Debug)]
pub enum Completion {
    Done,
    Connected(ConnectionHandle),
    Database(Option<GattCatalog>),
}

impl Completion {
    pub(crate) fn into_connection(self) -> Result<ConnectionHandle> {
        match self {
            Completion::Connected(handle) => Ok(handle),
            other => {
                warn!(completion = ?other, "Unexpected payload for connect");
                Err(Error::Abandoned(OperationKind::Connect))
            }
        }
    }

    pub(crate) fn into_catalog(self) -> Result<Option<GattCatalog>> {
        match self {
            Completion::Database(catalog) => Ok(catalog),
            other => {
                warn!(completion = ?other, "Unexpected payload for database fetch");
                Err(Error::Abandoned(OperationKind::DatabaseFetch))
            }
        }
    }
}

struct Slot<T> {
    ticket: u64,
    correlation: Correlation,
    tx: oneshot::Sender<Result<T>>,
}

struct Table<T> {
    slots: HashMap<OperationKind, Slot<T>>,
    next_ticket: u64,
}

type SharedTable<T> = Arc<Mutex<Table<T>>>;

fn lock<T>(table: &Mutex<Table<T>>) -> MutexGuard<'_, Table<T>> {
    table.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct CompletionBridge<T> {
    table: SharedTable<T>,
}

impl<T> Clone for CompletionBridge<T> {
    fn clone(&self) -> Self {
        Self {
            table: Arc::clone(&self.table),
        }
    }
}

impl<T: Send> Default for CompletionBridge<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send> CompletionBridge<T> {
    pub fn new() -> Self {
        Self {
            table: Arc::new(Mutex::new(Table {
                slots: HashMap::new(),
                next_ticket: 1,
            })),
        }
    }

    /// Registers a waiter before the native request is issued, so a fast
    /// callback cannot slip past it.
    pub fn begin_operation(&self, kind: OperationKind, correlation: Correlation) -> Result<Waiter<T>> {
        let mut table = lock(&self.table);
        if let Some(existing) = table.slots.get(&kind) {
            if !existing.tx.is_closed() {
                return Err(Error::OperationPending(kind));
            }
        }

        let ticket = table.next_ticket;
        table.next_ticket += 1;

        let (tx, rx) = oneshot::channel();
        table.slots.insert(
            kind,
            Slot {
                ticket,
                correlation,
                tx,
            },
        );
        debug!(kind = ?kind, ticket, correlation = ?correlation, "Waiter registered");

        Ok(Waiter {
            kind,
            ticket,
            rx,
            table: Arc::clone(&self.table),
        })
    }

    /// Delivers a result to the waiter of `kind`, if one is registered and
    /// its correlation matches. Returns whether a waiter received it.
    ///
    /// Safe to call from the dispatch thread: never awaits, never blocks
    /// beyond the table lock.
    pub fn complete(&self, kind: OperationKind, correlation: Correlation, result: Result<T>) -> bool {
        let slot = {
            let mut table = lock(&self.table);
            match table.slots.get(&kind) {
                Some(slot) if slot.correlation.matches(&correlation) => table.slots.remove(&kind),
                Some(slot) => {
                    warn!(
                        kind = ?kind,
                        expected = ?slot.correlation,
                        received = ?correlation,
                        "Discarding completion for a different target"
                    );
                    None
                }
                None => {
                    warn!(kind = ?kind, correlation = ?correlation, "Discarding completion with no waiter");
                    None
                }
            }
        };

        match slot {
            Some(slot) => {
                if slot.tx.send(result).is_err() {
                    warn!(kind = ?kind, ticket = slot.ticket, "Waiter went away before completion");
                    false
                } else {
                    true
                }
            }
            None => false,
        }
    }

    pub fn is_pending(&self, kind: OperationKind) -> bool {
        lock(&self.table).slots.contains_key(&kind)
    }

    /// Drops every outstanding slot; their waiters resolve to `Abandoned`.
    pub fn abandon_all(&self) {
        let drained: Vec<_> = lock(&self.table).slots.drain().collect();
        for (kind, _slot) in drained {
            debug!(kind = ?kind, "Abandoning outstanding waiter");
        }
    }
}

/// The caller's half of one registered operation.
pub struct Waiter<T> {
    kind: OperationKind,
    ticket: u64,
    rx: oneshot::Receiver<Result<T>>,
    table: SharedTable<T>,
}

impl<T> Waiter<T> {
    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    pub async fn wait(mut self, timeout: Duration) -> Result<T> {
        match tokio::time::timeout(timeout, &mut self.rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::Abandoned(self.kind)),
            Err(_) => {
                warn!(kind = ?self.kind, ?timeout, "Timed out waiting for completion");
                Err(Error::Timeout(self.kind))
            }
        }
    }
}

impl<T> Drop for Waiter<T> {
    fn drop(&mut self) {
        let mut table = lock(&self.table);
        if table.slots.get(&self.kind).map(|slot| slot.ticket) == Some(self.ticket) {
            table.slots.remove(&self.kind);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::bluetooth::status::Status;

    fn addr(last: u8) -> Address {
        Address::new([0xaa, 0xbb, 0xcc, 0xdd, 0xee, last])
    }

    #[tokio::test]
    async fn completion_after_begin_is_delivered() {
        let bridge = CompletionBridge::<u32>::new();
        let waiter = bridge
            .begin_operation(OperationKind::Connect, Correlation::Address(addr(1)))
            .unwrap();

        assert!(bridge.complete(OperationKind::Connect, Correlation::Address(addr(1)), Ok(7)));
        assert_eq!(waiter.wait(Duration::from_secs(1)).await.unwrap(), 7);
        assert!(!bridge.is_pending(OperationKind::Connect));
    }

    #[tokio::test]
    async fn second_completion_is_discarded() {
        let bridge = CompletionBridge::<u32>::new();
        let waiter = bridge.begin_operation(OperationKind::Pair, Correlation::Any).unwrap();

        assert!(bridge.complete(OperationKind::Pair, Correlation::Any, Ok(1)));
        assert!(!bridge.complete(OperationKind::Pair, Correlation::Any, Ok(2)));
        assert_eq!(waiter.wait(Duration::from_secs(1)).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn delivered_error_is_returned_as_is() {
        let bridge = CompletionBridge::<u32>::new();
        let waiter = bridge
            .begin_operation(OperationKind::CharacteristicWrite, Correlation::Any)
            .unwrap();
        let err = crate::infrastructure::bluetooth::status::check(Status::BUSY).unwrap_err();

        bridge.complete(OperationKind::CharacteristicWrite, Correlation::Any, Err(err.clone()));
        assert_eq!(waiter.wait(Duration::from_secs(1)).await.unwrap_err(), err);
    }

    #[tokio::test]
    async fn same_kind_cannot_be_registered_twice() {
        let bridge = CompletionBridge::<u32>::new();
        let _first = bridge.begin_operation(OperationKind::Connect, Correlation::Any).unwrap();

        match bridge.begin_operation(OperationKind::Connect, Correlation::Any) {
            Err(Error::OperationPending(OperationKind::Connect)) => {}
            other => panic!("expected OperationPending, got {:?}", other.map(|w| w.kind())),
        }
        assert!(bridge.begin_operation(OperationKind::Pair, Correlation::Any).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_clears_slot_and_late_completion_is_dropped() {
        let bridge = CompletionBridge::<u32>::new();
        let waiter = bridge
            .begin_operation(OperationKind::DatabaseFetch, Correlation::Any)
            .unwrap();

        let err = waiter.wait(Duration::from_millis(50)).await.unwrap_err();
        assert_eq!(err, Error::Timeout(OperationKind::DatabaseFetch));
        assert!(!bridge.is_pending(OperationKind::DatabaseFetch));

        assert!(!bridge.complete(OperationKind::DatabaseFetch, Correlation::Any, Ok(9)));
    }

    #[tokio::test]
    async fn late_completion_does_not_reach_a_newer_waiter_for_another_target() {
        let bridge = CompletionBridge::<u32>::new();
        let stale = bridge
            .begin_operation(OperationKind::Connect, Correlation::Address(addr(1)))
            .unwrap();
        drop(stale);

        let fresh = bridge
            .begin_operation(OperationKind::Connect, Correlation::Address(addr(2)))
            .unwrap();

        assert!(!bridge.complete(OperationKind::Connect, Correlation::Address(addr(1)), Ok(1)));
        assert!(bridge.is_pending(OperationKind::Connect));

        assert!(bridge.complete(OperationKind::Connect, Correlation::Address(addr(2)), Ok(2)));
        assert_eq!(fresh.wait(Duration::from_secs(1)).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn stale_waiter_drop_keeps_newer_slot() {
        let bridge = CompletionBridge::<u32>::new();
        let first = bridge.begin_operation(OperationKind::Disconnect, Correlation::Any).unwrap();

        // Deliver to the first waiter but keep it alive, then register again.
        bridge.complete(OperationKind::Disconnect, Correlation::Any, Ok(1));
        let second = bridge.begin_operation(OperationKind::Disconnect, Correlation::Any).unwrap();
        drop(first);

        assert!(bridge.is_pending(OperationKind::Disconnect));
        bridge.complete(OperationKind::Disconnect, Correlation::Any, Ok(2));
        assert_eq!(second.wait(Duration::from_secs(1)).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn completion_from_another_thread_wakes_waiter() {
        let bridge = CompletionBridge::<u32>::new();
        let waiter = bridge
            .begin_operation(OperationKind::ServiceDiscovery, Correlation::Any)
            .unwrap();

        let remote = bridge.clone();
        let handle = std::thread::spawn(move || {
            remote.complete(OperationKind::ServiceDiscovery, Correlation::Any, Ok(3))
        });

        assert_eq!(waiter.wait(Duration::from_secs(2)).await.unwrap(), 3);
        assert!(handle.join().unwrap());
    }

    #[tokio::test]
    async fn abandon_all_resolves_waiters() {
        let bridge = CompletionBridge::<u32>::new();
        let waiter = bridge.begin_operation(OperationKind::Pair, Correlation::Any).unwrap();

        bridge.abandon_all();
        assert_eq!(
            waiter.wait(Duration::from_secs(1)).await.unwrap_err(),
            Error::Abandoned(OperationKind::Pair)
        );
    }
}
