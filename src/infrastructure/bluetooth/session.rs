//! Session lifecycle: one-time bring-up, cleanup registry and close.
//!
//! [`SessionCore`] is the state shared by the public adapter and the
//! dispatcher. The dispatcher only holds a weak reference, so dropping the
//! last adapter handle tears everything down even if the stack keeps its
//! event sink around.

use crate::domain::models::RadioState;
use crate::domain::settings::Settings;
use crate::error::{Error, Result};
use crate::infrastructure::bluetooth::characteristic::NotificationHub;
use crate::infrastructure::bluetooth::completion::{Completion, CompletionBridge, Correlation, OperationKind};
use crate::infrastructure::bluetooth::connection::ConnectionManager;
use crate::infrastructure::bluetooth::dispatch::Dispatcher;
use crate::infrastructure::bluetooth::gatt::ReleaseOnce;
use crate::infrastructure::bluetooth::scanner::ScanController;
use crate::infrastructure::bluetooth::service::BleAdapter;
use crate::infrastructure::bluetooth::stack::{EventSink, RadioStack, SessionHandle};
use crate::infrastructure::bluetooth::status;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::OnceCell;
use tracing::{debug, error, info, warn};

pub type CleanupAction = Box<dyn FnOnce() + Send>;

enum Cleanup {
    Action(CleanupAction),
    /// Backstop for a native buffer that is normally released by its owner.
    Release(Arc<ReleaseOnce>),
}

/// Actions run once, in registration order, when the session closes.
#[derive(Default)]
pub(crate) struct CleanupRegistry {
    entries: Mutex<Vec<Cleanup>>,
}

impl CleanupRegistry {
    pub(crate) fn register(&self, action: CleanupAction) {
        lock(&self.entries).push(Cleanup::Action(action));
    }

    /// Registers a release backstop. Backstops whose buffer is already
    /// released are pruned first, so repeated discovery does not pile up.
    pub(crate) fn register_release(&self, guard: Arc<ReleaseOnce>) {
        let mut entries = lock(&self.entries);
        entries.retain(|entry| !matches!(entry, Cleanup::Release(g) if g.is_released()));
        entries.push(Cleanup::Release(guard));
    }

    /// Runs every entry in registration order. Later calls find nothing.
    pub(crate) fn run(&self) {
        let entries = std::mem::take(&mut *lock(&self.entries));
        if !entries.is_empty() {
            debug!(count = entries.len(), "Running cleanup actions");
        }
        for entry in entries {
            match entry {
                Cleanup::Action(action) => action(),
                Cleanup::Release(guard) => {
                    guard.release();
                }
            }
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        lock(&self.entries).len()
    }
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) struct SessionCore {
    pub(crate) stack: Arc<dyn RadioStack>,
    pub(crate) bridge: CompletionBridge<Completion>,
    pub(crate) cleanup: CleanupRegistry,
    pub(crate) scanner: ScanController,
    pub(crate) connections: ConnectionManager,
    pub(crate) notifications: NotificationHub,
    pub(crate) settings: Settings,
    handle: Mutex<Option<SessionHandle>>,
}

impl std::fmt::Debug for SessionCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCore").finish_non_exhaustive()
    }
}

impl SessionCore {
    fn new(stack: Arc<dyn RadioStack>, settings: Settings) -> Self {
        Self {
            stack,
            bridge: CompletionBridge::new(),
            cleanup: CleanupRegistry::default(),
            scanner: ScanController::default(),
            connections: ConnectionManager::default(),
            notifications: NotificationHub::new(),
            settings,
            handle: Mutex::new(None),
        }
    }

    /// Runs the full bring-up sequence. Any failure after the native session
    /// is open closes it again before the error is returned.
    pub(crate) async fn open(stack: Arc<dyn RadioStack>, settings: Settings) -> Result<Arc<Self>> {
        info!("Initialising radio stack");
        status::check(stack.init()).inspect_err(|e| error!(error = %e, "Radio stack init failed"))?;

        let core = Arc::new(Self::new(stack, settings));
        let sink: EventSink = Arc::new(Dispatcher::new(Arc::downgrade(&core)));
        let handle = core.stack.open_session(sink).map_err(|code| {
            error!(status = %code, "Failed to open radio session");
            status::to_error(code)
        })?;
        *lock(&core.handle) = Some(handle);
        info!(session = handle.0, "Radio session opened");

        if let Err(e) = core.bring_up().await {
            error!(error = %e, "Session bring-up failed, closing session");
            core.close();
            return Err(e);
        }

        info!("Session ready");
        Ok(core)
    }

    async fn bring_up(&self) -> Result<()> {
        match self.radio_state()? {
            RadioState::Enabled => debug!("Radio already enabled"),
            state => {
                info!(?state, "Radio not enabled");
                self.enable_radio().await?;
            }
        }
        self.register_clients().await
    }

    /// The live native session handle, or `SessionClosed`.
    pub(crate) fn handle(&self) -> Result<SessionHandle> {
        (*lock(&self.handle)).ok_or(Error::SessionClosed)
    }

    pub(crate) fn is_closed(&self) -> bool {
        lock(&self.handle).is_none()
    }

    pub(crate) fn radio_state(&self) -> Result<RadioState> {
        self.handle()?;
        let raw = self.stack.radio_state().map_err(|code| {
            error!(status = %code, "Radio state query failed");
            status::to_error(code)
        })?;
        RadioState::from_raw(raw).ok_or(Error::UnknownRadioState(raw))
    }

    /// Requests the radio on and polls until it reports enabled. A failed
    /// request is only logged; the poll decides the outcome.
    pub(crate) async fn enable_radio(&self) -> Result<()> {
        let session = self.handle()?;
        let max_attempts = self.settings.radio_enable_max_attempts;
        let delay = self.settings.radio_enable_retry_delay();

        info!("Enabling radio");
        if let Err(e) = status::check(self.stack.enable_radio(session)) {
            error!(error = %e, "Radio enable request failed");
        }

        for attempt in 1..=max_attempts {
            let state = self.radio_state()?;
            if state == RadioState::Enabled {
                info!(attempt, "Radio enabled");
                return Ok(());
            }
            debug!(attempt, ?state, "Waiting for radio");
            tokio::time::sleep(delay).await;
        }

        error!(attempts = max_attempts, "Radio did not come up");
        Err(Error::RadioEnableFailed {
            attempts: max_attempts,
        })
    }

    async fn register_clients(&self) -> Result<()> {
        let session = self.handle()?;
        let timeout = self.settings.timeouts.register();

        let waiter = self
            .bridge
            .begin_operation(OperationKind::BleRegistration, Correlation::Any)?;
        status::check(self.stack.register_ble(session))
            .inspect_err(|e| error!(error = %e, "BLE registration request failed"))?;
        waiter.wait(timeout).await?;
        info!("BLE registered");

        self.connections.ensure_gatt_client(self.stack.as_ref(), session)?;

        let waiter = self
            .bridge
            .begin_operation(OperationKind::BeaconRegistration, Correlation::Any)?;
        status::check(self.stack.register_beacon_client(session))
            .inspect_err(|e| error!(error = %e, "Beacon client registration request failed"))?;
        waiter.wait(timeout).await?;
        info!("Beacon client registered");

        Ok(())
    }

    pub(crate) fn register_cleanup(&self, action: CleanupAction) {
        self.cleanup.register(action);
    }

    /// Stops scanning, runs cleanup actions, closes the native session.
    /// Safe to call more than once.
    pub(crate) fn close(&self) {
        if self.scanner.is_scanning() {
            if let Err(e) = self.scanner.stop(self.stack.as_ref()) {
                warn!(error = %e, "Failed to stop scan while closing");
            }
        }

        self.cleanup.run();
        self.connections.clear();
        self.notifications.close();

        let handle = lock(&self.handle).take();
        match handle {
            Some(handle) => match status::check(self.stack.close_session(handle)) {
                Ok(()) => info!(session = handle.0, "Radio session closed"),
                Err(e) => error!(session = handle.0, error = %e, "Failed to close radio session"),
            },
            None => debug!("Session already closed"),
        }

        self.bridge.abandon_all();
    }
}

impl Drop for SessionCore {
    fn drop(&mut self) {
        if !self.is_closed() {
            debug!("Session dropped while open");
            self.close();
        }
    }
}

/// Guards one-time session bring-up. Concurrent callers share the first
/// caller's outcome, success or failure.
pub struct SessionManager {
    cell: OnceCell<Result<Arc<BleAdapter>>>,
}

impl SessionManager {
    pub const fn new() -> Self {
        Self {
            cell: OnceCell::const_new(),
        }
    }

    /// Only the first caller's `stack` and `settings` are used.
    ///
    /// Bring-up runs inside the first caller's future. If that future is
    /// dropped before it finishes, the half-open session is closed and the
    /// next caller starts bring-up again from `init`.
    pub async fn enable(&self, stack: Arc<dyn RadioStack>, settings: Settings) -> Result<Arc<BleAdapter>> {
        self.cell
            .get_or_init(|| async move { BleAdapter::open(stack, settings).await.map(Arc::new) })
            .await
            .clone()
    }

    /// The adapter, if `enable` has already succeeded.
    pub fn adapter(&self) -> Option<Arc<BleAdapter>> {
        self.cell.get().and_then(|outcome| outcome.as_ref().ok().cloned())
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}

static GLOBAL_SESSION: SessionManager = SessionManager::new();

/// Process-wide entry point: brings the session up once and hands the same
/// adapter (or the same error) to every caller.
pub async fn enable(stack: Arc<dyn RadioStack>, settings: Settings) -> Result<Arc<BleAdapter>> {
    GLOBAL_SESSION.enable(stack, settings).await
}
