//! Characteristic writes and notification subscriptions.

use crate::domain::models::Notification;
use crate::error::Result;
use crate::infrastructure::bluetooth::completion::{Correlation, OperationKind};
use crate::infrastructure::bluetooth::gatt::DeviceCharacteristic;
use crate::infrastructure::bluetooth::session::{lock, SessionCore};
use crate::infrastructure::bluetooth::stack::{ConnectionHandle, NativeCharacteristic, ResponseType};
use crate::infrastructure::bluetooth::status;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, error, info, warn};

/// Longest payload a single write carries; longer data is truncated.
pub const MAX_WRITE_LEN: usize = 20;

/// Shared inbound notification queue for every subscribed characteristic.
/// Unbounded, so the dispatch thread never waits and values keep the order
/// the stack delivered them in.
pub(crate) struct NotificationHub {
    tx: Mutex<Option<mpsc::UnboundedSender<Notification>>>,
    rx: Arc<AsyncMutex<mpsc::UnboundedReceiver<Notification>>>,
}

impl NotificationHub {
    pub(crate) fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx: Mutex::new(Some(tx)),
            rx: Arc::new(AsyncMutex::new(rx)),
        }
    }

    pub(crate) fn channel(&self) -> NotificationChannel {
        NotificationChannel {
            rx: Arc::clone(&self.rx),
        }
    }

    fn push(&self, notification: Notification) {
        match lock(&self.tx).as_ref() {
            Some(tx) => {
                if tx.send(notification).is_err() {
                    debug!("Notification receiver gone");
                }
            }
            None => debug!("Notification queue closed, dropping value"),
        }
    }

    /// Drops the sender. Receivers drain what is queued, then see `None`.
    pub(crate) fn close(&self) {
        if lock(&self.tx).take().is_some() {
            debug!("Notification queue closed");
        }
    }
}

/// Receiving end of the session's notification queue. Clones share the
/// same queue, so each notification is seen by exactly one receiver.
#[derive(Clone)]
pub struct NotificationChannel {
    rx: Arc<AsyncMutex<mpsc::UnboundedReceiver<Notification>>>,
}

impl NotificationChannel {
    /// `None` once the session is closed and the queue is drained.
    pub async fn recv(&self) -> Option<Notification> {
        self.rx.lock().await.recv().await
    }

    /// `None` if nothing arrived within `timeout`.
    pub async fn recv_timeout(&self, timeout: Duration) -> Option<Notification> {
        tokio::time::timeout(timeout, self.recv()).await.ok().flatten()
    }

    pub fn try_recv(&self) -> Option<Notification> {
        self.rx.try_lock().ok()?.try_recv().ok()
    }
}

fn truncate(data: &[u8]) -> &[u8] {
    if data.len() > MAX_WRITE_LEN {
        warn!(len = data.len(), max = MAX_WRITE_LEN, "Write payload truncated");
        &data[..MAX_WRITE_LEN]
    } else {
        data
    }
}

impl SessionCore {
    /// Writes with response and waits for the stack to confirm.
    pub(crate) async fn write_characteristic(
        &self,
        conn: ConnectionHandle,
        characteristic: &DeviceCharacteristic,
        data: &[u8],
        timeout: Duration,
    ) -> Result<()> {
        let session = self.handle()?;
        self.connections.require(conn)?;
        let payload = truncate(data);

        let waiter = self
            .bridge
            .begin_operation(OperationKind::CharacteristicWrite, Correlation::Connection(conn))?;
        debug!(%conn, uuid = %characteristic.uuid, data = ?payload, "Writing characteristic");
        status::check(self.stack.write_characteristic(
            session,
            conn,
            &characteristic.native,
            ResponseType::Required,
            payload,
        ))
        .inspect_err(|e| error!(%conn, uuid = %characteristic.uuid, error = %e, "Write request failed"))?;

        waiter.wait(timeout).await?;
        Ok(())
    }

    /// Enables notifications and returns the shared notification channel.
    pub(crate) async fn set_notify(
        &self,
        conn: ConnectionHandle,
        characteristic: &DeviceCharacteristic,
        timeout: Duration,
    ) -> Result<NotificationChannel> {
        let session = self.handle()?;
        self.connections.require(conn)?;
        if !characteristic.is_notify {
            warn!(uuid = %characteristic.uuid, "Characteristic does not advertise notify");
        }

        let waiter = self
            .bridge
            .begin_operation(OperationKind::DescriptorWrite, Correlation::Connection(conn))?;
        status::check(self.stack.set_notification(session, conn, &characteristic.native, true))
            .inspect_err(|e| error!(%conn, uuid = %characteristic.uuid, error = %e, "Notify request failed"))?;

        waiter.wait(timeout).await?;
        info!(%conn, uuid = %characteristic.uuid, "Notifications enabled");
        Ok(self.notifications.channel())
    }

    /// Copies the payload out of the stack's buffer and queues it.
    pub(crate) fn on_notification(&self, conn: ConnectionHandle, characteristic: &NativeCharacteristic, value: &[u8]) {
        if value.is_empty() {
            warn!(%conn, uuid = %characteristic.uuid(), "Dropping empty notification");
            return;
        }
        debug!(%conn, uuid = %characteristic.uuid(), len = value.len(), "Notification");
        self.notifications.push(Notification {
            characteristic: characteristic.uuid(),
            data: value.to_vec(),
        });
    }
}
