//! BLE Scanner Module
//!
//! Single-flight scanning. Results are handed to the caller's callback on
//! the dispatch thread, borrowing the stack's record for the duration of
//! the call.

use crate::domain::address::Address;
use crate::domain::models::ScannedDevice;
use crate::error::{Error, Result};
use crate::infrastructure::bluetooth::session::lock;
use crate::infrastructure::bluetooth::stack::{RadioStack, ScanInstance, ScanRecord, ScanState, SessionHandle};
use crate::infrastructure::bluetooth::status;
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info, warn};

/// Name reported when an advertisement carries no local name.
pub const UNKNOWN_NAME: &str = "<unknown>";

const AD_SHORTENED_LOCAL_NAME: u8 = 0x08;
const AD_COMPLETE_LOCAL_NAME: u8 = 0x09;
const AD_TX_POWER_LEVEL: u8 = 0x0A;

/// Invoked once per advertisement, on the dispatch thread.
pub type ScanCallback = Arc<dyn Fn(&ScanResult<'_>) + Send + Sync>;

/// One advertisement, valid only inside the scan callback.
pub struct ScanResult<'a> {
    record: &'a ScanRecord,
}

impl<'a> ScanResult<'a> {
    pub(crate) fn new(record: &'a ScanRecord) -> Self {
        Self { record }
    }

    pub fn address(&self) -> Address {
        self.record.address
    }

    /// Complete local name if advertised, else the shortened one.
    pub fn name(&self) -> String {
        ad_field(&self.record.adv_data, AD_COMPLETE_LOCAL_NAME)
            .or_else(|| ad_field(&self.record.adv_data, AD_SHORTENED_LOCAL_NAME))
            .filter(|bytes| !bytes.is_empty())
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
            .unwrap_or_else(|| UNKNOWN_NAME.to_string())
    }

    pub fn rssi(&self) -> i8 {
        self.record.rssi
    }

    pub fn tx_power(&self) -> Option<i8> {
        ad_field(&self.record.adv_data, AD_TX_POWER_LEVEL)
            .and_then(|bytes| bytes.first())
            .map(|&b| b as i8)
    }

    pub fn raw_advertisement(&self) -> &[u8] {
        &self.record.adv_data
    }

    /// Copies the result out so it can outlive the callback.
    pub fn to_owned_device(&self) -> ScannedDevice {
        ScannedDevice {
            address: self.address(),
            name: self.name(),
            rssi: self.rssi(),
            tx_power: self.tx_power(),
        }
    }
}

/// Value of the first AD structure of `ad_type`. Stops at a zero length or
/// a structure that runs past the buffer.
fn ad_field(data: &[u8], ad_type: u8) -> Option<&[u8]> {
    let mut i = 0;
    while i < data.len() {
        let len = data[i] as usize;
        if len == 0 || i + len >= data.len() {
            break;
        }
        if data[i + 1] == ad_type {
            return Some(&data[i + 2..i + 1 + len]);
        }
        i += len + 1;
    }
    None
}

#[derive(Default)]
pub(crate) struct ScanController {
    instance: Mutex<Option<ScanInstance>>,
    callback: Mutex<Option<ScanCallback>>,
}

impl ScanController {
    /// Start scanning. Fails with `AlreadyInProgress` if a scan is running.
    pub(crate) fn start(&self, stack: &dyn RadioStack, session: SessionHandle, on_result: ScanCallback) -> Result<()> {
        let mut instance = lock(&self.instance);
        if instance.is_some() {
            warn!("Scan already in progress");
            return Err(Error::AlreadyInProgress);
        }

        *lock(&self.callback) = Some(on_result);
        match stack.start_scan(session) {
            Ok(started) => {
                *instance = Some(started);
                info!(instance = started.0, "Scan started");
                Ok(())
            }
            Err(code) => {
                *lock(&self.callback) = None;
                error!(status = %code, "Failed to start scan");
                Err(status::to_error(code))
            }
        }
    }

    /// Stop scanning. Fails with `NotInProgress` if nothing is running; a
    /// rejected stop request leaves the scan running.
    pub(crate) fn stop(&self, stack: &dyn RadioStack) -> Result<()> {
        let mut instance = lock(&self.instance);
        let Some(current) = *instance else {
            return Err(Error::NotInProgress);
        };

        status::check(stack.stop_scan(current))
            .inspect_err(|e| error!(instance = current.0, error = %e, "Failed to stop scan"))?;

        *instance = None;
        *lock(&self.callback) = None;
        info!(instance = current.0, "Scan stopped");
        Ok(())
    }

    pub(crate) fn is_scanning(&self) -> bool {
        lock(&self.instance).is_some()
    }

    /// Hands one record to the active callback. Results for an instance
    /// other than the running one are dropped.
    pub(crate) fn deliver(&self, from: ScanInstance, record: &ScanRecord) {
        if *lock(&self.instance) != Some(from) {
            debug!(instance = from.0, address = %record.address, "Dropping result from inactive scan");
            return;
        }
        let callback = lock(&self.callback).clone();
        if let Some(callback) = callback {
            callback(&ScanResult::new(record));
        }
    }

    pub(crate) fn on_state_changed(&self, instance: ScanInstance, state: ScanState, interval: u32, window: u32) {
        match state {
            ScanState::Failed => error!(instance = instance.0, interval, window, "Scan failed"),
            other => info!(instance = instance.0, state = ?other, interval, window, "Scan state changed"),
        }
    }
}
