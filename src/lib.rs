//! Central-role BLE session bridge.
//!
//! Wraps a callback-driven radio stack in a set of async, timeout-bounded
//! operations: bring-up, scanning, connecting, pairing, GATT discovery,
//! characteristic writes and notifications.

pub mod domain;
pub mod error;
pub mod infrastructure;

pub use domain::address::Address;
pub use domain::models::{ConnectionStatus, Notification, RadioState, ScannedDevice};
pub use domain::settings::{Settings, SettingsService};
pub use error::{Error, Result};
pub use infrastructure::bluetooth::characteristic::{NotificationChannel, MAX_WRITE_LEN};
pub use infrastructure::bluetooth::gatt::{DeviceCharacteristic, DeviceService, ServiceType, WriteType};
pub use infrastructure::bluetooth::scanner::{ScanCallback, ScanResult};
pub use infrastructure::bluetooth::stack::{ConnectionHandle, RadioStack};
pub use infrastructure::bluetooth::{enable, Adapter, BleAdapter, SessionManager};
