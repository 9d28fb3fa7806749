use crate::domain::address::Address;
use crate::infrastructure::bluetooth::stack::radio_state;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RadioState {
    Disabled,
    Enabled,
    Enabling,
    Disabling,
}

impl RadioState {
    pub fn from_raw(raw: i32) -> Option<Self> {
        match raw {
            radio_state::DISABLED => Some(RadioState::Disabled),
            radio_state::ENABLED => Some(RadioState::Enabled),
            radio_state::ENABLING => Some(RadioState::Enabling),
            radio_state::DISABLING => Some(RadioState::Disabling),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
}

/// A scan result copied out of the scan callback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScannedDevice {
    pub address: Address,
    pub name: String,
    pub rssi: i8,
    pub tx_power: Option<i8>,
}

/// One value pushed by the peripheral, tagged with its source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub characteristic: Uuid,
    pub data: Vec<u8>,
}
