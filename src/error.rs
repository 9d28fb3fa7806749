//! Unified error type for the session bridge.
//!
//! Native status codes are translated at the boundary (see
//! [`crate::infrastructure::bluetooth::status`]); callers only ever see these
//! variants. The type is `Clone` so a cached `enable()` outcome can be handed
//! to every caller.

use crate::domain::address::Address;
use crate::infrastructure::bluetooth::completion::OperationKind;
use crate::infrastructure::bluetooth::status::{GattStatus, Status, StatusKind};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The radio stack rejected a request or reported a failed callback.
    #[error("{}: {status} ({})", .kind.summary(), .status.description())]
    Native { kind: StatusKind, status: Status },

    /// No completion arrived before the deadline. Retrying is up to the caller.
    #[error("timed out waiting for {0}")]
    Timeout(OperationKind),

    #[error("scan already in progress")]
    AlreadyInProgress,

    #[error("no scan in progress")]
    NotInProgress,

    #[error("no GATT services available")]
    NoServicesAvailable,

    #[error("invalid address format: {0}")]
    InvalidAddressFormat(String),

    /// The device has no bond and the session is configured to require one.
    #[error("device {0} is not bonded; pair before connecting")]
    PairRequired(Address),

    #[error("connection to {address} failed with GATT status {gatt_status}")]
    ConnectionFailed {
        address: Address,
        gatt_status: GattStatus,
    },

    /// Another operation of the same kind is still outstanding.
    #[error("{0} already pending")]
    OperationPending(OperationKind),

    #[error("not connected")]
    NotConnected,

    /// The session already holds a link; only one is supported.
    #[error("already connected to {0}")]
    AlreadyConnected(Address),

    #[error("session is closed")]
    SessionClosed,

    #[error("radio did not enable after {attempts} attempts")]
    RadioEnableFailed { attempts: u32 },

    #[error("unknown radio state: {0}")]
    UnknownRadioState(i32),

    /// The completion primitive went away without delivering a result.
    #[error("{0} abandoned before completion")]
    Abandoned(OperationKind),

    #[error("settings error: {0}")]
    Settings(String),
}

impl Error {
    /// Timeouts are the only errors a caller can reasonably retry as-is.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout(_))
    }

    /// The raw native status, if this error came from the radio stack.
    pub fn native_status(&self) -> Option<Status> {
        match self {
            Error::Native { status, .. } => Some(*status),
            _ => None,
        }
    }
}
