//! Native status translation.
//!
//! Every status code coming back from the radio stack goes through
//! [`check`] before it crosses into the bridge API. Codes outside the
//! handful with a dedicated [`StatusKind`] keep their raw value so the
//! name/description table can still explain them.

use crate::error::{Error, Result};
use std::fmt;

/// Raw status code as returned by the radio stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Status(pub i32);

impl Status {
    pub const OK: Status = Status(0);
    pub const GENERAL_ERROR: Status = Status(-1);
    pub const TIMEOUT: Status = Status(-2);
    pub const OUT_OF_MEMORY: Status = Status(-4);
    pub const NOT_SUPPORTED: Status = Status(-6);
    pub const BAD_PARAM: Status = Status(-11);
    pub const BUSY: Status = Status(-15);
    pub const IN_PROGRESS: Status = Status(-19);
    pub const UNINITIALIZED: Status = Status(-25);
    pub const REMOTE_DEVICE_DOWN: Status = Status(-98);
    /// The request was already satisfied (e.g. pairing an already bonded device).
    pub const DONE: Status = Status(-99);
    pub const AUTH_REJECTED: Status = Status(-101);

    pub fn code(&self) -> i32 {
        self.0
    }

    pub fn is_ok(&self) -> bool {
        *self == Self::OK
    }

    pub fn name(&self) -> String {
        lookup(self.0)
            .map(|(_, name, _)| name.to_string())
            .unwrap_or_else(|| format!("Unknown status code: {}", self.0))
    }

    pub fn description(&self) -> String {
        lookup(self.0)
            .map(|(_, _, desc)| desc.to_string())
            .unwrap_or_else(|| format!("Unknown status code: {}", self.0))
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{{{}}}", self.name(), self.0)
    }
}

/// Coarse classification of a failed native status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusKind {
    OutOfMemory,
    Busy,
    InvalidParameter,
    NotReady,
    OperationFailed,
    Unknown,
}

impl StatusKind {
    pub fn summary(&self) -> &'static str {
        match self {
            Self::OutOfMemory => "radio stack out of memory",
            Self::Busy => "radio stack is busy connecting another device",
            Self::InvalidParameter => "request contains invalid parameters",
            Self::NotReady => "radio stack not ready",
            Self::OperationFailed => "radio stack operation failed",
            Self::Unknown => "radio stack returned an unexpected status",
        }
    }
}

/// Map a status to `Ok(())` or a typed error. Pure, no side effects.
pub fn check(status: Status) -> Result<()> {
    let kind = match status {
        Status::OK => return Ok(()),
        Status::OUT_OF_MEMORY => StatusKind::OutOfMemory,
        Status::BUSY => StatusKind::Busy,
        Status::BAD_PARAM => StatusKind::InvalidParameter,
        Status::UNINITIALIZED => StatusKind::NotReady,
        Status::GENERAL_ERROR => StatusKind::OperationFailed,
        _ => StatusKind::Unknown,
    };
    Err(Error::Native { kind, status })
}

/// Error for a status that arrived on a failure path. A stray `OK` there is
/// still reported as a failure.
pub fn to_error(status: Status) -> Error {
    check(status).err().unwrap_or(Error::Native {
        kind: StatusKind::OperationFailed,
        status,
    })
}

/// Link-layer status attached to connection-state events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GattStatus(pub u8);

impl GattStatus {
    pub const SUCCESS: GattStatus = GattStatus(0x00);
    pub const ERROR: GattStatus = GattStatus(0x85);
    pub const CONN_TIMEOUT: GattStatus = GattStatus(0x08);

    pub fn is_success(&self) -> bool {
        *self == Self::SUCCESS
    }
}

impl fmt::Display for GattStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:02x}", self.0)
    }
}

fn lookup(code: i32) -> Option<&'static (i32, &'static str, &'static str)> {
    STATUS_TABLE.iter().find(|(c, _, _)| *c == code)
}

static STATUS_TABLE: &[(i32, &str, &str)] = &[
    (0, "ACE_STATUS_OK", "Operation completed successfully"),
    (-1, "ACE_STATUS_GENERAL_ERROR", "Unspecified run-time error"),
    (-2, "ACE_STATUS_TIMEOUT", "Operation timed out"),
    (-3, "ACE_STATUS_OUT_OF_RESOURCES", "Resource not available"),
    (-4, "ACE_STATUS_OUT_OF_MEMORY", "Failed to allocate memory"),
    (-5, "ACE_STATUS_OUT_OF_HANDLES", "Out of file handles"),
    (-6, "ACE_STATUS_NOT_SUPPORTED", "Not supported on this platform"),
    (-7, "ACE_STATUS_NO_PERMISSION", "No permission for operation"),
    (-8, "ACE_STATUS_NOT_FOUND", "Indicated resource not found"),
    (-9, "ACE_STATUS_NULL_POINTER", "Null pointer provided"),
    (-10, "ACE_STATUS_PARAM_OUT_OF_RANGE", "Parameter out of range"),
    (-11, "ACE_STATUS_BAD_PARAM", "Parameter value bad"),
    (-12, "ACE_STATUS_INCOMPATIBLE_PARAMS", "Parameters form incompatible set"),
    (-13, "ACE_STATUS_IO_ERROR", "Input/Output error"),
    (-14, "ACE_STATUS_TRY_AGAIN", "Safe to try again"),
    (-15, "ACE_STATUS_BUSY", "Resource busy"),
    (-16, "ACE_STATUS_DEAD_LOCK", "Mutex in dead lock"),
    (-17, "ACE_STATUS_DATA_TYPE_OVERFLOW", "Defined data type overflowed"),
    (-18, "ACE_STATUS_BUFFER_OVERFLOW", "Destination buffer overflowed"),
    (-19, "ACE_STATUS_IN_PROGRESS", "Operation already in progress"),
    (-20, "ACE_STATUS_CANCELED", "Operation canceled"),
    (-21, "ACE_STATUS_OWNER_DEAD", "Owner of resource died"),
    (-22, "ACE_STATUS_UNRECOVERABLE", "Unrecoverable error"),
    (-23, "ACE_STATUS_PORT_INVALID", "Invalid port"),
    (-24, "ACE_STATUS_PORT_NOT_OPEN", "Device port not opened"),
    (-25, "ACE_STATUS_UNINITIALIZED", "Resource uninitialized"),
    (-26, "ACE_STATUS_ALREADY_INITIALIZED", "Resource already initialized"),
    (-27, "ACE_STATUS_ALREADY_EXISTS", "Resource already exists"),
    (-28, "ACE_STATUS_BELOW_THRESHOLD", "Parameter below acceptable threshold"),
    (-29, "ACE_STATUS_STOPPED", "Resource stopped"),
    (-30, "ACE_STATUS_STORAGE_READ_FAIL", "Storage read failure"),
    (-31, "ACE_STATUS_STORAGE_WRITE_FAIL", "Storage write failure"),
    (-32, "ACE_STATUS_STORAGE_ERASE_FAIL", "Storage erase failure"),
    (-33, "ACE_STATUS_STORAGE_FULL", "Storage is full"),
    (-34, "ACE_STATUS_NOT_IMPLEMENTED", "API/Operation is not implemented"),
    (-35, "ACE_STATUS_RESOURCE_RECLAIMABLE", "Resource can be reclaimed"),
    (-36, "ACE_STATUS_DATA_CORRUPTED", "Data is corrupted"),
    (-37, "ACE_STATUS_CONNECTED", "Connected"),
    (-38, "ACE_STATUS_DISCONNECTED", "Disconnected"),
    (-39, "ACE_STATUS_RESET", "Reset occurred"),
    (-40, "ACE_STATUS_FAILURE_UNKNOWN_FILESYSTEM", "Filesystem not integrated with the system"),
    (-41, "ACE_STATUS_FAILURE_MAX_FILESYSTEMS", "System already configured with the maximum number of filesystems"),
    (-42, "ACE_STATUS_FAILURE_INCOMPATIBLE_FILE", "File operation not compatible"),
    (-43, "ACE_STATUS_FAILURE_FILE_NOT_OPEN", "File not open"),
    (-44, "ACE_STATUS_EOF", "File pointer has reached end of file"),
    (-45, "ACE_STATUS_MAX_FILE_SIZE_REACHED", "Requested size not supported"),
    (-46, "ACE_STATUS_FAILURE_UNKNOWN_FILE", "Operation not supported"),
    (-47, "ACE_STATUS_DIR_EXISTS", "Directory already exists"),
    (-48, "ACE_STATUS_DIR_NOT_SUPPORTED", "Filesystem does not support directories"),
    (-49, "ACE_STATUS_INVALID_PATH", "Invalid path"),
    (-50, "ACE_STATUS_DATA_LEN_INVALID", "Invalid data length received"),
    (-51, "ACE_STATUS_NO_NET", "No network available"),
    (-52, "ACE_STATUS_NET_CONNECTION_ERROR", "Network connection error"),
    (-53, "ACE_STATUS_NET_CONNECTION_TIMEOUT_ERROR", "Network connection timeout error"),
    (-54, "ACE_STATUS_NET_TRANSMIT_ABORT_ERROR", "Network transmit abort error"),
    (-55, "ACE_STATUS_NET_RECEIVE_ABORT_ERROR", "Network transmit abort error"),
    (-56, "ACE_STATUS_NET_AUTH_FAILURE", "Connection failed due to authentication failure"),
    (-57, "ACE_STATUS_CLI_HELP_COMMAND", "Command passed to print help"),
    (-58, "ACE_STATUS_CLI_FUNC_ERROR", "CLI function failed"),
    (-59, "ACE_STATUS_EVENTS_MAX_SUBSCRIBERS", "Events exceeded maximum number of subscribers"),
    (-60, "ACE_STATUS_ATZ_INTERNAL_ERROR", "ACE ATZ internal error"),
    (-61, "ACE_STATUS_DEVICE_INFO_INTERNAL_ERROR", "Error internal to device information middleware module"),
    (-62, "ACE_STATUS_DEVICE_INFO_ENTRY_NOT_SUPPORTED", "Device information entry not supported"),
    (-63, "ACE_STATUS_MODULE_INIT_ERROR", "Module initialization error"),
    (-64, "ACE_STATUS_REGISTRATION_REQUEST_ERROR", "Registration request error"),
    (-65, "ACE_STATUS_REGISTRATION_RESPONSE_ERROR", "Registration response error"),
    (-66, "ACE_STATUS_NOT_REGISTERED_ERROR", "Device not registered error"),
    (-67, "ACE_STATUS_REGISTRATION_INVALID_INFO", "Invalid registration info error"),
    (-68, "ACE_STATUS_REGISTRATION_REQUEST_PAYLOAD_ERROR", "Registration request payload error"),
    (-69, "ACE_STATUS_REGISTRATION_INVALID_RESPONSE", "Registration invalid response error"),
    (-70, "ACE_STATUS_REGISTRATION_INTERNAL_ERROR", "Registration internal error"),
    (-71, "ACE_STATUS_ACCESS_TOKEN_EXPIRED", "Access Token Expired"),
    (-72, "ACE_STATUS_INVALID_REFRESH_TOKEN", "Invalid refresh token"),
    (-73, "ACE_STATUS_ACM_CONNECTION_ERROR", "ACM connection error"),
    (-74, "ACE_STATUS_REGISTRATION_ACCOUNT_CHALLENGED", "Registration account challenged error"),
    (-75, "ACE_STATUS_PWR_ZERO_REF_COUNT", "Resource reference count already zero"),
    (-76, "ACE_STATUS_THERMAL_GETDATA_ERR", "Thermal get data error"),
    (-77, "ACE_STATUS_THERMAL_LOAD_POLICY_ERR", "Thermal load policy error"),
    (-78, "ACE_STATUS_THERMAL_FUNC_ERR", "Thermal cli command execution error"),
    (-79, "ACE_STATUS_PROTOCOL_ERROR", "Error indicating violation of the agreed exchange protocol"),
    (-80, "ACE_STATUS_MORE_DATA", "Indicating sender will send more data"),
    (-81, "ACE_STATUS_BAUDRATE_INVALID", "Invalid baud rate selected"),
    (-82, "ACE_STATUS_PARITY_INVALID", "Bad parity"),
    (-83, "ACE_STATUS_STOP_BITS_INVALID", "Device returned bad stop bits"),
    (-84, "ACE_STATUS_FLOW_CONTROL_INVALID", "Device has bad flow control"),
    (-85, "ACE_STATUS_DEVICE_STATE_INVALID", "Device/SW state machine invalid"),
    (-86, "ACE_STATUS_HW_FAILURE", "Unknown hardware failure"),
    (-87, "ACE_STATUS_DEVICE_OPERATION_ERROR", "Device operation error"),
    (-88, "ACE_STATUS_INIT_ERROR", "Device initialization error"),
    (-89, "ACE_STATUS_POLICY_WRITE_INVALID", "Power/Thermal policy write error"),
    (-90, "ACE_STATUS_DEVICE_NOT_FOUND", "Device not found"),
    (-91, "ACE_STATUS_DEVICE_NO_CONFIG", "Device not configured"),
    (-92, "ACE_STATUS_DB_OPEN_ERROR", "KV storage database open error"),
    (-93, "ACE_STATUS_BT_JNI_ENVIRONMENT_ERROR", "Error status due to JNI environment"),
    (-94, "ACE_STATUS_BT_JNI_THREAD_ATTACH_ERROR", "Error status due to JNI thread malfunction"),
    (-95, "ACE_STATUS_BT_WAKELOCK_ERROR", "Error status due to wakelock"),
    (-96, "ACE_STATUS_BT_CONN_PENDING", "Status for a pending connection"),
    (-97, "ACE_STATUS_BT_AUTH_FAIL_CONN_TIMEOUT", "Error status due to connection timeout"),
    (-98, "ACE_STATUS_BT_RMT_DEV_DOWN", "Error status due remote device disconnection"),
    (-99, "ACE_STATUS_BT_DONE", "request already completed"),
    (-100, "ACE_STATUS_BT_UNHANDLED", "Error status due to unhandled operation"),
    (-101, "ACE_STATUS_BT_AUTH_REJECTED", "Error status due to authentication rejected by remote device"),
    (-102, "ACE_STATUS_BT_AUTH_FAIL_SMP_FAIL", "Error status due to SMP failure"),
];
