//! Error types for blebridge-core.
//!
//! Every user-facing failure is delivered as a terminal error reply on the
//! callback channel of the call that caused it. [`Error::code`] gives the
//! stable code script callers match on.
//!
//! | Error | Code | Typical cause |
//! |-------|------|---------------|
//! | [`Error::ArgumentMissing`] | `ARGUMENT_MISSING` | Positional argument absent or mistyped |
//! | [`Error::DeviceNotFound`] | `DEVICE_NOT_FOUND` | Stale device handle or unknown locator |
//! | [`Error::ObjectNotFound`] | `OBJECT_NOT_FOUND` | Stale or foreign object handle |
//! | [`Error::AlreadyConnected`] | `ALREADY_CONNECTED` | A session already targets the device |
//! | [`Error::ConnectFailed`] | `CONNECT_FAILED` | The stack could not open the link |
//! | [`Error::OperationNotPermitted`] | `OPERATION_NOT_PERMITTED` | Write on a non-writable characteristic |
//! | [`Error::NativeOperationFailed`] | `NATIVE_OPERATION_FAILED` | RSSI, read or write failed in the stack |
//!
//! [`Error::ProtocolViolation`] is different: it means a native completion
//! did not match the command the device queue was waiting for. That is a
//! binding bug, never a user error, and the bridge service stops on it.

use std::fmt;

use thiserror::Error;

use blebridge_types::{DeviceHandle, ObjectHandle};

use crate::native::NativeError;
use crate::reply::ErrorReply;

/// Errors produced by the bridge.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// A required positional argument was absent or had the wrong shape.
    #[error("Missing argument {index} for '{action}'")]
    ArgumentMissing {
        /// Action being parsed.
        action: String,
        /// Zero-based argument position.
        index: usize,
    },

    /// The action name is not part of the call surface.
    #[error("Unknown action: {0}")]
    UnknownAction(String),

    /// No live session or discovered peripheral matches.
    #[error("Device not found: {0}")]
    DeviceNotFound(DeviceNotFoundReason),

    /// The object handle is unknown to the device's registry, or names an
    /// object of the wrong kind.
    #[error("Object not found: handle {0}")]
    ObjectNotFound(ObjectHandle),

    /// A session already exists for this native device.
    #[error("Device already connected: {locator}")]
    AlreadyConnected {
        /// Locator passed to `connect`.
        locator: String,
    },

    /// The native stack failed to open the link.
    #[error("Connection to {locator} failed: {reason}")]
    ConnectFailed {
        /// Locator passed to `connect`.
        locator: String,
        /// Stack-provided reason.
        reason: String,
    },

    /// The target does not allow the requested operation.
    #[error("Operation '{operation}' not permitted: {reason}")]
    OperationNotPermitted {
        /// Operation name.
        operation: &'static str,
        /// Why it was refused.
        reason: String,
    },

    /// The native stack reported an error for an operation.
    #[error("Native operation '{operation}' failed: {source}")]
    NativeOperationFailed {
        /// Operation name.
        operation: String,
        /// Stack-provided error.
        #[source]
        source: NativeError,
    },

    /// A native completion did not match the device's active command.
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// Bluetooth Low Energy error from btleplug.
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// Invalid configuration provided.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// I/O error.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// The bridge service task is no longer running.
    #[error("Bridge service stopped")]
    ServiceStopped,

    /// A call completed with an error reply.
    #[error("{0}")]
    Reply(ErrorReply),

    /// A call completed with a reply of an unexpected shape.
    #[error("Unexpected reply for '{action}': {reply}")]
    UnexpectedReply {
        /// Action that was called.
        action: &'static str,
        /// Debug rendering of the reply.
        reply: String,
    },
}

/// Reason why a device was not found.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new reasons
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum DeviceNotFoundReason {
    /// No live session owns this handle.
    Handle(DeviceHandle),
    /// The stack does not know a peripheral with this locator.
    Locator(String),
    /// No Bluetooth adapter is available.
    NoAdapter,
}

impl fmt::Display for DeviceNotFoundReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Handle(handle) => write!(f, "no session for device handle {}", handle),
            Self::Locator(locator) => write!(f, "no peripheral named '{}'", locator),
            Self::NoAdapter => write!(f, "no Bluetooth adapter available"),
        }
    }
}

impl Error {
    /// Create a device not found error for a locator.
    pub fn device_not_found(locator: impl Into<String>) -> Self {
        Self::DeviceNotFound(DeviceNotFoundReason::Locator(locator.into()))
    }

    /// Create a device not found error for a stale or unknown handle.
    pub fn unknown_device(handle: DeviceHandle) -> Self {
        Self::DeviceNotFound(DeviceNotFoundReason::Handle(handle))
    }

    /// Create a missing argument error.
    pub fn argument_missing(action: impl Into<String>, index: usize) -> Self {
        Self::ArgumentMissing {
            action: action.into(),
            index,
        }
    }

    /// Wrap a native stack error with operation context.
    pub fn native(operation: impl Into<String>, source: NativeError) -> Self {
        Self::NativeOperationFailed {
            operation: operation.into(),
            source,
        }
    }

    /// Create a protocol violation error.
    pub fn protocol_violation(message: impl Into<String>) -> Self {
        Self::ProtocolViolation(message.into())
    }

    /// Whether this error indicates a binding bug.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(self, Self::ProtocolViolation(_))
    }

    /// Stable code used in error replies.
    pub fn code(&self) -> &str {
        match self {
            Self::ArgumentMissing { .. } => "ARGUMENT_MISSING",
            Self::UnknownAction(_) => "UNKNOWN_ACTION",
            Self::DeviceNotFound(_) => "DEVICE_NOT_FOUND",
            Self::ObjectNotFound(_) => "OBJECT_NOT_FOUND",
            Self::AlreadyConnected { .. } => "ALREADY_CONNECTED",
            Self::ConnectFailed { .. } => "CONNECT_FAILED",
            Self::OperationNotPermitted { .. } => "OPERATION_NOT_PERMITTED",
            Self::NativeOperationFailed { .. } | Self::Bluetooth(_) => "NATIVE_OPERATION_FAILED",
            Self::ProtocolViolation(_) => "PROTOCOL_VIOLATION",
            Self::InvalidConfig(_) => "INVALID_CONFIG",
            Self::Io(_) => "IO_ERROR",
            Self::ServiceStopped => "SERVICE_STOPPED",
            Self::Reply(reply) => &reply.code,
            Self::UnexpectedReply { .. } => "UNEXPECTED_REPLY",
        }
    }
}

/// Result type alias using blebridge-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;
