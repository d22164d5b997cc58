//! Script-facing call surface.
//!
//! Script callers name an action and pass positional JSON arguments.
//! [`Call::from_args`] turns that into a typed [`Call`]; handles are JSON
//! integers and buffers are arrays of byte values.

use serde_json::Value;

use blebridge_types::{DeviceHandle, ObjectHandle};

use crate::error::{Error, Result};

/// One operation requested by a caller.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Call {
    /// Start streaming scan results.
    StartScan,
    /// Stop scanning and terminate the scan channel.
    StopScan,
    /// Open a session with a peripheral.
    Connect {
        /// Address or platform identifier from a scan record.
        locator: String,
    },
    /// Disconnect and tear down a session.
    Close {
        /// Session to close.
        device: DeviceHandle,
    },
    /// Read the link RSSI.
    Rssi {
        /// Target session.
        device: DeviceHandle,
    },
    /// Discover services.
    Services {
        /// Target session.
        device: DeviceHandle,
    },
    /// Discover characteristics of a service.
    Characteristics {
        /// Target session.
        device: DeviceHandle,
        /// Service handle.
        service: ObjectHandle,
    },
    /// Discover descriptors of a characteristic.
    Descriptors {
        /// Target session.
        device: DeviceHandle,
        /// Characteristic handle.
        characteristic: ObjectHandle,
    },
    /// One-shot characteristic read.
    ReadCharacteristic {
        /// Target session.
        device: DeviceHandle,
        /// Characteristic handle.
        characteristic: ObjectHandle,
    },
    /// One-shot descriptor read.
    ReadDescriptor {
        /// Target session.
        device: DeviceHandle,
        /// Descriptor handle.
        descriptor: ObjectHandle,
    },
    /// Write a characteristic value.
    WriteCharacteristic {
        /// Target session.
        device: DeviceHandle,
        /// Characteristic handle.
        characteristic: ObjectHandle,
        /// Bytes to write.
        value: Vec<u8>,
    },
    /// Write a descriptor value.
    WriteDescriptor {
        /// Target session.
        device: DeviceHandle,
        /// Descriptor handle.
        descriptor: ObjectHandle,
        /// Bytes to write.
        value: Vec<u8>,
    },
    /// Subscribe to notifications.
    EnableNotification {
        /// Target session.
        device: DeviceHandle,
        /// Characteristic handle.
        characteristic: ObjectHandle,
    },
    /// Cancel a notification subscription.
    DisableNotification {
        /// Target session.
        device: DeviceHandle,
        /// Characteristic handle.
        characteristic: ObjectHandle,
    },
    /// Stop scanning and tear down every session.
    Reset,
}

impl Call {
    /// Action name as used by script callers.
    pub fn action(&self) -> &'static str {
        match self {
            Self::StartScan => "startScan",
            Self::StopScan => "stopScan",
            Self::Connect { .. } => "connect",
            Self::Close { .. } => "close",
            Self::Rssi { .. } => "rssi",
            Self::Services { .. } => "services",
            Self::Characteristics { .. } => "characteristics",
            Self::Descriptors { .. } => "descriptors",
            Self::ReadCharacteristic { .. } => "readCharacteristic",
            Self::ReadDescriptor { .. } => "readDescriptor",
            Self::WriteCharacteristic { .. } => "writeCharacteristic",
            Self::WriteDescriptor { .. } => "writeDescriptor",
            Self::EnableNotification { .. } => "enableNotification",
            Self::DisableNotification { .. } => "disableNotification",
            Self::Reset => "reset",
        }
    }

    /// Device the call targets, if any.
    pub fn device(&self) -> Option<DeviceHandle> {
        match self {
            Self::StartScan | Self::StopScan | Self::Connect { .. } | Self::Reset => None,
            Self::Close { device }
            | Self::Rssi { device }
            | Self::Services { device }
            | Self::Characteristics { device, .. }
            | Self::Descriptors { device, .. }
            | Self::ReadCharacteristic { device, .. }
            | Self::ReadDescriptor { device, .. }
            | Self::WriteCharacteristic { device, .. }
            | Self::WriteDescriptor { device, .. }
            | Self::EnableNotification { device, .. }
            | Self::DisableNotification { device, .. } => Some(*device),
        }
    }

    /// Parse an action name and its positional arguments.
    ///
    /// Extra trailing arguments are ignored.
    pub fn from_args(action: &str, args: &[Value]) -> Result<Self> {
        let args = Args { action, args };
        let call = match action {
            "startScan" => Self::StartScan,
            "stopScan" => Self::StopScan,
            "connect" => Self::Connect {
                locator: args.string(0)?,
            },
            "close" => Self::Close {
                device: args.device(0)?,
            },
            "rssi" => Self::Rssi {
                device: args.device(0)?,
            },
            "services" => Self::Services {
                device: args.device(0)?,
            },
            "characteristics" => Self::Characteristics {
                device: args.device(0)?,
                service: args.object(1)?,
            },
            "descriptors" => Self::Descriptors {
                device: args.device(0)?,
                characteristic: args.object(1)?,
            },
            "readCharacteristic" => Self::ReadCharacteristic {
                device: args.device(0)?,
                characteristic: args.object(1)?,
            },
            "readDescriptor" => Self::ReadDescriptor {
                device: args.device(0)?,
                descriptor: args.object(1)?,
            },
            "writeCharacteristic" => Self::WriteCharacteristic {
                device: args.device(0)?,
                characteristic: args.object(1)?,
                value: args.buffer(2)?,
            },
            "writeDescriptor" => Self::WriteDescriptor {
                device: args.device(0)?,
                descriptor: args.object(1)?,
                value: args.buffer(2)?,
            },
            "enableNotification" => Self::EnableNotification {
                device: args.device(0)?,
                characteristic: args.object(1)?,
            },
            "disableNotification" => Self::DisableNotification {
                device: args.device(0)?,
                characteristic: args.object(1)?,
            },
            "reset" => Self::Reset,
            other => return Err(Error::UnknownAction(other.to_string())),
        };
        Ok(call)
    }
}

struct Args<'a> {
    action: &'a str,
    args: &'a [Value],
}

impl Args<'_> {
    fn missing(&self, index: usize) -> Error {
        Error::argument_missing(self.action, index)
    }

    fn integer(&self, index: usize) -> Result<u64> {
        self.args
            .get(index)
            .and_then(Value::as_u64)
            .ok_or_else(|| self.missing(index))
    }

    fn device(&self, index: usize) -> Result<DeviceHandle> {
        self.integer(index).map(DeviceHandle)
    }

    fn object(&self, index: usize) -> Result<ObjectHandle> {
        self.integer(index).map(ObjectHandle)
    }

    fn string(&self, index: usize) -> Result<String> {
        self.args
            .get(index)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| self.missing(index))
    }

    fn buffer(&self, index: usize) -> Result<Vec<u8>> {
        let items = self
            .args
            .get(index)
            .and_then(Value::as_array)
            .ok_or_else(|| self.missing(index))?;
        items
            .iter()
            .map(|item| {
                item.as_u64()
                    .and_then(|byte| u8::try_from(byte).ok())
                    .ok_or_else(|| self.missing(index))
            })
            .collect()
    }
}
