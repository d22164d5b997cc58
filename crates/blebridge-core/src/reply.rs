//! Results delivered on callback channels.
//!
//! Every call names one callback channel. The bridge answers it with one or
//! more [`Delivery`] values; `keep_alive` tells the receiver whether further
//! deliveries will follow on the same channel (scan results, connection
//! state events, notifications) or whether this one was terminal.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;

use blebridge_types::{
    CallbackId, CharacteristicRecord, ConnectInfo, DescriptorRecord, ScanRecord, ServiceRecord,
};

use crate::error::Error;

/// One result on a callback channel.
///
/// Serialized as `{"type": "...", "value": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
#[non_exhaustive]
pub enum Reply {
    /// Operation succeeded with no value.
    Ok,
    /// Channel terminated without a value.
    NoResult,
    /// RSSI in dBm.
    Rssi(i16),
    /// A discovered peripheral.
    Scan(ScanRecord),
    /// A connection state change.
    Connection(ConnectInfo),
    /// Discovered services.
    Services(Vec<ServiceRecord>),
    /// Discovered characteristics.
    Characteristics(Vec<CharacteristicRecord>),
    /// Discovered descriptors.
    Descriptors(Vec<DescriptorRecord>),
    /// A characteristic or descriptor value.
    Data(Vec<u8>),
    /// The call failed.
    Error(ErrorReply),
}

impl Reply {
    /// Whether this is an error reply.
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }
}

/// Error payload of a [`Reply::Error`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReply {
    /// Stable code, e.g. `DEVICE_NOT_FOUND`.
    pub code: String,
    /// Human-readable message.
    pub message: String,
}

impl fmt::Display for ErrorReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl From<&Error> for ErrorReply {
    fn from(err: &Error) -> Self {
        match err {
            Error::Reply(reply) => reply.clone(),
            other => Self {
                code: other.code().to_string(),
                message: other.to_string(),
            },
        }
    }
}

impl From<&Error> for Reply {
    fn from(err: &Error) -> Self {
        Self::Error(err.into())
    }
}

/// A reply addressed to a channel.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    /// Destination channel.
    pub channel: CallbackId,
    /// The result.
    pub reply: Reply,
    /// Whether more results will follow on the channel.
    pub keep_alive: bool,
}

impl Delivery {
    /// Create a delivery.
    pub fn new(channel: CallbackId, reply: Reply, keep_alive: bool) -> Self {
        Self {
            channel,
            reply,
            keep_alive,
        }
    }
}

/// Receives deliveries from the bridge.
///
/// Called from the bridge's event loop; implementations must not block.
pub trait ReplySink {
    /// Hand over one delivery.
    fn deliver(&self, delivery: Delivery);
}

impl<T: ReplySink + ?Sized> ReplySink for Arc<T> {
    fn deliver(&self, delivery: Delivery) {
        (**self).deliver(delivery);
    }
}

impl ReplySink for mpsc::UnboundedSender<Delivery> {
    fn deliver(&self, delivery: Delivery) {
        if let Err(err) = self.send(delivery) {
            debug!("Reply receiver dropped, discarding delivery for channel {}", err.0.channel);
        }
    }
}
