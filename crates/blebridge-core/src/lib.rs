//! Serialized BLE command bridge.
//!
//! This crate sits between a script-facing call surface and a native BLE
//! central. Scripts issue calls by action name with positional arguments
//! and a callback channel; the bridge answers on that channel with zero or
//! more replies, the last one terminal.
//!
//! # Features
//!
//! - **Per-device command queue**: at most one native GATT operation is in
//!   flight per connected device; completions are checked against it
//! - **Handle registry**: services, characteristics and descriptors are
//!   named by small integer handles, deduplicated per device
//! - **Callback multiplexing**: explicit reads and notification
//!   subscriptions share one value event stream and are routed per
//!   characteristic
//! - **Deferred scanning**: `startScan` while the radio is off waits for
//!   the adapter to power on
//! - **Async service**: [`BridgeService`] runs the bridge on a tokio task
//!   and hands out cloneable [`BridgeClient`]s
//!
//! # Architecture
//!
//! [`Bridge`] owns all state and is driven from one place: script calls go
//! through [`Bridge::call`] and native completions through
//! [`Bridge::handle_event`]. The native side is abstracted by
//! [`CentralStack`], whose methods only initiate work; outcomes come back
//! as [`NativeEvent`]s. [`BtleplugStack`] implements it over btleplug and
//! [`mock::MockStack`] records calls for tests.
//!
//! # Quick Start
//!
//! ```no_run
//! use blebridge_core::{BridgeConfig, BridgeService, BtleplugStack};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let (stack, events) = BtleplugStack::new().await?;
//!     let (client, handle) = BridgeService::spawn(stack, events, BridgeConfig::default())?;
//!
//!     let mut scan = client.start_scan().await?;
//!     let first = scan.next_reply().await?;
//!     println!("first advertisement: {:?}", first);
//!     client.stop_scan().await?;
//!
//!     handle.shutdown().await?;
//!     Ok(())
//! }
//! ```

pub mod adapter;
pub mod advertisement;
pub mod backend;
pub mod bridge;
pub mod call;
pub mod config;
pub mod error;
pub mod metrics;
pub mod mock;
pub mod multiplexer;
pub mod native;
pub mod queue;
pub mod registry;
pub mod reply;
pub mod service;
pub mod session;
pub mod util;

pub use blebridge_types::types;
pub use blebridge_types::uuid;

// Core exports
pub use bridge::Bridge;
pub use call::Call;
pub use config::BridgeConfig;
pub use error::{DeviceNotFoundReason, Error, Result};
pub use native::{
    AttributePath, CentralStack, Link, NativeCharacteristic, NativeDescriptor, NativeError,
    NativeEvent, NativeService, PeripheralId, WriteKind,
};
pub use reply::{Delivery, ErrorReply, Reply, ReplySink};

pub use adapter::AdapterController;
pub use advertisement::{Advertisement, RSSI_UNAVAILABLE};
pub use backend::BtleplugStack;
pub use metrics::{BridgeMetrics, MetricsSnapshot};
pub use multiplexer::CallbackTable;
pub use queue::{Command, CommandQueue, Operation, OperationKind};
pub use registry::{GattObject, HandleRegistry};
pub use service::{BridgeClient, BridgeService, ReplyRouter, ReplyStream, ServiceHandle};
pub use session::DeviceSession;
pub use util::{create_identifier, format_peripheral_id};

// Re-export from blebridge-types
pub use blebridge_types::{
    AdapterState, CallbackId, CharProperties, CharacteristicRecord, ConnectInfo, ConnectionState,
    DescriptorRecord, DeviceHandle, ObjectHandle, ScanRecord, ServiceRecord, ServiceType,
};
