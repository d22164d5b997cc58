//! Platform-agnostic types for the blebridge BLE bridge.
//!
//! This crate provides the values that cross the boundary between the
//! bridge core and its script-facing callers: opaque handles, state enums,
//! the result records delivered on callback channels, and the fixed table
//! that translates native characteristic capabilities into portable
//! permission/property/writeType bitmasks.
//!
//! # Example
//!
//! ```
//! use blebridge_types::{CharProperties, CharacteristicRecord, ObjectHandle};
//! use blebridge_types::types::{property, write_type};
//! use blebridge_types::uuid::uuid_from_u16;
//!
//! let record = CharacteristicRecord::new(
//!     ObjectHandle(3),
//!     uuid_from_u16(0x2A37),
//!     CharProperties::NOTIFY | CharProperties::WRITE,
//! );
//! assert_eq!(record.properties, property::NOTIFY | property::WRITE);
//! assert_eq!(record.write_type, write_type::DEFAULT);
//! ```

pub mod error;
pub mod types;
pub mod uuid;

pub use error::{ParseError, ParseResult};
pub use types::{
    AdapterState, CallbackId, CharProperties, CharacteristicRecord, ConnectInfo, ConnectionState,
    DescriptorRecord, DeviceHandle, ObjectHandle, ScanRecord, ServiceRecord, ServiceType,
};
