//! Bridge configuration.
//!
//! Configuration can be built in code with the builder setters or loaded
//! from a TOML file:
//!
//! ```toml
//! allow_duplicate_scan_results = true
//! abort_on_protocol_violation = false
//! request_buffer = 128
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default capacity of the request channel between clients and the service.
pub const DEFAULT_REQUEST_BUFFER: usize = 64;

/// Upper bound accepted for `request_buffer`.
pub const MAX_REQUEST_BUFFER: usize = 65_536;

/// Settings for a [`crate::Bridge`] and the service that drives it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Ask the stack to report every advertisement, not just the first per
    /// peripheral.
    pub allow_duplicate_scan_results: bool,
    /// Stop the service when a native completion does not match the device's
    /// active command. When `false` the violation is logged and the event
    /// dropped.
    pub abort_on_protocol_violation: bool,
    /// Capacity of the bounded request channel.
    pub request_buffer: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            allow_duplicate_scan_results: false,
            abort_on_protocol_violation: true,
            request_buffer: DEFAULT_REQUEST_BUFFER,
        }
    }
}

impl BridgeConfig {
    /// Create a configuration with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set whether duplicate scan results are reported.
    #[must_use]
    pub fn allow_duplicate_scan_results(mut self, allow: bool) -> Self {
        self.allow_duplicate_scan_results = allow;
        self
    }

    /// Set whether a protocol violation stops the service.
    #[must_use]
    pub fn abort_on_protocol_violation(mut self, abort: bool) -> Self {
        self.abort_on_protocol_violation = abort;
        self
    }

    /// Set the request channel capacity.
    #[must_use]
    pub fn request_buffer(mut self, capacity: usize) -> Self {
        self.request_buffer = capacity;
        self
    }

    /// Check that every value is usable.
    pub fn validate(&self) -> Result<()> {
        if self.request_buffer == 0 {
            return Err(Error::InvalidConfig(
                "request_buffer must be at least 1".to_string(),
            ));
        }
        if self.request_buffer > MAX_REQUEST_BUFFER {
            return Err(Error::InvalidConfig(format!(
                "request_buffer {} exceeds maximum {}",
                self.request_buffer, MAX_REQUEST_BUFFER
            )));
        }
        Ok(())
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| Error::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Render as TOML.
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::InvalidConfig(e.to_string()))
    }

    /// Load and validate a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&content)
    }
}
