//! Adapter power state and scan deferral.
//!
//! Scans may only run while the radio is powered on. A scan requested
//! earlier is remembered and started on the transition to
//! [`AdapterState::PoweredOn`].

use tracing::{debug, info};

use blebridge_types::{AdapterState, CallbackId};

/// What `startScan` should do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanStart {
    /// Start the native scan now.
    Native,
    /// Radio is not powered on; the scan starts once it is.
    Deferred,
}

/// What `stopScan` should do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScanStop {
    /// Whether to stop the native scan.
    pub native: bool,
    /// Scan channel to terminate with a no-result completion.
    pub terminate: Option<CallbackId>,
}

/// Tracks radio state and the active scan channel.
#[derive(Debug, Default)]
pub struct AdapterController {
    state: AdapterState,
    scan_is_waiting: bool,
    scan_channel: Option<CallbackId>,
}

impl AdapterController {
    /// Create a controller in the [`AdapterState::Unknown`] state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current radio state.
    pub fn state(&self) -> AdapterState {
        self.state
    }

    /// Whether a scan is waiting for the radio to power on.
    pub fn scan_is_waiting(&self) -> bool {
        self.scan_is_waiting
    }

    /// Channel receiving discovery results.
    pub fn discovery_channel(&self) -> Option<CallbackId> {
        self.scan_channel
    }

    /// Record a scan request on `channel`.
    ///
    /// A new request replaces the previous scan channel.
    pub fn start_scan(&mut self, channel: CallbackId) -> ScanStart {
        self.scan_channel = Some(channel);
        if self.state.is_powered_on() {
            ScanStart::Native
        } else {
            debug!("Adapter is {}, deferring scan", self.state);
            self.scan_is_waiting = true;
            ScanStart::Deferred
        }
    }

    /// Record a stop request.
    ///
    /// The scan channel is handed back for termination whether or not the
    /// radio is on; only a running native scan needs stopping.
    pub fn stop_scan(&mut self) -> ScanStop {
        let native = self.state.is_powered_on();
        if !native {
            self.scan_is_waiting = false;
        }
        ScanStop {
            native,
            terminate: self.scan_channel.take(),
        }
    }

    /// Apply a radio state change.
    ///
    /// Returns `true` when a deferred scan must be started now.
    pub fn set_state(&mut self, state: AdapterState) -> bool {
        if state != self.state {
            info!("Adapter state changed: {} -> {}", self.state, state);
        }
        self.state = state;
        if state.is_powered_on() && self.scan_is_waiting {
            self.scan_is_waiting = false;
            return true;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_deferred_until_powered_on() {
        let mut adapter = AdapterController::new();
        assert_eq!(adapter.start_scan(CallbackId(1)), ScanStart::Deferred);
        assert!(adapter.scan_is_waiting());

        assert!(!adapter.set_state(AdapterState::PoweredOff));
        assert!(adapter.set_state(AdapterState::PoweredOn));
        assert!(!adapter.scan_is_waiting());
        // A second power-on event does not restart the scan.
        assert!(!adapter.set_state(AdapterState::PoweredOn));
    }

    #[test]
    fn test_scan_starts_immediately_when_powered_on() {
        let mut adapter = AdapterController::new();
        adapter.set_state(AdapterState::PoweredOn);
        assert_eq!(adapter.start_scan(CallbackId(2)), ScanStart::Native);
        assert_eq!(adapter.discovery_channel(), Some(CallbackId(2)));
    }

    #[test]
    fn test_stop_while_off_ends_the_waiting_scan() {
        let mut adapter = AdapterController::new();
        adapter.start_scan(CallbackId(1));
        assert_eq!(
            adapter.stop_scan(),
            ScanStop {
                native: false,
                terminate: Some(CallbackId(1)),
            }
        );
        assert_eq!(adapter.discovery_channel(), None);
        assert!(!adapter.set_state(AdapterState::PoweredOn));
        // Nothing left to terminate.
        assert_eq!(adapter.stop_scan(), ScanStop { native: true, terminate: None });
    }

    #[test]
    fn test_stop_while_on_terminates_channel() {
        let mut adapter = AdapterController::new();
        adapter.set_state(AdapterState::PoweredOn);
        adapter.start_scan(CallbackId(3));

        let stop = adapter.stop_scan();
        assert!(stop.native);
        assert_eq!(stop.terminate, Some(CallbackId(3)));
        assert_eq!(adapter.discovery_channel(), None);

        let again = adapter.stop_scan();
        assert!(again.native);
        assert_eq!(again.terminate, None);
    }
}
