//! Session manager and call dispatch.
//!
//! [`Bridge`] is the single owner of all bridge state: the adapter
//! controller, every [`DeviceSession`], and the identity index that keeps one
//! session per native peripheral. It is driven from one logical sequence:
//! [`Bridge::call`] for caller requests and [`Bridge::handle_event`] for native
//! completions. [`crate::service::BridgeService`] provides that sequence on a
//! tokio task.
//!
//! Native events are routed by [`Link`], not by peripheral alone. An event
//! whose link is not the live session's (a completion that was still in
//! flight when its session closed, say) is dropped and counted as stale, even
//! when the same peripheral has since been connected again.
//!
//! # Example
//!
//! ```
//! use blebridge_core::mock::{MockStack, RecordingSink};
//! use blebridge_core::{AdapterState, Bridge, BridgeConfig, Call, CallbackId, NativeEvent, Reply};
//!
//! let stack = MockStack::new().with_peripheral("AA:BB:CC:DD:EE:FF");
//! let sink = RecordingSink::new();
//! let mut bridge = Bridge::new(stack, sink.clone(), BridgeConfig::default());
//!
//! bridge.handle_event(NativeEvent::AdapterStateChanged(AdapterState::PoweredOn))?;
//! bridge.call(
//!     Call::Connect { locator: "AA:BB:CC:DD:EE:FF".into() },
//!     CallbackId(1),
//! );
//! assert!(matches!(sink.replies_for(CallbackId(1))[0], Reply::Connection(_)));
//! # Ok::<(), blebridge_core::Error>(())
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, error, info, instrument, warn};

use blebridge_types::uuid::CLIENT_CHARACTERISTIC_CONFIGURATION;
use blebridge_types::{
    AdapterState, CallbackId, CharProperties, CharacteristicRecord, ConnectInfo, ConnectionState,
    DescriptorRecord, DeviceHandle, ObjectHandle, ServiceRecord, ServiceType,
};

use crate::adapter::{AdapterController, ScanStart};
use crate::call::Call;
use crate::config::BridgeConfig;
use crate::error::{Error, Result};
use crate::metrics::BridgeMetrics;
use crate::native::{
    AttributePath, CentralStack, Link, NativeError, NativeEvent, PeripheralId, WriteKind,
};
use crate::queue::{Command, Operation, OperationKind, Target};
use crate::registry::{GattObject, duplicate_paths};
use crate::reply::{Delivery, Reply, ReplySink};
use crate::session::DeviceSession;

/// Bridge state machine.
pub struct Bridge<S, R> {
    stack: S,
    sink: R,
    config: BridgeConfig,
    adapter: AdapterController,
    sessions: HashMap<DeviceHandle, DeviceSession>,
    by_peripheral: HashMap<PeripheralId, DeviceHandle>,
    next_device_handle: u64,
    metrics: Arc<BridgeMetrics>,
}

impl<S: CentralStack, R: ReplySink> Bridge<S, R> {
    /// Create a bridge over a native stack, delivering replies to `sink`.
    pub fn new(stack: S, sink: R, config: BridgeConfig) -> Self {
        Self {
            stack,
            sink,
            config,
            adapter: AdapterController::new(),
            sessions: HashMap::new(),
            by_peripheral: HashMap::new(),
            next_device_handle: 1,
            metrics: Arc::new(BridgeMetrics::new()),
        }
    }

    /// Shared handle to the bridge counters.
    pub fn metrics(&self) -> Arc<BridgeMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Active configuration.
    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// The native stack.
    pub fn stack(&self) -> &S {
        &self.stack
    }

    /// The reply sink.
    pub fn sink(&self) -> &R {
        &self.sink
    }

    /// Current radio state.
    pub fn adapter_state(&self) -> AdapterState {
        self.adapter.state()
    }

    /// Whether a scan is waiting for the radio to power on.
    pub fn scan_is_waiting(&self) -> bool {
        self.adapter.scan_is_waiting()
    }

    /// Live session for a device handle.
    pub fn session(&self, device: DeviceHandle) -> Option<&DeviceSession> {
        self.sessions.get(&device)
    }

    /// Number of live sessions.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Execute one call. Failures are delivered as a terminal error reply on
    /// `channel`.
    pub fn call(&mut self, call: Call, channel: CallbackId) {
        let action = call.action();
        debug!("Call {} on channel {}", action, channel);
        if let Err(err) = self.dispatch(call, channel) {
            warn!("{} failed: {}", action, err);
            self.deliver(channel, Reply::from(&err), false);
        }
    }

    fn dispatch(&mut self, call: Call, channel: CallbackId) -> Result<()> {
        match call {
            Call::StartScan => self.start_scan(channel),
            Call::StopScan => {
                self.stop_scan();
                self.deliver(channel, Reply::NoResult, false);
                Ok(())
            }
            Call::Connect { locator } => self.connect(&locator, channel),
            Call::Close { device } => self.close(device, channel),
            Call::Rssi { device } => self.enqueue(device, channel, |_| Ok(Operation::ReadRssi)),
            Call::Services { device } => {
                self.enqueue(device, channel, |_| Ok(Operation::DiscoverServices))
            }
            Call::Characteristics { device, service } => self.enqueue(device, channel, |s| {
                Ok(Operation::DiscoverCharacteristics(
                    s.resolve_service(service)?.clone(),
                ))
            }),
            Call::Descriptors {
                device,
                characteristic,
            } => self.enqueue(device, channel, |s| {
                Ok(Operation::DiscoverDescriptors(
                    s.resolve_characteristic(characteristic)?.clone(),
                ))
            }),
            Call::ReadDescriptor { device, descriptor } => self.enqueue(device, channel, |s| {
                Ok(Operation::ReadDescriptor(
                    s.resolve_descriptor(descriptor)?.clone(),
                ))
            }),
            Call::ReadCharacteristic {
                device,
                characteristic,
            } => self.read_characteristic(device, characteristic, channel),
            Call::WriteCharacteristic {
                device,
                characteristic,
                value,
            } => self.write_characteristic(device, characteristic, value, channel),
            Call::WriteDescriptor {
                device,
                descriptor,
                value,
            } => self.write_descriptor(device, descriptor, value, channel),
            Call::EnableNotification {
                device,
                characteristic,
            } => self.enable_notification(device, characteristic, channel),
            Call::DisableNotification {
                device,
                characteristic,
            } => self.disable_notification(device, characteristic, channel),
            Call::Reset => {
                self.free_peripherals();
                self.deliver(channel, Reply::Ok, false);
                Ok(())
            }
        }
    }

    fn deliver(&self, channel: CallbackId, reply: Reply, keep_alive: bool) {
        self.sink
            .deliver(Delivery::new(channel, reply, keep_alive));
    }

    // --- adapter ---

    fn start_scan(&mut self, channel: CallbackId) -> Result<()> {
        if let Some(previous) = self.adapter.discovery_channel()
            && previous != channel
        {
            // Only one scan channel streams at a time.
            self.deliver(previous, Reply::NoResult, false);
        }
        match self.adapter.start_scan(channel) {
            ScanStart::Native => {
                info!("Starting scan");
                self.stack
                    .start_scan(self.config.allow_duplicate_scan_results);
            }
            ScanStart::Deferred => {
                info!("Scan requested while adapter is {}, waiting", self.adapter.state());
            }
        }
        Ok(())
    }

    fn stop_scan(&mut self) {
        let stop = self.adapter.stop_scan();
        if stop.native {
            info!("Stopping scan");
            self.stack.stop_scan();
        }
        if let Some(channel) = stop.terminate {
            self.deliver(channel, Reply::NoResult, false);
        }
    }

    // --- session lifecycle ---

    #[instrument(skip(self))]
    fn connect(&mut self, locator: &str, channel: CallbackId) -> Result<()> {
        let peripheral = self
            .stack
            .retrieve_peripheral(locator)
            .ok_or_else(|| Error::device_not_found(locator))?;
        if self.by_peripheral.contains_key(&peripheral) {
            return Err(Error::AlreadyConnected {
                locator: locator.to_string(),
            });
        }

        let handle = DeviceHandle(self.next_device_handle);
        self.next_device_handle += 1;
        let session = DeviceSession::new(handle, peripheral.clone(), locator, channel);
        let link = session.link().clone();
        self.sessions.insert(handle, session);
        self.by_peripheral.insert(peripheral, handle);
        self.metrics.session_opened();
        info!("Connecting to {} as device {}", link, handle);

        self.deliver(
            channel,
            Reply::Connection(ConnectInfo {
                device_handle: handle,
                state: ConnectionState::Connecting,
            }),
            true,
        );
        self.stack.connect(&link);
        Ok(())
    }

    #[instrument(skip(self))]
    fn close(&mut self, device: DeviceHandle, channel: CallbackId) -> Result<()> {
        let session = self.teardown(device, true)?;
        self.deliver(session.connect_channel(), Reply::NoResult, false);
        self.deliver(channel, Reply::NoResult, false);
        Ok(())
    }

    /// Stop any scan and tear down every session, disconnecting each.
    ///
    /// Connect channels are terminated with a no-result completion.
    pub fn free_peripherals(&mut self) {
        self.stop_scan();
        let mut handles: Vec<DeviceHandle> = self.sessions.keys().copied().collect();
        handles.sort();
        for handle in handles {
            if let Ok(session) = self.teardown(handle, true) {
                self.deliver(session.connect_channel(), Reply::NoResult, false);
            }
        }
        info!("Freed all peripherals");
    }

    /// Remove a session and forget everything it held.
    fn teardown(&mut self, device: DeviceHandle, disconnect: bool) -> Result<DeviceSession> {
        let mut session = self
            .sessions
            .remove(&device)
            .ok_or_else(|| Error::unknown_device(device))?;
        self.by_peripheral.remove(session.peripheral());
        if disconnect {
            self.stack.cancel_connection(session.link());
        }
        let dropped = session.clear();
        if dropped > 0 {
            debug!("Dropped {} pending commands for device {}", dropped, device);
            self.metrics.commands_dropped(dropped);
        }
        self.metrics.session_closed();
        info!("Device {} ({}) torn down", device, session.locator());
        Ok(session)
    }

    // --- queued operations ---

    fn enqueue<F>(&mut self, device: DeviceHandle, channel: CallbackId, build: F) -> Result<()>
    where
        F: FnOnce(&DeviceSession) -> Result<Operation>,
    {
        let session = lookup(&mut self.sessions, device)?;
        let operation = build(&*session)?;
        self.metrics.command_issued();
        session.enqueue(&mut self.stack, Command::new(channel, operation));
        Ok(())
    }

    fn write_characteristic(
        &mut self,
        device: DeviceHandle,
        handle: ObjectHandle,
        value: Vec<u8>,
        channel: CallbackId,
    ) -> Result<()> {
        let session = lookup(&mut self.sessions, device)?;
        let characteristic = session.resolve_characteristic(handle)?.clone();

        if characteristic.properties.contains(CharProperties::WRITE) {
            self.metrics.command_issued();
            session.enqueue(
                &mut self.stack,
                Command::new(
                    channel,
                    Operation::WriteCharacteristic {
                        characteristic,
                        value,
                    },
                ),
            );
        } else if characteristic
            .properties
            .contains(CharProperties::WRITE_WITHOUT_RESPONSE)
        {
            // No acknowledgment will ever arrive.
            self.stack.write_characteristic(
                session.link(),
                &characteristic,
                &value,
                WriteKind::WithoutResponse,
            );
            self.deliver(channel, Reply::Ok, false);
        } else {
            return Err(Error::OperationNotPermitted {
                operation: "writeCharacteristic",
                reason: format!("characteristic {} is not writable", characteristic.uuid),
            });
        }
        Ok(())
    }

    fn write_descriptor(
        &mut self,
        device: DeviceHandle,
        handle: ObjectHandle,
        value: Vec<u8>,
        channel: CallbackId,
    ) -> Result<()> {
        let session = lookup(&mut self.sessions, device)?;
        let descriptor = session.resolve_descriptor(handle)?.clone();

        if descriptor.uuid == CLIENT_CHARACTERISTIC_CONFIGURATION {
            // The stack manages this descriptor through set_notify.
            debug!("Accepting write to client configuration descriptor without writing");
            self.deliver(channel, Reply::Ok, false);
            return Ok(());
        }

        self.metrics.command_issued();
        session.enqueue(
            &mut self.stack,
            Command::new(channel, Operation::WriteDescriptor { descriptor, value }),
        );
        Ok(())
    }

    // --- characteristic values ---

    fn read_characteristic(
        &mut self,
        device: DeviceHandle,
        handle: ObjectHandle,
        channel: CallbackId,
    ) -> Result<()> {
        let session = lookup(&mut self.sessions, device)?;
        let characteristic = session.resolve_characteristic(handle)?.clone();
        session
            .callbacks_mut()
            .set_one_shot(characteristic.path(), channel);
        self.stack
            .read_characteristic(session.link(), &characteristic);
        Ok(())
    }

    fn enable_notification(
        &mut self,
        device: DeviceHandle,
        handle: ObjectHandle,
        channel: CallbackId,
    ) -> Result<()> {
        let session = lookup(&mut self.sessions, device)?;
        let characteristic = session.resolve_characteristic(handle)?.clone();
        session
            .callbacks_mut()
            .set_persistent(characteristic.path(), channel);
        self.stack
            .set_notify(session.link(), &characteristic, true);
        debug!("Notifications enabled for {}", characteristic.path());
        Ok(())
    }

    fn disable_notification(
        &mut self,
        device: DeviceHandle,
        handle: ObjectHandle,
        channel: CallbackId,
    ) -> Result<()> {
        let session = lookup(&mut self.sessions, device)?;
        let characteristic = session.resolve_characteristic(handle)?.clone();
        self.stack
            .set_notify(session.link(), &characteristic, false);
        let previous = session.callbacks_mut().remove(&characteristic.path());
        debug!("Notifications disabled for {}", characteristic.path());

        if let Some(entry) = previous
            && entry.channel != channel
        {
            self.deliver(entry.channel, Reply::NoResult, false);
        }
        self.deliver(channel, Reply::NoResult, false);
        Ok(())
    }

    // --- native events ---

    /// Process one native event.
    ///
    /// Events of a link that is no longer live are dropped and counted as
    /// stale. Returns [`Error::ProtocolViolation`] when a completion for the
    /// live link does not match the device's active command; no state is
    /// changed in that case.
    pub fn handle_event(&mut self, event: NativeEvent) -> Result<()> {
        match event {
            NativeEvent::AdapterStateChanged(state) => {
                if self.adapter.set_state(state) {
                    info!("Adapter powered on, starting deferred scan");
                    self.stack
                        .start_scan(self.config.allow_duplicate_scan_results);
                }
                Ok(())
            }
            NativeEvent::DeviceDiscovered(advertisement) => {
                match self.adapter.discovery_channel() {
                    Some(channel) => {
                        self.deliver(channel, Reply::Scan(advertisement.to_record()), true)
                    }
                    None => debug!(
                        "Discovery of {} with no scan channel",
                        advertisement.peripheral
                    ),
                }
                Ok(())
            }
            NativeEvent::Connected { link } => {
                self.on_connected(&link);
                Ok(())
            }
            NativeEvent::ConnectFailed { link, error } => {
                self.on_connect_failed(&link, error);
                Ok(())
            }
            NativeEvent::Disconnected { link, error } => {
                self.on_disconnected(&link, error);
                Ok(())
            }
            NativeEvent::RssiRead { link, result } => self.complete(
                &link,
                Target::Peripheral,
                OperationKind::RssiRead,
                |_, _| {
                    result
                        .map(Reply::Rssi)
                        .map_err(|e| Error::native("rssi", e))
                },
            ),
            NativeEvent::ServicesDiscovered { link, result } => self.complete(
                &link,
                Target::Peripheral,
                OperationKind::ServiceDiscovery,
                |session, metrics| {
                    let services = discovered(result, "services", &link, metrics, |s| s.path());
                    let records = services
                        .into_iter()
                        .map(|service| {
                            let uuid = service.uuid;
                            let service_type = ServiceType::from_primary(service.primary);
                            let handle = session.register(GattObject::Service(service));
                            ServiceRecord {
                                handle,
                                uuid,
                                service_type,
                            }
                        })
                        .collect();
                    Ok(Reply::Services(records))
                },
            ),
            NativeEvent::CharacteristicsDiscovered {
                link,
                service,
                result,
            } => self.complete(
                &link,
                Target::Attribute(service),
                OperationKind::CharacteristicDiscovery,
                |session, metrics| {
                    let characteristics =
                        discovered(result, "characteristics", &link, metrics, |c| c.path());
                    let records = characteristics
                        .into_iter()
                        .map(|characteristic| {
                            let (uuid, properties) = (characteristic.uuid, characteristic.properties);
                            let handle =
                                session.register(GattObject::Characteristic(characteristic));
                            CharacteristicRecord::new(handle, uuid, properties)
                        })
                        .collect();
                    Ok(Reply::Characteristics(records))
                },
            ),
            NativeEvent::DescriptorsDiscovered {
                link,
                characteristic,
                result,
            } => self.complete(
                &link,
                Target::Attribute(characteristic),
                OperationKind::DescriptorDiscovery,
                |session, metrics| {
                    let descriptors =
                        discovered(result, "descriptors", &link, metrics, |d| d.path());
                    let records = descriptors
                        .into_iter()
                        .map(|descriptor| {
                            let uuid = descriptor.uuid;
                            let handle = session.register(GattObject::Descriptor(descriptor));
                            DescriptorRecord::new(handle, uuid)
                        })
                        .collect();
                    Ok(Reply::Descriptors(records))
                },
            ),
            NativeEvent::DescriptorValue {
                link,
                descriptor,
                result,
            } => self.complete(
                &link,
                Target::Attribute(descriptor),
                OperationKind::DescriptorRead,
                |_, _| {
                    result
                        .map(Reply::Data)
                        .map_err(|e| Error::native("readDescriptor", e))
                },
            ),
            NativeEvent::CharacteristicWritten {
                link,
                characteristic,
                result,
            } => self.complete(
                &link,
                Target::Attribute(characteristic),
                OperationKind::CharacteristicWrite,
                |_, _| {
                    result
                        .map(|()| Reply::Ok)
                        .map_err(|e| Error::native("writeCharacteristic", e))
                },
            ),
            NativeEvent::DescriptorWritten {
                link,
                descriptor,
                result,
            } => self.complete(
                &link,
                Target::Attribute(descriptor),
                OperationKind::DescriptorWrite,
                |_, _| {
                    result
                        .map(|()| Reply::Ok)
                        .map_err(|e| Error::native("writeDescriptor", e))
                },
            ),
            NativeEvent::CharacteristicValue {
                link,
                characteristic,
                result,
            } => {
                self.on_value_update(&link, &characteristic, result);
                Ok(())
            }
        }
    }

    /// Handle of the session that owns `link`, if it is still live.
    ///
    /// A peripheral that was closed and connected again has a new session
    /// with a new link, so events of the old link find nothing here.
    fn live_handle(&self, link: &Link) -> Option<DeviceHandle> {
        let handle = *self.by_peripheral.get(&link.peripheral)?;
        let session = self.sessions.get(&handle)?;
        (session.link() == link).then_some(handle)
    }

    fn ignore_stale(&self, what: &str, link: &Link) {
        debug!("Ignoring {} for {} with no live session", what, link);
        self.metrics.stale_event();
    }

    fn on_connected(&mut self, link: &Link) {
        let Some(handle) = self.live_handle(link) else {
            self.ignore_stale("connect completion", link);
            return;
        };
        let Ok(session) = lookup(&mut self.sessions, handle) else {
            return;
        };
        session.set_state(ConnectionState::Connected);
        let channel = session.connect_channel();
        info!("Device {} connected", handle);
        self.deliver(
            channel,
            Reply::Connection(ConnectInfo {
                device_handle: handle,
                state: ConnectionState::Connected,
            }),
            true,
        );
    }

    fn on_connect_failed(&mut self, link: &Link, error: NativeError) {
        let Some(handle) = self.live_handle(link) else {
            self.ignore_stale("connect failure", link);
            return;
        };
        // Nothing to disconnect: the link never came up.
        let Ok(session) = self.teardown(handle, false) else {
            return;
        };
        warn!("Connection to {} failed: {}", session.locator(), error);
        let err = Error::ConnectFailed {
            locator: session.locator().to_string(),
            reason: error.to_string(),
        };
        self.deliver(session.connect_channel(), Reply::from(&err), false);
    }

    fn on_disconnected(&mut self, link: &Link, error: Option<NativeError>) {
        let Some(handle) = self.live_handle(link) else {
            self.ignore_stale("disconnect", link);
            return;
        };
        // The link is already down: no native disconnect.
        let Ok(session) = self.teardown(handle, false) else {
            return;
        };
        match error {
            Some(error) => warn!("Device {} disconnected: {}", handle, error),
            None => info!("Device {} disconnected", handle),
        }
        self.deliver(
            session.connect_channel(),
            Reply::Connection(ConnectInfo {
                device_handle: handle,
                state: ConnectionState::Disconnected,
            }),
            false,
        );
    }

    fn on_value_update(
        &mut self,
        link: &Link,
        characteristic: &AttributePath,
        result: std::result::Result<Vec<u8>, NativeError>,
    ) {
        let Some(handle) = self.live_handle(link) else {
            self.ignore_stale("value update", link);
            return;
        };
        let Ok(session) = lookup(&mut self.sessions, handle) else {
            return;
        };
        let Some(dispatch) = session.callbacks_mut().dispatch(characteristic) else {
            // Typically a notification already queued when it was disabled.
            debug!("Dropping value update for {} with no callback", characteristic);
            self.metrics.value_update(false);
            return;
        };

        let delivery = match result {
            Ok(value) => Delivery::new(dispatch.channel, Reply::Data(value), dispatch.keep_alive),
            Err(error) => {
                if dispatch.keep_alive {
                    session.callbacks_mut().remove(characteristic);
                }
                let err = Error::native("readCharacteristic", error);
                warn!("Value update for {} failed: {}", characteristic, err);
                Delivery::new(dispatch.channel, Reply::from(&err), false)
            }
        };
        self.metrics.value_update(true);
        self.sink.deliver(delivery);
    }

    /// Finish the active command of a device.
    ///
    /// The queue advances whether `produce` succeeds or fails.
    fn complete<F>(
        &mut self,
        link: &Link,
        target: Target,
        kind: OperationKind,
        produce: F,
    ) -> Result<()>
    where
        F: FnOnce(&mut DeviceSession, &BridgeMetrics) -> Result<Reply>,
    {
        let Some(handle) = self.live_handle(link) else {
            self.ignore_stale("completion", link);
            return Ok(());
        };
        let Some(session) = self.sessions.get_mut(&handle) else {
            self.metrics.stale_event();
            return Ok(());
        };

        let channel = match session.expect_completion(target, kind) {
            Ok(active) => active.channel,
            Err(err) => {
                self.metrics.protocol_violation();
                error!("Device {}: {}", handle, err);
                return Err(err);
            }
        };

        let reply = match produce(&mut *session, &self.metrics) {
            Ok(reply) => {
                self.metrics.command_completed(true);
                reply
            }
            Err(err) => {
                self.metrics.command_completed(false);
                warn!("Device {} {} failed: {}", handle, kind, err);
                Reply::from(&err)
            }
        };
        self.sink.deliver(Delivery::new(channel, reply, false));
        session.advance(&mut self.stack);
        Ok(())
    }
}

fn lookup(
    sessions: &mut HashMap<DeviceHandle, DeviceSession>,
    device: DeviceHandle,
) -> Result<&mut DeviceSession> {
    sessions
        .get_mut(&device)
        .ok_or_else(|| Error::unknown_device(device))
}

/// Discovery failures become an empty result.
///
/// Attributes listed twice under one parent share a path and therefore a
/// handle; each such path is logged and counted.
fn discovered<T>(
    result: std::result::Result<Vec<T>, NativeError>,
    what: &str,
    link: &Link,
    metrics: &BridgeMetrics,
    path: impl Fn(&T) -> AttributePath,
) -> Vec<T> {
    let objects = match result {
        Ok(objects) => objects,
        Err(error) => {
            warn!("Discovering {} on {} failed: {}", what, link, error);
            return Vec::new();
        }
    };
    for duplicate in duplicate_paths(objects.iter().map(&path)) {
        warn!(
            "Discovering {} on {} returned {} more than once; they share one handle",
            what, link, duplicate
        );
        metrics.duplicate_attribute();
    }
    objects
}

impl<S, R> std::fmt::Debug for Bridge<S, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bridge")
            .field("adapter", &self.adapter)
            .field("sessions", &self.sessions.len())
            .field("next_device_handle", &self.next_device_handle)
            .finish_non_exhaustive()
    }
}
