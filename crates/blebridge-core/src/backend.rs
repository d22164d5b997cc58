//! [`CentralStack`] over btleplug.
//!
//! Every initiator spawns a task on the runtime that was current when the
//! stack was created, and the task reports its outcome on the event channel
//! returned by [`BtleplugStack::new`]. A pump task forwards adapter events
//! (advertisements, disconnections) to the same channel, and each connected
//! peripheral gets a task forwarding its notifications.
//!
//! The stack remembers the open [`Link`] of each peripheral. btleplug reports
//! a disconnection by peripheral only, and it does so for local disconnects
//! too, so a disconnection is forwarded only while the link that was brought
//! up is still open. Closing a link forgets it first, which keeps the
//! disconnect the close causes from reaching a later link.
//!
//! Peripherals are known by locator: the Bluetooth address, or the platform
//! ID where the stack hides the address. Only peripherals seen by a scan
//! can be retrieved.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use btleplug::api::{
    Central as _, CentralEvent, Characteristic, Descriptor, Manager as _, Peripheral as _,
    ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId as PlatformId};
use futures::StreamExt;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use blebridge_types::{AdapterState, CharProperties};

use crate::advertisement::Advertisement;
use crate::error::{DeviceNotFoundReason, Error, Result};
use crate::native::{
    AttributePath, CentralStack, Link, NativeCharacteristic, NativeDescriptor, NativeError,
    NativeEvent, NativeService, PeripheralId, WriteKind,
};
use crate::util::create_identifier;

type NativeResult<T> = std::result::Result<T, NativeError>;

/// Get the first available Bluetooth adapter.
pub async fn get_adapter() -> Result<Adapter> {
    let manager = Manager::new().await?;
    let adapters = manager.adapters().await?;

    adapters
        .into_iter()
        .next()
        .ok_or(Error::DeviceNotFound(DeviceNotFoundReason::NoAdapter))
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Open link of one peripheral.
#[derive(Debug, Clone)]
struct OpenLink {
    link: Link,
    up: bool,
}

#[derive(Default)]
struct Shared {
    peripherals: Mutex<HashMap<String, Peripheral>>,
    reported: Mutex<HashSet<String>>,
    allow_duplicates: AtomicBool,
    links: Mutex<HashMap<PeripheralId, OpenLink>>,
    notification_tasks: Mutex<HashMap<PeripheralId, JoinHandle<()>>>,
}

impl Shared {
    fn peripheral(&self, id: &PeripheralId) -> NativeResult<Peripheral> {
        lock(&self.peripherals)
            .get(id.as_str())
            .cloned()
            .ok_or_else(|| NativeError::new(format!("unknown peripheral {}", id)))
    }

    fn locator_for(&self, platform_id: &PlatformId) -> Option<String> {
        lock(&self.peripherals)
            .iter()
            .find(|(_, p)| p.id() == *platform_id)
            .map(|(locator, _)| locator.clone())
    }

    /// Whether this advertisement should be reported under the current
    /// duplicate policy.
    fn should_report(&self, locator: &str) -> bool {
        let first = lock(&self.reported).insert(locator.to_string());
        first || self.allow_duplicates.load(Ordering::Relaxed)
    }

    fn open_link(&self, link: &Link) {
        let entry = OpenLink {
            link: link.clone(),
            up: false,
        };
        lock(&self.links).insert(link.peripheral.clone(), entry);
    }

    /// Mark `link` connected. Returns `false` if it was closed meanwhile.
    fn link_up(&self, link: &Link) -> bool {
        match lock(&self.links).get_mut(&link.peripheral) {
            Some(open) if open.link == *link => {
                open.up = true;
                true
            }
            _ => false,
        }
    }

    /// Forget `link` unless a newer link of the peripheral replaced it.
    fn close_link(&self, link: &Link) {
        let mut links = lock(&self.links);
        if links
            .get(&link.peripheral)
            .is_some_and(|open| open.link == *link)
        {
            links.remove(&link.peripheral);
        }
    }

    /// The link a disconnection of `id` ends, if one is up.
    fn take_disconnected(&self, id: &PeripheralId) -> Option<Link> {
        let mut links = lock(&self.links);
        if !links.get(id).is_some_and(|open| open.up) {
            return None;
        }
        links.remove(id).map(|open| open.link)
    }

    fn stop_notifications(&self, id: &PeripheralId) {
        if let Some(task) = lock(&self.notification_tasks).remove(id) {
            task.abort();
        }
    }
}

/// btleplug-backed [`CentralStack`].
pub struct BtleplugStack {
    adapter: Adapter,
    runtime: Handle,
    events: mpsc::UnboundedSender<NativeEvent>,
    shared: Arc<Shared>,
    cancel_token: CancellationToken,
}

impl BtleplugStack {
    /// Open the first adapter and start forwarding its events.
    ///
    /// Must be called from within a tokio runtime.
    pub async fn new() -> Result<(Self, mpsc::UnboundedReceiver<NativeEvent>)> {
        let adapter = get_adapter().await?;
        Self::with_adapter(adapter).await
    }

    /// Wrap an adapter the caller already opened.
    #[tracing::instrument(level = "info", skip_all)]
    pub async fn with_adapter(
        adapter: Adapter,
    ) -> Result<(Self, mpsc::UnboundedReceiver<NativeEvent>)> {
        let (events, receiver) = mpsc::unbounded_channel();
        let central_events = adapter.events().await?;
        let shared = Arc::new(Shared::default());
        let cancel_token = CancellationToken::new();

        let runtime = Handle::current();
        runtime.spawn(pump(
            adapter.clone(),
            central_events,
            Arc::clone(&shared),
            events.clone(),
            cancel_token.clone(),
        ));

        // btleplug exposes no power state; an opened adapter is usable.
        let _ = events.send(NativeEvent::AdapterStateChanged(AdapterState::PoweredOn));
        info!("BLE adapter opened");

        let stack = Self {
            adapter,
            runtime,
            events,
            shared,
            cancel_token,
        };
        Ok((stack, receiver))
    }

    /// The wrapped adapter.
    pub fn adapter(&self) -> &Adapter {
        &self.adapter
    }

    /// Locators of every peripheral seen so far.
    pub fn known_locators(&self) -> Vec<String> {
        let mut locators: Vec<_> = lock(&self.shared.peripherals).keys().cloned().collect();
        locators.sort();
        locators
    }

    /// Spawn `op` against the link's peripheral and send `finish(result)`
    /// when it resolves. An unknown peripheral finishes immediately with an
    /// error.
    fn spawn_op<T, Op, Fut, Finish>(&self, link: &Link, op: Op, finish: Finish)
    where
        T: Send + 'static,
        Op: FnOnce(Peripheral) -> Fut + Send + 'static,
        Fut: Future<Output = NativeResult<T>> + Send + 'static,
        Finish: FnOnce(Link, NativeResult<T>) -> NativeEvent + Send + 'static,
    {
        let id = link.clone();
        let target = self.shared.peripheral(&link.peripheral);
        let events = self.events.clone();
        self.runtime.spawn(async move {
            let result = match target {
                Ok(p) => op(p).await,
                Err(e) => Err(e),
            };
            if events.send(finish(id, result)).is_err() {
                debug!("Event receiver dropped, completion discarded");
            }
        });
    }

    /// Spawn `op` without reporting a completion; failures are logged.
    fn spawn_silent<Op, Fut>(&self, link: &Link, what: &'static str, op: Op)
    where
        Op: FnOnce(Peripheral) -> Fut + Send + 'static,
        Fut: Future<Output = NativeResult<()>> + Send + 'static,
    {
        let id = link.clone();
        let target = self.shared.peripheral(&link.peripheral);
        self.runtime.spawn(async move {
            let result = match target {
                Ok(p) => op(p).await,
                Err(e) => Err(e),
            };
            if let Err(e) = result {
                warn!("{} on {} failed: {}", what, id, e);
            }
        });
    }
}

impl Drop for BtleplugStack {
    fn drop(&mut self) {
        self.cancel_token.cancel();
        for (_, task) in lock(&self.shared.notification_tasks).drain() {
            task.abort();
        }
    }
}

impl std::fmt::Debug for BtleplugStack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BtleplugStack")
            .field("known_peripherals", &lock(&self.shared.peripherals).len())
            .finish_non_exhaustive()
    }
}

impl CentralStack for BtleplugStack {
    fn start_scan(&mut self, allow_duplicates: bool) {
        self.shared
            .allow_duplicates
            .store(allow_duplicates, Ordering::Relaxed);
        lock(&self.shared.reported).clear();

        let adapter = self.adapter.clone();
        self.runtime.spawn(async move {
            if let Err(e) = adapter.start_scan(ScanFilter::default()).await {
                warn!("Failed to start scan: {}", e);
            }
        });
    }

    fn stop_scan(&mut self) {
        let adapter = self.adapter.clone();
        self.runtime.spawn(async move {
            if let Err(e) = adapter.stop_scan().await {
                warn!("Failed to stop scan: {}", e);
            }
        });
    }

    fn retrieve_peripheral(&self, locator: &str) -> Option<PeripheralId> {
        lock(&self.shared.peripherals)
            .keys()
            .find(|known| known.eq_ignore_ascii_case(locator))
            .map(|known| PeripheralId::new(known.as_str()))
    }

    fn connect(&mut self, link: &Link) {
        self.shared.open_link(link);
        let events = self.events.clone();
        let shared = Arc::clone(&self.shared);
        let runtime = self.runtime.clone();
        let id = link.clone();
        self.spawn_op(
            link,
            move |p| connect_and_forward(p, id, events, shared, runtime),
            |link, result| match result {
                Ok(()) => NativeEvent::Connected { link },
                Err(error) => NativeEvent::ConnectFailed { link, error },
            },
        );
    }

    fn cancel_connection(&mut self, link: &Link) {
        // Forget the link before disconnecting so the resulting
        // DeviceDisconnected is not forwarded.
        self.shared.close_link(link);
        self.shared.stop_notifications(&link.peripheral);
        self.spawn_silent(link, "disconnect", |p| async move {
            p.disconnect().await.map_err(NativeError::from)
        });
    }

    fn read_rssi(&mut self, link: &Link) {
        self.spawn_op(link, read_rssi, |link, result| {
            NativeEvent::RssiRead { link, result }
        });
    }

    fn discover_services(&mut self, link: &Link) {
        self.spawn_op(link, discover_services, |link, result| {
            NativeEvent::ServicesDiscovered { link, result }
        });
    }

    fn discover_characteristics(&mut self, link: &Link, service: &NativeService) {
        let path = service.path();
        let service = service.clone();
        self.spawn_op(
            link,
            move |p| characteristics_of(p, service),
            move |link, result| NativeEvent::CharacteristicsDiscovered {
                link,
                service: path,
                result,
            },
        );
    }

    fn discover_descriptors(
        &mut self,
        link: &Link,
        characteristic: &NativeCharacteristic,
    ) {
        let path = characteristic.path();
        let characteristic = characteristic.clone();
        self.spawn_op(
            link,
            move |p| descriptors_of(p, characteristic),
            move |link, result| NativeEvent::DescriptorsDiscovered {
                link,
                characteristic: path,
                result,
            },
        );
    }

    fn read_characteristic(
        &mut self,
        link: &Link,
        characteristic: &NativeCharacteristic,
    ) {
        let path = characteristic.path();
        let characteristic = characteristic.clone();
        self.spawn_op(
            link,
            move |p| read_characteristic(p, characteristic),
            move |link, result| NativeEvent::CharacteristicValue {
                link,
                characteristic: path,
                result,
            },
        );
    }

    fn read_descriptor(&mut self, link: &Link, descriptor: &NativeDescriptor) {
        let path = descriptor.path();
        let descriptor = descriptor.clone();
        self.spawn_op(
            link,
            move |p| read_descriptor(p, descriptor),
            move |link, result| NativeEvent::DescriptorValue {
                link,
                descriptor: path,
                result,
            },
        );
    }

    fn write_characteristic(
        &mut self,
        link: &Link,
        characteristic: &NativeCharacteristic,
        value: &[u8],
        kind: WriteKind,
    ) {
        let path = characteristic.path();
        let characteristic = characteristic.clone();
        let value = value.to_vec();
        match kind {
            WriteKind::WithResponse => self.spawn_op(
                link,
                move |p| write_characteristic(p, characteristic, value, WriteType::WithResponse),
                move |link, result| NativeEvent::CharacteristicWritten {
                    link,
                    characteristic: path,
                    result,
                },
            ),
            WriteKind::WithoutResponse => {
                self.spawn_silent(link, "write without response", move |p| {
                    write_characteristic(p, characteristic, value, WriteType::WithoutResponse)
                })
            }
        }
    }

    fn write_descriptor(
        &mut self,
        link: &Link,
        descriptor: &NativeDescriptor,
        value: &[u8],
    ) {
        let path = descriptor.path();
        let descriptor = descriptor.clone();
        let value = value.to_vec();
        self.spawn_op(
            link,
            move |p| write_descriptor(p, descriptor, value),
            move |link, result| NativeEvent::DescriptorWritten {
                link,
                descriptor: path,
                result,
            },
        );
    }

    fn set_notify(
        &mut self,
        link: &Link,
        characteristic: &NativeCharacteristic,
        enabled: bool,
    ) {
        let path = characteristic.path();
        let characteristic = characteristic.clone();
        if enabled {
            // A failed subscription ends the subscriber's channel through an
            // errored value event.
            let events = self.events.clone();
            let id = link.clone();
            self.spawn_silent(link, "subscribe", move |p| async move {
                if let Err(error) = set_notify(p, characteristic, true).await {
                    let _ = events.send(NativeEvent::CharacteristicValue {
                        link: id,
                        characteristic: path,
                        result: Err(error),
                    });
                }
                Ok::<(), NativeError>(())
            });
        } else {
            self.spawn_silent(link, "unsubscribe", move |p| {
                set_notify(p, characteristic, false)
            });
        }
    }
}

async fn pump(
    adapter: Adapter,
    mut central_events: std::pin::Pin<Box<dyn futures::Stream<Item = CentralEvent> + Send>>,
    shared: Arc<Shared>,
    events: mpsc::UnboundedSender<NativeEvent>,
    cancel_token: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = cancel_token.cancelled() => break,
            event = central_events.next() => match event {
                Some(event) => event,
                None => break,
            },
        };

        let forwarded = match event {
            CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => {
                match advertisement_for(&adapter, &id, &shared).await {
                    Ok(Some(adv)) => Some(NativeEvent::DeviceDiscovered(adv)),
                    Ok(None) => None,
                    Err(e) => {
                        debug!("Ignoring advertisement from {:?}: {}", id, e);
                        None
                    }
                }
            }
            CentralEvent::DeviceDisconnected(id) => {
                let peripheral = shared.locator_for(&id).map(PeripheralId::new);
                match peripheral.and_then(|p| shared.take_disconnected(&p)) {
                    Some(link) => {
                        shared.stop_notifications(&link.peripheral);
                        Some(NativeEvent::Disconnected { link, error: None })
                    }
                    None => {
                        debug!("Ignoring disconnection of {:?} with no open link", id);
                        None
                    }
                }
            }
            _ => None,
        };

        if let Some(event) = forwarded
            && events.send(event).is_err()
        {
            break;
        }
    }
    debug!("Adapter event pump stopped");
}

async fn advertisement_for(
    adapter: &Adapter,
    id: &PlatformId,
    shared: &Shared,
) -> NativeResult<Option<Advertisement>> {
    let peripheral = adapter.peripheral(id).await?;
    let Some(props) = peripheral.properties().await? else {
        return Ok(None);
    };

    let locator = create_identifier(&props.address.to_string(), id);
    lock(&shared.peripherals).insert(locator.clone(), peripheral);
    if !shared.should_report(&locator) {
        return Ok(None);
    }

    Ok(Some(Advertisement {
        peripheral: PeripheralId::new(locator),
        rssi: props.rssi,
        local_name: props.local_name,
        tx_power_level: props.tx_power_level,
        services: props.services,
        service_data: props.service_data.into_iter().collect(),
        manufacturer_data: props.manufacturer_data.into_iter().collect(),
    }))
}

#[tracing::instrument(level = "info", skip_all, fields(link = %link))]
async fn connect_and_forward(
    peripheral: Peripheral,
    link: Link,
    events: mpsc::UnboundedSender<NativeEvent>,
    shared: Arc<Shared>,
    runtime: Handle,
) -> NativeResult<()> {
    if let Err(e) = peripheral.connect().await {
        shared.close_link(&link);
        return Err(e.into());
    }
    if !shared.link_up(&link) {
        // Closed while connecting.
        if let Err(e) = peripheral.disconnect().await {
            warn!("Disconnect after cancelled connect failed: {}", e);
        }
        return Err(NativeError::new("connection cancelled"));
    }
    info!("Connected");

    let mut notifications = peripheral.notifications().await?;
    let key = link.peripheral.clone();
    let task = runtime.spawn(async move {
        while let Some(notification) = notifications.next().await {
            let Some(service) = service_of(&peripheral, notification.uuid) else {
                debug!("Notification for unknown characteristic {}", notification.uuid);
                continue;
            };
            let event = NativeEvent::CharacteristicValue {
                link: link.clone(),
                characteristic: AttributePath::characteristic(service, notification.uuid),
                result: Ok(notification.value),
            };
            if events.send(event).is_err() {
                break;
            }
        }
    });
    if let Some(previous) = lock(&shared.notification_tasks).insert(key, task) {
        previous.abort();
    }
    Ok(())
}

fn service_of(peripheral: &Peripheral, characteristic: uuid::Uuid) -> Option<uuid::Uuid> {
    peripheral
        .characteristics()
        .into_iter()
        .find(|c| c.uuid == characteristic)
        .map(|c| c.service_uuid)
}

fn native_characteristic(characteristic: &Characteristic) -> NativeCharacteristic {
    NativeCharacteristic {
        service: characteristic.service_uuid,
        uuid: characteristic.uuid,
        properties: CharProperties::from_bits_truncate(characteristic.properties.bits().into()),
    }
}

fn find_characteristic(
    peripheral: &Peripheral,
    target: &NativeCharacteristic,
) -> NativeResult<Characteristic> {
    peripheral
        .characteristics()
        .into_iter()
        .find(|c| c.service_uuid == target.service && c.uuid == target.uuid)
        .ok_or_else(|| NativeError::new(format!("characteristic {} not found", target.path())))
}

fn find_descriptor(peripheral: &Peripheral, target: &NativeDescriptor) -> NativeResult<Descriptor> {
    peripheral
        .characteristics()
        .into_iter()
        .filter(|c| c.service_uuid == target.service && c.uuid == target.characteristic)
        .flat_map(|c| c.descriptors)
        .find(|d| d.uuid == target.uuid)
        .ok_or_else(|| NativeError::new(format!("descriptor {} not found", target.path())))
}

async fn read_rssi(peripheral: Peripheral) -> NativeResult<i16> {
    peripheral
        .properties()
        .await?
        .and_then(|props| props.rssi)
        .ok_or_else(|| NativeError::new("RSSI not available"))
}

async fn discover_services(peripheral: Peripheral) -> NativeResult<Vec<NativeService>> {
    peripheral.discover_services().await?;
    Ok(peripheral
        .services()
        .into_iter()
        .map(|service| NativeService {
            uuid: service.uuid,
            primary: service.primary,
        })
        .collect())
}

async fn characteristics_of(
    peripheral: Peripheral,
    service: NativeService,
) -> NativeResult<Vec<NativeCharacteristic>> {
    let found = peripheral
        .services()
        .into_iter()
        .find(|s| s.uuid == service.uuid)
        .ok_or_else(|| NativeError::new(format!("service {} not found", service.uuid)))?;
    Ok(found.characteristics.iter().map(native_characteristic).collect())
}

async fn descriptors_of(
    peripheral: Peripheral,
    characteristic: NativeCharacteristic,
) -> NativeResult<Vec<NativeDescriptor>> {
    let found = find_characteristic(&peripheral, &characteristic)?;
    Ok(found
        .descriptors
        .iter()
        .map(|d| NativeDescriptor {
            service: d.service_uuid,
            characteristic: d.characteristic_uuid,
            uuid: d.uuid,
        })
        .collect())
}

async fn read_characteristic(
    peripheral: Peripheral,
    characteristic: NativeCharacteristic,
) -> NativeResult<Vec<u8>> {
    let target = find_characteristic(&peripheral, &characteristic)?;
    Ok(peripheral.read(&target).await?)
}

async fn read_descriptor(
    peripheral: Peripheral,
    descriptor: NativeDescriptor,
) -> NativeResult<Vec<u8>> {
    let target = find_descriptor(&peripheral, &descriptor)?;
    Ok(peripheral.read_descriptor(&target).await?)
}

async fn write_characteristic(
    peripheral: Peripheral,
    characteristic: NativeCharacteristic,
    value: Vec<u8>,
    write_type: WriteType,
) -> NativeResult<()> {
    let target = find_characteristic(&peripheral, &characteristic)?;
    Ok(peripheral.write(&target, &value, write_type).await?)
}

async fn write_descriptor(
    peripheral: Peripheral,
    descriptor: NativeDescriptor,
    value: Vec<u8>,
) -> NativeResult<()> {
    let target = find_descriptor(&peripheral, &descriptor)?;
    Ok(peripheral.write_descriptor(&target, &value).await?)
}

async fn set_notify(
    peripheral: Peripheral,
    characteristic: NativeCharacteristic,
    enabled: bool,
) -> NativeResult<()> {
    let target = find_characteristic(&peripheral, &characteristic)?;
    if enabled {
        peripheral.subscribe(&target).await?;
    } else {
        peripheral.unsubscribe(&target).await?;
    }
    Ok(())
}
