//! Async driver for the bridge.
//!
//! [`BridgeService::spawn`] moves a [`Bridge`] onto one tokio task. Caller
//! requests arrive on a bounded channel and native events on an unbounded
//! one; the task multiplexes both with `tokio::select!`, so every state
//! change happens on that single task and no locking is needed around the
//! bridge itself.
//!
//! [`BridgeClient`] is the caller side. Each call gets a fresh callback
//! channel whose deliveries are routed to a [`ReplyStream`].
//!
//! # Example
//!
//! ```no_run
//! use blebridge_core::{BridgeConfig, BridgeService, BtleplugStack};
//! use futures::StreamExt;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let (stack, events) = BtleplugStack::new().await?;
//!     let (client, service) = BridgeService::spawn(stack, events, BridgeConfig::default())?;
//!
//!     let mut scan = client.start_scan().await?;
//!     if let Some(reply) = scan.next().await {
//!         println!("{:?}", reply);
//!     }
//!     client.stop_scan().await?;
//!     service.shutdown().await?;
//!     Ok(())
//! }
//! ```

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use futures::stream::{Stream, StreamExt};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use blebridge_types::{
    CallbackId, CharacteristicRecord, DescriptorRecord, DeviceHandle, ObjectHandle, ServiceRecord,
};

use crate::bridge::Bridge;
use crate::call::Call;
use crate::config::BridgeConfig;
use crate::error::{Error, Result};
use crate::metrics::BridgeMetrics;
use crate::native::{CentralStack, NativeEvent};
use crate::reply::{Delivery, Reply, ReplySink};

#[derive(Debug)]
struct Request {
    call: Call,
    channel: CallbackId,
}

/// Routes deliveries to the stream of the call that owns the channel.
///
/// A route is released after a terminal delivery or once its stream is
/// dropped.
#[derive(Debug, Default)]
pub struct ReplyRouter {
    routes: Mutex<HashMap<CallbackId, mpsc::UnboundedSender<Reply>>>,
}

impl ReplyRouter {
    /// Create a router with no routes.
    pub fn new() -> Self {
        Self::default()
    }

    fn routes(&self) -> std::sync::MutexGuard<'_, HashMap<CallbackId, mpsc::UnboundedSender<Reply>>> {
        self.routes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn register(&self, channel: CallbackId) -> mpsc::UnboundedReceiver<Reply> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.routes().insert(channel, tx);
        rx
    }

    fn release(&self, channel: CallbackId) {
        self.routes().remove(&channel);
    }

    /// Number of channels still expecting deliveries.
    pub fn open_routes(&self) -> usize {
        self.routes().len()
    }

    /// Release every route, ending all streams.
    pub fn close_all(&self) {
        self.routes().clear();
    }
}

impl ReplySink for ReplyRouter {
    fn deliver(&self, delivery: Delivery) {
        let mut routes = self.routes();
        let sent = match routes.get(&delivery.channel) {
            Some(route) => route.send(delivery.reply).is_ok(),
            None => {
                debug!("No route for channel {}", delivery.channel);
                return;
            }
        };
        if !sent || !delivery.keep_alive {
            routes.remove(&delivery.channel);
        }
    }
}

/// Results of one call.
///
/// Ends after the terminal reply, or when the service stops.
#[derive(Debug)]
pub struct ReplyStream {
    channel: CallbackId,
    receiver: mpsc::UnboundedReceiver<Reply>,
    router: Arc<ReplyRouter>,
}

impl ReplyStream {
    /// Callback channel of the call.
    pub fn channel(&self) -> CallbackId {
        self.channel
    }

    /// Wait for the next reply, turning error replies into `Err`.
    pub async fn next_reply(&mut self) -> Result<Reply> {
        match self.next().await {
            Some(Reply::Error(reply)) => Err(Error::Reply(reply)),
            Some(reply) => Ok(reply),
            None => Err(Error::ServiceStopped),
        }
    }
}

impl Stream for ReplyStream {
    type Item = Reply;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.receiver).poll_recv(cx)
    }
}

impl Drop for ReplyStream {
    fn drop(&mut self) {
        self.router.release(self.channel);
    }
}

/// Caller side of a running [`BridgeService`].
///
/// Cheap to clone; clones share the callback id counter.
#[derive(Debug, Clone)]
pub struct BridgeClient {
    requests: mpsc::Sender<Request>,
    router: Arc<ReplyRouter>,
    next_channel: Arc<AtomicU64>,
}

impl BridgeClient {
    /// Issue a call and return the stream of its replies.
    pub async fn call(&self, call: Call) -> Result<ReplyStream> {
        let channel = CallbackId(self.next_channel.fetch_add(1, Ordering::Relaxed));
        let receiver = self.router.register(channel);
        let stream = ReplyStream {
            channel,
            receiver,
            router: Arc::clone(&self.router),
        };
        self.requests
            .send(Request { call, channel })
            .await
            .map_err(|_| Error::ServiceStopped)?;
        Ok(stream)
    }

    /// Parse a script-style call and issue it.
    pub async fn call_json(&self, action: &str, args: &[Value]) -> Result<ReplyStream> {
        let call = Call::from_args(action, args)?;
        self.call(call).await
    }

    async fn one(&self, call: Call) -> Result<Reply> {
        self.call(call).await?.next_reply().await
    }

    /// Start scanning; the stream yields [`Reply::Scan`] records.
    pub async fn start_scan(&self) -> Result<ReplyStream> {
        self.call(Call::StartScan).await
    }

    /// Stop scanning.
    pub async fn stop_scan(&self) -> Result<()> {
        self.one(Call::StopScan).await.map(drop)
    }

    /// Connect to a peripheral; the stream yields [`Reply::Connection`]
    /// events, starting with `Connecting`.
    pub async fn connect(&self, locator: impl Into<String>) -> Result<ReplyStream> {
        self.call(Call::Connect {
            locator: locator.into(),
        })
        .await
    }

    /// Disconnect and tear down a session.
    pub async fn close(&self, device: DeviceHandle) -> Result<()> {
        self.one(Call::Close { device }).await.map(drop)
    }

    /// Read the link RSSI.
    pub async fn rssi(&self, device: DeviceHandle) -> Result<i16> {
        match self.one(Call::Rssi { device }).await? {
            Reply::Rssi(rssi) => Ok(rssi),
            other => Err(unexpected("rssi", &other)),
        }
    }

    /// Discover services.
    pub async fn services(&self, device: DeviceHandle) -> Result<Vec<ServiceRecord>> {
        match self.one(Call::Services { device }).await? {
            Reply::Services(services) => Ok(services),
            other => Err(unexpected("services", &other)),
        }
    }

    /// Discover characteristics of a service.
    pub async fn characteristics(
        &self,
        device: DeviceHandle,
        service: ObjectHandle,
    ) -> Result<Vec<CharacteristicRecord>> {
        match self.one(Call::Characteristics { device, service }).await? {
            Reply::Characteristics(characteristics) => Ok(characteristics),
            other => Err(unexpected("characteristics", &other)),
        }
    }

    /// Discover descriptors of a characteristic.
    pub async fn descriptors(
        &self,
        device: DeviceHandle,
        characteristic: ObjectHandle,
    ) -> Result<Vec<DescriptorRecord>> {
        match self
            .one(Call::Descriptors {
                device,
                characteristic,
            })
            .await?
        {
            Reply::Descriptors(descriptors) => Ok(descriptors),
            other => Err(unexpected("descriptors", &other)),
        }
    }

    /// Read a characteristic once.
    pub async fn read_characteristic(
        &self,
        device: DeviceHandle,
        characteristic: ObjectHandle,
    ) -> Result<Vec<u8>> {
        match self
            .one(Call::ReadCharacteristic {
                device,
                characteristic,
            })
            .await?
        {
            Reply::Data(value) => Ok(value),
            other => Err(unexpected("readCharacteristic", &other)),
        }
    }

    /// Read a descriptor once.
    pub async fn read_descriptor(
        &self,
        device: DeviceHandle,
        descriptor: ObjectHandle,
    ) -> Result<Vec<u8>> {
        match self.one(Call::ReadDescriptor { device, descriptor }).await? {
            Reply::Data(value) => Ok(value),
            other => Err(unexpected("readDescriptor", &other)),
        }
    }

    /// Write a characteristic value.
    pub async fn write_characteristic(
        &self,
        device: DeviceHandle,
        characteristic: ObjectHandle,
        value: impl Into<Vec<u8>>,
    ) -> Result<()> {
        self.one(Call::WriteCharacteristic {
            device,
            characteristic,
            value: value.into(),
        })
        .await
        .map(drop)
    }

    /// Write a descriptor value.
    pub async fn write_descriptor(
        &self,
        device: DeviceHandle,
        descriptor: ObjectHandle,
        value: impl Into<Vec<u8>>,
    ) -> Result<()> {
        self.one(Call::WriteDescriptor {
            device,
            descriptor,
            value: value.into(),
        })
        .await
        .map(drop)
    }

    /// Subscribe to notifications; the stream yields [`Reply::Data`] values.
    pub async fn enable_notification(
        &self,
        device: DeviceHandle,
        characteristic: ObjectHandle,
    ) -> Result<ReplyStream> {
        self.call(Call::EnableNotification {
            device,
            characteristic,
        })
        .await
    }

    /// Cancel a notification subscription.
    pub async fn disable_notification(
        &self,
        device: DeviceHandle,
        characteristic: ObjectHandle,
    ) -> Result<()> {
        self.one(Call::DisableNotification {
            device,
            characteristic,
        })
        .await
        .map(drop)
    }

    /// Stop scanning and tear down every session.
    pub async fn reset(&self) -> Result<()> {
        self.one(Call::Reset).await.map(drop)
    }
}

fn unexpected(action: &'static str, reply: &Reply) -> Error {
    Error::UnexpectedReply {
        action,
        reply: format!("{:?}", reply),
    }
}

/// Handle to the running service task.
#[derive(Debug)]
pub struct ServiceHandle {
    task: JoinHandle<Result<()>>,
    cancel_token: CancellationToken,
    metrics: Arc<BridgeMetrics>,
}

impl ServiceHandle {
    /// Bridge counters.
    pub fn metrics(&self) -> Arc<BridgeMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Token that stops the service when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    /// Whether the service task has exited.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the service to exit on its own.
    ///
    /// Returns the protocol violation that stopped it, if any.
    pub async fn join(self) -> Result<()> {
        self.task.await.map_err(|e| {
            error!("Bridge service task failed: {}", e);
            Error::ServiceStopped
        })?
    }

    /// Stop the service, tearing down every session, and wait for it.
    pub async fn shutdown(self) -> Result<()> {
        self.cancel_token.cancel();
        self.join().await
    }
}

/// Runs a [`Bridge`] on a tokio task.
#[derive(Debug)]
pub struct BridgeService;

impl BridgeService {
    /// Validate `config` and spawn the service.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn<S>(
        stack: S,
        events: mpsc::UnboundedReceiver<NativeEvent>,
        config: BridgeConfig,
    ) -> Result<(BridgeClient, ServiceHandle)>
    where
        S: CentralStack + Send + 'static,
    {
        config.validate()?;

        let router = Arc::new(ReplyRouter::new());
        let (requests_tx, requests_rx) = mpsc::channel(config.request_buffer);
        let abort_on_violation = config.abort_on_protocol_violation;
        let bridge = Bridge::new(stack, Arc::clone(&router), config);
        let metrics = bridge.metrics();

        let cancel_token = CancellationToken::new();
        let task_token = cancel_token.clone();
        let task_router = Arc::clone(&router);
        let task = tokio::spawn(async move {
            let result = run(bridge, requests_rx, events, task_token, abort_on_violation).await;
            task_router.close_all();
            result
        });

        let client = BridgeClient {
            requests: requests_tx,
            router,
            next_channel: Arc::new(AtomicU64::new(1)),
        };
        let handle = ServiceHandle {
            task,
            cancel_token,
            metrics,
        };
        Ok((client, handle))
    }
}

async fn run<S: CentralStack>(
    mut bridge: Bridge<S, Arc<ReplyRouter>>,
    mut requests: mpsc::Receiver<Request>,
    mut events: mpsc::UnboundedReceiver<NativeEvent>,
    cancel_token: CancellationToken,
    abort_on_violation: bool,
) -> Result<()> {
    info!("Bridge service started");
    let result = loop {
        tokio::select! {
            biased;
            _ = cancel_token.cancelled() => {
                info!("Bridge service cancelled");
                break Ok(());
            }
            event = events.recv() => match event {
                Some(event) => {
                    if let Err(err) = bridge.handle_event(event) {
                        if abort_on_violation {
                            error!("Stopping bridge service: {}", err);
                            break Err(err);
                        }
                        warn!("Dropping event: {}", err);
                    }
                }
                None => {
                    warn!("Native event channel closed, stopping");
                    break Ok(());
                }
            },
            request = requests.recv() => match request {
                Some(Request { call, channel }) => bridge.call(call, channel),
                None => {
                    debug!("All clients dropped, stopping");
                    break Ok(());
                }
            },
        }
    };
    bridge.free_peripherals();
    info!("Bridge service stopped");
    result
}
