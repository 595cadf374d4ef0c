// Real-time stream client: connection state machine and typed event dispatch
use crate::application::dispatcher::Dispatcher;
use crate::application::errors::StreamError;
use crate::application::stream_transport::{StreamHandle, StreamTransport, TransportEvent};
use crate::application::token_manager::TokenManager;
use crate::domain::events::{ConnectionState, StreamEvent};
use crate::domain::subscription::Subscription;
use crate::infrastructure::message_codec::{self, StreamEnvelope};
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};

pub const DEFAULT_EVENT_BUFFER: usize = 256;

#[derive(Debug, Clone)]
pub struct StreamOptions {
    /// Keepalive period while open; `None` disables it
    pub heartbeat_interval: Option<Duration>,
    /// Capacity of the transport-to-client event channel
    pub event_buffer: usize,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            heartbeat_interval: None,
            event_buffer: DEFAULT_EVENT_BUFFER,
        }
    }
}

/// Manages one real-time connection.
///
/// Reconnection is never automatic: after a loss the owner calls
/// [`StreamClient::reconnect`]. Every connection attempt gets a new generation
/// number and anything still arriving from an older connection is ignored.
#[derive(Clone)]
pub struct StreamClient {
    inner: Arc<StreamInner>,
}

struct StreamInner {
    endpoint: String,
    transport: Arc<dyn StreamTransport>,
    tokens: Arc<TokenManager>,
    dispatcher: Arc<dyn Dispatcher>,
    options: StreamOptions,
    link: Mutex<Link>,
    subscription: RwLock<Subscription>,
}

struct Link {
    state: ConnectionState,
    generation: u64,
    handle: Option<Arc<dyn StreamHandle>>,
    pump: Option<JoinHandle<()>>,
}

impl StreamClient {
    pub fn new(
        endpoint: impl Into<String>,
        transport: Arc<dyn StreamTransport>,
        tokens: Arc<TokenManager>,
        dispatcher: Arc<dyn Dispatcher>,
        options: StreamOptions,
    ) -> Self {
        Self {
            inner: Arc::new(StreamInner {
                endpoint: endpoint.into(),
                transport,
                tokens,
                dispatcher,
                options,
                link: Mutex::new(Link {
                    state: ConnectionState::Disconnected,
                    generation: 0,
                    handle: None,
                    pump: None,
                }),
                subscription: RwLock::new(Subscription::default()),
            }),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.inner.endpoint
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.link.lock().state
    }

    pub fn subscription(&self) -> Subscription {
        self.inner.subscription.read().clone()
    }

    /// Accept live data for `collector_id` only. Takes effect immediately,
    /// whatever the connection state.
    pub fn subscribe(&self, collector_id: impl Into<String>) {
        let collector_id = collector_id.into();
        tracing::info!("Subscribing to collector {}", collector_id);
        *self.inner.subscription.write() = Subscription::Collector(collector_id);
    }

    /// Drop live data until the next `subscribe`.
    pub fn unsubscribe(&self) {
        tracing::info!("Clearing stream subscription");
        *self.inner.subscription.write() = Subscription::Cleared;
    }

    /// Open the connection from `Disconnected`.
    ///
    /// The access token is read once, here, and used for the handshake.
    /// Returns after the handshake; `Connected` follows on the dispatcher.
    pub async fn connect(&self) -> Result<(), StreamError> {
        let generation = self.inner.begin("connect", |state| state == ConnectionState::Disconnected)?;
        let bearer = self.inner.tokens.current_access_token();
        self.inner.clone().establish(generation, bearer).await
    }

    /// Start a new connection attempt from `Disconnected` or `Failed` without
    /// blocking the caller.
    pub fn reconnect(&self) -> Result<JoinHandle<Result<(), StreamError>>, StreamError> {
        let generation = self.inner.begin("reconnect", |state| state.is_idle())?;
        let bearer = self.inner.tokens.current_access_token();
        let inner = self.inner.clone();
        Ok(tokio::spawn(async move { inner.establish(generation, bearer).await }))
    }

    /// Close the connection. A no-op when nothing is connected.
    pub async fn close(&self) -> Result<(), StreamError> {
        let (handle, pump) = {
            let mut link = self.inner.link.lock();
            if !matches!(link.state, ConnectionState::Open | ConnectionState::Connecting) {
                return Ok(());
            }
            link.state = ConnectionState::Closing;
            (link.handle.take(), link.pump.take())
        };
        tracing::info!("Closing stream connection to {}", self.inner.endpoint);

        if let Some(handle) = handle {
            if let Err(e) = handle.close().await {
                tracing::warn!("Stream transport close failed: {}", e);
            }
        }
        if let Some(pump) = pump {
            pump.abort();
        }

        let closed = {
            let mut link = self.inner.link.lock();
            if link.state == ConnectionState::Closing {
                link.state = ConnectionState::Disconnected;
                link.generation += 1;
                true
            } else {
                false
            }
        };
        if closed {
            self.inner.dispatcher.dispatch(StreamEvent::ConnectionLost {
                state: ConnectionState::Disconnected,
                reason: "closed by client".to_string(),
            });
        }
        Ok(())
    }

    /// Send one keepalive ping. Only valid while `Open`.
    pub async fn send_heartbeat(&self) -> Result<(), StreamError> {
        let handle = {
            let link = self.inner.link.lock();
            match (&link.handle, link.state) {
                (Some(handle), ConnectionState::Open) => handle.clone(),
                (_, state) => {
                    return Err(StreamError::InvalidState {
                        action: "send heartbeat",
                        state,
                    })
                }
            }
        };
        handle.ping().await.map_err(|e| {
            tracing::warn!("Stream heartbeat failed: {}", e);
            StreamError::from(e)
        })
    }
}

impl StreamInner {
    /// Enter `Connecting` if `allowed` accepts the current state.
    fn begin(
        &self,
        action: &'static str,
        allowed: impl Fn(ConnectionState) -> bool,
    ) -> Result<u64, StreamError> {
        let mut link = self.link.lock();
        if !allowed(link.state) {
            return Err(StreamError::InvalidState {
                action,
                state: link.state,
            });
        }
        link.state = ConnectionState::Connecting;
        link.generation += 1;
        tracing::info!("Connecting to {} (generation {})", self.endpoint, link.generation);
        Ok(link.generation)
    }

    fn is_current(&self, generation: u64) -> bool {
        self.link.lock().generation == generation
    }

    async fn establish(self: Arc<Self>, generation: u64, bearer: Option<String>) -> Result<(), StreamError> {
        let (events_tx, events_rx) = mpsc::channel(self.options.event_buffer.max(1));

        let handle = match self.transport.open(&self.endpoint, bearer, events_tx).await {
            Ok(handle) => handle,
            Err(e) => {
                let failed = {
                    let mut link = self.link.lock();
                    let current = link.generation == generation && link.state == ConnectionState::Connecting;
                    if current {
                        link.state = ConnectionState::Failed;
                    }
                    current
                };
                tracing::warn!("Stream connection to {} failed: {}", self.endpoint, e);
                if failed {
                    self.dispatcher.dispatch(StreamEvent::ConnectionLost {
                        state: ConnectionState::Failed,
                        reason: e.to_string(),
                    });
                }
                return Err(e.into());
            }
        };

        let superseded = {
            let mut link = self.link.lock();
            if link.generation == generation && link.state == ConnectionState::Connecting {
                link.handle = Some(handle.clone());
                link.pump = Some(tokio::spawn(self.clone().pump(generation, events_rx, handle.clone())));
                None
            } else {
                Some(link.state)
            }
        };

        match superseded {
            None => Ok(()),
            Some(state) => {
                tracing::debug!("Discarding superseded stream connection (generation {})", generation);
                if let Err(e) = handle.close().await {
                    tracing::debug!("Closing superseded connection failed: {}", e);
                }
                Err(StreamError::InvalidState {
                    action: "connect",
                    state,
                })
            }
        }
    }

    async fn pump(
        self: Arc<Self>,
        generation: u64,
        mut events: mpsc::Receiver<TransportEvent>,
        handle: Arc<dyn StreamHandle>,
    ) {
        let mut heartbeat = self.options.heartbeat_interval.map(|period| {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });

        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(TransportEvent::Opened) => self.on_open(generation),
                    Some(TransportEvent::Message(text)) => self.on_message(generation, &text),
                    Some(TransportEvent::Closed { reason }) => {
                        self.on_lost(generation, ConnectionState::Disconnected, reason);
                        break;
                    }
                    Some(TransportEvent::Error(reason)) => {
                        self.on_lost(generation, ConnectionState::Failed, reason);
                        break;
                    }
                    None => {
                        self.on_lost(generation, ConnectionState::Disconnected, "transport ended".to_string());
                        break;
                    }
                },
                _ = next_tick(&mut heartbeat) => self.heartbeat(generation, &handle).await,
            }
        }
        tracing::debug!("Stream pump for generation {} stopped", generation);
    }

    async fn heartbeat(&self, generation: u64, handle: &Arc<dyn StreamHandle>) {
        let open = {
            let link = self.link.lock();
            link.generation == generation && link.state == ConnectionState::Open
        };
        if !open {
            return;
        }
        match handle.ping().await {
            Ok(()) => tracing::trace!("Stream heartbeat sent"),
            Err(e) => tracing::warn!("Stream heartbeat failed: {}", e),
        }
    }

    fn on_open(&self, generation: u64) {
        let opened = {
            let mut link = self.link.lock();
            let current = link.generation == generation && link.state == ConnectionState::Connecting;
            if current {
                link.state = ConnectionState::Open;
            }
            current
        };
        if opened {
            tracing::info!("Stream connection open (generation {})", generation);
            self.dispatcher.dispatch(StreamEvent::Connected);
        }
    }

    fn on_lost(&self, generation: u64, next: ConnectionState, reason: String) {
        let lost = {
            let mut link = self.link.lock();
            let current = link.generation == generation
                && matches!(link.state, ConnectionState::Open | ConnectionState::Connecting);
            if current {
                link.state = next;
                link.handle = None;
                link.pump = None;
            }
            current
        };
        if lost {
            tracing::warn!("Stream connection lost ({}): {}", next, reason);
            self.dispatcher.dispatch(StreamEvent::ConnectionLost { state: next, reason });
        }
    }

    fn on_message(&self, generation: u64, text: &str) {
        if !self.is_current(generation) {
            tracing::debug!("Ignoring message from superseded connection {}", generation);
            return;
        }

        let envelope = match message_codec::decode_envelope(text) {
            Ok(envelope) => envelope,
            Err(e) => return self.malformed(e.to_string()),
        };

        match (envelope.kind.as_str(), envelope.event.as_str()) {
            ("system", "connected") => {
                let subscription = self.subscription.read().collector_id().map(str::to_string);
                tracing::debug!("Stream link ready, subscription {:?}", subscription);
                self.dispatcher.dispatch(StreamEvent::LinkReady { subscription });
            }
            ("data", "power_data") => self.on_power_data(&envelope),
            ("status", "collector_status") => match message_codec::decode_collector_status(&envelope) {
                Ok((collector_id, online)) => {
                    tracing::info!("Collector {} is now {}", collector_id, if online { "online" } else { "offline" });
                    self.dispatcher.dispatch(StreamEvent::CollectorStatus { collector_id, online });
                }
                Err(e) => self.malformed(e.to_string()),
            },
            ("alert", event) => {
                tracing::info!("Stream alert: {}", event);
                self.dispatcher.dispatch(StreamEvent::Alert {
                    event: event.to_string(),
                    collector_id: envelope.collector_id.clone(),
                    data: envelope.data.clone(),
                });
            }
            (kind, event) => tracing::warn!("Ignoring unrecognized stream message {}/{}", kind, event),
        }
    }

    fn on_power_data(&self, envelope: &StreamEnvelope) {
        let sample = match message_codec::decode_power_data(envelope, Utc::now()) {
            Ok(sample) => sample,
            Err(e) => return self.malformed(e.to_string()),
        };

        let accepted = self.subscription.read().accepts(&sample.collector_id);
        if accepted {
            self.dispatcher.dispatch(StreamEvent::Sample(sample));
        } else {
            tracing::trace!("Dropping sample for unsubscribed collector {}", sample.collector_id);
        }
    }

    fn malformed(&self, reason: String) {
        tracing::warn!("Malformed stream payload: {}", reason);
        self.dispatcher.dispatch(StreamEvent::Malformed { reason });
    }
}

async fn next_tick(heartbeat: &mut Option<Interval>) {
    match heartbeat {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}
