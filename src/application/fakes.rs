// In-memory fakes for the transport, dispatcher and observer seams
use crate::application::dispatcher::Dispatcher;
use crate::application::errors::TransportError;
use crate::application::http_transport::{HttpRequest, HttpResponse, HttpTransport};
use crate::application::stream_transport::{StreamHandle, StreamTransport, TransportEvent};
use crate::application::token_manager::{RefreshObserver, RefreshOutcome};
use crate::domain::events::StreamEvent;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

fn normalize(path: &str) -> String {
    path.trim_start_matches('/').to_string()
}

/// HTTP transport answering from per-path queues and recording every request.
#[derive(Default)]
pub struct ScriptedHttp {
    routes: Mutex<HashMap<String, VecDeque<Result<HttpResponse, TransportError>>>>,
    requests: Mutex<Vec<HttpRequest>>,
    delay: Option<Duration>,
}

impl ScriptedHttp {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn push(&self, path: &str, response: Result<HttpResponse, TransportError>) {
        self.routes
            .lock()
            .entry(normalize(path))
            .or_default()
            .push_back(response);
    }

    pub fn push_json(&self, path: &str, status: u16, body: Value) {
        self.push(path, Ok(HttpResponse::new(status, body.to_string())));
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().clone()
    }

    pub fn requests_to(&self, path: &str) -> Vec<HttpRequest> {
        let path = normalize(path);
        self.requests
            .lock()
            .iter()
            .filter(|r| normalize(&r.path) == path)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl HttpTransport for ScriptedHttp {
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        self.requests.lock().push(request.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let scripted = self
            .routes
            .lock()
            .get_mut(&normalize(&request.path))
            .and_then(|queue| queue.pop_front());

        scripted.unwrap_or_else(|| {
            Ok(HttpResponse::new(
                404,
                json!({"success": false, "error": "no scripted response"}).to_string(),
            ))
        })
    }
}

pub fn login_body(access: &str, refresh: &str) -> Value {
    json!({
        "success": true,
        "message": "ok",
        "data": {"user": {"username": "alice"}, "access_token": access, "refresh_token": refresh}
    })
}

pub fn power_data_message(collector_id: &str, power: f64) -> String {
    json!({
        "type": "data",
        "event": "power_data",
        "timestamp": "2024-05-01T10:00:00Z",
        "collector_id": collector_id,
        "user_id": 1,
        "data": {
            "collector_id": collector_id,
            "timestamp": "2024-05-01T10:00:00Z",
            "voltage": 230.1,
            "current": 1.5,
            "power": power,
            "energy": 1200.0,
            "frequency": 50.0,
            "power_factor": 0.95
        }
    })
    .to_string()
}

pub struct RecordingDispatcher {
    events: mpsc::UnboundedSender<StreamEvent>,
}

impl RecordingDispatcher {
    pub fn channel() -> (Arc<Self>, mpsc::UnboundedReceiver<StreamEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { events }), rx)
    }
}

impl Dispatcher for RecordingDispatcher {
    fn dispatch(&self, event: StreamEvent) {
        let _ = self.events.send(event);
    }
}

pub async fn next_event(rx: &mut mpsc::UnboundedReceiver<StreamEvent>) -> StreamEvent {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for stream event")
        .expect("dispatcher channel closed")
}

#[derive(Default)]
pub struct RecordingObserver {
    outcomes: Mutex<Vec<RefreshOutcome>>,
}

impl RecordingObserver {
    pub fn outcomes(&self) -> Vec<RefreshOutcome> {
        self.outcomes.lock().clone()
    }
}

impl RefreshObserver for RecordingObserver {
    fn on_refresh(&self, outcome: RefreshOutcome) {
        self.outcomes.lock().push(outcome);
    }
}

#[derive(Default)]
pub struct FakeHandle {
    pub pings: AtomicUsize,
    pub closed: AtomicBool,
    pub fail_pings: AtomicBool,
}

#[async_trait]
impl StreamHandle for FakeHandle {
    async fn ping(&self) -> Result<(), TransportError> {
        if self.fail_pings.load(Ordering::SeqCst) {
            return Err(TransportError::Protocol("ping rejected".into()));
        }
        self.pings.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Clone)]
pub struct FakeConnection {
    pub endpoint: String,
    pub bearer: Option<String>,
    pub events: mpsc::Sender<TransportEvent>,
    pub handle: Arc<FakeHandle>,
}

impl FakeConnection {
    pub async fn push(&self, event: TransportEvent) {
        self.events
            .send(event)
            .await
            .expect("stream client stopped listening");
    }

    pub async fn push_text(&self, text: &str) {
        self.push(TransportEvent::Message(text.to_string())).await;
    }
}

/// Stream transport whose connections are driven by the test.
#[derive(Default)]
pub struct FakeStreamTransport {
    connections: Mutex<Vec<FakeConnection>>,
    fail_next: Mutex<Option<TransportError>>,
}

impl FakeStreamTransport {
    pub fn fail_next_open(&self, error: TransportError) {
        *self.fail_next.lock() = Some(error);
    }

    pub fn connection(&self, index: usize) -> FakeConnection {
        self.connections.lock()[index].clone()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.lock().len()
    }
}

#[async_trait]
impl StreamTransport for FakeStreamTransport {
    async fn open(
        &self,
        endpoint: &str,
        bearer: Option<String>,
        events: mpsc::Sender<TransportEvent>,
    ) -> Result<Arc<dyn StreamHandle>, TransportError> {
        let failure = self.fail_next.lock().take();
        if let Some(error) = failure {
            return Err(error);
        }

        let handle = Arc::new(FakeHandle::default());
        events
            .send(TransportEvent::Opened)
            .await
            .map_err(|_| TransportError::InvalidState("event receiver dropped".into()))?;

        self.connections.lock().push(FakeConnection {
            endpoint: endpoint.to_string(),
            bearer,
            events,
            handle: handle.clone(),
        });

        Ok(handle)
    }
}
