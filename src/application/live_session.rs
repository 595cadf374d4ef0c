// Live session - Owns the rolling window behind a single worker task
use crate::application::dispatcher::Dispatcher;
use crate::application::errors::SessionError;
use crate::application::stream_client::StreamClient;
use crate::domain::events::StreamEvent;
use crate::domain::rolling_window::{RollingWindow, WindowSnapshot};
use crate::domain::sample::Sample;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::WatchStream;

enum WorkerCommand {
    Stream(StreamEvent),
    Seed(Vec<Sample>),
    Clear,
    Stop,
}

enum Delivery {
    Snapshot(Arc<WindowSnapshot>),
    Event(StreamEvent),
}

/// Hands stream callbacks to the worker queue without touching session state.
struct SessionDispatcher {
    commands: mpsc::UnboundedSender<WorkerCommand>,
    torn_down: Arc<AtomicBool>,
}

impl Dispatcher for SessionDispatcher {
    fn dispatch(&self, event: StreamEvent) {
        if self.torn_down.load(Ordering::SeqCst) {
            return;
        }
        let _ = self.commands.send(WorkerCommand::Stream(event));
    }
}

/// A live view of one collector.
///
/// Stream events are queued to a worker task that alone mutates the
/// [`RollingWindow`]. After every mutation it publishes a fresh immutable
/// snapshot; readers only ever swap in a whole `Arc<WindowSnapshot>`.
/// Other events are forwarded to `downstream` from a separate delivery task.
pub struct LiveSession {
    stream: StreamClient,
    commands: mpsc::UnboundedSender<WorkerCommand>,
    snapshots: watch::Receiver<Arc<WindowSnapshot>>,
    torn_down: Arc<AtomicBool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl LiveSession {
    /// Spawn the worker and delivery tasks. `build_stream` receives the
    /// dispatcher the stream client must report to.
    pub fn start<F>(window_capacity: usize, downstream: Arc<dyn Dispatcher>, build_stream: F) -> Self
    where
        F: FnOnce(Arc<dyn Dispatcher>) -> StreamClient,
    {
        let torn_down = Arc::new(AtomicBool::new(false));
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (delivery_tx, delivery_rx) = mpsc::unbounded_channel();

        let window = RollingWindow::new(window_capacity);
        let (snapshot_tx, snapshots) = watch::channel(Arc::new(window.snapshot()));

        let worker = tokio::spawn(run_worker(window, command_rx, delivery_tx));
        let delivery = tokio::spawn(run_delivery(
            delivery_rx,
            snapshot_tx,
            downstream,
            torn_down.clone(),
        ));

        let stream = build_stream(Arc::new(SessionDispatcher {
            commands: commands.clone(),
            torn_down: torn_down.clone(),
        }));

        Self {
            stream,
            commands,
            snapshots,
            torn_down,
            tasks: Mutex::new(vec![worker, delivery]),
        }
    }

    pub fn stream(&self) -> &StreamClient {
        &self.stream
    }

    /// Subscribe to `collector_id` and connect the stream.
    pub async fn open(&self, collector_id: &str) -> Result<(), SessionError> {
        self.ensure_running()?;
        self.stream.subscribe(collector_id);
        self.stream.connect().await?;
        Ok(())
    }

    /// Append samples, e.g. the tail of a history load, ahead of live data.
    pub fn seed(&self, samples: Vec<Sample>) -> Result<(), SessionError> {
        self.submit(WorkerCommand::Seed(samples))
    }

    pub fn clear(&self) -> Result<(), SessionError> {
        self.submit(WorkerCommand::Clear)
    }

    pub fn latest(&self) -> Arc<WindowSnapshot> {
        self.snapshots.borrow().clone()
    }

    /// Current snapshot first, then every newly published one.
    pub fn snapshots(&self) -> WatchStream<Arc<WindowSnapshot>> {
        WatchStream::new(self.snapshots.clone())
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::SeqCst)
    }

    /// Unsubscribe, close the stream and stop both tasks.
    ///
    /// Returns `false` when the tasks did not finish within `grace` and were
    /// aborted. Later calls return `true` immediately.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        if self.torn_down.swap(true, Ordering::SeqCst) {
            return true;
        }
        tracing::info!("Shutting down live session");

        self.stream.unsubscribe();
        if let Err(e) = self.stream.close().await {
            tracing::warn!("Failed to close stream during shutdown: {}", e);
        }
        let _ = self.commands.send(WorkerCommand::Stop);

        let mut tasks = std::mem::take(&mut *self.tasks.lock());
        let drained = tokio::time::timeout(grace, async {
            for task in tasks.iter_mut() {
                let _ = task.await;
            }
        })
        .await
        .is_ok();

        if !drained {
            tracing::warn!("Live session did not stop within {:?}, aborting", grace);
            for task in &tasks {
                task.abort();
            }
        }
        drained
    }

    fn ensure_running(&self) -> Result<(), SessionError> {
        if self.is_torn_down() {
            return Err(SessionError::TornDown);
        }
        Ok(())
    }

    fn submit(&self, command: WorkerCommand) -> Result<(), SessionError> {
        self.ensure_running()?;
        self.commands.send(command).map_err(|_| SessionError::TornDown)
    }
}

async fn run_worker(
    mut window: RollingWindow,
    mut commands: mpsc::UnboundedReceiver<WorkerCommand>,
    delivery: mpsc::UnboundedSender<Delivery>,
) {
    while let Some(command) = commands.recv().await {
        let mutated = match command {
            WorkerCommand::Stream(StreamEvent::Sample(sample)) => {
                window.append(sample);
                true
            }
            WorkerCommand::Stream(event) => {
                let _ = delivery.send(Delivery::Event(event));
                false
            }
            WorkerCommand::Seed(samples) => {
                tracing::debug!("Seeding live window with {} samples", samples.len());
                for sample in samples {
                    window.append(sample);
                }
                true
            }
            WorkerCommand::Clear => {
                window.clear();
                true
            }
            WorkerCommand::Stop => break,
        };

        if mutated {
            let _ = delivery.send(Delivery::Snapshot(Arc::new(window.snapshot())));
        }
    }
    tracing::debug!("Live session worker stopped");
}

async fn run_delivery(
    mut deliveries: mpsc::UnboundedReceiver<Delivery>,
    snapshots: watch::Sender<Arc<WindowSnapshot>>,
    downstream: Arc<dyn Dispatcher>,
    torn_down: Arc<AtomicBool>,
) {
    while let Some(delivery) = deliveries.recv().await {
        if torn_down.load(Ordering::SeqCst) {
            continue;
        }
        match delivery {
            Delivery::Snapshot(snapshot) => {
                snapshots.send_replace(snapshot);
            }
            Delivery::Event(event) => downstream.dispatch(event),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::fakes::{
        next_event, power_data_message, FakeStreamTransport, RecordingDispatcher, ScriptedHttp,
    };
    use crate::application::stream_client::StreamOptions;
    use crate::application::token_manager::TokenManager;
    use crate::infrastructure::token_store::MemoryCredentialStore;
    use tokio_stream::StreamExt;

    fn start_session(
        capacity: usize,
        downstream: Arc<dyn Dispatcher>,
    ) -> (LiveSession, Arc<FakeStreamTransport>) {
        let tokens = Arc::new(TokenManager::new(
            Arc::new(MemoryCredentialStore::new()),
            Arc::new(ScriptedHttp::new()),
        ));
        let transport = Arc::new(FakeStreamTransport::default());
        let stream_transport = transport.clone();
        let session = LiveSession::start(capacity, downstream, move |dispatcher| {
            StreamClient::new(
                "ws://127.0.0.1:8080/api/realtime/ws",
                stream_transport,
                tokens,
                dispatcher,
                StreamOptions::default(),
            )
        });
        (session, transport)
    }

    async fn snapshot_with_len(
        snapshots: &mut WatchStream<Arc<WindowSnapshot>>,
        len: usize,
    ) -> Arc<WindowSnapshot> {
        tokio::time::timeout(Duration::from_secs(2), async {
            while let Some(snapshot) = snapshots.next().await {
                if snapshot.len() == len {
                    return snapshot;
                }
            }
            panic!("snapshot stream ended");
        })
        .await
        .expect("timed out waiting for snapshot")
    }

    fn powers(snapshot: &WindowSnapshot) -> Vec<f64> {
        snapshot.samples.iter().map(|s| s.power).collect()
    }

    #[tokio::test]
    async fn test_live_samples_reach_window_in_order() {
        let (downstream, mut events) = RecordingDispatcher::channel();
        let (session, transport) = start_session(50, downstream);
        let mut snapshots = session.snapshots();
        assert!(snapshots.next().await.unwrap().is_empty());

        session.open("meter-a").await.unwrap();
        assert_eq!(next_event(&mut events).await, StreamEvent::Connected);

        let connection = transport.connection(0);
        for power in [1.0, 2.0, 3.0] {
            connection.push_text(&power_data_message("meter-a", power)).await;
        }
        connection.push_text(&power_data_message("meter-b", 9.0)).await;

        let snapshot = snapshot_with_len(&mut snapshots, 3).await;
        assert_eq!(powers(&snapshot), vec![1.0, 2.0, 3.0]);
        assert_eq!(powers(&session.latest()), vec![1.0, 2.0, 3.0]);
    }

    #[tokio::test]
    async fn test_window_evicts_beyond_capacity() {
        let (downstream, _events) = RecordingDispatcher::channel();
        let (session, _transport) = start_session(2, downstream);
        let mut snapshots = session.snapshots();

        let samples = (1..=3)
            .map(|p| {
                let mut sample = Sample::new("meter-a", None);
                sample.power = p as f64;
                sample
            })
            .collect();
        session.seed(samples).unwrap();

        let snapshot = snapshot_with_len(&mut snapshots, 2).await;
        assert_eq!(powers(&snapshot), vec![2.0, 3.0]);
        assert_eq!(snapshot.capacity, 2);

        session.clear().unwrap();
        assert!(snapshot_with_len(&mut snapshots, 0).await.is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_closes_stream_and_refuses_work() {
        let (downstream, mut events) = RecordingDispatcher::channel();
        let (session, transport) = start_session(50, downstream);
        session.open("meter-a").await.unwrap();
        assert_eq!(next_event(&mut events).await, StreamEvent::Connected);

        assert!(session.shutdown(Duration::from_secs(2)).await);
        assert!(session.is_torn_down());
        assert!(transport.connection(0).handle.closed.load(Ordering::SeqCst));
        assert_eq!(session.seed(Vec::new()), Err(SessionError::TornDown));
        assert_eq!(session.open("meter-a").await, Err(SessionError::TornDown));

        // The connection-lost event raised while closing is not delivered
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(events.try_recv().is_err());
        assert!(session.shutdown(Duration::from_millis(10)).await);
    }

    struct StallingDispatcher;

    impl Dispatcher for StallingDispatcher {
        fn dispatch(&self, _event: StreamEvent) {
            std::thread::sleep(Duration::from_millis(400));
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_shutdown_aborts_after_grace() {
        let (session, _transport) = start_session(50, Arc::new(StallingDispatcher));
        session.open("meter-a").await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(!session.shutdown(Duration::from_millis(50)).await);
        assert!(session.is_torn_down());
    }
}
