// Console surface - Renders stream events, snapshots and reports as text
use crate::application::dispatcher::Dispatcher;
use crate::application::errors::{ApiError, StreamError};
use crate::application::history_service::HistoryReport;
use crate::application::live_session::LiveSession;
use crate::application::token_manager::{RefreshObserver, RefreshOutcome};
use crate::domain::collector::Collector;
use crate::domain::events::{ConnectionState, StreamEvent};
use crate::domain::prediction::{PredictionAlgorithm, PredictionResult};
use crate::domain::rolling_window::WindowSnapshot;
use crate::domain::sample::Metric;
use clap::{Parser, Subcommand};
use std::fmt::Write;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_stream::StreamExt;

/// Power monitor console client
#[derive(Parser, Debug)]
#[command(name = "power-monitor-client")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Configuration file path; config/client.toml when unset
    #[arg(short = 'c', long, global = true, env = "POWER_MONITOR_CONFIG", value_name = "FILE")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

impl Cli {
    /// No subcommand means `monitor`.
    pub fn command(&self) -> Command {
        self.command.clone().unwrap_or(Command::Monitor)
    }
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Show today's history, then follow live readings until Ctrl-C
    Monitor,
    /// Print the consumption prediction for today
    Predict {
        #[arg(value_enum, default_value = "hybrid")]
        algorithm: PredictionAlgorithm,
    },
    /// End the session and forget stored tokens
    Logout,
}

/// Prints stream events and reports connection losses to the owner.
pub struct ConsoleDispatcher {
    losses: mpsc::UnboundedSender<ConnectionState>,
}

impl ConsoleDispatcher {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ConnectionState>) {
        let (losses, rx) = mpsc::unbounded_channel();
        (Self { losses }, rx)
    }
}

impl Dispatcher for ConsoleDispatcher {
    fn dispatch(&self, event: StreamEvent) {
        if let Some(line) = describe_event(&event) {
            println!("{}", line);
        }
        if let StreamEvent::ConnectionLost { state, .. } = event {
            let _ = self.losses.send(state);
        }
    }
}

/// Print live snapshots until `shutdown` completes.
///
/// Each connection loss schedules a reconnect `retry_delay` later. The wait
/// is a branch of the loop, so snapshots and shutdown are still served while
/// it runs. Returns the number of reconnect attempts started.
pub async fn follow_live<F>(
    session: &LiveSession,
    losses: &mut mpsc::UnboundedReceiver<ConnectionState>,
    retry_delay: Duration,
    shutdown: F,
) -> usize
where
    F: Future<Output = ()>,
{
    let mut snapshots = session.snapshots();
    let retry = tokio::time::sleep(retry_delay);
    tokio::pin!(retry, shutdown);
    let mut retry_pending = false;
    let mut attempt: Option<JoinHandle<Result<(), StreamError>>> = None;
    let mut started = 0;

    loop {
        tokio::select! {
            () = &mut shutdown => break,
            Some(snapshot) = snapshots.next() => {
                println!("{}", render_snapshot(&snapshot, Metric::Power));
            }
            Some(lost) = losses.recv() => {
                tracing::info!("Connection {}, reconnecting in {:?}", lost, retry_delay);
                retry.as_mut().reset(Instant::now() + retry_delay);
                retry_pending = true;
            }
            () = &mut retry, if retry_pending => {
                retry_pending = false;
                match session.stream().reconnect() {
                    Ok(handle) => {
                        started += 1;
                        attempt = Some(handle);
                    }
                    Err(e) => tracing::warn!("Reconnect not started: {}", e),
                }
            }
        }
    }

    // Session shutdown closes whatever the attempt left behind
    if let Some(attempt) = attempt {
        attempt.abort();
    }
    started
}

/// One line for the user, or `None` for events they never see.
pub fn describe_event(event: &StreamEvent) -> Option<String> {
    match event {
        StreamEvent::Connected => Some("live connection established".to_string()),
        StreamEvent::LinkReady { subscription } => Some(match subscription {
            Some(id) => format!("receiving live data for {}", id),
            None => "receiving live data".to_string(),
        }),
        StreamEvent::Sample(_) => None,
        StreamEvent::CollectorStatus { collector_id, online } => Some(format!(
            "collector {} is {}",
            collector_id,
            if *online { "online" } else { "offline" }
        )),
        StreamEvent::Alert { event, collector_id, .. } => Some(match collector_id {
            Some(id) => format!("alert from {}: {}", id, event),
            None => format!("alert: {}", event),
        }),
        // Logged by the stream client
        StreamEvent::Malformed { .. } => None,
        StreamEvent::ConnectionLost { state, reason } => Some(format!(
            "live connection {} ({}), retry pending",
            state, reason
        )),
    }
}

/// Re-login prompt for expired sessions, retry notice for network trouble.
pub fn user_notice(error: &ApiError) -> String {
    if error.requires_login() {
        "your session has expired, please log in again".to_string()
    } else if error.is_retryable() {
        format!("the server could not be reached, try again later ({})", error)
    } else {
        format!("request failed: {}", error)
    }
}

pub fn render_collectors(collectors: &[Collector]) -> String {
    let mut out = String::new();
    for collector in collectors {
        let _ = writeln!(
            out,
            "{} {}",
            if collector.is_active { "*" } else { "-" },
            collector.display_name()
        );
    }
    if collectors.is_empty() {
        out.push_str("no collectors registered\n");
    }
    out
}

/// Latest reading plus the range of `metric` across the window.
pub fn render_snapshot(snapshot: &WindowSnapshot, metric: Metric) -> String {
    let Some(latest) = snapshot.latest() else {
        return "waiting for live data".to_string();
    };

    let values = snapshot.points(metric);
    let (min, max) = values
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &(_, v)| (lo.min(v), hi.max(v)));

    format!(
        "[{}/{}] {:.1} V  {:.2} A  {:.1} W  {:.1} Wh  {:.2} Hz  pf {:.2} | {:?} {:.1}..{:.1} {}",
        snapshot.len(),
        snapshot.capacity,
        latest.voltage,
        latest.current,
        latest.power,
        latest.energy,
        latest.frequency,
        latest.power_factor,
        metric,
        min,
        max,
        metric.unit()
    )
}

pub fn render_history(report: &HistoryReport, price_per_kwh: Option<f64>) -> String {
    let mut out = format!(
        "history for {}: {} points ({} fetched)",
        report.collector_id,
        report.samples.len(),
        report.raw_count
    );
    match &report.energy {
        Some(energy) => {
            let _ = write!(out, ", consumed {:.1} Wh", energy.consumed_wh);
            if let Some(price) = price_per_kwh {
                let _ = write!(out, ", cost {:.2}", energy.cost(price));
            }
        }
        None => out.push_str(", no data in range"),
    }
    out
}

pub fn render_prediction(result: &PredictionResult) -> String {
    let prediction = &result.prediction;
    let mut out = format!(
        "prediction ({}, {} points): {:.2} kWh today, {:.2} kWh remaining, confidence {:.0}%\n",
        result.algorithm_used,
        result.data_points,
        prediction.total_daily_energy_kwh,
        prediction.remaining_energy_kwh,
        prediction.confidence_level * 100.0
    );
    for hourly in &prediction.hourly_predictions {
        let _ = writeln!(
            out,
            "  {:02}:00  {:.3} kWh  {:.1} W",
            hourly.hour, hourly.predicted_energy_kwh, hourly.predicted_avg_power
        );
    }
    for tip in &prediction.recommendations {
        let _ = writeln!(out, "  - {}", tip);
    }
    out
}

pub struct LoggingRefreshObserver;

impl RefreshObserver for LoggingRefreshObserver {
    fn on_refresh(&self, outcome: RefreshOutcome) {
        match outcome {
            RefreshOutcome::Refreshed => tracing::debug!("Session extended"),
            RefreshOutcome::Rejected => tracing::warn!("Session expired, log in again"),
            RefreshOutcome::NoRefreshToken => tracing::warn!("No refresh token stored, log in again"),
        }
    }
}
