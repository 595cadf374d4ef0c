// Real-time stream states and the events dispatched to consumers
use super::sample::Sample;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Open,
    Closing,
    Failed,
}

impl ConnectionState {
    /// States from which a new connection attempt may start.
    pub fn is_idle(&self) -> bool {
        matches!(self, ConnectionState::Disconnected | ConnectionState::Failed)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "open",
            ConnectionState::Closing => "closing",
            ConnectionState::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Transport handshake completed
    Connected,
    /// Server confirmed the link; carries the subscription that is now in effect
    LinkReady { subscription: Option<String> },
    Sample(Sample),
    CollectorStatus { collector_id: String, online: bool },
    Alert {
        event: String,
        collector_id: Option<String>,
        data: serde_json::Value,
    },
    /// Unparsable payload; the connection stays up
    Malformed { reason: String },
    ConnectionLost { state: ConnectionState, reason: String },
}
