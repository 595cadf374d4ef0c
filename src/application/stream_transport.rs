// Real-time transport capability used by the stream client
use crate::application::errors::TransportError;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Callbacks from the transport, delivered in order over a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Opened,
    Message(String),
    Closed { reason: String },
    Error(String),
}

#[async_trait]
pub trait StreamTransport: Send + Sync {
    /// Open one connection, authenticating with `bearer` when present.
    ///
    /// Returns once the handshake has completed. Everything the connection
    /// observes afterwards, starting with `Opened`, is sent on `events`.
    async fn open(
        &self,
        endpoint: &str,
        bearer: Option<String>,
        events: mpsc::Sender<TransportEvent>,
    ) -> Result<Arc<dyn StreamHandle>, TransportError>;
}

#[async_trait]
pub trait StreamHandle: Send + Sync {
    async fn ping(&self) -> Result<(), TransportError>;

    async fn close(&self) -> Result<(), TransportError>;
}
