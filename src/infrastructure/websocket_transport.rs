// Real-time transport over WebSocket (tokio-tungstenite)
use crate::application::errors::TransportError;
use crate::application::stream_transport::{StreamHandle, StreamTransport, TransportEvent};
use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{HeaderValue, AUTHORIZATION};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct WebSocketTransport {
    connect_timeout: Duration,
}

impl WebSocketTransport {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

#[async_trait]
impl StreamTransport for WebSocketTransport {
    async fn open(
        &self,
        endpoint: &str,
        bearer: Option<String>,
        events: mpsc::Sender<TransportEvent>,
    ) -> Result<Arc<dyn StreamHandle>, TransportError> {
        let mut request = endpoint
            .into_client_request()
            .map_err(|e| TransportError::Protocol(e.to_string()))?;
        if let Some(token) = bearer {
            let value = HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|e| TransportError::Protocol(e.to_string()))?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }

        let (socket, response) = tokio::time::timeout(
            self.connect_timeout,
            tokio_tungstenite::connect_async(request),
        )
        .await
        .map_err(|_| TransportError::Timeout)?
        .map_err(map_ws_error)?;
        tracing::debug!("WebSocket handshake with {} completed ({})", endpoint, response.status());

        let (sink, stream) = socket.split();
        events
            .send(TransportEvent::Opened)
            .await
            .map_err(|_| TransportError::InvalidState("event receiver dropped".to_string()))?;
        let reader = tokio::spawn(read_frames(stream, events));

        Ok(Arc::new(WebSocketHandle {
            sink: Mutex::new(sink),
            reader,
        }))
    }
}

struct WebSocketHandle {
    sink: Mutex<SplitSink<Socket, Message>>,
    reader: JoinHandle<()>,
}

#[async_trait]
impl StreamHandle for WebSocketHandle {
    async fn ping(&self) -> Result<(), TransportError> {
        self.sink
            .lock()
            .await
            .send(Message::Ping(Vec::new()))
            .await
            .map_err(map_ws_error)
    }

    async fn close(&self) -> Result<(), TransportError> {
        let result = {
            let mut sink = self.sink.lock().await;
            match sink.send(Message::Close(None)).await {
                Ok(()) | Err(WsError::AlreadyClosed) | Err(WsError::ConnectionClosed) => Ok(()),
                Err(e) => Err(map_ws_error(e)),
            }
        };
        self.reader.abort();
        result
    }
}

impl Drop for WebSocketHandle {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

async fn read_frames(mut stream: SplitStream<Socket>, events: mpsc::Sender<TransportEvent>) {
    while let Some(frame) = stream.next().await {
        let event = match frame {
            Ok(Message::Text(text)) => TransportEvent::Message(text),
            Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                Ok(text) => TransportEvent::Message(text),
                Err(_) => {
                    tracing::debug!("Skipping non UTF-8 binary frame");
                    continue;
                }
            },
            Ok(Message::Close(frame)) => {
                let reason = frame
                    .map(|f| f.reason.to_string())
                    .filter(|r| !r.is_empty())
                    .unwrap_or_else(|| "closed by server".to_string());
                let _ = events.send(TransportEvent::Closed { reason }).await;
                return;
            }
            Ok(_) => continue,
            Err(e) => {
                let _ = events.send(TransportEvent::Error(e.to_string())).await;
                return;
            }
        };

        if events.send(event).await.is_err() {
            return;
        }
    }

    let _ = events
        .send(TransportEvent::Closed {
            reason: "connection ended".to_string(),
        })
        .await;
}

fn map_ws_error(error: WsError) -> TransportError {
    match error {
        WsError::Io(e) => TransportError::Unreachable(e.to_string()),
        WsError::ConnectionClosed | WsError::AlreadyClosed => {
            TransportError::InvalidState(error.to_string())
        }
        other => TransportError::Protocol(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::fakes::power_data_message;
    use tokio::net::TcpListener;
    use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};

    async fn next(rx: &mut mpsc::Receiver<TransportEvent>) -> TransportEvent {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for transport event")
            .expect("transport event channel closed")
    }

    #[tokio::test]
    async fn test_open_authenticates_and_forwards_frames() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let seen_auth = Arc::new(parking_lot::Mutex::new(None::<String>));
        let seen = seen_auth.clone();

        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let callback = move |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
                *seen.lock() = request
                    .headers()
                    .get("authorization")
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);
                Ok(response)
            };
            let mut socket = tokio_tungstenite::accept_hdr_async(tcp, callback).await.unwrap();
            socket
                .send(Message::Text(power_data_message("meter-a", 42.0)))
                .await
                .unwrap();
            socket.close(None).await.unwrap();
            while socket.next().await.is_some() {}
        });

        let (tx, mut rx) = mpsc::channel(16);
        let transport = WebSocketTransport::new(Duration::from_secs(2));
        let _handle = transport
            .open(&format!("ws://{}/api/realtime/ws", addr), Some("a-1".to_string()), tx)
            .await
            .unwrap();

        assert_eq!(next(&mut rx).await, TransportEvent::Opened);
        assert_eq!(
            next(&mut rx).await,
            TransportEvent::Message(power_data_message("meter-a", 42.0))
        );
        assert!(matches!(next(&mut rx).await, TransportEvent::Closed { .. }));
        assert_eq!(seen_auth.lock().as_deref(), Some("Bearer a-1"));
    }

    #[tokio::test]
    async fn test_open_unreachable() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let (tx, _rx) = mpsc::channel(4);
        let result = WebSocketTransport::new(Duration::from_secs(2))
            .open(&format!("ws://{}/api/realtime/ws", addr), None, tx)
            .await;
        assert!(matches!(result, Err(TransportError::Unreachable(_))));
    }
}
