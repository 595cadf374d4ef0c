// Application state - Wires configuration, transports and services together
use crate::application::credential_store::CredentialStore;
use crate::application::dispatcher::Dispatcher;
use crate::application::history_service::HistoryService;
use crate::application::http_transport::HttpTransport;
use crate::application::live_session::LiveSession;
use crate::application::monitor_api::PowerMonitorApi;
use crate::application::request_pipeline::RequestPipeline;
use crate::application::stream_client::{StreamClient, StreamOptions};
use crate::application::stream_transport::StreamTransport;
use crate::application::token_manager::TokenManager;
use crate::infrastructure::config::ClientConfig;
use crate::infrastructure::reqwest_transport::ReqwestTransport;
use crate::infrastructure::token_store::{FileCredentialStore, MemoryCredentialStore};
use crate::infrastructure::websocket_transport::WebSocketTransport;
use crate::presentation::console::LoggingRefreshObserver;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub config: ClientConfig,
    pub tokens: Arc<TokenManager>,
    pub api: PowerMonitorApi,
    pub history: HistoryService,
    stream_transport: Arc<dyn StreamTransport>,
}

impl AppState {
    pub fn build(config: ClientConfig) -> anyhow::Result<Self> {
        config.validate()?;

        let store: Arc<dyn CredentialStore> = match &config.credentials.path {
            Some(path) => Arc::new(FileCredentialStore::open(path)?),
            None => Arc::new(MemoryCredentialStore::new()),
        };
        let http: Arc<dyn HttpTransport> = Arc::new(ReqwestTransport::from_settings(
            config.server.api_base_url(),
            &config.http,
        )?);
        let stream_transport = Arc::new(WebSocketTransport::new(config.http.connect_timeout()));

        Ok(Self::with_transports(config, store, http, stream_transport))
    }

    pub fn with_transports(
        config: ClientConfig,
        store: Arc<dyn CredentialStore>,
        http: Arc<dyn HttpTransport>,
        stream_transport: Arc<dyn StreamTransport>,
    ) -> Self {
        let tokens = Arc::new(TokenManager::new(store, http.clone()));
        tokens.set_observer(Arc::new(LoggingRefreshObserver));

        let api = PowerMonitorApi::new(RequestPipeline::new(http, tokens.clone()));
        let history = HistoryService::new(api.clone(), config.session.history_max_points);

        Self {
            config,
            tokens,
            api,
            history,
            stream_transport,
        }
    }

    /// Start a live session whose stream client reports to the session worker
    /// and, through it, to `downstream`.
    pub fn start_live_session(&self, downstream: Arc<dyn Dispatcher>) -> LiveSession {
        let endpoint = self.config.websocket_url();
        let transport = self.stream_transport.clone();
        let tokens = self.tokens.clone();
        let options = StreamOptions {
            heartbeat_interval: self.config.stream.heartbeat_interval(),
            event_buffer: self.config.stream.event_buffer,
        };

        LiveSession::start(self.config.session.window_capacity, downstream, move |dispatcher| {
            StreamClient::new(endpoint, transport, tokens, dispatcher, options)
        })
    }
}
