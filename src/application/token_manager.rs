// Credential lifecycle and single-flight token refresh
use crate::application::credential_store::{CredentialStore, ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY};
use crate::application::errors::RefreshError;
use crate::application::http_transport::{HttpRequest, HttpTransport, REFRESH_PATH};
use crate::domain::credentials::{Credentials, LoginData};
use crate::infrastructure::envelope;
use anyhow::Context;
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::{Mutex, RwLock};
use serde_json::json;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    Refreshed,
    Rejected,
    NoRefreshToken,
}

/// Side channel for the UI layer, e.g. to force a re-login after rejection.
pub trait RefreshObserver: Send + Sync {
    fn on_refresh(&self, outcome: RefreshOutcome);
}

type RefreshFlight = Shared<BoxFuture<'static, Result<String, RefreshError>>>;

enum RefreshState {
    Idle,
    InFlight(RefreshFlight),
}

/// Owns the access/refresh token pair.
///
/// At most one refresh call is outstanding per instance; callers arriving while
/// it runs await the same result.
pub struct TokenManager {
    inner: Arc<TokenInner>,
}

struct TokenInner {
    store: Arc<dyn CredentialStore>,
    http: Arc<dyn HttpTransport>,
    observer: RwLock<Option<Arc<dyn RefreshObserver>>>,
    // Guards the in-flight slot and every token write
    state: Mutex<RefreshState>,
}

impl TokenManager {
    pub fn new(store: Arc<dyn CredentialStore>, http: Arc<dyn HttpTransport>) -> Self {
        Self {
            inner: Arc::new(TokenInner {
                store,
                http,
                observer: RwLock::new(None),
                state: Mutex::new(RefreshState::Idle),
            }),
        }
    }

    pub fn set_observer(&self, observer: Arc<dyn RefreshObserver>) {
        *self.inner.observer.write() = Some(observer);
    }

    pub fn current_access_token(&self) -> Option<String> {
        self.inner.read(ACCESS_TOKEN_KEY)
    }

    pub fn credentials(&self) -> Credentials {
        Credentials {
            access_token: self.inner.read(ACCESS_TOKEN_KEY),
            refresh_token: self.inner.read(REFRESH_TOKEN_KEY),
        }
    }

    pub fn is_logged_in(&self) -> bool {
        self.credentials().is_logged_in()
    }

    pub fn is_refreshing(&self) -> bool {
        matches!(*self.inner.state.lock(), RefreshState::InFlight(_))
    }

    pub fn store_login(&self, access_token: &str, refresh_token: Option<&str>) -> anyhow::Result<()> {
        let _state = self.inner.state.lock();
        self.inner.store.set(ACCESS_TOKEN_KEY, access_token)?;
        if let Some(refresh_token) = refresh_token {
            self.inner.store.set(REFRESH_TOKEN_KEY, refresh_token)?;
        }
        Ok(())
    }

    pub fn clear(&self) -> anyhow::Result<()> {
        let _state = self.inner.state.lock();
        self.inner.clear_tokens()
    }

    /// Exchange the refresh token for a new access token.
    pub async fn refresh(&self) -> Result<String, RefreshError> {
        let flight = {
            let mut state = self.inner.state.lock();
            match &*state {
                RefreshState::InFlight(flight) => {
                    tracing::debug!("Joining in-flight token refresh");
                    flight.clone()
                }
                RefreshState::Idle => {
                    let flight = self.inner.clone().run_refresh().boxed().shared();
                    *state = RefreshState::InFlight(flight.clone());
                    flight
                }
            }
        };

        flight.await
    }
}

impl TokenInner {
    fn read(&self, key: &str) -> Option<String> {
        self.store.get(key).filter(|token| !token.is_empty())
    }

    fn clear_tokens(&self) -> anyhow::Result<()> {
        self.store.remove(ACCESS_TOKEN_KEY)?;
        self.store.remove(REFRESH_TOKEN_KEY)?;
        Ok(())
    }

    async fn run_refresh(self: Arc<Self>) -> Result<String, RefreshError> {
        let exchanged = self.exchange_refresh_token().await;

        let (result, outcome) = {
            let mut state = self.state.lock();
            let result = exchanged.and_then(|data| match self.persist(&data) {
                Ok(()) => Ok(data),
                Err(e) => Err(RefreshError::RefreshRejected(format!(
                    "failed to store refreshed tokens: {:#}",
                    e
                ))),
            });
            let outcome = match &result {
                Ok(_) => RefreshOutcome::Refreshed,
                Err(e) => {
                    // A session that cannot be extended is over
                    if let Err(clear_error) = self.clear_tokens() {
                        tracing::error!("Failed to clear credentials: {}", clear_error);
                    }
                    match e {
                        RefreshError::NoRefreshToken => RefreshOutcome::NoRefreshToken,
                        RefreshError::RefreshRejected(_) => RefreshOutcome::Rejected,
                    }
                }
            };
            *state = RefreshState::Idle;
            (result, outcome)
        };

        match &result {
            Ok(_) => tracing::info!("Access token refreshed"),
            Err(e) => tracing::warn!("Token refresh failed: {}", e),
        }

        let observer = self.observer.read().clone();
        if let Some(observer) = observer {
            observer.on_refresh(outcome);
        }

        result.map(|data| data.access_token.unwrap_or_default())
    }

    fn persist(&self, data: &LoginData) -> anyhow::Result<()> {
        if let Some(access_token) = &data.access_token {
            self.store
                .set(ACCESS_TOKEN_KEY, access_token)
                .context("failed to persist access token")?;
        }
        if let Some(refresh_token) = &data.refresh_token {
            self.store
                .set(REFRESH_TOKEN_KEY, refresh_token)
                .context("failed to persist refresh token")?;
        }
        Ok(())
    }

    async fn exchange_refresh_token(&self) -> Result<LoginData, RefreshError> {
        let Some(refresh_token) = self.read(REFRESH_TOKEN_KEY) else {
            tracing::debug!("No refresh token available");
            return Err(RefreshError::NoRefreshToken);
        };

        tracing::debug!("Attempting to refresh access token");
        let request = HttpRequest::post(REFRESH_PATH, json!({ "refresh_token": refresh_token }));
        let response = self
            .http
            .send(&request)
            .await
            .map_err(|e| RefreshError::RefreshRejected(e.to_string()))?;

        if !response.is_success() {
            return Err(RefreshError::RefreshRejected(format!(
                "status {}: {}",
                response.status,
                envelope::failure_reason(&response)
            )));
        }

        let reply = envelope::parse::<LoginData>(&response.body)
            .map_err(|e| RefreshError::RefreshRejected(e.to_string()))?;
        if !reply.success {
            return Err(RefreshError::RefreshRejected(
                reply.failure_message().unwrap_or_else(|| "refresh not accepted".to_string()),
            ));
        }

        match reply.data {
            Some(data) if data.access_token.as_deref().is_some_and(|t| !t.is_empty()) => Ok(data),
            _ => Err(RefreshError::RefreshRejected(
                "refresh response carried no access token".to_string(),
            )),
        }
    }
}
