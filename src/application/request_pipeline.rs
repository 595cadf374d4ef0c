// Authenticated request pipeline with one refresh-and-retry on 401
use crate::application::errors::TransportError;
use crate::application::http_transport::{HttpRequest, HttpResponse, HttpTransport};
use crate::application::token_manager::TokenManager;
use std::sync::Arc;

#[derive(Clone)]
pub struct RequestPipeline {
    http: Arc<dyn HttpTransport>,
    tokens: Arc<TokenManager>,
}

impl RequestPipeline {
    pub fn new(http: Arc<dyn HttpTransport>, tokens: Arc<TokenManager>) -> Self {
        Self { http, tokens }
    }

    pub fn tokens(&self) -> &Arc<TokenManager> {
        &self.tokens
    }

    /// Send `request` with the current bearer token.
    ///
    /// A 401 triggers one token refresh; on success the request is replayed
    /// exactly once with the new token and that response is returned whatever
    /// its status. When the refresh fails the original 401 comes back as is.
    pub async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        if request.is_auth_endpoint() {
            return self.http.send(&request).await;
        }

        let authorized = request
            .clone()
            .with_bearer(self.tokens.current_access_token());
        let response = self.http.send(&authorized).await?;
        if !response.is_unauthorized() {
            return Ok(response);
        }

        tracing::debug!("{} {} returned 401, refreshing token", request.method, request.path);
        match self.tokens.refresh().await {
            Ok(token) => {
                let retry = request.with_bearer(Some(token));
                self.http.send(&retry).await
            }
            Err(e) => {
                tracing::warn!("Token refresh failed for {}: {}", request.path, e);
                Ok(response)
            }
        }
    }
}
