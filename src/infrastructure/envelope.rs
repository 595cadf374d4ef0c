// Response envelope shared by every REST endpoint
use crate::application::errors::ApiError;
use crate::application::http_transport::HttpResponse;
use serde::de::DeserializeOwned;
use serde::Deserialize;

/// `{success, message, data, error}` wrapper around every payload.
#[derive(Debug, Deserialize)]
pub struct ApiEnvelope<T> {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
    pub data: Option<T>,
    #[serde(default)]
    pub error: Option<String>,
}

impl<T> ApiEnvelope<T> {
    /// Prefers the `error` field, falls back to `message`.
    pub fn failure_message(&self) -> Option<String> {
        self.error
            .as_deref()
            .or(self.message.as_deref())
            .filter(|m| !m.trim().is_empty())
            .map(str::to_string)
    }
}

pub fn parse<T: DeserializeOwned>(body: &str) -> Result<ApiEnvelope<T>, ApiError> {
    serde_json::from_str(body).map_err(|e| ApiError::Decode(e.to_string()))
}

/// Best-effort human readable reason for a failed response.
pub fn failure_reason(response: &HttpResponse) -> String {
    serde_json::from_str::<ApiEnvelope<serde_json::Value>>(&response.body)
        .ok()
        .and_then(|envelope| envelope.failure_message())
        .unwrap_or_else(|| {
            if response.body.trim().is_empty() {
                format!("HTTP {}", response.status)
            } else {
                response.body.clone()
            }
        })
}

/// Map a pipeline response onto the payload or the matching `ApiError`.
pub fn decode<T: DeserializeOwned>(response: &HttpResponse) -> Result<Option<T>, ApiError> {
    if response.is_unauthorized() {
        return Err(ApiError::AuthExhausted);
    }

    if !response.is_success() {
        return Err(ApiError::Application {
            status: response.status,
            message: failure_reason(response),
        });
    }

    let envelope = parse::<T>(&response.body)?;
    if !envelope.success {
        return Err(ApiError::Application {
            status: response.status,
            message: envelope
                .failure_message()
                .unwrap_or_else(|| "request was not successful".to_string()),
        });
    }

    Ok(envelope.data)
}
