// Power monitor REST API - Typed calls on top of the request pipeline
use crate::application::errors::ApiError;
use crate::application::http_transport::{HttpRequest, HttpResponse, LOGIN_PATH};
use crate::application::request_pipeline::RequestPipeline;
use crate::application::token_manager::TokenManager;
use crate::domain::collector::{Collector, CollectorStatus};
use crate::domain::credentials::LoginData;
use crate::domain::prediction::{PredictionAlgorithm, PredictionResult};
use crate::domain::sample::Sample;
use crate::infrastructure::envelope;
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde_json::json;
use std::sync::Arc;

const LOGOUT_PATH: &str = "api/auth/logout";
const COLLECTORS_PATH: &str = "api/client/data/collectors";
const PREDICTION_PATH: &str = "api/client/analytics/prediction";

/// Time range of a history request. Both ends are inclusive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryQuery {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub limit: Option<u32>,
}

impl HistoryQuery {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end, limit: None }
    }

    /// Whole days: `start` at 00:00:00Z through `end` at 23:59:59Z.
    pub fn for_days(start: NaiveDate, end: NaiveDate) -> Self {
        let start = start.and_time(NaiveTime::MIN).and_utc();
        let end = end.and_time(NaiveTime::MIN).and_utc() + Duration::seconds(86_399);
        Self::new(start, end)
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    fn params(&self) -> Vec<(String, String)> {
        let mut params = vec![
            ("start".to_string(), format_instant(&self.start)),
            ("end".to_string(), format_instant(&self.end)),
        ];
        if let Some(limit) = self.limit {
            params.push(("limit".to_string(), limit.to_string()));
        }
        params
    }
}

fn format_instant(instant: &DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn collector_path(collector_id: &str, suffix: &str) -> String {
    format!("{}/{}/{}", COLLECTORS_PATH, urlencoding::encode(collector_id), suffix)
}

#[derive(Clone)]
pub struct PowerMonitorApi {
    pipeline: RequestPipeline,
}

impl PowerMonitorApi {
    pub fn new(pipeline: RequestPipeline) -> Self {
        Self { pipeline }
    }

    pub fn tokens(&self) -> &Arc<TokenManager> {
        self.pipeline.tokens()
    }

    /// Exchange username and password for a token pair and persist it.
    pub async fn login(&self, username: &str, password: &str) -> Result<LoginData, ApiError> {
        let request = HttpRequest::post(
            LOGIN_PATH,
            json!({ "username": username, "password": password }),
        );
        let response = self.pipeline.execute(request).await?;

        // Bad credentials are an application failure, not an expired session
        if response.is_unauthorized() {
            return Err(ApiError::Application {
                status: response.status,
                message: envelope::failure_reason(&response),
            });
        }

        let data: LoginData = envelope::decode(&response)?.ok_or(ApiError::EmptyPayload)?;
        let access_token = data
            .access_token
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or(ApiError::EmptyPayload)?;

        self.tokens()
            .store_login(access_token, data.refresh_token.as_deref())
            .map_err(|e| ApiError::Storage(e.to_string()))?;
        tracing::info!(
            "Logged in as {}",
            data.user.as_ref().map(|u| u.username.as_str()).unwrap_or(username)
        );
        Ok(data)
    }

    /// Tell the server, then forget the local credentials whatever it answered.
    pub async fn logout(&self) -> Result<(), ApiError> {
        match self.pipeline.execute(HttpRequest::post(LOGOUT_PATH, json!({}))).await {
            Ok(response) if response.is_success() => tracing::info!("Logged out"),
            Ok(response) => tracing::warn!("Server logout returned status {}", response.status),
            Err(e) => tracing::warn!("Server logout failed: {}", e),
        }
        self.tokens()
            .clear()
            .map_err(|e| ApiError::Storage(e.to_string()))
    }

    pub async fn collectors(&self) -> Result<Vec<Collector>, ApiError> {
        let collectors: Option<Vec<Collector>> = self.get(HttpRequest::get(COLLECTORS_PATH)).await?;
        Ok(collectors.unwrap_or_default())
    }

    pub async fn collector_status(&self, collector_id: &str) -> Result<CollectorStatus, ApiError> {
        self.get(HttpRequest::get(collector_path(collector_id, "status")))
            .await?
            .ok_or(ApiError::EmptyPayload)
    }

    /// Most recent reading, `None` when the collector never reported.
    pub async fn latest(&self, collector_id: &str) -> Result<Option<Sample>, ApiError> {
        self.get(HttpRequest::get(collector_path(collector_id, "latest"))).await
    }

    pub async fn history(&self, collector_id: &str, query: &HistoryQuery) -> Result<Vec<Sample>, ApiError> {
        let request = query
            .params()
            .into_iter()
            .fold(HttpRequest::get(collector_path(collector_id, "history")), |request, (key, value)| {
                request.with_query(key, value)
            });
        let samples: Option<Vec<Sample>> = self.get(request).await?;
        let samples = samples.unwrap_or_default();
        tracing::debug!("Fetched {} history samples for {}", samples.len(), collector_id);
        Ok(samples)
    }

    pub async fn prediction(
        &self,
        collector_id: &str,
        algorithm: PredictionAlgorithm,
    ) -> Result<PredictionResult, ApiError> {
        let path = format!("{}/{}", PREDICTION_PATH, urlencoding::encode(collector_id));
        let request = HttpRequest::get(path).with_query("algorithm", algorithm.as_str());
        self.get(request).await?.ok_or(ApiError::EmptyPayload)
    }

    async fn get<T: DeserializeOwned>(&self, request: HttpRequest) -> Result<Option<T>, ApiError> {
        let response: HttpResponse = self.pipeline.execute(request).await?;
        envelope::decode(&response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::errors::TransportError;
    use crate::application::fakes::{login_body, ScriptedHttp};
    use crate::infrastructure::token_store::MemoryCredentialStore;
    use chrono::TimeZone;

    fn api() -> (PowerMonitorApi, Arc<ScriptedHttp>) {
        let http = Arc::new(ScriptedHttp::new());
        let tokens = Arc::new(TokenManager::new(Arc::new(MemoryCredentialStore::new()), http.clone()));
        (PowerMonitorApi::new(RequestPipeline::new(http.clone(), tokens)), http)
    }

    #[test]
    fn test_history_query_for_days() {
        let query = HistoryQuery::for_days(
            NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 5, 3).unwrap(),
        )
        .with_limit(500);

        assert_eq!(
            query.params(),
            vec![
                ("start".to_string(), "2024-05-01T00:00:00Z".to_string()),
                ("end".to_string(), "2024-05-03T23:59:59Z".to_string()),
                ("limit".to_string(), "500".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_login_persists_tokens() {
        let (api, http) = api();
        http.push_json(LOGIN_PATH, 200, login_body("a-1", "r-1"));

        let data = api.login("alice", "secret").await.unwrap();
        assert_eq!(data.user.unwrap().username, "alice");
        assert_eq!(api.tokens().current_access_token().as_deref(), Some("a-1"));
        assert_eq!(api.tokens().credentials().refresh_token.as_deref(), Some("r-1"));

        let sent = http.requests_to(LOGIN_PATH);
        assert_eq!(sent[0].body, Some(json!({"username": "alice", "password": "secret"})));
        assert_eq!(sent[0].bearer, None);
    }

    #[tokio::test]
    async fn test_login_rejected() {
        let (api, http) = api();
        http.push_json(LOGIN_PATH, 401, json!({"success": false, "error": "invalid credentials"}));

        match api.login("alice", "wrong").await {
            Err(ApiError::Application { status, message }) => {
                assert_eq!(status, 401);
                assert_eq!(message, "invalid credentials");
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(!api.tokens().is_logged_in());
    }

    #[tokio::test]
    async fn test_logout_clears_even_when_server_fails() {
        let (api, http) = api();
        api.tokens().store_login("a-1", Some("r-1")).unwrap();
        http.push(LOGOUT_PATH, Err(TransportError::Timeout));

        api.logout().await.unwrap();
        assert!(!api.tokens().is_logged_in());
    }

    #[tokio::test]
    async fn test_collectors_and_status() {
        let (api, http) = api();
        api.tokens().store_login("a-1", Some("r-1")).unwrap();
        http.push_json(
            COLLECTORS_PATH,
            200,
            json!({"success": true, "data": [{"id": 1, "collector_id": "meter-a", "name": "Kitchen", "is_active": true}]}),
        );
        http.push_json(
            "api/client/data/collectors/meter-a/status",
            200,
            json!({"success": true, "data": {"collector": {"collector_id": "meter-a"}, "is_online": true, "data_count": 12}}),
        );

        let collectors = api.collectors().await.unwrap();
        assert_eq!(collectors.len(), 1);
        assert_eq!(collectors[0].display_name(), "Kitchen (meter-a)");

        let status = api.collector_status("meter-a").await.unwrap();
        assert!(status.is_online);
        assert_eq!(status.data_count, 12);
        assert_eq!(http.requests_to(COLLECTORS_PATH)[0].bearer.as_deref(), Some("a-1"));
    }

    #[tokio::test]
    async fn test_history_request_and_decoding() {
        let (api, http) = api();
        http.push_json(
            "api/client/data/collectors/meter%20a/history",
            200,
            json!({"success": true, "data": [
                {"collector_id": "meter a", "timestamp": "2024-05-01T10:00:00Z", "power": 10.0, "energy": 100.0},
                {"collector_id": "meter a", "timestamp": null, "power": 11.0}
            ]}),
        );

        let start = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 5, 1, 23, 59, 59).unwrap();
        let samples = api
            .history("meter a", &HistoryQuery::new(start, end).with_limit(10))
            .await
            .unwrap();

        assert_eq!(samples.len(), 2);
        assert_eq!(samples[1].timestamp, None);
        let request = &http.requests()[0];
        assert_eq!(request.path, "api/client/data/collectors/meter%20a/history");
        assert!(request.query.contains(&("end".to_string(), "2024-05-01T23:59:59Z".to_string())));
    }

    #[tokio::test]
    async fn test_latest_without_data() {
        let (api, http) = api();
        http.push_json(
            "api/client/data/collectors/meter-a/latest",
            200,
            json!({"success": true, "data": null}),
        );
        assert_eq!(api.latest("meter-a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_expired_session_requires_login() {
        let (api, http) = api();
        api.tokens().store_login("stale", None).unwrap();
        http.push_json(COLLECTORS_PATH, 401, json!({"success": false, "error": "expired"}));

        let err = api.collectors().await.unwrap_err();
        assert!(err.requires_login());
    }

    #[tokio::test]
    async fn test_prediction_uses_algorithm() {
        let (api, http) = api();
        http.push_json(
            "api/client/analytics/prediction/meter-a",
            200,
            json!({"success": true, "data": {
                "prediction": {"total_daily_energy_kwh": 12.5, "confidence_level": 0.8},
                "algorithm_used": "linear",
                "data_points": 120
            }}),
        );

        let result = api.prediction("meter-a", PredictionAlgorithm::Linear).await.unwrap();
        assert_eq!(result.algorithm_used, "linear");
        assert_eq!(result.prediction.total_daily_energy_kwh, 12.5);
        assert_eq!(
            http.requests()[0].query,
            vec![("algorithm".to_string(), "linear".to_string())]
        );
    }
}
