// History service - Use case for loading a chartable history range
use crate::application::errors::ApiError;
use crate::application::monitor_api::{HistoryQuery, PowerMonitorApi};
use crate::domain::downsampler;
use crate::domain::sample::{EnergySummary, Sample};
use std::time::Instant;

pub const DEFAULT_HISTORY_POINTS: usize = 500;

#[derive(Debug, Clone, PartialEq)]
pub struct HistoryReport {
    pub collector_id: String,
    /// Samples returned by the server before reduction
    pub raw_count: usize,
    /// Ordered by timestamp, at most `max_points + 1` entries
    pub samples: Vec<Sample>,
    pub energy: Option<EnergySummary>,
}

#[derive(Clone)]
pub struct HistoryService {
    api: PowerMonitorApi,
    max_points: usize,
}

impl HistoryService {
    pub fn new(api: PowerMonitorApi, max_points: usize) -> Self {
        Self { api, max_points }
    }

    pub async fn load(&self, collector_id: &str, query: HistoryQuery) -> Result<HistoryReport, ApiError> {
        let started = Instant::now();
        let query = match query.limit {
            Some(_) => query,
            None => query.with_limit(u32::try_from(self.max_points).unwrap_or(u32::MAX)),
        };

        let raw = self.api.history(collector_id, &query).await?;
        let samples = downsampler::reduce(&raw, self.max_points);
        let energy = EnergySummary::from_ordered(&samples);

        tracing::info!(
            "Loaded history for {}: {} samples reduced to {} in {:?}",
            collector_id,
            raw.len(),
            samples.len(),
            started.elapsed()
        );

        Ok(HistoryReport {
            collector_id: collector_id.to_string(),
            raw_count: raw.len(),
            samples,
            energy,
        })
    }
}
