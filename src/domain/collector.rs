// Collector domain model
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Collector {
    /// Server-side primary key
    #[serde(default)]
    pub id: i64,
    /// Identifier carried on stream events and used for subscriptions
    pub collector_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub is_active: bool,
    #[serde(default)]
    pub last_seen_at: Option<DateTime<Utc>>,
}

impl Collector {
    pub fn display_name(&self) -> String {
        if self.name.trim().is_empty() {
            self.collector_id.clone()
        } else {
            format!("{} ({})", self.name, self.collector_id)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectorStatus {
    pub collector: Collector,
    #[serde(default)]
    pub is_online: bool,
    #[serde(default)]
    pub last_data_time: Option<String>,
    #[serde(default)]
    pub data_count: i64,
}
