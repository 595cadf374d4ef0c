// Power sample domain models
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// One timestamped electrical measurement from a collector.
///
/// Values are carried exactly as reported: voltage in V, current in A,
/// power in W, energy in Wh, frequency in Hz.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    #[serde(alias = "collectorId")]
    pub collector_id: String,
    #[serde(default, alias = "collectorName", skip_serializing_if = "Option::is_none")]
    pub collector_name: Option<String>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub voltage: f64,
    #[serde(default)]
    pub current: f64,
    #[serde(default)]
    pub power: f64,
    #[serde(default)]
    pub energy: f64,
    #[serde(default)]
    pub frequency: f64,
    #[serde(default, alias = "powerFactor")]
    pub power_factor: f64,
}

impl Sample {
    pub fn new(collector_id: impl Into<String>, timestamp: Option<DateTime<Utc>>) -> Self {
        Self {
            collector_id: collector_id.into(),
            collector_name: None,
            timestamp,
            voltage: 0.0,
            current: 0.0,
            power: 0.0,
            energy: 0.0,
            frequency: 0.0,
            power_factor: 0.0,
        }
    }

    pub fn value(&self, metric: Metric) -> f64 {
        match metric {
            Metric::Power => self.power,
            Metric::Voltage => self.voltage,
            Metric::Current => self.current,
            Metric::Energy => self.energy,
            Metric::Frequency => self.frequency,
            Metric::PowerFactor => self.power_factor,
        }
    }
}

/// Orders timestamps ascending with missing timestamps after every concrete one.
pub fn compare_timestamps(a: &Option<DateTime<Utc>>, b: &Option<DateTime<Utc>>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.cmp(b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Metric {
    Power,
    Voltage,
    Current,
    Energy,
    Frequency,
    PowerFactor,
}

impl Metric {
    pub fn unit(&self) -> &'static str {
        match self {
            Metric::Power => "W",
            Metric::Voltage => "V",
            Metric::Current => "A",
            Metric::Energy => "Wh",
            Metric::Frequency => "Hz",
            Metric::PowerFactor => "",
        }
    }
}

/// Energy consumed across an ordered series, from its first and last counters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnergySummary {
    pub start_wh: f64,
    pub end_wh: f64,
    pub consumed_wh: f64,
}

impl EnergySummary {
    /// Expects samples already ordered by timestamp. Returns `None` for an empty series.
    pub fn from_ordered(samples: &[Sample]) -> Option<Self> {
        let first = samples.first()?;
        let last = samples.last()?;
        Some(Self {
            start_wh: first.energy,
            end_wh: last.energy,
            // Counter resets on the meter must not show up as negative consumption
            consumed_wh: (last.energy - first.energy).max(0.0),
        })
    }

    pub fn cost(&self, price_per_kwh: f64) -> f64 {
        (self.consumed_wh / 1000.0) * price_per_kwh
    }
}
