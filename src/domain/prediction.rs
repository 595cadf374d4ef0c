// Energy prediction models returned by the analytics endpoint
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
#[value(rename_all = "snake_case")]
pub enum PredictionAlgorithm {
    #[default]
    Hybrid,
    Linear,
    Seasonal,
    MovingAverage,
}

impl PredictionAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            PredictionAlgorithm::Hybrid => "hybrid",
            PredictionAlgorithm::Linear => "linear",
            PredictionAlgorithm::Seasonal => "seasonal",
            PredictionAlgorithm::MovingAverage => "moving_average",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    #[serde(default)]
    pub prediction: EnergyPrediction,
    #[serde(default, alias = "actualConsumption")]
    pub actual_consumption: f64,
    #[serde(default, alias = "algorithmUsed")]
    pub algorithm_used: String,
    #[serde(default, alias = "dataPoints")]
    pub data_points: i64,
    #[serde(default, alias = "predictionTime")]
    pub prediction_time: Option<String>,
    #[serde(default)]
    pub collectors: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnergyPrediction {
    #[serde(default)]
    pub total_daily_energy_kwh: f64,
    #[serde(default)]
    pub remaining_energy_kwh: f64,
    #[serde(default)]
    pub predicted_end_time: Option<String>,
    #[serde(default)]
    pub confidence_level: f64,
    #[serde(default)]
    pub prediction_accuracy: Option<String>,
    #[serde(default)]
    pub hourly_predictions: Vec<HourlyPrediction>,
    #[serde(default)]
    pub collector_predictions: Vec<CollectorPrediction>,
    #[serde(default)]
    pub recommendations: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HourlyPrediction {
    pub hour: u32,
    #[serde(default)]
    pub predicted_energy_kwh: f64,
    #[serde(default)]
    pub predicted_avg_power: f64,
    #[serde(default)]
    pub confidence_interval: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CollectorPrediction {
    pub collector_id: String,
    #[serde(default)]
    pub collector_name: Option<String>,
    #[serde(default)]
    pub predicted_energy_kwh: f64,
    #[serde(default)]
    pub current_energy_kwh: f64,
    #[serde(default)]
    pub percentage_of_total: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_algorithm_round_trip_names() {
        assert_eq!(PredictionAlgorithm::default().as_str(), "hybrid");
        for algorithm in PredictionAlgorithm::value_variants() {
            assert_eq!(
                PredictionAlgorithm::from_str(algorithm.as_str(), false),
                Ok(*algorithm)
            );
        }
        assert!(PredictionAlgorithm::from_str("quantum", false).is_err());
    }

    #[test]
    fn test_partial_prediction_payload() {
        let json = r#"{
            "prediction": {"total_daily_energy_kwh": 12.5, "hourly_predictions": [{"hour": 13, "predicted_energy_kwh": 0.6}]},
            "actualConsumption": 7.25,
            "algorithmUsed": "linear"
        }"#;
        let result: PredictionResult = serde_json::from_str(json).unwrap();
        assert_eq!(result.prediction.total_daily_energy_kwh, 12.5);
        assert_eq!(result.prediction.hourly_predictions[0].hour, 13);
        assert_eq!(result.actual_consumption, 7.25);
        assert_eq!(result.algorithm_used, "linear");
        assert!(result.collectors.is_empty());
    }
}
