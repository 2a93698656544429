use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::enums::BackendKind;

/// Client-submitted record of a prediction outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionLogIn {
    pub patient_id: i64,
    pub predicted_drug: String,
    pub model_type: String,
    #[serde(default)]
    pub prediction_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub actual_drug: Option<String>,
    #[serde(default)]
    pub prediction_success: Option<bool>,
    pub db_used: BackendKind,
}

impl PredictionLogIn {
    /// Fill the optional fields: time defaults to now, success to
    /// `predicted == actual` when an actual drug is known.
    pub fn resolve(self, now: DateTime<Utc>) -> PredictionLogEntry {
        let prediction_success = self.prediction_success.or_else(|| {
            self.actual_drug
                .as_deref()
                .map(|actual| actual == self.predicted_drug)
        });
        PredictionLogEntry {
            patient_id: self.patient_id,
            predicted_drug: self.predicted_drug,
            model_type: self.model_type,
            prediction_time: self.prediction_time.unwrap_or(now),
            actual_drug: self.actual_drug,
            prediction_success,
            db_used: self.db_used,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionLogEntry {
    pub patient_id: i64,
    pub predicted_drug: String,
    pub model_type: String,
    pub prediction_time: DateTime<Utc>,
    pub actual_drug: Option<String>,
    pub prediction_success: Option<bool>,
    pub db_used: BackendKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionLog {
    pub log_id: i64,
    #[serde(flatten)]
    pub entry: PredictionLogEntry,
}
