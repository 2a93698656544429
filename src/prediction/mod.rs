//! Drug prediction for the most recently created patient.
//!
//! Flow: check the model type, get the artifacts (preprocessor and
//! classifier), resolve the latest patient over the fallback chain, build
//! the feature row, transform, classify, and map the argmax through the
//! fixed label table. Nothing here writes to either store.

pub mod artifacts;
pub mod classifier;
pub mod preprocess;

use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

use crate::latest::FallbackChain;
use crate::models::{BackendKind, DrugType, PatientFeatures};

pub use artifacts::{ArtifactPaths, ArtifactStore, Artifacts};
pub use classifier::{Classifier, DenseNetwork};
pub use preprocess::Preprocessor;

/// The only model type served.
pub const MODEL_TYPE_NN: &str = "nn";

/// Class index → drug label, in training order.
pub const DRUG_LABELS: [DrugType; 5] = [
    DrugType::DrugY,
    DrugType::DrugA,
    DrugType::DrugB,
    DrugType::DrugC,
    DrugType::DrugX,
];

#[derive(Error, Debug)]
pub enum PredictionError {
    #[error("Invalid model_type '{0}': only 'nn' is supported")]
    InvalidModelType(String),

    #[error("{kind} artifact not found at {}", path.display())]
    ArtifactMissing { kind: &'static str, path: PathBuf },

    #[error("{kind} artifact at {} is invalid: {reason}", path.display())]
    ArtifactInvalid {
        kind: &'static str,
        path: PathBuf,
        reason: String,
    },

    #[error("Inference runtime unavailable for {}: {reason}", path.display())]
    RuntimeUnavailable { path: PathBuf, reason: String },

    #[error("No patient found in any database")]
    NoPatient,

    #[error("Preprocessing failed: {0}")]
    Preprocessing(String),

    #[error("Inference failed: {0}")]
    Inference(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PredictionResult {
    pub db_used: BackendKind,
    pub model_type: String,
    pub prediction: String,
    pub actual: Option<String>,
    pub patient_features: PatientFeatures,
}

/// Label for a class index; indices past the table become `Unknown_<i>`.
pub fn label_for_index(index: usize) -> String {
    DRUG_LABELS
        .get(index)
        .map(|drug| drug.as_str().to_string())
        .unwrap_or_else(|| format!("Unknown_{index}"))
}

/// Index of the largest probability; the first one wins a tie.
pub fn argmax(distribution: &[f32]) -> Result<usize, PredictionError> {
    if distribution.is_empty() {
        return Err(PredictionError::Inference("classifier returned no classes".into()));
    }
    if let Some(bad) = distribution.iter().find(|p| !p.is_finite()) {
        return Err(PredictionError::Inference(format!(
            "classifier returned a non-finite score ({bad})"
        )));
    }
    let mut best = 0;
    for (i, &p) in distribution.iter().enumerate().skip(1) {
        if p > distribution[best] {
            best = i;
        }
    }
    Ok(best)
}

pub struct PredictionService {
    artifacts: ArtifactStore,
}

impl PredictionService {
    pub fn new(artifacts: ArtifactStore) -> Self {
        Self { artifacts }
    }

    pub fn artifacts(&self) -> &ArtifactStore {
        &self.artifacts
    }

    pub fn predict(&self, model_type: &str, chain: &FallbackChain) -> Result<PredictionResult, PredictionError> {
        if model_type != MODEL_TYPE_NN {
            return Err(PredictionError::InvalidModelType(model_type.to_string()));
        }

        let artifacts = self.artifacts.get()?;
        let latest = chain.latest().ok_or(PredictionError::NoPatient)?;

        let features = latest.patient.features();
        let row = artifacts.preprocessor.transform(&features)?;
        let distribution = artifacts.classifier.predict(&row)?;
        let index = argmax(&distribution)?;
        let prediction = label_for_index(index);

        tracing::info!(
            backend = %latest.backend,
            patient_id = latest.patient.patient_id,
            %prediction,
            "Prediction completed"
        );

        Ok(PredictionResult {
            db_used: latest.backend,
            model_type: model_type.to_string(),
            prediction,
            actual: latest.patient.drug,
            patient_features: features,
        })
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::path::Path;

    use super::ArtifactPaths;

    /// Preprocessor: identity scaling for the numerics, one-hot for the
    /// categoricals. Output row: [Age, F, M, HIGH, LOW, NORMAL, HIGH, NORMAL, Na_to_K].
    pub const PREPROCESSOR_JSON: &str = r#"{
        "steps": [
            {"kind": "standard_scale", "column": "Age", "mean": 0.0, "scale": 1.0},
            {"kind": "one_hot", "column": "Sex", "categories": ["F", "M"]},
            {"kind": "one_hot", "column": "BP", "categories": ["HIGH", "LOW", "NORMAL"]},
            {"kind": "one_hot", "column": "Cholesterol", "categories": ["HIGH", "NORMAL"]},
            {"kind": "standard_scale", "column": "Na_to_K", "mean": 0.0, "scale": 1.0}
        ]
    }"#;

    /// One softmax layer. Logits:
    /// DrugY = Na_to_K - 15, drugA = 2·BP:HIGH, drugB = 0.1·Age,
    /// drugC = 3·Cholesterol:HIGH + 3·BP:LOW, drugX = 3·Cholesterol:NORMAL.
    /// For {28, F, HIGH, HIGH, 7.8}: [-7.2, 2, 2.8, 3, 0] → drugC.
    pub const NETWORK_JSON: &str = r#"{
        "layers": [{
            "weights": [
                [0.0, 0.0, 0.1, 0.0, 0.0],
                [0.0, 0.0, 0.0, 0.0, 0.0],
                [0.0, 0.0, 0.0, 0.0, 0.0],
                [0.0, 2.0, 0.0, 0.0, 0.0],
                [0.0, 0.0, 0.0, 3.0, 0.0],
                [0.0, 0.0, 0.0, 0.0, 0.0],
                [0.0, 0.0, 0.0, 3.0, 0.0],
                [0.0, 0.0, 0.0, 0.0, 3.0],
                [1.0, 0.0, 0.0, 0.0, 0.0]
            ],
            "bias": [-15.0, 0.0, 0.0, 0.0, 0.0],
            "activation": "softmax"
        }]
    }"#;

    pub fn write_artifacts(dir: &Path, preprocessor: &str, network: &str) -> ArtifactPaths {
        let paths = ArtifactPaths {
            preprocessor: dir.join("preprocessor.json"),
            model: dir.join("drug_classifier.json"),
        };
        std::fs::write(&paths.preprocessor, preprocessor).unwrap();
        std::fs::write(&paths.model, network).unwrap();
        paths
    }

    pub fn fixture_artifacts(dir: &Path) -> ArtifactPaths {
        write_artifacts(dir, PREPROCESSOR_JSON, NETWORK_JSON)
    }
}
