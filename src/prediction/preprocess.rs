//! Feature preprocessing artifact.
//!
//! A JSON list of column steps applied in order; each step appends its
//! outputs to the transformed row:
//!
//! ```json
//! {"steps": [
//!     {"kind": "standard_scale", "column": "Age", "mean": 44.3, "scale": 16.5},
//!     {"kind": "one_hot", "column": "Sex", "categories": ["F", "M"]},
//!     {"kind": "ordinal", "column": "BP", "categories": ["LOW", "NORMAL", "HIGH"]},
//!     {"kind": "passthrough", "column": "Na_to_K"}
//! ]}
//! ```

use std::path::Path;

use serde::Deserialize;

use super::PredictionError;
use crate::models::PatientFeatures;

const KIND: &str = "preprocessor";

/// Input columns, named as in the training table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum Column {
    Age,
    Sex,
    #[serde(rename = "BP")]
    Bp,
    Cholesterol,
    #[serde(rename = "Na_to_K")]
    NaToK,
}

impl Column {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Age => "Age",
            Self::Sex => "Sex",
            Self::Bp => "BP",
            Self::Cholesterol => "Cholesterol",
            Self::NaToK => "Na_to_K",
        }
    }

    fn is_numeric(&self) -> bool {
        matches!(self, Self::Age | Self::NaToK)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Step {
    StandardScale { column: Column, mean: f64, scale: f64 },
    OneHot { column: Column, categories: Vec<String> },
    Ordinal { column: Column, categories: Vec<String> },
    Passthrough { column: Column },
}

impl Step {
    fn column(&self) -> Column {
        match self {
            Self::StandardScale { column, .. }
            | Self::OneHot { column, .. }
            | Self::Ordinal { column, .. }
            | Self::Passthrough { column } => *column,
        }
    }

    fn width(&self) -> usize {
        match self {
            Self::OneHot { categories, .. } => categories.len(),
            _ => 1,
        }
    }

    fn check(&self) -> Result<(), String> {
        let column = self.column();
        match self {
            Self::StandardScale { scale, mean, .. } => {
                if !column.is_numeric() {
                    return Err(format!("standard_scale on categorical column {}", column.name()));
                }
                if !scale.is_finite() || *scale == 0.0 || !mean.is_finite() {
                    return Err(format!("invalid scaling parameters for {}", column.name()));
                }
            }
            Self::OneHot { categories, .. } | Self::Ordinal { categories, .. } => {
                if column.is_numeric() {
                    return Err(format!("categorical encoding on numeric column {}", column.name()));
                }
                if categories.is_empty() {
                    return Err(format!("no categories for {}", column.name()));
                }
            }
            Self::Passthrough { .. } => {
                if !column.is_numeric() {
                    return Err(format!("passthrough on categorical column {}", column.name()));
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Preprocessor {
    steps: Vec<Step>,
}

impl Preprocessor {
    pub fn load(path: &Path) -> Result<Self, PredictionError> {
        if !path.exists() {
            return Err(PredictionError::ArtifactMissing { kind: KIND, path: path.to_path_buf() });
        }
        let invalid = |reason: String| PredictionError::ArtifactInvalid {
            kind: KIND,
            path: path.to_path_buf(),
            reason,
        };

        let raw = std::fs::read_to_string(path).map_err(|e| invalid(e.to_string()))?;
        let preprocessor = Self::from_json(&raw).map_err(invalid)?;
        tracing::info!(path = %path.display(), width = preprocessor.output_width(), "Preprocessor loaded");
        Ok(preprocessor)
    }

    pub fn from_json(raw: &str) -> Result<Self, String> {
        let preprocessor: Preprocessor = serde_json::from_str(raw).map_err(|e| e.to_string())?;
        if preprocessor.steps.is_empty() {
            return Err("no steps".into());
        }
        for step in &preprocessor.steps {
            step.check()?;
        }
        Ok(preprocessor)
    }

    /// Width of the transformed row.
    pub fn output_width(&self) -> usize {
        self.steps.iter().map(Step::width).sum()
    }

    pub fn transform(&self, features: &PatientFeatures) -> Result<Vec<f32>, PredictionError> {
        let mut row = Vec::with_capacity(self.output_width());
        for step in &self.steps {
            match step {
                Step::StandardScale { column, mean, scale } => {
                    let x = numeric(features, *column)?;
                    row.push(((x - mean) / scale) as f32);
                }
                Step::Passthrough { column } => {
                    row.push(numeric(features, *column)? as f32);
                }
                Step::OneHot { column, categories } => {
                    let value = category(features, *column)?;
                    let hot = position(categories, *column, value)?;
                    row.extend((0..categories.len()).map(|i| if i == hot { 1.0 } else { 0.0 }));
                }
                Step::Ordinal { column, categories } => {
                    let value = category(features, *column)?;
                    row.push(position(categories, *column, value)? as f32);
                }
            }
        }
        Ok(row)
    }
}

fn numeric(features: &PatientFeatures, column: Column) -> Result<f64, PredictionError> {
    match column {
        Column::Age => Ok(features.age as f64),
        Column::NaToK => Ok(features.na_to_k),
        other => Err(PredictionError::Preprocessing(format!(
            "column {} is not numeric",
            other.name()
        ))),
    }
}

fn category(features: &PatientFeatures, column: Column) -> Result<&str, PredictionError> {
    let value = match column {
        Column::Sex => features.sex.as_deref(),
        Column::Bp => features.bp.as_deref(),
        Column::Cholesterol => features.cholesterol.as_deref(),
        other => {
            return Err(PredictionError::Preprocessing(format!(
                "column {} is not categorical",
                other.name()
            )))
        }
    };
    value.ok_or_else(|| {
        PredictionError::Preprocessing(format!("missing value for column {}", column.name()))
    })
}

fn position(categories: &[String], column: Column, value: &str) -> Result<usize, PredictionError> {
    categories.iter().position(|c| c == value).ok_or_else(|| {
        PredictionError::Preprocessing(format!(
            "unknown category '{value}' for column {}",
            column.name()
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prediction::test_support::PREPROCESSOR_JSON;

    fn features() -> PatientFeatures {
        PatientFeatures {
            age: 28,
            sex: Some("F".into()),
            bp: Some("HIGH".into()),
            cholesterol: Some("HIGH".into()),
            na_to_k: 7.8,
        }
    }

    #[test]
    fn one_hot_and_identity_scaling() {
        let pre = Preprocessor::from_json(PREPROCESSOR_JSON).unwrap();
        assert_eq!(pre.output_width(), 9);
        let row = pre.transform(&features()).unwrap();
        assert_eq!(row, vec![28.0, 1.0, 0.0, 1.0, 0.0, 0.0, 1.0, 0.0, 7.8]);
    }

    #[test]
    fn standard_scaling_and_ordinal() {
        let pre = Preprocessor::from_json(
            r#"{"steps": [
                {"kind": "standard_scale", "column": "Age", "mean": 20.0, "scale": 4.0},
                {"kind": "ordinal", "column": "BP", "categories": ["LOW", "NORMAL", "HIGH"]},
                {"kind": "passthrough", "column": "Na_to_K"}
            ]}"#,
        )
        .unwrap();
        assert_eq!(pre.transform(&features()).unwrap(), vec![2.0, 2.0, 7.8]);
    }

    #[test]
    fn unknown_category_is_a_processing_error() {
        let pre = Preprocessor::from_json(PREPROCESSOR_JSON).unwrap();
        let mut f = features();
        f.bp = Some("EXTREME".into());
        let err = pre.transform(&f).unwrap_err();
        assert!(matches!(err, PredictionError::Preprocessing(ref m) if m.contains("EXTREME")));
    }

    #[test]
    fn missing_category_is_a_processing_error() {
        let pre = Preprocessor::from_json(PREPROCESSOR_JSON).unwrap();
        let mut f = features();
        f.cholesterol = None;
        assert!(pre.transform(&f).is_err());
    }

    #[test]
    fn rejects_inconsistent_artifacts() {
        assert!(Preprocessor::from_json(r#"{"steps": []}"#).is_err());
        assert!(Preprocessor::from_json(
            r#"{"steps": [{"kind": "standard_scale", "column": "Sex", "mean": 0, "scale": 1}]}"#
        )
        .is_err());
        assert!(Preprocessor::from_json(
            r#"{"steps": [{"kind": "standard_scale", "column": "Age", "mean": 0, "scale": 0}]}"#
        )
        .is_err());
        assert!(Preprocessor::from_json(
            r#"{"steps": [{"kind": "one_hot", "column": "Age", "categories": ["x"]}]}"#
        )
        .is_err());
        assert!(Preprocessor::from_json(r#"{"steps": [{"kind": "bogus", "column": "Age"}]}"#).is_err());
    }

    #[test]
    fn load_distinguishes_missing_from_invalid() {
        let tmp = tempfile::tempdir().unwrap();
        let missing = tmp.path().join("absent.json");
        assert!(matches!(
            Preprocessor::load(&missing).unwrap_err(),
            PredictionError::ArtifactMissing { .. }
        ));

        let broken = tmp.path().join("broken.json");
        std::fs::write(&broken, "not json").unwrap();
        let err = Preprocessor::load(&broken).unwrap_err();
        assert!(matches!(err, PredictionError::ArtifactInvalid { .. }));
        assert!(err.to_string().contains("broken.json"));
    }
}
