use serde::{Deserialize, Serialize};

use super::enums::{BloodPressure, Cholesterol, DrugType, Sex};

pub const AGE_MIN: i64 = 15;
pub const AGE_MAX: i64 = 74;
pub const NA_TO_K_MIN: f64 = 6.0;
pub const NA_TO_K_MAX: f64 = 40.0;

/// Patient intake body. Categorical patterns are enforced by the enum
/// deserializers; numeric ranges by [`PatientIn::validate`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatientIn {
    pub age: i64,
    pub sex: Sex,
    pub bp: BloodPressure,
    pub cholesterol: Cholesterol,
    pub na_to_k: f64,
    pub drug: DrugType,
}

impl PatientIn {
    pub fn validate(&self) -> Result<(), String> {
        if !(AGE_MIN..=AGE_MAX).contains(&self.age) {
            return Err(format!(
                "age must be between {AGE_MIN} and {AGE_MAX}, got {}",
                self.age
            ));
        }
        if !self.na_to_k.is_finite() || !(NA_TO_K_MIN..=NA_TO_K_MAX).contains(&self.na_to_k) {
            return Err(format!(
                "na_to_k must be between {NA_TO_K_MIN} and {NA_TO_K_MAX}, got {}",
                self.na_to_k
            ));
        }
        Ok(())
    }
}

/// Identifiers handed back by `create`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedPatient {
    pub patient_id: i64,
    pub assignment_id: i64,
}

/// Denormalized patient: lookup ids joined back to their values.
///
/// Categorical fields are optional because the document store degrades a
/// dangling lookup reference to `null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatientView {
    pub patient_id: i64,
    pub age: i64,
    pub sex: Option<String>,
    pub bp: Option<String>,
    pub cholesterol: Option<String>,
    pub na_to_k: f64,
    pub drug: Option<String>,
}

impl PatientView {
    pub fn features(&self) -> PatientFeatures {
        PatientFeatures {
            age: self.age,
            sex: self.sex.clone(),
            bp: self.bp.clone(),
            cholesterol: self.cholesterol.clone(),
            na_to_k: self.na_to_k,
        }
    }
}

/// The single feature row fed to the preprocessor, keyed by training
/// column names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatientFeatures {
    #[serde(rename = "Age")]
    pub age: i64,
    #[serde(rename = "Sex")]
    pub sex: Option<String>,
    #[serde(rename = "BP")]
    pub bp: Option<String>,
    #[serde(rename = "Cholesterol")]
    pub cholesterol: Option<String>,
    #[serde(rename = "Na_to_K")]
    pub na_to_k: f64,
}
