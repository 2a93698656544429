//! `GET /patients/latest` over the fallback chain.

use axum::extract::State;
use axum::Json;

use crate::api::error::ApiError;
use crate::api::types::AppContext;
use crate::models::PatientView;

pub async fn latest(State(ctx): State<AppContext>) -> Result<Json<PatientView>, ApiError> {
    let found = ctx
        .chain
        .latest()
        .ok_or_else(|| ApiError::NotFound("No patient found in any database".into()))?;
    tracing::debug!(backend = %found.backend, patient_id = found.patient.patient_id, "Latest patient");
    Ok(Json(found.patient))
}
