//! Prediction log endpoints.
//!
//! - `POST /prediction-logs`: record an outcome
//! - `GET /prediction-logs/:id`: one log
//! - `GET /prediction-logs?patient_id=N`: a patient's logs, newest first

use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::api::error::ApiError;
use crate::api::types::AppContext;
use crate::models::{PredictionLog, PredictionLogIn};

#[derive(Debug, Serialize, Deserialize)]
pub struct RecordedLog {
    pub log_id: i64,
}

#[derive(Debug, Deserialize)]
pub struct LogQuery {
    pub patient_id: i64,
}

pub async fn record(
    State(ctx): State<AppContext>,
    payload: Result<Json<PredictionLogIn>, JsonRejection>,
) -> Result<(StatusCode, Json<RecordedLog>), ApiError> {
    let Json(log) = payload?;
    let entry = log.resolve(chrono::Utc::now());
    let log_id = ctx.logs.record(&entry)?;
    tracing::info!(log_id, patient_id = entry.patient_id, "Prediction log recorded");
    Ok((StatusCode::CREATED, Json(RecordedLog { log_id })))
}

pub async fn detail(
    State(ctx): State<AppContext>,
    id: Result<Path<i64>, PathRejection>,
) -> Result<Json<PredictionLog>, ApiError> {
    let Path(log_id) = id?;
    ctx.logs
        .get(log_id)?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Prediction log {log_id} not found")))
}

pub async fn list(
    State(ctx): State<AppContext>,
    query: Result<Query<LogQuery>, QueryRejection>,
) -> Result<Json<Vec<PredictionLog>>, ApiError> {
    let Query(query) = query?;
    Ok(Json(ctx.logs.list_for_patient(query.patient_id)?))
}
