//! `POST /predict`: classify the latest patient.

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;
use serde::Deserialize;

use crate::api::error::ApiError;
use crate::api::types::AppContext;
use crate::prediction::PredictionResult;

#[derive(Debug, Deserialize)]
pub struct PredictRequest {
    pub model_type: String,
}

pub async fn predict(
    State(ctx): State<AppContext>,
    payload: Result<Json<PredictRequest>, JsonRejection>,
) -> Result<Json<PredictionResult>, ApiError> {
    let Json(request) = payload?;
    let result = ctx.predictor.predict(&request.model_type, &ctx.chain)?;
    Ok(Json(result))
}
