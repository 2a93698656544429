//! `POST /admin/reload-artifacts`: swap in freshly loaded artifacts.

use axum::extract::State;
use axum::Json;

use crate::api::error::ApiError;
use crate::api::types::{AppContext, Detail};

pub async fn reload_artifacts(State(ctx): State<AppContext>) -> Result<Json<Detail>, ApiError> {
    let artifacts = ctx.predictor.artifacts();
    artifacts.reload()?;
    let detail = if artifacts.cache_enabled() {
        "Artifacts reloaded"
    } else {
        "Artifacts validated; caching is disabled"
    };
    Ok(Json(Detail::new(detail)))
}
