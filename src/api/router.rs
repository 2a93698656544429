//! HTTP router.
//!
//! Patient CRUD is mounted twice: `/patients` on the relational store and
//! `/mongo/patients` on the document store. `/patients/latest` is a static
//! segment and wins over `/patients/:id`.
//!
//! NOTE: Path params use `:param` syntax (matchit 0.7 / axum 0.7).

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::api::endpoints;
use crate::api::types::AppContext;
use crate::db::PatientStore;

pub fn api_router(ctx: AppContext) -> Router {
    let shared = Router::new()
        .route("/health", get(endpoints::health::check))
        .route("/patients/latest", get(endpoints::latest::latest))
        .route("/predict", post(endpoints::predict::predict))
        .route(
            "/prediction-logs",
            post(endpoints::prediction_logs::record).get(endpoints::prediction_logs::list),
        )
        .route("/prediction-logs/:id", get(endpoints::prediction_logs::detail))
        .route("/admin/reload-artifacts", post(endpoints::admin::reload_artifacts))
        .with_state(ctx.clone());

    Router::new()
        .merge(patient_routes("/patients", Arc::clone(&ctx.relational)))
        .merge(patient_routes("/mongo/patients", Arc::clone(&ctx.document)))
        .merge(shared)
        .layer(TraceLayer::new_for_http())
}

/// CRUD routes for one backend. Create answers with and without the
/// trailing slash.
fn patient_routes(prefix: &str, store: Arc<dyn PatientStore>) -> Router {
    Router::new()
        .route(prefix, post(endpoints::patients::create))
        .route(&format!("{prefix}/"), post(endpoints::patients::create))
        .route(
            &format!("{prefix}/:id"),
            get(endpoints::patients::read)
                .put(endpoints::patients::update)
                .delete(endpoints::patients::delete),
        )
        .with_state(store)
}
