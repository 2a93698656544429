pub mod api;
pub mod config;
pub mod db;
pub mod latest;
pub mod models;
pub mod prediction;

use std::sync::Arc;

use thiserror::Error;
use tracing_subscriber::EnvFilter;

use crate::config::{ConfigError, ServiceConfig};
use crate::db::{DatabaseError, DocumentStore, PatientStore, PredictionLogStore, RelationalStore, UnreachableStore};
use crate::models::BackendKind;
use crate::prediction::{ArtifactStore, PredictionService};

#[derive(Error, Debug)]
pub enum StartupError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Server error: {0}")]
    Server(String),
}

/// Install the global tracing subscriber. `RUST_LOG` overrides the default.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .init();
}

/// Open both stores and wire the shared API context.
///
/// A relational store that fails to open is replaced by an
/// [`UnreachableStore`]: its routes answer 500 and `/patients/latest`
/// falls through to the document store. The document store is required.
pub fn build_context(config: &ServiceConfig) -> Result<api::AppContext, StartupError> {
    let (relational, logs): (Arc<dyn PatientStore>, Arc<dyn PredictionLogStore>) =
        match RelationalStore::open(&config.relational_db) {
            Ok(store) => {
                let store = Arc::new(store);
                (store.clone(), store)
            }
            Err(e) => {
                tracing::error!(
                    path = %config.relational_db.display(),
                    error = %e,
                    "Relational store unavailable, serving from the document store only"
                );
                let store = Arc::new(UnreachableStore::new(BackendKind::Relational, e.to_string()));
                (store.clone(), store)
            }
        };
    let document = Arc::new(DocumentStore::open(&config.document_db)?);

    let artifacts = ArtifactStore::new(config.artifacts.clone(), config.artifact_cache);
    if config.artifact_cache {
        // Missing artifacts only fail /predict, the rest of the API still serves.
        if let Err(e) = artifacts.get() {
            tracing::warn!(error = %e, "Prediction artifacts not loaded at startup");
        }
    }

    Ok(api::AppContext::new(
        relational,
        document,
        logs,
        Arc::new(PredictionService::new(artifacts)),
    ))
}

/// Run the service until ctrl-c.
pub async fn run() -> Result<(), StartupError> {
    init_tracing();
    tracing::info!("{} starting v{}", config::APP_NAME, config::APP_VERSION);

    let config = ServiceConfig::from_env()?;
    tracing::info!(
        relational_db = %config.relational_db.display(),
        document_db = %config.document_db.display(),
        artifact_cache = config.artifact_cache,
        "Configuration loaded"
    );

    let ctx = build_context(&config)?;
    let mut server = api::start_server(ctx, config.bind)
        .await
        .map_err(StartupError::Server)?;
    tracing::info!(addr = %server.session.server_addr, "Listening");

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for ctrl-c: {e}");
    }
    server.shutdown();
    server.stopped().await;
    Ok(())
}
