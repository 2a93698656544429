//! Shared state and small wire types for the HTTP layer.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::db::{PatientStore, PredictionLogStore};
use crate::latest::FallbackChain;
use crate::prediction::PredictionService;

/// Shared context for all routes.
#[derive(Clone)]
pub struct AppContext {
    pub relational: Arc<dyn PatientStore>,
    pub document: Arc<dyn PatientStore>,
    pub logs: Arc<dyn PredictionLogStore>,
    pub chain: FallbackChain,
    pub predictor: Arc<PredictionService>,
}

impl AppContext {
    /// The fallback chain asks `relational` first, then `document`.
    pub fn new(
        relational: Arc<dyn PatientStore>,
        document: Arc<dyn PatientStore>,
        logs: Arc<dyn PredictionLogStore>,
        predictor: Arc<PredictionService>,
    ) -> Self {
        let chain = FallbackChain::relational_first(Arc::clone(&relational), Arc::clone(&document));
        Self {
            relational,
            document,
            logs,
            chain,
            predictor,
        }
    }
}

/// `{"detail": "..."}` acknowledgement body.
#[derive(Debug, Serialize, Deserialize)]
pub struct Detail {
    pub detail: String,
}

impl Detail {
    pub fn new(detail: impl Into<String>) -> Self {
        Self { detail: detail.into() }
    }
}
