//! Latest-patient resolution over an ordered fallback chain of stores.
//!
//! Each store is asked once, in order. A backend error or an empty store
//! moves on to the next one; the error is logged, never returned.

use std::sync::Arc;

use crate::db::PatientStore;
use crate::models::{BackendKind, PatientView};

/// The patient found, tagged with the backend that supplied it.
#[derive(Debug, Clone, PartialEq)]
pub struct LatestPatient {
    pub backend: BackendKind,
    pub patient: PatientView,
}

/// Ordered list of stores, tried first to last.
#[derive(Clone)]
pub struct FallbackChain {
    stores: Vec<Arc<dyn PatientStore>>,
}

impl FallbackChain {
    pub fn new(stores: Vec<Arc<dyn PatientStore>>) -> Self {
        Self { stores }
    }

    /// Relational first, document as fallback.
    pub fn relational_first(relational: Arc<dyn PatientStore>, document: Arc<dyn PatientStore>) -> Self {
        Self::new(vec![relational, document])
    }

    /// `None` when no store in the chain has a patient.
    pub fn latest(&self) -> Option<LatestPatient> {
        for store in &self.stores {
            let backend = store.backend();
            match store.latest() {
                Ok(Some(patient)) => return Some(LatestPatient { backend, patient }),
                Ok(None) => {
                    tracing::debug!(%backend, "No patients in backend, trying next");
                }
                Err(e) => {
                    tracing::warn!(%backend, error = %e, "Latest-patient lookup failed, falling back");
                }
            }
        }
        None
    }
}
