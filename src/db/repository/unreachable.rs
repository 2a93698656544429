use crate::models::{BackendKind, CreatedPatient, PatientIn, PatientView, PredictionLog, PredictionLogEntry};

use super::{DatabaseError, PatientStore, PredictionLogStore};

/// Placeholder for a backend that could not be opened. Every call fails
/// with `DatabaseError::Unavailable`, so the fallback chain skips it.
pub struct UnreachableStore {
    backend: BackendKind,
    reason: String,
}

impl UnreachableStore {
    pub fn new(backend: BackendKind, reason: impl Into<String>) -> Self {
        Self { backend, reason: reason.into() }
    }

    fn down(&self) -> DatabaseError {
        DatabaseError::Unavailable(format!("{}: {}", self.backend, self.reason))
    }
}

impl PatientStore for UnreachableStore {
    fn backend(&self) -> BackendKind {
        self.backend
    }

    fn create(&self, _: &PatientIn) -> Result<CreatedPatient, DatabaseError> {
        Err(self.down())
    }

    fn read(&self, _: i64) -> Result<Option<PatientView>, DatabaseError> {
        Err(self.down())
    }

    fn update(&self, _: i64, _: &PatientIn) -> Result<(), DatabaseError> {
        Err(self.down())
    }

    fn delete(&self, _: i64) -> Result<(), DatabaseError> {
        Err(self.down())
    }

    fn latest(&self) -> Result<Option<PatientView>, DatabaseError> {
        Err(self.down())
    }
}

impl PredictionLogStore for UnreachableStore {
    fn record(&self, _: &PredictionLogEntry) -> Result<i64, DatabaseError> {
        Err(self.down())
    }

    fn get(&self, _: i64) -> Result<Option<PredictionLog>, DatabaseError> {
        Err(self.down())
    }

    fn list_for_patient(&self, _: i64) -> Result<Vec<PredictionLog>, DatabaseError> {
        Err(self.down())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_call_reports_the_backend_as_unavailable() {
        let store = UnreachableStore::new(BackendKind::Relational, "cannot open /nope");
        let err = store.latest().unwrap_err();
        assert!(matches!(err, DatabaseError::Unavailable(_)));
        assert!(err.to_string().contains("postgresql: cannot open /nope"));
        assert!(!store.delete(1).unwrap_err().is_not_found());
        assert!(store.list_for_patient(1).is_err());
    }
}
