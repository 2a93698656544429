//! Repository layer: patient persistence over either backend.
//!
//! Both backends implement [`PatientStore`]; anything that only needs
//! patient CRUD or the latest patient (the fallback resolver, the HTTP
//! handlers) depends on the trait, never on a concrete store.

mod document;
mod relational;
mod unreachable;

use crate::models::{BackendKind, CreatedPatient, PatientIn, PatientView, PredictionLog, PredictionLogEntry};

use super::DatabaseError;

/// Patient CRUD shared by the relational and the document backend.
///
/// `update` and `delete` return `DatabaseError::NotFound` for an unknown id.
pub trait PatientStore: Send + Sync {
    fn backend(&self) -> BackendKind;
    fn create(&self, patient: &PatientIn) -> Result<CreatedPatient, DatabaseError>;
    fn read(&self, patient_id: i64) -> Result<Option<PatientView>, DatabaseError>;
    fn update(&self, patient_id: i64, patient: &PatientIn) -> Result<(), DatabaseError>;
    fn delete(&self, patient_id: i64) -> Result<(), DatabaseError>;
    /// Patient with the highest id, joined as in `read`.
    fn latest(&self) -> Result<Option<PatientView>, DatabaseError>;
}

pub trait PredictionLogStore: Send + Sync {
    fn record(&self, entry: &PredictionLogEntry) -> Result<i64, DatabaseError>;
    fn get(&self, log_id: i64) -> Result<Option<PredictionLog>, DatabaseError>;
    /// Newest first.
    fn list_for_patient(&self, patient_id: i64) -> Result<Vec<PredictionLog>, DatabaseError>;
}

pub use document::DocumentStore;
pub use relational::RelationalStore;
pub use unreachable::UnreachableStore;

#[cfg(test)]
pub(crate) mod test_support {
    use std::collections::HashSet;

    use super::*;
    use crate::db::{LookupResolver, LookupTable};
    use crate::models::{BloodPressure, Cholesterol, DrugType, Sex};

    pub fn patient(age: i64, sex: Sex, bp: BloodPressure, cholesterol: Cholesterol, na_to_k: f64, drug: DrugType) -> PatientIn {
        PatientIn { age, sex, bp, cholesterol, na_to_k, drug }
    }

    pub fn sample_patient() -> PatientIn {
        patient(28, Sex::Female, BloodPressure::High, Cholesterol::High, 7.8, DrugType::DrugY)
    }

    pub fn unreachable(backend: BackendKind) -> UnreachableStore {
        UnreachableStore::new(backend, "connection refused")
    }

    /// Resolve the same unseen value from `threads` threads at once.
    pub fn resolve_concurrently<S>(store: &S, table: LookupTable, value: &str, threads: usize) -> Vec<i64>
    where
        S: LookupResolver + Sync,
    {
        std::thread::scope(|scope| {
            let handles: Vec<_> = (0..threads)
                .map(|_| scope.spawn(|| store.resolve(table, value).unwrap()))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        })
    }

    /// `threads` threads each create `per_thread` patients at once. Every
    /// patient id and assignment id handed out must be distinct.
    pub fn exercise_concurrent_creates(store: &dyn PatientStore, threads: usize, per_thread: usize) -> Vec<CreatedPatient> {
        let created: Vec<CreatedPatient> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..threads)
                .map(|_| {
                    scope.spawn(|| {
                        (0..per_thread)
                            .map(|_| store.create(&sample_patient()).unwrap())
                            .collect::<Vec<_>>()
                    })
                })
                .collect();
            handles.into_iter().flat_map(|h| h.join().unwrap()).collect()
        });

        let patients: HashSet<i64> = created.iter().map(|c| c.patient_id).collect();
        let assignments: HashSet<i64> = created.iter().map(|c| c.assignment_id).collect();
        assert_eq!(patients.len(), threads * per_thread);
        assert_eq!(assignments.len(), threads * per_thread);
        for c in &created {
            assert_eq!(store.read(c.patient_id).unwrap().unwrap().drug.as_deref(), Some("DrugY"));
        }
        created
    }

    /// Race `update` against `delete` on fresh patients. Returns ids whose
    /// race has finished; callers check no assignment outlived its patient.
    pub fn race_update_against_delete(store: &dyn PatientStore, rounds: usize) -> Vec<i64> {
        (0..rounds)
            .map(|_| {
                let patient_id = store.create(&sample_patient()).unwrap().patient_id;
                std::thread::scope(|scope| {
                    scope.spawn(|| {
                        for _ in 0..10 {
                            match store.update(patient_id, &sample_patient()) {
                                Ok(()) => {}
                                Err(e) => assert!(e.is_not_found(), "unexpected update error: {e}"),
                            }
                        }
                    });
                    scope.spawn(|| store.delete(patient_id).unwrap());
                });
                assert!(store.read(patient_id).unwrap().is_none());
                patient_id
            })
            .collect()
    }

    /// Checks every backend against the same behavioural contract.
    pub fn exercise_crud_contract(store: &dyn PatientStore) {
        let created = store.create(&sample_patient()).unwrap();
        assert!(created.patient_id > 0);
        assert!(created.assignment_id > 0);

        let view = store.read(created.patient_id).unwrap().unwrap();
        assert_eq!(view.patient_id, created.patient_id);
        assert_eq!(view.age, 28);
        assert_eq!(view.sex.as_deref(), Some("F"));
        assert_eq!(view.bp.as_deref(), Some("HIGH"));
        assert_eq!(view.cholesterol.as_deref(), Some("HIGH"));
        assert_eq!(view.na_to_k, 7.8);
        assert_eq!(view.drug.as_deref(), Some("DrugY"));

        let revised = patient(29, Sex::Female, BloodPressure::Low, Cholesterol::Normal, 15.2, DrugType::DrugC);
        store.update(created.patient_id, &revised).unwrap();
        let view = store.read(created.patient_id).unwrap().unwrap();
        assert_eq!(view.age, 29);
        assert_eq!(view.bp.as_deref(), Some("LOW"));
        assert_eq!(view.cholesterol.as_deref(), Some("NORMAL"));
        assert_eq!(view.na_to_k, 15.2);
        assert_eq!(view.drug.as_deref(), Some("drugC"));

        store.delete(created.patient_id).unwrap();
        assert!(store.read(created.patient_id).unwrap().is_none());
        assert!(store.delete(created.patient_id).unwrap_err().is_not_found());
        assert!(store.update(created.patient_id, &revised).unwrap_err().is_not_found());
    }

    pub fn exercise_latest_contract(store: &dyn PatientStore) {
        assert!(store.latest().unwrap().is_none());
        let first = store.create(&sample_patient()).unwrap();
        let second = store
            .create(&patient(61, Sex::Male, BloodPressure::Normal, Cholesterol::Normal, 22.4, DrugType::DrugX))
            .unwrap();
        assert!(second.patient_id > first.patient_id);

        let latest = store.latest().unwrap().unwrap();
        assert_eq!(latest.patient_id, second.patient_id);
        assert_eq!(latest.sex.as_deref(), Some("M"));
        assert_eq!(latest.drug.as_deref(), Some("drugX"));

        store.delete(second.patient_id).unwrap();
        assert_eq!(store.latest().unwrap().unwrap().patient_id, first.patient_id);
    }
}
