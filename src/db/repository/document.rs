use std::path::Path;

use chrono::Utc;
use serde_json::{json, Value};

use crate::db::document::{Document, DocumentDb};
use crate::db::{DatabaseError, LookupResolver, LookupTable};
use crate::models::*;

use super::PatientStore;

const PATIENTS: &str = "Patients";
const DRUG_ASSIGNMENTS: &str = "DrugAssignments";

/// Collection-per-entity patient store.
///
/// Lookup resolution commits on its own. The patient and assignment
/// writes of `create`, `update` and `delete` each commit as one
/// transaction, so concurrent calls never leave an assignment without its
/// patient or a patient with two assignments.
pub struct DocumentStore {
    db: DocumentDb,
}

impl DocumentStore {
    pub fn open(path: &Path) -> Result<Self, DatabaseError> {
        Ok(Self { db: DocumentDb::open(path)? })
    }

    pub fn open_in_memory() -> Result<Self, DatabaseError> {
        Ok(Self { db: DocumentDb::open_in_memory()? })
    }

    pub fn db(&self) -> &DocumentDb {
        &self.db
    }

    fn find_patient(&self, patient_id: i64) -> Result<Option<Document>, DatabaseError> {
        self.db.collection(PATIENTS).find_one(&json!({ "patient_id": patient_id }))
    }

    /// Value for a lookup id, or `None` when the id or its document is
    /// missing.
    fn lookup_value(&self, table: LookupTable, id: Option<i64>) -> Result<Option<String>, DatabaseError> {
        let Some(id) = id else {
            return Ok(None);
        };
        let doc = self
            .db
            .collection(table.collection())
            .find_one(&json!({ table.id_field(): id }))?;
        Ok(doc
            .and_then(|d| d.get(table.value_field()).cloned())
            .and_then(|v| v.as_str().map(String::from)))
    }

    fn view(&self, patient: &Document) -> Result<PatientView, DatabaseError> {
        let patient_id = required_i64(patient, "patient_id")?;
        let assignment = self
            .db
            .collection(DRUG_ASSIGNMENTS)
            .find_one(&json!({ "patient_id": patient_id }))?;

        Ok(PatientView {
            patient_id,
            age: required_i64(patient, "age")?,
            sex: self.lookup_value(LookupTable::Sex, optional_i64(patient, "sex_id"))?,
            bp: self.lookup_value(LookupTable::BloodPressure, optional_i64(patient, "bp_id"))?,
            cholesterol: self
                .lookup_value(LookupTable::Cholesterol, optional_i64(patient, "cholesterol_id"))?,
            na_to_k: patient
                .get("na_to_k")
                .and_then(Value::as_f64)
                .ok_or_else(|| malformed("na_to_k"))?,
            drug: assignment
                .as_ref()
                .and_then(|a| a.get("drug_type"))
                .and_then(Value::as_str)
                .map(String::from),
        })
    }

    fn assignment(assignment_id: i64, patient_id: i64, drug: DrugType) -> Document {
        object(json!({
            "assignment_id": assignment_id,
            "patient_id": patient_id,
            "drug_type": drug.as_str(),
            "assigned_at": Utc::now().to_rfc3339(),
        }))
    }

    fn patient_fields(&self, patient: &PatientIn) -> Result<Document, DatabaseError> {
        Ok(object(json!({
            "sex_id": self.resolve(LookupTable::Sex, patient.sex.as_str())?,
            "bp_id": self.resolve(LookupTable::BloodPressure, patient.bp.as_str())?,
            "cholesterol_id": self.resolve(LookupTable::Cholesterol, patient.cholesterol.as_str())?,
            "age": patient.age,
            "na_to_k": patient.na_to_k,
        })))
    }
}

fn object(value: Value) -> Document {
    match value {
        Value::Object(map) => map,
        _ => Document::new(),
    }
}

fn malformed(field: &str) -> DatabaseError {
    DatabaseError::MalformedDocument {
        collection: PATIENTS.into(),
        reason: format!("missing or invalid `{field}`"),
    }
}

fn optional_i64(doc: &Document, field: &str) -> Option<i64> {
    doc.get(field).and_then(Value::as_i64)
}

fn required_i64(doc: &Document, field: &str) -> Result<i64, DatabaseError> {
    optional_i64(doc, field).ok_or_else(|| malformed(field))
}

impl LookupResolver for DocumentStore {
    fn resolve(&self, table: LookupTable, value: &str) -> Result<i64, DatabaseError> {
        let (id_field, value_field) = (table.id_field(), table.value_field());
        let doc = self.db.collection(table.collection()).find_or_insert_with(
            &json!({ value_field: value }),
            id_field,
            |id| object(json!({ id_field: id, value_field: value })),
        )?;
        optional_i64(&doc, id_field).ok_or_else(|| DatabaseError::MalformedDocument {
            collection: table.collection().into(),
            reason: format!("missing or invalid `{id_field}`"),
        })
    }
}

impl PatientStore for DocumentStore {
    fn backend(&self) -> BackendKind {
        BackendKind::Document
    }

    fn create(&self, patient: &PatientIn) -> Result<CreatedPatient, DatabaseError> {
        let mut doc = self.patient_fields(patient)?;
        let created = self.db.transaction(|tx| {
            let patient_id = tx.next_id(PATIENTS, "patient_id")?;
            doc.insert("patient_id".into(), json!(patient_id));
            tx.insert_one(PATIENTS, doc)?;

            let assignment_id = tx.next_id(DRUG_ASSIGNMENTS, "assignment_id")?;
            tx.insert_one(DRUG_ASSIGNMENTS, Self::assignment(assignment_id, patient_id, patient.drug))?;
            Ok(CreatedPatient { patient_id, assignment_id })
        })?;
        tracing::debug!(
            patient_id = created.patient_id,
            assignment_id = created.assignment_id,
            "Document patient created"
        );
        Ok(created)
    }

    fn read(&self, patient_id: i64) -> Result<Option<PatientView>, DatabaseError> {
        self.find_patient(patient_id)?
            .map(|doc| self.view(&doc))
            .transpose()
    }

    fn update(&self, patient_id: i64, patient: &PatientIn) -> Result<(), DatabaseError> {
        let fields = self.patient_fields(patient)?;
        let filter = json!({ "patient_id": patient_id });
        self.db.transaction(|tx| {
            if !tx.update_one(PATIENTS, &filter, fields)? {
                return Err(DatabaseError::patient_not_found(patient_id));
            }
            let refreshed = object(json!({
                "drug_type": patient.drug.as_str(),
                "assigned_at": Utc::now().to_rfc3339(),
            }));
            if !tx.update_one(DRUG_ASSIGNMENTS, &filter, refreshed)? {
                tracing::warn!(patient_id, "Patient had no drug assignment, recreating it");
                let assignment_id = tx.next_id(DRUG_ASSIGNMENTS, "assignment_id")?;
                tx.insert_one(DRUG_ASSIGNMENTS, Self::assignment(assignment_id, patient_id, patient.drug))?;
            }
            Ok(())
        })
    }

    fn delete(&self, patient_id: i64) -> Result<(), DatabaseError> {
        let filter = json!({ "patient_id": patient_id });
        self.db.transaction(|tx| {
            if !tx.delete_one(PATIENTS, &filter)? {
                return Err(DatabaseError::patient_not_found(patient_id));
            }
            tx.delete_many(DRUG_ASSIGNMENTS, &filter)?;
            Ok(())
        })
    }

    fn latest(&self) -> Result<Option<PatientView>, DatabaseError> {
        self.db
            .collection(PATIENTS)
            .find_one_sorted(&json!({}), "patient_id", true)?
            .map(|doc| self.view(&doc))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repository::test_support::*;

    fn store() -> DocumentStore {
        DocumentStore::open_in_memory().unwrap()
    }

    #[test]
    fn resolving_twice_returns_same_id_without_duplicates() {
        let store = store();
        for table in LookupTable::ALL {
            let first = store.resolve(table, "HIGH").unwrap();
            let second = store.resolve(table, "HIGH").unwrap();
            assert_eq!(first, second);
            let count = store
                .db()
                .collection(table.collection())
                .count_documents(&json!({}))
                .unwrap();
            assert_eq!(count, 1);
        }
    }

    #[test]
    fn resolve_reuses_seeded_lookup_documents() {
        let store = store();
        let sexes = store.db().collection("Sexes");
        sexes.insert_one(object(json!({"sex_id": 1, "sex_name": "F"}))).unwrap();
        sexes.insert_one(object(json!({"sex_id": 2, "sex_name": "M"}))).unwrap();

        assert_eq!(store.resolve(LookupTable::Sex, "M").unwrap(), 2);
        assert_eq!(store.resolve(LookupTable::Sex, "X").unwrap(), 3);
    }

    #[test]
    fn crud_contract() {
        exercise_crud_contract(&store());
    }

    #[test]
    fn latest_contract() {
        exercise_latest_contract(&store());
    }

    #[test]
    fn dangling_lookup_reference_reads_as_null() {
        let store = store();
        let created = store.create(&sample_patient()).unwrap();
        store
            .db()
            .collection("BloodPressures")
            .delete_many(&json!({}))
            .unwrap();

        let view = store.read(created.patient_id).unwrap().unwrap();
        assert_eq!(view.bp, None);
        assert_eq!(view.sex.as_deref(), Some("F"));
        assert_eq!(view.drug.as_deref(), Some("DrugY"));
    }

    #[test]
    fn missing_assignment_reads_as_null_drug() {
        let store = store();
        let created = store.create(&sample_patient()).unwrap();
        store
            .db()
            .collection(DRUG_ASSIGNMENTS)
            .delete_many(&json!({}))
            .unwrap();
        assert_eq!(store.read(created.patient_id).unwrap().unwrap().drug, None);

        store.update(created.patient_id, &sample_patient()).unwrap();
        assert_eq!(
            store.read(created.patient_id).unwrap().unwrap().drug.as_deref(),
            Some("DrugY")
        );
    }

    #[test]
    fn ids_continue_above_seeded_patients() {
        let store = store();
        store
            .db()
            .collection(PATIENTS)
            .insert_one(object(json!({
                "patient_id": 200, "sex_id": 1, "bp_id": 1, "cholesterol_id": 1,
                "age": 40, "na_to_k": 10.0
            })))
            .unwrap();
        let created = store.create(&sample_patient()).unwrap();
        assert_eq!(created.patient_id, 201);
        assert_eq!(store.latest().unwrap().unwrap().patient_id, 201);
    }

    #[test]
    fn delete_removes_assignment_documents() {
        let store = store();
        let created = store.create(&sample_patient()).unwrap();
        store.delete(created.patient_id).unwrap();
        let remaining = store
            .db()
            .collection(DRUG_ASSIGNMENTS)
            .count_documents(&json!({ "patient_id": created.patient_id }))
            .unwrap();
        assert_eq!(remaining, 0);
    }

    #[test]
    fn malformed_patient_document_is_an_error() {
        let store = store();
        store
            .db()
            .collection(PATIENTS)
            .insert_one(object(json!({"patient_id": 1, "age": "old"})))
            .unwrap();
        let err = store.read(1).unwrap_err();
        assert!(matches!(err, DatabaseError::MalformedDocument { .. }));
    }

    #[test]
    fn concurrent_resolution_creates_one_document() {
        let store = store();
        let ids = resolve_concurrently(&store, LookupTable::Sex, "M", 8);
        assert!(ids.iter().all(|&id| id == ids[0]));
        let count = store
            .db()
            .collection("Sexes")
            .count_documents(&json!({"sex_name": "M"}))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn concurrent_creates_get_unique_ids_and_one_assignment_each() {
        let store = store();
        let created = exercise_concurrent_creates(&store, 8, 5);
        for c in &created {
            let assignments = store
                .db()
                .collection(DRUG_ASSIGNMENTS)
                .count_documents(&json!({ "patient_id": c.patient_id }))
                .unwrap();
            assert_eq!(assignments, 1);
        }
    }

    #[test]
    fn update_racing_delete_leaves_no_orphaned_assignment() {
        let store = store();
        for patient_id in race_update_against_delete(&store, 100) {
            let orphans = store
                .db()
                .collection(DRUG_ASSIGNMENTS)
                .count_documents(&json!({ "patient_id": patient_id }))
                .unwrap();
            assert_eq!(orphans, 0, "assignment left behind for deleted patient {patient_id}");
        }
    }

    #[test]
    fn update_of_missing_patient_writes_nothing() {
        let store = store();
        let err = store.update(42, &sample_patient()).unwrap_err();
        assert!(err.is_not_found());
        let assignments = store
            .db()
            .collection(DRUG_ASSIGNMENTS)
            .count_documents(&json!({}))
            .unwrap();
        assert_eq!(assignments, 0);
    }
}
