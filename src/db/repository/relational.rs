use std::path::Path;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::db::sqlite::{open_database, open_memory_database, RELATIONAL_MIGRATIONS};
use crate::db::{DatabaseError, LookupResolver, LookupTable};
use crate::models::*;

use super::{PatientStore, PredictionLogStore};

/// Patient joined with its lookups; drug is left-joined.
const PATIENT_VIEW_SELECT: &str =
    "SELECT p.patient_id, p.age, s.sex_name, bp.bp_level, c.cholesterol_level, p.na_to_k, da.drug_type
     FROM patients p
     JOIN sexes s ON p.sex_id = s.sex_id
     JOIN blood_pressures bp ON p.bp_id = bp.bp_id
     JOIN cholesterols c ON p.cholesterol_id = c.cholesterol_id
     LEFT JOIN drug_assignments da ON da.patient_id = p.patient_id";

/// SQLite-backed relational store. Ids come from `AUTOINCREMENT`
/// sequences; every write runs in one transaction.
pub struct RelationalStore {
    conn: Mutex<Connection>,
}

impl RelationalStore {
    pub fn open(path: &Path) -> Result<Self, DatabaseError> {
        let conn = open_database(path, RELATIONAL_MIGRATIONS)?;
        tracing::info!(path = %path.display(), "Relational store opened");
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn open_in_memory() -> Result<Self, DatabaseError> {
        let conn = open_memory_database(RELATIONAL_MIGRATIONS)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, DatabaseError> {
        self.conn
            .lock()
            .map_err(|_| DatabaseError::Unavailable("relational store lock poisoned".into()))
    }
}

/// Insert-if-absent then select. The `UNIQUE` value column makes this
/// safe against concurrent first sightings.
fn resolve_lookup(conn: &Connection, table: LookupTable, value: &str) -> Result<i64, DatabaseError> {
    let (name, id_col, value_col) = (table.table(), table.id_field(), table.value_field());
    conn.execute(
        &format!("INSERT INTO {name} ({value_col}) VALUES (?1) ON CONFLICT({value_col}) DO NOTHING"),
        params![value],
    )?;
    let id = conn.query_row(
        &format!("SELECT {id_col} FROM {name} WHERE {value_col} = ?1"),
        params![value],
        |row| row.get(0),
    )?;
    Ok(id)
}

struct LookupIds {
    sex: i64,
    bp: i64,
    cholesterol: i64,
}

fn resolve_all(conn: &Connection, patient: &PatientIn) -> Result<LookupIds, DatabaseError> {
    Ok(LookupIds {
        sex: resolve_lookup(conn, LookupTable::Sex, patient.sex.as_str())?,
        bp: resolve_lookup(conn, LookupTable::BloodPressure, patient.bp.as_str())?,
        cholesterol: resolve_lookup(conn, LookupTable::Cholesterol, patient.cholesterol.as_str())?,
    })
}

fn patient_exists(conn: &Connection, patient_id: i64) -> Result<bool, DatabaseError> {
    let found = conn
        .query_row(
            "SELECT patient_id FROM patients WHERE patient_id = ?1",
            params![patient_id],
            |row| row.get::<_, i64>(0),
        )
        .optional()?;
    Ok(found.is_some())
}

fn insert_assignment(conn: &Connection, patient_id: i64, drug: DrugType) -> Result<i64, DatabaseError> {
    conn.execute(
        "INSERT INTO drug_assignments (patient_id, drug_type, assigned_at) VALUES (?1, ?2, ?3)",
        params![patient_id, drug.as_str(), Utc::now()],
    )?;
    Ok(conn.last_insert_rowid())
}

fn patient_view_from_row(row: &Row<'_>) -> rusqlite::Result<PatientView> {
    Ok(PatientView {
        patient_id: row.get(0)?,
        age: row.get(1)?,
        sex: row.get(2)?,
        bp: row.get(3)?,
        cholesterol: row.get(4)?,
        na_to_k: row.get(5)?,
        drug: row.get(6)?,
    })
}

impl LookupResolver for RelationalStore {
    fn resolve(&self, table: LookupTable, value: &str) -> Result<i64, DatabaseError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let id = resolve_lookup(&tx, table, value)?;
        tx.commit()?;
        Ok(id)
    }
}

impl PatientStore for RelationalStore {
    fn backend(&self) -> BackendKind {
        BackendKind::Relational
    }

    fn create(&self, patient: &PatientIn) -> Result<CreatedPatient, DatabaseError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let ids = resolve_all(&tx, patient)?;
        tx.execute(
            "INSERT INTO patients (sex_id, bp_id, cholesterol_id, age, na_to_k)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![ids.sex, ids.bp, ids.cholesterol, patient.age, patient.na_to_k],
        )?;
        let patient_id = tx.last_insert_rowid();
        let assignment_id = insert_assignment(&tx, patient_id, patient.drug)?;

        tx.commit()?;
        tracing::debug!(patient_id, assignment_id, "Relational patient created");
        Ok(CreatedPatient { patient_id, assignment_id })
    }

    fn read(&self, patient_id: i64) -> Result<Option<PatientView>, DatabaseError> {
        let conn = self.lock()?;
        let view = conn
            .query_row(
                &format!(
                    "{PATIENT_VIEW_SELECT} WHERE p.patient_id = ?1 ORDER BY da.assignment_id DESC LIMIT 1"
                ),
                params![patient_id],
                patient_view_from_row,
            )
            .optional()?;
        Ok(view)
    }

    fn update(&self, patient_id: i64, patient: &PatientIn) -> Result<(), DatabaseError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        if !patient_exists(&tx, patient_id)? {
            return Err(DatabaseError::patient_not_found(patient_id));
        }
        let ids = resolve_all(&tx, patient)?;
        tx.execute(
            "UPDATE patients SET sex_id = ?1, bp_id = ?2, cholesterol_id = ?3, age = ?4, na_to_k = ?5
             WHERE patient_id = ?6",
            params![ids.sex, ids.bp, ids.cholesterol, patient.age, patient.na_to_k, patient_id],
        )?;
        let updated = tx.execute(
            "UPDATE drug_assignments SET drug_type = ?1, assigned_at = ?2 WHERE patient_id = ?3",
            params![patient.drug.as_str(), Utc::now(), patient_id],
        )?;
        if updated == 0 {
            tracing::warn!(patient_id, "Patient had no drug assignment, recreating it");
            insert_assignment(&tx, patient_id, patient.drug)?;
        }

        tx.commit()?;
        Ok(())
    }

    fn delete(&self, patient_id: i64) -> Result<(), DatabaseError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        if !patient_exists(&tx, patient_id)? {
            return Err(DatabaseError::patient_not_found(patient_id));
        }
        tx.execute("DELETE FROM drug_assignments WHERE patient_id = ?1", params![patient_id])?;
        tx.execute("DELETE FROM patients WHERE patient_id = ?1", params![patient_id])?;

        tx.commit()?;
        Ok(())
    }

    fn latest(&self) -> Result<Option<PatientView>, DatabaseError> {
        let conn = self.lock()?;
        let view = conn
            .query_row(
                &format!(
                    "{PATIENT_VIEW_SELECT} ORDER BY p.patient_id DESC, da.assignment_id DESC LIMIT 1"
                ),
                [],
                patient_view_from_row,
            )
            .optional()?;
        Ok(view)
    }
}

// ── Prediction logs ─────────────────────────────────────────

struct PredictionLogRow {
    log_id: i64,
    patient_id: i64,
    predicted_drug: String,
    model_type: String,
    prediction_time: DateTime<Utc>,
    actual_drug: Option<String>,
    prediction_success: Option<bool>,
    db_used: String,
}

fn prediction_log_row(row: &Row<'_>) -> rusqlite::Result<PredictionLogRow> {
    Ok(PredictionLogRow {
        log_id: row.get(0)?,
        patient_id: row.get(1)?,
        predicted_drug: row.get(2)?,
        model_type: row.get(3)?,
        prediction_time: row.get(4)?,
        actual_drug: row.get(5)?,
        prediction_success: row.get(6)?,
        db_used: row.get(7)?,
    })
}

fn prediction_log_from_row(row: PredictionLogRow) -> Result<PredictionLog, DatabaseError> {
    Ok(PredictionLog {
        log_id: row.log_id,
        entry: PredictionLogEntry {
            patient_id: row.patient_id,
            predicted_drug: row.predicted_drug,
            model_type: row.model_type,
            prediction_time: row.prediction_time,
            actual_drug: row.actual_drug,
            prediction_success: row.prediction_success,
            db_used: BackendKind::from_str(&row.db_used)?,
        },
    })
}

const PREDICTION_LOG_SELECT: &str =
    "SELECT log_id, patient_id, predicted_drug, model_type, prediction_time,
     actual_drug, prediction_success, db_used
     FROM prediction_logs";

impl PredictionLogStore for RelationalStore {
    fn record(&self, entry: &PredictionLogEntry) -> Result<i64, DatabaseError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO prediction_logs (patient_id, predicted_drug, model_type, prediction_time,
             actual_drug, prediction_success, db_used)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                entry.patient_id,
                entry.predicted_drug,
                entry.model_type,
                entry.prediction_time,
                entry.actual_drug,
                entry.prediction_success,
                entry.db_used.as_str(),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn get(&self, log_id: i64) -> Result<Option<PredictionLog>, DatabaseError> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                &format!("{PREDICTION_LOG_SELECT} WHERE log_id = ?1"),
                params![log_id],
                prediction_log_row,
            )
            .optional()?;
        row.map(prediction_log_from_row).transpose()
    }

    fn list_for_patient(&self, patient_id: i64) -> Result<Vec<PredictionLog>, DatabaseError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "{PREDICTION_LOG_SELECT} WHERE patient_id = ?1 ORDER BY prediction_time DESC, log_id DESC"
        ))?;
        let rows = stmt.query_map(params![patient_id], prediction_log_row)?;

        let mut logs = Vec::new();
        for row in rows {
            logs.push(prediction_log_from_row(row?)?);
        }
        Ok(logs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repository::test_support::*;

    fn store() -> RelationalStore {
        RelationalStore::open_in_memory().unwrap()
    }

    fn lookup_rows(store: &RelationalStore, table: LookupTable) -> i64 {
        let conn = store.lock().unwrap();
        conn.query_row(&format!("SELECT COUNT(*) FROM {}", table.table()), [], |row| row.get(0))
            .unwrap()
    }

    #[test]
    fn resolving_twice_returns_same_id_without_duplicates() {
        let store = store();
        for table in LookupTable::ALL {
            let first = store.resolve(table, "NORMAL").unwrap();
            let second = store.resolve(table, "NORMAL").unwrap();
            assert_eq!(first, second);
            assert_eq!(lookup_rows(&store, table), 1);
        }
    }

    #[test]
    fn distinct_values_get_distinct_ids() {
        let store = store();
        let high = store.resolve(LookupTable::BloodPressure, "HIGH").unwrap();
        let low = store.resolve(LookupTable::BloodPressure, "LOW").unwrap();
        assert_ne!(high, low);
        assert_eq!(store.resolve(LookupTable::BloodPressure, "HIGH").unwrap(), high);
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
    fn create_shares_lookup_rows_between_patients() {
        let store = store();
        store.create(&sample_patient()).unwrap();
        store.create(&sample_patient()).unwrap();
        assert_eq!(lookup_rows(&store, LookupTable::Sex), 1);
        assert_eq!(lookup_rows(&store, LookupTable::Cholesterol), 1);
    }

    #[test]
    fn delete_removes_assignment_rows() {
        let store = store();
        let created = store.create(&sample_patient()).unwrap();
        store.delete(created.patient_id).unwrap();
        let conn = store.lock().unwrap();
        let remaining: i64 = conn
            .query_row("SELECT COUNT(*) FROM drug_assignments", [], |row| row.get(0))
            .unwrap();
        assert_eq!(remaining, 0);
    }

    #[test]
    fn update_refreshes_assigned_at() {
        let store = store();
        let created = store.create(&sample_patient()).unwrap();
        let before: DateTime<Utc> = {
            let conn = store.lock().unwrap();
            conn.query_row("SELECT assigned_at FROM drug_assignments", [], |row| row.get(0))
                .unwrap()
        };
        std::thread::sleep(std::time::Duration::from_millis(5));
        store.update(created.patient_id, &sample_patient()).unwrap();
        let conn = store.lock().unwrap();
        let (count, after): (i64, DateTime<Utc>) = conn
            .query_row("SELECT COUNT(*), MAX(assigned_at) FROM drug_assignments", [], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })
            .unwrap();
        assert_eq!(count, 1);
        assert!(after > before);
    }

    #[test]
    fn update_recreates_missing_assignment() {
        let store = store();
        let created = store.create(&sample_patient()).unwrap();
        store
            .lock()
            .unwrap()
            .execute("DELETE FROM drug_assignments", [])
            .unwrap();
        assert_eq!(store.read(created.patient_id).unwrap().unwrap().drug, None);

        store.update(created.patient_id, &sample_patient()).unwrap();
        let view = store.read(created.patient_id).unwrap().unwrap();
        assert_eq!(view.drug.as_deref(), Some("DrugY"));
    }

    #[test]
    fn ids_come_from_sequence() {
        let store = store();
        let first = store.create(&sample_patient()).unwrap();
        store.delete(first.patient_id).unwrap();
        let second = store.create(&sample_patient()).unwrap();
        // AUTOINCREMENT never reuses a deleted id.
        assert!(second.patient_id > first.patient_id);
    }

    #[test]
    fn prediction_logs_round_trip_and_list_newest_first() {
        let store = store();
        let now = Utc::now();
        let older = PredictionLogEntry {
            patient_id: 4,
            predicted_drug: "drugA".into(),
            model_type: "nn".into(),
            prediction_time: now - chrono::Duration::minutes(5),
            actual_drug: Some("drugA".into()),
            prediction_success: Some(true),
            db_used: BackendKind::Relational,
        };
        let newer = PredictionLogEntry {
            prediction_time: now,
            actual_drug: None,
            prediction_success: None,
            db_used: BackendKind::Document,
            ..older.clone()
        };
        let older_id = store.record(&older).unwrap();
        let newer_id = store.record(&newer).unwrap();

        let fetched = store.get(older_id).unwrap().unwrap();
        assert_eq!(fetched.entry, older);

        let listed = store.list_for_patient(4).unwrap();
        assert_eq!(listed.iter().map(|l| l.log_id).collect::<Vec<_>>(), vec![newer_id, older_id]);
        assert!(store.list_for_patient(99).unwrap().is_empty());
        assert!(store.get(999).unwrap().is_none());
    }

    #[test]
    fn concurrent_resolution_creates_one_row() {
        let store = store();
        let ids = resolve_concurrently(&store, LookupTable::Sex, "M", 8);
        assert!(ids.iter().all(|&id| id == ids[0]));
        assert_eq!(lookup_rows(&store, LookupTable::Sex), 1);
    }

    #[test]
    fn concurrent_creates_get_unique_ids() {
        let store = store();
        exercise_concurrent_creates(&store, 8, 5);
    }

    #[test]
    fn update_racing_delete_leaves_no_orphaned_assignment() {
        let store = store();
        for patient_id in race_update_against_delete(&store, 50) {
            let conn = store.lock().unwrap();
            let orphans: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM drug_assignments WHERE patient_id = ?1",
                    params![patient_id],
                    |row| row.get(0),
                )
                .unwrap();
            assert_eq!(orphans, 0);
        }
    }
}
