//! Patient CRUD endpoints, one set per backend.
//!
//! - `POST   {prefix}/`: create patient and drug assignment
//! - `GET    {prefix}/:id`: denormalised view
//! - `PUT    {prefix}/:id`: overwrite fields, refresh assignment
//! - `DELETE {prefix}/:id`: remove patient and its assignments

use std::sync::Arc;

use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;

use crate::api::error::ApiError;
use crate::api::types::Detail;
use crate::db::PatientStore;
use crate::models::{CreatedPatient, PatientIn, PatientView};

pub type StoreState = State<Arc<dyn PatientStore>>;

fn body(payload: Result<Json<PatientIn>, JsonRejection>) -> Result<PatientIn, ApiError> {
    let Json(patient) = payload?;
    patient.validate().map_err(ApiError::BadRequest)?;
    Ok(patient)
}

fn patient_not_found(patient_id: i64) -> ApiError {
    ApiError::NotFound(format!("Patient {patient_id} not found"))
}

pub async fn create(
    State(store): StoreState,
    payload: Result<Json<PatientIn>, JsonRejection>,
) -> Result<(StatusCode, Json<CreatedPatient>), ApiError> {
    let patient = body(payload)?;
    let created = store.create(&patient)?;
    tracing::info!(
        backend = %store.backend(),
        patient_id = created.patient_id,
        "Patient created"
    );
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn read(
    State(store): StoreState,
    id: Result<Path<i64>, PathRejection>,
) -> Result<Json<PatientView>, ApiError> {
    let Path(patient_id) = id?;
    store
        .read(patient_id)?
        .map(Json)
        .ok_or_else(|| patient_not_found(patient_id))
}

pub async fn update(
    State(store): StoreState,
    id: Result<Path<i64>, PathRejection>,
    payload: Result<Json<PatientIn>, JsonRejection>,
) -> Result<Json<Detail>, ApiError> {
    let Path(patient_id) = id?;
    let patient = body(payload)?;
    store.update(patient_id, &patient)?;
    tracing::info!(backend = %store.backend(), patient_id, "Patient updated");
    Ok(Json(Detail::new("Patient updated")))
}

pub async fn delete(
    State(store): StoreState,
    id: Result<Path<i64>, PathRejection>,
) -> Result<Json<Detail>, ApiError> {
    let Path(patient_id) = id?;
    store.delete(patient_id)?;
    tracing::info!(backend = %store.backend(), patient_id, "Patient deleted");
    Ok(Json(Detail::new("Patient deleted")))
}
