//! API endpoint handlers.
//!
//! Patient CRUD is written once against [`crate::db::PatientStore`] and
//! mounted per backend; everything else works off the shared context.

pub mod admin;
pub mod health;
pub mod latest;
pub mod patients;
pub mod predict;
pub mod prediction_logs;
