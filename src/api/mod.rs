//! HTTP API.
//!
//! `api_router()` returns a composable `Router` over an [`AppContext`];
//! `start_server()` binds it and runs it in the background.

pub mod endpoints;
pub mod error;
pub mod router;
pub mod server;
pub mod types;

pub use error::ApiError;
pub use router::api_router;
pub use server::{start_server, ApiServer, ServerSession};
pub use types::AppContext;
