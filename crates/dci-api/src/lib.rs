//! HTTP API server for the DCI job scheduling service.
//!
//! Exposes the job engine under `/api/v1`.

pub mod auth;
pub mod error;
pub mod routes;
pub mod state;

pub use state::AppState;
