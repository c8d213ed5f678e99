//! # Eventing Server
//!
//! Process around [`eventing_core`]: layered configuration, wiring of the
//! sample applications, and an axum front end exposing the HTTP bridge, a
//! JSON-lines ingest endpoint and service health.

pub mod apps;
pub mod infra;
pub mod routes;

pub use infra::app_state::AppState;
