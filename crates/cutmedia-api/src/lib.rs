//! Axum HTTP API server.
//!
//! This crate provides:
//! - Upload, status, log and download endpoints for processing jobs
//! - Job listing, cancellation and deletion
//! - Request ID, logging and security header middleware
//! - Prometheus metrics

pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod state;

pub use config::ApiConfig;
pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use state::AppState;
