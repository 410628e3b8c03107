//! Job registry and external worker supervisor.
//!
//! This crate provides:
//! - Deterministic per-job file locations
//! - The job registry (`JobStore`) and its in-memory implementation
//! - Upload persistence and log tailing
//! - The job launcher, which spawns the worker and drives each job to a
//!   terminal state, with timeout and cancellation

pub mod config;
pub mod error;
pub mod fs_utils;
pub mod launcher;
pub mod logging;
pub mod metrics;
pub mod paths;
pub mod store;

pub use config::RunnerConfig;
pub use error::{RunnerError, RunnerResult};
pub use fs_utils::{persist_upload, tail_log};
pub use launcher::{check_interpreter, JobLauncher, JobSubmission, WorkerOutcome};
pub use paths::{JobPaths, PathResolver};
pub use store::{InMemoryJobStore, JobStore};
