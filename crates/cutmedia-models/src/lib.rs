//! Shared data models for the Cut Media job server.
//!
//! This crate provides Serde-serializable types for:
//! - Job identifiers, status and the job state machine
//! - Worker parameters accepted from uploads
//! - The typed worker invocation (CLI argument encoding)

pub mod invocation;
pub mod job;
pub mod parameters;

pub use invocation::WorkerInvocation;
pub use job::{Job, JobId, JobStatus, TransitionError};
pub use parameters::JobParameters;
