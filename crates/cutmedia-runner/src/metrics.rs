//! Job metrics.
//!
//! Recorded through the `metrics` facade; the API binary installs the
//! Prometheus recorder. Without a recorder these calls are no-ops.

use metrics::{counter, gauge, histogram};

/// Metric names as constants for consistency.
pub mod names {
    pub const JOBS_SUBMITTED_TOTAL: &str = "cutmedia_jobs_submitted_total";
    pub const JOBS_COMPLETED_TOTAL: &str = "cutmedia_jobs_completed_total";
    pub const JOBS_FAILED_TOTAL: &str = "cutmedia_jobs_failed_total";
    pub const WORKERS_ACTIVE: &str = "cutmedia_workers_active";
    pub const WORKER_DURATION_SECONDS: &str = "cutmedia_worker_duration_seconds";
}

pub fn record_job_submitted() {
    counter!(names::JOBS_SUBMITTED_TOTAL).increment(1);
}

pub fn record_job_completed(duration_secs: f64) {
    counter!(names::JOBS_COMPLETED_TOTAL).increment(1);
    histogram!(names::WORKER_DURATION_SECONDS).record(duration_secs);
}

/// Record a failed job. `cause` is a short label such as `spawn` or `exit_code`.
pub fn record_job_failed(cause: &'static str) {
    counter!(names::JOBS_FAILED_TOTAL, "cause" => cause).increment(1);
}

pub fn set_active_workers(count: usize) {
    gauge!(names::WORKERS_ACTIVE).set(count as f64);
}
