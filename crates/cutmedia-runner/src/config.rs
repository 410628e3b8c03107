//! Runner configuration.

use std::path::PathBuf;
use std::time::Duration;

/// Default number of log bytes returned by a tail request.
pub const DEFAULT_LOG_TAIL_BYTES: u64 = 4096;

/// Runner configuration.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Base directory holding `uploads/` and `outputs/`
    pub data_dir: PathBuf,
    /// Program used to run the worker (e.g. `python`)
    pub interpreter: String,
    /// Worker script passed as first argument; `None` runs the interpreter directly
    pub script: Option<PathBuf>,
    /// Working directory for the worker
    pub work_dir: Option<PathBuf>,
    /// Wall-clock limit per worker run; `None` disables it
    pub job_timeout: Option<Duration>,
    /// Default tail size for log requests
    pub log_tail_default: u64,
    /// Write a JSON snapshot of each job next to its output
    pub write_metadata: bool,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            interpreter: "python".to_string(),
            script: Some(PathBuf::from("python/processor.py")),
            work_dir: None,
            job_timeout: Some(Duration::from_secs(3600)), // 1 hour
            log_tail_default: DEFAULT_LOG_TAIL_BYTES,
            write_metadata: true,
        }
    }
}

impl RunnerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            data_dir: std::env::var("DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("data")),
            interpreter: std::env::var("WORKER_INTERPRETER").unwrap_or_else(|_| "python".to_string()),
            script: match std::env::var("WORKER_SCRIPT") {
                Ok(s) if s.trim().is_empty() => None,
                Ok(s) => Some(PathBuf::from(s)),
                Err(_) => Some(PathBuf::from("python/processor.py")),
            },
            work_dir: std::env::var("WORKER_WORKDIR").ok().map(PathBuf::from),
            job_timeout: match std::env::var("WORKER_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse::<u64>().ok())
                .unwrap_or(3600)
            {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
            log_tail_default: std::env::var("LOG_TAIL_DEFAULT")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(DEFAULT_LOG_TAIL_BYTES),
            write_metadata: std::env::var("WRITE_JOB_METADATA")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(true),
        }
    }

    /// Run the worker program directly with no script argument.
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.interpreter = program.into();
        self.script = None;
        self
    }

    /// Set the timeout.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.job_timeout = timeout;
        self
    }
}
