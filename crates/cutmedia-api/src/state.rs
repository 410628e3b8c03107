//! Application state.

use std::sync::Arc;

use cutmedia_runner::{InMemoryJobStore, JobLauncher, JobStore, PathResolver, RunnerResult};

use crate::config::ApiConfig;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: ApiConfig,
    pub launcher: JobLauncher,
}

impl AppState {
    /// Create new application state.
    ///
    /// Fails when the data directories cannot be created.
    pub fn new(config: ApiConfig) -> RunnerResult<Self> {
        let paths = PathResolver::new(&config.runner.data_dir);
        paths.ensure_dirs()?;

        let store: Arc<dyn JobStore> = Arc::new(InMemoryJobStore::new());
        let launcher = JobLauncher::new(config.runner.clone(), paths, store);

        Ok(Self { config, launcher })
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        self.launcher.store()
    }

    pub fn paths(&self) -> &PathResolver {
        self.launcher.paths()
    }
}
