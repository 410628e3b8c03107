//! Per-job file locations.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use cutmedia_models::JobId;

use crate::error::RunnerResult;

const UPLOADS_DIR: &str = "uploads";
const OUTPUTS_DIR: &str = "outputs";

/// Maps a job ID to its files under a fixed base directory.
#[derive(Debug, Clone)]
pub struct PathResolver {
    base_dir: PathBuf,
}

/// All files belonging to one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobPaths {
    pub input: PathBuf,
    pub calibration: PathBuf,
    pub output: PathBuf,
    pub log: PathBuf,
    pub metadata: PathBuf,
}

impl PathResolver {
    pub fn new(base_dir: impl AsRef<Path>) -> Self {
        Self {
            base_dir: base_dir.as_ref().to_path_buf(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn uploads_dir(&self) -> PathBuf {
        self.base_dir.join(UPLOADS_DIR)
    }

    pub fn outputs_dir(&self) -> PathBuf {
        self.base_dir.join(OUTPUTS_DIR)
    }

    /// Create the upload and output directories.
    ///
    /// `create_dir_all` succeeds when the directory already exists, so
    /// concurrent callers are fine.
    pub fn ensure_dirs(&self) -> RunnerResult<()> {
        std::fs::create_dir_all(self.uploads_dir())?;
        std::fs::create_dir_all(self.outputs_dir())?;
        Ok(())
    }

    /// Resolve the files of a job, creating the directories first.
    pub fn resolve(&self, id: &JobId) -> RunnerResult<JobPaths> {
        self.ensure_dirs()?;
        Ok(self.paths_for(id))
    }

    /// Resolve without touching the filesystem.
    pub fn paths_for(&self, id: &JobId) -> JobPaths {
        let uploads = self.uploads_dir();
        let outputs = self.outputs_dir();
        JobPaths {
            input: uploads.join(format!("{id}.input")),
            calibration: uploads.join(format!("{id}.yaml")),
            output: outputs.join(format!("{id}.mp4")),
            log: outputs.join(format!("{id}.log")),
            metadata: outputs.join(format!("{id}.json")),
        }
    }
}

impl JobPaths {
    fn all(&self) -> [&Path; 5] {
        [
            &self.input,
            &self.calibration,
            &self.output,
            &self.log,
            &self.metadata,
        ]
    }

    /// Delete every file of the job. Missing files are skipped.
    pub async fn remove_all(&self) -> RunnerResult<()> {
        for path in self.all() {
            match tokio::fs::remove_file(path).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}
