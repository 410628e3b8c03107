//! Typed worker invocation.
//!
//! Every argument the worker accepts, and how it is encoded on the command
//! line, lives here.

use std::path::{Path, PathBuf};

use crate::JobParameters;

/// Arguments for one worker run.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerInvocation {
    /// Input video path
    pub video: PathBuf,
    /// Output artifact path
    pub output: PathBuf,
    /// Calibration file path
    pub calibration: Option<PathBuf>,
    /// Model selector
    pub model: Option<String>,
    /// Frame rate, strictly positive
    pub fps: Option<f64>,
    /// Frame cap, strictly positive
    pub max_frames: Option<u64>,
    /// Class filter, verbatim
    pub classes: Option<String>,
}

impl WorkerInvocation {
    /// Create an invocation with only the mandatory paths.
    pub fn new(video: impl AsRef<Path>, output: impl AsRef<Path>) -> Self {
        Self {
            video: video.as_ref().to_path_buf(),
            output: output.as_ref().to_path_buf(),
            calibration: None,
            model: None,
            fps: None,
            max_frames: None,
            classes: None,
        }
    }

    /// Copy the optional values from job parameters.
    ///
    /// `calibration` in the parameters is only a flag; the path comes from
    /// [`WorkerInvocation::calibration`].
    pub fn with_parameters(mut self, params: &JobParameters) -> Self {
        self.model = params.model.clone();
        self.fps = params.fps;
        self.max_frames = params.max_frames;
        self.classes = params.classes.clone();
        self
    }

    /// Set the calibration file.
    pub fn calibration(mut self, path: impl AsRef<Path>) -> Self {
        self.calibration = Some(path.as_ref().to_path_buf());
        self
    }

    /// Build the worker arguments.
    pub fn to_args(&self) -> Vec<String> {
        let mut args = vec![
            "--video".to_string(),
            self.video.to_string_lossy().to_string(),
            "--output".to_string(),
            self.output.to_string_lossy().to_string(),
        ];

        if let Some(ref calibration) = self.calibration {
            args.push("--calibration".to_string());
            args.push(calibration.to_string_lossy().to_string());
        }

        if let Some(ref model) = self.model {
            args.push("--model".to_string());
            args.push(model.clone());
        }

        if let Some(fps) = self.fps.filter(|f| f.is_finite() && *f > 0.0) {
            args.push("--fps".to_string());
            args.push(fps.to_string());
        }

        if let Some(max_frames) = self.max_frames.filter(|n| *n > 0) {
            args.push("--maxframes".to_string());
            args.push(max_frames.to_string());
        }

        if let Some(ref classes) = self.classes {
            args.push("--classes".to_string());
            args.push(classes.clone());
        }

        args
    }
}
