//! Job launcher and worker supervisor.
//!
//! `start` registers a queued job and hands it to a supervision task. The
//! supervision task spawns the worker, copies its output into the job log and
//! turns the worker's exit into exactly one terminal transition.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use cutmedia_models::{Job, JobId, JobParameters, TransitionError, WorkerInvocation};

use crate::config::RunnerConfig;
use crate::error::{RunnerError, RunnerResult};
use crate::logging::JobLogger;
use crate::metrics;
use crate::paths::{JobPaths, PathResolver};
use crate::store::JobStore;

/// How long to keep draining worker pipes after the worker is gone.
///
/// A grandchild that inherited stdout can keep the pipe open forever.
const PIPE_DRAIN_GRACE: Duration = Duration::from_secs(5);

/// Size of each read from the worker's stdout/stderr.
const PIPE_CHUNK_SIZE: usize = 8192;

/// A job whose input is already on disk.
#[derive(Debug, Clone)]
pub struct JobSubmission {
    pub id: JobId,
    pub parameters: JobParameters,
    pub file_name: Option<String>,
}

impl JobSubmission {
    pub fn new(id: JobId, parameters: JobParameters) -> Self {
        Self {
            id,
            parameters,
            file_name: None,
        }
    }

    pub fn with_file_name(mut self, file_name: Option<String>) -> Self {
        self.file_name = file_name;
        self
    }
}

/// How a worker run ended.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerOutcome {
    /// Exit 0 and a non-empty output file
    Succeeded,
    /// The log file could not be opened
    SetupFailed(String),
    /// The worker process could not be started
    SpawnFailed(String),
    /// Non-zero exit, or killed by a signal (`None`)
    ExitFailure { code: Option<i32> },
    /// Exit 0 but no output file
    MissingOutput,
    /// Exit 0 but the output file is empty
    EmptyOutput,
    /// Waiting on the process failed
    WaitFailed(String),
    /// Killed after the wall-clock limit
    TimedOut(Duration),
    /// Killed on request
    Cancelled,
}

impl WorkerOutcome {
    /// Failure message stored on the job. `None` on success.
    pub fn error_message(&self) -> Option<String> {
        match self {
            WorkerOutcome::Succeeded => None,
            WorkerOutcome::SetupFailed(e) => Some(format!("failed to open worker log: {e}")),
            WorkerOutcome::SpawnFailed(e) => Some(format!("failed to spawn worker: {e}")),
            WorkerOutcome::ExitFailure { code: Some(code) } => {
                Some(format!("worker exited with code {code}"))
            }
            WorkerOutcome::ExitFailure { code: None } => {
                Some("worker terminated by signal".to_string())
            }
            WorkerOutcome::MissingOutput => Some(
                "worker exited successfully but did not produce an output file".to_string(),
            ),
            WorkerOutcome::EmptyOutput => {
                Some("worker exited successfully but the output file is empty".to_string())
            }
            WorkerOutcome::WaitFailed(e) => Some(format!("failed to wait for worker: {e}")),
            WorkerOutcome::TimedOut(limit) => {
                Some(format!("worker timed out after {}s", limit.as_secs()))
            }
            WorkerOutcome::Cancelled => Some("job cancelled".to_string()),
        }
    }

    /// Exit code reported by the worker, if it exited on its own.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            WorkerOutcome::Succeeded
            | WorkerOutcome::MissingOutput
            | WorkerOutcome::EmptyOutput => Some(0),
            WorkerOutcome::ExitFailure { code } => *code,
            _ => None,
        }
    }

    fn cause(&self) -> &'static str {
        match self {
            WorkerOutcome::Succeeded => "none",
            WorkerOutcome::SetupFailed(_) => "setup",
            WorkerOutcome::SpawnFailed(_) => "spawn",
            WorkerOutcome::ExitFailure { .. } => "exit_code",
            WorkerOutcome::MissingOutput | WorkerOutcome::EmptyOutput => "missing_output",
            WorkerOutcome::WaitFailed(_) => "wait",
            WorkerOutcome::TimedOut(_) => "timeout",
            WorkerOutcome::Cancelled => "cancelled",
        }
    }
}

/// Handles to a job whose supervision task is still alive.
struct ActiveJob {
    cancel: watch::Sender<bool>,
    /// Closes when the supervision task is done.
    finished: watch::Receiver<()>,
}

struct Inner {
    config: RunnerConfig,
    paths: PathResolver,
    store: Arc<dyn JobStore>,
    active: Mutex<HashMap<JobId, ActiveJob>>,
}

/// Starts workers and tracks them until they reach a terminal state.
#[derive(Clone)]
pub struct JobLauncher {
    inner: Arc<Inner>,
}

impl JobLauncher {
    pub fn new(config: RunnerConfig, paths: PathResolver, store: Arc<dyn JobStore>) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                paths,
                store,
                active: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.inner.config
    }

    pub fn paths(&self) -> &PathResolver {
        &self.inner.paths
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.inner.store
    }

    /// Number of jobs with a live supervision task.
    pub fn active_jobs(&self) -> usize {
        self.active().len()
    }

    /// Register a queued job and start its worker in the background.
    ///
    /// The input file must already be fully written to the job's input path;
    /// otherwise nothing is registered.
    pub async fn start(&self, submission: JobSubmission) -> RunnerResult<Job> {
        let JobSubmission {
            id,
            mut parameters,
            file_name,
        } = submission;
        let paths = self.inner.paths.resolve(&id)?;

        let input_size = match fs::metadata(&paths.input).await {
            Ok(meta) if meta.is_file() => meta.len(),
            _ => return Err(RunnerError::InputMissing(paths.input.clone())),
        };

        parameters.calibration = is_file(&paths.calibration).await;
        let mut invocation =
            WorkerInvocation::new(&paths.input, &paths.output).with_parameters(&parameters);
        if parameters.calibration {
            invocation = invocation.calibration(&paths.calibration);
        }

        let mut job = Job::new(id.clone(), parameters).with_input_size(input_size);
        if let Some(name) = file_name {
            job = job.with_file_name(name);
        }

        if !self.inner.store.insert_if_absent(job.clone()) {
            return Err(RunnerError::Duplicate(id.to_string()));
        }
        self.write_snapshot(&paths, &job).await;
        metrics::record_job_submitted();

        let (cancel_tx, cancel_rx) = watch::channel(false);
        let (finished_tx, finished_rx) = watch::channel(());
        {
            let mut active = self.active();
            active.insert(
                id.clone(),
                ActiveJob {
                    cancel: cancel_tx,
                    finished: finished_rx,
                },
            );
            metrics::set_active_workers(active.len());
        }

        JobLogger::new(&id).log_start(&format!(
            "input={} bytes, args={:?}",
            input_size,
            invocation.to_args()
        ));

        let launcher = self.clone();
        tokio::spawn(async move {
            launcher.supervise(id, paths, invocation, cancel_rx).await;
            drop(finished_tx);
        });

        Ok(job)
    }

    /// Ask a live job to stop. Returns `false` if the job is not running.
    pub fn cancel(&self, id: &JobId) -> bool {
        self.signal_cancel(id).is_some()
    }

    /// Wait until the job's supervision task is done and return its snapshot.
    pub async fn wait(&self, id: &JobId) -> Option<Job> {
        let finished = self.active().get(id).map(|a| a.finished.clone());
        if let Some(mut finished) = finished {
            // Never sent on; returns when the supervisor drops the sender.
            let _ = finished.changed().await;
        }
        self.inner.store.get(id)
    }

    /// Cancel the job if needed, then remove its files and registry entry.
    pub async fn delete(&self, id: &JobId) -> RunnerResult<Option<Job>> {
        let Some(job) = self.inner.store.get(id) else {
            return Ok(None);
        };

        if let Some(mut finished) = self.signal_cancel(id) {
            let _ = finished.changed().await;
        }

        self.inner.paths.paths_for(id).remove_all().await?;
        let removed = self.inner.store.remove(id).unwrap_or(job);
        JobLogger::new(id).log_progress("deleted");
        Ok(Some(removed))
    }

    fn signal_cancel(&self, id: &JobId) -> Option<watch::Receiver<()>> {
        let active = self.active();
        let job = active.get(id)?;
        job.cancel.send_replace(true);
        Some(job.finished.clone())
    }

    fn active(&self) -> MutexGuard<'_, HashMap<JobId, ActiveJob>> {
        self.inner.active.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn supervise(
        self,
        id: JobId,
        paths: JobPaths,
        invocation: WorkerInvocation,
        cancel_rx: watch::Receiver<bool>,
    ) {
        let logger = JobLogger::new(&id);
        let started = Instant::now();

        let outcome = self
            .run_worker(&id, &paths, &invocation, cancel_rx, &logger)
            .await;
        self.finish(&id, &paths, &outcome, started, &logger).await;

        let mut active = self.active();
        active.remove(&id);
        metrics::set_active_workers(active.len());
    }

    async fn run_worker(
        &self,
        id: &JobId,
        paths: &JobPaths,
        invocation: &WorkerInvocation,
        mut cancel_rx: watch::Receiver<bool>,
        logger: &JobLogger,
    ) -> WorkerOutcome {
        if *cancel_rx.borrow_and_update() {
            return WorkerOutcome::Cancelled;
        }

        let mut log_file = match OpenOptions::new()
            .create(true)
            .append(true)
            .open(&paths.log)
            .await
        {
            Ok(f) => f,
            Err(e) => return WorkerOutcome::SetupFailed(e.to_string()),
        };

        let mut child = match self.worker_command(invocation).spawn() {
            Ok(child) => child,
            Err(e) => {
                let reason = format!("{}: {}", self.inner.config.interpreter, e);
                let note = format!("[cutmedia] failed to spawn worker: {reason}\n");
                if let Err(e) = write_note(&mut log_file, note.as_bytes()).await {
                    logger.log_warning(&format!("could not write to log: {e}"));
                }
                return WorkerOutcome::SpawnFailed(reason);
            }
        };

        if let Some(job) = self.transition(id, |job| job.mark_running()) {
            self.write_snapshot(paths, &job).await;
        }
        logger.log_progress(&format!("worker spawned (pid {:?})", child.id()));

        let (log_tx, log_rx) = mpsc::channel::<Vec<u8>>(64);
        let writer = tokio::spawn(write_log(log_file, log_rx, logger.clone()));
        let mut pumps: Vec<JoinHandle<()>> = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            pumps.push(tokio::spawn(pump(stdout, log_tx.clone())));
        }
        if let Some(stderr) = child.stderr.take() {
            pumps.push(tokio::spawn(pump(stderr, log_tx.clone())));
        }

        let wake = tokio::select! {
            status = child.wait() => Wake::Exited(status),
            _ = deadline(self.inner.config.job_timeout) => {
                Wake::TimedOut(self.inner.config.job_timeout.unwrap_or_default())
            }
            _ = cancelled(&mut cancel_rx) => Wake::Cancelled,
        };

        let (outcome, killed) = match wake {
            Wake::Exited(Ok(status)) => (self.classify_exit(status, &paths.output).await, false),
            Wake::Exited(Err(e)) => (WorkerOutcome::WaitFailed(e.to_string()), false),
            Wake::TimedOut(limit) => {
                kill(&mut child, logger).await;
                (WorkerOutcome::TimedOut(limit), true)
            }
            Wake::Cancelled => {
                kill(&mut child, logger).await;
                (WorkerOutcome::Cancelled, true)
            }
        };

        if killed {
            if let Some(message) = outcome.error_message() {
                let _ = log_tx
                    .send(format!("[cutmedia] worker killed: {message}\n").into_bytes())
                    .await;
            }
        }
        drop(log_tx);

        drain(pumps, logger).await;
        if writer.await.is_err() {
            logger.log_warning("log writer task panicked");
        }

        outcome
    }

    fn worker_command(&self, invocation: &WorkerInvocation) -> Command {
        let config = &self.inner.config;
        let mut command = Command::new(&config.interpreter);
        if let Some(ref script) = config.script {
            command.arg(script);
        }
        command
            .args(invocation.to_args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(ref dir) = config.work_dir {
            command.current_dir(dir);
        }
        command
    }

    /// Exit 0 alone is not success: the worker must also have produced its output.
    async fn classify_exit(&self, status: ExitStatus, output: &Path) -> WorkerOutcome {
        if !status.success() {
            return WorkerOutcome::ExitFailure {
                code: status.code(),
            };
        }
        match fs::metadata(output).await {
            Ok(meta) if meta.is_file() && meta.len() > 0 => WorkerOutcome::Succeeded,
            Ok(meta) if meta.is_file() => WorkerOutcome::EmptyOutput,
            _ => WorkerOutcome::MissingOutput,
        }
    }

    async fn finish(
        &self,
        id: &JobId,
        paths: &JobPaths,
        outcome: &WorkerOutcome,
        started: Instant,
        logger: &JobLogger,
    ) {
        let elapsed = started.elapsed().as_secs_f64();

        let updated = match outcome.error_message() {
            None => self.transition(id, |job| job.complete()),
            Some(message) => {
                let code = outcome.exit_code();
                self.transition(id, |job| {
                    job.exit_code = code;
                    job.fail(message.clone())
                })
            }
        };

        match outcome.error_message() {
            None => {
                metrics::record_job_completed(elapsed);
                logger.log_completion(&format!("output ready after {elapsed:.1}s"));
            }
            Some(message) => {
                metrics::record_job_failed(outcome.cause());
                logger.log_error(&message);
            }
        }

        if let Some(job) = updated {
            self.write_snapshot(paths, &job).await;
        }
    }

    fn transition(
        &self,
        id: &JobId,
        mut f: impl FnMut(&mut Job) -> Result<(), TransitionError>,
    ) -> Option<Job> {
        match self.inner.store.update(id, &mut f) {
            Some(Ok(job)) => Some(job),
            Some(Err(e)) => {
                warn!(job_id = %id, "Rejected job transition: {}", e);
                None
            }
            None => {
                debug!(job_id = %id, "Job no longer registered, dropping transition");
                None
            }
        }
    }

    /// Best-effort JSON copy of the job for external inspection.
    ///
    /// Never read back; the store is authoritative.
    async fn write_snapshot(&self, paths: &JobPaths, job: &Job) {
        if !self.inner.config.write_metadata {
            return;
        }
        let result = match serde_json::to_vec_pretty(job) {
            Ok(bytes) => fs::write(&paths.metadata, bytes).await.map_err(RunnerError::from),
            Err(e) => Err(RunnerError::from(e)),
        };
        if let Err(e) = result {
            warn!(job_id = %job.id, "Failed to write job metadata: {}", e);
        }
    }
}

/// Resolve the configured worker interpreter on `PATH`.
pub fn check_interpreter(config: &RunnerConfig) -> RunnerResult<PathBuf> {
    which::which(&config.interpreter)
        .map_err(|_| RunnerError::InterpreterNotFound(config.interpreter.clone()))
}

enum Wake {
    Exited(std::io::Result<ExitStatus>),
    TimedOut(Duration),
    Cancelled,
}

async fn deadline(timeout: Option<Duration>) {
    match timeout {
        Some(limit) => tokio::time::sleep(limit).await,
        None => std::future::pending().await,
    }
}

async fn cancelled(rx: &mut watch::Receiver<bool>) {
    if rx.wait_for(|cancel| *cancel).await.is_err() {
        std::future::pending::<()>().await;
    }
}

async fn kill(child: &mut Child, logger: &JobLogger) {
    if let Err(e) = child.kill().await {
        logger.log_warning(&format!("failed to kill worker: {e}"));
    }
}

async fn is_file(path: &Path) -> bool {
    fs::metadata(path).await.map(|m| m.is_file()).unwrap_or(false)
}

/// Copy one worker stream into the log channel.
///
/// Keeps reading after the writer is gone so the worker never blocks on a
/// full pipe.
async fn pump<R>(mut reader: R, tx: mpsc::Sender<Vec<u8>>)
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; PIPE_CHUNK_SIZE];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                let _ = tx.send(buf[..n].to_vec()).await;
            }
            Err(e) => {
                debug!("Worker pipe read failed: {}", e);
                break;
            }
        }
    }
}

/// Sole owner of the log file handle; closes it once every sender is gone.
async fn write_log(mut file: File, mut rx: mpsc::Receiver<Vec<u8>>, logger: JobLogger) {
    let mut healthy = true;
    while let Some(chunk) = rx.recv().await {
        if !healthy {
            continue;
        }
        if let Err(e) = file.write_all(&chunk).await {
            logger.log_warning(&format!("log write failed, discarding further output: {e}"));
            healthy = false;
        }
    }
    if let Err(e) = file.flush().await {
        logger.log_warning(&format!("log flush failed: {e}"));
    }
}

async fn write_note(file: &mut File, bytes: &[u8]) -> std::io::Result<()> {
    file.write_all(bytes).await?;
    file.flush().await
}

async fn drain(pumps: Vec<JoinHandle<()>>, logger: &JobLogger) {
    let deadline = tokio::time::Instant::now() + PIPE_DRAIN_GRACE;
    for pump in pumps {
        let abort = pump.abort_handle();
        if tokio::time::timeout_at(deadline, pump).await.is_err() {
            logger.log_warning("worker output still open after exit, detaching");
            abort.abort();
        }
    }
}
