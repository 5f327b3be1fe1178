//! Launch and supervision of training subprocesses.
//!
//! One tokio task per job owns the child process. Stdout and stderr each get
//! their own reader task; every line is logged, broadcast and parsed for
//! metrics. On a clean exit the working directory is diffed to find the model.

use crate::artifacts::{ArtifactDetector, DirectorySnapshot};
use crate::broadcast::{JobEvent, TrainingObserver};
use crate::config::TrainingConfig;
use crate::error::{TrainingError, TrainingResult};
use crate::job::{JobId, OwnerId, TrainingJob};
use crate::layout::UploadLayout;
use crate::lines::LineSplitter;
use crate::parser::{parse_line, OutputStream};
use crate::progress::{ProgressHandle, TrainingProgress, TrainingStatus};
use crate::registry::ModelRegistry;
use crate::store::ProgressStore;
use chrono::Utc;
use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

/// Error message recorded on jobs stopped by [`ProcessSupervisor::shutdown`].
pub const CANCELLED_MESSAGE: &str = "training cancelled";

const READ_CHUNK_BYTES: usize = 8 * 1024;

pub struct ProcessSupervisor {
    config: TrainingConfig,
    layout: UploadLayout,
    detector: ArtifactDetector,
    store: Arc<ProgressStore>,
    observer: Arc<dyn TrainingObserver>,
    registry: Arc<dyn ModelRegistry>,
    shutdown: CancellationToken,
    tasks: Mutex<HashMap<JobId, JoinHandle<()>>>,
}

impl std::fmt::Debug for ProcessSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessSupervisor")
            .field("upload_root", &self.layout.root())
            .field("jobs", &self.store.len())
            .finish_non_exhaustive()
    }
}

impl ProcessSupervisor {
    pub fn new(
        config: TrainingConfig,
        store: Arc<ProgressStore>,
        observer: Arc<dyn TrainingObserver>,
        registry: Arc<dyn ModelRegistry>,
    ) -> TrainingResult<Self> {
        config.validate()?;
        let layout = config.layout()?;
        Ok(Self {
            detector: ArtifactDetector::new(layout.clone()),
            layout,
            config,
            store,
            observer,
            registry,
            shutdown: CancellationToken::new(),
            tasks: Mutex::new(HashMap::new()),
        })
    }

    #[must_use]
    pub fn store(&self) -> &Arc<ProgressStore> {
        &self.store
    }

    #[must_use]
    pub fn layout(&self) -> &UploadLayout {
        &self.layout
    }

    /// Validates `job`, registers a pending record and spawns its execution.
    ///
    /// Unknown folders and scripts are rejected before anything is spawned.
    /// Must be called from within a tokio runtime.
    pub fn start_training(self: &Arc<Self>, job: TrainingJob) -> TrainingResult<(JobId, TrainingProgress)> {
        job.validate()?;
        if !self.layout.folder_exists(&job.folder_name) {
            return Err(TrainingError::FolderNotFound(job.folder_name));
        }
        if !self.layout.script_exists(&job.folder_name, &job.script_name) {
            return Err(TrainingError::ScriptNotFound(job.script_name));
        }

        let now = Utc::now();
        let job_id = JobId::generate(&job.folder_name, now);
        let initial = TrainingProgress::pending(job_id.clone(), job.owner_id, now);
        let handle = self.store.register(initial.clone());
        info!(
            job_id = %job_id,
            owner_id = %job.owner_id,
            folder = %job.folder_name,
            script = %job.script_name,
            "Training job accepted"
        );

        let this = Arc::clone(self);
        let cancel = self.shutdown.child_token();
        let task = tokio::spawn(async move { this.execute(handle, job, cancel).await });

        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        tasks.retain(|_, t| !t.is_finished());
        tasks.insert(job_id.clone(), task);
        drop(tasks);

        Ok((job_id, initial))
    }

    /// Runs one job to a terminal state. Never returns an error: every failure
    /// is recorded on the job and broadcast.
    pub async fn execute(&self, handle: Arc<ProgressHandle>, job: TrainingJob, cancel: CancellationToken) {
        let job_id = handle.job_id().clone();
        let work_dir = self.layout.folder_dir(&job.folder_name);
        let interpreter = if job.interpreter.trim().is_empty() {
            self.config.default_interpreter.as_str()
        } else {
            job.interpreter.as_str()
        };

        let mut command = Command::new(interpreter);
        command
            .arg(&job.script_name)
            .args(&job.args)
            .current_dir(&work_dir)
            .env(&self.config.unbuffered_env, "1")
            .env("MODEL_OUTPUT_DIR", self.layout.output_dir(&job.folder_name))
            .env("MODEL_NAME", &job.folder_name)
            .envs(&job.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if handle.mark_running() {
            self.emit(&handle, JobEvent::status(TrainingStatus::Running));
        }

        let before = match capture_snapshot(&work_dir).await {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                warn!(job_id = %job_id, error = %e, "Pre-run snapshot failed; artifact detection disabled");
                None
            }
        };

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                self.fail(&handle, TrainingError::Launch(e.to_string()).to_string());
                return;
            }
        };
        let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
            let _ = child.start_kill();
            self.fail(&handle, TrainingError::Launch("output pipes unavailable".to_string()).to_string());
            return;
        };
        info!(job_id = %job_id, interpreter, pid = child.id(), "Training process started");

        let mut stdout_task =
            tokio::spawn(pump_stream(stdout, OutputStream::Stdout, Arc::clone(&handle), Arc::clone(&self.observer)));
        let mut stderr_task =
            tokio::spawn(pump_stream(stderr, OutputStream::Stderr, Arc::clone(&handle), Arc::clone(&self.observer)));

        // Both readers drain before the exit status is read; the token is
        // honoured until the process has exited.
        let finished = async {
            let (out, err) = tokio::join!(&mut stdout_task, &mut stderr_task);
            debug!(
                job_id = %job_id,
                stdout_lines = out.unwrap_or_default(),
                stderr_lines = err.unwrap_or_default(),
                "Output streams drained"
            );
            child.wait().await
        };
        let exit = tokio::select! {
            biased;
            () = cancel.cancelled() => None,
            exit = finished => Some(exit),
        };

        let Some(exit) = exit else {
            warn!(job_id = %job_id, "Cancelling training process");
            let _ = child.start_kill();
            let _ = child.wait().await;
            // Orphaned grandchildren may still hold the pipes open.
            stdout_task.abort();
            stderr_task.abort();
            self.fail(&handle, CANCELLED_MESSAGE);
            return;
        };

        let status = match exit {
            Ok(status) => status,
            Err(e) => {
                self.fail(&handle, format!("failed to wait for training process: {e}"));
                return;
            }
        };
        if !status.success() {
            self.fail(&handle, format!("training failed: {status}"));
            return;
        }

        if !handle.mark_completed() {
            return;
        }
        info!(job_id = %job_id, "Training process exited successfully");

        let model_path = match &before {
            Some(before) => self.detect_artifact(&job_id, before, &work_dir).await,
            None => None,
        };
        if let Some(path) = &model_path {
            handle.set_model_path(path.clone());
            let accuracy = handle.snapshot().final_accuracy_percent();
            match self.registry.set_trained_model(&job.folder_name, path, accuracy).await {
                Ok(()) => info!(job_id = %job_id, entity = %job.folder_name, model_path = %path, "Trained model registered"),
                Err(e) => warn!(job_id = %job_id, entity = %job.folder_name, error = %e, "Model registry update failed"),
            }
        }

        self.emit(
            &handle,
            JobEvent::Status { status: TrainingStatus::Completed, error_message: None, model_path },
        );
    }

    async fn detect_artifact(&self, job_id: &JobId, before: &DirectorySnapshot, work_dir: &Path) -> Option<String> {
        match capture_snapshot(work_dir).await {
            Ok(after) => self.detector.detect(before, &after, work_dir).map(|artifact| artifact.relative_path),
            Err(e) => {
                warn!(job_id = %job_id, error = %e, "Post-run snapshot failed; skipping artifact detection");
                None
            }
        }
    }

    fn emit(&self, handle: &ProgressHandle, event: JobEvent) {
        self.observer.on_event(handle.job_id(), handle.owner_id(), &event);
    }

    fn fail(&self, handle: &ProgressHandle, message: impl Into<String>) {
        let message = message.into();
        error!(job_id = %handle.job_id(), error = %message, "Training failed");
        if handle.mark_failed(message.clone()) {
            self.emit(
                handle,
                JobEvent::Status { status: TrainingStatus::Failed, error_message: Some(message), model_path: None },
            );
        }
    }

    /// Waits for a job started by this supervisor and returns its final state.
    pub async fn wait_for(&self, job_id: &JobId) -> TrainingResult<TrainingProgress> {
        let task = self.tasks.lock().unwrap_or_else(PoisonError::into_inner).remove(job_id);
        if let Some(task) = task
            && let Err(e) = task.await
        {
            error!(job_id = %job_id, error = %e, "Supervision task aborted");
        }
        Ok(self.store.get(job_id)?.snapshot())
    }

    #[must_use]
    pub fn progress(&self, job_id: &JobId) -> Option<TrainingProgress> {
        self.store.get(job_id).ok().map(|h| h.snapshot())
    }

    #[must_use]
    pub fn list_for_owner(&self, owner_id: OwnerId) -> Vec<TrainingProgress> {
        self.store.list_by_owner(owner_id)
    }

    /// Drops finished records older than the configured retention.
    pub fn evict_expired(&self) -> usize {
        self.store.evict_older_than(self.config.retention())
    }

    /// Kills every running job. Jobs started afterwards are cancelled at once.
    pub fn shutdown(&self) {
        info!("Shutting down training supervisor");
        self.shutdown.cancel();
    }

    /// Cancels all jobs and waits for their tasks to finish.
    pub async fn shutdown_and_wait(&self) {
        self.shutdown();
        let tasks: Vec<_> = self.tasks.lock().unwrap_or_else(PoisonError::into_inner).drain().collect();
        for (job_id, task) in tasks {
            if let Err(e) = task.await {
                error!(job_id = %job_id, error = %e, "Supervision task aborted");
            }
        }
    }
}

/// Walks `dir` on the blocking pool; training folders can be large.
async fn capture_snapshot(dir: &Path) -> TrainingResult<DirectorySnapshot> {
    let dir = dir.to_path_buf();
    tokio::task::spawn_blocking(move || DirectorySnapshot::capture(&dir))
        .await
        .map_err(|e| TrainingError::Snapshot(format!("snapshot task failed: {e}")))?
}

/// Reads one stream until EOF. Returns the number of lines read.
async fn pump_stream<R>(
    mut reader: R,
    stream: OutputStream,
    handle: Arc<ProgressHandle>,
    observer: Arc<dyn TrainingObserver>,
) -> usize
where
    R: AsyncRead + Unpin,
{
    let job_id = handle.job_id().clone();
    let mut splitter = LineSplitter::new();
    let mut buf = vec![0u8; READ_CHUNK_BYTES];
    let mut lines = Vec::new();
    let mut count = 0;

    loop {
        let read = match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(read) => read,
            Err(e) => {
                warn!(job_id = %job_id, stream = stream.as_str(), error = %e, "Output stream read failed");
                break;
            }
        };
        splitter.push(&buf[..read], &mut lines);
        for line in lines.drain(..) {
            deliver_line(line, stream, &handle, observer.as_ref());
            count += 1;
        }
    }
    if let Some(line) = splitter.finish() {
        deliver_line(line, stream, &handle, observer.as_ref());
        count += 1;
    }

    debug!(job_id = %job_id, stream = stream.as_str(), lines = count, "Output reader finished");
    count
}

/// Logs, broadcasts and parses one line of output.
fn deliver_line(line: String, stream: OutputStream, handle: &ProgressHandle, observer: &dyn TrainingObserver) {
    let job_id = handle.job_id();
    let owner_id = handle.owner_id();
    trace!(job_id = %job_id, stream = stream.as_str(), "{line}");

    handle.append_log(line.clone());
    let parsed = parse_line(&line);
    observer.on_event(job_id, owner_id, &JobEvent::log(stream, line));

    if let Some(snapshot) = parsed.into_snapshot() {
        let tick = handle.record_metrics(snapshot.clone());
        observer.on_event(job_id, owner_id, &JobEvent::Metrics(snapshot));
        observer.on_event(job_id, owner_id, &JobEvent::Progress(tick));
    }
}
