use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::composition::{CompositionPlan, CropJob, TransformPlanner};
use crate::config::Config;
use crate::error::{CropError, ExportError, Result};
use crate::export::backend::{ExportBackend, ExportContext, ExportJob, ExportProgress};
use crate::export::ffmpeg::FfmpegExportBackend;
use crate::video::{AssetInspector, FfprobeInspector};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ExportStatus {
    #[default]
    Idle,
    Running,
    Completed,
    Failed,
    Cancelled,
}

/// Observable state of the coordinator
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExportState {
    pub status: ExportStatus,

    /// Last progress value delivered for the current job
    pub progress: f32,

    /// Output of the last completed job
    pub output: Option<PathBuf>,

    /// Message of the last failed job
    pub error: Option<String>,
}

/// State plus the id of the job allowed to change it
#[derive(Debug, Default)]
struct StateSlot {
    job_id: u64,
    state: ExportState,
}

type SharedState = Arc<Mutex<StateSlot>>;

/// Update the state only while `job_id` still owns it
fn update_state(state: &SharedState, job_id: u64, update: impl FnOnce(&mut ExportState)) {
    if let Ok(mut slot) = state.lock() {
        if slot.job_id == job_id {
            update(&mut slot.state);
        }
    }
}

/// Raises the cancel flag if the owning `crop` future is dropped early
struct CancelOnDrop {
    cancel: Arc<AtomicBool>,
    armed: bool,
}

impl CancelOnDrop {
    fn new(cancel: Arc<AtomicBool>) -> Self {
        Self { cancel, armed: true }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        if self.armed {
            debug!("crop dropped before completion, cancelling its export");
            self.cancel.store(true, Ordering::SeqCst);
        }
    }
}

struct ActiveJob {
    id: u64,
    cancel: Arc<AtomicBool>,
    done: watch::Receiver<bool>,
}

impl ActiveJob {
    /// Raise the cancel flag and wait until the job has fully torn down
    async fn cancel_and_wait(mut self) {
        debug!("Cancelling export job {}", self.id);
        self.cancel.store(true, Ordering::SeqCst);

        loop {
            let finished = *self.done.borrow();
            // Sender gone means the task ended without reporting
            if finished || self.done.changed().await.is_err() {
                break;
            }
        }
    }
}

/// Single-flight crop service.
///
/// At most one export runs at a time. Starting a crop cancels whatever is
/// running and waits for it to tear down before the new job starts.
pub struct ExportCoordinator {
    inspector: Arc<dyn AssetInspector>,
    backend: Arc<dyn ExportBackend>,
    config: Config,
    planner: TransformPlanner,
    active: tokio::sync::Mutex<Option<ActiveJob>>,
    state: SharedState,
    next_job_id: AtomicU64,
    next_output_seq: AtomicU64,
}

impl ExportCoordinator {
    pub fn new(inspector: Arc<dyn AssetInspector>, backend: Arc<dyn ExportBackend>, config: Config) -> Self {
        let planner = TransformPlanner::new(config.export.even_dimensions);
        Self {
            inspector,
            backend,
            config,
            planner,
            active: tokio::sync::Mutex::new(None),
            state: Arc::new(Mutex::new(StateSlot::default())),
            next_job_id: AtomicU64::new(1),
            next_output_seq: AtomicU64::new(1),
        }
    }

    /// Coordinator using ffprobe for inspection and ffmpeg for export
    pub fn with_ffmpeg(config: Config) -> Self {
        let inspector = Arc::new(FfprobeInspector::new(config.export.ffprobe_path.clone()));
        let backend = Arc::new(FfmpegExportBackend::new(&config));
        Self::new(inspector, backend, config)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Snapshot of the current state
    pub fn state(&self) -> ExportState {
        self.state.lock().map(|slot| slot.state.clone()).unwrap_or_default()
    }

    pub fn is_running(&self) -> bool {
        self.state().status == ExportStatus::Running
    }

    /// Crop and rotate `job.source`, returning the path of the new file.
    ///
    /// `on_progress` is called on this task with strictly increasing values
    /// in `[0, 1]`, ending with `1.0` on success. Any export already running
    /// is cancelled first and its own `crop` call resolves to
    /// [`CropError::Cancelled`]. Dropping the returned future before it
    /// resolves cancels the export and removes its output.
    pub async fn crop<F>(&self, job: CropJob, mut on_progress: F) -> Result<PathBuf>
    where
        F: FnMut(f32) + Send,
    {
        job.validate_rect()?;

        if tokio::fs::metadata(&job.source).await.is_err() {
            return Err(CropError::FileNotFound { path: job.source.clone() });
        }

        let mut active = self.active.lock().await;
        if let Some(previous) = active.take() {
            previous.cancel_and_wait().await;
            self.reset_state();
        }

        let asset = self.inspector.inspect(&job.source).await?;
        let plan = Arc::new(CompositionPlan::build(&job, &asset, &self.planner)?);

        let output_dir = self.config.export.output_dir();
        tokio::fs::create_dir_all(&output_dir).await?;
        let output_path = self.output_path(&output_dir);

        let id = self.next_job_id.fetch_add(1, Ordering::SeqCst);
        let context = ExportContext::new(plan.total_frames());
        let progress = Arc::clone(&context.progress);
        let (done_tx, done_rx) = watch::channel(false);

        self.begin_state(id);

        info!(
            "Starting export job {} for {:?}: crop {} at {:.3} rad -> {:?}",
            id,
            job.source,
            plan.crop_rect(),
            job.angle,
            output_path
        );

        let handle = tokio::spawn(run_job(
            id,
            Arc::clone(&self.backend),
            ExportJob { plan, output_path: output_path.clone() },
            context.clone(),
            Arc::clone(&self.state),
            done_tx,
        ));

        let mut guard = CancelOnDrop::new(Arc::clone(&context.cancel));
        *active = Some(ActiveJob { id, cancel: Arc::clone(&context.cancel), done: done_rx });
        drop(active);

        let outcome = self.watch_progress(id, handle, &progress, &mut on_progress).await;
        guard.disarm();

        match outcome {
            Ok(delivered) => {
                if delivered < 1.0 {
                    on_progress(1.0);
                }
                update_state(&self.state, id, |state| state.progress = 1.0);
                Ok(output_path)
            }
            Err(error) => {
                if matches!(error, ExportError::Join { .. }) {
                    remove_partial_output(&output_path).await;
                }
                Err(error.into())
            }
        }
    }

    /// Sample progress until the job task finishes.
    ///
    /// Returns the last value delivered to the callback.
    async fn watch_progress<F>(
        &self,
        id: u64,
        mut handle: tokio::task::JoinHandle<std::result::Result<(), ExportError>>,
        progress: &ExportProgress,
        on_progress: &mut F,
    ) -> std::result::Result<f32, ExportError>
    where
        F: FnMut(f32) + Send,
    {
        let mut ticker = tokio::time::interval(self.config.export.progress_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut delivered = 0.0f32;

        loop {
            tokio::select! {
                joined = &mut handle => {
                    return match joined {
                        Ok(Ok(())) => Ok(delivered),
                        Ok(Err(error)) => Err(error),
                        Err(join_error) => {
                            // The task died before it could clean up
                            let error = ExportError::Join { reason: join_error.to_string() };
                            update_state(&self.state, id, |state| {
                                state.status = ExportStatus::Failed;
                                state.error = Some(error.to_string());
                            });
                            Err(error)
                        }
                    };
                }
                _ = ticker.tick() => {
                    let value = progress.fraction();
                    if value > delivered {
                        delivered = value;
                        on_progress(value);
                        update_state(&self.state, id, |state| state.progress = value);
                    }
                }
            }
        }
    }

    /// Cancel the running export, if any, and wait for it to tear down.
    ///
    /// Leaves the coordinator idle. Calling it when nothing runs is a no-op.
    /// A `crop` that is still inspecting its source holds the job slot, so
    /// this waits for inspection to finish and then cancels the export it
    /// started.
    pub async fn cancel(&self) {
        let mut active = self.active.lock().await;
        if let Some(job) = active.take() {
            job.cancel_and_wait().await;
            self.reset_state();
        }
    }

    /// Hand the state over to job `id`
    fn begin_state(&self, id: u64) {
        if let Ok(mut slot) = self.state.lock() {
            slot.job_id = id;
            slot.state = ExportState {
                status: ExportStatus::Running,
                ..ExportState::default()
            };
        }
    }

    fn reset_state(&self) {
        if let Ok(mut slot) = self.state.lock() {
            slot.job_id = 0;
            slot.state = ExportState::default();
        }
    }

    fn output_path(&self, dir: &Path) -> PathBuf {
        let seq = self.next_output_seq.fetch_add(1, Ordering::SeqCst);
        let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S%3f");
        dir.join(format!(
            "{}_{}_{}_cropped.{}",
            timestamp,
            std::process::id(),
            seq,
            self.config.export.container
        ))
    }
}

/// Body of the spawned export task.
///
/// Partial output is removed and the terminal state recorded before `done`
/// fires, so whoever waits on `done` sees a fully torn-down job.
async fn run_job(
    id: u64,
    backend: Arc<dyn ExportBackend>,
    job: ExportJob,
    context: ExportContext,
    state: SharedState,
    done: watch::Sender<bool>,
) -> std::result::Result<(), ExportError> {
    let output_path = job.output_path.clone();
    let result = backend.export(job, context.clone()).await;

    // A raised flag wins over a late success
    let result = match result {
        Ok(()) if context.is_cancelled() => Err(ExportError::Cancelled),
        other => other,
    };

    match &result {
        Ok(()) => {
            info!("Export job {} finished: {:?}", id, output_path);
            update_state(&state, id, |state| {
                state.status = ExportStatus::Completed;
                state.output = Some(output_path.clone());
            });
        }
        Err(error) => {
            remove_partial_output(&output_path).await;
            if matches!(error, ExportError::Cancelled) {
                info!("Export job {} cancelled", id);
                update_state(&state, id, |state| state.status = ExportStatus::Cancelled);
            } else {
                warn!("Export job {} failed on {}: {}", id, backend.name(), error);
                update_state(&state, id, |state| {
                    state.status = ExportStatus::Failed;
                    state.error = Some(error.to_string());
                });
            }
        }
    }

    let _ = done.send(true);
    result
}

async fn remove_partial_output(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!("Removed partial output {:?}", path),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove partial output {:?}: {}", path, e),
    }
}
