use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crate::composition::CompositionPlan;
use crate::error::ExportError;

/// One export handed to a backend
#[derive(Debug, Clone)]
pub struct ExportJob {
    /// Fully resolved plan, never modified while the export runs
    pub plan: Arc<CompositionPlan>,

    /// File the backend must create
    pub output_path: PathBuf,
}

/// Frame counters shared between a running backend and the coordinator
#[derive(Debug, Default)]
pub struct ExportProgress {
    total_frames: AtomicU64,
    frames_done: AtomicU64,
}

impl ExportProgress {
    pub fn new(total_frames: u64) -> Self {
        Self {
            total_frames: AtomicU64::new(total_frames),
            frames_done: AtomicU64::new(0),
        }
    }

    pub fn set_total(&self, total_frames: u64) {
        self.total_frames.store(total_frames, Ordering::Relaxed);
    }

    /// Record one more finished frame
    pub fn advance(&self) {
        self.frames_done.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frames_done(&self) -> u64 {
        self.frames_done.load(Ordering::Relaxed)
    }

    /// Completed fraction in `[0, 1]`
    pub fn fraction(&self) -> f32 {
        let total = self.total_frames.load(Ordering::Relaxed);
        if total == 0 {
            return 0.0;
        }
        (self.frames_done() as f64 / total as f64).clamp(0.0, 1.0) as f32
    }
}

/// Handles a backend uses to report progress and observe cancellation
#[derive(Debug, Clone)]
pub struct ExportContext {
    pub progress: Arc<ExportProgress>,
    pub cancel: Arc<AtomicBool>,
}

impl ExportContext {
    pub fn new(total_frames: u64) -> Self {
        Self {
            progress: Arc::new(ExportProgress::new(total_frames)),
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    /// `Err(Cancelled)` once cancellation was requested
    pub fn check_cancelled(&self) -> Result<(), ExportError> {
        if self.is_cancelled() {
            Err(ExportError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Something that turns a [`CompositionPlan`] into an encoded file.
///
/// Implementations must return [`ExportError::Cancelled`] promptly after the
/// context's cancel flag is raised, and must not leave child processes
/// running once `export` returns. Removing a partial output file is the
/// caller's job.
#[async_trait::async_trait]
pub trait ExportBackend: Send + Sync {
    /// Backend name for logs and error messages
    fn name(&self) -> &str;

    async fn export(&self, job: ExportJob, context: ExportContext) -> Result<(), ExportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_fraction_is_clamped() {
        let progress = ExportProgress::new(4);
        assert_eq!(progress.fraction(), 0.0);

        progress.advance();
        assert_eq!(progress.fraction(), 0.25);

        for _ in 0..10 {
            progress.advance();
        }
        assert_eq!(progress.fraction(), 1.0);
    }

    #[test]
    fn test_unknown_total_reports_zero() {
        let progress = ExportProgress::default();
        progress.advance();
        assert_eq!(progress.fraction(), 0.0);

        progress.set_total(2);
        assert_eq!(progress.fraction(), 0.5);
    }

    #[test]
    fn test_cancel_flag_is_shared() {
        let context = ExportContext::new(10);
        let clone = context.clone();
        assert!(context.check_cancelled().is_ok());

        clone.cancel.store(true, Ordering::SeqCst);
        assert!(matches!(context.check_cancelled(), Err(ExportError::Cancelled)));
    }
}
