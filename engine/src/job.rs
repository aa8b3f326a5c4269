//! Job orchestration module.
//!
//! A `SyncJob` walks one run through
//! `Idle -> Scanning -> Diffing -> AwaitingConfirmation -> Executing -> Idle`.
//! `analyze_job` scans both trees and builds the plan; the caller reviews it;
//! `run_job` applies it. The hash cache is passed in explicitly so that one
//! cache instance serves exactly one run at a time.

use crate::checksums::FileHasher;
use crate::cloud::default_detector;
use crate::config::SyncOptions;
use crate::diff::DiffEngine;
use crate::error::EngineError;
use crate::executor::{ConfirmDeletion, SyncExecutor};
use crate::hash_cache::HashCache;
use crate::model::{JobState, SyncPlan, SyncReport};
use crate::progress::{ProgressCallback, StopFlag};
use crate::scanner::{check_root, Scanner};
use chrono::{DateTime, Utc};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info};
use uuid::Uuid;

/// One source/destination pairing and the state of its current run.
#[derive(Debug)]
pub struct SyncJob {
    /// Unique identifier for this job
    pub id: Uuid,

    pub source_root: PathBuf,
    pub destination_root: PathBuf,
    pub options: SyncOptions,

    /// Current position in the run state machine
    pub state: JobState,

    pub created_at: DateTime<Utc>,

    /// Set by `analyze_job`, consumed by `run_job`
    pub plan: Option<SyncPlan>,

    /// Set by `run_job`
    pub report: Option<SyncReport>,

    /// Message of the error that ended the last stage, if any
    pub error: Option<String>,
}

/// Create a new sync job.
///
/// The source must be an existing, readable directory. A missing destination
/// is created.
///
/// # Errors
/// Returns EngineError if the source is invalid or the destination cannot be
/// created
pub fn create_job<P: AsRef<Path>>(
    source: P,
    destination: P,
    options: SyncOptions,
) -> Result<SyncJob, EngineError> {
    let source = source.as_ref();
    let destination = destination.as_ref();

    check_root(source)?;

    match fs::metadata(destination) {
        Ok(metadata) if !metadata.is_dir() => {
            return Err(EngineError::InvalidRoot {
                path: destination.to_path_buf(),
            })
        }
        Ok(_) => {}
        Err(_) => {
            info!("Creating destination directory {}", destination.display());
            fs::create_dir_all(destination).map_err(|e| EngineError::DestinationCreateFailed {
                path: destination.to_path_buf(),
                source: e,
            })?;
        }
    }

    Ok(SyncJob {
        id: Uuid::new_v4(),
        source_root: source.to_path_buf(),
        destination_root: destination.to_path_buf(),
        options,
        state: JobState::Idle,
        created_at: Utc::now(),
        plan: None,
        report: None,
        error: None,
    })
}

/// Scan both trees and build the plan.
///
/// Allowed from `Idle`, or from `AwaitingConfirmation` to re-analyze. On
/// success the job waits in `AwaitingConfirmation` with `job.plan` set. The
/// cache is flushed at the end of analysis.
///
/// # Errors
/// Root access errors and cancellation; the job returns to `Idle`.
pub fn analyze_job(
    job: &mut SyncJob,
    cache: &mut HashCache,
    progress: Option<&dyn ProgressCallback>,
    stop: Option<&StopFlag>,
) -> Result<(), EngineError> {
    if !matches!(job.state, JobState::Idle | JobState::AwaitingConfirmation) {
        return Err(EngineError::InvalidState {
            message: format!("Job must be idle to analyze; current state: {:?}", job.state),
        });
    }

    job.plan = None;
    job.report = None;
    job.error = None;

    let result = analyze(job, cache, progress, stop);
    cache.flush();

    match result {
        Ok(plan) => {
            job.plan = Some(plan);
            job.state = JobState::AwaitingConfirmation;
            Ok(())
        }
        Err(e) => {
            error!("Analysis of job {} failed: {}", job.id, e);
            job.error = Some(e.to_string());
            job.state = JobState::Idle;
            Err(e)
        }
    }
}

fn analyze(
    job: &mut SyncJob,
    cache: &mut HashCache,
    progress: Option<&dyn ProgressCallback>,
    stop: Option<&StopFlag>,
) -> Result<SyncPlan, EngineError> {
    job.state = JobState::Scanning;

    let mut source_scanner = Scanner::new(job.options.scan_options());
    let mut dest_scanner = Scanner::new(job.options.scan_options());
    if let Some(p) = progress {
        source_scanner = source_scanner.with_progress(p);
        dest_scanner = dest_scanner.with_progress(p);
    }
    if let Some(s) = stop {
        source_scanner = source_scanner.with_stop(s);
        dest_scanner = dest_scanner.with_stop(s);
    }
    let detector = default_detector();
    if job.options.detects_placeholders(&job.destination_root) {
        info!("Cloud placeholder detection: {}", detector.name());
        dest_scanner = dest_scanner.with_detector(detector.as_ref());
    } else if job.options.cloud_aware {
        debug!(
            "{} is not a cloud sync folder, placeholder detection off",
            job.destination_root.display()
        );
    }

    let source = source_scanner.scan(&job.source_root)?;
    let destination = dest_scanner.scan(&job.destination_root)?;

    job.state = JobState::Diffing;

    let hasher = FileHasher::new(cache.algorithm());
    let mut engine = DiffEngine::new(cache, &hasher);
    if let Some(p) = progress {
        engine = engine.with_progress(p);
    }
    if let Some(s) = stop {
        engine = engine.with_stop(s);
    }
    engine.diff(&source, &destination, &job.options.diff_options())
}

/// Apply the reviewed plan.
///
/// Requires `AwaitingConfirmation`. The plan is consumed; the job returns to
/// `Idle` with `job.report` set, or with `job.error` set if orphan deletion
/// was refused.
///
/// # Errors
/// `InvalidState` if no plan is waiting, `DeletionNotConfirmed` if `confirm`
/// refuses the deletion. Per-file failures are in the report.
pub fn run_job(
    job: &mut SyncJob,
    cache: &mut HashCache,
    confirm: &dyn ConfirmDeletion,
    progress: Option<&dyn ProgressCallback>,
    stop: Option<&StopFlag>,
) -> Result<(), EngineError> {
    if job.state != JobState::AwaitingConfirmation {
        return Err(EngineError::InvalidState {
            message: format!("Job must be analyzed before running; current state: {:?}", job.state),
        });
    }
    let Some(plan) = job.plan.take() else {
        job.state = JobState::Idle;
        return Err(EngineError::InvalidState {
            message: "Job has no plan to run".to_string(),
        });
    };

    job.state = JobState::Executing;

    let hasher = FileHasher::new(cache.algorithm());
    let mut executor = SyncExecutor::new(cache, &hasher);
    if let Some(p) = progress {
        executor = executor.with_progress(p);
    }
    if let Some(s) = stop {
        executor = executor.with_stop(s);
    }

    let result = executor.execute(plan, job.options.delete_orphaned, confirm);
    job.state = JobState::Idle;

    match result {
        Ok(report) => {
            job.report = Some(report);
            Ok(())
        }
        Err(e) => {
            job.error = Some(e.to_string());
            Err(e)
        }
    }
}
