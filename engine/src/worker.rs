//! Background workers.
//!
//! Analysis and execution each run on their own thread so the caller stays
//! responsive. The job and its hash cache move into the worker and come back
//! through `WorkerHandle::join`; progress arrives on a channel in the
//! meantime.

use crate::error::EngineError;
use crate::executor::ConfirmDeletion;
use crate::hash_cache::HashCache;
use crate::job::{analyze_job, run_job, SyncJob};
use crate::progress::{ChannelProgress, ProgressCallback, StopFlag, SyncEvent};
use crossbeam_channel::{unbounded, Receiver};
use std::thread::{self, JoinHandle};
use tracing::debug;

/// What a finished worker hands back.
#[derive(Debug)]
pub struct WorkerOutput {
    pub job: SyncJob,
    pub cache: HashCache,
    pub result: Result<(), EngineError>,
}

/// A running worker.
pub struct WorkerHandle {
    /// Progress events; disconnects when the worker finishes
    pub events: Receiver<SyncEvent>,
    stop: StopFlag,
    thread: JoinHandle<WorkerOutput>,
}

impl WorkerHandle {
    /// Ask the worker to stop at the next file boundary.
    pub fn request_stop(&self) {
        self.stop.request_stop();
    }

    /// Shared stop flag, e.g. for a Ctrl-C handler.
    pub fn stop(&self) -> StopFlag {
        self.stop.clone()
    }

    /// Wait for the worker and take back the job and cache.
    pub fn join(self) -> Result<WorkerOutput, EngineError> {
        self.thread.join().map_err(|_| EngineError::WorkerPanicked)
    }
}

/// Scan and diff on a background thread.
pub fn spawn_analysis(job: SyncJob, cache: HashCache) -> WorkerHandle {
    spawn(job, cache, "analysis", |job, cache, progress, stop| {
        analyze_job(job, cache, Some(progress as &dyn ProgressCallback), Some(stop))
    })
}

/// Execute the job's plan on a background thread.
pub fn spawn_execution(
    job: SyncJob,
    cache: HashCache,
    confirm: Box<dyn ConfirmDeletion + Send>,
) -> WorkerHandle {
    spawn(job, cache, "execution", move |job, cache, progress, stop| {
        run_job(
            job,
            cache,
            confirm.as_ref(),
            Some(progress as &dyn ProgressCallback),
            Some(stop),
        )
    })
}

fn spawn<F>(mut job: SyncJob, mut cache: HashCache, stage: &'static str, work: F) -> WorkerHandle
where
    F: FnOnce(&mut SyncJob, &mut HashCache, &ChannelProgress, &StopFlag) -> Result<(), EngineError>
        + Send
        + 'static,
{
    let (sender, events) = unbounded();
    let stop = StopFlag::new();
    let worker_stop = stop.clone();

    let thread = thread::spawn(move || {
        debug!("Worker started: {} of job {}", stage, job.id);
        let progress = ChannelProgress::new(sender);
        let result = work(&mut job, &mut cache, &progress, &worker_stop);
        debug!("Worker finished: {} of job {}", stage, job.id);
        WorkerOutput { job, cache, result }
    });

    WorkerHandle { events, stop, thread }
}
