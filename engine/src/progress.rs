//! Progress reporting and cooperative cancellation.
//!
//! The engine reports through the `ProgressCallback` trait, which decouples
//! it from any presentation layer. Every stage emits `SyncEvent`s
//! synchronously on the thread doing the work; `ChannelProgress` forwards
//! them to another thread.

use crate::model::ItemResult;
use crossbeam_channel::Sender;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A structured progress event.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    ScanStarted {
        root: PathBuf,
    },
    /// Emitted every `progress_interval` enumerated files, excluded ones included
    ScanProgress {
        root: PathBuf,
        files_seen: usize,
        files_found: usize,
    },
    ScanCompleted {
        root: PathBuf,
        files: usize,
        total_bytes: u64,
        excluded_dirs: usize,
        excluded_files: usize,
        remote_only: usize,
    },
    /// A scan or hash step failed for one item; the run continues
    ItemFailed {
        result: ItemResult,
    },
    DiffStarted {
        source_files: usize,
        destination_files: usize,
    },
    Hashing {
        path: PathBuf,
    },
    DiffCompleted {
        to_copy: usize,
        to_skip: usize,
        orphaned: usize,
        total_copy_bytes: u64,
    },
    ExecutionStarted {
        files_to_copy: usize,
        bytes_to_copy: u64,
        files_to_delete: usize,
    },
    /// One copy or delete finished; `index` counts from 1 up to `total`
    ItemCompleted {
        index: usize,
        total: usize,
        result: ItemResult,
    },
    DirectoriesPruned {
        count: usize,
    },
    ExecutionCompleted {
        files_copied: usize,
        bytes_copied: u64,
        failures: usize,
        cancelled: bool,
    },
}

/// Receives progress events from a running stage.
///
/// Called synchronously on the worker thread; implementations should return
/// quickly.
pub trait ProgressCallback: Send {
    fn on_event(&self, event: &SyncEvent);
}

impl<F> ProgressCallback for F
where
    F: Fn(&SyncEvent) + Send,
{
    fn on_event(&self, event: &SyncEvent) {
        self(event)
    }
}

/// Forwards events over a channel, e.g. to a UI thread.
pub struct ChannelProgress {
    sender: Sender<SyncEvent>,
}

impl ChannelProgress {
    pub fn new(sender: Sender<SyncEvent>) -> Self {
        ChannelProgress { sender }
    }
}

impl ProgressCallback for ChannelProgress {
    fn on_event(&self, event: &SyncEvent) {
        // receiver gone means nobody is listening; keep working
        let _ = self.sender.send(event.clone());
    }
}

/// Build and deliver an event only when someone is listening.
pub(crate) fn emit(progress: Option<&dyn ProgressCallback>, event: impl FnOnce() -> SyncEvent) {
    if let Some(callback) = progress {
        callback.on_event(&event());
    }
}

/// Cooperative stop request, checked between units of work.
#[derive(Debug, Clone, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    pub fn new() -> Self {
        StopFlag::default()
    }

    pub fn request_stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stop_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub(crate) fn stop_requested(stop: Option<&StopFlag>) -> bool {
    stop.map(StopFlag::is_stop_requested).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;
    use std::sync::Mutex;

    #[test]
    fn test_channel_progress_forwards_events() {
        let (tx, rx) = unbounded();
        let progress = ChannelProgress::new(tx);
        progress.on_event(&SyncEvent::DirectoriesPruned { count: 2 });
        assert_eq!(rx.try_recv(), Ok(SyncEvent::DirectoriesPruned { count: 2 }));
    }

    #[test]
    fn test_channel_progress_survives_dropped_receiver() {
        let (tx, rx) = unbounded();
        drop(rx);
        ChannelProgress::new(tx).on_event(&SyncEvent::DirectoriesPruned { count: 0 });
    }

    #[test]
    fn test_closure_callback_and_emit() {
        let seen = Mutex::new(Vec::new());
        let callback = |event: &SyncEvent| seen.lock().unwrap().push(event.clone());
        emit(Some(&callback as &dyn ProgressCallback), || SyncEvent::ScanStarted {
            root: PathBuf::from("/src"),
        });
        emit(None, || unreachable!("no listener, event must not be built"));
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_stop_flag_shared_between_clones() {
        let flag = StopFlag::new();
        let other = flag.clone();
        assert!(!stop_requested(Some(&flag)));
        other.request_stop();
        assert!(flag.is_stop_requested());
        assert!(!stop_requested(None));
    }
}
