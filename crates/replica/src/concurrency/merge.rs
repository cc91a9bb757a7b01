//! Merge tracking
//!
//! While the range is being subsumed by its left neighbor, requests that hit
//! the merge wait on a completion channel and then retry.

use parking_lot::Mutex;
use tokio::sync::watch;

/// Resolves when the merge it was taken from completes.
#[derive(Debug)]
pub struct MergeCompletion {
    rx: watch::Receiver<()>,
}

impl MergeCompletion {
    pub async fn wait(mut self) {
        // Never sent on; the sender is dropped when the merge completes.
        while self.rx.changed().await.is_ok() {}
    }
}

/// Tracks whether a merge is in progress on the range
#[derive(Debug, Default)]
pub struct MergeWatcher {
    in_progress: Mutex<Option<watch::Sender<()>>>,
}

impl MergeWatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin_merge(&self) {
        let mut in_progress = self.in_progress.lock();
        if in_progress.is_none() {
            tracing::debug!("merge started");
            let (tx, _) = watch::channel(());
            *in_progress = Some(tx);
        }
    }

    /// Releases every waiter.
    pub fn complete_merge(&self) {
        if self.in_progress.lock().take().is_some() {
            tracing::debug!("merge completed");
        }
    }

    pub fn is_merging(&self) -> bool {
        self.in_progress.lock().is_some()
    }

    /// A completion handle for the current merge, or `None` if no merge is in
    /// progress.
    pub fn merge_complete_ch(&self) -> Option<MergeCompletion> {
        self.in_progress
            .lock()
            .as_ref()
            .map(|tx| MergeCompletion { rx: tx.subscribe() })
    }
}
