//! Write-intent conflict resolution
//!
//! Resolving a write-intent conflict pushes the intent's owner and cleans up
//! the intent. The resolver may hand back an [`IntentCleanup`] that must be
//! finalized once the caller knows how the retry went.

use crate::context::Context;
use async_trait::async_trait;
use kvrange_protocol::{Header, PushTxnType, Request, Result, TxnMeta, WriteIntentError};
use std::fmt;

type CleanupFn = Box<dyn FnOnce(Option<&WriteIntentError>, Option<&TxnMeta>) + Send>;

/// Deferred cleanup step handed out by an [`IntentResolver`].
///
/// Finalized exactly once: explicitly through [`IntentCleanup::finalize`], or
/// with no information when dropped.
pub struct IntentCleanup {
    finalize: Option<CleanupFn>,
}

impl IntentCleanup {
    pub fn new(
        finalize: impl FnOnce(Option<&WriteIntentError>, Option<&TxnMeta>) + Send + 'static,
    ) -> Self {
        Self {
            finalize: Some(Box::new(finalize)),
        }
    }

    /// Report how the work that followed the resolution ended.
    ///
    /// `conflict` is set when the retry hit another write-intent conflict.
    /// `txn` is set when the caller's own transaction is still live and may
    /// now hold intents of its own.
    pub fn finalize(mut self, conflict: Option<&WriteIntentError>, txn: Option<&TxnMeta>) {
        if let Some(finalize) = self.finalize.take() {
            finalize(conflict, txn);
        }
    }
}

impl Drop for IntentCleanup {
    fn drop(&mut self) {
        if let Some(finalize) = self.finalize.take() {
            finalize(None, None);
        }
    }
}

impl fmt::Debug for IntentCleanup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IntentCleanup")
            .field("pending", &self.finalize.is_some())
            .finish()
    }
}

/// Outcome of processing a write-intent conflict
#[derive(Debug)]
pub struct IntentResolution {
    pub cleanup: Option<IntentCleanup>,
    pub result: Result<()>,
}

impl IntentResolution {
    pub fn resolved(cleanup: Option<IntentCleanup>) -> Self {
        Self {
            cleanup,
            result: Ok(()),
        }
    }
}

/// Pushes and resolves conflicting intents
#[async_trait]
pub trait IntentResolver: Send + Sync {
    /// Push the owners of the conflicting intents and resolve what can be
    /// resolved. `args` is the request that hit the conflict and `header`
    /// the batch header to push with.
    async fn process_write_intent_error(
        &self,
        ctx: &Context,
        conflict: &WriteIntentError,
        args: &Request,
        header: &Header,
        push_type: PushTxnType,
    ) -> IntentResolution;
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    fn recording() -> (IntentCleanup, Arc<Mutex<Vec<(bool, bool)>>>) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let cleanup = {
            let calls = calls.clone();
            IntentCleanup::new(move |conflict, txn| {
                calls.lock().push((conflict.is_some(), txn.is_some()));
            })
        };
        (cleanup, calls)
    }

    #[test]
    fn test_finalize_runs_once() {
        let (cleanup, calls) = recording();
        cleanup.finalize(Some(&WriteIntentError { intents: vec![] }), None);
        assert_eq!(*calls.lock(), vec![(true, false)]);
    }

    #[test]
    fn test_drop_finalizes_without_information() {
        let (cleanup, calls) = recording();
        drop(cleanup);
        assert_eq!(*calls.lock(), vec![(false, false)]);
    }
}
