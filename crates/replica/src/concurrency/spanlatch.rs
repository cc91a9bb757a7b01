//! Span latches
//!
//! Latches serialize batches whose declared spans conflict. Acquisition is
//! first-come first-served: a batch waits for every conflicting batch that
//! arrived before it and ignores those that arrive later.

use crate::context::Context;
use crate::spanset::SpanSet;
use async_trait::async_trait;
use kvrange_protocol::{Error, Result};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;

type ReleaseFn = Box<dyn FnOnce() + Send + Sync>;

/// Proof that a batch holds latches over its span set.
///
/// Latches are released by [`LatchGuard::release`] or, failing that, when the
/// guard is dropped. Either way they are released exactly once.
pub struct LatchGuard {
    id: u64,
    spans: Arc<SpanSet>,
    release: Option<ReleaseFn>,
}

impl LatchGuard {
    pub fn new(id: u64, spans: Arc<SpanSet>, release: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            id,
            spans,
            release: Some(Box::new(release)),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn spans(&self) -> &SpanSet {
        &self.spans
    }

    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl Drop for LatchGuard {
    fn drop(&mut self) {
        self.release_inner();
    }
}

impl fmt::Debug for LatchGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LatchGuard")
            .field("id", &self.id)
            .field("spans", &self.spans.len())
            .finish()
    }
}

/// Grants latches over span sets
#[async_trait]
pub trait LatchManager: Send + Sync {
    /// Wait until no earlier conflicting holder remains, then hold latches
    /// over `spans`.
    async fn acquire(&self, ctx: &Context, spans: Arc<SpanSet>) -> Result<LatchGuard>;

    fn release(&self, guard: LatchGuard) {
        guard.release();
    }
}

struct Holder {
    spans: Arc<SpanSet>,
    /// Dropped on release, which wakes every waiter subscribed to it.
    done: watch::Sender<()>,
}

#[derive(Default)]
struct Latches {
    next_id: u64,
    /// Holders and waiters keyed by arrival order
    holders: BTreeMap<u64, Holder>,
}

/// In-memory latch manager
#[derive(Clone, Default)]
pub struct SpanLatchManager {
    latches: Arc<Mutex<Latches>>,
}

impl SpanLatchManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of batches holding or waiting for latches.
    pub fn len(&self) -> usize {
        self.latches.lock().holders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl LatchManager for SpanLatchManager {
    async fn acquire(&self, ctx: &Context, spans: Arc<SpanSet>) -> Result<LatchGuard> {
        let (id, prereqs) = {
            let mut latches = self.latches.lock();
            let id = latches.next_id;
            latches.next_id += 1;

            let prereqs: Vec<watch::Receiver<()>> = latches
                .holders
                .values()
                .filter(|h| h.spans.conflicts_with(&spans))
                .map(|h| h.done.subscribe())
                .collect();

            let (done, _) = watch::channel(());
            latches.holders.insert(
                id,
                Holder {
                    spans: spans.clone(),
                    done,
                },
            );
            (id, prereqs)
        };

        // Built before waiting so that an abandoned wait still removes the
        // entry and unblocks later arrivals.
        let latches = self.latches.clone();
        let guard = LatchGuard::new(id, spans, move || {
            latches.lock().holders.remove(&id);
        });

        if !prereqs.is_empty() {
            tracing::trace!("latch {} waiting on {} earlier holders", id, prereqs.len());
        }
        for mut prereq in prereqs {
            tokio::select! {
                _ = prereq.changed() => {}
                cause = ctx.done() => {
                    return Err(Error::canceled("while acquiring latches", cause));
                }
            }
        }
        Ok(guard)
    }
}
