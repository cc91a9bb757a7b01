//! Transaction wait queue
//!
//! Pushers that cannot push a transaction right away park here until the
//! pushee's record changes. The range's conflict retry loop enqueues pushees
//! after a failed push and waits here before the next attempt, so the retry
//! does not spin against the same record.
//!
//! A parked pusher is released when the pushee's record is updated, when the
//! queue is cleared, or after a recheck interval so the push is evaluated
//! again against a pushee that may have expired. Pushers that wait on each
//! other form a cycle; the higher-priority side of each cycle stops waiting.

use crate::context::Context;
use async_trait::async_trait;
use kvrange_protocol::{
    Error, PushTxnRequest, PushTxnType, QueryTxnRequest, Result, Transaction, TransactionId,
    TxnMeta,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::watch;

/// How long a pusher waits before evaluating its push again.
pub const DEFAULT_PUSHEE_RECHECK_INTERVAL: Duration = Duration::from_secs(1);

/// Parking spot for pushers of blocked transactions
#[async_trait]
pub trait TxnWaitQueue: Send + Sync {
    /// Accept new entries. Called when the replica acquires the lease.
    fn enable(&self);

    /// Drop every entry and release all waiters. Called when the replica
    /// loses the lease.
    fn clear(&self);

    /// Track a transaction so later pushers can wait on it.
    fn enqueue(&self, txn: &Transaction);

    /// Publish a new version of a transaction's record to its waiters.
    fn update_txn(&self, txn: &Transaction);

    /// Wait until the pushee of `req` changes enough to satisfy the push.
    ///
    /// Returns the updated pushee if the push is satisfied, or `None` when
    /// the caller should go ahead and evaluate the push itself.
    async fn maybe_wait_for_push(
        &self,
        ctx: &Context,
        req: &PushTxnRequest,
    ) -> Result<Option<Transaction>>;

    /// Wait for the queried transaction to change when the query asks for it.
    async fn maybe_wait_for_query(&self, ctx: &Context, req: &QueryTxnRequest) -> Result<()>;
}

/// Whether a push can be evaluated without waiting in the queue.
///
/// Forced pushes and touches never wait. Otherwise a pusher with a higher
/// priority skips the queue only if one side sits at a priority extreme.
pub fn should_push_immediately(req: &PushTxnRequest) -> bool {
    if req.force {
        return true;
    }
    if !matches!(req.push_type, PushTxnType::Abort | PushTxnType::Timestamp) {
        return true;
    }
    let pusher = req.pusher_txn.meta.priority;
    let pushee = req.pushee_txn.priority;
    pusher > pushee && (pusher == TxnMeta::MAX_PRIORITY || pushee == TxnMeta::MIN_PRIORITY)
}

fn push_satisfied(pushee: &Transaction, req: &PushTxnRequest) -> bool {
    if pushee.status.is_finalized() {
        return true;
    }
    req.push_type == PushTxnType::Timestamp && pushee.write_timestamp() >= req.push_to
}

struct PendingTxn {
    /// Latest known record, published to waiters
    updates: watch::Sender<Transaction>,
}

struct Queue {
    enabled: bool,
    txns: HashMap<TransactionId, PendingTxn>,
    /// Parked pushers and the pushee each one waits on
    waiting: HashMap<TransactionId, TransactionId>,
}

/// In-memory wait queue for one range
pub struct WaitQueue {
    queue: Mutex<Queue>,
    /// Bumped whenever the set of parked pushers changes
    waiters_changed: watch::Sender<u64>,
    recheck_interval: Duration,
}

impl Default for WaitQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl WaitQueue {
    /// An enabled, empty queue.
    pub fn new() -> Self {
        Self::with_recheck_interval(DEFAULT_PUSHEE_RECHECK_INTERVAL)
    }

    pub fn with_recheck_interval(recheck_interval: Duration) -> Self {
        let (waiters_changed, _) = watch::channel(0);
        Self {
            queue: Mutex::new(Queue {
                enabled: true,
                txns: HashMap::new(),
                waiting: HashMap::new(),
            }),
            waiters_changed,
            recheck_interval,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.queue.lock().enabled
    }

    pub fn is_enqueued(&self, id: TransactionId) -> bool {
        self.queue.lock().txns.contains_key(&id)
    }

    /// Whether `pusher` is parked waiting on some pushee.
    pub fn is_waiting(&self, pusher: TransactionId) -> bool {
        self.queue.lock().waiting.contains_key(&pusher)
    }

    pub fn len(&self) -> usize {
        self.queue.lock().txns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn subscribe(&self, id: &TransactionId) -> Option<watch::Receiver<Transaction>> {
        let queue = self.queue.lock();
        if !queue.enabled {
            return None;
        }
        queue.txns.get(id).map(|p| p.updates.subscribe())
    }

    fn park(&self, pusher: TransactionId, pushee: TransactionId) -> ParkedPusher<'_> {
        self.queue.lock().waiting.insert(pusher, pushee);
        self.waiters_changed.send_modify(|v| *v += 1);
        ParkedPusher {
            queue: self,
            pusher,
            pushee,
        }
    }

    /// Whether the pusher of `req` closes a cycle of waiting pushers and is
    /// the side that should stop waiting.
    fn breaks_cycle(&self, req: &PushTxnRequest) -> bool {
        let queue = self.queue.lock();
        let pusher = req.pusher_txn.id();
        let mut next = req.pushee_txn.id;
        for _ in 0..queue.waiting.len() {
            match queue.waiting.get(&next) {
                Some(&waits_on) if waits_on == pusher => {
                    return (req.pusher_txn.meta.priority, pusher)
                        > (req.pushee_txn.priority, req.pushee_txn.id);
                }
                Some(&waits_on) => next = waits_on,
                None => return false,
            }
        }
        false
    }
}

/// Registration of a parked pusher, removed when the wait ends
struct ParkedPusher<'a> {
    queue: &'a WaitQueue,
    pusher: TransactionId,
    pushee: TransactionId,
}

impl Drop for ParkedPusher<'_> {
    fn drop(&mut self) {
        let mut queue = self.queue.queue.lock();
        if queue.waiting.get(&self.pusher) == Some(&self.pushee) {
            queue.waiting.remove(&self.pusher);
        }
        drop(queue);
        self.queue.waiters_changed.send_modify(|v| *v += 1);
    }
}

#[async_trait]
impl TxnWaitQueue for WaitQueue {
    fn enable(&self) {
        self.queue.lock().enabled = true;
    }

    fn clear(&self) {
        let mut queue = self.queue.lock();
        queue.enabled = false;
        let released = queue.txns.len();
        queue.txns.clear();
        if released > 0 {
            tracing::debug!("cleared {} pending txns from wait queue", released);
        }
    }

    fn enqueue(&self, txn: &Transaction) {
        let mut queue = self.queue.lock();
        if !queue.enabled {
            return;
        }
        queue.txns.entry(txn.id()).or_insert_with(|| {
            tracing::trace!("enqueued txn {}", txn.id().short());
            let (updates, _) = watch::channel(txn.clone());
            PendingTxn { updates }
        });
    }

    /// Finalized transactions leave the queue.
    fn update_txn(&self, txn: &Transaction) {
        let mut queue = self.queue.lock();
        let Some(pending) = queue.txns.get(&txn.id()) else {
            return;
        };
        pending.updates.send_replace(txn.clone());
        if txn.status.is_finalized() {
            tracing::debug!("txn {} finalized as {:?}", txn.id().short(), txn.status);
            queue.txns.remove(&txn.id());
        }
    }

    async fn maybe_wait_for_push(
        &self,
        ctx: &Context,
        req: &PushTxnRequest,
    ) -> Result<Option<Transaction>> {
        if should_push_immediately(req) {
            return Ok(None);
        }
        let Some(mut updates) = self.subscribe(&req.pushee_txn.id) else {
            return Ok(None);
        };

        let current = updates.borrow_and_update().clone();
        if push_satisfied(&current, req) {
            return Ok(Some(current));
        }

        let pusher = req.pusher_txn.id();
        let mut waiters_changed = self.waiters_changed.subscribe();
        let _parked = self.park(pusher, req.pushee_txn.id);
        tracing::trace!(
            "{} waiting to push {}",
            pusher.short(),
            req.pushee_txn.id.short()
        );

        let recheck = tokio::time::sleep(self.recheck_interval);
        tokio::pin!(recheck);
        loop {
            if self.breaks_cycle(req) {
                tracing::debug!(
                    "{} breaking wait cycle with {}",
                    pusher.short(),
                    req.pushee_txn.id.short()
                );
                return Ok(None);
            }
            tokio::select! {
                changed = updates.changed() => {
                    if changed.is_err() {
                        // Pushee left the queue without a final record.
                        return Ok(None);
                    }
                    let pushee = updates.borrow_and_update().clone();
                    if push_satisfied(&pushee, req) {
                        return Ok(Some(pushee));
                    }
                }
                _ = waiters_changed.changed() => {}
                _ = &mut recheck => {
                    tracing::trace!(
                        "{} rechecking push of {}",
                        pusher.short(),
                        req.pushee_txn.id.short()
                    );
                    return Ok(None);
                }
                cause = ctx.done() => {
                    return Err(Error::canceled("while waiting in txn wait queue", cause));
                }
            }
        }
    }

    async fn maybe_wait_for_query(&self, ctx: &Context, req: &QueryTxnRequest) -> Result<()> {
        if !req.wait_for_update {
            return Ok(());
        }
        let Some(mut updates) = self.subscribe(&req.txn.id) else {
            return Ok(());
        };
        tokio::select! {
            _ = updates.changed() => Ok(()),
            _ = tokio::time::sleep(self.recheck_interval) => Ok(()),
            cause = ctx.done() => Err(Error::canceled("while waiting in txn wait queue", cause)),
        }
    }
}
