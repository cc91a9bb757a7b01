//! The range replica and its collaborators

use crate::concurrency::{CommitRecovery, IntentResolver, LatchManager, MergeWatcher, TxnWaitQueue};
use crate::config::{ReplicaConfig, TestingKnobs};
use crate::context::Stopper;
use crate::evaluator::BatchEvaluator;
use crate::executor::AdminHandler;
use crate::lease::LeaseRequester;
use crate::stats::{LeaseholderStats, LoadSplitDecider};
use kvrange_hlc::{HlcTimestamp, SharedHlcClock};
use kvrange_protocol::{Lease, RangeDescriptor, RangeId, RangeInfo, ReplicaDescriptor};
use parking_lot::RwLock;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::Notify;

/// Capabilities a replica delegates to
#[derive(Clone)]
pub struct ReplicaServices {
    pub latches: Arc<dyn LatchManager>,
    pub txn_wait_queue: Arc<dyn TxnWaitQueue>,
    pub intent_resolver: Arc<dyn IntentResolver>,
    pub commit_recovery: Arc<dyn CommitRecovery>,
    pub lease_requester: Arc<dyn LeaseRequester>,
    pub admin: Arc<dyn AdminHandler>,
    pub evaluator: Arc<dyn BatchEvaluator>,
}

/// One replica of a range on this node
///
/// Entry point for every batch addressed to the range. See
/// [`Replica::send`].
pub struct Replica {
    pub(crate) range_id: RangeId,
    pub(crate) replica: ReplicaDescriptor,
    pub(crate) desc: RwLock<RangeDescriptor>,
    pub(crate) lease: RwLock<Lease>,
    pub(crate) gc_threshold: RwLock<HlcTimestamp>,
    pub(crate) destroyed: AtomicBool,

    /// Logical bytes stored in the range
    pub(crate) range_bytes: AtomicU64,
    /// Signaled when a split or truncation shrinks the range
    pub(crate) size_reduced: Notify,

    pub(crate) clock: SharedHlcClock,
    pub(crate) stopper: Stopper,
    pub(crate) config: ReplicaConfig,
    pub(crate) knobs: TestingKnobs,
    pub(crate) services: ReplicaServices,

    pub(crate) merge: MergeWatcher,
    pub(crate) leaseholder_stats: LeaseholderStats,
    pub(crate) load_split: LoadSplitDecider,
}

impl Replica {
    pub fn new(
        desc: RangeDescriptor,
        replica: ReplicaDescriptor,
        clock: SharedHlcClock,
        stopper: Stopper,
        config: ReplicaConfig,
        knobs: TestingKnobs,
        services: ReplicaServices,
    ) -> Self {
        let load_split = LoadSplitDecider::new(
            config.load_split_qps_threshold,
            config.load_split_sample_capacity,
        );
        tracing::debug!("initialized replica {} of {}", replica, desc.range_id);
        Self {
            range_id: desc.range_id,
            replica,
            desc: RwLock::new(desc),
            lease: RwLock::new(Lease::default()),
            gc_threshold: RwLock::new(HlcTimestamp::ZERO),
            destroyed: AtomicBool::new(false),
            range_bytes: AtomicU64::new(0),
            size_reduced: Notify::new(),
            clock,
            stopper,
            config,
            knobs,
            services,
            merge: MergeWatcher::new(),
            leaseholder_stats: LeaseholderStats::new(),
            load_split,
        }
    }

    pub fn range_id(&self) -> RangeId {
        self.range_id
    }

    pub fn replica_descriptor(&self) -> ReplicaDescriptor {
        self.replica
    }

    /// Snapshot of the current descriptor.
    pub fn desc(&self) -> RangeDescriptor {
        self.desc.read().clone()
    }

    pub fn set_desc(&self, desc: RangeDescriptor) {
        *self.desc.write() = desc;
    }

    pub fn lease(&self) -> Lease {
        self.lease.read().clone()
    }

    /// Install a new lease. Pushers only wait on the leaseholder, so the
    /// wait queue follows lease ownership.
    pub fn set_lease(&self, lease: Lease) {
        let owned = lease.owned_by(self.replica.replica_id);
        let previous = std::mem::replace(&mut *self.lease.write(), lease);
        let was_owned = previous.owned_by(self.replica.replica_id);
        if owned && !was_owned {
            self.services.txn_wait_queue.enable();
        } else if !owned && was_owned {
            tracing::debug!("{} lost lease; clearing txn wait queue", self.range_id);
            self.services.txn_wait_queue.clear();
        }
    }

    /// Descriptor and lease as attached to responses.
    pub fn range_info(&self) -> RangeInfo {
        RangeInfo {
            desc: self.desc(),
            lease: self.lease(),
        }
    }

    pub fn set_gc_threshold(&self, threshold: HlcTimestamp) {
        self.gc_threshold.write().forward(threshold);
    }

    pub fn gc_threshold(&self) -> HlcTimestamp {
        *self.gc_threshold.read()
    }

    /// Mark the replica as removed from the range. Later batches fail.
    pub fn mark_destroyed(&self) {
        self.destroyed.store(true, Ordering::SeqCst);
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    pub fn range_bytes(&self) -> u64 {
        self.range_bytes.load(Ordering::SeqCst)
    }

    pub fn set_range_bytes(&self, bytes: u64) {
        let previous = self.range_bytes.swap(bytes, Ordering::SeqCst);
        if bytes < previous {
            self.size_reduced.notify_waiters();
        }
    }

    pub fn clock(&self) -> &SharedHlcClock {
        &self.clock
    }

    pub fn stopper(&self) -> &Stopper {
        &self.stopper
    }

    pub fn config(&self) -> &ReplicaConfig {
        &self.config
    }

    pub fn merge_watcher(&self) -> &MergeWatcher {
        &self.merge
    }

    pub fn leaseholder_stats(&self) -> &LeaseholderStats {
        &self.leaseholder_stats
    }

    pub fn load_split_decider(&self) -> &LoadSplitDecider {
        &self.load_split
    }
}
