//! Lease checks and acquisition
//!
//! Batches that need the lease either find a valid lease held by this replica,
//! acquire one when the previous lease expired, or are redirected with a
//! not-leaseholder error.

use crate::context::Context;
use crate::replica::Replica;
use async_trait::async_trait;
use kvrange_hlc::HlcTimestamp;
use kvrange_protocol::{
    BatchRequest, Error, ErrorDetail, Lease, LeaseState, LeaseStatus, NotLeaseHolderError,
    RangeDescriptor, ReplicaDescriptor, Result,
};
use std::sync::Arc;

/// Requests a lease for a replica through replication
#[async_trait]
pub trait LeaseRequester: Send + Sync {
    async fn request_lease(
        &self,
        ctx: &Context,
        desc: &RangeDescriptor,
        replica: ReplicaDescriptor,
        now: HlcTimestamp,
    ) -> Result<Lease>;
}

impl Replica {
    /// Judge the current lease at `now`.
    pub fn lease_status(&self, now: HlcTimestamp) -> LeaseStatus {
        let lease = self.lease();
        let state = if now < lease.expiration {
            LeaseState::Valid
        } else {
            LeaseState::Expired
        };
        LeaseStatus {
            state,
            lease,
            timestamp: now,
        }
    }

    /// Return a valid lease held by this replica, acquiring one if the
    /// current lease expired. A valid lease held elsewhere redirects the
    /// caller.
    pub async fn redirect_on_or_acquire_lease(&self, ctx: &Context) -> Result<LeaseStatus> {
        let now = self.clock.now();
        let status = self.lease_status(now);
        if status.is_valid() {
            if status.lease.owned_by(self.replica.replica_id) {
                return Ok(status);
            }
            return Err(NotLeaseHolderError {
                replica: self.replica,
                range_id: self.range_id,
                lease: Some(status.lease),
            }
            .into());
        }

        tracing::debug!(
            "{} requesting lease; previous lease expired at {}",
            self.range_id,
            status.lease.expiration
        );
        let desc = self.desc();
        let lease = self
            .services
            .lease_requester
            .request_lease(ctx, &desc, self.replica, now)
            .await?;
        if !lease.owned_by(self.replica.replica_id) {
            return Err(NotLeaseHolderError {
                replica: self.replica,
                range_id: self.range_id,
                lease: Some(lease),
            }
            .into());
        }
        self.set_lease(lease);
        Ok(self.lease_status(self.clock.now()))
    }

    /// Fail batches that must not run on this replica: the replica was
    /// removed, the batch addresses keys outside the range, or it reads below
    /// the GC threshold.
    pub fn check_execution_can_proceed(&self, ba: &BatchRequest) -> Result<()> {
        if self.is_destroyed() {
            return Err(ErrorDetail::RangeNotFound(self.range_id).into());
        }

        let desc = self.desc.read();
        for req in &ba.requests {
            let span = req.span();
            if span.key.is_local() {
                continue;
            }
            if !desc.contains_span(&span) {
                return Err(Error::new(ErrorDetail::RangeKeyMismatch {
                    start: span.key.clone(),
                    end: span.exclusive_end(),
                    desc: desc.clone(),
                }));
            }
        }
        drop(desc);

        let threshold = self.gc_threshold();
        if !threshold.is_empty() && ba.header.timestamp <= threshold {
            return Err(Error::new(ErrorDetail::BatchTimestampBeforeGc {
                timestamp: ba.header.timestamp,
                threshold,
            }));
        }
        Ok(())
    }
}

/// Narrow the uncertainty window of a transactional batch.
///
/// A clock reading the transaction took on this node bounds the timestamps of
/// values it can be uncertain about, except those written under a lease that
/// started later. The transaction is copied before it is changed.
pub fn limit_txn_max_timestamp(ba: &mut BatchRequest, status: &LeaseStatus) {
    let node_id = ba.header.replica.node_id;
    let Some(txn) = ba.header.txn.as_mut() else {
        return;
    };
    let Some(mut observed) = txn.observed_timestamp(node_id) else {
        return;
    };
    // Values written by an earlier leaseholder may be above the reading.
    if status.is_valid() {
        observed.forward(status.lease.start);
    }
    if observed < txn.max_timestamp {
        tracing::trace!(
            "limiting uncertainty of {} from {} to {}",
            txn.id().short(),
            txn.max_timestamp,
            observed
        );
        Arc::make_mut(txn).max_timestamp = observed;
    }
}
