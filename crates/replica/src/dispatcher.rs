//! Batch dispatcher - routes a batch to its execution path
//!
//! Every batch addressed to the range enters through [`Replica::send`]. The
//! dispatcher records load, validates the batch, applies backpressure and
//! testing filters, and then picks exactly one path:
//!
//! - admin batches go to the admin executor
//! - batches with writes go through the read-write path
//! - batches with only reads go through the read-only path

use crate::context::Context;
use crate::error::fatal;
use crate::evaluator::ExecutionPath;
use crate::replica::Replica;
use crate::strip::maybe_strip_in_flight_writes;
use kvrange_protocol::{BatchRequest, BatchResponse, Error, RangeId, ReadConsistency, Result};
use std::borrow::Cow;
use std::sync::Arc;

impl Replica {
    /// Execute a batch against the range.
    pub async fn send(&self, ctx: &Context, ba: BatchRequest) -> Result<BatchResponse> {
        self.send_with_range_id(ctx, self.range_id, ba).await
    }

    /// Execute a batch, tagging logs with `range_id`.
    pub async fn send_with_range_id(
        &self,
        ctx: &Context,
        range_id: RangeId,
        mut ba: BatchRequest,
    ) -> Result<BatchResponse> {
        if !ba.header.gateway_node_id.is_zero() {
            self.leaseholder_stats.record(ba.header.gateway_node_id);
        }

        // Decided before anything else can change the batch.
        let is_read_only = ba.is_read_only();
        let use_write_path = !is_read_only && ba.is_write();

        check_batch_request(&ba, is_read_only)?;
        self.observe_batch_timestamp(&mut ba);

        self.maybe_backpressure_batch(ctx, &ba).await?;

        let stripped = match maybe_strip_in_flight_writes(&ba)? {
            Cow::Borrowed(_) => None,
            Cow::Owned(stripped) => Some(stripped),
        };
        let ba = stripped.unwrap_or(ba);

        if let Some(filter) = &self.knobs.request_filter
            && let Some(err) = filter(&ba)
        {
            return Err(err);
        }

        tracing::trace!("{} executing {}", range_id, ba);
        let result = if ba.is_admin() {
            self.execute_admin_batch(ctx, &ba).await
        } else if use_write_path {
            self.execute_batch_with_concurrency_retries(ctx, &ba, ExecutionPath::ReadWrite)
                .await
        } else if is_read_only {
            self.execute_batch_with_concurrency_retries(ctx, &ba, ExecutionPath::ReadOnly)
                .await
        } else if ba.requests.is_empty() {
            // Empty batches are rejected by the transport long before they
            // get here.
            fatal("empty batch")
        } else {
            fatal(format!("don't know how to handle command {}", ba))
        };

        match result {
            Ok(br) => {
                if let Some(filter) = &self.knobs.response_filter
                    && let Some(err) = filter(&ba, &br)
                {
                    return Err(err);
                }
                Ok(br)
            }
            Err(err) => {
                tracing::trace!("{} send got error: {}", range_id, err);
                Err(err)
            }
        }
    }

    /// Advance the clock to the batch timestamp and record this node's clock
    /// reading on the batch's transaction.
    fn observe_batch_timestamp(&self, ba: &mut BatchRequest) {
        let now = self.clock.update(ba.header.timestamp);
        let node_id = ba.header.replica.node_id;
        if let Some(txn) = ba.header.txn.as_mut()
            && txn.observed_timestamp(node_id).is_none()
        {
            Arc::make_mut(txn).update_observed_timestamp(node_id, now);
        }
    }
}

/// Reject malformed batches before they touch any range state.
pub fn check_batch_request(ba: &BatchRequest, is_read_only: bool) -> Result<()> {
    if ba.header.timestamp.is_empty() {
        return Err(Error::message("timestamp must be set"));
    }
    if ba.is_write() && ba.is_mixed() {
        return Err(Error::message(format!(
            "cannot mix reads and writes in one batch: {}",
            ba
        )));
    }
    if ba.header.read_consistency != ReadConsistency::Consistent {
        if !is_read_only {
            return Err(Error::message(format!(
                "{:?} mode is only available to reads",
                ba.header.read_consistency
            )));
        }
        if ba.txn().is_some() {
            return Err(Error::message(format!(
                "cannot allow {:?} reads within a transaction",
                ba.header.read_consistency
            )));
        }
    }
    Ok(())
}
