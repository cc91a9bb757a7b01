//! Write backpressure on oversized ranges
//!
//! A range that grows far past its split size is most likely failing to
//! split. Writes that would grow it further wait until its size drops.

use crate::context::Context;
use crate::replica::Replica;
use kvrange_protocol::{BatchRequest, Error, NodeUnavailableError, Result};

/// Whether any request of the batch is subject to backpressure.
///
/// Transactions that already hold locks are let through: blocking them could
/// keep the range from splitting at all.
pub fn can_backpressure_batch(ba: &BatchRequest) -> bool {
    if let Some(txn) = ba.txn()
        && !txn.lock_spans.is_empty()
    {
        return false;
    }
    ba.requests.iter().any(|r| r.method().is_backpressurable())
}

impl Replica {
    /// True while the range is larger than its split size times the
    /// configured multiplier.
    pub fn should_backpressure_writes(&self) -> bool {
        let multiplier = self.config.backpressure_range_size_multiplier;
        if multiplier <= 0.0 {
            return false;
        }
        let limit = self.config.range_max_bytes as f64 * multiplier;
        self.range_bytes() as f64 > limit
    }

    /// Wait until the range is small enough to accept the batch's writes.
    pub(crate) async fn maybe_backpressure_batch(&self, ctx: &Context, ba: &BatchRequest) -> Result<()> {
        if !can_backpressure_batch(ba) {
            return Ok(());
        }
        loop {
            // Registered before the size check so a shrink in between is seen.
            let size_reduced = self.size_reduced.notified();
            if !self.should_backpressure_writes() {
                return Ok(());
            }
            tracing::debug!(
                "{} backpressuring {}: range size {} over limit",
                self.range_id,
                ba,
                self.range_bytes()
            );
            tokio::select! {
                _ = size_reduced => {}
                cause = ctx.done() => {
                    return Err(Error::canceled("while applying backpressure", cause));
                }
                _ = self.stopper.should_quiesce() => {
                    return Err(NodeUnavailableError.into());
                }
            }
        }
    }
}
