//! Batch evaluation
//!
//! Evaluation itself lives outside the range: the range decides when a batch
//! may run and under which latches, and hands it to a [`BatchEvaluator`].
//! The evaluator owns the latch guard it is given and must release it before
//! returning.

use crate::concurrency::LatchGuard;
use crate::context::Context;
use crate::spanset::SpanSet;
use async_trait::async_trait;
use kvrange_protocol::{BatchRequest, BatchResponse, Result};

/// Which evaluator entry point a batch goes through
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionPath {
    /// Proposed through replication
    ReadWrite,
    /// Served locally by the leaseholder
    ReadOnly,
}

/// Evaluates batches once they hold their latches
#[async_trait]
pub trait BatchEvaluator: Send + Sync {
    async fn execute_write_batch(
        &self,
        ctx: &Context,
        ba: &BatchRequest,
        spans: &SpanSet,
        guard: LatchGuard,
    ) -> Result<BatchResponse>;

    async fn execute_read_only_batch(
        &self,
        ctx: &Context,
        ba: &BatchRequest,
        spans: &SpanSet,
        guard: LatchGuard,
    ) -> Result<BatchResponse>;
}
