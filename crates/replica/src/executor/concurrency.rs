//! Latch, evaluate, and retry on conflicts
//!
//! Read-write and read-only batches run through the same loop. Each attempt
//! takes latches over the batch's spans and hands the batch to the evaluator.
//! If evaluation fails with a concurrency conflict the matching handler
//! resolves it and the loop tries again. Any other error ends the loop.
//!
//! At most one intent cleanup handle is live at a time. It is finalized when
//! the next write-intent conflict replaces it, and otherwise once the loop
//! exits, including when the caller abandons the request.

use crate::collector::collect_spans;
use crate::concurrency::{IntentCleanup, should_push_immediately};
use crate::context::Context;
use crate::error::fatal;
use crate::evaluator::ExecutionPath;
use crate::replica::Replica;
use crate::spanset::SpanSet;
use kvrange_protocol::{
    BatchRequest, BatchResponse, Error, ErrorDetail, IndeterminateCommitError,
    MergeInProgressError, NodeUnavailableError, PushTxnType, Request, Response, Result,
    TransactionPushError, WriteIntentError,
};
use std::sync::Arc;
use std::time::Instant;

/// Concurrency conflicts the retry loop knows how to resolve
#[derive(Debug, Clone, Copy)]
pub enum Conflict<'a> {
    WriteIntent(&'a WriteIntentError),
    TransactionPush(&'a TransactionPushError),
    IndeterminateCommit(&'a IndeterminateCommitError),
    MergeInProgress(&'a MergeInProgressError),
}

impl<'a> Conflict<'a> {
    /// Classify an evaluation error. `None` for errors that end the loop.
    pub fn classify(err: &'a Error) -> Option<Self> {
        match &err.detail {
            ErrorDetail::WriteIntent(e) => Some(Conflict::WriteIntent(e)),
            ErrorDetail::TransactionPush(e) => Some(Conflict::TransactionPush(e)),
            ErrorDetail::IndeterminateCommit(e) => Some(Conflict::IndeterminateCommit(e)),
            ErrorDetail::MergeInProgress(e) => Some(Conflict::MergeInProgress(e)),
            _ => None,
        }
    }
}

impl Replica {
    /// Run a read-write or read-only batch to completion, resolving
    /// concurrency conflicts along the way.
    pub(crate) async fn execute_batch_with_concurrency_retries(
        &self,
        ctx: &Context,
        ba: &BatchRequest,
        path: ExecutionPath,
    ) -> Result<BatchResponse> {
        let desc = self.desc();
        let spans = Arc::new(collect_spans(&desc, ba)?);
        self.record_batch_for_load_based_splitting(ba, &spans);

        // Dropped with this future if the caller gives up, which finalizes it
        // with no information.
        let mut cleanup: Option<IntentCleanup> = None;
        let result = self.retry_loop(ctx, ba, path, &spans, &mut cleanup).await;

        if let Some(cleanup) = cleanup.take() {
            match &result {
                Ok(br) if ba.txn().is_some() && !ba.is_read_only() => {
                    match br.txn.as_ref().or(ba.txn()) {
                        Some(txn) if !txn.status.is_finalized() => {
                            // The batch may have left intents on the keys it
                            // waited for.
                            cleanup.finalize(None, Some(&txn.meta));
                        }
                        _ => cleanup.finalize(None, None),
                    }
                }
                _ => cleanup.finalize(None, None),
            }
        }
        result
    }

    async fn retry_loop(
        &self,
        ctx: &Context,
        ba: &BatchRequest,
        path: ExecutionPath,
        spans: &Arc<SpanSet>,
        cleanup: &mut Option<IntentCleanup>,
    ) -> Result<BatchResponse> {
        loop {
            if let Some(cause) = ctx.err() {
                return Err(Error::canceled("during Replica.Send", cause));
            }

            if let Some(br) = self.maybe_wait_for_pushee(ctx, ba).await? {
                return Ok(br);
            }

            let guard = self.services.latches.acquire(ctx, spans.clone()).await?;
            let evaluator = &self.services.evaluator;
            let result = match path {
                ExecutionPath::ReadWrite => evaluator.execute_write_batch(ctx, ba, spans, guard).await,
                ExecutionPath::ReadOnly => {
                    evaluator.execute_read_only_batch(ctx, ba, spans, guard).await
                }
            };
            let err = match result {
                Ok(br) => {
                    self.publish_txn_updates(&br);
                    return Ok(br);
                }
                Err(err) => err,
            };

            match Conflict::classify(&err) {
                Some(Conflict::WriteIntent(conflict)) => {
                    let previous = cleanup.take();
                    let (next, res) = self
                        .handle_write_intent_error(ctx, ba, &err, conflict, previous)
                        .await;
                    *cleanup = next;
                    res?;
                }
                Some(Conflict::TransactionPush(conflict)) => {
                    self.handle_transaction_push_error(ba, &err, conflict)?;
                }
                Some(Conflict::IndeterminateCommit(conflict)) => {
                    self.handle_indeterminate_commit_error(ctx, &err, conflict)
                        .await?;
                }
                Some(Conflict::MergeInProgress(_)) => {
                    self.handle_merge_in_progress_error(ctx, &err).await?;
                }
                None => return Err(err),
            }
            tracing::trace!("{} retrying {} after {}", self.range_id, ba, err);
        }
    }

    /// A single push or query of a transaction waits in the wait queue before
    /// evaluating. The queue may answer a push itself.
    async fn maybe_wait_for_pushee(
        &self,
        ctx: &Context,
        ba: &BatchRequest,
    ) -> Result<Option<BatchResponse>> {
        let queue = &self.services.txn_wait_queue;
        match ba.requests.as_slice() {
            [Request::PushTxn(push)] => {
                let Some(pushee_txn) = queue.maybe_wait_for_push(ctx, push).await? else {
                    return Ok(None);
                };
                let mut br = BatchResponse::default();
                br.add(Response::PushTxn { pushee_txn });
                Ok(Some(br))
            }
            [Request::QueryTxn(query)] => {
                queue.maybe_wait_for_query(ctx, query).await?;
                Ok(None)
            }
            _ => Ok(None),
        }
    }

    /// Hand transaction records changed by the batch to pushers waiting on
    /// them.
    fn publish_txn_updates(&self, br: &BatchResponse) {
        let queue = &self.services.txn_wait_queue;
        for resp in &br.responses {
            match resp {
                Response::PushTxn { pushee_txn } => queue.update_txn(pushee_txn),
                other => {
                    if let Some(txn) = other.txn() {
                        queue.update_txn(txn);
                    }
                }
            }
        }
    }

    /// Push the writers of the conflicting intents.
    ///
    /// Finalizes `previous` with the new conflict before pushing and returns
    /// the cleanup handle of this resolution. An ambiguous failure leaves the
    /// outcome to the retry.
    async fn handle_write_intent_error(
        &self,
        ctx: &Context,
        ba: &BatchRequest,
        err: &Error,
        conflict: &WriteIntentError,
        previous: Option<IntentCleanup>,
    ) -> (Option<IntentCleanup>, Result<()>) {
        if self.knobs.dont_push_on_write_intent_error {
            return (previous, Err(err.clone()));
        }

        let push_type = if ba.is_write() {
            PushTxnType::Abort
        } else {
            PushTxnType::Timestamp
        };
        let Some(args) = err
            .index
            .and_then(|i| ba.requests.get(i))
            .or_else(|| ba.requests.first())
        else {
            return (previous, Err(err.clone()));
        };

        // Push at the clock reading this node gave the transaction, so the
        // pushee is moved past anything the pusher could have observed.
        let mut header = ba.header.clone();
        if let Some(txn) = header.txn.as_mut() {
            let node_id = ba.header.replica.node_id;
            let Some(observed) = txn.observed_timestamp(node_id) else {
                fatal(format!(
                    "missing observed timestamp for {} in txn {}",
                    node_id,
                    txn.id()
                ));
            };
            header.timestamp.forward(observed);
            *txn = Arc::new((**txn).clone());
        }

        if let Some(previous) = previous {
            previous.finalize(Some(conflict), None);
        }

        let resolution = self
            .services
            .intent_resolver
            .process_write_intent_error(ctx, conflict, args, &header, push_type)
            .await;
        match resolution.result {
            Ok(()) => (resolution.cleanup, Ok(())),
            Err(e) if e.is_ambiguous() => {
                tracing::warn!("{} ambiguous intent resolution: {}", self.range_id, e);
                (resolution.cleanup, Ok(()))
            }
            Err(e) => (resolution.cleanup, Err(e.with_index(err.index))),
        }
    }

    /// Park the pushee in the wait queue so the retry waits for it to change.
    /// Pushes that would not wait anyway fail right away.
    fn handle_transaction_push_error(
        &self,
        ba: &BatchRequest,
        err: &Error,
        conflict: &TransactionPushError,
    ) -> Result<()> {
        let mut dont_retry = self.knobs.dont_retry_push_txn_failures;
        if !dont_retry && let [Request::PushTxn(push)] = ba.requests.as_slice() {
            dont_retry = should_push_immediately(push);
        }
        if dont_retry {
            return Err(err.clone());
        }
        self.services.txn_wait_queue.enqueue(&conflict.pushee_txn);
        Ok(())
    }

    /// Decide the outcome of a staging transaction before retrying.
    async fn handle_indeterminate_commit_error(
        &self,
        ctx: &Context,
        err: &Error,
        conflict: &IndeterminateCommitError,
    ) -> Result<()> {
        if self.knobs.dont_recover_indeterminate_commits {
            return Err(err.clone());
        }
        match self
            .services
            .commit_recovery
            .resolve_indeterminate_commit(ctx, conflict)
            .await
        {
            Ok(txn) => {
                tracing::debug!(
                    "{} recovered txn {} as {:?}",
                    self.range_id,
                    txn.id().short(),
                    txn.status
                );
                Ok(())
            }
            Err(e) if e.is_ambiguous() => {
                tracing::warn!("{} ambiguous commit recovery: {}", self.range_id, e);
                Ok(())
            }
            Err(e) => Err(e.with_index(err.index)),
        }
    }

    /// Wait for an in-progress merge to complete.
    async fn handle_merge_in_progress_error(&self, ctx: &Context, err: &Error) -> Result<()> {
        let Some(merge_complete) = self.merge.merge_complete_ch() else {
            // Merge already completed.
            return Ok(());
        };
        tracing::trace!("{} waiting on in-progress merge after {}", self.range_id, err);
        tokio::select! {
            _ = merge_complete.wait() => Ok(()),
            cause = ctx.done() => Err(Error::canceled("during merge", cause)),
            _ = self.stopper.should_quiesce() => Err(NodeUnavailableError.into()),
        }
    }

    fn record_batch_for_load_based_splitting(&self, ba: &BatchRequest, spans: &SpanSet) {
        if self
            .load_split
            .record(Instant::now(), ba.requests.len(), spans)
        {
            tracing::debug!("{} has a load-based split key available", self.range_id);
        }
    }
}
