//! Recovery of transactions stuck in the staging state

use crate::context::Context;
use async_trait::async_trait;
use kvrange_protocol::{IndeterminateCommitError, Result, Transaction};

/// Decides the outcome of a staging transaction whose coordinator may be gone.
///
/// A staging transaction is committed if all of its in-flight writes
/// succeeded. Recovery checks them and moves the record to committed or
/// aborted, after which the conflicting request can be retried.
#[async_trait]
pub trait CommitRecovery: Send + Sync {
    /// Returns the finalized record.
    async fn resolve_indeterminate_commit(
        &self,
        ctx: &Context,
        conflict: &IndeterminateCommitError,
    ) -> Result<Transaction>;
}
