//! Administrative batch executor
//!
//! Admin commands (splits, merges, lease transfers, membership changes and
//! the like) bypass latching and replication of the batch itself. They need
//! the lease, run one at a time, and are handed to an [`AdminHandler`].

use crate::context::Context;
use crate::replica::Replica;
use async_trait::async_trait;
use kvrange_protocol::{
    AdminChangeReplicasRequest, AdminMergeRequest, AdminRelocateRangeRequest,
    AdminScatterRequest, AdminSplitRequest, AdminTransferLeaseRequest, AdminUnsplitRequest,
    BatchRequest, BatchResponse, CheckConsistencyRequest, ConsistencyCheckResult, Error,
    ImportRequest, RangeDescriptor, Request, Response, Result, Span,
};

/// Reason recorded with splits requested through the admin path.
pub const MANUAL_SPLIT_REASON: &str = "manual";

/// Carries out administrative commands against the range
#[async_trait]
pub trait AdminHandler: Send + Sync {
    async fn admin_split(
        &self,
        ctx: &Context,
        desc: &RangeDescriptor,
        req: &AdminSplitRequest,
        reason: &str,
    ) -> Result<()>;

    async fn admin_unsplit(
        &self,
        ctx: &Context,
        desc: &RangeDescriptor,
        req: &AdminUnsplitRequest,
    ) -> Result<()>;

    async fn admin_merge(
        &self,
        ctx: &Context,
        desc: &RangeDescriptor,
        req: &AdminMergeRequest,
    ) -> Result<()>;

    async fn admin_transfer_lease(
        &self,
        ctx: &Context,
        desc: &RangeDescriptor,
        req: &AdminTransferLeaseRequest,
    ) -> Result<()>;

    /// Returns the descriptor after the change, if it applied.
    async fn admin_change_replicas(
        &self,
        ctx: &Context,
        desc: &RangeDescriptor,
        req: &AdminChangeReplicasRequest,
    ) -> Result<Option<RangeDescriptor>>;

    async fn admin_relocate_range(
        &self,
        ctx: &Context,
        desc: &RangeDescriptor,
        req: &AdminRelocateRangeRequest,
    ) -> Result<()>;

    async fn check_consistency(
        &self,
        ctx: &Context,
        desc: &RangeDescriptor,
        req: &CheckConsistencyRequest,
    ) -> Result<Vec<ConsistencyCheckResult>>;

    /// Returns the number of rows written.
    async fn import(
        &self,
        ctx: &Context,
        desc: &RangeDescriptor,
        req: &ImportRequest,
    ) -> Result<u64>;

    /// Returns the spans that were scattered.
    async fn admin_scatter(
        &self,
        ctx: &Context,
        desc: &RangeDescriptor,
        req: &AdminScatterRequest,
    ) -> Result<Vec<Span>>;
}

impl Replica {
    /// Execute a batch holding exactly one administrative command.
    ///
    /// The lease is checked (and acquired if needed) before the command runs.
    pub async fn execute_admin_batch(&self, ctx: &Context, ba: &BatchRequest) -> Result<BatchResponse> {
        let [args] = ba.requests.as_slice() else {
            return Err(Error::message("only single-element admin batches allowed"));
        };

        self.redirect_on_or_acquire_lease(ctx).await?;
        self.check_execution_can_proceed(ba)?;

        tracing::debug!("{} executing admin command {}", self.range_id, args.method());
        let desc = self.desc();
        let admin = &self.services.admin;
        let resp = match args {
            Request::AdminSplit(req) => {
                admin.admin_split(ctx, &desc, req, MANUAL_SPLIT_REASON).await?;
                Response::AdminSplit
            }
            Request::AdminUnsplit(req) => {
                admin.admin_unsplit(ctx, &desc, req).await?;
                Response::AdminUnsplit
            }
            Request::AdminMerge(req) => {
                admin.admin_merge(ctx, &desc, req).await?;
                Response::AdminMerge
            }
            Request::AdminTransferLease(req) => {
                admin.admin_transfer_lease(ctx, &desc, req).await?;
                Response::AdminTransferLease
            }
            Request::AdminChangeReplicas(req) => {
                let desc = admin.admin_change_replicas(ctx, &desc, req).await?;
                Response::AdminChangeReplicas { desc }
            }
            Request::AdminRelocateRange(req) => {
                admin.admin_relocate_range(ctx, &desc, req).await?;
                Response::AdminRelocateRange
            }
            Request::CheckConsistency(req) => {
                let results = admin.check_consistency(ctx, &desc, req).await?;
                Response::CheckConsistency { results }
            }
            Request::Import(req) => {
                let rows_written = admin.import(ctx, &desc, req).await?;
                Response::Import { rows_written }
            }
            Request::AdminScatter(req) => {
                let spans = admin.admin_scatter(ctx, &desc, req).await?;
                Response::AdminScatter { spans }
            }
            other => {
                return Err(Error::message(format!(
                    "unrecognized admin command: {}",
                    other.method()
                )));
            }
        };

        let mut br = BatchResponse::default();
        if ba.header.return_range_info {
            br.range_infos.push(self.range_info());
        }
        br.txn = resp.txn().cloned();
        br.add(resp);
        Ok(br)
    }
}
