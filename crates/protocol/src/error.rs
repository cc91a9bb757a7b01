//! Errors returned to callers of the range

use crate::keys::{Key, RangeId};
use crate::range::{Lease, RangeDescriptor, ReplicaDescriptor};
use crate::txn::{Intent, Transaction};
use kvrange_hlc::HlcTimestamp;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for range operations
pub type Result<T> = std::result::Result<T, Error>;

/// Why a caller's context ended.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CancelCause {
    #[error("context canceled")]
    Canceled,
    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

/// Another transaction's uncommitted writes block the request.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("conflicting intents on {}", .intents.iter().map(|i| i.span.key.to_string()).collect::<Vec<_>>().join(", "))]
pub struct WriteIntentError {
    pub intents: Vec<Intent>,
}

/// A push or query of another transaction did not resolve it.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("failed to push {}", .pushee_txn.id().short())]
pub struct TransactionPushError {
    pub pushee_txn: Transaction,
}

/// The commit outcome of a staging transaction cannot be decided locally.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("found txn in indeterminate STAGING state {}", .staging_txn.id().short())]
pub struct IndeterminateCommitError {
    pub staging_txn: Transaction,
}

/// The range is being merged into its left neighbor.
#[derive(Error, Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[error("merge in progress")]
pub struct MergeInProgressError;

/// The outcome of an operation is unknown.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("result is ambiguous ({message})")]
pub struct AmbiguousResultError {
    pub message: String,
}

/// The node is shutting down.
#[derive(Error, Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[error("node unavailable; try another peer")]
pub struct NodeUnavailableError;

/// The request reached a replica that does not hold the lease.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{replica} not lease holder for {range_id}; current lease is {lease:?}")]
pub struct NotLeaseHolderError {
    pub replica: ReplicaDescriptor,
    pub range_id: RangeId,
    pub lease: Option<Lease>,
}

/// Structured error detail
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorDetail {
    #[error("{0}")]
    WriteIntent(WriteIntentError),

    #[error("{0}")]
    TransactionPush(TransactionPushError),

    #[error("{0}")]
    IndeterminateCommit(IndeterminateCommitError),

    #[error("{0}")]
    MergeInProgress(MergeInProgressError),

    #[error("{0}")]
    AmbiguousResult(AmbiguousResultError),

    #[error("{0}")]
    NodeUnavailable(NodeUnavailableError),

    #[error("{0}")]
    NotLeaseHolder(NotLeaseHolderError),

    #[error("{0} was not found")]
    RangeNotFound(RangeId),

    #[error("key range {start}-{end} outside of bounds of range {}", .desc.range_id)]
    RangeKeyMismatch {
        start: Key,
        end: Key,
        desc: RangeDescriptor,
    },

    #[error("batch timestamp {timestamp} must be after replica GC threshold {threshold}")]
    BatchTimestampBeforeGc {
        timestamp: HlcTimestamp,
        threshold: HlcTimestamp,
    },

    #[error("aborted {during}: {cause}")]
    Canceled { during: String, cause: CancelCause },

    #[error("{0}")]
    Generic(String),
}

/// Error returned from range operations
///
/// `index` names the request of the batch that caused the error, when known.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{detail}")]
pub struct Error {
    pub detail: ErrorDetail,
    pub index: Option<usize>,
}

impl Error {
    pub fn new(detail: ErrorDetail) -> Self {
        Self {
            detail,
            index: None,
        }
    }

    /// An unstructured error with a message.
    pub fn message(msg: impl Into<String>) -> Self {
        Self::new(ErrorDetail::Generic(msg.into()))
    }

    /// Cancellation error naming the phase that was interrupted.
    pub fn canceled(during: impl Into<String>, cause: CancelCause) -> Self {
        Self::new(ErrorDetail::Canceled {
            during: during.into(),
            cause,
        })
    }

    pub fn with_index(mut self, index: Option<usize>) -> Self {
        self.index = index;
        self
    }

    pub fn is_ambiguous(&self) -> bool {
        matches!(self.detail, ErrorDetail::AmbiguousResult(_))
    }
}

impl From<ErrorDetail> for Error {
    fn from(detail: ErrorDetail) -> Self {
        Error::new(detail)
    }
}

impl From<WriteIntentError> for Error {
    fn from(e: WriteIntentError) -> Self {
        Error::new(ErrorDetail::WriteIntent(e))
    }
}

impl From<TransactionPushError> for Error {
    fn from(e: TransactionPushError) -> Self {
        Error::new(ErrorDetail::TransactionPush(e))
    }
}

impl From<IndeterminateCommitError> for Error {
    fn from(e: IndeterminateCommitError) -> Self {
        Error::new(ErrorDetail::IndeterminateCommit(e))
    }
}

impl From<MergeInProgressError> for Error {
    fn from(e: MergeInProgressError) -> Self {
        Error::new(ErrorDetail::MergeInProgress(e))
    }
}

impl From<AmbiguousResultError> for Error {
    fn from(e: AmbiguousResultError) -> Self {
        Error::new(ErrorDetail::AmbiguousResult(e))
    }
}

impl From<NodeUnavailableError> for Error {
    fn from(e: NodeUnavailableError) -> Self {
        Error::new(ErrorDetail::NodeUnavailable(e))
    }
}

impl From<NotLeaseHolderError> for Error {
    fn from(e: NotLeaseHolderError) -> Self {
        Error::new(ErrorDetail::NotLeaseHolder(e))
    }
}
