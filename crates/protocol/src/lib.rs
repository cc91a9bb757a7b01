//! Protocol definitions for range request handling
//!
//! This crate defines the vocabulary every part of the range request path
//! speaks: keys and spans, range descriptors and leases, transaction records,
//! batch requests and responses, and the structured errors returned to callers.
//! It contains no behavior beyond classification helpers on those types.

pub mod error;
pub mod keys;
pub mod range;
pub mod request;
pub mod response;
pub mod txn;

pub use error::{
    AmbiguousResultError, CancelCause, Error, ErrorDetail, IndeterminateCommitError,
    MergeInProgressError, NodeUnavailableError, NotLeaseHolderError, Result,
    TransactionPushError, WriteIntentError,
};
pub use keys::{Key, RangeId, Span};
pub use range::{
    Lease, LeaseState, LeaseStatus, RangeDescriptor, RangeInfo, ReplicaChange,
    ReplicaChangeType, ReplicaDescriptor, ReplicationTarget, StoreId,
};
pub use request::{
    AdminChangeReplicasRequest, AdminMergeRequest, AdminRelocateRangeRequest,
    AdminScatterRequest, AdminSplitRequest, AdminTransferLeaseRequest, AdminUnsplitRequest,
    BatchRequest, CheckConsistencyRequest, ConditionalPutRequest, DeleteRangeRequest,
    DeleteRequest, EndTxnRequest, GetRequest, Header, HeartbeatTxnRequest, ImportRequest,
    IncrementRequest, InitPutRequest, Method, PushTxnRequest, PutRequest, QueryIntentRequest,
    QueryTxnRequest, ReadConsistency, Request, ResolveIntentRequest, ScanRequest,
};
pub use response::{BatchResponse, ConsistencyCheckResult, Response};
pub use txn::{
    Intent, ObservedTimestamp, PushTxnType, SequencedWrite, Transaction, TransactionId,
    TransactionStatus, TxnMeta, TxnPriority,
};
