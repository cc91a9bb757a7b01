//! Requests and batch requests
//!
//! A batch is an ordered list of requests sharing one [`Header`]. Every request
//! kind is a [`Method`] whose flags decide which execution path the batch takes.

use crate::keys::{Key, RangeId, Span};
use crate::range::{RangeDescriptor, ReplicaChange, ReplicaDescriptor, ReplicationTarget, StoreId};
use crate::txn::{PushTxnType, SequencedWrite, Transaction, TransactionStatus, TxnMeta};
use kvrange_hlc::{HlcTimestamp, NodeId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

const IS_ADMIN: u32 = 1 << 0;
const IS_READ: u32 = 1 << 1;
const IS_WRITE: u32 = 1 << 2;
const IS_RANGE: u32 = 1 << 3;
/// Writes that leave an intent when run transactionally.
const IS_INTENT_WRITE: u32 = 1 << 4;
/// Reads allowed to share a batch with writes.
const IS_MIXABLE_READ: u32 = 1 << 5;
/// Writes subject to backpressure on oversized ranges.
const IS_BACKPRESSURABLE: u32 = 1 << 6;

/// Request kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Method {
    Get,
    Put,
    ConditionalPut,
    InitPut,
    Increment,
    Delete,
    DeleteRange,
    Scan,
    QueryIntent,
    EndTxn,
    HeartbeatTxn,
    PushTxn,
    QueryTxn,
    ResolveIntent,
    AdminSplit,
    AdminUnsplit,
    AdminMerge,
    AdminTransferLease,
    AdminChangeReplicas,
    AdminRelocateRange,
    CheckConsistency,
    Import,
    AdminScatter,
}

impl Method {
    fn flags(&self) -> u32 {
        match self {
            Method::Get => IS_READ,
            Method::Scan => IS_READ | IS_RANGE,
            Method::QueryIntent => IS_READ | IS_MIXABLE_READ,
            Method::QueryTxn => IS_READ,
            Method::Put | Method::ConditionalPut | Method::InitPut | Method::Increment => {
                IS_WRITE | IS_INTENT_WRITE | IS_BACKPRESSURABLE
            }
            Method::Delete => IS_WRITE | IS_INTENT_WRITE,
            Method::DeleteRange => IS_WRITE | IS_INTENT_WRITE | IS_RANGE,
            Method::EndTxn | Method::HeartbeatTxn | Method::PushTxn => IS_WRITE,
            Method::ResolveIntent => IS_WRITE | IS_RANGE,
            Method::AdminSplit
            | Method::AdminUnsplit
            | Method::AdminMerge
            | Method::AdminTransferLease
            | Method::AdminChangeReplicas
            | Method::AdminRelocateRange
            | Method::AdminScatter => IS_ADMIN,
            Method::CheckConsistency | Method::Import => IS_ADMIN | IS_RANGE,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.flags() & IS_ADMIN != 0
    }

    pub fn is_read(&self) -> bool {
        self.flags() & IS_READ != 0
    }

    pub fn is_write(&self) -> bool {
        self.flags() & IS_WRITE != 0
    }

    pub fn is_range(&self) -> bool {
        self.flags() & IS_RANGE != 0
    }

    pub fn is_intent_write(&self) -> bool {
        self.flags() & IS_INTENT_WRITE != 0
    }

    /// Read-only requests that may still appear alongside writes.
    pub fn is_mixable_read(&self) -> bool {
        self.flags() & IS_MIXABLE_READ != 0
    }

    pub fn is_backpressurable(&self) -> bool {
        self.flags() & IS_BACKPRESSURABLE != 0
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetRequest {
    pub key: Key,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PutRequest {
    pub key: Key,
    pub value: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConditionalPutRequest {
    pub key: Key,
    pub value: Vec<u8>,
    pub expected: Option<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitPutRequest {
    pub key: Key,
    pub value: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncrementRequest {
    pub key: Key,
    pub increment: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteRequest {
    pub key: Key,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteRangeRequest {
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanRequest {
    pub span: Span,
}

/// Checks that an earlier pipelined write left its intent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryIntentRequest {
    pub key: Key,
    pub txn: TxnMeta,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndTxnRequest {
    /// Anchor key of the transaction record.
    pub key: Key,
    pub commit: bool,
    pub lock_spans: Vec<Span>,
    pub in_flight_writes: Vec<SequencedWrite>,
}

impl EndTxnRequest {
    /// A commit that stages the record while writes are still in flight.
    pub fn is_parallel_commit(&self) -> bool {
        self.commit && !self.in_flight_writes.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatTxnRequest {
    pub key: Key,
    pub now: HlcTimestamp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushTxnRequest {
    /// Anchor key of the pushee's record.
    pub key: Key,
    pub pusher_txn: Transaction,
    pub pushee_txn: TxnMeta,
    pub push_to: HlcTimestamp,
    pub push_type: PushTxnType,
    /// Push regardless of priorities.
    pub force: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryTxnRequest {
    pub key: Key,
    pub txn: TxnMeta,
    /// Block until the queried record changes.
    pub wait_for_update: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolveIntentRequest {
    pub span: Span,
    pub intent_txn: TxnMeta,
    pub status: TransactionStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminSplitRequest {
    pub key: Key,
    pub split_key: Key,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminUnsplitRequest {
    pub key: Key,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminMergeRequest {
    pub key: Key,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminTransferLeaseRequest {
    pub key: Key,
    pub target: StoreId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminChangeReplicasRequest {
    pub key: Key,
    /// Descriptor the change expects to apply against.
    pub exp_desc: RangeDescriptor,
    pub changes: Vec<ReplicaChange>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminRelocateRangeRequest {
    pub key: Key,
    pub targets: Vec<ReplicationTarget>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckConsistencyRequest {
    pub span: Span,
    pub with_diff: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportRequest {
    pub span: Span,
    pub files: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminScatterRequest {
    pub span: Span,
    pub randomize_leases: bool,
}

/// A single request of a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Request {
    Get(GetRequest),
    Put(PutRequest),
    ConditionalPut(ConditionalPutRequest),
    InitPut(InitPutRequest),
    Increment(IncrementRequest),
    Delete(DeleteRequest),
    DeleteRange(DeleteRangeRequest),
    Scan(ScanRequest),
    QueryIntent(QueryIntentRequest),
    EndTxn(EndTxnRequest),
    HeartbeatTxn(HeartbeatTxnRequest),
    PushTxn(PushTxnRequest),
    QueryTxn(QueryTxnRequest),
    ResolveIntent(ResolveIntentRequest),
    AdminSplit(AdminSplitRequest),
    AdminUnsplit(AdminUnsplitRequest),
    AdminMerge(AdminMergeRequest),
    AdminTransferLease(AdminTransferLeaseRequest),
    AdminChangeReplicas(AdminChangeReplicasRequest),
    AdminRelocateRange(AdminRelocateRangeRequest),
    CheckConsistency(CheckConsistencyRequest),
    Import(ImportRequest),
    AdminScatter(AdminScatterRequest),
}

impl Request {
    pub fn method(&self) -> Method {
        match self {
            Request::Get(_) => Method::Get,
            Request::Put(_) => Method::Put,
            Request::ConditionalPut(_) => Method::ConditionalPut,
            Request::InitPut(_) => Method::InitPut,
            Request::Increment(_) => Method::Increment,
            Request::Delete(_) => Method::Delete,
            Request::DeleteRange(_) => Method::DeleteRange,
            Request::Scan(_) => Method::Scan,
            Request::QueryIntent(_) => Method::QueryIntent,
            Request::EndTxn(_) => Method::EndTxn,
            Request::HeartbeatTxn(_) => Method::HeartbeatTxn,
            Request::PushTxn(_) => Method::PushTxn,
            Request::QueryTxn(_) => Method::QueryTxn,
            Request::ResolveIntent(_) => Method::ResolveIntent,
            Request::AdminSplit(_) => Method::AdminSplit,
            Request::AdminUnsplit(_) => Method::AdminUnsplit,
            Request::AdminMerge(_) => Method::AdminMerge,
            Request::AdminTransferLease(_) => Method::AdminTransferLease,
            Request::AdminChangeReplicas(_) => Method::AdminChangeReplicas,
            Request::AdminRelocateRange(_) => Method::AdminRelocateRange,
            Request::CheckConsistency(_) => Method::CheckConsistency,
            Request::Import(_) => Method::Import,
            Request::AdminScatter(_) => Method::AdminScatter,
        }
    }

    /// The key span this request addresses.
    pub fn span(&self) -> Span {
        match self {
            Request::Get(r) => Span::point(r.key.clone()),
            Request::Put(r) => Span::point(r.key.clone()),
            Request::ConditionalPut(r) => Span::point(r.key.clone()),
            Request::InitPut(r) => Span::point(r.key.clone()),
            Request::Increment(r) => Span::point(r.key.clone()),
            Request::Delete(r) => Span::point(r.key.clone()),
            Request::DeleteRange(r) => r.span.clone(),
            Request::Scan(r) => r.span.clone(),
            Request::QueryIntent(r) => Span::point(r.key.clone()),
            Request::EndTxn(r) => Span::point(r.key.clone()),
            Request::HeartbeatTxn(r) => Span::point(r.key.clone()),
            Request::PushTxn(r) => Span::point(r.key.clone()),
            Request::QueryTxn(r) => Span::point(r.key.clone()),
            Request::ResolveIntent(r) => r.span.clone(),
            Request::AdminSplit(r) => Span::point(r.key.clone()),
            Request::AdminUnsplit(r) => Span::point(r.key.clone()),
            Request::AdminMerge(r) => Span::point(r.key.clone()),
            Request::AdminTransferLease(r) => Span::point(r.key.clone()),
            Request::AdminChangeReplicas(r) => Span::point(r.key.clone()),
            Request::AdminRelocateRange(r) => Span::point(r.key.clone()),
            Request::CheckConsistency(r) => r.span.clone(),
            Request::Import(r) => r.span.clone(),
            Request::AdminScatter(r) => r.span.clone(),
        }
    }
}

/// Consistency a read asks for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReadConsistency {
    #[default]
    Consistent,
    /// Reads intents as values without pushing their writers
    ReadUncommitted,
    /// Reads without the lease and without regard to intents
    Inconsistent,
}

/// Fields shared by every request of a batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    /// Timestamp the batch executes at. Must be assigned before dispatch.
    pub timestamp: HlcTimestamp,
    /// Transaction the batch belongs to. Shared with other in-flight requests
    /// of the same transaction, so it is only ever modified on a private copy.
    pub txn: Option<Arc<Transaction>>,
    pub read_consistency: ReadConsistency,
    /// Node that received the batch from the client.
    pub gateway_node_id: NodeId,
    /// Replica the batch is addressed to.
    pub replica: ReplicaDescriptor,
    pub range_id: RangeId,
    /// Attach range descriptor and lease to the response.
    pub return_range_info: bool,
}

/// An ordered list of requests sharing one header.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchRequest {
    pub header: Header,
    pub requests: Vec<Request>,
}

impl BatchRequest {
    pub fn new(header: Header, requests: Vec<Request>) -> Self {
        Self { header, requests }
    }

    pub fn txn(&self) -> Option<&Transaction> {
        self.header.txn.as_deref()
    }

    /// Non-empty and made only of reads.
    pub fn is_read_only(&self) -> bool {
        !self.requests.is_empty()
            && self
                .requests
                .iter()
                .all(|r| !r.method().is_write() && !r.method().is_admin())
    }

    /// Contains at least one write.
    pub fn is_write(&self) -> bool {
        self.requests.iter().any(|r| r.method().is_write())
    }

    /// Contains at least one administrative request.
    pub fn is_admin(&self) -> bool {
        self.requests.iter().any(|r| r.method().is_admin())
    }

    /// Writes mixed with reads that may not share a batch with writes.
    pub fn is_mixed(&self) -> bool {
        self.is_write()
            && self.requests.iter().any(|r| {
                let m = r.method();
                !m.is_write() && !m.is_admin() && !m.is_mixable_read()
            })
    }

    pub fn is_single_push_txn_request(&self) -> bool {
        matches!(self.requests.as_slice(), [Request::PushTxn(_)])
    }

    pub fn is_single_query_txn_request(&self) -> bool {
        matches!(self.requests.as_slice(), [Request::QueryTxn(_)])
    }

    /// The first request of the given kind.
    pub fn get_arg(&self, method: Method) -> Option<&Request> {
        self.requests.iter().find(|r| r.method() == method)
    }

    /// Short description such as "1 Put, 1 EndTxn" for logs.
    pub fn summary(&self) -> String {
        let mut counts: BTreeMap<Method, usize> = BTreeMap::new();
        for r in &self.requests {
            *counts.entry(r.method()).or_default() += 1;
        }
        counts
            .iter()
            .map(|(m, n)| format!("{} {}", n, m))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for BatchRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.summary())?;
        if let Some(txn) = self.txn() {
            write!(f, " [txn: {}]", txn.id().short())?;
        }
        Ok(())
    }
}
