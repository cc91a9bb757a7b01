//! Responses and batch responses

use crate::keys::{Key, Span};
use crate::range::{RangeDescriptor, RangeInfo};
use crate::request::Method;
use crate::txn::Transaction;
use serde::{Deserialize, Serialize};

/// Outcome of a consistency check over one range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsistencyCheckResult {
    pub span: Span,
    pub consistent: bool,
    pub detail: String,
}

/// Reply to a single request, in the same slot as the request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Response {
    Get { value: Option<Vec<u8>> },
    Put,
    ConditionalPut,
    InitPut,
    Increment { new_value: i64 },
    Delete,
    DeleteRange { keys: Vec<Key> },
    Scan { rows: Vec<(Key, Vec<u8>)> },
    QueryIntent { found: bool },
    EndTxn { txn: Transaction },
    HeartbeatTxn { txn: Transaction },
    PushTxn { pushee_txn: Transaction },
    QueryTxn { queried_txn: Transaction },
    ResolveIntent,
    AdminSplit,
    AdminUnsplit,
    AdminMerge,
    AdminTransferLease,
    AdminChangeReplicas { desc: Option<RangeDescriptor> },
    AdminRelocateRange,
    CheckConsistency { results: Vec<ConsistencyCheckResult> },
    Import { rows_written: u64 },
    AdminScatter { spans: Vec<Span> },
}

impl Response {
    pub fn method(&self) -> Method {
        match self {
            Response::Get { .. } => Method::Get,
            Response::Put => Method::Put,
            Response::ConditionalPut => Method::ConditionalPut,
            Response::InitPut => Method::InitPut,
            Response::Increment { .. } => Method::Increment,
            Response::Delete => Method::Delete,
            Response::DeleteRange { .. } => Method::DeleteRange,
            Response::Scan { .. } => Method::Scan,
            Response::QueryIntent { .. } => Method::QueryIntent,
            Response::EndTxn { .. } => Method::EndTxn,
            Response::HeartbeatTxn { .. } => Method::HeartbeatTxn,
            Response::PushTxn { .. } => Method::PushTxn,
            Response::QueryTxn { .. } => Method::QueryTxn,
            Response::ResolveIntent => Method::ResolveIntent,
            Response::AdminSplit => Method::AdminSplit,
            Response::AdminUnsplit => Method::AdminUnsplit,
            Response::AdminMerge => Method::AdminMerge,
            Response::AdminTransferLease => Method::AdminTransferLease,
            Response::AdminChangeReplicas { .. } => Method::AdminChangeReplicas,
            Response::AdminRelocateRange => Method::AdminRelocateRange,
            Response::CheckConsistency { .. } => Method::CheckConsistency,
            Response::Import { .. } => Method::Import,
            Response::AdminScatter { .. } => Method::AdminScatter,
        }
    }

    /// Transaction record carried by the response, if its kind carries one.
    pub fn txn(&self) -> Option<&Transaction> {
        match self {
            Response::EndTxn { txn } | Response::HeartbeatTxn { txn } => Some(txn),
            _ => None,
        }
    }
}

/// Replies to a batch, one per request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchResponse {
    pub responses: Vec<Response>,
    /// Updated transaction record after execution.
    pub txn: Option<Transaction>,
    pub range_infos: Vec<RangeInfo>,
}

impl BatchResponse {
    pub fn add(&mut self, response: Response) {
        self.responses.push(response);
    }
}
