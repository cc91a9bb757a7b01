//! Transaction records and identifiers

use crate::keys::{Key, Span};
use kvrange_hlc::{HlcTimestamp, NodeId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// Transaction identifier using UUIDv7 for time-ordered uniqueness
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TransactionId(Uuid);

impl TransactionId {
    /// Generate a new transaction ID using UUIDv7
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Create from existing UUID (for testing/deserialization)
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Convert to bytes (16 bytes, big-endian)
    pub fn to_bytes(&self) -> [u8; 16] {
        *self.0.as_bytes()
    }

    /// Eight-character prefix used in log lines.
    pub fn short(&self) -> String {
        self.0.simple().to_string()[..8].to_string()
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Transaction priority. Higher priorities win pushes.
pub type TxnPriority = i32;

/// Transaction status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionStatus {
    /// Still running
    Pending,
    /// Parallel commit in flight; outcome depends on its in-flight writes
    Staging,
    Committed,
    Aborted,
}

impl TransactionStatus {
    /// Committed and aborted transactions can no longer change.
    pub fn is_finalized(&self) -> bool {
        matches!(self, TransactionStatus::Committed | TransactionStatus::Aborted)
    }
}

/// The part of a transaction record carried on every intent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxnMeta {
    pub id: TransactionId,
    /// Anchor key of the transaction record.
    pub key: Key,
    pub epoch: u32,
    /// Timestamp intents are currently written at.
    pub write_timestamp: HlcTimestamp,
    pub min_timestamp: HlcTimestamp,
    pub priority: TxnPriority,
    pub sequence: i32,
}

impl TxnMeta {
    pub const MIN_PRIORITY: TxnPriority = 0;
    pub const MAX_PRIORITY: TxnPriority = i32::MAX;
}

/// Clock reading taken from a node while the transaction ran there.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservedTimestamp {
    pub node_id: NodeId,
    pub timestamp: HlcTimestamp,
}

/// A pipelined write not yet proven to have succeeded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequencedWrite {
    pub key: Key,
    pub sequence: i32,
}

/// Full transaction record as carried in request headers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub meta: TxnMeta,
    pub name: String,
    pub status: TransactionStatus,
    pub read_timestamp: HlcTimestamp,
    /// Upper bound of the uncertainty window.
    pub max_timestamp: HlcTimestamp,
    pub observed_timestamps: Vec<ObservedTimestamp>,
    /// Spans the transaction has written intents over.
    pub lock_spans: Vec<Span>,
    pub in_flight_writes: Vec<SequencedWrite>,
}

impl Transaction {
    /// Create a pending transaction anchored at `key` starting at `now`.
    pub fn new(
        name: impl Into<String>,
        key: impl Into<Key>,
        priority: TxnPriority,
        now: HlcTimestamp,
        max_offset: Duration,
    ) -> Self {
        Self {
            meta: TxnMeta {
                id: TransactionId::new(),
                key: key.into(),
                epoch: 0,
                write_timestamp: now,
                min_timestamp: now,
                priority,
                sequence: 0,
            },
            name: name.into(),
            status: TransactionStatus::Pending,
            read_timestamp: now,
            max_timestamp: now.add_duration(max_offset),
            observed_timestamps: Vec::new(),
            lock_spans: Vec::new(),
            in_flight_writes: Vec::new(),
        }
    }

    pub fn id(&self) -> TransactionId {
        self.meta.id
    }

    pub fn write_timestamp(&self) -> HlcTimestamp {
        self.meta.write_timestamp
    }

    /// The clock reading recorded for a node, if any.
    pub fn observed_timestamp(&self, node_id: NodeId) -> Option<HlcTimestamp> {
        self.observed_timestamps
            .iter()
            .find(|o| o.node_id == node_id)
            .map(|o| o.timestamp)
    }

    /// Records a clock reading for a node, keeping the earliest one.
    pub fn update_observed_timestamp(&mut self, node_id: NodeId, timestamp: HlcTimestamp) {
        match self.observed_timestamps.iter_mut().find(|o| o.node_id == node_id) {
            Some(existing) => existing.timestamp.backward(timestamp),
            None => self.observed_timestamps.push(ObservedTimestamp { node_id, timestamp }),
        }
    }
}

/// An uncommitted write left by a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Intent {
    pub span: Span,
    pub txn: TxnMeta,
    pub status: TransactionStatus,
}

/// What a push tries to achieve against the pushee.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PushTxnType {
    /// Move the pushee's write timestamp above the pusher's
    Timestamp,
    /// Abort the pushee
    Abort,
    /// Only check whether the pushee is still alive
    Touch,
}
