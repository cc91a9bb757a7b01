//! Range metadata: descriptors, replicas and leases

use crate::keys::{Key, RangeId, Span};
use kvrange_hlc::{HlcTimestamp, NodeId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a store on a node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StoreId(pub u64);

/// One replica of a range.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReplicaDescriptor {
    pub node_id: NodeId,
    pub store_id: StoreId,
    pub replica_id: u64,
}

impl fmt::Display for ReplicaDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, s{}):{}", self.node_id, self.store_id.0, self.replica_id)
    }
}

/// The key bounds and membership of a range.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeDescriptor {
    pub range_id: RangeId,
    pub start_key: Key,
    /// Exclusive end key.
    pub end_key: Key,
    pub replicas: Vec<ReplicaDescriptor>,
    /// Incremented on every split, merge or membership change.
    pub generation: u64,
}

impl RangeDescriptor {
    pub fn contains_key(&self, key: &Key) -> bool {
        &self.start_key <= key && key < &self.end_key
    }

    /// True if the span lies fully inside the range bounds.
    pub fn contains_span(&self, span: &Span) -> bool {
        self.start_key <= span.key && span.exclusive_end() <= self.end_key
    }

    pub fn span(&self) -> Span {
        Span::range(self.start_key.clone(), self.end_key.clone())
    }

    pub fn replica_on_store(&self, store_id: StoreId) -> Option<&ReplicaDescriptor> {
        self.replicas.iter().find(|r| r.store_id == store_id)
    }
}

/// Right of one replica to serve the range without further coordination.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    pub replica: ReplicaDescriptor,
    pub start: HlcTimestamp,
    pub expiration: HlcTimestamp,
    pub sequence: u64,
}

impl Lease {
    pub fn owned_by(&self, replica_id: u64) -> bool {
        self.replica.replica_id == replica_id
    }
}

/// Whether a lease can be used at a given time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LeaseState {
    Valid,
    Expired,
}

/// Point-in-time judgment of a lease.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseStatus {
    pub state: LeaseState,
    pub lease: Lease,
    /// Time the status was evaluated at.
    pub timestamp: HlcTimestamp,
}

impl LeaseStatus {
    pub fn is_valid(&self) -> bool {
        self.state == LeaseState::Valid
    }
}

/// Range metadata attached to responses on request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeInfo {
    pub desc: RangeDescriptor,
    pub lease: Lease,
}

/// A node/store pair that can hold a replica.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReplicationTarget {
    pub node_id: NodeId,
    pub store_id: StoreId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplicaChangeType {
    Add,
    Remove,
}

/// A single membership change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaChange {
    pub change_type: ReplicaChangeType,
    pub target: ReplicationTarget,
}
