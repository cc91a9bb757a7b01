//! Keys, spans and range identifiers
//!
//! Keys are ordered byte strings. Keys starting with [`LOCAL_PREFIX`] are
//! range-local: they hold per-range bookkeeping (transaction records, abort
//! span entries) and never collide with user data.

use serde::{Deserialize, Serialize};
use std::fmt;

/// First byte of every range-local key.
pub const LOCAL_PREFIX: u8 = 0x01;

const LOCAL_TRANSACTION_SUFFIX: &[u8] = b"txn-";
const LOCAL_ABORT_SPAN_SUFFIX: &[u8] = b"abc-";

/// Identifier of a range.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RangeId(pub u64);

impl fmt::Display for RangeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}

/// An ordered byte-string key.
#[derive(Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Key(Vec<u8>);

impl Key {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// The empty key, which sorts before every other key.
    pub fn min() -> Self {
        Self(Vec::new())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// True for range-local keys.
    pub fn is_local(&self) -> bool {
        self.0.first() == Some(&LOCAL_PREFIX)
    }

    /// The smallest key strictly greater than this one.
    pub fn next(&self) -> Key {
        let mut bytes = self.0.clone();
        bytes.push(0);
        Key(bytes)
    }

    /// Key of the transaction record anchored at `anchor`.
    pub fn transaction(anchor: &Key, txn_id: &crate::TransactionId) -> Key {
        let mut bytes = Vec::with_capacity(1 + anchor.0.len() + LOCAL_TRANSACTION_SUFFIX.len() + 16);
        bytes.push(LOCAL_PREFIX);
        bytes.extend_from_slice(LOCAL_TRANSACTION_SUFFIX);
        bytes.extend_from_slice(&anchor.0);
        bytes.extend_from_slice(&txn_id.to_bytes());
        Key(bytes)
    }

    /// Key of the abort-span entry for a transaction on a range.
    pub fn abort_span(range_id: RangeId, txn_id: &crate::TransactionId) -> Key {
        let mut bytes = Vec::with_capacity(1 + 8 + LOCAL_ABORT_SPAN_SUFFIX.len() + 16);
        bytes.push(LOCAL_PREFIX);
        bytes.extend_from_slice(&range_id.0.to_be_bytes());
        bytes.extend_from_slice(LOCAL_ABORT_SPAN_SUFFIX);
        bytes.extend_from_slice(&txn_id.to_bytes());
        Key(bytes)
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", String::from_utf8_lossy(&self.0))
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Key(s.as_bytes().to_vec())
    }
}

impl From<&[u8]> for Key {
    fn from(b: &[u8]) -> Self {
        Key(b.to_vec())
    }
}

impl From<Vec<u8>> for Key {
    fn from(b: Vec<u8>) -> Self {
        Key(b)
    }
}

/// A key span `[key, end_key)`. An empty `end_key` denotes the single key `key`.
#[derive(Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Span {
    pub key: Key,
    pub end_key: Key,
}

impl Span {
    /// Span covering exactly one key.
    pub fn point(key: impl Into<Key>) -> Self {
        Self {
            key: key.into(),
            end_key: Key::min(),
        }
    }

    /// Span covering `[key, end_key)`.
    pub fn range(key: impl Into<Key>, end_key: impl Into<Key>) -> Self {
        Self {
            key: key.into(),
            end_key: end_key.into(),
        }
    }

    pub fn is_point(&self) -> bool {
        self.end_key.is_empty()
    }

    /// Exclusive upper bound, materializing the bound of a point span.
    pub fn exclusive_end(&self) -> Key {
        if self.is_point() {
            self.key.next()
        } else {
            self.end_key.clone()
        }
    }

    /// A span is well formed if it is a point or its end sorts after its start,
    /// and both bounds agree on being range-local.
    pub fn valid(&self) -> bool {
        if self.is_point() {
            return true;
        }
        self.key < self.end_key && self.key.is_local() == self.end_key.is_local()
    }

    pub fn contains_key(&self, key: &Key) -> bool {
        if self.is_point() {
            return &self.key == key;
        }
        &self.key <= key && key < &self.end_key
    }

    /// True if every key of `other` lies inside this span.
    pub fn contains(&self, other: &Span) -> bool {
        self.key <= other.key && other.exclusive_end() <= self.exclusive_end()
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.key < other.exclusive_end() && other.key < self.exclusive_end()
    }
}

impl fmt::Debug for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_point() {
            write!(f, "{}", self.key)
        } else {
            write!(f, "{{{}-{}}}", self.key, self.end_key)
        }
    }
}
