//! HLC timestamp implementation for request ordering.
//!
//! Hybrid Logical Clock timestamps order every read and write a range serves.
//! They carry a wall-clock component (nanoseconds since the Unix epoch) and a
//! logical counter that disambiguates events within the same wall time.
//! The zero timestamp is reserved to mean "not assigned".

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Node identifier.
///
/// Zero is never a valid node and is used as "unknown" in request headers.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

impl NodeId {
    pub const fn new(id: u64) -> Self {
        NodeId(id)
    }

    pub fn get(&self) -> u64 {
        self.0
    }

    /// True for the unset node id.
    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// Immutable HLC timestamp with total ordering.
///
/// Ordering is wall time first, then the logical counter.
#[derive(
    Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord,
)]
pub struct HlcTimestamp {
    /// Physical time component (nanoseconds since Unix epoch)
    pub physical: u64,
    /// Logical counter for ordering within the same physical time
    pub logical: u32,
}

impl HlcTimestamp {
    /// The unassigned timestamp.
    pub const ZERO: HlcTimestamp = HlcTimestamp::new(0, 0);

    /// The largest representable timestamp.
    pub const MAX: HlcTimestamp = HlcTimestamp::new(u64::MAX, u32::MAX);

    pub const fn new(physical: u64, logical: u32) -> Self {
        Self { physical, logical }
    }

    /// Timestamp at a wall time with a zero logical component.
    pub const fn from_physical(physical: u64) -> Self {
        Self::new(physical, 0)
    }

    /// True when no timestamp has been assigned.
    pub fn is_empty(&self) -> bool {
        *self == Self::ZERO
    }

    /// Ratchets this timestamp up to `other`. Returns true if it moved.
    pub fn forward(&mut self, other: HlcTimestamp) -> bool {
        if *self < other {
            *self = other;
            true
        } else {
            false
        }
    }

    /// Lowers this timestamp down to `other` if `other` is smaller.
    pub fn backward(&mut self, other: HlcTimestamp) {
        if other < *self {
            *self = other;
        }
    }

    /// The smallest timestamp strictly greater than this one.
    pub fn next(&self) -> Self {
        if self.logical == u32::MAX {
            Self::new(self.physical.saturating_add(1), 0)
        } else {
            Self::new(self.physical, self.logical + 1)
        }
    }

    /// The largest timestamp strictly smaller than this one.
    pub fn prev(&self) -> Self {
        if self.logical > 0 {
            Self::new(self.physical, self.logical - 1)
        } else if self.physical > 0 {
            Self::new(self.physical - 1, u32::MAX)
        } else {
            *self
        }
    }

    /// Adds a duration to the wall time, resetting the logical component.
    pub fn add_duration(&self, d: Duration) -> Self {
        Self::from_physical(self.physical.saturating_add(d.as_nanos() as u64))
    }

    /// Parse from string format: "physical,logical"
    pub fn parse(s: &str) -> Result<Self, String> {
        let (physical, logical) = s
            .split_once(',')
            .ok_or_else(|| format!("Invalid HLC timestamp format: {} (expected physical,logical)", s))?;

        let physical = physical
            .parse()
            .map_err(|_| format!("Invalid physical component: {}", physical))?;
        let logical = logical
            .parse()
            .map_err(|_| format!("Invalid logical component: {}", logical))?;

        Ok(Self::new(physical, logical))
    }
}

impl fmt::Display for HlcTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.physical, self.logical)
    }
}

/// Where the clock reads physical time from.
enum PhysicalSource {
    System,
    /// Test clock that only moves when advanced explicitly.
    Manual(AtomicU64),
}

impl PhysicalSource {
    fn read(&self) -> u64 {
        match self {
            PhysicalSource::System => SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_nanos() as u64)
                .unwrap_or(0),
            PhysicalSource::Manual(nanos) => nanos.load(Ordering::SeqCst),
        }
    }
}

/// HLC clock for generating timestamps.
pub struct HlcClock {
    node_id: NodeId,
    source: PhysicalSource,
    max_offset: Duration,
    last_physical: AtomicU64,
    logical: AtomicU32,
}

impl HlcClock {
    /// Create a clock for a node backed by system time.
    pub fn new(node_id: NodeId, max_offset: Duration) -> Self {
        Self::with_source(node_id, PhysicalSource::System, max_offset)
    }

    /// Create a clock whose physical time only changes via [`HlcClock::advance`].
    pub fn manual(node_id: NodeId, start: u64) -> Self {
        Self::with_source(
            node_id,
            PhysicalSource::Manual(AtomicU64::new(start)),
            Duration::from_millis(500),
        )
    }

    fn with_source(node_id: NodeId, source: PhysicalSource, max_offset: Duration) -> Self {
        Self {
            node_id,
            source,
            max_offset,
            last_physical: AtomicU64::new(0),
            logical: AtomicU32::new(0),
        }
    }

    /// Node this clock belongs to.
    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    /// Maximum tolerated clock offset between nodes.
    pub fn max_offset(&self) -> Duration {
        self.max_offset
    }

    /// Moves a manual clock forward. No-op for system clocks.
    pub fn advance(&self, by: Duration) {
        if let PhysicalSource::Manual(nanos) = &self.source {
            nanos.fetch_add(by.as_nanos() as u64, Ordering::SeqCst);
        }
    }

    /// Current physical reading without ticking the logical counter.
    pub fn physical_now(&self) -> u64 {
        self.source.read()
    }

    /// Generate a new HLC timestamp.
    pub fn now(&self) -> HlcTimestamp {
        let physical = self.source.read();
        let last = self.last_physical.load(Ordering::SeqCst);

        if physical > last {
            // New physical time, reset logical counter
            self.last_physical.store(physical, Ordering::SeqCst);
            self.logical.store(0, Ordering::SeqCst);
            HlcTimestamp::new(physical, 0)
        } else {
            let logical = self.logical.fetch_add(1, Ordering::SeqCst) + 1;
            HlcTimestamp::new(last, logical)
        }
    }

    /// Update the clock based on a received timestamp.
    pub fn update(&self, received: HlcTimestamp) -> HlcTimestamp {
        let physical = self.source.read();
        let last = self.last_physical.load(Ordering::SeqCst);
        let max_physical = physical.max(received.physical).max(last);

        if max_physical > last {
            self.last_physical.store(max_physical, Ordering::SeqCst);

            if received.physical == max_physical && received.physical > physical {
                // Received timestamp is ahead
                let logical = received.logical.saturating_add(1);
                self.logical.store(logical, Ordering::SeqCst);
                HlcTimestamp::new(max_physical, logical)
            } else {
                self.logical.store(0, Ordering::SeqCst);
                HlcTimestamp::new(max_physical, 0)
            }
        } else {
            let floor = if received.physical == last {
                received.logical
            } else {
                0
            };
            let current = self.logical.load(Ordering::SeqCst).max(floor);
            let logical = current.saturating_add(1);
            self.logical.store(logical, Ordering::SeqCst);
            HlcTimestamp::new(last, logical)
        }
    }
}

/// Thread-safe HLC clock that can be shared across tasks.
pub type SharedHlcClock = Arc<HlcClock>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_ordering() {
        let ts1 = HlcTimestamp::new(100, 0);
        let ts2 = HlcTimestamp::new(100, 1);
        let ts3 = HlcTimestamp::new(101, 0);

        // Physical time dominates
        assert!(ts1 < ts3);
        assert!(ts2 < ts3);

        // Logical counter breaks ties
        assert!(ts1 < ts2);
    }

    #[test]
    fn test_forward_and_backward() {
        let mut ts = HlcTimestamp::new(100, 5);
        assert!(!ts.forward(HlcTimestamp::new(99, 9)));
        assert_eq!(ts, HlcTimestamp::new(100, 5));
        assert!(ts.forward(HlcTimestamp::new(100, 6)));
        assert_eq!(ts, HlcTimestamp::new(100, 6));

        ts.backward(HlcTimestamp::new(200, 0));
        assert_eq!(ts, HlcTimestamp::new(100, 6));
        ts.backward(HlcTimestamp::new(50, 0));
        assert_eq!(ts, HlcTimestamp::new(50, 0));
    }

    #[test]
    fn test_next_prev() {
        let ts = HlcTimestamp::new(10, u32::MAX);
        assert_eq!(ts.next(), HlcTimestamp::new(11, 0));
        assert_eq!(ts.next().prev(), ts);
        assert_eq!(HlcTimestamp::ZERO.prev(), HlcTimestamp::ZERO);
    }

    #[test]
    fn test_string_roundtrip() {
        let ts = HlcTimestamp::new(123_456_789, 10);
        let parsed = HlcTimestamp::parse(&ts.to_string()).unwrap();
        assert_eq!(ts, parsed);
        assert!(HlcTimestamp::parse("12_3").is_err());
    }

    #[test]
    fn test_clock_generation() {
        let clock = HlcClock::new(NodeId::new(1), Duration::from_millis(500));

        let ts1 = clock.now();
        let ts2 = clock.now();
        let ts3 = clock.now();

        // Timestamps should be monotonically increasing
        assert!(ts1 < ts2);
        assert!(ts2 < ts3);
    }

    #[test]
    fn test_manual_clock_update() {
        let clock = HlcClock::manual(NodeId::new(1), 1_000);
        let local = clock.now();
        assert_eq!(local, HlcTimestamp::new(1_000, 0));

        // A timestamp from the future pulls the clock forward
        let remote = HlcTimestamp::new(5_000, 3);
        let updated = clock.update(remote);
        assert_eq!(updated, HlcTimestamp::new(5_000, 4));
        assert!(clock.now() > updated);

        clock.advance(Duration::from_nanos(10_000));
        assert_eq!(clock.now(), HlcTimestamp::new(11_000, 0));
    }

    #[test]
    fn test_empty_timestamp() {
        assert!(HlcTimestamp::ZERO.is_empty());
        assert!(HlcTimestamp::default().is_empty());
        assert!(!HlcTimestamp::new(0, 1).is_empty());
    }
}
