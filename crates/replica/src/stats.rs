//! Request load tracking
//!
//! [`LeaseholderStats`] counts batches per gateway node, which tells the
//! rebalancer where a range's traffic comes from. [`LoadSplitDecider`]
//! watches request rate and samples keys so a hot range can be split at a
//! point that halves its load.

use crate::spanset::{SpanAccess, SpanScope, SpanSet};
use kvrange_hlc::NodeId;
use kvrange_protocol::Key;
use parking_lot::Mutex;
use rand::Rng;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Batches received per gateway node
#[derive(Debug, Default)]
pub struct LeaseholderStats {
    counts: Mutex<HashMap<NodeId, u64>>,
}

impl LeaseholderStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, gateway: NodeId) {
        *self.counts.lock().entry(gateway).or_default() += 1;
    }

    pub fn count(&self, gateway: NodeId) -> u64 {
        self.counts.lock().get(&gateway).copied().unwrap_or(0)
    }

    pub fn total(&self) -> u64 {
        self.counts.lock().values().sum()
    }

    pub fn reset(&self) {
        self.counts.lock().clear();
    }
}

const QPS_WINDOW: Duration = Duration::from_secs(1);

#[derive(Debug, Default)]
struct DeciderState {
    window_start: Option<Instant>,
    window_requests: u64,
    last_qps: f64,
    /// Uniform reservoir of start keys seen while above the threshold
    samples: Vec<Key>,
    /// Keys offered to the reservoir
    sampled: u64,
}

/// Finds load-based split points
#[derive(Debug)]
pub struct LoadSplitDecider {
    qps_threshold: u64,
    capacity: usize,
    state: Mutex<DeciderState>,
}

impl LoadSplitDecider {
    /// A zero threshold disables the decider.
    pub fn new(qps_threshold: u64, capacity: usize) -> Self {
        Self {
            qps_threshold,
            capacity,
            state: Mutex::new(DeciderState::default()),
        }
    }

    /// Record a batch of `requests` requests touching `spans` at `now`.
    ///
    /// Returns true once enough keys are sampled to suggest a split.
    pub fn record(&self, now: Instant, requests: usize, spans: &SpanSet) -> bool {
        if self.qps_threshold == 0 || self.capacity == 0 {
            return false;
        }
        let mut state = self.state.lock();

        let window_start = *state.window_start.get_or_insert(now);
        let elapsed = now.saturating_duration_since(window_start);
        if elapsed >= QPS_WINDOW {
            state.last_qps = state.window_requests as f64 / elapsed.as_secs_f64();
            state.window_start = Some(now);
            state.window_requests = 0;
            if state.last_qps < self.qps_threshold as f64 {
                state.samples.clear();
                state.sampled = 0;
            }
        }
        state.window_requests += requests as u64;

        if state.last_qps < self.qps_threshold as f64 {
            return false;
        }
        let mut rng = rand::thread_rng();
        for access in [SpanAccess::ReadOnly, SpanAccess::ReadWrite] {
            for declared in spans.get_spans(access, SpanScope::Global) {
                if state.samples.len() < self.capacity {
                    state.samples.push(declared.span.key.clone());
                } else {
                    let slot = rng.gen_range(0..=state.sampled) as usize;
                    if slot < self.capacity {
                        state.samples[slot] = declared.span.key.clone();
                    }
                }
                state.sampled += 1;
            }
        }
        state.samples.len() >= self.capacity
    }

    /// Requests per second measured over the last full window.
    pub fn last_qps(&self) -> f64 {
        self.state.lock().last_qps
    }

    /// The median sampled key, if the range is hot enough to split.
    pub fn maybe_split_key(&self) -> Option<Key> {
        let state = self.state.lock();
        if state.samples.len() < self.capacity || self.capacity == 0 {
            return None;
        }
        let mut keys = state.samples.clone();
        keys.sort();
        keys.get(keys.len() / 2).cloned()
    }

    pub fn reset(&self) {
        *self.state.lock() = DeciderState::default();
    }
}
