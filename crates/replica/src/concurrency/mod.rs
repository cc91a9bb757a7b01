//! Concurrency control around batch evaluation
//!
//! Capabilities the retry loop depends on: latching, waiting on other
//! transactions, resolving intents, recovering staging transactions and
//! watching merges. Each capability is a trait so a node can supply its own
//! implementation; in-memory implementations are provided where the behavior
//! is self-contained.

pub mod intent;
pub mod merge;
pub mod recovery;
pub mod spanlatch;
pub mod txnwait;

pub use intent::{IntentCleanup, IntentResolution, IntentResolver};
pub use merge::{MergeCompletion, MergeWatcher};
pub use recovery::CommitRecovery;
pub use spanlatch::{LatchGuard, LatchManager, SpanLatchManager};
pub use txnwait::{
    DEFAULT_PUSHEE_RECHECK_INTERVAL, TxnWaitQueue, WaitQueue, should_push_immediately,
};
