//! Request execution for one range replica
//!
//! This crate is the entry point for every batch of key-value requests a
//! range receives. It decides how a batch runs and keeps it running until
//! it succeeds or fails for a reason the range cannot resolve itself.
//!
//! ## Architecture
//!
//! A batch flows through:
//! - the dispatcher, which validates it and picks an execution path
//! - span collection, which turns the batch into the key spans it touches
//! - the concurrency retry loop, which latches those spans, evaluates the
//!   batch, and resolves concurrency conflicts before retrying
//! - the admin executor, for administrative commands that skip latching
//!
//! Evaluation, intent resolution, commit recovery, lease acquisition and
//! admin commands are capabilities supplied by the node through the traits
//! in [`concurrency`], [`evaluator`], [`lease`] and [`executor`].

pub mod backpressure;
pub mod collector;
pub mod concurrency;
pub mod config;
pub mod context;
pub mod declare;
pub mod dispatcher;
pub mod error;
pub mod evaluator;
pub mod executor;
pub mod lease;
pub mod replica;
pub mod spanset;
pub mod stats;
pub mod strip;

pub use collector::collect_spans;
pub use concurrency::{
    CommitRecovery, DEFAULT_PUSHEE_RECHECK_INTERVAL, IntentCleanup, IntentResolution,
    IntentResolver, LatchGuard, LatchManager, MergeCompletion, MergeWatcher, SpanLatchManager,
    TxnWaitQueue, WaitQueue, should_push_immediately,
};
pub use config::{ReplicaConfig, RequestFilter, ResponseFilter, TestingKnobs};
pub use context::{Context, Stopper};
pub use dispatcher::check_batch_request;
pub use error::ConfigError;
pub use evaluator::{BatchEvaluator, ExecutionPath};
pub use executor::{AdminHandler, Conflict, MANUAL_SPLIT_REASON};
pub use lease::{LeaseRequester, limit_txn_max_timestamp};
pub use replica::{Replica, ReplicaServices};
pub use spanset::{DeclaredSpan, SpanAccess, SpanScope, SpanSet};
pub use stats::{LeaseholderStats, LoadSplitDecider};
pub use strip::maybe_strip_in_flight_writes;
