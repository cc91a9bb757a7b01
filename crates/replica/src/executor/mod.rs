//! Batch executors
//!
//! - `concurrency`: the latch-evaluate-retry loop shared by the read-write
//!   and read-only paths
//! - `admin`: administrative commands, which skip latching

pub mod admin;
pub mod concurrency;

pub use admin::{AdminHandler, MANUAL_SPLIT_REASON};
pub use concurrency::Conflict;
