//! Request cancellation and node shutdown signals
//!
//! A [`Context`] travels with one request and ends when the caller cancels it
//! or its deadline passes. A [`Stopper`] is shared by every replica on a node
//! and fires once when the node starts quiescing.

use kvrange_protocol::CancelCause;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Cancellation scope of one request
#[derive(Debug, Clone, Default)]
pub struct Context {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl Context {
    /// A context that never ends on its own.
    pub fn background() -> Self {
        Self::default()
    }

    /// A context that ends after `timeout`.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: Some(Instant::now() + timeout),
        }
    }

    /// A context canceled together with this one, but which can also be
    /// canceled alone.
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            deadline: self.deadline,
        }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Why the context ended, or `None` while it is still live.
    pub fn err(&self) -> Option<CancelCause> {
        if self.token.is_cancelled() {
            return Some(CancelCause::Canceled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(CancelCause::DeadlineExceeded),
            _ => None,
        }
    }

    /// Resolves once the context ends.
    pub async fn done(&self) -> CancelCause {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = self.token.cancelled() => CancelCause::Canceled,
                    _ = tokio::time::sleep_until(deadline) => CancelCause::DeadlineExceeded,
                }
            }
            None => {
                self.token.cancelled().await;
                CancelCause::Canceled
            }
        }
    }
}

/// Node-wide shutdown signal
#[derive(Debug, Clone, Default)]
pub struct Stopper {
    quiesce: CancellationToken,
}

impl Stopper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Begin quiescing. Every current and future waiter is released.
    pub fn stop(&self) {
        tracing::info!("Stopper quiescing");
        self.quiesce.cancel();
    }

    pub fn is_quiescing(&self) -> bool {
        self.quiesce.is_cancelled()
    }

    /// Resolves once the node starts quiescing.
    pub async fn should_quiesce(&self) {
        self.quiesce.cancelled().await
    }
}
