use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::RpcError;

/// Cancellation scope of a call
///
/// Combines a caller-owned [`CancellationToken`] with an optional deadline.
/// The call machinery only observes it; cancelling is up to the caller.
#[derive(Debug, Clone, Default)]
pub struct Context {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl Context {
    /// A context that is never cancelled
    pub fn background() -> Self {
        Self::default()
    }

    pub fn new(token: CancellationToken) -> Self {
        Self {
            token,
            deadline: None,
        }
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Set a deadline, keeping an earlier one if present
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(current) => current.min(deadline),
            None => deadline,
        });
        self
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// The cancellation error, if the context is already done
    pub fn err(&self) -> Option<RpcError> {
        if self.token.is_cancelled() {
            return Some(RpcError::Cancelled);
        }
        match self.deadline {
            Some(deadline) if deadline <= Instant::now() => Some(RpcError::DeadlineExceeded),
            _ => None,
        }
    }

    /// Resolves once the token fires or the deadline passes
    pub async fn done(&self) -> RpcError {
        match self.deadline {
            Some(deadline) => tokio::select! {
                biased;
                _ = self.token.cancelled() => RpcError::Cancelled,
                _ = tokio::time::sleep_until(deadline) => RpcError::DeadlineExceeded,
            },
            None => {
                self.token.cancelled().await;
                RpcError::Cancelled
            }
        }
    }

    /// Drive `fut` unless the context finishes first
    ///
    /// On cancellation `fut` is dropped mid-flight; whatever it was driving
    /// must be treated as broken by the caller.
    pub async fn run<F: Future>(&self, fut: F) -> Result<F::Output, RpcError> {
        tokio::select! {
            biased;
            err = self.done() => Err(err),
            out = fut => Ok(out),
        }
    }
}
