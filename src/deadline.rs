use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::{Result, TutorError};

/// Deadline plus cancellation signal handed to every outbound call.
///
/// Budgets are cheap to clone. `child` derives a budget for a sub-stage that
/// is cancelled together with its parent but carries its own deadline.
#[derive(Debug, Clone)]
pub struct CallBudget {
    timeout: Duration,
    cancel: CancellationToken,
}

impl CallBudget {
    pub fn new(timeout: Duration, cancel: CancellationToken) -> Self {
        Self { timeout, cancel }
    }

    /// Budget with a fresh, never-cancelled token
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::new(timeout, CancellationToken::new())
    }

    pub fn child(&self, timeout: Duration) -> Self {
        Self {
            timeout,
            cancel: self.cancel.child_token(),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Drive `fut` until it completes, the deadline passes or the token fires.
    /// Dropping the future on either interruption aborts the in-flight call.
    pub async fn run<F, T>(&self, stage: &'static str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        if self.cancel.is_cancelled() {
            return Err(TutorError::Cancelled(stage));
        }

        tokio::select! {
            _ = self.cancel.cancelled() => {
                tracing::warn!("{} cancelled before completion", stage);
                Err(TutorError::Cancelled(stage))
            }
            res = tokio::time::timeout(self.timeout, fut) => match res {
                Ok(inner) => inner,
                Err(_) => {
                    tracing::warn!("{} exceeded its {}ms deadline", stage, self.timeout.as_millis());
                    Err(TutorError::Timeout { stage, after: self.timeout })
                }
            },
        }
    }
}
