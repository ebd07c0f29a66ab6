//! Cancellation and deadline carrier for storage calls

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

use crate::error::{AuthError, AuthResult};

/// Per-call context handed to every adapter operation
///
/// Cloning is cheap and clones observe the same cancellation signal.
#[derive(Debug, Clone)]
pub struct Context {
    deadline: Option<Instant>,
    cancel: Option<watch::Receiver<bool>>,
}

/// Cancels every [`Context`] derived from the same `with_cancel` call
#[derive(Debug)]
pub struct CancelHandle {
    sender: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        // send_replace does not fail when all receivers are gone
        self.sender.send_replace(true);
    }
}

impl Context {
    /// A context that never cancels and never times out
    #[must_use]
    pub fn background() -> Self {
        Self {
            deadline: None,
            cancel: None,
        }
    }

    #[must_use]
    pub fn with_cancel() -> (Self, CancelHandle) {
        let (sender, receiver) = watch::channel(false);
        (
            Self {
                deadline: None,
                cancel: Some(receiver),
            },
            CancelHandle { sender },
        )
    }

    #[must_use]
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Tighten the deadline; an earlier existing deadline wins
    #[must_use]
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(existing) if existing < deadline => existing,
            _ => deadline,
        });
        self
    }

    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Check the context before starting work
    ///
    /// # Errors
    ///
    /// Returns `Cancelled` or `DeadlineExceeded` if the context is already done
    pub fn err(&self) -> AuthResult<()> {
        if self.is_cancelled() {
            return Err(AuthError::Cancelled);
        }
        if self.deadline.is_some_and(|d| d <= Instant::now()) {
            return Err(AuthError::DeadlineExceeded);
        }
        Ok(())
    }

    /// Drive `fut` until it finishes, the context is cancelled or the deadline passes
    ///
    /// # Errors
    ///
    /// Returns the future's own error, or `Cancelled` / `DeadlineExceeded` when the
    /// context ends first. The future is dropped in that case.
    pub async fn run<T, F>(&self, fut: F) -> AuthResult<T>
    where
        F: Future<Output = AuthResult<T>>,
    {
        self.err()?;

        let deadline = async {
            match self.deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            () = self.cancelled() => Err(AuthError::Cancelled),
            () = deadline => Err(AuthError::DeadlineExceeded),
            result = fut => result,
        }
    }

    /// Resolves once the context is cancelled; pends forever for uncancellable contexts
    pub async fn cancelled(&self) {
        let Some(rx) = self.cancel.as_ref() else {
            return std::future::pending().await;
        };
        let mut rx = rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                // handle dropped without cancelling
                return std::future::pending().await;
            }
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::background()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[actix_web::test]
    async fn test_background_runs_to_completion() {
        let ctx = Context::background();
        let result = ctx.run(async { Ok::<_, AuthError>(7) }).await;
        assert_eq!(result, Ok(7));
    }

    #[actix_web::test]
    async fn test_cancelled_context_rejects_work() {
        let (ctx, handle) = Context::with_cancel();
        handle.cancel();
        assert!(ctx.is_cancelled());

        let result = ctx.run(async { Ok::<_, AuthError>(()) }).await;
        assert_eq!(result, Err(AuthError::Cancelled));
    }

    #[actix_web::test]
    async fn test_cancel_interrupts_pending_future() {
        let (ctx, handle) = Context::with_cancel();
        let task = ctx.clone();
        let join = tokio::spawn(async move {
            task.run(async {
                std::future::pending::<()>().await;
                Ok::<_, AuthError>(())
            })
            .await
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        handle.cancel();

        assert_eq!(join.await.unwrap(), Err(AuthError::Cancelled));
    }

    #[actix_web::test]
    async fn test_deadline_exceeded() {
        let ctx = Context::background().with_timeout(Duration::from_millis(5));
        let result = ctx
            .run(async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<_, AuthError>(())
            })
            .await;
        assert_eq!(result, Err(AuthError::DeadlineExceeded));
    }

    #[test]
    fn test_earlier_deadline_wins() {
        let soon = Instant::now() + Duration::from_secs(1);
        let later = soon + Duration::from_secs(60);
        let ctx = Context::background().with_deadline(soon).with_deadline(later);
        assert_eq!(ctx.deadline(), Some(soon));
    }
}
