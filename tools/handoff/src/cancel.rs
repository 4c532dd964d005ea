//! Caller-supplied cancellation for the rendezvous suspension points.

use crate::errors::HandoffError;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Cloneable, idempotent cancellation signal. All clones observe the same state.
#[derive(Debug, Clone)]
pub struct CancelToken {
    state: Arc<watch::Sender<bool>>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (state, _) = watch::channel(false);
        Self {
            state: Arc::new(state),
        }
    }

    pub fn cancel(&self) {
        self.state.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.state.borrow()
    }

    /// Resolves once `cancel` has been called on any clone.
    pub async fn cancelled(&self) {
        let mut observer = self.state.subscribe();
        let sender_gone = observer.wait_for(|cancelled| *cancelled).await.is_err();
        if sender_gone {
            std::future::pending::<()>().await;
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Run `future` to completion on a private current-thread runtime.
///
/// Panics if called from inside an async runtime, like tokio's own
/// `blocking_*` methods.
pub(crate) fn block_on<F: Future>(future: F) -> Result<F::Output, HandoffError> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .map_err(|e| HandoffError::Runtime(e.to_string()))?;
    Ok(runtime.block_on(future))
}

pub(crate) async fn with_deadline<T, F>(
    limit: Duration,
    stage: &str,
    future: F,
) -> Result<T, HandoffError>
where
    F: Future<Output = Result<T, HandoffError>>,
{
    match tokio::time::timeout(limit, future).await {
        Ok(result) => result,
        Err(_) => Err(HandoffError::Cancelled(format!(
            "{stage} after {}ms",
            limit.as_millis()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::CancelToken;

    #[tokio::test]
    async fn cancel_wakes_every_clone() {
        let token = CancelToken::new();
        let observer = token.clone();
        let waiter = tokio::spawn(async move { observer.cancelled().await });
        assert!(!token.is_cancelled());
        token.cancel();
        waiter.await.expect("waiter joins");
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn cancelled_returns_immediately_when_already_cancelled() {
        let token = CancelToken::new();
        token.cancel();
        token.cancel();
        token.cancelled().await;
    }
}
