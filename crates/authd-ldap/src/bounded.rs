//! Deadline-bound execution of directory operations.
//!
//! Each operation runs in its own task and hands its result back over a oneshot channel. The
//! caller waits at most `deadline`. A result that arrives after the caller gave up is passed to
//! [`Discard::discard`] exactly once, either by the task itself (the send failed) or by the
//! waiter (the value landed in the channel as the deadline fired).

use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::debug;

/// Disposal of a result nobody is waiting for anymore.
#[async_trait]
pub trait Discard: Send + Sized + 'static {
    /// Releases whatever resources the value holds.
    async fn discard(self);
}

/// Reasons a bounded wait ended without a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum WaitError {
    /// The deadline elapsed first.
    #[error("operation did not complete within {0:?}")]
    TimedOut(Duration),
    /// The background task ended without producing a result.
    #[error("operation task ended without a result")]
    TaskFailed,
}

/// Runs `operation` in a background task and waits for it at most `deadline`.
///
/// # Errors
///
/// Returns [`WaitError::TimedOut`] when the deadline elapses and [`WaitError::TaskFailed`] when
/// the task panicked.
pub async fn run_bounded<T, F>(deadline: Duration, operation: F) -> Result<T, WaitError>
where
    T: Discard,
    F: Future<Output = T> + Send + 'static,
{
    let (tx, mut rx) = oneshot::channel();

    tokio::spawn(async move {
        let value = operation.await;
        if let Err(value) = tx.send(value) {
            debug!("discarding result that completed after its deadline");
            value.discard().await;
        }
    });

    match tokio::time::timeout(deadline, &mut rx).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(_)) => Err(WaitError::TaskFailed),
        Err(_) => {
            rx.close();
            if let Ok(value) = rx.try_recv() {
                debug!("discarding result that raced the deadline");
                tokio::spawn(value.discard());
            }
            Err(WaitError::TimedOut(deadline))
        }
    }
}
