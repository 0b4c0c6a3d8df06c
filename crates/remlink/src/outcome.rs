//! Single-assignment handshake outcome
//!
//! The driver resolves the [`OutcomeSlot`] exactly once: with the
//! established session when authentication succeeds, or with the cause when
//! the connection fails first. The caller awaits the matching
//! [`PendingOutcome`].

use crate::{RemlinkError, Result};
use parking_lot::Mutex;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::oneshot;
use tracing::error;

/// Create a connected slot/pending pair
pub fn outcome<T>() -> (OutcomeSlot<T>, PendingOutcome<T>) {
    let (tx, rx) = oneshot::channel();
    (
        OutcomeSlot {
            tx: Mutex::new(Some(tx)),
        },
        PendingOutcome { rx },
    )
}

/// Write side of a single-assignment outcome
#[derive(Debug)]
pub struct OutcomeSlot<T> {
    tx: Mutex<Option<oneshot::Sender<Result<T>>>>,
}

impl<T> OutcomeSlot<T> {
    /// Deliver the outcome
    ///
    /// A second call is an implementation error: the first value stands, the
    /// call returns [`RemlinkError::OutcomeAlreadyResolved`] and debug builds
    /// panic.
    pub fn resolve(&self, outcome: Result<T>) -> Result<()> {
        let Some(tx) = self.tx.lock().take() else {
            error!("Handshake outcome resolved twice");
            debug_assert!(false, "handshake outcome resolved twice");
            return Err(RemlinkError::OutcomeAlreadyResolved);
        };
        // The caller may have stopped waiting; the outcome is still settled.
        let _ = tx.send(outcome);
        Ok(())
    }

    /// Whether the outcome has been delivered
    pub fn is_resolved(&self) -> bool {
        self.tx.lock().is_none()
    }
}

/// Read side of a single-assignment outcome
#[derive(Debug)]
pub struct PendingOutcome<T> {
    rx: oneshot::Receiver<Result<T>>,
}

impl<T> Future for PendingOutcome<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(RemlinkError::ConnectionClosed)))
    }
}
