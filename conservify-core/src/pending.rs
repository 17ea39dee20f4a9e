//! Pending results: the consumer-facing half of a resolve/reject pair.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::oneshot;

use crate::error::Error;

/// Create a linked completer/pending pair.
pub(crate) fn pending<T>() -> (Completer<T>, Pending<T>) {
    let (tx, rx) = oneshot::channel();
    (Completer { tx }, Pending { rx, taken: false })
}

/// Settles a pending result. Consumed on use, so an operation settles at most once.
pub(crate) struct Completer<T> {
    tx: oneshot::Sender<Result<T, Error>>,
}

impl<T> Completer<T> {
    pub(crate) fn resolve(self, value: T) {
        self.settle(Ok(value));
    }

    pub(crate) fn reject(self, error: Error) {
        self.settle(Err(error));
    }

    fn settle(self, result: Result<T, Error>) {
        if self.tx.send(result).is_err() {
            tracing::trace!("pending result dropped by consumer");
        }
    }
}

/// Eventual outcome of a dispatched operation.
///
/// Resolves exactly once. If the owning client is disposed first, resolves to
/// [`Error::Disposed`].
#[must_use = "a pending result does nothing unless awaited or polled"]
pub struct Pending<T> {
    rx: oneshot::Receiver<Result<T, Error>>,
    /// The outcome was already handed out by `try_take`.
    taken: bool,
}

impl<T> Pending<T> {
    /// Already-settled pending result.
    pub(crate) fn ready(result: Result<T, Error>) -> Self {
        let (completer, pending) = pending();
        completer.settle(result);
        pending
    }

    /// Non-blocking check. `None` while the operation is still in flight,
    /// and on every call after the outcome has been taken once.
    pub fn try_take(&mut self) -> Option<Result<T, Error>> {
        if self.taken {
            return None;
        }
        let result = match self.rx.try_recv() {
            Ok(result) => result,
            Err(oneshot::error::TryRecvError::Empty) => return None,
            Err(oneshot::error::TryRecvError::Closed) => Err(Error::Disposed),
        };
        self.taken = true;
        Some(result)
    }

    /// Whether `try_take` already returned the outcome. Awaiting afterwards
    /// yields [`Error::Disposed`].
    pub fn is_taken(&self) -> bool {
        self.taken
    }
}

impl<T> Future for Pending<T> {
    type Output = Result<T, Error>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if this.taken {
            return Poll::Ready(Err(Error::Disposed));
        }
        Pin::new(&mut this.rx)
            .poll(cx)
            .map(|r| r.unwrap_or(Err(Error::Disposed)))
    }
}
