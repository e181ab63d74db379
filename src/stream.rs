//! Typed subscriber stream handles shared by both streaming engines.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::WsError;

/// Per-subscriber event buffer capacity.
pub(crate) const STREAM_BUFFER: usize = 100;
/// Per-subscriber error buffer capacity.
pub(crate) const ERR_BUFFER: usize = 10;

pub(crate) type CleanupFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Synchronous teardown returning an optional wire-level follow-up.
///
/// The sync part detaches the subscriber from the engine's index and computes
/// the membership delta; the returned future performs the best-effort
/// unsubscribe frame write.
pub(crate) type CloseFn = Box<dyn FnOnce() -> Option<CleanupFuture> + Send>;

pub(crate) type SharedCloser = Arc<Mutex<Option<CloseFn>>>;

/// A typed event stream handed to a subscriber.
///
/// The stream holds only channel receivers and a close handle; the engine's
/// index owns the subscription entry. Dropping the stream performs the same
/// cleanup as [`EventStream::close`], spawned onto the runtime best-effort.
pub struct EventStream<E> {
    events: mpsc::Receiver<E>,
    errors: mpsc::Receiver<WsError>,
    closer: SharedCloser,
}

impl<E> EventStream<E> {
    pub(crate) fn new(
        events: mpsc::Receiver<E>,
        errors: mpsc::Receiver<WsError>,
        close: impl FnOnce() -> Option<CleanupFuture> + Send + 'static,
    ) -> Self {
        Self {
            events,
            errors,
            closer: Arc::new(Mutex::new(Some(Box::new(close)))),
        }
    }

    /// Receives the next event; `None` once the subscription is closed.
    pub async fn recv(&mut self) -> Option<E> {
        self.events.recv().await
    }

    /// Non-blocking receive.
    pub fn try_recv(&mut self) -> Option<E> {
        self.events.try_recv().ok()
    }

    /// Receives the next error notification (lag reports and the like).
    pub async fn recv_err(&mut self) -> Option<WsError> {
        self.errors.recv().await
    }

    /// Non-blocking error receive.
    pub fn try_recv_err(&mut self) -> Option<WsError> {
        self.errors.try_recv().ok()
    }

    /// Closes the subscription: idempotent, and the first call performs the
    /// membership-backed delta unsubscribe.
    pub async fn close(&mut self) {
        let close = self.closer.lock().expect("closer lock poisoned").take();
        if let Some(close) = close {
            if let Some(cleanup) = close() {
                cleanup.await;
            }
        }
    }

    /// Binds the subscription lifetime to a cancellation token: when the
    /// token fires, a background task runs the close path.
    pub fn abort_on(&self, token: CancellationToken) {
        let closer = Arc::clone(&self.closer);
        tokio::spawn(async move {
            token.cancelled().await;
            let close = closer.lock().expect("closer lock poisoned").take();
            if let Some(close) = close {
                if let Some(cleanup) = close() {
                    cleanup.await;
                }
            }
        });
    }

    /// Splits the stream into raw parts for internal re-wrapping (stream
    /// mapping). The returned closer keeps sole ownership of the teardown.
    pub(crate) fn into_parts(
        mut self,
    ) -> (mpsc::Receiver<E>, mpsc::Receiver<WsError>, SharedCloser) {
        let (tx, empty_events) = mpsc::channel(1);
        drop(tx);
        let (tx, empty_errors) = mpsc::channel(1);
        drop(tx);
        let events = std::mem::replace(&mut self.events, empty_events);
        let errors = std::mem::replace(&mut self.errors, empty_errors);
        let closer = std::mem::replace(&mut self.closer, Arc::new(Mutex::new(None)));
        (events, errors, closer)
    }

    pub(crate) fn from_parts(
        events: mpsc::Receiver<E>,
        errors: mpsc::Receiver<WsError>,
        closer: SharedCloser,
    ) -> Self {
        Self {
            events,
            errors,
            closer,
        }
    }
}

impl<E> futures_util::Stream for EventStream<E> {
    type Item = E;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().events.poll_recv(cx)
    }
}

impl<E> Drop for EventStream<E> {
    fn drop(&mut self) {
        let close = match self.closer.lock() {
            Ok(mut guard) => guard.take(),
            Err(_) => None,
        };
        if let Some(close) = close {
            if let Some(cleanup) = close() {
                if let Ok(handle) = tokio::runtime::Handle::try_current() {
                    handle.spawn(cleanup);
                }
            }
        }
    }
}
