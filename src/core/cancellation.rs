//! C6 — cancellation signal plumbing (spec §4.6).
//!
//! A thin wrapper over [`tokio_util::sync::CancellationToken`] tied to the
//! client connection. The actual terminal-closure sequence lives in
//! [`super::stream::StreamMachine::on_cancel`] — this module only owns the
//! signal and the polling helper used at each suspension point.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures_util::Stream;
use tokio_util::sync::CancellationToken;

/// One per in-flight client request. Cloning shares the same underlying
/// signal; cancelling any clone cancels all of them.
#[derive(Debug, Clone)]
pub struct Cancellation(CancellationToken);

impl Cancellation {
    pub fn new() -> Self {
        Self(CancellationToken::new())
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.is_cancelled()
    }

    pub fn cancel(&self) {
        self.0.cancel();
    }

    /// Resolves once this request has been cancelled. Intended for use in
    /// `tokio::select!` alongside the upstream-chunk read and the
    /// client-write futures (spec §5's suspension points).
    pub async fn cancelled(&self) {
        self.0.cancelled().await;
    }
}

impl Default for Cancellation {
    fn default() -> Self {
        Self::new()
    }
}

/// Wraps a response body stream so dropping it before it yields its terminal
/// item triggers [`Cancellation::cancel`] — the concrete signal for a client
/// disconnecting mid-stream. Axum/hyper give no "are you still there"
/// callback; the only observable fact is that they stopped polling the body
/// and dropped it once a write to the connection failed. A stream that
/// drains normally (`Poll::Ready(None)`) never cancels on drop.
pub struct CancelOnDisconnect<S: Stream> {
    inner: Pin<Box<S>>,
    cancellation: Cancellation,
    done: bool,
}

impl<S: Stream> CancelOnDisconnect<S> {
    pub fn new(inner: S, cancellation: Cancellation) -> Self {
        Self { inner: Box::pin(inner), cancellation, done: false }
    }
}

// `inner` is pinned in its own box, so `CancelOnDisconnect` itself never needs
// to be pinned for `inner` to be polled safely — it is `Unpin` regardless of
// whether `S` is.
impl<S: Stream> Stream for CancelOnDisconnect<S> {
    type Item = S::Item;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        let poll = this.inner.as_mut().poll_next(cx);
        if matches!(poll, Poll::Ready(None)) {
            this.done = true;
        }
        poll
    }
}

impl<S: Stream> Drop for CancelOnDisconnect<S> {
    fn drop(&mut self) {
        if !self.done {
            self.cancellation.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::{stream, StreamExt};

    #[tokio::test]
    async fn cancelled_resolves_immediately_after_cancel() {
        let token = Cancellation::new();
        assert!(!token.is_cancelled());
        token.cancel();
        assert!(token.is_cancelled());
        token.cancelled().await;
    }

    #[tokio::test]
    async fn clones_share_the_same_signal() {
        let token = Cancellation::new();
        let clone = token.clone();
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[tokio::test]
    async fn draining_a_stream_to_completion_never_cancels() {
        let cancellation = Cancellation::new();
        let mut wrapped = CancelOnDisconnect::new(stream::iter(vec![1, 2, 3]), cancellation.clone());
        while wrapped.next().await.is_some() {}
        drop(wrapped);
        assert!(!cancellation.is_cancelled());
    }

    #[tokio::test]
    async fn dropping_a_stream_before_it_finishes_cancels() {
        let cancellation = Cancellation::new();
        let mut wrapped = CancelOnDisconnect::new(stream::iter(vec![1, 2, 3]), cancellation.clone());
        wrapped.next().await;
        drop(wrapped);
        assert!(cancellation.is_cancelled());
    }
}
