use crate::core::logging::get_request_id;
use crate::core::metrics::get_metrics;
use crate::core::{StreamOutcome, StreamTracker};
use axum::body::Bytes;
use futures::stream::Stream;
use std::fmt::Display;
use std::pin::Pin;
use std::task::{Context, Poll};

/// A stream wrapper that records how a relayed stream ended.
///
/// axum drops the response body as soon as the client goes away, which drops
/// this wrapper and with it the upstream body stream, releasing the upstream
/// connection. A stream polled to its end is recorded as completed and one
/// that yielded an upstream error as failed, so only a drop with neither is
/// counted as a client disconnect.
pub struct DisconnectStream<S> {
    stream: S,
    tracker: StreamTracker,
    request_id: String,
    chunks: usize,
    bytes: usize,
}

impl<S> DisconnectStream<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            tracker: StreamTracker::new(),
            request_id: get_request_id(),
            chunks: 0,
            bytes: 0,
        }
    }

    /// Handle for observing the outcome after the stream is handed off.
    pub fn tracker(&self) -> StreamTracker {
        self.tracker.clone()
    }
}

impl<S, E> Stream for DisconnectStream<S>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: Display,
{
    type Item = Result<Bytes, E>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let poll = Pin::new(&mut self.stream).poll_next(cx);
        match &poll {
            Poll::Ready(Some(Ok(chunk))) => {
                self.chunks += 1;
                self.bytes += chunk.len();
            }
            Poll::Ready(Some(Err(e))) => {
                if self.tracker.finish(StreamOutcome::UpstreamFailed) {
                    tracing::warn!(
                        request_id = %self.request_id,
                        chunks = self.chunks,
                        bytes = self.bytes,
                        error = %e,
                        "Upstream stream failed before completion"
                    );
                    get_metrics().stream_failures_total.inc();
                }
            }
            Poll::Ready(None) => {
                self.tracker.finish(StreamOutcome::Completed);
            }
            Poll::Pending => {}
        }
        poll
    }
}

impl<S> Drop for DisconnectStream<S> {
    fn drop(&mut self) {
        if !self.tracker.finish(StreamOutcome::ClientDisconnected) {
            tracing::debug!(
                request_id = %self.request_id,
                chunks = self.chunks,
                bytes = self.bytes,
                outcome = ?self.tracker.outcome(),
                "Stream closed"
            );
            return;
        }

        tracing::info!(
            request_id = %self.request_id,
            chunks = self.chunks,
            bytes = self.bytes,
            "Client disconnected before stream completed, dropping upstream body"
        );
        get_metrics().client_disconnects_total.inc();
    }
}
