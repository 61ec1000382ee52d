//! Time spent waiting on an upload's client.
//!
//! A streamed write interleaves two kinds of waiting: for the backend to
//! accept bytes, and for the client to send the next chunk. Only the first
//! says anything about backend health, so the circuit breaker subtracts the
//! second from its per-call budget.

use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;

use futures::Stream;
use tokio::time::Instant;

#[derive(Debug, Default)]
struct WaitState {
    total: Duration,
    since: Option<Instant>,
}

/// Shared clock of how long a source has kept its consumer waiting.
#[derive(Debug, Clone, Default)]
pub struct SourceWait {
    state: Arc<Mutex<WaitState>>,
}

impl SourceWait {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap `source` so that time it spends pending is recorded here.
    pub fn track<S>(&self, source: S) -> WaitTracked<S> {
        WaitTracked {
            source,
            wait: self.clone(),
        }
    }

    /// Total wait so far, including a wait still in progress.
    pub fn waited(&self) -> Duration {
        let state = self.lock();
        let ongoing = state
            .since
            .map(|since| Instant::now().saturating_duration_since(since))
            .unwrap_or_default();
        state.total + ongoing
    }

    fn begin(&self) {
        let mut state = self.lock();
        if state.since.is_none() {
            state.since = Some(Instant::now());
        }
    }

    fn end(&self) {
        let mut state = self.lock();
        if let Some(since) = state.since.take() {
            state.total += Instant::now().saturating_duration_since(since);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, WaitState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Stream adapter returned by [`SourceWait::track`].
pub struct WaitTracked<S> {
    source: S,
    wait: SourceWait,
}

impl<S> Stream for WaitTracked<S>
where
    S: Stream + Unpin,
{
    type Item = S::Item;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        match Pin::new(&mut this.source).poll_next(cx) {
            Poll::Pending => {
                this.wait.begin();
                Poll::Pending
            }
            ready => {
                this.wait.end();
                ready
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.source.size_hint()
    }
}
