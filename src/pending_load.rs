use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::oneshot;

use crate::{error::LoadError, loader_op::Outcome};

/// One outstanding [`crate::Loader::load`].
///
/// The key is registered with the loader as soon as the `PendingLoad` is created; awaiting it only
/// waits for the scheduler to flush the loader. Every `PendingLoad` ends either resolved or failed
/// and never returns to pending.
#[must_use = "a PendingLoad does nothing unless awaited"]
pub struct PendingLoad<V> {
    loader: &'static str,
    state: State<V>,
}

enum State<V> {
    Waiting(oneshot::Receiver<Outcome<V>>),
    Ready(Option<Outcome<V>>),
}

impl<V> PendingLoad<V> {
    pub(crate) fn waiting(loader: &'static str, response_rx: oneshot::Receiver<Outcome<V>>) -> Self {
        Self { loader, state: State::Waiting(response_rx) }
    }

    pub(crate) fn ready(loader: &'static str, outcome: Outcome<V>) -> Self {
        Self { loader, state: State::Ready(Some(outcome)) }
    }

    /// Name of the loader this load was issued against.
    pub fn loader(&self) -> &'static str {
        self.loader
    }
}

// `V` is only ever moved out, never pinned.
impl<V> Unpin for PendingLoad<V> {}

impl<V> Future for PendingLoad<V> {
    type Output = Result<V, LoadError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let loader = this.loader;
        match &mut this.state {
            State::Waiting(response_rx) => Pin::new(response_rx).poll(cx).map(|response| {
                // The worker went away with the registry before answering.
                response.unwrap_or(Err(LoadError::RegistryClosed { loader }))
            }),
            State::Ready(outcome) => {
                Poll::Ready(outcome.take().expect("PendingLoad polled after completion"))
            }
        }
    }
}

impl<V> fmt::Debug for PendingLoad<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &self.state {
            State::Waiting(_) => "waiting",
            State::Ready(Some(Ok(_))) => "resolved",
            State::Ready(Some(Err(_))) => "failed",
            State::Ready(None) => "taken",
        };
        f.debug_struct("PendingLoad").field("loader", &self.loader).field("state", &state).finish()
    }
}
