//! Single-shot completion tokens.
//!
//! A [`Completion`] accompanies every inbound frame and every outbound send.
//! Resolving it consumes the token, so a second resolution cannot be
//! expressed. A token dropped without being resolved fails with
//! [`ProtocolError::Cancelled`]; closing a connection therefore fails every
//! pending token rather than leaving its waiter hanging.

use std::{
    fmt,
    future::Future,
    pin::Pin,
    sync::{Arc, Mutex},
    task::{Context, Poll},
};

use tokio::sync::oneshot;

use crate::error::{ProtocolError, Result};

type Callback = Box<dyn FnOnce(Result<()>) + Send + 'static>;

enum Target {
    Channel(oneshot::Sender<Result<()>>),
    Callback(Callback),
    Noop,
}

impl Target {
    fn resolve(self, outcome: Result<()>) {
        match self {
            // The waiter may have given up; nothing else to notify.
            Self::Channel(tx) => drop(tx.send(outcome)),
            Self::Callback(f) => f(outcome),
            Self::Noop => {}
        }
    }
}

/// Token resolved exactly once with the outcome of a frame or send.
///
/// # Examples
///
/// ```
/// use wiresocket::completion::Completion;
///
/// let (completion, mut outcome) = Completion::channel();
/// assert!(outcome.try_outcome().is_none());
/// completion.succeed();
/// assert_eq!(outcome.try_outcome(), Some(Ok(())));
/// ```
#[must_use = "an unresolved completion fails with `Cancelled` when dropped"]
pub struct Completion {
    target: Option<Target>,
}

impl Completion {
    /// Create a completion paired with a future observing its outcome.
    pub fn channel() -> (Self, CompletionFuture) {
        let (tx, rx) = oneshot::channel();
        let completion = Self {
            target: Some(Target::Channel(tx)),
        };
        (completion, CompletionFuture { rx, outcome: None })
    }

    /// Create a completion that runs `f` with the outcome.
    pub fn from_fn<F>(f: F) -> Self
    where
        F: FnOnce(Result<()>) + Send + 'static,
    {
        Self {
            target: Some(Target::Callback(Box::new(f))),
        }
    }

    /// Completion whose outcome nobody observes.
    pub fn noop() -> Self {
        Self {
            target: Some(Target::Noop),
        }
    }

    /// Resolve successfully.
    pub fn succeed(self) { self.complete(Ok(())); }

    /// Resolve with `error`.
    pub fn fail(self, error: ProtocolError) { self.complete(Err(error)); }

    /// Resolve with `outcome`.
    pub fn complete(mut self, outcome: Result<()>) {
        if let Some(target) = self.target.take() {
            target.resolve(outcome);
        }
    }

    /// Wrap this completion in a derived token.
    ///
    /// Resolving the derived token resolves `self` immediately with the same
    /// outcome; dropping it fails `self` with [`ProtocolError::Cancelled`].
    pub fn derive(self) -> Self { Self::from_fn(move |outcome| self.complete(outcome)) }

    /// Fan this completion out to `parts` tokens.
    ///
    /// `self` resolves once every part has resolved: successfully when all
    /// parts succeeded, otherwise with the first failure observed. Asking for
    /// zero parts resolves `self` successfully at once.
    pub fn split(self, parts: usize) -> Vec<Self> {
        if parts == 0 {
            self.succeed();
            return Vec::new();
        }
        let shared = Arc::new(Mutex::new(SplitState {
            remaining: parts,
            failure: None,
            target: Some(self),
        }));
        (0..parts)
            .map(|_| {
                let shared = Arc::clone(&shared);
                Self::from_fn(move |outcome| SplitState::record(&shared, outcome))
            })
            .collect()
    }
}

impl Drop for Completion {
    fn drop(&mut self) {
        if let Some(target) = self.target.take() {
            target.resolve(Err(ProtocolError::Cancelled));
        }
    }
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &self.target {
            Some(Target::Channel(_)) => "channel",
            Some(Target::Callback(_)) => "callback",
            Some(Target::Noop) => "noop",
            None => "resolved",
        };
        f.debug_struct("Completion").field("target", &kind).finish()
    }
}

struct SplitState {
    remaining: usize,
    failure: Option<ProtocolError>,
    target: Option<Completion>,
}

impl SplitState {
    fn record(shared: &Mutex<Self>, outcome: Result<()>) {
        let finished = {
            let Ok(mut state) = shared.lock() else {
                return;
            };
            if let Err(error) = outcome {
                state.failure.get_or_insert(error);
            }
            state.remaining = state.remaining.saturating_sub(1);
            if state.remaining == 0 {
                state
                    .target
                    .take()
                    .map(|target| (target, state.failure.take()))
            } else {
                None
            }
        };
        // Resolve outside the lock; the target may run arbitrary callbacks.
        if let Some((target, failure)) = finished {
            match failure {
                Some(error) => target.fail(error),
                None => target.succeed(),
            }
        }
    }
}

/// Future resolving to the outcome of a [`Completion`] created by
/// [`Completion::channel`].
#[derive(Debug)]
pub struct CompletionFuture {
    rx: oneshot::Receiver<Result<()>>,
    outcome: Option<Result<()>>,
}

impl CompletionFuture {
    /// Return the outcome if the completion has already resolved.
    pub fn try_outcome(&mut self) -> Option<Result<()>> {
        if self.outcome.is_none() {
            match self.rx.try_recv() {
                Ok(outcome) => self.outcome = Some(outcome),
                Err(oneshot::error::TryRecvError::Empty) => return None,
                Err(oneshot::error::TryRecvError::Closed) => {
                    self.outcome = Some(Err(ProtocolError::Cancelled));
                }
            }
        }
        self.outcome.clone()
    }

    /// Whether the completion has resolved.
    pub fn is_done(&mut self) -> bool { self.try_outcome().is_some() }
}

impl Future for CompletionFuture {
    type Output = Result<()>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if let Some(outcome) = &this.outcome {
            return Poll::Ready(outcome.clone());
        }
        match Pin::new(&mut this.rx).poll(cx) {
            Poll::Ready(received) => {
                let outcome = received.unwrap_or(Err(ProtocolError::Cancelled));
                this.outcome = Some(outcome.clone());
                Poll::Ready(outcome)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}
