//! Cancellation scopes with an optional deadline.
//!
//! A [`Deadline`] combines a shutdown signal (a `tokio::sync::watch`
//! channel owned by a [`crate::Dht`]) with an optional instant. Every
//! suspension point in the crate waits through [`Deadline::run`], so a
//! shutdown or an elapsed deadline propagates to all outstanding work.

use std::future::{pending, Future};

use tokio::sync::watch;
use tokio::time::{sleep_until, Duration, Instant};

use crate::error::Interrupted;

/// A cancellation signal plus an optional instant after which waits give up.
#[derive(Clone, Debug)]
pub struct Deadline {
    shutdown: watch::Receiver<bool>,
    at: Option<Instant>,
}

impl Deadline {
    /// A scope that is never cancelled and expires `timeout` from now.
    pub fn after(timeout: Duration) -> Self {
        Self::unbounded().child(timeout)
    }

    /// A scope that is never cancelled and expires at `at`.
    pub fn at(at: Instant) -> Self {
        Self {
            at: Some(at),
            ..Self::unbounded()
        }
    }

    /// A scope that is never cancelled and never expires.
    pub fn unbounded() -> Self {
        // With the sender gone the receiver can never observe `true`.
        let (_, shutdown) = watch::channel(false);
        Self { shutdown, at: None }
    }

    pub(crate) fn from_shutdown(shutdown: watch::Receiver<bool>) -> Self {
        Self { shutdown, at: None }
    }

    /// Derive a scope that shares this cancellation signal and expires no
    /// later than `timeout` from now.
    pub fn child(&self, timeout: Duration) -> Self {
        let candidate = Instant::now() + timeout;
        let at = match self.at {
            Some(current) if current < candidate => current,
            _ => candidate,
        };
        Self {
            shutdown: self.shutdown.clone(),
            at: Some(at),
        }
    }

    /// The instant this scope expires, if any.
    pub fn instant(&self) -> Option<Instant> {
        self.at
    }

    /// Non-blocking check whether the scope is already over.
    pub fn check(&self) -> Option<Interrupted> {
        if *self.shutdown.borrow() {
            return Some(Interrupted::Cancelled);
        }
        match self.at {
            Some(at) if at <= Instant::now() => Some(Interrupted::DeadlineExceeded),
            _ => None,
        }
    }

    /// Resolve once the scope is cancelled or expires.
    pub async fn expired(&self) -> Interrupted {
        let mut shutdown = self.shutdown.clone();
        let cancelled = async move {
            loop {
                if *shutdown.borrow_and_update() {
                    return;
                }
                if shutdown.changed().await.is_err() {
                    pending::<()>().await;
                }
            }
        };

        match self.at {
            Some(at) => tokio::select! {
                _ = cancelled => Interrupted::Cancelled,
                _ = sleep_until(at) => Interrupted::DeadlineExceeded,
            },
            None => {
                cancelled.await;
                Interrupted::Cancelled
            }
        }
    }

    /// Drive `fut` to completion unless the scope ends first.
    ///
    /// An already-expired scope never polls `fut`.
    pub async fn run<F: Future>(&self, fut: F) -> Result<F::Output, Interrupted> {
        if let Some(reason) = self.check() {
            return Err(reason);
        }
        tokio::select! {
            biased;
            reason = self.expired() => Err(reason),
            out = fut => Ok(out),
        }
    }
}
