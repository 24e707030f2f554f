//! The peer capability the routing core is generic over.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tokio::time::{Duration, Instant};

use crate::deadline::Deadline;
use crate::key::Key;

/// Abstraction over a remote peer and the transport used to reach it.
///
/// The routing core never dials anything itself: it identifies peers, probes
/// them, and asks them for their closest peers exclusively through this
/// trait, so it works with any transport (or with an in-memory mock in tests).
#[async_trait]
pub trait Peer: Clone + Send + Sync + 'static {
    /// The peer's identifier.
    fn key(&self) -> Key;

    /// Check that the peer is alive, giving up at `deadline`.
    async fn ping(&self, deadline: Instant) -> Result<()>;

    /// Ask the peer for up to `n` peers it knows that are closest to `target`.
    async fn lookup(&self, target: Key, n: usize) -> Result<Vec<Self>>;
}

/// Ping `peer` under `scope`, bounded by `timeout`, and measure the round trip.
///
/// Returns the elapsed time together with the probe result. A scope that ends
/// first is reported as an error, so callers treat it like any other failed
/// probe.
pub(crate) async fn probe<P: Peer>(peer: &P, scope: &Deadline, timeout: Duration) -> (Duration, Result<()>) {
    let start = Instant::now();
    let scope = scope.child(timeout);
    let deadline = scope.instant().unwrap_or(start + timeout);

    let result = match scope.run(peer.ping(deadline)).await {
        Ok(result) => result,
        Err(interrupted) => Err(anyhow!(interrupted).context("ping interrupted")),
    };
    (start.elapsed(), result)
}
