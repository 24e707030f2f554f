//! Iterative, concurrency-bounded search for the peers closest to a target.
//!
//! A seek starts from the local routing table and recursively asks every
//! newly admitted peer for its own closest peers:
//!
//! 1. A local task feeds [`RoutingTable::lookup_n`] into the result set
//! 2. Every peer that enters the result set is queued for a remote query
//! 3. A dispatcher spawns one remote task per queued peer; each feeds the
//!    peers it learns about back into the result set
//! 4. The seek ends when no task is running and nothing is queued, or when
//!    its [`Deadline`] fires
//!
//! Remote queries pass two limiters: the fast lane admits a handful of new
//! dials per debounce window, and the slow lane bounds how many queries are
//! in flight at once.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot, Notify, Semaphore};
use tokio::time::{sleep, Duration};
use tracing::{debug, trace};

use crate::config::Config;
use crate::deadline::Deadline;
use crate::error::Interrupted;
use crate::key::{xor_distance, Key};
use crate::peer::Peer;
use crate::routing::RoutingTable;

/// Callback invoked when a remote lookup fails, with the queried peer's key.
pub type ErrorHook = Arc<dyn Fn(&Key, &anyhow::Error) + Send + Sync>;

/// Result of a seek.
#[derive(Debug)]
pub struct SeekOutcome<P> {
    /// Closest peers found, strictly ascending by distance to the target.
    pub peers: Vec<P>,
    /// Set when the deadline or a shutdown ended the seek early; `peers` then
    /// holds the best partial result.
    pub interrupted: Option<Interrupted>,
}

impl<P> SeekOutcome<P> {
    /// The peers, or the interruption if there was one.
    pub fn into_result(self) -> Result<Vec<P>, Interrupted> {
        match self.interrupted {
            Some(reason) => Err(reason),
            None => Ok(self.peers),
        }
    }
}

struct SeekEntry<P> {
    distance: Key,
    peer: P,
}

/// Per-call state shared by the local task, the dispatcher and remote tasks.
struct SeekState<P: Peer> {
    table: Arc<RoutingTable<P>>,
    target: Key,
    n: usize,
    lookup_timeout: Duration,
    fast_lane_debounce: Duration,
    /// Sorted ascending by distance, unique distances, at most `n` long.
    results: Mutex<Vec<SeekEntry<P>>>,
    queue: mpsc::Sender<P>,
    fast_lane: Arc<Semaphore>,
    slow_lane: Semaphore,
    /// Running tasks plus queued peers that have not been dispatched.
    pending: AtomicUsize,
    idle: Notify,
    deadline: Deadline,
    on_error: Option<ErrorHook>,
}

/// Search the network for the `n` peers closest to `target`.
pub(crate) async fn seek<P: Peer>(
    table: Arc<RoutingTable<P>>,
    config: &Config,
    on_error: Option<ErrorHook>,
    target: Key,
    n: usize,
    deadline: &Deadline,
) -> SeekOutcome<P> {
    let n = if n == 0 { config.default_seek_count.max(1) } else { n };
    let (queue, pending_peers) = mpsc::channel(n);

    let state = Arc::new(SeekState {
        table,
        target,
        n,
        lookup_timeout: config.lookup_timeout,
        fast_lane_debounce: config.fast_lane_debounce,
        results: Mutex::new(Vec::with_capacity(n)),
        queue,
        fast_lane: Arc::new(Semaphore::new(config.fast_lane_permits.max(1))),
        slow_lane: Semaphore::new(config.slow_lane_permits.max(1)),
        // The local task.
        pending: AtomicUsize::new(1),
        idle: Notify::new(),
        deadline: deadline.clone(),
        on_error,
    });

    let (stop, stopped) = oneshot::channel();
    let dispatcher = tokio::spawn(dispatch(state.clone(), pending_peers, stopped));

    let local = state.clone();
    tokio::spawn(async move {
        local.local_seek().await;
        local.finish_one();
    });

    state.wait_idle().await;
    let _ = stop.send(());
    let _ = dispatcher.await;

    let peers: Vec<P> = state
        .results
        .lock()
        .iter()
        .map(|entry| entry.peer.clone())
        .collect();
    let interrupted = deadline.check();
    trace!(
        target = %target.short(),
        n,
        found = peers.len(),
        ?interrupted,
        "seek finished"
    );
    SeekOutcome { peers, interrupted }
}

/// Spawn a remote task for every queued peer until stopped or the deadline
/// fires. Peers left in the queue are released from the pending count.
async fn dispatch<P: Peer>(
    state: Arc<SeekState<P>>,
    mut queue: mpsc::Receiver<P>,
    mut stop: oneshot::Receiver<()>,
) {
    let expired = state.deadline.expired();
    tokio::pin!(expired);

    loop {
        tokio::select! {
            biased;
            _ = &mut stop => break,
            _ = &mut expired => break,
            next = queue.recv() => match next {
                Some(peer) => {
                    tokio::spawn(state.clone().remote_seek(peer));
                }
                None => break,
            },
        }
    }

    // `recv` also waits out senders that reserved a slot before the close.
    queue.close();
    while queue.recv().await.is_some() {
        state.finish_one();
    }
}

impl<P: Peer> SeekState<P> {
    /// Offer a candidate to the result set.
    ///
    /// Candidates are deduplicated by their distance to the target. An
    /// admitted candidate is queued for a remote query.
    async fn add_entry(&self, peer: P) {
        let distance = xor_distance(&self.target, &peer.key());
        {
            let mut results = self.results.lock();
            let pos = match results.binary_search_by(|entry| entry.distance.cmp(&distance)) {
                Ok(_) => return,
                Err(pos) => pos,
            };
            if pos >= self.n {
                return;
            }
            results.insert(
                pos,
                SeekEntry {
                    distance,
                    peer: peer.clone(),
                },
            );
            results.truncate(self.n);
            self.pending.fetch_add(1, Ordering::AcqRel);
        }

        if self.queue.send(peer).await.is_err() {
            // Dispatcher already gone.
            self.finish_one();
        }
    }

    async fn local_seek(&self) {
        for peer in self.table.lookup_n(&self.target, self.n) {
            self.add_entry(peer).await;
        }
    }

    async fn remote_seek(self: Arc<Self>, peer: P) {
        if peer.key() == *self.table.local_key() {
            self.local_seek().await;
        } else {
            self.query_remote(&peer).await;
        }
        self.finish_one();
    }

    async fn query_remote(&self, peer: &P) {
        let scope = self.deadline.child(self.lookup_timeout);

        let Ok(Ok(fast)) = scope.run(self.fast_lane.clone().acquire_owned()).await else {
            return;
        };
        let debounce = scope.clone();
        let hold = self.fast_lane_debounce;
        tokio::spawn(async move {
            let _fast = fast;
            let _ = debounce.run(sleep(hold)).await;
        });

        let Ok(Ok(_slow)) = scope.run(self.slow_lane.acquire()).await else {
            return;
        };

        match scope.run(peer.lookup(self.target, self.n)).await {
            Ok(Ok(found)) => {
                for candidate in found {
                    self.add_entry(candidate).await;
                }
            }
            Ok(Err(err)) => self.report(peer, err),
            Err(reason) => {
                trace!(peer = %peer.key().short(), %reason, "remote lookup interrupted");
            }
        }
    }

    fn report(&self, peer: &P, err: anyhow::Error) {
        let key = peer.key();
        debug!(peer = %key.short(), target = %self.target.short(), "remote lookup failed: {err:?}");
        if let Some(hook) = &self.on_error {
            hook(&key, &err);
        }
    }

    fn finish_one(&self) {
        if self.pending.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.idle.notify_waiters();
        }
    }

    async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.pending.load(Ordering::Acquire) == 0 {
                return;
            }
            notified.await;
        }
    }
}
