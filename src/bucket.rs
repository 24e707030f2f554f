//! A single routing bucket with latency-aware admission.
//!
//! Membership is kept sorted by key. Readers get an immutable
//! [`LookupTable`] snapshot that is cached per generation: every mutation
//! bumps the generation, and the next reader rebuilds the snapshot under
//! the exclusive lock after re-checking that nobody beat it to it.

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::time::{Duration, Instant};

use crate::config::Config;
use crate::key::Key;
use crate::peer::Peer;

/// One known peer.
///
/// Records are replaced wholesale when they change, so snapshots handed out
/// earlier keep seeing the values they were built from.
#[derive(Clone, Debug)]
pub struct PeerInfo<P> {
    /// The peer's key.
    pub key: Key,
    /// Handle used to reach the peer.
    pub peer: P,
    /// Smoothed round-trip estimate.
    pub latency: Duration,
    /// When the peer was admitted.
    pub first_seen: Instant,
    /// When the peer was last touched.
    pub last_seen: Instant,
}

/// Three orderings of the same bucket membership.
#[derive(Debug)]
pub struct LookupTable<P> {
    fastest: Vec<Arc<PeerInfo<P>>>,
    oldest: Vec<Arc<PeerInfo<P>>>,
    peers: Vec<Arc<PeerInfo<P>>>,
}

impl<P> Default for LookupTable<P> {
    fn default() -> Self {
        Self {
            fastest: Vec::new(),
            oldest: Vec::new(),
            peers: Vec::new(),
        }
    }
}

impl<P> LookupTable<P> {
    fn build(peers: &[Arc<PeerInfo<P>>]) -> Self {
        let mut fastest = peers.to_vec();
        fastest.sort_by_key(|info| info.latency);
        let mut oldest = peers.to_vec();
        oldest.sort_by_key(|info| info.first_seen);
        Self {
            fastest,
            oldest,
            peers: peers.to_vec(),
        }
    }

    /// Ascending latency.
    pub fn fastest(&self) -> &[Arc<PeerInfo<P>>] {
        &self.fastest
    }

    /// Ascending first-seen time.
    pub fn oldest(&self) -> &[Arc<PeerInfo<P>>] {
        &self.oldest
    }

    /// Ascending key.
    pub fn peers(&self) -> &[Arc<PeerInfo<P>>] {
        &self.peers
    }

    /// Exact-match lookup by key.
    pub fn find(&self, key: &Key) -> Option<&Arc<PeerInfo<P>>> {
        self.peers
            .binary_search_by(|info| info.key.cmp(key))
            .ok()
            .map(|idx| &self.peers[idx])
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

/// Outcome of [`Bucket::touch`].
///
/// Purely informational: a declined admission is not an error.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TouchOutcome {
    /// The peer was already known; its latency and last-seen time were updated.
    Refreshed,
    /// The bucket had room and the peer was added.
    Inserted,
    /// The bucket was full and the slowest member made room for a faster peer.
    Replaced {
        /// Key of the member that was dropped.
        evicted: Key,
    },
    /// The bucket was full and the peer was not faster than average.
    Rejected,
}

struct BucketState<P> {
    /// Sorted by key.
    peers: Vec<Arc<PeerInfo<P>>>,
    generation: u64,
    cached: Option<(u64, Arc<LookupTable<P>>)>,
}

impl<P> BucketState<P> {
    fn position(&self, key: &Key) -> Result<usize, usize> {
        self.peers.binary_search_by(|info| info.key.cmp(key))
    }

    fn cached_table(&self) -> Option<Arc<LookupTable<P>>> {
        match &self.cached {
            Some((generation, table)) if *generation == self.generation => Some(table.clone()),
            _ => None,
        }
    }
}

/// Bounded set of known peers sharing one distance class.
pub struct Bucket<P> {
    capacity: usize,
    ema_alpha: f64,
    default_latency: Duration,
    state: RwLock<BucketState<P>>,
}

impl<P: Peer> Bucket<P> {
    pub fn new(config: &Config) -> Self {
        Self {
            capacity: config.bucket_capacity.max(1),
            ema_alpha: config.latency_ema_alpha(),
            default_latency: config.default_latency,
            state: RwLock::new(BucketState {
                peers: Vec::new(),
                generation: 0,
                cached: None,
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Add or refresh a peer.
    ///
    /// - A known peer gets its latency estimate and last-seen time refreshed
    /// - A new peer is inserted while the bucket has room
    /// - A full bucket swaps its slowest member for a peer that is strictly
    ///   faster than the current average, and declines it otherwise
    pub fn touch(&self, peer: P, latency: Duration) -> TouchOutcome {
        let now = Instant::now();
        let key = peer.key();

        let mut state = self.state.write();

        let pos = match state.position(&key) {
            Ok(existing) => {
                let info = Arc::make_mut(&mut state.peers[existing]);
                if !latency.is_zero() {
                    info.latency = self.smoothed_latency(latency);
                }
                info.last_seen = now;
                state.generation += 1;
                return TouchOutcome::Refreshed;
            }
            Err(pos) => pos,
        };

        let info = Arc::new(PeerInfo {
            key,
            peer,
            latency: if latency.is_zero() { self.default_latency } else { latency },
            first_seen: now,
            last_seen: now,
        });

        if state.peers.len() < self.capacity {
            state.peers.insert(pos, info);
            state.generation += 1;
            return TouchOutcome::Inserted;
        }

        let (slowest, average) = slowest_and_average(&state.peers);
        if latency >= average {
            return TouchOutcome::Rejected;
        }

        let evicted = state.peers.remove(slowest).key;
        let pos = match state.position(&key) {
            Ok(pos) | Err(pos) => pos,
        };
        state.peers.insert(pos, info);
        state.generation += 1;
        TouchOutcome::Replaced { evicted }
    }

    /// Smoothing step with α = 2 / (periods + 1).
    ///
    /// Both terms are the fresh sample, so the previous estimate does not
    /// carry forward.
    fn smoothed_latency(&self, sample: Duration) -> Duration {
        sample.mul_f64(self.ema_alpha) + sample.mul_f64(1.0 - self.ema_alpha)
    }
}

impl<P> Bucket<P> {
    /// Drop the peer with `key`. Returns whether it was present.
    pub fn remove(&self, key: &Key) -> bool {
        let mut state = self.state.write();
        match state.position(key) {
            Ok(idx) => {
                state.peers.remove(idx);
                state.generation += 1;
                true
            }
            Err(_) => false,
        }
    }

    pub fn contains(&self, key: &Key) -> bool {
        self.state.read().position(key).is_ok()
    }

    pub fn len(&self) -> usize {
        self.state.read().peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The current snapshot, rebuilt if membership changed since the last one.
    pub fn lookup_table(&self) -> Arc<LookupTable<P>> {
        if let Some(table) = self.state.read().cached_table() {
            return table;
        }

        let mut state = self.state.write();
        if let Some(table) = state.cached_table() {
            return table;
        }
        let table = Arc::new(LookupTable::build(&state.peers));
        state.cached = Some((state.generation, table.clone()));
        table
    }
}

/// Index of the first slowest member and the mean latency. `peers` is non-empty.
fn slowest_and_average<P>(peers: &[Arc<PeerInfo<P>>]) -> (usize, Duration) {
    let mut total = Duration::ZERO;
    let mut slowest = 0;
    let mut max = Duration::ZERO;
    for (idx, info) in peers.iter().enumerate() {
        total += info.latency;
        if info.latency > max {
            max = info.latency;
            slowest = idx;
        }
    }
    (slowest, total / peers.len().max(1) as u32)
}

/// Snapshot of a possibly absent bucket; absent means empty.
pub(crate) fn lookup_table_of<P>(bucket: Option<&Arc<Bucket<P>>>) -> Arc<LookupTable<P>> {
    bucket.map(|b| b.lookup_table()).unwrap_or_default()
}

/// Size of a possibly absent bucket; absent means empty.
pub(crate) fn len_of<P>(bucket: Option<&Arc<Bucket<P>>>) -> usize {
    bucket.map_or(0, |b| b.len())
}
