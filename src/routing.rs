//! Routing table: one bucket per distance class from the local key.

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::time::Duration;
use tracing::{debug, trace};

use crate::bucket::{len_of, lookup_table_of, Bucket, LookupTable, PeerInfo, TouchOutcome};
use crate::config::Config;
use crate::key::{bucket_index, Key, NUM_BUCKETS};
use crate::peer::Peer;

/// Kademlia routing table with 257 lazily created buckets for 256-bit keys.
///
/// Bucket `i` holds peers whose [`bucket_index`] relative to the local key is
/// `i`. Each bucket has its own lock; the slot array is only locked
/// exclusively while a missing bucket is being created.
pub struct RoutingTable<P> {
    local: Key,
    config: Config,
    slots: RwLock<Vec<Option<Arc<Bucket<P>>>>>,
}

impl<P: Peer> RoutingTable<P> {
    pub fn new(local: Key, config: Config) -> Self {
        Self {
            local,
            config,
            slots: RwLock::new(vec![None; NUM_BUCKETS]),
        }
    }

    /// This node's key, which distances are measured from.
    pub fn local_key(&self) -> &Key {
        &self.local
    }

    /// The bucket at `index`, created on first access.
    ///
    /// Out-of-range indices yield `None`, which callers treat as an empty
    /// bucket.
    pub fn get_bucket(&self, index: usize) -> Option<Arc<Bucket<P>>> {
        if index >= NUM_BUCKETS {
            return None;
        }
        if let Some(bucket) = &self.slots.read()[index] {
            return Some(bucket.clone());
        }

        let mut slots = self.slots.write();
        let bucket = slots[index].get_or_insert_with(|| Arc::new(Bucket::new(&self.config)));
        Some(bucket.clone())
    }

    /// Add or refresh `peer` in the bucket its key falls into.
    pub fn touch(&self, peer: P, latency: Duration) -> Option<TouchOutcome> {
        let key = peer.key();
        let index = bucket_index(&self.local, &key);
        let bucket = self.get_bucket(index)?;
        let outcome = bucket.touch(peer, latency);
        match outcome {
            TouchOutcome::Inserted => {
                debug!(bucket = index, peer = %key.short(), ?latency, "peer admitted");
            }
            TouchOutcome::Replaced { evicted } => {
                debug!(
                    bucket = index,
                    peer = %key.short(),
                    evicted = %evicted.short(),
                    ?latency,
                    "peer admitted in place of slowest member"
                );
            }
            TouchOutcome::Rejected => {
                trace!(bucket = index, peer = %key.short(), ?latency, "bucket full; peer declined");
            }
            TouchOutcome::Refreshed => {}
        }
        Some(outcome)
    }

    /// Forget the peer with `key`. Returns whether it was known.
    pub fn remove(&self, key: &Key) -> bool {
        let index = bucket_index(&self.local, key);
        let removed = self.get_bucket(index).is_some_and(|bucket| bucket.remove(key));
        if removed {
            debug!(bucket = index, peer = %key.short(), "peer removed");
        }
        removed
    }

    /// Up to `n` known peers, ranked by estimated closeness to `target`.
    ///
    /// 1. An exact match in the target's home bucket comes first
    /// 2. The home bucket's fastest peers fill in next
    /// 3. Neighbouring buckets are visited outwards, `home + o` before
    ///    `home - o`, until `n` peers are found or both directions run out
    pub fn lookup_n(&self, target: &Key, n: usize) -> Vec<P> {
        let mut found = Vec::with_capacity(n);
        if n == 0 {
            return found;
        }

        let home = bucket_index(&self.local, target);
        let table = self.table(home);

        let exact = table.find(target);
        if let Some(info) = exact {
            found.push(info.peer.clone());
        }
        append_fastest(&mut found, &table, n, exact.map(|info| &info.key));

        let mut offset = 1;
        while found.len() < n {
            let upper = home + offset;
            let lower = home.checked_sub(offset);
            if upper >= NUM_BUCKETS && lower.is_none() {
                break;
            }

            append_fastest(&mut found, &self.table(upper), n, None);
            if found.len() >= n {
                break;
            }
            if let Some(lower) = lower {
                append_fastest(&mut found, &self.table(lower), n, None);
            }
            offset += 1;
        }

        found
    }

    /// Every known peer across all buckets.
    ///
    /// Buckets are read one at a time, so the result may mix slightly
    /// different moments.
    pub fn snapshot(&self) -> Vec<Arc<PeerInfo<P>>> {
        let mut all = Vec::new();
        for index in 0..NUM_BUCKETS {
            all.extend(self.table(index).peers().iter().cloned());
        }
        all
    }

    /// Number of peers in bucket `index`.
    pub fn bucket_len(&self, index: usize) -> usize {
        len_of(self.existing(index).as_ref())
    }

    /// Total number of known peers.
    pub fn len(&self) -> usize {
        self.slots.read().iter().flatten().map(|bucket| bucket.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn table(&self, index: usize) -> Arc<LookupTable<P>> {
        lookup_table_of(self.get_bucket(index).as_ref())
    }

    /// The bucket at `index` without creating it.
    fn existing(&self, index: usize) -> Option<Arc<Bucket<P>>> {
        self.slots.read().get(index).cloned().flatten()
    }
}

/// Append up to `n - found.len()` of the table's fastest peers, skipping `skip`.
fn append_fastest<P: Clone>(found: &mut Vec<P>, table: &LookupTable<P>, n: usize, skip: Option<&Key>) {
    let room = n.saturating_sub(found.len());
    found.extend(
        table
            .fastest()
            .iter()
            .filter(|info| Some(&info.key) != skip)
            .take(room)
            .map(|info| info.peer.clone()),
    );
}
