//! Background upkeep of the routing table.
//!
//! Two loops run for the lifetime of a started [`crate::Dht`]:
//!
//! - **Filler**: every fill interval, one seek per distance class towards a
//!   random key in that class; every peer found is probed and added.
//! - **Pinger**: every ping interval, every known peer is probed, slowest
//!   first, with the probes spread evenly across the ping window. Peers that
//!   fail are removed, peers that answer get their latency refreshed.
//!
//! Both loops own their in-flight work through a [`JoinSet`], so a shutdown
//! aborts whatever is still running.

use std::sync::Arc;

use tokio::task::JoinSet;
use tokio::time::{interval_at, sleep_until, Instant, MissedTickBehavior};
use tracing::{debug, trace};

use crate::bucket::PeerInfo;
use crate::deadline::Deadline;
use crate::dht::NodeCore;
use crate::key::{random_key_in_bucket, NUM_BUCKETS};
use crate::peer::{probe, Peer};

// ─────────────────────────────────────────────────────────────────────────────
// Filler
// ─────────────────────────────────────────────────────────────────────────────

pub(crate) async fn run_filler<P: Peer>(core: NodeCore<P>, scope: Deadline) {
    let period = core.config.fill_interval;
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut rounds = JoinSet::new();

    loop {
        tokio::select! {
            biased;
            _ = scope.expired() => break,
            Some(_) = rounds.join_next(), if !rounds.is_empty() => {}
            _ = ticker.tick() => {
                trace!(buckets = NUM_BUCKETS, "filling routing table");
                for index in 0..NUM_BUCKETS {
                    rounds.spawn(fill_bucket(core.clone(), scope.clone(), index));
                }
            }
        }
    }

    rounds.abort_all();
}

/// Seek towards a random key in bucket `index` and add everything found.
pub(crate) async fn fill_bucket<P: Peer>(core: NodeCore<P>, scope: Deadline, index: usize) {
    let local = *core.routing.local_key();
    let target = random_key_in_bucket(&local, index);
    let deadline = scope.child(core.config.fill_timeout);

    // A fill that runs out of time still adds its partial result.
    let outcome = core.seek(target, core.config.fill_count, &deadline).await;
    trace!(
        bucket = index,
        found = outcome.peers.len(),
        interrupted = ?outcome.interrupted,
        "fill finished"
    );

    for peer in outcome.peers {
        if peer.key() == local {
            continue;
        }
        if scope.check().is_some() {
            return;
        }
        if let Err(err) = core.add(peer, &scope).await {
            trace!(bucket = index, "fill candidate not added: {err:?}");
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Pinger
// ─────────────────────────────────────────────────────────────────────────────

pub(crate) async fn run_pinger<P: Peer>(core: NodeCore<P>, scope: Deadline) {
    let period = core.config.ping_interval;
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut sweeps = JoinSet::new();

    loop {
        tokio::select! {
            biased;
            _ = scope.expired() => break,
            Some(_) = sweeps.join_next(), if !sweeps.is_empty() => {}
            _ = ticker.tick() => {
                sweeps.spawn(sweep(core.clone(), scope.clone()));
            }
        }
    }

    sweeps.abort_all();
}

/// Probe every known peer once, slowest first, spread across the ping window.
pub(crate) async fn sweep<P: Peer>(core: NodeCore<P>, scope: Deadline) {
    let mut peers = core.routing.snapshot();
    if peers.is_empty() {
        return;
    }
    peers.sort_by(|a, b| b.latency.cmp(&a.latency));

    let count = u32::try_from(peers.len()).unwrap_or(u32::MAX);
    let spacing = core.config.ping_window / count;
    debug!(peers = peers.len(), ?spacing, "ping sweep started");

    let start = Instant::now();
    let mut probes = JoinSet::new();
    for (slot, info) in (0u32..).zip(peers) {
        if scope.run(sleep_until(start + spacing * slot)).await.is_err() {
            break;
        }
        probes.spawn(ping_one(core.clone(), scope.clone(), info));
    }
    while probes.join_next().await.is_some() {}
}

async fn ping_one<P: Peer>(core: NodeCore<P>, scope: Deadline, info: Arc<PeerInfo<P>>) {
    let (latency, result) = probe(&info.peer, &scope, core.config.probe_timeout).await;
    match result {
        Ok(()) => {
            trace!(peer = %info.key.short(), ?latency, "probe answered");
            core.routing.touch(info.peer.clone(), latency);
        }
        // Shutting down says nothing about the peer.
        Err(_) if scope.check().is_some() => {}
        Err(err) => {
            debug!(peer = %info.key.short(), "probe failed, removing peer: {err:?}");
            core.routing.remove(&info.key);
        }
    }
}
