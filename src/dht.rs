//! The membership façade tying the routing table, seeks and upkeep together.

use std::sync::Arc;

use anyhow::Result;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Duration;
use tracing::{debug, info};

use crate::bucket::PeerInfo;
use crate::config::Config;
use crate::deadline::Deadline;
use crate::key::{Key, NUM_BUCKETS};
use crate::maintenance::{fill_bucket, run_filler, run_pinger, sweep};
use crate::peer::{probe, Peer};
use crate::routing::RoutingTable;
use crate::seek::{seek, ErrorHook, SeekOutcome};

/// State shared by the façade and its background tasks.
pub(crate) struct NodeCore<P> {
    pub(crate) routing: Arc<RoutingTable<P>>,
    pub(crate) config: Arc<Config>,
    pub(crate) on_error: Option<ErrorHook>,
}

impl<P> Clone for NodeCore<P> {
    fn clone(&self) -> Self {
        Self {
            routing: self.routing.clone(),
            config: self.config.clone(),
            on_error: self.on_error.clone(),
        }
    }
}

impl<P: Peer> NodeCore<P> {
    /// Probe `peer` and record it with the measured latency.
    ///
    /// A failed probe leaves the table untouched and returns the probe error.
    pub(crate) async fn add(&self, peer: P, scope: &Deadline) -> Result<()> {
        let (latency, result) = probe(&peer, scope, self.config.probe_timeout).await;
        if let Err(err) = result {
            debug!(peer = %peer.key().short(), "probe failed, peer not added: {err:?}");
            return Err(err);
        }
        self.routing.touch(peer, latency);
        Ok(())
    }

    pub(crate) async fn seek(&self, target: Key, n: usize, deadline: &Deadline) -> SeekOutcome<P> {
        seek(
            self.routing.clone(),
            &self.config,
            self.on_error.clone(),
            target,
            n,
            deadline,
        )
        .await
    }
}

struct DhtNode<P> {
    core: NodeCore<P>,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl<P> DhtNode<P> {
    fn scope(&self) -> Deadline {
        Deadline::from_shutdown(self.shutdown.subscribe())
    }
}

impl<P> Drop for DhtNode<P> {
    fn drop(&mut self) {
        self.shutdown.send_replace(true);
        for task in self.tasks.get_mut().drain(..) {
            task.abort();
        }
    }
}

/// A node's view of the network: its routing table plus the seeks and
/// background upkeep that keep it populated.
///
/// Cloning is cheap; all clones share one table. The background loops stop
/// on [`Dht::shutdown`] or when the last clone is dropped.
pub struct Dht<P> {
    inner: Arc<DhtNode<P>>,
}

impl<P> Clone for Dht<P> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<P: Peer> Dht<P> {
    /// Create a node with an empty routing table. Call [`Dht::start`] to run
    /// the background upkeep.
    pub fn new(key: Key, config: Config) -> Self {
        Self::build(key, config, None)
    }

    /// Like [`Dht::new`], with a callback for failed remote lookups.
    pub fn with_error_hook<F>(key: Key, config: Config, hook: F) -> Self
    where
        F: Fn(&Key, &anyhow::Error) + Send + Sync + 'static,
    {
        Self::build(key, config, Some(Arc::new(hook)))
    }

    fn build(key: Key, config: Config, on_error: Option<ErrorHook>) -> Self {
        let (shutdown, _) = watch::channel(false);
        let core = NodeCore {
            routing: Arc::new(RoutingTable::new(key, config.clone())),
            config: Arc::new(config),
            on_error,
        };
        Self {
            inner: Arc::new(DhtNode {
                core,
                shutdown,
                tasks: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Spawn the filler and pinger loops. Must be called from within a Tokio
    /// runtime; later calls, and calls after shutdown, do nothing.
    pub fn start(&self) {
        let mut tasks = self.inner.tasks.lock();
        if !tasks.is_empty() || *self.inner.shutdown.borrow() {
            return;
        }
        let core = &self.inner.core;
        tasks.push(tokio::spawn(run_filler(core.clone(), self.inner.scope())));
        tasks.push(tokio::spawn(run_pinger(core.clone(), self.inner.scope())));
        info!(
            key = %self.key().short(),
            fill_interval = ?core.config.fill_interval,
            ping_interval = ?core.config.ping_interval,
            "routing upkeep started"
        );
    }

    /// Cancel every outstanding operation and wait for the background loops
    /// to exit. Seeks in flight return with [`crate::Interrupted::Cancelled`].
    pub async fn shutdown(&self) {
        self.inner.shutdown.send_replace(true);
        let tasks: Vec<_> = self.inner.tasks.lock().drain(..).collect();
        for task in tasks {
            let _ = task.await;
        }
        info!(key = %self.key().short(), "routing upkeep stopped");
    }

    /// Whether [`Dht::shutdown`] has been called.
    pub fn is_shut_down(&self) -> bool {
        *self.inner.shutdown.borrow()
    }

    /// This node's key.
    pub fn key(&self) -> Key {
        *self.inner.core.routing.local_key()
    }

    pub fn config(&self) -> &Config {
        &self.inner.core.config
    }

    /// The underlying routing table.
    pub fn routing_table(&self) -> &RoutingTable<P> {
        &self.inner.core.routing
    }

    /// A scope that ends after `timeout` or when this node shuts down.
    pub fn deadline(&self, timeout: Duration) -> Deadline {
        self.inner.scope().child(timeout)
    }

    /// Probe `peer` and record it with the measured round trip.
    ///
    /// The probe is bounded by [`Config::probe_timeout`]. On failure the
    /// table is left untouched and the probe error is returned as is.
    pub async fn add(&self, peer: P) -> Result<()> {
        self.inner.core.add(peer, &self.inner.scope()).await
    }

    /// Forget `peer`. Returns whether it was known.
    pub fn remove(&self, peer: &P) -> bool {
        self.inner.core.routing.remove(&peer.key())
    }

    /// Up to `n` known peers close to `target`, from the local table only.
    pub fn lookup_n(&self, target: &Key, n: usize) -> Vec<P> {
        self.inner.core.routing.lookup_n(target, n)
    }

    /// Search the network for the `n` peers closest to `target`, giving up
    /// after `timeout`. `n == 0` means [`Config::default_seek_count`].
    pub async fn seek(&self, target: Key, n: usize, timeout: Duration) -> SeekOutcome<P> {
        let deadline = self.deadline(timeout);
        self.inner.core.seek(target, n, &deadline).await
    }

    /// [`Dht::seek`] under a caller-supplied scope.
    pub async fn seek_until(&self, target: Key, n: usize, deadline: &Deadline) -> SeekOutcome<P> {
        self.inner.core.seek(target, n, deadline).await
    }

    /// Run one fill round over every bucket and wait for it to finish.
    pub async fn fill_all(&self) {
        let mut fills = JoinSet::new();
        for index in 0..NUM_BUCKETS {
            fills.spawn(fill_bucket(self.inner.core.clone(), self.inner.scope(), index));
        }
        while fills.join_next().await.is_some() {}
    }

    /// Probe every known peer once, spread across [`Config::ping_window`],
    /// and wait for all probes to finish.
    pub async fn ping_all(&self) {
        sweep(self.inner.core.clone(), self.inner.scope()).await;
    }

    /// Total number of known peers.
    pub fn len(&self) -> usize {
        self.inner.core.routing.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every known peer with its latency estimate and timestamps.
    pub fn peers(&self) -> Vec<Arc<PeerInfo<P>>> {
        self.inner.core.routing.snapshot()
    }
}
