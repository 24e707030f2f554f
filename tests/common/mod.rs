#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};
use tokio::time::{sleep, Duration, Instant};

use kad_routing::{Config, Dht, Key, Peer};

/// Handle to a node living in a [`NetworkRegistry`].
#[derive(Clone)]
pub struct TestPeer {
    key: Key,
    registry: Arc<NetworkRegistry>,
}

impl TestPeer {
    pub fn new(registry: Arc<NetworkRegistry>, key: Key) -> Self {
        Self { key, registry }
    }
}

impl fmt::Debug for TestPeer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TestPeer").field(&self.key).finish()
    }
}

impl PartialEq for TestPeer {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

#[async_trait]
impl Peer for TestPeer {
    fn key(&self) -> Key {
        self.key
    }

    async fn ping(&self, _deadline: Instant) -> Result<()> {
        if self.registry.should_fail(&self.key).await {
            return Err(anyhow!("injected network failure"));
        }
        self.registry.ping_starts.lock().await.push((self.key, Instant::now()));
        self.registry.maybe_sleep(&self.key).await;
        self.registry.pings.lock().await.push(self.key);
        if self.registry.get(&self.key).await.is_some() {
            Ok(())
        } else {
            Err(anyhow!("peer not reachable"))
        }
    }

    async fn lookup(&self, target: Key, n: usize) -> Result<Vec<Self>> {
        if self.registry.should_fail(&self.key).await {
            return Err(anyhow!("injected network failure"));
        }
        self.registry.maybe_sleep(&self.key).await;
        self.registry.lookups.lock().await.push(self.key);
        match self.registry.get(&self.key).await {
            Some(node) => Ok(node.lookup_n(&target, n)),
            None => Err(anyhow!("peer not reachable")),
        }
    }
}

/// In-memory network: every registered node answers pings and lookups from
/// its own routing table.
#[derive(Default)]
pub struct NetworkRegistry {
    nodes: RwLock<HashMap<Key, Dht<TestPeer>>>,
    latencies: Mutex<HashMap<Key, Duration>>,
    failures: Mutex<HashSet<Key>>,
    pings: Mutex<Vec<Key>>,
    ping_starts: Mutex<Vec<(Key, Instant)>>,
    lookups: Mutex<Vec<Key>>,
}

impl NetworkRegistry {
    pub async fn register(&self, node: &Dht<TestPeer>) {
        self.nodes.write().await.insert(node.key(), node.clone());
    }

    pub async fn unregister(&self, key: &Key) {
        self.nodes.write().await.remove(key);
    }

    pub async fn get(&self, key: &Key) -> Option<Dht<TestPeer>> {
        self.nodes.read().await.get(key).cloned()
    }

    pub async fn set_latency(&self, key: Key, latency: Duration) {
        self.latencies.lock().await.insert(key, latency);
    }

    pub async fn set_failure(&self, key: Key, fail: bool) {
        let mut failures = self.failures.lock().await;
        if fail {
            failures.insert(key);
        } else {
            failures.remove(&key);
        }
    }

    pub async fn ping_calls(&self) -> Vec<Key> {
        self.pings.lock().await.clone()
    }

    /// When each ping was issued, in issue order.
    pub async fn ping_starts(&self) -> Vec<(Key, Instant)> {
        self.ping_starts.lock().await.clone()
    }

    pub async fn lookup_calls(&self) -> Vec<Key> {
        self.lookups.lock().await.clone()
    }

    async fn should_fail(&self, key: &Key) -> bool {
        self.failures.lock().await.contains(key)
    }

    async fn maybe_sleep(&self, key: &Key) {
        let latency = self.latencies.lock().await.get(key).copied();
        if let Some(delay) = latency {
            sleep(delay).await;
        }
    }
}

pub struct TestNode {
    pub dht: Dht<TestPeer>,
    pub peer: TestPeer,
}

impl TestNode {
    pub async fn new(registry: Arc<NetworkRegistry>, index: u32, config: Config) -> Self {
        Self::with_key(registry, make_key(index), config).await
    }

    pub async fn with_key(registry: Arc<NetworkRegistry>, key: Key, config: Config) -> Self {
        let dht = Dht::new(key, config);
        registry.register(&dht).await;
        let peer = TestPeer::new(registry, key);
        Self { dht, peer }
    }

    pub fn key(&self) -> Key {
        self.dht.key()
    }
}

/// Config with short limiter debounce so tests are not paced by it.
pub fn test_config() -> Config {
    Config {
        fast_lane_debounce: Duration::from_millis(1),
        ..Config::default()
    }
}

pub fn make_key(index: u32) -> Key {
    let mut bytes = [0u8; 32];
    bytes[..4].copy_from_slice(&index.to_be_bytes());
    Key(bytes)
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
