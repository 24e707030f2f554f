#[path = "common/mod.rs"]
mod common;

use std::collections::HashSet;
use std::sync::Arc;

use common::{test_config, NetworkRegistry, TestNode};
use futures::stream::{self, StreamExt};
use kad_routing::{xor_distance, Key, Peer};
use rand::{rngs::StdRng, Rng, RngCore, SeedableRng};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::time::Duration;

const NODE_COUNT: usize = 128;
const K_PARAM: usize = 20;
const TARGET_SAMPLES: usize = 64;
const ORIGINS_PER_TARGET: usize = 4;
const HISTOGRAM_BUCKETS: usize = 10;

#[derive(Debug, Serialize, Clone)]
struct SampleRow {
    origin_index: usize,
    target_index: usize,
    overlap_fraction: f64,
    closest_present: bool,
}

#[derive(Clone)]
struct QuerySpec {
    origin_index: usize,
    target_index: usize,
    target: Key,
    perfect_keys: Arc<Vec<Key>>,
}

#[derive(Serialize)]
struct HistogramBucket {
    bucket_start: f64,
    bucket_end: f64,
    count: usize,
}

#[derive(Serialize)]
struct AggregateReport {
    node_count: usize,
    target_samples: usize,
    origins_per_target: usize,
    mean_overlap_fraction: f64,
    closest_present_fraction: f64,
    histogram: Vec<HistogramBucket>,
    sample_count: usize,
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn seek_quality_report() {
    let registry = Arc::new(NetworkRegistry::default());
    let mut rng = StdRng::seed_from_u64(0);
    let mut nodes = Vec::with_capacity(NODE_COUNT);
    for _ in 0..NODE_COUNT {
        nodes.push(TestNode::with_key(registry.clone(), random_key(&mut rng), test_config()).await);
    }

    let peers: Arc<Vec<_>> = Arc::new(nodes.iter().map(|n| n.peer.clone()).collect());
    let keys: Vec<Key> = peers.iter().map(|p| p.key()).collect();

    stream::iter(nodes.iter().enumerate())
        .for_each_concurrent(Some(32), |(idx, node)| {
            let peers = peers.clone();
            let dht = node.dht.clone();
            async move {
                for (peer_idx, peer) in peers.iter().enumerate() {
                    if idx == peer_idx {
                        continue;
                    }
                    dht.add(peer.clone()).await.expect("registered peer answers");
                }
            }
        })
        .await;

    let queries = build_queries(&mut rng, &keys);
    let dhts = Arc::new(nodes.iter().map(|n| n.dht.clone()).collect::<Vec<_>>());
    let samples = Arc::new(Mutex::new(Vec::with_capacity(queries.len())));

    stream::iter(queries)
        .for_each_concurrent(Some(32), |query| {
            let dhts = dhts.clone();
            let samples = samples.clone();
            async move {
                let outcome = dhts[query.origin_index]
                    .seek(query.target, K_PARAM, Duration::from_secs(30))
                    .await;
                assert_eq!(outcome.interrupted, None);
                assert!(outcome.peers.len() <= K_PARAM);

                let distances: Vec<Key> = outcome
                    .peers
                    .iter()
                    .map(|p| xor_distance(&p.key(), &query.target))
                    .collect();
                assert!(distances.windows(2).all(|pair| pair[0] < pair[1]));

                let found: HashSet<Key> = outcome.peers.iter().map(|p| p.key()).collect();
                let overlap = query.perfect_keys.iter().filter(|k| found.contains(*k)).count();
                let closest_present = query
                    .perfect_keys
                    .first()
                    .map(|best| found.contains(best))
                    .unwrap_or(false);

                samples.lock().await.push(SampleRow {
                    origin_index: query.origin_index,
                    target_index: query.target_index,
                    overlap_fraction: overlap as f64 / K_PARAM as f64,
                    closest_present,
                });
            }
        })
        .await;

    let mut samples = Arc::try_unwrap(samples)
        .expect("samples still referenced")
        .into_inner();
    samples.sort_by_key(|row| (row.target_index, row.origin_index));

    let overlaps: Vec<f64> = samples.iter().map(|row| row.overlap_fraction).collect();
    let mean_overlap = overlaps.iter().sum::<f64>() / overlaps.len() as f64;
    let closest_present =
        samples.iter().filter(|row| row.closest_present).count() as f64 / samples.len() as f64;

    let report = AggregateReport {
        node_count: NODE_COUNT,
        target_samples: TARGET_SAMPLES,
        origins_per_target: ORIGINS_PER_TARGET,
        mean_overlap_fraction: mean_overlap,
        closest_present_fraction: closest_present,
        histogram: build_histogram(&overlaps),
        sample_count: samples.len(),
    };
    println!(
        "{}",
        serde_json::to_string_pretty(&report).expect("serialize report")
    );

    assert_eq!(samples.len(), TARGET_SAMPLES * ORIGINS_PER_TARGET);
    assert!(mean_overlap > 0.0, "seeks found none of the closest peers");
}

fn random_key(rng: &mut StdRng) -> Key {
    let mut bytes = [0u8; 32];
    rng.fill_bytes(&mut bytes);
    Key(bytes)
}

fn perfect_closest(keys: &[Key], target: &Key) -> Vec<Key> {
    let mut sorted = keys.to_vec();
    sorted.sort_by_key(|key| xor_distance(key, target));
    sorted.truncate(K_PARAM);
    sorted
}

fn build_queries(rng: &mut StdRng, keys: &[Key]) -> Vec<QuerySpec> {
    let mut queries = Vec::with_capacity(TARGET_SAMPLES * ORIGINS_PER_TARGET);
    for target_index in 0..TARGET_SAMPLES {
        let target = random_key(rng);
        let perfect_keys = Arc::new(perfect_closest(keys, &target));
        for _ in 0..ORIGINS_PER_TARGET {
            queries.push(QuerySpec {
                origin_index: rng.gen_range(0..NODE_COUNT),
                target_index,
                target,
                perfect_keys: perfect_keys.clone(),
            });
        }
    }
    queries
}

fn build_histogram(samples: &[f64]) -> Vec<HistogramBucket> {
    let mut buckets = vec![0usize; HISTOGRAM_BUCKETS];
    for &value in samples {
        let index = ((value * HISTOGRAM_BUCKETS as f64).floor() as usize).min(HISTOGRAM_BUCKETS - 1);
        buckets[index] += 1;
    }

    let width = 1.0 / HISTOGRAM_BUCKETS as f64;
    buckets
        .into_iter()
        .enumerate()
        .map(|(index, count)| HistogramBucket {
            bucket_start: index as f64 * width,
            bucket_end: if index == HISTOGRAM_BUCKETS - 1 {
                1.0
            } else {
                (index + 1) as f64 * width
            },
            count,
        })
        .collect()
}
