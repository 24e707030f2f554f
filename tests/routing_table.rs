#[path = "common/mod.rs"]
mod common;

use std::sync::Arc;

use common::{NetworkRegistry, TestPeer};
use kad_routing::{bucket_index, Config, Key, Peer, RoutingTable, TouchOutcome};
use tokio::time::Duration;

fn make_key(byte: u8) -> Key {
    let mut bytes = [0u8; 32];
    bytes[0] = byte;
    Key(bytes)
}

fn peer(registry: &Arc<NetworkRegistry>, byte: u8) -> TestPeer {
    TestPeer::new(registry.clone(), make_key(byte))
}

fn ms(v: u64) -> Duration {
    Duration::from_millis(v)
}

#[test]
fn routing_table_ranks_home_bucket_by_latency() {
    let registry = Arc::new(NetworkRegistry::default());
    let table = RoutingTable::new(make_key(0x00), Config::default());

    // All three share bucket 253 relative to the local key.
    table.touch(peer(&registry, 0x10), ms(30));
    table.touch(peer(&registry, 0x18), ms(10));
    table.touch(peer(&registry, 0x1C), ms(20));
    assert_eq!(table.bucket_len(253), 3);

    let found: Vec<u8> = table
        .lookup_n(&make_key(0x11), 3)
        .iter()
        .map(|p| p.key().0[0])
        .collect();
    assert_eq!(found, vec![0x18, 0x1C, 0x10]);
}

#[test]
fn routing_table_respects_bucket_capacity() {
    let registry = Arc::new(NetworkRegistry::default());
    let config = Config {
        bucket_capacity: 2,
        ..Config::default()
    };
    let table = RoutingTable::new(make_key(0x00), config);

    assert_eq!(table.touch(peer(&registry, 0x80), ms(100)), Some(TouchOutcome::Inserted));
    assert_eq!(table.touch(peer(&registry, 0xC0), ms(300)), Some(TouchOutcome::Inserted));
    assert_eq!(table.touch(peer(&registry, 0xA0), ms(200)), Some(TouchOutcome::Rejected));
    assert_eq!(
        table.touch(peer(&registry, 0x90), ms(50)),
        Some(TouchOutcome::Replaced { evicted: make_key(0xC0) })
    );

    let found: Vec<u8> = table
        .lookup_n(&make_key(0x90), 10)
        .iter()
        .map(|p| p.key().0[0])
        .collect();
    assert_eq!(found, vec![0x90, 0x80]);
}

#[test]
fn routing_table_expands_symmetrically() {
    let registry = Arc::new(NetworkRegistry::default());
    let local = make_key(0x00);
    let table = RoutingTable::new(local, Config::default());

    for byte in [0x01u8, 0x04, 0x10, 0x40] {
        table.touch(peer(&registry, byte), ms(10));
    }
    // Home bucket of 0x08.. is 252, which is empty: 253 (0x10), 251 (0x04),
    // 254 (empty), 250 (empty), 255 (0x40), ... then 249 (0x01).
    let target = make_key(0x08);
    assert_eq!(bucket_index(&local, &target), 252);
    let found: Vec<u8> = table
        .lookup_n(&target, 4)
        .iter()
        .map(|p| p.key().0[0])
        .collect();
    assert_eq!(found, vec![0x10, 0x04, 0x40, 0x01]);
}
