//! # kad-routing
//!
//! The membership and routing core of a Kademlia-style DHT for 256-bit keys.
//! It keeps a latency-aware table of known peers, finds the peers closest to
//! any key through iterative concurrent seeks, and keeps itself fresh with a
//! bucket filler and a liveness pinger. Transport is left to the embedding
//! application, which plugs in through the [`Peer`] trait.
//!
//! The crate is split into a handful of modules:
//!
//! - [`key`]: identifiers, the XOR metric and distance classes.
//! - [`bucket`]: bounded per-class peer sets with cached snapshot views.
//! - [`routing`]: the table of 257 buckets and local closest-peer lookup.
//! - [`seek`]: the iterative network search.
//! - [`deadline`]: cancellation scopes shared by every waiting operation.
//! - [`dht`]: the [`Dht`] façade, which also drives the background upkeep.
//!
//! ## Getting started
//!
//! Implement [`Peer`] for your transport handle, add a few bootstrap peers,
//! and start the upkeep loops:
//!
//! ```no_run
//! use anyhow::Result;
//! use kad_routing::{Config, Dht, Key, Peer};
//! use tokio::time::Duration;
//!
//! # async fn launch<P: Peer>(self_key: Key, bootstrap: Vec<P>) -> Result<()> {
//! let dht = Dht::new(self_key, Config::default());
//! for peer in bootstrap {
//!     dht.add(peer).await?;
//! }
//! dht.start();
//!
//! let outcome = dht.seek(Key::derive(b"some content"), 20, Duration::from_secs(30)).await;
//! println!("found {} peers", outcome.peers.len());
//! dht.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod bucket;
pub mod config;
pub mod deadline;
pub mod dht;
pub mod error;
pub mod key;
mod maintenance;
pub mod peer;
pub mod routing;
pub mod seek;

pub use crate::bucket::{Bucket, LookupTable, PeerInfo, TouchOutcome};
pub use crate::config::Config;
pub use crate::deadline::Deadline;
pub use crate::dht::Dht;
pub use crate::error::Interrupted;
pub use crate::key::{
    bucket_index, less, random_key, random_key_in_bucket, xor_distance, Key, KEY_LEN, NUM_BUCKETS,
};
pub use crate::peer::Peer;
pub use crate::routing::RoutingTable;
pub use crate::seek::{ErrorHook, SeekOutcome};
