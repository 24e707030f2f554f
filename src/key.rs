//! Identifiers and the XOR metric.
//!
//! - **Identity & Hashing**: [`Key`], [`Key::derive`]
//! - **Distance Metrics**: [`xor_distance`], [`less`]
//! - **Bucketing**: [`bucket_index`], [`random_key_in_bucket`]

use std::fmt;
use std::str::FromStr;

use iroh_blake3::Hasher;
use rand::RngCore;
use serde::{Deserialize, Serialize};

/// Length of a [`Key`] in bytes.
pub const KEY_LEN: usize = 32;

/// Number of distance classes: one per bit position plus class 0 for an
/// identical key.
pub const NUM_BUCKETS: usize = KEY_LEN * 8 + 1;

/// A 256-bit identifier shared by peers and lookup targets.
///
/// The derived ordering is lexicographic over the raw bytes (most
/// significant byte first), which is what [`less`] exposes.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Key(pub [u8; KEY_LEN]);

impl Key {
    /// Wrap raw bytes.
    pub const fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Derive a stable key by hashing arbitrary input with BLAKE3.
    ///
    /// Typically used to derive a node's identity from its public key:
    ///
    /// ```
    /// use kad_routing::Key;
    ///
    /// let key = Key::derive(b"example-public-key-bytes");
    /// assert_eq!(key, Key::derive(b"example-public-key-bytes"));
    /// ```
    pub fn derive(data: &[u8]) -> Self {
        let mut hasher = Hasher::new();
        hasher.update(data);
        let digest = hasher.finalize();

        let mut out = [0u8; KEY_LEN];
        out.copy_from_slice(digest.as_bytes());
        Self(out)
    }

    /// The raw bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }

    /// Abbreviated hex form used in log fields.
    pub(crate) fn short(&self) -> String {
        hex::encode(&self.0[..8])
    }
}

impl From<[u8; KEY_LEN]> for Key {
    fn from(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for Key {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key({}…)", self.short())
    }
}

impl FromStr for Key {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut out = [0u8; KEY_LEN];
        hex::decode_to_slice(s, &mut out)?;
        Ok(Self(out))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Distance Metrics
// ─────────────────────────────────────────────────────────────────────────────

/// Lexicographic byte order over raw keys.
///
/// Only used to keep bucket membership sorted for exact-match lookups; it is
/// not a closeness measure.
pub fn less(a: &Key, b: &Key) -> bool {
    a < b
}

/// Compute the XOR distance between two keys.
///
/// # Properties
/// - `xor_distance(a, a)` is the all-zero key
/// - `xor_distance(a, b) == xor_distance(b, a)`
/// - Distances compare with the ordinary [`Ord`] on [`Key`].
pub fn xor_distance(a: &Key, b: &Key) -> Key {
    let mut out = [0u8; KEY_LEN];
    for (i, byte) in out.iter_mut().enumerate() {
        *byte = a.0[i] ^ b.0[i];
    }
    Key(out)
}

/// Find the distance class of `key` relative to `self_key`.
///
/// Every all-zero byte of the XOR distance consumes 8 units from 256; within
/// the first non-zero byte the number of leading zero bits is subtracted.
/// Identical keys map to 0, keys differing in the top bit map to 256.
pub fn bucket_index(self_key: &Key, key: &Key) -> usize {
    let mut index = KEY_LEN * 8;
    for (x, y) in self_key.0.iter().zip(key.0.iter()) {
        let d = x ^ y;
        if d == 0 {
            index -= 8;
            continue;
        }
        return index - d.leading_zeros() as usize;
    }
    index
}

/// Generate a uniformly random key.
pub fn random_key() -> Key {
    let mut out = [0u8; KEY_LEN];
    rand::thread_rng().fill_bytes(&mut out);
    Key(out)
}

/// Generate a random key that lands in distance class `bucket` relative to `base`.
///
/// Bucket 0 returns `base` itself. Indices past the last class are clamped.
pub fn random_key_in_bucket(base: &Key, bucket: usize) -> Key {
    random_key_in_bucket_with(&mut rand::thread_rng(), base, bucket)
}

/// Same as [`random_key_in_bucket`] with a caller-supplied RNG.
pub fn random_key_in_bucket_with<R: RngCore + ?Sized>(rng: &mut R, base: &Key, bucket: usize) -> Key {
    let bucket = bucket.min(NUM_BUCKETS - 1);
    if bucket == 0 {
        return *base;
    }

    let mut rnd = [0u8; KEY_LEN];
    rng.fill_bytes(&mut rnd);

    let bit = bucket - 1;
    let split = KEY_LEN - bit / 8 - 1;
    let shift = (bit % 8) as u32;

    let mut out = [0u8; KEY_LEN];
    out[..split].copy_from_slice(&base.0[..split]);
    out[split + 1..].copy_from_slice(&rnd[split + 1..]);

    // Bits above the boundary come from base, the boundary bit is flipped,
    // bits below it are random.
    let mask_base = 0xFFu8.checked_shl(shift + 1).unwrap_or(0);
    let mask_rnd = !(0xFFu8 << shift);
    let boundary = 1u8 << shift;
    out[split] = (mask_base & base.0[split]) | (mask_rnd & rnd[split]) | (!base.0[split] & boundary);

    Key(out)
}
