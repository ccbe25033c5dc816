//! Key-based routing to determine shard assignment.
//!
//! Uses 32-bit FNV-1a with no seed, so a key lands on the same shard in
//! every process that uses the same shard count.

use objshard_store::{StoreError, StoreResult};

const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

/// 32-bit FNV-1a hash of `bytes`.
#[inline]
pub fn fnv1a32(bytes: &[u8]) -> u32 {
    bytes.iter().fold(FNV_OFFSET_BASIS, |hash, &b| {
        (hash ^ u32::from(b)).wrapping_mul(FNV_PRIME)
    })
}

/// Routes keys to shard indices.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ShardRouter {
    shard_count: u32,
}

impl ShardRouter {
    /// Creates a router over `shard_count` shards.
    pub fn new(shard_count: usize) -> StoreResult<Self> {
        let shard_count = u32::try_from(shard_count)
            .ok()
            .filter(|&n| n > 0)
            .ok_or_else(|| {
                StoreError::Config(format!("shard count must be in 1..={}, got {shard_count}", u32::MAX))
            })?;
        Ok(Self { shard_count })
    }

    /// Routes a key to its shard index in `0..shard_count`.
    ///
    /// The same key always routes to the same shard.
    #[inline]
    pub fn pick(&self, key: &str) -> usize {
        (fnv1a32(key.as_bytes()) % self.shard_count) as usize
    }

    /// Returns the total number of shards.
    pub fn shard_count(&self) -> usize {
        self.shard_count as usize
    }
}
