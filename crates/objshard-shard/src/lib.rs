//! Sharding layer for objshard.
//!
//! Spreads objects over N independent backends and presents them as one
//! [`ObjectStore`](objshard_store::ObjectStore):
//!
//! - [`ShardRouter`] -- FNV-1a key routing; the same key always maps to the
//!   same shard
//! - [`listing::list_all`] -- turns paged `list` calls into a lazy ordered
//!   stream, with retries for continuation pages
//! - [`merge_streams`] -- k-way merge of per-shard streams into one
//!   globally ordered stream
//! - [`ShardedStore`] -- the facade tying the above together
//!
//! # Ordering
//!
//! Keys are compared as raw bytes. Each shard's stream is strictly
//! increasing, and the merged stream is non-decreasing. A key stored on two
//! shards is listed twice.
//!
//! # Cancellation
//!
//! Dropping a stream cancels its producer task. Dropping the merged stream
//! cancels every per-shard listing behind it.

pub mod config;
pub mod endpoint;
pub mod listing;
pub mod log;
pub mod merge;
pub mod retry;
pub mod router;
pub mod sharded;

pub use config::{BackoffKind, ListingSettings, RetrySettings, ShardConfig};
pub use endpoint::expand_endpoints;
pub use listing::{list_all, list_all_with_delimiter, ListOptions, ListingConfig};
pub use log::{ListingLog, LogLevel, MemoryLog, TracingLog};
pub use merge::merge_streams;
pub use retry::{Backoff, RetryPolicy};
pub use router::{fnv1a32, ShardRouter};
pub use sharded::{new_sharded, ShardedStore};
