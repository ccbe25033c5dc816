use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use objshard_store::{Credentials, StoreError, StoreResult};
use serde::{Deserialize, Serialize};

use crate::listing::{
    ListingConfig, DEFAULT_MERGE_CAPACITY, DEFAULT_PAGE_SIZE, DEFAULT_QUEUE_CAPACITY,
};
use crate::log::TracingLog;
use crate::retry::{Backoff, RetryPolicy};

/// Configuration of a sharded store, usually read from a TOML file.
///
/// ```toml
/// backend = "file"
/// endpoint = "/srv/objects/shard-%02d"
/// shards = 4
///
/// [listing.retry]
/// max_attempts = 10
/// backoff = "exponential"
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ShardConfig {
    /// Backend kind handed to the registry (`mem`, `file`).
    pub backend: String,
    /// Endpoint template with one `%d` shard index placeholder.
    pub endpoint: String,
    pub shards: usize,
    #[serde(default)]
    pub credentials: Credentials,
    #[serde(default)]
    pub listing: ListingSettings,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ListingSettings {
    pub page_size: usize,
    pub queue_capacity: usize,
    pub merge_capacity: usize,
    pub retry: RetrySettings,
}

impl Default for ListingSettings {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            merge_capacity: DEFAULT_MERGE_CAPACITY,
            retry: RetrySettings::default(),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    #[default]
    Fixed,
    Exponential,
}

/// Retry settings for continuation pages. Unset limits mean "retry forever".
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetrySettings {
    pub max_attempts: Option<u32>,
    pub max_elapsed_ms: Option<u64>,
    pub delay_ms: u64,
    pub backoff: BackoffKind,
    /// Ceiling for exponential backoff.
    pub max_delay_ms: u64,
    pub multiplier: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: None,
            max_elapsed_ms: None,
            delay_ms: 100,
            backoff: BackoffKind::Fixed,
            max_delay_ms: 10_000,
            multiplier: 2.0,
        }
    }
}

impl RetrySettings {
    pub fn to_policy(&self) -> RetryPolicy {
        let delay = Duration::from_millis(self.delay_ms);
        let backoff = match self.backoff {
            BackoffKind::Fixed => Backoff::Fixed(delay),
            BackoffKind::Exponential => Backoff::Exponential {
                initial: delay,
                max: Duration::from_millis(self.max_delay_ms.max(self.delay_ms)),
                multiplier: self.multiplier,
            },
        };
        RetryPolicy {
            max_attempts: self.max_attempts,
            max_elapsed: self.max_elapsed_ms.map(Duration::from_millis),
            backoff,
        }
    }
}

impl ListingSettings {
    pub fn to_listing_config(&self) -> ListingConfig {
        ListingConfig {
            page_size: self.page_size,
            queue_capacity: self.queue_capacity,
            merge_capacity: self.merge_capacity,
            retry: self.retry.to_policy(),
            log: Arc::new(TracingLog),
        }
    }
}

impl ShardConfig {
    pub fn new(backend: impl Into<String>, endpoint: impl Into<String>, shards: usize) -> Self {
        Self {
            backend: backend.into(),
            endpoint: endpoint.into(),
            shards,
            credentials: Credentials::default(),
            listing: ListingSettings::default(),
        }
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(s: &str) -> StoreResult<Self> {
        let config: Self =
            toml::from_str(s).map_err(|e| StoreError::Config(format!("invalid config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            StoreError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&text)
    }

    pub fn to_toml_string(&self) -> StoreResult<String> {
        toml::to_string_pretty(self).map_err(|e| StoreError::Config(e.to_string()))
    }

    pub fn validate(&self) -> StoreResult<()> {
        let fail = |msg: &str| Err(StoreError::Config(msg.to_string()));
        if self.backend.trim().is_empty() {
            return fail("backend cannot be empty");
        }
        if self.endpoint.trim().is_empty() {
            return fail("endpoint cannot be empty");
        }
        if self.shards == 0 {
            return fail("shards must be at least 1");
        }
        let l = &self.listing;
        if l.page_size == 0 || l.queue_capacity == 0 || l.merge_capacity == 0 {
            return fail("listing sizes must be at least 1");
        }
        if l.retry.max_attempts == Some(0) {
            return fail("retry.max_attempts must be at least 1");
        }
        if !(l.retry.multiplier.is_finite() && l.retry.multiplier >= 1.0) {
            return fail("retry.multiplier must be a finite number >= 1");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_uses_defaults() {
        let c = ShardConfig::from_toml_str(
            r#"
            backend = "mem"
            endpoint = "mem://s%d"
            shards = 3
            "#,
        )
        .unwrap();
        assert_eq!(c.shards, 3);
        assert_eq!(c.listing, ListingSettings::default());
        let cfg = c.listing.to_listing_config();
        assert_eq!(cfg.page_size, 10_000);
        assert_eq!(cfg.queue_capacity, 10_000);
        assert_eq!(cfg.merge_capacity, 1_000);
        assert_eq!(cfg.retry, RetryPolicy::default());
    }

    #[test]
    fn retry_section_builds_exponential_policy() {
        let c = ShardConfig::from_toml_str(
            r#"
            backend = "file"
            endpoint = "/tmp/shard-%02d"
            shards = 2

            [credentials]
            access_key = "ak"

            [listing]
            page_size = 500

            [listing.retry]
            max_attempts = 5
            delay_ms = 20
            backoff = "exponential"
            max_delay_ms = 1000
            "#,
        )
        .unwrap();
        assert_eq!(c.credentials.access_key, "ak");
        assert_eq!(c.listing.page_size, 500);
        let policy = c.listing.retry.to_policy();
        assert_eq!(policy.max_attempts, Some(5));
        assert_eq!(
            policy.backoff,
            Backoff::Exponential {
                initial: Duration::from_millis(20),
                max: Duration::from_secs(1),
                multiplier: 2.0,
            }
        );
    }

    #[test]
    fn validation_rejects_bad_values() {
        assert!(ShardConfig::new("mem", "s%d", 0).validate().is_err());
        assert!(ShardConfig::new("", "s%d", 1).validate().is_err());
        let mut c = ShardConfig::new("mem", "s%d", 1);
        c.listing.page_size = 0;
        assert!(c.validate().is_err());
        let mut c = ShardConfig::new("mem", "s%d", 1);
        c.listing.retry.max_attempts = Some(0);
        assert!(c.validate().is_err());
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = ShardConfig::from_toml_str(
            r#"
            backend = "mem"
            endpoint = "s%d"
            shards = 1
            shard = 2
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, StoreError::Config(_)));
    }

    #[test]
    fn toml_round_trip() {
        let c = ShardConfig::new("mem", "mem://s%d", 4);
        let back = ShardConfig::from_toml_str(&c.to_toml_string().unwrap()).unwrap();
        assert_eq!(back.endpoint, "mem://s%d");
        assert_eq!(back.shards, 4);
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("objshard.toml");
        std::fs::write(&path, "backend = \"mem\"\nendpoint = \"s%d\"\nshards = 2\n").unwrap();
        assert_eq!(ShardConfig::load(&path).unwrap().shards, 2);
        assert!(ShardConfig::load(dir.path().join("missing.toml")).is_err());
    }
}
