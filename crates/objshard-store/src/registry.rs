//! Construction of backends by kind name.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};
use crate::file::FileObjectStore;
use crate::memory::InMemoryObjectStore;
use crate::traits::ObjectStore;

/// Access credentials handed to a backend at construction.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct Credentials {
    #[serde(default)]
    pub access_key: String,
    #[serde(default)]
    pub secret_key: String,
    #[serde(default)]
    pub session_token: String,
}

impl Credentials {
    pub fn new(access_key: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            access_key: access_key.into(),
            secret_key: secret_key.into(),
            session_token: String::new(),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .field("session_token", &"<redacted>")
            .finish()
    }
}

/// Backend kinds understood by [`create_storage`].
pub const SUPPORTED_KINDS: &[&str] = &["mem", "file"];

fn resolve_kind(kind: &str) -> StoreResult<&'static str> {
    match kind.trim().to_ascii_lowercase().as_str() {
        "mem" | "memory" => Ok("mem"),
        "file" | "local" => Ok("file"),
        "" => Err(StoreError::Config("storage kind cannot be empty".to_string())),
        other => Err(StoreError::Config(format!(
            "unsupported storage kind '{}': expected {}",
            other,
            SUPPORTED_KINDS.join(" | ")
        ))),
    }
}

/// Create one backend of the given kind at `endpoint`.
///
/// The built-in backends do not authenticate; credentials are accepted so
/// that every kind shares the same constructor shape.
pub fn create_storage(
    kind: &str,
    endpoint: &str,
    credentials: &Credentials,
) -> StoreResult<Arc<dyn ObjectStore>> {
    let _ = credentials;
    let endpoint = endpoint.trim();
    if endpoint.is_empty() {
        return Err(StoreError::Config("storage endpoint cannot be empty".to_string()));
    }
    match resolve_kind(kind)? {
        "mem" => Ok(Arc::new(InMemoryObjectStore::new(
            endpoint.strip_prefix("mem://").unwrap_or(endpoint),
        ))),
        _ => Ok(Arc::new(FileObjectStore::open(endpoint)?)),
    }
}
