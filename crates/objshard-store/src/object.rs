use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Listing-time snapshot of a stored object.
///
/// Keys compare lexicographically by bytes, which is the order every
/// listing in this workspace is expected to produce.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectInfo {
    /// Full key of the object.
    pub key: String,
    /// Size of the object data in bytes.
    pub size: u64,
    /// Last modification time reported by the backend.
    pub modified: DateTime<Utc>,
    /// `true` for a directory entry produced by delimiter listing.
    pub is_dir: bool,
    /// Storage class the object was written with, if the backend tracks it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_class: Option<String>,
}

impl ObjectInfo {
    /// Create a regular (non-directory) object entry.
    pub fn new(key: impl Into<String>, size: u64, modified: DateTime<Utc>) -> Self {
        Self {
            key: key.into(),
            size,
            modified,
            is_dir: false,
            storage_class: None,
        }
    }

    /// Create a directory entry. The key is normalised to end with `/`.
    pub fn directory(key: impl Into<String>, modified: DateTime<Utc>) -> Self {
        let mut key = key.into();
        if !key.ends_with('/') {
            key.push('/');
        }
        Self {
            key,
            size: 0,
            modified,
            is_dir: true,
            storage_class: None,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn with_storage_class(mut self, class: Option<String>) -> Self {
        self.storage_class = class;
        self
    }
}

/// Handle for an in-progress multipart upload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultipartUpload {
    pub upload_id: String,
    /// Smallest part the backend accepts (except for the last part).
    pub min_part_size: u64,
    /// Maximum number of parts in one upload.
    pub max_count: u32,
}

/// One uploaded part of a multipart upload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Part {
    pub num: u32,
    pub size: u64,
    pub etag: String,
}

/// Capability limits advertised by a backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Limits {
    pub supports_upload_part_copy: bool,
    pub min_part_size: u64,
    pub max_part_size: u64,
    pub max_part_count: u32,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            supports_upload_part_copy: false,
            min_part_size: 5 << 20,
            max_part_size: 5 << 30,
            max_part_count: 10_000,
        }
    }
}

/// Content tag for a part or object body.
pub fn etag(data: &[u8]) -> String {
    hex::encode(&blake3::hash(data).as_bytes()[..16])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directory_keys_end_with_slash() {
        let dir = ObjectInfo::directory("photos", Utc::now());
        assert_eq!(dir.key(), "photos/");
        assert!(dir.is_dir);

        let already = ObjectInfo::directory("docs/", Utc::now());
        assert_eq!(already.key(), "docs/");
    }

    #[test]
    fn etag_is_stable_and_content_dependent() {
        assert_eq!(etag(b"abc"), etag(b"abc"));
        assert_ne!(etag(b"abc"), etag(b"abd"));
        assert_eq!(etag(b"abc").len(), 32);
    }

    #[test]
    fn storage_class_is_omitted_from_json_when_unset() {
        let obj = ObjectInfo::new("k", 3, Utc::now());
        let json = serde_json::to_string(&obj).unwrap();
        assert!(!json.contains("storage_class"));

        let classed = obj.with_storage_class(Some("COLD".into()));
        let json = serde_json::to_string(&classed).unwrap();
        assert!(json.contains("COLD"));
    }
}
