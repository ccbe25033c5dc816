use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::ops::Bound;
use std::sync::RwLock;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};

use crate::error::{StoreError, StoreResult};
use crate::object::{etag, MultipartUpload, ObjectInfo, Part};
use crate::traits::ObjectStore;

#[derive(Clone, Debug)]
struct Entry {
    data: Bytes,
    modified: DateTime<Utc>,
    storage_class: Option<String>,
}

impl Entry {
    fn info(&self, key: &str) -> ObjectInfo {
        ObjectInfo::new(key, self.data.len() as u64, self.modified)
            .with_storage_class(self.storage_class.clone())
    }
}

#[derive(Debug, Default)]
struct Upload {
    key: String,
    parts: BTreeMap<u32, Bytes>,
}

/// In-memory, ordered object store.
///
/// Intended for tests and embedding. Objects live in a `BTreeMap` behind a
/// `RwLock`, so listings come out in key order for free.
pub struct InMemoryObjectStore {
    label: String,
    plain_listing: bool,
    objects: RwLock<BTreeMap<String, Entry>>,
    uploads: RwLock<HashMap<String, Upload>>,
    storage_class: RwLock<Option<String>>,
}

impl InMemoryObjectStore {
    /// Create a new empty in-memory store with a descriptive label.
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            plain_listing: true,
            objects: RwLock::new(BTreeMap::new()),
            uploads: RwLock::new(HashMap::new()),
            storage_class: RwLock::new(None),
        }
    }

    /// A store that only answers delimiter listings, like a hierarchical
    /// filesystem backend. Plain paging reports `NotSupported`.
    pub fn delimiter_only(label: impl Into<String>) -> Self {
        Self {
            plain_listing: false,
            ..Self::new(label)
        }
    }

    /// Number of objects currently stored.
    pub fn len(&self) -> usize {
        self.objects.read().expect("lock poisoned").len()
    }

    /// Returns `true` if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.objects.read().expect("lock poisoned").is_empty()
    }

    /// Sorted list of all keys in the store.
    pub fn keys(&self) -> Vec<String> {
        self.objects
            .read()
            .expect("lock poisoned")
            .keys()
            .cloned()
            .collect()
    }

    /// Number of multipart uploads that are neither completed nor aborted.
    pub fn pending_uploads(&self) -> usize {
        self.uploads.read().expect("lock poisoned").len()
    }

    fn insert(&self, key: &str, data: Bytes) {
        let class = self.storage_class.read().expect("lock poisoned").clone();
        let entry = Entry {
            data,
            modified: Utc::now(),
            storage_class: class,
        };
        self.objects
            .write()
            .expect("lock poisoned")
            .insert(key.to_string(), entry);
    }
}

impl Default for InMemoryObjectStore {
    fn default() -> Self {
        Self::new("default")
    }
}

/// Slice `data` to the requested range.
pub(crate) fn slice_range(data: &Bytes, offset: u64, limit: Option<u64>) -> StoreResult<Bytes> {
    let size = data.len() as u64;
    if offset > size {
        return Err(StoreError::InvalidRange { offset, size });
    }
    let end = match limit {
        Some(limit) => offset.saturating_add(limit).min(size),
        None => size,
    };
    Ok(data.slice(offset as usize..end as usize))
}

/// Roll `key` up to its first-level directory under `prefix`, if it has one.
pub(crate) fn common_prefix<'a>(key: &'a str, prefix: &str, delimiter: &str) -> Option<&'a str> {
    if delimiter.is_empty() {
        return None;
    }
    let rest = &key[prefix.len()..];
    rest.find(delimiter)
        .map(|pos| &key[..prefix.len() + pos + delimiter.len()])
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn head(&self, key: &str) -> StoreResult<ObjectInfo> {
        let map = self.objects.read().expect("lock poisoned");
        map.get(key)
            .map(|entry| entry.info(key))
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    async fn get(&self, key: &str, offset: u64, limit: Option<u64>) -> StoreResult<Bytes> {
        let map = self.objects.read().expect("lock poisoned");
        let entry = map
            .get(key)
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
        slice_range(&entry.data, offset, limit)
    }

    async fn put(&self, key: &str, body: Bytes) -> StoreResult<()> {
        self.insert(key, body);
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        self.objects.write().expect("lock poisoned").remove(key);
        Ok(())
    }

    async fn list(
        &self,
        prefix: &str,
        marker: &str,
        delimiter: &str,
        max_keys: usize,
        _follow_links: bool,
    ) -> StoreResult<Vec<ObjectInfo>> {
        if delimiter.is_empty() && !self.plain_listing {
            return Err(StoreError::NotSupported("list"));
        }
        let map = self.objects.read().expect("lock poisoned");
        let start = if marker.is_empty() {
            Bound::Unbounded
        } else {
            Bound::Excluded(marker)
        };
        let range = map.range::<str, _>((start, Bound::Unbounded));
        let mut out: Vec<ObjectInfo> = Vec::new();
        for (key, entry) in range {
            if out.len() >= max_keys {
                break;
            }
            if !key.starts_with(prefix) {
                // Keys under the prefix are contiguous; stop once past them.
                if key.as_str() > prefix {
                    break;
                }
                continue;
            }
            match common_prefix(key, prefix, delimiter) {
                Some(dir) => {
                    let seen = out.last().is_some_and(|last| last.key == dir);
                    if !seen && dir > marker {
                        out.push(ObjectInfo::directory(dir, entry.modified));
                    }
                }
                None => out.push(entry.info(key)),
            }
        }
        Ok(out)
    }

    async fn create_multipart_upload(&self, key: &str) -> StoreResult<MultipartUpload> {
        let upload_id = uuid::Uuid::now_v7().to_string();
        let upload = Upload {
            key: key.to_string(),
            parts: BTreeMap::new(),
        };
        self.uploads
            .write()
            .expect("lock poisoned")
            .insert(upload_id.clone(), upload);
        let limits = self.limits();
        Ok(MultipartUpload {
            upload_id,
            min_part_size: limits.min_part_size,
            max_count: limits.max_part_count,
        })
    }

    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        num: u32,
        body: Bytes,
    ) -> StoreResult<Part> {
        let mut uploads = self.uploads.write().expect("lock poisoned");
        let upload = uploads
            .get_mut(upload_id)
            .filter(|u| u.key == key)
            .ok_or_else(|| StoreError::NoSuchUpload(upload_id.to_string()))?;
        let part = Part {
            num,
            size: body.len() as u64,
            etag: etag(&body),
        };
        upload.parts.insert(num, body);
        Ok(part)
    }

    async fn abort_upload(&self, _key: &str, upload_id: &str) -> StoreResult<()> {
        self.uploads
            .write()
            .expect("lock poisoned")
            .remove(upload_id)
            .map(|_| ())
            .ok_or_else(|| StoreError::NoSuchUpload(upload_id.to_string()))
    }

    async fn complete_upload(&self, key: &str, upload_id: &str, parts: &[Part]) -> StoreResult<()> {
        let upload = {
            let mut uploads = self.uploads.write().expect("lock poisoned");
            match uploads.get(upload_id) {
                Some(u) if u.key == key => {}
                _ => return Err(StoreError::NoSuchUpload(upload_id.to_string())),
            }
            uploads.remove(upload_id).unwrap_or_default()
        };
        let mut body = BytesMut::new();
        for part in parts {
            let data = upload
                .parts
                .get(&part.num)
                .filter(|data| etag(data) == part.etag)
                .ok_or_else(|| StoreError::InvalidPart {
                    upload_id: upload_id.to_string(),
                    num: part.num,
                })?;
            body.extend_from_slice(data);
        }
        self.insert(key, body.freeze());
        Ok(())
    }

    fn set_storage_class(&self, class: &str) -> StoreResult<()> {
        *self.storage_class.write().expect("lock poisoned") = Some(class.to_string());
        Ok(())
    }
}

impl fmt::Display for InMemoryObjectStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "mem://{}", self.label)
    }
}

impl fmt::Debug for InMemoryObjectStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryObjectStore")
            .field("label", &self.label)
            .field("object_count", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store_with(keys: &[&str]) -> InMemoryObjectStore {
        let store = InMemoryObjectStore::new("test");
        for key in keys {
            store.put(key, Bytes::from(key.to_string())).await.unwrap();
        }
        store
    }

    fn keys(objs: &[ObjectInfo]) -> Vec<&str> {
        objs.iter().map(|o| o.key.as_str()).collect()
    }

    // -----------------------------------------------------------------------
    // Core CRUD
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn put_head_get_delete() {
        let store = InMemoryObjectStore::new("crud");
        store.put("a/b", Bytes::from_static(b"hello world")).await.unwrap();

        let info = store.head("a/b").await.unwrap();
        assert_eq!(info.size, 11);
        assert!(!info.is_dir);

        let body = store.get("a/b", 6, None).await.unwrap();
        assert_eq!(&body[..], b"world");
        let body = store.get("a/b", 0, Some(5)).await.unwrap();
        assert_eq!(&body[..], b"hello");

        store.delete("a/b").await.unwrap();
        assert!(store.head("a/b").await.unwrap_err().is_not_found());
        // Second delete of a missing key still succeeds.
        store.delete("a/b").await.unwrap();
    }

    #[tokio::test]
    async fn get_beyond_end_is_invalid_range() {
        let store = store_with(&["k"]).await;
        let err = store.get("k", 5, None).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidRange { offset: 5, size: 1 }));
        assert!(store.get("k", 1, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn copy_is_not_supported_by_default() {
        let store = store_with(&["k"]).await;
        assert!(store.copy("k2", "k").await.unwrap_err().is_not_supported());
    }

    // -----------------------------------------------------------------------
    // Listing
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn list_pages_after_marker() {
        let store = store_with(&["a", "b", "c", "d", "e"]).await;
        let page = store.list("", "", "", 3, false).await.unwrap();
        assert_eq!(keys(&page), vec!["a", "b", "c"]);
        let page = store.list("", "c", "", 3, false).await.unwrap();
        assert_eq!(keys(&page), vec!["d", "e"]);
        let page = store.list("", "e", "", 3, false).await.unwrap();
        assert!(page.is_empty());
    }

    #[tokio::test]
    async fn list_respects_prefix() {
        let store = store_with(&["a1", "b1", "b2", "c1"]).await;
        let page = store.list("b", "", "", 10, false).await.unwrap();
        assert_eq!(keys(&page), vec!["b1", "b2"]);
    }

    #[tokio::test]
    async fn list_with_delimiter_rolls_up_directories() {
        let store = store_with(&["a", "d/x", "d/y/z", "e"]).await;
        let page = store.list("", "", "/", 10, false).await.unwrap();
        assert_eq!(keys(&page), vec!["a", "d/", "e"]);
        assert!(page[1].is_dir);

        let page = store.list("d/", "", "/", 10, false).await.unwrap();
        assert_eq!(keys(&page), vec!["d/x", "d/y/"]);
    }

    #[tokio::test]
    async fn delimiter_only_rejects_plain_listing() {
        let store = InMemoryObjectStore::delimiter_only("fs");
        store.put("a", Bytes::new()).await.unwrap();
        assert!(store.list("", "", "", 10, false).await.unwrap_err().is_not_supported());
        assert_eq!(store.list("", "", "/", 10, false).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn native_list_all_is_not_supported() {
        let store = InMemoryObjectStore::default();
        assert!(store.list_all("", "", false).await.unwrap_err().is_not_supported());
    }

    // -----------------------------------------------------------------------
    // Multipart
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn multipart_round_trip() {
        let store = InMemoryObjectStore::new("mp");
        let upload = store.create_multipart_upload("big").await.unwrap();
        let p2 = store
            .upload_part("big", &upload.upload_id, 2, Bytes::from_static(b"world"))
            .await
            .unwrap();
        let p1 = store
            .upload_part("big", &upload.upload_id, 1, Bytes::from_static(b"hello "))
            .await
            .unwrap();
        store
            .complete_upload("big", &upload.upload_id, &[p1, p2])
            .await
            .unwrap();

        let body = store.get("big", 0, None).await.unwrap();
        assert_eq!(&body[..], b"hello world");
        assert_eq!(store.pending_uploads(), 0);
    }

    #[tokio::test]
    async fn multipart_rejects_unknown_upload_and_bad_etag() {
        let store = InMemoryObjectStore::new("mp");
        let err = store
            .upload_part("k", "nope", 1, Bytes::new())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NoSuchUpload(_)));

        let upload = store.create_multipart_upload("k").await.unwrap();
        let mut part = store
            .upload_part("k", &upload.upload_id, 1, Bytes::from_static(b"x"))
            .await
            .unwrap();
        part.etag = "bogus".into();
        let err = store
            .complete_upload("k", &upload.upload_id, &[part])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidPart { num: 1, .. }));
    }

    #[tokio::test]
    async fn abort_discards_upload() {
        let store = InMemoryObjectStore::new("mp");
        let upload = store.create_multipart_upload("k").await.unwrap();
        assert_eq!(store.pending_uploads(), 1);
        store.abort_upload("k", &upload.upload_id).await.unwrap();
        assert_eq!(store.pending_uploads(), 0);
    }

    // -----------------------------------------------------------------------
    // Storage class
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn storage_class_applies_to_later_writes() {
        let store = InMemoryObjectStore::new("sc");
        store.put("before", Bytes::new()).await.unwrap();
        store.set_storage_class("COLD").unwrap();
        store.put("after", Bytes::new()).await.unwrap();

        assert_eq!(store.head("before").await.unwrap().storage_class, None);
        assert_eq!(
            store.head("after").await.unwrap().storage_class.as_deref(),
            Some("COLD")
        );
    }

    #[test]
    fn display_and_debug() {
        let store = InMemoryObjectStore::new("shard-0");
        assert_eq!(store.to_string(), "mem://shard-0");
        let debug = format!("{store:?}");
        assert!(debug.contains("InMemoryObjectStore"));
        assert!(debug.contains("object_count"));
    }
}
