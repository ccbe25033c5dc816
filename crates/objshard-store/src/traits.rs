use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::{StoreError, StoreResult};
use crate::object::{Limits, MultipartUpload, ObjectInfo, Part};
use crate::stream::ObjectStream;

/// A single object-storage backend.
///
/// All implementations must satisfy these invariants:
/// - `list` returns keys strictly greater than `marker`, in ascending byte
///   order, with no duplicates. Paging with `marker = last key` must not skip
///   any key.
/// - `delete` of a missing key succeeds.
/// - Capabilities a backend lacks are reported as [`StoreError::NotSupported`],
///   which callers use to pick a fallback.
///
/// `Display` renders a short description of the store (kind and endpoint).
#[async_trait]
pub trait ObjectStore: Send + Sync + fmt::Display {
    /// Prepare the backing location (bucket, directory). Idempotent.
    async fn create(&self) -> StoreResult<()> {
        Ok(())
    }

    fn limits(&self) -> Limits {
        Limits::default()
    }

    /// Fetch the metadata of one object.
    async fn head(&self, key: &str) -> StoreResult<ObjectInfo>;

    /// Read `limit` bytes starting at `offset`; `None` reads to the end.
    async fn get(&self, key: &str, offset: u64, limit: Option<u64>) -> StoreResult<Bytes>;

    async fn put(&self, key: &str, body: Bytes) -> StoreResult<()>;

    async fn copy(&self, _dst: &str, _src: &str) -> StoreResult<()> {
        Err(StoreError::NotSupported("copy"))
    }

    /// Delete an object. Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> StoreResult<()>;

    /// Return one page of at most `max_keys` objects with keys under `prefix`
    /// and strictly greater than `marker`.
    ///
    /// With a non-empty `delimiter`, keys containing the delimiter after the
    /// prefix are rolled up into a single directory entry.
    async fn list(
        &self,
        prefix: &str,
        marker: &str,
        delimiter: &str,
        max_keys: usize,
        follow_links: bool,
    ) -> StoreResult<Vec<ObjectInfo>>;

    /// Native full listing. Backends without one keep the default, and the
    /// caller drives `list` page by page instead.
    async fn list_all(
        &self,
        _prefix: &str,
        _marker: &str,
        _follow_links: bool,
    ) -> StoreResult<ObjectStream> {
        Err(StoreError::NotSupported("list_all"))
    }

    async fn create_multipart_upload(&self, _key: &str) -> StoreResult<MultipartUpload> {
        Err(StoreError::NotSupported("multipart upload"))
    }

    async fn upload_part(
        &self,
        _key: &str,
        _upload_id: &str,
        _num: u32,
        _body: Bytes,
    ) -> StoreResult<Part> {
        Err(StoreError::NotSupported("multipart upload"))
    }

    async fn abort_upload(&self, _key: &str, _upload_id: &str) -> StoreResult<()> {
        Err(StoreError::NotSupported("multipart upload"))
    }

    async fn complete_upload(
        &self,
        _key: &str,
        _upload_id: &str,
        _parts: &[Part],
    ) -> StoreResult<()> {
        Err(StoreError::NotSupported("multipart upload"))
    }

    /// Storage class applied to subsequent writes.
    fn set_storage_class(&self, _class: &str) -> StoreResult<()> {
        Err(StoreError::NotSupported("storage class"))
    }
}
