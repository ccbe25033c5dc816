use std::ffi::OsStr;
use std::fmt;
use std::io::{ErrorKind, SeekFrom};
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::debug;
use walkdir::WalkDir;

use crate::error::{StoreError, StoreResult};
use crate::memory::common_prefix;
use crate::object::{etag, MultipartUpload, ObjectInfo, Part};
use crate::traits::ObjectStore;

/// Directory holding staged multipart parts, relative to the store root.
const MULTIPART_DIR: &str = ".multipart";
/// File inside an upload directory recording the target key.
const UPLOAD_KEY_FILE: &str = "key";
/// Directory holding in-flight writes before they are renamed into place.
const STAGING_DIR: &str = ".staging";

/// Top-level names that are never part of the key namespace.
fn is_reserved(name: &OsStr) -> bool {
    name == OsStr::new(MULTIPART_DIR) || name == OsStr::new(STAGING_DIR)
}

/// Object store backed by a local directory tree.
///
/// A key `a/b/c` is stored at `<root>/a/b/c`. Listings walk the tree, so
/// they are linear in the number of stored files.
pub struct FileObjectStore {
    root: PathBuf,
}

impl FileObjectStore {
    /// Open a store rooted at `endpoint`, either a bare path or `file://<path>`.
    pub fn open(endpoint: &str) -> StoreResult<Self> {
        let path = endpoint.strip_prefix("file://").unwrap_or(endpoint);
        if path.is_empty() {
            return Err(StoreError::Config("file endpoint has no path".into()));
        }
        Ok(Self {
            root: PathBuf::from(path),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_of(&self, key: &str) -> StoreResult<PathBuf> {
        let rel = Path::new(key.trim_end_matches('/'));
        let valid = !key.is_empty()
            && rel.components().all(|c| matches!(c, Component::Normal(_)))
            && !matches!(rel.components().next(), Some(Component::Normal(first)) if is_reserved(first));
        if !valid {
            return Err(StoreError::Backend(format!("invalid key for file store: {key:?}")));
        }
        Ok(self.root.join(rel))
    }

    fn upload_dir(&self, upload_id: &str) -> PathBuf {
        self.root.join(MULTIPART_DIR).join(upload_id)
    }

    async fn check_upload(&self, key: &str, upload_id: &str) -> StoreResult<PathBuf> {
        let dir = self.upload_dir(upload_id);
        match tokio::fs::read_to_string(dir.join(UPLOAD_KEY_FILE)).await {
            Ok(recorded) if recorded == key => Ok(dir),
            Ok(_) => Err(StoreError::NoSuchUpload(upload_id.to_string())),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(StoreError::NoSuchUpload(upload_id.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Write `body` under the staging directory and rename it to `path`.
    ///
    /// The staged file is removed if any step fails, so a failed write never
    /// leaves anything a listing could see.
    async fn write_atomic(&self, path: &Path, body: &[u8]) -> StoreResult<()> {
        let staging = self.root.join(STAGING_DIR);
        tokio::fs::create_dir_all(&staging).await?;
        let tmp = staging.join(uuid::Uuid::now_v7().simple().to_string());
        let res = Self::stage_and_rename(&tmp, path, body).await;
        if let Err(e) = &res {
            debug!(path = %path.display(), error = %e, "write failed, discarding staged file");
            match tokio::fs::remove_file(&tmp).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => debug!(tmp = %tmp.display(), error = %e, "cannot remove staged file"),
            }
        }
        res
    }

    async fn stage_and_rename(tmp: &Path, path: &Path, body: &[u8]) -> StoreResult<()> {
        let mut file = tokio::fs::File::create(tmp).await?;
        file.write_all(body).await?;
        file.sync_all().await?;
        drop(file);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::rename(tmp, path).await?;
        Ok(())
    }

    /// All stored keys in ascending order.
    fn walk_keys(root: &Path, follow_links: bool) -> StoreResult<Vec<(String, u64, DateTime<Utc>)>> {
        let mut out = Vec::new();
        if !root.exists() {
            return Ok(out);
        }
        let walker = WalkDir::new(root)
            .follow_links(follow_links)
            .into_iter()
            .filter_entry(|e| e.depth() != 1 || !is_reserved(e.file_name()));
        for entry in walker {
            let entry = entry.map_err(|e| StoreError::Backend(e.to_string()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = entry
                .path()
                .strip_prefix(root)
                .map_err(|e| StoreError::Backend(e.to_string()))?;
            let key = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            let meta = entry.metadata().map_err(|e| StoreError::Backend(e.to_string()))?;
            let modified = meta
                .modified()
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(|_| Utc::now());
            out.push((key, meta.len(), modified));
        }
        out.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(out)
    }
}

#[async_trait]
impl ObjectStore for FileObjectStore {
    async fn create(&self) -> StoreResult<()> {
        tokio::fs::create_dir_all(&self.root).await?;
        Ok(())
    }

    async fn head(&self, key: &str) -> StoreResult<ObjectInfo> {
        let path = self.path_of(key)?;
        let meta = match tokio::fs::metadata(&path).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StoreError::NotFound(key.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        let modified = meta
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());
        if meta.is_dir() {
            Ok(ObjectInfo::directory(key, modified))
        } else {
            Ok(ObjectInfo::new(key, meta.len(), modified))
        }
    }

    async fn get(&self, key: &str, offset: u64, limit: Option<u64>) -> StoreResult<Bytes> {
        let path = self.path_of(key)?;
        let mut file = match tokio::fs::File::open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StoreError::NotFound(key.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        let size = file.metadata().await?.len();
        if offset > size {
            return Err(StoreError::InvalidRange { offset, size });
        }
        let len = limit.map_or(size - offset, |l| l.min(size - offset));
        file.seek(SeekFrom::Start(offset)).await?;
        let mut buf = Vec::with_capacity(len as usize);
        file.take(len).read_to_end(&mut buf).await?;
        Ok(Bytes::from(buf))
    }

    async fn put(&self, key: &str, body: Bytes) -> StoreResult<()> {
        let path = self.path_of(key)?;
        if key.ends_with('/') {
            tokio::fs::create_dir_all(&path).await?;
            return Ok(());
        }
        self.write_atomic(&path, &body).await
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        let path = self.path_of(key)?;
        let res = if key.ends_with('/') {
            tokio::fs::remove_dir(&path).await
        } else {
            tokio::fs::remove_file(&path).await
        };
        match res {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(
        &self,
        prefix: &str,
        marker: &str,
        delimiter: &str,
        max_keys: usize,
        follow_links: bool,
    ) -> StoreResult<Vec<ObjectInfo>> {
        let root = self.root.clone();
        let all = tokio::task::spawn_blocking(move || Self::walk_keys(&root, follow_links))
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))??;

        let mut out: Vec<ObjectInfo> = Vec::new();
        for (key, size, modified) in all {
            if out.len() >= max_keys {
                break;
            }
            if !key.starts_with(prefix) || (!marker.is_empty() && key.as_str() <= marker) {
                continue;
            }
            match common_prefix(&key, prefix, delimiter) {
                Some(dir) => {
                    let seen = out.last().is_some_and(|last| last.key == dir);
                    if !seen && dir > marker {
                        out.push(ObjectInfo::directory(dir, modified));
                    }
                }
                None => out.push(ObjectInfo::new(key, size, modified)),
            }
        }
        debug!(root = %self.root.display(), prefix, marker, count = out.len(), "listed directory tree");
        Ok(out)
    }

    async fn create_multipart_upload(&self, key: &str) -> StoreResult<MultipartUpload> {
        self.path_of(key)?;
        let upload_id = uuid::Uuid::now_v7().simple().to_string();
        let dir = self.upload_dir(&upload_id);
        tokio::fs::create_dir_all(&dir).await?;
        tokio::fs::write(dir.join(UPLOAD_KEY_FILE), key).await?;
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
        let dir = self.check_upload(key, upload_id).await?;
        self.write_atomic(&dir.join(format!("{num:05}")), &body).await?;
        Ok(Part {
            num,
            size: body.len() as u64,
            etag: etag(&body),
        })
    }

    async fn abort_upload(&self, key: &str, upload_id: &str) -> StoreResult<()> {
        let dir = self.check_upload(key, upload_id).await?;
        tokio::fs::remove_dir_all(dir).await?;
        Ok(())
    }

    async fn complete_upload(&self, key: &str, upload_id: &str, parts: &[Part]) -> StoreResult<()> {
        let dir = self.check_upload(key, upload_id).await?;
        let mut body = Vec::new();
        for part in parts {
            let invalid = || StoreError::InvalidPart {
                upload_id: upload_id.to_string(),
                num: part.num,
            };
            let data = tokio::fs::read(dir.join(format!("{:05}", part.num)))
                .await
                .map_err(|_| invalid())?;
            if etag(&data) != part.etag {
                return Err(invalid());
            }
            body.extend_from_slice(&data);
        }
        self.write_atomic(&self.path_of(key)?, &body).await?;
        tokio::fs::remove_dir_all(dir).await?;
        Ok(())
    }
}

impl fmt::Display for FileObjectStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "file://{}", self.root.display())
    }
}
