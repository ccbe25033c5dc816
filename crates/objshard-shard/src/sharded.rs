//! The sharded store: N backends behind one [`ObjectStore`].

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use objshard_store::{
    create_storage, Credentials, Limits, MultipartUpload, ObjectInfo, ObjectStore, ObjectStream,
    Part, StoreError, StoreResult,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ShardConfig;
use crate::endpoint::expand_endpoints;
use crate::listing::{self, ListOptions, ListingConfig};
use crate::merge::merge_streams;
use crate::router::ShardRouter;

/// Routes every key to exactly one backend and merges listings across all
/// of them.
pub struct ShardedStore {
    stores: Vec<Arc<dyn ObjectStore>>,
    router: ShardRouter,
    listing: ListingConfig,
}

impl ShardedStore {
    /// Wrap already created backends. Shard `i` is `stores[i]`.
    pub fn new(stores: Vec<Arc<dyn ObjectStore>>, listing: ListingConfig) -> StoreResult<Self> {
        let router = ShardRouter::new(stores.len())?;
        Ok(Self {
            stores,
            router,
            listing,
        })
    }

    pub fn from_config(config: &ShardConfig) -> StoreResult<Self> {
        config.validate()?;
        let stores = create_shards(
            &config.backend,
            &config.endpoint,
            &config.credentials,
            config.shards,
        )?;
        Self::new(stores, config.listing.to_listing_config())
    }

    pub fn shard_count(&self) -> usize {
        self.stores.len()
    }

    /// Index of the backend that owns `key`.
    pub fn shard_for(&self, key: &str) -> usize {
        self.router.pick(key)
    }

    pub fn shard(&self, index: usize) -> Option<&Arc<dyn ObjectStore>> {
        self.stores.get(index)
    }

    pub fn shards(&self) -> &[Arc<dyn ObjectStore>] {
        &self.stores
    }

    pub fn listing_config(&self) -> &ListingConfig {
        &self.listing
    }

    fn pick(&self, key: &str) -> &Arc<dyn ObjectStore> {
        &self.stores[self.router.pick(key)]
    }

    /// Enumerate every shard and merge the results, cancelling all producers
    /// when `cancel` fires; the stream then ends with `StoreError::Cancelled`.
    /// Dropping the returned stream stops the listing without cancelling
    /// `cancel` itself.
    pub async fn list_all_with(
        &self,
        opts: &ListOptions,
        cancel: CancellationToken,
    ) -> StoreResult<ObjectStream> {
        let mut inputs = Vec::with_capacity(self.stores.len());
        for (index, store) in self.stores.iter().enumerate() {
            let stream =
                listing::list_all(Arc::clone(store), opts, &self.listing, cancel.child_token())
                    .await
                    .map_err(|e| e.in_shard(index))?;
            inputs.push(stream);
        }
        debug!(shards = inputs.len(), prefix = %opts.prefix, "merging shard listings");
        Ok(merge_streams(
            inputs,
            self.listing.merge_capacity,
            cancel.child_token(),
        ))
    }
}

fn create_shards(
    kind: &str,
    endpoint_template: &str,
    credentials: &Credentials,
    shard_count: usize,
) -> StoreResult<Vec<Arc<dyn ObjectStore>>> {
    let endpoints = expand_endpoints(endpoint_template, shard_count)?;
    let stores = endpoints
        .iter()
        .enumerate()
        .map(|(i, ep)| create_storage(kind, ep, credentials).map_err(|e| e.in_shard(i)))
        .collect::<StoreResult<Vec<_>>>()?;
    info!(kind, shards = stores.len(), template = endpoint_template, "created sharded store");
    Ok(stores)
}

/// Build a sharded store of `shard_count` backends of `kind`, one per
/// expansion of `endpoint_template`.
///
/// Every endpoint is expanded before any backend is created, and any failure
/// discards the whole construction.
pub fn new_sharded(
    kind: &str,
    endpoint_template: &str,
    credentials: &Credentials,
    shard_count: usize,
) -> StoreResult<ShardedStore> {
    let stores = create_shards(kind, endpoint_template, credentials, shard_count)?;
    ShardedStore::new(stores, ListingConfig::default())
}

impl fmt::Display for ShardedStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "shard{}://{}", self.stores.len(), self.stores[0])
    }
}

impl fmt::Debug for ShardedStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShardedStore")
            .field("shards", &self.stores.len())
            .field("first", &self.stores[0].to_string())
            .field("listing", &self.listing)
            .finish()
    }
}

#[async_trait]
impl ObjectStore for ShardedStore {
    async fn create(&self) -> StoreResult<()> {
        for (index, store) in self.stores.iter().enumerate() {
            store.create().await.map_err(|e| e.in_shard(index))?;
        }
        Ok(())
    }

    fn limits(&self) -> Limits {
        Limits {
            supports_upload_part_copy: false,
            ..self.stores[0].limits()
        }
    }

    async fn head(&self, key: &str) -> StoreResult<ObjectInfo> {
        self.pick(key).head(key).await
    }

    async fn get(&self, key: &str, offset: u64, limit: Option<u64>) -> StoreResult<Bytes> {
        self.pick(key).get(key, offset, limit).await
    }

    async fn put(&self, key: &str, body: Bytes) -> StoreResult<()> {
        self.pick(key).put(key, body).await
    }

    // Source and destination may live on different shards.
    async fn copy(&self, _dst: &str, _src: &str) -> StoreResult<()> {
        Err(StoreError::NotSupported("copy across shards"))
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        self.pick(key).delete(key).await
    }

    async fn list(
        &self,
        _prefix: &str,
        _marker: &str,
        _delimiter: &str,
        _max_keys: usize,
        _follow_links: bool,
    ) -> StoreResult<Vec<ObjectInfo>> {
        Err(StoreError::NotSupported("single-page list across shards"))
    }

    async fn list_all(
        &self,
        prefix: &str,
        marker: &str,
        follow_links: bool,
    ) -> StoreResult<ObjectStream> {
        let opts = ListOptions::new(prefix, marker, follow_links);
        self.list_all_with(&opts, CancellationToken::new()).await
    }

    async fn create_multipart_upload(&self, key: &str) -> StoreResult<MultipartUpload> {
        self.pick(key).create_multipart_upload(key).await
    }

    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        num: u32,
        body: Bytes,
    ) -> StoreResult<Part> {
        self.pick(key).upload_part(key, upload_id, num, body).await
    }

    /// Never fails: an abort that the backend rejects is only logged.
    async fn abort_upload(&self, key: &str, upload_id: &str) -> StoreResult<()> {
        let store = self.pick(key);
        if let Err(e) = store.abort_upload(key, upload_id).await {
            warn!(%store, key, upload_id, error = %e, "abort upload failed");
        }
        Ok(())
    }

    async fn complete_upload(&self, key: &str, upload_id: &str, parts: &[Part]) -> StoreResult<()> {
        self.pick(key).complete_upload(key, upload_id, parts).await
    }

    fn set_storage_class(&self, class: &str) -> StoreResult<()> {
        for store in &self.stores {
            match store.set_storage_class(class) {
                Ok(()) => {}
                Err(e) if e.is_not_supported() => debug!(%store, "storage class not supported"),
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use objshard_store::InMemoryObjectStore;

    fn mem_shards(n: usize) -> (ShardedStore, Vec<Arc<InMemoryObjectStore>>) {
        let backends: Vec<Arc<InMemoryObjectStore>> = (0..n)
            .map(|i| Arc::new(InMemoryObjectStore::new(format!("s{i}"))))
            .collect();
        let stores = backends
            .iter()
            .map(|b| Arc::clone(b) as Arc<dyn ObjectStore>)
            .collect();
        let sharded = ShardedStore::new(stores, ListingConfig::default()).unwrap();
        (sharded, backends)
    }

    #[test]
    fn zero_backends_is_rejected() {
        assert!(ShardedStore::new(Vec::new(), ListingConfig::default()).is_err());
    }

    #[tokio::test]
    async fn single_key_ops_land_on_routed_shard() {
        let (sharded, backends) = mem_shards(4);
        for key in ["alpha", "beta", "gamma", "delta", "epsilon"] {
            sharded.put(key, Bytes::from(key.to_string())).await.unwrap();
            let owner = sharded.shard_for(key);
            for (i, b) in backends.iter().enumerate() {
                assert_eq!(b.keys().contains(&key.to_string()), i == owner, "{key} on {i}");
            }
            assert_eq!(sharded.get(key, 0, None).await.unwrap(), Bytes::from(key.to_string()));
            assert_eq!(sharded.head(key).await.unwrap().size, key.len() as u64);
        }
        sharded.delete("alpha").await.unwrap();
        assert!(sharded.head("alpha").await.unwrap_err().is_not_found());
        sharded.delete("alpha").await.unwrap();
    }

    #[tokio::test]
    async fn errors_are_forwarded_verbatim() {
        let (sharded, _) = mem_shards(2);
        assert!(matches!(
            sharded.get("missing", 0, None).await.unwrap_err(),
            StoreError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn multipart_goes_to_one_shard() {
        let (sharded, backends) = mem_shards(3);
        let key = "big/object";
        let upload = sharded.create_multipart_upload(key).await.unwrap();
        let p1 = sharded
            .upload_part(key, &upload.upload_id, 1, Bytes::from_static(b"hello "))
            .await
            .unwrap();
        let p2 = sharded
            .upload_part(key, &upload.upload_id, 2, Bytes::from_static(b"world"))
            .await
            .unwrap();
        sharded
            .complete_upload(key, &upload.upload_id, &[p1, p2])
            .await
            .unwrap();
        assert_eq!(
            sharded.get(key, 0, None).await.unwrap(),
            Bytes::from_static(b"hello world")
        );
        assert!(backends[sharded.shard_for(key)].keys().contains(&key.to_string()));
    }

    #[tokio::test]
    async fn abort_never_fails() {
        let (sharded, backends) = mem_shards(2);
        sharded.abort_upload("k", "no-such-upload").await.unwrap();

        let upload = sharded.create_multipart_upload("k").await.unwrap();
        sharded.abort_upload("k", &upload.upload_id).await.unwrap();
        assert_eq!(backends[sharded.shard_for("k")].pending_uploads(), 0);
    }

    #[tokio::test]
    async fn copy_and_single_page_list_are_not_supported() {
        let (sharded, _) = mem_shards(2);
        sharded.put("a", Bytes::new()).await.unwrap();
        assert!(sharded.copy("b", "a").await.unwrap_err().is_not_supported());
        assert!(sharded
            .list("", "", "", 10, false)
            .await
            .unwrap_err()
            .is_not_supported());
    }

    #[tokio::test]
    async fn list_all_merges_every_shard() {
        let (sharded, _) = mem_shards(3);
        let mut keys: Vec<String> = (0..50).map(|i| format!("obj-{i:03}")).collect();
        for k in &keys {
            sharded.put(k, Bytes::new()).await.unwrap();
        }
        keys.sort();
        let listed: Vec<String> = sharded
            .list_all("", "", false)
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap()
            .into_iter()
            .map(|o| o.key)
            .collect();
        assert_eq!(listed, keys);

        let after: Vec<String> = sharded
            .list_all("obj-04", "obj-045", false)
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap()
            .into_iter()
            .map(|o| o.key)
            .collect();
        assert_eq!(after, vec!["obj-046", "obj-047", "obj-048", "obj-049"]);
    }

    #[tokio::test]
    async fn first_page_failure_names_the_shard() {
        let stores: Vec<Arc<dyn ObjectStore>> = vec![
            Arc::new(InMemoryObjectStore::new("ok")),
            Arc::new(Unlistable),
        ];
        let sharded = ShardedStore::new(stores, ListingConfig::default()).unwrap();
        match sharded.list_all("", "", false).await.unwrap_err() {
            StoreError::Shard { index, source } => {
                assert_eq!(index, 1);
                assert!(matches!(*source, StoreError::Backend(_)));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn storage_class_skips_unsupported_shards() {
        let stores: Vec<Arc<dyn ObjectStore>> = vec![
            Arc::new(InMemoryObjectStore::new("a")),
            Arc::new(Unlistable),
            Arc::new(InMemoryObjectStore::new("b")),
        ];
        let sharded = ShardedStore::new(stores, ListingConfig::default()).unwrap();
        sharded.set_storage_class("COLD").unwrap();
    }

    #[test]
    fn construction_fails_fast_on_bad_template() {
        let err = new_sharded("mem", "mem://shared", &Credentials::default(), 3).unwrap_err();
        assert!(matches!(err, StoreError::EndpointTemplate { .. }));
        assert!(new_sharded("nope", "x%d", &Credentials::default(), 2).is_err());
    }

    #[test]
    fn display_and_limits() {
        let sharded = new_sharded("mem", "mem://b%d", &Credentials::default(), 3).unwrap();
        assert_eq!(sharded.to_string(), "shard3://mem://b0");
        assert_eq!(sharded.shard_count(), 3);
        assert!(!sharded.limits().supports_upload_part_copy);
        assert_eq!(sharded.limits().max_part_count, Limits::default().max_part_count);
    }

    #[tokio::test]
    async fn create_prepares_every_shard() {
        let dir = tempfile::tempdir().unwrap();
        let template = format!("{}/shard-%d", dir.path().display());
        let sharded = new_sharded("file", &template, &Credentials::default(), 2).unwrap();
        sharded.create().await.unwrap();
        assert!(dir.path().join("shard-0").is_dir());
        assert!(dir.path().join("shard-1").is_dir());
    }

    struct Unlistable;

    impl fmt::Display for Unlistable {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "broken://")
        }
    }

    #[async_trait]
    impl ObjectStore for Unlistable {
        async fn head(&self, key: &str) -> StoreResult<ObjectInfo> {
            Err(StoreError::NotFound(key.into()))
        }
        async fn get(&self, key: &str, _: u64, _: Option<u64>) -> StoreResult<Bytes> {
            Err(StoreError::NotFound(key.into()))
        }
        async fn put(&self, _: &str, _: Bytes) -> StoreResult<()> {
            Ok(())
        }
        async fn delete(&self, _: &str) -> StoreResult<()> {
            Ok(())
        }
        async fn list(&self, _: &str, _: &str, _: &str, _: usize, _: bool) -> StoreResult<Vec<ObjectInfo>> {
            Err(StoreError::Backend("connection refused".into()))
        }
    }
}
