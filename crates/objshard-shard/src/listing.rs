//! Paginated listing driver.
//!
//! Turns a backend's page-oriented `list` into one lazy, strictly ordered
//! [`ObjectStream`]. A producer task requests pages of at most `page_size`
//! keys, validates ordering, and pushes into a bounded channel. The backend
//! never says whether more pages exist, so a short page means the end.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use objshard_store::{ObjectInfo, ObjectSender, ObjectStore, ObjectStream, StoreError, StoreResult};
use tokio_util::sync::CancellationToken;

use crate::log::{ListingLog, TracingLog};
use crate::retry::RetryPolicy;

/// Keys requested per page.
pub const DEFAULT_PAGE_SIZE: usize = 10_000;
/// Capacity of each per-shard listing channel.
pub const DEFAULT_QUEUE_CAPACITY: usize = 10_000;
/// Capacity of the merged output channel.
pub const DEFAULT_MERGE_CAPACITY: usize = 1_000;

/// Delimiter used when walking hierarchical backends.
const DIR_DELIMITER: &str = "/";

/// What to list.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ListOptions {
    pub prefix: String,
    /// Only keys strictly greater than this are returned.
    pub marker: String,
    pub follow_links: bool,
}

impl ListOptions {
    pub fn new(prefix: impl Into<String>, marker: impl Into<String>, follow_links: bool) -> Self {
        Self {
            prefix: prefix.into(),
            marker: marker.into(),
            follow_links,
        }
    }
}

/// Tunables shared by every listing driver of a store.
#[derive(Clone)]
pub struct ListingConfig {
    pub page_size: usize,
    pub queue_capacity: usize,
    pub merge_capacity: usize,
    pub retry: RetryPolicy,
    pub log: Arc<dyn ListingLog>,
}

impl Default for ListingConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            merge_capacity: DEFAULT_MERGE_CAPACITY,
            retry: RetryPolicy::default(),
            log: Arc::new(TracingLog),
        }
    }
}

impl ListingConfig {
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_log(mut self, log: Arc<dyn ListingLog>) -> Self {
        self.log = log;
        self
    }
}

impl fmt::Debug for ListingConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListingConfig")
            .field("page_size", &self.page_size)
            .field("queue_capacity", &self.queue_capacity)
            .field("merge_capacity", &self.merge_capacity)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

/// Run `fut` unless `cancel` fires first.
async fn cancellable<T>(
    cancel: &CancellationToken,
    fut: impl Future<Output = StoreResult<T>>,
) -> StoreResult<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(StoreError::Cancelled),
        res = fut => res,
    }
}

/// Issues page requests against one backend.
struct Pager {
    store: Arc<dyn ObjectStore>,
    follow_links: bool,
    delimiter: &'static str,
    page_size: usize,
    retry: RetryPolicy,
    log: Arc<dyn ListingLog>,
}

impl Pager {
    fn new(
        store: Arc<dyn ObjectStore>,
        opts: &ListOptions,
        delimiter: &'static str,
        cfg: &ListingConfig,
    ) -> Self {
        Self {
            store,
            follow_links: opts.follow_links,
            delimiter,
            page_size: cfg.page_size.max(1),
            retry: cfg.retry.clone(),
            log: Arc::clone(&cfg.log),
        }
    }

    async fn fetch(
        &self,
        prefix: &str,
        marker: &str,
        cancel: &CancellationToken,
    ) -> StoreResult<Vec<ObjectInfo>> {
        let started = Instant::now();
        let page = cancellable(
            cancel,
            self.store
                .list(prefix, marker, self.delimiter, self.page_size, self.follow_links),
        )
        .await?;
        self.log.debug(&format!(
            "Found {} objects from {} in {:?}",
            page.len(),
            self.store,
            started.elapsed()
        ));
        Ok(page)
    }

    /// Fetch a continuation page, retrying failures per the policy.
    async fn fetch_with_retry(
        &self,
        prefix: &str,
        marker: &str,
        cancel: &CancellationToken,
    ) -> StoreResult<Vec<ObjectInfo>> {
        let mut failures = 0u32;
        let mut first_failure: Option<Instant> = None;
        loop {
            let err = match self.fetch(prefix, marker, cancel).await {
                Ok(page) => return Ok(page),
                Err(StoreError::Cancelled) => return Err(StoreError::Cancelled),
                Err(e) => e,
            };
            failures += 1;
            let since = *first_failure.get_or_insert_with(Instant::now);
            if !self.retry.should_retry(failures, since.elapsed()) {
                return Err(StoreError::RetriesExhausted {
                    attempts: failures,
                    source: Box::new(err),
                });
            }
            self.log.warn(&format!("Fail to list: {err}, retry again"));
            let delay = self.retry.delay_for(failures);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(StoreError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    fn is_last_page(&self, len: usize) -> bool {
        len < self.page_size
    }
}

/// List every object of `store` under `opts.prefix` after `opts.marker`.
///
/// A native `list_all` of the backend is used as is. Otherwise the first page
/// is requested up front, so a backend that cannot list at all fails here
/// rather than inside the stream; a backend without plain paging is walked
/// with [`list_all_with_delimiter`]. Later failures arrive as the final `Err`
/// item of the stream.
pub async fn list_all(
    store: Arc<dyn ObjectStore>,
    opts: &ListOptions,
    cfg: &ListingConfig,
    cancel: CancellationToken,
) -> StoreResult<ObjectStream> {
    match store
        .list_all(&opts.prefix, &opts.marker, opts.follow_links)
        .await
    {
        Ok(native) => return Ok(forward_native(native, cfg.queue_capacity, cancel)),
        Err(e) if e.is_not_supported() => {}
        Err(e) => return Err(e),
    }

    let pager = Pager::new(Arc::clone(&store), opts, "", cfg);
    cfg.log.debug(&format!(
        "Listing objects from {} marker {:?}",
        store, opts.marker
    ));
    let first = match pager.fetch(&opts.prefix, &opts.marker, &cancel).await {
        Ok(page) => page,
        Err(e) if e.is_not_supported() => {
            return list_all_with_delimiter(store, opts, cfg, cancel).await;
        }
        Err(e) => {
            cfg.log.error(&format!("Can't list {store}: {e}"));
            return Err(e);
        }
    };

    let (tx, stream) = ObjectStream::channel(cfg.queue_capacity, cancel);
    let prefix = opts.prefix.clone();
    let marker = opts.marker.clone();
    tokio::spawn(async move { drive_pages(pager, prefix, marker, first, tx).await });
    Ok(stream)
}

/// Relay a backend's own listing stream so that `cancel` is observed
/// between items like it is by the paging drivers.
fn forward_native(
    mut native: ObjectStream,
    capacity: usize,
    cancel: CancellationToken,
) -> ObjectStream {
    let (tx, stream) = ObjectStream::channel(capacity, cancel);
    tokio::spawn(async move {
        let cancel = tx.token().clone();
        loop {
            let item = tokio::select! {
                biased;
                _ = cancel.cancelled() => return tx.finish_cancelled().await,
                item = native.next() => item,
            };
            let Some(item) = item else { return };
            let last = item.is_err();
            if !tx.send(item).await {
                return tx.finish_cancelled().await;
            }
            if last {
                return;
            }
        }
    });
    stream
}

/// Producer loop for plain paging.
async fn drive_pages(
    pager: Pager,
    prefix: String,
    marker: String,
    first: Vec<ObjectInfo>,
    tx: ObjectSender,
) {
    let cancel = tx.token().clone();
    let mut page = first;
    let mut last: Option<String> = None;
    loop {
        let len = page.len();
        for obj in page {
            if let Some(prev) = &last {
                if obj.key <= *prev {
                    pager.log.error(&format!(
                        "The keys are out of order: marker {:?}, last {:?} current {:?}",
                        marker, prev, obj.key
                    ));
                    let err = StoreError::OutOfOrder {
                        marker: marker.clone(),
                        previous: prev.clone(),
                        current: obj.key,
                    };
                    tx.send(Err(err)).await;
                    return;
                }
            }
            last = Some(obj.key.clone());
            if !tx.send(Ok(obj)).await {
                return tx.finish_cancelled().await;
            }
        }
        if len == 0 || pager.is_last_page(len) {
            return;
        }
        // An empty last key can only come from an empty marker and a single
        // object named "": asking for keys after it again would loop forever.
        let next_marker = match last.as_deref() {
            Some(key) if !key.is_empty() => key.to_string(),
            _ => return,
        };
        pager.log.debug(&format!(
            "Continue listing objects from {} marker {:?}",
            pager.store, next_marker
        ));
        page = match pager.fetch_with_retry(&prefix, &next_marker, &cancel).await {
            Ok(page) => page,
            Err(StoreError::Cancelled) => return tx.finish_cancelled().await,
            Err(e) => {
                pager.log.error(&format!("Can't list {}: {}", pager.store, e));
                tx.send(Err(e)).await;
                return;
            }
        };
    }
}

/// One directory level of a delimiter walk.
struct Level {
    prefix: String,
    entries: std::vec::IntoIter<ObjectInfo>,
    more: bool,
    last: Option<String>,
}

impl Level {
    fn new(prefix: String, page: Vec<ObjectInfo>, pager: &Pager) -> Self {
        let more = !pager.is_last_page(page.len());
        Self {
            prefix,
            entries: page.into_iter(),
            more,
            last: None,
        }
    }
}

/// List every object by walking directories with the `/` delimiter.
///
/// Entries of one directory come back sorted, and every key under `d/`
/// sorts between `d/` and the next sibling, so a depth-first walk that emits
/// a directory entry and then its contents yields a globally ordered stream.
pub async fn list_all_with_delimiter(
    store: Arc<dyn ObjectStore>,
    opts: &ListOptions,
    cfg: &ListingConfig,
    cancel: CancellationToken,
) -> StoreResult<ObjectStream> {
    let pager = Pager::new(Arc::clone(&store), opts, DIR_DELIMITER, cfg);
    cfg.log.debug(&format!(
        "Listing objects from {} with delimiter {:?} marker {:?}",
        store, DIR_DELIMITER, opts.marker
    ));
    let first = match pager.fetch(&opts.prefix, "", &cancel).await {
        Ok(page) => page,
        Err(e) => {
            if !e.is_not_supported() {
                cfg.log.error(&format!("Can't list {store}: {e}"));
            }
            return Err(e);
        }
    };

    let (tx, stream) = ObjectStream::channel(cfg.queue_capacity, cancel);
    let root = Level::new(opts.prefix.clone(), first, &pager);
    let marker = opts.marker.clone();
    tokio::spawn(async move { walk_levels(pager, root, marker, tx).await });
    Ok(stream)
}

/// Producer loop for the delimiter walk.
async fn walk_levels(pager: Pager, root: Level, marker: String, tx: ObjectSender) {
    let cancel = tx.token().clone();
    let mut stack = vec![root];

    while let Some(level) = stack.last_mut() {
        let Some(entry) = level.entries.next() else {
            let next_marker = match level.last.as_deref() {
                Some(key) if level.more && !key.is_empty() => key.to_string(),
                _ => {
                    stack.pop();
                    continue;
                }
            };
            let prefix = level.prefix.clone();
            match pager.fetch_with_retry(&prefix, &next_marker, &cancel).await {
                Ok(page) => {
                    level.more = !pager.is_last_page(page.len());
                    level.entries = page.into_iter();
                }
                Err(StoreError::Cancelled) => return tx.finish_cancelled().await,
                Err(e) => {
                    pager.log.error(&format!("Can't list {}: {}", pager.store, e));
                    tx.send(Err(e)).await;
                    return;
                }
            }
            continue;
        };

        if let Some(prev) = &level.last {
            if entry.key <= *prev {
                pager.log.error(&format!(
                    "The keys are out of order: marker {:?}, last {:?} current {:?}",
                    marker, prev, entry.key
                ));
                let err = StoreError::OutOfOrder {
                    marker: marker.clone(),
                    previous: prev.clone(),
                    current: entry.key,
                };
                tx.send(Err(err)).await;
                return;
            }
        }
        level.last = Some(entry.key.clone());
        let is_child_level = stack.len() > 1;
        let level_prefix = &stack[stack.len() - 1].prefix;
        // A directory marker object named like its own directory was already
        // emitted as the directory entry one level up.
        if is_child_level && entry.key == *level_prefix {
            continue;
        }

        if entry.is_dir {
            let after_marker = entry.key > marker;
            if !after_marker && !marker.starts_with(&entry.key) {
                // The whole subtree sorts at or before the marker.
                continue;
            }
            let dir = entry.key.clone();
            if after_marker && !tx.send(Ok(entry)).await {
                return tx.finish_cancelled().await;
            }
            let page = match pager.fetch_with_retry(&dir, "", &cancel).await {
                Ok(page) => page,
                Err(StoreError::Cancelled) => return tx.finish_cancelled().await,
                Err(e) => {
                    pager.log.error(&format!("Can't list {}: {}", pager.store, e));
                    tx.send(Err(e)).await;
                    return;
                }
            };
            let child = Level::new(dir, page, &pager);
            stack.push(child);
        } else if entry.key > marker && !tx.send(Ok(entry)).await {
            return tx.finish_cancelled().await;
        }
    }
}
