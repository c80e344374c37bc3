//! The object namespace collaborator.
//!
//! Everything the engine knows about a job is read back through
//! [`ObjectStore`]. Two implementations exist: [`crate::minio::S3Store`] for
//! S3-compatible services and [`MemoryStore`] for in-process runs and tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{broadcast, RwLock};
use tracing::debug;

use crate::error::StorageError;

/// User metadata attached to an object.
pub type Metadata = HashMap<String, String>;

/// Metadata key for the number of records a task processed.
pub const META_LINE_COUNT: &str = "linecount";
/// Metadata key for the task wall time, in seconds.
pub const META_PROCESSING_TIME: &str = "processingtime";
/// Metadata key for the task memory high-water mark, in bytes.
pub const META_MEMORY_USAGE: &str = "memoryusage";

/// Listing entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    pub key: String,
    pub size: u64,
    /// S3 listings do not carry user metadata; this is empty for [`crate::minio::S3Store`].
    pub metadata: Metadata,
}

impl ObjectInfo {
    pub fn new(key: impl Into<String>, size: u64) -> Self {
        Self {
            key: key.into(),
            size,
            metadata: Metadata::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StoredObject {
    pub body: Bytes,
    pub metadata: Metadata,
}

/// Result of a conditional create.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    Created,
    AlreadyExists,
}

/// One page of a listing. `next` is opaque and only meaningful to the store
/// that produced it.
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    pub objects: Vec<ObjectInfo>,
    pub next: Option<String>,
}

/// Raised whenever an object is created or overwritten.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectCreated {
    pub bucket: String,
    pub key: String,
}

#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    /// Create or overwrite.
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        metadata: Metadata,
    ) -> Result<(), StorageError>;

    /// Create only if no object exists under `key`. Must be atomic: of two
    /// concurrent callers exactly one observes [`PutOutcome::Created`].
    async fn put_if_absent(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        metadata: Metadata,
    ) -> Result<PutOutcome, StorageError>;

    async fn get(&self, bucket: &str, key: &str) -> Result<StoredObject, StorageError>;

    async fn exists(&self, bucket: &str, key: &str) -> Result<bool, StorageError>;

    async fn list_page(
        &self,
        bucket: &str,
        prefix: &str,
        continuation: Option<String>,
    ) -> Result<ListPage, StorageError>;

    /// All objects under `prefix`, ordered by key.
    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<ObjectInfo>, StorageError> {
        let mut objects = vec![];
        let mut continuation = None;
        loop {
            let page = self.list_page(bucket, prefix, continuation).await?;
            objects.extend(page.objects);
            match page.next {
                Some(token) => continuation = Some(token),
                None => break,
            }
        }
        objects.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(objects)
    }
}

#[derive(Debug, Clone)]
struct Entry {
    body: Bytes,
    metadata: Metadata,
}

/// In-process object store with S3-like semantics and a change feed.
///
/// Listing is ordered by key and paginated at `page_size` entries, the
/// continuation token being the last key returned.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    objects: Arc<RwLock<BTreeMap<(String, String), Entry>>>,
    feed: broadcast::Sender<ObjectCreated>,
    page_size: usize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_page_size(1000)
    }

    pub fn with_page_size(page_size: usize) -> Self {
        let (feed, _) = broadcast::channel(4096);
        Self {
            objects: Arc::new(RwLock::new(BTreeMap::new())),
            feed,
            page_size: page_size.max(1),
        }
    }

    /// `onCreate`: a receiver of every create/overwrite event. Filtering by
    /// prefix is left to the subscriber, as with bucket notification rules.
    pub fn subscribe(&self) -> broadcast::Receiver<ObjectCreated> {
        self.feed.subscribe()
    }

    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }

    fn notify(&self, bucket: &str, key: &str) {
        // No subscribers is fine.
        let _ = self.feed.send(ObjectCreated {
            bucket: bucket.to_string(),
            key: key.to_string(),
        });
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        metadata: Metadata,
    ) -> Result<(), StorageError> {
        {
            let mut objects = self.objects.write().await;
            objects.insert(
                (bucket.to_string(), key.to_string()),
                Entry { body, metadata },
            );
        }
        debug!(bucket, key, "put object");
        self.notify(bucket, key);
        Ok(())
    }

    async fn put_if_absent(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        metadata: Metadata,
    ) -> Result<PutOutcome, StorageError> {
        {
            let mut objects = self.objects.write().await;
            let id = (bucket.to_string(), key.to_string());
            if objects.contains_key(&id) {
                return Ok(PutOutcome::AlreadyExists);
            }
            objects.insert(id, Entry { body, metadata });
        }
        debug!(bucket, key, "created object");
        self.notify(bucket, key);
        Ok(PutOutcome::Created)
    }

    async fn get(&self, bucket: &str, key: &str) -> Result<StoredObject, StorageError> {
        let objects = self.objects.read().await;
        objects
            .get(&(bucket.to_string(), key.to_string()))
            .map(|entry| StoredObject {
                body: entry.body.clone(),
                metadata: entry.metadata.clone(),
            })
            .ok_or_else(|| StorageError::not_found(bucket, key))
    }

    async fn exists(&self, bucket: &str, key: &str) -> Result<bool, StorageError> {
        let objects = self.objects.read().await;
        Ok(objects.contains_key(&(bucket.to_string(), key.to_string())))
    }

    async fn list_page(
        &self,
        bucket: &str,
        prefix: &str,
        continuation: Option<String>,
    ) -> Result<ListPage, StorageError> {
        let objects = self.objects.read().await;
        let start = (bucket.to_string(), continuation.unwrap_or_default());

        let mut page: Vec<ObjectInfo> = objects
            .range(start.clone()..)
            .filter(|((_, key), _)| *key != start.1)
            .take_while(|((b, _), _)| b == bucket)
            .filter(|((_, key), _)| key.starts_with(prefix))
            .take(self.page_size + 1)
            .map(|((_, key), entry)| ObjectInfo {
                key: key.clone(),
                size: entry.body.len() as u64,
                metadata: entry.metadata.clone(),
            })
            .collect();

        let next = if page.len() > self.page_size {
            page.truncate(self.page_size);
            page.last().map(|o| o.key.clone())
        } else {
            None
        };

        Ok(ListPage {
            objects: page,
            next,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_if_absent_only_creates_once() {
        let store = MemoryStore::new();
        let first = store
            .put_if_absent("b", "k", Bytes::from("1"), Metadata::new())
            .await
            .unwrap();
        let second = store
            .put_if_absent("b", "k", Bytes::from("2"), Metadata::new())
            .await
            .unwrap();

        assert_eq!(first, PutOutcome::Created);
        assert_eq!(second, PutOutcome::AlreadyExists);
        assert_eq!(store.get("b", "k").await.unwrap().body, Bytes::from("1"));
    }

    #[tokio::test]
    async fn concurrent_conditional_creates_have_one_winner() {
        let store = MemoryStore::new();
        let mut handles = vec![];
        for i in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .put_if_absent("b", "marker", Bytes::from(i.to_string()), Metadata::new())
                    .await
                    .unwrap()
            }));
        }
        let mut created = 0;
        for handle in handles {
            if handle.await.unwrap() == PutOutcome::Created {
                created += 1;
            }
        }
        assert_eq!(created, 1);
    }

    #[tokio::test]
    async fn get_missing_key_is_not_found() {
        let store = MemoryStore::new();
        let err = store.get("b", "missing").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn list_paginates_in_key_order_within_prefix() {
        let store = MemoryStore::with_page_size(2);
        for key in ["job/e", "job/a", "other/x", "job/c", "job/b", "job/d"] {
            store
                .put("b", key, Bytes::from_static(b"xy"), Metadata::new())
                .await
                .unwrap();
        }
        store
            .put("c", "job/z", Bytes::new(), Metadata::new())
            .await
            .unwrap();

        let first = store.list_page("b", "job/", None).await.unwrap();
        assert_eq!(first.objects.len(), 2);
        assert!(first.next.is_some());

        let keys: Vec<String> = store
            .list("b", "job/")
            .await
            .unwrap()
            .into_iter()
            .map(|o| o.key)
            .collect();
        assert_eq!(keys, vec!["job/a", "job/b", "job/c", "job/d", "job/e"]);
    }

    #[tokio::test]
    async fn writes_are_announced_on_the_change_feed() {
        let store = MemoryStore::new();
        let mut feed = store.subscribe();
        store
            .put("b", "job/task/mapper/1", Bytes::new(), Metadata::new())
            .await
            .unwrap();
        let event = feed.recv().await.unwrap();
        assert_eq!(event.key, "job/task/mapper/1");
        assert_eq!(event.bucket, "b");
    }
}
