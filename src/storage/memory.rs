//! In-memory [`ObjectStore`] implementation for tests and local runs.
//!
//! Buckets are `BTreeMap`s behind `std::sync::RwLock`, so listings come back
//! in key order just like S3. A small page size can be set to exercise
//! continuation-token handling, and individual keys can be made to fail or
//! stall to exercise per-archive error handling.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};

use super::{ByteStream, ListPage, ListRequest, ObjectStore, StoreProvider};
use crate::error::StorageError;
use crate::models::{ArchiveRef, Credentials};

struct StoredObject {
    bytes: Vec<u8>,
    last_modified: DateTime<Utc>,
}

/// Chunk size used by `get_object_stream`.
const STREAM_CHUNK_BYTES: usize = 8 * 1024;

/// One listing item: an object or a collapsed common prefix.
enum Item<'a> {
    Object(&'a str, &'a StoredObject),
    Prefix(String),
}

/// In-memory bucket store.
pub struct MemoryStore {
    buckets: RwLock<HashMap<String, BTreeMap<String, StoredObject>>>,
    page_size: usize,
    failing_keys: RwLock<HashSet<String>>,
    failing_listings: RwLock<HashSet<String>>,
    delays: RwLock<HashMap<String, Duration>>,
    offline: RwLock<bool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_page_size(1000)
    }

    /// Listings return at most `page_size` items per page.
    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            buckets: RwLock::new(HashMap::new()),
            page_size: page_size.max(1),
            failing_keys: RwLock::new(HashSet::new()),
            failing_listings: RwLock::new(HashSet::new()),
            delays: RwLock::new(HashMap::new()),
            offline: RwLock::new(false),
        }
    }

    pub fn create_bucket(&self, bucket: &str) {
        if let Ok(mut buckets) = self.buckets.write() {
            buckets.entry(bucket.to_string()).or_default();
        }
    }

    /// Store an object, creating the bucket if needed.
    pub fn put_object(&self, bucket: &str, key: &str, bytes: Vec<u8>) {
        if let Ok(mut buckets) = self.buckets.write() {
            buckets.entry(bucket.to_string()).or_default().insert(
                key.to_string(),
                StoredObject {
                    bytes,
                    last_modified: Utc::now(),
                },
            );
        }
    }

    /// Make `get_object` fail for `key`.
    pub fn fail_key(&self, key: &str) {
        if let Ok(mut keys) = self.failing_keys.write() {
            keys.insert(key.to_string());
        }
    }

    /// Make listings of exactly `prefix` fail.
    pub fn fail_listing(&self, prefix: &str) {
        if let Ok(mut prefixes) = self.failing_listings.write() {
            prefixes.insert(prefix.to_string());
        }
    }

    /// Make `get_object` sleep before answering for `key`.
    pub fn delay_key(&self, key: &str, delay: Duration) {
        if let Ok(mut delays) = self.delays.write() {
            delays.insert(key.to_string(), delay);
        }
    }

    /// Simulate an unreachable store: every call fails.
    pub fn set_offline(&self, offline: bool) {
        if let Ok(mut flag) = self.offline.write() {
            *flag = offline;
        }
    }

    fn check_online(&self, operation: &'static str) -> Result<(), StorageError> {
        let offline = self.offline.read().map(|f| *f).unwrap_or(false);
        if offline {
            Err(StorageError::Transport {
                operation,
                message: "store is offline".to_string(),
            })
        } else {
            Ok(())
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn lock_poisoned(operation: &'static str) -> StorageError {
    StorageError::Transport {
        operation,
        message: "memory store lock poisoned".to_string(),
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn list_buckets(&self) -> Result<Vec<String>, StorageError> {
        self.check_online("ListBuckets")?;
        let buckets = self.buckets.read().map_err(|_| lock_poisoned("ListBuckets"))?;
        let mut names: Vec<String> = buckets.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn list_page(
        &self,
        bucket: &str,
        request: ListRequest<'_>,
    ) -> Result<ListPage, StorageError> {
        self.check_online("ListObjectsV2")?;
        let failing = self
            .failing_listings
            .read()
            .map_err(|_| lock_poisoned("ListObjectsV2"))?
            .contains(request.prefix);
        if failing {
            return Err(StorageError::Status {
                operation: "ListObjectsV2",
                status: 500,
                body: "injected failure".to_string(),
            });
        }
        let buckets = self
            .buckets
            .read()
            .map_err(|_| lock_poisoned("ListObjectsV2"))?;
        let objects = buckets
            .get(bucket)
            .ok_or_else(|| StorageError::NoSuchBucket(bucket.to_string()))?;

        let mut items: Vec<Item<'_>> = Vec::new();
        for (key, obj) in objects.range(request.prefix.to_string()..) {
            let Some(rest) = key.strip_prefix(request.prefix) else {
                break;
            };
            match request.delimiter.and_then(|d| rest.find(d).map(|i| (d, i))) {
                Some((d, i)) => {
                    let prefix = format!("{}{}", request.prefix, &rest[..i + d.len()]);
                    let repeated = matches!(items.last(), Some(Item::Prefix(p)) if *p == prefix);
                    if !repeated {
                        items.push(Item::Prefix(prefix));
                    }
                }
                None => items.push(Item::Object(key, obj)),
            }
        }

        let start = match request.continuation_token {
            Some(token) => token.parse::<usize>().map_err(|_| {
                StorageError::InvalidRequest(format!("bad continuation token: {}", token))
            })?,
            None => 0,
        };
        let end = (start + self.page_size).min(items.len());

        let mut page = ListPage::default();
        for item in items.iter().take(end).skip(start) {
            match item {
                Item::Object(key, obj) => {
                    if key.ends_with('/') {
                        continue;
                    }
                    page.objects.push(ArchiveRef {
                        key: key.to_string(),
                        size: obj.bytes.len() as u64,
                        last_modified: obj.last_modified,
                    });
                }
                Item::Prefix(p) => page.common_prefixes.push(p.clone()),
            }
        }
        if end < items.len() {
            page.next_continuation_token = Some(end.to_string());
        }
        Ok(page)
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StorageError> {
        self.check_online("GetObject")?;
        let delay = self
            .delays
            .read()
            .map_err(|_| lock_poisoned("GetObject"))?
            .get(key)
            .copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let failing = self
            .failing_keys
            .read()
            .map_err(|_| lock_poisoned("GetObject"))?
            .contains(key);
        if failing {
            return Err(StorageError::Status {
                operation: "GetObject",
                status: 500,
                body: "injected failure".to_string(),
            });
        }
        let buckets = self.buckets.read().map_err(|_| lock_poisoned("GetObject"))?;
        buckets
            .get(bucket)
            .and_then(|objects| objects.get(key))
            .map(|obj| obj.bytes.clone())
            .ok_or_else(|| StorageError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            })
    }

    async fn get_object_stream(&self, bucket: &str, key: &str) -> Result<ByteStream, StorageError> {
        let bytes = Bytes::from(self.get_object(bucket, key).await?);
        let chunks: Vec<Result<Bytes, StorageError>> = (0..bytes.len())
            .step_by(STREAM_CHUNK_BYTES)
            .map(|start| Ok(bytes.slice(start..(start + STREAM_CHUNK_BYTES).min(bytes.len()))))
            .collect();
        Ok(stream::iter(chunks).boxed())
    }

    fn presign_get(
        &self,
        bucket: &str,
        key: &str,
        expiry_secs: u64,
    ) -> Result<String, StorageError> {
        Ok(format!("memory://{}/{}?expires={}", bucket, key, expiry_secs))
    }
}

/// Hands out the same shared [`MemoryStore`] for every set of credentials.
pub struct MemoryProvider {
    store: Arc<MemoryStore>,
}

impl MemoryProvider {
    pub fn new(store: Arc<MemoryStore>) -> Self {
        Self { store }
    }
}

impl StoreProvider for MemoryProvider {
    fn connect(&self, _credentials: &Credentials) -> Result<Arc<dyn ObjectStore>, StorageError> {
        Ok(self.store.clone())
    }
}
