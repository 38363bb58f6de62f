//! Object storage abstraction.
//!
//! The [`ObjectStore`] trait defines the storage operations the search
//! pipeline needs, so the orchestrator runs unchanged against S3
//! ([`s3::S3Store`]) or an in-memory bucket ([`memory::MemoryStore`]).
//!
//! Implementations only provide single-page listings; the provided
//! [`list_objects`](ObjectStore::list_objects) and
//! [`list_folders`](ObjectStore::list_folders) methods follow continuation
//! tokens until the listing is exhausted.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;
pub mod s3;

use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Bytes;
use futures::stream::{self, BoxStream, StreamExt};

use crate::error::StorageError;
use crate::models::{ArchiveRef, Credentials};

/// Object body delivered in chunks, for pass-through downloads.
pub type ByteStream = BoxStream<'static, Result<Bytes, StorageError>>;

/// Parameters for one `ListObjectsV2`-style page.
#[derive(Debug, Clone, Default)]
pub struct ListRequest<'a> {
    pub prefix: &'a str,
    /// `Some("/")` groups keys into common prefixes (one folder level).
    pub delimiter: Option<&'a str>,
    pub continuation_token: Option<&'a str>,
}

/// One page of a listing.
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    pub objects: Vec<ArchiveRef>,
    pub common_prefixes: Vec<String>,
    /// Set while more pages remain.
    pub next_continuation_token: Option<String>,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Names of all buckets visible to the credentials. Also used as a
    /// connectivity check.
    async fn list_buckets(&self) -> Result<Vec<String>, StorageError>;

    /// Fetch a single listing page.
    async fn list_page(
        &self,
        bucket: &str,
        request: ListRequest<'_>,
    ) -> Result<ListPage, StorageError>;

    /// Download an object's raw bytes.
    async fn get_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StorageError>;

    /// Download an object as a stream of chunks.
    ///
    /// A missing object is reported here, before the first chunk. The
    /// default buffers through [`get_object`](ObjectStore::get_object).
    async fn get_object_stream(&self, bucket: &str, key: &str) -> Result<ByteStream, StorageError> {
        let bytes = self.get_object(bucket, key).await?;
        Ok(stream::once(async move { Ok(Bytes::from(bytes)) }).boxed())
    }

    /// Pre-signed GET URL valid for `expiry_secs`.
    fn presign_get(&self, bucket: &str, key: &str, expiry_secs: u64)
        -> Result<String, StorageError>;

    /// Every object under `prefix`, all pages concatenated in listing order.
    async fn list_objects(&self, bucket: &str, prefix: &str) -> Result<Vec<ArchiveRef>, StorageError> {
        let mut objects = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let page = self
                .list_page(
                    bucket,
                    ListRequest {
                        prefix,
                        delimiter: None,
                        continuation_token: token.as_deref(),
                    },
                )
                .await?;
            objects.extend(page.objects);
            match page.next_continuation_token {
                Some(next) => token = Some(next),
                None => break,
            }
        }
        Ok(objects)
    }

    /// Common prefixes one `/` level below `prefix`.
    async fn list_folders(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, StorageError> {
        let mut folders = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let page = self
                .list_page(
                    bucket,
                    ListRequest {
                        prefix,
                        delimiter: Some("/"),
                        continuation_token: token.as_deref(),
                    },
                )
                .await?;
            folders.extend(page.common_prefixes);
            match page.next_continuation_token {
                Some(next) => token = Some(next),
                None => break,
            }
        }
        Ok(folders)
    }
}

/// Builds an [`ObjectStore`] from per-request credentials.
///
/// Credentials are never stored by zipsweep itself; every submission carries
/// its own and gets its own store.
pub trait StoreProvider: Send + Sync {
    fn connect(&self, credentials: &Credentials) -> Result<Arc<dyn ObjectStore>, StorageError>;
}

/// Final `/`-separated segment of a key, used for attachment and report
/// file names.
pub fn file_name(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_name_takes_last_segment() {
        assert_eq!(file_name("a/b/c.zip"), "c.zip");
        assert_eq!(file_name("c.zip"), "c.zip");
        assert_eq!(file_name("dir/"), "");
    }
}
