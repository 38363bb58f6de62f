//! Bucket enumeration.
//!
//! Walks the bucket namespace under a prefix: one level of "folders"
//! (common prefixes), then the archive objects inside each folder.

use crate::error::StorageError;
use crate::models::ArchiveRef;
use crate::storage::ObjectStore;

/// Folder prefixes one `/` level below `prefix`.
pub async fn list_folders(
    store: &dyn ObjectStore,
    bucket: &str,
    prefix: &str,
) -> Result<Vec<String>, StorageError> {
    store.list_folders(bucket, prefix).await
}

/// Objects under `prefix` whose key ends with `extension`, compared
/// case-insensitively, in listing order across all pages.
pub async fn list_objects_by_extension(
    store: &dyn ObjectStore,
    bucket: &str,
    prefix: &str,
    extension: &str,
) -> Result<Vec<ArchiveRef>, StorageError> {
    let extension = extension.to_ascii_lowercase();
    let objects = store.list_objects(bucket, prefix).await?;
    Ok(objects
        .into_iter()
        .filter(|o| o.key.to_ascii_lowercase().ends_with(&extension))
        .collect())
}

/// Apply the empty-listing fallback so a search always covers at least one
/// scope: the prefix itself, or the bucket root when there is no prefix.
pub fn resolve_folders(folders: Vec<String>, prefix: &str) -> Vec<String> {
    if !folders.is_empty() {
        folders
    } else if !prefix.is_empty() {
        vec![prefix.to_string()]
    } else {
        vec![String::new()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryStore;

    #[test]
    fn fallback_to_prefix_then_root() {
        assert_eq!(resolve_folders(vec![], "exports/2024"), vec!["exports/2024"]);
        assert_eq!(resolve_folders(vec![], ""), vec![""]);
        assert_eq!(
            resolve_folders(vec!["a/".into(), "b/".into()], "x"),
            vec!["a/", "b/"]
        );
    }

    #[tokio::test]
    async fn filters_by_extension_across_pages() {
        let store = MemoryStore::with_page_size(2);
        for key in ["d/1.zip", "d/2.txt", "d/3.ZIP", "d/4.zipx", "d/sub/5.zip", "e/6.zip"] {
            store.put_object("acme", key, Vec::new());
        }
        let refs = list_objects_by_extension(&store, "acme", "d/", ".zip")
            .await
            .unwrap();
        let keys: Vec<_> = refs.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(keys, vec!["d/1.zip", "d/3.ZIP", "d/sub/5.zip"]);
    }

    #[tokio::test]
    async fn folder_listing_is_one_level() {
        let store = MemoryStore::new();
        for key in ["root/a/x.zip", "root/a/deep/y.zip", "root/b/z.zip", "root/top.zip"] {
            store.put_object("acme", key, Vec::new());
        }
        let folders = list_folders(&store, "acme", "root/").await.unwrap();
        assert_eq!(folders, vec!["root/a/", "root/b/"]);
    }
}
