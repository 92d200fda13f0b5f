//! Publication of result files to durable object storage

use crate::Result;
use anyhow::Context;
use async_trait::async_trait;
use serde::Serialize;
use std::{
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::fs;

/// Durable object storage
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Replace the object at `path` with `contents`
    async fn put(&self, path: &str, contents: Vec<u8>, content_type: &str) -> Result<()>;
}

/// Object storage bucket backed by a local directory
#[derive(Clone, Debug)]
pub struct FsBucket {
    /// Directory where the bucket's objects live
    root: PathBuf,
}
//
impl FsBucket {
    /// Open a bucket under some storage root directory
    pub fn new(store_root: &Path, bucket: &str) -> Self {
        Self {
            root: store_root.join("buckets").join(bucket),
        }
    }
}
//
#[async_trait]
impl ArtifactStore for FsBucket {
    async fn put(&self, path: &str, contents: Vec<u8>, _content_type: &str) -> Result<()> {
        let object_path = self.root.join(path);
        if let Some(parent) = object_path.parent() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("creating directory {}", parent.display()))?;
        }

        // Write to a temporary file first, then move it in place, so that
        // readers never observe a partially written object
        let temp_path = object_path.with_extension("tmp");
        fs::write(&temp_path, contents)
            .await
            .with_context(|| format!("writing {}", temp_path.display()))?;
        fs::rename(&temp_path, &object_path)
            .await
            .with_context(|| format!("moving {} in place", object_path.display()))?;
        Ok(())
    }
}

/// Publisher of JSON artifacts under a common path prefix
///
/// Publication failures are logged and reported as `false`, they never stop
/// the pipeline.
#[derive(Clone)]
pub struct Publisher {
    /// Underlying object storage
    store: Arc<dyn ArtifactStore>,

    /// Path prefix of all artifacts, without trailing slash
    prefix: Box<str>,
}
//
impl Publisher {
    /// Publish artifacts into `store`, under `prefix`
    pub fn new(store: Arc<dyn ArtifactStore>, prefix: &str) -> Self {
        Self {
            store,
            prefix: prefix.trim_end_matches('/').into(),
        }
    }

    /// Full path of an artifact
    pub fn path(&self, name: &str) -> String {
        if self.prefix.is_empty() {
            name.to_owned()
        } else {
            format!("{}/{name}", self.prefix)
        }
    }

    /// Serialize `payload` to JSON and store it as artifact `name`, replacing
    /// any previous version
    ///
    /// Returns truth that the artifact was stored.
    pub async fn publish<T: Serialize + Sync + ?Sized>(&self, name: &str, payload: &T) -> bool {
        let path = self.path(name);
        let result = async {
            let json = serde_json::to_vec(payload).context("serializing to JSON")?;
            self.store.put(&path, json, "application/json").await
        }
        .await;
        match result {
            Ok(()) => {
                log::info!("Uploaded {path} to storage");
                true
            }
            Err(e) => {
                log::error!("Error uploading {path}: {e:#}");
                false
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::{
        collections::{BTreeMap, HashSet},
        sync::Mutex,
    };

    /// Object storage that keeps objects in memory
    #[derive(Debug, Default)]
    pub(crate) struct MemoryBucket {
        objects: Mutex<BTreeMap<String, Vec<u8>>>,
        broken_paths: HashSet<String>,
    }
    //
    impl MemoryBucket {
        /// Make uploads to some path fail
        pub(crate) fn failing_on(mut self, path: &str) -> Self {
            self.broken_paths.insert(path.to_owned());
            self
        }

        /// Paths of the stored objects, in sorted order
        pub(crate) fn paths(&self) -> Vec<String> {
            self.objects.lock().unwrap().keys().cloned().collect()
        }

        /// Parse a stored JSON object
        pub(crate) fn json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Option<T> {
            let objects = self.objects.lock().unwrap();
            objects
                .get(path)
                .map(|bytes| serde_json::from_slice(bytes).unwrap())
        }
    }
    //
    #[async_trait]
    impl ArtifactStore for MemoryBucket {
        async fn put(&self, path: &str, contents: Vec<u8>, content_type: &str) -> Result<()> {
            assert_eq!(content_type, "application/json");
            anyhow::ensure!(!self.broken_paths.contains(path), "bucket refused {path}");
            self.objects.lock().unwrap().insert(path.to_owned(), contents);
            Ok(())
        }
    }

    #[tokio::test]
    async fn publish_overwrites_whole_object() {
        let bucket = Arc::new(MemoryBucket::default());
        let publisher = Publisher::new(bucket.clone(), "data/google-ngram/");
        assert!(publisher.publish("x.json", &BTreeMap::from([("cat", 1), ("dog", 2)])).await);
        assert!(publisher.publish("x.json", &BTreeMap::from([("eel", 3)])).await);
        assert_eq!(bucket.paths(), ["data/google-ngram/x.json"]);
        assert_eq!(
            bucket.json::<BTreeMap<String, u64>>("data/google-ngram/x.json"),
            Some(BTreeMap::from([("eel".to_owned(), 3)]))
        );
    }

    #[tokio::test]
    async fn failures_are_reported_not_raised() {
        let bucket = Arc::new(MemoryBucket::default().failing_on("out/bad.json"));
        let publisher = Publisher::new(bucket.clone(), "out");
        assert!(!publisher.publish("bad.json", &[1, 2, 3]).await);
        assert!(publisher.publish("good.json", &[1, 2, 3]).await);
        assert_eq!(bucket.paths(), ["out/good.json"]);
    }

    #[tokio::test]
    async fn fs_bucket_replaces_files() {
        let dir = tempfile::tempdir().unwrap();
        let bucket = FsBucket::new(dir.path(), "my-bucket");
        bucket.put("a/b/c.json", b"[1]".to_vec(), "application/json").await.unwrap();
        bucket.put("a/b/c.json", b"[]".to_vec(), "application/json").await.unwrap();
        let object = dir.path().join("buckets/my-bucket/a/b/c.json");
        assert_eq!(std::fs::read(&object).unwrap(), b"[]");
        assert!(!object.with_extension("tmp").exists());
    }
}
