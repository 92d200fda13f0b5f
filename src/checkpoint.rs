//! Durable record of which shards have already been processed
//!
//! Checkpoints make the pipeline resumable: a shard whose checkpoint says
//! "done" is skipped on the next run. Checking and then recording a
//! checkpoint is not atomic, so a shard may occasionally be processed twice
//! (at-least-once semantics).

use crate::{catalog::ShardDescriptor, Result};
use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::fs;

/// Collection holding one record per processed shard
pub const SHARDS_COLLECTION: &str = "ngram_shards";

/// Collection holding the job status record
pub const JOBS_COLLECTION: &str = "system_jobs";

/// Identifier of the job status record
pub const JOB_STATUS_ID: &str = "google_ngram_last_run";

/// Processing status of a shard
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ShardStatus {
    /// Shard was processed and its results published
    Done,

    /// Any status this program does not know about
    #[serde(other)]
    Unknown,
}

/// Checkpoint of a shard
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckpointRecord {
    pub status: ShardStatus,
    pub source_url: Box<str>,
    pub updated_at: DateTime<Utc>,
}

/// Outcome of the last full pipeline run
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatus {
    pub ran_at: DateTime<Utc>,
    pub completed: bool,
}

/// Durable key-value storage for checkpoints
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Look up the checkpoint of a shard
    async fn load(&self, key: &str) -> Result<Option<CheckpointRecord>>;

    /// Create or replace the checkpoint of a shard
    async fn save(&self, key: &str, record: &CheckpointRecord) -> Result<()>;

    /// Create or replace the job status record
    async fn save_job_status(&self, status: &JobStatus) -> Result<()>;
}

/// Checkpoint database backed by a local directory, with one JSON file per
/// record
#[derive(Clone, Debug)]
pub struct FsCheckpoints {
    /// Directory of the database
    root: PathBuf,
}
//
impl FsCheckpoints {
    /// Name of the database used when none is specified
    pub const DEFAULT_DB: &'static str = "(default)";

    /// Open a checkpoint database, creating it if needed
    pub async fn open(store_root: &Path, database: Option<&str>) -> Result<Self> {
        let root = store_root
            .join("checkpoints")
            .join(database.unwrap_or(Self::DEFAULT_DB));
        for collection in [SHARDS_COLLECTION, JOBS_COLLECTION] {
            let dir = root.join(collection);
            fs::create_dir_all(&dir)
                .await
                .with_context(|| format!("creating checkpoint collection {}", dir.display()))?;
        }
        Ok(Self { root })
    }

    /// Location of a record
    fn path(&self, collection: &str, id: &str) -> PathBuf {
        self.root.join(collection).join(format!("{id}.json"))
    }

    /// Read a record, if it exists
    async fn read<T: DeserializeOwned>(&self, collection: &str, id: &str) -> Result<Option<T>> {
        let path = self.path(collection, id);
        match fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .with_context(|| format!("parsing checkpoint {}", path.display())),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("reading checkpoint {}", path.display())),
        }
    }

    /// Create or replace a record
    async fn write<T: Serialize + Sync>(
        &self,
        collection: &str,
        id: &str,
        record: &T,
    ) -> Result<()> {
        let path = self.path(collection, id);
        let temp_path = path.with_extension("tmp");
        let json = serde_json::to_vec_pretty(record).context("converting checkpoint to JSON")?;
        fs::write(&temp_path, json)
            .await
            .with_context(|| format!("writing checkpoint {}", temp_path.display()))?;
        fs::rename(&temp_path, &path)
            .await
            .with_context(|| format!("moving checkpoint {} in place", path.display()))
    }
}
//
#[async_trait]
impl CheckpointStore for FsCheckpoints {
    async fn load(&self, key: &str) -> Result<Option<CheckpointRecord>> {
        self.read(SHARDS_COLLECTION, key).await
    }

    async fn save(&self, key: &str, record: &CheckpointRecord) -> Result<()> {
        self.write(SHARDS_COLLECTION, key, record).await
    }

    async fn save_job_status(&self, status: &JobStatus) -> Result<()> {
        self.write(JOBS_COLLECTION, JOB_STATUS_ID, status).await
    }
}

/// Checkpointing capability of the pipeline
///
/// Store failures never stop the pipeline. When in doubt, a shard is
/// considered not done, so that work gets redone rather than silently lost.
#[derive(Clone)]
pub struct Checkpoints(Option<Arc<dyn CheckpointStore>>);
//
impl Checkpoints {
    /// Record checkpoints in some store
    pub fn new(store: Arc<dyn CheckpointStore>) -> Self {
        Self(Some(store))
    }

    /// Work without a checkpoint store, everything will be processed
    pub fn disabled() -> Self {
        Self(None)
    }

    /// Truth that a shard was already processed
    pub async fn is_done(&self, shard: &ShardDescriptor) -> bool {
        let Some(store) = &self.0 else {
            return false;
        };
        let key = shard.checkpoint_key();
        match store.load(&key).await {
            Ok(record) => record.is_some_and(|r| r.status == ShardStatus::Done),
            Err(e) => {
                log::error!("Error checking checkpoint {key}: {e:#}");
                false
            }
        }
    }

    /// Record that a shard was processed
    ///
    /// Returns truth that the checkpoint was recorded.
    pub async fn mark_done(&self, shard: &ShardDescriptor) -> bool {
        let key = shard.checkpoint_key();
        let Some(store) = &self.0 else {
            log::warn!("No checkpoint store, {key} will be processed again next time");
            return false;
        };
        let record = CheckpointRecord {
            status: ShardStatus::Done,
            source_url: shard.url.clone(),
            updated_at: Utc::now(),
        };
        match store.save(&key, &record).await {
            Ok(()) => {
                log::info!("Updated checkpoint for {key}");
                true
            }
            Err(e) => {
                log::error!("Error updating checkpoint {key}: {e:#}");
                false
            }
        }
    }

    /// Record that a pipeline run went through
    pub async fn mark_job_complete(&self) -> bool {
        let Some(store) = &self.0 else {
            log::warn!("No checkpoint store, job status not recorded");
            return false;
        };
        let status = JobStatus {
            ran_at: Utc::now(),
            completed: true,
        };
        match store.save_job_status(&status).await {
            Ok(()) => {
                log::info!("Updated system job status");
                true
            }
            Err(e) => {
                log::error!("Error updating system job status: {e:#}");
                false
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::catalog::{Catalog, GramOrder};
    use std::{collections::HashMap, sync::Mutex};

    /// Checkpoint store that keeps records in memory
    #[derive(Debug, Default)]
    pub(crate) struct MemoryCheckpoints {
        records: Mutex<HashMap<String, CheckpointRecord>>,
        job: Mutex<Option<JobStatus>>,
        unreachable: bool,
    }
    //
    impl MemoryCheckpoints {
        /// Store whose every operation fails
        pub(crate) fn unreachable() -> Self {
            Self {
                unreachable: true,
                ..Self::default()
            }
        }

        /// Pretend that a shard was processed by an earlier run
        pub(crate) fn with_done(self, shard: &ShardDescriptor) -> Self {
            let record = CheckpointRecord {
                status: ShardStatus::Done,
                source_url: shard.url.clone(),
                updated_at: Utc::now(),
            };
            self.records
                .lock()
                .unwrap()
                .insert(shard.checkpoint_key(), record);
            self
        }

        pub(crate) fn keys(&self) -> Vec<String> {
            let mut keys = self.records.lock().unwrap().keys().cloned().collect::<Vec<_>>();
            keys.sort();
            keys
        }

        pub(crate) fn job(&self) -> Option<JobStatus> {
            self.job.lock().unwrap().clone()
        }
    }
    //
    #[async_trait]
    impl CheckpointStore for MemoryCheckpoints {
        async fn load(&self, key: &str) -> Result<Option<CheckpointRecord>> {
            anyhow::ensure!(!self.unreachable, "checkpoint store is unreachable");
            Ok(self.records.lock().unwrap().get(key).cloned())
        }

        async fn save(&self, key: &str, record: &CheckpointRecord) -> Result<()> {
            anyhow::ensure!(!self.unreachable, "checkpoint store is unreachable");
            self.records
                .lock()
                .unwrap()
                .insert(key.to_owned(), record.clone());
            Ok(())
        }

        async fn save_job_status(&self, status: &JobStatus) -> Result<()> {
            anyhow::ensure!(!self.unreachable, "checkpoint store is unreachable");
            *self.job.lock().unwrap() = Some(status.clone());
            Ok(())
        }
    }

    fn first_word_shard() -> ShardDescriptor {
        Catalog::default().shards_for(GramOrder::new(1).unwrap()).remove(0)
    }

    #[tokio::test]
    async fn fs_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FsCheckpoints::open(dir.path(), None).await.unwrap());
        let checkpoints = Checkpoints::new(store.clone());
        let shard = first_word_shard();

        assert!(!checkpoints.is_done(&shard).await);
        assert!(checkpoints.mark_done(&shard).await);
        assert!(checkpoints.is_done(&shard).await);
        assert!(checkpoints.mark_done(&shard).await);

        let record = store.load(&shard.checkpoint_key()).await.unwrap().unwrap();
        assert_eq!(record.status, ShardStatus::Done);
        assert_eq!(record.source_url, shard.url);

        let path = dir
            .path()
            .join("checkpoints/(default)/ngram_shards")
            .join(format!("{}.json", shard.checkpoint_key()));
        let json: serde_json::Value =
            serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap();
        assert_eq!(json["status"], "done");
        assert_eq!(json["sourceUrl"], &*shard.url);
        assert!(json["updatedAt"].is_string());

        assert!(checkpoints.mark_job_complete().await);
        let job_path = dir
            .path()
            .join("checkpoints/(default)/system_jobs/google_ngram_last_run.json");
        let job: JobStatus = serde_json::from_slice(&std::fs::read(job_path).unwrap()).unwrap();
        assert!(job.completed);
    }

    #[tokio::test]
    async fn alternate_database_is_separate() {
        let dir = tempfile::tempdir().unwrap();
        let shard = first_word_shard();
        let main = Checkpoints::new(Arc::new(FsCheckpoints::open(dir.path(), None).await.unwrap()));
        let other = Checkpoints::new(Arc::new(
            FsCheckpoints::open(dir.path(), Some("staging")).await.unwrap(),
        ));
        assert!(main.mark_done(&shard).await);
        assert!(!other.is_done(&shard).await);
    }

    #[tokio::test]
    async fn only_done_status_counts() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsCheckpoints::open(dir.path(), None).await.unwrap();
        let shard = first_word_shard();
        let path = store.path(SHARDS_COLLECTION, &shard.checkpoint_key());
        std::fs::write(
            &path,
            r#"{"status":"running","sourceUrl":"x","updatedAt":"2024-01-01T00:00:00Z"}"#,
        )
        .unwrap();
        let checkpoints = Checkpoints::new(Arc::new(store));
        assert!(!checkpoints.is_done(&shard).await);

        std::fs::write(&path, "not json").unwrap();
        assert!(!checkpoints.is_done(&shard).await);
    }

    #[tokio::test]
    async fn unreachable_store_means_not_done() {
        let shard = first_word_shard();
        let checkpoints = Checkpoints::new(Arc::new(MemoryCheckpoints::unreachable()));
        assert!(!checkpoints.is_done(&shard).await);
        assert!(!checkpoints.mark_done(&shard).await);
        assert!(!checkpoints.mark_job_complete().await);

        let disabled = Checkpoints::disabled();
        assert!(!disabled.is_done(&shard).await);
        assert!(!disabled.mark_done(&shard).await);
    }
}
