//! Model size database
//!
//! Maps a model id to the last size estimate written for it. The whole map is
//! loaded on open and written back wholesale, only when something changed.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;

use crate::oracle::SizeOracle;
use crate::storage::{read_json, write_json_atomic, StorageError};
use crate::types::size::{SizeOutcome, SizeResult};

/// Whether a mutation changed the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Modified {
    Yes,
    No,
}

/// Tuning for [`SizeStore::update`]
#[derive(Debug, Clone)]
pub struct UpdateOptions {
    /// Maximum number of estimations in flight, also the persist interval
    pub batch_size: usize,
    /// Upper bound for a single estimation
    pub oracle_timeout: Option<Duration>,
}

impl Default for UpdateOptions {
    fn default() -> Self {
        Self {
            batch_size: 32,
            oracle_timeout: None,
        }
    }
}

/// Counters reported by [`SizeStore::update`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateSummary {
    /// Ids skipped because they were already in the store
    pub cached: usize,
    /// Results written to the store
    pub estimated: usize,
    /// Written results that are not a successful estimate
    pub failed: usize,
    /// Estimation tasks that panicked; their ids are retried on the next run
    pub lost: usize,
}

/// Persistent model id -> size estimate map
#[derive(Debug)]
pub struct SizeStore {
    path: Option<PathBuf>,
    entries: BTreeMap<String, SizeResult>,
    dirty: bool,
}

impl SizeStore {
    /// Open the store backed by `path`; a missing file yields an empty store
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        let entries: BTreeMap<String, SizeResult> = read_json(&path)?.unwrap_or_default();

        for (key, result) in &entries {
            if key != &result.model_id {
                return Err(StorageError::IdMismatch {
                    key: key.clone(),
                    actual: result.model_id.clone(),
                });
            }
        }

        if !entries.is_empty() {
            tracing::info!("{} records loaded from the model size DB", entries.len());
        }

        Ok(Self {
            path: Some(path),
            entries,
            dirty: false,
        })
    }

    /// A store without a backing file; [`persist`](Self::persist) discards changes
    pub fn in_memory() -> Self {
        Self {
            path: None,
            entries: BTreeMap::new(),
            dirty: false,
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, model_id: &str) -> bool {
        self.entries.contains_key(model_id)
    }

    pub fn get(&self, model_id: &str) -> Result<&SizeResult, StorageError> {
        self.entries
            .get(model_id)
            .ok_or_else(|| StorageError::KeyNotFound(model_id.to_string()))
    }

    pub fn lookup(&self, model_id: &str) -> Option<&SizeResult> {
        self.entries.get(model_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &SizeResult> {
        self.entries.values()
    }

    /// True when there are changes not yet persisted
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Store `result` under `model_id`, replacing any previous estimate
    pub fn set(&mut self, model_id: &str, result: SizeResult) -> Result<Modified, StorageError> {
        if result.model_id != model_id {
            return Err(StorageError::IdMismatch {
                key: model_id.to_string(),
                actual: result.model_id,
            });
        }

        match self.entries.get(model_id) {
            Some(existing) if *existing == result => Ok(Modified::No),
            Some(_) => {
                tracing::debug!("Update {}", model_id);
                self.entries.insert(model_id.to_string(), result);
                self.dirty = true;
                Ok(Modified::Yes)
            }
            None => {
                self.entries.insert(model_id.to_string(), result);
                self.dirty = true;
                Ok(Modified::Yes)
            }
        }
    }

    /// Write the store back if it changed; returns whether a file was written
    pub fn persist(&mut self) -> Result<bool, StorageError> {
        let written = match (&self.path, self.dirty) {
            (Some(path), true) => {
                tracing::info!("Updating size database with total {} records", self.entries.len());
                write_json_atomic(path, &self.entries)?;
                true
            }
            _ => false,
        };
        self.dirty = false;
        Ok(written)
    }

    /// Drop every failed estimate so the next update retries them
    pub fn remove_errors(&mut self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, result| result.is_ok());
        let removed = before - self.entries.len();
        if removed > 0 {
            tracing::info!("Removed {} failed size estimates", removed);
            self.dirty = true;
        }
        removed
    }

    /// Estimate every model in `model_ids[start..end]` that is not stored yet
    ///
    /// Up to `batch_size` estimations run concurrently and are recorded as
    /// they complete. Models that need real weights are retried one at a time
    /// with fallback allowed once their batch is done. The store is persisted
    /// after every batch.
    pub async fn update<O>(
        &mut self,
        model_ids: &[String],
        oracle: Arc<O>,
        start: usize,
        end: usize,
        options: &UpdateOptions,
    ) -> Result<UpdateSummary, StorageError>
    where
        O: SizeOracle + ?Sized + 'static,
    {
        let batch_size = options.batch_size.max(1);
        let end = end.min(model_ids.len());
        let mut summary = UpdateSummary::default();
        let mut idx = start;

        while idx < end {
            let mut tasks = JoinSet::new();
            while idx < end && tasks.len() < batch_size {
                let model_id = &model_ids[idx];
                idx += 1;
                if self.contains(model_id) {
                    summary.cached += 1;
                    continue;
                }

                let oracle = Arc::clone(&oracle);
                let model_id = model_id.clone();
                let timeout = options.oracle_timeout;
                tasks.spawn(async move {
                    estimate_with_timeout(oracle.as_ref(), &model_id, false, timeout).await
                });
            }

            tracing::info!(
                "Collecting results of {} tasks. Current model idx {}",
                tasks.len(),
                idx
            );

            let mut needs_weights = Vec::new();
            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok(result) => match result.outcome {
                        SizeOutcome::NeedsWeights { .. } => needs_weights.push(result.model_id),
                        _ => self.record(result, &mut summary)?,
                    },
                    Err(e) => {
                        tracing::warn!("Size estimation task failed: {}", e);
                        summary.lost += 1;
                    }
                }
            }

            // Loading weights is memory heavy, so these run sequentially
            for model_id in needs_weights {
                tracing::info!("Calculating the size of {} with real weights", model_id);
                let result =
                    estimate_with_timeout(oracle.as_ref(), &model_id, true, options.oracle_timeout)
                        .await;
                self.record(result, &mut summary)?;
            }

            self.persist()?;
        }

        Ok(summary)
    }

    fn record(
        &mut self,
        result: SizeResult,
        summary: &mut UpdateSummary,
    ) -> Result<(), StorageError> {
        if !result.is_ok() {
            summary.failed += 1;
        }
        summary.estimated += 1;
        let model_id = result.model_id.clone();
        self.set(&model_id, result)?;
        Ok(())
    }
}

/// Run one estimation, reporting a timeout as `NeedsWeights`
async fn estimate_with_timeout<O>(
    oracle: &O,
    model_id: &str,
    allow_fallback: bool,
    limit: Option<Duration>,
) -> SizeResult
where
    O: SizeOracle + ?Sized,
{
    let Some(limit) = limit else {
        return oracle.estimate(model_id, allow_fallback).await;
    };

    match tokio::time::timeout(limit, oracle.estimate(model_id, allow_fallback)).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!("Size estimation of {} timed out after {:?}", model_id, limit);
            SizeResult::needs_weights(
                model_id,
                Some(format!("estimation timed out after {:?}", limit)),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::testing::ScriptedOracle;
    use crate::types::size::SizeStatus;
    use tempfile::TempDir;

    fn ids(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_open_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = SizeStore::open(dir.path().join("size.json")).unwrap();
        assert!(store.is_empty());
        assert!(!store.is_dirty());
        assert!(matches!(store.get("a/b"), Err(StorageError::KeyNotFound(_))));
    }

    #[test]
    fn test_set_requires_matching_id() {
        let mut store = SizeStore::in_memory();
        let err = store.set("a/b", SizeResult::ok("a/c", 1.0)).unwrap_err();
        assert!(matches!(err, StorageError::IdMismatch { .. }));
        assert!(store.is_empty());
    }

    #[test]
    fn test_set_same_value_is_not_a_modification() {
        let mut store = SizeStore::in_memory();
        assert_eq!(store.set("a/b", SizeResult::ok("a/b", 1.0)).unwrap(), Modified::Yes);
        store.persist().unwrap();
        assert!(!store.is_dirty());

        assert_eq!(store.set("a/b", SizeResult::ok("a/b", 1.0)).unwrap(), Modified::No);
        assert!(!store.is_dirty());

        assert_eq!(store.set("a/b", SizeResult::ok("a/b", 2.0)).unwrap(), Modified::Yes);
        assert!(store.is_dirty());
        assert_eq!(store.get("a/b").unwrap().size(), Some(2.0));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_persist_only_when_dirty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("size.json");
        let mut store = SizeStore::open(&path).unwrap();

        assert!(!store.persist().unwrap());
        assert!(!path.exists());

        store.set("a/b", SizeResult::ok("a/b", 1.0)).unwrap();
        assert!(store.persist().unwrap());
        assert!(path.exists());
        assert!(!store.is_dirty());
        assert!(!store.persist().unwrap());
    }

    #[test]
    fn test_in_memory_persist_clears_dirty() {
        let mut store = SizeStore::in_memory();
        store.set("a/b", SizeResult::ok("a/b", 1.0)).unwrap();
        assert!(store.is_dirty());
        assert!(!store.persist().unwrap());
        assert!(!store.is_dirty());
        assert!(store.path().is_none());
    }

    #[test]
    fn test_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("size.json");
        let records = vec![
            SizeResult::ok("meta-llama/Llama-2-7b-hf", 6.738415616),
            SizeResult::unsupported("org/no-config", "does not appear to have a file named config.json"),
            SizeResult::needs_weights("org/custom", Some("timed out".to_string())),
            SizeResult::needs_weights("org/custom-2", None),
        ];

        let mut store = SizeStore::open(&path).unwrap();
        for record in &records {
            store.set(&record.model_id, record.clone()).unwrap();
        }
        store.persist().unwrap();

        let reloaded = SizeStore::open(&path).unwrap();
        assert_eq!(reloaded.len(), records.len());
        for record in &records {
            assert_eq!(reloaded.get(&record.model_id).unwrap(), record);
        }
    }

    #[test]
    fn test_open_rejects_mismatched_key() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("size.json");
        std::fs::write(
            &path,
            r#"{"a/b": {"model_id": "a/c", "size": 1.0, "status": "OK", "note": null}}"#,
        )
        .unwrap();
        assert!(matches!(
            SizeStore::open(&path),
            Err(StorageError::IdMismatch { .. })
        ));
    }

    #[test]
    fn test_remove_errors() {
        let mut store = SizeStore::in_memory();
        store.set("a", SizeResult::ok("a", 1.0)).unwrap();
        store.set("b", SizeResult::unsupported("b", "nope")).unwrap();
        store.set("c", SizeResult::needs_weights("c", None)).unwrap();
        store.persist().unwrap();

        assert_eq!(store.remove_errors(), 2);
        assert!(store.is_dirty());
        assert!(store.contains("a"));
        assert!(!store.contains("b"));
        assert!(!store.contains("c"));

        store.persist().unwrap();
        assert_eq!(store.remove_errors(), 0);
        assert!(!store.is_dirty());
    }

    #[tokio::test]
    async fn test_update_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("size.json");
        let oracle = Arc::new(
            ScriptedOracle::new()
                .with_size("a/1b", 1.0)
                .with_size("a/7b", 7.0),
        );
        let models = ids(&["a/1b", "a/7b", "a/unknown"]);
        let options = UpdateOptions::default();

        let mut store = SizeStore::open(&path).unwrap();
        let summary = store
            .update(&models, oracle.clone(), 0, usize::MAX, &options)
            .await
            .unwrap();
        assert_eq!(summary.estimated, 3);
        assert_eq!(summary.failed, 1);
        assert_eq!(oracle.calls(), 3);
        assert!(!store.is_dirty());
        assert_eq!(store.get("a/unknown").unwrap().status(), SizeStatus::Unsupported);

        let summary = store
            .update(&models, oracle.clone(), 0, usize::MAX, &options)
            .await
            .unwrap();
        assert_eq!(summary.cached, 3);
        assert_eq!(summary.estimated, 0);
        assert_eq!(oracle.calls(), 3);
        assert!(!store.is_dirty());
        assert!(!store.persist().unwrap());

        let reloaded = SizeStore::open(&path).unwrap();
        assert_eq!(reloaded.len(), 3);
    }

    #[tokio::test]
    async fn test_update_respects_index_range() {
        let oracle = Arc::new(ScriptedOracle::new());
        let models = ids(&["m0", "m1", "m2", "m3", "m4"]);
        let mut store = SizeStore::in_memory();

        store
            .update(&models, oracle.clone(), 1, 3, &UpdateOptions::default())
            .await
            .unwrap();

        assert_eq!(oracle.calls(), 2);
        assert!(!store.contains("m0"));
        assert!(store.contains("m1"));
        assert!(store.contains("m2"));
        assert!(!store.contains("m3"));
    }

    #[tokio::test]
    async fn test_update_in_small_batches() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("size.json");
        let oracle = Arc::new(ScriptedOracle::new().with_size("m2", 2.0));
        let models = ids(&["m0", "m1", "m2", "m3", "m4"]);
        let options = UpdateOptions {
            batch_size: 2,
            oracle_timeout: None,
        };

        let mut store = SizeStore::open(&path).unwrap();
        store.set("m1", SizeResult::ok("m1", 1.0)).unwrap();
        let summary = store
            .update(&models, oracle.clone(), 0, usize::MAX, &options)
            .await
            .unwrap();

        assert_eq!(summary.cached, 1);
        assert_eq!(summary.estimated, 4);
        assert_eq!(oracle.calls(), 4);
        assert_eq!(SizeStore::open(&path).unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_update_retries_needs_weights_with_fallback() {
        let oracle = Arc::new(
            ScriptedOracle::new()
                .with_size("a/plain", 0.3)
                .with_weights_only("a/custom", 1.5),
        );
        let models = ids(&["a/plain", "a/custom"]);
        let mut store = SizeStore::in_memory();

        let summary = store
            .update(&models, oracle.clone(), 0, usize::MAX, &UpdateOptions::default())
            .await
            .unwrap();

        assert_eq!(summary.estimated, 2);
        assert_eq!(summary.failed, 0);
        assert_eq!(oracle.calls(), 3);
        assert_eq!(oracle.fallback_calls(), 1);
        assert_eq!(store.get("a/custom").unwrap().size(), Some(1.5));
    }

    #[tokio::test]
    async fn test_update_timeout_is_recorded_as_needs_weights() {
        let oracle = Arc::new(
            ScriptedOracle::new()
                .with_size("a/fast", 1.0)
                .with_size("a/slow", 2.0)
                .with_delay("a/slow", Duration::from_secs(5)),
        );
        let models = ids(&["a/fast", "a/slow"]);
        let options = UpdateOptions {
            batch_size: 32,
            oracle_timeout: Some(Duration::from_millis(50)),
        };
        let mut store = SizeStore::in_memory();

        let summary = store
            .update(&models, oracle.clone(), 0, usize::MAX, &options)
            .await
            .unwrap();

        assert_eq!(summary.failed, 1);
        assert_eq!(store.get("a/fast").unwrap().size(), Some(1.0));
        let slow = store.get("a/slow").unwrap();
        assert_eq!(slow.status(), SizeStatus::NeedsWeights);
        assert!(slow.note().unwrap().contains("timed out"));
        // first pass plus the sequential fallback retry
        assert_eq!(oracle.fallback_calls(), 1);
    }

    #[tokio::test]
    async fn test_update_bounds_concurrent_estimations() {
        let names = ["m0", "m1", "m2", "m3", "m4", "m5", "m6"];
        let oracle = Arc::new(names.iter().fold(ScriptedOracle::new(), |oracle, name| {
            oracle
                .with_size(name, 1.0)
                .with_delay(name, Duration::from_millis(20))
        }));
        let options = UpdateOptions {
            batch_size: 3,
            oracle_timeout: None,
        };
        let mut store = SizeStore::in_memory();

        let summary = store
            .update(&ids(&names), oracle.clone(), 0, usize::MAX, &options)
            .await
            .unwrap();

        assert_eq!(summary.estimated, 7);
        assert_eq!(oracle.calls(), 7);
        assert_eq!(oracle.peak_in_flight(), 3);
    }

    #[tokio::test]
    async fn test_fallback_runs_after_its_batch() {
        let oracle = Arc::new(
            ScriptedOracle::new()
                .with_weights_only("a/custom", 1.5)
                .with_size("a/plain", 0.3)
                .with_size("a/other", 0.5),
        );
        let models = ids(&["a/custom", "a/plain", "a/other"]);
        let mut store = SizeStore::in_memory();

        store
            .update(&models, oracle.clone(), 0, usize::MAX, &UpdateOptions::default())
            .await
            .unwrap();

        let seen = oracle.seen();
        assert_eq!(seen.len(), 4);
        assert_eq!(seen.iter().filter(|id| *id == "a/custom").count(), 2);
        assert_eq!(seen.last().map(String::as_str), Some("a/custom"));
        assert_eq!(store.get("a/custom").unwrap().size(), Some(1.5));
    }

    #[tokio::test]
    async fn test_panicked_estimation_is_retried_next_run() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("size.json");
        let oracle = Arc::new(
            ScriptedOracle::new()
                .with_size("a/fine", 1.0)
                .with_size("a/boom", 2.0)
                .with_panic_once("a/boom"),
        );
        let models = ids(&["a/fine", "a/boom"]);
        let mut store = SizeStore::open(&path).unwrap();

        let summary = store
            .update(&models, oracle.clone(), 0, usize::MAX, &UpdateOptions::default())
            .await
            .unwrap();
        assert_eq!(summary.lost, 1);
        assert_eq!(summary.estimated, 1);
        assert!(!store.contains("a/boom"));
        assert!(!SizeStore::open(&path).unwrap().contains("a/boom"));

        let summary = store
            .update(&models, oracle.clone(), 0, usize::MAX, &UpdateOptions::default())
            .await
            .unwrap();
        assert_eq!(summary.cached, 1);
        assert_eq!(summary.lost, 0);
        assert_eq!(store.get("a/boom").unwrap().size(), Some(2.0));
    }
}
