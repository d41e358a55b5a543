//! Durable storage backed by `sled`

use super::{BatchOp, EntryStream, Memory, MemoryQuery};
use crate::error::{StrataError, StrataResult};
use futures::StreamExt;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

#[derive(Clone)]
enum StoreState {
    Opening,
    Open(sled::Db),
    Failed(String),
    Closed,
}

/// Durable ordered store, one instance per dataset directory.
///
/// Construction returns immediately and opens the database on a blocking
/// thread. Operations wait for the open to finish; a failed open or a closed
/// store yields [`StrataError::StoreUnavailable`].
pub struct SledStorage {
    name: String,
    path: PathBuf,
    state: Arc<watch::Sender<StoreState>>,
}

impl SledStorage {
    /// Open `<dir>/<dataset>`. Must be called inside a Tokio runtime.
    pub fn open(dir: impl AsRef<Path>, dataset: impl Into<String>) -> Self {
        let name = dataset.into();
        let path = dir.as_ref().join(&name);
        let (tx, _rx) = watch::channel(StoreState::Opening);
        let state = Arc::new(tx);

        let opener = state.clone();
        let open_path = path.clone();
        let store_name = name.clone();
        tokio::spawn(async move {
            let opened = tokio::task::spawn_blocking(move || {
                if let Some(parent) = open_path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                sled::open(&open_path).map_err(std::io::Error::other)
            })
            .await;

            let next = match opened {
                Ok(Ok(db)) => {
                    info!(store = %store_name, "Store opened");
                    StoreState::Open(db)
                }
                Ok(Err(e)) => {
                    warn!(store = %store_name, error = %e, "Store failed to open, continuing without persistence");
                    StoreState::Failed(e.to_string())
                }
                Err(e) => StoreState::Failed(e.to_string()),
            };

            // A close() issued while opening wins over the late result.
            opener.send_if_modified(|state| {
                if matches!(state, StoreState::Opening) {
                    *state = next;
                    true
                } else {
                    false
                }
            });
        });

        Self { name, path, state }
    }

    /// Directory of this dataset
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Wait for the open to finish and report whether the store is usable
    pub async fn is_ready(&self) -> bool {
        self.db().await.is_ok()
    }

    async fn db(&self) -> StrataResult<sled::Db> {
        let mut rx = self.state.subscribe();
        let state = rx
            .wait_for(|state| !matches!(state, StoreState::Opening))
            .await
            .map_err(|_| StrataError::unavailable(&self.name, "opener dropped"))?;

        match &*state {
            StoreState::Open(db) => Ok(db.clone()),
            StoreState::Failed(reason) => Err(StrataError::unavailable(&self.name, reason.clone())),
            StoreState::Closed | StoreState::Opening => {
                Err(StrataError::unavailable(&self.name, "closed"))
            }
        }
    }

    fn encode(value: &Value) -> StrataResult<Vec<u8>> {
        Ok(serde_json::to_vec(value)?)
    }

    fn decode(key: &sled::IVec, value: &sled::IVec) -> StrataResult<(String, Value)> {
        let key = String::from_utf8_lossy(key).into_owned();
        let value = serde_json::from_slice(value)?;
        Ok((key, value))
    }
}

#[async_trait::async_trait]
impl Memory for SledStorage {
    fn backend_name(&self) -> &str {
        &self.name
    }

    async fn get(&self, key: &str) -> StrataResult<Option<Value>> {
        let db = self.db().await?;
        match db.get(key.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: Value) -> StrataResult<()> {
        let db = self.db().await?;
        db.insert(key.as_bytes(), Self::encode(&value)?)?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> StrataResult<bool> {
        let db = self.db().await?;
        Ok(db.remove(key.as_bytes())?.is_some())
    }

    async fn batch(&self, ops: Vec<BatchOp>) -> StrataResult<()> {
        if ops.is_empty() {
            return Ok(());
        }
        let db = self.db().await?;
        let count = ops.len();

        let mut batch = sled::Batch::default();
        for op in ops {
            match op {
                BatchOp::Put { key, value } => batch.insert(key.as_bytes(), Self::encode(&value)?),
                BatchOp::Delete { key } => batch.remove(key.as_bytes()),
            }
        }

        db.apply_batch(batch)?;
        db.flush_async().await?;
        debug!(store = %self.name, ops = count, "Applied batch");
        Ok(())
    }

    async fn entries(&self, query: &MemoryQuery) -> StrataResult<EntryStream> {
        let db = self.db().await?;
        let iter = match &query.prefix {
            Some(prefix) => db.scan_prefix(prefix.as_bytes()),
            None => db.iter(),
        };
        let limit = query.limit.unwrap_or(usize::MAX);

        let stream = futures::stream::iter(iter.take(limit).map(|item| {
            let (key, value) = item?;
            Self::decode(&key, &value)
        }));
        Ok(stream.boxed())
    }

    async fn keys(&self, query: &MemoryQuery) -> StrataResult<Vec<String>> {
        let db = self.db().await?;
        let iter = match &query.prefix {
            Some(prefix) => db.scan_prefix(prefix.as_bytes()),
            None => db.iter(),
        };
        iter.keys()
            .take(query.limit.unwrap_or(usize::MAX))
            .map(|key| Ok(String::from_utf8_lossy(&key?).into_owned()))
            .collect()
    }

    async fn clear(&self, prefix: Option<&str>) -> StrataResult<()> {
        let db = self.db().await?;
        match prefix {
            None => db.clear()?,
            Some(prefix) => {
                let mut batch = sled::Batch::default();
                for key in db.scan_prefix(prefix.as_bytes()).keys() {
                    batch.remove(key?);
                }
                db.apply_batch(batch)?;
            }
        }
        db.flush_async().await?;
        Ok(())
    }

    async fn count(&self, prefix: Option<&str>) -> StrataResult<usize> {
        let db = self.db().await?;
        Ok(match prefix {
            Some(prefix) => db.scan_prefix(prefix.as_bytes()).count(),
            None => db.len(),
        })
    }

    async fn flush(&self) -> StrataResult<()> {
        let db = self.db().await?;
        db.flush_async().await?;
        Ok(())
    }

    async fn close(&self) -> StrataResult<()> {
        if let Ok(db) = self.db().await {
            db.flush_async().await?;
        }
        self.state.send_replace(StoreState::Closed);
        info!(store = %self.name, "Store closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;
    use serde_json::json;

    #[tokio::test]
    async fn test_open_set_get() {
        let dir = tempfile::tempdir().unwrap();
        let store = SledStorage::open(dir.path(), "tiered-context");

        store.set("tier::a.rs", json!({"l0": "a"})).await.unwrap();
        let value = store.get("tier::a.rs").await.unwrap().unwrap();
        assert_eq!(value["l0"], "a");
        assert!(store.get("tier::missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_batch_and_prefix_iteration() {
        let dir = tempfile::tempdir().unwrap();
        let store = SledStorage::open(dir.path(), "data");

        store
            .batch(vec![
                BatchOp::put("tier::c", json!(3)),
                BatchOp::put("tier::a", json!(1)),
                BatchOp::put("pref::z", json!(0)),
                BatchOp::put("tier::b", json!(2)),
                BatchOp::delete("tier::c"),
            ])
            .await
            .unwrap();

        let entries: Vec<(String, Value)> = store
            .entries(&MemoryQuery::new().with_prefix("tier::"))
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();

        assert_eq!(
            entries,
            vec![("tier::a".to_string(), json!(1)), ("tier::b".to_string(), json!(2))]
        );
        assert_eq!(store.count(Some("pref::")).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_reopen_keeps_data() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = SledStorage::open(dir.path(), "data");
            store.set("k", json!("v")).await.unwrap();
            store.close().await.unwrap();
        }
        let store = SledStorage::open(dir.path(), "data");
        assert_eq!(store.get("k").await.unwrap(), Some(json!("v")));
    }

    #[tokio::test]
    async fn test_operations_after_close_are_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let store = SledStorage::open(dir.path(), "data");
        store.close().await.unwrap();

        assert!(store.get("k").await.unwrap_err().is_unavailable());
        assert!(store.set("k", json!(1)).await.unwrap_err().is_unavailable());
    }

    #[tokio::test]
    async fn test_failed_open_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        // A regular file where the dataset directory should be
        std::fs::write(dir.path().join("blocked"), b"not a db").unwrap();
        let store = SledStorage::open(dir.path(), "blocked");

        assert!(!store.is_ready().await);
        assert!(store.count(None).await.unwrap_err().is_unavailable());
    }

    #[tokio::test]
    async fn test_clear_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let store = SledStorage::open(dir.path(), "data");
        store.set("exp::a", json!(1)).await.unwrap();
        store.set("pref::a", json!(1)).await.unwrap();

        store.clear(Some("exp::")).await.unwrap();
        assert_eq!(store.keys(&MemoryQuery::new()).await.unwrap(), vec!["pref::a"]);
    }
}
