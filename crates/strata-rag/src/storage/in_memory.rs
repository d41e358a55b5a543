//! In-memory storage backend

use super::{BatchOp, EntryStream, Memory, MemoryQuery};
use crate::error::{StrataError, StrataResult};
use futures::StreamExt;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

/// Ordered in-memory store backed by a `BTreeMap`
#[derive(Debug, Default)]
pub struct InMemoryStorage {
    data: RwLock<BTreeMap<String, Value>>,
    closed: AtomicBool,
}

impl InMemoryStorage {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    fn ensure_open(&self) -> StrataResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StrataError::unavailable(self.backend_name(), "closed"));
        }
        Ok(())
    }

    fn prefixed<'a>(
        map: &'a BTreeMap<String, Value>,
        prefix: Option<&'a str>,
    ) -> Box<dyn Iterator<Item = (&'a String, &'a Value)> + 'a> {
        match prefix {
            Some(prefix) => Box::new(
                map.range(prefix.to_string()..)
                    .take_while(move |(key, _)| key.starts_with(prefix)),
            ),
            None => Box::new(map.iter()),
        }
    }
}

#[async_trait::async_trait]
impl Memory for InMemoryStorage {
    fn backend_name(&self) -> &str {
        "in-memory"
    }

    async fn get(&self, key: &str) -> StrataResult<Option<Value>> {
        self.ensure_open()?;
        Ok(self.data.read().get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> StrataResult<()> {
        self.ensure_open()?;
        self.data.write().insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> StrataResult<bool> {
        self.ensure_open()?;
        Ok(self.data.write().remove(key).is_some())
    }

    async fn batch(&self, ops: Vec<BatchOp>) -> StrataResult<()> {
        self.ensure_open()?;
        let mut data = self.data.write();
        for op in ops {
            match op {
                BatchOp::Put { key, value } => {
                    data.insert(key, value);
                }
                BatchOp::Delete { key } => {
                    data.remove(&key);
                }
            }
        }
        Ok(())
    }

    async fn entries(&self, query: &MemoryQuery) -> StrataResult<EntryStream> {
        self.ensure_open()?;
        let data = self.data.read();
        let limit = query.limit.unwrap_or(usize::MAX);
        let snapshot: Vec<StrataResult<(String, Value)>> =
            Self::prefixed(&data, query.prefix.as_deref())
                .take(limit)
                .map(|(k, v)| Ok((k.clone(), v.clone())))
                .collect();

        Ok(futures::stream::iter(snapshot).boxed())
    }

    async fn clear(&self, prefix: Option<&str>) -> StrataResult<()> {
        self.ensure_open()?;
        let mut data = self.data.write();
        match prefix {
            Some(prefix) => data.retain(|key, _| !key.starts_with(prefix)),
            None => data.clear(),
        }
        Ok(())
    }

    async fn count(&self, prefix: Option<&str>) -> StrataResult<usize> {
        self.ensure_open()?;
        let data = self.data.read();
        Ok(Self::prefixed(&data, prefix).count())
    }

    async fn close(&self) -> StrataResult<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_prefix_entries_are_ordered() {
        let storage = InMemoryStorage::new();
        storage.set("tier::b", json!(2)).await.unwrap();
        storage.set("tier::a", json!(1)).await.unwrap();
        storage.set("pref::x", json!(3)).await.unwrap();

        let keys = storage
            .keys(&MemoryQuery::new().with_prefix("tier::"))
            .await
            .unwrap();
        assert_eq!(keys, vec!["tier::a", "tier::b"]);
        assert_eq!(storage.count(None).await.unwrap(), 3);
    }

    #[test]
    fn test_delete_is_idempotent() {
        let storage = InMemoryStorage::new();
        tokio_test::block_on(async {
            storage.set("k", json!("v")).await.unwrap();
            assert!(storage.delete("k").await.unwrap());
            assert!(!storage.delete("k").await.unwrap());
            assert!(!storage.exists("k").await.unwrap());
        });
    }

    #[tokio::test]
    async fn test_batch_applies_in_order() {
        let storage = InMemoryStorage::new();
        storage
            .batch(vec![
                BatchOp::put("a", json!(1)),
                BatchOp::delete("a"),
                BatchOp::put("b", json!(2)),
            ])
            .await
            .unwrap();
        assert!(storage.get("a").await.unwrap().is_none());
        assert_eq!(storage.get("b").await.unwrap(), Some(json!(2)));

        storage.clear(Some("b")).await.unwrap();
        assert_eq!(storage.count(None).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_closed_store_is_unavailable() {
        let storage = InMemoryStorage::new();
        storage.close().await.unwrap();
        let err = storage.get("k").await.unwrap_err();
        assert!(err.is_unavailable());
    }
}
