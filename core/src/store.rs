//! Pluggable record store.
//!
//! The core treats persistence as an interface over opaque JSON records;
//! nothing downstream depends on the encoding. Price history and the
//! scored index are keyed by fingerprint, job stats by job name. The
//! in-memory implementation backs tests and single-process deployments;
//! a database-backed store plugs in behind the same trait.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
#[error("store error: {0}")]
pub struct StoreError(pub String);

/// Key layout shared by every store implementation.
pub mod keys {
    pub fn scored_offer(fingerprint: &str) -> String {
        format!("offers/{fingerprint}")
    }

    pub fn price_history(fingerprint: &str) -> String {
        format!("history/{fingerprint}")
    }

    pub fn job_stats(job_name: &str) -> String {
        format!("jobs/{job_name}")
    }
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn put(&self, key: &str, record: &Value) -> Result<(), StoreError>;

    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError>;

    /// All records whose key starts with the prefix, key-ordered.
    async fn scan(&self, prefix: &str) -> Result<Vec<(String, Value)>, StoreError>;

    async fn delete(&self, key: &str) -> Result<(), StoreError>;
}

/// In-memory store over an ordered map (ordered scans for free).
#[derive(Default)]
pub struct MemoryStore {
    records: RwLock<BTreeMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn put(&self, key: &str, record: &Value) -> Result<(), StoreError> {
        self.records
            .write()
            .insert(key.to_string(), record.clone());
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.records.read().get(key).cloned())
    }

    async fn scan(&self, prefix: &str) -> Result<Vec<(String, Value)>, StoreError> {
        Ok(self
            .records
            .read()
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.records.write().remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_put_get_delete() {
        let store = MemoryStore::new();
        store
            .put("offers/fp-1", &json!({"score": 80}))
            .await
            .unwrap();
        assert_eq!(
            store.get("offers/fp-1").await.unwrap(),
            Some(json!({"score": 80}))
        );

        store.delete("offers/fp-1").await.unwrap();
        assert_eq!(store.get("offers/fp-1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_scan_prefix_ordering() {
        let store = MemoryStore::new();
        store.put("offers/b", &json!(2)).await.unwrap();
        store.put("offers/a", &json!(1)).await.unwrap();
        store.put("history/a", &json!(3)).await.unwrap();

        let offers = store.scan("offers/").await.unwrap();
        assert_eq!(offers.len(), 2);
        assert_eq!(offers[0].0, "offers/a");
        assert_eq!(offers[1].0, "offers/b");

        assert_eq!(store.scan("jobs/").await.unwrap().len(), 0);
    }

    #[test]
    fn test_key_layout() {
        assert_eq!(keys::scored_offer("fp"), "offers/fp");
        assert_eq!(keys::price_history("fp"), "history/fp");
        assert_eq!(keys::job_stats("rss_fetch"), "jobs/rss_fetch");
    }
}
