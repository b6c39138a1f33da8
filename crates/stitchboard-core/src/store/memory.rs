//! In-memory [`RecordStore`] implementation for testing and WASM targets.
//!
//! Uses a `HashMap` of per-collection `Vec`s behind `std::sync::RwLock`.
//! Records are kept in insertion order; queries filter, stable-sort, and
//! truncate in memory.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::feed::{InsertFeed, Subscription};
use crate::models::Collection;

use super::{compare_values, Filter, Query, Record, RecordStore};

/// In-memory store for testing and WASM environments.
pub struct InMemoryStore {
    collections: RwLock<HashMap<Collection, Vec<Record>>>,
    feed: InsertFeed,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
            feed: InsertFeed::default(),
        }
    }

    /// Total number of records across all collections.
    pub fn len(&self) -> usize {
        self.collections
            .read()
            .map(|c| c.values().map(Vec::len).sum())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned<T>(_: T) -> anyhow::Error {
    anyhow!("in-memory store lock poisoned")
}

#[async_trait]
impl RecordStore for InMemoryStore {
    async fn insert(&self, collection: Collection, body: Map<String, Value>) -> Result<Record> {
        let record = Record {
            id: uuid::Uuid::new_v4().to_string(),
            collection,
            body,
        };
        {
            let mut collections = self.collections.write().map_err(poisoned)?;
            collections.entry(collection).or_default().push(record.clone());
        }
        self.feed.publish(&record);
        Ok(record)
    }

    async fn count(&self, collection: Collection, filter: &Filter) -> Result<u64> {
        filter.validate()?;
        let collections = self.collections.read().map_err(poisoned)?;
        let count = collections
            .get(&collection)
            .map(|records| records.iter().filter(|r| filter.matches(r)).count())
            .unwrap_or(0);
        Ok(count as u64)
    }

    async fn query(&self, collection: Collection, query: &Query) -> Result<Vec<Record>> {
        query.validate()?;
        let collections = self.collections.read().map_err(poisoned)?;
        let mut records: Vec<Record> = collections
            .get(&collection)
            .map(|records| {
                records
                    .iter()
                    .filter(|r| query.filter.matches(r))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        if let Some(order) = &query.order_by {
            records.sort_by(|a, b| {
                let ord = match (a.field(&order.field), b.field(&order.field)) {
                    (Some(x), Some(y)) => compare_values(x, y).unwrap_or(std::cmp::Ordering::Equal),
                    _ => std::cmp::Ordering::Equal,
                };
                if order.descending {
                    ord.reverse()
                } else {
                    ord
                }
            });
        }

        if let Some(limit) = query.limit {
            records.truncate(limit);
        }
        Ok(records)
    }

    fn subscribe(&self, collection: Collection) -> Subscription {
        self.feed.subscribe(collection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::OrderBy;
    use serde_json::json;

    fn body(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_insert_assigns_ids_and_counts() {
        let store = InMemoryStore::new();
        let a = store
            .insert(Collection::Visits, body(json!({"device_type": "mobile"})))
            .await
            .unwrap();
        let b = store
            .insert(Collection::Visits, body(json!({"device_type": "desktop"})))
            .await
            .unwrap();
        assert_ne!(a.id, b.id);

        assert_eq!(store.count(Collection::Visits, &Filter::new()).await.unwrap(), 2);
        assert_eq!(
            store
                .count(Collection::Visits, &Filter::new().eq("device_type", "mobile"))
                .await
                .unwrap(),
            1
        );
        assert_eq!(store.count(Collection::Orders, &Filter::new()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_query_orders_and_limits() {
        let store = InMemoryStore::new();
        for (name, ts) in [("a", "2024-01-02"), ("b", "2024-01-03"), ("c", "2024-01-01"), ("d", "2024-01-03")] {
            store
                .insert(Collection::PageViews, body(json!({"page_name": name, "timestamp": ts})))
                .await
                .unwrap();
        }

        let q = Query::new().order_by(OrderBy::desc("timestamp")).limit(3);
        let names: Vec<String> = store
            .query(Collection::PageViews, &q)
            .await
            .unwrap()
            .iter()
            .map(|r| r.field("page_name").unwrap().as_str().unwrap().to_string())
            .collect();
        // Ties ("b", "d") keep insertion order.
        assert_eq!(names, vec!["b", "d", "a"]);
    }

    #[tokio::test]
    async fn test_insert_notifies_subscribers() {
        let store = InMemoryStore::new();
        let mut sub = store.subscribe(Collection::Orders);
        store
            .insert(Collection::Orders, body(json!({"customer_name": "Ana"})))
            .await
            .unwrap();
        let got = sub.recv().await.unwrap();
        assert_eq!(got.field("customer_name"), Some(&json!("Ana")));
    }

    #[tokio::test]
    async fn test_invalid_field_rejected() {
        let store = InMemoryStore::new();
        let err = store
            .count(Collection::Visits, &Filter::new().eq("a.b", 1))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("invalid field name"));
    }
}
