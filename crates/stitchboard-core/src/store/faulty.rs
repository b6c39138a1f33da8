//! Test wrapper that fails every operation on selected collections.

use std::collections::HashSet;

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::feed::Subscription;
use crate::models::Collection;

use super::memory::InMemoryStore;
use super::{Filter, Query, Record, RecordStore};

pub(crate) struct FaultyStore {
    pub(crate) inner: InMemoryStore,
    failing: HashSet<Collection>,
}

impl FaultyStore {
    pub(crate) fn new(failing: &[Collection]) -> Self {
        Self {
            inner: InMemoryStore::new(),
            failing: failing.iter().copied().collect(),
        }
    }

    fn check(&self, collection: Collection) -> Result<()> {
        if self.failing.contains(&collection) {
            bail!("store unavailable for {}", collection);
        }
        Ok(())
    }
}

#[async_trait]
impl RecordStore for FaultyStore {
    async fn insert(&self, collection: Collection, body: Map<String, Value>) -> Result<Record> {
        self.check(collection)?;
        self.inner.insert(collection, body).await
    }

    async fn count(&self, collection: Collection, filter: &Filter) -> Result<u64> {
        self.check(collection)?;
        self.inner.count(collection, filter).await
    }

    async fn query(&self, collection: Collection, query: &Query) -> Result<Vec<Record>> {
        self.check(collection)?;
        self.inner.query(collection, query).await
    }

    fn subscribe(&self, collection: Collection) -> Subscription {
        self.inner.subscribe(collection)
    }
}
