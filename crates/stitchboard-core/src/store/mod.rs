//! Record store abstraction for Stitchboard.
//!
//! The [`RecordStore`] trait is the only way the tracker and the dashboard
//! aggregation talk to persistence. It models a generic document store
//! with insert, count, ordered query, and insert notifications, so hosted
//! backends, SQLite, and the in-memory store are interchangeable.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;
#[cfg(test)]
pub(crate) mod faulty;

use std::cmp::Ordering;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::feed::Subscription;
use crate::models::{Collection, Entity};

/// A stored record: a generated ID plus a JSON object body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    pub collection: Collection,
    #[serde(flatten)]
    pub body: Map<String, Value>,
}

impl Record {
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.body.get(name)
    }

    /// Decode the body into a typed model.
    pub fn decode<E: Entity>(&self) -> Result<E> {
        serde_json::from_value(Value::Object(self.body.clone()))
            .with_context(|| format!("Failed to decode {} record {}", self.collection, self.id))
    }
}

/// Serialize a typed model into a record body.
pub fn encode<E: Entity>(entity: &E) -> Result<Map<String, Value>> {
    match serde_json::to_value(entity)? {
        Value::Object(map) => Ok(map),
        other => bail!(
            "{} entities must serialize to a JSON object, got {}",
            E::COLLECTION,
            other
        ),
    }
}

/// A single predicate on a top-level body field.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Eq { field: String, value: Value },
    Gte { field: String, value: Value },
}

impl Condition {
    pub fn field(&self) -> &str {
        match self {
            Condition::Eq { field, .. } | Condition::Gte { field, .. } => field,
        }
    }

    pub fn matches(&self, record: &Record) -> bool {
        match self {
            Condition::Eq { field, value } => record.field(field) == Some(value),
            Condition::Gte { field, value } => record
                .field(field)
                .and_then(|v| compare_values(v, value))
                .is_some_and(|ord| ord != Ordering::Less),
        }
    }
}

/// Conjunction of [`Condition`]s. An empty filter matches everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    pub conditions: Vec<Condition>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.conditions.push(Condition::Eq {
            field: field.into(),
            value: value.into(),
        });
        self
    }

    pub fn gte(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.conditions.push(Condition::Gte {
            field: field.into(),
            value: value.into(),
        });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    pub fn matches(&self, record: &Record) -> bool {
        self.conditions.iter().all(|c| c.matches(record))
    }

    /// Check that every referenced field name is a plain identifier.
    pub fn validate(&self) -> Result<()> {
        for c in &self.conditions {
            validate_field_name(c.field())?;
        }
        Ok(())
    }
}

/// Sort key for [`Query`]. Ties keep insertion order.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    pub field: String,
    pub descending: bool,
}

impl OrderBy {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            descending: false,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            descending: true,
        }
    }
}

/// Filtered, ordered, optionally limited read of one collection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    pub filter: Filter,
    pub order_by: Option<OrderBy>,
    pub limit: Option<usize>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }

    pub fn order_by(mut self, order_by: OrderBy) -> Self {
        self.order_by = Some(order_by);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn validate(&self) -> Result<()> {
        self.filter.validate()?;
        if let Some(order) = &self.order_by {
            validate_field_name(&order.field)?;
        }
        Ok(())
    }
}

/// Abstract storage backend for tracked events and orders.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`insert`](RecordStore::insert) | Append a record, returning it with its new ID |
/// | [`count`](RecordStore::count) | Count records matching a filter |
/// | [`query`](RecordStore::query) | Filtered, ordered, limited read |
/// | [`subscribe`](RecordStore::subscribe) | Receive future inserts into a collection |
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn insert(&self, collection: Collection, body: Map<String, Value>) -> Result<Record>;

    async fn count(&self, collection: Collection, filter: &Filter) -> Result<u64>;

    async fn query(&self, collection: Collection, query: &Query) -> Result<Vec<Record>>;

    fn subscribe(&self, collection: Collection) -> Subscription;
}

/// Insert a typed model into its collection.
pub async fn insert_entity<S, E>(store: &S, entity: &E) -> Result<Record>
where
    S: RecordStore + ?Sized,
    E: Entity,
{
    let body = encode(entity)?;
    store.insert(E::COLLECTION, body).await
}

/// Query a collection and decode every record into a typed model.
pub async fn query_entities<S, E>(store: &S, query: &Query) -> Result<Vec<E>>
where
    S: RecordStore + ?Sized,
    E: Entity,
{
    store
        .query(E::COLLECTION, query)
        .await?
        .iter()
        .map(|r| r.decode::<E>())
        .collect()
}

/// Field names are restricted to `[A-Za-z0-9_]+` so backends can embed
/// them in JSON paths.
pub fn validate_field_name(name: &str) -> Result<()> {
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        bail!("invalid field name: '{}'", name);
    }
    Ok(())
}

/// Order two JSON scalars of the same kind. Mixed kinds are incomparable.
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(body: Value) -> Record {
        Record {
            id: "r1".to_string(),
            collection: Collection::Visits,
            body: body.as_object().cloned().unwrap(),
        }
    }

    #[test]
    fn test_filter_eq_and_gte() {
        let r = record(json!({"device_type": "mobile", "timestamp": "2024-05-01T10:00:00.000Z"}));
        assert!(Filter::new().matches(&r));
        assert!(Filter::new().eq("device_type", "mobile").matches(&r));
        assert!(!Filter::new().eq("device_type", "tablet").matches(&r));
        assert!(Filter::new()
            .gte("timestamp", "2024-05-01T00:00:00.000Z")
            .matches(&r));
        assert!(Filter::new()
            .gte("timestamp", "2024-05-01T10:00:00.000Z")
            .matches(&r));
        assert!(!Filter::new()
            .gte("timestamp", "2024-05-02T00:00:00.000Z")
            .matches(&r));
    }

    #[test]
    fn test_missing_or_mismatched_fields_do_not_match() {
        let r = record(json!({"screen_width": 1280}));
        assert!(!Filter::new().eq("browser", "chrome").matches(&r));
        assert!(!Filter::new().gte("screen_width", "1000").matches(&r));
        assert!(Filter::new().gte("screen_width", 1000).matches(&r));
    }

    #[test]
    fn test_field_name_validation() {
        assert!(validate_field_name("page_name").is_ok());
        assert!(validate_field_name("").is_err());
        assert!(validate_field_name("a.b").is_err());
        assert!(validate_field_name("x'); DROP TABLE records; --").is_err());
        let q = Query::new().order_by(OrderBy::desc("time stamp"));
        assert!(q.validate().is_err());
    }
}
