//! SQLite-backed [`RecordStore`].
//!
//! Every collection lives in the single `records` table as a JSON body.
//! Filters and sort keys are evaluated with `json_extract`. Field names are
//! validated as plain identifiers before any SQL is built, so the JSON path
//! is written as a literal and matches the expression indexes on
//! `timestamp` and `created_at`. Values are always bound, never spliced.
//!
//! Inserts are published on an in-process [`InsertFeed`], so subscribers
//! see writes made through this store instance.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Map, Value};
use sqlx::sqlite::{Sqlite, SqliteArguments, SqlitePool};
use sqlx::Row;

use stitchboard_core::feed::{InsertFeed, Subscription};
use stitchboard_core::models::{format_timestamp, Collection};
use stitchboard_core::store::{Condition, Filter, Query, Record, RecordStore};

/// SQLite implementation of the [`RecordStore`] trait.
///
/// Wraps a [`SqlitePool`] and an [`InsertFeed`] shared by every
/// subscription handed out by this instance.
pub struct SqliteStore {
    pool: SqlitePool,
    feed: InsertFeed,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            feed: InsertFeed::default(),
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[derive(Debug, Clone)]
enum SqlArg {
    Text(String),
    Int(i64),
    Real(f64),
}

type SqliteQuery<'q> = sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>;

fn bind_all<'q>(mut q: SqliteQuery<'q>, args: &[SqlArg]) -> SqliteQuery<'q> {
    for arg in args {
        q = match arg {
            SqlArg::Text(s) => q.bind(s.clone()),
            SqlArg::Int(i) => q.bind(*i),
            SqlArg::Real(f) => q.bind(*f),
        };
    }
    q
}

/// `json_extract` expression for an already validated field name.
fn extract(field: &str) -> String {
    format!("json_extract(body_json, '$.{}')", field)
}

fn kind(field: &str) -> String {
    format!("json_type(body_json, '$.{}')", field)
}

/// SQL fragment and arguments for one scalar comparison.
///
/// The `json_type` guard keeps comparisons within one JSON kind, so a
/// string never matches a number the way SQLite's mixed-type ordering
/// would allow.
fn push_scalar(
    sql: &mut String,
    args: &mut Vec<SqlArg>,
    field: &str,
    op: &str,
    value: &Value,
) -> Result<()> {
    let (types, arg) = match value {
        Value::String(s) => ("'text'", SqlArg::Text(s.clone())),
        Value::Bool(b) => ("'true', 'false'", SqlArg::Int(i64::from(*b))),
        Value::Number(n) => match n.as_i64() {
            Some(i) => ("'integer', 'real'", SqlArg::Int(i)),
            None => match n.as_f64() {
                Some(f) => ("'integer', 'real'", SqlArg::Real(f)),
                None => bail!("unsupported number in filter on '{}'", field),
            },
        },
        Value::Null => {
            if op != "=" {
                bail!("null can only be compared for equality (field '{}')", field);
            }
            sql.push_str(&format!(" AND {} = 'null'", kind(field)));
            return Ok(());
        }
        Value::Array(_) | Value::Object(_) => {
            bail!("filters on '{}' must compare scalar values", field)
        }
    };

    sql.push_str(&format!(
        " AND {} IN ({}) AND {} {} ?",
        kind(field),
        types,
        extract(field),
        op
    ));
    args.push(arg);
    Ok(())
}

fn where_clause(collection: Collection, filter: &Filter) -> Result<(String, Vec<SqlArg>)> {
    filter.validate()?;
    let mut sql = String::from(" WHERE collection = ?");
    let mut args = vec![SqlArg::Text(collection.as_str().to_string())];
    for condition in &filter.conditions {
        match condition {
            Condition::Eq { field, value } => push_scalar(&mut sql, &mut args, field, "=", value)?,
            Condition::Gte { field, value } => push_scalar(&mut sql, &mut args, field, ">=", value)?,
        }
    }
    Ok((sql, args))
}

#[async_trait]
impl RecordStore for SqliteStore {
    async fn insert(&self, collection: Collection, body: Map<String, Value>) -> Result<Record> {
        let record = Record {
            id: uuid::Uuid::new_v4().to_string(),
            collection,
            body,
        };
        let body_json = serde_json::to_string(&record.body)?;

        sqlx::query(
            "INSERT INTO records (id, collection, body_json, inserted_at) VALUES (?, ?, ?, ?)",
        )
        .bind(&record.id)
        .bind(collection.as_str())
        .bind(&body_json)
        .bind(format_timestamp(&Utc::now()))
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to insert into {}", collection))?;

        self.feed.publish(&record);
        Ok(record)
    }

    async fn count(&self, collection: Collection, filter: &Filter) -> Result<u64> {
        let (where_sql, args) = where_clause(collection, filter)?;
        let sql = format!("SELECT COUNT(*) FROM records{}", where_sql);
        let row = bind_all(sqlx::query(&sql), &args)
            .fetch_one(&self.pool)
            .await
            .with_context(|| format!("Failed to count {}", collection))?;
        let count: i64 = row.try_get(0)?;
        Ok(count.max(0) as u64)
    }

    async fn query(&self, collection: Collection, query: &Query) -> Result<Vec<Record>> {
        query.validate()?;
        let (where_sql, mut args) = where_clause(collection, &query.filter)?;
        let mut sql = format!("SELECT id, body_json FROM records{}", where_sql);

        match &query.order_by {
            Some(order) => {
                let direction = if order.descending { "DESC" } else { "ASC" };
                sql.push_str(&format!(
                    " ORDER BY {} {}, seq ASC",
                    extract(&order.field),
                    direction
                ));
            }
            None => sql.push_str(" ORDER BY seq ASC"),
        }

        if let Some(limit) = query.limit {
            sql.push_str(" LIMIT ?");
            args.push(SqlArg::Int(i64::try_from(limit).unwrap_or(i64::MAX)));
        }

        let rows = bind_all(sqlx::query(&sql), &args)
            .fetch_all(&self.pool)
            .await
            .with_context(|| format!("Failed to query {}", collection))?;

        rows.iter()
            .map(|row| -> Result<Record> {
                let id: String = row.try_get("id")?;
                let body_json: String = row.try_get("body_json")?;
                let body: Map<String, Value> = serde_json::from_str(&body_json)
                    .with_context(|| format!("Corrupt body for {} record {}", collection, id))?;
                Ok(Record {
                    id,
                    collection,
                    body,
                })
            })
            .collect()
    }

    fn subscribe(&self, collection: Collection) -> Subscription {
        self.feed.subscribe(collection)
    }
}
