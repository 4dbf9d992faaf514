use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::{PgArguments, PgPoolOptions};
use sqlx::query::Query as SqlQuery;
use sqlx::{PgPool, Postgres, Row};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::info;

use super::sql::{limit_offset, order_by, SqlParam, SqlWhere};
use super::{assign_id, parse_id, Collection, Document, Store, StoreError, ID};
use crate::config::DatabaseConfig;
use crate::query::Query;
use crate::schema::Schema;

/// PostgreSQL store: one table per collection holding `(seq, id, doc jsonb)`.
pub struct PgStore {
    pool: PgPool,
    collections: RwLock<HashMap<String, Arc<PgCollection>>>,
}

impl PgStore {
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, StoreError> {
        let url = config
            .url
            .as_deref()
            .ok_or(StoreError::ConfigMissing("DATABASE_URL"))?;

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.connection_timeout))
            .connect(url)
            .await?;

        info!("Connected PostgreSQL pool (max {} connections)", config.max_connections);
        Ok(Self::from_pool(pool))
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self {
            pool,
            collections: RwLock::new(HashMap::new()),
        }
    }

    async fn ensure_table(&self, schema: &Schema) -> Result<PgCollection, StoreError> {
        let table = quote_identifier(&schema.name);
        let create = format!(
            "CREATE TABLE IF NOT EXISTS {} (seq BIGSERIAL, id TEXT PRIMARY KEY, doc JSONB NOT NULL)",
            table
        );
        sqlx::query(&create).execute(&self.pool).await?;

        for field in schema.unique_fields() {
            let index = quote_identifier(&format!("{}_{}_key", schema.name, field));
            let create_index = format!(
                "CREATE UNIQUE INDEX IF NOT EXISTS {index} ON {table} ((doc->'{field}')) \
                 WHERE doc->'{field}' IS NOT NULL AND doc->'{field}' <> 'null'::jsonb"
            );
            sqlx::query(&create_index).execute(&self.pool).await?;
        }

        Ok(PgCollection {
            pool: self.pool.clone(),
            name: schema.name.clone(),
            table,
        })
    }
}

#[async_trait]
impl Store for PgStore {
    async fn collection(&self, schema: &Schema) -> Result<Arc<dyn Collection>, StoreError> {
        // Fast path: try read lock
        {
            let collections = self.collections.read().await;
            if let Some(collection) = collections.get(&schema.name) {
                return Ok(collection.clone());
            }
        }

        let collection = Arc::new(self.ensure_table(schema).await?);
        {
            let mut collections = self.collections.write().await;
            collections.insert(schema.name.clone(), collection.clone());
        }

        info!("Prepared table for collection: {}", schema.name);
        Ok(collection)
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

pub struct PgCollection {
    pool: PgPool,
    name: String,
    table: String,
}

impl PgCollection {
    fn map_write_error(&self, err: sqlx::Error) -> StoreError {
        if let sqlx::Error::Database(db) = &err {
            if db.code().as_deref() == Some("23505") {
                let field = db
                    .constraint()
                    .and_then(|c| unique_field(&self.name, c))
                    .unwrap_or(ID)
                    .to_string();
                return StoreError::DuplicateKey {
                    collection: self.name.clone(),
                    field,
                };
            }
        }
        StoreError::Sqlx(err)
    }
}

#[async_trait]
impl Collection for PgCollection {
    fn name(&self) -> &str {
        &self.name
    }

    async fn find(&self, query: &Query) -> Result<Vec<Document>, StoreError> {
        let (where_clause, params) = SqlWhere::generate(&query.filter, "doc", 0)?;
        let sql = format!(
            "SELECT doc FROM {} WHERE {} {} {}",
            self.table,
            where_clause,
            order_by(&query.sort, "doc"),
            limit_offset(query.limit, query.skip)
        );
        tracing::debug!("find on {}: {}", self.name, sql);

        let rows = bind_params(sqlx::query(&sql), params)
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| -> Result<Document, StoreError> {
                let document = into_document(row.try_get("doc")?)?;
                Ok(match &query.projection {
                    Some(projection) => projection.apply(document),
                    None => document,
                })
            })
            .collect()
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Document>, StoreError> {
        parse_id(id)?;
        let sql = format!("SELECT doc FROM {} WHERE id = $1", self.table);
        let row = sqlx::query(&sql).bind(id).fetch_optional(&self.pool).await?;
        match row {
            Some(row) => Ok(Some(into_document(row.try_get("doc")?)?)),
            None => Ok(None),
        }
    }

    async fn insert(&self, mut document: Document) -> Result<Document, StoreError> {
        let id = assign_id(&mut document)?;
        let sql = format!("INSERT INTO {} (id, doc) VALUES ($1, $2) RETURNING doc", self.table);
        let row = sqlx::query(&sql)
            .bind(&id)
            .bind(Value::Object(document))
            .fetch_one(&self.pool)
            .await
            .map_err(|e| self.map_write_error(e))?;
        into_document(row.try_get("doc")?)
    }

    async fn replace(&self, id: &str, mut document: Document) -> Result<Option<Document>, StoreError> {
        parse_id(id)?;
        document.insert(ID.to_string(), Value::String(id.to_string()));
        let sql = format!("UPDATE {} SET doc = $2 WHERE id = $1 RETURNING doc", self.table);
        let row = sqlx::query(&sql)
            .bind(id)
            .bind(Value::Object(document))
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| self.map_write_error(e))?;
        match row {
            Some(row) => Ok(Some(into_document(row.try_get("doc")?)?)),
            None => Ok(None),
        }
    }

    async fn remove(&self, id: &str) -> Result<bool, StoreError> {
        parse_id(id)?;
        let sql = format!("DELETE FROM {} WHERE id = $1", self.table);
        let result = sqlx::query(&sql).bind(id).execute(&self.pool).await?;
        Ok(result.rows_affected() > 0)
    }
}

fn bind_params(mut query: SqlQuery<'_, Postgres, PgArguments>, params: Vec<SqlParam>) -> SqlQuery<'_, Postgres, PgArguments> {
    for param in params {
        query = match param {
            SqlParam::Json(value) => query.bind(value),
            SqlParam::Text(text) => query.bind(text),
            SqlParam::Int(n) => query.bind(n),
        };
    }
    query
}

fn into_document(value: Value) -> Result<Document, StoreError> {
    match value {
        Value::Object(document) => Ok(document),
        other => Err(StoreError::Backend(format!("stored row is not a document: {}", other))),
    }
}

fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Field name from a `{collection}_{field}_key` unique index
fn unique_field<'a>(collection: &str, constraint: &'a str) -> Option<&'a str> {
    constraint
        .strip_prefix(collection)?
        .strip_prefix('_')?
        .strip_suffix("_key")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recovers_field_from_index_name() {
        assert_eq!(unique_field("people", "people_email_key"), Some("email"));
        assert_eq!(unique_field("people", "people_pkey"), None);
        assert_eq!(unique_field("people", "pets_email_key"), None);
    }

    #[test]
    fn quotes_identifiers() {
        assert_eq!(quote_identifier("people"), "\"people\"");
        assert_eq!(quote_identifier("a\"b"), "\"a\"\"b\"");
    }
}
