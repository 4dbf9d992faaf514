//! Document store abstraction.
//!
//! # Responsibilities
//! - Hand out one [`Collection`] per schema, created on first request
//! - Execute [`Query`] trees, id lookups and whole-document writes
//! - Enforce id assignment and unique fields
//!
//! # Design Decisions
//! - Documents are JSON objects carrying a UUID string `id`
//! - Writes replace whole documents; merging happens above the store
//! - Query semantics are defined by the memory store; the PostgreSQL store
//!   translates the same tree to SQL over a `jsonb` column

pub mod geo;
pub mod matcher;
pub mod memory;
pub mod postgres;
pub mod sql;

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::query::Query;
use crate::schema::Schema;

pub use memory::MemoryStore;
pub use postgres::PgStore;

pub type Document = Map<String, Value>;

/// Primary key field of every document
pub const ID: &str = "id";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Cast to id failed for value \"{0}\"")]
    Cast(String),

    #[error("E11000 duplicate key error collection: {collection} index: {field}")]
    DuplicateKey { collection: String, field: String },

    #[error("Unsupported query: {0}")]
    Unsupported(String),

    #[error("Missing configuration: {0}")]
    ConfigMissing(&'static str),

    #[error("Store error: {0}")]
    Backend(String),

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Collection for a schema, created (table, indexes) on first use
    async fn collection(&self, schema: &Schema) -> Result<Arc<dyn Collection>, StoreError>;

    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[async_trait]
pub trait Collection: Send + Sync {
    fn name(&self) -> &str;

    async fn find(&self, query: &Query) -> Result<Vec<Document>, StoreError>;

    /// `Err(Cast)` when `id` is not a valid id, `Ok(None)` when absent
    async fn find_by_id(&self, id: &str) -> Result<Option<Document>, StoreError>;

    /// Insert a new document, assigning an id when it has none
    async fn insert(&self, document: Document) -> Result<Document, StoreError>;

    /// Replace the document stored under `id`; `Ok(None)` when absent
    async fn replace(&self, id: &str, document: Document) -> Result<Option<Document>, StoreError>;

    /// `Ok(false)` when there was nothing to remove
    async fn remove(&self, id: &str) -> Result<bool, StoreError>;
}

/// Validate an id, producing the store's cast error on failure
pub fn parse_id(id: &str) -> Result<Uuid, StoreError> {
    Uuid::parse_str(id).map_err(|_| StoreError::Cast(id.to_string()))
}

/// Ensure the document carries a valid id, generating one if missing
pub fn assign_id(document: &mut Document) -> Result<String, StoreError> {
    match document.get(ID) {
        Some(Value::String(id)) => {
            parse_id(id)?;
            Ok(id.clone())
        }
        Some(Value::Null) | None => {
            let id = Uuid::new_v4().to_string();
            document.insert(ID.to_string(), Value::String(id.clone()));
            Ok(id)
        }
        Some(other) => Err(StoreError::Cast(other.to_string())),
    }
}

/// Document id, if present
pub fn document_id(document: &Document) -> Option<&str> {
    document.get(ID).and_then(Value::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn assigns_missing_ids_and_checks_given_ones() {
        let mut doc = Document::new();
        let id = assign_id(&mut doc).unwrap();
        assert!(parse_id(&id).is_ok());
        assert_eq!(document_id(&doc), Some(id.as_str()));

        let mut bad = json!({ "id": "nope" }).as_object().cloned().unwrap();
        assert!(matches!(assign_id(&mut bad), Err(StoreError::Cast(_))));
    }
}
