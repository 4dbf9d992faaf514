use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;

use super::matcher::{self, values_eq};
use super::{assign_id, parse_id, Collection, Document, Store, StoreError, ID};
use crate::query::Query;
use crate::schema::Schema;

/// In-process store; documents live in insertion order per collection.
#[derive(Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<String, Arc<MemoryCollection>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn collection(&self, schema: &Schema) -> Result<Arc<dyn Collection>, StoreError> {
        // Fast path: try read lock
        {
            let collections = self.collections.read().await;
            if let Some(collection) = collections.get(&schema.name) {
                return Ok(collection.clone());
            }
        }

        let mut collections = self.collections.write().await;
        let collection = collections
            .entry(schema.name.clone())
            .or_insert_with(|| {
                tracing::debug!("Created memory collection {}", schema.name);
                Arc::new(MemoryCollection::new(&schema.name, schema.unique_fields()))
            })
            .clone();
        Ok(collection)
    }
}

#[derive(Default)]
struct State {
    next_seq: u64,
    documents: BTreeMap<u64, Document>,
    index: HashMap<String, u64>,
}

impl State {
    /// Reject a write whose unique fields collide with another document
    fn check_unique(&self, name: &str, unique: &[String], document: &Document, own_seq: Option<u64>) -> Result<(), StoreError> {
        for field in unique {
            let Some(value) = document.get(field).filter(|v| !v.is_null()) else {
                continue;
            };
            let taken = self
                .documents
                .iter()
                .filter(|(seq, _)| Some(**seq) != own_seq)
                .any(|(_, other)| other.get(field).is_some_and(|o| values_eq(o, value)));
            if taken {
                return Err(StoreError::DuplicateKey {
                    collection: name.to_string(),
                    field: field.clone(),
                });
            }
        }
        Ok(())
    }
}

pub struct MemoryCollection {
    name: String,
    unique: Vec<String>,
    state: RwLock<State>,
}

impl MemoryCollection {
    pub fn new(name: &str, unique: Vec<String>) -> Self {
        Self {
            name: name.to_string(),
            unique,
            state: RwLock::new(State::default()),
        }
    }
}

#[async_trait]
impl Collection for MemoryCollection {
    fn name(&self) -> &str {
        &self.name
    }

    async fn find(&self, query: &Query) -> Result<Vec<Document>, StoreError> {
        let state = self.state.read().await;

        let mut found = Vec::new();
        for document in state.documents.values() {
            if matcher::matches(&query.filter, document)? {
                found.push(document.clone());
            }
        }
        drop(state);

        matcher::sort_documents(&mut found, &query.sort);

        let skip = usize::try_from(query.skip).unwrap_or(usize::MAX);
        let limit = query
            .limit
            .map(|l| usize::try_from(l).unwrap_or(usize::MAX))
            .unwrap_or(usize::MAX);

        Ok(found
            .into_iter()
            .skip(skip)
            .take(limit)
            .map(|doc| match &query.projection {
                Some(projection) => projection.apply(doc),
                None => doc,
            })
            .collect())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Document>, StoreError> {
        parse_id(id)?;
        let state = self.state.read().await;
        Ok(state
            .index
            .get(id)
            .and_then(|seq| state.documents.get(seq))
            .cloned())
    }

    async fn insert(&self, mut document: Document) -> Result<Document, StoreError> {
        let id = assign_id(&mut document)?;
        let mut state = self.state.write().await;

        if state.index.contains_key(&id) {
            return Err(StoreError::DuplicateKey {
                collection: self.name.clone(),
                field: ID.to_string(),
            });
        }
        state.check_unique(&self.name, &self.unique, &document, None)?;

        let seq = state.next_seq;
        state.next_seq += 1;
        state.index.insert(id, seq);
        state.documents.insert(seq, document.clone());
        Ok(document)
    }

    async fn replace(&self, id: &str, mut document: Document) -> Result<Option<Document>, StoreError> {
        parse_id(id)?;
        let mut state = self.state.write().await;

        let Some(seq) = state.index.get(id).copied() else {
            return Ok(None);
        };
        state.check_unique(&self.name, &self.unique, &document, Some(seq))?;

        document.insert(ID.to_string(), Value::String(id.to_string()));
        state.documents.insert(seq, document.clone());
        Ok(Some(document))
    }

    async fn remove(&self, id: &str) -> Result<bool, StoreError> {
        parse_id(id)?;
        let mut state = self.state.write().await;
        match state.index.remove(id) {
            Some(seq) => {
                state.documents.remove(&seq);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
