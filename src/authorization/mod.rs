//! Per-resource authorization policies.
//!
//! A policy answers eight questions, one per verb and endpoint kind. List
//! operations filter the candidate documents and never fail for partial
//! denial; detail operations return a yes/no decision. The trait's own
//! defaults refuse with 501 so an incomplete policy is loud, not open.

use async_trait::async_trait;
use std::fmt;

use crate::error::HttpError;
use crate::request::Request;
use crate::store::Document;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Read,
    Create,
    Update,
    Delete,
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Verb::Read => "read",
            Verb::Create => "create",
            Verb::Update => "update",
            Verb::Delete => "delete",
        })
    }
}

fn not_implemented(operation: &str) -> HttpError {
    HttpError::not_implemented(format!("Authorization::{} is not implemented", operation))
}

#[async_trait]
pub trait Authorization: Send + Sync {
    async fn read_list(&self, documents: Vec<Document>, request: &Request) -> Result<Vec<Document>, HttpError> {
        let _ = (documents, request);
        Err(not_implemented("read_list"))
    }

    async fn read_detail(&self, document: &Document, request: &Request) -> Result<bool, HttpError> {
        let _ = (document, request);
        Err(not_implemented("read_detail"))
    }

    async fn create_list(&self, documents: Vec<Document>, request: &Request) -> Result<Vec<Document>, HttpError> {
        let _ = (documents, request);
        Err(not_implemented("create_list"))
    }

    async fn create_detail(&self, document: &Document, request: &Request) -> Result<bool, HttpError> {
        let _ = (document, request);
        Err(not_implemented("create_detail"))
    }

    async fn update_list(&self, documents: Vec<Document>, request: &Request) -> Result<Vec<Document>, HttpError> {
        let _ = (documents, request);
        Err(not_implemented("update_list"))
    }

    async fn update_detail(&self, document: &Document, request: &Request) -> Result<bool, HttpError> {
        let _ = (document, request);
        Err(not_implemented("update_detail"))
    }

    async fn delete_list(&self, documents: Vec<Document>, request: &Request) -> Result<Vec<Document>, HttpError> {
        let _ = (documents, request);
        Err(not_implemented("delete_list"))
    }

    async fn delete_detail(&self, document: &Document, request: &Request) -> Result<bool, HttpError> {
        let _ = (document, request);
        Err(not_implemented("delete_detail"))
    }
}

/// Policy with no overrides; every operation answers 501
#[derive(Debug, Clone, Copy, Default)]
pub struct Unimplemented;

impl Authorization for Unimplemented {}

/// Lists pass through unchanged, details are always allowed
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

#[async_trait]
impl Authorization for AllowAll {
    async fn read_list(&self, documents: Vec<Document>, _: &Request) -> Result<Vec<Document>, HttpError> {
        Ok(documents)
    }

    async fn read_detail(&self, _: &Document, _: &Request) -> Result<bool, HttpError> {
        Ok(true)
    }

    async fn create_list(&self, documents: Vec<Document>, _: &Request) -> Result<Vec<Document>, HttpError> {
        Ok(documents)
    }

    async fn create_detail(&self, _: &Document, _: &Request) -> Result<bool, HttpError> {
        Ok(true)
    }

    async fn update_list(&self, documents: Vec<Document>, _: &Request) -> Result<Vec<Document>, HttpError> {
        Ok(documents)
    }

    async fn update_detail(&self, _: &Document, _: &Request) -> Result<bool, HttpError> {
        Ok(true)
    }

    async fn delete_list(&self, documents: Vec<Document>, _: &Request) -> Result<Vec<Document>, HttpError> {
        Ok(documents)
    }

    async fn delete_detail(&self, _: &Document, _: &Request) -> Result<bool, HttpError> {
        Ok(true)
    }
}

/// Lists come back empty, details are always refused
#[derive(Debug, Clone, Copy, Default)]
pub struct DenyAll;

#[async_trait]
impl Authorization for DenyAll {
    async fn read_list(&self, _: Vec<Document>, _: &Request) -> Result<Vec<Document>, HttpError> {
        Ok(Vec::new())
    }

    async fn read_detail(&self, _: &Document, _: &Request) -> Result<bool, HttpError> {
        Ok(false)
    }

    async fn create_list(&self, _: Vec<Document>, _: &Request) -> Result<Vec<Document>, HttpError> {
        Ok(Vec::new())
    }

    async fn create_detail(&self, _: &Document, _: &Request) -> Result<bool, HttpError> {
        Ok(false)
    }

    async fn update_list(&self, _: Vec<Document>, _: &Request) -> Result<Vec<Document>, HttpError> {
        Ok(Vec::new())
    }

    async fn update_detail(&self, _: &Document, _: &Request) -> Result<bool, HttpError> {
        Ok(false)
    }

    async fn delete_list(&self, _: Vec<Document>, _: &Request) -> Result<Vec<Document>, HttpError> {
        Ok(Vec::new())
    }

    async fn delete_detail(&self, _: &Document, _: &Request) -> Result<bool, HttpError> {
        Ok(false)
    }
}

/// One predicate drives all eight operations: lists keep the documents it
/// accepts, details return its answer.
pub struct PredicateAuthorization<F> {
    predicate: F,
}

impl<F> PredicateAuthorization<F>
where
    F: Fn(Verb, &Document, &Request) -> bool + Send + Sync,
{
    pub fn new(predicate: F) -> Self {
        Self { predicate }
    }

    fn keep(&self, verb: Verb, documents: Vec<Document>, request: &Request) -> Vec<Document> {
        documents
            .into_iter()
            .filter(|doc| (self.predicate)(verb, doc, request))
            .collect()
    }
}

#[async_trait]
impl<F> Authorization for PredicateAuthorization<F>
where
    F: Fn(Verb, &Document, &Request) -> bool + Send + Sync,
{
    async fn read_list(&self, documents: Vec<Document>, request: &Request) -> Result<Vec<Document>, HttpError> {
        Ok(self.keep(Verb::Read, documents, request))
    }

    async fn read_detail(&self, document: &Document, request: &Request) -> Result<bool, HttpError> {
        Ok((self.predicate)(Verb::Read, document, request))
    }

    async fn create_list(&self, documents: Vec<Document>, request: &Request) -> Result<Vec<Document>, HttpError> {
        Ok(self.keep(Verb::Create, documents, request))
    }

    async fn create_detail(&self, document: &Document, request: &Request) -> Result<bool, HttpError> {
        Ok((self.predicate)(Verb::Create, document, request))
    }

    async fn update_list(&self, documents: Vec<Document>, request: &Request) -> Result<Vec<Document>, HttpError> {
        Ok(self.keep(Verb::Update, documents, request))
    }

    async fn update_detail(&self, document: &Document, request: &Request) -> Result<bool, HttpError> {
        Ok((self.predicate)(Verb::Update, document, request))
    }

    async fn delete_list(&self, documents: Vec<Document>, request: &Request) -> Result<Vec<Document>, HttpError> {
        Ok(self.keep(Verb::Delete, documents, request))
    }

    async fn delete_detail(&self, document: &Document, request: &Request) -> Result<bool, HttpError> {
        Ok((self.predicate)(Verb::Delete, document, request))
    }
}
