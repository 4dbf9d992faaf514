use serde_json::{json, Map, Value};

use super::Resource;
use crate::error::HttpError;
use crate::request::Request;
use crate::query::QueryOptions;
use crate::store::{Collection, Document};

/// One store fetch of the list loop
enum Page {
    Candidates(Vec<Document>),
    /// The store has nothing more past this point
    Exhausted,
}

impl Resource {
    pub(super) async fn read_list(&self, request: &mut Request) -> Result<(), HttpError> {
        let options = QueryOptions::from_params(request.query(), &self.query)?;
        let documents = self.fill_page(&options, request).await?;
        let documents = self.populate(documents, &options.populate, request).await?;

        let body: Vec<Value> = documents
            .into_iter()
            .map(|doc| match &options.projection {
                Some(projection) => projection.apply(doc),
                None => doc,
            })
            .map(|doc| self.render(&doc))
            .collect();
        let mut meta = Map::new();
        meta.insert("limit".to_string(), json!(options.limit));
        meta.insert("offset".to_string(), json!(options.offset));
        meta.insert("count".to_string(), json!(body.len()));
        request.send(200, meta, Some(Value::Array(body)));
        Ok(())
    }

    /// Fetch pages until `limit` documents survive authorization or the
    /// store runs dry. Page `n` starts at `offset + n * limit`.
    async fn fill_page(&self, options: &QueryOptions, request: &Request) -> Result<Vec<Document>, HttpError> {
        let collection = self.collection().await?;
        let limit = usize::try_from(options.limit).unwrap_or(usize::MAX);

        let mut accumulated = Vec::new();
        let mut page = 0u64;
        loop {
            let candidates = match next_page(collection.as_ref(), options, page).await? {
                Page::Candidates(candidates) => candidates,
                Page::Exhausted => break,
            };
            let fetched = candidates.len();
            accumulated.extend(self.authorization.read_list(candidates, request).await?);

            if accumulated.len() >= limit || fetched < limit {
                break;
            }
            page += 1;
        }

        tracing::debug!(
            "{} list filled with {} documents over {} pages",
            self.name,
            accumulated.len().min(limit),
            page + 1
        );
        accumulated.truncate(limit);
        Ok(accumulated)
    }

    pub(super) async fn read_detail(&self, request: &mut Request) -> Result<(), HttpError> {
        let id = self.id_param(request)?;
        let collection = self.collection().await?;
        let document = collection
            .find_by_id(&id)
            .await?
            .ok_or_else(|| self.not_found(&id))?;

        if !self.authorization.read_detail(&document, request).await? {
            return Err(self.denied("read"));
        }

        let options = QueryOptions::from_params(request.query(), &self.query)?;
        let mut documents = self.populate(vec![document], &options.populate, request).await?;
        let mut document = documents.pop().unwrap_or_default();
        if let Some(projection) = &options.projection {
            document = projection.apply(document);
        }

        request.respond(200, Some(self.render(&document)));
        Ok(())
    }
}

async fn next_page(collection: &dyn Collection, options: &QueryOptions, page: u64) -> Result<Page, HttpError> {
    let candidates = collection.find(&options.page(page)).await?;
    if candidates.is_empty() {
        Ok(Page::Exhausted)
    } else {
        Ok(Page::Candidates(candidates))
    }
}
