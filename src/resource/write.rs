use serde_json::Value;
use std::collections::HashMap;

use super::{count_meta, Resource, UpdateStrategy};
use crate::error::HttpError;
use crate::events::ChangeAction;
use crate::http::status;
use crate::query::QueryOptions;
use crate::request::Request;
use crate::store::{document_id, Document};

impl Resource {
    pub(super) async fn create(&self, request: &mut Request) -> Result<(), HttpError> {
        match request.take_body() {
            Some(Value::Object(payload)) => self.create_one(payload, request).await,
            Some(Value::Array(items)) => self.create_many(items, request).await,
            _ => Err(HttpError::bad_request(
                "Request body must be a JSON object or an array of objects",
            )),
        }
    }

    async fn create_one(&self, payload: Document, request: &mut Request) -> Result<(), HttpError> {
        if !self.authorization.create_detail(&payload, request).await? {
            return Err(self.denied("create"));
        }

        let document = self.prepare_new(payload, request)?;
        let created = self.collection().await?.insert(document).await?;
        self.publish(ChangeAction::Created, &created);

        request.respond(status::CREATED, Some(self.render(&created)));
        Ok(())
    }

    async fn create_many(&self, items: Vec<Value>, request: &mut Request) -> Result<(), HttpError> {
        let payloads = objects(items)?;
        let authorized = self.authorization.create_list(payloads, request).await?;

        // Validate everything before the first insert
        let reader: &Request = request;
        let documents = authorized
            .into_iter()
            .map(|payload| self.prepare_new(payload, reader))
            .collect::<Result<Vec<_>, _>>()?;

        let collection = self.collection().await?;
        let mut created = Vec::with_capacity(documents.len());
        for document in documents {
            let document = collection.insert(document).await?;
            self.publish(ChangeAction::Created, &document);
            created.push(self.render(&document));
        }

        request.send(status::CREATED, count_meta(created.len()), Some(Value::Array(created)));
        Ok(())
    }

    /// Client payload to a storable document: sanitize, hook, defaults,
    /// timestamps, then validation.
    fn prepare_new(&self, payload: Document, request: &Request) -> Result<Document, HttpError> {
        let mut document = self.schema.sanitize(payload);
        if let Some(hook) = &self.before_create {
            document = hook(document, request)?;
        }
        self.schema.apply_defaults(&mut document);
        self.schema.stamp(&mut document, true);
        self.schema.validate(&document)?;
        Ok(document)
    }

    /// Apply a client payload to an existing document. Readonly fields and
    /// the id always come from `existing`.
    fn merge(&self, existing: &Document, payload: Document, strategy: UpdateStrategy) -> Result<Document, HttpError> {
        let changes = self.schema.sanitize(payload);
        let mut next = match strategy {
            UpdateStrategy::Replace => {
                let mut next = changes;
                self.schema.apply_defaults(&mut next);
                next
            }
            UpdateStrategy::Patch => {
                let mut next = existing.clone();
                next.extend(changes);
                next
            }
        };
        self.schema.preserve_readonly(existing, &mut next);
        self.schema.stamp(&mut next, false);
        self.schema.validate(&next)?;
        Ok(next)
    }

    pub(super) async fn update_detail(&self, request: &mut Request, strategy: UpdateStrategy) -> Result<(), HttpError> {
        let id = self.id_param(request)?;
        let collection = self.collection().await?;
        let existing = collection
            .find_by_id(&id)
            .await?
            .ok_or_else(|| self.not_found(&id))?;

        if !self.authorization.update_detail(&existing, request).await? {
            return Err(self.denied("update"));
        }

        let payload = match request.take_body() {
            Some(Value::Object(payload)) => payload,
            _ => return Err(HttpError::bad_request("Request body must be a JSON object")),
        };
        let next = self.merge(&existing, payload, strategy)?;
        let updated = collection
            .replace(&id, next)
            .await?
            .ok_or_else(|| self.not_found(&id))?;
        self.publish(ChangeAction::Updated, &updated);

        request.respond(status::OK, Some(self.render(&updated)));
        Ok(())
    }

    pub(super) async fn update_list(&self, request: &mut Request, strategy: UpdateStrategy) -> Result<(), HttpError> {
        let items = match request.take_body() {
            Some(Value::Array(items)) => items,
            _ => return Err(HttpError::bad_request("Request body must be an array of objects")),
        };

        let mut changes: Vec<(String, Document)> = Vec::with_capacity(items.len());
        for payload in objects(items)? {
            let id = document_id(&payload)
                .ok_or_else(|| HttpError::bad_request("Every item must include an id"))?
                .to_string();
            changes.push((id, payload));
        }

        // Every target must exist before anything is written
        let collection = self.collection().await?;
        let mut existing = Vec::with_capacity(changes.len());
        for (id, _) in &changes {
            let document = collection
                .find_by_id(id)
                .await?
                .ok_or_else(|| self.not_found(id))?;
            existing.push(document);
        }

        let authorized = self.authorization.update_list(existing, request).await?;
        let mut payloads: HashMap<String, Document> = changes.into_iter().collect();
        let mut pending = Vec::with_capacity(authorized.len());
        for current in &authorized {
            let Some(id) = document_id(current) else { continue };
            let Some(payload) = payloads.remove(id) else { continue };
            pending.push((id.to_string(), self.merge(current, payload, strategy)?));
        }

        let mut updated = Vec::with_capacity(pending.len());
        for (id, next) in pending {
            if let Some(document) = collection.replace(&id, next).await? {
                self.publish(ChangeAction::Updated, &document);
                updated.push(self.render(&document));
            }
        }

        request.send(status::OK, count_meta(updated.len()), Some(Value::Array(updated)));
        Ok(())
    }

    pub(super) async fn delete_detail(&self, request: &mut Request) -> Result<(), HttpError> {
        let id = self.id_param(request)?;
        let collection = self.collection().await?;
        let existing = collection
            .find_by_id(&id)
            .await?
            .ok_or_else(|| self.not_found(&id))?;

        if !self.authorization.delete_detail(&existing, request).await? {
            return Err(self.denied("delete"));
        }

        if collection.remove(&id).await? {
            self.publish(ChangeAction::Deleted, &existing);
        }
        request.respond(status::NO_CONTENT, None);
        Ok(())
    }

    /// Remove the authorized subset of documents matching the list filter
    pub(super) async fn delete_list(&self, request: &mut Request) -> Result<(), HttpError> {
        let options = QueryOptions::from_params(request.query(), &self.query)?;
        let collection = self.collection().await?;
        let candidates = collection.find(&options.unbounded()).await?;
        let authorized = self.authorization.delete_list(candidates, request).await?;

        let mut removed = 0;
        for document in &authorized {
            let Some(id) = document_id(document) else { continue };
            if collection.remove(id).await? {
                self.publish(ChangeAction::Deleted, document);
                removed += 1;
            }
        }

        tracing::debug!("Deleted {} of {} authorized {}", removed, authorized.len(), self.name);
        request.send(status::NO_CONTENT, count_meta(removed), None);
        Ok(())
    }
}

fn objects(items: Vec<Value>) -> Result<Vec<Document>, HttpError> {
    items
        .into_iter()
        .map(|item| match item {
            Value::Object(object) => Ok(object),
            _ => Err(HttpError::bad_request("Every item must be a JSON object")),
        })
        .collect()
}
