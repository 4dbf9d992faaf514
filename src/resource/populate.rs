use serde_json::Value;
use std::collections::HashMap;

use super::Resource;
use crate::error::HttpError;
use crate::request::Request;
use crate::store::{document_id, Document, StoreError};

impl Resource {
    /// Replace reference ids in `fields` with the referenced documents.
    ///
    /// Referenced documents go through the target resource's `read_list`;
    /// ids that are missing or not visible stay as ids.
    pub(super) async fn populate(
        &self,
        mut documents: Vec<Document>,
        fields: &[String],
        request: &Request,
    ) -> Result<Vec<Document>, HttpError> {
        for field in fields {
            let target = match self.schema.reference_target(field) {
                Some(target) => target,
                None if self.schema.path(field).is_none() => {
                    return Err(HttpError::bad_request(format!(
                        "Cannot populate unknown field {} of {}",
                        field, self.name
                    )))
                }
                None => {
                    return Err(HttpError::bad_request(format!(
                        "Cannot populate {}: not a reference field",
                        field
                    )))
                }
            };
            let entry = self.catalog.get(target).ok_or_else(|| {
                HttpError::bad_request(format!("Cannot populate {}: unknown resource {}", field, target))
            })?;
            let collection = self.store.collection(&entry.schema).await?;

            let mut ids: Vec<String> = Vec::new();
            for document in &documents {
                collect_ids(document.get(field), &mut ids);
            }
            ids.sort();
            ids.dedup();

            let mut found = Vec::with_capacity(ids.len());
            for id in &ids {
                match collection.find_by_id(id).await {
                    Ok(Some(document)) => found.push(document),
                    Ok(None) | Err(StoreError::Cast(_)) => {}
                    Err(err) => return Err(err.into()),
                }
            }

            let visible = entry.authorization.read_list(found, request).await?;
            let by_id: HashMap<String, Value> = visible
                .iter()
                .filter_map(|doc| {
                    let id = document_id(doc)?.to_string();
                    Some((id, Value::Object(entry.schema.serialize(doc))))
                })
                .collect();

            for document in &mut documents {
                if let Some(value) = document.get_mut(field) {
                    substitute(value, &by_id);
                }
            }
        }
        Ok(documents)
    }
}

fn collect_ids(value: Option<&Value>, ids: &mut Vec<String>) {
    match value {
        Some(Value::String(id)) => ids.push(id.clone()),
        Some(Value::Array(items)) => {
            ids.extend(items.iter().filter_map(Value::as_str).map(String::from));
        }
        _ => {}
    }
}

fn substitute(value: &mut Value, by_id: &HashMap<String, Value>) {
    let replacement = match value {
        Value::String(id) => by_id.get(id.as_str()).cloned(),
        Value::Array(items) => {
            for item in items.iter_mut() {
                substitute(item, by_id);
            }
            None
        }
        _ => None,
    };
    if let Some(replacement) = replacement {
        *value = replacement;
    }
}
