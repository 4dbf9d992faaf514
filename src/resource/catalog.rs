use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::authorization::Authorization;
use crate::schema::Schema;

/// What populate needs to read another resource's documents
#[derive(Clone)]
pub struct CatalogEntry {
    pub schema: Arc<Schema>,
    pub authorization: Arc<dyn Authorization>,
}

/// Resources of one application, by name.
///
/// Filled while the application is built and only read afterwards.
#[derive(Clone, Default)]
pub struct Catalog {
    entries: Arc<RwLock<HashMap<String, CatalogEntry>>>,
}

impl Catalog {
    pub fn register(&self, name: &str, entry: CatalogEntry) {
        match self.entries.write() {
            Ok(mut entries) => {
                entries.insert(name.to_string(), entry);
            }
            Err(poisoned) => {
                poisoned.into_inner().insert(name.to_string(), entry);
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<CatalogEntry> {
        match self.entries.read() {
            Ok(entries) => entries.get(name).cloned(),
            Err(poisoned) => poisoned.into_inner().get(name).cloned(),
        }
    }
}
