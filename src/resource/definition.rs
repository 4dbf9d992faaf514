//! Resources declared in YAML.
//!
//! A definition file is a schema plus how the resource is exposed:
//!
//! ```yaml
//! name: people
//! timestamps: true
//! access: authenticated
//! list_methods: [get, post]
//! fields:
//!   name: { type: string, required: true }
//!   email: { type: string, unique: true }
//!   friend: { type: reference, ref: people }
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

use super::{Resource, ResourceBuilder};
use crate::authorization::{AllowAll, Authorization, DenyAll, PredicateAuthorization, Verb};
use crate::request::Method;
use crate::schema::{Schema, SchemaError};

#[derive(Debug, thiserror::Error)]
pub enum DefinitionError {
    #[error("Failed to read resource definitions from {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{path}: {source}")]
    File {
        path: String,
        #[source]
        source: SchemaError,
    },

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error("Invalid method '{method}' in resource {resource}")]
    InvalidMethod { resource: String, method: String },
}

/// Built-in policies for declared resources
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Access {
    #[default]
    Public,
    /// Any request carrying a valid token
    Authenticated,
    ReadOnly,
    Deny,
}

impl Access {
    pub fn policy(self) -> Arc<dyn Authorization> {
        match self {
            Access::Public => Arc::new(AllowAll),
            Access::Deny => Arc::new(DenyAll),
            Access::Authenticated => Arc::new(PredicateAuthorization::new(|_, _, request| {
                request.actor().is_some()
            })),
            Access::ReadOnly => Arc::new(PredicateAuthorization::new(|verb, _, _| verb == Verb::Read)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceDefinition {
    #[serde(flatten)]
    pub schema: Schema,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default)]
    pub access: Access,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub list_methods: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail_methods: Option<Vec<String>>,
}

impl ResourceDefinition {
    pub fn from_yaml(source: &str) -> Result<Self, DefinitionError> {
        let definition: ResourceDefinition = serde_yaml::from_str(source).map_err(SchemaError::from)?;
        definition.schema.check()?;
        Ok(definition)
    }

    /// Every `*.yaml`/`*.yml` file in `dir`, sorted by file name.
    pub fn load_dir(dir: &Path) -> Result<Vec<Self>, DefinitionError> {
        let io_err = |source| DefinitionError::Io {
            path: dir.display().to_string(),
            source,
        };

        let mut paths = Vec::new();
        for entry in std::fs::read_dir(dir).map_err(io_err)? {
            let path = entry.map_err(io_err)?.path();
            let is_yaml = path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext == "yaml" || ext == "yml");
            if is_yaml {
                paths.push(path);
            }
        }
        paths.sort();

        let mut definitions = Vec::with_capacity(paths.len());
        for path in paths {
            let source = std::fs::read_to_string(&path).map_err(|source| DefinitionError::Io {
                path: path.display().to_string(),
                source,
            })?;
            let definition = Self::from_yaml(&source).map_err(|err| match err {
                DefinitionError::Schema(source) => DefinitionError::File {
                    path: path.display().to_string(),
                    source,
                },
                other => other,
            })?;
            tracing::debug!("Loaded resource {} from {}", definition.schema.name, path.display());
            definitions.push(definition);
        }
        Ok(definitions)
    }

    pub fn into_builder(self) -> Result<ResourceBuilder, DefinitionError> {
        let name = self.schema.name.clone();
        let list = parse_methods(&name, self.list_methods.as_deref())?;
        let detail = parse_methods(&name, self.detail_methods.as_deref())?;

        let mut builder = Resource::builder(name, self.schema).authorization_shared(self.access.policy());
        if let Some(path) = self.path {
            builder = builder.path(path);
        }
        if let Some(list) = list {
            builder = builder.list_methods(list);
        }
        if let Some(detail) = detail {
            builder = builder.detail_methods(detail);
        }
        Ok(builder)
    }
}

fn parse_methods(resource: &str, methods: Option<&[String]>) -> Result<Option<Vec<Method>>, DefinitionError> {
    let Some(methods) = methods else {
        return Ok(None);
    };
    methods
        .iter()
        .map(|method| {
            method.parse::<Method>().map_err(|_| DefinitionError::InvalidMethod {
                resource: resource.to_string(),
                method: method.clone(),
            })
        })
        .collect::<Result<Vec<_>, _>>()
        .map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::EndpointKind;
    use crate::schema::FieldType;

    const PEOPLE: &str = r#"
name: people
timestamps: true
access: read_only
list_methods: [get]
fields:
  name: { type: string, required: true }
  friend: { type: reference, ref: people }
"#;

    #[test]
    fn parses_schema_and_exposure() {
        let definition = ResourceDefinition::from_yaml(PEOPLE).unwrap();
        assert_eq!(definition.schema.name, "people");
        assert!(definition.schema.timestamps);
        assert_eq!(definition.access, Access::ReadOnly);
        assert_eq!(definition.schema.fields["friend"].field_type, FieldType::Reference);
        assert_eq!(definition.list_methods, Some(vec!["get".to_string()]));
    }

    #[test]
    fn access_defaults_to_public() {
        let definition = ResourceDefinition::from_yaml("name: notes\n").unwrap();
        assert_eq!(definition.access, Access::Public);
        assert!(definition.path.is_none());
    }

    #[test]
    fn rejects_bad_names_and_methods() {
        assert!(matches!(
            ResourceDefinition::from_yaml("name: bad-name\n"),
            Err(DefinitionError::Schema(SchemaError::InvalidName(_)))
        ));

        let definition = ResourceDefinition::from_yaml("name: notes\nlist_methods: [get, trace]\n").unwrap();
        assert!(matches!(
            definition.into_builder(),
            Err(DefinitionError::InvalidMethod { .. })
        ));
    }

    #[test]
    fn builder_carries_declared_methods() {
        use crate::config::AppConfig;
        use crate::events::ChangeFeed;
        use crate::resource::Catalog;
        use crate::store::MemoryStore;

        let resource = ResourceDefinition::from_yaml(PEOPLE)
            .unwrap()
            .into_builder()
            .unwrap()
            .build(
                Arc::new(MemoryStore::new()),
                ChangeFeed::default(),
                Catalog::default(),
                AppConfig::development().query,
            );
        assert_eq!(resource.allow(EndpointKind::List), "GET, HEAD, OPTIONS");
        assert_eq!(resource.path(), "/people");
    }
}
