//! Declarative document schemas.
//!
//! A [`Schema`] names a collection and describes its fields. It drives
//! write validation, strips fields clients may not write ([`Schema::sanitize`])
//! or read ([`Schema::serialize`]), and tells the populate step which
//! fields reference other resources.

pub mod validate;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::store::{Document, ID};

pub use validate::ValidationError;

pub const CREATED_AT: &str = "created_at";
pub const UPDATED_AT: &str = "updated_at";

#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("Invalid schema YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid schema name '{0}': use letters, digits and underscores")]
    InvalidName(String),

    #[error("Invalid field name '{field}' in schema {schema}")]
    InvalidField { schema: String, field: String },

    #[error("Field {field} in schema {schema} declares a reference without a 'ref' target")]
    MissingReference { schema: String, field: String },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Number,
    Integer,
    Boolean,
    Date,
    Id,
    Reference,
    Array,
    Object,
    #[default]
    Mixed,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldDef {
    #[serde(rename = "type")]
    pub field_type: FieldType,
    pub required: bool,
    pub unique: bool,
    #[serde(rename = "enum", skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<Value>>,
    #[serde(rename = "ref", skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    pub readonly: bool,
    pub protected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl FieldDef {
    pub fn new(field_type: FieldType) -> Self {
        Self {
            field_type,
            ..Self::default()
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn readonly(mut self) -> Self {
        self.readonly = true;
        self
    }

    pub fn protected(mut self) -> Self {
        self.protected = true;
        self
    }

    pub fn enum_values<I>(mut self, values: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<Value>,
    {
        self.enum_values = Some(values.into_iter().map(Into::into).collect());
        self
    }

    pub fn reference(mut self, target: impl Into<String>) -> Self {
        self.reference = Some(target.into());
        self
    }

    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    pub name: String,
    #[serde(default)]
    pub timestamps: bool,
    /// Unknown fields are dropped from writes unless the schema is loose
    #[serde(default = "default_strict")]
    pub strict: bool,
    #[serde(default)]
    pub fields: BTreeMap<String, FieldDef>,
}

fn default_strict() -> bool {
    true
}

impl Schema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            timestamps: false,
            strict: true,
            fields: BTreeMap::new(),
        }
    }

    pub fn field(mut self, name: impl Into<String>, def: FieldDef) -> Self {
        self.fields.insert(name.into(), def);
        self
    }

    pub fn timestamps(mut self, enabled: bool) -> Self {
        self.timestamps = enabled;
        self
    }

    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn from_yaml(source: &str) -> Result<Self, SchemaError> {
        let schema: Schema = serde_yaml::from_str(source)?;
        schema.check()?;
        Ok(schema)
    }

    /// Names end up as table and index identifiers, so they are restricted.
    pub fn check(&self) -> Result<(), SchemaError> {
        if !is_identifier(&self.name) {
            return Err(SchemaError::InvalidName(self.name.clone()));
        }
        for (field, def) in &self.fields {
            if !is_identifier(field) || field == ID {
                return Err(SchemaError::InvalidField {
                    schema: self.name.clone(),
                    field: field.clone(),
                });
            }
            if def.field_type == FieldType::Reference && def.reference.is_none() {
                return Err(SchemaError::MissingReference {
                    schema: self.name.clone(),
                    field: field.clone(),
                });
            }
        }
        Ok(())
    }

    /// Introspect a field definition; dot paths resolve to their top-level field.
    pub fn path(&self, path: &str) -> Option<&FieldDef> {
        let top = path.split('.').next()?;
        self.fields.get(top)
    }

    /// Target resource of a reference field (or array of references)
    pub fn reference_target(&self, field: &str) -> Option<&str> {
        let def = self.fields.get(field)?;
        match def.field_type {
            FieldType::Reference | FieldType::Array | FieldType::Id => def.reference.as_deref(),
            _ => None,
        }
    }

    pub fn unique_fields(&self) -> Vec<String> {
        self.fields
            .iter()
            .filter(|(_, def)| def.unique)
            .map(|(name, _)| name.clone())
            .collect()
    }

    fn is_readonly(&self, field: &str) -> bool {
        if self.timestamps && (field == CREATED_AT || field == UPDATED_AT) {
            return true;
        }
        self.fields.get(field).is_some_and(|def| def.readonly)
    }

    /// Client write payload reduced to writable fields.
    ///
    /// Drops `id`, readonly fields and, for strict schemas, undeclared fields.
    pub fn sanitize(&self, payload: Document) -> Document {
        payload
            .into_iter()
            .filter(|(field, _)| {
                field != ID
                    && !self.is_readonly(field)
                    && (!self.strict || self.fields.contains_key(field))
            })
            .collect()
    }

    /// Outbound view of a stored document with protected fields removed
    pub fn serialize(&self, document: &Document) -> Document {
        document
            .iter()
            .filter(|(field, _)| !self.fields.get(*field).is_some_and(|def| def.protected))
            .map(|(field, value)| (field.clone(), value.clone()))
            .collect()
    }

    /// Copy readonly values (and the id) from an existing document
    pub fn preserve_readonly(&self, existing: &Document, next: &mut Document) {
        for (field, value) in existing {
            if field == ID || self.is_readonly(field) {
                next.insert(field.clone(), value.clone());
            }
        }
    }

    pub fn apply_defaults(&self, document: &mut Document) {
        for (field, def) in &self.fields {
            if let Some(default) = &def.default {
                if document.get(field).map_or(true, Value::is_null) {
                    document.insert(field.clone(), default.clone());
                }
            }
        }
    }

    /// Maintain `created_at`/`updated_at` when timestamps are enabled
    pub fn stamp(&self, document: &mut Document, created: bool) {
        if !self.timestamps {
            return;
        }
        let now = Value::String(chrono::Utc::now().to_rfc3339());
        if created {
            document.insert(CREATED_AT.to_string(), now.clone());
        }
        document.insert(UPDATED_AT.to_string(), now);
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn people() -> Schema {
        Schema::new("people")
            .field("name", FieldDef::new(FieldType::String).required())
            .field("password", FieldDef::new(FieldType::String).protected())
            .field("owner", FieldDef::new(FieldType::String).readonly())
            .field("friend", FieldDef::new(FieldType::Reference).reference("people"))
            .timestamps(true)
    }

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn sanitize_of_serialize_strips_protected_and_readonly() {
        let schema = people();
        let stored = doc(json!({
            "id": "x", "name": "bob", "password": "hunter2", "owner": "root",
            "created_at": "2024-01-01T00:00:00Z", "junk": 1
        }));

        let round = schema.sanitize(schema.serialize(&stored));
        assert_eq!(round, doc(json!({ "name": "bob" })));
    }

    #[test]
    fn loose_schema_keeps_unknown_fields() {
        let schema = people().strict(false);
        let clean = schema.sanitize(doc(json!({ "name": "bob", "junk": 1 })));
        assert_eq!(clean.get("junk"), Some(&json!(1)));
    }

    #[test]
    fn preserves_readonly_from_existing() {
        let schema = people();
        let existing = doc(json!({ "id": "x", "owner": "root", "name": "old" }));
        let mut next = doc(json!({ "name": "new" }));
        schema.preserve_readonly(&existing, &mut next);
        assert_eq!(next, doc(json!({ "name": "new", "id": "x", "owner": "root" })));
    }

    #[test]
    fn loads_yaml_and_checks_names() {
        let schema = Schema::from_yaml(
            "name: people\ntimestamps: true\nfields:\n  name: { type: string, required: true }\n  friend: { type: reference, ref: people }\n",
        )
        .unwrap();
        assert!(schema.timestamps);
        assert_eq!(schema.reference_target("friend"), Some("people"));
        assert_eq!(schema.path("name.first").unwrap().field_type, FieldType::String);

        assert!(matches!(
            Schema::from_yaml("name: \"drop table\"\n"),
            Err(SchemaError::InvalidName(_))
        ));
        assert!(matches!(
            Schema::from_yaml("name: people\nfields:\n  friend: { type: reference }\n"),
            Err(SchemaError::MissingReference { .. })
        ));
    }

    #[test]
    fn defaults_fill_missing_fields() {
        let schema = Schema::new("tasks").field(
            "status",
            FieldDef::new(FieldType::String).default_value("open"),
        );
        let mut task = doc(json!({}));
        schema.apply_defaults(&mut task);
        assert_eq!(task["status"], "open");
    }
}
