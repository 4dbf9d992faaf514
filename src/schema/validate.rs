use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

use super::{FieldDef, FieldType, Schema};
use crate::store::Document;

/// Write payload rejected by its schema; one message per failing field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    schema: String,
    errors: BTreeMap<String, String>,
}

impl ValidationError {
    pub fn field_errors(&self) -> &BTreeMap<String, String> {
        &self.errors
    }

    pub fn into_field_errors(self) -> BTreeMap<String, String> {
        self.errors
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} validation failed: ", self.schema)?;
        let parts: Vec<String> = self
            .errors
            .iter()
            .map(|(field, msg)| format!("{}: {}", field, msg))
            .collect();
        f.write_str(&parts.join(", "))
    }
}

impl std::error::Error for ValidationError {}

impl Schema {
    /// Check a complete document (after defaults) against the field rules.
    pub fn validate(&self, document: &Document) -> Result<(), ValidationError> {
        let mut errors = BTreeMap::new();

        for (field, def) in &self.fields {
            let value = document.get(field).filter(|v| !v.is_null());
            match value {
                None if def.required => {
                    errors.insert(field.clone(), format!("Path `{}` is required.", field));
                }
                None => {}
                Some(value) => {
                    if let Err(msg) = check_field(field, def, value) {
                        errors.insert(field.clone(), msg);
                    }
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationError {
                schema: self.name.clone(),
                errors,
            })
        }
    }
}

fn check_field(field: &str, def: &FieldDef, value: &Value) -> Result<(), String> {
    if !type_matches(def, value) {
        return Err(format!(
            "Cast to {:?} failed for value {} at path `{}`",
            def.field_type, value, field
        ));
    }

    if let Some(allowed) = &def.enum_values {
        if !allowed.contains(value) {
            return Err(format!(
                "{} is not a valid enum value for path `{}`.",
                value, field
            ));
        }
    }

    Ok(())
}

fn type_matches(def: &FieldDef, value: &Value) -> bool {
    match def.field_type {
        FieldType::String => value.is_string(),
        FieldType::Number => value.is_number(),
        FieldType::Integer => is_integer(value),
        FieldType::Boolean => value.is_boolean(),
        FieldType::Date => is_date(value),
        FieldType::Id | FieldType::Reference => is_id(value),
        FieldType::Array => match value.as_array() {
            // Arrays with a ref hold ids of the referenced resource
            Some(items) if def.reference.is_some() => items.iter().all(is_id),
            Some(_) => true,
            None => false,
        },
        FieldType::Object => value.is_object(),
        FieldType::Mixed => true,
    }
}

fn is_integer(value: &Value) -> bool {
    match value {
        Value::Number(n) => n.is_i64() || n.is_u64() || n.as_f64().is_some_and(|f| f.fract() == 0.0),
        _ => false,
    }
}

fn is_id(value: &Value) -> bool {
    value
        .as_str()
        .is_some_and(|s| uuid::Uuid::parse_str(s).is_ok())
}

fn is_date(value: &Value) -> bool {
    match value {
        Value::String(s) => {
            chrono::DateTime::parse_from_rfc3339(s).is_ok()
                || chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok()
        }
        // Epoch milliseconds
        Value::Number(n) => n.is_i64() || n.is_u64(),
        _ => false,
    }
}
