use serde_json::Value;

use super::error::FilterError;
use super::filter_where::validate_field;
use super::types::{SortDirection, SortKey};

pub struct FilterOrder;

impl FilterOrder {
    /// Parse `?sort=`: `"a,-b"`, `"a -b"`, `"a desc, b"` or JSON `{"a": 1, "b": -1}`.
    pub fn parse(source: &str) -> Result<Vec<SortKey>, FilterError> {
        let trimmed = source.trim();
        if trimmed.starts_with('{') {
            let value: Value = serde_json::from_str(trimmed)?;
            Self::parse_value(&value)
        } else {
            Self::parse_order_string(trimmed)
        }
    }

    pub fn parse_value(order: &Value) -> Result<Vec<SortKey>, FilterError> {
        match order {
            Value::String(s) => Self::parse_order_string(s),
            Value::Object(obj) => {
                // { "created_at": -1, "name": "asc" }
                let mut out = Vec::with_capacity(obj.len());
                for (field, dir) in obj {
                    validate_field(field)?;
                    let direction = match dir {
                        Value::Number(n) if n.as_f64().is_some_and(|f| f > 0.0) => SortDirection::Asc,
                        Value::Number(n) if n.as_f64().is_some_and(|f| f < 0.0) => SortDirection::Desc,
                        Value::String(s) => parse_direction(s)
                            .ok_or_else(|| FilterError::InvalidSort(format!("{}: {}", field, s)))?,
                        other => return Err(FilterError::InvalidSort(format!("{}: {}", field, other))),
                    };
                    out.push(SortKey {
                        field: field.clone(),
                        direction,
                    });
                }
                Ok(out)
            }
            other => Err(FilterError::InvalidSort(other.to_string())),
        }
    }

    fn parse_order_string(s: &str) -> Result<Vec<SortKey>, FilterError> {
        let tokens: Vec<&str> = s
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|t| !t.is_empty())
            .collect();

        let mut out: Vec<SortKey> = Vec::with_capacity(tokens.len());
        for token in tokens {
            // A direction word applies to the field before it
            if let Some(direction) = parse_direction(token) {
                let last = out
                    .last_mut()
                    .ok_or_else(|| FilterError::InvalidSort(format!("{} without a field", token)))?;
                last.direction = direction;
                continue;
            }

            let (field, direction) = match token.strip_prefix('-') {
                Some(field) => (field, SortDirection::Desc),
                None => (token.strip_prefix('+').unwrap_or(token), SortDirection::Asc),
            };
            validate_field(field)?;
            out.push(SortKey {
                field: field.to_string(),
                direction,
            });
        }
        Ok(out)
    }
}

fn parse_direction(word: &str) -> Option<SortDirection> {
    match word.to_ascii_lowercase().as_str() {
        "asc" | "ascending" => Some(SortDirection::Asc),
        "desc" | "descending" => Some(SortDirection::Desc),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_all_string_forms() {
        let expected = vec![SortKey::asc("a"), SortKey::desc("b")];
        assert_eq!(FilterOrder::parse("a,-b").unwrap(), expected);
        assert_eq!(FilterOrder::parse("a -b").unwrap(), expected);
        assert_eq!(FilterOrder::parse("a asc, b desc").unwrap(), expected);
        assert_eq!(FilterOrder::parse("a desc").unwrap(), vec![SortKey::desc("a")]);
    }

    #[test]
    fn parses_json_object_in_key_order() {
        assert_eq!(
            FilterOrder::parse(r#"{"name": 1, "age": -1}"#).unwrap(),
            vec![SortKey::asc("name"), SortKey::desc("age")]
        );
        assert!(FilterOrder::parse(r#"{"name": true}"#).is_err());
    }

    #[test]
    fn rejects_dangling_direction_and_bad_fields() {
        assert!(matches!(FilterOrder::parse("desc"), Err(FilterError::InvalidSort(_))));
        assert!(matches!(FilterOrder::parse("na;me"), Err(FilterError::InvalidField(_))));
    }
}
