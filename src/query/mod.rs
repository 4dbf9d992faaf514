//! Query-string options to store queries.
//!
//! `offset`, `limit`, `sort`, `fields`, `populate` and `filter` are parsed
//! once per request into [`QueryOptions`]; the list pipeline then derives
//! one [`Query`] per page from it.

use std::collections::HashMap;

use crate::config::QueryConfig;
use crate::filter::{Filter, FilterError, FilterOptions, FilterOrder, FilterWhere, SortKey};
use crate::store::{Document, ID};

#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("Invalid offset: {0}")]
    InvalidOffset(String),

    #[error("Invalid limit: {0}")]
    InvalidLimit(String),

    #[error("Invalid fields: {0}")]
    InvalidProjection(String),

    #[error("Invalid populate: {0}")]
    InvalidPopulate(String),

    #[error(transparent)]
    Filter(#[from] FilterError),
}

/// Field projection from `fields=a,b` (include) or `fields=-a,-b` (exclude)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Projection {
    pub include: bool,
    pub fields: Vec<String>,
}

impl Projection {
    pub fn parse(source: &str) -> Result<Option<Self>, QueryError> {
        let tokens: Vec<&str> = source
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|t| !t.is_empty())
            .collect();
        if tokens.is_empty() {
            return Ok(None);
        }

        let excluded = tokens.iter().filter(|t| t.starts_with('-')).count();
        if excluded != 0 && excluded != tokens.len() {
            return Err(QueryError::InvalidProjection(
                "cannot mix included and excluded fields".to_string(),
            ));
        }

        let fields = tokens
            .iter()
            .map(|t| {
                let field = t.trim_start_matches('-');
                crate::filter::filter_where::validate_field(field)?;
                Ok(field.to_string())
            })
            .collect::<Result<Vec<_>, FilterError>>()?;

        Ok(Some(Self {
            include: excluded == 0,
            fields,
        }))
    }

    /// Apply to a top-level document; `id` always survives.
    pub fn apply(&self, document: Document) -> Document {
        let listed = |key: &str| {
            self.fields
                .iter()
                .any(|f| f.split('.').next() == Some(key))
        };
        document
            .into_iter()
            .filter(|(key, _)| key == ID || listed(key) == self.include)
            .collect()
    }
}

/// What the store executes: one page of filtered, sorted documents
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    pub filter: Filter,
    pub sort: Vec<SortKey>,
    pub skip: u64,
    pub limit: Option<u64>,
    pub projection: Option<Projection>,
}

impl Query {
    pub fn filter(filter: Filter) -> Self {
        Self {
            filter,
            ..Self::default()
        }
    }
}

/// Largest offset a store can address (PostgreSQL `bigint`)
pub const MAX_OFFSET: u64 = i64::MAX as u64;

#[derive(Debug, Clone, PartialEq)]
pub struct QueryOptions {
    pub offset: u64,
    pub limit: u64,
    pub sort: Vec<SortKey>,
    pub projection: Option<Projection>,
    pub populate: Vec<String>,
    pub filter: Filter,
}

impl QueryOptions {
    pub fn from_params(params: &HashMap<String, String>, config: &QueryConfig) -> Result<Self, QueryError> {
        let offset = match params.get("offset").map(|s| s.trim()) {
            None | Some("") => 0,
            Some(raw) => match raw.parse::<u64>() {
                Ok(n) if n <= MAX_OFFSET => n,
                Ok(_) => return Err(QueryError::InvalidOffset(format!("{} exceeds {}", raw, MAX_OFFSET))),
                Err(_) => {
                    return Err(QueryError::InvalidOffset(format!("{} is not a non-negative integer", raw)))
                }
            },
        };

        let mut limit = match params.get("limit").map(|s| s.trim()) {
            None | Some("") => config.default_limit,
            Some(raw) => match raw.parse::<u64>() {
                Ok(n) if n > 0 => n,
                _ => return Err(QueryError::InvalidLimit(format!("{} is not a positive integer", raw))),
            },
        };
        if let Some(max) = config.max_limit {
            if limit > max {
                tracing::debug!("Capping limit {} at {}", limit, max);
                limit = max;
            }
        }

        let sort = match params.get("sort").filter(|s| !s.trim().is_empty()) {
            Some(raw) => FilterOrder::parse(raw)?,
            None => Vec::new(),
        };

        let projection = match params.get("fields") {
            Some(raw) => Projection::parse(raw)?,
            None => None,
        };

        let populate = match params.get("populate") {
            Some(raw) => parse_populate(raw)?,
            None => Vec::new(),
        };

        let filter = match params.get("filter").filter(|s| !s.trim().is_empty()) {
            Some(raw) => {
                let options = FilterOptions {
                    allow_raw_where: config.allow_raw_where,
                    max_depth: config.max_nested_depth,
                };
                let filter = FilterWhere::parse(raw, options)?;
                if config.debug_logging {
                    tracing::debug!("Parsed filter {} into {:?}", raw, filter);
                }
                filter
            }
            None => Filter::all(),
        };

        Ok(Self {
            offset,
            limit,
            sort,
            projection,
            populate,
            filter,
        })
    }

    /// Page `n` of the list read: `skip = offset + n * limit`.
    ///
    /// Pages come back whole; the projection is applied after authorization
    /// and populate have seen every field.
    pub fn page(&self, page: u64) -> Query {
        Query {
            filter: self.filter.clone(),
            sort: self.sort.clone(),
            skip: self.offset.saturating_add(page.saturating_mul(self.limit)),
            limit: Some(self.limit),
            projection: None,
        }
    }

    /// Every match, unpaged and unprojected, for bulk writes
    pub fn unbounded(&self) -> Query {
        Query {
            filter: self.filter.clone(),
            sort: self.sort.clone(),
            skip: 0,
            limit: None,
            projection: None,
        }
    }
}

fn parse_populate(raw: &str) -> Result<Vec<String>, QueryError> {
    raw.split(|c: char| c == ',' || c.is_whitespace())
        .filter(|t| !t.is_empty())
        .map(|field| {
            if field.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                Ok(field.to_string())
            } else {
                Err(QueryError::InvalidPopulate(field.to_string()))
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::filter::Clause;
    use serde_json::json;

    fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    fn parse(pairs: &[(&str, &str)]) -> Result<QueryOptions, QueryError> {
        QueryOptions::from_params(&params(pairs), &AppConfig::development().query)
    }

    #[test]
    fn defaults_when_absent() {
        let options = parse(&[]).unwrap();
        assert_eq!(options.offset, 0);
        assert_eq!(options.limit, 10);
        assert!(options.filter.is_empty());
        assert!(options.projection.is_none());
    }

    #[test]
    fn limit_must_be_positive_and_is_capped() {
        assert!(matches!(parse(&[("limit", "0")]), Err(QueryError::InvalidLimit(_))));
        assert!(matches!(parse(&[("limit", "ten")]), Err(QueryError::InvalidLimit(_))));
        assert!(matches!(parse(&[("offset", "-1")]), Err(QueryError::InvalidOffset(_))));
        assert_eq!(parse(&[("limit", "5000")]).unwrap().limit, 1000);
    }

    #[test]
    fn pages_advance_by_limit_from_offset() {
        let options = parse(&[("limit", "2"), ("offset", "3")]).unwrap();
        assert_eq!(options.page(0).skip, 3);
        assert_eq!(options.page(2).skip, 7);
        assert_eq!(options.page(2).limit, Some(2));
    }

    #[test]
    fn offset_must_fit_a_bigint() {
        let max = MAX_OFFSET.to_string();
        assert_eq!(parse(&[("offset", max.as_str())]).unwrap().offset, MAX_OFFSET);
        assert!(matches!(
            parse(&[("offset", "18446744073709551615")]),
            Err(QueryError::InvalidOffset(_))
        ));
        assert!(matches!(
            parse(&[("offset", "9223372036854775808")]),
            Err(QueryError::InvalidOffset(_))
        ));
    }

    #[test]
    fn pages_never_carry_the_projection() {
        let options = parse(&[("fields", "name")]).unwrap();
        assert!(options.projection.is_some());
        assert_eq!(options.page(0).projection, None);
        assert_eq!(options.page(3).projection, None);
    }

    #[test]
    fn projection_include_exclude_and_mixed() {
        let include = Projection::parse("name,age").unwrap().unwrap();
        assert!(include.include);
        let doc = json!({ "id": "1", "name": "a", "age": 3, "secret": true });
        let projected = include.apply(doc.as_object().cloned().unwrap());
        assert_eq!(json!(projected), json!({ "id": "1", "name": "a", "age": 3 }));

        let exclude = Projection::parse("-secret").unwrap().unwrap();
        let projected = exclude.apply(doc.as_object().cloned().unwrap());
        assert_eq!(json!(projected), json!({ "id": "1", "name": "a", "age": 3 }));

        assert!(matches!(parse(&[("fields", "name,-age")]), Err(QueryError::InvalidProjection(_))));
    }

    #[test]
    fn filter_errors_surface_as_query_errors() {
        assert!(matches!(parse(&[("filter", "{oops")]), Err(QueryError::Filter(_))));
        let options = parse(&[("filter", r#"{"gender":"male"}"#), ("sort", "-age"), ("populate", "friend")]).unwrap();
        assert!(matches!(options.filter.clauses[0], Clause::Field { .. }));
        assert_eq!(options.sort, vec![SortKey::desc("age")]);
        assert_eq!(options.populate, vec!["friend".to_string()]);
    }
}
