//! Filter trees to PostgreSQL predicates over a `jsonb` document column.
//!
//! Values are always bound as `$n` parameters. Field paths are validated by
//! the filter parser (`[A-Za-z0-9_.]`) before they reach this module, so
//! they are inlined as quoted jsonb keys.

use serde_json::Value;

use super::StoreError;
use crate::filter::{Clause, ElemMatch, Filter, FilterOp, Predicate, SortDirection, SortKey};

/// Bind parameter produced during translation
#[derive(Debug, Clone, PartialEq)]
pub enum SqlParam {
    Json(Value),
    Text(String),
    Int(i64),
}

pub struct SqlWhere {
    params: Vec<SqlParam>,
    param_index: usize,
    alias_index: usize,
}

impl SqlWhere {
    pub fn new(starting_param_index: usize) -> Self {
        Self {
            params: vec![],
            param_index: starting_param_index,
            alias_index: 0,
        }
    }

    /// WHERE body and bind parameters for `filter` over `column`
    pub fn generate(filter: &Filter, column: &str, starting_param_index: usize) -> Result<(String, Vec<SqlParam>), StoreError> {
        let mut sql_where = Self::new(starting_param_index);
        let sql = sql_where.filter_sql(filter, column)?;
        Ok((sql, sql_where.params))
    }

    fn filter_sql(&mut self, filter: &Filter, base: &str) -> Result<String, StoreError> {
        if filter.is_empty() {
            return Ok("TRUE".to_string());
        }
        let parts = filter
            .clauses
            .iter()
            .map(|clause| self.clause_sql(clause, base))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(join(parts, " AND "))
    }

    fn clause_sql(&mut self, clause: &Clause, base: &str) -> Result<String, StoreError> {
        match clause {
            Clause::Field { path, predicate } => {
                let field = JsonPath::new(base, path);
                match predicate {
                    Predicate::Eq(value) => Ok(self.eq_sql(&field, value)),
                    Predicate::Ops(ops) => {
                        let parts = ops
                            .iter()
                            .map(|op| self.op_sql(&field, op))
                            .collect::<Result<Vec<_>, _>>()?;
                        Ok(join(parts, " AND "))
                    }
                }
            }
            Clause::And(filters) => self.group_sql(filters, base, " AND ", "TRUE"),
            Clause::Or(filters) => self.group_sql(filters, base, " OR ", "FALSE"),
            Clause::Nor(filters) => {
                let any = self.group_sql(filters, base, " OR ", "FALSE")?;
                Ok(format!("NOT COALESCE({}, FALSE)", any))
            }
            Clause::Where(raw) => Ok(format!("({})", raw)),
        }
    }

    fn group_sql(&mut self, filters: &[Filter], base: &str, joiner: &str, empty: &str) -> Result<String, StoreError> {
        if filters.is_empty() {
            return Ok(empty.to_string());
        }
        let parts = filters
            .iter()
            .map(|f| self.filter_sql(f, base).map(|sql| format!("({})", sql)))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(format!("({})", parts.join(joiner)))
    }

    /// Equality that also matches arrays containing the value
    fn eq_sql(&mut self, field: &JsonPath, value: &Value) -> String {
        let json = field.json();
        if value.is_null() {
            return format!("({} IS NULL OR {} = 'null'::jsonb)", json, json);
        }
        let p = self.param(SqlParam::Json(value.clone()));
        format!(
            "COALESCE({json} = {p}::jsonb OR (jsonb_typeof({json}) = 'array' AND {json} @> jsonb_build_array({p}::jsonb)), FALSE)"
        )
    }

    fn compare_sql(&mut self, field: &JsonPath, op: &str, value: &Value) -> String {
        let json = field.json();
        let p = self.param(SqlParam::Json(value.clone()));
        format!(
            "COALESCE(jsonb_typeof({json}) = jsonb_typeof({p}::jsonb) AND {json} {op} {p}::jsonb, FALSE)"
        )
    }

    fn op_sql(&mut self, field: &JsonPath, op: &FilterOp) -> Result<String, StoreError> {
        let json = field.json();
        let sql = match op {
            FilterOp::Eq(value) => self.eq_sql(field, value),
            FilterOp::Ne(value) => format!("NOT {}", self.eq_sql(field, value)),
            FilterOp::Gt(value) => self.compare_sql(field, ">", value),
            FilterOp::Gte(value) => self.compare_sql(field, ">=", value),
            FilterOp::Lt(value) => self.compare_sql(field, "<", value),
            FilterOp::Lte(value) => self.compare_sql(field, "<=", value),
            FilterOp::In(values) => self.in_sql(field, values),
            FilterOp::Nin(values) => format!("NOT {}", self.in_sql(field, values)),
            FilterOp::All(values) => {
                if values.is_empty() {
                    return Ok("FALSE".to_string());
                }
                let p = self.param(SqlParam::Json(Value::Array(values.clone())));
                format!("COALESCE(jsonb_typeof({json}) = 'array' AND {json} @> {p}::jsonb, FALSE)")
            }
            FilterOp::Size(len) => {
                let p = self.param(SqlParam::Int(*len as i64));
                format!("(CASE WHEN jsonb_typeof({json}) = 'array' THEN jsonb_array_length({json}) = {p} ELSE FALSE END)")
            }
            FilterOp::Exists(expected) => {
                let exists = match field.parent_and_key() {
                    Some((parent, key)) => {
                        let p = self.param(SqlParam::Text(key.to_string()));
                        format!("COALESCE({} ? {}, FALSE)", parent, p)
                    }
                    None => format!("({} IS NOT NULL)", json),
                };
                if *expected {
                    exists
                } else {
                    format!("NOT {}", exists)
                }
            }
            FilterOp::Mod { divisor, remainder } => {
                let d = self.param(SqlParam::Int(*divisor));
                let r = self.param(SqlParam::Int(*remainder));
                format!(
                    "(CASE WHEN jsonb_typeof({json}) = 'number' THEN MOD(TRUNC(({text})::numeric), {d}) = {r} ELSE FALSE END)",
                    text = field.text()
                )
            }
            FilterOp::Regex(spec) => {
                let operator = if spec.has_flag('i') { "~*" } else { "~" };
                let mut embedded = String::new();
                if spec.has_flag('m') {
                    embedded.push('n');
                }
                if spec.has_flag('x') {
                    embedded.push('x');
                }
                let pattern = if embedded.is_empty() {
                    spec.pattern.clone()
                } else {
                    format!("(?{}){}", embedded, spec.pattern)
                };
                let p = self.param(SqlParam::Text(pattern));
                format!(
                    "(CASE WHEN jsonb_typeof({json}) = 'string' THEN ({text}) {operator} {p} ELSE FALSE END)",
                    text = field.text()
                )
            }
            FilterOp::ElemMatch(elem) => {
                self.alias_index += 1;
                let alias = format!("elem{}", self.alias_index);
                let element = format!("{}.value", alias);
                let condition = match elem {
                    ElemMatch::Document(filter) => self.filter_sql(filter, &element)?,
                    ElemMatch::Value(ops) => {
                        let element_path = JsonPath::element(&element);
                        let parts = ops
                            .iter()
                            .map(|op| self.op_sql(&element_path, op))
                            .collect::<Result<Vec<_>, _>>()?;
                        join(parts, " AND ")
                    }
                };
                format!(
                    "EXISTS (SELECT 1 FROM jsonb_array_elements(CASE WHEN jsonb_typeof({json}) = 'array' THEN {json} ELSE '[]'::jsonb END) AS {alias}(value) WHERE {condition})"
                )
            }
            FilterOp::Near(_) | FilterOp::NearSphere(_) | FilterOp::GeoWithin(_) | FilterOp::GeoIntersects(_) => {
                return Err(StoreError::Unsupported(format!(
                    "{} is not supported by the PostgreSQL store",
                    op.name()
                )))
            }
        };
        Ok(sql)
    }

    fn in_sql(&mut self, field: &JsonPath, values: &[Value]) -> String {
        if values.is_empty() {
            return "FALSE".to_string();
        }
        let parts: Vec<String> = values.iter().map(|v| self.eq_sql(field, v)).collect();
        format!("({})", parts.join(" OR "))
    }

    fn param(&mut self, value: SqlParam) -> String {
        self.params.push(value);
        self.param_index += 1;
        format!("${}", self.param_index)
    }
}

/// ORDER BY clause; documents without a sort fall back to insertion order.
pub fn order_by(sort: &[SortKey], column: &str) -> String {
    let mut parts: Vec<String> = sort
        .iter()
        .map(|key| {
            let nulls = match key.direction {
                SortDirection::Asc => "NULLS FIRST",
                SortDirection::Desc => "NULLS LAST",
            };
            format!("{} {} {}", JsonPath::new(column, &key.field).json(), key.direction.to_sql(), nulls)
        })
        .collect();
    parts.push("seq ASC".to_string());
    format!("ORDER BY {}", parts.join(", "))
}

pub fn limit_offset(limit: Option<u64>, skip: u64) -> String {
    let bigint = |n: u64| n.min(i64::MAX as u64);
    let skip = bigint(skip);
    match limit.map(bigint) {
        Some(limit) => format!("LIMIT {} OFFSET {}", limit, skip),
        None if skip > 0 => format!("OFFSET {}", skip),
        None => String::new(),
    }
}

fn join(parts: Vec<String>, joiner: &str) -> String {
    match parts.len() {
        0 => "TRUE".to_string(),
        1 => parts.into_iter().next().unwrap_or_default(),
        _ => format!("({})", parts.join(joiner)),
    }
}

/// jsonb accessor for a dot path below a base expression
struct JsonPath {
    base: String,
    segments: Vec<String>,
}

impl JsonPath {
    fn new(base: &str, path: &str) -> Self {
        Self {
            base: base.to_string(),
            segments: path.split('.').map(String::from).collect(),
        }
    }

    /// The array element itself, inside `$elemMatch`
    fn element(base: &str) -> Self {
        Self {
            base: base.to_string(),
            segments: Vec::new(),
        }
    }

    fn json(&self) -> String {
        if self.segments.is_empty() {
            return self.base.clone();
        }
        let mut out = self.base.clone();
        for segment in &self.segments {
            out.push_str(&Self::step(segment));
        }
        out
    }

    fn text(&self) -> String {
        format!("{} #>> '{{}}'", self.json())
    }

    fn parent_and_key(&self) -> Option<(String, &str)> {
        let (key, parents) = self.segments.split_last()?;
        let mut parent = self.base.clone();
        for segment in parents {
            parent.push_str(&Self::step(segment));
        }
        Some((parent, key.as_str()))
    }

    fn step(segment: &str) -> String {
        if !segment.is_empty() && segment.chars().all(|c| c.is_ascii_digit()) {
            format!("->{}", segment)
        } else {
            format!("->'{}'", segment)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{FilterOptions, FilterWhere};
    use serde_json::json;

    fn translate(filter: Value) -> Result<(String, Vec<SqlParam>), StoreError> {
        let filter = FilterWhere::new(FilterOptions {
            allow_raw_where: true,
            max_depth: 5,
        })
        .parse_value(&filter)
        .unwrap();
        SqlWhere::generate(&filter, "doc", 0)
    }

    #[test]
    fn empty_filter_matches_everything() {
        assert_eq!(translate(json!({})).unwrap(), ("TRUE".to_string(), vec![]));
    }

    #[test]
    fn equality_binds_json_params_in_order() {
        let (sql, params) = translate(json!({ "gender": "male", "address.city": "Oslo" })).unwrap();
        assert!(sql.contains("doc->'gender' = $1::jsonb"));
        assert!(sql.contains("doc->'address'->'city' = $2::jsonb"));
        assert_eq!(params, vec![SqlParam::Json(json!("male")), SqlParam::Json(json!("Oslo"))]);
    }

    #[test]
    fn logical_groups_nest() {
        let (sql, params) = translate(json!({ "$or": [{ "a": 1 }, { "b": { "$gt": 2 } }] })).unwrap();
        assert!(sql.contains(" OR "));
        assert_eq!(params.len(), 2);

        let (sql, _) = translate(json!({ "$nor": [{ "a": 1 }] })).unwrap();
        assert!(sql.starts_with("NOT COALESCE("));
    }

    #[test]
    fn regex_flags_map_to_postgres_operators() {
        let (sql, params) = translate(json!({ "name": { "$regex": "/^bo/i" } })).unwrap();
        assert!(sql.contains("~* $1"));
        assert_eq!(params, vec![SqlParam::Text("^bo".to_string())]);

        let (_, params) = translate(json!({ "name": { "$regex": "/^bo/m" } })).unwrap();
        assert_eq!(params, vec![SqlParam::Text("(?n)^bo".to_string())]);
    }

    #[test]
    fn exists_size_and_elem_match() {
        let (sql, params) = translate(json!({ "address.zip": { "$exists": true } })).unwrap();
        assert_eq!(sql, "COALESCE(doc->'address' ? $1, FALSE)");
        assert_eq!(params, vec![SqlParam::Text("zip".to_string())]);

        let (sql, params) = translate(json!({ "tags": { "$size": 2 } })).unwrap();
        assert!(sql.contains("jsonb_array_length(doc->'tags') = $1"));
        assert_eq!(params, vec![SqlParam::Int(2)]);

        let (sql, _) = translate(json!({ "pets": { "$elemMatch": { "kind": "cat" } } })).unwrap();
        assert!(sql.contains("AS elem1(value) WHERE"));
        assert!(sql.contains("elem1.value->'kind'"));
    }

    #[test]
    fn raw_where_passes_through_and_geo_is_refused() {
        let (sql, params) = translate(json!({ "$where": "doc->>'a' = 'b'" })).unwrap();
        assert_eq!(sql, "(doc->>'a' = 'b')");
        assert!(params.is_empty());

        let err = translate(json!({ "loc": { "$near": [0, 0] } })).unwrap_err();
        assert!(matches!(err, StoreError::Unsupported(_)));
    }

    #[test]
    fn order_by_falls_back_to_insertion_order() {
        assert_eq!(order_by(&[], "doc"), "ORDER BY seq ASC");
        assert_eq!(
            order_by(&[SortKey::desc("age")], "doc"),
            "ORDER BY doc->'age' DESC NULLS LAST, seq ASC"
        );
        assert_eq!(limit_offset(Some(2), 4), "LIMIT 2 OFFSET 4");
        assert_eq!(limit_offset(None, 0), "");
        assert_eq!(
            limit_offset(Some(u64::MAX), u64::MAX),
            "LIMIT 9223372036854775807 OFFSET 9223372036854775807"
        );
    }
}
