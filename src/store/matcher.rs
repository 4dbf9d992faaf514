//! In-process evaluation of filter trees against documents.

use serde_json::Value;
use std::cmp::Ordering;

use super::geo;
use super::{Document, StoreError};
use crate::filter::{Clause, ElemMatch, Filter, FilterOp, Predicate, SortDirection, SortKey};

/// Whether `document` satisfies every clause of `filter`
pub fn matches(filter: &Filter, document: &Document) -> Result<bool, StoreError> {
    for clause in &filter.clauses {
        if !matches_clause(clause, document)? {
            return Ok(false);
        }
    }
    Ok(true)
}

fn matches_clause(clause: &Clause, document: &Document) -> Result<bool, StoreError> {
    match clause {
        Clause::Field { path, predicate } => {
            let value = lookup(document, path);
            match predicate {
                Predicate::Eq(expected) => Ok(field_eq(value, expected)),
                Predicate::Ops(ops) => all_ops(ops, value),
            }
        }
        Clause::And(filters) => {
            for filter in filters {
                if !matches(filter, document)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        Clause::Or(filters) => any_filter(filters, document),
        Clause::Nor(filters) => Ok(!any_filter(filters, document)?),
        Clause::Where(_) => Err(StoreError::Unsupported(
            "$where is not supported by the memory store".to_string(),
        )),
    }
}

fn any_filter(filters: &[Filter], document: &Document) -> Result<bool, StoreError> {
    for filter in filters {
        if matches(filter, document)? {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Resolve a dot path; numeric segments index into arrays
pub fn lookup<'a>(document: &'a Document, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let mut current = document.get(segments.next()?)?;
    for segment in segments {
        current = match current {
            Value::Object(obj) => obj.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

fn all_ops(ops: &[FilterOp], value: Option<&Value>) -> Result<bool, StoreError> {
    for op in ops {
        if !eval_op(op, value)? {
            return Ok(false);
        }
    }
    Ok(true)
}

fn eval_op(op: &FilterOp, value: Option<&Value>) -> Result<bool, StoreError> {
    let result = match op {
        FilterOp::Eq(expected) => field_eq(value, expected),
        FilterOp::Ne(expected) => !field_eq(value, expected),
        FilterOp::Gt(bound) => any_scalar(value, |v| compare(v, bound) == Some(Ordering::Greater)),
        FilterOp::Gte(bound) => any_scalar(value, |v| {
            matches!(compare(v, bound), Some(Ordering::Greater | Ordering::Equal))
        }),
        FilterOp::Lt(bound) => any_scalar(value, |v| compare(v, bound) == Some(Ordering::Less)),
        FilterOp::Lte(bound) => any_scalar(value, |v| {
            matches!(compare(v, bound), Some(Ordering::Less | Ordering::Equal))
        }),
        FilterOp::In(candidates) => candidates.iter().any(|c| field_eq(value, c)),
        FilterOp::Nin(candidates) => !candidates.iter().any(|c| field_eq(value, c)),
        FilterOp::All(required) => match value {
            Some(Value::Array(items)) if !required.is_empty() => required
                .iter()
                .all(|r| items.iter().any(|item| values_eq(item, r))),
            _ => false,
        },
        FilterOp::Size(len) => matches!(value, Some(Value::Array(items)) if items.len() as u64 == *len),
        FilterOp::Exists(expected) => value.is_some() == *expected,
        FilterOp::Mod { divisor, remainder } => any_scalar(value, |v| {
            v.as_f64()
                // i64::MIN % -1 overflows; mathematically it is 0
                .map(|f| (f.trunc() as i64).checked_rem(*divisor).unwrap_or(0) == *remainder)
                .unwrap_or(false)
        }),
        FilterOp::Regex(spec) => any_scalar(value, |v| v.as_str().is_some_and(|s| spec.is_match(s))),
        FilterOp::ElemMatch(elem) => {
            let Some(Value::Array(items)) = value else {
                return Ok(false);
            };
            for item in items {
                let hit = match (elem, item) {
                    (ElemMatch::Document(filter), Value::Object(obj)) => matches(filter, obj)?,
                    (ElemMatch::Document(_), _) => false,
                    (ElemMatch::Value(ops), item) => all_ops(ops, Some(item))?,
                };
                if hit {
                    return Ok(true);
                }
            }
            false
        }
        FilterOp::Near(query) => location(value).is_some_and(|p| geo::near_matches(query, false, p)),
        FilterOp::NearSphere(query) => location(value).is_some_and(|p| geo::near_matches(query, true, p)),
        FilterOp::GeoWithin(shape) => location(value).is_some_and(|p| geo::within(shape, p)),
        FilterOp::GeoIntersects(geometry) => location(value).is_some_and(|p| geo::intersects(geometry, p)),
    };
    Ok(result)
}

fn location(value: Option<&Value>) -> Option<crate::filter::Point> {
    value.and_then(geo::extract_point)
}

/// Equality with array membership: `{tags: "a"}` matches `tags: ["a", "b"]`.
/// A null expectation also matches a missing field.
fn field_eq(value: Option<&Value>, expected: &Value) -> bool {
    match value {
        None => expected.is_null(),
        Some(actual) => {
            values_eq(actual, expected)
                || matches!(actual, Value::Array(items) if items.iter().any(|i| values_eq(i, expected)))
        }
    }
}

/// Apply a scalar test to a value, or to any element of an array value
fn any_scalar(value: Option<&Value>, test: impl Fn(&Value) -> bool) -> bool {
    match value {
        None => false,
        Some(Value::Array(items)) => items.iter().any(&test),
        Some(v) => test(v),
    }
}

/// JSON equality with numbers compared by value (`1 == 1.0`)
pub fn values_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        (Value::Array(xs), Value::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| values_eq(x, y))
        }
        (Value::Object(xs), Value::Object(ys)) => {
            xs.len() == ys.len()
                && xs
                    .iter()
                    .all(|(k, x)| ys.get(k).is_some_and(|y| values_eq(x, y)))
        }
        _ => a == b,
    }
}

/// Ordering between two values of the same kind; `None` across kinds
pub fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

/// Total order for sorting: missing/null, numbers, strings, objects, arrays, booleans
fn sort_order(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    fn rank(v: Option<&Value>) -> u8 {
        match v {
            None | Some(Value::Null) => 0,
            Some(Value::Number(_)) => 1,
            Some(Value::String(_)) => 2,
            Some(Value::Object(_)) => 3,
            Some(Value::Array(_)) => 4,
            Some(Value::Bool(_)) => 5,
        }
    }

    match (a, b) {
        (Some(x), Some(y)) => compare(x, y).unwrap_or_else(|| rank(a).cmp(&rank(b))),
        _ => rank(a).cmp(&rank(b)),
    }
}

/// Stable multi-key sort
pub fn sort_documents(documents: &mut [Document], keys: &[SortKey]) {
    if keys.is_empty() {
        return;
    }
    documents.sort_by(|a, b| {
        for key in keys {
            let ord = sort_order(lookup(a, &key.field), lookup(b, &key.field));
            let ord = match key.direction {
                SortDirection::Asc => ord,
                SortDirection::Desc => ord.reverse(),
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{FilterOptions, FilterWhere};
    use serde_json::json;

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    fn check(filter: Value, document: &Document) -> bool {
        let filter = FilterWhere::new(FilterOptions::default()).parse_value(&filter).unwrap();
        matches(&filter, document).unwrap()
    }

    fn person() -> Document {
        doc(json!({
            "name": "Bob",
            "age": 42,
            "tags": ["admin", "staff"],
            "scores": [71, 88, 93],
            "pets": [{ "kind": "cat", "age": 3 }, { "kind": "dog", "age": 9 }],
            "address": { "city": "Oslo", "zip": "0150" },
            "home": { "type": "Point", "coordinates": [10.75, 59.91] },
            "spot": [2, 2]
        }))
    }

    #[test]
    fn equality_covers_scalars_arrays_and_paths() {
        let p = person();
        assert!(check(json!({ "name": "Bob" }), &p));
        assert!(check(json!({ "tags": "staff" }), &p));
        assert!(check(json!({ "address.city": "Oslo" }), &p));
        assert!(check(json!({ "pets.1.kind": "dog" }), &p));
        assert!(check(json!({ "age": 42.0 }), &p));
        assert!(check(json!({ "missing": null }), &p));
        assert!(!check(json!({ "name": "bob" }), &p));
    }

    #[test]
    fn comparisons_stay_within_a_type() {
        let p = person();
        assert!(check(json!({ "age": { "$gt": 40, "$lte": 42 } }), &p));
        assert!(!check(json!({ "age": { "$gt": "40" } }), &p));
        assert!(check(json!({ "scores": { "$gt": 90 } }), &p));
        assert!(!check(json!({ "missing": { "$lt": 1 } }), &p));
    }

    #[test]
    fn set_operators() {
        let p = person();
        assert!(check(json!({ "name": { "$in": ["Al", "Bob"] } }), &p));
        assert!(check(json!({ "name": { "$nin": ["Al"] } }), &p));
        assert!(check(json!({ "tags": { "$all": ["staff", "admin"] } }), &p));
        assert!(!check(json!({ "tags": { "$all": ["staff", "root"] } }), &p));
        assert!(check(json!({ "tags": { "$size": 2 } }), &p));
        assert!(check(json!({ "name": { "$ne": "Al" } }), &p));
    }

    #[test]
    fn exists_mod_and_regex() {
        let p = person();
        assert!(check(json!({ "age": { "$exists": true } }), &p));
        assert!(check(json!({ "nope": { "$exists": false } }), &p));
        assert!(check(json!({ "age": { "$mod": [5, 2] } }), &p));
        assert!(check(json!({ "name": { "$regex": "/^b/i" } }), &p));
        assert!(!check(json!({ "name": { "$regex": "^b" } }), &p));
        assert!(check(json!({ "tags": { "$regex": "^adm" } }), &p));
    }

    #[test]
    fn mod_by_minus_one_at_the_integer_floor() {
        let floor = doc(json!({ "age": i64::MIN }));
        assert!(check(json!({ "age": { "$mod": [-1, 0] } }), &floor));
        assert!(!check(json!({ "age": { "$mod": [-1, 1] } }), &floor));

        let beyond = doc(json!({ "age": -1.0e19 }));
        assert!(check(json!({ "age": { "$mod": [-1, 0] } }), &beyond));
    }

    #[test]
    fn elem_match_on_documents_and_scalars() {
        let p = person();
        assert!(check(json!({ "pets": { "$elemMatch": { "kind": "dog", "age": { "$gt": 5 } } } }), &p));
        assert!(!check(json!({ "pets": { "$elemMatch": { "kind": "cat", "age": { "$gt": 5 } } } }), &p));
        assert!(check(json!({ "scores": { "$elemMatch": { "$gte": 80, "$lt": 90 } } }), &p));
    }

    #[test]
    fn logical_clauses() {
        let p = person();
        assert!(check(json!({ "$or": [{ "name": "Al" }, { "age": 42 }] }), &p));
        assert!(!check(json!({ "$nor": [{ "name": "Al" }, { "age": 42 }] }), &p));
        assert!(check(json!({ "$and": [{ "name": "Bob" }, { "age": 42 }] }), &p));
    }

    #[test]
    fn geo_operators() {
        let p = person();
        assert!(check(json!({ "spot": { "$near": [0, 0], "$maxDistance": 3 } }), &p));
        assert!(check(json!({ "spot": { "$geoWithin": { "$box": [[0, 0], [3, 3]] } } }), &p));
        assert!(check(json!({ "spot": { "$geoWithin": { "$center": [[0, 0], 3] } } }), &p));
        assert!(!check(json!({ "spot": { "$geoWithin": { "$polygon": [[3, 3], [5, 3], [5, 5]] } } }), &p));
        assert!(check(json!({
            "home": { "$nearSphere": { "$geometry": { "type": "Point", "coordinates": [5.32, 60.39] }, "$maxDistance": 320000 } }
        }), &p));
        assert!(check(json!({
            "spot": { "$geoIntersects": { "$geometry": { "type": "Point", "coordinates": [2, 2] } } }
        }), &p));
    }

    #[test]
    fn where_is_rejected() {
        let filter = FilterWhere::new(FilterOptions { allow_raw_where: true, max_depth: 4 })
            .parse_value(&json!({ "$where": "true" }))
            .unwrap();
        assert!(matches!(matches(&filter, &person()), Err(StoreError::Unsupported(_))));
    }

    #[test]
    fn sorts_by_multiple_keys_with_missing_first() {
        let mut docs = vec![
            doc(json!({ "n": 1, "a": 2 })),
            doc(json!({ "n": 2, "a": 1 })),
            doc(json!({ "n": 3 })),
            doc(json!({ "n": 4, "a": 2 })),
        ];
        sort_documents(&mut docs, &[SortKey::asc("a"), SortKey::desc("n")]);
        let order: Vec<i64> = docs.iter().map(|d| d["n"].as_i64().unwrap()).collect();
        assert_eq!(order, vec![3, 2, 4, 1]);
    }
}
