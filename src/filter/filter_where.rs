use serde_json::{Map, Value};

use super::error::FilterError;
use super::types::{
    Clause, ElemMatch, Filter, FilterOp, FilterOptions, GeoShape, Geometry, NearQuery, Point,
    Predicate, RegexSpec,
};

/// Parser for the JSON filter language carried in `?filter=`.
pub struct FilterWhere {
    options: FilterOptions,
}

impl FilterWhere {
    pub fn new(options: FilterOptions) -> Self {
        Self { options }
    }

    /// Parse the raw query-string value
    pub fn parse(source: &str, options: FilterOptions) -> Result<Filter, FilterError> {
        let value: Value = serde_json::from_str(source)?;
        Self::new(options).parse_value(&value)
    }

    pub fn parse_value(&self, value: &Value) -> Result<Filter, FilterError> {
        self.parse_filter(value, 0)
    }

    fn parse_filter(&self, value: &Value, depth: u32) -> Result<Filter, FilterError> {
        if depth > self.options.max_depth {
            return Err(FilterError::TooDeep(self.options.max_depth));
        }

        let obj = value.as_object().ok_or_else(|| {
            FilterError::InvalidWhereClause("filter must be a JSON object".to_string())
        })?;

        let mut clauses = Vec::with_capacity(obj.len());
        for (key, value) in obj {
            let clause = if key.starts_with('$') {
                self.parse_logical_operator(key, value, depth)?
            } else {
                validate_field(key)?;
                Clause::Field {
                    path: key.clone(),
                    predicate: self.parse_predicate(value, depth)?,
                }
            };
            clauses.push(clause);
        }
        Ok(Filter::new(clauses))
    }

    fn parse_logical_operator(&self, op: &str, value: &Value, depth: u32) -> Result<Clause, FilterError> {
        match op {
            "$and" | "$or" | "$nor" => {
                let arr = value.as_array().ok_or_else(|| {
                    FilterError::InvalidOperatorData(format!("{} requires an array", op))
                })?;
                let filters = arr
                    .iter()
                    .map(|v| self.parse_filter(v, depth + 1))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(match op {
                    "$and" => Clause::And(filters),
                    "$or" => Clause::Or(filters),
                    _ => Clause::Nor(filters),
                })
            }
            "$where" => {
                let predicate = value.as_str().ok_or_else(|| {
                    FilterError::InvalidOperatorData("$where requires a string".to_string())
                })?;
                if !self.options.allow_raw_where {
                    return Err(FilterError::RawWhereDisabled);
                }
                tracing::warn!("Raw $where predicate used: {}", predicate);
                Ok(Clause::Where(predicate.to_string()))
            }
            _ => Err(FilterError::UnsupportedOperator(op.to_string())),
        }
    }

    fn parse_predicate(&self, value: &Value, depth: u32) -> Result<Predicate, FilterError> {
        match value {
            Value::Object(obj) if is_operator_object(obj)? => {
                Ok(Predicate::Ops(self.parse_operators(obj, depth)?))
            }
            // Implicit equality: { field: value }
            _ => Ok(Predicate::Eq(value.clone())),
        }
    }

    fn parse_operators(&self, obj: &Map<String, Value>, depth: u32) -> Result<Vec<FilterOp>, FilterError> {
        let mut ops = Vec::with_capacity(obj.len());
        let mut regex_options: Option<&str> = None;
        let mut max_distance = None;
        let mut min_distance = None;

        for (key, data) in obj {
            let op = match key.as_str() {
                "$eq" => FilterOp::Eq(data.clone()),
                "$ne" => FilterOp::Ne(data.clone()),
                "$gt" => FilterOp::Gt(data.clone()),
                "$gte" => FilterOp::Gte(data.clone()),
                "$lt" => FilterOp::Lt(data.clone()),
                "$lte" => FilterOp::Lte(data.clone()),
                "$in" => FilterOp::In(array_of(key, data)?),
                "$nin" => FilterOp::Nin(array_of(key, data)?),
                "$all" => FilterOp::All(array_of(key, data)?),
                "$size" => FilterOp::Size(data.as_u64().ok_or_else(|| {
                    FilterError::InvalidOperatorData("$size requires a non-negative integer".to_string())
                })?),
                "$exists" => FilterOp::Exists(truthy(key, data)?),
                "$mod" => parse_mod(data)?,
                "$regex" => {
                    let source = data.as_str().ok_or_else(|| {
                        FilterError::InvalidOperatorData("$regex requires a string".to_string())
                    })?;
                    FilterOp::Regex(RegexSpec::parse(source)?)
                }
                "$options" => {
                    regex_options = Some(data.as_str().ok_or_else(|| {
                        FilterError::InvalidOperatorData("$options requires a string".to_string())
                    })?);
                    continue;
                }
                "$elemMatch" => FilterOp::ElemMatch(self.parse_elem_match(data, depth)?),
                "$near" => FilterOp::Near(parse_near(key, data)?),
                "$nearSphere" => FilterOp::NearSphere(parse_near(key, data)?),
                "$maxDistance" => {
                    max_distance = Some(number_of(key, data)?);
                    continue;
                }
                "$minDistance" => {
                    min_distance = Some(number_of(key, data)?);
                    continue;
                }
                "$geoWithin" => FilterOp::GeoWithin(parse_geo_within(data)?),
                "$geoIntersects" => FilterOp::GeoIntersects(parse_geometry_wrapper(key, data)?),
                other => return Err(FilterError::UnsupportedOperator(other.to_string())),
            };
            ops.push(op);
        }

        if let Some(options) = regex_options {
            let spec = ops.iter_mut().find_map(|op| match op {
                FilterOp::Regex(spec) => Some(spec),
                _ => None,
            });
            let spec = spec.ok_or_else(|| {
                FilterError::InvalidOperatorData("$options requires $regex".to_string())
            })?;
            let flags = format!("{}{}", spec.flags, options);
            *spec = RegexSpec::new(&spec.pattern, &flags)?;
        }

        if max_distance.is_some() || min_distance.is_some() {
            let near = ops.iter_mut().find_map(|op| match op {
                FilterOp::Near(q) | FilterOp::NearSphere(q) => Some(q),
                _ => None,
            });
            let near = near.ok_or_else(|| {
                FilterError::InvalidOperatorData(
                    "$maxDistance/$minDistance require $near or $nearSphere".to_string(),
                )
            })?;
            near.max_distance = max_distance.or(near.max_distance);
            near.min_distance = min_distance.or(near.min_distance);
        }

        Ok(ops)
    }

    fn parse_elem_match(&self, data: &Value, depth: u32) -> Result<ElemMatch, FilterError> {
        let obj = data.as_object().ok_or_else(|| {
            FilterError::InvalidOperatorData("$elemMatch requires an object".to_string())
        })?;
        if !obj.is_empty() && is_operator_object(obj)? && !has_logical_keys(obj) {
            Ok(ElemMatch::Value(self.parse_operators(obj, depth + 1)?))
        } else {
            Ok(ElemMatch::Document(self.parse_filter(data, depth + 1)?))
        }
    }
}

/// Field names are limited to `[A-Za-z0-9_.]` with non-empty segments
pub fn validate_field(field: &str) -> Result<(), FilterError> {
    let valid = !field.is_empty()
        && field.split('.').all(|seg| !seg.is_empty())
        && field.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.');
    if valid {
        Ok(())
    } else {
        Err(FilterError::InvalidField(field.to_string()))
    }
}

/// An object whose keys all start with `$` is an operator object; one with
/// no `$` keys is a literal value. Mixing the two is rejected.
fn is_operator_object(obj: &Map<String, Value>) -> Result<bool, FilterError> {
    let ops = obj.keys().filter(|k| k.starts_with('$')).count();
    if ops == 0 {
        Ok(false)
    } else if ops == obj.len() {
        Ok(true)
    } else {
        Err(FilterError::InvalidOperatorData(
            "cannot mix operators and literal fields in one object".to_string(),
        ))
    }
}

fn has_logical_keys(obj: &Map<String, Value>) -> bool {
    obj.keys()
        .any(|k| matches!(k.as_str(), "$and" | "$or" | "$nor" | "$where"))
}

fn array_of(op: &str, data: &Value) -> Result<Vec<Value>, FilterError> {
    data.as_array()
        .cloned()
        .ok_or_else(|| FilterError::InvalidOperatorData(format!("{} requires an array", op)))
}

fn number_of(op: &str, data: &Value) -> Result<f64, FilterError> {
    data.as_f64()
        .ok_or_else(|| FilterError::InvalidOperatorData(format!("{} requires a number", op)))
}

fn truthy(op: &str, data: &Value) -> Result<bool, FilterError> {
    match data {
        Value::Bool(b) => Ok(*b),
        Value::Number(n) => Ok(n.as_f64().is_some_and(|f| f != 0.0)),
        _ => Err(FilterError::InvalidOperatorData(format!("{} requires a boolean", op))),
    }
}

fn parse_mod(data: &Value) -> Result<FilterOp, FilterError> {
    let invalid = || FilterError::InvalidOperatorData("$mod requires [divisor, remainder]".to_string());
    let pair = data.as_array().filter(|a| a.len() == 2).ok_or_else(invalid)?;
    let divisor = pair[0].as_f64().ok_or_else(invalid)? as i64;
    let remainder = pair[1].as_f64().ok_or_else(invalid)? as i64;
    if divisor == 0 {
        return Err(FilterError::InvalidOperatorData("$mod divisor cannot be zero".to_string()));
    }
    Ok(FilterOp::Mod { divisor, remainder })
}

/// `[x, y]` pair, also accepted as `{x, y}`-style two-key objects
pub fn parse_point(data: &Value) -> Option<Point> {
    match data {
        Value::Array(pair) if pair.len() == 2 => Some(Point::new(pair[0].as_f64()?, pair[1].as_f64()?)),
        Value::Object(obj) if obj.len() == 2 => {
            let mut coords = obj.values();
            Some(Point::new(coords.next()?.as_f64()?, coords.next()?.as_f64()?))
        }
        _ => None,
    }
}

fn parse_points(data: &Value) -> Option<Vec<Point>> {
    data.as_array()?.iter().map(parse_point).collect()
}

fn parse_near(op: &str, data: &Value) -> Result<NearQuery, FilterError> {
    let invalid = || FilterError::InvalidOperatorData(format!("{} requires a point", op));

    if let Some(point) = parse_point(data).filter(|_| data.is_array()) {
        return Ok(NearQuery {
            point,
            max_distance: None,
            min_distance: None,
            geojson: false,
        });
    }

    let obj = data.as_object().ok_or_else(invalid)?;
    let geometry = obj.get("$geometry").ok_or_else(invalid)?;
    let Geometry::Point(point) = parse_geojson(geometry)? else {
        return Err(invalid());
    };
    let distance = |key: &str| obj.get(key).map(|v| number_of(key, v)).transpose();
    Ok(NearQuery {
        point,
        max_distance: distance("$maxDistance")?,
        min_distance: distance("$minDistance")?,
        geojson: true,
    })
}

fn parse_geo_within(data: &Value) -> Result<GeoShape, FilterError> {
    let invalid = |what: &str| FilterError::InvalidOperatorData(format!("$geoWithin {} is malformed", what));
    let obj = data
        .as_object()
        .filter(|o| o.len() == 1)
        .ok_or_else(|| invalid("shape"))?;

    let (shape, spec) = obj.iter().next().ok_or_else(|| invalid("shape"))?;
    match shape.as_str() {
        "$box" => {
            let corners = parse_points(spec).filter(|p| p.len() == 2).ok_or_else(|| invalid("$box"))?;
            Ok(GeoShape::Box {
                bottom_left: corners[0],
                top_right: corners[1],
            })
        }
        "$center" | "$centerSphere" => {
            let pair = spec.as_array().filter(|a| a.len() == 2).ok_or_else(|| invalid(shape))?;
            let center = parse_point(&pair[0]).ok_or_else(|| invalid(shape))?;
            let radius = pair[1].as_f64().ok_or_else(|| invalid(shape))?;
            Ok(if shape == "$center" {
                GeoShape::Center { center, radius }
            } else {
                GeoShape::CenterSphere { center, radius }
            })
        }
        "$polygon" => {
            let points = parse_points(spec).filter(|p| p.len() >= 3).ok_or_else(|| invalid("$polygon"))?;
            Ok(GeoShape::Polygon(points))
        }
        "$geometry" => Ok(GeoShape::Geometry(parse_geojson(spec)?)),
        other => Err(FilterError::UnsupportedOperator(other.to_string())),
    }
}

fn parse_geometry_wrapper(op: &str, data: &Value) -> Result<Geometry, FilterError> {
    let geometry = data
        .get("$geometry")
        .ok_or_else(|| FilterError::InvalidOperatorData(format!("{} requires $geometry", op)))?;
    parse_geojson(geometry)
}

/// GeoJSON `Point` or `Polygon` (exterior ring)
pub fn parse_geojson(data: &Value) -> Result<Geometry, FilterError> {
    let invalid = || FilterError::InvalidOperatorData("invalid GeoJSON geometry".to_string());
    let kind = data.get("type").and_then(Value::as_str).ok_or_else(invalid)?;
    let coordinates = data.get("coordinates").ok_or_else(invalid)?;
    match kind {
        "Point" => parse_point(coordinates)
            .filter(|_| coordinates.is_array())
            .map(Geometry::Point)
            .ok_or_else(invalid),
        "Polygon" => {
            let ring = coordinates.as_array().and_then(|rings| rings.first()).ok_or_else(invalid)?;
            let points = parse_points(ring).filter(|p| p.len() >= 3).ok_or_else(invalid)?;
            Ok(Geometry::Polygon(points))
        }
        other => Err(FilterError::UnsupportedOperator(format!("GeoJSON type {}", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(value: Value) -> Result<Filter, FilterError> {
        FilterWhere::new(FilterOptions {
            allow_raw_where: true,
            max_depth: 4,
        })
        .parse_value(&value)
    }

    fn field(path: &str, predicate: Predicate) -> Clause {
        Clause::Field {
            path: path.to_string(),
            predicate,
        }
    }

    #[test]
    fn implicit_equality_and_operator_objects() {
        let filter = parse(json!({
            "gender": "male",
            "age": { "$gte": 18, "$lt": 65 },
            "address": { "city": "Oslo" }
        }))
        .unwrap();

        assert_eq!(
            filter.clauses,
            vec![
                field("gender", Predicate::Eq(json!("male"))),
                field("age", Predicate::Ops(vec![FilterOp::Gte(json!(18)), FilterOp::Lt(json!(65))])),
                field("address", Predicate::Eq(json!({ "city": "Oslo" }))),
            ]
        );
    }

    #[test]
    fn logical_operators_require_arrays() {
        let filter = parse(json!({ "$or": [{ "a": 1 }, { "b": 2 }] })).unwrap();
        assert!(matches!(&filter.clauses[0], Clause::Or(subs) if subs.len() == 2));

        assert!(matches!(
            parse(json!({ "$or": { "a": 1 } })),
            Err(FilterError::InvalidOperatorData(_))
        ));
        assert!(matches!(
            parse(json!({ "$nor": "a" })),
            Err(FilterError::InvalidOperatorData(_))
        ));
    }

    #[test]
    fn malformed_json_and_unknown_operators_fail() {
        assert!(matches!(
            FilterWhere::parse("{name:", FilterOptions::default()),
            Err(FilterError::JsonError(_))
        ));
        assert!(matches!(
            parse(json!({ "age": { "$between": [1, 2] } })),
            Err(FilterError::UnsupportedOperator(_))
        ));
        assert!(matches!(parse(json!({ "$text": "x" })), Err(FilterError::UnsupportedOperator(_))));
        assert!(matches!(parse(json!([1])), Err(FilterError::InvalidWhereClause(_))));
    }

    #[test]
    fn field_names_are_restricted() {
        assert!(parse(json!({ "address.city": "Oslo" })).is_ok());
        assert!(matches!(parse(json!({ "na'me": 1 })), Err(FilterError::InvalidField(_))));
        assert!(matches!(parse(json!({ "a..b": 1 })), Err(FilterError::InvalidField(_))));
    }

    #[test]
    fn raw_where_is_gated() {
        let filter = parse(json!({ "$where": "1 = 1" })).unwrap();
        assert_eq!(filter.clauses, vec![Clause::Where("1 = 1".to_string())]);

        let refused = FilterWhere::new(FilterOptions::default()).parse_value(&json!({ "$where": "1 = 1" }));
        assert!(matches!(refused, Err(FilterError::RawWhereDisabled)));
    }

    #[test]
    fn regex_with_separate_options() {
        let filter = parse(json!({ "name": { "$regex": "^bo", "$options": "i" } })).unwrap();
        let Clause::Field { predicate: Predicate::Ops(ops), .. } = &filter.clauses[0] else {
            panic!("expected operators");
        };
        let FilterOp::Regex(spec) = &ops[0] else { panic!("expected regex") };
        assert_eq!(spec.flags, "i");
        assert!(spec.is_match("BOB"));
    }

    #[test]
    fn elem_match_distinguishes_documents_from_values() {
        let filter = parse(json!({
            "scores": { "$elemMatch": { "$gt": 80 } },
            "pets": { "$elemMatch": { "kind": "cat" } }
        }))
        .unwrap();

        let kinds: Vec<bool> = filter
            .clauses
            .iter()
            .map(|c| match c {
                Clause::Field { predicate: Predicate::Ops(ops), .. } => {
                    matches!(ops[0], FilterOp::ElemMatch(ElemMatch::Value(_)))
                }
                _ => panic!("expected operators"),
            })
            .collect();
        assert_eq!(kinds, vec![true, false]);
    }

    #[test]
    fn near_collects_distance_modifiers() {
        let filter = parse(json!({
            "loc": { "$near": [0, 0], "$maxDistance": 5 },
            "pos": { "$nearSphere": { "$geometry": { "type": "Point", "coordinates": [10, 59] }, "$minDistance": 100 } }
        }))
        .unwrap();

        let near = |i: usize| match &filter.clauses[i] {
            Clause::Field { predicate: Predicate::Ops(ops), .. } => match &ops[0] {
                FilterOp::Near(q) | FilterOp::NearSphere(q) => q.clone(),
                _ => panic!("expected near"),
            },
            _ => panic!("expected operators"),
        };
        assert_eq!(near(0).max_distance, Some(5.0));
        assert!(!near(0).geojson);
        assert_eq!(near(1).min_distance, Some(100.0));
        assert!(near(1).geojson);

        assert!(parse(json!({ "loc": { "$maxDistance": 5 } })).is_err());
    }

    #[test]
    fn geo_within_shapes() {
        assert!(parse(json!({ "loc": { "$geoWithin": { "$box": [[0, 0], [1, 1]] } } })).is_ok());
        assert!(parse(json!({ "loc": { "$geoWithin": { "$center": [[0, 0], 2] } } })).is_ok());
        assert!(parse(json!({ "loc": { "$geoWithin": { "$polygon": [[0, 0], [1, 0], [0, 1]] } } })).is_ok());
        assert!(parse(json!({ "loc": { "$geoWithin": { "$box": [[0, 0]] } } })).is_err());
        assert!(parse(json!({
            "loc": { "$geoIntersects": { "$geometry": { "type": "Polygon", "coordinates": [[[0, 0], [4, 0], [4, 4], [0, 0]]] } } }
        }))
        .is_ok());
    }

    #[test]
    fn nesting_depth_is_bounded() {
        let deep = json!({ "$and": [{ "$and": [{ "$and": [{ "$and": [{ "$and": [{ "a": 1 }] }] }] }] }] });
        assert!(matches!(parse(deep), Err(FilterError::TooDeep(4))));
    }
}
