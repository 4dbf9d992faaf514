use serde_json::Value;

use super::error::FilterError;

/// Parsed filter: an implicit conjunction of clauses
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    pub clauses: Vec<Clause>,
}

impl Filter {
    pub fn new(clauses: Vec<Clause>) -> Self {
        Self { clauses }
    }

    /// Filter that matches everything
    pub fn all() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    /// Equality on a single field, for building filters in code
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(vec![Clause::Field {
            path: field.into(),
            predicate: Predicate::Eq(value.into()),
        }])
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Clause {
    Field { path: String, predicate: Predicate },
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Nor(Vec<Filter>),
    /// Raw predicate handed to the store untouched
    Where(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// `{field: value}` shorthand; also matches arrays containing the value
    Eq(Value),
    /// `{field: {$op: data, ...}}`, every operator must hold
    Ops(Vec<FilterOp>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum FilterOp {
    Eq(Value),
    Ne(Value),
    Gt(Value),
    Gte(Value),
    Lt(Value),
    Lte(Value),
    In(Vec<Value>),
    Nin(Vec<Value>),
    All(Vec<Value>),
    Size(u64),
    ElemMatch(ElemMatch),
    Exists(bool),
    Mod { divisor: i64, remainder: i64 },
    Regex(RegexSpec),
    Near(NearQuery),
    NearSphere(NearQuery),
    GeoWithin(GeoShape),
    GeoIntersects(Geometry),
}

impl FilterOp {
    pub fn name(&self) -> &'static str {
        match self {
            FilterOp::Eq(_) => "$eq",
            FilterOp::Ne(_) => "$ne",
            FilterOp::Gt(_) => "$gt",
            FilterOp::Gte(_) => "$gte",
            FilterOp::Lt(_) => "$lt",
            FilterOp::Lte(_) => "$lte",
            FilterOp::In(_) => "$in",
            FilterOp::Nin(_) => "$nin",
            FilterOp::All(_) => "$all",
            FilterOp::Size(_) => "$size",
            FilterOp::ElemMatch(_) => "$elemMatch",
            FilterOp::Exists(_) => "$exists",
            FilterOp::Mod { .. } => "$mod",
            FilterOp::Regex(_) => "$regex",
            FilterOp::Near(_) => "$near",
            FilterOp::NearSphere(_) => "$nearSphere",
            FilterOp::GeoWithin(_) => "$geoWithin",
            FilterOp::GeoIntersects(_) => "$geoIntersects",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ElemMatch {
    /// Array of objects: some element matches the sub-filter
    Document(Filter),
    /// Array of scalars: some element satisfies every operator
    Value(Vec<FilterOp>),
}

/// Regular expression from `$regex`, either `/pattern/flags` or a bare pattern.
#[derive(Debug, Clone)]
pub struct RegexSpec {
    pub pattern: String,
    pub flags: String,
    compiled: regex::Regex,
}

impl RegexSpec {
    pub const FLAGS: &'static str = "imsx";

    pub fn parse(source: &str) -> Result<Self, FilterError> {
        let (pattern, flags) = match source.strip_prefix('/') {
            Some(rest) => match rest.rfind('/') {
                Some(end) => (&rest[..end], &rest[end + 1..]),
                None => (source, ""),
            },
            None => (source, ""),
        };
        Self::new(pattern, flags)
    }

    /// Build from a pattern and flag letters; `g` is accepted and ignored.
    pub fn new(pattern: &str, flags: &str) -> Result<Self, FilterError> {
        let mut kept = String::new();
        for flag in flags.chars() {
            match flag {
                'g' => {}
                f if Self::FLAGS.contains(f) => {
                    if !kept.contains(f) {
                        kept.push(f);
                    }
                }
                other => {
                    return Err(FilterError::InvalidRegex(format!(
                        "unsupported flag '{}' in /{}/{}",
                        other, pattern, flags
                    )))
                }
            }
        }

        let compiled = regex::RegexBuilder::new(pattern)
            .case_insensitive(kept.contains('i'))
            .multi_line(kept.contains('m'))
            .dot_matches_new_line(kept.contains('s'))
            .ignore_whitespace(kept.contains('x'))
            .build()
            .map_err(|e| FilterError::InvalidRegex(e.to_string()))?;

        Ok(Self {
            pattern: pattern.to_string(),
            flags: kept,
            compiled,
        })
    }

    pub fn has_flag(&self, flag: char) -> bool {
        self.flags.contains(flag)
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.compiled.is_match(text)
    }
}

impl PartialEq for RegexSpec {
    fn eq(&self, other: &Self) -> bool {
        self.pattern == other.pattern && self.flags == other.flags
    }
}

/// `[x, y]` coordinate pair; GeoJSON order is `[lng, lat]`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NearQuery {
    pub point: Point,
    pub max_distance: Option<f64>,
    pub min_distance: Option<f64>,
    /// GeoJSON points measure in meters, legacy pairs in coordinate units
    pub geojson: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum GeoShape {
    Box { bottom_left: Point, top_right: Point },
    Center { center: Point, radius: f64 },
    /// Radius in radians on the sphere
    CenterSphere { center: Point, radius: f64 },
    Polygon(Vec<Point>),
    Geometry(Geometry),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Geometry {
    Point(Point),
    /// Exterior ring only
    Polygon(Vec<Point>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    pub fn to_sql(&self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey {
    pub field: String,
    pub direction: SortDirection,
}

impl SortKey {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Asc,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Desc,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FilterOptions {
    pub allow_raw_where: bool,
    pub max_depth: u32,
}

impl Default for FilterOptions {
    fn default() -> Self {
        Self {
            allow_raw_where: false,
            max_depth: 10,
        }
    }
}
