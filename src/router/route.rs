//! Route matching logic.
//!
//! # Responsibilities
//! - Compile path templates such as `/people/:id?` into segment matchers
//! - Match a pathname and extract named parameters
//!
//! # Design Decisions
//! - Literal segments are case-sensitive
//! - Empty segments are ignored, so `/people/` matches `/people`
//! - No regex: matching is a walk over segments with backtracking only
//!   around optional parameters

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use super::{Handler, RouteError};
use crate::request::{Method, Params};

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Literal(String),
    Param { name: String, optional: bool },
    Splat,
}

/// A compiled path template
#[derive(Debug, Clone)]
pub struct Pattern {
    source: String,
    segments: Vec<Segment>,
}

impl Pattern {
    pub fn parse(source: &str) -> Result<Self, RouteError> {
        if !source.starts_with('/') {
            return Err(RouteError::InvalidPattern(format!(
                "{}: pattern must start with '/'",
                source
            )));
        }

        let raw: Vec<&str> = source.split('/').filter(|s| !s.is_empty()).collect();
        let mut segments = Vec::with_capacity(raw.len());
        for (index, part) in raw.iter().enumerate() {
            let segment = if *part == "*" {
                if index + 1 != raw.len() {
                    return Err(RouteError::InvalidPattern(format!(
                        "{}: '*' must be the last segment",
                        source
                    )));
                }
                Segment::Splat
            } else if let Some(name) = part.strip_prefix(':') {
                let (name, optional) = match name.strip_suffix('?') {
                    Some(name) => (name, true),
                    None => (name, false),
                };
                if name.is_empty() || !name.chars().all(|c| c.is_alphanumeric() || c == '_') {
                    return Err(RouteError::InvalidPattern(format!(
                        "{}: invalid parameter name '{}'",
                        source, name
                    )));
                }
                Segment::Param {
                    name: name.to_string(),
                    optional,
                }
            } else {
                Segment::Literal(part.to_string())
            };
            segments.push(segment);
        }

        Ok(Self {
            source: source.to_string(),
            segments,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Match a pathname, returning captured parameters or `None`.
    pub fn matches(&self, pathname: &str) -> Option<Params> {
        let parts: Vec<&str> = pathname.split('/').filter(|s| !s.is_empty()).collect();
        let mut params = Params::new();
        if match_segments(&self.segments, &parts, &mut params) {
            Some(params)
        } else {
            None
        }
    }
}

fn match_segments(segments: &[Segment], parts: &[&str], params: &mut Params) -> bool {
    let Some((segment, rest)) = segments.split_first() else {
        return parts.is_empty();
    };

    match segment {
        Segment::Literal(literal) => match parts.split_first() {
            Some((part, remaining)) if part == literal => match_segments(rest, remaining, params),
            _ => false,
        },
        Segment::Param { name, optional } => {
            if let Some((part, remaining)) = parts.split_first() {
                params.insert(name.clone(), (*part).to_string());
                if match_segments(rest, remaining, params) {
                    return true;
                }
                params.remove(name);
            }
            *optional && match_segments(rest, parts, params)
        }
        Segment::Splat => {
            params.insert("*".to_string(), parts.join("/"));
            true
        }
    }
}

/// A method set, a compiled pattern and the handler they lead to
#[derive(Clone)]
pub struct Route {
    methods: BTreeSet<Method>,
    pattern: Pattern,
    handler: Arc<dyn Handler>,
}

impl Route {
    pub fn new(
        methods: impl IntoIterator<Item = Method>,
        pattern: &str,
        handler: Arc<dyn Handler>,
    ) -> Result<Self, RouteError> {
        Ok(Self {
            methods: methods.into_iter().collect(),
            pattern: Pattern::parse(pattern)?,
            handler,
        })
    }

    /// Parse a pipe-delimited method spec such as `"put|patch"`.
    ///
    /// `all` (or `*`) stands for every supported method.
    pub fn parse_methods(spec: &str) -> Result<BTreeSet<Method>, RouteError> {
        let mut methods = BTreeSet::new();
        for token in spec.split('|').map(str::trim).filter(|t| !t.is_empty()) {
            if token == "*" || token.eq_ignore_ascii_case("all") {
                methods.extend(Method::ALL);
                continue;
            }
            let method: Method = token
                .parse()
                .map_err(|_| RouteError::UnknownMethod(token.to_string()))?;
            methods.insert(method);
        }
        if methods.is_empty() {
            return Err(RouteError::UnknownMethod(spec.to_string()));
        }
        Ok(methods)
    }

    pub fn methods(&self) -> &BTreeSet<Method> {
        &self.methods
    }

    pub fn pattern(&self) -> &Pattern {
        &self.pattern
    }

    pub fn handler(&self) -> &Arc<dyn Handler> {
        &self.handler
    }

    pub fn allows(&self, method: Method) -> bool {
        self.methods.contains(&method)
    }

    pub fn matches(&self, pathname: &str) -> Option<Params> {
        self.pattern.matches(pathname)
    }
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("methods", &self.methods)
            .field("pattern", &self.pattern.source)
            .finish()
    }
}
