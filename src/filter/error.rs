use thiserror::Error;

#[derive(Error, Debug)]
pub enum FilterError {
    #[error("Invalid field name: {0}")]
    InvalidField(String),

    #[error("Invalid filter: {0}")]
    InvalidWhereClause(String),

    #[error("Unsupported operator: {0}")]
    UnsupportedOperator(String),

    #[error("Invalid operator data: {0}")]
    InvalidOperatorData(String),

    #[error("Invalid regular expression: {0}")]
    InvalidRegex(String),

    #[error("Raw $where predicates are disabled in this environment")]
    RawWhereDisabled,

    #[error("Filter nesting exceeds {0} levels")]
    TooDeep(u32),

    #[error("Invalid sort: {0}")]
    InvalidSort(String),

    #[error("Invalid filter JSON: {0}")]
    JsonError(#[from] serde_json::Error),
}
