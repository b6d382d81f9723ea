use std::{fmt, time::Duration};

use query_expr::EvalError;

use crate::factorize::FactorizationError;

pub type ConfigurationResult<T> = Result<T, ConfigurationError>;
pub type BatchResult<T> = Result<T, BatchError>;

/// Modeling mistakes detected while building resolvers. They are fatal and never
/// deferred to request time.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigurationError {
    #[error(transparent)]
    Factorization(#[from] FactorizationError),
    #[error("`{expression}` reads `{entity}.{member}` which is not part of the projected members [{members}]")]
    MemberOutsideProjection {
        entity: String,
        member: String,
        expression: String,
        members: String,
    },
    #[error("entity `{entity}` has no field `{field}`")]
    UnknownField { entity: String, field: String },
    #[error("entity `{entity}` must have at least one identity field")]
    MissingIdentity { entity: String },
    #[error("{key} is already registered with a different definition")]
    DuplicateRegistration { key: String },
    #[error("projecting {count} members of `{entity}` exceeds the slot limit of a shape")]
    TooManyMembers { entity: String, count: usize },
    #[error("relation `{relation}` joins `{expected}` but was given a `{actual}` shape")]
    EntityMismatch {
        relation: String,
        expected: String,
        actual: String,
    },
}

/// Failure of a single batch function call, shared by every load waiting on it.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BatchError {
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error(transparent)]
    Eval(#[from] EvalError),
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error("batch function `{name}` failed: {message}")]
    Failed { name: &'static str, message: String },
    #[error("batch function `{name}` timed out after {timeout:?}")]
    Timeout { name: &'static str, timeout: Duration },
    #[error("relation `{relation}` reads its key from {expected} proxies but was given a {actual} proxy")]
    ShapeMismatch {
        relation: String,
        expected: String,
        actual: String,
    },
    #[error("batch was abandoned before completing")]
    Cancelled,
}

impl BatchError {
    pub fn failed(name: &'static str, message: impl fmt::Display) -> Self {
        BatchError::Failed {
            name,
            message: message.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SourceError {
    #[error(transparent)]
    Eval(#[from] EvalError),
    #[error("data source has no entity `{0}`")]
    UnknownEntity(String),
    #[error("data source is unavailable: {0}")]
    Unavailable(String),
}

/// Failure of a whole resolution tree.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TreeError {
    #[error("resolution tree was cancelled")]
    Cancelled,
    #[error("resolution tree did not settle within {0} dispatch rounds")]
    TooManyDispatchRounds(usize),
}
