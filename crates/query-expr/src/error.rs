use crate::BinaryOp;

pub type EvalResult<T> = Result<T, EvalError>;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EvalError {
    #[error("parameter #{0} is not bound")]
    UnboundParam(usize),
    #[error("expected {expected} arguments, got {actual}")]
    ArityMismatch { expected: usize, actual: usize },
    #[error("unknown field '{0}'")]
    UnknownField(String),
    #[error("slot for '{0}' is not materialized")]
    MissingSlot(String),
    #[error("member access is only supported on parameters")]
    UnsupportedAccess,
    #[error("cannot apply '{}' to {left} and {right}", .op.symbol())]
    TypeMismatch {
        op: BinaryOp,
        left: &'static str,
        right: &'static str,
    },
    #[error("expected a boolean, got {0}")]
    NotABoolean(&'static str),
    #[error("integer overflow")]
    Overflow,
}
