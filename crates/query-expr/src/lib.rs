//! Declarative expression trees used to describe predicates, key selectors and
//! projections.
//!
//! Expressions are an explicit tagged union rather than compiled closures, so they
//! can be hashed for caching, rewritten by folds (factorization, projection
//! rewriting) and evaluated against any [`Record`].

mod display;
mod error;
mod eval;
mod expr;
mod fold;
mod lambda;
mod value;


pub use display::ExprDisplay;
pub use error::{EvalError, EvalResult};
pub use eval::Record;
pub use expr::{lit, tuple, BinaryOp, Expr, IdOverflow, ParamId, SlotId, UnaryOp};
pub use fold::{fold_children, Fold};
pub use lambda::Lambda;
pub use value::Value;
