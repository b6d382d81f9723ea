use std::{collections::BTreeSet, fmt, sync::Arc};

use crate::{
    display::ExprDisplay,
    eval::{eval, truthy},
    fold::{Fold, SubstituteParams},
    EvalError, EvalResult, Expr, ParamId, Record, Value,
};

/// A closed expression over named parameters.
///
/// Predicates are two-parameter lambdas `(outer, inner) => ...`, key selectors and
/// residual filters take a single parameter. Equality and hashing are structural,
/// which is what caches key on.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct Lambda {
    params: Vec<Arc<str>>,
    body: Expr,
}

impl Lambda {
    /// Builds a lambda from parameter names and a closure receiving one
    /// [`Expr::Param`] per name:
    ///
    /// ```ignore
    /// Lambda::new(["o", "i"], |[o, i]| o.field("country").equals(i.field("country")))
    /// ```
    pub fn new<const N: usize>(params: [&str; N], build: impl FnOnce([Expr; N]) -> Expr) -> Self {
        let body = build(std::array::from_fn(|index| Expr::Param(ParamId::new(index as u16))));
        Lambda {
            params: params.into_iter().map(Arc::from).collect(),
            body,
        }
    }

    pub fn from_parts(params: Vec<Arc<str>>, body: Expr) -> Self {
        Lambda { params, body }
    }

    /// Single-parameter lambda that always yields `true`.
    pub fn always(param: &str) -> Self {
        Lambda::new([param], |_| crate::lit(true))
    }

    pub fn params(&self) -> &[Arc<str>] {
        &self.params
    }

    pub fn arity(&self) -> usize {
        self.params.len()
    }

    pub fn body(&self) -> &Expr {
        &self.body
    }

    pub fn into_body(self) -> Expr {
        self.body
    }

    pub fn is_constant_true(&self) -> bool {
        self.body == Expr::Literal(Value::Bool(true))
    }

    pub fn eval(&self, args: &[&dyn Record]) -> EvalResult<Value> {
        if args.len() != self.params.len() {
            return Err(EvalError::ArityMismatch {
                expected: self.params.len(),
                actual: args.len(),
            });
        }
        eval(&self.body, args)
    }

    /// Evaluates as a filter: null is false, anything non-boolean is an error.
    pub fn test(&self, args: &[&dyn Record]) -> EvalResult<bool> {
        truthy(&self.eval(args)?)
    }

    pub fn member_accesses(&self, param: ParamId) -> BTreeSet<Arc<str>> {
        self.body.member_accesses(param)
    }

    /// Applies a [`Fold`] to the body, keeping the parameter list.
    pub fn try_map_body<F: Fold>(self, folder: &mut F) -> Result<Self, F::Error> {
        Ok(Lambda {
            params: self.params,
            body: folder.fold(self.body)?,
        })
    }

    /// Renames/reorders parameters: `mapping(old)` gives the replacement expression
    /// for each parameter of the current body.
    pub fn rebind(self, params: Vec<Arc<str>>, mut mapping: impl FnMut(ParamId) -> Expr) -> Self {
        let body = match (SubstituteParams(&mut mapping)).fold(self.body) {
            Ok(body) => body,
            Err(never) => match never {},
        };
        Lambda { params, body }
    }
}

impl fmt::Display for Lambda {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.params.as_slice() {
            [single] => write!(f, "{single} => ")?,
            params => {
                f.write_str("(")?;
                for (i, param) in params.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    f.write_str(param)?;
                }
                f.write_str(") => ")?;
            }
        }
        ExprDisplay::new(&self.body, &self.params).fmt(f)
    }
}
