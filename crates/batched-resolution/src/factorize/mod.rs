//! Splits a two-entity join predicate into set-oriented pieces.
//!
//! `(o, i) => o.country == i.country && i.active` becomes an outer key
//! `o => o.country`, an inner key `i => i.country` and an inner residual
//! `i => i.active`, which lets a per-row join run as a single grouped query.

mod cache;
mod partition;


use std::fmt;

use query_expr::{BinaryOp, Expr, ExprDisplay, Lambda, ParamId};

pub use cache::FactorizationCache;
use partition::{Partitioner, Side};

/// Parameter roles of a join predicate `(outer, inner) => ...`.
pub const OUTER: ParamId = ParamId::new(0);
pub const INNER: ParamId = ParamId::new(1);

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FactorizationError {
    #[error("join predicate must take exactly two parameters, got {arity}: {predicate}")]
    Arity { predicate: String, arity: usize },
    #[error("join predicate never references the {missing} parameter: {predicate}")]
    Degenerate { predicate: String, missing: &'static str },
    #[error("join predicate has no equality between an outer and an inner value: {predicate}")]
    NoEquiJoin { predicate: String },
    #[error("join predicate relates outer and inner values through more than one equality: {predicate}")]
    MultipleEquiJoins { predicate: String },
    #[error("join predicate has a disjunction involving the outer parameter: {predicate}")]
    Disjunction { predicate: String },
    #[error("join predicate has a condition `{condition}` on the outer parameter besides the key equality: {predicate}")]
    OuterCondition { predicate: String, condition: String },
    #[error("join predicate needs {placeholders} placeholders, more than a lambda can number: {predicate}")]
    TooLarge { predicate: String, placeholders: usize },
}

/// Result of the classic factorization step: a body only referencing placeholders,
/// plus the outer-only (`left`) and inner-only (`right`) expressions they stand for.
#[derive(Debug, Clone, PartialEq)]
pub struct FactoredPredicate {
    pub body: Lambda,
    pub left: Vec<Lambda>,
    pub right: Vec<Lambda>,
}

impl fmt::Display for FactoredPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.body)?;
        for (i, left) in self.left.iter().enumerate() {
            writeln!(f, "$l{i} = {left}")?;
        }
        for (i, right) in self.right.iter().enumerate() {
            writeln!(f, "$r{i} = {right}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Factorization {
    pub outer_key: Lambda,
    pub inner_key: Lambda,
    pub inner_residual: Option<Lambda>,
    pub factored: FactoredPredicate,
}

impl fmt::Display for Factorization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "outer key: {}", self.outer_key)?;
        writeln!(f, "inner key: {}", self.inner_key)?;
        match &self.inner_residual {
            Some(residual) => writeln!(f, "inner residual: {residual}"),
            None => writeln!(f, "inner residual: none"),
        }
    }
}

pub fn factorize(predicate: &Lambda) -> Result<Factorization, FactorizationError> {
    let rendered = || predicate.to_string();

    if predicate.arity() != 2 {
        return Err(FactorizationError::Arity {
            predicate: rendered(),
            arity: predicate.arity(),
        });
    }

    let referenced = predicate.body().referenced_params();
    for (param, missing) in [(OUTER, "outer"), (INNER, "inner")] {
        if !referenced.contains(&param) {
            return Err(FactorizationError::Degenerate {
                predicate: rendered(),
                missing,
            });
        }
    }

    let mut partitioner = Partitioner::new(predicate);
    let body = partitioner.run(predicate.body().clone())?;
    let factored = partitioner.finish(body)?;
    tracing::trace!("factored {predicate} into {factored}");

    let mut equi_join = None;
    let mut residual = Vec::new();
    let mut disjunction = false;
    let mut outer_condition = None;

    for conjunct in factored.body.body().conjuncts() {
        if let Some(pair) = placeholder_equality(&factored, conjunct) {
            if equi_join.replace(pair).is_some() {
                return Err(FactorizationError::MultipleEquiJoins { predicate: rendered() });
            }
        } else if references_side(&factored, conjunct, Side::Outer) {
            disjunction |= is_disjunction(conjunct);
            outer_condition.get_or_insert(conjunct);
        } else {
            residual.push(conjunct.clone());
        }
    }

    if disjunction {
        return Err(FactorizationError::Disjunction { predicate: rendered() });
    }
    let Some((left, right)) = equi_join else {
        return Err(FactorizationError::NoEquiJoin { predicate: rendered() });
    };
    if let Some(condition) = outer_condition {
        let condition = restore(predicate, &factored, condition);
        return Err(FactorizationError::OuterCondition {
            predicate: rendered(),
            condition: ExprDisplay::new(&condition, predicate.params()).to_string(),
        });
    }

    let inner_name = predicate.params()[usize::from(INNER)].clone();
    let inner_residual = Expr::conjunction(residual)
        .map(|conjunction| {
            Lambda::from_parts(factored.body.params().to_vec(), conjunction).rebind(vec![inner_name.clone()], |id| {
                match placeholder_side(&factored, id) {
                    Some((Side::Inner, index)) => factored.right[index].body().clone(),
                    // Only inner placeholders survive in residual conjuncts.
                    _ => Expr::param(id),
                }
            })
        })
        .filter(|residual| !residual.is_constant_true());

    Ok(Factorization {
        outer_key: factored.left[left].clone(),
        inner_key: factored.right[right].clone(),
        inner_residual,
        factored,
    })
}

/// Placeholder parameters are numbered left first, then right.
fn placeholder_side(factored: &FactoredPredicate, id: ParamId) -> Option<(Side, usize)> {
    let index = usize::from(id);
    if index < factored.left.len() {
        Some((Side::Outer, index))
    } else if index < factored.left.len() + factored.right.len() {
        Some((Side::Inner, index - factored.left.len()))
    } else {
        None
    }
}

fn references_side(factored: &FactoredPredicate, expr: &Expr, side: Side) -> bool {
    expr.referenced_params()
        .into_iter()
        .any(|id| matches!(placeholder_side(factored, id), Some((s, _)) if s == side))
}

/// Substitutes placeholders back with the expressions they stand for, in terms of
/// the original predicate parameters.
fn restore(predicate: &Lambda, factored: &FactoredPredicate, expr: &Expr) -> Expr {
    Lambda::from_parts(factored.body.params().to_vec(), expr.clone())
        .rebind(predicate.params().to_vec(), |id| match placeholder_side(factored, id) {
            Some((Side::Outer, index)) => factored.left[index].body().clone(),
            Some((Side::Inner, index)) => factored.right[index]
                .clone()
                .rebind(Vec::new(), |_| Expr::Param(INNER))
                .into_body(),
            None => Expr::param(id),
        })
        .into_body()
}

/// `$lN == $rM` (either way round) gives `(N, M)`.
fn placeholder_equality(factored: &FactoredPredicate, expr: &Expr) -> Option<(usize, usize)> {
    let Expr::Binary {
        op: BinaryOp::Eq,
        left,
        right,
    } = expr
    else {
        return None;
    };
    let (Expr::Param(a), Expr::Param(b)) = (&**left, &**right) else {
        return None;
    };
    match (placeholder_side(factored, *a)?, placeholder_side(factored, *b)?) {
        ((Side::Outer, l), (Side::Inner, r)) | ((Side::Inner, r), (Side::Outer, l)) => Some((l, r)),
        _ => None,
    }
}

fn is_disjunction(expr: &Expr) -> bool {
    let mut found = false;
    expr.visit(&mut |node| {
        if let Expr::Binary { op: BinaryOp::Or, .. } = node {
            found = true;
        }
    });
    found
}
