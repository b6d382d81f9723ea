use std::sync::Arc;

use indexmap::IndexSet;
use query_expr::{Expr, IdOverflow, Lambda, ParamId};

use super::{FactoredPredicate, FactorizationError, INNER, OUTER};

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub(super) enum Side {
    Outer,
    Inner,
}

/// Which predicate parameters a sub-expression references.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
struct Refs {
    outer: bool,
    inner: bool,
}

impl Refs {
    fn union(self, other: Refs) -> Refs {
        Refs {
            outer: self.outer || other.outer,
            inner: self.inner || other.inner,
        }
    }

    fn side(self) -> Option<Side> {
        match (self.outer, self.inner) {
            (true, false) => Some(Side::Outer),
            (false, true) => Some(Side::Inner),
            _ => None,
        }
    }

    fn is_mixed(self) -> bool {
        self.outer && self.inner
    }
}

/// Sub-expression being partitioned. `Pure` ones are still intact and may be
/// extracted by their parent, `Mixed` ones have been rewritten already.
enum Partial {
    Pure { expr: Expr, refs: Refs },
    Mixed(Expr),
}

impl Partial {
    fn refs(&self) -> Refs {
        match self {
            Partial::Pure { refs, .. } => *refs,
            Partial::Mixed(_) => Refs {
                outer: true,
                inner: true,
            },
        }
    }
}

/// Single bottom-up pass replacing every maximal outer-only or inner-only
/// sub-expression with a placeholder parameter.
pub(super) struct Partitioner<'a> {
    predicate: &'a Lambda,
    /// Extracted expressions in discovery order; the index is the temporary
    /// placeholder id. Structurally equal expressions share a placeholder.
    extracted: IndexSet<(Side, Expr)>,
}

impl<'a> Partitioner<'a> {
    pub(super) fn new(predicate: &'a Lambda) -> Self {
        Partitioner {
            predicate,
            extracted: IndexSet::new(),
        }
    }

    pub(super) fn run(&mut self, body: Expr) -> Result<Expr, FactorizationError> {
        let partial = self.partition(body)?;
        self.seal(partial)
    }

    /// Renumbers placeholders left first, then right, and wraps everything into
    /// lambdas.
    pub(super) fn finish(self, body: Expr) -> Result<FactoredPredicate, FactorizationError> {
        let param_name = |param: ParamId| self.predicate.params()[usize::from(param)].clone();
        let outer_name = param_name(OUTER);
        let inner_name = param_name(INNER);

        let mut left = Vec::new();
        let mut right = Vec::new();
        let mut positions = Vec::with_capacity(self.extracted.len());
        for (side, expr) in self.extracted {
            let (list, name) = match side {
                Side::Outer => (&mut left, outer_name.clone()),
                Side::Inner => (&mut right, inner_name.clone()),
            };
            positions.push((side, list.len()));
            let lambda = Lambda::from_parts(self.predicate.params().to_vec(), expr).rebind(vec![name], |_| {
                // Pure expressions only reference their own side's parameter.
                Expr::Param(ParamId::new(0))
            });
            list.push(lambda);
        }

        let left_len = left.len();
        let renumbered = positions
            .iter()
            .map(|(side, index)| match side {
                Side::Outer => ParamId::try_from(*index),
                Side::Inner => ParamId::try_from(left_len + *index),
            })
            .collect::<Result<Vec<_>, _>>()
            .map_err(|overflow| too_large(self.predicate, overflow))?;
        let placeholder_names: Vec<Arc<str>> = (0..left.len())
            .map(|i| Arc::from(format!("$l{i}")))
            .chain((0..right.len()).map(|i| Arc::from(format!("$r{i}"))))
            .collect();

        let body = Lambda::from_parts(Vec::new(), body).rebind(placeholder_names, |temporary| {
            Expr::Param(renumbered.get(usize::from(temporary)).copied().unwrap_or(temporary))
        });

        Ok(FactoredPredicate { body, left, right })
    }

    fn partition(&mut self, expr: Expr) -> Result<Partial, FactorizationError> {
        Ok(match expr {
            Expr::Param(id) => {
                let refs = Refs {
                    outer: id == OUTER,
                    inner: id == INNER,
                };
                Partial::Pure { expr, refs }
            }
            Expr::Literal(_) => Partial::Pure {
                expr,
                refs: Refs::default(),
            },
            Expr::Field { base, name } => {
                let base = self.partition(*base)?;
                self.combine(vec![base], |mut children| Expr::Field {
                    base: Box::new(children.remove(0)),
                    name,
                })?
            }
            Expr::Slot { base, slot, name } => {
                let base = self.partition(*base)?;
                self.combine(vec![base], |mut children| Expr::Slot {
                    base: Box::new(children.remove(0)),
                    slot,
                    name,
                })?
            }
            Expr::Unary { op, operand } => {
                let operand = self.partition(*operand)?;
                self.combine(vec![operand], |mut children| Expr::Unary {
                    op,
                    operand: Box::new(children.remove(0)),
                })?
            }
            Expr::Binary { op, left, right } => {
                let left = self.partition(*left)?;
                let right = self.partition(*right)?;
                self.combine(vec![left, right], |mut children| {
                    let right = children.remove(1);
                    let left = children.remove(0);
                    Expr::Binary {
                        op,
                        left: Box::new(left),
                        right: Box::new(right),
                    }
                })?
            }
            Expr::Tuple(items) => {
                let items = items
                    .into_iter()
                    .map(|item| self.partition(item))
                    .collect::<Result<_, _>>()?;
                self.combine(items, Expr::Tuple)?
            }
        })
    }

    fn combine(
        &mut self,
        children: Vec<Partial>,
        rebuild: impl FnOnce(Vec<Expr>) -> Expr,
    ) -> Result<Partial, FactorizationError> {
        let refs = children.iter().fold(Refs::default(), |acc, child| acc.union(child.refs()));
        Ok(if refs.is_mixed() {
            let children = children
                .into_iter()
                .map(|child| self.seal(child))
                .collect::<Result<_, _>>()?;
            Partial::Mixed(rebuild(children))
        } else {
            let children = children
                .into_iter()
                .map(|child| match child {
                    Partial::Pure { expr, .. } | Partial::Mixed(expr) => expr,
                })
                .collect();
            Partial::Pure {
                expr: rebuild(children),
                refs,
            }
        })
    }

    /// Turns a pure sub-expression into its placeholder; constants stay inline.
    fn seal(&mut self, partial: Partial) -> Result<Expr, FactorizationError> {
        Ok(match partial {
            Partial::Mixed(expr) => expr,
            Partial::Pure { expr, refs } => match refs.side() {
                Some(side) => {
                    let (index, _) = self.extracted.insert_full((side, expr));
                    let placeholder = ParamId::try_from(index).map_err(|overflow| too_large(self.predicate, overflow))?;
                    Expr::Param(placeholder)
                }
                None => expr,
            },
        })
    }
}

fn too_large(predicate: &Lambda, overflow: IdOverflow) -> FactorizationError {
    FactorizationError::TooLarge {
        predicate: predicate.to_string(),
        placeholders: overflow.value + 1,
    }
}
