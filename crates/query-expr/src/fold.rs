use crate::Expr;

/// Bottom-up rewriting of expression trees.
///
/// Implementors override [`Fold::fold`] for the nodes they care about and call
/// [`fold_children`] to recurse into everything else.
pub trait Fold {
    type Error;

    fn fold(&mut self, expr: Expr) -> Result<Expr, Self::Error> {
        fold_children(self, expr)
    }
}

pub fn fold_children<F: Fold + ?Sized>(folder: &mut F, expr: Expr) -> Result<Expr, F::Error> {
    Ok(match expr {
        Expr::Param(_) | Expr::Literal(_) => expr,
        Expr::Field { base, name } => Expr::Field {
            base: Box::new(folder.fold(*base)?),
            name,
        },
        Expr::Slot { base, slot, name } => Expr::Slot {
            base: Box::new(folder.fold(*base)?),
            slot,
            name,
        },
        Expr::Unary { op, operand } => Expr::Unary {
            op,
            operand: Box::new(folder.fold(*operand)?),
        },
        Expr::Binary { op, left, right } => Expr::Binary {
            op,
            left: Box::new(folder.fold(*left)?),
            right: Box::new(folder.fold(*right)?),
        },
        Expr::Tuple(items) => Expr::Tuple(items.into_iter().map(|item| folder.fold(item)).collect::<Result<_, _>>()?),
    })
}

/// Replaces parameters according to a mapping function.
pub(crate) struct SubstituteParams<'a>(pub &'a mut dyn FnMut(crate::ParamId) -> Expr);

impl Fold for SubstituteParams<'_> {
    type Error = std::convert::Infallible;

    fn fold(&mut self, expr: Expr) -> Result<Expr, Self::Error> {
        match expr {
            Expr::Param(id) => Ok((self.0)(id)),
            other => fold_children(self, other),
        }
    }
}
