use std::{fmt, sync::Arc};

use crate::{Expr, UnaryOp};

pub struct ExprDisplay<'a> {
    expr: &'a Expr,
    params: &'a [Arc<str>],
}

impl<'a> ExprDisplay<'a> {
    pub fn new(expr: &'a Expr, params: &'a [Arc<str>]) -> Self {
        ExprDisplay { expr, params }
    }

    fn write(&self, f: &mut fmt::Formatter<'_>, expr: &Expr, parent_precedence: u8) -> fmt::Result {
        match expr {
            Expr::Param(id) => match self.params.get(usize::from(*id)) {
                Some(name) => f.write_str(name),
                None => write!(f, "${}", usize::from(*id)),
            },
            Expr::Field { base, name } => {
                self.write(f, base, u8::MAX)?;
                write!(f, ".{name}")
            }
            Expr::Slot { base, slot, name } => {
                self.write(f, base, u8::MAX)?;
                write!(f, ".{name}@{}", usize::from(*slot))
            }
            Expr::Literal(value) => write!(f, "{value}"),
            Expr::Tuple(items) => {
                f.write_str("(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    self.write(f, item, 0)?;
                }
                f.write_str(")")
            }
            Expr::Unary {
                op: UnaryOp::Not,
                operand,
            } => {
                f.write_str("!")?;
                self.write(f, operand, u8::MAX)
            }
            Expr::Unary {
                op: UnaryOp::IsNull,
                operand,
            } => {
                self.write(f, operand, u8::MAX)?;
                f.write_str(" is null")
            }
            Expr::Binary { op, left, right } => {
                let precedence = op.precedence();
                let parenthesize = precedence < parent_precedence;
                if parenthesize {
                    f.write_str("(")?;
                }
                self.write(f, left, precedence)?;
                write!(f, " {} ", op.symbol())?;
                // Right operands bind tighter so that `a - (b - c)` keeps its parentheses.
                self.write(f, right, precedence + 1)?;
                if parenthesize {
                    f.write_str(")")?;
                }
                Ok(())
            }
        }
    }
}

impl fmt::Display for ExprDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write(f, self.expr, 0)
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        ExprDisplay::new(self, &[]).fmt(f)
    }
}
