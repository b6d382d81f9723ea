use std::{collections::BTreeSet, sync::Arc};

use crate::Value;

/// Index of a lambda parameter.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct ParamId(u16);

impl ParamId {
    pub const fn new(index: u16) -> Self {
        Self(index)
    }
}

impl TryFrom<usize> for ParamId {
    type Error = IdOverflow;

    fn try_from(value: usize) -> Result<Self, Self::Error> {
        u16::try_from(value).map(Self).map_err(|_| IdOverflow { kind: "parameter", value })
    }
}

impl From<ParamId> for usize {
    fn from(id: ParamId) -> Self {
        id.0 as usize
    }
}

/// Index of a materialized member inside a projected shape.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct SlotId(u16);

impl TryFrom<usize> for SlotId {
    type Error = IdOverflow;

    fn try_from(value: usize) -> Result<Self, Self::Error> {
        u16::try_from(value).map(Self).map_err(|_| IdOverflow { kind: "slot", value })
    }
}

impl From<SlotId> for usize {
    fn from(id: SlotId) -> Self {
        id.0 as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("{kind} index {value} does not fit in 16 bits")]
pub struct IdOverflow {
    pub kind: &'static str,
    pub value: usize,
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum UnaryOp {
    Not,
    IsNull,
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum BinaryOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    Add,
    Sub,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
        }
    }

    pub(crate) fn precedence(self) -> u8 {
        match self {
            BinaryOp::Or => 1,
            BinaryOp::And => 2,
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => 3,
            BinaryOp::Add | BinaryOp::Sub => 4,
        }
    }
}

/// Declarative expression over lambda parameters.
///
/// Expressions are plain data: they can be hashed, compared structurally, rewritten
/// and evaluated against anything implementing [`crate::Record`].
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum Expr {
    Param(ParamId),
    Field {
        base: Box<Expr>,
        name: Arc<str>,
    },
    /// Access into a projected shape. Keeps the field name for diagnostics only.
    Slot {
        base: Box<Expr>,
        slot: SlotId,
        name: Arc<str>,
    },
    Literal(Value),
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Tuple(Vec<Expr>),
}

pub fn lit(value: impl Into<Value>) -> Expr {
    Expr::Literal(value.into())
}

pub fn tuple(items: impl IntoIterator<Item = Expr>) -> Expr {
    Expr::Tuple(items.into_iter().collect())
}

impl Expr {
    pub fn param(id: impl Into<ParamId>) -> Expr {
        Expr::Param(id.into())
    }

    #[must_use]
    pub fn field(self, name: &str) -> Expr {
        Expr::Field {
            base: Box::new(self),
            name: name.into(),
        }
    }

    fn binary(self, op: BinaryOp, other: Expr) -> Expr {
        Expr::Binary {
            op,
            left: Box::new(self),
            right: Box::new(other),
        }
    }

    #[must_use]
    pub fn equals(self, other: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::Eq, other.into())
    }

    #[must_use]
    pub fn not_equals(self, other: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::Ne, other.into())
    }

    #[must_use]
    pub fn lt(self, other: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::Lt, other.into())
    }

    #[must_use]
    pub fn le(self, other: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::Le, other.into())
    }

    #[must_use]
    pub fn gt(self, other: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::Gt, other.into())
    }

    #[must_use]
    pub fn ge(self, other: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::Ge, other.into())
    }

    #[must_use]
    pub fn and(self, other: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::And, other.into())
    }

    #[must_use]
    pub fn or(self, other: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::Or, other.into())
    }

    #[must_use]
    pub fn is_null(self) -> Expr {
        Expr::Unary {
            op: UnaryOp::IsNull,
            operand: Box::new(self),
        }
    }

    /// Conjunction of all the given expressions, `None` when empty.
    pub fn conjunction(exprs: impl IntoIterator<Item = Expr>) -> Option<Expr> {
        exprs.into_iter().reduce(Expr::and)
    }

    /// Operands of the top-level `&&` chain, left to right. A non-conjunction is its
    /// own single operand.
    pub fn conjuncts(&self) -> Vec<&Expr> {
        let mut out = Vec::new();
        let mut stack = vec![self];
        while let Some(expr) = stack.pop() {
            match expr {
                Expr::Binary {
                    op: BinaryOp::And,
                    left,
                    right,
                } => {
                    stack.push(right);
                    stack.push(left);
                }
                other => out.push(other),
            }
        }
        out
    }

    pub fn children(&self) -> Vec<&Expr> {
        match self {
            Expr::Param(_) | Expr::Literal(_) => Vec::new(),
            Expr::Field { base, .. } | Expr::Slot { base, .. } => vec![&**base],
            Expr::Unary { operand, .. } => vec![&**operand],
            Expr::Binary { left, right, .. } => vec![&**left, &**right],
            Expr::Tuple(items) => items.iter().collect(),
        }
    }

    /// Pre-order traversal.
    pub fn visit<'a>(&'a self, f: &mut impl FnMut(&'a Expr)) {
        f(self);
        for child in self.children() {
            child.visit(f);
        }
    }

    pub fn referenced_params(&self) -> BTreeSet<ParamId> {
        let mut params = BTreeSet::new();
        self.visit(&mut |expr| {
            if let Expr::Param(id) = expr {
                params.insert(*id);
            }
        });
        params
    }

    /// Names of the fields read directly through the given parameter.
    pub fn member_accesses(&self, param: ParamId) -> BTreeSet<Arc<str>> {
        let mut members = BTreeSet::new();
        self.visit(&mut |expr| match expr {
            Expr::Field { base, name } | Expr::Slot { base, name, .. } if **base == Expr::Param(param) => {
                members.insert(name.clone());
            }
            _ => {}
        });
        members
    }
}

impl From<Value> for Expr {
    fn from(value: Value) -> Self {
        Expr::Literal(value)
    }
}

impl From<&str> for Expr {
    fn from(value: &str) -> Self {
        lit(value)
    }
}

impl From<i64> for Expr {
    fn from(value: i64) -> Self {
        lit(value)
    }
}

impl From<bool> for Expr {
    fn from(value: bool) -> Self {
        lit(value)
    }
}

impl std::ops::Not for Expr {
    type Output = Expr;

    fn not(self) -> Expr {
        Expr::Unary {
            op: UnaryOp::Not,
            operand: Box::new(self),
        }
    }
}

impl std::ops::Add for Expr {
    type Output = Expr;

    fn add(self, other: Expr) -> Expr {
        self.binary(BinaryOp::Add, other)
    }
}

impl std::ops::Sub for Expr {
    type Output = Expr;

    fn sub(self, other: Expr) -> Expr {
        self.binary(BinaryOp::Sub, other)
    }
}
