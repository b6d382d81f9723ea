use std::{any::TypeId, fmt, sync::Arc};

use query_expr::Value;

use super::BatchFn;

/// Identity of a batch function: its Rust type plus the name it reports.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct BatchFnId {
    type_id: TypeId,
    name: &'static str,
}

impl BatchFnId {
    pub fn of<F: BatchFn>(batch_fn: &F) -> Self {
        BatchFnId {
            type_id: TypeId::of::<F>(),
            name: batch_fn.name(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub(super) fn is<F: BatchFn>(&self) -> bool {
        self.type_id == TypeId::of::<F>()
    }
}

/// Class of lookups sharing one batch function call per dispatch tick.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct BatchKey {
    field: Arc<str>,
    context: Value,
    batch_fn: BatchFnId,
}

impl BatchKey {
    pub fn new<F: BatchFn>(field: impl Into<Arc<str>>, batch_fn: &F) -> Self {
        BatchKey {
            field: field.into(),
            context: Value::Null,
            batch_fn: BatchFnId::of(batch_fn),
        }
    }

    /// Lookups issued with different execution contexts (arguments, projected
    /// shape, caller identity...) never share a batch.
    #[must_use]
    pub fn with_context(mut self, context: impl Into<Value>) -> Self {
        self.context = context.into();
        self
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn context(&self) -> &Value {
        &self.context
    }

    pub fn batch_fn(&self) -> BatchFnId {
        self.batch_fn
    }
}

impl fmt::Display for BatchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "batch key `{}` ({}", self.field, self.batch_fn.name)?;
        if !matches!(self.context, Value::Null) {
            write!(f, ", context {}", self.context)?;
        }
        f.write_str(")")
    }
}
