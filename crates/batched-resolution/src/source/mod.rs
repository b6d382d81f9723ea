//! Boundary towards the queryable data source.
//!
//! Resolvers describe what they need as a [`SourceQuery`]: filters and an optional
//! key restriction evaluated on full rows, then a projection into a [`Shape`],
//! ordering and grouping evaluated on the projected proxies. Sources are free to
//! push all of it down.

mod memory;

#[cfg(test)]
mod tests;

use std::{fmt, rc::Rc, sync::Arc};

use query_expr::{Lambda, Value};
use serde::ser::SerializeStruct;

pub use memory::InMemorySource;

use crate::{
    projection::{Proxy, Shape},
    SourceError,
};

#[async_trait::async_trait(?Send)]
pub trait DataSource: Send + Sync + 'static {
    /// Executes the query, returning one grouping per distinct non-null group key in
    /// order of first appearance. Group keys are compared and returned in
    /// [`Value::into_key`] form, as are the rows matched against a key filter.
    async fn fetch(&self, query: &SourceQuery) -> Result<Vec<Grouping>, SourceError>;
}

/// Restricts a query to rows whose `key` is one of `keys`.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyFilter {
    pub key: Lambda,
    pub keys: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Ordering {
    pub key: Lambda,
    pub descending: bool,
}

#[derive(Debug, Clone)]
pub struct SourceQuery {
    /// Conjoined filters over full rows.
    pub filters: Vec<Lambda>,
    pub key_filter: Option<KeyFilter>,
    /// Projection every selected row is materialized into.
    pub shape: Arc<Shape>,
    /// Ordering over the projected proxies, most significant first. Nulls sort first.
    pub order_by: Vec<Ordering>,
    /// Grouping key over the projected proxies.
    pub group_key: Lambda,
}

impl fmt::Display for SourceQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "from {}", self.shape)?;
        for filter in &self.filters {
            write!(f, " filter ({filter})")?;
        }
        if let Some(KeyFilter { key, keys }) = &self.key_filter {
            write!(f, " key ({key}) in {}", Value::List(keys.clone()))?;
        }
        for Ordering { key, descending } in &self.order_by {
            write!(f, " order ({key}) {}", if *descending { "desc" } else { "asc" })?;
        }
        write!(f, " group ({})", self.group_key)
    }
}

/// Lazily composed [`SourceQuery`], executed only once handed to a [`DataSource`].
#[derive(Debug, Clone)]
pub struct Query {
    shape: Arc<Shape>,
    filters: Vec<Lambda>,
    key_filter: Option<KeyFilter>,
    order_by: Vec<Ordering>,
}

impl Query {
    pub fn project(shape: Arc<Shape>) -> Self {
        Query {
            shape,
            filters: Vec::new(),
            key_filter: None,
            order_by: Vec::new(),
        }
    }

    #[must_use]
    pub fn filter(mut self, filter: Lambda) -> Self {
        if !filter.is_constant_true() {
            self.filters.push(filter);
        }
        self
    }

    #[must_use]
    pub fn key_in(mut self, key: Lambda, keys: Vec<Value>) -> Self {
        self.key_filter = Some(KeyFilter { key, keys });
        self
    }

    #[must_use]
    pub fn order_by(mut self, key: Lambda, descending: bool) -> Self {
        self.order_by.push(Ordering { key, descending });
        self
    }

    pub fn group_by(self, group_key: Lambda) -> SourceQuery {
        SourceQuery {
            filters: self.filters,
            key_filter: self.key_filter,
            shape: self.shape,
            order_by: self.order_by,
            group_key,
        }
    }
}

/// Elements sharing one group key. A key without elements is an empty grouping,
/// never an absent one.
#[derive(Debug, Clone)]
pub struct Grouping {
    key: Value,
    elements: Rc<[Rc<Proxy>]>,
}

impl Default for Grouping {
    fn default() -> Self {
        Grouping::empty(Value::Null)
    }
}

impl Grouping {
    pub fn new(key: Value, elements: Vec<Rc<Proxy>>) -> Self {
        Grouping {
            key,
            elements: elements.into(),
        }
    }

    pub fn empty(key: Value) -> Self {
        Grouping::new(key, Vec::new())
    }

    pub fn key(&self) -> &Value {
        &self.key
    }

    pub fn elements(&self) -> &[Rc<Proxy>] {
        &self.elements
    }

    pub fn first(&self) -> Option<&Rc<Proxy>> {
        self.elements.first()
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn iter(&self) -> impl ExactSizeIterator<Item = &Rc<Proxy>> + '_ {
        self.elements.iter()
    }
}

impl serde::Serialize for Grouping {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut grouping = serializer.serialize_struct("Grouping", 2)?;
        grouping.serialize_field("key", &self.key)?;
        grouping.serialize_field("elements", &*self.elements)?;
        grouping.end()
    }
}
