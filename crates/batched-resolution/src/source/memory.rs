use std::{
    cmp,
    collections::{HashMap, HashSet},
    rc::Rc,
    sync::{Arc, Mutex},
};

use indexmap::IndexMap;
use query_expr::{Record, Value};

use super::{DataSource, Grouping, SourceQuery};
use crate::{
    projection::{Proxy, Row},
    SourceError,
};

/// Data source over rows held in memory, evaluating every query stage itself.
/// Keeps a log of the queries it executed.
#[derive(Default)]
pub struct InMemorySource {
    tables: HashMap<String, Vec<Arc<Row>>>,
    executed: Mutex<Vec<String>>,
    unavailable: Mutex<Option<String>>,
}

impl InMemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores rows in the table of their entity, keeping insertion order.
    #[must_use]
    pub fn with_rows(mut self, rows: impl IntoIterator<Item = Arc<Row>>) -> Self {
        for row in rows {
            self.insert(row);
        }
        self
    }

    pub fn insert(&mut self, row: Arc<Row>) {
        self.tables
            .entry(row.entity().name().to_string())
            .or_default()
            .push(row);
    }

    /// Makes every following fetch fail until called again with `None`.
    pub fn set_unavailable(&self, reason: Option<String>) {
        *lock(&self.unavailable) = reason;
    }

    pub fn query_count(&self) -> usize {
        lock(&self.executed).len()
    }

    pub fn executed_queries(&self) -> Vec<String> {
        lock(&self.executed).clone()
    }

    fn select(&self, query: &SourceQuery) -> Result<Vec<Proxy>, SourceError> {
        let entity = query.shape.entity();
        let rows = self
            .tables
            .get(entity.name())
            .ok_or_else(|| SourceError::UnknownEntity(entity.name().to_string()))?;

        let keys: Option<HashSet<Value>> = query
            .key_filter
            .as_ref()
            .map(|key_filter| key_filter.keys.iter().cloned().map(Value::into_key).collect());

        let mut selected = Vec::new();
        'rows: for row in rows {
            let record: &dyn Record = &**row;
            for filter in &query.filters {
                if !filter.test(&[record])? {
                    continue 'rows;
                }
            }
            if let (Some(key_filter), Some(keys)) = (&query.key_filter, &keys) {
                if !keys.contains(&key_filter.key.eval(&[record])?.into_key()) {
                    continue;
                }
            }
            selected.push(query.shape.materialize(row));
        }

        Ok(selected)
    }
}

#[async_trait::async_trait(?Send)]
impl DataSource for InMemorySource {
    async fn fetch(&self, query: &SourceQuery) -> Result<Vec<Grouping>, SourceError> {
        tracing::debug!("executing {query}");
        lock(&self.executed).push(query.to_string());

        if let Some(reason) = lock(&self.unavailable).clone() {
            return Err(SourceError::Unavailable(reason));
        }

        let proxies = self.select(query)?;

        let mut sorted = Vec::with_capacity(proxies.len());
        for proxy in proxies {
            let record: &dyn Record = &proxy;
            let sort_key = query
                .order_by
                .iter()
                .map(|ordering| ordering.key.eval(&[record]))
                .collect::<Result<Vec<_>, _>>()?;
            sorted.push((sort_key, proxy));
        }
        sorted.sort_by(|(left, _), (right, _)| {
            query
                .order_by
                .iter()
                .zip(left.iter().zip(right))
                .map(|(ordering, (left, right))| {
                    let ordering_of_values = compare_nulls_first(left, right);
                    if ordering.descending {
                        ordering_of_values.reverse()
                    } else {
                        ordering_of_values
                    }
                })
                .find(|ordering| ordering.is_ne())
                .unwrap_or(cmp::Ordering::Equal)
        });

        let mut groups: IndexMap<Value, Vec<Rc<Proxy>>> = IndexMap::new();
        for (_, proxy) in sorted {
            let key = query.group_key.eval(&[&proxy as &dyn Record])?.into_key();
            if key.is_null() {
                continue;
            }
            groups.entry(key).or_default().push(Rc::new(proxy));
        }

        tracing::debug!("query produced {} groupings", groups.len());

        Ok(groups
            .into_iter()
            .map(|(key, elements)| Grouping::new(key, elements))
            .collect())
    }
}

fn compare_nulls_first(left: &Value, right: &Value) -> cmp::Ordering {
    match (left, right) {
        (Value::Null, Value::Null) => cmp::Ordering::Equal,
        (Value::Null, _) => cmp::Ordering::Less,
        (_, Value::Null) => cmp::Ordering::Greater,
        (left, right) => left.compare(right).unwrap_or(cmp::Ordering::Equal),
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
