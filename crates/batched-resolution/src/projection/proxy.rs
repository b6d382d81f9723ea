use std::{cell::RefCell, collections::HashMap, sync::Arc};

use query_expr::{Record, SlotId, Value};
use serde::ser::SerializeMap;

use super::{entity::identity_value, HookId, Row, Shape};
use crate::BatchResult;

/// Partial projection of a row: the slots of its [`Shape`] plus a back-reference
/// to the full row.
///
/// Only requested, identity and grouping members are readable by name; internal
/// dependencies are reachable through slot accesses of rewritten expressions only.
#[derive(Debug)]
pub struct Proxy {
    shape: Arc<Shape>,
    source: Arc<Row>,
    slots: Vec<Value>,
    hooks: RefCell<HashMap<HookId, BatchResult<Value>>>,
}

impl Proxy {
    pub(super) fn new(shape: Arc<Shape>, source: Arc<Row>, slots: Vec<Value>) -> Self {
        Proxy {
            shape,
            source,
            slots,
            hooks: RefCell::default(),
        }
    }

    pub fn shape(&self) -> &Arc<Shape> {
        &self.shape
    }

    /// The full row this proxy was materialized from.
    pub fn source(&self) -> &Arc<Row> {
        &self.source
    }

    pub fn get(&self, member: &str) -> Option<&Value> {
        let slot = self.shape.slot(member)?;
        let member = self.shape.member(slot)?;
        if member.kind.is_exposed() {
            self.slots.get(usize::from(slot))
        } else {
            None
        }
    }

    pub fn exposed(&self) -> impl Iterator<Item = (&str, &Value)> + '_ {
        self.shape
            .exposed()
            .filter_map(|(slot, name)| Some((name, self.slots.get(usize::from(slot))?)))
    }

    /// Identity of the underlying row, always materialized whatever was requested.
    pub fn structural_key(&self) -> Value {
        identity_value(
            self.shape
                .identity_slots()
                .iter()
                .filter_map(|slot| self.slots.get(usize::from(*slot))),
        )
    }

    pub(super) fn memoized_hook(&self, hook: HookId, run: impl FnOnce() -> BatchResult<Value>) -> BatchResult<Value> {
        if let Some(result) = self.hooks.borrow().get(&hook) {
            return result.clone();
        }
        // Not borrowed while running: hooks may run other hooks on the same proxy.
        let result = run();
        self.hooks.borrow_mut().entry(hook).or_insert(result).clone()
    }
}

impl Record for Proxy {
    fn field(&self, name: &str) -> Option<&Value> {
        self.get(name)
    }

    fn slot(&self, slot: SlotId) -> Option<&Value> {
        self.slots.get(usize::from(slot))
    }
}

impl serde::Serialize for Proxy {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        for (name, value) in self.exposed() {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}
