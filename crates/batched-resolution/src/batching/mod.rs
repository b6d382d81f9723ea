//! Request-scoped batching of lookups.
//!
//! A [`ResolutionTree`] drives all resolver futures of one request on a small
//! cooperative executor. Loads register their key into the pending batch of their
//! [`BatchKey`] without blocking, and once every task is waiting the tree calls each
//! batch function once with the deduplicated keys of that tick.

mod executor;
mod key;
mod loader;
mod registry;
mod tree;

#[cfg(test)]
mod tests;

use std::{collections::HashMap, hash::Hash};

pub use key::{BatchFnId, BatchKey};
pub use loader::{when_all, LoadFuture, Loader};
pub use tree::{ResolutionTree, TreeContext};

use crate::BatchResult;

/// Set-oriented lookup called once per dispatch tick of its [`BatchKey`].
#[async_trait::async_trait(?Send)]
pub trait BatchFn: 'static {
    type Key: Clone + Eq + Hash + 'static;
    type Value: Clone + Default + 'static;

    /// Shows up in logs and distinguishes batch functions of the same type.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    async fn load(&self, ctx: &TreeContext, keys: &[Self::Key]) -> BatchResult<HashMap<Self::Key, Self::Value>>;

    /// Value for a key the batch function did not return anything for.
    fn missing(&self, _key: &Self::Key) -> Self::Value {
        Self::Value::default()
    }
}
