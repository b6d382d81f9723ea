use std::{
    any::Any,
    cell::RefCell,
    collections::HashMap,
    rc::Rc,
};

use futures::{
    channel::oneshot,
    future::{LocalBoxFuture, Shared},
    FutureExt,
};
use indexmap::{IndexMap, IndexSet};
use tracing::Instrument;

use super::{BatchFn, BatchKey, TreeContext};
use crate::{runtime::RuntimeExt, BatchError, BatchResult, ConfigurationError, ConfigurationResult};

pub(super) type Outcome<K, V> = BatchResult<Rc<HashMap<K, V>>>;
pub(super) type SharedOutcome<K, V> = Shared<LocalBoxFuture<'static, Outcome<K, V>>>;

/// Keys collected for the next dispatch of a batch key.
struct PendingBatch<K, V> {
    keys: IndexSet<K>,
    sender: oneshot::Sender<Outcome<K, V>>,
    outcome: SharedOutcome<K, V>,
}

impl<K: Clone + 'static, V: 'static> PendingBatch<K, V> {
    fn new() -> Self {
        let (sender, receiver) = oneshot::channel();
        let outcome = receiver
            .map(|received| received.unwrap_or(Err(BatchError::Cancelled)))
            .boxed_local()
            .shared();
        PendingBatch {
            keys: IndexSet::new(),
            sender,
            outcome,
        }
    }
}

struct EntryState<K, V> {
    /// Every key requested so far, bound to the outcome of the dispatch it went
    /// out with.
    memo: HashMap<K, SharedOutcome<K, V>>,
    pending: Option<PendingBatch<K, V>>,
}

pub(super) struct BatchEntry<F: BatchFn> {
    key: BatchKey,
    batch_fn: Rc<F>,
    state: RefCell<EntryState<F::Key, F::Value>>,
}

impl<F: BatchFn> BatchEntry<F> {
    pub(super) fn batch_fn(&self) -> &F {
        &self.batch_fn
    }

    /// Registers the key for the next dispatch unless it was requested before.
    pub(super) fn load(&self, key: &F::Key) -> SharedOutcome<F::Key, F::Value> {
        let mut state = self.state.borrow_mut();
        if let Some(outcome) = state.memo.get(key) {
            return outcome.clone();
        }

        let pending = state.pending.get_or_insert_with(PendingBatch::new);
        pending.keys.insert(key.clone());
        let outcome = pending.outcome.clone();
        state.memo.insert(key.clone(), outcome.clone());
        outcome
    }
}

/// Type-erased view of a [`BatchEntry`] for the dispatcher.
trait ErasedEntry {
    fn dispatch(&self, ctx: &TreeContext) -> Option<LocalBoxFuture<'static, ()>>;

    fn into_any(self: Rc<Self>) -> Rc<dyn Any>;
}

impl<F: BatchFn> ErasedEntry for BatchEntry<F> {
    fn dispatch(&self, ctx: &TreeContext) -> Option<LocalBoxFuture<'static, ()>> {
        let PendingBatch { keys, sender, .. } = self.state.borrow_mut().pending.take()?;
        let keys: Vec<F::Key> = keys.into_iter().collect();

        let span = tracing::debug_span!(
            "batch_dispatch",
            field = self.key.field(),
            batch_fn = self.batch_fn.name(),
            keys = keys.len()
        );
        let batch_fn = self.batch_fn.clone();
        let ctx = ctx.clone();

        Some(Box::pin(
            async move {
                let call = batch_fn.load(&ctx, &keys);
                let result = match ctx.config().timeout {
                    Some(timeout) => ctx.runtime().with_timeout(timeout, call).await.unwrap_or_else(|| {
                        Err(BatchError::Timeout {
                            name: batch_fn.name(),
                            timeout,
                        })
                    }),
                    None => call.await,
                };

                match &result {
                    Ok(values) => tracing::debug!("batch returned {} values", values.len()),
                    Err(err) => tracing::debug!("batch failed: {err}"),
                }

                // Every waiter may be gone already.
                let _ = sender.send(result.map(Rc::new));
            }
            .instrument(span),
        ))
    }

    fn into_any(self: Rc<Self>) -> Rc<dyn Any> {
        self
    }
}

/// Batch entries of one resolution tree, in registration order.
#[derive(Default)]
pub(super) struct LoaderRegistry {
    entries: RefCell<IndexMap<BatchKey, Rc<dyn ErasedEntry>>>,
}

impl LoaderRegistry {
    pub(super) fn entry<F: BatchFn>(&self, key: BatchKey, batch_fn: F) -> ConfigurationResult<Rc<BatchEntry<F>>> {
        let mut entries = self.entries.borrow_mut();

        if let Some(existing) = entries.get(&key) {
            return existing
                .clone()
                .into_any()
                .downcast::<BatchEntry<F>>()
                .map_err(|_| ConfigurationError::DuplicateRegistration { key: key.to_string() });
        }

        if !key.batch_fn().is::<F>() {
            return Err(ConfigurationError::DuplicateRegistration { key: key.to_string() });
        }

        tracing::trace!("registering {key}");
        let entry = Rc::new(BatchEntry {
            key: key.clone(),
            batch_fn: Rc::new(batch_fn),
            state: RefCell::new(EntryState {
                memo: HashMap::new(),
                pending: None,
            }),
        });
        entries.insert(key, entry.clone());
        Ok(entry)
    }

    /// Closes every pending batch, returning the futures calling their batch
    /// functions.
    pub(super) fn take_dispatches(&self, ctx: &TreeContext) -> Vec<LocalBoxFuture<'static, ()>> {
        let entries: Vec<_> = self.entries.borrow().values().cloned().collect();
        entries.iter().filter_map(|entry| entry.dispatch(ctx)).collect()
    }

    pub(super) fn clear(&self) {
        let entries = std::mem::take(&mut *self.entries.borrow_mut());
        drop(entries);
    }
}
