use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use query_expr::Lambda;

use super::{factorize, Factorization, FactorizationError};

/// Factorizations keyed by the structural identity of the predicate.
///
/// Lives as long as the schema it was built for; failures are cached as well so a
/// broken relation reports the same error wherever it is referenced.
#[derive(Default)]
pub struct FactorizationCache {
    entries: Mutex<HashMap<Lambda, Result<Arc<Factorization>, FactorizationError>>>,
}

impl FactorizationCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_factorize(&self, predicate: &Lambda) -> Result<Arc<Factorization>, FactorizationError> {
        let mut entries = self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(entry) = entries.get(predicate) {
            return entry.clone();
        }

        let result = factorize(predicate).map(Arc::new);
        if let Err(err) = &result {
            tracing::debug!("predicate cannot be batched: {err}");
        }
        entries.insert(predicate.clone(), result.clone());
        result
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|entries| entries.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
