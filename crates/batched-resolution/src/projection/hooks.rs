use std::sync::Arc;

use indexmap::IndexMap;
use query_expr::Value;

use super::Proxy;
use crate::{BatchError, BatchResult, ConfigurationError, ConfigurationResult};

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct HookId(usize);

/// Work run on a proxy after it was materialized, typically to compute a value the
/// data source cannot project, like a field group assembled from the full row.
pub trait PostLoadHook: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn run(&self, proxy: &Proxy) -> BatchResult<Value>;
}

/// Post-load hooks known to the schema. Hooks are registered at build time and
/// addressed by [`HookId`] afterwards.
#[derive(Default)]
pub struct HookRegistry {
    hooks: IndexMap<Arc<str>, Arc<dyn PostLoadHook>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, hook: impl PostLoadHook) -> ConfigurationResult<HookId> {
        let name: Arc<str> = hook.name().into();
        if self.hooks.contains_key(&name) {
            return Err(ConfigurationError::DuplicateRegistration {
                key: format!("post-load hook `{name}`"),
            });
        }

        let (index, _) = self.hooks.insert_full(name, Arc::new(hook));
        Ok(HookId(index))
    }

    pub fn get(&self, name: &str) -> Option<HookId> {
        self.hooks.get_index_of(name).map(HookId)
    }

    /// Runs `hook` on `proxy` unless it already ran on this very proxy instance,
    /// in which case the first outcome is returned.
    pub fn run(&self, proxy: &Proxy, hook: HookId) -> BatchResult<Value> {
        let Some((name, body)) = self.hooks.get_index(hook.0) else {
            return Err(BatchError::failed("post-load hook", format!("unknown hook {}", hook.0)));
        };

        proxy.memoized_hook(hook, || {
            tracing::debug!("running post-load hook `{name}` on {}", proxy.shape());
            body.run(proxy)
        })
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }
}
