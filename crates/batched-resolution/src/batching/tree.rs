use std::{
    any::{Any, TypeId},
    cell::RefCell,
    collections::HashMap,
    future::Future,
    rc::Rc,
    task::{Context, Poll},
};

use futures::future::{AbortHandle, AbortRegistration, Abortable};

use super::{executor::Executor, registry::LoaderRegistry, BatchFn, BatchKey, LoadFuture, Loader};
use crate::{runtime::Runtime, BatchResult, BatchingConfig, ConfigurationResult, TreeError};

/// One incoming request: owns every loader, pending batch and memoized result for
/// its lifetime, and discards them once [`ResolutionTree::run`] returns.
pub struct ResolutionTree {
    context: TreeContext,
    abort_handle: AbortHandle,
    abort_registration: AbortRegistration,
}

impl ResolutionTree {
    pub fn new(config: BatchingConfig, runtime: impl Runtime) -> Self {
        let (abort_handle, abort_registration) = AbortHandle::new_pair();
        ResolutionTree {
            context: TreeContext {
                inner: Rc::new(TreeInner {
                    config,
                    runtime: Box::new(runtime),
                    data: HashMap::new(),
                    executor: Executor::default(),
                    registry: LoaderRegistry::default(),
                }),
            },
            abort_handle,
            abort_registration,
        }
    }

    /// Attaches request data resolvers and batch functions can read through
    /// [`TreeContext::data`].
    #[must_use]
    pub fn with_data<T: 'static>(mut self, data: T) -> Self {
        // Nothing else holds the context before `run`.
        if let Some(inner) = Rc::get_mut(&mut self.context.inner) {
            inner.data.insert(TypeId::of::<T>(), Rc::new(data));
        }
        self
    }

    /// Cancels the tree: every unfinished task and in-flight batch function call is
    /// dropped, and `run` returns [`TreeError::Cancelled`].
    pub fn abort_handle(&self) -> AbortHandle {
        self.abort_handle.clone()
    }

    pub async fn run<F, Fut, T>(self, root: F) -> Result<T, TreeError>
    where
        F: FnOnce(TreeContext) -> Fut,
        Fut: Future<Output = T> + 'static,
        T: 'static,
    {
        let ResolutionTree {
            context,
            abort_registration,
            ..
        } = self;
        let _teardown = Teardown(context.clone());

        let output = Rc::new(RefCell::new(None));
        let root = root(context.clone());
        context.spawn({
            let output = output.clone();
            async move {
                let value = root.await;
                *output.borrow_mut() = Some(value);
            }
        });

        let mut rounds = 0;
        let drive = futures::future::poll_fn(|cx| context.poll_tree(cx, &mut rounds, &output));

        match Abortable::new(drive, abort_registration).await {
            Ok(result) => result,
            Err(_) => {
                tracing::debug!("resolution tree cancelled");
                Err(TreeError::Cancelled)
            }
        }
    }
}

/// Explicit per-request context handed to every resolver and batch function.
#[derive(Clone)]
pub struct TreeContext {
    inner: Rc<TreeInner>,
}

struct TreeInner {
    config: BatchingConfig,
    runtime: Box<dyn Runtime>,
    data: HashMap<TypeId, Rc<dyn Any>>,
    executor: Executor,
    registry: LoaderRegistry,
}

impl TreeContext {
    pub fn config(&self) -> &BatchingConfig {
        &self.inner.config
    }

    pub fn runtime(&self) -> &dyn Runtime {
        self.inner.runtime.as_ref()
    }

    pub fn data<T: 'static>(&self) -> Option<Rc<T>> {
        let data = self.inner.data.get(&TypeId::of::<T>())?.clone();
        data.downcast::<T>().ok()
    }

    /// Runs a future concurrently with the rest of the tree.
    pub fn spawn(&self, future: impl Future<Output = ()> + 'static) {
        self.inner.executor.spawn(future);
    }

    /// Loader for `batch_key`. All loaders of the same key within this tree share
    /// their pending batches and memoized results; the batch function given on the
    /// first call is the one serving the key.
    ///
    /// `key_selector` returning `None` marks a null-equivalent key: such loads
    /// resolve to the default value without ever reaching the batch function.
    pub fn loader<O, F>(
        &self,
        batch_key: BatchKey,
        key_selector: impl Fn(&O) -> BatchResult<Option<F::Key>> + 'static,
        batch_fn: F,
    ) -> ConfigurationResult<Loader<O, F::Value>>
    where
        O: 'static,
        F: BatchFn,
    {
        let entry = self.inner.registry.entry(batch_key, batch_fn)?;

        Ok(Loader::from_fn(move |outer: &O| -> LoadFuture<F::Value> {
            match key_selector(outer) {
                Err(err) => Box::pin(futures::future::ready(Err(err))),
                Ok(None) => Box::pin(futures::future::ready(Ok(F::Value::default()))),
                Ok(Some(key)) => {
                    let outcome = entry.load(&key);
                    let entry = entry.clone();
                    Box::pin(async move {
                        let values = outcome.await?;
                        Ok(match values.get(&key) {
                            Some(value) => value.clone(),
                            None => entry.batch_fn().missing(&key),
                        })
                    })
                }
            }
        }))
    }

    fn poll_tree<T>(
        &self,
        cx: &mut Context<'_>,
        rounds: &mut usize,
        output: &RefCell<Option<T>>,
    ) -> Poll<Result<T, TreeError>> {
        let inner = &self.inner;
        inner.executor.register_waker(cx.waker());

        loop {
            let polled = inner.executor.run_until_stalled();
            if let Some(value) = output.borrow_mut().take() {
                tracing::debug!("resolution tree completed after {rounds} dispatch rounds");
                return Poll::Ready(Ok(value));
            }

            let dispatches = inner.registry.take_dispatches(self);
            if dispatches.is_empty() {
                tracing::trace!(
                    "tree idle after polling {polled} tasks, {} waiting",
                    inner.executor.pending_tasks()
                );
                return Poll::Pending;
            }

            *rounds += 1;
            if *rounds > inner.config.max_dispatch_rounds {
                tracing::debug!("resolution tree exceeded {} dispatch rounds", inner.config.max_dispatch_rounds);
                return Poll::Ready(Err(TreeError::TooManyDispatchRounds(inner.config.max_dispatch_rounds)));
            }

            tracing::debug!("dispatch round {rounds}: {} batches", dispatches.len());
            for dispatch in dispatches {
                inner.executor.spawn(dispatch);
            }
        }
    }
}

/// Breaks the cycles between the executor's tasks and the context they hold.
struct Teardown(TreeContext);

impl Drop for Teardown {
    fn drop(&mut self) {
        self.0.inner.executor.clear();
        self.0.inner.registry.clear();
    }
}
