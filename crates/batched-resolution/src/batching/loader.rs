use std::rc::Rc;

use futures::future::{self, LocalBoxFuture};

use crate::BatchResult;

pub type LoadFuture<V> = LocalBoxFuture<'static, BatchResult<V>>;

/// Per-outer lookup handle. Calling [`Loader::load`] registers the outer's key
/// right away and never blocks; the returned future resolves once the batch the
/// key went out with completes.
pub struct Loader<O, V> {
    load: Rc<dyn Fn(&O) -> LoadFuture<V>>,
}

impl<O, V> Clone for Loader<O, V> {
    fn clone(&self) -> Self {
        Loader {
            load: self.load.clone(),
        }
    }
}

impl<O: 'static, V: 'static> Loader<O, V> {
    pub fn from_fn(load: impl Fn(&O) -> LoadFuture<V> + 'static) -> Self {
        Loader { load: Rc::new(load) }
    }

    pub fn load(&self, outer: &O) -> LoadFuture<V> {
        (self.load)(outer)
    }

    /// Loads every outer of the slice within the same tick, keeping their order.
    pub fn load_many(&self, outers: &[O]) -> LoadFuture<Vec<V>> {
        let loads: Vec<_> = outers.iter().map(|outer| self.load(outer)).collect();
        Box::pin(future::try_join_all(loads))
    }

    /// Transforms every loaded value. The underlying batch is shared with the
    /// original loader.
    pub fn then<W: 'static>(self, f: impl Fn(V) -> W + 'static) -> Loader<O, W> {
        self.and_then(move |value| Ok(f(value)))
    }

    pub fn and_then<W: 'static>(self, f: impl Fn(V) -> BatchResult<W> + 'static) -> Loader<O, W> {
        let f = Rc::new(f);
        Loader::from_fn(move |outer: &O| -> LoadFuture<W> {
            let load = self.load(outer);
            let f = f.clone();
            Box::pin(async move { f(load.await?) })
        })
    }

    /// Completes once both loads completed, registering both keys in the same tick.
    pub fn zip<W: 'static>(self, other: Loader<O, W>) -> Loader<O, (V, W)> {
        Loader::from_fn(move |outer: &O| -> LoadFuture<(V, W)> {
            Box::pin(future::try_join(self.load(outer), other.load(outer)))
        })
    }
}

/// Combines loaders over the same outer into one whose value lists every
/// constituent's value, in order. Fails with the first failing constituent.
pub fn when_all<O: 'static, V: 'static>(loaders: impl IntoIterator<Item = Loader<O, V>>) -> Loader<O, Vec<V>> {
    let loaders: Vec<_> = loaders.into_iter().collect();
    Loader::from_fn(move |outer: &O| -> LoadFuture<Vec<V>> {
        let loads: Vec<_> = loaders.iter().map(|loader| loader.load(outer)).collect();
        Box::pin(future::try_join_all(loads))
    })
}
