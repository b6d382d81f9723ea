use std::{future::Future, time::Duration};

use futures::future::LocalBoxFuture;

/// Host facilities the engine needs without depending on a specific async runtime.
pub trait Runtime: 'static {
    fn sleep(&self, duration: Duration) -> LocalBoxFuture<'static, ()>;
}

/// Runtime whose timers never fire. Batch timeouts are effectively disabled.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopRuntime;

impl Runtime for NoopRuntime {
    fn sleep(&self, _duration: Duration) -> LocalBoxFuture<'static, ()> {
        Box::pin(futures::future::pending())
    }
}

pub(crate) trait RuntimeExt: Runtime {
    async fn with_timeout<T>(&self, timeout: Duration, fut: impl Future<Output = T>) -> Option<T> {
        use futures::{pin_mut, select, FutureExt};

        let timeout = async move {
            self.sleep(timeout).await;
            None
        }
        .fuse();

        let fut = fut.map(Some).fuse();

        pin_mut!(timeout);
        pin_mut!(fut);

        select!(
           output = timeout => output,
           output = fut => output
        )
    }
}

impl<T: Runtime + ?Sized> RuntimeExt for T {}
