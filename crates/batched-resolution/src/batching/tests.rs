use std::{
    cell::{Cell, RefCell},
    collections::HashMap,
    rc::Rc,
    time::Duration,
};

use futures::future::{self, LocalBoxFuture};

use super::*;
use crate::{BatchError, BatchResult, BatchingConfig, ConfigurationError, NoopRuntime, Runtime, TreeError};

#[ctor::ctor]
fn setup_logging() {
    let filter = tracing_subscriber::filter::EnvFilter::builder()
        .parse(std::env::var("RUST_LOG").unwrap_or("batched_resolution=debug".to_string()))
        .unwrap();
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .without_time()
        .try_init();
}

struct TokioRuntime;

impl Runtime for TokioRuntime {
    fn sleep(&self, duration: Duration) -> LocalBoxFuture<'static, ()> {
        Box::pin(tokio::time::sleep(duration))
    }
}

#[derive(Clone, Default)]
struct Calls(Rc<RefCell<Vec<Vec<i64>>>>);

impl Calls {
    fn record(&self, keys: &[i64]) {
        self.0.borrow_mut().push(keys.to_vec());
    }

    fn get(&self) -> Vec<Vec<i64>> {
        self.0.borrow().clone()
    }
}

/// Squares non-negative keys, says nothing about negative ones.
struct Squares {
    calls: Calls,
    delay: Option<Duration>,
}

#[async_trait::async_trait(?Send)]
impl BatchFn for Squares {
    type Key = i64;
    type Value = i64;

    fn name(&self) -> &'static str {
        "squares"
    }

    async fn load(&self, _ctx: &TreeContext, keys: &[i64]) -> BatchResult<HashMap<i64, i64>> {
        self.calls.record(keys);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(keys.iter().filter(|key| **key >= 0).map(|key| (*key, key * key)).collect())
    }
}

struct Failing {
    calls: Calls,
}

#[async_trait::async_trait(?Send)]
impl BatchFn for Failing {
    type Key = i64;
    type Value = i64;

    fn name(&self) -> &'static str {
        "failing"
    }

    async fn load(&self, _ctx: &TreeContext, keys: &[i64]) -> BatchResult<HashMap<i64, i64>> {
        self.calls.record(keys);
        Err(BatchError::failed(self.name(), "connection reset"))
    }
}

struct DropFlag(Rc<Cell<bool>>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.set(true);
    }
}

/// Never completes.
struct Hanging {
    started: Rc<Cell<bool>>,
    dropped: Rc<Cell<bool>>,
}

#[async_trait::async_trait(?Send)]
impl BatchFn for Hanging {
    type Key = i64;
    type Value = i64;

    async fn load(&self, _ctx: &TreeContext, _keys: &[i64]) -> BatchResult<HashMap<i64, i64>> {
        self.started.set(true);
        let _flag = DropFlag(self.dropped.clone());
        future::pending::<()>().await;
        Ok(HashMap::new())
    }
}

struct Multiplier(i64);

struct Scaled;

#[async_trait::async_trait(?Send)]
impl BatchFn for Scaled {
    type Key = i64;
    type Value = i64;

    async fn load(&self, ctx: &TreeContext, keys: &[i64]) -> BatchResult<HashMap<i64, i64>> {
        let factor = ctx.data::<Multiplier>().map(|multiplier| multiplier.0).unwrap_or(1);
        Ok(keys.iter().map(|key| (*key, key * factor)).collect())
    }
}

fn tree() -> ResolutionTree {
    ResolutionTree::new(BatchingConfig::default(), NoopRuntime)
}

fn squares(ctx: &TreeContext, calls: &Calls) -> Loader<i64, i64> {
    let batch_fn = Squares {
        calls: calls.clone(),
        delay: None,
    };
    ctx.loader(BatchKey::new("square", &batch_fn), |key: &i64| Ok(Some(*key)), batch_fn)
        .unwrap()
}

#[tokio::test]
async fn loads_of_one_tick_share_a_single_dispatch() {
    let calls = Calls::default();

    let values = tree()
        .run({
            let calls = calls.clone();
            move |ctx| async move {
                let loader = squares(&ctx, &calls);
                future::try_join_all([3, 1, 3, 2].map(|key| loader.load(&key))).await
            }
        })
        .await
        .unwrap()
        .unwrap();

    assert_eq!(values, vec![9, 1, 9, 4]);
    assert_eq!(calls.get(), vec![vec![3, 1, 2]]);
}

#[tokio::test]
async fn later_ticks_only_dispatch_new_keys() {
    let calls = Calls::default();

    let values = tree()
        .run({
            let calls = calls.clone();
            move |ctx| async move {
                let loader = squares(&ctx, &calls);
                let first = future::try_join(loader.load(&1), loader.load(&2)).await?;
                let second = future::try_join(loader.load(&2), loader.load(&3)).await?;
                BatchResult::Ok((first, second))
            }
        })
        .await
        .unwrap()
        .unwrap();

    assert_eq!(values, ((1, 4), (4, 9)));
    assert_eq!(calls.get(), vec![vec![1, 2], vec![3]]);
}

#[tokio::test(start_paused = true)]
async fn keys_in_flight_are_awaited_not_dispatched_again() {
    let calls = Calls::default();

    let values = tree()
        .run({
            let calls = calls.clone();
            move |ctx| async move {
                let batch_fn = Squares {
                    calls: calls.clone(),
                    delay: Some(Duration::from_millis(10)),
                };
                let loader = ctx
                    .loader(BatchKey::new("square", &batch_fn), |key: &i64| Ok(Some(*key)), batch_fn)
                    .unwrap();

                let late = {
                    let loader = loader.clone();
                    async move {
                        tokio::time::sleep(Duration::from_millis(5)).await;
                        future::try_join(loader.load(&1), loader.load(&2)).await
                    }
                };
                future::try_join(loader.load(&1), late).await
            }
        })
        .await
        .unwrap()
        .unwrap();

    assert_eq!(values, (1, (1, 4)));
    assert_eq!(calls.get(), vec![vec![1], vec![2]]);
}

#[tokio::test]
async fn spawned_tasks_share_the_tick() {
    let calls = Calls::default();

    let values = tree()
        .run({
            let calls = calls.clone();
            move |ctx| async move {
                let mut receivers = Vec::new();
                for key in [4, 5, 4] {
                    let loader = squares(&ctx, &calls);
                    let (sender, receiver) = futures::channel::oneshot::channel();
                    ctx.spawn(async move {
                        let _ = sender.send(loader.load(&key).await);
                    });
                    receivers.push(receiver);
                }
                future::try_join_all(receivers).await
            }
        })
        .await
        .unwrap()
        .unwrap();

    assert_eq!(values, vec![Ok(16), Ok(25), Ok(16)]);
    assert_eq!(calls.get(), vec![vec![4, 5]]);
}

#[tokio::test]
async fn missing_keys_resolve_to_the_default() {
    let calls = Calls::default();

    let values = tree()
        .run({
            let calls = calls.clone();
            move |ctx| async move {
                let loader = squares(&ctx, &calls);
                future::try_join(loader.load(&-3), loader.load(&3)).await
            }
        })
        .await
        .unwrap()
        .unwrap();

    assert_eq!(values, (0, 9));
    assert_eq!(calls.get(), vec![vec![-3, 3]]);
}

#[tokio::test]
async fn null_keys_never_reach_the_batch_function() {
    let calls = Calls::default();

    let values = tree()
        .run({
            let calls = calls.clone();
            move |ctx| async move {
                let batch_fn = Squares {
                    calls: calls.clone(),
                    delay: None,
                };
                let loader = ctx
                    .loader(BatchKey::new("square", &batch_fn), |key: &Option<i64>| Ok(*key), batch_fn)
                    .unwrap();
                let only_nulls = future::try_join(loader.load(&None), loader.load(&None)).await?;
                let mixed = future::try_join(loader.load(&None), loader.load(&Some(7))).await?;
                BatchResult::Ok((only_nulls, mixed))
            }
        })
        .await
        .unwrap()
        .unwrap();

    assert_eq!(values, ((0, 0), (0, 49)));
    assert_eq!(calls.get(), vec![vec![7]]);
}

#[tokio::test]
async fn key_selector_errors_fail_only_that_load() {
    let calls = Calls::default();

    let (failed, loaded) = tree()
        .run({
            let calls = calls.clone();
            move |ctx| async move {
                let batch_fn = Squares {
                    calls: calls.clone(),
                    delay: None,
                };
                let loader = ctx
                    .loader(
                        BatchKey::new("square", &batch_fn),
                        |key: &i64| {
                            if *key == 13 {
                                Err(BatchError::failed("selector", "unlucky"))
                            } else {
                                Ok(Some(*key))
                            }
                        },
                        batch_fn,
                    )
                    .unwrap();
                future::join(loader.load(&13), loader.load(&2)).await
            }
        })
        .await
        .unwrap();

    insta::assert_snapshot!(failed.unwrap_err(), @"batch function `selector` failed: unlucky");
    assert_eq!(loaded, Ok(4));
    assert_eq!(calls.get(), vec![vec![2]]);
}

#[tokio::test]
async fn batch_failure_reaches_every_waiter() {
    let calls = Calls::default();

    let (first, second, third) = tree()
        .run({
            let calls = calls.clone();
            move |ctx| async move {
                let batch_fn = Failing { calls: calls.clone() };
                let loader = ctx
                    .loader(BatchKey::new("failing", &batch_fn), |key: &i64| Ok(Some(*key)), batch_fn)
                    .unwrap();
                future::join3(loader.load(&1), loader.load(&2), loader.load(&1)).await
            }
        })
        .await
        .unwrap();

    let expected = Err(BatchError::failed("failing", "connection reset"));
    assert_eq!(first, expected);
    assert_eq!(second, expected);
    assert_eq!(third, expected);
    assert_eq!(calls.get(), vec![vec![1, 2]]);
}

#[tokio::test]
async fn composed_loaders_share_the_underlying_batch() {
    let calls = Calls::default();

    let (pair, all, description) = tree()
        .run({
            let calls = calls.clone();
            move |ctx| async move {
                let squares = squares(&ctx, &calls);
                let negated = squares.clone().then(|value| -value);
                let described = squares.clone().and_then(|value| {
                    if value > 100 {
                        Err(BatchError::failed("describe", "too large"))
                    } else {
                        Ok(format!("square is {value}"))
                    }
                });

                let pair = squares.clone().zip(negated.clone());
                let all = when_all([squares, negated]);

                future::try_join3(pair.load(&3), all.load(&4), described.load(&5)).await
            }
        })
        .await
        .unwrap()
        .unwrap();

    assert_eq!(pair, (9, -9));
    assert_eq!(all, vec![16, -16]);
    assert_eq!(description, "square is 25");
    assert_eq!(calls.get(), vec![vec![3, 4, 5]]);
}

#[tokio::test]
async fn load_many_keeps_the_outer_order() {
    let calls = Calls::default();

    let values = tree()
        .run({
            let calls = calls.clone();
            move |ctx| async move { squares(&ctx, &calls).load_many(&[2, 1, 2]).await }
        })
        .await
        .unwrap()
        .unwrap();

    assert_eq!(values, vec![4, 1, 4]);
    assert_eq!(calls.get(), vec![vec![2, 1]]);
}

#[tokio::test]
async fn execution_contexts_do_not_share_batches() {
    let calls = Calls::default();

    let values = tree()
        .run({
            let calls = calls.clone();
            move |ctx| async move {
                let loader = |context: &str| {
                    let batch_fn = Squares {
                        calls: calls.clone(),
                        delay: None,
                    };
                    let key = BatchKey::new("square", &batch_fn).with_context(context);
                    ctx.loader(key, |key: &i64| Ok(Some(*key)), batch_fn).unwrap()
                };
                let admin = loader("admin");
                let guest = loader("guest");
                future::try_join3(admin.load(&1), guest.load(&1), admin.load(&2)).await
            }
        })
        .await
        .unwrap()
        .unwrap();

    assert_eq!(values, (1, 1, 4));
    assert_eq!(calls.get(), vec![vec![1, 2], vec![1]]);
}

#[tokio::test]
async fn batch_keys_are_bound_to_their_batch_function_type() {
    let error = tree()
        .run(|ctx| async move {
            let squares = Squares {
                calls: Calls::default(),
                delay: None,
            };
            let key = BatchKey::new("square", &squares);
            ctx.loader(key, |key: &i64| Ok(Some(*key)), Failing { calls: Calls::default() })
                .err()
        })
        .await
        .unwrap();

    assert_eq!(
        error,
        Some(ConfigurationError::DuplicateRegistration {
            key: "batch key `square` (squares)".into()
        })
    );
}

#[tokio::test]
async fn batch_functions_read_tree_data() {
    let value = tree()
        .with_data(Multiplier(3))
        .run(|ctx| async move {
            let key = BatchKey::new("scaled", &Scaled);
            let loader = ctx.loader(key, |key: &i64| Ok(Some(*key)), Scaled).unwrap();
            loader.load(&14).await
        })
        .await
        .unwrap();

    assert_eq!(value, Ok(42));
}

#[tokio::test(start_paused = true)]
async fn slow_batches_time_out() {
    let config = BatchingConfig {
        timeout: Some(Duration::from_secs(1)),
        ..Default::default()
    };

    let result = ResolutionTree::new(config, TokioRuntime)
        .run(|ctx| async move {
            let batch_fn = Squares {
                calls: Calls::default(),
                delay: Some(Duration::from_secs(10)),
            };
            let loader = ctx
                .loader(BatchKey::new("square", &batch_fn), |key: &i64| Ok(Some(*key)), batch_fn)
                .unwrap();
            future::join(loader.load(&1), loader.load(&2)).await
        })
        .await
        .unwrap();

    let expected = Err(BatchError::Timeout {
        name: "squares",
        timeout: Duration::from_secs(1),
    });
    assert_eq!(result, (expected.clone(), expected));
}

#[tokio::test]
async fn aborting_the_tree_drops_in_flight_batches() {
    let started = Rc::new(Cell::new(false));
    let dropped = Rc::new(Cell::new(false));

    let tree = tree();
    let abort = tree.abort_handle();
    let run = tree.run({
        let batch_fn = Hanging {
            started: started.clone(),
            dropped: dropped.clone(),
        };
        move |ctx| async move {
            let key = BatchKey::new("hanging", &batch_fn);
            let loader = ctx.loader(key, |key: &i64| Ok(Some(*key)), batch_fn).unwrap();
            loader.load(&1).await
        }
    });
    futures::pin_mut!(run);

    assert!(futures::poll!(run.as_mut()).is_pending());
    assert!(started.get());
    assert!(!dropped.get());

    abort.abort();
    assert_eq!(run.await, Err(TreeError::Cancelled));
    assert!(dropped.get());
}

#[tokio::test]
async fn dropping_the_run_future_drops_in_flight_batches() {
    let started = Rc::new(Cell::new(false));
    let dropped = Rc::new(Cell::new(false));

    let mut run = Box::pin(tree().run({
        let batch_fn = Hanging {
            started: started.clone(),
            dropped: dropped.clone(),
        };
        move |ctx| async move {
            let key = BatchKey::new("hanging", &batch_fn);
            let loader = ctx.loader(key, |key: &i64| Ok(Some(*key)), batch_fn).unwrap();
            loader.load(&1).await
        }
    }));

    assert!(futures::poll!(run.as_mut()).is_pending());
    assert!(started.get());

    drop(run);
    assert!(dropped.get());
}

#[tokio::test]
async fn runaway_trees_are_stopped() {
    let config = BatchingConfig {
        max_dispatch_rounds: 2,
        ..Default::default()
    };
    let calls = Calls::default();

    let result = ResolutionTree::new(config, NoopRuntime)
        .run({
            let calls = calls.clone();
            move |ctx| async move {
                let loader = squares(&ctx, &calls);
                let mut total = 0;
                for key in 1..=5 {
                    total += loader.load(&key).await?;
                }
                BatchResult::Ok(total)
            }
        })
        .await;

    assert_eq!(result, Err(TreeError::TooManyDispatchRounds(2)));
    assert_eq!(calls.get(), vec![vec![1], vec![2]]);
}
