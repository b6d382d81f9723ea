use std::{
    cell::{Cell, RefCell},
    collections::HashMap,
    future::Future,
    sync::Arc,
    task::{Context, Waker},
};

use crossbeam_queue::SegQueue;
use futures::{
    future::LocalBoxFuture,
    task::{waker, ArcWake, AtomicWaker},
};

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
struct TaskId(u64);

struct Task {
    future: LocalBoxFuture<'static, ()>,
    waker: Waker,
}

/// Tasks woken since the last drain. Wakers may fire from other threads (timers,
/// I/O), in which case the outer waker gets the tree polled again.
#[derive(Default)]
struct ReadyQueue {
    tasks: SegQueue<TaskId>,
    outer: AtomicWaker,
}

struct TaskWaker {
    id: TaskId,
    ready: Arc<ReadyQueue>,
}

impl ArcWake for TaskWaker {
    fn wake_by_ref(arc_self: &Arc<Self>) {
        arc_self.ready.tasks.push(arc_self.id);
        arc_self.ready.outer.wake();
    }
}

/// Single-threaded microtask executor owned by a resolution tree.
#[derive(Default)]
pub(super) struct Executor {
    tasks: RefCell<HashMap<TaskId, Task>>,
    next_id: Cell<u64>,
    ready: Arc<ReadyQueue>,
}

impl Executor {
    pub(super) fn spawn(&self, future: impl Future<Output = ()> + 'static) {
        let id = TaskId(self.next_id.get());
        self.next_id.set(id.0 + 1);

        let task = Task {
            future: Box::pin(future),
            waker: waker(Arc::new(TaskWaker {
                id,
                ready: self.ready.clone(),
            })),
        };
        self.tasks.borrow_mut().insert(id, task);
        self.ready.tasks.push(id);
    }

    pub(super) fn register_waker(&self, waker: &Waker) {
        self.ready.outer.register(waker);
    }

    /// Polls woken tasks until none is runnable anymore.
    pub(super) fn run_until_stalled(&self) -> usize {
        let mut polled = 0;
        while let Some(id) = self.ready.tasks.pop() {
            // Spurious wake-up of a finished task.
            let Some(mut task) = self.tasks.borrow_mut().remove(&id) else {
                continue;
            };

            // The task is out of the map while polled so it can spawn others.
            let mut cx = Context::from_waker(&task.waker);
            if task.future.as_mut().poll(&mut cx).is_pending() {
                self.tasks.borrow_mut().insert(id, task);
            }
            polled += 1;
        }
        polled
    }

    pub(super) fn pending_tasks(&self) -> usize {
        self.tasks.borrow().len()
    }

    /// Drops every unfinished task.
    pub(super) fn clear(&self) {
        let tasks = std::mem::take(&mut *self.tasks.borrow_mut());
        drop(tasks);
        while self.ready.tasks.pop().is_some() {}
    }
}
