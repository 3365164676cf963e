// Copyright (c) The Presage Project Authors.
// Licensed under the MIT License.

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;

use tracing::warn;

use crate::constants::ERR_POISONED_LOCK;
use crate::spin::SpinLock;
use crate::tasks::dispatcher::TasksDispatcher;
use crate::tasks::task_list::{TaskInfo, TaskList};

/// One dispatcher-owned OS thread.
///
/// The worker drains its private inbox in priority-then-FIFO order. When the inbox runs dry
/// after having seen work, the worker spin-yields for the dispatcher's configured number of
/// idle loops before parking on its condvar - a tunable hot-to-cold transition that trades CPU
/// for wake-up latency. A poison pill wakes the worker and makes it exit.
pub(crate) struct Worker {
    id: usize,
    inbox: SpinLock<TaskList>,
    parking: Mutex<()>,
    waiter: Condvar,
    poisoned: AtomicBool,
}

impl Worker {
    pub fn new(id: usize) -> Arc<Self> {
        Arc::new(Self {
            id,
            inbox: SpinLock::new(TaskList::new()),
            parking: Mutex::new(()),
            waiter: Condvar::new(),
            poisoned: AtomicBool::new(false),
        })
    }

    /// Spawns the worker thread. The thread runs until poisoned.
    pub fn start(self: &Arc<Self>) -> thread::JoinHandle<()> {
        let worker = Arc::clone(self);
        thread::Builder::new()
            .name(format!("presage-worker-{}", self.id))
            .spawn(move || worker.run())
            .expect("failed to spawn worker thread")
    }

    /// Appends a task to the private inbox, waking the worker when the inbox was empty.
    pub fn add_task(&self, task: TaskInfo) {
        {
            let mut inbox = self.inbox.lock();
            let was_empty = inbox.is_empty();
            inbox.insert(task);
            if was_empty {
                let _parking = self.parking.lock().expect(ERR_POISONED_LOCK);
                self.waiter.notify_all();
            }
        }

        TasksDispatcher::instance().note_task_delivered();
    }

    /// Makes the worker exit its loop, waking it if parked. Only shutdown paths use this;
    /// the process-wide dispatcher keeps its workers for the rest of the process.
    #[cfg_attr(
        not(test),
        expect(dead_code, reason = "shutdown hook, exercised by tests only")
    )]
    pub fn poison_pill(&self) {
        self.poisoned.store(true, Ordering::Relaxed);
        let _parking = self.parking.lock().expect(ERR_POISONED_LOCK);
        self.waiter.notify_all();
    }

    fn run(&self) {
        let dispatcher = TasksDispatcher::instance();
        let mut idle_budget = dispatcher.idle_loops_amount();
        let mut task_observed = false;
        let mut no_task_ticks = 0_i32;

        while !self.poisoned.load(Ordering::Relaxed) {
            let Some(mut inbox) = self.inbox.lock_abandonable(&self.poisoned) else {
                break;
            };

            let Some(task) = inbox.pop_front() else {
                no_task_ticks += 1;
                if task_observed && no_task_ticks < idle_budget {
                    drop(inbox);
                    thread::yield_now();
                    continue;
                }

                // The parking lock is acquired before the inbox lock is released, so a wake-up
                // sent by add_task between the two cannot be lost. The poison flag is
                // re-checked under the parking lock for the same reason.
                let parking = self.parking.lock().expect(ERR_POISONED_LOCK);
                drop(inbox);
                if self.poisoned.load(Ordering::Relaxed) {
                    break;
                }
                drop(self.waiter.wait(parking).expect(ERR_POISONED_LOCK));

                idle_budget = dispatcher.idle_loops_amount();
                task_observed = false;
                no_task_ticks = 0;
                continue;
            };
            task_observed = true;
            drop(inbox);

            let TaskInfo {
                task: body,
                task_type,
                tag,
                ..
            } = task;
            if catch_unwind(AssertUnwindSafe(body)).is_err() {
                warn!(worker = self.id, "task panicked; panic swallowed");
            }

            let asking_for_next = self.inbox.lock().is_empty();
            dispatcher.task_finished(self.id, task_type, tag, asking_for_next);
            dispatcher.note_task_done();
        }
    }
}

impl fmt::Debug for Worker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Worker")
            .field("id", &self.id)
            .field("poisoned", &self.poisoned.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use presage_testing::execute_or_abandon;

    use super::*;

    #[test]
    fn poison_pill_makes_an_idle_worker_exit() {
        // A worker that never receives a task parks immediately; the pill must wake it and
        // make the thread finish. The worker is created directly, bypassing the dispatcher's
        // bookkeeping, which is fine as long as it never reports a finished task.
        let worker = Worker::new(usize::MAX);
        let thread = worker.start();

        worker.poison_pill();

        assert!(execute_or_abandon(move || thread.join().is_ok()).unwrap_or(false));
    }
}
