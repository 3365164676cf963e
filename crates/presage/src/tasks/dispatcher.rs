// Copyright (c) The Presage Project Authors.
// Licensed under the MIT License.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicI32, Ordering};
use std::thread;

use once_cell::sync::Lazy;
use tracing::{debug, trace};

use crate::spin::SpinLock;
use crate::tasks::task_list::{TaskInfo, TaskList};
use crate::tasks::worker::Worker;
use crate::tasks::{TaskPriority, TaskType};

/// How many spin-yields a worker performs after running dry before parking on its condvar.
const DEFAULT_IDLE_LOOPS: i32 = 1024;

/// The concurrency cap shared by all intensive tasks.
pub(crate) fn intensive_capacity() -> i32 {
    static CAPACITY: Lazy<i32> = Lazy::new(|| {
        thread::available_parallelism()
            .map_or(1, |count| count.get() as i32)
            .max(1)
    });
    *CAPACITY
}

fn default_custom_capacity() -> i32 {
    intensive_capacity()
}

fn default_total_capacity() -> i32 {
    64.max(intensive_capacity().saturating_mul(8))
}

/// Packs a subpool identity into one map key.
pub(crate) const fn pool_key(task_type: TaskType, tag: i32) -> u64 {
    let tag = if tag > 0 { tag as u64 } else { 0 };
    ((task_type as u64) << 32) | tag
}

const INTENSIVE_SUBPOOL: u64 = pool_key(TaskType::Intensive, 0);

fn custom_tag_capacity(capacities: &HashMap<i32, i32>, tag: i32) -> i32 {
    capacities
        .get(&tag)
        .copied()
        .unwrap_or_else(default_custom_capacity)
}

/// The process-wide task dispatcher: a capacity-bounded worker pool with subpool accounting,
/// thread-bound tags and priority scheduling.
///
/// All bookkeeping lives behind one spin lock; only the in-flight counter and the idle-loop
/// budget are atomics readable without it. Workers are spawned lazily up to the capacity and
/// live for the rest of the process.
#[derive(Debug)]
pub struct TasksDispatcher {
    state: SpinLock<DispatcherState>,
    instant_usage: AtomicI32,
    idle_loops_amount: AtomicI32,
}

#[derive(Debug)]
struct DispatcherState {
    /// Packed (type, tag) -> number of tasks currently delivered for that subpool.
    sub_pools_usage: HashMap<u64, i32>,
    /// Custom tag -> configured capacity. Tag 0 always mirrors the total capacity.
    custom_tag_capacities: HashMap<i32, i32>,
    /// All tasks not yet handed to a specific worker. Thread-bound tasks with a known binding
    /// never land here - they go straight to the bound worker's inbox.
    tasks_queue: TaskList,
    /// Grows up to `capacity`, never shrinks.
    all_workers: Vec<Arc<Worker>>,
    /// Indices into `all_workers` of workers currently parked waiting for work.
    available_workers: HashSet<usize>,
    /// Thread-bound tag -> index of the worker serializing that tag.
    tag_to_worker_bindings: HashMap<i32, usize>,
    /// Worker index -> number of tags bound to it.
    workers_bindings_count: HashMap<usize, i32>,
    capacity: i32,
    bound_capacity: i32,
}

static INSTANCE: Lazy<TasksDispatcher> = Lazy::new(TasksDispatcher::new);

impl TasksDispatcher {
    /// The dispatcher singleton.
    #[must_use]
    pub fn instance() -> &'static Self {
        &INSTANCE
    }

    fn new() -> Self {
        let capacity = default_total_capacity();
        let mut custom_tag_capacities = HashMap::new();
        custom_tag_capacities.insert(0, capacity);

        Self {
            state: SpinLock::new(DispatcherState {
                sub_pools_usage: HashMap::new(),
                custom_tag_capacities,
                tasks_queue: TaskList::new(),
                all_workers: Vec::new(),
                available_workers: HashSet::new(),
                tag_to_worker_bindings: HashMap::new(),
                workers_bindings_count: HashMap::new(),
                capacity,
                bound_capacity: capacity / 4,
            }),
            instant_usage: AtomicI32::new(0),
            idle_loops_amount: AtomicI32::new(DEFAULT_IDLE_LOOPS),
        }
    }

    /// The total worker cap.
    #[must_use]
    pub fn capacity(&self) -> i32 {
        self.state.lock().capacity
    }

    /// The capacity of the (type, tag) subpool.
    #[must_use]
    pub fn sub_pool_capacity(&self, task_type: TaskType, tag: i32) -> i32 {
        match task_type {
            TaskType::ThreadBound => self.state.lock().bound_capacity,
            TaskType::Intensive => intensive_capacity(),
            TaskType::Custom => {
                if tag <= 0 {
                    self.capacity()
                } else {
                    let state = self.state.lock();
                    custom_tag_capacity(&state.custom_tag_capacities, tag)
                }
            }
        }
    }

    /// Grows the total worker cap. The value is clamped so it can never drop below the
    /// intensive capacity or below the number of already spawned workers.
    pub fn set_capacity(&self, capacity: i32) {
        let mut state = self.state.lock();
        let capacity = capacity
            .max(intensive_capacity())
            .max(state.all_workers.len() as i32);
        state.capacity = capacity;
        state.custom_tag_capacities.insert(0, capacity);
        state.bound_capacity = state.bound_capacity.min(capacity);
        debug!(capacity, "dispatcher capacity changed");
    }

    /// Registers a throttled custom subpool. Ignored for non-positive tags; the capacity is
    /// clamped into `[1, total capacity]`.
    pub fn add_custom_tag(&self, tag: i32, capacity: i32) {
        if tag <= 0 {
            return;
        }

        let mut state = self.state.lock();
        let capacity = capacity.clamp(1, state.capacity);
        state.custom_tag_capacities.insert(tag, capacity);
    }

    /// Changes how many workers may host thread-bound tags. Clamped so it never drops below
    /// the number of workers already hosting bindings.
    pub fn set_bound_capacity(&self, capacity: i32) {
        let mut state = self.state.lock();
        state.bound_capacity = capacity.max(state.workers_bindings_count.len() as i32);
    }

    /// How many spin-yields a worker performs between checks before parking.
    #[must_use]
    pub fn idle_loops_amount(&self) -> i32 {
        self.idle_loops_amount.load(Ordering::Relaxed)
    }

    /// Tunes the idle-spin budget. Running workers pick the new value up when they next park.
    pub fn set_idle_loops_amount(&self, amount: i32) {
        self.idle_loops_amount.store(amount, Ordering::Relaxed);
    }

    /// How many tasks are currently in worker inboxes or executing.
    #[must_use]
    pub fn instant_usage(&self) -> i32 {
        self.instant_usage.load(Ordering::Relaxed)
    }

    pub(crate) fn note_task_delivered(&self) {
        self.instant_usage.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn note_task_done(&self) {
        self.instant_usage.fetch_sub(1, Ordering::Relaxed);
    }

    /// Spawns workers eagerly up to `amount` (clamped into `[0, 1]`) of the total capacity,
    /// with a minimum of one worker.
    pub fn pre_heat_pool(&self, amount: f64) {
        let capacity = self.capacity();
        let amount = amount.clamp(0.0, 1.0);
        let desired = ((amount * f64::from(capacity)).round() as i32).clamp(1, capacity);

        let mut state = self.state.lock();
        while (state.all_workers.len() as i32) < desired {
            if !state.create_new_worker_if_possible() {
                break;
            }
        }
    }

    /// Spawns workers eagerly up to the intensive capacity.
    pub fn pre_heat_intensive_pool(&self) {
        let mut state = self.state.lock();
        while (state.all_workers.len() as i32) < intensive_capacity() {
            if !state.create_new_worker_if_possible() {
                break;
            }
        }
    }

    /// Accepts a wrapped task for execution. Intensive tasks are folded onto tag 0; negative
    /// tags are treated as 0.
    pub(crate) fn insert_task(
        &self,
        task: Box<dyn FnOnce() + Send>,
        task_type: TaskType,
        tag: i32,
        priority: TaskPriority,
    ) {
        let tag = if task_type == TaskType::Intensive {
            0
        } else {
            tag.max(0)
        };
        let info = TaskInfo {
            task,
            task_type,
            tag,
            priority,
        };

        let mut state = self.state.lock();

        if task_type == TaskType::ThreadBound {
            // A known binding bypasses the queue entirely; the bound worker serializes.
            if let Some(&bound) = state.tag_to_worker_bindings.get(&tag) {
                state.all_workers[bound].add_task(info);
                return;
            }
        } else if !state.available_workers.is_empty() && state.tasks_queue.is_empty() {
            // Fast path: an idle worker, an empty queue and free subpool budget mean the task
            // can skip the queue.
            if let Some(worker_index) = state.available_workers.iter().next().copied() {
                if state.schedule_single_task(&info, worker_index) {
                    let worker = Arc::clone(&state.all_workers[worker_index]);
                    drop(state);
                    worker.add_task(info);
                    return;
                }
            }
        }

        state.tasks_queue.insert(info);
        if !state.available_workers.is_empty() || (state.all_workers.len() as i32) < state.capacity
        {
            // A saturated intensive subpool cannot dispatch anything new; the queued task will
            // be picked up when a running intensive task finishes.
            if task_type == TaskType::Intensive
                && state
                    .sub_pools_usage
                    .get(&INTENSIVE_SUBPOOL)
                    .copied()
                    .unwrap_or(0)
                    >= intensive_capacity()
            {
                return;
            }

            drop(state);
            self.schedule(None);
        }
    }

    /// A worker finished a task: release its subpool slot and, when the worker's inbox ran
    /// dry, offer the worker to the scheduler again.
    pub(crate) fn task_finished(
        &self,
        worker_id: usize,
        task_type: TaskType,
        tag: i32,
        asking_for_next: bool,
    ) {
        let mut state = self.state.lock();

        if task_type != TaskType::ThreadBound {
            let key = pool_key(task_type, tag);
            let remaining = {
                let usage = state.sub_pools_usage.entry(key).or_insert(0);
                *usage -= 1;
                *usage
            };
            if remaining <= 0 {
                if tag != 0 {
                    state.sub_pools_usage.remove(&key);
                } else {
                    state.sub_pools_usage.insert(key, 0);
                }
            }
        }

        if asking_for_next {
            state.available_workers.insert(worker_id);
            drop(state);
            self.schedule(Some(worker_id));
        }
    }

    /// Picks a target worker (the hint when still available) and walks the shared queue in
    /// priority-then-FIFO order, dispatching every resolvable thread-bound task it passes and
    /// at most one non-bound task.
    fn schedule(&self, hint: Option<usize>) {
        let mut state = self.state.lock();

        if state.tasks_queue.is_empty() {
            return;
        }
        if state.available_workers.is_empty() && !state.create_new_worker_if_possible() {
            return;
        }

        let worker_index = match hint {
            Some(hinted) if state.available_workers.contains(&hinted) => hinted,
            _ => {
                let Some(&any) = state.available_workers.iter().next() else {
                    return;
                };
                any
            }
        };
        trace!(
            queued = state.tasks_queue.len(),
            worker = worker_index,
            "scanning task queue"
        );

        let handoff = state
            .scan_queue(worker_index)
            .map(|(index, task)| (Arc::clone(&state.all_workers[index]), task));
        drop(state);

        if let Some((worker, task)) = handoff {
            worker.add_task(task);
        }
    }
}

impl DispatcherState {
    /// Reserves a subpool slot and the worker for a non-bound task, when the subpool has room.
    fn schedule_single_task(&mut self, task: &TaskInfo, worker_index: usize) -> bool {
        if task.task_type == TaskType::ThreadBound {
            return false;
        }

        let key = pool_key(task.task_type, task.tag);
        let capacity_left = match task.task_type {
            TaskType::Intensive => intensive_capacity(),
            _ => custom_tag_capacity(&self.custom_tag_capacities, task.tag),
        } - self.sub_pools_usage.get(&key).copied().unwrap_or(0);

        if capacity_left <= 0 {
            return false;
        }

        *self.sub_pools_usage.entry(key).or_insert(0) += 1;
        self.available_workers.remove(&worker_index);
        true
    }

    fn create_new_worker_if_possible(&mut self) -> bool {
        let id = self.all_workers.len();
        if (id as i32) >= self.capacity {
            return false;
        }

        self.available_workers.insert(id);
        let worker = Worker::new(id);
        // Workers are detached; they live for the rest of the process.
        drop(worker.start());
        self.all_workers.push(worker);
        debug!(worker = id, "spawned new worker");
        true
    }

    /// The queue scan of `schedule()`. Dispatches thread-bound tasks inline (their inbox
    /// delivery is part of the binding bookkeeping) and returns the single non-bound task
    /// selected for `worker_index`, to be delivered after the dispatcher lock is released.
    fn scan_queue(&mut self, worker_index: usize) -> Option<(usize, TaskInfo)> {
        let mut cursor = self.tasks_queue.cursor();

        while let Some(task) = cursor.current() {
            if task.task_type == TaskType::ThreadBound {
                let tag = task.tag;
                // The binding may have appeared while the task sat in the queue.
                let (bound_worker, new_binding) =
                    if let Some(&bound) = self.tag_to_worker_bindings.get(&tag) {
                        (Some(bound), false)
                    } else if (self.workers_bindings_count.len() as i32) < self.bound_capacity {
                        // Bindings are spread evenly: prefer a fresh host, then the hinted
                        // worker if it has no bindings yet.
                        if self.workers_bindings_count.contains_key(&worker_index) {
                            (
                                self.available_workers
                                    .iter()
                                    .copied()
                                    .find(|candidate| {
                                        !self.workers_bindings_count.contains_key(candidate)
                                    }),
                                true,
                            )
                        } else {
                            (Some(worker_index), true)
                        }
                    } else {
                        // All binding hosts are taken; pile onto the one with the fewest tags.
                        (
                            self.available_workers
                                .iter()
                                .copied()
                                .filter(|candidate| {
                                    self.workers_bindings_count.contains_key(candidate)
                                })
                                .min_by_key(|candidate| self.workers_bindings_count[candidate]),
                            true,
                        )
                    };

                if let Some(bound) = bound_worker {
                    if new_binding {
                        *self.workers_bindings_count.entry(bound).or_insert(0) += 1;
                        self.tag_to_worker_bindings.insert(tag, bound);
                        debug!(tag, worker = bound, "bound tag to worker");
                    }
                    self.available_workers.remove(&bound);

                    let Some(task) = cursor.take_current() else {
                        break;
                    };
                    self.all_workers[bound].add_task(task);

                    if bound == worker_index {
                        break;
                    }
                    continue;
                }

                cursor.advance();
                continue;
            }

            let key = pool_key(task.task_type, task.tag);
            let capacity_left = match task.task_type {
                TaskType::Intensive => intensive_capacity(),
                _ => custom_tag_capacity(&self.custom_tag_capacities, task.tag),
            } - self.sub_pools_usage.get(&key).copied().unwrap_or(0);

            if capacity_left > 0 {
                *self.sub_pools_usage.entry(key).or_insert(0) += 1;
                self.available_workers.remove(&worker_index);
                return cursor.take_current().map(|task| (worker_index, task));
            }

            cursor.advance();
        }

        None
    }
}
