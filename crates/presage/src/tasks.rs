// Copyright (c) The Presage Project Authors.
// Licensed under the MIT License.

//! Task submission: run callables on the process-wide dispatcher and get futures back.
//!
//! Submission returns a [`CancelableFuture`] immediately, so arbitrarily long combinator
//! chains can be attached before the task ever runs. Three disciplines are available:
//! [`Custom`][TaskType::Custom] (optionally throttled per tag), [`Intensive`][TaskType::Intensive]
//! (capped at the hardware parallelism) and [`ThreadBound`][TaskType::ThreadBound] (all tasks
//! carrying one tag are serialized onto one worker thread).

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use tracing::debug;

use crate::cancelable::CancelableFuture;
use crate::failure::{self, Failure};
use crate::future::{Future, Promise};

pub(crate) mod task_list;
pub(crate) mod worker;

mod dispatcher;

pub use dispatcher::TasksDispatcher;

/// The scheduling discipline of a submitted task.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskType {
    /// Generic work; throttled per tag when the tag was registered with
    /// [`TasksDispatcher::add_custom_tag`], unthrottled on tag 0.
    Custom = 0,
    /// CPU-heavy work; all intensive tasks share one subpool capped at the hardware
    /// parallelism, regardless of tag.
    Intensive = 1,
    /// Work serialized onto one worker thread per tag, for stateful side effects that must
    /// never run concurrently with each other.
    ThreadBound = 2,
}

/// A scheduling priority key: lower keys dispatch earlier.
///
/// The named constants are conventional tiers; any `u8` is valid, so intermediate tiers can be
/// interpolated freely. There is no priority inversion protection - a running task is never
/// preempted by a higher-priority arrival.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskPriority(pub u8);

impl TaskPriority {
    /// Dispatches before everything else.
    pub const EMERGENCY: Self = Self(0x00);
    /// The default tier.
    pub const REGULAR: Self = Self(0x0F);
    /// Dispatches only when nothing more urgent is queued.
    pub const BACKGROUND: Self = Self(0xFF);

    pub(crate) const fn key(self) -> u8 {
        self.0
    }
}

impl Default for TaskPriority {
    fn default() -> Self {
        Self::REGULAR
    }
}

/// Runs a callable as an intensive task with default tag and priority.
pub fn run<T, E, F>(task: F) -> CancelableFuture<T, E>
where
    T: Send + Sync + 'static,
    E: Failure,
    F: FnOnce() -> T + Send + 'static,
{
    run_with(TaskType::Intensive, 0, TaskPriority::REGULAR, task)
}

/// Runs a callable under the given discipline, tag and priority.
///
/// The returned handle can cancel the task before it starts: a canceled task is skipped
/// entirely when the worker gets to it. A panicking task fails the future with an exception
/// failure; a failure injected through the last-failure slot wins over the returned value.
pub fn run_with<T, E, F>(
    task_type: TaskType,
    tag: i32,
    priority: TaskPriority,
    task: F,
) -> CancelableFuture<T, E>
where
    T: Send + Sync + 'static,
    E: Failure,
    F: FnOnce() -> T + Send + 'static,
{
    let promise = Promise::new();
    let handle = CancelableFuture::new(&promise);

    let body = move || {
        if promise.is_filled() {
            return;
        }
        failure::clear_last_failure();

        match failure::run_captured(task) {
            Ok(value) => promise.success(value),
            Err(reason) => promise.failure(reason),
        }
    };
    TasksDispatcher::instance().insert_task(Box::new(body), task_type, tag, priority);

    handle
}

/// Runs a future-producing callable as an intensive task; the returned future adopts the
/// produced future's outcome.
pub fn run_future<T, E, F>(task: F) -> CancelableFuture<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Failure,
    F: FnOnce() -> Future<T, E> + Send + 'static,
{
    run_future_with(TaskType::Intensive, 0, TaskPriority::REGULAR, task)
}

/// Runs a future-producing callable under the given discipline, tag and priority.
pub fn run_future_with<T, E, F>(
    task_type: TaskType,
    tag: i32,
    priority: TaskPriority,
    task: F,
) -> CancelableFuture<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Failure,
    F: FnOnce() -> Future<T, E> + Send + 'static,
{
    let promise = Promise::new();
    let handle = CancelableFuture::new(&promise);

    let body = move || {
        if promise.is_filled() {
            return;
        }
        failure::clear_last_failure();

        match failure::run_captured(task) {
            Ok(inner) => {
                let on_succeeded = promise.clone();
                inner.on_success(move |value| on_succeeded.success(value.clone()));
                inner.on_failure(move |reason| promise.failure(reason.clone()));
            }
            Err(reason) => promise.failure(reason),
        }
    };
    TasksDispatcher::instance().insert_task(Box::new(body), task_type, tag, priority);

    handle
}

/// Fire-and-forget submission with default discipline, tag and priority.
pub fn run_and_forget<F>(task: F)
where
    F: FnOnce() + Send + 'static,
{
    run_and_forget_with(TaskType::Intensive, 0, TaskPriority::REGULAR, task);
}

/// Fire-and-forget submission: no future, panics are swallowed.
pub fn run_and_forget_with<F>(task_type: TaskType, tag: i32, priority: TaskPriority, task: F)
where
    F: FnOnce() + Send + 'static,
{
    let body = move || {
        if catch_unwind(AssertUnwindSafe(task)).is_err() {
            debug!("fire-and-forget task panicked; panic swallowed");
        }
    };
    TasksDispatcher::instance().insert_task(Box::new(body), task_type, tag, priority);
}

/// Runs `task` once per element as intensive tasks and sequences the results in input order.
pub fn run_sequence<D, T, E, F>(data: Vec<D>, task: F) -> Future<Vec<T>, E>
where
    D: Send + 'static,
    T: Clone + Send + Sync + 'static,
    E: Failure,
    F: Fn(D) -> T + Send + Sync + 'static,
{
    run_sequence_with(TaskType::Intensive, 0, TaskPriority::REGULAR, data, task)
}

/// Runs `task` once per element under the given discipline and sequences the results in input
/// order. The aggregate fails on the first per-element failure.
pub fn run_sequence_with<D, T, E, F>(
    task_type: TaskType,
    tag: i32,
    priority: TaskPriority,
    data: Vec<D>,
    task: F,
) -> Future<Vec<T>, E>
where
    D: Send + 'static,
    T: Clone + Send + Sync + 'static,
    E: Failure,
    F: Fn(D) -> T + Send + Sync + 'static,
{
    if data.is_empty() {
        return Future::successful(Vec::new());
    }

    let task = Arc::new(task);
    let futures = data
        .into_iter()
        .map(|element| {
            let task = Arc::clone(&task);
            run_with(task_type, tag, priority, move || (*task)(element)).future()
        })
        .collect();

    Future::sequence(futures)
}

/// Like [`run_sequence`], but the callable also receives the element's input position.
pub fn run_sequence_indexed<D, T, E, F>(data: Vec<D>, task: F) -> Future<Vec<T>, E>
where
    D: Send + 'static,
    T: Clone + Send + Sync + 'static,
    E: Failure,
    F: Fn(usize, D) -> T + Send + Sync + 'static,
{
    let task = Arc::new(task);
    run_sequence(
        data.into_iter().enumerate().collect(),
        move |(index, element)| (*task)(index, element),
    )
}

/// Splits the input into at most `sub_pool_capacity` clusters, processes all but the last on
/// the pool and the last inline in the coordinating task, and assembles the results in input
/// order. See [`clustered_run_with`].
pub fn clustered_run<D, T, E, F>(
    data: Vec<D>,
    task: F,
    min_cluster_size: usize,
) -> Future<Vec<T>, E>
where
    D: Send + Sync + 'static,
    T: Clone + Default + Send + Sync + 'static,
    E: Failure,
    F: Fn(&D) -> T + Send + Sync + 'static,
{
    clustered_run_with(
        TaskType::Intensive,
        0,
        TaskPriority::REGULAR,
        data,
        task,
        min_cluster_size,
    )
}

/// The clustered counterpart of [`run_sequence_with`]: instead of one task per element, the
/// input is chunked so each cluster amortizes scheduling overhead over at least
/// `min_cluster_size` elements.
///
/// A failure injected in any cluster (or the inline tail) stops further elements of that
/// cluster from being processed; the coordinating task's own failure is reported first,
/// otherwise the first failed cluster in input order wins.
pub fn clustered_run_with<D, T, E, F>(
    task_type: TaskType,
    tag: i32,
    priority: TaskPriority,
    data: Vec<D>,
    task: F,
    min_cluster_size: usize,
) -> Future<Vec<T>, E>
where
    D: Send + Sync + 'static,
    T: Clone + Default + Send + Sync + 'static,
    E: Failure,
    F: Fn(&D) -> T + Send + Sync + 'static,
{
    if data.is_empty() {
        return Future::successful(Vec::new());
    }
    let min_cluster_size = min_cluster_size.max(1);

    run_future_with(task_type, tag, priority, move || {
        let amount = data.len();
        let wanted_clusters = amount.div_ceil(min_cluster_size);
        let capacity = usize::try_from(
            TasksDispatcher::instance()
                .sub_pool_capacity(task_type, tag)
                .max(1),
        )
        .unwrap_or(1)
        .min(wanted_clusters);
        let cluster_size = amount / capacity;
        // The last cluster is processed inline in this task, so only capacity - 1 jobs go to
        // the pool.
        let job_count = capacity - 1;

        let data = Arc::new(data);
        let task = Arc::new(task);

        let mut cluster_futures = Vec::with_capacity(job_count);
        for job in 0..job_count {
            let data = Arc::clone(&data);
            let task = Arc::clone(&task);
            cluster_futures.push(
                run_with(task_type, tag, priority, move || {
                    let start = job * cluster_size;
                    let end = (job + 1) * cluster_size;
                    let mut chunk = Vec::with_capacity(end - start);
                    for element in &data[start..end] {
                        if failure::has_last_failure() {
                            break;
                        }
                        chunk.push((*task)(element));
                    }
                    chunk
                })
                .future(),
            );
        }

        let start = job_count * cluster_size;
        let produced = failure::run_captured(|| {
            let mut tail = Vec::with_capacity(amount - start);
            for element in &data[start..] {
                if failure::has_last_failure() {
                    break;
                }
                tail.push((*task)(element));
            }
            tail
        });
        let (tail, local_failure) = match produced {
            Ok(tail) => {
                let injected = failure::has_last_failure().then(|| {
                    failure::take_last_failure::<E>().unwrap_or_else(|| E::from_message(""))
                });
                (tail, injected)
            }
            Err(reason) => (Vec::new(), Some(reason)),
        };
        failure::clear_last_failure();

        for cluster in &cluster_futures {
            cluster.wait(None);
        }

        if let Some(reason) = local_failure {
            return Future::failed(reason);
        }
        for cluster in &cluster_futures {
            if let Some(reason) = cluster.failure_reason() {
                return Future::failed(reason);
            }
        }

        let mut assembled = Vec::with_capacity(amount);
        for cluster in cluster_futures {
            assembled.extend(cluster.result());
        }
        assembled.extend(tail);
        Future::successful(assembled)
    })
    .future()
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicI32, AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    use presage_testing::{TEST_TIMEOUT, execute_or_abandon};

    use crate::failure::with_failure;
    use crate::repeat::{RepeaterResult, repeat_future};
    use crate::trampoline::trampoline;

    use super::*;

    #[test]
    fn run_returns_the_task_value() {
        let future: CancelableFuture<i32> = run(|| 40 + 2);

        assert!(future.wait(Some(TEST_TIMEOUT)));
        assert!(future.is_succeeded());
        assert_eq!(future.result(), 42);
    }

    #[test]
    fn run_off_the_caller_thread() {
        let caller = thread::current().id();
        let future: CancelableFuture<bool> = run(move || thread::current().id() != caller);

        assert!(future.wait(Some(TEST_TIMEOUT)));
        assert!(future.result());
    }

    #[test]
    #[expect(clippy::panic, reason = "the panic is the behavior under test")]
    fn run_panic_becomes_exception_failure() {
        let future: CancelableFuture<i32> = run(|| panic!("task blew up"));

        assert!(future.wait(Some(TEST_TIMEOUT)));
        assert!(future.is_failed());
        assert_eq!(
            future.failure_reason(),
            Some("Exception: task blew up".to_owned())
        );
    }

    #[test]
    fn run_with_injected_failure() {
        let future: CancelableFuture<i32> =
            run(|| with_failure::<i32, String>("not today".to_owned()));

        assert!(future.wait(Some(TEST_TIMEOUT)));
        assert!(future.is_failed());
        assert_eq!(future.failure_reason(), Some("not today".to_owned()));
    }

    #[test]
    fn run_future_adopts_inner_outcome() {
        let future: CancelableFuture<i32> =
            run_future(|| Future::successful(6).map(|x| x * 7));

        assert!(future.wait(Some(TEST_TIMEOUT)));
        assert_eq!(future.result(), 42);
    }

    #[test]
    #[expect(clippy::panic, reason = "the panic is the behavior under test")]
    fn run_and_forget_runs_and_swallows_panics() {
        let ran = Arc::new(AtomicBool::new(false));

        let ran_clone = Arc::clone(&ran);
        run_and_forget(move || {
            ran_clone.store(true, Ordering::SeqCst);
            panic!("nobody is listening");
        });

        let ran_clone = Arc::clone(&ran);
        assert_eq!(
            execute_or_abandon(move || {
                while !ran_clone.load(Ordering::SeqCst) {
                    thread::yield_now();
                }
                true
            }),
            Some(true)
        );
    }

    #[test]
    fn chain_can_be_built_before_the_task_runs() {
        // The full pipeline of combinators, assembled while the producing promise is still
        // open, must deliver 42 once everything settles.
        let first = Future::<i32>::successful(5).and_then_value(25.0);
        let promise = Promise::<i32>::new();

        let chained = promise
            .future()
            .recover(|_| 1)
            .recover_with(|reason| Future::failed(reason.clone()))
            .recover_value(5)
            .map(|_| 5)
            .filter(|_| true)
            .flat_map({
                let first = first.clone();
                move |_| first.clone()
            })
            .and_then({
                let first = first.clone();
                move || first.clone()
            })
            .map_failure(|reason| reason.clone());

        let answer = chained
            .zip(&run(|| 40 + 2).future())
            .map(|(_, answer)| *answer);

        promise.success(10);

        assert!(answer.wait(Some(TEST_TIMEOUT)));
        assert!(answer.is_succeeded());
        assert_eq!(answer.result(), 42);
    }

    #[test]
    fn thread_bound_tasks_share_one_thread() {
        let gate = Promise::<bool>::new();

        let first_thread: CancelableFuture<String> = {
            let gate = gate.future();
            run_with(TaskType::ThreadBound, 21, TaskPriority::REGULAR, move || {
                gate.wait(Some(TEST_TIMEOUT));
                format!("{:?}", thread::current().id())
            })
        };
        let second_thread: CancelableFuture<String> =
            run_with(TaskType::ThreadBound, 21, TaskPriority::REGULAR, || {
                format!("{:?}", thread::current().id())
            });

        gate.success(true);

        assert!(first_thread.wait(Some(TEST_TIMEOUT)));
        assert!(second_thread.wait(Some(TEST_TIMEOUT)));

        let first = first_thread.result();
        let second = second_thread.result();
        assert!(!first.is_empty());
        assert_eq!(first, second);
        assert_ne!(first, format!("{:?}", thread::current().id()));
    }

    #[test]
    fn distinct_tags_may_bind_to_distinct_threads_but_stay_affine() {
        let first_a: CancelableFuture<String> =
            run_with(TaskType::ThreadBound, 22, TaskPriority::REGULAR, || {
                format!("{:?}", thread::current().id())
            });
        let second_a: CancelableFuture<String> =
            run_with(TaskType::ThreadBound, 22, TaskPriority::REGULAR, || {
                format!("{:?}", thread::current().id())
            });

        assert!(first_a.wait(Some(TEST_TIMEOUT)));
        assert!(second_a.wait(Some(TEST_TIMEOUT)));
        assert_eq!(first_a.result(), second_a.result());
    }

    #[test]
    fn intensive_concurrency_never_exceeds_the_cap() {
        let cap = TasksDispatcher::instance().sub_pool_capacity(TaskType::Intensive, 0);
        let total = 2 * cap;

        let running = Arc::new(AtomicI32::new(0));
        let peak = Arc::new(AtomicI32::new(0));
        let finished = Arc::new(AtomicI32::new(0));
        let gate = Arc::new(AtomicBool::new(false));

        let mut futures: Vec<CancelableFuture<()>> = Vec::new();
        for _ in 0..total {
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            let finished = Arc::clone(&finished);
            let gate = Arc::clone(&gate);
            futures.push(run_with(
                TaskType::Intensive,
                0,
                TaskPriority::REGULAR,
                move || {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    while !gate.load(Ordering::SeqCst) {
                        thread::yield_now();
                    }
                    running.fetch_sub(1, Ordering::SeqCst);
                    finished.fetch_add(1, Ordering::SeqCst);
                },
            ));
        }

        // Give the dispatcher a moment to start whatever it is going to start; other tests
        // may be sharing the intensive pool, so only the upper bound is deterministic.
        thread::sleep(Duration::from_millis(100));
        assert!(peak.load(Ordering::SeqCst) <= cap);

        gate.store(true, Ordering::SeqCst);
        for future in &futures {
            assert!(future.wait(Some(TEST_TIMEOUT)));
        }
        assert_eq!(finished.load(Ordering::SeqCst), total);
        assert!(peak.load(Ordering::SeqCst) <= cap);
    }

    #[test]
    fn custom_tag_throttles_its_subpool() {
        TasksDispatcher::instance().add_custom_tag(31, 1);

        let running = Arc::new(AtomicI32::new(0));
        let peak = Arc::new(AtomicI32::new(0));
        let gate = Arc::new(AtomicBool::new(false));

        let mut futures: Vec<CancelableFuture<()>> = Vec::new();
        for _ in 0..4 {
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            let gate = Arc::clone(&gate);
            futures.push(run_with(
                TaskType::Custom,
                31,
                TaskPriority::REGULAR,
                move || {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    while !gate.load(Ordering::SeqCst) {
                        thread::yield_now();
                    }
                    running.fetch_sub(1, Ordering::SeqCst);
                },
            ));
        }

        thread::sleep(Duration::from_millis(50));
        gate.store(true, Ordering::SeqCst);

        for future in &futures {
            assert!(future.wait(Some(TEST_TIMEOUT)));
        }
        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn cancellation_is_observational() {
        // Park the tag-11 worker behind a blocker, then cancel a queued task: the canceled
        // task must never execute, while the task queued behind it still does.
        let blocker = Promise::<bool>::new();
        let executed = Arc::new(AtomicBool::new(false));

        let blocking: CancelableFuture<()> = {
            let blocker = blocker.future();
            run_with(TaskType::ThreadBound, 11, TaskPriority::REGULAR, move || {
                blocker.wait(Some(TEST_TIMEOUT));
            })
        };

        let canceled: CancelableFuture<()> = {
            let executed = Arc::clone(&executed);
            run_with(TaskType::ThreadBound, 11, TaskPriority::REGULAR, move || {
                executed.store(true, Ordering::SeqCst);
            })
        };
        let survivor: CancelableFuture<i32> =
            run_with(TaskType::ThreadBound, 11, TaskPriority::REGULAR, || 42);

        canceled.cancel();
        blocker.success(true);

        assert!(blocking.wait(Some(TEST_TIMEOUT)));
        assert!(survivor.wait(Some(TEST_TIMEOUT)));

        assert!(canceled.is_failed());
        assert_eq!(canceled.failure_reason(), Some("Canceled".to_owned()));
        assert!(!executed.load(Ordering::SeqCst));
        assert!(survivor.is_succeeded());
        assert_eq!(survivor.result(), 42);
    }

    #[test]
    fn priorities_order_a_bound_workers_inbox() {
        // One thread-bound tag serializes everything, so inbox ordering is observable: while
        // the worker is parked behind the blocker, an emergency arrival overtakes the
        // background task queued before it.
        let blocker = Promise::<bool>::new();
        let order = Arc::new(SpinLockVec::new());

        let blocking: CancelableFuture<()> = {
            let blocker = blocker.future();
            run_with(TaskType::ThreadBound, 41, TaskPriority::REGULAR, move || {
                blocker.wait(Some(TEST_TIMEOUT));
            })
        };

        let background: CancelableFuture<()> = {
            let order = Arc::clone(&order);
            run_with(
                TaskType::ThreadBound,
                41,
                TaskPriority::BACKGROUND,
                move || order.push("background"),
            )
        };
        let emergency: CancelableFuture<()> = {
            let order = Arc::clone(&order);
            run_with(
                TaskType::ThreadBound,
                41,
                TaskPriority::EMERGENCY,
                move || order.push("emergency"),
            )
        };

        blocker.success(true);

        assert!(blocking.wait(Some(TEST_TIMEOUT)));
        assert!(background.wait(Some(TEST_TIMEOUT)));
        assert!(emergency.wait(Some(TEST_TIMEOUT)));

        assert_eq!(order.snapshot(), vec!["emergency", "background"]);
    }

    #[test]
    fn run_sequence_preserves_input_order() {
        let sequenced: Future<Vec<i32>, String> =
            run_sequence((0..50).collect(), |element| element * 2);

        assert!(sequenced.wait(Some(TEST_TIMEOUT)));
        let values = sequenced.result();
        assert_eq!(values.len(), 50);
        for (index, value) in values.into_iter().enumerate() {
            assert_eq!(value, index as i32 * 2);
        }
    }

    #[test]
    fn run_sequence_fails_on_first_failure() {
        let sequenced: Future<Vec<i32>, String> = run_sequence((0..10).collect(), |element| {
            if element == 7 {
                with_failure::<i32, String>("seven is unlucky".to_owned())
            } else {
                element
            }
        });

        assert!(sequenced.wait(Some(TEST_TIMEOUT)));
        assert!(sequenced.is_failed());
        assert_eq!(
            sequenced.failure_reason(),
            Some("seven is unlucky".to_owned())
        );
    }

    #[test]
    fn run_sequence_indexed_passes_positions() {
        let sequenced: Future<Vec<usize>, String> =
            run_sequence_indexed(vec!["a", "bb", "ccc"], |index, element| {
                index * 100 + element.len()
            });

        assert!(sequenced.wait(Some(TEST_TIMEOUT)));
        assert_eq!(sequenced.result(), vec![1, 102, 203]);
    }

    #[test]
    fn clustered_run_matches_element_wise_results() {
        let data: Vec<i64> = (0..1000).collect();
        let clustered: Future<Vec<i64>, String> = clustered_run(data, |element| element * 3, 16);

        assert!(clustered.wait(Some(TEST_TIMEOUT)));
        let values = clustered.result();
        assert_eq!(values.len(), 1000);
        for (index, value) in values.into_iter().enumerate() {
            assert_eq!(value, index as i64 * 3);
        }
    }

    #[test]
    fn clustered_run_short_circuits_on_injected_failure() {
        let processed = Arc::new(AtomicUsize::new(0));

        let counting = Arc::clone(&processed);
        let clustered: Future<Vec<i64>, String> =
            clustered_run((0..1000).collect(), move |element: &i64| {
                counting.fetch_add(1, Ordering::SeqCst);
                if *element == 500 {
                    with_failure::<i64, String>("spoiled element".to_owned())
                } else {
                    *element
                }
            }, 10);

        assert!(clustered.wait(Some(TEST_TIMEOUT)));
        assert!(clustered.is_failed());
        assert_eq!(
            clustered.failure_reason(),
            Some("spoiled element".to_owned())
        );
        assert!(processed.load(Ordering::SeqCst) < 1000);
    }

    #[test]
    fn deep_recursion_with_trampoline_completes() {
        fn descend(step: i32, limit: i32) -> Future<i32, String> {
            let produced = run(move || step).future();
            if step >= limit {
                return produced;
            }
            produced.flat_map(move |&x| trampoline(descend(x + 1, limit)))
        }

        let depth = 50_000;
        let finished = descend(0, depth);

        assert!(finished.wait(Some(Duration::from_secs(60))));
        assert!(finished.is_succeeded());
        assert_eq!(finished.result(), depth);
    }

    #[test]
    fn repeat_future_with_trampolined_tasks_completes() {
        let finisher = Promise::<RepeaterResult<i32, i32>>::new();

        let stepped: Future<i32, String> = repeat_future(
            {
                let finisher = finisher.future();
                move |step: i32| {
                    if step >= 20_000 {
                        return finisher.clone();
                    }
                    run(move || RepeaterResult::TrampolinedContinue(step + 1)).future()
                }
            },
            0,
        );

        assert!(!stepped.is_completed());
        finisher.success(RepeaterResult::Finish(42));

        assert!(stepped.wait(Some(Duration::from_secs(60))));
        assert!(stepped.is_succeeded());
        assert_eq!(stepped.result(), 42);
    }

    #[test]
    fn instant_usage_settles_back_down() {
        let dispatcher = TasksDispatcher::instance();

        let futures: Vec<CancelableFuture<i32>> = (0..16).map(|i| run(move || i)).collect();
        for future in &futures {
            assert!(future.wait(Some(TEST_TIMEOUT)));
        }

        // In-flight counts from concurrently running suites may be nonzero, but they can
        // never be negative.
        assert!(dispatcher.instant_usage() >= 0);
    }

    /// Tiny append-only list used to observe execution order from task callbacks.
    struct SpinLockVec {
        inner: crate::spin::SpinLock<Vec<&'static str>>,
    }

    impl SpinLockVec {
        fn new() -> Self {
            Self {
                inner: crate::spin::SpinLock::new(Vec::new()),
            }
        }

        fn push(&self, label: &'static str) {
            self.inner.lock().push(label);
        }

        fn snapshot(&self) -> Vec<&'static str> {
            self.inner.lock().clone()
        }
    }
}
