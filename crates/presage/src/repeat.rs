// Copyright (c) The Presage Project Authors.
// Licensed under the MIT License.

//! Loop combinators over futures.

use std::sync::Arc;

use crate::failure::{self, Failure};
use crate::future::{Future, Promise};
use crate::trampoline::trampoline;

/// What one step of a [`repeat`]/[`repeat_future`] loop decided.
///
/// Multiple loop variables are carried as a tuple in `A`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepeaterResult<T, A> {
    /// The loop is done; resolve with this value.
    Finish(T),
    /// Run another step with these arguments.
    Continue(A),
    /// Run another step with these arguments, adopting it through the
    /// [`trampoline`] so unbounded depth completes in bounded stack.
    TrampolinedContinue(A),
}

/// Runs `step` repeatedly until it finishes, fails, panics or injects a failure through the
/// last-failure slot. The slot is cleared at every step boundary so a stale failure cannot
/// leak between steps.
///
/// The loop is iterative, so both `Continue` flavors behave identically here; the trampolined
/// one only matters for [`repeat_future`].
pub fn repeat<T, E, A, F>(mut step: F, initial: A) -> Future<T, E>
where
    T: Send + Sync + 'static,
    E: Failure,
    F: FnMut(A) -> RepeaterResult<T, A>,
{
    let mut args = initial;
    loop {
        failure::clear_last_failure();

        let outcome = failure::run_captured(|| step(args));

        if failure::has_last_failure() {
            let injected =
                failure::take_last_failure::<E>().unwrap_or_else(|| E::from_message(""));
            return Future::failed(injected);
        }

        match outcome {
            Ok(RepeaterResult::Finish(value)) => return Future::successful(value),
            Ok(RepeaterResult::Continue(next) | RepeaterResult::TrampolinedContinue(next)) => {
                args = next;
            }
            Err(reason) => return Future::failed(reason),
        }
    }
}

/// Like [`repeat`], but each step is asynchronous: `step` returns a future of the step
/// decision and the loop chains on it. A `TrampolinedContinue` decision routes the next step
/// through the [`trampoline`], which keeps arbitrarily long loops in bounded stack.
pub fn repeat_future<T, E, A, F>(step: F, initial: A) -> Future<T, E>
where
    T: Clone + Send + Sync + 'static,
    A: Clone + Send + Sync + 'static,
    E: Failure,
    F: Fn(A) -> Future<RepeaterResult<T, A>, E> + Clone + Send + Sync + 'static,
{
    let produced = match failure::run_captured(|| step(initial)) {
        Ok(produced) => produced,
        Err(reason) => return Future::failed(reason),
    };

    produced.flat_map(move |outcome| match outcome.clone() {
        RepeaterResult::Finish(value) => Future::successful(value),
        RepeaterResult::Continue(next) => repeat_future(step, next),
        RepeaterResult::TrampolinedContinue(next) => trampoline(repeat_future(step, next)),
    })
}

/// Folds `step` over the collection, left to right, threading the accumulator through the
/// produced futures. Suspends on a pending inner future and resumes from its value; the first
/// failure (returned, panicked or injected) short-circuits the fold.
pub fn repeat_for_sequence<D, T, E, F>(data: Vec<D>, initial: T, step: F) -> Future<T, E>
where
    D: Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
    E: Failure,
    F: Fn(&D, T) -> Future<T, E> + Send + Sync + 'static,
{
    if data.is_empty() {
        return Future::successful(initial);
    }

    let promise = Promise::new();
    iterate_fold(data, 0, initial, promise.clone(), Arc::new(step));
    promise.future()
}

fn iterate_fold<D, T, E, F>(
    data: Vec<D>,
    from: usize,
    mut accumulator: T,
    promise: Promise<T, E>,
    step: Arc<F>,
) where
    D: Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
    E: Failure,
    F: Fn(&D, T) -> Future<T, E> + Send + Sync + 'static,
{
    let mut index = from;
    while index < data.len() {
        let produced = {
            let element = &data[index];
            failure::run_captured(|| (*step)(element, accumulator))
        };
        let inner = match produced {
            Ok(inner) => inner,
            Err(reason) => {
                promise.failure(reason);
                return;
            }
        };

        index += 1;

        if !inner.is_completed() {
            let failed_promise = promise.clone();
            inner.on_failure(move |reason| failed_promise.failure(reason.clone()));
            inner.on_success(move |value| {
                iterate_fold(data, index, value.clone(), promise, step);
            });
            return;
        }

        if let Some(reason) = inner.peek_failure() {
            promise.failure(reason.clone());
            return;
        }

        let Some(value) = inner.peek_success() else {
            return;
        };
        accumulator = value.clone();
    }

    promise.success(accumulator);
}
