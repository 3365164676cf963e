// Copyright (c) The Presage Project Authors.
// Licensed under the MIT License.

//! The future/promise core: a lazy, callback-driven carrier of a value or a failure.
//!
//! A [`Promise`] is the write side, a [`Future`] the read side; both are cheap handles onto a
//! jointly owned shared state. Completion is monotonic and delivered exactly once to every
//! registered callback, in registration order, with no lock held. Combinators never block:
//! they allocate a fresh result future, register callbacks on their input and return
//! immediately, so arbitrarily long chains can be built before the first value arrives.

use std::fmt;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::constants::ERR_POISONED_LOCK;
use crate::failure::{self, Failure};
use crate::spin::SpinLock;

mod data;
mod sequence;
mod zip;

pub use data::instant_futures_usage;

use data::FutureData;

/// The read side of an asynchronous computation: completed exactly once with either a value of
/// type `T` or a failure of type `E`, then immutable forever.
///
/// Handles are cheap to clone; all clones alias the same shared state. Reading accessors
/// ([`result`][Self::result], [`result_ref`][Self::result_ref],
/// [`failure_reason`][Self::failure_reason], [`wait`][Self::wait]) block; everything else,
/// including every combinator, returns immediately.
pub struct Future<T, E = String> {
    data: Arc<FutureData<T, E>>,
}

/// The write side: fill it once with [`success`][Self::success] or [`failure`][Self::failure].
///
/// Creating a promise allocates the shared state eagerly; [`future()`][Self::future] hands out
/// read-side handles aliasing that state. Redundant fills are silently dropped.
pub struct Promise<T, E = String> {
    future: Future<T, E>,
}

impl<T, E> Clone for Future<T, E> {
    fn clone(&self) -> Self {
        Self {
            data: Arc::clone(&self.data),
        }
    }
}

impl<T, E> Clone for Promise<T, E> {
    fn clone(&self) -> Self {
        Self {
            future: self.future.clone(),
        }
    }
}

impl<T, E> PartialEq for Future<T, E> {
    /// Two futures are equal when they alias the same shared state.
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }
}

impl<T, E> fmt::Debug for Future<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Future").field("data", &self.data).finish()
    }
}

impl<T, E> fmt::Debug for Promise<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Promise")
            .field("data", &self.future.data)
            .finish()
    }
}

impl<T, E> Future<T, E>
where
    T: Send + Sync + 'static,
    E: Failure,
{
    pub(crate) fn create() -> Self {
        Self {
            data: Arc::new(FutureData::new()),
        }
    }

    /// An already succeeded future.
    #[must_use]
    pub fn successful(value: T) -> Self {
        let result = Self::create();
        result.fill_success(value);
        result
    }

    /// An already failed future.
    #[must_use]
    pub fn failed(reason: E) -> Self {
        let result = Self::create();
        result.fill_failure(reason);
        result
    }

    /// Whether the future has reached a terminal state.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.data.is_completed()
    }

    /// Whether the future completed with a value.
    #[must_use]
    pub fn is_succeeded(&self) -> bool {
        self.data.is_succeeded()
    }

    /// Whether the future completed with a failure.
    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.data.is_failed()
    }

    /// Always true: a future handle cannot be detached from its shared state.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        true
    }

    /// Blocks until the future completes, or until the timeout elapses when one is given.
    /// Returns whether the future is completed; a failed future counts as completed.
    pub fn wait(&self, timeout: Option<Duration>) -> bool {
        if self.is_completed() {
            return true;
        }

        let parking = Arc::new((Mutex::new(false), Condvar::new()));
        let signal = Arc::clone(&parking);
        self.on_complete(move || {
            let (done, waiter) = &*signal;
            *done.lock().expect(ERR_POISONED_LOCK) = true;
            waiter.notify_all();
        });

        let (done, waiter) = &*parking;
        let mut completed = done.lock().expect(ERR_POISONED_LOCK);
        match timeout {
            None => {
                while !*completed {
                    completed = waiter.wait(completed).expect(ERR_POISONED_LOCK);
                }
            }
            Some(limit) => {
                let deadline = Instant::now() + limit;
                while !*completed {
                    let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
                        break;
                    };
                    let (guard, _) = waiter
                        .wait_timeout(completed, remaining)
                        .expect(ERR_POISONED_LOCK);
                    completed = guard;
                }
            }
        }

        self.is_completed()
    }

    /// Blocks until completion and returns the value, or `T::default()` if the future failed.
    pub fn result(&self) -> T
    where
        T: Clone + Default,
    {
        self.wait(None);
        self.data.success_ref().cloned().unwrap_or_default()
    }

    /// Blocks until completion and borrows the value.
    ///
    /// # Panics
    ///
    /// Panics if the future completed with a failure; check [`is_failed`][Self::is_failed] or
    /// use [`result`][Self::result] when failure is a possibility.
    #[expect(
        clippy::panic,
        reason = "a failed future has no value to borrow; the panic is the documented contract"
    )]
    pub fn result_ref(&self) -> &T {
        self.wait(None);
        match self.data.success_ref() {
            Some(value) => value,
            None => panic!("result_ref() called on a failed future"),
        }
    }

    /// Blocks until completion and returns the failure, or `None` if the future succeeded.
    pub fn failure_reason(&self) -> Option<E> {
        self.wait(None);
        self.data.failure_ref().cloned()
    }

    pub(crate) fn peek_success(&self) -> Option<&T> {
        self.data.success_ref()
    }

    pub(crate) fn peek_failure(&self) -> Option<&E> {
        self.data.failure_ref()
    }

    pub(crate) fn fill_success(&self, value: T) {
        self.data.fill_success(value);
    }

    pub(crate) fn fill_failure(&self, reason: E) {
        self.data.fill_failure(reason);
    }

    /// Registers a callback invoked with the value once the future succeeds; invoked
    /// immediately (on the current thread) when it already has. Returns a handle to the same
    /// future so calls chain.
    pub fn on_success<F>(&self, f: F) -> Self
    where
        F: FnOnce(&T) + Send + 'static,
    {
        self.data.register_success(Box::new(f));
        self.clone()
    }

    /// Registers a callback invoked with the failure once the future fails; see
    /// [`on_success`][Self::on_success].
    pub fn on_failure<F>(&self, f: F) -> Self
    where
        F: FnOnce(&E) + Send + 'static,
    {
        self.data.register_failure(Box::new(f));
        self.clone()
    }

    /// Registers a callback invoked exactly once when the future completes, whichever way.
    pub fn on_complete<F>(&self, f: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        // Only one of the two lists ever fires (the other is discarded by the terminal
        // transition), so registering the same run-once continuation on both is safe.
        let shared = Arc::new(SpinLock::new(Some(f)));
        let on_succeeded = Arc::clone(&shared);
        self.on_success(move |_| {
            if let Some(f) = on_succeeded.lock().take() {
                f();
            }
        });
        self.on_failure(move |_| {
            if let Some(f) = shared.lock().take() {
                f();
            }
        });
        self.clone()
    }

    /// Transforms the value; failures pass through untouched and a panicking `f` fails the
    /// result with an exception failure.
    pub fn map<U, F>(&self, f: F) -> Future<U, E>
    where
        U: Send + Sync + 'static,
        F: FnOnce(&T) -> U + Send + 'static,
    {
        let result = Future::<U, E>::create();

        let on_succeeded = result.clone();
        self.on_success(move |value| match failure::run_captured(|| f(value)) {
            Ok(mapped) => on_succeeded.fill_success(mapped),
            Err(reason) => on_succeeded.fill_failure(reason),
        });

        let on_failed = result.clone();
        self.on_failure(move |reason| on_failed.fill_failure(reason.clone()));

        result
    }

    /// Chains an asynchronous continuation: `f` produces a future whose outcome becomes the
    /// result. The outer failure short-circuits without invoking `f`.
    pub fn flat_map<U, F>(&self, f: F) -> Future<U, E>
    where
        U: Clone + Send + Sync + 'static,
        F: FnOnce(&T) -> Future<U, E> + Send + 'static,
    {
        let result = Future::<U, E>::create();

        let on_succeeded = result.clone();
        self.on_success(move |value| match failure::run_captured(|| f(value)) {
            Ok(inner) => {
                let adopted = on_succeeded.clone();
                inner.on_success(move |value| adopted.fill_success(value.clone()));
                inner.on_failure(move |reason| on_succeeded.fill_failure(reason.clone()));
            }
            Err(reason) => on_succeeded.fill_failure(reason),
        });

        let on_failed = result.clone();
        self.on_failure(move |reason| on_failed.fill_failure(reason.clone()));

        result
    }

    /// Like [`flat_map`][Self::flat_map], but the continuation ignores the value.
    pub fn and_then<U, F>(&self, f: F) -> Future<U, E>
    where
        U: Clone + Send + Sync + 'static,
        F: FnOnce() -> Future<U, E> + Send + 'static,
    {
        self.flat_map(move |_| f())
    }

    /// Replaces the value on success; failures pass through untouched.
    pub fn and_then_value<U>(&self, value: U) -> Future<U, E>
    where
        U: Send + Sync + 'static,
    {
        self.map(move |_| value)
    }

    /// Passes the value through when the predicate holds, otherwise fails with the stock
    /// rejection payload.
    pub fn filter<F>(&self, predicate: F) -> Self
    where
        T: Clone,
        F: FnOnce(&T) -> bool + Send + 'static,
    {
        self.filter_or(E::rejected(), predicate)
    }

    /// Passes the value through when the predicate holds, otherwise fails with `rejected`.
    pub fn filter_or<F>(&self, rejected: E, predicate: F) -> Self
    where
        T: Clone,
        F: FnOnce(&T) -> bool + Send + 'static,
    {
        let result = Self::create();

        let on_succeeded = result.clone();
        self.on_success(
            move |value| match failure::run_captured(|| predicate(value)) {
                Ok(true) => on_succeeded.fill_success(value.clone()),
                Ok(false) => on_succeeded.fill_failure(rejected),
                Err(reason) => on_succeeded.fill_failure(reason),
            },
        );

        let on_failed = result.clone();
        self.on_failure(move |reason| on_failed.fill_failure(reason.clone()));

        result
    }

    /// Turns a failure back into a value; successes pass through untouched. The result can
    /// only fail if `f` itself panics.
    pub fn recover<F>(&self, f: F) -> Self
    where
        T: Clone,
        F: FnOnce(&E) -> T + Send + 'static,
    {
        let result = Self::create();

        let on_succeeded = result.clone();
        self.on_success(move |value| on_succeeded.fill_success(value.clone()));

        let on_failed = result.clone();
        self.on_failure(move |reason| match failure::run_captured(|| f(reason)) {
            Ok(value) => on_failed.fill_success(value),
            Err(reason) => on_failed.fill_failure(reason),
        });

        result
    }

    /// Like [`recover`][Self::recover], but the recovery itself is asynchronous: the result
    /// adopts the future produced from the failure.
    pub fn recover_with<F>(&self, f: F) -> Self
    where
        T: Clone,
        F: FnOnce(&E) -> Self + Send + 'static,
    {
        let result = Self::create();

        let on_succeeded = result.clone();
        self.on_success(move |value| on_succeeded.fill_success(value.clone()));

        let on_failed = result.clone();
        self.on_failure(move |reason| match failure::run_captured(|| f(reason)) {
            Ok(inner) => {
                let adopted = on_failed.clone();
                inner.on_success(move |value| adopted.fill_success(value.clone()));
                inner.on_failure(move |reason| on_failed.fill_failure(reason.clone()));
            }
            Err(reason) => on_failed.fill_failure(reason),
        });

        result
    }

    /// Delivers `value` instead of any failure; successes pass through untouched.
    pub fn recover_value(&self, value: T) -> Self
    where
        T: Clone,
    {
        self.recover(move |_| value)
    }

    /// Transforms the failure type; values pass through untouched.
    pub fn map_failure<E2, F>(&self, f: F) -> Future<T, E2>
    where
        T: Clone,
        E2: Failure,
        F: FnOnce(&E) -> E2 + Send + 'static,
    {
        let result = Future::<T, E2>::create();

        let on_succeeded = result.clone();
        self.on_success(move |value| on_succeeded.fill_success(value.clone()));

        let on_failed = result.clone();
        self.on_failure(move |reason| match failure::run_captured(|| f(reason)) {
            Ok(mapped) => on_failed.fill_failure(mapped),
            Err(mapped) => on_failed.fill_failure(mapped),
        });

        result
    }

    /// Maps each element of a container value, collecting into `O`.
    pub fn inner_map<U, O, F>(&self, f: F) -> Future<O, E>
    where
        T: Clone + IntoIterator,
        O: FromIterator<U> + Send + Sync + 'static,
        F: Fn(T::Item) -> U + Send + 'static,
    {
        self.map(move |container| container.clone().into_iter().map(&f).collect())
    }

    /// Keeps the container elements satisfying the predicate.
    pub fn inner_filter<F>(&self, predicate: F) -> Self
    where
        T: Clone + IntoIterator + FromIterator<<T as IntoIterator>::Item>,
        F: Fn(&<T as IntoIterator>::Item) -> bool + Send + 'static,
    {
        self.map(move |container| {
            container
                .clone()
                .into_iter()
                .filter(|item| predicate(item))
                .collect()
        })
    }

    /// Folds the container elements into an accumulator.
    pub fn inner_reduce<R, F>(&self, f: F, initial: R) -> Future<R, E>
    where
        T: Clone + IntoIterator,
        R: Send + Sync + 'static,
        F: Fn(R, T::Item) -> R + Send + 'static,
    {
        self.map(move |container| container.clone().into_iter().fold(initial, f))
    }

    /// Flattens a container of containers by one level, collecting into `O`.
    pub fn inner_flatten<O>(&self) -> Future<O, E>
    where
        T: Clone + IntoIterator,
        <T as IntoIterator>::Item: IntoIterator,
        O: FromIterator<<<T as IntoIterator>::Item as IntoIterator>::Item>
            + Send
            + Sync
            + 'static,
    {
        self.map(|container| container.clone().into_iter().flatten().collect())
    }
}

impl<T, E> Promise<T, E>
where
    T: Send + Sync + 'static,
    E: Failure,
{
    /// Creates an unfilled promise, allocating the shared state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            future: Future::create(),
        }
    }

    /// A read-side handle aliasing this promise's shared state.
    #[must_use]
    pub fn future(&self) -> Future<T, E> {
        self.future.clone()
    }

    /// Whether the promise has already been filled.
    #[must_use]
    pub fn is_filled(&self) -> bool {
        self.future.is_completed()
    }

    /// Fills the promise with a value. Dropped silently if already filled.
    pub fn success(&self, value: T) {
        self.future.fill_success(value);
    }

    /// Fills the promise with a failure. Dropped silently if already filled.
    pub fn failure(&self, reason: E) {
        self.future.fill_failure(reason);
    }
}

impl<T, E> Default for Promise<T, E>
where
    T: Send + Sync + 'static,
    E: Failure,
{
    fn default() -> Self {
        Self::new()
    }
}
