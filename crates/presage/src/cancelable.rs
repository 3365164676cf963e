// Copyright (c) The Presage Project Authors.
// Licensed under the MIT License.

use std::fmt;
use std::time::Duration;

use crate::failure::Failure;
use crate::future::{Future, Promise};

/// A future handle whose holder may force a failure before the producing task delivers.
///
/// Returned by the task entry points ([`run`][crate::tasks::run] and friends): the promise is
/// shared with the scheduled task, so canceling pre-fills it and the task's own completion
/// becomes a no-op. Cancellation is observational only - it does not stop the task from
/// running, it only pre-empts its ability to deliver a result.
///
/// The handle mirrors the read-side API of [`Future`], so chains can be built on it directly.
pub struct CancelableFuture<T, E = String> {
    promise: Promise<T, E>,
}

impl<T, E> Clone for CancelableFuture<T, E> {
    fn clone(&self) -> Self {
        Self {
            promise: self.promise.clone(),
        }
    }
}

impl<T, E> fmt::Debug for CancelableFuture<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelableFuture")
            .field("promise", &self.promise)
            .finish()
    }
}

impl<T, E> CancelableFuture<T, E>
where
    T: Send + Sync + 'static,
    E: Failure,
{
    pub(crate) fn new(promise: &Promise<T, E>) -> Self {
        Self {
            promise: promise.clone(),
        }
    }

    /// Cancels with the stock payload. Idempotent; a no-op once the future is completed.
    pub fn cancel(&self) {
        self.cancel_with(E::canceled());
    }

    /// Cancels with the given payload. Idempotent; the first terminal outcome wins.
    pub fn cancel_with(&self, reason: E) {
        if !self.promise.is_filled() {
            self.promise.failure(reason);
        }
    }

    /// A plain future aliasing the same shared state.
    #[must_use]
    pub fn future(&self) -> Future<T, E> {
        self.promise.future()
    }

    /// See [`Future::is_completed`].
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.future().is_completed()
    }

    /// See [`Future::is_succeeded`].
    #[must_use]
    pub fn is_succeeded(&self) -> bool {
        self.future().is_succeeded()
    }

    /// See [`Future::is_failed`].
    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.future().is_failed()
    }

    /// Always true; see [`Future::is_valid`].
    #[must_use]
    pub fn is_valid(&self) -> bool {
        true
    }

    /// See [`Future::wait`].
    pub fn wait(&self, timeout: Option<Duration>) -> bool {
        self.future().wait(timeout)
    }

    /// See [`Future::result`].
    pub fn result(&self) -> T
    where
        T: Clone + Default,
    {
        self.future().result()
    }

    /// See [`Future::failure_reason`].
    pub fn failure_reason(&self) -> Option<E> {
        self.future().failure_reason()
    }

    /// See [`Future::on_success`].
    pub fn on_success<F>(&self, f: F) -> Future<T, E>
    where
        F: FnOnce(&T) + Send + 'static,
    {
        self.future().on_success(f)
    }

    /// See [`Future::on_failure`].
    pub fn on_failure<F>(&self, f: F) -> Future<T, E>
    where
        F: FnOnce(&E) + Send + 'static,
    {
        self.future().on_failure(f)
    }

    /// See [`Future::on_complete`].
    pub fn on_complete<F>(&self, f: F) -> Future<T, E>
    where
        F: FnOnce() + Send + 'static,
    {
        self.future().on_complete(f)
    }

    /// See [`Future::map`].
    pub fn map<U, F>(&self, f: F) -> Future<U, E>
    where
        U: Send + Sync + 'static,
        F: FnOnce(&T) -> U + Send + 'static,
    {
        self.future().map(f)
    }

    /// See [`Future::flat_map`].
    pub fn flat_map<U, F>(&self, f: F) -> Future<U, E>
    where
        U: Clone + Send + Sync + 'static,
        F: FnOnce(&T) -> Future<U, E> + Send + 'static,
    {
        self.future().flat_map(f)
    }

    /// See [`Future::and_then`].
    pub fn and_then<U, F>(&self, f: F) -> Future<U, E>
    where
        U: Clone + Send + Sync + 'static,
        F: FnOnce() -> Future<U, E> + Send + 'static,
    {
        self.future().and_then(f)
    }

    /// See [`Future::and_then_value`].
    pub fn and_then_value<U>(&self, value: U) -> Future<U, E>
    where
        U: Send + Sync + 'static,
    {
        self.future().and_then_value(value)
    }

    /// See [`Future::filter`].
    pub fn filter<F>(&self, predicate: F) -> Future<T, E>
    where
        T: Clone,
        F: FnOnce(&T) -> bool + Send + 'static,
    {
        self.future().filter(predicate)
    }

    /// See [`Future::filter_or`].
    pub fn filter_or<F>(&self, rejected: E, predicate: F) -> Future<T, E>
    where
        T: Clone,
        F: FnOnce(&T) -> bool + Send + 'static,
    {
        self.future().filter_or(rejected, predicate)
    }

    /// See [`Future::recover`].
    pub fn recover<F>(&self, f: F) -> Future<T, E>
    where
        T: Clone,
        F: FnOnce(&E) -> T + Send + 'static,
    {
        self.future().recover(f)
    }

    /// See [`Future::recover_with`].
    pub fn recover_with<F>(&self, f: F) -> Future<T, E>
    where
        T: Clone,
        F: FnOnce(&E) -> Future<T, E> + Send + 'static,
    {
        self.future().recover_with(f)
    }

    /// See [`Future::recover_value`].
    pub fn recover_value(&self, value: T) -> Future<T, E>
    where
        T: Clone,
    {
        self.future().recover_value(value)
    }

    /// See [`Future::map_failure`].
    pub fn map_failure<E2, F>(&self, f: F) -> Future<T, E2>
    where
        T: Clone,
        E2: Failure,
        F: FnOnce(&E) -> E2 + Send + 'static,
    {
        self.future().map_failure(f)
    }

    /// See [`Future::zip`].
    pub fn zip<B>(&self, other: &Future<B, E>) -> Future<(T, B), E>
    where
        T: Clone,
        B: Clone + Send + Sync + 'static,
    {
        self.future().zip(other)
    }

    /// See [`Future::zip_value`].
    pub fn zip_value<V>(&self, value: V) -> Future<(T, V), E>
    where
        T: Clone,
        V: Clone + Send + Sync + 'static,
    {
        self.future().zip_value(value)
    }
}

impl<T, E> From<CancelableFuture<T, E>> for Future<T, E>
where
    T: Send + Sync + 'static,
    E: Failure,
{
    fn from(value: CancelableFuture<T, E>) -> Self {
        value.future()
    }
}
