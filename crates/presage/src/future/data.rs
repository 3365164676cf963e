// Copyright (c) The Presage Project Authors.
// Licensed under the MIT License.

use std::cell::UnsafeCell;
use std::fmt;
use std::mem;
use std::sync::atomic::{AtomicI64, AtomicU8, Ordering};

use crate::failure::{self, Failure};
use crate::spin::SpinLock;

/// The future has not reached a terminal state yet.
pub(crate) const NOT_COMPLETED: u8 = 0;
/// The future completed with a value.
pub(crate) const SUCCEEDED: u8 = 1;
/// The future completed with a failure.
pub(crate) const FAILED: u8 = 2;

static FUTURES_USAGE: AtomicI64 = AtomicI64::new(0);

/// Returns the process-wide count of live future/promise shared states.
///
/// The counter is only maintained in debug builds; release builds always report zero.
#[must_use]
pub fn instant_futures_usage() -> i64 {
    FUTURES_USAGE.load(Ordering::Relaxed)
}

/// What the value slot currently holds. Written exactly once, by the terminal transition.
pub(crate) enum Outcome<T, E> {
    Empty,
    Success(T),
    Failure(E),
}

type SuccessCallback<T> = Box<dyn FnOnce(&T) + Send>;
type FailureCallback<E> = Box<dyn FnOnce(&E) + Send>;

pub(crate) struct Callbacks<T, E> {
    on_success: Vec<SuccessCallback<T>>,
    on_failure: Vec<FailureCallback<E>>,
}

impl<T, E> Default for Callbacks<T, E> {
    fn default() -> Self {
        Self {
            on_success: Vec::new(),
            on_failure: Vec::new(),
        }
    }
}

/// The shared state jointly owned by every future and promise handle referencing it.
///
/// The state word is atomic and monotonic: it moves from [`NOT_COMPLETED`] to exactly one of
/// [`SUCCEEDED`] or [`FAILED`] and never changes again. The value slot is written once, under
/// the callback-list lock, immediately before the terminal state is published with release
/// ordering - so any thread that observes a terminal state with acquire ordering may read the
/// slot without taking the lock.
pub(crate) struct FutureData<T, E> {
    state: AtomicU8,
    value: UnsafeCell<Outcome<T, E>>,
    callbacks: SpinLock<Callbacks<T, E>>,
}

// SAFETY: The value slot is only written under the callback lock while the state is
// NOT_COMPLETED, and only read after a terminal state has been observed with acquire ordering,
// at which point it is immutable. Shared access therefore needs T and E to be shareable and
// sendable across threads, which the bounds require.
unsafe impl<T: Send + Sync, E: Send + Sync> Sync for FutureData<T, E> {}

// SAFETY: Sending the state sends the owned value and callbacks along with it.
unsafe impl<T: Send, E: Send> Send for FutureData<T, E> {}

impl<T, E> FutureData<T, E> {
    pub fn new() -> Self {
        if cfg!(debug_assertions) {
            FUTURES_USAGE.fetch_add(1, Ordering::Relaxed);
        }

        Self {
            state: AtomicU8::new(NOT_COMPLETED),
            value: UnsafeCell::new(Outcome::Empty),
            callbacks: SpinLock::new(Callbacks::default()),
        }
    }

    pub fn state(&self) -> u8 {
        self.state.load(Ordering::Acquire)
    }

    pub fn is_completed(&self) -> bool {
        self.state() != NOT_COMPLETED
    }

    pub fn is_succeeded(&self) -> bool {
        self.state() == SUCCEEDED
    }

    pub fn is_failed(&self) -> bool {
        self.state() == FAILED
    }

    /// A borrow of the stored value, if the state is terminal and succeeded.
    pub fn success_ref(&self) -> Option<&T> {
        if !self.is_succeeded() {
            return None;
        }

        // SAFETY: A terminal state was observed with acquire ordering, so the slot was
        // written (with the release publication ordered after it) and is immutable now.
        match unsafe { &*self.value.get() } {
            Outcome::Success(value) => Some(value),
            _ => None,
        }
    }

    /// A borrow of the stored failure, if the state is terminal and failed.
    pub fn failure_ref(&self) -> Option<&E> {
        if !self.is_failed() {
            return None;
        }

        // SAFETY: Same as in success_ref().
        match unsafe { &*self.value.get() } {
            Outcome::Failure(reason) => Some(reason),
            _ => None,
        }
    }
}

impl<T, E> FutureData<T, E>
where
    T: Send + Sync + 'static,
    E: Failure,
{
    /// Transitions to `SUCCEEDED` and delivers the value to the registered success callbacks.
    ///
    /// If the current thread's last-failure slot is occupied, the stored failure wins and the
    /// call delegates to the failure path. Redundant completions are silently dropped.
    pub fn fill_success(&self, value: T) {
        if failure::has_last_failure() {
            let injected =
                failure::take_last_failure::<E>().unwrap_or_else(|| E::from_message(""));
            self.fill_failure(injected);
            return;
        }

        let mut guard = self.callbacks.lock();
        if self.is_completed() {
            return;
        }

        // SAFETY: The state is not terminal and we hold the callback lock, so no reader is
        // looking at the slot and no other writer can race us here.
        unsafe { *self.value.get() = Outcome::Success(value) };
        self.state.store(SUCCEEDED, Ordering::Release);

        guard.on_failure.clear();
        let callbacks = mem::take(&mut guard.on_success);
        drop(guard);

        if let Some(value) = self.success_ref() {
            for callback in callbacks {
                failure::swallow_panic(move || callback(value));
            }
        }
    }

    /// Transitions to `FAILED` and delivers the reason to the registered failure callbacks.
    pub fn fill_failure(&self, reason: E) {
        let mut guard = self.callbacks.lock();
        if self.is_completed() {
            return;
        }

        // SAFETY: Same as in fill_success().
        unsafe { *self.value.get() = Outcome::Failure(reason) };
        self.state.store(FAILED, Ordering::Release);

        guard.on_success.clear();
        let callbacks = mem::take(&mut guard.on_failure);
        drop(guard);

        if let Some(reason) = self.failure_ref() {
            for callback in callbacks {
                failure::swallow_panic(move || callback(reason));
            }
        }
    }

    /// Registers a success callback, or invokes it right away when the state is already
    /// terminal. The double-checked shape guarantees the callback never runs under the lock:
    /// it may itself register further callbacks or fill other promises.
    pub fn register_success(&self, callback: SuccessCallback<T>) {
        let undelivered = {
            let mut guard = self.callbacks.lock();
            if self.is_completed() {
                Some(callback)
            } else {
                guard.on_success.push(callback);
                None
            }
        };

        if let Some(callback) = undelivered {
            if let Some(value) = self.success_ref() {
                failure::swallow_panic(move || callback(value));
            }
        }
    }

    /// Registers a failure callback; see [`register_success`][Self::register_success].
    pub fn register_failure(&self, callback: FailureCallback<E>) {
        let undelivered = {
            let mut guard = self.callbacks.lock();
            if self.is_completed() {
                Some(callback)
            } else {
                guard.on_failure.push(callback);
                None
            }
        };

        if let Some(callback) = undelivered {
            if let Some(reason) = self.failure_ref() {
                failure::swallow_panic(move || callback(reason));
            }
        }
    }
}

impl<T, E> Drop for FutureData<T, E> {
    fn drop(&mut self) {
        if cfg!(debug_assertions) {
            FUTURES_USAGE.fetch_sub(1, Ordering::Relaxed);
        }
    }
}

impl<T, E> fmt::Debug for FutureData<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.state() {
            SUCCEEDED => "succeeded",
            FAILED => "failed",
            _ => "not completed",
        };

        f.debug_struct("FutureData")
            .field("state", &state)
            .finish_non_exhaustive()
    }
}
