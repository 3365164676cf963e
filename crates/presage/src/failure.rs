// Copyright (c) The Presage Project Authors.
// Licensed under the MIT License.

use std::any::Any;
use std::cell::RefCell;
use std::panic::{AssertUnwindSafe, catch_unwind};

use thiserror::Error;
use tracing::debug;

/// The failure side of a [`Future`][crate::Future].
///
/// A future is generic in its failure type; the only thing the library itself needs from it is
/// the ability to synthesize a failure from a message, which is how the stock payloads for
/// cancellation, filter rejection and captured panics are produced. `String` implements this
/// trait, so `Future<T>` (which defaults the failure type to `String`) works out of the box;
/// [`CommonFailure`] implements it with structured variants.
pub trait Failure: Clone + Send + Sync + 'static {
    /// Builds a failure carrying the given message.
    fn from_message(message: &str) -> Self;

    /// The payload delivered by [`CancelableFuture::cancel`][crate::CancelableFuture::cancel].
    fn canceled() -> Self {
        Self::from_message("Canceled")
    }

    /// The payload delivered by a rejecting [`filter`][crate::Future::filter].
    fn rejected() -> Self {
        Self::from_message("Result wasn't good enough")
    }

    /// The payload produced when a user-supplied function panics inside a combinator or task.
    fn exception(message: Option<&str>) -> Self {
        match message {
            Some(message) => Self::from_message(&format!("Exception: {message}")),
            None => Self::from_message("Exception"),
        }
    }
}

impl Failure for String {
    fn from_message(message: &str) -> Self {
        message.to_owned()
    }
}

/// A ready-made structured failure type covering the failure kinds the library itself produces.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommonFailure {
    /// The future was canceled before its producing task delivered a result.
    #[error("Canceled")]
    Canceled,

    /// A filter predicate rejected the value.
    #[error("Result wasn't good enough")]
    Rejected,

    /// A user-supplied function panicked with a payload we could not render as text.
    #[error("Exception")]
    Exception,

    /// A user-supplied function panicked with the given message.
    #[error("Exception: {0}")]
    ExceptionWithMessage(String),

    /// A plain business failure.
    #[error("{0}")]
    Message(String),
}

impl Failure for CommonFailure {
    fn from_message(message: &str) -> Self {
        Self::Message(message.to_owned())
    }

    fn canceled() -> Self {
        Self::Canceled
    }

    fn rejected() -> Self {
        Self::Rejected
    }

    fn exception(message: Option<&str>) -> Self {
        match message {
            Some(message) => Self::ExceptionWithMessage(message.to_owned()),
            None => Self::Exception,
        }
    }
}

thread_local! {
    /// The per-thread last-failure slot. A value-returning function running inside a combinator
    /// or task cannot change its signature to report a failure; it stores one here instead and
    /// the completion protocol drains the slot before delivering success.
    static LAST_FAILURE: RefCell<Option<Box<dyn Any + Send>>> = const { RefCell::new(None) };
}

/// Returns whether the current thread's last-failure slot is occupied.
#[must_use]
pub fn has_last_failure() -> bool {
    LAST_FAILURE.with(|slot| slot.borrow().is_some())
}

/// Stores a failure in the current thread's last-failure slot, replacing any previous one.
pub fn set_last_failure<E>(failure: E)
where
    E: Send + 'static,
{
    LAST_FAILURE.with(|slot| *slot.borrow_mut() = Some(Box::new(failure)));
}

/// Clears the current thread's last-failure slot.
pub fn clear_last_failure() {
    LAST_FAILURE.with(|slot| *slot.borrow_mut() = None);
}

/// Takes the failure out of the current thread's last-failure slot, leaving it empty.
///
/// Returns `None` if the slot is empty or holds a failure of a different type. The slot is
/// cleared either way; a stale failure must never leak into an unrelated computation.
#[must_use]
pub fn take_last_failure<E>() -> Option<E>
where
    E: 'static,
{
    LAST_FAILURE
        .with(|slot| slot.borrow_mut().take())
        .and_then(|failure| failure.downcast::<E>().ok().map(|failure| *failure))
}

/// Injects a failure from inside a value-returning function.
///
/// Stores the failure in the last-failure slot and returns `T::default()` as a throwaway value;
/// the combinator or task wrapper that invoked the function drains the slot and delivers the
/// failure instead of the returned value.
pub fn with_failure<T, E>(failure: E) -> T
where
    T: Default,
    E: Send + 'static,
{
    set_last_failure(failure);
    T::default()
}

/// Runs a user-supplied function, converting a panic into an exception failure.
pub(crate) fn run_captured<R, E, F>(f: F) -> Result<R, E>
where
    E: Failure,
    F: FnOnce() -> R,
{
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => Ok(value),
        Err(payload) => Err(E::exception(panic_message(payload.as_ref()))),
    }
}

/// Runs a callback, swallowing a panic so it affects neither the shared state nor the
/// remaining callbacks.
pub(crate) fn swallow_panic<F>(f: F)
where
    F: FnOnce(),
{
    if catch_unwind(AssertUnwindSafe(f)).is_err() {
        debug!("future callback panicked; panic swallowed");
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> Option<&str> {
    payload
        .downcast_ref::<&'static str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_failure_slot_round_trip() {
        clear_last_failure();
        assert!(!has_last_failure());

        set_last_failure("broken".to_owned());
        assert!(has_last_failure());

        assert_eq!(take_last_failure::<String>(), Some("broken".to_owned()));
        assert!(!has_last_failure());
    }

    #[test]
    fn take_with_wrong_type_clears_the_slot() {
        set_last_failure("broken".to_owned());

        assert_eq!(take_last_failure::<i32>(), None);
        assert!(!has_last_failure());
    }

    #[test]
    fn with_failure_stores_and_returns_default() {
        clear_last_failure();

        let value: i32 = with_failure("broken".to_owned());
        assert_eq!(value, 0);
        assert!(has_last_failure());

        clear_last_failure();
    }

    #[test]
    #[expect(clippy::panic, reason = "the panic is the behavior under test")]
    fn run_captured_wraps_panic_message() {
        let result: Result<i32, String> = run_captured(|| panic!("boom"));
        assert_eq!(result, Err("Exception: boom".to_owned()));

        let result: Result<i32, String> = run_captured(|| std::panic::panic_any(42_u8));
        assert_eq!(result, Err("Exception".to_owned()));

        let result: Result<i32, String> = run_captured(|| 7);
        assert_eq!(result, Ok(7));
    }

    #[test]
    fn common_failure_messages() {
        assert_eq!(CommonFailure::canceled().to_string(), "Canceled");
        assert_eq!(
            CommonFailure::rejected().to_string(),
            "Result wasn't good enough"
        );
        assert_eq!(
            CommonFailure::exception(Some("boom")).to_string(),
            "Exception: boom"
        );
        assert_eq!(CommonFailure::exception(None).to_string(), "Exception");
        assert_eq!(
            CommonFailure::from_message("just wrong").to_string(),
            "just wrong"
        );
    }
}
