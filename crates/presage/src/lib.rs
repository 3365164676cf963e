// Copyright (c) The Presage Project Authors.
// Licensed under the MIT License.

//! Callback-driven futures and promises with a capacity-bounded task dispatcher.
//!
//! The crate has two coupled halves:
//!
//! * A [`Future`]/[`Promise`] algebra: a lazy value-or-failure carrier with composable
//!   combinators ([`map`][Future::map], [`flat_map`][Future::flat_map],
//!   [`zip`][Future::zip], [`sequence`][Future::sequence], ...), a [`trampoline`] for
//!   bounded-stack chains of unbounded depth, and [`repeat`]/[`repeat_future`] loop
//!   combinators.
//! * A [`tasks`] dispatcher: a process-wide worker pool that schedules submitted callables
//!   across generic, CPU-intensive and thread-bound disciplines with priority classes, custom
//!   subpool tags and explicit backpressure.
//!
//! The two meet at [`tasks::run`]: submission returns a [`CancelableFuture`] that further work
//! can be chained onto before the task ever runs.
//!
//! ```
//! use presage::tasks;
//!
//! let answer = tasks::run::<_, String, _>(|| 6 * 7).filter(|x| *x == 42);
//!
//! assert_eq!(answer.result(), 42);
//! ```

mod cancelable;
mod constants;
mod failure;
mod future;
mod repeat;
mod spin;
mod trampoline;

pub mod tasks;

pub use cancelable::CancelableFuture;
pub use failure::{
    CommonFailure, Failure, clear_last_failure, has_last_failure, set_last_failure,
    take_last_failure, with_failure,
};
pub use future::{Future, Promise, instant_futures_usage};
pub use repeat::{RepeaterResult, repeat, repeat_for_sequence, repeat_future};
pub use trampoline::trampoline;
