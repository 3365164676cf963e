// Copyright (c) The Presage Project Authors.
// Licensed under the MIT License.

//! Bounded-stack adoption of deeply chained futures.
//!
//! A long [`flat_map`][crate::Future::flat_map] chain completes as a cascade: filling the
//! innermost future invokes a callback that fills the next one, and so on, one stack frame
//! deeper per link. Wrapping a link in [`trampoline`] breaks the cascade: delivery of that
//! link's outcome is routed through a per-thread drive loop, so while a drive is in progress
//! further deliveries are queued and run iteratively instead of recursively. Opting in per
//! step is fine - plain links merely deepen the stack until the next trampolined one.

use std::cell::RefCell;
use std::collections::VecDeque;

use crate::failure::Failure;
use crate::future::Future;

type DeferredStep = Box<dyn FnOnce()>;

struct Driver {
    active: bool,
    queue: VecDeque<DeferredStep>,
}

thread_local! {
    static DRIVER: RefCell<Driver> = const {
        RefCell::new(Driver {
            active: false,
            queue: VecDeque::new(),
        })
    };
}

/// Wraps a future so that its outcome is delivered through the current thread's drive loop
/// instead of recursively on the completing thread's stack.
///
/// Use this on the future returned from a `flat_map` continuation (or anywhere a completion
/// cascade can grow with input size) to keep the stack depth constant regardless of chain
/// length.
#[must_use]
pub fn trampoline<T, E>(inner: Future<T, E>) -> Future<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Failure,
{
    let result = Future::create();

    let resolved = result.clone();
    inner.on_success(move |value| {
        let value = value.clone();
        defer(Box::new(move || resolved.fill_success(value)));
    });

    let resolved = result.clone();
    inner.on_failure(move |reason| {
        let reason = reason.clone();
        defer(Box::new(move || resolved.fill_failure(reason)));
    });

    result
}

/// Runs the step now if no drive is active on this thread, becoming the driver and draining
/// whatever the step (transitively) defers; otherwise queues it for the active driver.
fn defer(step: DeferredStep) {
    let step = DRIVER.with(|driver| {
        let mut driver = driver.borrow_mut();
        if driver.active {
            driver.queue.push_back(step);
            None
        } else {
            driver.active = true;
            Some(step)
        }
    });

    let Some(step) = step else {
        return;
    };

    let _deactivate = scopeguard::guard((), |()| {
        DRIVER.with(|driver| driver.borrow_mut().active = false);
    });

    step();
    loop {
        let next = DRIVER.with(|driver| driver.borrow_mut().queue.pop_front());
        match next {
            Some(next) => next(),
            None => break,
        }
    }
}
