// Copyright (c) The Presage Project Authors.
// Licensed under the MIT License.

//! Test aids shared by the presage test suites.
//!
//! This crate is internal. Its API may change at any time.

use std::sync::mpsc;
use std::thread;
use std::time::Duration;

/// If something (whatever) does not happen in a test within this time, the test will fail.
///
/// We are conservative here and allow much time - this is only to break out of infinite loops,
/// not for any situations that are actually expected.
pub const TEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Executes a thread-safe function on a background thread and abandons it if
/// it does not complete before [`TEST_TIMEOUT`].
///
/// There are multiple ways for the called function to fail:
///
/// 1. It fails to finish in the allowed time span.
/// 2. It panics, so the result is never sent.
///
/// In both cases the channel gets closed and the receive below signals an error,
/// which we surface as `None`.
#[must_use]
pub fn execute_or_abandon<F, R>(f: F) -> Option<R>
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    let (sender, receiver) = mpsc::channel();

    thread::spawn(move || {
        let result = f();
        _ = sender.send(result);
    });

    receiver.recv_timeout(TEST_TIMEOUT).ok()
}
