// Copyright (c) The Presage Project Authors.
// Licensed under the MIT License.

use std::cell::UnsafeCell;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

/// How many times an acquisition round retries with a spin hint before giving up on the round.
const SPIN_RETRIES: usize = 1024;

/// How long to sleep between failed acquisition rounds.
const RETRY_SLEEP: Duration = Duration::from_micros(500);

/// A test-and-set spin lock protecting a value of type T.
///
/// Intended for short critical sections (shared-state transitions, dispatcher bookkeeping,
/// worker inboxes) where a full mutex would be wasted. An acquisition round performs one
/// test-and-set plus up to [`SPIN_RETRIES`] retries with a spin hint; `lock()` sleeps
/// [`RETRY_SLEEP`] between rounds so a long-held lock does not burn a whole core.
pub(crate) struct SpinLock<T> {
    locked: AtomicBool,
    value: UnsafeCell<T>,
}

// SAFETY: The lock grants exclusive access to the value, so sharing the lock between threads
// is safe whenever moving the value between threads is.
unsafe impl<T: Send> Sync for SpinLock<T> {}

// SAFETY: Sending the lock sends the owned value along with it.
unsafe impl<T: Send> Send for SpinLock<T> {}

impl<T> SpinLock<T> {
    pub const fn new(value: T) -> Self {
        Self {
            locked: AtomicBool::new(false),
            value: UnsafeCell::new(value),
        }
    }

    /// Acquires the lock, sleeping between bounded spin rounds until it succeeds.
    pub fn lock(&self) -> SpinLockGuard<'_, T> {
        loop {
            if self.try_acquire() {
                return SpinLockGuard { lock: self };
            }

            thread::sleep(RETRY_SLEEP);
        }
    }

    /// Attempts a single bounded spin round; returns `None` instead of sleeping.
    #[cfg_attr(
        not(test),
        expect(dead_code, reason = "part of the lock surface, exercised by tests only")
    )]
    pub fn try_lock(&self) -> Option<SpinLockGuard<'_, T>> {
        self.try_acquire().then(|| SpinLockGuard { lock: self })
    }

    /// Like [`lock()`][Self::lock], but gives up and returns `None` once the abandon flag is
    /// observed set between spin rounds.
    pub fn lock_abandonable(&self, abandon: &AtomicBool) -> Option<SpinLockGuard<'_, T>> {
        loop {
            if self.try_acquire() {
                return Some(SpinLockGuard { lock: self });
            }

            if abandon.load(Ordering::Relaxed) {
                return None;
            }

            thread::sleep(RETRY_SLEEP);
        }
    }

    fn try_acquire(&self) -> bool {
        if !self.locked.swap(true, Ordering::Acquire) {
            return true;
        }

        for _ in 0..SPIN_RETRIES {
            core::hint::spin_loop();

            if !self.locked.swap(true, Ordering::Acquire) {
                return true;
            }
        }

        false
    }
}

impl<T> fmt::Debug for SpinLock<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpinLock")
            .field("locked", &self.locked.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// RAII holder; releases the lock on drop.
pub(crate) struct SpinLockGuard<'a, T> {
    lock: &'a SpinLock<T>,
}

impl<T> Deref for SpinLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: Holding the guard means holding the lock, which grants exclusive access.
        unsafe { &*self.lock.value.get() }
    }
}

impl<T> DerefMut for SpinLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: Holding the guard means holding the lock, which grants exclusive access.
        unsafe { &mut *self.lock.value.get() }
    }
}

impl<T> Drop for SpinLockGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.locked.store(false, Ordering::Release);
    }
}

impl<T: fmt::Debug> fmt::Debug for SpinLockGuard<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::AtomicBool;
    use std::thread;

    use super::*;

    #[test]
    fn lock_grants_exclusive_access() {
        let lock = Arc::new(SpinLock::new(0_u64));

        let threads: Vec<_> = (0..4)
            .map(|_| {
                let lock = Arc::clone(&lock);
                thread::spawn(move || {
                    for _ in 0..1000 {
                        *lock.lock() += 1;
                    }
                })
            })
            .collect();

        for handle in threads {
            handle.join().unwrap();
        }

        assert_eq!(*lock.lock(), 4000);
    }

    #[test]
    fn try_lock_fails_while_held() {
        let lock = SpinLock::new(());

        let guard = lock.lock();
        assert!(lock.try_lock().is_none());
        drop(guard);

        assert!(lock.try_lock().is_some());
    }

    #[test]
    fn abandon_flag_aborts_acquisition() {
        let lock = SpinLock::new(());
        let abandon = AtomicBool::new(true);

        let guard = lock.lock();
        assert!(lock.lock_abandonable(&abandon).is_none());
        drop(guard);

        assert!(lock.lock_abandonable(&abandon).is_some());
    }
}
