//! # Binary mutex
//!
//! The plain, non-recursive lock the recursive one is built on.
//! It doesn't guard any data on its own, it only provides acquire / try-acquire / release.
//! [`BinaryMutex`] is the interface, [`FutexMutex`] the default implementation.
//!
//! ## FutexMutex
//! A u32 state so it works with wait & wake from the [atomic-wait](https://crates.io/crates/atomic-wait) crate:
//! - `wait(&AtomicU32, u32)` - blocks only if the atomic still has the value, may wake up spuriously
//! - `wake_one(&AtomicU32)` - wakes a single waiter
//!
//! Wait and wake take no part in correctness, they just spare us from burning cycles.
//! The Acquire on locking and the Release on unlocking make one holder's writes visible to the next one.
//! The recursive lock relies on exactly that and nothing else.
//!
//! ## Avoiding syscalls
//! Both syscalls are slow, so the uncontended path calls neither:
//! - acquiring an unlocked mutex is a single compare-exchange
//! - a contended acquire spins a bit before going to sleep, as locks are mostly held for brief moments
//! - releasing only wakes somebody if the state says there's somebody waiting
//!
//! No fairness: a woken thread competes with everyone else for the lock.

use std::sync::atomic::{
    AtomicU32,
    Ordering::{Acquire, Relaxed, Release},
};

use atomic_wait::{wait, wake_one};

/// Blocking, non-recursive mutual exclusion without data.
///
/// # Safety
///
/// Between a successful `acquire` / `try_acquire` and the matching `release`
/// no other call may succeed in acquiring. Acquiring must synchronize-with the previous release.
pub unsafe trait BinaryMutex {
    /// An unlocked mutex, to construct locks in `const` context
    const INIT: Self;

    /// Blocks until the mutex is acquired
    fn acquire(&self);

    /// Acquires the mutex if it's free, never blocks
    fn try_acquire(&self) -> bool;

    /// # Safety
    ///
    /// The calling thread must be holding the mutex.
    unsafe fn release(&self);

    /// Racy snapshot, only good for diagnostics
    fn is_locked(&self) -> bool;
}

/// Futex based [`BinaryMutex`]
#[derive(Debug)]
pub struct FutexMutex {
    /// 0 - unlocked
    /// 1 - locked, no other threads
    /// 2 - locked, other threads are waiting
    state: AtomicU32,
}

const UNLOCKED: u32 = 0;
const LOCKED: u32 = 1;
const CONTENDED: u32 = 2;

impl FutexMutex {
    pub const fn new() -> Self {
        Self {
            state: AtomicU32::new(UNLOCKED),
        }
    }

    /// The waiting part of [`BinaryMutex::acquire`]:
    /// - spin for some cycles
    /// - engage the wait syscall if still locked
    #[cold]
    fn acquire_contended(&self) {
        let mut spin_count = 0;

        // plain load here, as compare-exchange hurts the cache.
        // only check for 1, as 2 means somebody has already given up spinning
        while self.state.load(Relaxed) == LOCKED && spin_count < 100 {
            spin_count += 1;
            std::hint::spin_loop();
        }

        if self
            .state
            .compare_exchange(UNLOCKED, LOCKED, Acquire, Relaxed)
            .is_ok()
        {
            return;
        }

        // the last resort - sleep.
        // leave 2 in the state whenever we get the lock here, so other waiters aren't lost
        while self.state.swap(CONTENDED, Acquire) != UNLOCKED {
            wait(&self.state, CONTENDED);
        }
    }
}

impl Default for FutexMutex {
    fn default() -> Self {
        Self::new()
    }
}

unsafe impl BinaryMutex for FutexMutex {
    const INIT: Self = FutexMutex::new();

    #[inline]
    fn acquire(&self) {
        if self
            .state
            .compare_exchange(UNLOCKED, LOCKED, Acquire, Relaxed)
            .is_err()
        {
            self.acquire_contended();
        }
    }

    #[inline]
    fn try_acquire(&self) -> bool {
        self.state
            .compare_exchange(UNLOCKED, LOCKED, Acquire, Relaxed)
            .is_ok()
    }

    #[inline]
    unsafe fn release(&self) {
        // wake a thread only if someone switched the state to 2
        if self.state.swap(UNLOCKED, Release) == CONTENDED {
            wake_one(&self.state);
        }
    }

    fn is_locked(&self) -> bool {
        self.state.load(Relaxed) != UNLOCKED
    }
}

#[cfg(test)]
mod test {
    use std::{
        sync::atomic::AtomicUsize,
        thread::{scope, sleep},
        time::Duration,
    };

    use super::*;

    #[test]
    fn test_try_acquire() {
        let m = FutexMutex::new();
        assert!(!m.is_locked());
        assert!(m.try_acquire());
        assert!(m.is_locked());
        // not recursive
        assert!(!m.try_acquire());
        unsafe { m.release() };
        assert!(!m.is_locked());
        assert!(m.try_acquire());
        unsafe { m.release() };
    }

    #[test]
    fn test_mutual_exclusion() {
        let m = FutexMutex::new();
        // a non-atomic read-modify-write, so updates get lost without the mutex
        let counter = AtomicUsize::new(0);

        scope(|s| {
            for _ in 0..4 {
                s.spawn(|| {
                    for _ in 0..5_000 {
                        m.acquire();
                        let v = counter.load(Relaxed);
                        counter.store(v + 1, Relaxed);
                        unsafe { m.release() };
                    }
                });
            }
        });

        assert_eq!(counter.load(Relaxed), 20_000);
        assert!(!m.is_locked());
    }

    #[test]
    fn test_waiter_is_woken() {
        let m = FutexMutex::new();
        m.acquire();

        scope(|s| {
            let waiter = s.spawn(|| {
                m.acquire();
                unsafe { m.release() };
            });
            // let the waiter spin out and go to sleep
            sleep(Duration::from_millis(100));
            assert!(!waiter.is_finished());
            unsafe { m.release() };
        });

        assert!(!m.is_locked());
    }
}
