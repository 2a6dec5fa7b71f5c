//! # Reentrant mutex
//!
//! [`RawRecursiveLock`] guards nothing and needs an `unsafe` unlock.
//! [`ReentrantMutex`] wraps it together with the data, and the guard does the unlocking on drop.
//!
//! The guard only hands out `&T`. Several guards of the same thread can be alive at once,
//! so a `&mut T` from one of them would alias the others. Put a `Cell` / `RefCell` inside for mutation.
//!
//! The guard isn't `Send`: it has to be dropped by the thread that locked, see invariant 3 of the lock.

use std::{cell::UnsafeCell, fmt, marker::PhantomData, ops::Deref};

use crate::{
    binary_mutex::{BinaryMutex, FutexMutex},
    recursive_lock::RawRecursiveLock,
    thread_identity::{LocalThreadId, ThreadIdentity},
};

pub struct ReentrantMutex<T, M = FutexMutex, I = LocalThreadId> {
    raw: RawRecursiveLock<M, I>,
    value: UnsafeCell<T>,
}

/// Only one thread at a time gets at the value, so it's enough for it to be Send
unsafe impl<T, M, I> Sync for ReentrantMutex<T, M, I>
where
    T: Send,
    M: BinaryMutex + Sync,
    I: ThreadIdentity + Sync,
{
}

impl<T, M: BinaryMutex, I: ThreadIdentity> ReentrantMutex<T, M, I> {
    pub const fn new(value: T) -> Self {
        Self {
            raw: RawRecursiveLock::new(),
            value: UnsafeCell::new(value),
        }
    }

    /// Blocks until the calling thread holds the mutex.
    /// Never blocks if it already does.
    pub fn lock(&self) -> ReentrantMutexGuard<'_, T, M, I> {
        self.raw.lock();
        ReentrantMutexGuard::new(self)
    }

    /// `None` if another thread holds the mutex
    pub fn try_lock(&self) -> Option<ReentrantMutexGuard<'_, T, M, I>> {
        self.raw.try_lock().then(|| ReentrantMutexGuard::new(self))
    }

    /// No locking needed, `&mut self` already proves exclusiveness
    pub fn get_mut(&mut self) -> &mut T {
        self.value.get_mut()
    }

    pub fn into_inner(self) -> T {
        self.value.into_inner()
    }

    pub fn is_locked(&self) -> bool {
        self.raw.is_locked()
    }

    pub fn is_owned_by_current_thread(&self) -> bool {
        self.raw.is_owned_by_current_thread()
    }

    /// How many guards the calling thread holds, `None` if it doesn't hold the mutex
    pub fn depth(&self) -> Option<usize> {
        self.raw.depth()
    }

    /// The lock itself, for diagnostics
    pub fn raw(&self) -> &RawRecursiveLock<M, I> {
        &self.raw
    }
}

impl<T: Default, M: BinaryMutex, I: ThreadIdentity> Default for ReentrantMutex<T, M, I> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: fmt::Debug, M: BinaryMutex, I: ThreadIdentity> fmt::Debug for ReentrantMutex<T, M, I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("ReentrantMutex");
        match self.try_lock() {
            Some(guard) => d.field("value", &&*guard),
            None => d.field("value", &format_args!("<locked>")),
        };
        d.finish()
    }
}

/// Proof that the calling thread holds the mutex. Unlocks one level on drop.
pub struct ReentrantMutexGuard<
    'a,
    T,
    M: BinaryMutex = FutexMutex,
    I: ThreadIdentity = LocalThreadId,
> {
    mutex: &'a ReentrantMutex<T, M, I>,
    // !Send
    _not_send: PhantomData<*const ()>,
}

/// Sharing `&guard` between threads shares `&T`
unsafe impl<T: Sync, M: BinaryMutex, I: ThreadIdentity> Sync for ReentrantMutexGuard<'_, T, M, I> {}

impl<'a, T, M: BinaryMutex, I: ThreadIdentity> ReentrantMutexGuard<'a, T, M, I> {
    /// the raw lock must be held by the calling thread
    fn new(mutex: &'a ReentrantMutex<T, M, I>) -> Self {
        Self {
            mutex,
            _not_send: PhantomData,
        }
    }
}

impl<T, M: BinaryMutex, I: ThreadIdentity> Deref for ReentrantMutexGuard<'_, T, M, I> {
    type Target = T;
    fn deref(&self) -> &Self::Target {
        // SAFETY: existence of the guard means the calling thread holds the lock
        unsafe { &*self.mutex.value.get() }
    }
}

impl<T, M: BinaryMutex, I: ThreadIdentity> Drop for ReentrantMutexGuard<'_, T, M, I> {
    fn drop(&mut self) {
        // SAFETY: the guard was created by a successful lock on this very thread, it's !Send
        unsafe { self.mutex.raw.unlock() };
    }
}

impl<T: fmt::Debug, M: BinaryMutex, I: ThreadIdentity> fmt::Debug
    for ReentrantMutexGuard<'_, T, M, I>
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}

#[cfg(test)]
mod test {
    use std::{
        cell::{Cell, RefCell},
        thread::{scope, sleep},
        time::Duration,
    };

    use super::*;

    #[test]
    fn test_nested_guards() {
        let m: ReentrantMutex<RefCell<Vec<i32>>> =
            ReentrantMutex::new(RefCell::new(Vec::new()));

        let g1 = m.lock();
        g1.borrow_mut().push(1);
        {
            let g2 = m.lock();
            g2.borrow_mut().push(2);
            assert_eq!(m.depth(), Some(2));
            // same data through both
            assert_eq!(*g1.borrow(), [1, 2]);
        }
        assert_eq!(m.depth(), Some(1));
        drop(g1);

        assert!(!m.is_locked());
        assert_eq!(m.into_inner().into_inner(), vec![1, 2]);
    }

    /// a callback that re-enters the locked structure doesn't deadlock
    #[test]
    fn test_reentrant_callback() {
        struct Registry {
            calls: ReentrantMutex<Cell<u32>>,
        }

        impl Registry {
            fn call(&self, depth: u32) {
                let calls = self.calls.lock();
                calls.set(calls.get() + 1);
                if depth > 0 {
                    self.call(depth - 1);
                }
            }
        }

        let r = Registry {
            calls: ReentrantMutex::new(Cell::new(0)),
        };
        r.call(9);
        assert_eq!(r.calls.lock().get(), 10);
        assert!(!r.calls.is_locked());
    }

    #[test]
    fn test_try_lock() {
        let m: ReentrantMutex<Cell<u32>> = ReentrantMutex::new(Cell::new(0));
        let g = m.lock();
        assert!(m.try_lock().is_some());

        scope(|s| {
            s.spawn(|| {
                assert!(m.try_lock().is_none());
                assert!(!m.is_owned_by_current_thread());
            });
        });

        drop(g);
        scope(|s| {
            s.spawn(|| {
                let g = m.try_lock().expect("free after the last guard is gone");
                g.set(7);
            });
        });
        assert_eq!(m.lock().get(), 7);
    }

    #[test]
    fn test_threads_take_turns() {
        let m: ReentrantMutex<Cell<usize>> = ReentrantMutex::new(Cell::new(0));

        scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    for _ in 0..1_000 {
                        let outer = m.lock();
                        let inner = m.lock();
                        let v = inner.get();
                        // give others a chance to sneak in, they shouldn't
                        std::hint::spin_loop();
                        outer.set(v + 1);
                    }
                });
            }
        });

        assert_eq!(m.lock().get(), 8_000);
    }

    #[test]
    fn test_waiter_gets_it_after_last_guard() {
        let m: ReentrantMutex<Cell<&str>> = ReentrantMutex::new(Cell::new("main"));

        let g1 = m.lock();
        let g2 = m.lock();

        scope(|s| {
            let waiter = s.spawn(|| {
                let g = m.lock();
                g.set("waiter");
            });

            sleep(Duration::from_millis(50));
            drop(g1);
            sleep(Duration::from_millis(50));
            assert!(!waiter.is_finished());
            assert_eq!(g2.get(), "main");
            drop(g2);
        });

        assert_eq!(m.lock().get(), "waiter");
    }

    #[test]
    fn test_get_mut_and_debug() {
        let mut m: ReentrantMutex<u32> = ReentrantMutex::default();
        *m.get_mut() += 5;
        assert_eq!(format!("{m:?}"), "ReentrantMutex { value: 5 }");

        // still readable by the owner while held
        let g = m.lock();
        assert_eq!(format!("{m:?}"), "ReentrantMutex { value: 5 }");
        assert_eq!(format!("{g:?}"), "5");
    }
}
