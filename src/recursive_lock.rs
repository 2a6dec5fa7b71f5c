//! # Recursive lock
//!
//! A lock the holding thread may lock again without deadlocking itself.
//! It has to be unlocked as many times as it was locked before anybody else gets it.
//!
//! It's a [`BinaryMutex`] plus two pieces of bookkeeping:
//! - `owner` - who holds the mutex, a relaxed atomic [`Owner`]
//! - `refcount` - how many times the owner has locked it, a plain `usize`
//!
//! ## Invariants
//! 1. `refcount > 0` iff some thread holds the mutex through this lock
//! 2. `owner == HeldBy(t)` iff `t` holds it, `owner == Unheld` iff the mutex is free
//! 3. `refcount` is only touched by the thread recorded in `owner`
//!
//! ## Memory ordering
//! `owner` is Relaxed everywhere. It's only ever compared to the caller's own id, it doesn't order anything.
//! Handing `refcount` (and the guarded data) from one holder to the next is the mutex's job:
//! its release happens-before the next holder's acquire.
//!
//! `refcount` isn't atomic, and making it atomic wouldn't make it any more correct.
//! It's never touched by two threads at once, only by one thread after another, see invariant 3.
//!
//! ## State machine
//! - `Unheld -> HeldBy(t, 1)` on `lock` / successful `try_lock`
//! - `HeldBy(t, n) -> HeldBy(t, n + 1)` on `lock` / `try_lock` by `t`
//! - `HeldBy(t, n) -> HeldBy(t, n - 1)` on `unlock` by `t`, `n > 1`
//! - `HeldBy(t, 1) -> Unheld` on `unlock` by `t`
//!
//! Anything else, e.g. `unlock` of an unheld lock or of somebody else's lock, is a [`ContractViolation`].

use std::cell::UnsafeCell;

use crate::{
    binary_mutex::{BinaryMutex, FutexMutex},
    error::{contract, fail, ContractViolation},
    thread_identity::{AtomicOwner, LocalThreadId, Owner, ThreadId, ThreadIdentity},
};

pub struct RawRecursiveLock<M = FutexMutex, I = LocalThreadId> {
    mutex: M,
    owner: AtomicOwner,
    /// only accessed by the owner, see invariant 3
    refcount: UnsafeCell<usize>,
    identity: I,
}

/// SAFETY: `refcount` is the only non-Sync part, and only the holder of `mutex` touches it
unsafe impl<M, I> Sync for RawRecursiveLock<M, I>
where
    M: BinaryMutex + Sync,
    I: ThreadIdentity + Sync,
{
}

impl<M: BinaryMutex, I: ThreadIdentity> RawRecursiveLock<M, I> {
    /// An unheld lock, usable in `const` / `static` context
    pub const INIT: Self = Self::new();

    pub const fn new() -> Self {
        Self {
            mutex: M::INIT,
            owner: AtomicOwner::new(),
            refcount: UnsafeCell::new(0),
            identity: I::INIT,
        }
    }

    /// Blocks until the calling thread holds the lock.
    /// Returns right away if it already does.
    pub fn lock(&self) {
        let me = self.identity.current();
        trace_step!("{me}: try-acquire");

        if !self.mutex.try_acquire() {
            // The mutex is taken. Either
            //
            // Case 1: we hold it ourselves, so owner == me (invariant 2).
            //
            // Case 2: some other thread holds it, so owner != me.
            //
            //     That thread may change owner under our feet:
            //     a) from Unheld to its own id, if it's in the middle of lock / try_lock,
            //        possibly several times with several different threads
            //     b) from its own id to Unheld, if it's in the middle of unlock
            //     None of these can ever store *our* id. Only we write our id, and only
            //     after acquiring the mutex ourselves. So the comparison below can't
            //     mistake Case 2 for Case 1 and vice versa.
            //
            // owner must be loaded exactly once, a second load could see another value.
            let owner = self.owner.load();

            if owner.is_held_by(me) {
                // Case 1
                trace_step!("{me}: reentrant");
                contract!(
                    unsafe { self.refcount() } > 0,
                    ContractViolation::ZeroRefcount { caller: me }
                );
            } else {
                // Case 2
                trace_step!("{me}: held by {owner}, blocking");
                self.mutex.acquire();
            }
        }

        unsafe { self.enter(me) };
    }

    /// Same as [`lock`](Self::lock), but gives up instead of blocking.
    /// Leaves the lock untouched if it returns `false`.
    pub fn try_lock(&self) -> bool {
        let me = self.identity.current();

        if !self.mutex.try_acquire() {
            // same reasoning as in `lock`
            let owner = self.owner.load();

            if !owner.is_held_by(me) {
                trace_step!("{me}: held by {owner}, giving up");
                return false;
            }
            contract!(
                unsafe { self.refcount() } > 0,
                ContractViolation::ZeroRefcount { caller: me }
            );
        }

        unsafe { self.enter(me) };
        true
    }

    /// Releases one level of the lock. The last one releases the mutex.
    ///
    /// # Safety
    ///
    /// The calling thread must be holding the lock.
    ///
    /// In builds with debug assertions or the `contract-checks` feature a violation panics
    /// with a [`ContractViolation`]. Otherwise the check is compiled out and it's undefined behaviour.
    pub unsafe fn unlock(&self) {
        let me = self.identity.current();
        let owner = self.owner.load();
        match owner {
            Owner::Unheld => contract!(false, ContractViolation::NotHeld { caller: me }),
            Owner::HeldBy(other) => contract!(
                other == me,
                ContractViolation::NotOwner {
                    caller: me,
                    owner: other
                }
            ),
        }
        // owner == me from here on, so the refcount is ours to touch
        let refcount = &mut *self.refcount.get();
        contract!(*refcount > 0, ContractViolation::ZeroRefcount { caller: me });

        *refcount -= 1;
        trace_step!("{me}: refcount {refcount}");

        if *refcount == 0 {
            // clear owner before releasing the mutex,
            // so the next holder never sees a stale id of ours
            self.owner.store(Owner::Unheld);
            trace_step!("{me}: releasing");
            self.mutex.release();
        }
    }

    /// Whether any thread holds the lock. A racy snapshot.
    pub fn is_locked(&self) -> bool {
        self.mutex.is_locked()
    }

    /// Whether the calling thread holds the lock.
    /// Exact, as nobody else can store the caller's id.
    pub fn is_owned_by_current_thread(&self) -> bool {
        self.owner.load().is_held_by(self.identity.current())
    }

    /// A racy snapshot of who holds the lock
    pub fn owner(&self) -> Owner {
        self.owner.load()
    }

    /// How many times the calling thread has locked it, `None` if it doesn't hold it
    pub fn depth(&self) -> Option<usize> {
        if self.is_owned_by_current_thread() {
            // SAFETY: we're the owner
            Some(unsafe { self.refcount() })
        } else {
            None
        }
    }

    /// # Safety
    ///
    /// The calling thread must be the owner.
    unsafe fn refcount(&self) -> usize {
        *self.refcount.get()
    }

    /// Forces the refcount, to reach states the public API can't
    ///
    /// # Safety
    ///
    /// The calling thread must be the owner.
    #[cfg(test)]
    unsafe fn set_refcount(&self, refcount: usize) {
        *self.refcount.get() = refcount;
    }

    /// Records the caller as the holder and counts one more level.
    ///
    /// # Safety
    ///
    /// The calling thread must be holding the mutex.
    unsafe fn enter(&self, me: ThreadId) {
        // a single store, owner is either Unheld or already me
        self.owner.store(Owner::HeldBy(me));

        let refcount = &mut *self.refcount.get();
        *refcount = match refcount.checked_add(1) {
            Some(n) => n,
            None => fail(ContractViolation::RefcountOverflow { caller: me }),
        };
        trace_step!("{me}: holding, refcount {refcount}");
    }
}

impl<M: BinaryMutex, I: ThreadIdentity> Default for RawRecursiveLock<M, I> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: BinaryMutex, I: ThreadIdentity> std::fmt::Debug for RawRecursiveLock<M, I> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawRecursiveLock")
            .field("owner", &self.owner.load())
            .finish_non_exhaustive()
    }
}
