//! # Thread identity
//!
//! A recursive lock has to tell "it's me again" from "it's somebody else".
//! So it needs an id that is stable for the thread's lifetime and never shared with another thread.
//!
//! The owner is a sum type, [`Owner::Unheld`] or [`Owner::HeldBy`], instead of a magic "no thread" id.
//! It still fits a single [`AtomicUsize`]: ids are non-zero, so `Unheld` takes the zero niche.
//! No real id can ever collide with it.

use std::{
    cell::Cell,
    fmt,
    num::NonZeroUsize,
    sync::atomic::{AtomicUsize, Ordering::Relaxed},
};

/// Non-zero per-thread id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ThreadId(NonZeroUsize);

impl ThreadId {
    pub const fn new(raw: NonZeroUsize) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> usize {
        self.0.get()
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "thread {:#x}", self.0.get())
    }
}

/// Who holds a recursive lock
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Owner {
    #[default]
    Unheld,
    HeldBy(ThreadId),
}

/// The "nobody" value, distinct from every [`ThreadId`] by construction
pub const NO_OWNER: Owner = Owner::Unheld;

impl Owner {
    pub fn is_held_by(self, id: ThreadId) -> bool {
        self == Owner::HeldBy(id)
    }

    fn into_raw(self) -> usize {
        match self {
            Owner::Unheld => 0,
            Owner::HeldBy(id) => id.get(),
        }
    }

    fn from_raw(raw: usize) -> Self {
        NonZeroUsize::new(raw).map_or(Owner::Unheld, |id| Owner::HeldBy(ThreadId(id)))
    }
}

impl fmt::Display for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Owner::Unheld => f.write_str("nobody"),
            Owner::HeldBy(id) => id.fmt(f),
        }
    }
}

/// An [`Owner`] that can be compared across threads.
///
/// Every access is `Relaxed`: it's an identity tag, not a synchronization point.
/// Whatever needs to be visible between holders is published by the underlying mutex.
pub struct AtomicOwner(AtomicUsize);

impl AtomicOwner {
    pub const fn new() -> Self {
        Self(AtomicUsize::new(0)) // Owner::Unheld
    }

    pub fn load(&self) -> Owner {
        Owner::from_raw(self.0.load(Relaxed))
    }

    pub fn store(&self, owner: Owner) {
        self.0.store(owner.into_raw(), Relaxed);
    }
}

impl Default for AtomicOwner {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for AtomicOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("AtomicOwner").field(&self.load()).finish()
    }
}

/// Source of [`ThreadId`]s.
///
/// # Safety
///
/// `current` must return the same id every time it's called on a thread,
/// and no two threads may ever get the same id, even if one has exited before the other started.
/// The recursive lock relies on it for mutual exclusion.
pub unsafe trait ThreadIdentity {
    /// Needed to construct locks in `const` context
    const INIT: Self;

    fn current(&self) -> ThreadId;
}

/// Default [`ThreadIdentity`]: a number handed out once per thread.
///
/// A thread draws its id from a process-wide counter the first time it asks, and keeps it in a thread-local.
/// The counter starts at 1 and never wraps, so an id is never zero and never given out twice,
/// not even after its thread has exited. A thread that exits holding a lock leaves it locked for good
/// instead of passing it on to whoever comes next.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalThreadId;

impl LocalThreadId {
    #[cold]
    fn allocate() -> NonZeroUsize {
        static NEXT: AtomicUsize = AtomicUsize::new(1);

        // Relaxed is enough, only the uniqueness of the values matters
        match NEXT.fetch_update(Relaxed, Relaxed, |next| next.checked_add(1)) {
            Ok(id) => NonZeroUsize::new(id).expect("thread ids start at 1"),
            // no more unique ids, and reusing one would break mutual exclusion
            Err(_) => std::process::abort(),
        }
    }
}

unsafe impl ThreadIdentity for LocalThreadId {
    const INIT: Self = LocalThreadId;

    #[inline]
    fn current(&self) -> ThreadId {
        thread_local!(static ID: Cell<Option<NonZeroUsize>> = const { Cell::new(None) });
        ID.with(|id| {
            ThreadId(id.get().unwrap_or_else(|| {
                let fresh = Self::allocate();
                id.set(Some(fresh));
                fresh
            }))
        })
    }
}

#[cfg(test)]
mod test {
    use std::{collections::HashSet, sync::Barrier, thread::scope};

    use super::*;

    #[test]
    fn test_id_is_stable_within_a_thread() {
        let ids = LocalThreadId;
        assert_eq!(ids.current(), ids.current());
    }

    #[test]
    fn test_live_threads_get_distinct_ids() {
        let ids = LocalThreadId;
        // all of them alive at once
        let barrier = &Barrier::new(8);
        let seen: HashSet<ThreadId> = scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    s.spawn(move || {
                        let id = ids.current();
                        barrier.wait();
                        id
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        assert_eq!(seen.len(), 8);
        assert!(!seen.contains(&ids.current()));
    }

    #[test]
    fn test_exited_threads_ids_are_not_reused() {
        let ids = LocalThreadId;
        let mut seen = HashSet::new();
        // one thread at a time, each gone before the next starts
        for _ in 0..50 {
            let id = scope(|s| s.spawn(|| ids.current()).join().unwrap());
            assert!(seen.insert(id), "{id} handed out twice");
        }
        assert!(!seen.contains(&ids.current()));
    }

    #[test]
    fn test_atomic_owner() {
        let owner = AtomicOwner::new();
        assert_eq!(owner.load(), NO_OWNER);

        let me = LocalThreadId.current();
        owner.store(Owner::HeldBy(me));
        assert!(owner.load().is_held_by(me));
        assert_ne!(owner.load(), NO_OWNER);

        owner.store(NO_OWNER);
        assert!(!owner.load().is_held_by(me));
    }
}
