//! # rmutex
//!
//! A recursive mutex: the thread holding it may lock it again without deadlocking itself.
//!
//! - [`binary_mutex`] - the plain futex mutex underneath
//! - [`thread_identity`] - who's calling, and who's holding
//! - [`recursive_lock`] - the lock / try_lock / unlock algorithm
//! - [`reentrant_mutex`] - a data-carrying wrapper with RAII guards
//! - [`error`] - the contract the callers must keep
//!
//! Build with the `trace` feature and a `log` backend to watch every step of the algorithm.

/// `log::trace!` for the lock's steps, compiled in only with the `trace` feature
macro_rules! trace_step {
    ($($arg:tt)+) => {
        #[cfg(feature = "trace")]
        log::trace!(target: "rmutex", $($arg)+);
    };
}

pub mod binary_mutex;
pub mod error;
pub mod recursive_lock;
pub mod reentrant_mutex;
pub mod scenarios;
pub mod thread_identity;

pub use binary_mutex::{BinaryMutex, FutexMutex};
pub use error::ContractViolation;
pub use recursive_lock::RawRecursiveLock;
pub use reentrant_mutex::{ReentrantMutex, ReentrantMutexGuard};
pub use thread_identity::{LocalThreadId, Owner, ThreadId, ThreadIdentity, NO_OWNER};
