//! # Contract violations
//!
//! There's exactly one class of failure in this crate: the caller broke the lock's contract.
//! E.g. unlocked a lock it doesn't hold, or the lock's own bookkeeping went off the rails.
//!
//! These aren't recoverable runtime conditions, so they never show up as a `Result`.
//! Instead the checks fail fast with a panic carrying the thread id and the expected vs actual state.
//! Build with `panic = "abort"` to turn that into an abort.
//!
//! ## When the checks run
//! - always in builds with `debug_assertions`
//! - in release builds only with the `contract-checks` feature
//!
//! Without either, the checks are compiled out and a violation is undefined behaviour.
//! That's the price for a lock path without extra loads and branches.
//! [`ContractViolation::RefcountOverflow`] is the exception: it's always checked, as wrapping the counter
//! would silently hand the lock to another thread.

use thiserror::Error;

use crate::thread_identity::ThreadId;

/// What exactly went wrong
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ContractViolation {
    /// `unlock` on a lock nobody holds
    #[error("{caller} unlocked a recursive lock that is not held (expected owner {caller}, found none)")]
    NotHeld { caller: ThreadId },

    /// `unlock` on a lock held by somebody else
    #[error("{caller} unlocked a recursive lock owned by {owner} (expected owner {caller})")]
    NotOwner { caller: ThreadId, owner: ThreadId },

    /// the owner is recorded, but the nesting counter says it holds nothing
    #[error("{caller} is the recorded owner of a recursive lock with refcount 0 (expected refcount > 0)")]
    ZeroRefcount { caller: ThreadId },

    /// nested too deep to count
    #[error("{caller} overflowed the refcount of a recursive lock (refcount {})", usize::MAX)]
    RefcountOverflow { caller: ThreadId },
}

/// Whether the optional contract checks are compiled in
pub const CHECKS_ENABLED: bool = cfg!(any(debug_assertions, feature = "contract-checks"));

/// Report the violation and never come back
#[cold]
#[inline(never)]
#[track_caller]
pub(crate) fn fail(violation: ContractViolation) -> ! {
    panic!("recursive lock contract violation: {violation}")
}

/// `contract!(condition, violation)` fails with `violation` if `condition` is false.
///
/// The condition isn't even evaluated when the checks are off.
macro_rules! contract {
    ($cond:expr, $violation:expr) => {
        if $crate::error::CHECKS_ENABLED && !$cond {
            $crate::error::fail($violation)
        }
    };
}

pub(crate) use contract;
