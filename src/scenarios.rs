//! # Scenarios
//!
//! Small runnable walkthroughs of the lock, picked by name from the binary.
//! Each one prints what it sees and asserts what it expects.

use std::{
    cell::RefCell,
    sync::atomic::{
        AtomicBool,
        Ordering::{Acquire, Relaxed, Release},
    },
    thread::{self, sleep},
    time::Duration,
};

use crate::{RawRecursiveLock, ReentrantMutex, NO_OWNER};

/// lock it n times, unlock it n times
pub fn nesting() {
    let lock: RawRecursiveLock = RawRecursiveLock::new();

    for _ in 0..5 {
        lock.lock();
        println!("locked, depth {:?}", lock.depth());
    }
    for _ in 0..5 {
        unsafe { lock.unlock() };
        println!("unlocked, depth {:?}, owner {}", lock.depth(), lock.owner());
    }
    assert_eq!(lock.owner(), NO_OWNER);
}

/// a thread holding the lock twice keeps another one waiting until both levels are released
pub fn contention() {
    let lock: RawRecursiveLock = RawRecursiveLock::new();
    let acquired = AtomicBool::new(false);

    lock.lock();
    lock.lock();
    log::info!("main holds the lock twice");

    thread::scope(|s| {
        s.spawn(|| {
            println!("waiter: locking");
            lock.lock();
            acquired.store(true, Relaxed);
            println!("waiter: got it");
            unsafe { lock.unlock() };
        });

        for left in (0..2).rev() {
            sleep(Duration::from_millis(200));
            assert!(!acquired.load(Relaxed));
            println!("main: unlocking, {left} level(s) left");
            unsafe { lock.unlock() };
        }
    });
    assert!(acquired.load(Relaxed));
}

/// T1 lock, T1 lock, T2 try_lock, T1 unlock, T2 try_lock, T1 unlock, T2 try_lock, T2 unlock
pub fn handoff() {
    let lock: RawRecursiveLock = RawRecursiveLock::new();
    let released = [AtomicBool::new(false), AtomicBool::new(false)];
    let checked = [AtomicBool::new(false), AtomicBool::new(false)];

    lock.lock();
    lock.lock();

    thread::scope(|s| {
        s.spawn(|| {
            for step in 0..2 {
                while step > 0 && !released[step - 1].load(Acquire) {
                    std::hint::spin_loop();
                }
                let got = lock.try_lock();
                println!("T2: try_lock -> {got}");
                assert!(!got);
                checked[step].store(true, Release);
            }
            while !released[1].load(Acquire) {
                std::hint::spin_loop();
            }
            let got = lock.try_lock();
            println!("T2: try_lock -> {got}");
            assert!(got);
            unsafe { lock.unlock() };
        });

        for step in 0..2 {
            while !checked[step].load(Acquire) {
                std::hint::spin_loop();
            }
            unsafe { lock.unlock() };
            println!("T1: unlock, depth {:?}", lock.depth());
            released[step].store(true, Release);
        }
    });
    assert!(!lock.is_locked());
}

/// the guard API: nested guards share the data
pub fn guard() {
    fn record(journal: &ReentrantMutex<RefCell<Vec<String>>>, depth: usize) {
        let entries = journal.lock();
        entries.borrow_mut().push(format!("depth {depth}"));
        if depth < 3 {
            record(journal, depth + 1);
        }
    }

    let journal: ReentrantMutex<RefCell<Vec<String>>> =
        ReentrantMutex::new(RefCell::new(Vec::new()));
    record(&journal, 1);
    println!("{:?}", journal.lock().borrow());
    assert_eq!(journal.lock().borrow().len(), 3);
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_scenarios() {
        nesting();
        contention();
        handoff();
        guard();
    }
}
