// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Lock helpers that recover from poisoning instead of panicking.
//!
//! The download manager keeps its slot, queue and model records behind a
//! single `RwLock`. Every acquisition goes through these helpers, which log
//! a poisoned lock and hand back the guard anyway.

use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Acquire a read lock, recovering from poisoning if necessary.
#[inline]
pub fn resilient_read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    match lock.read() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::error!(
                target: "modelfetch::sync",
                event = "LOCK_POISONED_READ",
                "RwLock was poisoned during read acquisition; recovering data"
            );
            poisoned.into_inner()
        }
    }
}

/// Acquire a write lock, recovering from poisoning if necessary.
#[inline]
pub fn resilient_write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    match lock.write() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::error!(
                target: "modelfetch::sync",
                event = "LOCK_POISONED_WRITE",
                "RwLock was poisoned during write acquisition; recovering data"
            );
            poisoned.into_inner()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_resilient_read_normal() {
        let lock = RwLock::new(42);
        let guard = resilient_read(&lock);
        assert_eq!(*guard, 42);
    }

    #[test]
    fn test_resilient_write_normal() {
        let lock = RwLock::new(42);
        {
            let mut guard = resilient_write(&lock);
            *guard = 100;
        }
        assert_eq!(*resilient_read(&lock), 100);
    }

    #[test]
    fn test_resilient_write_recovers_from_poison() {
        let lock = Arc::new(RwLock::new(vec![1, 2, 3]));
        let lock_clone = Arc::clone(&lock);

        let _ = thread::spawn(move || {
            let _guard = lock_clone.write().unwrap();
            panic!("Intentional panic to poison lock");
        })
        .join();

        assert!(lock.is_poisoned());

        let mut guard = resilient_write(&lock);
        guard.push(4);
        assert_eq!(*guard, vec![1, 2, 3, 4]);
    }
}
