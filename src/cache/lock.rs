//! Poison-tolerant access to cache state.
//!
//! The guarded values are always whole (a snapshot pointer, a task handle), so a guard
//! recovered from a panicked holder is still usable.

use std::sync::{LockResult, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::warn;

use crate::domain::KeyPrefix;

fn recover<G>(result: LockResult<G>, prefix: &KeyPrefix, op: &'static str) -> G {
    result.unwrap_or_else(|poisoned| {
        warn!(
            target = "kvgate::cache",
            prefix = %prefix,
            op,
            result = "poisoned_recovered",
            "Recovered from poisoned cache lock"
        );
        poisoned.into_inner()
    })
}

pub(crate) fn read<'a, T>(
    lock: &'a RwLock<T>,
    prefix: &KeyPrefix,
    op: &'static str,
) -> RwLockReadGuard<'a, T> {
    recover(lock.read(), prefix, op)
}

pub(crate) fn write<'a, T>(
    lock: &'a RwLock<T>,
    prefix: &KeyPrefix,
    op: &'static str,
) -> RwLockWriteGuard<'a, T> {
    recover(lock.write(), prefix, op)
}

pub(crate) fn lock<'a, T>(
    mutex: &'a Mutex<T>,
    prefix: &KeyPrefix,
    op: &'static str,
) -> MutexGuard<'a, T> {
    recover(mutex.lock(), prefix, op)
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, thread};

    use super::*;

    #[test]
    fn poisoned_rwlock_still_yields_its_value() {
        let shared = Arc::new(RwLock::new(7));
        let poisoner = shared.clone();
        let outcome = thread::spawn(move || {
            let _guard = poisoner.write().expect("first writer");
            panic!("poison the lock");
        })
        .join();
        assert!(outcome.is_err());
        assert!(shared.is_poisoned());

        let prefix = KeyPrefix::new("cars.");
        assert_eq!(*read(&shared, &prefix, "test_read"), 7);
        *write(&shared, &prefix, "test_write") = 8;
        assert_eq!(*read(&shared, &prefix, "test_read"), 8);
    }

    #[test]
    fn poisoned_mutex_still_yields_its_value() {
        let shared = Arc::new(Mutex::new("task"));
        let poisoner = shared.clone();
        let outcome = thread::spawn(move || {
            let _guard = poisoner.lock().expect("first holder");
            panic!("poison the lock");
        })
        .join();
        assert!(outcome.is_err());

        assert_eq!(*lock(&shared, &KeyPrefix::new("cars."), "test_lock"), "task");
    }
}
