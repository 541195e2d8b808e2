//! Poison-tolerant access to the in-process stores.
//!
//! A panic while a guard is held poisons the lock. The stores keep serving
//! the data as left behind and log the recovery once per access.

use std::sync::{LockResult, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::warn;

fn recover<G>(result: LockResult<G>, source: &'static str, op: &'static str, mode: &'static str) -> G {
    result.unwrap_or_else(|poisoned| {
        warn!(
            op,
            source,
            mode,
            "Lock poisoned by a panicked holder; continuing with last written state"
        );
        poisoned.into_inner()
    })
}

pub(crate) fn rw_read<'a, T>(
    lock: &'a RwLock<T>,
    source: &'static str,
    op: &'static str,
) -> RwLockReadGuard<'a, T> {
    recover(lock.read(), source, op, "read")
}

pub(crate) fn rw_write<'a, T>(
    lock: &'a RwLock<T>,
    source: &'static str,
    op: &'static str,
) -> RwLockWriteGuard<'a, T> {
    recover(lock.write(), source, op, "write")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn poisoned_lock_still_yields_data() {
        let lock = Arc::new(RwLock::new(vec![1, 2]));
        let writer = lock.clone();
        let _ = std::thread::spawn(move || {
            let mut guard = writer.write().unwrap();
            guard.push(3);
            panic!("holder dies");
        })
        .join();

        assert!(lock.is_poisoned());
        assert_eq!(*rw_read(&lock, "test", "read"), vec![1, 2, 3]);
        rw_write(&lock, "test", "write").push(4);
        assert_eq!(rw_read(&lock, "test", "read").len(), 4);
    }
}
