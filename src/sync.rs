//! Lock primitives without lock poisoning.
//!
//! The [`std::sync::Mutex`] "poisons" itself when the thread holding the lock panics, and every
//! later `lock` call returns an error that is typically handled by unwrapping it. In this crate,
//! panics raised by user callbacks are a normal part of the delivery contract (they propagate to
//! whoever issued the notification), so a handler panicking while a queue or gate was locked must
//! not turn every later notification into a knock-on panic. The types here simply ignore the
//! poison flag.
//!
//! [`ReentrantLock`] is the gate used by [`SynchronizedObserver`]: a thread that already holds it
//! can lock it again, so a handler re-entering its own observer does not deadlock.
//!
//! [`SynchronizedObserver`]: crate::SynchronizedObserver

use std::{
    error::Error,
    fmt,
    ops::{Deref, DerefMut},
    sync,
    thread::{self, ThreadId},
};

pub type TryLockResult<Guard> = Result<Guard, TryLockError>;

#[derive(Default)]
pub struct Mutex<T: ?Sized> {
    inner: sync::Mutex<T>,
}

impl<T> Mutex<T> {
    pub const fn new(t: T) -> Mutex<T> {
        Self {
            inner: sync::Mutex::new(t),
        }
    }
}

impl<T: ?Sized> Mutex<T> {
    pub fn lock(&self) -> MutexGuard<'_, T> {
        let guard = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poison) => poison.into_inner(),
        };

        MutexGuard { inner: guard }
    }

    pub fn try_lock(&self) -> TryLockResult<MutexGuard<'_, T>> {
        let guard = match self.inner.try_lock() {
            Ok(guard) => guard,
            Err(sync::TryLockError::Poisoned(poison)) => poison.into_inner(),
            Err(sync::TryLockError::WouldBlock) => return Err(TryLockError),
        };

        Ok(MutexGuard { inner: guard })
    }

    pub fn into_inner(self) -> T
    where
        T: Sized,
    {
        match self.inner.into_inner() {
            Ok(inner) => inner,
            Err(poison) => poison.into_inner(),
        }
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for Mutex<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("Mutex");
        match self.try_lock() {
            Ok(val) => s.field("data", &&*val),
            Err(TryLockError) => s.field("data", &"<locked>"),
        }
        .finish_non_exhaustive()
    }
}

#[derive(Debug)]
pub struct MutexGuard<'a, T: ?Sized + 'a> {
    inner: sync::MutexGuard<'a, T>,
}

impl<'a, T: ?Sized + 'a> Deref for MutexGuard<'a, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl<'a, T: ?Sized + 'a> DerefMut for MutexGuard<'a, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.inner
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct TryLockError;

impl Error for TryLockError {}

impl fmt::Display for TryLockError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("`try_lock` failed because the operation would block")
    }
}

#[derive(Debug, Default)]
pub struct Condvar {
    inner: sync::Condvar,
}

impl Condvar {
    pub const fn new() -> Condvar {
        Self {
            inner: sync::Condvar::new(),
        }
    }

    pub fn wait<'a, T>(&self, guard: MutexGuard<'a, T>) -> MutexGuard<'a, T> {
        let guard = match self.inner.wait(guard.inner) {
            Ok(guard) => guard,
            Err(poison) => poison.into_inner(),
        };
        MutexGuard { inner: guard }
    }

    pub fn notify_one(&self) {
        self.inner.notify_one();
    }
}

/// A lock that the owning thread may acquire any number of times.
///
/// Other threads block in [`ReentrantLock::lock`] until every guard held by the owner has been
/// dropped. The lock protects no data; it only serializes the code run while a guard is alive.
#[derive(Debug, Default)]
pub struct ReentrantLock {
    /// Owning thread and its current acquisition depth.
    owner: Mutex<Option<(ThreadId, usize)>>,
    condvar: Condvar,
}

impl ReentrantLock {
    pub const fn new() -> Self {
        Self {
            owner: Mutex::new(None),
            condvar: Condvar::new(),
        }
    }

    /// Acquires the lock, blocking while a different thread holds it.
    pub fn lock(&self) -> ReentrantLockGuard<'_> {
        let me = thread::current().id();
        let mut owner = self.owner.lock();
        loop {
            match *owner {
                None => {
                    *owner = Some((me, 1));
                    break;
                }
                Some((id, depth)) if id == me => {
                    *owner = Some((id, depth + 1));
                    break;
                }
                Some(_) => owner = self.condvar.wait(owner),
            }
        }
        ReentrantLockGuard {
            lock: self,
            _not_send: std::marker::PhantomData,
        }
    }

    /// Returns whether the calling thread currently holds the lock.
    pub fn is_held_by_current_thread(&self) -> bool {
        matches!(*self.owner.lock(), Some((id, _)) if id == thread::current().id())
    }
}

/// Guard returned by [`ReentrantLock::lock`].
///
/// The guard has to be dropped on the thread that created it, so it is not [`Send`].
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct ReentrantLockGuard<'a> {
    lock: &'a ReentrantLock,
    _not_send: std::marker::PhantomData<*const ()>,
}

impl Drop for ReentrantLockGuard<'_> {
    fn drop(&mut self) {
        let mut owner = self.lock.owner.lock();
        match *owner {
            Some((id, depth)) if depth > 1 => *owner = Some((id, depth - 1)),
            _ => {
                *owner = None;
                drop(owner);
                self.lock.condvar.notify_one();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            atomic::{AtomicBool, Ordering},
            Arc,
        },
        thread,
        time::Duration,
    };

    use super::*;

    #[test]
    fn mutex_survives_panicking_holder() {
        let mutex = Arc::new(Mutex::new(0));
        let m = mutex.clone();
        thread::spawn(move || {
            let _guard = m.lock();
            crate::test::silent_panic("holder panicked".into());
        })
        .join()
        .unwrap_err();

        *mutex.lock() += 1;
        assert_eq!(*mutex.lock(), 1);
        let mutex = Arc::try_unwrap(mutex).ok().unwrap();
        assert_eq!(mutex.into_inner(), 1);
    }

    #[test]
    fn reentrant_lock_allows_nested_acquisition() {
        let lock = ReentrantLock::new();
        let outer = lock.lock();
        let inner = lock.lock();
        assert!(lock.is_held_by_current_thread());
        drop(inner);
        assert!(lock.is_held_by_current_thread());
        drop(outer);
        assert!(!lock.is_held_by_current_thread());
    }

    #[test]
    fn reentrant_lock_excludes_other_threads() {
        let lock = Arc::new(ReentrantLock::new());
        let acquired = Arc::new(AtomicBool::new(false));

        let outer = lock.lock();
        let inner = lock.lock();
        let other = {
            let lock = lock.clone();
            let acquired = acquired.clone();
            thread::spawn(move || {
                let _guard = lock.lock();
                acquired.store(true, Ordering::SeqCst);
            })
        };

        thread::sleep(Duration::from_millis(20));
        drop(inner);
        thread::sleep(Duration::from_millis(20));
        assert!(!acquired.load(Ordering::SeqCst));
        drop(outer);
        other.join().unwrap();
        assert!(acquired.load(Ordering::SeqCst));
    }
}
