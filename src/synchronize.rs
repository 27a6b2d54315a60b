use std::{fmt, sync::Arc};

use crate::{sync::ReentrantLock, Error, Observer};

/// An [`Observer`] wrapper that serializes calls behind a lock.
///
/// Calls from different threads never overlap: each one blocks until the previous call has
/// returned. Several observers can share one gate through [`SynchronizedObserver::with_gate`], so
/// that their calls are serialized with respect to each other as well.
///
/// The gate is reentrant, so a handler calling back into its own observer runs immediately
/// instead of deadlocking. Such a call still breaks the observer grammar.
pub struct SynchronizedObserver<O> {
    inner: O,
    gate: Arc<ReentrantLock>,
}

impl<O> SynchronizedObserver<O> {
    pub fn new(inner: O) -> Self {
        Self::with_gate(inner, Arc::new(ReentrantLock::new()))
    }

    pub fn with_gate(inner: O, gate: Arc<ReentrantLock>) -> Self {
        Self { inner, gate }
    }

    /// Returns the lock calls are serialized behind.
    pub fn gate(&self) -> &Arc<ReentrantLock> {
        &self.gate
    }
}

impl<T, O: Observer<T>> Observer<T> for SynchronizedObserver<O> {
    fn on_next(&self, value: T) {
        let _guard = self.gate.lock();
        self.inner.on_next(value);
    }

    fn on_error(&self, error: Error) {
        let _guard = self.gate.lock();
        self.inner.on_error(error);
    }

    fn on_completed(&self) {
        let _guard = self.gate.lock();
        self.inner.on_completed();
    }
}

impl<O> fmt::Debug for SynchronizedObserver<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SynchronizedObserver")
            .field("gate", &self.gate)
            .finish_non_exhaustive()
    }
}
