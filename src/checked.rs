use std::{
    fmt,
    sync::atomic::{AtomicU8, Ordering},
};

use crate::{drop::defer, Error, GrammarViolation, NotificationKind, Observer};

const IDLE: u8 = 0;
const BUSY: u8 = 1;
const COMPLETED: u8 = 2;
const ERRORED: u8 = 3;

/// An [`Observer`] wrapper that detects violations of the observer grammar.
///
/// Unlike [`GuardedObserver`], which drops offending calls silently, this wrapper reports them:
/// the `try_on_*` methods return the [`GrammarViolation`], and the [`Observer`] implementation
/// panics with it. A violation is
///
/// - any call made while another call into the wrapper is still running, from any thread
///   (including a handler calling back into its own observer),
/// - any call made after a terminal call.
///
/// Offending calls never reach the inner observer. This is a diagnostic tool for testing
/// producers.
///
/// [`GuardedObserver`]: crate::GuardedObserver
pub struct CheckedObserver<O> {
    inner: O,
    state: AtomicU8,
}

impl<O> CheckedObserver<O> {
    pub fn new(inner: O) -> Self {
        Self {
            inner,
            state: AtomicU8::new(IDLE),
        }
    }

    pub fn into_inner(self) -> O {
        self.inner
    }

    fn enter(&self, kind: NotificationKind) -> Result<(), GrammarViolation> {
        match self
            .state
            .compare_exchange(IDLE, BUSY, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => Ok(()),
            Err(BUSY) => Err(GrammarViolation::Reentrant(kind)),
            Err(COMPLETED) => Err(GrammarViolation::AfterCompleted(kind)),
            Err(_) => Err(GrammarViolation::AfterError(kind)),
        }
    }

    pub fn try_on_next<T>(&self, value: T) -> Result<(), GrammarViolation>
    where
        O: Observer<T>,
    {
        self.enter(NotificationKind::Next)?;
        let _leave = defer(|| self.state.store(IDLE, Ordering::Release));
        self.inner.on_next(value);
        Ok(())
    }

    pub fn try_on_error<T>(&self, error: Error) -> Result<(), GrammarViolation>
    where
        O: Observer<T>,
    {
        self.enter(NotificationKind::Error)?;
        let _leave = defer(|| self.state.store(ERRORED, Ordering::Release));
        self.inner.on_error(error);
        Ok(())
    }

    pub fn try_on_completed<T>(&self) -> Result<(), GrammarViolation>
    where
        O: Observer<T>,
    {
        self.enter(NotificationKind::Completed)?;
        let _leave = defer(|| self.state.store(COMPLETED, Ordering::Release));
        self.inner.on_completed();
        Ok(())
    }
}

impl<T, O: Observer<T>> Observer<T> for CheckedObserver<O> {
    fn on_next(&self, value: T) {
        if let Err(violation) = self.try_on_next::<T>(value) {
            panic!("observer grammar violation: {violation}");
        }
    }

    fn on_error(&self, error: Error) {
        if let Err(violation) = self.try_on_error::<T>(error) {
            panic!("observer grammar violation: {violation}");
        }
    }

    fn on_completed(&self) {
        if let Err(violation) = self.try_on_completed::<T>() {
            panic!("observer grammar violation: {violation}");
        }
    }
}

impl<O> fmt::Debug for CheckedObserver<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.state.load(Ordering::Acquire) {
            IDLE => "idle",
            BUSY => "busy",
            COMPLETED => "completed",
            _ => "errored",
        };
        f.debug_struct("CheckedObserver")
            .field("state", &state)
            .finish_non_exhaustive()
    }
}
