//! The consumer side: the [`Observer`] trait, the grammar guard and the auto-detaching
//! subscription holder.

use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use crate::{
    disposable::SingleAssignment, drop::defer, AlreadyTerminated, Disposable, Error, Subscription,
};

/// A consumer of a notification sequence.
///
/// The expected grammar is zero or more [`Observer::on_next`] calls, followed by at most one call
/// to either [`Observer::on_error`] or [`Observer::on_completed`]. Calls must not overlap.
///
/// Observers take `&self` and are `Send + Sync` so they can be shared between the producer, the
/// scheduler running its work and the protective wrappers in this crate.
pub trait Observer<T>: Send + Sync {
    fn on_next(&self, value: T);
    fn on_error(&self, error: Error);
    fn on_completed(&self);
}

impl<T, O: Observer<T> + ?Sized> Observer<T> for Arc<O> {
    #[inline]
    fn on_next(&self, value: T) {
        (**self).on_next(value);
    }

    #[inline]
    fn on_error(&self, error: Error) {
        (**self).on_error(error);
    }

    #[inline]
    fn on_completed(&self) {
        (**self).on_completed();
    }
}

impl<T, O: Observer<T> + ?Sized> Observer<T> for Box<O> {
    #[inline]
    fn on_next(&self, value: T) {
        (**self).on_next(value);
    }

    #[inline]
    fn on_error(&self, error: Error) {
        (**self).on_error(error);
    }

    #[inline]
    fn on_completed(&self) {
        (**self).on_completed();
    }
}

/// An [`Observer`] made of three closures, with no protection of its own.
///
/// Usually created through [`observer`], which adds a [`GuardedObserver`] around it.
pub struct FnObserver<N, E, C> {
    on_next: N,
    on_error: E,
    on_completed: C,
}

impl<N, E, C> FnObserver<N, E, C> {
    pub fn new(on_next: N, on_error: E, on_completed: C) -> Self {
        Self {
            on_next,
            on_error,
            on_completed,
        }
    }
}

impl<T, N, E, C> Observer<T> for FnObserver<N, E, C>
where
    N: Fn(T) + Send + Sync,
    E: Fn(Error) + Send + Sync,
    C: Fn() + Send + Sync,
{
    fn on_next(&self, value: T) {
        (self.on_next)(value);
    }

    fn on_error(&self, error: Error) {
        (self.on_error)(error);
    }

    fn on_completed(&self) {
        (self.on_completed)();
    }
}

/// Creates a grammar-guarded [`Observer`] from three handlers.
///
/// # Examples
///
/// ```
/// use pushwire::{observer, Observer, Error};
///
/// let obs = observer(
///     |v: i32| println!("next {v}"),
///     |e: Error| println!("error {e}"),
///     || println!("done"),
/// );
/// obs.on_next(1);
/// obs.on_completed();
/// obs.on_next(2); // dropped, the observer has stopped
/// ```
pub fn observer<N, E, C>(
    on_next: N,
    on_error: E,
    on_completed: C,
) -> GuardedObserver<FnObserver<N, E, C>> {
    GuardedObserver::new(FnObserver::new(on_next, on_error, on_completed))
}

/// Enforces the observer grammar in front of another observer by silently dropping offending
/// calls.
///
/// Once a terminal call has gone through, every later call is ignored. When two threads race to
/// deliver a terminal signal, exactly one of them wins the stopped flag and reaches the inner
/// observer; the other returns without doing anything.
///
/// Disposing the guard stops it without calling any handler.
pub struct GuardedObserver<O> {
    inner: O,
    stopped: AtomicBool,
}

impl<O> GuardedObserver<O> {
    pub fn new(inner: O) -> Self {
        Self {
            inner,
            stopped: AtomicBool::new(false),
        }
    }

    #[inline]
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Transitions from live to stopped. Returns `true` for the single caller that performed the
    /// transition.
    #[inline]
    fn stop(&self) -> bool {
        self.stopped
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Delivers `error` if the observer is still live, or hands it back.
    fn try_error<T>(&self, error: Error) -> Result<(), AlreadyTerminated>
    where
        O: Observer<T>,
    {
        if self.stop() {
            self.inner.on_error(error);
            Ok(())
        } else {
            Err(AlreadyTerminated { error })
        }
    }
}

impl<T, O: Observer<T>> Observer<T> for GuardedObserver<O> {
    fn on_next(&self, value: T) {
        if !self.is_stopped() {
            self.inner.on_next(value);
        }
    }

    fn on_error(&self, error: Error) {
        // A lost race is not an error: the other terminal signal got through.
        let _ = self.try_error::<T>(error);
    }

    fn on_completed(&self) {
        if self.stop() {
            self.inner.on_completed();
        }
    }
}

impl<O: Send + Sync> Disposable for GuardedObserver<O> {
    fn dispose(&self) {
        self.stopped.store(true, Ordering::Release);
    }
}

impl<O> fmt::Debug for GuardedObserver<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GuardedObserver")
            .field("stopped", &self.is_stopped())
            .finish_non_exhaustive()
    }
}

/// Couples an observer to the resource that feeds it.
///
/// This is what [`ProducerBase`] hands to a producer and what the subscriber gets back as its
/// [`Subscription`]. It owns
///
/// - a [`GuardedObserver`] around the subscriber's observer, with its own stopped flag,
/// - a [`SingleAssignment`] slot for the resource returned by the producer.
///
/// A terminal signal detaches the observer: the resource is released right after the signal has
/// been delivered, including when the handler panics. Disposing the holder releases the resource
/// and stops all further delivery.
///
/// [`ProducerBase`]: crate::ProducerBase
pub struct AutoDetachObserver<T> {
    observer: GuardedObserver<Arc<dyn Observer<T>>>,
    resource: SingleAssignment,
}

impl<T> AutoDetachObserver<T> {
    pub fn new(observer: Arc<dyn Observer<T>>) -> Self {
        Self {
            observer: GuardedObserver::new(observer),
            resource: SingleAssignment::new(),
        }
    }

    /// Assigns the resource feeding this observer.
    ///
    /// If the observer has already been disposed or has detached, the resource is disposed
    /// immediately.
    pub fn set_resource(&self, resource: Subscription) -> Result<(), Error> {
        self.resource.set(resource)
    }

    #[inline]
    pub fn is_stopped(&self) -> bool {
        self.observer.is_stopped()
    }

    /// Delivers an error that occurred while the subscription was being established.
    ///
    /// Fails with [`AlreadyTerminated`], handing `error` back, if the observer has already
    /// received a terminal signal or has been disposed. In that case nobody is left to receive the
    /// error and the caller has to surface it.
    pub fn fail(&self, error: Error) -> Result<(), AlreadyTerminated> {
        let _detach = defer(|| self.resource.dispose());
        self.observer.try_error::<T>(error)
    }
}

impl<T> Observer<T> for AutoDetachObserver<T> {
    fn on_next(&self, value: T) {
        let detach = defer(|| self.resource.dispose());
        self.observer.on_next(value);
        detach.disarm();
    }

    fn on_error(&self, error: Error) {
        let _detach = defer(|| self.resource.dispose());
        self.observer.on_error(error);
    }

    fn on_completed(&self) {
        let _detach = defer(|| self.resource.dispose());
        self.observer.on_completed();
    }
}

impl<T> Disposable for AutoDetachObserver<T> {
    fn dispose(&self) {
        self.observer.dispose();
        self.resource.dispose();
    }
}

impl<T> fmt::Debug for AutoDetachObserver<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AutoDetachObserver")
            .field("stopped", &self.is_stopped())
            .field("resource", &self.resource)
            .finish()
    }
}
