//! The producer side: subscribing observers to sources.

use std::{
    fmt,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
};

use crate::{
    scheduler::SchedulerExt, sync::Mutex, AutoDetachObserver, CurrentThread, Error, Observer,
    Subscription,
};

/// A source of notifications that observers can subscribe to.
pub trait Observable<T> {
    /// Subscribes `observer` and returns the handle that cancels the subscription.
    ///
    /// An `Err` means the subscription failed *and* the observer could not be told about it
    /// because it had already stopped.
    fn subscribe(&self, observer: Arc<dyn Observer<T>>) -> Result<Subscription, Error>;

    /// Whether [`Observable::subscribe`] is known never to panic.
    ///
    /// [`subscribe_safe`] skips its panic boundary for trusted sources.
    fn is_trusted(&self) -> bool {
        false
    }
}

impl<T, S: Observable<T> + ?Sized> Observable<T> for Arc<S> {
    fn subscribe(&self, observer: Arc<dyn Observer<T>>) -> Result<Subscription, Error> {
        (**self).subscribe(observer)
    }

    fn is_trusted(&self) -> bool {
        (**self).is_trusted()
    }
}

/// The customization point of a source built on [`ProducerBase`].
///
/// `subscribe_core` starts producing into `observer` and returns the resource that feeds it. The
/// observer it receives is already protected: it drops calls after a terminal signal, and it
/// releases the returned resource once a terminal signal has been delivered.
///
/// Returning `Err` or panicking is reported to the subscriber through `on_error`.
pub trait Producer<T>: Send + Sync {
    fn subscribe_core(&self, observer: Arc<dyn Observer<T>>) -> Result<Subscription, Error>;
}

/// Turns a [`Producer`] into an [`Observable`] with a safe subscription lifecycle.
///
/// On every subscription, the observer is wrapped in an [`AutoDetachObserver`], which is both what
/// the producer delivers into and what the subscriber gets back as its [`Subscription`].
///
/// When the calling thread is not already running trampolined work, the producer is invoked
/// through the [`CurrentThread`] trampoline, so that sources which synchronously subscribe to
/// further sources don't grow the stack without bound. Otherwise it is invoked directly.
pub struct ProducerBase<P> {
    producer: Arc<P>,
}

impl<P> ProducerBase<P> {
    pub fn new(producer: P) -> Self {
        Self {
            producer: Arc::new(producer),
        }
    }

    pub fn producer(&self) -> &P {
        &self.producer
    }
}

impl<P> Clone for ProducerBase<P> {
    fn clone(&self) -> Self {
        Self {
            producer: self.producer.clone(),
        }
    }
}

impl<P> fmt::Debug for ProducerBase<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProducerBase").finish_non_exhaustive()
    }
}

impl<T: 'static, P: Producer<T> + 'static> Observable<T> for ProducerBase<P> {
    fn subscribe(&self, observer: Arc<dyn Observer<T>>) -> Result<Subscription, Error> {
        let holder = Arc::new(AutoDetachObserver::new(observer));

        if CurrentThread::is_schedule_required() {
            let undelivered = Arc::new(Mutex::new(None));
            let producer = self.producer.clone();
            let h = holder.clone();
            let u = undelivered.clone();
            CurrentThread.schedule_fn(move |_| {
                if let Err(error) = run_producer(&*producer, h) {
                    *u.lock() = Some(error);
                }
                Subscription::empty()
            });
            let undelivered = undelivered.lock().take();
            if let Some(error) = undelivered {
                return Err(error);
            }
        } else {
            run_producer(&*self.producer, holder.clone())?;
        }

        Ok(Subscription::from_arc(holder))
    }

    fn is_trusted(&self) -> bool {
        true
    }
}

/// Invokes the producer and stores the resource it returns.
///
/// Errors and panics are delivered through the holder. If the holder has already stopped, an
/// error is returned to the caller and a panic is resumed.
fn run_producer<T: 'static, P: Producer<T> + ?Sized>(
    producer: &P,
    holder: Arc<AutoDetachObserver<T>>,
) -> Result<(), Error> {
    let observer: Arc<dyn Observer<T>> = holder.clone();
    match panic::catch_unwind(AssertUnwindSafe(|| producer.subscribe_core(observer))) {
        Ok(Ok(resource)) => holder.set_resource(resource),
        Ok(Err(error)) => holder.fail(error).map_err(|rejected| {
            log::debug!("subscription failed after its observer stopped: {}", rejected.error);
            rejected.error
        }),
        Err(payload) => {
            if holder.fail(Error::from_panic(&*payload)).is_err() {
                log::debug!("subscription panicked after its observer stopped");
                panic::resume_unwind(payload);
            }
            Ok(())
        }
    }
}

/// A [`Producer`] that runs a closure for every subscription.
///
/// Created by [`create`].
pub struct FnProducer<F> {
    subscribe: F,
}

impl<T, F> Producer<T> for FnProducer<F>
where
    F: Fn(Arc<dyn Observer<T>>) -> Result<Subscription, Error> + Send + Sync,
{
    fn subscribe_core(&self, observer: Arc<dyn Observer<T>>) -> Result<Subscription, Error> {
        (self.subscribe)(observer)
    }
}

/// Creates an [`Observable`] from a subscribe function.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use pushwire::{create, observer, Error, Observable, Observer, Subscription};
///
/// let source = create(|o: Arc<dyn Observer<i32>>| {
///     o.on_next(1);
///     o.on_next(2);
///     o.on_completed();
///     o.on_next(3); // dropped
///     Ok(Subscription::empty())
/// });
///
/// let sink = Arc::new(observer(
///     |v: i32| println!("got {v}"),
///     |e: Error| println!("failed: {e}"),
///     || println!("done"),
/// ));
/// source.subscribe(sink).unwrap();
/// ```
pub fn create<T, F>(subscribe: F) -> ProducerBase<FnProducer<F>>
where
    F: Fn(Arc<dyn Observer<T>>) -> Result<Subscription, Error> + Send + Sync + 'static,
{
    ProducerBase::new(FnProducer { subscribe })
}

/// Subscribes `observer` to `source`, reporting failures through the observer instead of the
/// return value.
///
/// Sources that are not [trusted](Observable::is_trusted) are subscribed behind a panic boundary.
/// An `Err` or a panic coming out of their `subscribe` is delivered to `observer.on_error` and an
/// empty [`Subscription`] is returned.
///
/// Trusted sources already deliver their own failures. The only `Err` they return is one that
/// could not be delivered because the observer had stopped; it is logged and dropped here.
pub fn subscribe_safe<T, S>(source: &S, observer: Arc<dyn Observer<T>>) -> Subscription
where
    S: Observable<T> + ?Sized,
{
    if source.is_trusted() {
        return match source.subscribe(observer) {
            Ok(subscription) => subscription,
            Err(error) => {
                log::debug!("dropping undeliverable subscription error: {error}");
                Subscription::empty()
            }
        };
    }

    let result = panic::catch_unwind(AssertUnwindSafe(|| source.subscribe(observer.clone())))
        .unwrap_or_else(|payload| Err(Error::from_panic(&*payload)));
    match result {
        Ok(subscription) => subscription,
        Err(error) => {
            observer.on_error(error);
            Subscription::empty()
        }
    }
}
