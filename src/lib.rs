//! A push-based reactive sequence engine with trampolined scheduling.
//!
//! (this crate only contains the core that sources and consumers are built on; it does not come
//! with a library of query operators like `map` or `merge`)
//!
//! # Overview
//!
//! A source ([`Observable`]) pushes values into a consumer ([`Observer`]), followed by at most
//! one terminal signal: an error or a completion. The central guarantee of this crate is that
//! consumers see a well-formed sequence, and that whatever feeds them is released exactly once,
//! no matter how producers, cancellation and panics interleave.
//!
//! ## Subscriptions
//!
//! Sources are usually written as a [`Producer`] and wrapped in a [`ProducerBase`] (or created
//! from a closure with [`create`]). Subscribing an observer wraps it in an
//! [`AutoDetachObserver`], which
//!
//! - drops every call arriving after the first terminal signal,
//! - releases the producer's resource as soon as a terminal signal has been delivered,
//! - turns errors and panics raised while the subscription is being set up into an `on_error`
//!   call.
//!
//! The [`Subscription`] returned by `subscribe` cancels the whole thing. Disposing it is
//! idempotent and may happen from any thread, before or after the producer has finished setting
//! up.
//!
//! ## Schedulers
//!
//! A [`Scheduler`] runs work now or later and returns a [`Subscription`] that cancels it.
//! [`CurrentThread`] is a trampoline: work scheduled from inside other trampolined work is queued
//! instead of run recursively, so arbitrarily deep chains of self-scheduling run in constant
//! stack space. [`EventLoop`] owns a thread and runs all of its work there; like every owned
//! thread in this crate, it is joined when dropped and forwards its panics to the owner.
//!
//! ## Observer wrappers
//!
//! [`CheckedObserver`] reports grammar violations, [`SynchronizedObserver`] serializes calls
//! behind a reentrant lock, [`AsyncLockObserver`] serializes them through a queue without
//! blocking, and [`ScheduledObserver`] redelivers them on a scheduler.
//!
//! # Usage
//!
//! ```
//! use std::sync::{Arc, Mutex};
//! use pushwire::{create, observer, Error, Observable, Observer, Subscription};
//!
//! let source = create(|o: Arc<dyn Observer<u32>>| {
//!     for i in 1..=3 {
//!         o.on_next(i);
//!     }
//!     o.on_completed();
//!     Ok(Subscription::from_fn(|| println!("released")))
//! });
//!
//! let sum = Arc::new(Mutex::new(0));
//! let s = sum.clone();
//! source
//!     .subscribe(Arc::new(observer(
//!         move |v: u32| *s.lock().unwrap() += v,
//!         |e: Error| panic!("unexpected error: {e}"),
//!         || println!("done"),
//!     )))
//!     .unwrap();
//!
//! assert_eq!(*sum.lock().unwrap(), 6);
//! ```
//!
//! Work can be moved to a different thread by redelivering notifications on an [`EventLoop`]:
//!
//! ```
//! use std::sync::Arc;
//! use pushwire::{observer, Error, EventLoop, Observer, ScheduledObserver};
//!
//! let event_loop = EventLoop::builder().name("consumer").spawn().unwrap();
//! let (tx, rx) = crossbeam_channel::unbounded();
//!
//! let scheduled = ScheduledObserver::new(
//!     observer(
//!         move |v: u32| tx.send(v).unwrap(),
//!         |_: Error| {},
//!         || {},
//!     ),
//!     Arc::new(event_loop.handle()),
//! );
//! for v in 0..5 {
//!     scheduled.on_next(v);
//! }
//! scheduled.on_completed();
//!
//! let received: Vec<u32> = rx.iter().take(5).collect();
//! assert_eq!(received, [0, 1, 2, 3, 4]);
//! ```

mod async_lock;
mod checked;
pub mod disposable;
mod drop;
mod error;
mod event_loop;
mod notification;
mod observable;
mod observer;
mod scheduled;
pub mod scheduler;
pub mod sync;
mod synchronize;
mod trampoline;

#[cfg(test)]
mod test;

pub use async_lock::{AsyncLock, AsyncLockObserver};
pub use checked::CheckedObserver;
pub use disposable::{CompositeDisposable, Disposable, FnDisposable, SingleAssignment, Subscription};
pub use error::{AlreadyTerminated, Error, ErrorKind, GrammarViolation};
pub use event_loop::{EventLoop, EventLoopBuilder, EventLoopHandle};
pub use notification::{Notification, NotificationKind, Replay};
pub use observable::{create, subscribe_safe, FnProducer, Observable, Producer, ProducerBase};
pub use observer::{observer, AutoDetachObserver, FnObserver, GuardedObserver, Observer};
pub use scheduled::ScheduledObserver;
pub use scheduler::{Action, Immediate, Scheduler, SchedulerExt};
pub use synchronize::SynchronizedObserver;
pub use trampoline::CurrentThread;
