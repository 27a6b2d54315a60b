use std::{
    collections::VecDeque,
    fmt, mem,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use crate::{
    scheduler::{Scheduler, SchedulerExt},
    sync::Mutex,
    Disposable, Error, Notification, Observer, Subscription,
};

/// An [`Observer`] wrapper that delivers every call on a [`Scheduler`].
///
/// Calls are queued and delivered one scheduled item at a time, in the order they were made: each
/// item delivers one notification and then schedules the next. At most one item is scheduled at
/// any time, so the inner observer never sees overlapping calls, even on a multi-threaded
/// scheduler.
///
/// On the [`CurrentThread`] trampoline, calls made outside of trampolined work are delivered
/// before they return.
///
/// Disposing the wrapper drops queued notifications and ignores later calls.
///
/// [`CurrentThread`]: crate::CurrentThread
pub struct ScheduledObserver<T, O> {
    shared: Arc<Shared<T, O>>,
}

struct Shared<T, O> {
    inner: O,
    scheduler: Arc<dyn Scheduler>,
    queue: Mutex<Queue<T>>,
    disposed: AtomicBool,
}

struct Queue<T> {
    items: VecDeque<Notification<T>>,
    /// Whether a delivery item is scheduled or running.
    active: bool,
}

impl<T, O> ScheduledObserver<T, O>
where
    T: Send + 'static,
    O: Observer<T> + 'static,
{
    pub fn new(inner: O, scheduler: Arc<dyn Scheduler>) -> Self {
        Self {
            shared: Arc::new(Shared {
                inner,
                scheduler,
                queue: Mutex::new(Queue {
                    items: VecDeque::new(),
                    active: false,
                }),
                disposed: AtomicBool::new(false),
            }),
        }
    }

    fn push(&self, notification: Notification<T>) {
        if self.shared.disposed.load(Ordering::Acquire) {
            return;
        }
        let start = {
            let mut queue = self.shared.queue.lock();
            queue.items.push_back(notification);
            !mem::replace(&mut queue.active, true)
        };
        if start {
            self.shared.schedule_next();
        }
    }
}

impl<T, O> Shared<T, O>
where
    T: Send + 'static,
    O: Observer<T> + 'static,
{
    fn schedule_next(self: &Arc<Self>) {
        let this = self.clone();
        self.scheduler.schedule_fn(move |_| {
            this.deliver_one();
            Subscription::empty()
        });
    }

    fn deliver_one(self: &Arc<Self>) {
        let next = {
            let mut queue = self.queue.lock();
            let next = if self.disposed.load(Ordering::Acquire) {
                None
            } else {
                queue.items.pop_front()
            };
            if next.is_none() {
                queue.active = false;
            }
            next
        };
        let Some(notification) = next else {
            return;
        };

        notification.accept(&self.inner);

        let more = {
            let mut queue = self.queue.lock();
            queue.active = !queue.items.is_empty();
            queue.active
        };
        if more {
            self.schedule_next();
        }
    }
}

impl<T, O> Observer<T> for ScheduledObserver<T, O>
where
    T: Send + 'static,
    O: Observer<T> + 'static,
{
    fn on_next(&self, value: T) {
        self.push(Notification::Next(value));
    }

    fn on_error(&self, error: Error) {
        self.push(Notification::Error(error));
    }

    fn on_completed(&self) {
        self.push(Notification::Completed);
    }
}

impl<T: Send, O: Send + Sync> Disposable for ScheduledObserver<T, O> {
    fn dispose(&self) {
        self.shared.disposed.store(true, Ordering::Release);
        let dropped = mem::take(&mut self.shared.queue.lock().items);
        drop(dropped);
    }
}

impl<T, O> fmt::Debug for ScheduledObserver<T, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let queue = self.shared.queue.lock();
        f.debug_struct("ScheduledObserver")
            .field("queued", &queue.items.len())
            .field("active", &queue.active)
            .field("disposed", &self.shared.disposed.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}
