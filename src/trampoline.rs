//! The current-thread trampoline.

use std::{cell::RefCell, collections::BinaryHeap, thread, time::Instant};

use crate::{
    drop::defer,
    scheduler::{Action, ScheduledItem, Scheduler},
    Subscription,
};

thread_local! {
    /// `Some` while this thread is draining its trampoline.
    static TRAMPOLINE: RefCell<Option<Trampoline>> = const { RefCell::new(None) };
}

struct Trampoline {
    queue: BinaryHeap<ScheduledItem>,
    next_seq: u64,
}

/// A scheduler that runs work on the calling thread, turning recursive scheduling into a loop.
///
/// The first call to schedule something on a thread starts a *drain*: the action runs inline,
/// along with everything it schedules, and the call returns once the thread's queue is empty.
/// Work scheduled while a drain is running is only queued, and runs after the current action has
/// returned. Recursive self-scheduling therefore never grows the call stack.
///
/// Queued work runs in order of due time, and in submission order for equal due times. When the
/// next item is not due yet, the draining thread sleeps until it is. Disposing the handle of a
/// queued item makes the drain skip it.
///
/// If an action panics, the panic propagates out of the call that started the drain and the
/// remaining queued work is dropped without running.
///
/// # Examples
///
/// ```
/// use std::sync::{Arc, Mutex};
/// use pushwire::{CurrentThread, SchedulerExt, Subscription};
///
/// let log = Arc::new(Mutex::new(Vec::new()));
/// let l = log.clone();
/// CurrentThread.schedule_fn(move |scheduler| {
///     l.lock().unwrap().push("outer start");
///     let inner = l.clone();
///     scheduler.schedule_fn(move |_| {
///         inner.lock().unwrap().push("inner");
///         Subscription::empty()
///     });
///     l.lock().unwrap().push("outer end");
///     Subscription::empty()
/// });
/// assert_eq!(*log.lock().unwrap(), ["outer start", "outer end", "inner"]);
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct CurrentThread;

impl CurrentThread {
    /// Returns `true` if the calling thread is not draining its trampoline, so scheduling work
    /// on [`CurrentThread`] would run it right away instead of queueing it.
    pub fn is_schedule_required() -> bool {
        TRAMPOLINE.with(|t| t.borrow().is_none())
    }

    fn drain() {
        log::trace!("trampoline starting on {:?}", thread::current().id());
        let _reset = defer(|| {
            // Drop leftover work outside of the borrow, its destructors may schedule more.
            let leftover = TRAMPOLINE.with(|t| t.borrow_mut().take());
            drop(leftover);
            log::trace!("trampoline exiting on {:?}", thread::current().id());
        });

        loop {
            let next = TRAMPOLINE.with(|t| t.borrow_mut().as_mut().and_then(|t| t.queue.pop()));
            let Some(item) = next else {
                break;
            };
            if item.is_cancelled() {
                continue;
            }
            let delay = item.due().saturating_duration_since(Instant::now());
            if !delay.is_zero() {
                thread::sleep(delay);
            }
            item.run(&CurrentThread);
        }
    }
}

impl Scheduler for CurrentThread {
    fn schedule_at(&self, due: Instant, action: Action) -> Subscription {
        let (subscription, start) = TRAMPOLINE.with(|t| {
            let mut t = t.borrow_mut();
            let start = t.is_none();
            let trampoline = t.get_or_insert_with(|| Trampoline {
                queue: BinaryHeap::new(),
                next_seq: 0,
            });
            let seq = trampoline.next_seq;
            trampoline.next_seq += 1;
            let (item, subscription) = ScheduledItem::new(due, seq, action);
            trampoline.queue.push(item);
            (subscription, start)
        });

        if start {
            Self::drain();
        }
        subscription
    }
}
