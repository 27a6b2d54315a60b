//! The scheduler abstraction and the helpers built on top of it.
//!
//! A [`Scheduler`] runs a unit of work, optionally at a later point in time, and hands back a
//! [`Subscription`] that cancels the work if it has not started yet. Work receives the scheduler
//! it runs on, so it can schedule more work; the [`Subscription`] it returns is chained into the
//! handle of the item that ran it, so disposing the outer handle tears down the whole chain.
//!
//! This module provides the [`Immediate`] scheduler. The trampolining [`CurrentThread`] scheduler
//! and the thread-owning [`EventLoop`] live in their own modules.
//!
//! [`CurrentThread`]: crate::CurrentThread
//! [`EventLoop`]: crate::EventLoop

use std::{
    cmp::Ordering,
    marker::PhantomData,
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use crate::{
    disposable::{CompositeDisposable, SingleAssignment},
    error::ErrorKind,
    sync::Mutex,
    Disposable, Error, Subscription,
};

/// A unit of scheduled work.
///
/// The action is called with the scheduler that runs it. The returned [`Subscription`] represents
/// whatever the action scheduled or started itself; return [`Subscription::empty`] if there is
/// nothing.
pub type Action = Box<dyn FnOnce(&dyn Scheduler) -> Subscription + Send>;

/// Runs actions, now or at a given point in time.
///
/// Only [`Scheduler::schedule_at`] has to be implemented. Scheduling must not fail for a
/// well-formed request; requests that cannot be represented are rejected by
/// [`Scheduler::schedule_after`] before any work is queued.
pub trait Scheduler: Send + Sync {
    /// The scheduler's notion of the current time.
    fn now(&self) -> Instant {
        Instant::now()
    }

    /// Schedules `action` to run once `due` has been reached.
    fn schedule_at(&self, due: Instant, action: Action) -> Subscription;

    /// Schedules `action` to run as soon as possible.
    fn schedule(&self, action: Action) -> Subscription {
        self.schedule_at(self.now(), action)
    }

    /// Schedules `action` to run after `delay` has elapsed.
    ///
    /// Fails with [`ErrorKind::InvalidArgument`] if the resulting point in time cannot be
    /// represented.
    fn schedule_after(&self, delay: Duration, action: Action) -> Result<Subscription, Error> {
        let due = self
            .now()
            .checked_add(delay)
            .ok_or(ErrorKind::InvalidArgument("delay is out of range"))?;
        Ok(self.schedule_at(due, action))
    }
}

impl<S: Scheduler + ?Sized> Scheduler for Arc<S> {
    fn now(&self) -> Instant {
        (**self).now()
    }

    fn schedule_at(&self, due: Instant, action: Action) -> Subscription {
        (**self).schedule_at(due, action)
    }

    fn schedule(&self, action: Action) -> Subscription {
        (**self).schedule(action)
    }

    fn schedule_after(&self, delay: Duration, action: Action) -> Result<Subscription, Error> {
        (**self).schedule_after(delay, action)
    }
}

/// Convenience methods for every [`Scheduler`].
pub trait SchedulerExt: Scheduler {
    /// Schedules a closure without boxing it first.
    fn schedule_fn<F>(&self, f: F) -> Subscription
    where
        F: FnOnce(&dyn Scheduler) -> Subscription + Send + 'static,
    {
        self.schedule(Box::new(f))
    }

    /// Schedules `f` to run with `state`.
    fn schedule_with<S, F>(&self, state: S, f: F) -> Subscription
    where
        S: Send + 'static,
        F: FnOnce(&dyn Scheduler, S) -> Subscription + Send + 'static,
    {
        self.schedule(Box::new(move |scheduler: &dyn Scheduler| f(scheduler, state)))
    }

    /// Runs `action` with `state`, and again for every state it passes to its `recurse` argument.
    ///
    /// Every step is a separate item on the scheduler, so on the [`CurrentThread`] trampoline an
    /// arbitrarily long chain runs in constant stack space. Steps still waiting to run are tracked
    /// in one group; disposing the returned handle cancels all of them, including any step
    /// scheduled by an action that is running at that moment.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::sync::{Arc, Mutex};
    /// use pushwire::{CurrentThread, SchedulerExt};
    ///
    /// let seen = Arc::new(Mutex::new(Vec::new()));
    /// let s = seen.clone();
    /// CurrentThread.schedule_recursive(0, move |i, recurse| {
    ///     s.lock().unwrap().push(i);
    ///     if i < 4 {
    ///         recurse(i + 1);
    ///     }
    /// });
    /// assert_eq!(*seen.lock().unwrap(), [0, 1, 2, 3, 4]);
    /// ```
    ///
    /// [`CurrentThread`]: crate::CurrentThread
    fn schedule_recursive<S, F>(&self, state: S, action: F) -> Subscription
    where
        S: Send + 'static,
        F: FnMut(S, &mut dyn FnMut(S)) + Send + 'static,
    {
        let recursion = Arc::new(Recursion {
            action: Mutex::new(action),
            steps: CompositeDisposable::new(),
            _state: PhantomData,
        });
        recursion.schedule_step(self, state);
        Subscription::from_arc(recursion)
    }
}

impl<S: Scheduler + ?Sized> SchedulerExt for S {}

struct Recursion<S, F> {
    action: Mutex<F>,
    /// Handles of the steps that have been scheduled but have not started yet.
    steps: CompositeDisposable,
    _state: PhantomData<fn(S)>,
}

impl<S, F> Recursion<S, F>
where
    S: Send + 'static,
    F: FnMut(S, &mut dyn FnMut(S)) + Send + 'static,
{
    fn schedule_step<Sch: Scheduler + ?Sized>(self: &Arc<Self>, scheduler: &Sch, state: S) {
        let slot = Arc::new(SingleAssignment::new());
        let entry = Subscription::from(slot.clone());
        self.steps.add(entry.clone());

        let this = self.clone();
        let handle = scheduler.schedule(Box::new(move |scheduler: &dyn Scheduler| {
            this.steps.remove(&entry);
            this.run_step(scheduler, state);
            Subscription::empty()
        }));
        let assigned = slot.set(handle);
        debug_assert!(assigned.is_ok(), "step slot assigned twice");
    }

    fn run_step(self: &Arc<Self>, scheduler: &dyn Scheduler, state: S) {
        if self.steps.is_disposed() {
            return;
        }

        let mut pending = Vec::new();
        {
            let mut guard = self.action.lock();
            let action = &mut *guard;
            action(state, &mut |next: S| pending.push(next));
        }
        for next in pending {
            self.schedule_step(scheduler, next);
        }
    }
}

impl<S, F: Send> Disposable for Recursion<S, F> {
    fn dispose(&self) {
        self.steps.dispose();
    }
}

/// Runs every action inline on the calling thread, blocking until its due time first.
///
/// Recursive scheduling nests on the call stack; use [`CurrentThread`] for long chains.
///
/// [`CurrentThread`]: crate::CurrentThread
#[derive(Debug, Clone, Copy, Default)]
pub struct Immediate;

impl Scheduler for Immediate {
    fn schedule_at(&self, due: Instant, action: Action) -> Subscription {
        let delay = due.saturating_duration_since(self.now());
        if !delay.is_zero() {
            thread::sleep(delay);
        }
        action(self)
    }
}

/// An entry in the priority queue of a queueing scheduler.
///
/// Items are ordered so that a [`BinaryHeap`] pops the earliest due time first, and items with
/// equal due times in submission order.
///
/// [`BinaryHeap`]: std::collections::BinaryHeap
pub(crate) struct ScheduledItem {
    due: Instant,
    seq: u64,
    action: Action,
    handle: Arc<SingleAssignment>,
}

impl ScheduledItem {
    /// Creates an item together with the handle that cancels it.
    pub(crate) fn new(due: Instant, seq: u64, action: Action) -> (Self, Subscription) {
        let handle = Arc::new(SingleAssignment::new());
        let subscription = Subscription::from(handle.clone());
        let item = Self {
            due,
            seq,
            action,
            handle,
        };
        (item, subscription)
    }

    #[inline]
    pub(crate) fn due(&self) -> Instant {
        self.due
    }

    #[inline]
    pub(crate) fn is_cancelled(&self) -> bool {
        self.handle.is_disposed()
    }

    /// Runs the action unless the item has been cancelled, and chains whatever it returns into
    /// the item's handle.
    pub(crate) fn run(self, scheduler: &dyn Scheduler) {
        if self.is_cancelled() {
            return;
        }
        let chained = (self.action)(scheduler);
        let assigned = self.handle.set(chained);
        debug_assert!(assigned.is_ok(), "item handle assigned twice");
    }
}

impl PartialEq for ScheduledItem {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ScheduledItem {}

impl PartialOrd for ScheduledItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledItem {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed, `BinaryHeap` is a max-heap.
        other
            .due
            .cmp(&self.due)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}
