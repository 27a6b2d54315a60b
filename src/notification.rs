//! Reified notifications.
//!
//! A [`Notification`] captures one call into an [`Observer`] as a value, so it can be stored,
//! compared, sent across threads and replayed later.

use std::{fmt, sync::Arc};

use crate::{
    observable::{Producer, ProducerBase},
    scheduler::{Scheduler, SchedulerExt},
    Error, Observer, Subscription,
};

/// One of the three signals an [`Observer`] can receive.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Notification<T> {
    Next(T),
    Error(Error),
    Completed,
}

/// The kind of a [`Notification`], without its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotificationKind {
    Next,
    Error,
    Completed,
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            NotificationKind::Next => "on_next",
            NotificationKind::Error => "on_error",
            NotificationKind::Completed => "on_completed",
        })
    }
}

impl<T> Notification<T> {
    #[inline]
    pub fn next(value: T) -> Self {
        Notification::Next(value)
    }

    #[inline]
    pub fn error(error: Error) -> Self {
        Notification::Error(error)
    }

    #[inline]
    pub fn completed() -> Self {
        Notification::Completed
    }

    pub fn kind(&self) -> NotificationKind {
        match self {
            Notification::Next(_) => NotificationKind::Next,
            Notification::Error(_) => NotificationKind::Error,
            Notification::Completed => NotificationKind::Completed,
        }
    }

    /// Returns the carried value if this is a [`Notification::Next`].
    pub fn value(&self) -> Option<&T> {
        match self {
            Notification::Next(value) => Some(value),
            _ => None,
        }
    }

    /// Returns the carried error if this is a [`Notification::Error`].
    pub fn error_ref(&self) -> Option<&Error> {
        match self {
            Notification::Error(error) => Some(error),
            _ => None,
        }
    }

    /// Returns `true` for [`Notification::Error`] and [`Notification::Completed`].
    #[inline]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Notification::Next(_))
    }

    /// Delivers this notification to the matching method of `observer`.
    pub fn accept<O: Observer<T> + ?Sized>(self, observer: &O) {
        match self {
            Notification::Next(value) => observer.on_next(value),
            Notification::Error(error) => observer.on_error(error),
            Notification::Completed => observer.on_completed(),
        }
    }

    /// Calls exactly one of the three handlers, depending on the kind of notification, and
    /// returns its result.
    pub fn accept_with<R>(
        self,
        on_next: impl FnOnce(T) -> R,
        on_error: impl FnOnce(Error) -> R,
        on_completed: impl FnOnce() -> R,
    ) -> R {
        match self {
            Notification::Next(value) => on_next(value),
            Notification::Error(error) => on_error(error),
            Notification::Completed => on_completed(),
        }
    }

    /// Turns this notification into a source that replays it to every subscriber.
    ///
    /// Each subscription schedules a single delivery on `scheduler`. A [`Notification::Next`] is
    /// followed by an `on_completed` call; terminal notifications are delivered on their own.
    pub fn into_observable(self, scheduler: Arc<dyn Scheduler>) -> ProducerBase<Replay<T>>
    where
        T: Clone + Send + Sync + 'static,
    {
        ProducerBase::new(Replay {
            notification: self,
            scheduler,
        })
    }
}

/// The producer returned by [`Notification::into_observable`].
pub struct Replay<T> {
    notification: Notification<T>,
    scheduler: Arc<dyn Scheduler>,
}

impl<T> Replay<T> {
    pub fn notification(&self) -> &Notification<T> {
        &self.notification
    }
}

impl<T: Clone + Send + Sync + 'static> Producer<T> for Replay<T> {
    fn subscribe_core(&self, observer: Arc<dyn Observer<T>>) -> Result<Subscription, Error> {
        let notification = self.notification.clone();
        Ok(self.scheduler.schedule_fn(move |_| {
            let completes = !notification.is_terminal();
            notification.accept(&*observer);
            if completes {
                observer.on_completed();
            }
            Subscription::empty()
        }))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use crate::{test::Recorder, CurrentThread, Disposable, Observable};

    use super::*;

    #[test]
    fn equality() {
        let err = Error::new("boom");
        assert_eq!(Notification::next(5), Notification::next(5));
        assert_ne!(Notification::next(5), Notification::next(6));
        assert_eq!(Notification::<i32>::completed(), Notification::completed());
        assert_eq!(
            Notification::<i32>::error(err.clone()),
            Notification::error(err.clone())
        );
        assert_ne!(
            Notification::<i32>::error(err),
            Notification::error(Error::new("boom"))
        );
        assert_ne!(Notification::next(()), Notification::completed());

        let set: HashSet<_> = [
            Notification::next(1),
            Notification::next(1),
            Notification::completed(),
            Notification::completed(),
        ]
        .into_iter()
        .collect();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn accessors() {
        let next = Notification::next(7);
        assert_eq!(next.kind(), NotificationKind::Next);
        assert_eq!(next.value(), Some(&7));
        assert!(!next.is_terminal());

        let err = Error::new("boom");
        let error = Notification::<i32>::error(err.clone());
        assert_eq!(error.kind(), NotificationKind::Error);
        assert_eq!(error.error_ref(), Some(&err));
        assert!(error.is_terminal());

        assert_eq!(NotificationKind::Completed.to_string(), "on_completed");
    }

    #[test]
    fn accept_dispatches_to_observer() {
        let recorder = Recorder::<i32>::new();
        Notification::next(1).accept(&*recorder);
        Notification::completed().accept(&*recorder);
        assert_eq!(
            recorder.events(),
            [Notification::next(1), Notification::completed()]
        );
    }

    #[test]
    fn accept_with_calls_one_handler() {
        let describe = |n: Notification<i32>| {
            n.accept_with(
                |v| format!("next {v}"),
                |e| format!("error {e}"),
                || "completed".to_string(),
            )
        };
        assert_eq!(describe(Notification::next(3)), "next 3");
        assert_eq!(describe(Notification::error(Error::new("x"))), "error x");
        assert_eq!(describe(Notification::completed()), "completed");
    }

    #[test]
    fn next_replays_with_completion() {
        let source = Notification::next(5).into_observable(Arc::new(CurrentThread));
        assert_eq!(source.producer().notification(), &Notification::next(5));
        for _ in 0..2 {
            let recorder = Recorder::<i32>::new();
            source.subscribe(recorder.clone()).unwrap();
            assert_eq!(
                recorder.events(),
                [Notification::next(5), Notification::completed()]
            );
        }
    }

    #[test]
    fn terminal_notifications_replay_alone() {
        let err = Error::new("boom");
        let recorder = Recorder::<i32>::new();
        Notification::error(err.clone())
            .into_observable(Arc::new(CurrentThread))
            .subscribe(recorder.clone())
            .unwrap();
        assert_eq!(recorder.events(), [Notification::error(err)]);

        let recorder = Recorder::<i32>::new();
        Notification::completed()
            .into_observable(Arc::new(CurrentThread))
            .subscribe(recorder.clone())
            .unwrap();
        assert_eq!(recorder.events(), [Notification::completed()]);
    }

    #[test]
    fn replay_can_be_cancelled_before_it_runs() {
        let recorder = Recorder::<i32>::new();
        let source = Notification::next(1).into_observable(Arc::new(CurrentThread));
        let r = recorder.clone();
        CurrentThread.schedule_fn(move |_| {
            // Still inside the trampoline, so the replay is only queued at this point.
            let subscription = source.subscribe(r).unwrap();
            subscription.dispose();
            Subscription::empty()
        });
        assert!(recorder.events().is_empty());
    }
}
