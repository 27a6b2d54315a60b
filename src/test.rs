//! Internal unit test utilities.

use std::{
    panic::resume_unwind,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use crate::{sync::Mutex, Disposable, Error, Notification, Observer, Subscription};

/// Panics without invoking the panic hook, so expected panics don't clutter test output.
pub fn silent_panic(payload: String) {
    resume_unwind(Box::new(payload));
}

/// An [`Observer`] that records every call it receives, in order.
pub struct Recorder<T> {
    events: Mutex<Vec<Notification<T>>>,
}

impl<T> Recorder<T> {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            events: Mutex::new(Vec::new()),
        })
    }

    pub fn events(&self) -> Vec<Notification<T>>
    where
        T: Clone,
    {
        self.events.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }
}

impl<T: Send> Observer<T> for Recorder<T> {
    fn on_next(&self, value: T) {
        self.events.lock().push(Notification::Next(value));
    }

    fn on_error(&self, error: Error) {
        self.events.lock().push(Notification::Error(error));
    }

    fn on_completed(&self) {
        self.events.lock().push(Notification::Completed);
    }
}

/// Counts how often it has been disposed. Unlike the library's disposables, every call counts.
#[derive(Clone, Default)]
pub struct DisposeCounter {
    count: Arc<AtomicUsize>,
}

impl DisposeCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscription(&self) -> Subscription {
        Subscription::new(self.clone())
    }

    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }
}

impl Disposable for DisposeCounter {
    fn dispose(&self) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }
}
