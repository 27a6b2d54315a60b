use std::{
    collections::{binary_heap::PeekMut, BinaryHeap},
    fmt, io,
    panic::resume_unwind,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::Instant,
};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};

use crate::{
    drop::defer,
    scheduler::{Action, ScheduledItem, Scheduler},
    Disposable, Subscription,
};

enum Message {
    Schedule(ScheduledItem),
    Shutdown,
}

/// A builder object that can be used to configure and spawn an [`EventLoop`].
#[derive(Clone, Default)]
pub struct EventLoopBuilder {
    name: Option<String>,
}

impl EventLoopBuilder {
    /// Sets the name of the [`EventLoop`] thread.
    pub fn name<N: Into<String>>(self, name: N) -> Self {
        Self {
            name: Some(name.into()),
        }
    }

    /// Spawns the [`EventLoop`] thread.
    pub fn spawn(self) -> io::Result<EventLoop> {
        let (sender, recv) = crossbeam_channel::unbounded();
        let handle = EventLoopHandle {
            sender,
            seq: Arc::new(AtomicU64::new(0)),
        };

        let mut builder = thread::Builder::new();
        if let Some(name) = self.name.clone() {
            builder = builder.name(name);
        }
        let scheduler = handle.clone();
        let thread = builder.spawn(move || {
            let _guard;
            if let Some(name) = self.name {
                log::trace!("event loop '{name}' starting");
                _guard = defer(move || log::trace!("event loop '{name}' exiting"));
            }
            run(recv, scheduler);
        })?;

        Ok(EventLoop {
            handle,
            thread: Some(thread),
        })
    }
}

fn run(recv: Receiver<Message>, scheduler: EventLoopHandle) {
    let mut queue: BinaryHeap<ScheduledItem> = BinaryHeap::new();
    loop {
        while let Some(next) = queue.peek_mut() {
            if next.is_cancelled() {
                PeekMut::pop(next);
                continue;
            }
            if next.due() > Instant::now() {
                break;
            }
            PeekMut::pop(next).run(&scheduler);
        }

        let message = match queue.peek() {
            Some(next) => match recv.recv_deadline(next.due()) {
                Ok(message) => message,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return,
            },
            None => match recv.recv() {
                Ok(message) => message,
                Err(_) => return,
            },
        };
        match message {
            Message::Schedule(item) => queue.push(item),
            Message::Shutdown => return,
        }
    }
}

/// A scheduler that owns a thread and runs all of its work there.
///
/// Work is run in order of due time, and in submission order for equal due times. The thread
/// sleeps while there is nothing due.
///
/// This type enforces structured concurrency: When it's dropped, the thread is signaled to exit
/// and joined. Work that has not run by then is dropped. If an action has panicked, the panic
/// is forwarded to the thread dropping the [`EventLoop`].
///
/// # Examples
///
/// ```
/// use pushwire::{EventLoop, SchedulerExt, Subscription};
///
/// let event_loop = EventLoop::builder().name("io").spawn().unwrap();
/// let (tx, rx) = crossbeam_channel::bounded(1);
/// event_loop.schedule_fn(move |_| {
///     tx.send(std::thread::current().name().map(String::from)).unwrap();
///     Subscription::empty()
/// });
/// assert_eq!(rx.recv().unwrap().as_deref(), Some("io"));
/// ```
pub struct EventLoop {
    handle: EventLoopHandle,
    thread: Option<JoinHandle<()>>,
}

impl Drop for EventLoop {
    fn drop(&mut self) {
        // The thread holds a sender itself, so the channel never disconnects on its own.
        let _ = self.handle.sender.send(Message::Shutdown);

        self.wait_for_exit();
    }
}

impl EventLoop {
    /// Returns a builder that can be used to configure and spawn an [`EventLoop`].
    #[inline]
    pub fn builder() -> EventLoopBuilder {
        EventLoopBuilder::default()
    }

    /// Returns a clonable [`Scheduler`] that queues work on this loop.
    ///
    /// Handles stay valid after the [`EventLoop`] is dropped, but no longer run anything.
    pub fn handle(&self) -> EventLoopHandle {
        self.handle.clone()
    }

    fn wait_for_exit(&mut self) {
        // Wait for it to exit and propagate its panic if it panicked.
        if let Some(thread) = self.thread.take() {
            if let Err(payload) = thread.join() {
                if !thread::panicking() {
                    resume_unwind(payload);
                }
            }
        }
    }
}

impl Scheduler for EventLoop {
    fn schedule_at(&self, due: Instant, action: Action) -> Subscription {
        self.handle.schedule_at(due, action)
    }
}

impl fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = self.thread.as_ref().and_then(|t| t.thread().name());
        f.debug_struct("EventLoop").field("name", &name).finish()
    }
}

/// A [`Scheduler`] that queues work on an [`EventLoop`].
///
/// This is also the scheduler that actions running on the loop receive.
#[derive(Clone)]
pub struct EventLoopHandle {
    sender: Sender<Message>,
    seq: Arc<AtomicU64>,
}

impl Scheduler for EventLoopHandle {
    /// Queues `action` on the loop.
    ///
    /// If the loop has stopped, `action` is dropped and the returned handle is already disposed.
    fn schedule_at(&self, due: Instant, action: Action) -> Subscription {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let (item, subscription) = ScheduledItem::new(due, seq, action);
        if self.sender.send(Message::Schedule(item)).is_err() {
            subscription.dispose();
        }
        subscription
    }
}

impl fmt::Debug for EventLoopHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventLoopHandle")
            .field("queued", &self.sender.len())
            .finish()
    }
}
