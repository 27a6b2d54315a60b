use std::{collections::VecDeque, fmt, mem, sync::Arc};

use crate::{drop::defer, sync::Mutex, Disposable, Error, Observer};

type Job = Box<dyn FnOnce() + Send>;

struct State {
    queue: VecDeque<Job>,
    /// Whether some thread is currently draining `queue`.
    running: bool,
    faulted: bool,
}

/// A non-reentrant lock that queues work instead of blocking.
///
/// [`AsyncLock::wait`] runs its job right away if no other job is running. Otherwise, including
/// when called from inside a running job, the job is queued and [`AsyncLock::wait`] returns
/// immediately; the thread that is already running jobs picks it up, in submission order, before
/// it releases the lock.
///
/// If a job panics, the lock becomes *faulted*: the panic propagates to the thread that was
/// running the job, queued jobs are dropped, and later jobs are ignored. Disposing the lock has
/// the same effect without a panic.
pub struct AsyncLock {
    state: Mutex<State>,
}

impl AsyncLock {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                queue: VecDeque::new(),
                running: false,
                faulted: false,
            }),
        }
    }

    /// Runs `job` under the lock, now or once the jobs ahead of it have run.
    pub fn wait<F: FnOnce() + Send + 'static>(&self, job: F) {
        {
            let mut state = self.state.lock();
            if state.faulted {
                return;
            }
            state.queue.push_back(Box::new(job));
            if state.running {
                return;
            }
            state.running = true;
        }

        let fault = defer(|| {
            let dropped = {
                let mut state = self.state.lock();
                state.faulted = true;
                state.running = false;
                mem::take(&mut state.queue)
            };
            log::warn!("async lock faulted, dropping {} queued jobs", dropped.len());
            drop(dropped);
        });
        loop {
            let job = {
                let mut state = self.state.lock();
                match state.queue.pop_front() {
                    Some(job) => job,
                    None => {
                        state.running = false;
                        break;
                    }
                }
            };
            job();
        }
        fault.disarm();
    }

    pub fn is_faulted(&self) -> bool {
        self.state.lock().faulted
    }
}

impl Default for AsyncLock {
    fn default() -> Self {
        Self::new()
    }
}

impl Disposable for AsyncLock {
    /// Faults the lock: queued jobs are dropped and later jobs are ignored.
    fn dispose(&self) {
        let dropped = {
            let mut state = self.state.lock();
            state.faulted = true;
            mem::take(&mut state.queue)
        };
        drop(dropped);
    }
}

impl fmt::Debug for AsyncLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("AsyncLock")
            .field("queued", &state.queue.len())
            .field("running", &state.running)
            .field("faulted", &state.faulted)
            .finish()
    }
}

/// An [`Observer`] wrapper that delivers every call through an [`AsyncLock`].
///
/// Calls never overlap and never block. A call arriving while another one is being delivered,
/// from another thread or from the handler itself, is delivered after it, in arrival order.
pub struct AsyncLockObserver<O> {
    inner: Arc<O>,
    lock: Arc<AsyncLock>,
}

impl<O> AsyncLockObserver<O> {
    pub fn new(inner: O) -> Self {
        Self::with_lock(inner, Arc::new(AsyncLock::new()))
    }

    /// Wraps `inner` using an existing lock, which may be shared with other observers.
    pub fn with_lock(inner: O, lock: Arc<AsyncLock>) -> Self {
        Self {
            inner: Arc::new(inner),
            lock,
        }
    }
}

impl<T, O> Observer<T> for AsyncLockObserver<O>
where
    T: Send + 'static,
    O: Observer<T> + 'static,
{
    fn on_next(&self, value: T) {
        let inner = self.inner.clone();
        self.lock.wait(move || inner.on_next(value));
    }

    fn on_error(&self, error: Error) {
        let inner = self.inner.clone();
        self.lock.wait(move || inner.on_error(error));
    }

    fn on_completed(&self) {
        let inner = self.inner.clone();
        self.lock.wait(move || inner.on_completed());
    }
}

impl<O> fmt::Debug for AsyncLockObserver<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncLockObserver")
            .field("lock", &self.lock)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::{
        panic::{catch_unwind, AssertUnwindSafe},
        sync::atomic::{AtomicBool, AtomicUsize, Ordering},
        thread,
    };

    use crate::{test::silent_panic, FnObserver};

    use super::*;

    type Log = Arc<Mutex<Vec<String>>>;

    #[test]
    fn reentrant_jobs_are_queued_in_order() {
        let lock = Arc::new(AsyncLock::new());
        let log = Log::default();

        let (l, inner_lock) = (log.clone(), lock.clone());
        lock.wait(move || {
            l.lock().push("a start".into());
            for name in ["b", "c"] {
                let l = l.clone();
                inner_lock.wait(move || l.lock().push(name.into()));
            }
            l.lock().push("a end".into());
        });

        assert_eq!(*log.lock(), ["a start", "a end", "b", "c"]);
    }

    #[test]
    fn jobs_from_many_threads_never_overlap() {
        let lock = AsyncLock::new();
        let busy = Arc::new(AtomicBool::new(false));
        let overlaps = Arc::new(AtomicUsize::new(0));
        let runs = Arc::new(AtomicUsize::new(0));

        thread::scope(|s| {
            for _ in 0..4 {
                s.spawn(|| {
                    for _ in 0..100 {
                        let (busy, overlaps, runs) = (busy.clone(), overlaps.clone(), runs.clone());
                        lock.wait(move || {
                            if busy.swap(true, Ordering::SeqCst) {
                                overlaps.fetch_add(1, Ordering::SeqCst);
                            }
                            runs.fetch_add(1, Ordering::SeqCst);
                            busy.store(false, Ordering::SeqCst);
                        });
                    }
                });
            }
        });

        assert_eq!(runs.load(Ordering::SeqCst), 400);
        assert_eq!(overlaps.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn panicking_job_faults_the_lock() {
        let lock = Arc::new(AsyncLock::new());
        let log = Log::default();

        let (l, inner_lock) = (log.clone(), lock.clone());
        catch_unwind(AssertUnwindSafe(|| {
            lock.wait(move || {
                let queued = l.clone();
                inner_lock.wait(move || queued.lock().push("queued".into()));
                silent_panic("job failed".into());
            });
        }))
        .unwrap_err();
        assert!(lock.is_faulted());

        let l = log.clone();
        lock.wait(move || l.lock().push("after fault".into()));
        assert!(log.lock().is_empty());
    }

    #[test]
    fn disposed_lock_ignores_jobs() {
        let lock = AsyncLock::new();
        lock.dispose();
        let ran = Arc::new(AtomicBool::new(false));
        let r = ran.clone();
        lock.wait(move || r.store(true, Ordering::SeqCst));
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[test]
    fn observer_delivers_reentrant_calls_afterwards() {
        let log = Log::default();
        let slot: Arc<Mutex<Option<Arc<dyn Observer<u32>>>>> = Arc::new(Mutex::new(None));

        let (l, target) = (log.clone(), slot.clone());
        let observer: Arc<dyn Observer<u32>> = Arc::new(AsyncLockObserver::new(FnObserver::new(
            move |v: u32| {
                l.lock().push(format!("{v} start"));
                if v == 0 {
                    let target = target.lock().clone();
                    if let Some(target) = target {
                        target.on_next(1);
                        target.on_completed();
                    }
                }
                l.lock().push(format!("{v} end"));
            },
            |_: Error| {},
            {
                let l = log.clone();
                move || l.lock().push("completed".into())
            },
        )));
        *slot.lock() = Some(observer.clone());

        observer.on_next(0);
        assert_eq!(
            *log.lock(),
            ["0 start", "0 end", "1 start", "1 end", "completed"]
        );
        slot.lock().take();
    }
}
