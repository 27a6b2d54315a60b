//! Resources that can be released, and the containers the core uses to hold them.

use std::{
    fmt, mem,
    panic::{self, AssertUnwindSafe},
    ptr,
    sync::{
        atomic::{AtomicPtr, Ordering},
        Arc,
    },
};

use crate::{error::ErrorKind, sync::Mutex, Error};

/// A resource that can be released.
///
/// Implementations must make [`Disposable::dispose`] idempotent and safe to call from any thread:
/// only the first call releases anything.
pub trait Disposable: Send + Sync {
    fn dispose(&self);
}

impl<D: Disposable + ?Sized> Disposable for Arc<D> {
    #[inline]
    fn dispose(&self) {
        (**self).dispose();
    }
}

/// A clonable, type-erased handle to a [`Disposable`].
///
/// Returned by [`Observable::subscribe`] and by every scheduling operation. Dropping a
/// [`Subscription`] does *not* dispose it; the resource stays alive until [`Disposable::dispose`]
/// is called or the work it represents finishes on its own.
///
/// [`Observable::subscribe`]: crate::Observable::subscribe
#[derive(Clone, Default)]
pub struct Subscription {
    inner: Option<Handle>,
}

/// Slots are kept apart from other resources so that chains of them can be disposed and dropped
/// in a loop.
#[derive(Clone)]
enum Handle {
    Slot(Arc<SingleAssignment>),
    Dyn(Arc<dyn Disposable>),
}

impl Handle {
    fn as_ptr(&self) -> *const () {
        match self {
            Handle::Slot(slot) => Arc::as_ptr(slot) as *const (),
            Handle::Dyn(disposable) => Arc::as_ptr(disposable) as *const (),
        }
    }
}

impl Subscription {
    /// Returns a handle that holds nothing. Disposing it does nothing.
    #[inline]
    pub const fn empty() -> Self {
        Self { inner: None }
    }

    pub fn new<D: Disposable + 'static>(disposable: D) -> Self {
        Self::from_arc(Arc::new(disposable))
    }

    pub fn from_arc(disposable: Arc<dyn Disposable>) -> Self {
        Self {
            inner: Some(Handle::Dyn(disposable)),
        }
    }

    /// Returns a handle that runs `f` the first time it is disposed.
    pub fn from_fn<F: FnOnce() + Send + 'static>(f: F) -> Self {
        Self::new(FnDisposable::new(f))
    }

    /// Returns `true` if both handles refer to the same underlying resource.
    ///
    /// Two empty handles are considered equal.
    pub fn ptr_eq(&self, other: &Subscription) -> bool {
        match (&self.inner, &other.inner) {
            (None, None) => true,
            (Some(a), Some(b)) => ptr::eq(a.as_ptr(), b.as_ptr()),
            _ => false,
        }
    }
}

/// Slot handles should be converted with this impl rather than [`Subscription::from_arc`]:
/// arbitrarily long chains of slots assigned into each other are then released without
/// recursion.
impl From<Arc<SingleAssignment>> for Subscription {
    fn from(slot: Arc<SingleAssignment>) -> Self {
        Self {
            inner: Some(Handle::Slot(slot)),
        }
    }
}

impl Disposable for Subscription {
    #[inline]
    fn dispose(&self) {
        match &self.inner {
            Some(Handle::Slot(slot)) => slot.dispose(),
            Some(Handle::Dyn(disposable)) => disposable.dispose(),
            None => {}
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.inner {
            Some(inner) => f.debug_tuple("Subscription").field(&inner.as_ptr()).finish(),
            None => f.write_str("Subscription(<empty>)"),
        }
    }
}

/// Runs a closure on the first call to [`Disposable::dispose`].
pub struct FnDisposable<F> {
    action: Mutex<Option<F>>,
}

impl<F: FnOnce() + Send> FnDisposable<F> {
    pub fn new(action: F) -> Self {
        Self {
            action: Mutex::new(Some(action)),
        }
    }
}

impl<F: FnOnce() + Send> Disposable for FnDisposable<F> {
    fn dispose(&self) {
        // Take the closure out first so it doesn't run while the lock is held.
        let action = self.action.lock().take();
        if let Some(action) = action {
            action();
        }
    }
}

static DISPOSED: u8 = 0;

/// Marker stored in a [`SingleAssignment`] once it has been disposed. Never dereferenced.
#[inline]
fn disposed_marker() -> *mut Subscription {
    &DISPOSED as *const u8 as *mut Subscription
}

/// A slot that can be assigned a resource exactly once.
///
/// The slot is lock-free: assignment and disposal race through a single atomic pointer. If the
/// slot is disposed before a resource is assigned, the resource is disposed as soon as it arrives,
/// so a late assignment can never leave a resource alive after cancellation.
pub struct SingleAssignment {
    /// Null while empty, the disposed marker after disposal, otherwise a pointer obtained from
    /// `Box::into_raw`.
    current: AtomicPtr<Subscription>,
}

impl SingleAssignment {
    pub const fn new() -> Self {
        Self {
            current: AtomicPtr::new(ptr::null_mut()),
        }
    }

    /// Assigns `resource` to the slot.
    ///
    /// If the slot has already been disposed, `resource` is disposed immediately and `Ok` is
    /// returned. Assigning a second resource fails with [`ErrorKind::AlreadyAssigned`] and leaves
    /// the first one in place.
    pub fn set(&self, resource: Subscription) -> Result<(), Error> {
        let new = Box::into_raw(Box::new(resource));
        match self.current.compare_exchange(
            ptr::null_mut(),
            new,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => Ok(()),
            Err(current) => {
                // SAFETY: `new` was created by `Box::into_raw` above and was never published.
                let resource = unsafe { Box::from_raw(new) };
                if current == disposed_marker() {
                    resource.dispose();
                    Ok(())
                } else {
                    Err(ErrorKind::AlreadyAssigned.into())
                }
            }
        }
    }

    #[inline]
    pub fn is_disposed(&self) -> bool {
        self.current.load(Ordering::Acquire) == disposed_marker()
    }

    /// Replaces the slot's content with `replacement` and returns the resource it held, if any.
    fn take(&self, replacement: *mut Subscription) -> Option<Subscription> {
        let old = self.current.swap(replacement, Ordering::AcqRel);
        // SAFETY: the swap made this thread the only owner of `old`.
        unsafe { reclaim(old) }
    }
}

/// Turns a pointer loaded from a [`SingleAssignment`] back into the resource it points to.
///
/// # Safety
///
/// `raw` must be null, the disposed marker, or a pointer created by `Box::into_raw` in
/// [`SingleAssignment::set`] that no other thread can still reach.
unsafe fn reclaim(raw: *mut Subscription) -> Option<Subscription> {
    if raw.is_null() || raw == disposed_marker() {
        None
    } else {
        Some(*Box::from_raw(raw))
    }
}

impl Default for SingleAssignment {
    fn default() -> Self {
        Self::new()
    }
}

impl Disposable for SingleAssignment {
    fn dispose(&self) {
        let mut next = self.take(disposed_marker());
        while let Some(resource) = next {
            next = match resource.inner {
                Some(Handle::Slot(slot)) => slot.take(disposed_marker()),
                Some(Handle::Dyn(disposable)) => {
                    disposable.dispose();
                    None
                }
                None => None,
            };
        }
    }
}

impl Drop for SingleAssignment {
    fn drop(&mut self) {
        let current = mem::replace(self.current.get_mut(), ptr::null_mut());
        // SAFETY: `&mut self` rules out concurrent access, so this thread owns `current`.
        let mut next = unsafe { reclaim(current) };
        // Only slots nobody else holds are unlinked here; shared ones are dropped by their last
        // owner.
        while let Some(resource) = next {
            next = match resource.inner {
                Some(Handle::Slot(slot)) => match Arc::try_unwrap(slot) {
                    Ok(slot) => slot.take(ptr::null_mut()),
                    Err(_) => None,
                },
                _ => None,
            };
        }
    }
}

impl fmt::Debug for SingleAssignment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let current = self.current.load(Ordering::Acquire);
        let state = if current.is_null() {
            "empty"
        } else if current == disposed_marker() {
            "disposed"
        } else {
            "assigned"
        };
        f.debug_struct("SingleAssignment")
            .field("state", &state)
            .finish()
    }
}

/// A group of resources that are disposed together.
pub struct CompositeDisposable {
    /// `None` once disposed.
    items: Mutex<Option<Vec<Subscription>>>,
}

impl CompositeDisposable {
    pub fn new() -> Self {
        Self {
            items: Mutex::new(Some(Vec::new())),
        }
    }

    /// Adds a resource to the group.
    ///
    /// If the group has already been disposed, `item` is disposed right away.
    pub fn add(&self, item: Subscription) {
        let mut items = self.items.lock();
        if let Some(items) = &mut *items {
            items.push(item);
            return;
        }
        drop(items);
        item.dispose();
    }

    /// Removes a resource from the group *without* disposing it.
    ///
    /// Returns whether the resource was part of the group.
    pub fn remove(&self, item: &Subscription) -> bool {
        let mut items = self.items.lock();
        let Some(items) = &mut *items else {
            return false;
        };
        match items.iter().position(|i| i.ptr_eq(item)) {
            Some(index) => {
                items.swap_remove(index);
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.items.lock().as_ref().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_disposed(&self) -> bool {
        self.items.lock().is_none()
    }
}

impl Default for CompositeDisposable {
    fn default() -> Self {
        Self::new()
    }
}

impl Disposable for CompositeDisposable {
    /// Disposes every resource in the group.
    ///
    /// Every child is disposed even if an earlier one panics; the first panic is resumed after
    /// the last child has been visited.
    fn dispose(&self) {
        let Some(items) = self.items.lock().take() else {
            return;
        };

        let mut payload = None;
        for item in items {
            if let Err(pl) = panic::catch_unwind(AssertUnwindSafe(|| item.dispose())) {
                payload.get_or_insert(pl);
            }
        }
        if let Some(payload) = payload {
            panic::resume_unwind(payload);
        }
    }
}

impl fmt::Debug for CompositeDisposable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompositeDisposable")
            .field("len", &self.len())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::{
        panic::catch_unwind,
        sync::atomic::{AtomicUsize, Ordering},
        thread,
    };

    use crate::test::{silent_panic, DisposeCounter};

    use super::*;

    #[test]
    fn fn_disposable_runs_once() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let sub = Subscription::from_fn(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        sub.dispose();
        sub.clone().dispose();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn empty_subscription() {
        let sub = Subscription::empty();
        sub.dispose();
        assert!(sub.ptr_eq(&Subscription::default()));
        assert!(!sub.ptr_eq(&Subscription::new(DisposeCounter::new())));
    }

    #[test]
    fn single_assignment_disposes_assigned_resource_once() {
        let counter = DisposeCounter::new();
        let slot = SingleAssignment::new();
        slot.set(counter.subscription()).unwrap();
        assert!(!slot.is_disposed());
        slot.dispose();
        slot.dispose();
        assert!(slot.is_disposed());
        assert_eq!(counter.count(), 1);
    }

    #[test]
    fn single_assignment_disposes_late_resource() {
        let counter = DisposeCounter::new();
        let slot = SingleAssignment::new();
        slot.dispose();
        slot.set(counter.subscription()).unwrap();
        assert_eq!(counter.count(), 1);
        slot.dispose();
        assert_eq!(counter.count(), 1);
    }

    #[test]
    fn single_assignment_rejects_second_resource() {
        let first = DisposeCounter::new();
        let second = DisposeCounter::new();
        let slot = SingleAssignment::new();
        slot.set(first.subscription()).unwrap();
        let err = slot.set(second.subscription()).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::AlreadyAssigned));

        slot.dispose();
        assert_eq!(first.count(), 1);
        assert_eq!(second.count(), 0);
    }

    #[test]
    fn single_assignment_dropped_without_disposing() {
        let counter = DisposeCounter::new();
        let slot = SingleAssignment::new();
        slot.set(counter.subscription()).unwrap();
        drop(slot);
        assert_eq!(counter.count(), 0);
    }

    #[test]
    fn concurrent_dispose_releases_once() {
        for _ in 0..50 {
            let counter = DisposeCounter::new();
            let slot = SingleAssignment::new();
            slot.set(counter.subscription()).unwrap();
            thread::scope(|s| {
                for _ in 0..8 {
                    s.spawn(|| {
                        for _ in 0..10 {
                            slot.dispose();
                        }
                    });
                }
            });
            assert_eq!(counter.count(), 1);
        }
    }

    #[test]
    fn concurrent_dispose_and_assign() {
        for _ in 0..50 {
            let counter = DisposeCounter::new();
            let slot = SingleAssignment::new();
            thread::scope(|s| {
                s.spawn(|| slot.set(counter.subscription()).unwrap());
                s.spawn(|| slot.dispose());
            });
            assert!(slot.is_disposed());
            assert_eq!(counter.count(), 1);
        }
    }

    fn nested_slots(depth: usize, innermost: Subscription) -> Subscription {
        let mut outer = innermost;
        for _ in 0..depth {
            let slot = Arc::new(SingleAssignment::new());
            slot.set(outer).unwrap();
            outer = Subscription::from(slot);
        }
        outer
    }

    #[test]
    fn deeply_nested_slots_are_released_iteratively() {
        let counter = DisposeCounter::new();
        let outer = nested_slots(100_000, counter.subscription());
        outer.dispose();
        assert_eq!(counter.count(), 1);
        drop(outer);

        let counter = DisposeCounter::new();
        drop(nested_slots(100_000, counter.subscription()));
        assert_eq!(counter.count(), 0);
    }

    #[test]
    fn shared_nested_slot_outlives_its_parent() {
        let counter = DisposeCounter::new();
        let inner = Arc::new(SingleAssignment::new());
        inner.set(counter.subscription()).unwrap();
        let outer = SingleAssignment::new();
        outer.set(Subscription::from(inner.clone())).unwrap();

        drop(outer);
        assert!(!inner.is_disposed());
        inner.dispose();
        assert_eq!(counter.count(), 1);
    }

    #[test]
    fn composite_disposes_all_children() {
        let a = DisposeCounter::new();
        let b = DisposeCounter::new();
        let group = CompositeDisposable::new();
        group.add(a.subscription());
        group.add(b.subscription());
        assert_eq!(group.len(), 2);

        group.dispose();
        group.dispose();
        assert!(group.is_disposed());
        assert_eq!((a.count(), b.count()), (1, 1));

        let late = DisposeCounter::new();
        group.add(late.subscription());
        assert_eq!(late.count(), 1);
        assert!(group.is_empty());
    }

    #[test]
    fn composite_remove_does_not_dispose() {
        let counter = DisposeCounter::new();
        let sub = counter.subscription();
        let group = CompositeDisposable::new();
        group.add(sub.clone());
        assert!(group.remove(&sub));
        assert!(!group.remove(&sub));
        group.dispose();
        assert_eq!(counter.count(), 0);
    }

    #[test]
    fn composite_survives_panicking_child() {
        let before = DisposeCounter::new();
        let after = DisposeCounter::new();
        let group = CompositeDisposable::new();
        group.add(before.subscription());
        group.add(Subscription::from_fn(|| silent_panic("dispose failed".into())));
        group.add(after.subscription());

        catch_unwind(AssertUnwindSafe(|| group.dispose())).unwrap_err();
        assert_eq!((before.count(), after.count()), (1, 1));
    }
}
