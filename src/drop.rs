//! Drop guards for scoped cleanup.
//!
//! Several core paths have to release something on *every* exit, including when a user-supplied
//! handler panics halfway through a delivery. Those paths hold a [`Defer`] instead of writing the
//! cleanup twice.

/// Drop guard returned by [`defer`].
#[must_use = "`Defer` should be assigned to a variable, or it will be dropped immediately"]
pub struct Defer<F: FnOnce()>(Option<F>);

impl<F: FnOnce()> Defer<F> {
    /// Consumes the guard without running its callback.
    ///
    /// Used for cleanup that must only happen on the unwinding path.
    pub fn disarm(mut self) {
        self.0 = None;
    }
}

impl<F: FnOnce()> Drop for Defer<F> {
    fn drop(&mut self) {
        if let Some(cb) = self.0.take() {
            cb();
        }
    }
}

/// Returns a value that runs `cb` when dropped.
pub fn defer<F: FnOnce()>(cb: F) -> Defer<F> {
    Defer(Some(cb))
}

#[cfg(test)]
mod tests {
    use std::{
        cell::Cell,
        panic::{catch_unwind, AssertUnwindSafe},
    };

    use super::*;

    #[test]
    fn runs_on_scope_exit() {
        let ran = Cell::new(false);
        {
            let _guard = defer(|| ran.set(true));
            assert!(!ran.get());
        }
        assert!(ran.get());
    }

    #[test]
    fn runs_while_unwinding() {
        let ran = Cell::new(false);
        catch_unwind(AssertUnwindSafe(|| {
            let _guard = defer(|| ran.set(true));
            crate::test::silent_panic("handler failed".into());
        }))
        .unwrap_err();
        assert!(ran.get());
    }

    #[test]
    fn disarmed_guard_does_nothing() {
        let ran = Cell::new(false);
        defer(|| ran.set(true)).disarm();
        assert!(!ran.get());
    }
}
