//! The error type carried through the notification channel and returned by fallible core
//! operations.

use std::{
    any::Any,
    error::Error as StdError,
    fmt,
    hash::{Hash, Hasher},
    ptr,
    sync::Arc,
};

use thiserror::Error;

use crate::NotificationKind;

/// The different kinds of [`Error`].
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum ErrorKind {
    /// A call-site argument was rejected before any work was done.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// An observer was driven in violation of the notification grammar.
    ///
    /// Only reported by [`CheckedObserver`](crate::CheckedObserver).
    #[error(transparent)]
    GrammarViolation(#[from] GrammarViolation),

    /// A [`SingleAssignment`](crate::SingleAssignment) slot was assigned twice.
    #[error("disposable slot was already assigned")]
    AlreadyAssigned,

    /// A subscription panicked while it was being established.
    #[error("subscription panicked: {0}")]
    Panicked(String),

    /// An error raised by user code.
    #[error(transparent)]
    Custom(Box<dyn StdError + Send + Sync>),
}

/// An error delivered through [`Observer::on_error`](crate::Observer::on_error) or returned by a
/// fallible operation.
///
/// [`Error`] is a cheap, reference-counted handle. Two [`Error`]s compare equal only if they are
/// clones of the same error *instance*; errors with identical messages created separately are
/// different errors.
#[derive(Clone)]
pub struct Error(Arc<ErrorKind>);

impl Error {
    /// Wraps an arbitrary user error (or a message, via `&str` and `String`).
    pub fn new<E>(error: E) -> Self
    where
        E: Into<Box<dyn StdError + Send + Sync>>,
    {
        ErrorKind::Custom(error.into()).into()
    }

    /// Returns the kind of this error.
    #[inline]
    pub fn kind(&self) -> &ErrorKind {
        &self.0
    }

    /// Returns `true` if both values are clones of the same error instance.
    #[inline]
    pub fn ptr_eq(&self, other: &Error) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn from_panic(payload: &(dyn Any + Send)) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            String::from("Box<dyn Any>")
        };
        ErrorKind::Panicked(message).into()
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Self(Arc::new(kind))
    }
}

impl From<GrammarViolation> for Error {
    fn from(violation: GrammarViolation) -> Self {
        ErrorKind::from(violation).into()
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.0, f)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&*self.0, f)
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        (*self.0).source()
    }
}

impl PartialEq for Error {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for Error {}

impl Hash for Error {
    fn hash<H: Hasher>(&self, state: &mut H) {
        ptr::hash(Arc::as_ptr(&self.0), state);
    }
}

/// A breach of the observer grammar: zero or more `on_next` calls, then at most one terminal
/// call, never overlapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum GrammarViolation {
    /// A call arrived while another call into the same observer was still running.
    #[error("{0} called while another call is in progress")]
    Reentrant(NotificationKind),
    /// A call arrived after `on_completed`.
    #[error("{0} called after on_completed")]
    AfterCompleted(NotificationKind),
    /// A call arrived after `on_error`.
    #[error("{0} called after on_error")]
    AfterError(NotificationKind),
}

/// Returned by [`AutoDetachObserver::fail`] when the observer had already stopped.
///
/// The undeliverable error is handed back so the caller can surface it.
///
/// [`AutoDetachObserver::fail`]: crate::AutoDetachObserver::fail
#[derive(Debug, Error)]
#[error("observer already terminated; undeliverable error: {error}")]
pub struct AlreadyTerminated {
    pub error: Error,
}
