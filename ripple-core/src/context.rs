//! Thread Confinement
//!
//! A property is either concurrent (any thread may touch it) or confined to
//! the thread that created it. Confined properties remember an owner token
//! and compare it against the calling thread on every access.
//!
//! # Implementation
//!
//! The owner token wraps the creating thread's handle, so a failed check can
//! name both the caller and the owner. [`Confined`] is the cell type that
//! holds single-thread state (plain `Cell`/`RefCell`, no atomics) inside an
//! otherwise `Send + Sync` property.

use std::thread::{self, Thread};

use crate::error::{PropertyError, Result};

/// Identity of the thread that owns a confined property.
#[derive(Debug, Clone)]
pub struct OwnerToken {
    thread: Thread,
}

impl OwnerToken {
    /// Token for the calling thread.
    pub fn current() -> Self {
        Self {
            thread: thread::current(),
        }
    }

    /// Whether the calling thread is the owner.
    pub fn is_current(&self) -> bool {
        thread::current().id() == self.thread.id()
    }

    /// Fail with [`PropertyError::WrongThread`] unless called from the owner.
    pub fn check(&self) -> Result<()> {
        if self.is_current() {
            Ok(())
        } else {
            Err(PropertyError::WrongThread {
                caller: describe(&thread::current()),
                owner: describe(&self.thread),
            })
        }
    }

    /// Like [`check`](Self::check), but panics with the error message.
    ///
    /// Used by trait methods that have no error channel.
    #[track_caller]
    pub fn enforce(&self) {
        if let Err(err) = self.check() {
            panic!("{err}");
        }
    }

    /// Handle of the owner thread.
    pub fn thread(&self) -> &Thread {
        &self.thread
    }
}

/// Human-readable thread description: name (if any) plus id.
pub(crate) fn describe(thread: &Thread) -> String {
    match thread.name() {
        Some(name) => format!("{name} ({:?})", thread.id()),
        None => format!("{:?}", thread.id()),
    }
}

/// Scheduling model of a property, chosen at construction.
#[derive(Debug, Clone)]
pub enum Confinement {
    /// No owning thread; all operations use the lock-free protocol.
    Concurrent,
    /// Bound to one thread; every access is checked against the token.
    Confined(OwnerToken),
}

impl Confinement {
    /// Concurrent if `concurrent`, otherwise confined to the calling thread.
    pub fn new(concurrent: bool) -> Self {
        if concurrent {
            Self::Concurrent
        } else {
            Self::Confined(OwnerToken::current())
        }
    }

    /// Mode of a derived property: concurrent only if every upstream is.
    pub fn of_upstreams<I>(upstreams_concurrent: I) -> Self
    where
        I: IntoIterator<Item = bool>,
    {
        Self::new(upstreams_concurrent.into_iter().all(|concurrent| concurrent))
    }

    pub fn is_concurrent(&self) -> bool {
        matches!(self, Self::Concurrent)
    }

    /// Owner token of a confined property; `None` when concurrent.
    pub fn owner(&self) -> Option<&OwnerToken> {
        match self {
            Self::Concurrent => None,
            Self::Confined(owner) => Some(owner),
        }
    }

    /// Always `Ok` when concurrent, otherwise [`OwnerToken::check`].
    pub fn check(&self) -> Result<()> {
        match self {
            Self::Concurrent => Ok(()),
            Self::Confined(owner) => owner.check(),
        }
    }

    /// Panicking form of [`check`](Self::check).
    #[track_caller]
    pub fn enforce(&self) {
        if let Self::Confined(owner) = self {
            owner.enforce();
        }
    }
}

/// Single-thread state embedded in a `Send + Sync` property.
///
/// The inner value is only reachable through [`get`](Self::get), which
/// checks the owner token first.
pub struct Confined<T> {
    owner: OwnerToken,
    value: T,
}

// SAFETY: `value` is only ever borrowed on the owner thread (every accessor
// goes through the owner check), so `T` never needs to be `Sync`. `T: Send`
// covers dropping the cell on whatever thread releases the last reference.
unsafe impl<T: Send> Sync for Confined<T> {}

impl<T> Confined<T> {
    /// Wrap `value` for the thread behind `owner`.
    pub fn new(owner: OwnerToken, value: T) -> Self {
        Self { owner, value }
    }

    /// Token of the thread allowed to touch the value.
    pub fn owner(&self) -> &OwnerToken {
        &self.owner
    }

    /// Borrow the value, or [`PropertyError::WrongThread`] off the owner thread.
    pub fn try_get(&self) -> Result<&T> {
        self.owner.check()?;
        Ok(&self.value)
    }

    /// Borrow the value, panicking with [`PropertyError::WrongThread`] off the owner thread.
    #[track_caller]
    pub fn get(&self) -> &T {
        self.owner.enforce();
        &self.value
    }
}

impl<T> std::fmt::Debug for Confined<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Confined")
            .field("owner", &describe(&self.owner.thread))
            .finish_non_exhaustive()
    }
}
