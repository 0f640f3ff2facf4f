//! The notification engine a [`Reactor`](crate::Reactor) drives.
//!
//! A backend only knows about tokens: descriptors and signals are registered
//! under a [`Token`] chosen by the reactor and every delivered [`Event`]
//! carries that token back. Timers never reach the backend; the reactor turns
//! its earliest deadline into the `timeout` passed to [`Backend::poll`].

mod disposition;
mod lab;
mod mio_poll;

pub use self::{
    lab::{LabBackend, LabHandle},
    mio_poll::MioBackend,
};

use signal_hook::consts::{SIGFPE, SIGILL, SIGKILL, SIGSEGV, SIGSTOP};
use std::{
    io,
    os::raw::c_int,
    os::unix::io::RawFd,
    slice,
    time::{Duration, Instant},
};

pub type Signum = c_int;

/// Signals whose disposition can't or mustn't be replaced.
const FORBIDDEN: [Signum; 5] = [SIGKILL, SIGSTOP, SIGILL, SIGFPE, SIGSEGV];

pub(crate) fn is_watchable_signal(signum: Signum) -> bool {
    (1..=64).contains(&signum) && !FORBIDDEN.contains(&signum)
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct Token(pub usize);

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Interest {
    readable: bool,
    writable: bool,
}

impl Interest {
    pub const READABLE: Self = Self {
        readable: true,
        writable: false,
    };

    pub const WRITABLE: Self = Self {
        readable: false,
        writable: true,
    };

    pub const fn is_readable(self) -> bool {
        self.readable
    }

    pub const fn is_writable(self) -> bool {
        self.writable
    }

    pub const fn add(self, other: Self) -> Self {
        Self {
            readable: self.readable || other.readable,
            writable: self.writable || other.writable,
        }
    }

    /// Returns `None` when nothing would be left.
    pub fn remove(self, other: Self) -> Option<Self> {
        let left = Self {
            readable: self.readable && !other.readable,
            writable: self.writable && !other.writable,
        };

        match left.readable || left.writable {
            true => Some(left),
            false => None,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Event {
    pub token: Token,
    pub readable: bool,
    pub writable: bool,
    pub signaled: bool,
}

impl Event {
    pub const fn readable(token: Token) -> Self {
        Self {
            token,
            readable: true,
            writable: false,
            signaled: false,
        }
    }

    pub const fn writable(token: Token) -> Self {
        Self {
            token,
            readable: false,
            writable: true,
            signaled: false,
        }
    }

    pub const fn signaled(token: Token) -> Self {
        Self {
            token,
            readable: false,
            writable: false,
            signaled: true,
        }
    }
}

#[derive(Debug, Default)]
pub struct Events {
    inner: Vec<Event>,
}

impl Events {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Vec::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, event: Event) {
        self.inner.push(event);
    }

    pub fn clear(&mut self) {
        self.inner.clear();
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn iter(&self) -> slice::Iter<'_, Event> {
        self.inner.iter()
    }
}

impl<'a> IntoIterator for &'a Events {
    type Item = &'a Event;
    type IntoIter = slice::Iter<'a, Event>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// A pluggable readiness and signal multiplexer.
///
/// Implementations must honor two rules the reactor relies on:
///
/// - After `deregister_io` or `deregister_signal` returns, no event for that
///   registration is reported by a later `poll`, even one that was already
///   queued inside the engine.
/// - `poll` reports at most one event per token per call, with readiness
///   flags merged.
pub trait Backend {
    fn register_io(&mut self, fd: RawFd, token: Token, interest: Interest) -> io::Result<()>;

    fn reregister_io(&mut self, fd: RawFd, token: Token, interest: Interest) -> io::Result<()>;

    fn deregister_io(&mut self, fd: RawFd) -> io::Result<()>;

    /// Starts delivering `signum` under `token`. An existing registration for
    /// the same number is replaced only once the new one is in place; on
    /// error it stays untouched.
    fn register_signal(&mut self, signum: Signum, token: Token) -> io::Result<()>;

    fn deregister_signal(&mut self, signum: Signum) -> io::Result<()>;

    /// Blocks until at least one event is ready or `timeout` elapses.
    /// `None` waits forever. The buffer is cleared first.
    fn poll(&mut self, events: &mut Events, timeout: Option<Duration>) -> io::Result<()>;

    /// The clock timer deadlines are measured against.
    fn now(&self) -> Instant {
        Instant::now()
    }
}
