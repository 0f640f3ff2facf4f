use crate::{
    backend::{Backend, Interest, Signum},
    error::{BoxError, RegisterError},
    reactor::Reactor,
    timer::TimerId,
};
use std::{
    fmt,
    ops::{Deref, DerefMut},
    os::unix::io::RawFd,
    time::Duration,
};

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Kind {
    Read,
    Write,
    Signal,
    Timer,
    TimerOnce,
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Signal => "signal",
            Self::Timer => "timer",
            Self::TimerOnce => "timer-once",
        })
    }
}

/// What to watch, passed to [`Reactor::add`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Watch {
    Read(RawFd),
    Write(RawFd),
    Signal(Signum),
    /// Fires every interval until removed.
    Timer(Duration),
    /// Fires once after the delay, then removes itself.
    TimerOnce(Duration),
}

impl Watch {
    pub fn timer_secs(secs: f64) -> Result<Self, RegisterError> {
        secs_to_duration(secs).map(Self::Timer)
    }

    pub fn timer_once_secs(secs: f64) -> Result<Self, RegisterError> {
        secs_to_duration(secs).map(Self::TimerOnce)
    }

    pub const fn kind(&self) -> Kind {
        match self {
            Self::Read(_) => Kind::Read,
            Self::Write(_) => Kind::Write,
            Self::Signal(_) => Kind::Signal,
            Self::Timer(_) => Kind::Timer,
            Self::TimerOnce(_) => Kind::TimerOnce,
        }
    }
}

fn secs_to_duration(secs: f64) -> Result<Duration, RegisterError> {
    Duration::try_from_secs_f64(secs).map_err(|_| RegisterError::InvalidInterval(secs))
}

/// What to stop, passed to [`Reactor::del`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Target {
    Read(RawFd),
    Write(RawFd),
    Signal(Signum),
    /// Either kind of timer.
    Timer(TimerId),
}

/// The watcher whose callback is running.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Fired {
    Read(RawFd),
    Write(RawFd),
    Signal(Signum),
    Timer(TimerId),
}

impl fmt::Display for Fired {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read(fd) => write!(f, "read(fd={})", fd),
            Self::Write(fd) => write!(f, "write(fd={})", fd),
            Self::Signal(signum) => write!(f, "signal({})", signum),
            Self::Timer(id) => write!(f, "timer({})", id),
        }
    }
}

/// Result of a successful [`Reactor::add`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Added {
    Watching,
    Timer(TimerId),
}

impl Added {
    pub const fn timer_id(self) -> Option<TimerId> {
        match self {
            Self::Watching => None,
            Self::Timer(id) => Some(id),
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum IoKind {
    Read,
    Write,
}

impl IoKind {
    pub const fn interest(self) -> Interest {
        match self {
            Self::Read => Interest::READABLE,
            Self::Write => Interest::WRITABLE,
        }
    }

    pub const fn fired(self, fd: RawFd) -> Fired {
        match self {
            Self::Read => Fired::Read(fd),
            Self::Write => Fired::Write(fd),
        }
    }
}

impl From<IoKind> for Kind {
    fn from(kind: IoKind) -> Self {
        match kind {
            IoKind::Read => Self::Read,
            IoKind::Write => Self::Write,
        }
    }
}

pub type CallbackResult = Result<(), BoxError>;

pub type Callback<B> = Box<dyn FnMut(&mut Context<'_, B>) -> CallbackResult>;

/// Handed to every callback. Derefs to the reactor so callbacks can add and
/// remove watchers, including their own.
pub struct Context<'a, B: Backend> {
    pub(crate) reactor: &'a mut Reactor<B>,
    pub(crate) fired: Fired,
}

impl<B: Backend> Context<'_, B> {
    pub fn fired(&self) -> Fired {
        self.fired
    }
}

impl<B: Backend> Deref for Context<'_, B> {
    type Target = Reactor<B>;

    fn deref(&self) -> &Reactor<B> {
        self.reactor
    }
}

impl<B: Backend> DerefMut for Context<'_, B> {
    fn deref_mut(&mut self) -> &mut Reactor<B> {
        self.reactor
    }
}

/// A registered callback plus the serial that tells it apart from a later
/// watcher stored in the same slot.
pub(crate) struct Watcher<C> {
    pub serial: usize,
    pub callback: Option<C>,
}

impl<C> Watcher<C> {
    pub fn new(serial: usize, callback: C) -> Self {
        Self {
            serial,
            callback: Some(callback),
        }
    }

    /// Takes the callback out for the duration of a dispatch.
    pub fn lend(&mut self) -> Option<(usize, C)> {
        let serial = self.serial;
        self.callback.take().map(|callback| (serial, callback))
    }

    pub fn give_back(&mut self, serial: usize, callback: C) {
        if self.serial == serial && self.callback.is_none() {
            self.callback = Some(callback);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_intervals() {
        assert_eq!(
            Watch::timer_secs(0.5).unwrap(),
            Watch::Timer(Duration::from_millis(500))
        );
        assert_eq!(
            Watch::timer_once_secs(0.0).unwrap(),
            Watch::TimerOnce(Duration::ZERO)
        );

        assert!(matches!(
            Watch::timer_secs(-1.0),
            Err(RegisterError::InvalidInterval(_))
        ));
        assert!(Watch::timer_once_secs(f64::NAN).is_err());
        assert!(Watch::timer_secs(f64::INFINITY).is_err());
    }

    #[test]
    fn fired_display() {
        assert_eq!(Fired::Read(4).to_string(), "read(fd=4)");
        assert_eq!(Fired::Signal(10).to_string(), "signal(10)");
    }
}
