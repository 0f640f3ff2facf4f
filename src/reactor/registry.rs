use crate::{
    backend::{Interest, Token},
    watcher::{IoKind, Watcher},
};

/// Read and write watchers sharing one backend registration.
pub(crate) struct IoEntry<C> {
    pub token: Token,
    pub read: Option<Watcher<C>>,
    pub write: Option<Watcher<C>>,
}

impl<C> IoEntry<C> {
    pub fn new(token: Token) -> Self {
        Self {
            token,
            read: None,
            write: None,
        }
    }

    pub fn slot(&mut self, kind: IoKind) -> &mut Option<Watcher<C>> {
        match kind {
            IoKind::Read => &mut self.read,
            IoKind::Write => &mut self.write,
        }
    }

    pub fn is_watching(&self, kind: IoKind) -> bool {
        match kind {
            IoKind::Read => self.read.is_some(),
            IoKind::Write => self.write.is_some(),
        }
    }

    /// `None` for an entry with no watcher left, which must be pruned.
    pub fn interest(&self) -> Option<Interest> {
        match (self.read.is_some(), self.write.is_some()) {
            (true, true) => Some(Interest::READABLE.add(Interest::WRITABLE)),
            (true, false) => Some(Interest::READABLE),
            (false, true) => Some(Interest::WRITABLE),
            (false, false) => None,
        }
    }
}

pub(crate) struct SignalEntry<C> {
    pub token: Token,
    pub watcher: Watcher<C>,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum Source {
    Io(std::os::unix::io::RawFd),
    Signal(crate::backend::Signum),
}
