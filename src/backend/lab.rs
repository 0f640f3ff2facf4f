//! Deterministic in-memory backend.
//!
//! Nothing here touches the OS: readiness and signals are injected through a
//! [`LabHandle`] and the clock only moves when `poll` would have slept or when
//! a test advances it.

use super::{is_watchable_signal, Backend, Event, Events, Interest, Signum, Token};
use std::{
    cell::RefCell,
    collections::{HashMap, VecDeque},
    io,
    os::unix::io::RawFd,
    rc::Rc,
    time::{Duration, Instant},
};

#[derive(Debug)]
struct LabState {
    origin: Instant,
    elapsed: Duration,
    pending: VecDeque<Event>,
    descriptors: HashMap<RawFd, (Token, Interest)>,
    signals: HashMap<Signum, Token>,
    polls: usize,
    fail_next_poll: Option<io::ErrorKind>,
    fail_next_register: Option<io::ErrorKind>,
}

impl LabState {
    fn enqueue(&mut self, event: Event) {
        let queued = self.pending.iter_mut().find(|e| e.token == event.token);
        match queued {
            Some(queued) => {
                queued.readable |= event.readable;
                queued.writable |= event.writable;
                queued.signaled |= event.signaled;
            }
            None => self.pending.push_back(event),
        }
    }

    fn forget(&mut self, token: Token) {
        self.pending.retain(|event| event.token != token);
    }
}

/// Test-side view of a [`LabBackend`], usable after the backend moved into a
/// reactor and from inside callbacks.
#[derive(Clone, Debug)]
pub struct LabHandle {
    state: Rc<RefCell<LabState>>,
}

impl LabHandle {
    /// Queues readiness for `fd`, filtered by what it is registered for.
    /// Unregistered descriptors are ignored.
    pub fn ready(&self, fd: RawFd, readable: bool, writable: bool) {
        let mut state = self.state.borrow_mut();
        let (token, interest) = match state.descriptors.get(&fd) {
            Some(registered) => *registered,
            None => return,
        };

        let event = Event {
            token,
            readable: readable && interest.is_readable(),
            writable: writable && interest.is_writable(),
            signaled: false,
        };

        if event.readable || event.writable {
            state.enqueue(event);
        }
    }

    pub fn readable(&self, fd: RawFd) {
        self.ready(fd, true, false);
    }

    pub fn writable(&self, fd: RawFd) {
        self.ready(fd, false, true);
    }

    pub fn raise(&self, signum: Signum) {
        let mut state = self.state.borrow_mut();
        if let Some(token) = state.signals.get(&signum).copied() {
            state.enqueue(Event::signaled(token));
        }
    }

    pub fn advance(&self, duration: Duration) {
        self.state.borrow_mut().elapsed += duration;
    }

    pub fn now(&self) -> Instant {
        let state = self.state.borrow();
        state.origin + state.elapsed
    }

    pub fn elapsed(&self) -> Duration {
        self.state.borrow().elapsed
    }

    pub fn interest(&self, fd: RawFd) -> Option<Interest> {
        self.state
            .borrow()
            .descriptors
            .get(&fd)
            .map(|(_, interest)| *interest)
    }

    pub fn is_signal_registered(&self, signum: Signum) -> bool {
        self.state.borrow().signals.contains_key(&signum)
    }

    pub fn descriptor_count(&self) -> usize {
        self.state.borrow().descriptors.len()
    }

    pub fn signal_count(&self) -> usize {
        self.state.borrow().signals.len()
    }

    pub fn pending(&self) -> usize {
        self.state.borrow().pending.len()
    }

    pub fn polls(&self) -> usize {
        self.state.borrow().polls
    }

    pub fn fail_next_poll(&self, kind: io::ErrorKind) {
        self.state.borrow_mut().fail_next_poll = Some(kind);
    }

    /// Makes the next descriptor or signal registration fail with `kind`.
    pub fn fail_next_register(&self, kind: io::ErrorKind) {
        self.state.borrow_mut().fail_next_register = Some(kind);
    }
}

#[derive(Debug)]
pub struct LabBackend {
    handle: LabHandle,
}

impl Default for LabBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl LabBackend {
    pub fn new() -> Self {
        let state = LabState {
            origin: Instant::now(),
            elapsed: Duration::ZERO,
            pending: VecDeque::new(),
            descriptors: HashMap::new(),
            signals: HashMap::new(),
            polls: 0,
            fail_next_poll: None,
            fail_next_register: None,
        };

        Self {
            handle: LabHandle {
                state: Rc::new(RefCell::new(state)),
            },
        }
    }

    pub fn handle(&self) -> LabHandle {
        self.handle.clone()
    }
}

impl Backend for LabBackend {
    fn register_io(&mut self, fd: RawFd, token: Token, interest: Interest) -> io::Result<()> {
        let mut state = self.handle.state.borrow_mut();
        if let Some(kind) = state.fail_next_register.take() {
            return Err(kind.into());
        }

        if state.descriptors.contains_key(&fd) {
            return Err(io::ErrorKind::AlreadyExists.into());
        }

        state.descriptors.insert(fd, (token, interest));
        Ok(())
    }

    fn reregister_io(&mut self, fd: RawFd, token: Token, interest: Interest) -> io::Result<()> {
        let mut state = self.handle.state.borrow_mut();
        let previous = match state.descriptors.get_mut(&fd) {
            Some(registered) => std::mem::replace(registered, (token, interest)),
            None => return Err(io::ErrorKind::NotFound.into()),
        };

        // Drop queued readiness the new interest no longer covers.
        let (old_token, _) = previous;
        for event in state.pending.iter_mut().filter(|e| e.token == old_token) {
            event.token = token;
            event.readable &= interest.is_readable();
            event.writable &= interest.is_writable();
        }
        state.pending.retain(|e| e.readable || e.writable || e.signaled);
        Ok(())
    }

    fn deregister_io(&mut self, fd: RawFd) -> io::Result<()> {
        let mut state = self.handle.state.borrow_mut();
        match state.descriptors.remove(&fd) {
            Some((token, _)) => {
                state.forget(token);
                Ok(())
            }
            None => Err(io::ErrorKind::NotFound.into()),
        }
    }

    fn register_signal(&mut self, signum: Signum, token: Token) -> io::Result<()> {
        if !is_watchable_signal(signum) {
            return Err(io::ErrorKind::InvalidInput.into());
        }

        let mut state = self.handle.state.borrow_mut();
        if let Some(kind) = state.fail_next_register.take() {
            return Err(kind.into());
        }

        if let Some(replaced) = state.signals.insert(signum, token) {
            state.forget(replaced);
        }
        Ok(())
    }

    fn deregister_signal(&mut self, signum: Signum) -> io::Result<()> {
        let mut state = self.handle.state.borrow_mut();
        if let Some(token) = state.signals.remove(&signum) {
            state.forget(token);
        }
        Ok(())
    }

    fn poll(&mut self, events: &mut Events, timeout: Option<Duration>) -> io::Result<()> {
        let mut state = self.handle.state.borrow_mut();
        events.clear();
        state.polls += 1;

        if let Some(kind) = state.fail_next_poll.take() {
            return Err(kind.into());
        }

        if state.pending.is_empty() {
            return match timeout {
                Some(timeout) => {
                    state.elapsed += timeout;
                    Ok(())
                }
                None => Err(io::Error::new(
                    io::ErrorKind::WouldBlock,
                    "lab backend would block forever",
                )),
            };
        }

        state.pending.drain(..).for_each(|event| events.push(event));
        Ok(())
    }

    fn now(&self) -> Instant {
        self.handle.now()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn poll_advances_clock_when_idle() {
        let mut backend = LabBackend::new();
        let handle = backend.handle();
        let mut events = Events::default();

        backend
            .poll(&mut events, Some(Duration::from_millis(30)))
            .unwrap();
        assert!(events.is_empty());
        assert_eq!(handle.elapsed(), Duration::from_millis(30));
    }

    #[test]
    fn poll_without_timeout_or_events_fails() {
        let mut backend = LabBackend::new();
        let mut events = Events::default();

        let error = backend.poll(&mut events, None).unwrap_err();
        assert_eq!(error.kind(), io::ErrorKind::WouldBlock);
    }

    #[test]
    fn readiness_is_filtered_and_merged() {
        let mut backend = LabBackend::new();
        let handle = backend.handle();
        backend.register_io(3, Token(1), Interest::READABLE).unwrap();

        handle.writable(3);
        assert_eq!(handle.pending(), 0);

        handle.readable(3);
        handle.readable(3);
        handle.readable(4);

        let mut events = Events::default();
        backend.poll(&mut events, None).unwrap();
        assert_eq!(events.iter().copied().collect::<Vec<_>>(), vec![Event::readable(Token(1))]);
    }

    #[test]
    fn deregister_drops_queued_events() {
        let mut backend = LabBackend::new();
        let handle = backend.handle();
        backend.register_io(3, Token(1), Interest::READABLE).unwrap();
        backend.register_signal(10, Token(2)).unwrap();

        handle.readable(3);
        handle.raise(10);
        backend.deregister_io(3).unwrap();
        backend.deregister_signal(10).unwrap();

        assert_eq!(handle.pending(), 0);
        assert!(backend.deregister_io(3).is_err());
    }

    #[test]
    fn reregister_narrows_queued_events() {
        let mut backend = LabBackend::new();
        let handle = backend.handle();
        let both = Interest::READABLE.add(Interest::WRITABLE);
        backend.register_io(3, Token(1), both).unwrap();

        handle.ready(3, true, true);
        backend.reregister_io(3, Token(1), Interest::WRITABLE).unwrap();

        let mut events = Events::default();
        backend.poll(&mut events, None).unwrap();
        assert_eq!(events.iter().copied().collect::<Vec<_>>(), vec![Event::writable(Token(1))]);
    }

    #[test]
    fn forbidden_signals_are_refused() {
        let mut backend = LabBackend::new();
        assert!(backend.register_signal(9, Token(1)).is_err());
        assert!(backend.register_signal(0, Token(1)).is_err());
        assert!(backend.register_signal(10, Token(1)).is_ok());
    }

    #[test]
    fn signal_registration_swaps_token() {
        let mut backend = LabBackend::new();
        let handle = backend.handle();
        backend.register_signal(10, Token(1)).unwrap();
        handle.raise(10);

        backend.register_signal(10, Token(2)).unwrap();
        assert_eq!(handle.pending(), 0);
        assert_eq!(handle.signal_count(), 1);

        handle.fail_next_register(io::ErrorKind::Other);
        assert!(backend.register_signal(10, Token(3)).is_err());

        handle.raise(10);
        let mut events = Events::default();
        backend.poll(&mut events, None).unwrap();
        assert_eq!(events.iter().copied().collect::<Vec<_>>(), vec![Event::signaled(Token(2))]);
    }
}
