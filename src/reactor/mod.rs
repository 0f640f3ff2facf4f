mod registry;

use self::registry::{IoEntry, SignalEntry, Source};
use crate::{
    backend::{Backend, Event, Events, MioBackend, Signum, Token},
    builder::Builder,
    error::{CallbackFault, Error, RegisterError},
    fault::{self, FaultPolicy},
    timer::{TimerId, TimerIdAllocator, TimerKind, TimerQueue},
    watcher::{
        Added, Callback, CallbackResult, Context, Fired, IoKind, Kind, Target, Watch, Watcher,
    },
};
use std::{collections::HashMap, io, mem, os::unix::io::RawFd, process, time::Duration};

/// Single-threaded event loop multiplexing descriptor readiness, signals and
/// timers into callbacks.
pub struct Reactor<B: Backend = MioBackend> {
    backend: B,
    events: Events,
    io: HashMap<RawFd, IoEntry<Callback<B>>>,
    signals: HashMap<Signum, SignalEntry<Callback<B>>>,
    sources: HashMap<Token, Source>,
    timers: TimerQueue<Callback<B>>,
    timer_ids: TimerIdAllocator,
    fault_policy: FaultPolicy,
    serial: usize,
    stopped: bool,
}

impl Reactor<MioBackend> {
    pub fn new() -> io::Result<Self> {
        Builder::new().build()
    }
}

impl<B: Backend> Reactor<B> {
    pub fn with_backend(backend: B) -> Self {
        Builder::new().build_with(backend)
    }

    pub(crate) fn from_parts(
        backend: B,
        events: Events,
        fault_policy: FaultPolicy,
        timer_ids: TimerIdAllocator,
    ) -> Self {
        Self {
            backend,
            events,
            io: HashMap::new(),
            signals: HashMap::new(),
            sources: HashMap::new(),
            timers: TimerQueue::default(),
            timer_ids,
            fault_policy,
            serial: 0,
            stopped: false,
        }
    }

    fn next_serial(&mut self) -> usize {
        self.serial += 1;
        self.serial
    }

    /// Starts watching and stores `callback` for it.
    ///
    /// Timers return their id, everything else [`Added::Watching`]. A second
    /// registration for the same descriptor direction or signal number
    /// replaces the first. On error nothing was registered and no timer id
    /// was used up.
    pub fn add<F>(&mut self, watch: Watch, callback: F) -> Result<Added, RegisterError>
    where
        F: FnMut(&mut Context<'_, B>) -> CallbackResult + 'static,
    {
        let callback: Callback<B> = Box::new(callback);
        match watch {
            Watch::Read(fd) => self.add_io(fd, IoKind::Read, callback).map(|()| Added::Watching),
            Watch::Write(fd) => self.add_io(fd, IoKind::Write, callback).map(|()| Added::Watching),
            Watch::Signal(signum) => self.add_signal(signum, callback).map(|()| Added::Watching),
            Watch::Timer(interval) => self
                .add_timer(TimerKind::Repeat, interval, callback)
                .map(Added::Timer),
            Watch::TimerOnce(delay) => self
                .add_timer(TimerKind::Once, delay, callback)
                .map(Added::Timer),
        }
    }

    fn add_io(&mut self, fd: RawFd, kind: IoKind, callback: Callback<B>) -> Result<(), RegisterError> {
        if fd < 0 {
            return Err(RegisterError::InvalidDescriptor(fd));
        }

        let serial = self.next_serial();
        let refused = |source| RegisterError::Backend {
            kind: kind.into(),
            source,
        };

        match self.io.get_mut(&fd) {
            Some(entry) => {
                let current = entry.interest();
                let wanted = current.map_or(kind.interest(), |i| i.add(kind.interest()));

                if current != Some(wanted) {
                    self.backend
                        .reregister_io(fd, entry.token, wanted)
                        .map_err(refused)?;
                }

                *entry.slot(kind) = Some(Watcher::new(serial, callback));
            }
            None => {
                let token = Token(serial);
                self.backend
                    .register_io(fd, token, kind.interest())
                    .map_err(refused)?;

                let mut entry = IoEntry::new(token);
                *entry.slot(kind) = Some(Watcher::new(serial, callback));
                self.io.insert(fd, entry);
                self.sources.insert(token, Source::Io(fd));
            }
        }

        tracing::debug!(fd, ?kind, "watching descriptor");
        Ok(())
    }

    fn add_signal(&mut self, signum: Signum, callback: Callback<B>) -> Result<(), RegisterError> {
        if signum <= 0 {
            return Err(RegisterError::InvalidSignal(signum));
        }

        let serial = self.next_serial();
        let token = Token(serial);

        // The backend swaps registrations for the same number itself, so a
        // refused replacement keeps the old watcher running.
        self.backend
            .register_signal(signum, token)
            .map_err(|source| RegisterError::Backend {
                kind: Kind::Signal,
                source,
            })?;

        let watcher = Watcher::new(serial, callback);
        if let Some(old) = self.signals.insert(signum, SignalEntry { token, watcher }) {
            tracing::debug!(signum, "replaced signal watcher");
            self.sources.remove(&old.token);
        }
        self.sources.insert(token, Source::Signal(signum));

        tracing::debug!(signum, "watching signal");
        Ok(())
    }

    fn add_timer(
        &mut self,
        kind: TimerKind,
        interval: Duration,
        callback: Callback<B>,
    ) -> Result<TimerId, RegisterError> {
        if kind == TimerKind::Repeat && interval.is_zero() {
            return Err(RegisterError::ZeroInterval);
        }

        let deadline = self
            .backend
            .now()
            .checked_add(interval)
            .ok_or(RegisterError::IntervalOverflow)?;

        let id = self
            .timer_ids
            .alloc()
            .ok_or(RegisterError::TimerIdsExhausted)?;

        self.timers.insert(id, kind, interval, deadline, callback);
        tracing::debug!(%id, ?kind, ?interval, "timer scheduled");
        Ok(id)
    }

    /// Stops and forgets a watcher. Unknown targets are ignored.
    pub fn del(&mut self, target: Target) {
        match target {
            Target::Read(fd) => self.del_io(fd, IoKind::Read),
            Target::Write(fd) => self.del_io(fd, IoKind::Write),
            Target::Signal(signum) => {
                if self.signals.contains_key(&signum) {
                    self.stop_signal(signum);
                    tracing::debug!(signum, "signal watcher removed");
                }
            }
            Target::Timer(id) => {
                if self.timers.remove(id).is_some() {
                    tracing::debug!(%id, "timer removed");
                }
            }
        }
    }

    fn del_io(&mut self, fd: RawFd, kind: IoKind) {
        let entry = match self.io.get_mut(&fd) {
            Some(entry) if entry.is_watching(kind) => entry,
            _ => return,
        };

        let remaining = entry
            .interest()
            .and_then(|interest| interest.remove(kind.interest()));

        match remaining {
            Some(interest) => {
                // Ignore backend errors: the descriptor may already be closed.
                if let Err(error) = self.backend.reregister_io(fd, entry.token, interest) {
                    tracing::debug!(fd, %error, "reregister failed");
                }
                *entry.slot(kind) = None;
            }
            None => {
                let token = entry.token;
                if let Err(error) = self.backend.deregister_io(fd) {
                    tracing::debug!(fd, %error, "deregister failed");
                }
                self.io.remove(&fd);
                self.sources.remove(&token);
            }
        }

        tracing::debug!(fd, ?kind, "descriptor watcher removed");
    }

    fn stop_signal(&mut self, signum: Signum) {
        if let Err(error) = self.backend.deregister_signal(signum) {
            tracing::warn!(signum, %error, "failed to stop signal watcher");
        }

        if let Some(entry) = self.signals.remove(&signum) {
            self.sources.remove(&entry.token);
        }
    }

    /// Stops every descriptor watcher. Signals and timers are left running.
    pub fn destroy(&mut self) {
        for (fd, entry) in self.io.drain() {
            if let Err(error) = self.backend.deregister_io(fd) {
                tracing::debug!(fd, %error, "deregister failed");
            }
            self.sources.remove(&entry.token);
        }

        tracing::debug!("descriptor watchers destroyed");
    }

    pub fn clear_all_timers(&mut self) {
        self.timers.clear();
        tracing::debug!("timers cleared");
    }

    pub fn timer_count(&self) -> usize {
        self.timers.len()
    }

    /// Descriptors with at least one watcher.
    pub fn io_count(&self) -> usize {
        self.io.len()
    }

    pub fn signal_count(&self) -> usize {
        self.signals.len()
    }

    /// Makes [`run`](Self::run) return after the current iteration.
    pub fn stop(&mut self) {
        self.stopped = true;
    }

    /// Dispatches until [`stop`](Self::stop) is called.
    ///
    /// Under the default [`FaultPolicy`] a faulting callback ends the process
    /// and this never returns `Err(Error::Callback(_))`.
    pub fn run(&mut self) -> Result<(), Error> {
        self.stopped = false;
        tracing::debug!("reactor running");

        while !self.stopped {
            self.turn(None)?;
        }

        tracing::debug!("reactor stopped");
        Ok(())
    }

    /// One poll-and-dispatch iteration, waiting at most `timeout` (or until
    /// the next timer is due). Descriptor and signal callbacks run first in
    /// backend order, then due timers in deadline order.
    ///
    /// A callback fault is handled by the [`FaultPolicy`] exactly as in
    /// [`run`](Self::run).
    pub fn turn(&mut self, timeout: Option<Duration>) -> Result<(), Error> {
        match self.poll_once(timeout) {
            Err(Error::Callback(fault)) => self.escalate(fault),
            result => result,
        }
    }

    fn poll_once(&mut self, timeout: Option<Duration>) -> Result<(), Error> {
        let now = self.backend.now();
        let until_timer = self
            .timers
            .next_deadline()
            .map(|deadline| deadline.saturating_duration_since(now));

        let timeout = match (until_timer, timeout) {
            (Some(timer), Some(timeout)) => Some(timer.min(timeout)),
            (timer, timeout) => timer.or(timeout),
        };

        let mut events = mem::take(&mut self.events);
        let dispatched = self.poll_and_dispatch(&mut events, timeout);
        self.events = events;
        dispatched?;

        self.fire_timers()?;
        Ok(())
    }

    fn poll_and_dispatch(&mut self, events: &mut Events, timeout: Option<Duration>) -> Result<(), Error> {
        match self.backend.poll(events, timeout) {
            Err(e) if e.kind() == io::ErrorKind::Interrupted => return Ok(()),
            result => result.map_err(Error::Backend)?,
        }

        tracing::trace!(events = events.len(), ?timeout, "polled");
        for event in events.iter() {
            self.dispatch(*event)?;
        }

        Ok(())
    }

    fn dispatch(&mut self, event: Event) -> Result<(), CallbackFault> {
        // Anything stopped since the backend queued this event is gone from `sources`.
        match self.sources.get(&event.token).copied() {
            Some(Source::Io(fd)) => {
                if event.readable {
                    self.fire_io(fd, event.token, IoKind::Read)?;
                }
                if event.writable {
                    self.fire_io(fd, event.token, IoKind::Write)?;
                }
                Ok(())
            }
            Some(Source::Signal(signum)) if event.signaled => self.fire_signal(signum, event.token),
            _ => Ok(()),
        }
    }

    fn fire_io(&mut self, fd: RawFd, token: Token, kind: IoKind) -> Result<(), CallbackFault> {
        let lent = self
            .io
            .get_mut(&fd)
            .filter(|entry| entry.token == token)
            .and_then(|entry| entry.slot(kind).as_mut())
            .and_then(Watcher::lend);

        let (serial, callback) = match lent {
            Some(lent) => lent,
            None => return Ok(()),
        };

        let (callback, result) = self.invoke(kind.fired(fd), callback);
        if let Some(watcher) = self
            .io
            .get_mut(&fd)
            .and_then(|entry| entry.slot(kind).as_mut())
        {
            watcher.give_back(serial, callback);
        }

        result
    }

    fn fire_signal(&mut self, signum: Signum, token: Token) -> Result<(), CallbackFault> {
        let lent = self
            .signals
            .get_mut(&signum)
            .filter(|entry| entry.token == token)
            .and_then(|entry| entry.watcher.lend());

        let (serial, callback) = match lent {
            Some(lent) => lent,
            None => return Ok(()),
        };

        let (callback, result) = self.invoke(Fired::Signal(signum), callback);
        if let Some(entry) = self.signals.get_mut(&signum) {
            entry.watcher.give_back(serial, callback);
        }

        result
    }

    fn fire_timers(&mut self) -> Result<(), CallbackFault> {
        if self.timers.is_empty() {
            return Ok(());
        }

        let now = self.backend.now();

        for id in self.timers.expired(now) {
            let fired = Fired::Timer(id);
            match self.timers.kind(id) {
                Some(TimerKind::Once) => {
                    // Retired before the callback runs so it can't observe its own id.
                    if let Some(Some(callback)) = self.timers.remove(id) {
                        self.invoke(fired, callback).1?;
                    }
                }
                Some(TimerKind::Repeat) => {
                    if let Some(callback) = self.timers.rearm(id, now) {
                        let (callback, result) = self.invoke(fired, callback);
                        self.timers.restore(id, callback);
                        result?;
                    }
                }
                None => {}
            }
        }

        Ok(())
    }

    fn invoke(&mut self, fired: Fired, mut callback: Callback<B>) -> (Callback<B>, Result<(), CallbackFault>) {
        let result = fault::contain(fired, || {
            callback(&mut Context {
                reactor: self,
                fired,
            })
        });

        (callback, result)
    }

    fn escalate(&mut self, fault: CallbackFault) -> Result<(), Error> {
        tracing::error!(%fault, "callback fault");

        match self.fault_policy {
            FaultPolicy::Return => Err(fault.into()),
            FaultPolicy::Exit { status } => {
                self.shutdown();
                tracing::error!(status, "shutting down after callback fault");
                process::exit(status)
            }
        }
    }

    fn shutdown(&mut self) {
        self.destroy();
        self.clear_all_timers();

        let signals: Vec<Signum> = self.signals.keys().copied().collect();
        for signum in signals {
            self.stop_signal(signum);
        }
    }
}
