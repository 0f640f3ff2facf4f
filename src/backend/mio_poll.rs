use super::{disposition, is_watchable_signal, Backend, Event, Events, Interest, Signum, Token};
use mio::unix::SourceFd;
use signal_hook_mio::v0_7::Signals;
use std::{collections::HashMap, io, mem, os::unix::io::RawFd, time::Duration};

struct SignalSource {
    token: Token,
    signals: Signals,
}

/// [`Backend`] over [`mio::Poll`], with one self-pipe per watched signal.
///
/// mio reports edges. Every descriptor reported by a poll is re-armed before
/// the next wait, so anything still readable or writable is reported again.
pub struct MioBackend {
    selector: mio::Poll,
    events: mio::Events,
    descriptors: HashMap<RawFd, (Token, Interest)>,
    descriptor_tokens: HashMap<Token, RawFd>,
    rearm: Vec<RawFd>,
    signals: HashMap<Signum, SignalSource>,
    signal_tokens: HashMap<Token, Signum>,
}

impl MioBackend {
    pub fn new() -> io::Result<Self> {
        Self::with_capacity(256)
    }

    pub fn with_capacity(capacity: usize) -> io::Result<Self> {
        Ok(Self {
            selector: mio::Poll::new()?,
            events: mio::Events::with_capacity(capacity.max(1)),
            descriptors: HashMap::new(),
            descriptor_tokens: HashMap::new(),
            rearm: Vec::new(),
            signals: HashMap::new(),
            signal_tokens: HashMap::new(),
        })
    }

    fn rearm_reported(&mut self) {
        for fd in mem::take(&mut self.rearm) {
            let (token, interest) = match self.descriptors.get(&fd) {
                Some(registered) => *registered,
                None => continue,
            };

            let registry = self.selector.registry();
            if let Err(error) = registry.reregister(&mut SourceFd(&fd), mio::Token(token.0), interest.into()) {
                tracing::trace!(fd, %error, "rearm failed");
            }
        }
    }

    fn track(&mut self, fd: RawFd, token: Token, interest: Interest) {
        if let Some((old, _)) = self.descriptors.insert(fd, (token, interest)) {
            self.descriptor_tokens.remove(&old);
        }
        self.descriptor_tokens.insert(token, fd);
    }
}

impl From<Interest> for mio::Interest {
    fn from(interest: Interest) -> Self {
        match (interest.is_readable(), interest.is_writable()) {
            (true, true) => mio::Interest::READABLE | mio::Interest::WRITABLE,
            (false, true) => mio::Interest::WRITABLE,
            _ => mio::Interest::READABLE,
        }
    }
}

impl Backend for MioBackend {
    fn register_io(&mut self, fd: RawFd, token: Token, interest: Interest) -> io::Result<()> {
        self.selector
            .registry()
            .register(&mut SourceFd(&fd), mio::Token(token.0), interest.into())?;
        self.track(fd, token, interest);
        Ok(())
    }

    fn reregister_io(&mut self, fd: RawFd, token: Token, interest: Interest) -> io::Result<()> {
        self.selector
            .registry()
            .reregister(&mut SourceFd(&fd), mio::Token(token.0), interest.into())?;
        self.track(fd, token, interest);
        Ok(())
    }

    fn deregister_io(&mut self, fd: RawFd) -> io::Result<()> {
        if let Some((token, _)) = self.descriptors.remove(&fd) {
            self.descriptor_tokens.remove(&token);
        }
        self.selector.registry().deregister(&mut SourceFd(&fd))
    }

    fn register_signal(&mut self, signum: Signum, token: Token) -> io::Result<()> {
        if !is_watchable_signal(signum) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "signal cannot be watched",
            ));
        }

        let mut signals = Signals::new(&[signum])?;
        self.selector
            .registry()
            .register(&mut signals, mio::Token(token.0), mio::Interest::READABLE)?;
        if let Err(error) = disposition::watch(signum) {
            let _ = self.selector.registry().deregister(&mut signals);
            return Err(error);
        }

        self.signal_tokens.insert(token, signum);
        let replaced = self.signals.insert(signum, SignalSource { token, signals });

        if let Some(mut old) = replaced {
            self.signal_tokens.remove(&old.token);
            if let Err(error) = self.selector.registry().deregister(&mut old.signals) {
                tracing::debug!(signum, %error, "deregister of replaced signal failed");
            }
            disposition::unwatch(signum);
        }
        Ok(())
    }

    fn deregister_signal(&mut self, signum: Signum) -> io::Result<()> {
        let mut source = match self.signals.remove(&signum) {
            Some(source) => source,
            None => return Ok(()),
        };

        self.signal_tokens.remove(&source.token);
        let result = self.selector.registry().deregister(&mut source.signals);
        drop(source);
        disposition::unwatch(signum);
        result
    }

    fn poll(&mut self, events: &mut Events, timeout: Option<Duration>) -> io::Result<()> {
        events.clear();
        self.rearm_reported();

        loop {
            match self.selector.poll(&mut self.events, timeout) {
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                result => break result?,
            }
        }

        for event in self.events.iter() {
            let token = Token(event.token().0);

            if let Some(signum) = self.signal_tokens.get(&token) {
                // The pipe stays readable until drained; coalesce into one event.
                let delivered = match self.signals.get_mut(signum) {
                    Some(source) => source.signals.pending().count(),
                    None => 0,
                };

                if delivered > 0 {
                    events.push(Event::signaled(token));
                }
                continue;
            }

            if let Some(fd) = self.descriptor_tokens.get(&token) {
                self.rearm.push(*fd);
            }

            events.push(Event {
                token,
                readable: event.is_readable() || event.is_read_closed() || event.is_error(),
                writable: event.is_writable() || event.is_write_closed() || event.is_error(),
                signaled: false,
            });
        }

        Ok(())
    }
}

impl Drop for MioBackend {
    fn drop(&mut self) {
        for (signum, source) in self.signals.drain() {
            drop(source);
            disposition::unwatch(signum);
        }
    }
}
