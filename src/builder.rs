use crate::{
    backend::{Backend, Events, MioBackend},
    error::FAULT_EXIT_STATUS,
    fault::FaultPolicy,
    reactor::Reactor,
    timer::TimerIdAllocator,
};
use std::{io, num::NonZeroUsize};

const DEFAULT_EVENTS_CAPACITY: usize = 256;

/// Configures a [`Reactor`] before it starts.
#[derive(Clone, Debug)]
pub struct Builder {
    events_capacity: Option<NonZeroUsize>,
    fault_policy: FaultPolicy,
    timer_ids: Option<TimerIdAllocator>,
}

impl Default for Builder {
    fn default() -> Self {
        Self::new()
    }
}

impl Builder {
    pub const fn new() -> Self {
        Self {
            events_capacity: None,
            fault_policy: FaultPolicy::Exit {
                status: FAULT_EXIT_STATUS,
            },
            timer_ids: None,
        }
    }

    /// Readiness events collected per poll. Zero keeps the default.
    pub fn events_capacity(&mut self, events_capacity: usize) -> &mut Self {
        self.events_capacity = NonZeroUsize::new(events_capacity);
        self
    }

    pub fn fault_policy(&mut self, fault_policy: FaultPolicy) -> &mut Self {
        self.fault_policy = fault_policy;
        self
    }

    /// Shares a timer id counter with other reactors.
    pub fn timer_ids(&mut self, timer_ids: TimerIdAllocator) -> &mut Self {
        self.timer_ids = Some(timer_ids);
        self
    }

    fn capacity(&self) -> usize {
        self.events_capacity
            .map_or(DEFAULT_EVENTS_CAPACITY, NonZeroUsize::get)
    }

    pub fn build(&self) -> io::Result<Reactor<MioBackend>> {
        let backend = MioBackend::with_capacity(self.capacity())?;
        Ok(self.build_with(backend))
    }

    pub fn build_with<B: Backend>(&self, backend: B) -> Reactor<B> {
        let timer_ids = self.timer_ids.clone().unwrap_or_default();
        tracing::debug!(
            capacity = self.capacity(),
            policy = ?self.fault_policy,
            "building reactor"
        );

        Reactor::from_parts(
            backend,
            Events::with_capacity(self.capacity()),
            self.fault_policy,
            timer_ids,
        )
    }
}
