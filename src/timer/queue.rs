use super::TimerId;
use std::{
    collections::{BTreeSet, HashMap},
    time::{Duration, Instant},
};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TimerKind {
    Repeat,
    Once,
}

struct Entry<C> {
    kind: TimerKind,
    interval: Duration,
    deadline: Instant,
    callback: Option<C>,
}

/// Live timers keyed by id, ordered by deadline then id.
pub(crate) struct TimerQueue<C> {
    entries: HashMap<TimerId, Entry<C>>,
    deadlines: BTreeSet<(Instant, TimerId)>,
}

impl<C> Default for TimerQueue<C> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
            deadlines: BTreeSet::new(),
        }
    }
}

impl<C> TimerQueue<C> {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn kind(&self, id: TimerId) -> Option<TimerKind> {
        self.entries.get(&id).map(|entry| entry.kind)
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.deadlines.iter().next().map(|(deadline, _)| *deadline)
    }

    pub fn insert(
        &mut self,
        id: TimerId,
        kind: TimerKind,
        interval: Duration,
        deadline: Instant,
        callback: C,
    ) {
        self.deadlines.insert((deadline, id));
        self.entries.insert(
            id,
            Entry {
                kind,
                interval,
                deadline,
                callback: Some(callback),
            },
        );
    }

    /// Unschedules the timer. The outer `Option` is whether it existed, the
    /// inner one is `None` while its callback is running.
    pub fn remove(&mut self, id: TimerId) -> Option<Option<C>> {
        let entry = self.entries.remove(&id)?;
        self.deadlines.remove(&(entry.deadline, id));
        Some(entry.callback)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.deadlines.clear();
    }

    /// Ids due at `now`, in firing order. Nothing is unscheduled.
    pub fn expired(&self, now: Instant) -> Vec<TimerId> {
        self.deadlines
            .iter()
            .take_while(|(deadline, _)| *deadline <= now)
            .map(|(_, id)| *id)
            .collect()
    }

    /// Moves a repeating timer to its next deadline and lends out its
    /// callback until [`restore`](Self::restore).
    pub fn rearm(&mut self, id: TimerId, now: Instant) -> Option<C> {
        let entry = self.entries.get_mut(&id)?;
        self.deadlines.remove(&(entry.deadline, id));

        let next = entry
            .deadline
            .checked_add(entry.interval)
            .filter(|next| *next > now)
            .or_else(|| now.checked_add(entry.interval))
            .unwrap_or(now);

        entry.deadline = next;
        self.deadlines.insert((next, id));
        entry.callback.take()
    }

    /// Returns a lent callback. Dropped if the timer went away meanwhile.
    pub fn restore(&mut self, id: TimerId, callback: C) {
        if let Some(entry) = self.entries.get_mut(&id) {
            if entry.callback.is_none() {
                entry.callback = Some(callback);
            }
        }
    }
}
