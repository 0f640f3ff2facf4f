//! Default signal actions for signals nobody watches any more.
//!
//! `signal-hook` never uninstalls its process handler, so a signal whose last
//! `Signals` was dropped would otherwise be swallowed. Each signal number that
//! was ever watched gets one conditional-default action, armed while no
//! backend in the process watches it.

use super::Signum;
use parking_lot::{const_mutex, Mutex};
use std::{
    collections::BTreeMap,
    io,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

struct Fallback {
    watchers: usize,
    unwatched: Arc<AtomicBool>,
}

static FALLBACKS: Mutex<BTreeMap<Signum, Fallback>> = const_mutex(BTreeMap::new());

/// Records one more watcher of `signum`, disarming its default action.
pub(super) fn watch(signum: Signum) -> io::Result<()> {
    let mut fallbacks = FALLBACKS.lock();

    if let Some(fallback) = fallbacks.get_mut(&signum) {
        fallback.watchers += 1;
        fallback.unwatched.store(false, Ordering::SeqCst);
        return Ok(());
    }

    let unwatched = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register_conditional_default(signum, Arc::clone(&unwatched))?;
    fallbacks.insert(
        signum,
        Fallback {
            watchers: 1,
            unwatched,
        },
    );
    Ok(())
}

/// Drops one watcher of `signum`. The last one re-arms the default action.
pub(super) fn unwatch(signum: Signum) {
    let mut fallbacks = FALLBACKS.lock();

    if let Some(fallback) = fallbacks.get_mut(&signum) {
        fallback.watchers = fallback.watchers.saturating_sub(1);
        if fallback.watchers == 0 {
            fallback.unwatched.store(true, Ordering::SeqCst);
            tracing::debug!(signum, "signal back to its default action");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn armed(signum: Signum) -> Option<bool> {
        FALLBACKS
            .lock()
            .get(&signum)
            .map(|fallback| fallback.unwatched.load(Ordering::SeqCst))
    }

    #[test]
    fn last_watcher_rearms_default() {
        // SIGWINCH defaults to ignore, so an armed fallback is harmless here.
        let signum = signal_hook::consts::SIGWINCH;

        watch(signum).unwrap();
        watch(signum).unwrap();
        assert_eq!(armed(signum), Some(false));

        unwatch(signum);
        assert_eq!(armed(signum), Some(false));

        unwatch(signum);
        assert_eq!(armed(signum), Some(true));

        watch(signum).unwrap();
        assert_eq!(armed(signum), Some(false));
        unwatch(signum);
    }
}
