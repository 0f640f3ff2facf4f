use crate::{backend::Signum, watcher::Fired, watcher::Kind};
use std::{io, os::unix::io::RawFd};

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Exit status used when a callback fault shuts the process down.
pub const FAULT_EXIT_STATUS: i32 = 250;

#[derive(Debug, thiserror::Error)]
pub enum RegisterError {
    #[error("invalid descriptor {0}")]
    InvalidDescriptor(RawFd),

    #[error("invalid signal number {0}")]
    InvalidSignal(Signum),

    #[error("invalid timer interval {0}s")]
    InvalidInterval(f64),

    #[error("timer deadline is out of range")]
    IntervalOverflow,

    #[error("a repeating timer needs a non-zero interval")]
    ZeroInterval,

    #[error("timer ids are exhausted")]
    TimerIdsExhausted,

    #[error("backend refused the {kind} watcher")]
    Backend {
        kind: Kind,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum FaultCause {
    #[error("returned an error: {0}")]
    Error(#[source] BoxError),

    #[error("panicked: {0}")]
    Panic(String),
}

/// A callback returned an error or panicked.
#[derive(Debug, thiserror::Error)]
#[error("{fired} callback {cause}")]
pub struct CallbackFault {
    fired: Fired,
    #[source]
    cause: FaultCause,
}

impl CallbackFault {
    pub(crate) fn new(fired: Fired, cause: FaultCause) -> Self {
        Self { fired, cause }
    }

    pub fn fired(&self) -> Fired {
        self.fired
    }

    pub fn cause(&self) -> &FaultCause {
        &self.cause
    }

    pub fn is_panic(&self) -> bool {
        matches!(self.cause, FaultCause::Panic(_))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("backend poll failed")]
    Backend(#[source] io::Error),

    #[error(transparent)]
    Callback(#[from] CallbackFault),
}
