use crate::{
    error::{CallbackFault, FaultCause, FAULT_EXIT_STATUS},
    watcher::{CallbackResult, Fired},
};
use std::{
    any::Any,
    panic::{catch_unwind, AssertUnwindSafe},
};

/// What the loop does once a callback faults.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FaultPolicy {
    /// Tear every watcher down and exit the process with `status`.
    Exit { status: i32 },
    /// Stop dispatching and hand the fault back from `run`.
    Return,
}

impl Default for FaultPolicy {
    fn default() -> Self {
        Self::Exit {
            status: FAULT_EXIT_STATUS,
        }
    }
}

/// Runs a callback so that neither an error nor a panic escapes as anything
/// but a [`CallbackFault`].
pub(crate) fn contain(fired: Fired, f: impl FnOnce() -> CallbackResult) -> Result<(), CallbackFault> {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(error)) => Err(CallbackFault::new(fired, FaultCause::Error(error))),
        Err(payload) => Err(CallbackFault::new(
            fired,
            FaultCause::Panic(panic_message(payload)),
        )),
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    match payload.downcast::<String>() {
        Ok(message) => *message,
        Err(payload) => match payload.downcast::<&'static str>() {
            Ok(message) => message.to_string(),
            Err(_) => "non-string panic payload".to_string(),
        },
    }
}
