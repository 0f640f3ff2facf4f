#![forbid(unsafe_code)]

//! Single-threaded event loop for descriptor readiness, POSIX signals and
//! timers.
//!
//! ```no_run
//! use evloop::{Reactor, Target, Watch};
//! use std::time::Duration;
//!
//! let mut reactor = Reactor::new()?;
//! reactor.add(Watch::Signal(libc_sigint()), |cx| {
//!     cx.stop();
//!     Ok(())
//! })?;
//! let tick = reactor.add(Watch::Timer(Duration::from_secs(1)), |_| Ok(()))?;
//! reactor.run()?;
//! if let Some(id) = tick.timer_id() {
//!     reactor.del(Target::Timer(id));
//! }
//! # fn libc_sigint() -> i32 { 2 }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod backend;
mod builder;
mod error;
mod fault;
mod reactor;
mod timer;
mod watcher;

pub use self::{
    builder::Builder,
    error::{BoxError, CallbackFault, Error, FaultCause, RegisterError, FAULT_EXIT_STATUS},
    fault::FaultPolicy,
    reactor::Reactor,
    timer::{TimerId, TimerIdAllocator},
    watcher::{Added, Callback, CallbackResult, Context, Fired, Kind, Target, Watch},
};
