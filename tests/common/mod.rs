#![allow(dead_code)]

use evloop::{
    backend::{LabBackend, LabHandle},
    Builder, FaultPolicy, Reactor,
};
use std::{cell::RefCell, rc::Rc};

/// Installs a subscriber honouring `RUST_LOG`, once per test binary.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Reactor over the lab backend that hands faults back from `run`.
pub fn lab_reactor() -> (Reactor<LabBackend>, LabHandle) {
    init_tracing();

    let backend = LabBackend::new();
    let lab = backend.handle();
    let reactor = Builder::new()
        .fault_policy(FaultPolicy::Return)
        .build_with(backend);
    (reactor, lab)
}

/// Shared log the callbacks append to.
pub struct Log<T>(Rc<RefCell<Vec<T>>>);

impl<T> Default for Log<T> {
    fn default() -> Self {
        Self(Rc::new(RefCell::new(Vec::new())))
    }
}

impl<T> Clone for Log<T> {
    fn clone(&self) -> Self {
        Self(Rc::clone(&self.0))
    }
}

impl<T: Clone> Log<T> {
    pub fn push(&self, value: T) {
        self.0.borrow_mut().push(value);
    }

    pub fn take(&self) -> Vec<T> {
        std::mem::take(&mut *self.0.borrow_mut())
    }

    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }
}

const CHILD_ENV: &str = "EVLOOP_TEST_CHILD";

/// True inside a child started by [`rerun`].
pub fn in_child() -> bool {
    std::env::var_os(CHILD_ENV).is_some()
}

/// Runs one test of the current binary in a child process.
pub fn rerun(test: &str) -> std::process::ExitStatus {
    std::process::Command::new(std::env::current_exe().unwrap())
        .args(["--exact", test, "--test-threads=1"])
        .env(CHILD_ENV, "1")
        .status()
        .unwrap()
}
