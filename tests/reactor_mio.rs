mod common;

use common::{init_tracing, Log};
use evloop::{Builder, FaultPolicy, Fired, Reactor, Target, Watch};
use pretty_assertions::assert_eq;
use serial_test::serial;
use signal_hook::consts::{SIGUSR1, SIGUSR2};
use std::{
    io::{Read, Write},
    os::unix::{io::AsRawFd, net::UnixStream},
    time::Duration,
};

fn reactor() -> Reactor {
    init_tracing();
    Builder::new()
        .fault_policy(FaultPolicy::Return)
        .build()
        .unwrap()
}

/// Fails the run if nothing stopped it within a few seconds.
fn watchdog(reactor: &mut Reactor) {
    reactor
        .add(Watch::TimerOnce(Duration::from_secs(5)), |_| {
            Err("watchdog expired".into())
        })
        .unwrap();
}

#[test]
fn socket_readiness_dispatches() {
    let mut reactor = reactor();
    watchdog(&mut reactor);

    let (mut tx, rx) = UnixStream::pair().unwrap();
    rx.set_nonblocking(true).unwrap();
    let fd = rx.as_raw_fd();

    let log = Log::default();
    let calls = log.clone();
    let mut rx = rx;
    reactor
        .add(Watch::Read(fd), move |cx| {
            let mut buf = [0u8; 16];
            let n = rx.read(&mut buf)?;
            calls.push((cx.fired(), buf[..n].to_vec()));
            cx.del(Target::Read(fd));
            cx.clear_all_timers();
            cx.stop();
            Ok(())
        })
        .unwrap();

    tx.write_all(b"ping").unwrap();
    reactor.run().unwrap();

    assert_eq!(log.take(), vec![(Fired::Read(fd), b"ping".to_vec())]);
    assert_eq!(reactor.io_count(), 0);
}

#[test]
fn writable_socket_fires_write_watcher() {
    let mut reactor = reactor();
    watchdog(&mut reactor);

    let (tx, _rx) = UnixStream::pair().unwrap();
    let fd = tx.as_raw_fd();

    reactor
        .add(Watch::Write(fd), move |cx| {
            assert_eq!(cx.fired(), Fired::Write(fd));
            cx.destroy();
            cx.clear_all_timers();
            cx.stop();
            Ok(())
        })
        .unwrap();

    reactor.run().unwrap();
    assert_eq!(reactor.io_count(), 0);
}

#[test]
fn repeating_timer_runs_on_real_clock() {
    let mut reactor = reactor();
    watchdog(&mut reactor);

    let log = Log::default();
    let calls = log.clone();
    reactor
        .add(Watch::Timer(Duration::from_millis(10)), move |cx| {
            calls.push(());
            if calls.len() == 3 {
                cx.clear_all_timers();
                cx.stop();
            }
            Ok(())
        })
        .unwrap();

    let started = std::time::Instant::now();
    reactor.run().unwrap();

    assert_eq!(log.len(), 3);
    assert!(started.elapsed() >= Duration::from_millis(30));
}

#[test]
#[serial]
fn raised_signal_dispatches() {
    let mut reactor = reactor();
    watchdog(&mut reactor);

    let log = Log::default();
    let calls = log.clone();
    reactor
        .add(Watch::Signal(SIGUSR1), move |cx| {
            calls.push(cx.fired());
            cx.clear_all_timers();
            cx.stop();
            Ok(())
        })
        .unwrap();

    signal_hook::low_level::raise(SIGUSR1).unwrap();
    reactor.run().unwrap();

    assert_eq!(log.take(), vec![Fired::Signal(SIGUSR1)]);
    reactor.del(Target::Signal(SIGUSR1));
    assert_eq!(reactor.signal_count(), 0);
}

#[test]
#[serial]
fn replaced_signal_watcher_stays_silent() {
    let mut reactor = reactor();
    watchdog(&mut reactor);

    let log = Log::default();
    for name in ["old", "new"] {
        let calls = log.clone();
        reactor
            .add(Watch::Signal(SIGUSR2), move |cx| {
                calls.push(name);
                cx.clear_all_timers();
                cx.stop();
                Ok(())
            })
            .unwrap();
    }

    signal_hook::low_level::raise(SIGUSR2).unwrap();
    reactor.run().unwrap();

    assert_eq!(log.take(), vec!["new"]);
    assert_eq!(reactor.signal_count(), 1);
}

#[test]
fn partially_read_socket_fires_again() {
    let mut reactor = reactor();

    let (mut tx, rx) = UnixStream::pair().unwrap();
    rx.set_nonblocking(true).unwrap();
    let fd = rx.as_raw_fd();

    let log = Log::default();
    let calls = log.clone();
    let mut rx = rx;
    reactor
        .add(Watch::Read(fd), move |_| {
            let mut chunk = [0u8; 16];
            calls.push(rx.read(&mut chunk)?);
            Ok(())
        })
        .unwrap();

    tx.write_all(&[7u8; 32]).unwrap();
    for _ in 0..3 {
        reactor.turn(Some(Duration::from_millis(200))).unwrap();
    }

    assert_eq!(log.take(), vec![16, 16]);
}

#[test]
fn write_watcher_fires_every_turn_while_writable() {
    let mut reactor = reactor();

    let (tx, _rx) = UnixStream::pair().unwrap();
    let fd = tx.as_raw_fd();

    let log = Log::default();
    let calls = log.clone();
    reactor
        .add(Watch::Write(fd), move |cx| {
            calls.push(cx.fired());
            Ok(())
        })
        .unwrap();

    for _ in 0..3 {
        reactor.turn(Some(Duration::from_secs(5))).unwrap();
    }

    assert_eq!(log.take(), vec![Fired::Write(fd); 3]);
}
