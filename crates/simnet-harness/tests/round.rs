//! Round orchestration tests: staging, quiescence, draining, cancellation,
//! and filter behavior across rounds.

use std::thread;
use std::time::Duration;

use crossbeam::channel::bounded;
use tracing_test::traced_test;

use simnet_core::{payload, Api, Payload, Pid, Process, SimError};
use simnet_harness::{Config, Harness};

/// Ignores every event. Useful for rounds that must quiesce immediately.
struct Null;

impl Process for Null {
    fn receive_net(&mut self, _from: Pid, _payload: Payload) {}
    fn receive_call(&mut self, _payload: Payload) {}
    fn tick(&mut self, _delta: u64) {}
}

/// Sends every call to itself over the network (a loopback hop), then
/// returns whatever arrives back.
struct SelfEcho {
    pid: Pid,
    api: Api,
}

impl Process for SelfEcho {
    fn receive_net(&mut self, _from: Pid, message: Payload) {
        self.api.reply(message);
    }

    fn receive_call(&mut self, call: Payload) {
        self.api.send(self.pid, call);
    }

    fn tick(&mut self, _delta: u64) {}
}

/// Burns wall-clock time inside the handler, keeping its process busy.
struct Sleeper {
    nap: Duration,
}

impl Process for Sleeper {
    fn receive_net(&mut self, _from: Pid, _payload: Payload) {}

    fn receive_call(&mut self, _payload: Payload) {
        thread::sleep(self.nap);
    }

    fn tick(&mut self, _delta: u64) {}
}

#[test]
fn registration_appends_contiguous_pids() {
    let harness = Harness::new(Config::default());
    assert_eq!(harness.add_process(|_, _| Box::new(Null)), 0);
    assert_eq!(harness.add_process(|_, _| Box::new(Null)), 1);
    assert_eq!(harness.add_process(|_, _| Box::new(Null)), 2);
    assert_eq!(harness.scale(), 3);
}

#[test]
fn empty_stage_rounds_are_idempotent() {
    let harness = Harness::with_fleet(Config::default(), 3, |_, _| Box::new(Null));

    for _ in 0..2 {
        let (responses, traces) = harness.round().expect("round failed");
        assert_eq!(responses.len(), 3);
        assert_eq!(traces.len(), 3);
        assert!(responses.iter().all(Vec::is_empty));
        assert!(traces.iter().all(Vec::is_empty));
    }
}

#[test]
fn round_drains_responses() {
    let harness =
        Harness::with_fleet(Config::default(), 2, |pid, api| Box::new(SelfEcho { pid, api }));

    harness.inject(|pid, client| client.call(payload(pid as u64)));
    let (responses, _) = harness.round().expect("round failed");
    for (pid, per_pid) in responses.into_iter().enumerate() {
        let values: Vec<u64> = per_pid
            .into_iter()
            .map(|p| *p.downcast::<u64>().expect("u64 response"))
            .collect();
        assert_eq!(values, vec![pid as u64]);
    }

    // Nothing staged: the buffers were handed out and reset.
    let (responses, traces) = harness.round().expect("round failed");
    assert!(responses.iter().all(Vec::is_empty));
    assert!(traces.iter().all(Vec::is_empty));
}

#[test]
#[traced_test]
fn cancellation_aborts_round_and_workers_recover() {
    let harness = Harness::with_fleet(Config::default(), 2, |_, _| {
        Box::new(Sleeper {
            nap: Duration::from_millis(400),
        })
    });

    harness.inject(|_, client| client.call(payload(())));

    let (cancel_tx, cancel_rx) = bounded(1);
    let canceller = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        let _ = cancel_tx.send(());
    });

    let err = harness
        .round_with_cancel(&cancel_rx)
        .err()
        .expect("round should have been cancelled");
    assert_eq!(err, SimError::Cancelled);
    canceller.join().unwrap();

    // No workers leaked: a fresh round quiesces normally.
    let (responses, traces) = harness.round().expect("recovery round failed");
    assert!(responses.iter().all(Vec::is_empty));
    assert!(traces.iter().all(Vec::is_empty));
}

#[test]
#[traced_test]
fn filter_drops_are_permanent() {
    let harness =
        Harness::with_fleet(Config::default(), 3, |pid, api| Box::new(SelfEcho { pid, api }));

    // Every link cut: the loopback sends are dropped at enqueue.
    harness.filter(Some(Box::new(|_, _| false)));
    harness.inject(|_, client| client.call(payload(())));
    let (responses, _) = harness.round().expect("round failed");
    assert!(responses.iter().all(Vec::is_empty));

    // Opening the links afterwards cannot resurrect them.
    harness.filter(None);
    harness.tick(1);
    let (responses, _) = harness.round().expect("round failed");
    assert!(responses.iter().all(Vec::is_empty));
}

#[test]
fn status_and_buffer_stats_render() {
    let harness = Harness::with_fleet(Config::default(), 2, |_, _| Box::new(Null));

    let stats = harness.buffer_stats();
    assert!(stats.starts_with("    |  to|\n"));
    assert!(stats.contains("from|    |   0|   1|"));

    harness.round().expect("round failed");
    let status = harness.status();
    assert!(status.starts_with("net ["));
    assert!(status.contains("session"));
    assert!(status.contains("profs"));
}
