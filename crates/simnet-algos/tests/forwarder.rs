//! Forwarder scenarios: the full ring, harness reuse across rounds, and an
//! isolated node.

use simnet_core::{payload, Payload, Pid};
use simnet_harness::{Config, Harness};

use simnet_algos::forwarder::{FCall, Forwarder};

fn fcalls(payloads: Vec<Payload>) -> Vec<FCall> {
    payloads
        .into_iter()
        .map(|p| *p.downcast::<FCall>().expect("FCall response"))
        .collect()
}

fn tag() -> Vec<u8> {
    rand::random::<[u8; 2]>().to_vec()
}

/// Each pid `p` sends messages `k ∈ [0, per_node)` to `(p + k + 1) % scale`.
fn call_map(scale: usize, per_node: usize) -> Vec<Vec<FCall>> {
    let mut seq = 0;
    (0..scale)
        .map(|pid| {
            (0..per_node)
                .map(|k| {
                    let call = FCall {
                        seq,
                        to: (pid + k + 1) % scale,
                        payload: tag(),
                    };
                    seq += 1;
                    call
                })
                .collect()
        })
        .collect()
}

/// Inject the map and check every pid receives exactly its expected set.
fn run_ring(harness: &Harness, scale: usize, per_node: usize) {
    let calls = call_map(scale, per_node);

    {
        let calls = calls.clone();
        harness.inject(move |pid, client| {
            for call in &calls[pid] {
                client.call(payload(call.clone()));
            }
        });
    }

    let (responses, traces) = harness.round().expect("round failed");
    assert_eq!(responses.len(), scale);
    assert_eq!(traces.len(), scale);

    for (pid, per_pid) in responses.into_iter().enumerate() {
        let mut actual = fcalls(per_pid);
        assert_eq!(actual.len(), per_node, "deliveries for pid {pid}");
        actual.sort_by_key(|c| c.seq);

        // Message `k` of sender `s` lands on `(s + k + 1) % scale`, so pid
        // receives message `k` of sender `(pid - k - 1) mod scale`.
        let mut expected: Vec<FCall> = (0..per_node)
            .map(|k| {
                let sender = (pid as i64 - k as i64 - 1).rem_euclid(scale as i64) as usize;
                calls[sender][k].clone()
            })
            .collect();
        expected.sort_by_key(|c| c.seq);

        assert_eq!(actual, expected, "deliveries for pid {pid}");
    }
}

#[test]
fn ring_delivers_every_message() {
    const SCALE: usize = 30;
    const PER_NODE: usize = 100;

    let harness = Harness::with_fleet(Config::default(), SCALE, |pid, api| {
        Box::new(Forwarder::new(pid, api))
    });
    run_ring(&harness, SCALE, PER_NODE);
}

#[test]
fn harness_is_reusable_across_rounds() {
    const SCALE: usize = 10;
    const PER_NODE: usize = 10;

    let harness = Harness::with_fleet(Config::default(), SCALE, |pid, api| {
        Box::new(Forwarder::new(pid, api))
    });
    run_ring(&harness, SCALE, PER_NODE);
    run_ring(&harness, SCALE, PER_NODE);
    run_ring(&harness, SCALE, PER_NODE);
}

#[test]
fn isolated_node_neither_sends_nor_receives() {
    const SCALE: usize = 5;

    let destinations: [Pid; SCALE] = [3, 2, 0, 1, 3];
    let calls: Vec<FCall> = destinations
        .iter()
        .enumerate()
        .map(|(pid, &to)| FCall {
            seq: pid as u64,
            to,
            payload: tag(),
        })
        .collect();

    let harness = Harness::with_fleet(Config::default(), SCALE, |pid, api| {
        Box::new(Forwarder::new(pid, api))
    });

    // Sever every link touching pid 0.
    harness.filter(Some(Box::new(|from, to| from != 0 && to != 0)));

    {
        let calls = calls.clone();
        harness.inject(move |pid, client| client.call(payload(calls[pid].clone())));
    }

    let (responses, _) = harness.round().expect("round failed");
    let delivered: Vec<Vec<FCall>> = responses.into_iter().map(fcalls).collect();

    assert_eq!(delivered[0], vec![]);
    assert_eq!(delivered[1], vec![calls[3].clone()]);
    assert_eq!(delivered[2], vec![calls[1].clone()]);
    assert_eq!(delivered[3], vec![calls[4].clone()]);
    assert_eq!(delivered[4], vec![]);
}
