//! Link-fabric tests: pid validation, delivery, FIFO preservation, and the
//! buffer-depth table.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam::channel::{bounded, Sender};

use simnet_core::{payload, SimError};
use simnet_harness::{Net, Session};

/// Spin up a fabric with a running routing thread. Dropping the returned
/// sender stops the thread.
fn spawn_net(scale: usize) -> (Net, Sender<()>, JoinHandle<()>) {
    let net = Net::new(scale);
    let session = Arc::new(Session::new(scale));
    let (cancel_tx, cancel_rx) = bounded(0);
    let handle = net.spawn(session, cancel_rx);
    (net, cancel_tx, handle)
}

#[test]
fn out_of_range_pids_are_rejected() {
    let (net, cancel, handle) = spawn_net(4);

    assert!(net.send(0, 3, payload(())).is_ok());
    assert!(net.send(3, 0, payload(())).is_ok());
    assert!(net.recv(3, 1).is_ok());

    assert_eq!(net.send(0, 4, payload(())), Err(SimError::IncorrectPid));
    assert_eq!(net.send(4, 0, payload(())), Err(SimError::IncorrectPid));
    assert_eq!(net.send(17, 42, payload(())).unwrap_err(), SimError::IncorrectPid);
    assert!(net.recv(100, 200).is_err());
    assert!(net.recv(0, 4).is_err());

    drop(cancel);
    handle.join().unwrap();
}

#[test]
fn single_message_is_delivered() {
    let (net, cancel, handle) = spawn_net(4);

    net.send(1, 2, payload(42u32)).unwrap();

    let port = net.recv(2, 1).unwrap();
    let received = port
        .recv_timeout(Duration::from_secs(1))
        .expect("delivery timed out");
    assert_eq!(*received.downcast::<u32>().unwrap(), 42);

    drop(cancel);
    handle.join().unwrap();
}

#[test]
fn loopback_is_delivered() {
    let (net, cancel, handle) = spawn_net(1);

    net.send(0, 0, payload(7u32)).unwrap();

    let port = net.recv(0, 0).unwrap();
    let received = port
        .recv_timeout(Duration::from_secs(1))
        .expect("delivery timed out");
    assert_eq!(*received.downcast::<u32>().unwrap(), 7);

    drop(cancel);
    handle.join().unwrap();
}

#[test]
fn link_preserves_fifo_order() {
    let (net, cancel, handle) = spawn_net(4);

    for i in 0..100u32 {
        net.send(1, 2, payload(i)).unwrap();
    }

    let port = net.recv(2, 1).unwrap();
    for expected in 0..100u32 {
        let received = port
            .recv_timeout(Duration::from_secs(1))
            .expect("delivery timed out");
        assert_eq!(*received.downcast::<u32>().unwrap(), expected);
    }

    drop(cancel);
    handle.join().unwrap();
}

#[test]
fn filter_drops_at_enqueue() {
    let (net, cancel, handle) = spawn_net(2);

    net.set_filter(Some(Box::new(|from, to| !(from == 0 && to == 1))));
    net.send(0, 1, payload(1u32)).unwrap();
    net.send(1, 0, payload(2u32)).unwrap();

    // The open link delivers; the cut one stays silent.
    let port = net.recv(0, 1).unwrap();
    let received = port
        .recv_timeout(Duration::from_secs(1))
        .expect("delivery timed out");
    assert_eq!(*received.downcast::<u32>().unwrap(), 2);

    let cut = net.recv(1, 0).unwrap();
    assert!(cut.recv_timeout(Duration::from_millis(100)).is_err());

    // Opening the link afterwards does not resurrect the dropped payload.
    net.set_filter(None);
    assert!(cut.recv_timeout(Duration::from_millis(100)).is_err());

    drop(cancel);
    handle.join().unwrap();
}

#[test]
fn buffer_stats_renders_exact_table() {
    let (net, cancel, handle) = spawn_net(4);

    net.send(1, 0, payload(())).unwrap();
    net.send(1, 0, payload(())).unwrap();
    net.send(2, 1, payload(())).unwrap();
    net.send(2, 1, payload(())).unwrap();
    net.send(2, 1, payload(())).unwrap();
    net.send(1, 3, payload(())).unwrap();
    net.send(1, 3, payload(())).unwrap();
    net.send(3, 0, payload(())).unwrap();

    let expected = "\
    |  to|
----+----+----+----+----+----+
from|    |   0|   1|   2|   3|
----+----+----+----+----+----+
    |   0|    |    |    |    |
    |   1|   2|    |    |   2|
    |   2|    |   3|    |    |
    |   3|   1|    |    |    |
----+----+----+----+----+----+
";

    // The last hand-off completes just before the routing thread buffers
    // it, so poll briefly instead of asserting immediately.
    let deadline = Instant::now() + Duration::from_secs(1);
    let mut actual = net.buffer_stats();
    while actual != expected && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(10));
        actual = net.buffer_stats();
    }
    assert_eq!(actual, expected);

    let (received, buffered, sent) = net.stats();
    assert_eq!(received, 8);
    assert_eq!(buffered, 8);
    assert_eq!(sent, 0);

    drop(cancel);
    handle.join().unwrap();
}
