//! Point-to-point forwarding of self-describing messages.
//!
//! Every message carries its destination pid. A call whose destination is
//! the local process is returned straight to the client; otherwise it is
//! forwarded over the network. A network message whose destination is the
//! local process is returned to the client; a misrouted one is reported as
//! an error rather than forwarded again.

use simnet_core::{payload, Api, Payload, Pid, Process, Tracer};

/// A self-describing forwardable message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FCall {
    /// Global sequence number, used by tests to order deliveries.
    pub seq: u64,
    /// Destination pid.
    pub to: Pid,
    pub payload: Vec<u8>,
}

pub struct Forwarder {
    pid: Pid,
    api: Api,
}

impl Forwarder {
    pub fn new(pid: Pid, api: Api) -> Self {
        Self { pid, api }
    }
}

impl Process for Forwarder {
    fn receive_net(&mut self, from: Pid, message: Payload) {
        let t = Tracer::new("recv [forwarder]");
        let fcall = match message.downcast::<FCall>() {
            Ok(fcall) => *fcall,
            Err(_) => {
                self.api.report_error(t.error("unexpected payload type"));
                return;
            }
        };

        let t = t.fork(format!("message {}", fcall.seq));
        if fcall.to == self.pid {
            self.api.trace(payload(t.log("delivered")));
            self.api.reply(payload(fcall));
        } else {
            self.api.report_error(t.error(format!(
                "misrouted message from {from}: destination {} is not {}",
                fcall.to, self.pid,
            )));
        }
    }

    fn receive_call(&mut self, call: Payload) {
        let t = Tracer::new("call [forwarder]");
        let fcall = match call.downcast::<FCall>() {
            Ok(fcall) => *fcall,
            Err(_) => {
                self.api.report_error(t.error("unexpected call type"));
                return;
            }
        };

        let t = t.fork(format!("message {}", fcall.seq));
        self.api.trace(payload(t.log("received")));
        if fcall.to == self.pid {
            self.api.trace(payload(t.log("returned")));
            self.api.reply(payload(fcall));
        } else {
            let to = fcall.to;
            self.api.trace(payload(t.log("forwarded")));
            self.api.send(to, payload(fcall));
        }
    }

    fn tick(&mut self, _delta: u64) {
        let t = Tracer::new("tick [forwarder]");
        self.api.trace(payload(t.log("received")));
    }
}
