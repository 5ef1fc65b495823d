//! Leader/follower request dispatching.
//!
//! Process 0 is the leader. Followers accept client requests, dispatch
//! them to the leader, and relay its responses back to their clients.
//! Requests the leader never answers are expired by ticks.

use simnet_core::{payload, Api, Payload, Pid, Process, Tracer};

/// The leader's process id.
pub const LEADER: Pid = 0;

/// Injected into a follower by the external injector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientRequest {
    pub id: u64,
    pub payload: Vec<u8>,
}

/// Returned by a follower to its injector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientResponse {
    pub id: u64,
    pub payload: Vec<u8>,
    pub timeout: bool,
}

/// Follower → leader message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchedRequest {
    pub id: u64,
    pub payload: Vec<u8>,
}

/// Leader → follower message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchedResponse {
    pub id: u64,
    pub payload: Vec<u8>,
}

struct PendingRequest {
    request: ClientRequest,
    timestamp: u64,
}

/// One node of the dispatcher fleet; behaves as leader iff `pid == 0`.
pub struct Dispatcher {
    pid: Pid,
    api: Api,
    timeout: u64,
    time: u64,
    pending: Vec<PendingRequest>,
}

impl Dispatcher {
    pub fn new(pid: Pid, api: Api, timeout: u64) -> Self {
        Self {
            pid,
            api,
            timeout,
            time: 0,
            pending: Vec::new(),
        }
    }

    fn is_leader(&self) -> bool {
        self.pid == LEADER
    }
}

impl Process for Dispatcher {
    fn receive_net(&mut self, from: Pid, message: Payload) {
        let t = Tracer::new("recv [dispatcher]");

        let message = match message.downcast::<DispatchedRequest>() {
            Ok(request) => {
                let t = t.fork(format!("dispatched request {}", request.id));
                if !self.is_leader() {
                    self.api
                        .report_error(t.error("followers do not accept dispatched requests"));
                    return;
                }
                self.api.trace(payload(t.log("received")));
                let response = DispatchedResponse {
                    id: request.id,
                    payload: request.payload,
                };
                self.api.send(from, payload(response));
                self.api.trace(payload(t.log("responded")));
                return;
            }
            Err(message) => message,
        };

        match message.downcast::<DispatchedResponse>() {
            Ok(response) => {
                let t = t.fork(format!("dispatched response {}", response.id));
                if self.is_leader() {
                    self.api
                        .report_error(t.error("the leader does not accept dispatched responses"));
                    return;
                }
                self.api.trace(payload(t.log("received")));
                self.pending.retain(|p| p.request.id != response.id);
                self.api.reply(payload(ClientResponse {
                    id: response.id,
                    payload: response.payload,
                    timeout: false,
                }));
                self.api.trace(payload(t.log("returned")));
            }
            Err(_) => self.api.report_error(t.error("unexpected payload type")),
        }
    }

    fn receive_call(&mut self, call: Payload) {
        let t = Tracer::new("call [dispatcher]");
        let request = match call.downcast::<ClientRequest>() {
            Ok(request) => *request,
            Err(_) => {
                self.api.report_error(t.error("unexpected call type"));
                return;
            }
        };

        if self.is_leader() {
            self.api
                .report_error(t.error("the leader does not accept client requests"));
            return;
        }

        let t = t.fork(format!("client request {}", request.id));
        self.api.trace(payload(t.log("received")));

        let dispatched = DispatchedRequest {
            id: request.id,
            payload: request.payload.clone(),
        };
        self.pending.push(PendingRequest {
            request,
            timestamp: self.time,
        });
        self.api.send(LEADER, payload(dispatched));
    }

    fn tick(&mut self, delta: u64) {
        let t = Tracer::new("tick [dispatcher]").fork(format!("{delta}"));
        self.api.trace(payload(t.log("received")));

        self.time += delta;

        let time = self.time;
        let timeout = self.timeout;
        let (expired, pending): (Vec<PendingRequest>, Vec<PendingRequest>) = self
            .pending
            .drain(..)
            .partition(|p| timeout != 0 && time > p.timestamp + timeout);
        self.pending = pending;

        for p in expired {
            self.api
                .trace(payload(t.log(format!("timeout for request {}", p.request.id))));
            self.api.reply(payload(ClientResponse {
                id: p.request.id,
                payload: p.request.payload,
                timeout: true,
            }));
        }
    }
}
