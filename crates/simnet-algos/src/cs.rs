//! Client/server request–response with client-side timeouts.
//!
//! Clients receive calls from the injector, forward them to a fixed server
//! pid, and return the server's responses. Pending requests older than the
//! configured timeout are returned with `timeout = true` when logical time
//! advances.

use simnet_core::{payload, Api, Payload, Pid, Process, Tracer};

/// Injected into a client by the external injector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub id: u64,
    pub payload: Vec<u8>,
}

/// Returned by a client to its injector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Return {
    pub id: u64,
    pub payload: Vec<u8>,
    pub timeout: bool,
}

/// Client → server message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub id: u64,
    pub payload: Vec<u8>,
}

/// Server → client message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub id: u64,
    pub payload: Vec<u8>,
}

struct PendingCall {
    call: Call,
    timestamp: u64,
}

/// The client half: tracks in-flight requests against logical time.
pub struct Client {
    api: Api,
    server: Pid,
    timeout: u64,
    time: u64,
    pending: Vec<PendingCall>,
}

impl Client {
    /// A client that targets `server` and expires requests after
    /// `timeout` logical time units (`0` disables expiry).
    pub fn new(api: Api, server: Pid, timeout: u64) -> Self {
        Self {
            api,
            server,
            timeout,
            time: 0,
            pending: Vec::new(),
        }
    }
}

impl Process for Client {
    fn receive_net(&mut self, _from: Pid, message: Payload) {
        let t = Tracer::new("recv [client]");
        let response = match message.downcast::<Response>() {
            Ok(response) => *response,
            Err(_) => {
                self.api.report_error(t.error("unexpected payload type"));
                return;
            }
        };

        let t = t.fork(format!("response {}", response.id));
        self.api.trace(payload(t.log("received")));
        self.api.reply(payload(Return {
            id: response.id,
            payload: response.payload,
            timeout: false,
        }));
        self.api.trace(payload(t.log("returned")));

        self.pending.retain(|p| p.call.id != response.id);
    }

    fn receive_call(&mut self, call: Payload) {
        let t = Tracer::new("call [client]");
        let call = match call.downcast::<Call>() {
            Ok(call) => *call,
            Err(_) => {
                self.api.report_error(t.error("unexpected call type"));
                return;
            }
        };

        let t = t.fork(format!("call {}", call.id));
        self.api.trace(payload(t.log("received")));

        let request = Request {
            id: call.id,
            payload: call.payload.clone(),
        };
        self.pending.push(PendingCall {
            call,
            timestamp: self.time,
        });
        self.api.send(self.server, payload(request));
    }

    fn tick(&mut self, delta: u64) {
        let t = Tracer::new("tick [client]").fork(format!("{delta}"));
        self.api.trace(payload(t.log("received")));

        self.time += delta;

        let time = self.time;
        let timeout = self.timeout;
        let (expired, pending): (Vec<PendingCall>, Vec<PendingCall>) = self
            .pending
            .drain(..)
            .partition(|p| timeout != 0 && time > p.timestamp + timeout);
        self.pending = pending;

        for p in expired {
            self.api.trace(payload(
                t.log(format!("timeout for call {}, returning", p.call.id)),
            ));
            self.api.reply(payload(Return {
                id: p.call.id,
                payload: p.call.payload,
                timeout: true,
            }));
        }
    }
}

/// The server half: echoes every request back as a response.
pub struct Server {
    api: Api,
}

impl Server {
    pub fn new(api: Api) -> Self {
        Self { api }
    }
}

impl Process for Server {
    fn receive_net(&mut self, from: Pid, message: Payload) {
        let t = Tracer::new("recv [server]");
        let request = match message.downcast::<Request>() {
            Ok(request) => *request,
            Err(_) => {
                self.api.report_error(t.error("unexpected payload type"));
                return;
            }
        };

        let t = t.fork(format!("request {}", request.id));
        self.api.trace(payload(t.log("received")));
        let response = Response {
            id: request.id,
            payload: request.payload,
        };
        self.api.send(from, payload(response));
        self.api.trace(payload(t.log("responded")));
    }

    fn receive_call(&mut self, _call: Payload) {
        let t = Tracer::new("call [server]");
        self.api
            .report_error(t.error("server does not accept client calls"));
    }

    fn tick(&mut self, _delta: u64) {
        let t = Tracer::new("tick [server]");
        self.api.trace(payload(t.log("received")));
    }
}
