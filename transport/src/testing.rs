//! Scripted transport used by the engine's unit tests.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

use bytes::Bytes;
use courier_types::{ClientKind, Headers, Request, TransportError};

use crate::{Attempt, Body, TraceHeaders, Transport};

#[derive(Debug, Clone)]
pub(crate) enum Step {
    Status(u16),
    Publish,
    Reject,
    Fail,
    Panic,
    Hang,
}

#[derive(Debug, Default)]
pub(crate) struct Script(Mutex<VecDeque<Step>>);

impl Script {
    pub(crate) fn new(steps: Vec<Step>) -> Self {
        Self(Mutex::new(steps.into()))
    }

    fn next(&self) -> Step {
        self.0.lock().unwrap().pop_front().unwrap_or(Step::Fail)
    }
}

#[derive(Debug)]
pub(crate) struct ScriptedMessage {
    pub request: Request,
}

#[derive(Debug, Default)]
pub(crate) struct ScriptedTransport {
    script: Script,
    calls: AtomicU32,
    in_flight: AtomicU32,
    max_in_flight: AtomicU32,
    prepared: Mutex<Vec<TraceHeaders>>,
}

impl ScriptedTransport {
    pub(crate) fn new(script: Script) -> Self {
        Self {
            script,
            ..Self::default()
        }
    }

    pub(crate) fn message(&self) -> ScriptedMessage {
        ScriptedMessage {
            request: Request::new("orders"),
        }
    }

    pub(crate) fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn max_in_flight(&self) -> u32 {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub(crate) fn prepared(&self) -> Vec<TraceHeaders> {
        self.prepared.lock().unwrap().clone()
    }
}

impl Transport for ScriptedTransport {
    type Message = ScriptedMessage;

    fn kind(&self) -> ClientKind {
        ClientKind::Http
    }

    fn prepare(
        &self,
        request: Request,
        trace: &TraceHeaders,
    ) -> Result<Self::Message, TransportError> {
        if request.destination().is_empty() {
            return Err(TransportError::InvalidRequest("empty destination".to_string()));
        }
        self.prepared.lock().unwrap().push(trace.clone());
        Ok(ScriptedMessage { request })
    }

    async fn attempt(&self, message: &Self::Message) -> Attempt {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let step = self.script.next();
        tokio::task::yield_now().await;

        let result = match step {
            Step::Status(code) => Attempt::Status {
                code,
                headers: Headers::new(),
                body: Body::Buffered(Bytes::copy_from_slice(message.request.payload())),
            },
            Step::Publish => Attempt::Published,
            Step::Reject => Attempt::Rejected("rejected".into()),
            Step::Fail => Attempt::Failed(TransportError::io("connection refused")),
            Step::Panic => panic!("scripted panic"),
            Step::Hang => std::future::pending().await,
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}
