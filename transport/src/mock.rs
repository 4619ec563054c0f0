use std::collections::VecDeque;
use std::fmt;
use std::sync::{Mutex, PoisonError};

use bytes::Bytes;
use courier_types::{ClientKind, Headers, Request};

use crate::{Body, CallContext, Delivery, Fetch, Response};

type Hook = Box<dyn Fn(&CallContext, &Request) -> Response + Send + Sync>;

/// In-memory [`Fetch`] implementation for code that depends on a client.
///
/// Every call is recorded. Responses come from the hook when one is set,
/// then from the queue, then fall back to a 200 with an empty body.
pub struct MockClient {
    name: String,
    kind: ClientKind,
    state: Mutex<MockState>,
    hook: Option<Hook>,
}

#[derive(Default)]
struct MockState {
    responses: VecDeque<Response>,
    calls: Vec<Request>,
}

impl MockClient {
    pub fn new(name: impl Into<String>, kind: ClientKind) -> Self {
        Self {
            name: name.into(),
            kind,
            state: Mutex::new(MockState::default()),
            hook: None,
        }
    }

    #[must_use]
    pub fn with_responses(self, responses: impl IntoIterator<Item = Response>) -> Self {
        self.lock().responses.extend(responses);
        self
    }

    #[must_use]
    pub fn with_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn(&CallContext, &Request) -> Response + Send + Sync + 'static,
    {
        self.hook = Some(Box::new(hook));
        self
    }

    /// Queues a response for a later call.
    pub fn push_response(&self, response: Response) {
        self.lock().responses.push_back(response);
    }

    /// Requests received so far, in call order.
    #[must_use]
    pub fn calls(&self) -> Vec<Request> {
        self.lock().calls.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn default_response() -> Response {
        Response::success(200, Headers::new(), Body::Buffered(Bytes::new()), 1)
    }
}

impl Fetch for MockClient {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ClientKind {
        self.kind
    }

    fn fetch(&self, ctx: CallContext, request: Request) -> Delivery {
        let response = match &self.hook {
            Some(hook) => hook(&ctx, &request),
            None => self
                .lock()
                .responses
                .pop_front()
                .unwrap_or_else(Self::default_response),
        };
        self.lock().calls.push(request);
        Delivery::ready(response)
    }
}

impl fmt::Debug for MockClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("MockClient")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("queued", &state.responses.len())
            .field("calls", &state.calls.len())
            .field("hook", &self.hook.is_some())
            .finish()
    }
}
