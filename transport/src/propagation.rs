use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use opentelemetry::propagation::{Injector, TextMapPropagator};
use opentelemetry_sdk::propagation::TraceContextPropagator;

use crate::CallContext;

/// Trace headers injected into an outgoing message, one value per key.
pub type TraceHeaders = BTreeMap<String, String>;

/// Text-map propagator injected into each client at construction.
///
/// Defaults to W3C trace context (`traceparent` / `tracestate`).
#[derive(Clone)]
pub struct Propagator(Arc<dyn TextMapPropagator + Send + Sync>);

impl Propagator {
    pub fn new(propagator: impl TextMapPropagator + Send + Sync + 'static) -> Self {
        Self(Arc::new(propagator))
    }

    #[must_use]
    pub fn trace_context() -> Self {
        Self::new(TraceContextPropagator::new())
    }

    #[must_use]
    pub fn inject(&self, ctx: &CallContext) -> TraceHeaders {
        let mut carrier = Carrier::default();
        self.0.inject_context(ctx.trace(), &mut carrier);
        carrier.0
    }
}

impl Default for Propagator {
    fn default() -> Self {
        Self::trace_context()
    }
}

impl fmt::Debug for Propagator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Propagator").field(&self.0).finish()
    }
}

#[derive(Default)]
struct Carrier(TraceHeaders);

impl Injector for Carrier {
    fn set(&mut self, key: &str, value: String) {
        self.0.insert(key.to_string(), value);
    }
}
