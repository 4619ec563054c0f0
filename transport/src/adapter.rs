use std::future::Future;

use courier_types::{ClientKind, Request, TransportError};

use crate::{Attempt, CallContext, Delivery, TraceHeaders};

/// One transport family, reduced to the two operations the retry loop needs.
///
/// Implementations hold the long-lived connection handle and are shared by
/// every in-flight call, so they must be safe for concurrent use.
pub trait Transport: Send + Sync + 'static {
    /// Outgoing message built once per call and reused by every attempt.
    type Message: Send + Sync + 'static;

    fn kind(&self) -> ClientKind;

    /// Builds the outgoing message, merging `trace` into its headers.
    fn prepare(
        &self,
        request: Request,
        trace: &TraceHeaders,
    ) -> Result<Self::Message, TransportError>;

    /// Performs exactly one attempt. Must not retry internally.
    fn attempt(&self, message: &Self::Message) -> impl Future<Output = Attempt> + Send;
}

/// Client surface shared by every transport client and [`crate::MockClient`].
pub trait Fetch: Send + Sync {
    fn name(&self) -> &str;

    fn kind(&self) -> ClientKind;

    /// Dispatches `request` and returns the handle its single response is delivered on.
    fn fetch(&self, ctx: CallContext, request: Request) -> Delivery;
}
