//! Retrying transport engine shared by every Courier client.
//!
//! # Architecture
//!
//! ```text
//! caller -> Dispatcher::dispatch -> spawned task -> retry loop -> Transport::attempt
//!                                                      |
//!                                                 classify()
//!                                                      |
//!                        Delivery <- Response <- finalize / retry
//! ```
//!
//! - [`Transport`] is the only transport-specific seam: prepare one message,
//!   perform one attempt. Adapters never retry on their own.
//! - [`classify`] maps an [`Attempt`] to an [`Outcome`]; the retry loop turns
//!   the terminal attempt into a [`Response`].
//! - [`Dispatcher`] runs each call on its own Tokio task and hands back a
//!   single-use [`Delivery`] that resolves to exactly one [`Response`].
//! - [`Instruments`] records a call counter, a wall-time histogram and an
//!   attempt-count histogram per client through an injected [`MetricsSink`].
//!
//! # Cancellation
//!
//! A [`CallContext`] carries a cancellation token, an optional deadline and an
//! OpenTelemetry context. Cancellation or an elapsed deadline aborts the
//! in-flight attempt and terminates the call as a transport error.

mod adapter;
mod classify;
mod context;
mod dispatch;
pub mod metrics;
mod mock;
mod propagation;
mod response;
mod retry;
#[cfg(test)]
mod testing;

pub use adapter::{Fetch, Transport};
pub use classify::{Attempt, Outcome, classify, classify_status};
pub use context::CallContext;
pub use dispatch::{Delivery, Dispatcher};
pub use metrics::{InMemoryMetrics, Instruments, MetricsSink, NoopMetrics};
pub use mock::MockClient;
pub use propagation::{Propagator, TraceHeaders};
pub use response::{Body, LazyBody, Response};

pub use courier_types::{
    BoxError, ClientKind, DEFAULT_METHOD, FetchError, Headers, Request, RetryPolicy,
    TransportError,
};
pub use tokio_util::sync::CancellationToken;
