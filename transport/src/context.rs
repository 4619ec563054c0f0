use std::future::Future;
use std::time::Duration;

use courier_types::TransportError;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::Attempt;

/// Per-call cancellation, deadline and trace context.
///
/// Cheap to clone; clones share the cancellation token.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    cancel: CancellationToken,
    deadline: Option<Instant>,
    trace: opentelemetry::Context,
}

impl CallContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses the current OpenTelemetry context as the trace parent.
    #[must_use]
    pub fn current() -> Self {
        Self::new().with_trace(opentelemetry::Context::current())
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn with_trace(mut self, trace: opentelemetry::Context) -> Self {
        self.trace = trace;
        self
    }

    #[must_use]
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    #[must_use]
    pub fn trace(&self) -> &opentelemetry::Context {
        &self.trace
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Runs one attempt, aborting it if the call is cancelled or its deadline passes.
    pub(crate) async fn guard<F>(&self, attempt: F) -> Attempt
    where
        F: Future<Output = Attempt>,
    {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Attempt::Failed(TransportError::Cancelled),
            () = sleep_until(self.deadline) => Attempt::Failed(TransportError::DeadlineExceeded),
            result = attempt => result,
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
