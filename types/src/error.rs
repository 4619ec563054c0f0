use thiserror::Error;

/// Boxed error from a transport backend.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Failure before any status or publish result was obtained.
///
/// Always terminal: the retry loop does not retry transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("call cancelled")]
    Cancelled,
    #[error("deadline exceeded")]
    DeadlineExceeded,
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error(transparent)]
    Io(BoxError),
}

impl TransportError {
    pub fn io(err: impl Into<BoxError>) -> Self {
        Self::Io(err.into())
    }
}

/// Terminal outcome of a call that did not succeed, or a body read failure.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// The destination kept answering with a retryable status (5xx or 499).
    #[error("max retry count exceeded")]
    MaxRetriesExceeded { status: u16 },
    #[error("request status code {0}")]
    UnexpectedStatus(u16),
    /// Every permitted publish attempt was rejected; `source` is the last rejection.
    #[error("request to {destination} failed")]
    Publish {
        destination: String,
        #[source]
        source: BoxError,
    },
    #[error("body already consumed")]
    BodyConsumed,
    #[error("response has no body")]
    BodyAbsent,
    #[error("failed to read body: {0}")]
    Body(BoxError),
    /// The dispatch task panicked before producing a response.
    #[error("dispatch aborted: {0}")]
    Aborted(String),
}

impl FetchError {
    /// Status code associated with the failure, if the transport produced one.
    #[must_use]
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::MaxRetriesExceeded { status } | Self::UnexpectedStatus(status) => Some(*status),
            _ => None,
        }
    }

    #[must_use]
    pub const fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(
            self,
            Self::Transport(TransportError::Cancelled | TransportError::DeadlineExceeded)
        )
    }
}
