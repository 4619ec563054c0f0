use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Bytes, BytesMut};
use courier_types::{BoxError, FetchError, Headers};
use futures_util::stream::{self, BoxStream, Stream, StreamExt};

/// Payload of a response as delivered by the transport.
pub enum Body {
    /// The transport produced no body (publish results, failed calls).
    Absent,
    /// Fully read before delivery.
    Buffered(Bytes),
    /// Unread, single-use stream.
    Stream(LazyBody),
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Body::Absent => f.write_str("Absent"),
            Body::Buffered(bytes) => f.debug_tuple("Buffered").field(&bytes.len()).finish(),
            Body::Stream(_) => f.write_str("Stream"),
        }
    }
}

/// Single-use body stream handed to the caller unread.
pub struct LazyBody {
    inner: BoxStream<'static, Result<Bytes, BoxError>>,
}

impl LazyBody {
    pub fn from_stream<S, E>(stream: S) -> Self
    where
        S: Stream<Item = Result<Bytes, E>> + Send + 'static,
        E: Into<BoxError>,
    {
        Self {
            inner: stream.map(|chunk| chunk.map_err(Into::into)).boxed(),
        }
    }

    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        let bytes = bytes.into();
        Self {
            inner: stream::once(async move { Ok(bytes) }).boxed(),
        }
    }

    /// Next chunk, or `None` once the stream is exhausted.
    pub async fn chunk(&mut self) -> Option<Result<Bytes, FetchError>> {
        self.next().await
    }

    /// Reads the remaining stream into one buffer.
    pub async fn bytes(mut self) -> Result<Bytes, FetchError> {
        let mut buffer = BytesMut::new();
        while let Some(chunk) = self.chunk().await {
            buffer.extend_from_slice(&chunk?);
        }
        Ok(buffer.freeze())
    }
}

impl Stream for LazyBody {
    type Item = Result<Bytes, FetchError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner
            .poll_next_unpin(cx)
            .map(|chunk| chunk.map(|result| result.map_err(FetchError::Body)))
    }
}

impl fmt::Debug for LazyBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazyBody").finish_non_exhaustive()
    }
}

enum BodySlot {
    Absent,
    Buffered(Bytes),
    Stream(LazyBody),
    Consumed,
}

impl From<Body> for BodySlot {
    fn from(body: Body) -> Self {
        match body {
            Body::Absent => BodySlot::Absent,
            Body::Buffered(bytes) => BodySlot::Buffered(bytes),
            Body::Stream(stream) => BodySlot::Stream(stream),
        }
    }
}

/// The single classified result of a call.
///
/// `error` is `None` exactly when the terminating attempt succeeded.
/// `retries` counts the attempts actually made and is always at least 1.
pub struct Response {
    body: BodySlot,
    headers: Headers,
    error: Option<FetchError>,
    retries: u32,
    code: u16,
}

impl Response {
    pub fn success(code: u16, headers: Headers, body: Body, retries: u32) -> Self {
        Self {
            body: body.into(),
            headers,
            error: None,
            retries: retries.max(1),
            code,
        }
    }

    pub fn failure(error: FetchError, code: u16, retries: u32) -> Self {
        Self {
            body: BodySlot::Absent,
            headers: Headers::new(),
            error: Some(error),
            retries: retries.max(1),
            code,
        }
    }

    /// Materialized body bytes.
    ///
    /// A buffered body can be read repeatedly. A stream-backed body is read
    /// fully on the first call; later calls return [`FetchError::BodyConsumed`].
    pub async fn body(&mut self) -> Result<Bytes, FetchError> {
        match std::mem::replace(&mut self.body, BodySlot::Consumed) {
            BodySlot::Buffered(bytes) => {
                self.body = BodySlot::Buffered(bytes.clone());
                Ok(bytes)
            }
            BodySlot::Stream(stream) => stream.bytes().await,
            BodySlot::Absent => {
                self.body = BodySlot::Absent;
                Err(FetchError::BodyAbsent)
            }
            BodySlot::Consumed => Err(FetchError::BodyConsumed),
        }
    }

    /// Takes the unread body stream, if the transport delivered one.
    ///
    /// Returns `None` for buffered or absent bodies, and after the stream was
    /// taken or read.
    pub fn lazy_body(&mut self) -> Option<LazyBody> {
        match std::mem::replace(&mut self.body, BodySlot::Consumed) {
            BodySlot::Stream(stream) => Some(stream),
            other => {
                self.body = other;
                None
            }
        }
    }

    #[must_use]
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    #[must_use]
    pub fn error(&self) -> Option<&FetchError> {
        self.error.as_ref()
    }

    #[must_use]
    pub fn retries(&self) -> u32 {
        self.retries
    }

    #[must_use]
    pub fn code(&self) -> u16 {
        self.code
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Converts a failed response into its error.
    pub fn into_result(self) -> Result<Self, FetchError> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self),
        }
    }
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let body = match &self.body {
            BodySlot::Absent => "absent",
            BodySlot::Buffered(_) => "buffered",
            BodySlot::Stream(_) => "stream",
            BodySlot::Consumed => "consumed",
        };
        f.debug_struct("Response")
            .field("code", &self.code)
            .field("retries", &self.retries)
            .field("error", &self.error)
            .field("headers", &self.headers)
            .field("body", &body)
            .finish()
    }
}
