//! HTTP client over a shared `reqwest` connection pool.

use std::time::Duration;

use bytes::Bytes;
use courier_transport::{
    Attempt, Body, CallContext, ClientKind, Delivery, Dispatcher, Fetch, Headers, LazyBody,
    MetricsSink, Propagator, Request, RetryPolicy, TraceHeaders, Transport, TransportError,
};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, Url};
use serde::{Deserialize, Serialize};

/// How a successful response body is handed to the caller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BodyMode {
    /// Deliver an unread stream; the caller reads it at most once.
    #[default]
    Lazy,
    /// Read the whole body before delivery.
    Buffered,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HttpClientConfig {
    pub retry_count: u32,
    /// Whole-request timeout per attempt.
    pub timeout_ms: Option<u64>,
    pub connect_timeout_ms: Option<u64>,
    pub body: BodyMode,
}

/// Idle pooled connections are closed after this long without use.
pub const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

#[derive(Debug, thiserror::Error)]
pub enum HttpInitError {
    #[error("failed to build HTTP client: {0}")]
    Build(#[from] reqwest::Error),
}

// ============================================================================
// Transport
// ============================================================================

/// Request resolved once per call and replayed on every attempt.
#[derive(Debug)]
pub struct HttpMessage {
    method: Method,
    url: Url,
    payload: Bytes,
    headers: HeaderMap,
}

impl HttpMessage {
    #[must_use]
    pub fn method(&self) -> &Method {
        &self.method
    }

    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }

    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }
}

#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    body: BodyMode,
}

impl HttpTransport {
    #[must_use]
    pub fn new(client: reqwest::Client, body: BodyMode) -> Self {
        Self { client, body }
    }
}

impl Transport for HttpTransport {
    type Message = HttpMessage;

    fn kind(&self) -> ClientKind {
        ClientKind::Http
    }

    fn prepare(
        &self,
        request: Request,
        trace: &TraceHeaders,
    ) -> Result<Self::Message, TransportError> {
        let (method, destination, payload, headers) = request.into_parts();

        let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes())
            .map_err(|_| TransportError::InvalidRequest(format!("invalid method `{method}`")))?;
        let url = Url::parse(&destination).map_err(|err| {
            TransportError::InvalidRequest(format!("invalid url `{destination}`: {err}"))
        })?;

        let mut header_map = HeaderMap::new();
        for (name, value) in headers.flatten() {
            let (name, value) = header_pair(name, value)?;
            header_map.append(name, value);
        }
        for (name, value) in trace {
            let (name, value) = header_pair(name, value)?;
            header_map.insert(name, value);
        }

        Ok(HttpMessage {
            method,
            url,
            payload: Bytes::from(payload),
            headers: header_map,
        })
    }

    async fn attempt(&self, message: &Self::Message) -> Attempt {
        let result = self
            .client
            .request(message.method.clone(), message.url.clone())
            .headers(message.headers.clone())
            .body(message.payload.clone())
            .send()
            .await;

        let response = match result {
            Ok(response) => response,
            Err(err) => return Attempt::Failed(request_error(err)),
        };

        let status = response.status();
        let code = status.as_u16();
        if !status.is_success() {
            return Attempt::Status {
                code,
                headers: Headers::new(),
                body: Body::Absent,
            };
        }

        let headers = response_headers(response.headers());
        let body = match self.body {
            BodyMode::Lazy => Body::Stream(LazyBody::from_stream(response.bytes_stream())),
            BodyMode::Buffered => match response.bytes().await {
                Ok(bytes) => Body::Buffered(bytes),
                Err(err) => return Attempt::Failed(request_error(err)),
            },
        };

        Attempt::Status {
            code,
            headers,
            body,
        }
    }
}

fn header_pair(name: &str, value: &str) -> Result<(HeaderName, HeaderValue), TransportError> {
    let header_name = HeaderName::from_bytes(name.as_bytes())
        .map_err(|_| TransportError::InvalidRequest(format!("invalid header name `{name}`")))?;
    let header_value = HeaderValue::from_str(value).map_err(|_| {
        TransportError::InvalidRequest(format!("invalid value for header `{name}`"))
    })?;
    Ok((header_name, header_value))
}

fn response_headers(map: &HeaderMap) -> Headers {
    let mut headers = Headers::new();
    for (name, value) in map {
        headers.append(
            name.as_str(),
            String::from_utf8_lossy(value.as_bytes()).into_owned(),
        );
    }
    headers
}

fn request_error(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::DeadlineExceeded
    } else {
        TransportError::io(err)
    }
}

// ============================================================================
// Client
// ============================================================================

/// Named HTTP client. Cheap to clone; clones share the connection pool
/// and instruments.
#[derive(Clone)]
pub struct HttpClient {
    dispatcher: Dispatcher<HttpTransport>,
}

impl HttpClient {
    pub fn connect(
        name: impl Into<String>,
        config: &HttpClientConfig,
        metrics: &dyn MetricsSink,
    ) -> Result<Self, HttpInitError> {
        Self::connect_with(name, config, metrics, Propagator::default())
    }

    pub fn connect_with(
        name: impl Into<String>,
        config: &HttpClientConfig,
        metrics: &dyn MetricsSink,
        propagator: Propagator,
    ) -> Result<Self, HttpInitError> {
        let mut builder = reqwest::Client::builder().pool_idle_timeout(POOL_IDLE_TIMEOUT);
        if let Some(timeout) = config.timeout_ms {
            builder = builder.timeout(Duration::from_millis(timeout));
        }
        if let Some(timeout) = config.connect_timeout_ms {
            builder = builder.connect_timeout(Duration::from_millis(timeout));
        }
        let client = builder.build()?;

        let name = name.into();
        tracing::info!(
            client = %name,
            retry_count = config.retry_count,
            body = ?config.body,
            "HTTP client initialized"
        );

        Ok(Self {
            dispatcher: Dispatcher::new(
                name,
                HttpTransport::new(client, config.body),
                RetryPolicy::new(config.retry_count),
                metrics,
                propagator,
            ),
        })
    }

    /// Issues `method` against `url`, retrying per the client's policy.
    pub fn send(
        &self,
        ctx: CallContext,
        method: &str,
        url: &str,
        data: impl Into<Vec<u8>>,
        headers: Headers,
    ) -> Delivery {
        let request = Request::new(url)
            .with_method(method)
            .with_payload(data)
            .with_headers(headers);
        self.dispatcher.dispatch(ctx, request)
    }

    #[must_use]
    pub fn policy(&self) -> RetryPolicy {
        self.dispatcher.policy()
    }

    /// Drops this handle.
    ///
    /// The connection pool is shared with every clone and in-flight call, so
    /// it stays open until the last of them is gone. Idle connections are
    /// closed after [`POOL_IDLE_TIMEOUT`] regardless.
    pub fn stop(self) {
        tracing::info!(client = %self.dispatcher.name(), "HTTP client stopped");
    }
}

impl Fetch for HttpClient {
    fn name(&self) -> &str {
        self.dispatcher.name()
    }

    fn kind(&self) -> ClientKind {
        ClientKind::Http
    }

    fn fetch(&self, ctx: CallContext, request: Request) -> Delivery {
        self.dispatcher.dispatch(ctx, request)
    }
}
