use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::task::{Context, Poll};
use std::time::Instant;

use courier_types::{ClientKind, FetchError, Request, RetryPolicy};
use futures_util::FutureExt;
use tokio::sync::oneshot;

use crate::retry::{self, CallInfo};
use crate::{CallContext, Fetch, Instruments, MetricsSink, Propagator, Response, Transport};

/// Runs calls for one client: one Tokio task per call, one response per call.
///
/// The transport handle and instruments are shared by every in-flight call.
pub struct Dispatcher<T: Transport> {
    shared: Arc<Shared<T>>,
}

struct Shared<T> {
    name: String,
    policy: RetryPolicy,
    transport: T,
    instruments: Instruments,
    propagator: Propagator,
}

impl<T: Transport> Dispatcher<T> {
    /// Registers the client's instruments on `metrics` and takes ownership of `transport`.
    pub fn new(
        name: impl Into<String>,
        transport: T,
        policy: RetryPolicy,
        metrics: &dyn MetricsSink,
        propagator: Propagator,
    ) -> Self {
        let name = name.into();
        let instruments = Instruments::register(metrics, transport.kind(), &name);
        Self {
            shared: Arc::new(Shared {
                name,
                policy,
                transport,
                instruments,
                propagator,
            }),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    #[must_use]
    pub fn policy(&self) -> RetryPolicy {
        self.shared.policy
    }

    #[must_use]
    pub fn transport(&self) -> &T {
        &self.shared.transport
    }

    /// Starts the call on its own task and returns the handle its response arrives on.
    ///
    /// Must be called from within a Tokio runtime; otherwise the returned
    /// handle resolves immediately to an aborted response.
    pub fn dispatch(&self, ctx: CallContext, request: Request) -> Delivery {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return Delivery::ready(Response::failure(
                FetchError::Aborted("no Tokio runtime available".to_string()),
                0,
                1,
            ));
        };

        let shared = Arc::clone(&self.shared);
        let (tx, rx) = oneshot::channel();

        runtime.spawn(async move {
            let response = shared.call(ctx, request).await;
            // Receiver may be gone; the call is finished either way.
            let _ = tx.send(response);
        });

        Delivery { rx }
    }
}

impl<T: Transport> Shared<T> {
    async fn call(&self, ctx: CallContext, request: Request) -> Response {
        let started_at = Instant::now();
        self.instruments.record_call();

        let destination = request.destination().to_string();
        let started = AtomicU32::new(0);
        let run = AssertUnwindSafe(self.run(&ctx, request, &destination, &started))
            .catch_unwind()
            .await;

        let response = run.unwrap_or_else(|panic| {
            let reason = panic_message(panic.as_ref());
            tracing::error!(client = %self.name, %destination, %reason, "Dispatch task panicked");
            Response::failure(FetchError::Aborted(reason), 0, started.load(Ordering::Relaxed))
        });

        self.instruments
            .record_time_ms(u64::try_from(started_at.elapsed().as_millis()).unwrap_or(u64::MAX));
        self.instruments.record_retries(response.retries());

        if let Some(err) = response.error() {
            tracing::warn!(
                client = %self.name,
                kind = %self.transport.kind(),
                %destination,
                attempts = response.retries(),
                code = response.code(),
                error = %err,
                "Call failed"
            );
        }

        response
    }

    async fn run(
        &self,
        ctx: &CallContext,
        request: Request,
        destination: &str,
        started: &AtomicU32,
    ) -> Response {
        let trace = self.propagator.inject(ctx);
        let message = match self.transport.prepare(request, &trace) {
            Ok(message) => message,
            Err(err) => {
                started.store(1, Ordering::Relaxed);
                return Response::failure(err.into(), 0, 1);
            }
        };

        let info = CallInfo {
            client: &self.name,
            destination,
        };
        retry::run(&self.transport, self.policy, ctx, &message, &info, started).await
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

impl<T: Transport> Fetch for Dispatcher<T> {
    fn name(&self) -> &str {
        &self.shared.name
    }

    fn kind(&self) -> ClientKind {
        self.shared.transport.kind()
    }

    fn fetch(&self, ctx: CallContext, request: Request) -> Delivery {
        self.dispatch(ctx, request)
    }
}

impl<T: Transport> Clone for Dispatcher<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

/// Single-use handle that resolves to the call's one [`Response`].
///
/// Awaiting consumes the handle, so the response can only be received once.
#[must_use = "a delivery does nothing unless awaited or received"]
#[derive(Debug)]
pub struct Delivery {
    rx: oneshot::Receiver<Response>,
}

impl Delivery {
    /// A delivery whose response is already available.
    pub fn ready(response: Response) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(response);
        Self { rx }
    }

    /// Blocks the current thread until the response arrives.
    ///
    /// Must not be called from within an async context.
    pub fn blocking_recv(self) -> Response {
        self.rx.blocking_recv().unwrap_or_else(|_| lost())
    }
}

impl Future for Delivery {
    type Output = Response;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|result| result.unwrap_or_else(|_| lost()))
    }
}

fn lost() -> Response {
    Response::failure(
        FetchError::Aborted("response channel closed before delivery".to_string()),
        0,
        1,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::InMemoryMetrics;
    use crate::testing::{Script, ScriptedTransport, Step};
    use courier_types::TransportError;
    use opentelemetry::trace::{
        SpanContext, SpanId, TraceContextExt, TraceFlags, TraceId, TraceState,
    };
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    fn dispatcher(
        retry_count: u32,
        steps: Vec<Step>,
        metrics: &InMemoryMetrics,
    ) -> Dispatcher<ScriptedTransport> {
        Dispatcher::new(
            "orders-api",
            ScriptedTransport::new(Script::new(steps)),
            RetryPolicy::new(retry_count),
            metrics,
            Propagator::default(),
        )
    }

    #[tokio::test]
    async fn delivers_exactly_one_response() {
        let metrics = InMemoryMetrics::new();
        let client = dispatcher(2, vec![Step::Status(200)], &metrics);

        let mut response = client
            .dispatch(
                CallContext::new(),
                Request::new("http://localhost/").with_payload("{}"),
            )
            .await;

        assert!(response.is_success());
        assert_eq!(response.retries(), 1);
        assert_eq!(response.body().await.unwrap(), "{}".as_bytes());
    }

    #[tokio::test]
    async fn records_instruments_per_call() {
        let metrics = InMemoryMetrics::new();
        let client = dispatcher(
            2,
            vec![Step::Status(503), Step::Status(503), Step::Status(200)],
            &metrics,
        );

        let response = client
            .dispatch(CallContext::new(), Request::new("http://localhost/"))
            .await;
        assert!(response.is_success());

        assert_eq!(
            metrics.counter_value("client_http.orders-api.count"),
            Some(1)
        );
        let retries = metrics
            .histogram_snapshot("client_http.orders-api.retry")
            .unwrap();
        assert_eq!((retries.count, retries.sum), (1, 3));
        let time = metrics
            .histogram_snapshot("client_http.orders-api.time")
            .unwrap();
        assert_eq!(time.count, 1);
    }

    #[tokio::test]
    async fn panic_becomes_aborted_response() {
        let metrics = InMemoryMetrics::new();
        let client = dispatcher(3, vec![Step::Status(500), Step::Panic], &metrics);

        let response = client
            .dispatch(CallContext::new(), Request::new("http://localhost/"))
            .await;

        match response.error() {
            Some(FetchError::Aborted(reason)) => assert_eq!(reason, "scripted panic"),
            other => panic!("expected Aborted, got {other:?}"),
        }
        assert_eq!(response.retries(), 2);
        assert_eq!(
            metrics
                .histogram_snapshot("client_http.orders-api.retry")
                .map(|snapshot| snapshot.sum),
            Some(2)
        );
    }

    #[tokio::test]
    async fn prepare_failure_counts_as_one_attempt() {
        let metrics = InMemoryMetrics::new();
        let client = dispatcher(3, vec![Step::Status(200)], &metrics);

        let response = client.dispatch(CallContext::new(), Request::new("")).await;

        assert_eq!(response.retries(), 1);
        assert!(matches!(
            response.error(),
            Some(FetchError::Transport(TransportError::InvalidRequest(_)))
        ));
        assert_eq!(client.transport().calls(), 0);
    }

    #[tokio::test]
    async fn cancellation_surfaces_as_transport_error() {
        let metrics = InMemoryMetrics::new();
        let client = dispatcher(5, vec![Step::Hang], &metrics);
        let token = CancellationToken::new();

        let delivery = client.dispatch(
            CallContext::new().with_cancellation(token.clone()),
            Request::new("http://localhost/"),
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
        token.cancel();
        let response = delivery.await;

        assert!(response.error().is_some_and(FetchError::is_cancelled));
        assert_eq!(response.retries(), 1);
        assert_eq!(client.transport().calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_aborts_hanging_attempt() {
        let metrics = InMemoryMetrics::new();
        let client = dispatcher(5, vec![Step::Hang], &metrics);

        let response = client
            .dispatch(
                CallContext::new().with_timeout(Duration::from_secs(1)),
                Request::new("http://localhost/"),
            )
            .await;

        assert!(matches!(
            response.error(),
            Some(FetchError::Transport(TransportError::DeadlineExceeded))
        ));
    }

    #[tokio::test]
    async fn concurrent_calls_each_get_their_own_response() {
        let metrics = InMemoryMetrics::new();
        let client = dispatcher(0, vec![Step::Status(200); 16], &metrics);

        let deliveries: Vec<_> = (0..16)
            .map(|i| {
                client.dispatch(
                    CallContext::new(),
                    Request::new("http://localhost/").with_payload(format!("{i}")),
                )
            })
            .collect();

        let mut bodies = Vec::new();
        for delivery in deliveries {
            let mut response = delivery.await;
            assert!(response.is_success());
            bodies.push(String::from_utf8(response.body().await.unwrap().to_vec()).unwrap());
        }
        bodies.sort_by_key(|body| body.parse::<u32>().unwrap());

        let expected: Vec<String> = (0..16).map(|i| i.to_string()).collect();
        assert_eq!(bodies, expected);
        assert_eq!(
            metrics.counter_value("client_http.orders-api.count"),
            Some(16)
        );
    }

    #[tokio::test]
    async fn trace_context_is_passed_to_prepare() {
        let metrics = InMemoryMetrics::new();
        let client = dispatcher(0, vec![Step::Status(200)], &metrics);
        let span = SpanContext::new(
            TraceId::from_hex("0af7651916cd43dd8448eb211c80319c").unwrap(),
            SpanId::from_hex("b7ad6b7169203331").unwrap(),
            TraceFlags::SAMPLED,
            true,
            TraceState::default(),
        );
        let ctx = CallContext::new()
            .with_trace(opentelemetry::Context::new().with_remote_span_context(span));

        let response = client.dispatch(ctx, Request::new("http://localhost/")).await;
        assert!(response.is_success());

        let prepared = client.transport().prepared();
        assert_eq!(
            prepared[0].get("traceparent").map(String::as_str),
            Some("00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01")
        );
    }

    #[test]
    fn dispatch_without_runtime_resolves_to_aborted() {
        let metrics = InMemoryMetrics::new();
        let client = dispatcher(0, vec![Step::Status(200)], &metrics);

        let response = client
            .dispatch(CallContext::new(), Request::new("http://localhost/"))
            .blocking_recv();

        assert!(matches!(response.error(), Some(FetchError::Aborted(_))));
    }

    #[test]
    fn blocking_recv_waits_for_spawned_call() {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
            .unwrap();
        let metrics = InMemoryMetrics::new();
        let client = dispatcher(0, vec![Step::Status(201)], &metrics);

        let delivery = {
            let _guard = runtime.enter();
            client.dispatch(CallContext::new(), Request::new("http://localhost/"))
        };
        let response = delivery.blocking_recv();

        assert!(response.is_success());
        assert_eq!(response.code(), 201);
    }
}
