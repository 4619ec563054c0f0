//! Kafka producer client.
//!
//! A call succeeds once the producer accepts the message into its queue.
//! Broker acknowledgement is not awaited; [`KafkaClient::stop`] flushes
//! whatever is still queued.

use std::fmt;
use std::time::Duration;

use courier_transport::{
    Attempt, BoxError, CallContext, ClientKind, Delivery, Dispatcher, Fetch, Headers,
    MetricsSink, Propagator, Request, RetryPolicy, TraceHeaders, Transport, TransportError,
};
use serde::{Deserialize, Serialize};

/// Upper bound on how long `stop` waits for queued messages.
pub const FLUSH_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct KafkaClientConfig {
    /// Comma-separated bootstrap servers.
    pub hosts: String,
    pub username: String,
    pub password: String,
    pub security_protocol: String,
    pub sasl_mechanisms: String,
    pub retry_count: u32,
}

impl KafkaClientConfig {
    pub fn validate(&self) -> Result<(), KafkaInitError> {
        if self.hosts.trim().is_empty() {
            return Err(KafkaInitError::MissingHosts);
        }
        Ok(())
    }

    /// librdkafka properties for this configuration.
    ///
    /// SASL properties are only emitted when a username is set.
    #[must_use]
    pub fn producer_settings(&self) -> Vec<(&'static str, String)> {
        let mut settings = vec![("bootstrap.servers", self.hosts.clone())];
        if !self.username.is_empty() {
            if !self.security_protocol.is_empty() {
                settings.push(("security.protocol", self.security_protocol.clone()));
            }
            if !self.sasl_mechanisms.is_empty() {
                settings.push(("sasl.mechanisms", self.sasl_mechanisms.clone()));
            }
            settings.push(("sasl.username", self.username.clone()));
            settings.push(("sasl.password", self.password.clone()));
        }
        settings
    }
}

impl fmt::Debug for KafkaClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KafkaClientConfig")
            .field("hosts", &self.hosts)
            .field("username", &self.username)
            .field("password", &if self.password.is_empty() { "" } else { "<redacted>" })
            .field("security_protocol", &self.security_protocol)
            .field("sasl_mechanisms", &self.sasl_mechanisms)
            .field("retry_count", &self.retry_count)
            .finish()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum KafkaInitError {
    #[error("hosts is required")]
    MissingHosts,
    #[error("failed to create producer: {0}")]
    Producer(#[source] BoxError),
}

// ============================================================================
// Transport
// ============================================================================

/// One record as handed to the producer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KafkaMessage {
    topic: String,
    payload: Vec<u8>,
    headers: Vec<(String, Vec<u8>)>,
}

impl KafkaMessage {
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Record headers, one entry per value.
    #[must_use]
    pub fn headers(&self) -> &[(String, Vec<u8>)] {
        &self.headers
    }
}

/// Enqueue side of a Kafka producer.
pub trait Produce: Send + Sync + 'static {
    /// Hands one record to the producer queue without waiting for delivery.
    fn produce(&self, message: &KafkaMessage) -> Result<(), BoxError>;

    fn flush(&self, timeout: Duration) -> Result<(), BoxError>;
}

#[derive(Debug)]
pub struct KafkaTransport<P> {
    producer: P,
}

impl<P: Produce> KafkaTransport<P> {
    pub fn new(producer: P) -> Self {
        Self { producer }
    }

    pub fn producer(&self) -> &P {
        &self.producer
    }
}

impl<P: Produce> Transport for KafkaTransport<P> {
    type Message = KafkaMessage;

    fn kind(&self) -> ClientKind {
        ClientKind::Kafka
    }

    fn prepare(
        &self,
        request: Request,
        trace: &TraceHeaders,
    ) -> Result<Self::Message, TransportError> {
        let (_, topic, payload, headers) = request.into_parts();
        if topic.is_empty() {
            return Err(TransportError::InvalidRequest("topic is required".to_string()));
        }

        let headers = headers
            .flatten()
            .map(|(name, value)| (name.to_string(), value.as_bytes().to_vec()))
            .chain(
                trace
                    .iter()
                    .map(|(name, value)| (name.clone(), value.as_bytes().to_vec())),
            )
            .collect();

        Ok(KafkaMessage {
            topic,
            payload,
            headers,
        })
    }

    async fn attempt(&self, message: &Self::Message) -> Attempt {
        match self.producer.produce(message) {
            Ok(()) => Attempt::Published,
            Err(err) => Attempt::Rejected(err),
        }
    }
}

#[cfg(feature = "kafka")]
mod backend {
    use std::time::Duration;

    use courier_transport::BoxError;
    use rdkafka::config::ClientConfig;
    use rdkafka::message::{Header, OwnedHeaders};
    use rdkafka::producer::{BaseRecord, DefaultProducerContext, Producer, ThreadedProducer};
    use rdkafka::util::Timeout;

    use super::{KafkaClientConfig, KafkaInitError, KafkaMessage, Produce};

    /// librdkafka producer with its own polling thread.
    pub struct RdKafkaProducer {
        inner: ThreadedProducer<DefaultProducerContext>,
    }

    impl RdKafkaProducer {
        pub fn create(config: &KafkaClientConfig) -> Result<Self, KafkaInitError> {
            config.validate()?;

            let mut client_config = ClientConfig::new();
            for (key, value) in config.producer_settings() {
                client_config.set(key, value);
            }
            let inner: ThreadedProducer<DefaultProducerContext> = client_config
                .create()
                .map_err(|err| KafkaInitError::Producer(err.into()))?;

            Ok(Self { inner })
        }
    }

    impl Produce for RdKafkaProducer {
        fn produce(&self, message: &KafkaMessage) -> Result<(), BoxError> {
            let mut headers = OwnedHeaders::new_with_capacity(message.headers.len());
            for (key, value) in &message.headers {
                headers = headers.insert(Header {
                    key,
                    value: Some(value.as_slice()),
                });
            }

            let record = BaseRecord::<(), [u8]>::to(&message.topic)
                .payload(&message.payload)
                .headers(headers);
            self.inner.send(record).map_err(|(err, _)| err.into())
        }

        fn flush(&self, timeout: Duration) -> Result<(), BoxError> {
            self.inner.flush(Timeout::After(timeout)).map_err(Into::into)
        }
    }
}

#[cfg(feature = "kafka")]
pub use backend::RdKafkaProducer;

// ============================================================================
// Client
// ============================================================================

pub struct KafkaClient<P: Produce> {
    dispatcher: Dispatcher<KafkaTransport<P>>,
}

#[cfg(feature = "kafka")]
impl KafkaClient<RdKafkaProducer> {
    pub fn connect(
        name: impl Into<String>,
        config: &KafkaClientConfig,
        metrics: &dyn MetricsSink,
    ) -> Result<Self, KafkaInitError> {
        let producer = RdKafkaProducer::create(config)?;
        Ok(Self::with_producer(
            name,
            producer,
            RetryPolicy::new(config.retry_count),
            metrics,
            Propagator::default(),
        ))
    }
}

impl<P: Produce> KafkaClient<P> {
    pub fn with_producer(
        name: impl Into<String>,
        producer: P,
        policy: RetryPolicy,
        metrics: &dyn MetricsSink,
        propagator: Propagator,
    ) -> Self {
        let name = name.into();
        tracing::info!(client = %name, retry_count = policy.retry_count(), "Kafka client initialized");
        Self {
            dispatcher: Dispatcher::new(
                name,
                KafkaTransport::new(producer),
                policy,
                metrics,
                propagator,
            ),
        }
    }

    /// Produces `data` to `topic`.
    pub fn publish(
        &self,
        ctx: CallContext,
        topic: &str,
        data: impl Into<Vec<u8>>,
        headers: Headers,
    ) -> Delivery {
        let request = Request::new(topic).with_payload(data).with_headers(headers);
        self.dispatcher.dispatch(ctx, request)
    }

    pub fn producer(&self) -> &P {
        self.dispatcher.transport().producer()
    }

    /// Flushes queued messages, waiting at most [`FLUSH_TIMEOUT`].
    pub fn stop(self) -> Result<(), BoxError> {
        let result = self.producer().flush(FLUSH_TIMEOUT);
        match &result {
            Ok(()) => tracing::info!(client = %self.dispatcher.name(), "Kafka client stopped"),
            Err(err) => tracing::warn!(
                client = %self.dispatcher.name(),
                error = %err,
                "Kafka client stopped with unflushed messages"
            ),
        }
        result
    }
}

impl<P: Produce> Fetch for KafkaClient<P> {
    fn name(&self) -> &str {
        self.dispatcher.name()
    }

    fn kind(&self) -> ClientKind {
        ClientKind::Kafka
    }

    fn fetch(&self, ctx: CallContext, request: Request) -> Delivery {
        self.dispatcher.dispatch(ctx, request)
    }
}
