//! Named transport clients sharing the Courier retry engine.
//!
//! Each client owns one long-lived transport handle (an HTTP connection
//! pool, a Kafka producer, an AMQP channel) and implements
//! [`courier_transport::Fetch`]. The Kafka and RabbitMQ network backends are
//! behind the `kafka` and `rabbitmq` features; the adapters themselves are
//! generic over [`Produce`] and [`Publish`] and always available.

mod http;
mod kafka;
mod rabbitmq;

pub use http::{
    BodyMode, HttpClient, HttpClientConfig, HttpInitError, HttpMessage, HttpTransport,
    POOL_IDLE_TIMEOUT,
};
#[cfg(feature = "kafka")]
pub use kafka::RdKafkaProducer;
pub use kafka::{
    FLUSH_TIMEOUT, KafkaClient, KafkaClientConfig, KafkaInitError, KafkaMessage, KafkaTransport,
    Produce,
};
#[cfg(feature = "rabbitmq")]
pub use rabbitmq::LapinChannel;
pub use rabbitmq::{
    BrokerMessage, CONTENT_TYPE, Publish, RabbitmqClient, RabbitmqClientConfig,
    RabbitmqInitError, RabbitmqTransport,
};
