//! `courier`: send one request, message or publish through a named client
//! from the configuration file and print the classified outcome.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use clap::Parser;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use courier_clients::HttpClient;
#[cfg(feature = "kafka")]
use courier_clients::{KafkaClient, RdKafkaProducer};
#[cfg(feature = "rabbitmq")]
use courier_clients::{LapinChannel, RabbitmqClient};
use courier_config::CourierConfig;
use courier_transport::{
    CallContext, CancellationToken, ClientKind, Fetch, Headers, InMemoryMetrics, Request,
    Response,
};

const DEFAULT_FILTER: &str = "info";
const BOOTSTRAP_FILTER: &str = "warn";

#[derive(Parser, Debug)]
#[command(name = "courier", version, about)]
struct Cli {
    /// Config file (default: $COURIER_CONFIG, then ~/.courier/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Client family: http, kafka or rabbitmq
    #[arg(value_parser = parse_kind)]
    kind: ClientKind,

    /// Client name as configured under `[<kind>.<name>]`
    client: String,

    /// URL, topic or routing key
    destination: String,

    /// HTTP method (ignored by message clients)
    #[arg(short = 'X', long, default_value = courier_transport::DEFAULT_METHOD)]
    method: String,

    /// Request payload
    #[arg(short, long)]
    data: Option<String>,

    /// Header as `Name: value`; repeat for multiple values
    #[arg(short = 'H', long = "header", value_parser = parse_header)]
    headers: Vec<(String, String)>,

    /// Abort the call after this many milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,
}

fn parse_kind(raw: &str) -> Result<ClientKind, String> {
    ClientKind::parse(raw).ok_or_else(|| {
        let known: Vec<_> = ClientKind::ALL.iter().map(|kind| kind.as_str()).collect();
        format!("unknown client kind `{raw}` (expected one of {})", known.join(", "))
    })
}

fn parse_header(raw: &str) -> Result<(String, String), String> {
    let (name, value) = raw
        .split_once(':')
        .ok_or_else(|| format!("header `{raw}` must be `Name: value`"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("header `{raw}` has an empty name"));
    }
    Ok((name.to_string(), value.trim().to_string()))
}

/// Loads the config under a scoped subscriber, since the global one needs the
/// configured filter and so cannot exist yet.
fn load_config<W>(path: Option<&Path>, filter: EnvFilter, writer: W) -> Result<CourierConfig>
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let bootstrap = fmt().with_writer(writer).with_env_filter(filter).finish();
    let config = tracing::subscriber::with_default(bootstrap, || CourierConfig::load(path))
        .context("failed to load configuration")?;
    Ok(config.unwrap_or_default())
}

fn bootstrap_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(BOOTSTRAP_FILTER))
}

fn init_tracing(configured: Option<&str>) {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(configured.unwrap_or(DEFAULT_FILTER)))
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    // stdout carries the response; logs go to stderr.
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .init();
}

// ============================================================================
// Clients
// ============================================================================

enum AnyClient {
    Http(HttpClient),
    #[cfg(feature = "kafka")]
    Kafka(KafkaClient<RdKafkaProducer>),
    #[cfg(feature = "rabbitmq")]
    Rabbitmq(RabbitmqClient<LapinChannel>),
}

impl AnyClient {
    async fn connect(
        kind: ClientKind,
        name: &str,
        config: &CourierConfig,
        metrics: &InMemoryMetrics,
    ) -> Result<Self> {
        match kind {
            ClientKind::Http => {
                let settings = config.http.get(name).cloned().unwrap_or_default();
                let client = HttpClient::connect(name, &settings, metrics)
                    .with_context(|| format!("failed to initialize http client `{name}`"))?;
                Ok(Self::Http(client))
            }
            ClientKind::Kafka => Self::connect_kafka(name, config, metrics),
            ClientKind::Rabbitmq => Self::connect_rabbitmq(name, config, metrics).await,
        }
    }

    #[cfg(feature = "kafka")]
    fn connect_kafka(name: &str, config: &CourierConfig, metrics: &InMemoryMetrics) -> Result<Self> {
        let settings = config
            .kafka
            .get(name)
            .ok_or_else(|| anyhow!("no [kafka.{name}] section in config"))?;
        let client = KafkaClient::connect(name, settings, metrics)
            .with_context(|| format!("failed to initialize kafka client `{name}`"))?;
        Ok(Self::Kafka(client))
    }

    #[cfg(not(feature = "kafka"))]
    fn connect_kafka(name: &str, config: &CourierConfig, _: &InMemoryMetrics) -> Result<Self> {
        if !config.kafka.contains_key(name) {
            return Err(anyhow!("no [kafka.{name}] section in config"));
        }
        bail!("kafka support is not compiled in; rebuild with `--features kafka`")
    }

    #[cfg(feature = "rabbitmq")]
    async fn connect_rabbitmq(
        name: &str,
        config: &CourierConfig,
        metrics: &InMemoryMetrics,
    ) -> Result<Self> {
        let settings = config
            .rabbitmq
            .get(name)
            .ok_or_else(|| anyhow!("no [rabbitmq.{name}] section in config"))?;
        let client = RabbitmqClient::connect(name, settings, metrics)
            .await
            .with_context(|| format!("failed to initialize rabbitmq client `{name}`"))?;
        Ok(Self::Rabbitmq(client))
    }

    #[cfg(not(feature = "rabbitmq"))]
    #[allow(clippy::unused_async)]
    async fn connect_rabbitmq(
        name: &str,
        config: &CourierConfig,
        _: &InMemoryMetrics,
    ) -> Result<Self> {
        if !config.rabbitmq.contains_key(name) {
            return Err(anyhow!("no [rabbitmq.{name}] section in config"));
        }
        bail!("rabbitmq support is not compiled in; rebuild with `--features rabbitmq`")
    }

    fn as_fetch(&self) -> &dyn Fetch {
        match self {
            Self::Http(client) => client,
            #[cfg(feature = "kafka")]
            Self::Kafka(client) => client,
            #[cfg(feature = "rabbitmq")]
            Self::Rabbitmq(client) => client,
        }
    }

    #[allow(clippy::unused_async)]
    async fn stop(self) -> Result<()> {
        match self {
            Self::Http(client) => client.stop(),
            #[cfg(feature = "kafka")]
            Self::Kafka(client) => client
                .stop()
                .map_err(|err| anyhow!(err))
                .context("failed to flush kafka producer")?,
            #[cfg(feature = "rabbitmq")]
            Self::Rabbitmq(client) => client
                .stop()
                .await
                .map_err(|err| anyhow!(err))
                .context("failed to close rabbitmq channel")?,
        }
        Ok(())
    }
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let config = load_config(cli.config.as_deref(), bootstrap_filter(), std::io::stderr)?;
    init_tracing(config.logging_filter());

    let metrics = InMemoryMetrics::new();
    let client = AnyClient::connect(cli.kind, &cli.client, &config, &metrics).await?;

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Interrupted; cancelling call");
                cancel.cancel();
            }
        }
    });

    let mut ctx = CallContext::current().with_cancellation(cancel);
    if let Some(timeout) = cli.timeout_ms {
        ctx = ctx.with_timeout(Duration::from_millis(timeout));
    }

    let request = build_request(&cli);
    let response = client.as_fetch().fetch(ctx, request).await;
    let code = print_response(response).await?;

    for name in metrics.names() {
        if let Some(value) = metrics.counter_value(&name) {
            tracing::debug!(instrument = %name, value, "Counter");
        } else if let Some(snapshot) = metrics.histogram_snapshot(&name) {
            tracing::debug!(instrument = %name, ?snapshot, "Histogram");
        }
    }

    client.stop().await?;
    Ok(code)
}

fn build_request(cli: &Cli) -> Request {
    let headers: Headers = cli.headers.iter().cloned().collect();
    Request::new(&cli.destination)
        .with_method(&cli.method)
        .with_payload(cli.data.clone().unwrap_or_default())
        .with_headers(headers)
}

async fn print_response(mut response: Response) -> Result<ExitCode> {
    if let Some(err) = response.error() {
        eprintln!(
            "error: {err} (status {}, attempts {})",
            response.code(),
            response.retries()
        );
        return Ok(ExitCode::FAILURE);
    }

    let mut out = std::io::stdout().lock();
    writeln!(
        out,
        "status: {} attempts: {}",
        response.code(),
        response.retries()
    )?;
    for (name, values) in response.headers().iter() {
        for value in values {
            writeln!(out, "{name}: {value}")?;
        }
    }
    drop(out);

    match response.body().await {
        Ok(body) => {
            let mut out = std::io::stdout().lock();
            writeln!(out)?;
            out.write_all(&body)?;
            out.flush()?;
            Ok(ExitCode::SUCCESS)
        }
        Err(courier_transport::FetchError::BodyAbsent) => Ok(ExitCode::SUCCESS),
        Err(err) => {
            eprintln!("error: {err}");
            Ok(ExitCode::FAILURE)
        }
    }
}
