//! # Telemetry
//!
//! Console logging is always on. OpenTelemetry export is opt-in through cargo
//! features:
//!
//! - `tracing`: export spans (on by default).
//! - `metrics`: export the counters and histograms defined at the bottom of
//!   this module. Without it every `increment_*`/`record_*` function is a
//!   no-op.
//! - `honeycomb`: OTLP/gRPC exporter. Reads `HONEYCOMB_API_KEY`,
//!   `HONEYCOMB_DATASET`, `HONEYCOMB_ENDPOINT` and `HONEYCOMB_COMPRESSION`.
//! - `stdout`: print exported spans and metrics to stdout.
//!
//! Exporters need at least one of `tracing` or `metrics`; both exporters may
//! be enabled together.
//!
//! ```bash
//! cargo run -p courier-server --features metrics,honeycomb
//! cargo run -p courier-server --features tracing,metrics,stdout
//! ```
//!
//! Events emitted inside a span become span events in the backend; events
//! outside any span only reach the console.

#[cfg(all(
    feature = "honeycomb",
    not(any(feature = "tracing", feature = "metrics"))
))]
compile_error!(
    "The 'honeycomb' feature requires at least one of 'tracing' or 'metrics' to be enabled."
);

#[cfg(all(feature = "stdout", not(any(feature = "tracing", feature = "metrics"))))]
compile_error!(
    "The 'stdout' feature requires at least one of 'tracing' or 'metrics' to be enabled."
);

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[cfg(all(feature = "honeycomb", any(feature = "metrics", feature = "tracing")))]
use opentelemetry_otlp::{Compression, Protocol, WithExportConfig, WithTonicConfig};
#[cfg(all(feature = "honeycomb", feature = "metrics"))]
use opentelemetry_sdk::metrics::Temporality;
#[cfg(feature = "honeycomb")]
use tonic::metadata::MetadataMap;
#[cfg(all(feature = "honeycomb", any(feature = "metrics", feature = "tracing")))]
use tonic::transport::ClientTlsConfig;

#[cfg(feature = "metrics")]
use opentelemetry::metrics::{Counter, Histogram, Meter};
#[cfg(feature = "metrics")]
use opentelemetry_sdk::metrics as sdkmetrics;
#[cfg(feature = "metrics")]
use std::sync::OnceLock;

#[cfg(any(feature = "metrics", feature = "tracing"))]
use opentelemetry::{InstrumentationScope, KeyValue};
#[cfg(any(feature = "metrics", feature = "tracing"))]
use opentelemetry_sdk::Resource;
#[cfg(any(feature = "metrics", feature = "tracing"))]
use opentelemetry_semantic_conventions as semvcns;

#[cfg(feature = "tracing")]
use opentelemetry::trace::TracerProvider;
#[cfg(feature = "tracing")]
use opentelemetry_sdk::propagation::TraceContextPropagator;
#[cfg(feature = "tracing")]
use opentelemetry_sdk::trace as sdktrace;

const SERVICE_NAME: &str = "courier";

/// Providers that must be flushed and shut down on exit.
pub struct TelemetryProviders {
    #[cfg(feature = "tracing")]
    pub tracer_provider: sdktrace::SdkTracerProvider,
    #[cfg(feature = "metrics")]
    pub meter_provider: sdkmetrics::SdkMeterProvider,
}

impl TelemetryProviders {
    /// Flushes and shuts down every provider, reporting failures on stderr
    /// since the subscriber may already be gone.
    pub fn shutdown(self) {
        #[cfg(feature = "tracing")]
        {
            if let Err(err) = self.tracer_provider.force_flush() {
                eprintln!("Error flushing traces: {err:#?}");
            }
            if let Err(err) = self.tracer_provider.shutdown() {
                eprintln!("Error shutting down tracer: {err:#?}");
            }
        }

        #[cfg(feature = "metrics")]
        {
            if let Err(err) = self.meter_provider.force_flush() {
                eprintln!("Error flushing metrics: {err:#?}");
            }
            if let Err(err) = self.meter_provider.shutdown() {
                eprintln!("Error shutting down meter: {err:#?}");
            }
        }
    }
}

/// Installs the global subscriber and any enabled exporters.
pub fn init_telemetry() -> anyhow::Result<TelemetryProviders> {
    #[cfg(feature = "tracing")]
    opentelemetry::global::set_text_map_propagator(TraceContextPropagator::new());

    #[cfg(feature = "tracing")]
    let tracer_provider = init_tracer()?;

    #[cfg(feature = "metrics")]
    let meter_provider = init_metrics()?;

    #[cfg(any(feature = "metrics", feature = "tracing"))]
    let scope = InstrumentationScope::builder(SERVICE_NAME)
        .with_version(env!("CARGO_PKG_VERSION"))
        .with_schema_url(semvcns::SCHEMA_URL)
        .build();

    // Human-readable console output, independent of `opentelemetry_stdout`.
    let registry = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(
            tracing_subscriber::fmt::layer()
                .with_thread_ids(true)
                .with_line_number(true)
                .with_target(false)
                .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
                .with_file(true)
                .pretty(),
        );

    #[cfg(feature = "tracing")]
    let registry = {
        opentelemetry::global::set_tracer_provider(tracer_provider.clone());
        registry.with(
            tracing_opentelemetry::layer()
                .with_tracer(tracer_provider.tracer_with_scope(scope.clone()))
                .with_error_records_to_exceptions(true),
        )
    };

    #[cfg(feature = "metrics")]
    let registry = {
        opentelemetry::global::set_meter_provider(meter_provider.clone());
        init_metric_handles(opentelemetry::global::meter_with_scope(scope));
        registry.with(tracing_opentelemetry::MetricsLayer::new(
            meter_provider.clone(),
        ))
    };

    registry.init();

    Ok(TelemetryProviders {
        #[cfg(feature = "tracing")]
        tracer_provider,
        #[cfg(feature = "metrics")]
        meter_provider,
    })
}

#[cfg(any(feature = "metrics", feature = "tracing"))]
fn resource() -> Resource {
    Resource::builder()
        .with_service_name(SERVICE_NAME)
        .with_schema_url(
            [KeyValue::new(
                semvcns::resource::SERVICE_VERSION,
                env!("CARGO_PKG_VERSION"),
            )],
            semvcns::SCHEMA_URL,
        )
        .build()
}

/// Connection settings shared by the span and metric exporters.
#[cfg(feature = "honeycomb")]
struct Honeycomb {
    metadata: MetadataMap,
    endpoint: String,
    compression: Compression,
}

#[cfg(feature = "honeycomb")]
impl Honeycomb {
    fn from_env() -> anyhow::Result<Self> {
        use anyhow::Context;
        use core::str::FromStr;

        let api_key = std::env::var("HONEYCOMB_API_KEY").context("missing `HONEYCOMB_API_KEY`")?;
        let dataset = std::env::var("HONEYCOMB_DATASET").context("missing `HONEYCOMB_DATASET`")?;
        let endpoint =
            std::env::var("HONEYCOMB_ENDPOINT").context("missing `HONEYCOMB_ENDPOINT`")?;
        let compression = std::env::var("HONEYCOMB_COMPRESSION")
            .context("missing `HONEYCOMB_COMPRESSION`")?
            .to_ascii_lowercase();

        let mut metadata = MetadataMap::new();
        metadata.insert(
            "x-honeycomb-team",
            api_key.parse().context("invalid API key")?,
        );
        metadata.insert(
            "x-honeycomb-dataset",
            dataset.parse().context("invalid dataset")?,
        );

        Ok(Self {
            metadata,
            endpoint,
            compression: Compression::from_str(&compression)?,
        })
    }
}

#[cfg(feature = "metrics")]
fn init_metrics() -> anyhow::Result<sdkmetrics::SdkMeterProvider> {
    let builder = sdkmetrics::SdkMeterProvider::builder().with_resource(resource());

    #[cfg(feature = "stdout")]
    let builder = {
        let reader = sdkmetrics::PeriodicReader::builder(opentelemetry_stdout::MetricExporter::default())
            .with_interval(std::time::Duration::from_secs(5))
            .build();
        builder.with_reader(reader)
    };

    #[cfg(feature = "honeycomb")]
    let builder = {
        use anyhow::Context;

        let honeycomb = Honeycomb::from_env()?;
        let exporter = opentelemetry_otlp::MetricExporter::builder()
            .with_tonic()
            .with_tls_config(ClientTlsConfig::new().with_native_roots())
            .with_metadata(honeycomb.metadata)
            .with_timeout(std::time::Duration::from_secs(10))
            .with_compression(honeycomb.compression)
            .with_endpoint(honeycomb.endpoint)
            .with_protocol(Protocol::Grpc)
            .with_temporality(Temporality::Delta)
            .build()
            .context("failed to build metrics exporter")?;
        builder.with_periodic_exporter(exporter)
    };

    Ok(builder.build())
}

#[cfg(feature = "tracing")]
fn batch_processor<E>(exporter: E) -> sdktrace::BatchSpanProcessor
where
    E: opentelemetry_sdk::trace::SpanExporter + 'static,
{
    sdktrace::BatchSpanProcessor::builder(exporter)
        .with_batch_config(
            sdktrace::BatchConfigBuilder::default()
                .with_scheduled_delay(std::time::Duration::from_secs(5))
                .with_max_queue_size(2048)
                .build(),
        )
        .build()
}

#[cfg(feature = "tracing")]
fn init_tracer() -> anyhow::Result<sdktrace::SdkTracerProvider> {
    let builder = sdktrace::SdkTracerProvider::builder().with_resource(resource());

    #[cfg(feature = "stdout")]
    let builder =
        builder.with_span_processor(batch_processor(opentelemetry_stdout::SpanExporter::default()));

    #[cfg(feature = "honeycomb")]
    let builder = {
        use anyhow::Context;

        let honeycomb = Honeycomb::from_env()?;
        let exporter = opentelemetry_otlp::SpanExporter::builder()
            .with_tonic()
            .with_tls_config(ClientTlsConfig::new().with_native_roots())
            .with_metadata(honeycomb.metadata)
            .with_timeout(std::time::Duration::from_secs(10))
            .with_compression(honeycomb.compression)
            .with_endpoint(honeycomb.endpoint)
            .with_protocol(Protocol::Grpc)
            .build()
            .context("failed to build tracer exporter")?;
        builder.with_span_processor(batch_processor(exporter))
    };

    Ok(builder.build())
}

#[cfg(feature = "metrics")]
struct Metrics {
    requests: Counter<u64>,
    request_errors: Counter<u64>,
    request_duration_ms: Histogram<f64>,
    sessions_opened: Counter<u64>,
    chunk_bytes: Counter<u64>,
    jobs_started: Counter<u64>,
    jobs_completed: Counter<u64>,
    resource_creations: Counter<u64>,
    reaped: Counter<u64>,
}

#[cfg(feature = "metrics")]
static METRICS: OnceLock<Metrics> = OnceLock::new();

#[cfg(feature = "metrics")]
fn init_metric_handles(meter: Meter) {
    let _ = METRICS.set(Metrics {
        requests: meter
            .u64_counter("requests")
            .with_description("Messages handled")
            .build(),
        request_errors: meter
            .u64_counter("request_errors")
            .with_description("Messages answered with an error")
            .build(),
        request_duration_ms: meter
            .f64_histogram("request_duration")
            .with_unit("ms")
            .with_description("Time to produce a reply")
            .build(),
        sessions_opened: meter
            .u64_counter("sessions_opened")
            .with_description("Upload sessions opened")
            .build(),
        chunk_bytes: meter
            .u64_counter("chunk_bytes")
            .with_unit("By")
            .with_description("Advisory bytes received in upload chunks")
            .build(),
        jobs_started: meter
            .u64_counter("jobs_started")
            .with_description("Print jobs started")
            .build(),
        jobs_completed: meter
            .u64_counter("jobs_completed")
            .with_description("Print jobs completed by their consumer")
            .build(),
        resource_creations: meter
            .u64_counter("resource_creations")
            .with_description("Rendering resource instances created")
            .build(),
        reaped: meter
            .u64_counter("reaped")
            .with_description("Sessions and jobs removed by the reaper")
            .build(),
    });
}

#[cfg(feature = "metrics")]
fn with_metrics(f: impl FnOnce(&Metrics)) {
    if let Some(metrics) = METRICS.get() {
        f(metrics);
    }
}

#[cfg(feature = "metrics")]
pub fn increment_requests() {
    with_metrics(|m| m.requests.add(1, &[]));
}

#[cfg(not(feature = "metrics"))]
pub fn increment_requests() {}

#[cfg(feature = "metrics")]
pub fn increment_request_errors(action: &'static str) {
    with_metrics(|m| m.request_errors.add(1, &[KeyValue::new("action", action)]));
}

#[cfg(not(feature = "metrics"))]
pub fn increment_request_errors(_action: &'static str) {}

#[cfg(feature = "metrics")]
pub fn record_request_duration(action: &'static str, duration_ms: f64) {
    with_metrics(|m| {
        m.request_duration_ms
            .record(duration_ms, &[KeyValue::new("action", action)]);
    });
}

#[cfg(not(feature = "metrics"))]
pub fn record_request_duration(_action: &'static str, _duration_ms: f64) {}

#[cfg(feature = "metrics")]
pub fn increment_sessions_opened() {
    with_metrics(|m| m.sessions_opened.add(1, &[]));
}

#[cfg(not(feature = "metrics"))]
pub fn increment_sessions_opened() {}

#[cfg(feature = "metrics")]
pub fn increment_chunk_bytes(bytes: u64) {
    with_metrics(|m| m.chunk_bytes.add(bytes, &[]));
}

#[cfg(not(feature = "metrics"))]
pub fn increment_chunk_bytes(_bytes: u64) {}

#[cfg(feature = "metrics")]
pub fn increment_jobs_started() {
    with_metrics(|m| m.jobs_started.add(1, &[]));
}

#[cfg(not(feature = "metrics"))]
pub fn increment_jobs_started() {}

#[cfg(feature = "metrics")]
pub fn increment_jobs_completed() {
    with_metrics(|m| m.jobs_completed.add(1, &[]));
}

#[cfg(not(feature = "metrics"))]
pub fn increment_jobs_completed() {}

#[cfg(feature = "metrics")]
pub fn increment_resource_creations() {
    with_metrics(|m| m.resource_creations.add(1, &[]));
}

#[cfg(not(feature = "metrics"))]
pub fn increment_resource_creations() {}

#[cfg(feature = "metrics")]
pub fn increment_reaped(sessions: u64, jobs: u64) {
    with_metrics(|m| {
        m.reaped.add(sessions, &[KeyValue::new("kind", "session")]);
        m.reaped.add(jobs, &[KeyValue::new("kind", "job")]);
    });
}

#[cfg(not(feature = "metrics"))]
pub fn increment_reaped(_sessions: u64, _jobs: u64) {}
