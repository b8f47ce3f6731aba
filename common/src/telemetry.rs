use anyhow::{Result, anyhow};
use opentelemetry::global;
use opentelemetry::trace::TracerProvider;
use opentelemetry_sdk::propagation::TraceContextPropagator;
use opentelemetry_sdk::trace::{SdkTracerProvider, Tracer};
use std::env;
use tracing_opentelemetry::OpenTelemetryLayer;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_OTLP_ENDPOINT: &str = "http://localhost:4318/v1/traces";

/// Installs the global subscriber: env filter, compact fmt output and an
/// OpenTelemetry layer. Spans go to OTLP/HTTP when `OTEL_TRACES_EXPORTER=otlp`,
/// to stdout otherwise.
pub fn init_telemetry(service_name: &'static str) -> Result<()> {
    global::set_text_map_propagator(TraceContextPropagator::new());

    let otlp_enabled = env::var("OTEL_TRACES_EXPORTER")
        .map(|v| v == "otlp")
        .unwrap_or(false);

    let tracer = if otlp_enabled {
        let endpoint = env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
            .unwrap_or_else(|_| DEFAULT_OTLP_ENDPOINT.to_string());

        match otlp_tracer(&endpoint, service_name) {
            Ok(tracer) => tracer,
            Err(e) => {
                eprintln!("otlp exporter unavailable for {service_name} ({e}), using stdout");
                stdout_tracer(service_name)
            }
        }
    } else {
        stdout_tracer(service_name)
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"))
        .add_directive(format!("{service_name}=info").parse()?);

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().compact())
        .with(OpenTelemetryLayer::new(tracer))
        .try_init()
        .map_err(|e| anyhow!("failed to install subscriber: {e}"))?;

    Ok(())
}

fn otlp_tracer(endpoint: &str, service_name: &'static str) -> Result<Tracer> {
    use opentelemetry_otlp::WithExportConfig;

    // Only the HTTP transport is wired; a gRPC endpoint falls back to stdout.
    if !(endpoint.contains("4318") || endpoint.contains("/v1/traces")) {
        return Err(anyhow!("grpc otlp endpoint {endpoint} is not supported"));
    }

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_http()
        .with_endpoint(endpoint)
        .build()?;

    let provider = SdkTracerProvider::builder()
        .with_simple_exporter(exporter)
        .build();

    Ok(provider.tracer(service_name))
}

fn stdout_tracer(service_name: &'static str) -> Tracer {
    let provider = SdkTracerProvider::builder()
        .with_simple_exporter(opentelemetry_stdout::SpanExporter::default())
        .build();

    provider.tracer(service_name)
}
