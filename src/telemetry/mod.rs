//! src/telemetry/mod.rs
//! Self-observation: traces, metrics and logs per the OTel GenAI/MCP
//! conventions.
//!
//! When `OTEL_EXPORTER_OTLP_ENDPOINT` is set, all three signal providers are
//! real OTLP gRPC exporters sharing one resource; otherwise none is
//! installed and the globals stay no-ops. Either way a JSON structured-log
//! subscriber goes on stdout. The guard returned by [`init`] flushes every
//! provider on shutdown.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use opentelemetry::global;
use opentelemetry::metrics::{Counter, Histogram};
use opentelemetry::propagation::TextMapCompositePropagator;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry::KeyValue;
use opentelemetry_appender_tracing::layer::OpenTelemetryTracingBridge;
use opentelemetry_otlp::{LogExporter, MetricExporter, SpanExporter, WithExportConfig};
use opentelemetry_sdk::logs::SdkLoggerProvider;
use opentelemetry_sdk::metrics::{PeriodicReader, SdkMeterProvider};
use opentelemetry_sdk::propagation::{BaggagePropagator, TraceContextPropagator};
use opentelemetry_sdk::trace::SdkTracerProvider;
use opentelemetry_sdk::Resource;
use tracing::info;
use tracing_subscriber::{
    filter::EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt, Registry,
};

use crate::config::Config;

const INSTRUMENTATION_NAME: &str = "mcp-k8s-networking";
const METRIC_EXPORT_INTERVAL: Duration = Duration::from_secs(30);

/// The §4.7 instruments, instantiated once at startup. When no meter
/// provider is installed these are no-ops.
pub struct Instruments {
    pub request_duration: Histogram<f64>,
    pub request_count: Counter<u64>,
    pub findings_total: Counter<u64>,
    pub errors_total: Counter<u64>,
}

impl Instruments {
    fn new() -> Self {
        let meter = global::meter(INSTRUMENTATION_NAME);
        Self {
            request_duration: meter
                .f64_histogram("gen_ai.server.request.duration")
                .with_unit("s")
                .with_description("Duration of tool-call requests")
                .build(),
            request_count: meter
                .u64_counter("gen_ai.server.request.count")
                .with_description("Count of tool-call requests")
                .build(),
            findings_total: meter
                .u64_counter("mcp.findings.total")
                .with_description("Diagnostic findings produced, by severity and analyzer")
                .build(),
            errors_total: meter
                .u64_counter("mcp.errors.total")
                .with_description("Structured errors surfaced to agents")
                .build(),
        }
    }
}

/// Owns the installed signal providers. Providers are either all real OTLP
/// (endpoint configured) or all absent.
pub struct Telemetry {
    pub instruments: Arc<Instruments>,
    tracer_provider: Option<SdkTracerProvider>,
    meter_provider: Option<SdkMeterProvider>,
    logger_provider: Option<SdkLoggerProvider>,
}

impl Telemetry {
    /// Flush and shut down every provider. Errors are aggregated; one
    /// failing provider does not stop the others from flushing.
    pub fn shutdown(&self) -> Result<()> {
        let mut failures = Vec::new();
        if let Some(provider) = &self.tracer_provider
            && let Err(e) = provider.shutdown()
        {
            failures.push(format!("tracer: {e}"));
        }
        if let Some(provider) = &self.meter_provider
            && let Err(e) = provider.shutdown()
        {
            failures.push(format!("meter: {e}"));
        }
        if let Some(provider) = &self.logger_provider
            && let Err(e) = provider.shutdown()
        {
            failures.push(format!("logger: {e}"));
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(anyhow!("telemetry shutdown failures: {}", failures.join("; ")))
        }
    }
}

/// Initialize logging and, when an OTLP endpoint is configured, the three
/// signal providers plus the W3C TraceContext + Baggage propagator.
pub fn init(config: &Config) -> Result<Telemetry> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let Some(endpoint) = config.otlp_endpoint.clone() else {
        // No endpoint: plain JSON logs, globals stay no-ops.
        Registry::default()
            .with(env_filter)
            .with(fmt::layer().json())
            .try_init()
            .map_err(|e| anyhow!("subscriber init failed: {e}"))?;
        info!("telemetry disabled (OTEL_EXPORTER_OTLP_ENDPOINT not set)");
        return Ok(Telemetry {
            instruments: Arc::new(Instruments::new()),
            tracer_provider: None,
            meter_provider: None,
            logger_provider: None,
        });
    };

    if config.otlp_insecure && endpoint.starts_with("https://") {
        tracing::warn!("OTEL_EXPORTER_OTLP_INSECURE set but the endpoint is https, TLS stays on");
    }

    let resource = Resource::builder()
        .with_attributes(vec![
            KeyValue::new("service.name", config.service_name.clone()),
            KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
            KeyValue::new("k8s.cluster.name", config.cluster_name.clone()),
        ])
        .build();

    let span_exporter = SpanExporter::builder()
        .with_tonic()
        .with_endpoint(&endpoint)
        .build()?;
    let tracer_provider = SdkTracerProvider::builder()
        .with_resource(resource.clone())
        .with_batch_exporter(span_exporter)
        .build();
    global::set_tracer_provider(tracer_provider.clone());

    let metric_exporter = MetricExporter::builder()
        .with_tonic()
        .with_endpoint(&endpoint)
        .build()?;
    let meter_provider = SdkMeterProvider::builder()
        .with_resource(resource.clone())
        .with_reader(
            PeriodicReader::builder(metric_exporter)
                .with_interval(METRIC_EXPORT_INTERVAL)
                .build(),
        )
        .build();
    global::set_meter_provider(meter_provider.clone());

    let log_exporter = LogExporter::builder()
        .with_tonic()
        .with_endpoint(&endpoint)
        .build()?;
    let logger_provider = SdkLoggerProvider::builder()
        .with_resource(resource)
        .with_batch_exporter(log_exporter)
        .build();

    global::set_text_map_propagator(TextMapCompositePropagator::new(vec![
        Box::new(TraceContextPropagator::new()),
        Box::new(BaggagePropagator::new()),
    ]));

    let tracer = tracer_provider.tracer(INSTRUMENTATION_NAME);
    Registry::default()
        .with(env_filter)
        .with(tracing_opentelemetry::layer().with_tracer(tracer))
        .with(OpenTelemetryTracingBridge::new(&logger_provider))
        .with(fmt::layer().json())
        .try_init()
        .map_err(|e| anyhow!("subscriber init failed: {e}"))?;

    info!(endpoint = %endpoint, "OTLP telemetry enabled for traces, metrics and logs");

    // Instruments must come after the meter provider is global.
    Ok(Telemetry {
        instruments: Arc::new(Instruments::new()),
        tracer_provider: Some(tracer_provider),
        meter_provider: Some(meter_provider),
        logger_provider: Some(logger_provider),
    })
}

/// Derive a parent trace context from request metadata. Absence of the
/// carrier fields yields the root context, never an error.
pub fn extract_parent_context(carrier: &HashMap<String, String>) -> opentelemetry::Context {
    global::get_text_map_propagator(|propagator| propagator.extract(carrier))
}

#[cfg(test)]
mod tests {
    use super::*;
    use opentelemetry::trace::TraceContextExt;

    #[test]
    fn test_extract_parent_context_roundtrip() {
        // Propagator installation is global; scoped to this test's needs.
        global::set_text_map_propagator(TextMapCompositePropagator::new(vec![
            Box::new(TraceContextPropagator::new()),
            Box::new(BaggagePropagator::new()),
        ]));

        let mut carrier = HashMap::new();
        carrier.insert(
            "traceparent".to_string(),
            "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01".to_string(),
        );
        let cx = extract_parent_context(&carrier);
        let span_context = cx.span().span_context().clone();
        assert!(span_context.is_valid());
        assert_eq!(
            span_context.trace_id().to_string(),
            "4bf92f3577b34da6a3ce929d0e0e4736"
        );
        assert_eq!(span_context.span_id().to_string(), "00f067aa0ba902b7");
    }

    #[test]
    fn test_extract_without_carrier_is_root() {
        global::set_text_map_propagator(TraceContextPropagator::new());
        let cx = extract_parent_context(&HashMap::new());
        assert!(!cx.span().span_context().is_valid());
    }
}
