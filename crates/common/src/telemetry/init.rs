use anyhow::{Context, Result};
use opentelemetry::{KeyValue, global, trace::TracerProvider};
use opentelemetry_appender_tracing::layer::OpenTelemetryTracingBridge;
use opentelemetry_otlp::{LogExporter, SpanExporter, WithExportConfig};
use opentelemetry_sdk::{
    Resource,
    logs::{BatchLogProcessor, LoggerProvider},
    propagation::TraceContextPropagator,
    runtime,
    trace::{RandomIdGenerator, Sampler, TracerProvider as SdkTracerProvider},
};
use opentelemetry_semantic_conventions::resource::SERVICE_NAME;
use tracing::Subscriber;
use tracing_subscriber::{
    Layer, layer::SubscriberExt, registry::LookupSpan, util::SubscriberInitExt,
};

use super::TelemetryConfig;

/// Keeps the OTLP exporters alive. Dropping it without calling
/// [`TelemetryGuard::shutdown`] loses whatever is still batched.
pub struct TelemetryGuard {
    tracer_provider: SdkTracerProvider,
    logger_provider: LoggerProvider,
}

impl TelemetryGuard {
    /// Flush and stop both exporters
    pub fn shutdown(self) {
        if let Err(e) = self.tracer_provider.shutdown() {
            eprintln!("span exporter shutdown failed: {:?}", e);
        }
        if let Err(e) = self.logger_provider.shutdown() {
            eprintln!("log exporter shutdown failed: {:?}", e);
        }
    }
}

/// Install the global tracing subscriber.
///
/// Events always go to stdout as JSON. With an OTLP endpoint configured, spans
/// and events are also exported and the W3C trace context propagator is
/// installed, which is what lets queued jobs carry their producer's trace.
pub fn init_telemetry(config: &TelemetryConfig) -> Result<Option<TelemetryGuard>> {
    let Some(endpoint) = config.otlp_endpoint.as_deref() else {
        tracing_subscriber::registry()
            .with(config.env_filter())
            .with(console_layer())
            .try_init()
            .context("a global tracing subscriber is already installed")?;
        return Ok(None);
    };

    let guard = otlp_exporters(&config.service_name, endpoint)?;
    global::set_text_map_propagator(TraceContextPropagator::new());

    let tracer = guard.tracer_provider.tracer("heru");

    // Span layer before the log bridge so exported logs pick up the active span
    tracing_subscriber::registry()
        .with(config.env_filter())
        .with(tracing_opentelemetry::layer().with_tracer(tracer))
        .with(OpenTelemetryTracingBridge::new(&guard.logger_provider))
        .with(console_layer())
        .try_init()
        .context("a global tracing subscriber is already installed")?;

    Ok(Some(guard))
}

/// JSON events on stdout, boxed so both subscriber stacks can take it
fn console_layer<S>() -> Box<dyn Layer<S> + Send + Sync>
where
    S: Subscriber + for<'span> LookupSpan<'span> + 'static,
{
    tracing_subscriber::fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .boxed()
}

fn otlp_exporters(service_name: &str, endpoint: &str) -> Result<TelemetryGuard> {
    let resource = Resource::new([KeyValue::new(SERVICE_NAME, service_name.to_string())]);

    let spans = SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()
        .with_context(|| format!("could not build span exporter for {}", endpoint))?;
    let logs = LogExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()
        .with_context(|| format!("could not build log exporter for {}", endpoint))?;

    Ok(TelemetryGuard {
        tracer_provider: SdkTracerProvider::builder()
            .with_batch_exporter(spans, runtime::Tokio)
            .with_sampler(Sampler::AlwaysOn)
            .with_id_generator(RandomIdGenerator::default())
            .with_resource(resource.clone())
            .build(),
        logger_provider: LoggerProvider::builder()
            .with_log_processor(BatchLogProcessor::builder(logs, runtime::Tokio).build())
            .with_resource(resource)
            .build(),
    })
}
