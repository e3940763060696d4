//! W3C trace context carried in job message headers.
//!
//! Both directions go through the global text map propagator, so they do
//! nothing until telemetry installs one.

use async_nats::HeaderMap;
use opentelemetry::Context;
use opentelemetry::global;
use opentelemetry::propagation::{Extractor, Injector};
use tracing::Span;
use tracing_opentelemetry::OpenTelemetrySpanExt;

const PROPAGATED_HEADERS: [&str; 2] = ["traceparent", "tracestate"];

struct WriteCarrier<'a>(&'a mut HeaderMap);

impl Injector for WriteCarrier<'_> {
    fn set(&mut self, key: &str, value: String) {
        self.0.insert(key, value.as_str());
    }
}

struct ReadCarrier<'a>(&'a HeaderMap);

impl Extractor for ReadCarrier<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(|value| value.as_str())
    }

    fn keys(&self) -> Vec<&str> {
        PROPAGATED_HEADERS
            .into_iter()
            .filter(|name| self.0.get(*name).is_some())
            .collect()
    }
}

/// Headers for an outgoing message, stamped with the current span's context
pub fn trace_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    let current = Span::current().context();
    global::get_text_map_propagator(|propagator| {
        propagator.inject_context(&current, &mut WriteCarrier(&mut headers))
    });
    headers
}

/// Context of the span that published a received message
pub fn extract_trace_context(headers: &HeaderMap) -> Context {
    global::get_text_map_propagator(|propagator| propagator.extract(&ReadCarrier(headers)))
}
