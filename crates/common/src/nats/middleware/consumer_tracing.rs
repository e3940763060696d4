use crate::nats::trace_context::extract_trace_context;
use crate::nats::{ConsumeRequest, ConsumeResponse};
use futures::future::BoxFuture;
use std::task::{Context, Poll};
use tower::{Layer, Service};
use tracing::{Instrument, Span, info_span};
use tracing_opentelemetry::OpenTelemetrySpanExt;

/// Runs each message handler inside a `job.consume` span that continues the
/// producer's trace when the message carries one.
#[derive(Clone, Copy, Debug, Default)]
pub struct ConsumeTracingLayer;

impl<S> Layer<S> for ConsumeTracingLayer {
    type Service = ConsumeTracing<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ConsumeTracing { inner }
    }
}

#[derive(Clone, Debug)]
pub struct ConsumeTracing<S> {
    inner: S,
}

fn consume_span(req: &ConsumeRequest) -> Span {
    let span = info_span!(
        "job.consume",
        otel.name = %format!("{} process", req.subject),
        otel.kind = "consumer",
        messaging.system = "nats",
        messaging.operation = "process",
        messaging.destination.name = %req.subject,
        messaging.message.body.size = req.payload.len(),
        messaging.nats.delivery_attempt = req.delivery_attempt,
    );

    if let Some(headers) = req.headers.as_ref() {
        span.set_parent(extract_trace_context(headers));
    }
    span
}

impl<S> Service<ConsumeRequest> for ConsumeTracing<S>
where
    S: Service<ConsumeRequest, Response = ConsumeResponse> + Send,
    S::Error: Send,
    S::Future: Send + 'static,
{
    type Response = ConsumeResponse;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<ConsumeResponse, S::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: ConsumeRequest) -> Self::Future {
        let span = consume_span(&req);
        // Inner layers that capture the current span at call time see this one
        let handled = span.in_scope(|| self.inner.call(req));
        Box::pin(handled.instrument(span))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use tower::{ServiceExt, service_fn};
    use tracing_subscriber::util::SubscriberInitExt;

    #[tokio::test]
    async fn test_handler_runs_inside_consume_span() {
        let _subscriber = tracing_subscriber::registry().set_default();

        let inner = service_fn(|_req: ConsumeRequest| async {
            let current = Span::current().metadata().map(|m| m.name());
            Ok::<_, anyhow::Error>(match current {
                Some("job.consume") => ConsumeResponse::ack(),
                other => ConsumeResponse::nak(format!("handler ran in {:?}", other)),
            })
        });

        let mut headers = async_nats::HeaderMap::new();
        headers.insert(
            "traceparent",
            "00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01",
        );
        let req = ConsumeRequest::new("jobs.run".to_string(), Bytes::new(), Some(headers));

        let response = ConsumeTracingLayer.layer(inner).oneshot(req).await.unwrap();
        assert_eq!(response, ConsumeResponse::ack());
    }
}
