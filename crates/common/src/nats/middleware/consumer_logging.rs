use crate::nats::{ConsumeRequest, ConsumeResponse};
use futures::future::BoxFuture;
use std::fmt::Display;
use std::task::{Context, Poll};
use std::time::Instant;
use tower::{Layer, Service};
use tracing::{error, info, warn};

/// Logs one line per handled message: its subject, delivery attempt, settlement and latency
#[derive(Clone, Copy, Debug, Default)]
pub struct ConsumeLoggingLayer;

impl<S> Layer<S> for ConsumeLoggingLayer {
    type Service = ConsumeLogging<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ConsumeLogging { inner }
    }
}

#[derive(Clone, Debug)]
pub struct ConsumeLogging<S> {
    inner: S,
}

impl<S> Service<ConsumeRequest> for ConsumeLogging<S>
where
    S: Service<ConsumeRequest, Response = ConsumeResponse> + Send,
    S::Error: Display + Send,
    S::Future: Send + 'static,
{
    type Response = ConsumeResponse;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<ConsumeResponse, S::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: ConsumeRequest) -> Self::Future {
        let subject = req.subject.clone();
        let attempt = req.delivery_attempt;
        let bytes = req.payload.len();
        let started = Instant::now();
        let handled = self.inner.call(req);

        Box::pin(async move {
            let result = handled.await;
            let elapsed_ms = started.elapsed().as_millis() as u64;

            match &result {
                Ok(ConsumeResponse::Ack) => info!(
                    %subject, attempt, bytes, elapsed_ms,
                    "message acked"
                ),
                Ok(ConsumeResponse::Nak { reason, delay }) => warn!(
                    %subject, attempt, bytes, elapsed_ms,
                    reason = reason.as_deref().unwrap_or_default(),
                    redeliver_after_ms = delay.map(|d| d.as_millis() as u64),
                    "message nacked"
                ),
                Err(e) => error!(
                    %subject, attempt, bytes, elapsed_ms,
                    error = %e,
                    "message handler failed"
                ),
            }

            result
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::time::Duration;
    use tower::{ServiceExt, service_fn};

    #[tokio::test]
    async fn test_response_is_passed_through_unchanged() {
        let inner = service_fn(|_req: ConsumeRequest| async {
            Ok::<_, anyhow::Error>(ConsumeResponse::nak_with_delay(
                "busy",
                Duration::from_secs(3),
            ))
        });

        let response = ConsumeLoggingLayer
            .layer(inner)
            .oneshot(ConsumeRequest::new("jobs.run".to_string(), Bytes::from("{}"), None))
            .await
            .unwrap();

        assert_eq!(
            response,
            ConsumeResponse::nak_with_delay("busy", Duration::from_secs(3))
        );
    }

    #[tokio::test]
    async fn test_handler_error_is_passed_through() {
        let inner = service_fn(|_req: ConsumeRequest| async {
            Err::<ConsumeResponse, _>(anyhow::anyhow!("decoder panicked"))
        });

        let result = ConsumeLoggingLayer
            .layer(inner)
            .oneshot(ConsumeRequest::new("jobs.run".to_string(), Bytes::new(), None))
            .await;

        assert_eq!(result.unwrap_err().to_string(), "decoder panicked");
    }
}
