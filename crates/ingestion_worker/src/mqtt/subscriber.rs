use crate::domain::ReadingIngestionService;
use crate::mqtt::{TelemetryConnector, TelemetryMessage, TelemetrySession};
use common::domain::{DomainResult, TelemetryDocument};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span, debug, error, info, info_span, instrument, warn};

/// Lifecycle of the telemetry subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriberState {
    Disconnected,
    Connecting,
    Subscribed,
    Consuming,
}

impl fmt::Display for SubscriberState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SubscriberState::Disconnected => "disconnected",
            SubscriberState::Connecting => "connecting",
            SubscriberState::Subscribed => "subscribed",
            SubscriberState::Consuming => "consuming",
        };
        f.write_str(name)
    }
}

/// Ingestion Consumer: keeps a subscription to the telemetry topic open
/// and feeds every message through the Ingestion Writer, one at a time.
///
/// Any connection or subscription error drops back to `Disconnected`, waits
/// `reconnect_delay` and starts over. Only cancellation ends the loop.
#[derive(Clone)]
pub struct TelemetrySubscriber {
    connector: Arc<dyn TelemetryConnector>,
    ingestion: Arc<ReadingIngestionService>,
    topic: String,
    reconnect_delay: Duration,
}

impl TelemetrySubscriber {
    pub fn new(
        connector: Arc<dyn TelemetryConnector>,
        ingestion: Arc<ReadingIngestionService>,
        topic: String,
        reconnect_delay: Duration,
    ) -> Self {
        Self {
            connector,
            ingestion,
            topic,
            reconnect_delay,
        }
    }

    #[instrument(name = "telemetry_subscriber", skip_all, fields(topic = %self.topic))]
    pub async fn run(self, ctx: CancellationToken) -> anyhow::Result<()> {
        info!("starting telemetry subscriber");

        let mut state = SubscriberState::Disconnected;
        let mut attempt: u64 = 0;

        loop {
            if ctx.is_cancelled() {
                break;
            }

            attempt += 1;
            match self.run_session(&ctx, &mut state).await {
                Ok(()) => break,
                Err(e) => {
                    transition(&mut state, SubscriberState::Disconnected);
                    error!(
                        error = %e,
                        attempt,
                        retry_in_secs = self.reconnect_delay.as_secs(),
                        "telemetry subscription lost"
                    );

                    tokio::select! {
                        biased;
                        _ = ctx.cancelled() => break,
                        _ = tokio::time::sleep(self.reconnect_delay) => {}
                    }
                }
            }
        }

        transition(&mut state, SubscriberState::Disconnected);
        info!("telemetry subscriber stopped");
        Ok(())
    }

    /// Runs one connect/subscribe/consume cycle. Returns `Ok` only on cancellation.
    async fn run_session(
        &self,
        ctx: &CancellationToken,
        state: &mut SubscriberState,
    ) -> DomainResult<()> {
        transition(state, SubscriberState::Connecting);
        let mut session = tokio::select! {
            biased;
            _ = ctx.cancelled() => return Ok(()),
            session = self.connector.connect() => session?,
        };

        let subscribed = tokio::select! {
            biased;
            _ = ctx.cancelled() => None,
            result = session.subscribe(&self.topic) => Some(result),
        };
        match subscribed {
            None => {
                session.disconnect().await;
                return Ok(());
            }
            Some(result) => result?,
        }
        transition(state, SubscriberState::Subscribed);
        info!(topic = %self.topic, "subscribed to telemetry topic");

        transition(state, SubscriberState::Consuming);
        self.consume(ctx, session.as_mut()).await
    }

    async fn consume(
        &self,
        ctx: &CancellationToken,
        session: &mut dyn TelemetrySession,
    ) -> DomainResult<()> {
        loop {
            let message = tokio::select! {
                biased;
                _ = ctx.cancelled() => {
                    debug!("shutdown requested, disconnecting");
                    session.disconnect().await;
                    return Ok(());
                }
                message = session.next_message() => message?,
            };

            // The next message is not read until this one is persisted
            self.handle_message(message).await;
        }
    }

    /// Each message gets its own root span, independent of the subscriber's
    async fn handle_message(&self, message: TelemetryMessage) {
        let span = info_span!(
            parent: Span::none(),
            "telemetry_message",
            topic = %message.topic,
            payload_size = message.payload.len(),
            device_id = tracing::field::Empty,
        );

        async {
            let document = match TelemetryDocument::decode(&message.payload) {
                Ok(document) => document,
                Err(e) => {
                    warn!(error = %e, "dropping malformed telemetry message");
                    return;
                }
            };

            Span::current().record("device_id", document.device_id.as_str());

            match self.ingestion.ingest(document).await {
                Ok(reading) => debug!(reading_id = reading.id, "telemetry message ingested"),
                Err(e) => error!(error = %e, "failed to persist telemetry message, dropping it"),
            }
        }
        .instrument(span)
        .await
    }
}

fn transition(state: &mut SubscriberState, next: SubscriberState) {
    if *state != next {
        debug!(from = %state, to = %next, "subscriber state change");
        *state = next;
    }
}
