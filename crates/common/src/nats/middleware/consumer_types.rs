use async_nats::HeaderMap;
use bytes::Bytes;
use std::time::Duration;

/// One pulled JetStream message, detached from the client so middleware can
/// hold it across awaits.
#[derive(Debug, Clone)]
pub struct ConsumeRequest {
    pub subject: String,
    pub payload: Bytes,
    /// Carries `traceparent` when the producer had an active span
    pub headers: Option<HeaderMap>,
    /// 1-based delivery count reported by JetStream for this message
    pub delivery_attempt: u64,
    /// Deliveries JetStream will make before giving up on the message
    pub max_deliveries: u64,
}

impl ConsumeRequest {
    pub fn new(subject: String, payload: Bytes, headers: Option<HeaderMap>) -> Self {
        Self {
            subject,
            payload,
            headers,
            delivery_attempt: 1,
            max_deliveries: 1,
        }
    }

    pub fn with_delivery(mut self, delivery_attempt: u64, max_deliveries: u64) -> Self {
        self.delivery_attempt = delivery_attempt.max(1);
        self.max_deliveries = max_deliveries.max(1);
        self
    }

    /// True when a nak would not lead to another delivery
    pub fn is_final_delivery(&self) -> bool {
        self.delivery_attempt >= self.max_deliveries
    }
}

/// How the queue consumer settles a message once the service is done with it
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsumeResponse {
    /// Message is done with, successfully or terminally; acknowledge it
    Ack,
    /// Message processing failed; reject it for redelivery
    Nak {
        reason: Option<String>,
        /// Redelivery delay; `None` uses the consumer's default
        delay: Option<Duration>,
    },
}

impl ConsumeResponse {
    pub fn ack() -> Self {
        Self::Ack
    }

    pub fn nak(reason: impl Into<String>) -> Self {
        Self::Nak {
            reason: Some(reason.into()),
            delay: None,
        }
    }

    pub fn nak_with_delay(reason: impl Into<String>, delay: Duration) -> Self {
        Self::Nak {
            reason: Some(reason.into()),
            delay: Some(delay),
        }
    }

    pub fn is_ack(&self) -> bool {
        matches!(self, Self::Ack)
    }

    pub fn is_nak(&self) -> bool {
        matches!(self, Self::Nak { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_consume_request_defaults_to_single_delivery() {
        let req = ConsumeRequest::new("jobs.run".to_string(), Bytes::from("payload"), None);

        assert_eq!(req.subject, "jobs.run");
        assert_eq!(req.delivery_attempt, 1);
        assert!(req.is_final_delivery());
        assert!(req.headers.is_none());
    }

    #[test]
    fn test_final_delivery_tracks_attempts() {
        let req = ConsumeRequest::new("jobs.run".to_string(), Bytes::new(), None);

        assert!(!req.clone().with_delivery(1, 5).is_final_delivery());
        assert!(!req.clone().with_delivery(4, 5).is_final_delivery());
        assert!(req.clone().with_delivery(5, 5).is_final_delivery());
        // JetStream reports 0 for messages without metadata
        assert_eq!(req.with_delivery(0, 5).delivery_attempt, 1);
    }

    #[test]
    fn test_consume_response_nak_with_delay() {
        let resp = ConsumeResponse::nak_with_delay("collaborator down", Duration::from_secs(10));
        assert!(resp.is_nak());
        assert!(!resp.is_ack());
        assert_eq!(
            resp,
            ConsumeResponse::Nak {
                reason: Some("collaborator down".to_string()),
                delay: Some(Duration::from_secs(10)),
            }
        );
    }

    #[test]
    fn test_consume_response_ack() {
        let resp = ConsumeResponse::ack();
        assert!(resp.is_ack());
        assert!(!resp.is_nak());
    }
}
