use crate::mqtt::{TelemetryConnector, TelemetryMessage, TelemetrySession};
use async_trait::async_trait;
use common::domain::{DomainError, DomainResult};
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Packet, QoS,
    SubscribeReasonCode,
};
use std::collections::VecDeque;
use std::time::Duration;
use tracing::{debug, info};

/// Broker connection settings
#[derive(Debug, Clone)]
pub struct MqttSettings {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keep_alive: Duration,
    pub connect_timeout: Duration,
}

impl Default for MqttSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            client_id: "heru-ingestion".to_string(),
            username: None,
            password: None,
            keep_alive: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl MqttSettings {
    fn options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(&self.client_id, &self.host, self.port);
        options.set_keep_alive(self.keep_alive);
        options.set_clean_session(true);
        if let (Some(username), Some(password)) = (&self.username, &self.password) {
            options.set_credentials(username, password);
        }
        options
    }
}

/// `TelemetryConnector` backed by rumqttc
pub struct RumqttcConnector {
    settings: MqttSettings,
}

impl RumqttcConnector {
    pub fn new(settings: MqttSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl TelemetryConnector for RumqttcConnector {
    async fn connect(&self) -> DomainResult<Box<dyn TelemetrySession>> {
        let (client, eventloop) = AsyncClient::new(self.settings.options(), 100);
        let mut session = RumqttcSession {
            client,
            eventloop,
            pending: VecDeque::new(),
        };

        tokio::time::timeout(self.settings.connect_timeout, session.await_connack())
            .await
            .map_err(|_| {
                DomainError::TransportError(format!(
                    "no CONNACK from {}:{} within {:?}",
                    self.settings.host, self.settings.port, self.settings.connect_timeout
                ))
            })??;

        info!(
            host = %self.settings.host,
            port = self.settings.port,
            client_id = %self.settings.client_id,
            "connected to MQTT broker"
        );
        Ok(Box::new(session))
    }
}

struct RumqttcSession {
    client: AsyncClient,
    eventloop: EventLoop,
    /// Publishes that arrived while waiting for a SUBACK
    pending: VecDeque<TelemetryMessage>,
}

impl RumqttcSession {
    async fn poll(&mut self) -> DomainResult<Event> {
        self.eventloop
            .poll()
            .await
            .map_err(|e| DomainError::TransportError(format!("MQTT event loop error: {}", e)))
    }

    async fn await_connack(&mut self) -> DomainResult<()> {
        loop {
            if let Event::Incoming(Packet::ConnAck(connack)) = self.poll().await? {
                return match connack.code {
                    ConnectReturnCode::Success => Ok(()),
                    code => Err(DomainError::TransportError(format!(
                        "broker refused connection: {:?}",
                        code
                    ))),
                };
            }
        }
    }
}

#[async_trait]
impl TelemetrySession for RumqttcSession {
    async fn subscribe(&mut self, topic: &str) -> DomainResult<()> {
        self.client
            .subscribe(topic, QoS::AtLeastOnce)
            .await
            .map_err(|e| DomainError::TransportError(format!("failed to subscribe: {}", e)))?;

        loop {
            match self.poll().await? {
                Event::Incoming(Packet::SubAck(suback)) => {
                    if suback
                        .return_codes
                        .iter()
                        .any(|code| matches!(code, SubscribeReasonCode::Failure))
                    {
                        return Err(DomainError::TransportError(format!(
                            "broker refused subscription to '{}'",
                            topic
                        )));
                    }
                    debug!(topic = %topic, "subscription acknowledged");
                    return Ok(());
                }
                Event::Incoming(Packet::Publish(publish)) => {
                    self.pending.push_back(TelemetryMessage {
                        topic: publish.topic,
                        payload: publish.payload,
                    });
                }
                _ => {}
            }
        }
    }

    async fn next_message(&mut self) -> DomainResult<TelemetryMessage> {
        if let Some(message) = self.pending.pop_front() {
            return Ok(message);
        }

        loop {
            match self.poll().await? {
                Event::Incoming(Packet::Publish(publish)) => {
                    return Ok(TelemetryMessage {
                        topic: publish.topic,
                        payload: publish.payload,
                    });
                }
                Event::Incoming(Packet::Disconnect) => {
                    return Err(DomainError::TransportError(
                        "broker closed the connection".to_string(),
                    ));
                }
                _ => {}
            }
        }
    }

    async fn disconnect(&mut self) {
        if let Err(e) = self.client.disconnect().await {
            debug!(error = %e, "MQTT disconnect request failed");
        }
    }
}
