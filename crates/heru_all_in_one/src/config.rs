use anchor_worker::{AnchorWorkerConfig, HederaRelaySettings, PinataSettings};
use common::domain::{DomainError, DomainResult, PROCESS_SENSOR_DATA};
use common::garde::validate_struct;
use common::postgres::PostgresConfig;
use common::telemetry::TelemetryConfig;
use config::{Config, ConfigError, Environment};
use garde::Validate;
use ingestion_worker::{IngestionWorkerConfig, MqttSettings, OutboxRelayConfig};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Deserialize, Serialize, Clone, Validate)]
pub struct ServiceConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    #[garde(length(min = 1))]
    pub log_level: String,

    // MQTT configuration
    #[serde(default = "default_mqtt_host")]
    #[garde(length(min = 1))]
    pub mqtt_host: String,

    #[serde(default = "default_mqtt_port")]
    #[garde(range(min = 1))]
    pub mqtt_port: u16,

    /// Wildcard topic covering every device sub-topic
    #[serde(default = "default_mqtt_topic")]
    #[garde(length(min = 1))]
    pub mqtt_topic: String,

    #[serde(default = "default_mqtt_client_id")]
    #[garde(length(min = 1))]
    pub mqtt_client_id: String,

    /// Broker credentials; both set or both empty
    #[serde(default)]
    #[garde(skip)]
    pub mqtt_username: String,

    #[serde(default)]
    #[garde(skip)]
    pub mqtt_password: String,

    #[serde(default = "default_mqtt_keep_alive_secs")]
    #[garde(range(min = 5))]
    pub mqtt_keep_alive_secs: u64,

    /// Fixed backoff between broker reconnect attempts
    #[serde(default = "default_mqtt_reconnect_delay_secs")]
    #[garde(range(min = 1))]
    pub mqtt_reconnect_delay_secs: u64,

    // NATS configuration
    #[serde(default = "default_nats_url")]
    #[garde(length(min = 1))]
    pub nats_url: String,

    #[serde(default = "default_nats_connect_timeout_secs")]
    #[garde(range(min = 1))]
    pub nats_connect_timeout_secs: u64,

    /// JetStream stream holding processing jobs
    #[serde(default = "default_processing_jobs_stream")]
    #[garde(length(min = 1))]
    pub processing_jobs_stream: String,

    /// Durable consumer shared by every processing worker
    #[serde(default = "default_processing_consumer_name")]
    #[garde(length(min = 1))]
    pub processing_consumer_name: String,

    #[serde(default = "default_processing_workers")]
    #[garde(range(min = 1))]
    pub processing_workers: usize,

    /// Jobs pulled per fetch; they are handled one after another, so every
    /// job in the batch has to finish inside one ack wait
    #[serde(default = "default_processing_batch_size")]
    #[garde(range(min = 1))]
    pub processing_batch_size: usize,

    #[serde(default = "default_processing_batch_wait_secs")]
    #[garde(range(min = 1))]
    pub processing_batch_wait_secs: u64,

    /// Deliveries per job, including the first
    #[serde(default = "default_processing_max_deliveries")]
    #[garde(range(min = 1))]
    pub processing_max_deliveries: i64,

    #[serde(default = "default_processing_retry_delay_secs")]
    #[garde(range(min = 1))]
    pub processing_retry_delay_secs: u64,

    /// Must leave room for both collaborator calls of every job in a batch
    #[serde(default = "default_processing_ack_wait_secs")]
    #[garde(range(min = 1))]
    pub processing_ack_wait_secs: u64,

    #[serde(default = "default_collaborator_timeout_secs")]
    #[garde(range(min = 1))]
    pub collaborator_timeout_secs: u64,

    // Outbox relay
    #[serde(default = "default_outbox_relay_interval_secs")]
    #[garde(range(min = 1))]
    pub outbox_relay_interval_secs: u64,

    #[serde(default = "default_outbox_grace_secs")]
    #[garde(range(min = 1))]
    pub outbox_grace_secs: u64,

    /// Quiet period before a reading still `PENDING` after an accepted
    /// publish gets a fresh job
    #[serde(default = "default_outbox_redispatch_secs")]
    #[garde(range(min = 1))]
    pub outbox_redispatch_secs: u64,

    #[serde(default = "default_outbox_batch_size")]
    #[garde(range(min = 1))]
    pub outbox_batch_size: usize,

    // PostgreSQL configuration
    #[serde(default = "default_postgres_host")]
    #[garde(length(min = 1))]
    pub postgres_host: String,

    #[serde(default = "default_postgres_port")]
    #[garde(range(min = 1))]
    pub postgres_port: u16,

    #[serde(default = "default_postgres_database")]
    #[garde(length(min = 1))]
    pub postgres_database: String,

    #[serde(default = "default_postgres_username")]
    #[garde(length(min = 1))]
    pub postgres_username: String,

    #[serde(default = "default_postgres_password")]
    #[garde(skip)]
    pub postgres_password: String,

    #[serde(default = "default_postgres_max_pool_size")]
    #[garde(range(min = 1))]
    pub postgres_max_pool_size: usize,

    // Object store (Pinata); both keys empty selects the placeholder
    #[serde(default = "default_pinata_api_url")]
    #[garde(length(min = 1))]
    pub pinata_api_url: String,

    #[serde(default)]
    #[garde(skip)]
    pub pinata_api_key: String,

    #[serde(default)]
    #[garde(skip)]
    pub pinata_secret_api_key: String,

    // Ledger (Hedera relay); empty account id and key select the placeholder
    #[serde(default)]
    #[garde(skip)]
    pub hedera_relay_url: String,

    #[serde(default)]
    #[garde(skip)]
    pub hedera_topic_id: String,

    #[serde(default)]
    #[garde(skip)]
    pub hedera_account_id: String,

    #[serde(default)]
    #[garde(skip)]
    pub hedera_private_key: String,

    // Process supervision
    #[serde(default = "default_supervisor_restart_delay_secs")]
    #[garde(range(min = 1))]
    pub supervisor_restart_delay_secs: u64,

    #[serde(default = "default_shutdown_timeout_secs")]
    #[garde(range(min = 1))]
    pub shutdown_timeout_secs: u64,

    // OpenTelemetry configuration
    #[serde(default = "default_otel_endpoint")]
    #[garde(skip)]
    pub otel_endpoint: String,

    #[serde(default = "default_otel_enabled")]
    #[garde(skip)]
    pub otel_enabled: bool,

    #[serde(default = "default_otel_service_name")]
    #[garde(length(min = 1))]
    pub otel_service_name: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

// MQTT defaults
fn default_mqtt_host() -> String {
    "localhost".to_string()
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_mqtt_topic() -> String {
    "heru/sensors/#".to_string()
}

fn default_mqtt_client_id() -> String {
    "heru-ingestion".to_string()
}

fn default_mqtt_keep_alive_secs() -> u64 {
    30
}

fn default_mqtt_reconnect_delay_secs() -> u64 {
    5
}

// NATS defaults
fn default_nats_url() -> String {
    "nats://localhost:4222".to_string()
}

fn default_nats_connect_timeout_secs() -> u64 {
    10
}

fn default_processing_jobs_stream() -> String {
    "processing_jobs".to_string()
}

fn default_processing_consumer_name() -> String {
    "processing-worker".to_string()
}

fn default_processing_workers() -> usize {
    2
}

fn default_processing_batch_size() -> usize {
    1
}

fn default_processing_batch_wait_secs() -> u64 {
    5
}

fn default_processing_max_deliveries() -> i64 {
    5
}

fn default_processing_retry_delay_secs() -> u64 {
    10
}

fn default_processing_ack_wait_secs() -> u64 {
    120
}

fn default_collaborator_timeout_secs() -> u64 {
    30
}

// Outbox defaults
fn default_outbox_relay_interval_secs() -> u64 {
    10
}

fn default_outbox_grace_secs() -> u64 {
    30
}

fn default_outbox_redispatch_secs() -> u64 {
    900
}

fn default_outbox_batch_size() -> usize {
    100
}

// PostgreSQL defaults
fn default_postgres_host() -> String {
    "localhost".to_string()
}

fn default_postgres_port() -> u16 {
    5432
}

fn default_postgres_database() -> String {
    "heru_iot".to_string()
}

fn default_postgres_username() -> String {
    "heru".to_string()
}

fn default_postgres_password() -> String {
    "heru".to_string()
}

fn default_postgres_max_pool_size() -> usize {
    10
}

// Collaborator defaults
fn default_pinata_api_url() -> String {
    anchor_worker::DEFAULT_PINATA_API_URL.to_string()
}

// Supervision defaults
fn default_supervisor_restart_delay_secs() -> u64 {
    5
}

fn default_shutdown_timeout_secs() -> u64 {
    10
}

// OpenTelemetry defaults
fn default_otel_endpoint() -> String {
    "http://localhost:4317".to_string()
}

fn default_otel_enabled() -> bool {
    false
}

fn default_otel_service_name() -> String {
    "heru-all-in-one".to_string()
}

/// True when both values are set or both are empty
fn paired(a: &str, b: &str) -> bool {
    a.is_empty() == b.is_empty()
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(Environment::with_prefix("HERU"))
            .build()?
            .try_deserialize()
    }

    /// Field rules plus the checks that span several fields
    pub fn check(&self) -> DomainResult<()> {
        validate_struct(self)?;

        if !paired(&self.mqtt_username, &self.mqtt_password) {
            return Err(DomainError::InvalidConfiguration(
                "mqtt_username and mqtt_password must be set together".to_string(),
            ));
        }

        if !paired(&self.pinata_api_key, &self.pinata_secret_api_key) {
            return Err(DomainError::InvalidConfiguration(
                "pinata_api_key and pinata_secret_api_key must be set together".to_string(),
            ));
        }

        let hedera = [
            &self.hedera_relay_url,
            &self.hedera_topic_id,
            &self.hedera_account_id,
            &self.hedera_private_key,
        ];
        let hedera_unconfigured =
            self.hedera_account_id.is_empty() && self.hedera_private_key.is_empty();
        if !hedera_unconfigured && hedera.iter().any(|value| value.is_empty()) {
            return Err(DomainError::InvalidConfiguration(
                "hedera_relay_url, hedera_topic_id, hedera_account_id and hedera_private_key \
                 must all be set to anchor on Hedera"
                    .to_string(),
            ));
        }

        // The last job of a batch waits for every job before it
        let batch_budget = u64::try_from(self.processing_batch_size)
            .unwrap_or(u64::MAX)
            .saturating_mul(2)
            .saturating_mul(self.collaborator_timeout_secs);
        if self.processing_ack_wait_secs <= batch_budget {
            return Err(DomainError::InvalidConfiguration(format!(
                "processing_ack_wait_secs ({}) must exceed processing_batch_size x 2 x \
                 collaborator_timeout_secs ({})",
                self.processing_ack_wait_secs, batch_budget
            )));
        }

        // Every delivery of the previous job must be over before a new one is published
        let delivery_horizon = u64::try_from(self.processing_max_deliveries)
            .unwrap_or(0)
            .saturating_mul(self.processing_ack_wait_secs + self.processing_retry_delay_secs);
        if self.outbox_redispatch_secs <= delivery_horizon {
            return Err(DomainError::InvalidConfiguration(format!(
                "outbox_redispatch_secs ({}) must exceed processing_max_deliveries x \
                 (processing_ack_wait_secs + processing_retry_delay_secs) ({})",
                self.outbox_redispatch_secs, delivery_horizon
            )));
        }

        Ok(())
    }

    pub fn jobs_subject(&self) -> String {
        format!("{}.{}", self.processing_jobs_stream, PROCESS_SENSOR_DATA)
    }

    pub fn telemetry_config(&self) -> TelemetryConfig {
        let console = TelemetryConfig::console(&self.otel_service_name, &self.log_level);
        if self.otel_enabled {
            console.with_otlp(&self.otel_endpoint)
        } else {
            console
        }
    }

    pub fn postgres_config(&self) -> PostgresConfig {
        PostgresConfig {
            host: self.postgres_host.clone(),
            port: self.postgres_port,
            database: self.postgres_database.clone(),
            username: self.postgres_username.clone(),
            password: self.postgres_password.clone(),
            max_pool_size: self.postgres_max_pool_size,
        }
    }

    pub fn ingestion_worker_config(&self) -> IngestionWorkerConfig {
        let credential = |value: &str| (!value.is_empty()).then(|| value.to_string());

        IngestionWorkerConfig {
            mqtt: MqttSettings {
                host: self.mqtt_host.clone(),
                port: self.mqtt_port,
                client_id: self.mqtt_client_id.clone(),
                username: credential(&self.mqtt_username),
                password: credential(&self.mqtt_password),
                keep_alive: Duration::from_secs(self.mqtt_keep_alive_secs),
                ..Default::default()
            },
            telemetry_topic: self.mqtt_topic.clone(),
            reconnect_delay: Duration::from_secs(self.mqtt_reconnect_delay_secs),
            jobs_subject: self.jobs_subject(),
            outbox_relay: OutboxRelayConfig {
                interval: Duration::from_secs(self.outbox_relay_interval_secs),
                grace: Duration::from_secs(self.outbox_grace_secs),
                redispatch_after: Duration::from_secs(self.outbox_redispatch_secs),
                batch_size: self.outbox_batch_size,
            },
        }
    }

    pub fn anchor_worker_config(&self) -> AnchorWorkerConfig {
        AnchorWorkerConfig {
            stream_name: self.processing_jobs_stream.clone(),
            consumer_name: self.processing_consumer_name.clone(),
            jobs_subject: self.jobs_subject(),
            workers: self.processing_workers,
            batch_size: self.processing_batch_size,
            batch_wait: Duration::from_secs(self.processing_batch_wait_secs),
            max_deliveries: self.processing_max_deliveries,
            ack_wait: Duration::from_secs(self.processing_ack_wait_secs),
            retry_delay: Duration::from_secs(self.processing_retry_delay_secs),
            collaborator_timeout: Duration::from_secs(self.collaborator_timeout_secs),
        }
    }

    /// `None` selects the placeholder content store
    pub fn pinata_settings(&self) -> Option<PinataSettings> {
        if self.pinata_api_key.is_empty() {
            return None;
        }
        Some(PinataSettings {
            api_url: self.pinata_api_url.clone(),
            api_key: self.pinata_api_key.clone(),
            secret_api_key: self.pinata_secret_api_key.clone(),
            request_timeout: Duration::from_secs(self.collaborator_timeout_secs),
        })
    }

    /// `None` selects the placeholder ledger
    pub fn hedera_settings(&self) -> Option<HederaRelaySettings> {
        if self.hedera_account_id.is_empty() && self.hedera_private_key.is_empty() {
            return None;
        }
        Some(HederaRelaySettings {
            relay_url: self.hedera_relay_url.clone(),
            topic_id: self.hedera_topic_id.clone(),
            account_id: self.hedera_account_id.clone(),
            private_key: self.hedera_private_key.clone(),
            request_timeout: Duration::from_secs(self.collaborator_timeout_secs),
        })
    }
}
