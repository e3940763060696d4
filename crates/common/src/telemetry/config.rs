use tracing_subscriber::EnvFilter;

/// How the process reports logs and traces
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TelemetryConfig {
    /// `service.name` resource attribute on exported spans and logs
    pub service_name: String,
    /// Filter directive used when `RUST_LOG` is unset, e.g. `info` or `heru=debug,info`
    pub log_level: String,
    /// OTLP gRPC collector; console-only when `None`
    pub otlp_endpoint: Option<String>,
}

impl TelemetryConfig {
    pub fn console(service_name: impl Into<String>, log_level: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            log_level: log_level.into(),
            otlp_endpoint: None,
        }
    }

    pub fn with_otlp(mut self, endpoint: impl Into<String>) -> Self {
        self.otlp_endpoint = Some(endpoint.into());
        self
    }

    pub(crate) fn env_filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(&self.log_level))
            .unwrap_or_else(|_| EnvFilter::new("info"))
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self::console("heru", "info")
    }
}
