use deadpool_postgres::{Config, ManagerConfig, PoolConfig, RecyclingMethod};
use serde::{Deserialize, Serialize};

/// Connection settings for the record store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostgresConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    pub password: String,
    pub max_pool_size: usize,
}

impl PostgresConfig {
    /// Settings for a server on `host:port`, with the stock `postgres` credentials
    pub fn local(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            database: "postgres".to_string(),
            username: "postgres".to_string(),
            password: "postgres".to_string(),
            max_pool_size: 5,
        }
    }

    pub(crate) fn pool_config(&self) -> Config {
        Config {
            host: Some(self.host.clone()),
            port: Some(self.port),
            dbname: Some(self.database.clone()),
            user: Some(self.username.clone()),
            password: Some(self.password.clone()),
            application_name: Some("heru".to_string()),
            manager: Some(ManagerConfig {
                recycling_method: RecyclingMethod::Fast,
            }),
            pool: Some(PoolConfig::new(self.max_pool_size.max(1))),
            ..Config::default()
        }
    }
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            database: "heru_iot".to_string(),
            max_pool_size: 10,
            ..Self::local("localhost", 5432)
        }
    }
}
