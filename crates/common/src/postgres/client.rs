use crate::postgres::PostgresConfig;
use anyhow::{Context, Result};
use deadpool_postgres::{Pool, Runtime};
use tokio_postgres::NoTls;
use tracing::{debug, info};

const SCHEMA_SQL: &str = include_str!("../../migrations/0001_sensor_readings.sql");

/// Advisory lock held while the schema is applied, so replicas starting
/// together do not race on `CREATE TABLE`
const SCHEMA_LOCK_KEY: i64 = 0x6865_7275;

/// Pooled handle on the record store. Cloning shares the pool.
#[derive(Clone)]
pub struct PostgresClient {
    pool: Pool,
}

impl PostgresClient {
    /// Build the pool. No connection is opened until first use; call
    /// [`PostgresClient::ping`] to fail fast on bad settings.
    pub fn connect(config: &PostgresConfig) -> Result<Self> {
        let pool = config
            .pool_config()
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .with_context(|| {
                format!(
                    "invalid postgres settings for {}:{}/{}",
                    config.host, config.port, config.database
                )
            })?;

        debug!(
            host = %config.host,
            port = config.port,
            database = %config.database,
            max_pool_size = config.max_pool_size,
            "postgres pool created"
        );
        Ok(Self { pool })
    }

    pub async fn ping(&self) -> Result<()> {
        self.get_connection()
            .await?
            .simple_query("SELECT 1")
            .await
            .context("postgres did not answer")?;
        Ok(())
    }

    /// Apply the record store schema. Every statement is idempotent.
    pub async fn ensure_schema(&self) -> Result<()> {
        let mut conn = self.get_connection().await?;
        let tx = conn.transaction().await?;

        tx.execute("SELECT pg_advisory_xact_lock($1)", &[&SCHEMA_LOCK_KEY])
            .await
            .context("could not take schema lock")?;
        tx.batch_execute(SCHEMA_SQL)
            .await
            .context("schema statements failed")?;
        tx.commit().await?;

        info!("record store schema applied");
        Ok(())
    }

    pub async fn get_connection(&self) -> Result<deadpool_postgres::Client> {
        self.pool
            .get()
            .await
            .context("could not check out a postgres connection")
    }
}
