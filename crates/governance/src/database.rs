//! Database connection and schema management

use anyhow::anyhow;
use sea_orm::{
    ConnectOptions, ConnectionTrait, Database as SeaOrmDatabase, DatabaseConnection,
    DatabaseTransaction, EntityName, EntityTrait, Schema, TransactionTrait,
};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::config::GovernanceConfig;
use crate::entity::*;
use crate::error::Result;

/// Governance database connection wrapper
#[derive(Clone)]
pub struct Database {
    connection: DatabaseConnection,
}

impl Database {
    /// Create a new database connection, retrying a few times on startup
    pub async fn new(config: &GovernanceConfig) -> Result<Self> {
        info!(
            "Connecting to governance database: {}",
            mask_connection_string(&config.database_url)
        );

        let mut attempts = 0;
        const MAX_ATTEMPTS: u32 = 3;
        const RETRY_DELAY: Duration = Duration::from_secs(2);

        loop {
            attempts += 1;

            let mut opt = ConnectOptions::new(config.database_url.clone());
            opt.max_connections(config.max_connections)
                .min_connections(1)
                .connect_timeout(Duration::from_secs(config.connection_timeout_secs))
                .acquire_timeout(Duration::from_secs(config.connection_timeout_secs))
                .idle_timeout(Duration::from_secs(600))
                .max_lifetime(Duration::from_secs(3600))
                .sqlx_logging(config.enable_sql_logging)
                .sqlx_logging_level(tracing::log::LevelFilter::Debug);

            match SeaOrmDatabase::connect(opt).await {
                Ok(connection) => {
                    info!(
                        "Connected to governance database (max connections: {})",
                        config.max_connections
                    );
                    return Ok(Self { connection });
                }
                Err(e) if attempts < MAX_ATTEMPTS => {
                    warn!(
                        "Failed to connect to database (attempt {}/{}): {}",
                        attempts, MAX_ATTEMPTS, e
                    );
                    tokio::time::sleep(RETRY_DELAY).await;
                }
                Err(e) => {
                    error!("Failed to connect to database after {} attempts", MAX_ATTEMPTS);
                    return Err(anyhow!("Database connection failed: {}", e).into());
                }
            }
        }
    }

    /// Wrap an existing connection
    pub fn from_connection(connection: DatabaseConnection) -> Self {
        Self { connection }
    }

    /// Get a reference to the database connection
    pub fn connection(&self) -> &DatabaseConnection {
        &self.connection
    }

    /// Health check
    pub async fn health_check(&self) -> Result<()> {
        self.connection.ping().await?;
        Ok(())
    }

    /// Begin a database transaction
    pub async fn begin_transaction(&self) -> Result<DatabaseTransaction> {
        Ok(self.connection.begin().await?)
    }

    /// Create every governance table that does not exist yet.
    ///
    /// Tables are created in dependency order so foreign keys resolve.
    pub async fn create_schema(&self) -> Result<()> {
        let backend = self.connection.get_database_backend();
        let schema = Schema::new(backend);

        create_table(&self.connection, &schema, DomainEvents).await?;
        create_table(&self.connection, &schema, ApprovalTickets).await?;
        create_table(&self.connection, &schema, BatchApprovalTickets).await?;
        create_table(&self.connection, &schema, RateLimitExemptions).await?;
        create_table(&self.connection, &schema, RateLimitUserOverrides).await?;
        create_table(&self.connection, &schema, Vms).await?;
        create_table(&self.connection, &schema, Namespaces).await?;
        create_table(&self.connection, &schema, Jobs).await?;

        info!("Governance schema is up to date");
        Ok(())
    }

    /// Execute raw SQL (for operations not covered by SeaORM)
    pub async fn execute_raw(&self, sql: &str) -> Result<()> {
        debug!("Executing raw SQL: {}", sql);
        self.connection.execute_unprepared(sql).await?;
        Ok(())
    }
}

async fn create_table<E>(conn: &DatabaseConnection, schema: &Schema, entity: E) -> Result<()>
where
    E: EntityTrait,
{
    let table_name = entity.table_name().to_string();
    let mut statement = schema.create_table_from_entity(entity);
    statement.if_not_exists();
    let backend = conn.get_database_backend();
    conn.execute(backend.build(&statement)).await?;
    debug!("Ensured table {}", table_name);
    Ok(())
}

/// Mask sensitive parts of connection string for logging
pub fn mask_connection_string(conn_str: &str) -> String {
    if let Ok(mut parsed) = url::Url::parse(conn_str) {
        if parsed.password().is_some() && parsed.set_password(Some("****")).is_ok() {
            return parsed.to_string();
        }
        return conn_str.to_string();
    }
    if let Some(at_pos) = conn_str.find('@') {
        if let Some(double_slash_pos) = conn_str.find("//") {
            let prefix = &conn_str[..double_slash_pos + 2];
            let suffix = &conn_str[at_pos..];
            return format!("{}****{}", prefix, suffix);
        }
    }
    conn_str.to_string()
}
