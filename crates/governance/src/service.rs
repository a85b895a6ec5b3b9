//! Service wiring and the HTTP server runner

use anyhow::{anyhow, Result};
use governance_trait::{ApprovalGateway, JobQueue, NamespaceVisibility, VmLookup};
use std::sync::Arc;
use tracing::info;

use crate::auth::AuthProviderRegistry;
use crate::batch::BatchEngine;
use crate::catalog::{StoreNamespaceVisibility, StoreVmLookup};
use crate::config::GovernanceConfig;
use crate::database::Database;
use crate::gateway::StoreApprovalGateway;
use crate::http::{self, AppState};
use crate::jobs::StoreJobQueue;
use crate::rate_limit::{RateLimitAdmin, RateLimiter};

/// Fully wired governance service
pub struct GovernanceService {
    config: GovernanceConfig,
    db: Database,
    engine: BatchEngine,
    admin: RateLimitAdmin,
    registry: AuthProviderRegistry,
}

impl GovernanceService {
    /// Connect to the database and wire the store-backed collaborators
    pub async fn new(config: GovernanceConfig) -> Result<Self> {
        let db = Database::new(&config).await?;
        Ok(Self::with_database(config, db, AuthProviderRegistry::with_builtins()))
    }

    /// Wire the service around an existing database
    pub fn with_database(
        config: GovernanceConfig,
        db: Database,
        registry: AuthProviderRegistry,
    ) -> Self {
        let jobs: Arc<dyn JobQueue> = Arc::new(StoreJobQueue::new(db.clone()));
        let gateway: Arc<dyn ApprovalGateway> =
            Arc::new(StoreApprovalGateway::new(db.clone(), jobs.clone()));
        let vms: Arc<dyn VmLookup> = Arc::new(StoreVmLookup::new(db.clone()));
        let namespaces: Arc<dyn NamespaceVisibility> =
            Arc::new(StoreNamespaceVisibility::new(db.clone()));

        let engine = BatchEngine::new(
            db.clone(),
            gateway,
            jobs,
            vms,
            namespaces,
            RateLimiter::new(config.rate_limits.clone()),
            config.batch.clone(),
        );
        let admin = RateLimitAdmin::new(db.clone(), config.rate_limits.clone());

        Self {
            config,
            db,
            engine,
            admin,
            registry,
        }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn engine(&self) -> &BatchEngine {
        &self.engine
    }

    /// Router using the configured auth provider
    pub fn router(&self) -> Result<axum::Router> {
        let auth = self.registry.get(&self.config.auth_provider).ok_or_else(|| {
            anyhow!(
                "unknown auth provider {:?} (registered: {})",
                self.config.auth_provider,
                self.registry.names().join(", ")
            )
        })?;
        Ok(http::router(AppState {
            engine: self.engine.clone(),
            admin: self.admin.clone(),
            auth,
        }))
    }

    /// Serve HTTP until the listener fails
    pub async fn run(self) -> Result<()> {
        let app = self.router()?;
        let addr = self.config.listen_addr;
        let listener = tokio::net::TcpListener::bind(addr).await?;

        info!(
            "Governance service listening on {} (auth provider: {})",
            addr, self.config.auth_provider
        );
        axum::serve(listener, app).await?;
        Ok(())
    }
}
