//! Shared fixtures for governance integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use governance::batch::{BatchEngine, BatchItem, BatchSubmitRequest};
use governance::catalog::{StoreNamespaceVisibility, StoreVmLookup};
use governance::config::GovernanceConfig;
use governance::entity::{namespaces, vms};
use governance::gateway::StoreApprovalGateway;
use governance::jobs::StoreJobQueue;
use governance::rate_limit::{RateLimitAdmin, RateLimiter};
use governance::Database;
use governance_trait::{
    Actor, ApprovalGateway, CollaboratorError, CollaboratorResult, JobOperation, JobQueue,
    RoleBinding,
};
use sea_orm::{ActiveModelTrait, Set};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub const TEST_NAMESPACE: &str = "team-a-test";
pub const PROD_NAMESPACE: &str = "team-a-prod";

/// Store gateway that fails for chosen ticket ids
pub struct ScriptedGateway {
    inner: StoreApprovalGateway,
    failing: Mutex<HashSet<String>>,
}

impl ScriptedGateway {
    pub fn fail_ticket(&self, ticket_id: &str) {
        self.failing.lock().unwrap().insert(ticket_id.to_string());
    }
}

#[async_trait]
impl ApprovalGateway for ScriptedGateway {
    async fn approve(
        &self,
        ticket_id: &str,
        actor: &str,
        selected_cluster_id: Option<&str>,
        selected_storage_class: Option<&str>,
    ) -> CollaboratorResult<()> {
        if self.failing.lock().unwrap().contains(ticket_id) {
            return Err(CollaboratorError::unavailable(format!(
                "provider refused ticket {}",
                ticket_id
            )));
        }
        self.inner
            .approve(ticket_id, actor, selected_cluster_id, selected_storage_class)
            .await
    }

    async fn reject(&self, ticket_id: &str, actor: &str, reason: &str) -> CollaboratorResult<()> {
        if self.failing.lock().unwrap().contains(ticket_id) {
            return Err(CollaboratorError::unavailable("provider unreachable"));
        }
        self.inner.reject(ticket_id, actor, reason).await
    }
}

/// Store job queue that fails chosen event ids or chosen call numbers
pub struct ScriptedJobQueue {
    inner: StoreJobQueue,
    failing_events: Mutex<HashSet<String>>,
    failing_calls: Mutex<HashSet<usize>>,
    calls: AtomicUsize,
}

impl ScriptedJobQueue {
    pub fn fail_event(&self, event_id: &str) {
        self.failing_events
            .lock()
            .unwrap()
            .insert(event_id.to_string());
    }

    /// Fail the n-th enqueue call, counting from 0
    pub fn fail_call(&self, n: usize) {
        self.failing_calls.lock().unwrap().insert(n);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl JobQueue for ScriptedJobQueue {
    async fn enqueue(&self, event_id: &str, operation: JobOperation) -> CollaboratorResult<()> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing_calls.lock().unwrap().contains(&call)
            || self.failing_events.lock().unwrap().contains(event_id)
        {
            return Err(CollaboratorError::unavailable("queue is full"));
        }
        self.inner.enqueue(event_id, operation).await
    }
}

pub struct TestEnv {
    pub db: Database,
    pub engine: BatchEngine,
    pub admin: RateLimitAdmin,
    pub gateway: Arc<ScriptedGateway>,
    pub jobs: Arc<ScriptedJobQueue>,
    pub store_jobs: StoreJobQueue,
    pub config: GovernanceConfig,
}

/// Config used by most tests: defaults with the cooldown disabled
pub fn test_config() -> GovernanceConfig {
    let mut config = GovernanceConfig {
        database_url: "sqlite::memory:".to_string(),
        max_connections: 1,
        ..Default::default()
    };
    config.rate_limits.cooldown_seconds = 0;
    config
}

pub async fn setup() -> TestEnv {
    setup_with(test_config()).await
}

pub async fn setup_with(config: GovernanceConfig) -> TestEnv {
    let db = Database::new(&config).await.unwrap();
    db.create_schema().await.unwrap();
    seed_catalog(&db).await;

    let store_jobs = StoreJobQueue::new(db.clone());
    let jobs = Arc::new(ScriptedJobQueue {
        inner: store_jobs.clone(),
        failing_events: Mutex::new(HashSet::new()),
        failing_calls: Mutex::new(HashSet::new()),
        calls: AtomicUsize::new(0),
    });
    let gateway = Arc::new(ScriptedGateway {
        inner: StoreApprovalGateway::new(db.clone(), Arc::new(store_jobs.clone())),
        failing: Mutex::new(HashSet::new()),
    });

    let engine = BatchEngine::new(
        db.clone(),
        gateway.clone(),
        jobs.clone(),
        Arc::new(StoreVmLookup::new(db.clone())),
        Arc::new(StoreNamespaceVisibility::new(db.clone())),
        RateLimiter::new(config.rate_limits.clone()),
        config.batch.clone(),
    );
    let admin = RateLimitAdmin::new(db.clone(), config.rate_limits.clone());

    TestEnv {
        db,
        engine,
        admin,
        gateway,
        jobs,
        store_jobs,
        config,
    }
}

async fn seed_catalog(db: &Database) {
    let conn = db.connection();
    for (name, environment) in [
        (TEST_NAMESPACE, "test"),
        (PROD_NAMESPACE, "prod"),
        ("team-a-staging", "staging"),
    ] {
        namespaces::ActiveModel {
            name: Set(name.to_string()),
            environment: Set(environment.to_string()),
            created_at: Set(Utc::now()),
        }
        .insert(conn)
        .await
        .unwrap();
    }

    for i in 1..=5 {
        insert_vm(db, &format!("vm-{}", i), TEST_NAMESPACE).await;
    }
    insert_vm(db, "vm-prod", PROD_NAMESPACE).await;
}

pub async fn insert_vm(db: &Database, id: &str, namespace: &str) {
    vms::ActiveModel {
        id: Set(id.to_string()),
        name: Set(format!("{}-name", id)),
        namespace: Set(namespace.to_string()),
        cluster_id: Set("cluster-1".to_string()),
        status: Set("RUNNING".to_string()),
        created_at: Set(Utc::now()),
    }
    .insert(db.connection())
    .await
    .unwrap();
}

/// A user allowed to target the test environment only
pub fn tester(id: &str) -> Actor {
    Actor::new(id, &[RoleBinding::new("vm-operator", &["test"])])
}

pub fn admin() -> Actor {
    Actor::platform_admin("root")
}

pub fn vm_item(vm_id: &str) -> BatchItem {
    BatchItem {
        vm_id: Some(vm_id.to_string()),
        ..Default::default()
    }
}

pub fn create_item(namespace: &str) -> BatchItem {
    BatchItem {
        service_id: Some(1),
        template_id: Some(2),
        instance_size_id: Some(3),
        namespace: Some(namespace.to_string()),
        name: Some("web".to_string()),
        ..Default::default()
    }
}

pub fn request(operation: &str, items: Vec<BatchItem>) -> BatchSubmitRequest {
    BatchSubmitRequest {
        operation: operation.to_string(),
        items,
        request_id: None,
        reason: Some("maintenance".to_string()),
    }
}

pub fn delete_request(vm_ids: &[&str]) -> BatchSubmitRequest {
    request("DELETE", vm_ids.iter().map(|id| vm_item(id)).collect())
}

/// Make every ticket update to FAILED abort, so recording a child failure errors
pub async fn block_failed_ticket_updates(env: &TestEnv) {
    env.db
        .execute_raw(
            "CREATE TRIGGER block_failed_tickets BEFORE UPDATE ON approval_tickets \
             WHEN NEW.status = 'FAILED' \
             BEGIN SELECT RAISE(ABORT, 'simulated storage failure'); END;",
        )
        .await
        .unwrap();
}
