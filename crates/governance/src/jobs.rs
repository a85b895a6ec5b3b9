//! Job queue backed by the `jobs` table, and recording of job outcomes

use async_trait::async_trait;
use chrono::Utc;
use governance_trait::{CollaboratorResult, JobOperation, JobQueue};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, IntoActiveModel, QueryFilter, QueryOrder, Set,
    TransactionTrait,
};
use tracing::{debug, info, warn};

use crate::batch::view::{load_batch, refresh_batch};
use crate::database::Database;
use crate::entity::{approval_tickets, jobs, DomainEventStatus, TicketStatus};
use crate::error::{GovernanceError, Result};
use crate::store;

pub const JOB_PENDING: &str = "PENDING";
pub const JOB_RUNNING: &str = "RUNNING";
pub const JOB_COMPLETED: &str = "COMPLETED";
pub const JOB_FAILED: &str = "FAILED";

/// Enqueues jobs as PENDING rows for workers to claim
#[derive(Clone)]
pub struct StoreJobQueue {
    db: Database,
}

impl StoreJobQueue {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Claim the oldest PENDING job, marking it RUNNING
    pub async fn claim_next(&self) -> Result<Option<jobs::Model>> {
        let conn = self.db.connection();
        let txn = conn.begin().await?;
        let Some(job) = jobs::Entity::find()
            .filter(jobs::Column::Status.eq(JOB_PENDING))
            .order_by_asc(jobs::Column::Id)
            .one(&txn)
            .await?
        else {
            txn.commit().await?;
            return Ok(None);
        };

        let attempts = job.attempts.saturating_add(1);
        let mut active = job.into_active_model();
        active.status = Set(JOB_RUNNING.to_string());
        active.attempts = Set(attempts);
        active.updated_at = Set(Utc::now());
        let claimed = active.update(&txn).await?;
        txn.commit().await?;

        debug!("Claimed job {} ({})", claimed.id, claimed.operation);
        Ok(Some(claimed))
    }
}

#[async_trait]
impl JobQueue for StoreJobQueue {
    async fn enqueue(&self, event_id: &str, operation: JobOperation) -> CollaboratorResult<()> {
        let now = Utc::now();
        let job = jobs::ActiveModel {
            kind: Set(operation.kind().to_string()),
            event_id: Set(event_id.to_string()),
            operation: Set(operation.to_string()),
            status: Set(JOB_PENDING.to_string()),
            attempts: Set(0),
            error_message: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        };
        job.insert(self.db.connection())
            .await
            .map_err(GovernanceError::from)?;
        debug!("Enqueued {} job for event {}", operation, event_id);
        Ok(())
    }
}

/// How a worker finished a job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Succeeded,
    Failed(String),
}

/// Record the outcome of the job executing `event_id`.
///
/// The job row, the event and its ticket move together. A child ticket
/// then refreshes its batch so a finished batch releases its parent.
pub async fn record_job_outcome(db: &Database, event_id: &str, outcome: JobOutcome) -> Result<()> {
    let conn = db.connection();
    let (job_status, ticket_status, event_status, message) = match &outcome {
        JobOutcome::Succeeded => (
            JOB_COMPLETED,
            TicketStatus::Success,
            DomainEventStatus::Completed,
            None,
        ),
        JobOutcome::Failed(message) => (
            JOB_FAILED,
            TicketStatus::Failed,
            DomainEventStatus::Failed,
            Some(store::truncate_error(message)),
        ),
    };

    let txn = conn.begin().await?;
    jobs::Entity::update_many()
        .col_expr(jobs::Column::Status, Expr::value(job_status))
        .col_expr(jobs::Column::ErrorMessage, Expr::value(message.clone()))
        .col_expr(jobs::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(jobs::Column::EventId.eq(event_id))
        .filter(jobs::Column::Status.is_in([JOB_PENDING, JOB_RUNNING]))
        .exec(&txn)
        .await?;

    let ticket = store::find_ticket_by_event(&txn, event_id).await?;
    if let Some(ticket) = &ticket {
        if matches!(ticket.status, TicketStatus::Executing | TicketStatus::Approved) {
            approval_tickets::Entity::update_many()
                .col_expr(approval_tickets::Column::Status, Expr::value(ticket_status))
                .col_expr(approval_tickets::Column::RejectReason, Expr::value(message))
                .col_expr(approval_tickets::Column::UpdatedAt, Expr::value(Utc::now()))
                .filter(approval_tickets::Column::Id.eq(ticket.id.as_str()))
                .exec(&txn)
                .await?;
        } else {
            warn!(
                "Job outcome for event {} ignored for ticket {} in status {}",
                event_id, ticket.id, ticket.status
            );
        }
    }
    store::set_event_status(&txn, event_id, event_status).await?;
    txn.commit().await?;

    info!("Job for event {} finished: {:?}", event_id, outcome);

    if let Some(parent_id) = ticket.and_then(|t| t.parent_ticket_id) {
        let refreshed = match load_batch(conn, &parent_id).await {
            Ok(batch) => refresh_batch(conn, &batch).await.map(|r| r.status),
            Err(e) => Err(e),
        };
        match refreshed {
            Ok(status) => debug!("Batch {} is now {}", parent_id, status),
            Err(e) => warn!("Failed to refresh batch {}: {}", parent_id, e),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use governance_trait::PowerOperation;
    use crate::config::GovernanceConfig;

    async fn database() -> Database {
        let config = GovernanceConfig {
            database_url: "sqlite::memory:".to_string(),
            max_connections: 1,
            ..Default::default()
        };
        let db = Database::new(&config).await.unwrap();
        db.create_schema().await.unwrap();
        db
    }

    #[tokio::test]
    async fn test_enqueue_then_claim() {
        let db = database().await;
        let queue = StoreJobQueue::new(db.clone());

        queue
            .enqueue("event-1", JobOperation::VmPower(PowerOperation::Stop))
            .await
            .unwrap();
        queue.enqueue("event-2", JobOperation::VmDelete).await.unwrap();

        let first = queue.claim_next().await.unwrap().unwrap();
        assert_eq!(first.event_id, "event-1");
        assert_eq!(first.kind, "vm_power");
        assert_eq!(first.operation, "vm_power:stop");
        assert_eq!(first.status, JOB_RUNNING);
        assert_eq!(first.attempts, 1);

        let second = queue.claim_next().await.unwrap().unwrap();
        assert_eq!(second.event_id, "event-2");
        assert!(queue.claim_next().await.unwrap().is_none());
    }
}
