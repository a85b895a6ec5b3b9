//! Approval gateway backed by the ticket store

use async_trait::async_trait;
use chrono::Utc;
use governance_trait::{
    ApprovalGateway, CollaboratorError, CollaboratorResult, JobOperation, JobQueue,
    PowerOperation,
};
use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};
use std::sync::Arc;
use tracing::{debug, info};

use crate::database::Database;
use crate::entity::{approval_tickets, DomainEventStatus, DomainEventType, TicketStatus};
use crate::error::GovernanceError;
use crate::store;

/// Applies single-ticket approve/reject transitions and enqueues the
/// infrastructure job an approval implies
#[derive(Clone)]
pub struct StoreApprovalGateway {
    db: Database,
    jobs: Arc<dyn JobQueue>,
}

impl StoreApprovalGateway {
    pub fn new(db: Database, jobs: Arc<dyn JobQueue>) -> Self {
        Self { db, jobs }
    }

    async fn load_ticket(&self, ticket_id: &str) -> CollaboratorResult<approval_tickets::Model> {
        store::find_ticket(self.db.connection(), ticket_id)
            .await?
            .ok_or_else(|| CollaboratorError::not_found("ticket", ticket_id))
    }
}

/// Job an approved event of this type runs
fn job_for(event_type: DomainEventType) -> Option<JobOperation> {
    match event_type {
        DomainEventType::VmCreationRequested => Some(JobOperation::VmCreate),
        DomainEventType::VmDeletionRequested => Some(JobOperation::VmDelete),
        DomainEventType::VmStartRequested => Some(JobOperation::VmPower(PowerOperation::Start)),
        DomainEventType::VmStopRequested => Some(JobOperation::VmPower(PowerOperation::Stop)),
        DomainEventType::VmRestartRequested => {
            Some(JobOperation::VmPower(PowerOperation::Restart))
        }
        _ => None,
    }
}

#[async_trait]
impl ApprovalGateway for StoreApprovalGateway {
    async fn approve(
        &self,
        ticket_id: &str,
        actor: &str,
        selected_cluster_id: Option<&str>,
        selected_storage_class: Option<&str>,
    ) -> CollaboratorResult<()> {
        let ticket = self.load_ticket(ticket_id).await?;
        if !matches!(
            ticket.status,
            TicketStatus::Pending | TicketStatus::Failed | TicketStatus::Rejected
        ) {
            return Err(CollaboratorError::invalid_state(
                "ticket",
                ticket_id,
                format!("cannot approve a {} ticket", ticket.status),
            ));
        }

        let conn = self.db.connection();
        let event = store::find_event(conn, &ticket.event_id)
            .await?
            .ok_or_else(|| CollaboratorError::not_found("domain event", &ticket.event_id))?;
        let operation = job_for(event.event_type).ok_or_else(|| {
            CollaboratorError::invalid_state(
                "ticket",
                ticket_id,
                format!("{} events do not run infrastructure jobs", event.event_type),
            )
        })?;

        // Enqueue first: a failed enqueue leaves the ticket as it was
        self.jobs.enqueue(&event.id, operation).await?;

        approval_tickets::Entity::update_many()
            .col_expr(
                approval_tickets::Column::Status,
                Expr::value(TicketStatus::Executing),
            )
            .col_expr(approval_tickets::Column::Approver, Expr::value(actor.to_string()))
            .col_expr(
                approval_tickets::Column::SelectedClusterId,
                Expr::value(selected_cluster_id.map(str::to_string)),
            )
            .col_expr(
                approval_tickets::Column::SelectedStorageClass,
                Expr::value(selected_storage_class.map(str::to_string)),
            )
            .col_expr(
                approval_tickets::Column::RejectReason,
                Expr::value(Option::<String>::None),
            )
            .col_expr(approval_tickets::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(approval_tickets::Column::Id.eq(ticket_id))
            .exec(conn)
            .await
            .map_err(GovernanceError::from)?;
        store::set_event_status(conn, &event.id, DomainEventStatus::Processing).await?;

        info!("Ticket {} approved by {} ({})", ticket_id, actor, operation);
        Ok(())
    }

    async fn reject(&self, ticket_id: &str, actor: &str, reason: &str) -> CollaboratorResult<()> {
        let ticket = self.load_ticket(ticket_id).await?;
        if ticket.status != TicketStatus::Pending {
            return Err(CollaboratorError::invalid_state(
                "ticket",
                ticket_id,
                format!("cannot reject a {} ticket", ticket.status),
            ));
        }

        let conn = self.db.connection();
        approval_tickets::Entity::update_many()
            .col_expr(
                approval_tickets::Column::Status,
                Expr::value(TicketStatus::Rejected),
            )
            .col_expr(approval_tickets::Column::Approver, Expr::value(actor.to_string()))
            .col_expr(
                approval_tickets::Column::RejectReason,
                Expr::value(store::truncate_error(reason)),
            )
            .col_expr(approval_tickets::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(approval_tickets::Column::Id.eq(ticket_id))
            .exec(conn)
            .await
            .map_err(GovernanceError::from)?;
        store::set_event_status(conn, &ticket.event_id, DomainEventStatus::Failed).await?;

        debug!("Ticket {} rejected by {}", ticket_id, actor);
        Ok(())
    }
}
