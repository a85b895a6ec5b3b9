//! Admin approve/reject of a whole batch

use chrono::Utc;
use governance_trait::Actor;
use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::actions::BatchActionResponse;
use super::view::{load_batch, refresh_batch, LoadedBatch};
use super::{require_actor, BatchEngine};
use crate::entity::{approval_tickets, DomainEventStatus, TicketStatus};
use crate::error::{GovernanceError, Result};
use crate::store;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApproveBatchRequest {
    #[serde(default)]
    pub selected_cluster_id: Option<String>,
    #[serde(default)]
    pub selected_storage_class: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectBatchRequest {
    #[serde(default)]
    pub reason: String,
}

impl BatchEngine {
    /// Approve every PENDING child. The selections are kept on the parent
    /// so a later retry reuses them.
    pub async fn approve_batch(
        &self,
        actor: &Actor,
        batch_id: &str,
        request: ApproveBatchRequest,
    ) -> Result<BatchActionResponse> {
        let batch = self.load_for_admin(actor, batch_id).await?;
        let conn = self.db.connection();
        let cluster = request
            .selected_cluster_id
            .filter(|v| !v.trim().is_empty());
        let storage_class = request
            .selected_storage_class
            .filter(|v| !v.trim().is_empty());

        approval_tickets::Entity::update_many()
            .col_expr(approval_tickets::Column::Approver, Expr::value(actor.id.clone()))
            .col_expr(
                approval_tickets::Column::SelectedClusterId,
                Expr::value(cluster.clone()),
            )
            .col_expr(
                approval_tickets::Column::SelectedStorageClass,
                Expr::value(storage_class.clone()),
            )
            .col_expr(approval_tickets::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(approval_tickets::Column::Id.eq(batch.id()))
            .exec(conn)
            .await?;
        if batch.parent.status == TicketStatus::Pending {
            store::set_ticket_status(conn, batch.id(), TicketStatus::Executing).await?;
        }
        if batch.event.status == DomainEventStatus::Pending {
            store::set_event_status(conn, &batch.event.id, DomainEventStatus::Processing).await?;
        }

        let pending = self.pending_children(&batch).await?;
        let mut affected = Vec::with_capacity(pending.len());
        for child in pending {
            match self
                .gateway
                .approve(&child.id, &actor.id, cluster.as_deref(), storage_class.as_deref())
                .await
            {
                Ok(()) => affected.push(child.id),
                Err(e) => {
                    warn!(
                        "Approval of ticket {} in batch {} failed: {}",
                        child.id,
                        batch.id(),
                        e
                    );
                    self.record_child_failure(&child.id, &child.event_id, &e.to_string())
                        .await;
                }
            }
        }

        self.finish_admin_action(actor, batch_id, "approved", affected)
            .await
    }

    /// Reject every PENDING child with one reason
    pub async fn reject_batch(
        &self,
        actor: &Actor,
        batch_id: &str,
        request: RejectBatchRequest,
    ) -> Result<BatchActionResponse> {
        let reason = request.reason.trim().to_string();
        if reason.is_empty() {
            return Err(GovernanceError::InvalidRequest(
                "a rejection reason is required".to_string(),
            ));
        }
        let batch = self.load_for_admin(actor, batch_id).await?;
        let conn = self.db.connection();

        approval_tickets::Entity::update_many()
            .col_expr(approval_tickets::Column::Approver, Expr::value(actor.id.clone()))
            .col_expr(
                approval_tickets::Column::RejectReason,
                Expr::value(store::truncate_error(&reason)),
            )
            .col_expr(approval_tickets::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(approval_tickets::Column::Id.eq(batch.id()))
            .exec(conn)
            .await?;

        let pending = self.pending_children(&batch).await?;
        let mut affected = Vec::with_capacity(pending.len());
        for child in pending {
            match self.gateway.reject(&child.id, &actor.id, &reason).await {
                Ok(()) => affected.push(child.id),
                Err(e) => {
                    warn!(
                        "Rejection of ticket {} in batch {} failed: {}",
                        child.id,
                        batch.id(),
                        e
                    );
                    self.record_child_failure(&child.id, &child.event_id, &e.to_string())
                        .await;
                }
            }
        }

        self.finish_admin_action(actor, batch_id, "rejected", affected)
            .await
    }

    /// Only platform admins decide on batches. The owner learns that they
    /// lack the role; everyone else learns nothing.
    async fn load_for_admin(&self, actor: &Actor, batch_id: &str) -> Result<LoadedBatch> {
        require_actor(actor)?;
        let batch = load_batch(self.db.connection(), batch_id).await?;
        if actor.platform_admin {
            Ok(batch)
        } else if actor.id == batch.owner() {
            Err(GovernanceError::Forbidden(
                "platform admin role required to decide on a batch".to_string(),
            ))
        } else {
            Err(GovernanceError::BatchNotFound(batch_id.to_string()))
        }
    }

    async fn pending_children(&self, batch: &LoadedBatch) -> Result<Vec<approval_tickets::Model>> {
        Ok(store::list_children(self.db.connection(), batch.id())
            .await?
            .into_iter()
            .filter(|c| c.status == TicketStatus::Pending)
            .collect())
    }

    async fn finish_admin_action(
        &self,
        actor: &Actor,
        batch_id: &str,
        verb: &str,
        affected: Vec<String>,
    ) -> Result<BatchActionResponse> {
        let batch = load_batch(self.db.connection(), batch_id).await?;
        let status = refresh_batch(self.db.connection(), &batch).await?.status;
        info!(
            "Batch {} {} by {}: {} children, now {}",
            batch_id,
            verb,
            actor.id,
            affected.len(),
            status
        );
        Ok(BatchActionResponse {
            batch_id: batch_id.to_string(),
            status,
            affected_count: affected.len(),
            affected_ticket_ids: affected,
        })
    }
}
