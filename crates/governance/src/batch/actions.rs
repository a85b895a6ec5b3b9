//! Retry and cancel of batch children
//!
//! Each child is its own unit of work. A failure on one child is recorded on
//! that child and the loop moves on; siblings that already succeeded stay
//! as they are.

use governance_trait::{Actor, JobOperation, PowerOperation};
use sea_orm::TransactionTrait;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::{info, warn};

use super::view::{ensure_visible, load_batch, refresh_batch, LoadedBatch};
use super::{require_actor, BatchEngine, BatchKind};
use crate::entity::{approval_tickets, BatchStatus, DomainEventStatus, TicketStatus};
use crate::error::{GovernanceError, Result};
use crate::payload::EventPayload;
use crate::store;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchAction {
    Retry,
    Cancel,
}

impl BatchAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Retry => "retry",
            Self::Cancel => "cancel",
        }
    }
}

impl FromStr for BatchAction {
    type Err = GovernanceError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "retry" => Ok(Self::Retry),
            "cancel" => Ok(Self::Cancel),
            other => Err(GovernanceError::InvalidRequest(format!(
                "unknown batch action: {}",
                other
            ))),
        }
    }
}

/// Result of an action against a batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchActionResponse {
    pub batch_id: String,
    pub status: BatchStatus,
    /// Children the action actually moved, not merely the eligible ones
    pub affected_count: usize,
    pub affected_ticket_ids: Vec<String>,
}

impl BatchEngine {
    /// Run `action` against every eligible child of a batch the actor may see
    pub async fn perform_action(
        &self,
        actor: &Actor,
        batch_id: &str,
        action: BatchAction,
    ) -> Result<BatchActionResponse> {
        require_actor(actor)?;
        let batch = load_batch(self.db.connection(), batch_id).await?;
        ensure_visible(actor, &batch)?;

        let affected = match action {
            BatchAction::Cancel => self.cancel_children(&batch).await?,
            BatchAction::Retry => match batch.kind {
                BatchKind::Create | BatchKind::Delete => {
                    self.retry_via_gateway(actor, &batch).await?
                }
                BatchKind::Power => self.retry_power(&batch).await?,
            },
        };

        // Reload so the parent sync compares against what the action left behind
        let batch = load_batch(self.db.connection(), batch_id).await?;
        let status = refresh_batch(self.db.connection(), &batch).await?.status;
        info!(
            "Batch {} {} by {}: {} children affected, now {}",
            batch.id(),
            action.as_str(),
            actor.id,
            affected.len(),
            status
        );

        Ok(BatchActionResponse {
            batch_id: batch.id().to_string(),
            status,
            affected_count: affected.len(),
            affected_ticket_ids: affected,
        })
    }

    async fn children_in(
        &self,
        batch: &LoadedBatch,
        statuses: &[TicketStatus],
    ) -> Result<Vec<approval_tickets::Model>> {
        let children = store::list_children(self.db.connection(), batch.id()).await?;
        Ok(children
            .into_iter()
            .filter(|c| statuses.contains(&c.status))
            .collect())
    }

    /// Every PENDING child and its event move to CANCELLED together
    async fn cancel_children(&self, batch: &LoadedBatch) -> Result<Vec<String>> {
        let eligible = self.children_in(batch, &[TicketStatus::Pending]).await?;
        if eligible.is_empty() {
            return Ok(Vec::new());
        }
        let ticket_ids: Vec<String> = eligible.iter().map(|c| c.id.clone()).collect();
        let event_ids: Vec<String> = eligible.iter().map(|c| c.event_id.clone()).collect();

        let txn = self.db.connection().begin().await?;
        store::bulk_set_ticket_status(&txn, &ticket_ids, TicketStatus::Cancelled).await?;
        store::bulk_set_event_status(&txn, &event_ids, DomainEventStatus::Cancelled).await?;
        txn.commit().await?;

        Ok(ticket_ids)
    }

    /// Re-approve each FAILED/REJECTED child with the parent's selections
    async fn retry_via_gateway(&self, actor: &Actor, batch: &LoadedBatch) -> Result<Vec<String>> {
        let eligible = self.children_in(batch, &TicketStatus::RETRYABLE).await?;
        if eligible.is_empty() {
            return Ok(Vec::new());
        }
        self.reopen_parent(batch).await?;

        let cluster = batch.parent.selected_cluster_id.as_deref();
        let storage_class = batch.parent.selected_storage_class.as_deref();

        let mut affected = Vec::with_capacity(eligible.len());
        for child in eligible {
            match self
                .gateway
                .approve(&child.id, &actor.id, cluster, storage_class)
                .await
            {
                Ok(()) => affected.push(child.id),
                Err(e) => {
                    warn!(
                        "Retry of ticket {} in batch {} failed: {}",
                        child.id,
                        batch.id(),
                        e
                    );
                    self.record_child_failure(&child.id, &child.event_id, &e.to_string())
                        .await;
                }
            }
        }
        Ok(affected)
    }

    /// Put FAILED/REJECTED power children back to EXECUTING one at a time and
    /// re-enqueue their jobs. A child that cannot be moved stays retryable.
    async fn retry_power(&self, batch: &LoadedBatch) -> Result<Vec<String>> {
        let eligible = self.children_in(batch, &TicketStatus::RETRYABLE).await?;
        if eligible.is_empty() {
            return Ok(Vec::new());
        }
        self.reopen_parent(batch).await?;

        let mut affected = Vec::with_capacity(eligible.len());
        for child in eligible {
            let power = match self.power_operation_of(&child).await {
                Ok(Some(power)) => power,
                Ok(None) => {
                    warn!("Ticket {} has no power operation to retry", child.id);
                    self.record_child_failure(
                        &child.id,
                        &child.event_id,
                        "unknown power operation for retry",
                    )
                    .await;
                    continue;
                }
                Err(e) => {
                    warn!("Failed to load power event of ticket {}: {}", child.id, e);
                    continue;
                }
            };

            if let Err(e) = self.reset_for_retry(&child).await {
                warn!("Failed to reset ticket {} for retry: {}", child.id, e);
                continue;
            }

            match self
                .jobs
                .enqueue(&child.event_id, JobOperation::VmPower(power))
                .await
            {
                Ok(()) => affected.push(child.id),
                Err(e) => {
                    warn!("Failed to re-enqueue vm_power job for ticket {}: {}", child.id, e);
                    self.record_child_failure(
                        &child.id,
                        &child.event_id,
                        &format!("failed to enqueue vm_power job: {}", e),
                    )
                    .await;
                }
            }
        }
        Ok(affected)
    }

    async fn power_operation_of(
        &self,
        child: &approval_tickets::Model,
    ) -> Result<Option<PowerOperation>> {
        Ok(store::find_event(self.db.connection(), &child.event_id)
            .await?
            .and_then(|e| EventPayload::from_parts(e.event_type, &e.payload).ok())
            .and_then(|p| match p {
                EventPayload::VmPower(power) => Some(power.operation),
                _ => None,
            }))
    }

    /// Ticket back to EXECUTING and event back to PENDING, together
    async fn reset_for_retry(&self, child: &approval_tickets::Model) -> Result<()> {
        let txn = self.db.connection().begin().await?;
        store::set_ticket_status(&txn, &child.id, TicketStatus::Executing).await?;
        store::set_event_status(&txn, &child.event_id, DomainEventStatus::Pending).await?;
        txn.commit().await?;
        Ok(())
    }

    /// A retry reopens a parent that was synced to a terminal state
    async fn reopen_parent(&self, batch: &LoadedBatch) -> Result<()> {
        let conn = self.db.connection();
        if batch.event.status != DomainEventStatus::Processing {
            store::set_event_status(conn, &batch.event.id, DomainEventStatus::Processing).await?;
        }
        if batch.parent.status != TicketStatus::Executing {
            store::set_ticket_status(conn, batch.id(), TicketStatus::Executing).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_action() {
        assert_eq!("retry".parse::<BatchAction>().unwrap(), BatchAction::Retry);
        assert_eq!(" CANCEL ".parse::<BatchAction>().unwrap(), BatchAction::Cancel);
        assert!(matches!(
            "approve".parse::<BatchAction>(),
            Err(GovernanceError::InvalidRequest(_))
        ));
    }
}
