//! Batch submission pipeline
//!
//! Order of checks: identity, batch size, operation, idempotent replay,
//! rate limits, then per-item validation. Nothing is written until every
//! check passed; the parent, projection and children then commit as one
//! transaction.

use chrono::{DateTime, Duration, Utc};
use governance_trait::{Actor, CollaboratorError, JobOperation, PowerOperation};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseTransaction, EntityTrait,
    QueryFilter, QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use super::view::{load_batch, refresh_batch};
use super::{require_actor, BatchEngine, BatchKind, BatchOperation};
use crate::entity::{batch_approval_tickets, BatchStatus, DomainEventStatus, TicketStatus};
use crate::error::{GovernanceError, Result};
use crate::payload::{
    BatchParentPayload, EventPayload, VmCreatePayload, VmDeletePayload, VmPowerPayload,
};
use crate::store::{self, NewTicket};

/// A batch submission as received from the caller
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchSubmitRequest {
    pub operation: String,
    #[serde(default)]
    pub items: Vec<BatchItem>,
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
}

/// One item of a batch. CREATE uses the catalog ids and namespace,
/// DELETE and POWER use `vm_id`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchItem {
    #[serde(default)]
    pub vm_id: Option<String>,
    #[serde(default)]
    pub service_id: Option<u64>,
    #[serde(default)]
    pub template_id: Option<u64>,
    #[serde(default)]
    pub instance_size_id: Option<u64>,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSubmitResponse {
    pub batch_id: String,
    pub status: BatchStatus,
    pub status_url: String,
    pub retry_after_seconds: u64,
}

/// A validated child ready to persist
#[derive(Debug, Clone)]
struct PreparedChild {
    payload: EventPayload,
    aggregate_id: Option<String>,
    reason: Option<String>,
}

impl BatchEngine {
    /// Submit a batch, or return the batch an earlier identical submission created
    pub async fn submit_batch(
        &self,
        actor: &Actor,
        request: BatchSubmitRequest,
    ) -> Result<BatchSubmitResponse> {
        require_actor(actor)?;

        let count = request.items.len();
        if count == 0 || count > self.settings.max_items {
            return Err(GovernanceError::InvalidBatchSize {
                count,
                max: self.settings.max_items,
            });
        }
        let operation = BatchOperation::parse(&request.operation)?;
        let request_id = non_empty(request.request_id.as_deref());
        let reason = non_empty(request.reason.as_deref());

        let conn = self.db.connection();

        if let Some(request_id) = &request_id {
            if let Some(batch_id) =
                find_replayed_batch(conn, &actor.id, operation, request_id).await?
            {
                info!(
                    "Replaying batch {} for {} (request_id: {})",
                    batch_id, actor.id, request_id
                );
                let status = match operation.kind() {
                    BatchKind::Create | BatchKind::Delete => BatchStatus::PendingApproval,
                    BatchKind::Power => {
                        let batch = load_batch(conn, &batch_id).await?;
                        refresh_batch(conn, &batch).await?.status
                    }
                };
                return Ok(self.response(batch_id, status));
            }
        }

        self.limiter
            .check_submission(conn, &actor.id, count as u64)
            .await?;

        let mut children = Vec::with_capacity(count);
        for (index, item) in request.items.iter().enumerate() {
            let child = self
                .prepare_child(actor, operation, index, item, reason.as_deref())
                .await?;
            children.push(child);
        }

        let parent_payload = BatchParentPayload {
            operation: operation.as_str().to_string(),
            request_id: request_id.clone(),
            item_count: count,
            reason: reason.clone(),
        };

        let txn = self.db.begin_transaction().await?;
        let persisted = match persist_batch(
            &txn,
            &actor.id,
            operation.kind(),
            parent_payload,
            children,
            Utc::now(),
        )
        .await
        {
            Ok(persisted) => persisted,
            Err(e) => {
                error!(
                    "Failed to persist {} batch for {}: {}",
                    operation, actor.id, e
                );
                if let Err(rollback_err) = txn.rollback().await {
                    error!("Rollback failed: {}", rollback_err);
                }
                return Err(e);
            }
        };
        txn.commit().await?;

        info!(
            "Batch {} submitted by {}: {} x {}",
            persisted.batch_id, actor.id, operation, count
        );

        let status = match operation {
            BatchOperation::Create | BatchOperation::Delete => BatchStatus::PendingApproval,
            BatchOperation::Power(power) => {
                self.enqueue_power_children(&persisted.children, power)
                    .await;
                self.committed_power_status(&persisted.batch_id).await
            }
        };

        Ok(self.response(persisted.batch_id, status))
    }

    fn response(&self, batch_id: String, status: BatchStatus) -> BatchSubmitResponse {
        BatchSubmitResponse {
            status_url: self.status_url(&batch_id),
            batch_id,
            status,
            retry_after_seconds: self.settings.status_poll_retry_after_seconds,
        }
    }

    async fn prepare_child(
        &self,
        actor: &Actor,
        operation: BatchOperation,
        index: usize,
        item: &BatchItem,
        batch_reason: Option<&str>,
    ) -> Result<PreparedChild> {
        let reason = non_empty(item.reason.as_deref()).or_else(|| batch_reason.map(str::to_string));
        let invalid = |message: &str| GovernanceError::InvalidBatchItem {
            index,
            message: message.to_string(),
        };

        match operation {
            BatchOperation::Create => {
                let service_id = item
                    .service_id
                    .filter(|v| *v != 0)
                    .ok_or_else(|| invalid("service_id is required"))?;
                let template_id = item
                    .template_id
                    .filter(|v| *v != 0)
                    .ok_or_else(|| invalid("template_id is required"))?;
                let instance_size_id = item
                    .instance_size_id
                    .filter(|v| *v != 0)
                    .ok_or_else(|| invalid("instance_size_id is required"))?;
                let namespace = non_empty(item.namespace.as_deref())
                    .ok_or_else(|| invalid("namespace is required"))?;
                self.check_namespace(actor, index, &namespace).await?;

                Ok(PreparedChild {
                    payload: EventPayload::VmCreation(VmCreatePayload {
                        service_id,
                        template_id,
                        instance_size_id,
                        namespace,
                        name: non_empty(item.name.as_deref()),
                        reason: reason.clone(),
                    }),
                    aggregate_id: None,
                    reason,
                })
            }
            BatchOperation::Delete | BatchOperation::Power(_) => {
                let vm_id =
                    non_empty(item.vm_id.as_deref()).ok_or_else(|| invalid("vm_id is required"))?;
                let vm = match self.vms.get_vm(&vm_id).await {
                    Ok(vm) => vm,
                    Err(CollaboratorError::NotFound { .. }) => {
                        return Err(GovernanceError::VmNotFound { index, vm_id });
                    }
                    Err(e) => return Err(e.into()),
                };
                self.check_namespace(actor, index, &vm.namespace).await?;

                let payload = match operation {
                    BatchOperation::Power(power) => EventPayload::VmPower(VmPowerPayload {
                        vm_id: vm.id.clone(),
                        vm_name: vm.name,
                        namespace: vm.namespace,
                        cluster_id: vm.cluster_id,
                        operation: power,
                        reason: reason.clone(),
                    }),
                    _ => EventPayload::VmDeletion(VmDeletePayload {
                        vm_id: vm.id.clone(),
                        vm_name: vm.name,
                        namespace: vm.namespace,
                        cluster_id: vm.cluster_id,
                        reason: reason.clone(),
                    }),
                };
                Ok(PreparedChild {
                    payload,
                    aggregate_id: Some(vm.id),
                    reason,
                })
            }
        }
    }

    async fn check_namespace(&self, actor: &Actor, index: usize, namespace: &str) -> Result<()> {
        if self
            .namespaces
            .is_namespace_visible(namespace, &actor.visibility)
            .await?
        {
            Ok(())
        } else {
            Err(GovernanceError::NamespaceEnvForbidden {
                index,
                namespace: namespace.to_string(),
            })
        }
    }

    /// Hand every POWER child to the job queue; a failed enqueue fails only that child
    async fn enqueue_power_children(&self, children: &[PersistedChild], power: PowerOperation) {
        for child in children {
            if let Err(e) = self
                .jobs
                .enqueue(&child.event_id, JobOperation::VmPower(power))
                .await
            {
                warn!(
                    "Failed to enqueue vm_power job for ticket {}: {}",
                    child.ticket_id, e
                );
                self.record_child_failure(
                    &child.ticket_id,
                    &child.event_id,
                    &format!("failed to enqueue vm_power job: {}", e),
                )
                .await;
            }
        }
    }

    /// Live status of a committed POWER batch. The batch already exists, so a
    /// read failure falls back to IN_PROGRESS and the next read heals the projection.
    async fn committed_power_status(&self, batch_id: &str) -> BatchStatus {
        let conn = self.db.connection();
        let refreshed = match load_batch(conn, batch_id).await {
            Ok(batch) => refresh_batch(conn, &batch).await.map(|r| r.status),
            Err(e) => Err(e),
        };
        refreshed.unwrap_or_else(|e| {
            warn!("Failed to refresh committed batch {}: {}", batch_id, e);
            BatchStatus::InProgress
        })
    }
}

#[derive(Debug, Clone)]
struct PersistedChild {
    ticket_id: String,
    event_id: String,
}

#[derive(Debug, Clone)]
struct PersistedBatch {
    batch_id: String,
    children: Vec<PersistedChild>,
}

/// Write parent event, parent ticket, projection and every child
async fn persist_batch(
    txn: &DatabaseTransaction,
    actor_id: &str,
    kind: BatchKind,
    parent_payload: BatchParentPayload,
    children: Vec<PreparedChild>,
    now: DateTime<Utc>,
) -> Result<PersistedBatch> {
    let (event_status, ticket_status, batch_status) = match kind {
        BatchKind::Create | BatchKind::Delete => (
            DomainEventStatus::Pending,
            TicketStatus::Pending,
            BatchStatus::PendingApproval,
        ),
        BatchKind::Power => (
            DomainEventStatus::Processing,
            TicketStatus::Executing,
            BatchStatus::InProgress,
        ),
    };
    let parent_event_payload = match kind {
        BatchKind::Create => EventPayload::BatchCreate(parent_payload.clone()),
        BatchKind::Delete => EventPayload::BatchDelete(parent_payload.clone()),
        BatchKind::Power => EventPayload::BatchPower(parent_payload.clone()),
    };

    let batch_id = store::new_id();
    let parent_event = store::insert_event(
        txn,
        parent_event_payload,
        &batch_id,
        event_status,
        actor_id,
        now,
    )
    .await?;
    store::insert_ticket(
        txn,
        NewTicket {
            id: batch_id.clone(),
            event_id: parent_event.id,
            operation_type: kind.ticket_operation(),
            requester: actor_id.to_string(),
            status: ticket_status,
            reason: parent_payload.reason.clone(),
            parent_ticket_id: None,
            created_at: now,
        },
    )
    .await?;

    let child_count = children.len() as i32;
    batch_approval_tickets::ActiveModel {
        id: Set(batch_id.clone()),
        batch_type: Set(kind.batch_type()),
        child_count: Set(child_count),
        success_count: Set(0),
        failed_count: Set(0),
        pending_count: Set(child_count),
        status: Set(batch_status),
        created_by: Set(actor_id.to_string()),
        reason: Set(parent_payload.reason.clone()),
        request_id: Set(parent_payload.request_id.clone()),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(txn)
    .await?;

    let mut persisted = Vec::with_capacity(children.len());
    for (index, child) in children.into_iter().enumerate() {
        // Children keep submission order through strictly increasing timestamps
        let created_at = now + Duration::microseconds(index as i64 + 1);
        let ticket_id = store::new_id();
        let aggregate_id = child.aggregate_id.unwrap_or_else(|| ticket_id.clone());
        let event = store::insert_event(
            txn,
            child.payload,
            &aggregate_id,
            DomainEventStatus::Pending,
            actor_id,
            created_at,
        )
        .await?;
        store::insert_ticket(
            txn,
            NewTicket {
                id: ticket_id.clone(),
                event_id: event.id.clone(),
                operation_type: kind.ticket_operation(),
                requester: actor_id.to_string(),
                status: ticket_status,
                reason: child.reason,
                parent_ticket_id: Some(batch_id.clone()),
                created_at,
            },
        )
        .await?;
        persisted.push(PersistedChild {
            ticket_id,
            event_id: event.id,
        });
    }

    Ok(PersistedBatch {
        batch_id,
        children: persisted,
    })
}

/// Find the parent ticket of an earlier batch with the same actor,
/// operation and request id.
///
/// Candidates come from the projection, which is written in the same
/// transaction as the parent; the parent event payload has the final say.
async fn find_replayed_batch<C>(
    conn: &C,
    actor_id: &str,
    operation: BatchOperation,
    request_id: &str,
) -> Result<Option<String>>
where
    C: ConnectionTrait,
{
    let candidates = batch_approval_tickets::Entity::find()
        .filter(batch_approval_tickets::Column::CreatedBy.eq(actor_id))
        .filter(batch_approval_tickets::Column::RequestId.eq(request_id))
        .filter(batch_approval_tickets::Column::BatchType.eq(operation.kind().batch_type()))
        .order_by_desc(batch_approval_tickets::Column::CreatedAt)
        .all(conn)
        .await?;

    for candidate in candidates {
        let batch = match load_batch(conn, &candidate.id).await {
            Ok(batch) => batch,
            Err(GovernanceError::BatchNotFound(_)) => continue,
            Err(e) => return Err(e),
        };
        let Some(parent) = batch.payload.as_ref() else {
            warn!("Skipping batch {} with unreadable payload", candidate.id);
            continue;
        };
        if parent.operation == operation.as_str()
            && parent.request_id.as_deref() == Some(request_id)
            && batch.owner() == actor_id
        {
            return Ok(Some(candidate.id));
        }
    }
    Ok(None)
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_empty_trims() {
        assert_eq!(non_empty(None), None);
        assert_eq!(non_empty(Some("   ")), None);
        assert_eq!(non_empty(Some(" req-1 ")), Some("req-1".to_string()));
    }

    #[test]
    fn test_request_deserializes_with_defaults() {
        let request: BatchSubmitRequest = serde_json::from_str(
            r#"{"operation": "DELETE", "items": [{"vm_id": "vm-1"}]}"#,
        )
        .unwrap();
        assert_eq!(request.items.len(), 1);
        assert_eq!(request.items[0].vm_id.as_deref(), Some("vm-1"));
        assert!(request.request_id.is_none());
    }
}
