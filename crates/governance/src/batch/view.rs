//! Batch status view
//!
//! Reading a batch recomputes its aggregate from the live children and
//! rewrites the projection row, creating it if it went missing. The
//! projection may lag behind child mutations between reads; it is a cache
//! that heals on the next read.

use chrono::{DateTime, Utc};
use governance_trait::Actor;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, IntoActiveModel, QueryFilter,
    Set,
};
use serde::Serialize;
use std::collections::HashMap;
use tracing::{debug, info};

use super::status::{parent_event_status, parent_ticket_status, ChildCounts};
use super::{require_actor, BatchEngine, BatchKind};
use crate::entity::{
    approval_tickets, batch_approval_tickets, domain_events, BatchStatus, BatchType, TicketStatus,
};
use crate::error::{GovernanceError, Result};
use crate::payload::{BatchParentPayload, EventPayload};
use crate::store;

/// Per-child detail of a batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchChildView {
    pub ticket_id: String,
    pub event_id: String,
    pub status: TicketStatus,
    pub resource_id: Option<String>,
    pub resource_name: Option<String>,
    pub last_error: Option<String>,
    /// 0 while PENDING, 1 once anything was attempted
    pub attempt_count: u32,
}

/// Aggregate status of a batch with its children
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchView {
    pub batch_id: String,
    pub operation: String,
    pub batch_type: BatchType,
    pub status: BatchStatus,
    pub created_by: String,
    pub reason: Option<String>,
    pub request_id: Option<String>,
    pub child_count: u32,
    pub success_count: u32,
    pub failed_count: u32,
    pub pending_count: u32,
    pub cancelled_count: u32,
    pub created_at: DateTime<Utc>,
    pub children: Vec<BatchChildView>,
}

/// A parent ticket resolved together with its event
#[derive(Debug, Clone)]
pub(crate) struct LoadedBatch {
    pub parent: approval_tickets::Model,
    pub event: domain_events::Model,
    pub kind: BatchKind,
    pub payload: Option<BatchParentPayload>,
}

impl LoadedBatch {
    pub fn id(&self) -> &str {
        &self.parent.id
    }

    pub fn owner(&self) -> &str {
        &self.parent.requester
    }
}

/// Live children with the aggregate derived from them
#[derive(Debug, Clone)]
pub(crate) struct Refreshed {
    pub children: Vec<approval_tickets::Model>,
    pub counts: ChildCounts,
    pub status: BatchStatus,
}

/// Resolve a batch id to its parent ticket and parent event.
///
/// Anything that is not a batch parent reads as not found.
pub(crate) async fn load_batch<C>(conn: &C, batch_id: &str) -> Result<LoadedBatch>
where
    C: ConnectionTrait,
{
    let not_found = || GovernanceError::BatchNotFound(batch_id.to_string());

    let parent = store::find_ticket(conn, batch_id)
        .await?
        .filter(|t| !t.is_child())
        .ok_or_else(not_found)?;
    let event = store::find_event(conn, &parent.event_id)
        .await?
        .ok_or_else(not_found)?;
    let kind = BatchKind::from_event_type(event.event_type).ok_or_else(not_found)?;
    let payload = EventPayload::from_parts(event.event_type, &event.payload)
        .ok()
        .and_then(|p| p.as_batch_parent().cloned());

    Ok(LoadedBatch {
        parent,
        event,
        kind,
        payload,
    })
}

/// Hide batches from callers who neither own them nor administer the platform
pub(crate) fn ensure_visible(actor: &Actor, batch: &LoadedBatch) -> Result<()> {
    if actor.can_access(batch.owner()) {
        Ok(())
    } else {
        Err(GovernanceError::BatchNotFound(batch.id().to_string()))
    }
}

/// Recompute the aggregate, rewrite the projection and sync the parent
pub(crate) async fn refresh_batch<C>(conn: &C, batch: &LoadedBatch) -> Result<Refreshed>
where
    C: ConnectionTrait,
{
    let children = store::list_children(conn, batch.id()).await?;
    let counts = ChildCounts::from_statuses(children.iter().map(|c| c.status));
    let status = counts.status();

    write_projection(conn, batch, &counts, status).await?;
    sync_parent(conn, batch, status).await?;

    Ok(Refreshed {
        children,
        counts,
        status,
    })
}

async fn write_projection<C>(
    conn: &C,
    batch: &LoadedBatch,
    counts: &ChildCounts,
    status: BatchStatus,
) -> Result<()>
where
    C: ConnectionTrait,
{
    let now = Utc::now();
    let existing = batch_approval_tickets::Entity::find_by_id(batch.id().to_string())
        .one(conn)
        .await?;

    match existing {
        Some(row) => {
            let mut active = row.into_active_model();
            active.child_count = Set(counts.total as i32);
            active.success_count = Set(counts.success as i32);
            active.failed_count = Set(counts.failed as i32);
            active.pending_count = Set(counts.pending_or_executing() as i32);
            active.status = Set(status);
            active.updated_at = Set(now);
            active.update(conn).await?;
        }
        None => {
            info!("Backfilling missing projection for batch {}", batch.id());
            batch_approval_tickets::ActiveModel {
                id: Set(batch.id().to_string()),
                batch_type: Set(batch.kind.batch_type()),
                child_count: Set(counts.total as i32),
                success_count: Set(counts.success as i32),
                failed_count: Set(counts.failed as i32),
                pending_count: Set(counts.pending_or_executing() as i32),
                status: Set(status),
                created_by: Set(batch.owner().to_string()),
                reason: Set(batch.parent.reason.clone()),
                request_id: Set(batch.payload.as_ref().and_then(|p| p.request_id.clone())),
                created_at: Set(batch.parent.created_at),
                updated_at: Set(now),
            }
            .insert(conn)
            .await?;
        }
    }
    Ok(())
}

/// Mirror a terminal aggregate onto the parent event and ticket so the
/// parent stops counting against pending-parent limits
async fn sync_parent<C>(conn: &C, batch: &LoadedBatch, status: BatchStatus) -> Result<()>
where
    C: ConnectionTrait,
{
    if let Some(event_status) = parent_event_status(status) {
        if batch.event.status != event_status {
            debug!(
                "Batch {} reached {}, parent event -> {}",
                batch.id(),
                status,
                event_status
            );
            store::set_event_status(conn, &batch.event.id, event_status).await?;
        }
    }
    if let Some(ticket_status) = parent_ticket_status(status) {
        if batch.parent.status != ticket_status {
            store::set_ticket_status(conn, batch.id(), ticket_status).await?;
        }
    }
    Ok(())
}

impl BatchEngine {
    /// Load the aggregate view of a batch the actor may see
    pub async fn load_batch_view(&self, actor: &Actor, batch_id: &str) -> Result<BatchView> {
        require_actor(actor)?;
        let conn = self.db.connection();

        let batch = load_batch(conn, batch_id).await?;
        ensure_visible(actor, &batch)?;
        let refreshed = refresh_batch(conn, &batch).await?;

        let event_ids: Vec<String> = refreshed
            .children
            .iter()
            .map(|c| c.event_id.clone())
            .collect();
        let events: HashMap<String, domain_events::Model> = if event_ids.is_empty() {
            HashMap::new()
        } else {
            domain_events::Entity::find()
                .filter(domain_events::Column::Id.is_in(event_ids))
                .all(conn)
                .await?
                .into_iter()
                .map(|e| (e.id.clone(), e))
                .collect()
        };

        let children = refreshed
            .children
            .into_iter()
            .map(|child| {
                let (resource_id, resource_name) = events
                    .get(&child.event_id)
                    .and_then(|e| EventPayload::from_parts(e.event_type, &e.payload).ok())
                    .map(|p| p.resource())
                    .unwrap_or((None, None));
                BatchChildView {
                    attempt_count: if child.status == TicketStatus::Pending { 0 } else { 1 },
                    ticket_id: child.id,
                    event_id: child.event_id,
                    status: child.status,
                    resource_id,
                    resource_name,
                    last_error: child.reject_reason,
                }
            })
            .collect();

        let counts = refreshed.counts;
        Ok(BatchView {
            batch_id: batch.id().to_string(),
            operation: batch
                .payload
                .as_ref()
                .map(|p| p.operation.clone())
                .unwrap_or_else(|| batch.kind.as_str().to_string()),
            batch_type: batch.kind.batch_type(),
            status: refreshed.status,
            created_by: batch.owner().to_string(),
            reason: batch.parent.reason.clone(),
            request_id: batch.payload.as_ref().and_then(|p| p.request_id.clone()),
            child_count: counts.total,
            success_count: counts.success,
            failed_count: counts.failed,
            pending_count: counts.pending_or_executing(),
            cancelled_count: counts.cancelled,
            created_at: batch.parent.created_at,
            children,
        })
    }
}
