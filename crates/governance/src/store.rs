//! Ticket and domain event persistence helpers
//!
//! Every helper is generic over `ConnectionTrait` so the same code runs on a
//! pooled connection or inside the submission transaction.

use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder, Set,
};
use uuid::Uuid;

use crate::constants::MAX_CHILD_ERROR_LENGTH;
use crate::entity::{
    approval_tickets, domain_events, DomainEventStatus, TicketOperation, TicketStatus,
};
use crate::error::Result;
use crate::payload::EventPayload;

/// Fields of a ticket about to be inserted
#[derive(Debug, Clone)]
pub struct NewTicket {
    pub id: String,
    pub event_id: String,
    pub operation_type: TicketOperation,
    pub requester: String,
    pub status: TicketStatus,
    pub reason: Option<String>,
    pub parent_ticket_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// Append a domain event
pub async fn insert_event<C>(
    conn: &C,
    payload: EventPayload,
    aggregate_id: &str,
    status: DomainEventStatus,
    created_by: &str,
    created_at: DateTime<Utc>,
) -> Result<domain_events::Model>
where
    C: ConnectionTrait,
{
    let (event_type, payload) = payload.into_parts()?;
    let event = domain_events::ActiveModel {
        id: Set(new_id()),
        event_type: Set(event_type),
        aggregate_type: Set(event_type.aggregate_type().to_string()),
        aggregate_id: Set(aggregate_id.to_string()),
        payload: Set(payload),
        status: Set(status),
        created_by: Set(created_by.to_string()),
        created_at: Set(created_at),
        updated_at: Set(created_at),
    };
    Ok(event.insert(conn).await?)
}

/// Insert an approval ticket
pub async fn insert_ticket<C>(conn: &C, ticket: NewTicket) -> Result<approval_tickets::Model>
where
    C: ConnectionTrait,
{
    let model = approval_tickets::ActiveModel {
        id: Set(ticket.id),
        event_id: Set(ticket.event_id),
        operation_type: Set(ticket.operation_type),
        requester: Set(ticket.requester),
        status: Set(ticket.status),
        approver: Set(None),
        reason: Set(ticket.reason),
        reject_reason: Set(None),
        parent_ticket_id: Set(ticket.parent_ticket_id),
        selected_cluster_id: Set(None),
        selected_storage_class: Set(None),
        created_at: Set(ticket.created_at),
        updated_at: Set(ticket.created_at),
    };
    Ok(model.insert(conn).await?)
}

pub async fn find_ticket<C>(conn: &C, ticket_id: &str) -> Result<Option<approval_tickets::Model>>
where
    C: ConnectionTrait,
{
    Ok(approval_tickets::Entity::find_by_id(ticket_id.to_string())
        .one(conn)
        .await?)
}

pub async fn find_ticket_by_event<C>(
    conn: &C,
    event_id: &str,
) -> Result<Option<approval_tickets::Model>>
where
    C: ConnectionTrait,
{
    Ok(approval_tickets::Entity::find()
        .filter(approval_tickets::Column::EventId.eq(event_id))
        .one(conn)
        .await?)
}

pub async fn find_event<C>(conn: &C, event_id: &str) -> Result<Option<domain_events::Model>>
where
    C: ConnectionTrait,
{
    Ok(domain_events::Entity::find_by_id(event_id.to_string())
        .one(conn)
        .await?)
}

/// All children of a batch in submission order
pub async fn list_children<C>(conn: &C, parent_id: &str) -> Result<Vec<approval_tickets::Model>>
where
    C: ConnectionTrait,
{
    Ok(approval_tickets::Entity::find()
        .filter(approval_tickets::Column::ParentTicketId.eq(parent_id))
        .order_by_asc(approval_tickets::Column::CreatedAt)
        .order_by_asc(approval_tickets::Column::Id)
        .all(conn)
        .await?)
}

pub async fn set_ticket_status<C>(conn: &C, ticket_id: &str, status: TicketStatus) -> Result<()>
where
    C: ConnectionTrait,
{
    approval_tickets::Entity::update_many()
        .col_expr(approval_tickets::Column::Status, Expr::value(status))
        .col_expr(approval_tickets::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(approval_tickets::Column::Id.eq(ticket_id))
        .exec(conn)
        .await?;
    Ok(())
}

pub async fn set_event_status<C>(conn: &C, event_id: &str, status: DomainEventStatus) -> Result<()>
where
    C: ConnectionTrait,
{
    domain_events::Entity::update_many()
        .col_expr(domain_events::Column::Status, Expr::value(status))
        .col_expr(domain_events::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(domain_events::Column::Id.eq(event_id))
        .exec(conn)
        .await?;
    Ok(())
}

/// Move many tickets to one status in a single statement
pub async fn bulk_set_ticket_status<C>(
    conn: &C,
    ticket_ids: &[String],
    status: TicketStatus,
) -> Result<u64>
where
    C: ConnectionTrait,
{
    if ticket_ids.is_empty() {
        return Ok(0);
    }
    let result = approval_tickets::Entity::update_many()
        .col_expr(approval_tickets::Column::Status, Expr::value(status))
        .col_expr(approval_tickets::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(approval_tickets::Column::Id.is_in(ticket_ids.iter().cloned()))
        .exec(conn)
        .await?;
    Ok(result.rows_affected)
}

/// Move many domain events to one status in a single statement
pub async fn bulk_set_event_status<C>(
    conn: &C,
    event_ids: &[String],
    status: DomainEventStatus,
) -> Result<u64>
where
    C: ConnectionTrait,
{
    if event_ids.is_empty() {
        return Ok(0);
    }
    let result = domain_events::Entity::update_many()
        .col_expr(domain_events::Column::Status, Expr::value(status))
        .col_expr(domain_events::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(domain_events::Column::Id.is_in(event_ids.iter().cloned()))
        .exec(conn)
        .await?;
    Ok(result.rows_affected)
}

/// Record a failed attempt on a single child: ticket and event both go to FAILED
pub async fn mark_child_failed<C>(
    conn: &C,
    ticket_id: &str,
    event_id: &str,
    message: &str,
) -> Result<()>
where
    C: ConnectionTrait,
{
    approval_tickets::Entity::update_many()
        .col_expr(
            approval_tickets::Column::Status,
            Expr::value(TicketStatus::Failed),
        )
        .col_expr(
            approval_tickets::Column::RejectReason,
            Expr::value(truncate_error(message)),
        )
        .col_expr(approval_tickets::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(approval_tickets::Column::Id.eq(ticket_id))
        .exec(conn)
        .await?;
    set_event_status(conn, event_id, DomainEventStatus::Failed).await
}

/// Cut an error message down to what a ticket stores
pub fn truncate_error(message: &str) -> String {
    if message.chars().count() <= MAX_CHILD_ERROR_LENGTH {
        message.to_string()
    } else {
        message.chars().take(MAX_CHILD_ERROR_LENGTH).collect()
    }
}
