//! approval_tickets entity
//! Human-visible approval unit, one per domain event

use sea_orm::entity::prelude::*;

use super::enums::{TicketOperation, TicketStatus};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "approval_tickets")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String, // UUID
    #[sea_orm(unique)]
    pub event_id: String,
    pub operation_type: TicketOperation,
    pub requester: String,
    pub status: TicketStatus,
    pub approver: Option<String>,
    #[sea_orm(column_type = "Text", nullable)]
    pub reason: Option<String>,
    #[sea_orm(column_type = "Text", nullable)]
    pub reject_reason: Option<String>,

    /// NULL for standalone tickets and batch parents
    pub parent_ticket_id: Option<String>,

    // Placement chosen at approval time, reused by retries
    pub selected_cluster_id: Option<String>,
    pub selected_storage_class: Option<String>,

    #[sea_orm(column_type = "TimestampWithTimeZone")]
    pub created_at: DateTimeUtc,
    #[sea_orm(column_type = "TimestampWithTimeZone")]
    pub updated_at: DateTimeUtc,
}

impl Model {
    pub fn is_child(&self) -> bool {
        self.parent_ticket_id.is_some()
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::domain_events::Entity",
        from = "Column::EventId",
        to = "super::domain_events::Column::Id",
        on_update = "Cascade",
        on_delete = "Restrict"
    )]
    DomainEvent,
}

impl Related<super::domain_events::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::DomainEvent.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
