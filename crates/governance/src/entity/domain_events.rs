//! domain_events entity
//! Append-only record of every state-changing intent

use sea_orm::entity::prelude::*;

use super::enums::{DomainEventStatus, DomainEventType};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "domain_events")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String, // UUID
    pub event_type: DomainEventType,
    pub aggregate_type: String, // "vm" or "batch"
    pub aggregate_id: String,
    pub payload: Json, // Shape depends on event_type, see crate::payload
    pub status: DomainEventStatus,
    pub created_by: String,
    #[sea_orm(column_type = "TimestampWithTimeZone")]
    pub created_at: DateTimeUtc,
    #[sea_orm(column_type = "TimestampWithTimeZone")]
    pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_one = "super::approval_tickets::Entity")]
    ApprovalTicket,
}

impl Related<super::approval_tickets::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ApprovalTicket.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
