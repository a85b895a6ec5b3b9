//! batch_approval_tickets entity
//! Denormalized per-batch summary, rebuilt from child tickets on every read

use sea_orm::entity::prelude::*;

use super::enums::{BatchStatus, BatchType};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "batch_approval_tickets")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String, // Same as the parent approval ticket id
    pub batch_type: BatchType,
    pub child_count: i32,
    pub success_count: i32,
    pub failed_count: i32,
    pub pending_count: i32,
    pub status: BatchStatus,
    pub created_by: String,
    #[sea_orm(column_type = "Text", nullable)]
    pub reason: Option<String>,
    pub request_id: Option<String>, // Caller-supplied idempotency key
    #[sea_orm(column_type = "TimestampWithTimeZone")]
    pub created_at: DateTimeUtc,
    #[sea_orm(column_type = "TimestampWithTimeZone")]
    pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::approval_tickets::Entity",
        from = "Column::Id",
        to = "super::approval_tickets::Column::Id",
        on_update = "Cascade",
        on_delete = "Cascade"
    )]
    ParentTicket,
}

impl Related<super::approval_tickets::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ParentTicket.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
