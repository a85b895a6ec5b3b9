//! jobs entity
//! Infrastructure work handed to the worker pool

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "jobs")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub kind: String,      // vm_create, vm_delete, vm_power
    pub event_id: String,  // Domain event the job executes
    pub operation: String, // Display form of JobOperation, e.g. vm_power:restart
    pub status: String,    // PENDING, RUNNING, COMPLETED, FAILED
    pub attempts: i16,
    #[sea_orm(column_type = "Text", nullable)]
    pub error_message: Option<String>, // For FAILED status
    #[sea_orm(column_type = "TimestampWithTimeZone")]
    pub created_at: DateTimeUtc,
    #[sea_orm(column_type = "TimestampWithTimeZone")]
    pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
