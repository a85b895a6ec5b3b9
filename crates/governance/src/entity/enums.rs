//! String-backed status and type enums shared by the governance entities

use sea_orm::entity::prelude::*;
use sea_orm::sea_query::StringLen;
use sea_orm::ActiveEnum;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of state change a domain event records
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DomainEventType {
    #[sea_orm(string_value = "VM_CREATION_REQUESTED")]
    VmCreationRequested,
    #[sea_orm(string_value = "VM_DELETION_REQUESTED")]
    VmDeletionRequested,
    #[sea_orm(string_value = "VM_START_REQUESTED")]
    VmStartRequested,
    #[sea_orm(string_value = "VM_STOP_REQUESTED")]
    VmStopRequested,
    #[sea_orm(string_value = "VM_RESTART_REQUESTED")]
    VmRestartRequested,
    #[sea_orm(string_value = "BATCH_CREATE_REQUESTED")]
    BatchCreateRequested,
    #[sea_orm(string_value = "BATCH_DELETE_REQUESTED")]
    BatchDeleteRequested,
    #[sea_orm(string_value = "BATCH_POWER_REQUESTED")]
    BatchPowerRequested,
    #[sea_orm(string_value = "VNC_ACCESS_REQUESTED")]
    VncAccessRequested,
}

impl DomainEventType {
    /// Event types that mark a batch parent
    pub const BATCH_PARENTS: [DomainEventType; 3] = [
        Self::BatchCreateRequested,
        Self::BatchDeleteRequested,
        Self::BatchPowerRequested,
    ];

    pub fn is_batch_parent(&self) -> bool {
        Self::BATCH_PARENTS.contains(self)
    }

    /// Aggregate the event is recorded against
    pub fn aggregate_type(&self) -> &'static str {
        if self.is_batch_parent() {
            "batch"
        } else {
            "vm"
        }
    }
}

/// Lifecycle of a domain event
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DomainEventStatus {
    #[sea_orm(string_value = "PENDING")]
    Pending,
    #[sea_orm(string_value = "PROCESSING")]
    Processing,
    #[sea_orm(string_value = "COMPLETED")]
    Completed,
    #[sea_orm(string_value = "FAILED")]
    Failed,
    #[sea_orm(string_value = "CANCELLED")]
    Cancelled,
}

/// What an approval ticket asks permission for
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TicketOperation {
    #[sea_orm(string_value = "CREATE")]
    Create,
    #[sea_orm(string_value = "DELETE")]
    Delete,
    #[sea_orm(string_value = "POWER")]
    Power,
    #[sea_orm(string_value = "VNC_ACCESS")]
    VncAccess,
}

/// Lifecycle of an approval ticket
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TicketStatus {
    #[sea_orm(string_value = "PENDING")]
    Pending,
    #[sea_orm(string_value = "APPROVED")]
    Approved,
    #[sea_orm(string_value = "EXECUTING")]
    Executing,
    #[sea_orm(string_value = "SUCCESS")]
    Success,
    #[sea_orm(string_value = "FAILED")]
    Failed,
    #[sea_orm(string_value = "REJECTED")]
    Rejected,
    #[sea_orm(string_value = "CANCELLED")]
    Cancelled,
}

impl TicketStatus {
    /// Statuses that still hold a per-user child slot
    pub const ACTIVE_CHILD: [TicketStatus; 3] = [Self::Pending, Self::Approved, Self::Executing];

    /// Statuses a retry may pick up
    pub const RETRYABLE: [TicketStatus; 2] = [Self::Failed, Self::Rejected];
}

/// Operation kind of a batch
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchType {
    #[sea_orm(string_value = "BATCH_CREATE")]
    BatchCreate,
    #[sea_orm(string_value = "BATCH_DELETE")]
    BatchDelete,
    #[sea_orm(string_value = "BATCH_POWER")]
    BatchPower,
}

/// Aggregate status of a batch derived from its children
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(24))")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchStatus {
    #[sea_orm(string_value = "PENDING_APPROVAL")]
    PendingApproval,
    #[sea_orm(string_value = "IN_PROGRESS")]
    InProgress,
    #[sea_orm(string_value = "COMPLETED")]
    Completed,
    #[sea_orm(string_value = "PARTIAL_SUCCESS")]
    PartialSuccess,
    #[sea_orm(string_value = "CANCELLED")]
    Cancelled,
    #[sea_orm(string_value = "FAILED")]
    Failed,
}

impl BatchStatus {
    /// No child can change without an explicit retry
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::PartialSuccess | Self::Cancelled | Self::Failed
        )
    }
}

macro_rules! display_as_db_value {
    ($($ty:ty),*) => {
        $(
            impl fmt::Display for $ty {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    f.write_str(&self.to_value())
                }
            }
        )*
    };
}

display_as_db_value!(
    DomainEventType,
    DomainEventStatus,
    TicketOperation,
    TicketStatus,
    BatchType,
    BatchStatus
);
