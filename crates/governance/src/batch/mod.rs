//! Batch approval workflow
//!
//! A batch is one parent approval ticket plus its children. The parent owns
//! a `batch_approval_tickets` projection row that is rebuilt from the live
//! children whenever the batch is read.
//!
//! - `submit`: validate, dedupe, rate limit and atomically persist a batch
//! - `view`: rebuild the aggregate view and repair the projection
//! - `actions`: retry failed children or cancel pending ones
//! - `approval`: admin approve/reject of every pending child

pub mod actions;
pub mod approval;
pub mod status;
pub mod submit;
pub mod view;

use governance_trait::{
    Actor, ApprovalGateway, JobQueue, NamespaceVisibility, PowerOperation, VmLookup,
};
use std::fmt;
use std::sync::Arc;
use tracing::warn;

use crate::config::BatchDefaults;
use crate::database::Database;
use crate::entity::{BatchType, DomainEventType, TicketOperation};
use crate::error::{GovernanceError, Result};
use crate::rate_limit::RateLimiter;
use crate::store;

pub use actions::{BatchAction, BatchActionResponse};
pub use approval::{ApproveBatchRequest, RejectBatchRequest};
pub use status::{derive_batch_status, ChildCounts};
pub use submit::{BatchItem, BatchSubmitRequest, BatchSubmitResponse};
pub use view::{BatchChildView, BatchView};

/// Operation named by a submit request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOperation {
    Create,
    Delete,
    Power(PowerOperation),
}

impl BatchOperation {
    pub fn parse(value: &str) -> Result<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "CREATE" => Ok(Self::Create),
            "DELETE" => Ok(Self::Delete),
            "POWER_START" => Ok(Self::Power(PowerOperation::Start)),
            "POWER_STOP" => Ok(Self::Power(PowerOperation::Stop)),
            "POWER_RESTART" => Ok(Self::Power(PowerOperation::Restart)),
            _ => Err(GovernanceError::InvalidBatchOperation(value.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "CREATE",
            Self::Delete => "DELETE",
            Self::Power(PowerOperation::Start) => "POWER_START",
            Self::Power(PowerOperation::Stop) => "POWER_STOP",
            Self::Power(PowerOperation::Restart) => "POWER_RESTART",
        }
    }

    pub fn kind(&self) -> BatchKind {
        match self {
            Self::Create => BatchKind::Create,
            Self::Delete => BatchKind::Delete,
            Self::Power(_) => BatchKind::Power,
        }
    }
}

impl fmt::Display for BatchOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operation family of a persisted batch, recovered from its parent event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchKind {
    Create,
    Delete,
    Power,
}

impl BatchKind {
    pub fn from_event_type(event_type: DomainEventType) -> Option<Self> {
        match event_type {
            DomainEventType::BatchCreateRequested => Some(Self::Create),
            DomainEventType::BatchDeleteRequested => Some(Self::Delete),
            DomainEventType::BatchPowerRequested => Some(Self::Power),
            _ => None,
        }
    }

    pub fn batch_type(&self) -> BatchType {
        match self {
            Self::Create => BatchType::BatchCreate,
            Self::Delete => BatchType::BatchDelete,
            Self::Power => BatchType::BatchPower,
        }
    }

    pub fn ticket_operation(&self) -> TicketOperation {
        match self {
            Self::Create => TicketOperation::Create,
            Self::Delete => TicketOperation::Delete,
            Self::Power => TicketOperation::Power,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "CREATE",
            Self::Delete => "DELETE",
            Self::Power => "POWER",
        }
    }
}

/// Collaborators the batch pipelines talk to
#[derive(Clone)]
pub struct BatchEngine {
    db: Database,
    gateway: Arc<dyn ApprovalGateway>,
    jobs: Arc<dyn JobQueue>,
    vms: Arc<dyn VmLookup>,
    namespaces: Arc<dyn NamespaceVisibility>,
    limiter: RateLimiter,
    settings: BatchDefaults,
}

impl BatchEngine {
    pub fn new(
        db: Database,
        gateway: Arc<dyn ApprovalGateway>,
        jobs: Arc<dyn JobQueue>,
        vms: Arc<dyn VmLookup>,
        namespaces: Arc<dyn NamespaceVisibility>,
        limiter: RateLimiter,
        settings: BatchDefaults,
    ) -> Self {
        Self {
            db,
            gateway,
            jobs,
            vms,
            namespaces,
            limiter,
            settings,
        }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn settings(&self) -> &BatchDefaults {
        &self.settings
    }

    fn status_url(&self, batch_id: &str) -> String {
        format!(
            "{}/{}",
            self.settings.status_url_prefix.trim_end_matches('/'),
            batch_id
        )
    }

    /// Record a failed child once the batch is committed. A store error here
    /// is logged and swallowed so the remaining children still get their turn.
    async fn record_child_failure(&self, ticket_id: &str, event_id: &str, message: &str) {
        if let Err(e) =
            store::mark_child_failed(self.db.connection(), ticket_id, event_id, message).await
        {
            warn!(
                "Failed to record failure of ticket {} ({}): {}",
                ticket_id, message, e
            );
        }
    }
}

fn require_actor(actor: &Actor) -> Result<()> {
    if actor.is_authenticated() {
        Ok(())
    } else {
        Err(GovernanceError::Unauthorized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_operation() {
        assert_eq!(BatchOperation::parse("create").unwrap(), BatchOperation::Create);
        assert_eq!(
            BatchOperation::parse(" POWER_RESTART ").unwrap(),
            BatchOperation::Power(PowerOperation::Restart)
        );
        assert_eq!(BatchOperation::parse("POWER_STOP").unwrap().kind(), BatchKind::Power);
        assert!(matches!(
            BatchOperation::parse("POWER_SUSPEND"),
            Err(GovernanceError::InvalidBatchOperation(_))
        ));
    }

    #[test]
    fn test_kind_from_event_type() {
        assert_eq!(
            BatchKind::from_event_type(DomainEventType::BatchDeleteRequested),
            Some(BatchKind::Delete)
        );
        assert_eq!(
            BatchKind::from_event_type(DomainEventType::VmDeletionRequested),
            None
        );
    }
}
