//! Aggregate batch status derived from child ticket states

use serde::Serialize;

use crate::entity::{BatchStatus, DomainEventStatus, TicketStatus};

/// Where a single child stands for aggregation purposes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildBucket {
    Success,
    /// FAILED and REJECTED count together
    Failed,
    Cancelled,
    /// Nothing attempted yet
    Pending,
    /// APPROVED or EXECUTING
    Executing,
}

pub fn classify(status: TicketStatus) -> ChildBucket {
    match status {
        TicketStatus::Success => ChildBucket::Success,
        TicketStatus::Failed | TicketStatus::Rejected => ChildBucket::Failed,
        TicketStatus::Cancelled => ChildBucket::Cancelled,
        TicketStatus::Pending => ChildBucket::Pending,
        TicketStatus::Approved | TicketStatus::Executing => ChildBucket::Executing,
    }
}

/// Per-bucket child counts of one batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ChildCounts {
    pub total: u32,
    pub success: u32,
    pub failed: u32,
    pub pending: u32,
    pub executing: u32,
    pub cancelled: u32,
}

impl ChildCounts {
    pub fn from_statuses<I>(statuses: I) -> Self
    where
        I: IntoIterator<Item = TicketStatus>,
    {
        let mut counts = Self::default();
        for status in statuses {
            counts.add(status);
        }
        counts
    }

    pub fn add(&mut self, status: TicketStatus) {
        self.total += 1;
        match classify(status) {
            ChildBucket::Success => self.success += 1,
            ChildBucket::Failed => self.failed += 1,
            ChildBucket::Cancelled => self.cancelled += 1,
            ChildBucket::Pending => self.pending += 1,
            ChildBucket::Executing => self.executing += 1,
        }
    }

    /// Value stored in the projection's `pending_count`
    pub fn pending_or_executing(&self) -> u32 {
        self.pending + self.executing
    }

    pub fn status(&self) -> BatchStatus {
        derive_batch_status(self)
    }
}

/// Map child counts to an aggregate status; the first matching rule wins
pub fn derive_batch_status(c: &ChildCounts) -> BatchStatus {
    let finished_badly = c.failed + c.cancelled;

    if c.total == 0 {
        // A real batch always has children
        BatchStatus::Failed
    } else if c.cancelled == c.total {
        BatchStatus::Cancelled
    } else if c.success == c.total {
        BatchStatus::Completed
    } else if finished_badly == c.total {
        BatchStatus::Failed
    } else if c.pending == c.total {
        BatchStatus::PendingApproval
    } else if c.pending > 0 || c.executing > 0 {
        BatchStatus::InProgress
    } else if c.success > 0 && finished_badly > 0 {
        BatchStatus::PartialSuccess
    } else {
        BatchStatus::InProgress
    }
}

/// Parent event status that mirrors a terminal aggregate
pub fn parent_event_status(status: BatchStatus) -> Option<DomainEventStatus> {
    match status {
        BatchStatus::Completed | BatchStatus::PartialSuccess => Some(DomainEventStatus::Completed),
        BatchStatus::Failed => Some(DomainEventStatus::Failed),
        BatchStatus::Cancelled => Some(DomainEventStatus::Cancelled),
        BatchStatus::PendingApproval | BatchStatus::InProgress => None,
    }
}

/// Parent ticket status that mirrors a terminal aggregate
pub fn parent_ticket_status(status: BatchStatus) -> Option<TicketStatus> {
    match status {
        BatchStatus::Completed | BatchStatus::PartialSuccess => Some(TicketStatus::Success),
        BatchStatus::Failed => Some(TicketStatus::Failed),
        BatchStatus::Cancelled => Some(TicketStatus::Cancelled),
        BatchStatus::PendingApproval | BatchStatus::InProgress => None,
    }
}
