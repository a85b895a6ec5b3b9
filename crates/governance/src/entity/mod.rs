//! Sea-ORM entities for governance tables

pub mod approval_tickets;
pub mod batch_approval_tickets;
pub mod domain_events;
pub mod enums;
pub mod jobs;
pub mod namespaces;
pub mod rate_limit_exemptions;
pub mod rate_limit_user_overrides;
pub mod vms;

pub use enums::*;

// Re-export entities for convenience
pub use approval_tickets::Entity as ApprovalTickets;
pub use batch_approval_tickets::Entity as BatchApprovalTickets;
pub use domain_events::Entity as DomainEvents;
pub use jobs::Entity as Jobs;
pub use namespaces::Entity as Namespaces;
pub use rate_limit_exemptions::Entity as RateLimitExemptions;
pub use rate_limit_user_overrides::Entity as RateLimitUserOverrides;
pub use vms::Entity as Vms;
