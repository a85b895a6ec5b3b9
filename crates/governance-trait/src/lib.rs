//! Governance Trait - collaborator contracts for the approval core
//!
//! This crate defines the boundaries the batch approval engine talks to
//! without owning them: the approval gateway that executes a single ticket
//! transition, the infrastructure job queue, namespace visibility lookups
//! and VM lookups. Implementations may be backed by a database, a cluster
//! API or an in-memory fake.

use async_trait::async_trait;

pub mod error;
pub mod types;

pub use error::{CollaboratorError, CollaboratorResult};
pub use types::*;

/// Executes approve/reject transitions for a single approval ticket
#[async_trait]
pub trait ApprovalGateway: Send + Sync {
    /// Approve a ticket, enqueueing whatever infrastructure work it implies
    async fn approve(
        &self,
        ticket_id: &str,
        actor: &str,
        selected_cluster_id: Option<&str>,
        selected_storage_class: Option<&str>,
    ) -> CollaboratorResult<()>;

    /// Reject a ticket with a human readable reason
    async fn reject(&self, ticket_id: &str, actor: &str, reason: &str) -> CollaboratorResult<()>;
}

/// Hands infrastructure work to the asynchronous worker pool
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Enqueue a job keyed by the domain event it executes
    async fn enqueue(&self, event_id: &str, operation: JobOperation) -> CollaboratorResult<()>;
}

/// Resolves which namespaces an actor may target
#[async_trait]
pub trait NamespaceVisibility: Send + Sync {
    /// Check whether a single namespace is visible under the policy
    async fn is_namespace_visible(
        &self,
        namespace: &str,
        policy: &VisibilityPolicy,
    ) -> CollaboratorResult<bool>;

    /// List every namespace name visible under the policy
    async fn list_visible_namespace_names(
        &self,
        policy: &VisibilityPolicy,
    ) -> CollaboratorResult<Vec<String>>;
}

/// Looks up virtual machines known to the platform
#[async_trait]
pub trait VmLookup: Send + Sync {
    /// Fetch a VM by id; a missing VM is `CollaboratorError::NotFound`
    async fn get_vm(&self, vm_id: &str) -> CollaboratorResult<Vm>;
}
