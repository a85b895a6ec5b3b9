//! VM and namespace lookups backed by the `vms` and `namespaces` tables

use async_trait::async_trait;
use governance_trait::{
    CollaboratorError, CollaboratorResult, Environment, NamespaceVisibility, VisibilityPolicy, Vm,
    VmLookup,
};
use sea_orm::{EntityTrait, QueryOrder};
use tracing::warn;

use crate::database::Database;
use crate::entity::{namespaces, vms};
use crate::error::GovernanceError;

#[derive(Clone)]
pub struct StoreVmLookup {
    db: Database,
}

impl StoreVmLookup {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl VmLookup for StoreVmLookup {
    async fn get_vm(&self, vm_id: &str) -> CollaboratorResult<Vm> {
        let vm = vms::Entity::find_by_id(vm_id.to_string())
            .one(self.db.connection())
            .await
            .map_err(GovernanceError::from)?
            .ok_or_else(|| CollaboratorError::not_found("VM", vm_id))?;
        Ok(Vm {
            id: vm.id,
            name: vm.name,
            namespace: vm.namespace,
            cluster_id: vm.cluster_id,
            status: vm.status,
        })
    }
}

/// Resolves namespace visibility through each namespace's environment.
///
/// Unknown namespaces and unrecognised environments are never visible.
#[derive(Clone)]
pub struct StoreNamespaceVisibility {
    db: Database,
}

impl StoreNamespaceVisibility {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

fn environment_of(namespace: &namespaces::Model) -> Option<Environment> {
    match namespace.environment.parse::<Environment>() {
        Ok(env) => Some(env),
        Err(e) => {
            warn!("Namespace {} has {}", namespace.name, e);
            None
        }
    }
}

#[async_trait]
impl NamespaceVisibility for StoreNamespaceVisibility {
    async fn is_namespace_visible(
        &self,
        namespace: &str,
        policy: &VisibilityPolicy,
    ) -> CollaboratorResult<bool> {
        if policy.is_deny_all() {
            return Ok(false);
        }
        let row = namespaces::Entity::find_by_id(namespace.to_string())
            .one(self.db.connection())
            .await
            .map_err(GovernanceError::from)?;
        Ok(row
            .as_ref()
            .and_then(environment_of)
            .is_some_and(|env| policy.allows(env)))
    }

    async fn list_visible_namespace_names(
        &self,
        policy: &VisibilityPolicy,
    ) -> CollaboratorResult<Vec<String>> {
        if policy.is_deny_all() {
            return Ok(Vec::new());
        }
        let rows = namespaces::Entity::find()
            .order_by_asc(namespaces::Column::Name)
            .all(self.db.connection())
            .await
            .map_err(GovernanceError::from)?;
        Ok(rows
            .into_iter()
            .filter(|ns| environment_of(ns).is_some_and(|env| policy.allows(env)))
            .map(|ns| ns.name)
            .collect())
    }
}
