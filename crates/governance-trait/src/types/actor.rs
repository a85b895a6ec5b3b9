//! Authenticated caller identity

use serde::{Deserialize, Serialize};

use crate::types::visibility::{RoleBinding, VisibilityPolicy};

/// The caller on whose behalf an operation runs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    /// User id; an empty id is treated as unauthenticated
    pub id: String,
    /// Platform admins may act on any batch and manage rate limits
    pub platform_admin: bool,
    /// Namespace visibility derived from role bindings
    pub visibility: VisibilityPolicy,
}

impl Actor {
    pub fn new(id: impl Into<String>, bindings: &[RoleBinding]) -> Self {
        Self {
            id: id.into(),
            platform_admin: false,
            visibility: VisibilityPolicy::from_bindings(bindings),
        }
    }

    /// An admin sees every environment regardless of bindings
    pub fn platform_admin(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            platform_admin: true,
            visibility: VisibilityPolicy::Unrestricted,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        !self.id.trim().is_empty()
    }

    /// Whether this actor may see a resource created by `owner`
    pub fn can_access(&self, owner: &str) -> bool {
        self.platform_admin || self.id == owner
    }
}
