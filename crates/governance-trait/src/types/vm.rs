//! VM-related types

use serde::{Deserialize, Serialize};

/// A virtual machine as seen by the governance core
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vm {
    pub id: String,
    pub name: String,
    pub namespace: String,
    pub cluster_id: String,
    pub status: String,
}
