//! Typed domain event payloads
//!
//! Every domain event row stores its `event_type` next to a JSON payload.
//! `EventPayload` is the single typed view over that pair: one variant per
//! event type, each with its own schema, converted to and from the stored
//! envelope with `into_parts` / `from_parts`.

use governance_trait::PowerOperation;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::entity::DomainEventType;
use crate::error::{GovernanceError, Result};

/// Request to provision a new VM
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmCreatePayload {
    pub service_id: u64,
    pub template_id: u64,
    pub instance_size_id: u64,
    pub namespace: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Request to delete an existing VM
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmDeletePayload {
    pub vm_id: String,
    pub vm_name: String,
    pub namespace: String,
    pub cluster_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Request to start, stop or restart an existing VM
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmPowerPayload {
    pub vm_id: String,
    pub vm_name: String,
    pub namespace: String,
    pub cluster_id: String,
    pub operation: PowerOperation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Request for console access to a VM
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VncAccessPayload {
    pub vm_id: String,
    pub vm_name: String,
    pub namespace: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Parent record of a batch submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchParentPayload {
    /// Operation name as submitted, e.g. `DELETE` or `POWER_RESTART`
    pub operation: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub item_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Typed payload of a domain event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventPayload {
    VmCreation(VmCreatePayload),
    VmDeletion(VmDeletePayload),
    VmPower(VmPowerPayload),
    BatchCreate(BatchParentPayload),
    BatchDelete(BatchParentPayload),
    BatchPower(BatchParentPayload),
    VncAccess(VncAccessPayload),
}

impl EventPayload {
    pub fn event_type(&self) -> DomainEventType {
        match self {
            Self::VmCreation(_) => DomainEventType::VmCreationRequested,
            Self::VmDeletion(_) => DomainEventType::VmDeletionRequested,
            Self::VmPower(p) => match p.operation {
                PowerOperation::Start => DomainEventType::VmStartRequested,
                PowerOperation::Stop => DomainEventType::VmStopRequested,
                PowerOperation::Restart => DomainEventType::VmRestartRequested,
            },
            Self::BatchCreate(_) => DomainEventType::BatchCreateRequested,
            Self::BatchDelete(_) => DomainEventType::BatchDeleteRequested,
            Self::BatchPower(_) => DomainEventType::BatchPowerRequested,
            Self::VncAccess(_) => DomainEventType::VncAccessRequested,
        }
    }

    /// Split into the stored `(event_type, payload)` envelope
    pub fn into_parts(self) -> Result<(DomainEventType, Value)> {
        let event_type = self.event_type();
        let value = match self {
            Self::VmCreation(p) => serde_json::to_value(p)?,
            Self::VmDeletion(p) => serde_json::to_value(p)?,
            Self::VmPower(p) => serde_json::to_value(p)?,
            Self::BatchCreate(p) | Self::BatchDelete(p) | Self::BatchPower(p) => {
                serde_json::to_value(p)?
            }
            Self::VncAccess(p) => serde_json::to_value(p)?,
        };
        Ok((event_type, value))
    }

    /// Rebuild the typed payload from a stored envelope.
    ///
    /// Power events must carry the operation their type names.
    pub fn from_parts(event_type: DomainEventType, value: &Value) -> Result<Self> {
        let payload = match event_type {
            DomainEventType::VmCreationRequested => Self::VmCreation(parse(value)?),
            DomainEventType::VmDeletionRequested => Self::VmDeletion(parse(value)?),
            DomainEventType::VmStartRequested
            | DomainEventType::VmStopRequested
            | DomainEventType::VmRestartRequested => {
                let power: VmPowerPayload = parse(value)?;
                let payload = Self::VmPower(power);
                if payload.event_type() != event_type {
                    return Err(GovernanceError::internal(format!(
                        "power payload operation does not match event type {}",
                        event_type
                    )));
                }
                payload
            }
            DomainEventType::BatchCreateRequested => Self::BatchCreate(parse(value)?),
            DomainEventType::BatchDeleteRequested => Self::BatchDelete(parse(value)?),
            DomainEventType::BatchPowerRequested => Self::BatchPower(parse(value)?),
            DomainEventType::VncAccessRequested => Self::VncAccess(parse(value)?),
        };
        Ok(payload)
    }

    pub fn as_batch_parent(&self) -> Option<&BatchParentPayload> {
        match self {
            Self::BatchCreate(p) | Self::BatchDelete(p) | Self::BatchPower(p) => Some(p),
            _ => None,
        }
    }

    /// Best-effort `(resource_id, resource_name)` of the VM the event targets
    pub fn resource(&self) -> (Option<String>, Option<String>) {
        match self {
            Self::VmCreation(p) => (None, p.name.clone()),
            Self::VmDeletion(p) => (Some(p.vm_id.clone()), Some(p.vm_name.clone())),
            Self::VmPower(p) => (Some(p.vm_id.clone()), Some(p.vm_name.clone())),
            Self::VncAccess(p) => (Some(p.vm_id.clone()), Some(p.vm_name.clone())),
            Self::BatchCreate(_) | Self::BatchDelete(_) | Self::BatchPower(_) => (None, None),
        }
    }
}

fn parse<T: serde::de::DeserializeOwned>(value: &Value) -> Result<T> {
    Ok(serde_json::from_value(value.clone())?)
}
