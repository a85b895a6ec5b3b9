//! Infrastructure job types

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Power action on an existing VM
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerOperation {
    Start,
    Stop,
    Restart,
}

impl PowerOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Restart => "restart",
        }
    }
}

impl fmt::Display for PowerOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PowerOperation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "start" => Ok(Self::Start),
            "stop" => Ok(Self::Stop),
            "restart" => Ok(Self::Restart),
            other => Err(format!("unknown power operation: {}", other)),
        }
    }
}

/// Work handed to the infrastructure worker pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobOperation {
    /// Provision a new VM
    VmCreate,
    /// Remove an existing VM
    VmDelete,
    /// Change the power state of an existing VM
    VmPower(PowerOperation),
}

impl JobOperation {
    /// Job kind as stored by queues
    pub fn kind(&self) -> &'static str {
        match self {
            Self::VmCreate => "vm_create",
            Self::VmDelete => "vm_delete",
            Self::VmPower(_) => "vm_power",
        }
    }
}

impl fmt::Display for JobOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::VmPower(op) => write!(f, "vm_power:{}", op),
            other => f.write_str(other.kind()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_power_operation_parsing() {
        assert_eq!("start".parse::<PowerOperation>(), Ok(PowerOperation::Start));
        assert_eq!(" STOP ".parse::<PowerOperation>(), Ok(PowerOperation::Stop));
        assert_eq!(
            "restart".parse::<PowerOperation>(),
            Ok(PowerOperation::Restart)
        );
        assert!("reboot".parse::<PowerOperation>().is_err());
    }

    #[test]
    fn test_job_operation_display() {
        assert_eq!(JobOperation::VmCreate.to_string(), "vm_create");
        assert_eq!(
            JobOperation::VmPower(PowerOperation::Restart).to_string(),
            "vm_power:restart"
        );
        assert_eq!(JobOperation::VmPower(PowerOperation::Stop).kind(), "vm_power");
    }
}
