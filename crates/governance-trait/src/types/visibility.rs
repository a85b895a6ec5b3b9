//! Namespace visibility policy derived from role bindings

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Deployment environment a namespace belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Test,
    Prod,
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Test => write!(f, "test"),
            Self::Prod => write!(f, "prod"),
        }
    }
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "test" => Ok(Self::Test),
            "prod" => Ok(Self::Prod),
            other => Err(format!("unknown environment: {:?}", other)),
        }
    }
}

/// A role binding as far as namespace visibility is concerned.
///
/// An empty `allowed_environments` list means the binding does not restrict
/// environments at all.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleBinding {
    pub role: String,
    #[serde(default)]
    pub allowed_environments: Vec<String>,
}

impl RoleBinding {
    pub fn new(role: impl Into<String>, allowed_environments: &[&str]) -> Self {
        Self {
            role: role.into(),
            allowed_environments: allowed_environments.iter().map(|e| e.to_string()).collect(),
        }
    }
}

/// Which environments an actor may target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum VisibilityPolicy {
    /// Every environment is visible
    Unrestricted,
    /// Only the listed environments are visible; an empty set denies everything
    Restricted(BTreeSet<Environment>),
}

impl VisibilityPolicy {
    /// A policy that denies every namespace
    pub fn deny_all() -> Self {
        Self::Restricted(BTreeSet::new())
    }

    /// Build the policy from an actor's role bindings.
    ///
    /// No bindings at all denies everything. Any binding without an explicit
    /// environment list lifts the restriction. Otherwise the listed
    /// environments are unioned, and a single unrecognised value collapses
    /// the whole policy to deny-all.
    pub fn from_bindings(bindings: &[RoleBinding]) -> Self {
        if bindings.is_empty() {
            return Self::deny_all();
        }
        if bindings.iter().any(|b| b.allowed_environments.is_empty()) {
            return Self::Unrestricted;
        }

        let mut allowed = BTreeSet::new();
        for binding in bindings {
            for value in &binding.allowed_environments {
                match value.parse::<Environment>() {
                    Ok(env) => {
                        allowed.insert(env);
                    }
                    Err(_) => return Self::deny_all(),
                }
            }
        }
        Self::Restricted(allowed)
    }

    pub fn allows(&self, environment: Environment) -> bool {
        match self {
            Self::Unrestricted => true,
            Self::Restricted(allowed) => allowed.contains(&environment),
        }
    }

    pub fn is_deny_all(&self) -> bool {
        matches!(self, Self::Restricted(allowed) if allowed.is_empty())
    }
}
