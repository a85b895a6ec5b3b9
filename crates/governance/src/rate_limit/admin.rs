//! Administration of per-user rate-limit overrides and exemptions

use chrono::{DateTime, Utc};
use governance_trait::Actor;
use sea_orm::{ActiveModelTrait, EntityTrait, IntoActiveModel, Set};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::policy::{resolve_policy, EffectivePolicy};
use crate::config::RateLimitDefaults;
use crate::database::Database;
use crate::entity::{rate_limit_exemptions, rate_limit_user_overrides};
use crate::error::{GovernanceError, Result};

/// Replacement override values; a `None` field falls back to the default
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverrideUpdate {
    #[serde(default)]
    pub max_pending_parents: Option<i64>,
    #[serde(default)]
    pub max_pending_children: Option<i64>,
    #[serde(default)]
    pub cooldown_seconds: Option<i64>,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExemptionView {
    pub reason: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<rate_limit_exemptions::Model> for ExemptionView {
    fn from(model: rate_limit_exemptions::Model) -> Self {
        Self {
            reason: model.reason,
            expires_at: model.expires_at,
            created_by: model.created_by,
            created_at: model.created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OverrideView {
    pub max_pending_parents: Option<i32>,
    pub max_pending_children: Option<i32>,
    pub cooldown_seconds: Option<i32>,
    pub reason: Option<String>,
    pub updated_by: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl From<rate_limit_user_overrides::Model> for OverrideView {
    fn from(model: rate_limit_user_overrides::Model) -> Self {
        Self {
            max_pending_parents: model.max_pending_parents,
            max_pending_children: model.max_pending_children,
            cooldown_seconds: model.cooldown_seconds,
            reason: model.reason,
            updated_by: model.updated_by,
            updated_at: model.updated_at,
        }
    }
}

/// Everything an admin sees about one user's limits
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserRateLimits {
    pub user_id: String,
    pub policy: EffectivePolicy,
    pub exemption: Option<ExemptionView>,
    #[serde(rename = "override")]
    pub user_override: Option<OverrideView>,
}

#[derive(Clone)]
pub struct RateLimitAdmin {
    db: Database,
    defaults: RateLimitDefaults,
}

impl RateLimitAdmin {
    pub fn new(db: Database, defaults: RateLimitDefaults) -> Self {
        Self { db, defaults }
    }

    /// Resolved policy plus the raw rows behind it
    pub async fn get_policy(&self, actor: &Actor, user_id: &str) -> Result<UserRateLimits> {
        require_admin(actor)?;
        let user_id = require_user(user_id)?;
        let conn = self.db.connection();

        // Resolving first purges an expired exemption so it is not reported below
        let policy = resolve_policy(conn, &self.defaults, user_id).await?;
        let exemption = rate_limit_exemptions::Entity::find_by_id(user_id.to_string())
            .one(conn)
            .await?
            .filter(|e| !e.is_expired(Utc::now()));
        let user_override = rate_limit_user_overrides::Entity::find_by_id(user_id.to_string())
            .one(conn)
            .await?;

        Ok(UserRateLimits {
            user_id: user_id.to_string(),
            policy,
            exemption: exemption.map(Into::into),
            user_override: user_override.map(Into::into),
        })
    }

    /// Grant or replace an exemption
    pub async fn set_exemption(
        &self,
        actor: &Actor,
        user_id: &str,
        reason: Option<String>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<ExemptionView> {
        require_admin(actor)?;
        let user_id = require_user(user_id)?;
        let now = Utc::now();
        if expires_at.is_some_and(|t| t <= now) {
            return Err(GovernanceError::InvalidRequest(
                "expires_at must be in the future".to_string(),
            ));
        }

        let conn = self.db.connection();
        let existing = rate_limit_exemptions::Entity::find_by_id(user_id.to_string())
            .one(conn)
            .await?;
        let saved = match existing {
            Some(row) => {
                let mut active = row.into_active_model();
                active.reason = Set(reason);
                active.expires_at = Set(expires_at);
                active.created_by = Set(Some(actor.id.clone()));
                active.created_at = Set(now);
                active.update(conn).await?
            }
            None => {
                rate_limit_exemptions::ActiveModel {
                    id: Set(user_id.to_string()),
                    reason: Set(reason),
                    expires_at: Set(expires_at),
                    created_by: Set(Some(actor.id.clone())),
                    created_at: Set(now),
                }
                .insert(conn)
                .await?
            }
        };

        info!(
            "Rate limit exemption for {} set by {} (expires: {:?})",
            user_id, actor.id, saved.expires_at
        );
        Ok(saved.into())
    }

    /// Returns whether an exemption existed
    pub async fn remove_exemption(&self, actor: &Actor, user_id: &str) -> Result<bool> {
        require_admin(actor)?;
        let user_id = require_user(user_id)?;
        let result = rate_limit_exemptions::Entity::delete_by_id(user_id.to_string())
            .exec(self.db.connection())
            .await?;
        if result.rows_affected > 0 {
            info!("Rate limit exemption for {} removed by {}", user_id, actor.id);
        }
        Ok(result.rows_affected > 0)
    }

    /// Create or replace a user's override; every field is written
    pub async fn upsert_override(
        &self,
        actor: &Actor,
        user_id: &str,
        update: OverrideUpdate,
    ) -> Result<OverrideView> {
        require_admin(actor)?;
        let user_id = require_user(user_id)?;
        let max_pending_parents = limit_value("max_pending_parents", update.max_pending_parents)?;
        let max_pending_children =
            limit_value("max_pending_children", update.max_pending_children)?;
        let cooldown_seconds = limit_value("cooldown_seconds", update.cooldown_seconds)?;

        let conn = self.db.connection();
        let now = Utc::now();
        let existing = rate_limit_user_overrides::Entity::find_by_id(user_id.to_string())
            .one(conn)
            .await?;
        let saved = match existing {
            Some(row) => {
                let mut active = row.into_active_model();
                active.max_pending_parents = Set(max_pending_parents);
                active.max_pending_children = Set(max_pending_children);
                active.cooldown_seconds = Set(cooldown_seconds);
                active.reason = Set(update.reason);
                active.updated_by = Set(Some(actor.id.clone()));
                active.updated_at = Set(now);
                active.update(conn).await?
            }
            None => {
                rate_limit_user_overrides::ActiveModel {
                    id: Set(user_id.to_string()),
                    max_pending_parents: Set(max_pending_parents),
                    max_pending_children: Set(max_pending_children),
                    cooldown_seconds: Set(cooldown_seconds),
                    reason: Set(update.reason),
                    updated_by: Set(Some(actor.id.clone())),
                    updated_at: Set(now),
                }
                .insert(conn)
                .await?
            }
        };

        info!("Rate limit override for {} updated by {}", user_id, actor.id);
        Ok(saved.into())
    }

    /// Returns whether an override existed
    pub async fn remove_override(&self, actor: &Actor, user_id: &str) -> Result<bool> {
        require_admin(actor)?;
        let user_id = require_user(user_id)?;
        let result = rate_limit_user_overrides::Entity::delete_by_id(user_id.to_string())
            .exec(self.db.connection())
            .await?;
        if result.rows_affected > 0 {
            info!("Rate limit override for {} removed by {}", user_id, actor.id);
        }
        Ok(result.rows_affected > 0)
    }
}

fn require_admin(actor: &Actor) -> Result<()> {
    if !actor.is_authenticated() {
        return Err(GovernanceError::Unauthorized);
    }
    if !actor.platform_admin {
        return Err(GovernanceError::Forbidden(
            "platform admin role required".to_string(),
        ));
    }
    Ok(())
}

fn require_user(user_id: &str) -> Result<&str> {
    let user_id = user_id.trim();
    if user_id.is_empty() {
        return Err(GovernanceError::InvalidRequest(
            "user id is required".to_string(),
        ));
    }
    Ok(user_id)
}

fn limit_value(field: &str, value: Option<i64>) -> Result<Option<i32>> {
    match value {
        None => Ok(None),
        Some(v) if v < 0 => Err(GovernanceError::InvalidRequest(format!(
            "{} must not be negative",
            field
        ))),
        Some(v) => i32::try_from(v).map(Some).map_err(|_| {
            GovernanceError::InvalidRequest(format!("{} is out of range", field))
        }),
    }
}
