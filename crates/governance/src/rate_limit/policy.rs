//! Effective rate-limit policy resolution

use chrono::{DateTime, Utc};
use sea_orm::{ConnectionTrait, EntityTrait, ModelTrait};
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::RateLimitDefaults;
use crate::entity::{rate_limit_exemptions, rate_limit_user_overrides};
use crate::error::Result;

/// Limits that apply to one actor right now
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EffectivePolicy {
    /// Exempt actors skip every per-user gate; the global rate still applies
    pub exempt: bool,
    pub max_pending_parents: u64,
    pub max_pending_children: u64,
    pub cooldown_seconds: u64,
    /// True only when neither an override nor a live exemption exists
    pub uses_default: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exemption_expires_at: Option<DateTime<Utc>>,
}

/// Merge defaults, an override row and an exemption row.
///
/// Override fields replace the matching default one by one. An exemption
/// only counts while it has not expired.
pub fn merge_policy(
    defaults: &RateLimitDefaults,
    user_override: Option<&rate_limit_user_overrides::Model>,
    exemption: Option<&rate_limit_exemptions::Model>,
    now: DateTime<Utc>,
) -> EffectivePolicy {
    let mut policy = EffectivePolicy {
        exempt: false,
        max_pending_parents: defaults.max_pending_parents,
        max_pending_children: defaults.max_pending_children,
        cooldown_seconds: defaults.cooldown_seconds,
        uses_default: true,
        exemption_expires_at: None,
    };

    if let Some(o) = user_override {
        policy.uses_default = false;
        if let Some(v) = o.max_pending_parents {
            policy.max_pending_parents = v.max(0) as u64;
        }
        if let Some(v) = o.max_pending_children {
            policy.max_pending_children = v.max(0) as u64;
        }
        if let Some(v) = o.cooldown_seconds {
            policy.cooldown_seconds = v.max(0) as u64;
        }
    }

    if let Some(e) = exemption.filter(|e| !e.is_expired(now)) {
        policy.exempt = true;
        policy.uses_default = false;
        policy.exemption_expires_at = e.expires_at;
    }

    policy
}

/// Resolve the effective policy for a user, purging an expired exemption.
///
/// The expired row is treated as absent whether or not the purge succeeds.
pub async fn resolve_policy<C>(
    conn: &C,
    defaults: &RateLimitDefaults,
    user_id: &str,
) -> Result<EffectivePolicy>
where
    C: ConnectionTrait,
{
    let now = Utc::now();
    let user_override = rate_limit_user_overrides::Entity::find_by_id(user_id.to_string())
        .one(conn)
        .await?;
    let mut exemption = rate_limit_exemptions::Entity::find_by_id(user_id.to_string())
        .one(conn)
        .await?;

    if let Some(expired) = exemption.take_if(|e| e.is_expired(now)) {
        debug!("Purging expired rate limit exemption for {}", user_id);
        if let Err(e) = expired.delete(conn).await {
            warn!(
                "Failed to purge expired rate limit exemption for {}: {}",
                user_id, e
            );
        }
    }

    Ok(merge_policy(
        defaults,
        user_override.as_ref(),
        exemption.as_ref(),
        now,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn override_row(
        parents: Option<i32>,
        children: Option<i32>,
        cooldown: Option<i32>,
    ) -> rate_limit_user_overrides::Model {
        rate_limit_user_overrides::Model {
            id: "alice".to_string(),
            max_pending_parents: parents,
            max_pending_children: children,
            cooldown_seconds: cooldown,
            reason: None,
            updated_by: Some("admin".to_string()),
            updated_at: Utc::now(),
        }
    }

    fn exemption_row(expires_at: Option<DateTime<Utc>>) -> rate_limit_exemptions::Model {
        rate_limit_exemptions::Model {
            id: "alice".to_string(),
            reason: Some("migration".to_string()),
            expires_at,
            created_by: Some("admin".to_string()),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_defaults_only() {
        let policy = merge_policy(&RateLimitDefaults::default(), None, None, Utc::now());
        assert!(!policy.exempt);
        assert!(policy.uses_default);
        assert_eq!(policy.max_pending_parents, 3);
        assert_eq!(policy.max_pending_children, 30);
        assert_eq!(policy.cooldown_seconds, 120);
    }

    #[test]
    fn test_override_replaces_only_set_fields() {
        let row = override_row(Some(10), None, Some(0));
        let policy = merge_policy(&RateLimitDefaults::default(), Some(&row), None, Utc::now());
        assert!(!policy.uses_default);
        assert_eq!(policy.max_pending_parents, 10);
        assert_eq!(policy.max_pending_children, 30);
        assert_eq!(policy.cooldown_seconds, 0);
    }

    #[test]
    fn test_live_exemption() {
        let now = Utc::now();
        let row = exemption_row(Some(now + Duration::hours(1)));
        let policy = merge_policy(&RateLimitDefaults::default(), None, Some(&row), now);
        assert!(policy.exempt);
        assert!(!policy.uses_default);
        assert_eq!(policy.exemption_expires_at, row.expires_at);

        let row = exemption_row(None);
        assert!(merge_policy(&RateLimitDefaults::default(), None, Some(&row), now).exempt);
    }

    #[test]
    fn test_expired_exemption_is_ignored() {
        let now = Utc::now();
        let row = exemption_row(Some(now - Duration::seconds(1)));
        let policy = merge_policy(&RateLimitDefaults::default(), None, Some(&row), now);
        assert_eq!(
            policy,
            merge_policy(&RateLimitDefaults::default(), None, None, now)
        );
    }
}
