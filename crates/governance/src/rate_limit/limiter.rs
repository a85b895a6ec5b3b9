//! Submission gates for batch requests
//!
//! Counters are read and compared without serializable isolation, so
//! concurrent submissions can overshoot a limit by a small margin.

use chrono::{DateTime, Duration, Utc};
use sea_orm::{
    ColumnTrait, ConnectionTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder,
};
use serde::Serialize;
use serde_json::{json, Value};
use std::fmt;
use tracing::{debug, info};

use super::policy::{resolve_policy, EffectivePolicy};
use crate::config::RateLimitDefaults;
use crate::entity::{
    approval_tickets, domain_events, DomainEventStatus, DomainEventType, TicketStatus,
};
use crate::error::{GovernanceError, Result};

/// Which gate rejected a submission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitReason {
    GlobalPending,
    UserPending,
    GlobalRate,
    UserPendingChildren,
    UserCooldown,
}

impl RateLimitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GlobalPending => "global_pending",
            Self::UserPending => "user_pending",
            Self::GlobalRate => "global_rate",
            Self::UserPendingChildren => "user_pending_children",
            Self::UserCooldown => "user_cooldown",
        }
    }

    pub fn is_per_user(&self) -> bool {
        !matches!(self, Self::GlobalPending | Self::GlobalRate)
    }
}

/// Details of a rejected submission, returned to callers as `params`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitRejection {
    pub reason: RateLimitReason,
    pub current: u64,
    pub limit: u64,
    /// Items the rejected request asked for (child gate only)
    pub requested: Option<u64>,
    pub retry_after_seconds: u64,
    /// Suggest contacting an admin: only when the user is on plain defaults
    pub contact_admin: bool,
}

impl RateLimitRejection {
    pub fn params(&self) -> Value {
        let mut params = json!({
            "reason": self.reason.as_str(),
            "current": self.current,
            "limit": self.limit,
            "retry_after_seconds": self.retry_after_seconds,
            "contact_admin": self.contact_admin,
        });
        if let Some(requested) = self.requested {
            params["requested"] = json!(requested);
        }
        params
    }
}

impl fmt::Display for RateLimitRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.reason {
            RateLimitReason::GlobalPending => write!(
                f,
                "too many batches awaiting processing platform-wide ({}/{})",
                self.current, self.limit
            ),
            RateLimitReason::UserPending => write!(
                f,
                "too many of your batches are still pending ({}/{})",
                self.current, self.limit
            ),
            RateLimitReason::GlobalRate => write!(
                f,
                "platform-wide batch submission rate exceeded ({}/{})",
                self.current, self.limit
            ),
            RateLimitReason::UserPendingChildren => write!(
                f,
                "request would exceed your pending item limit ({} + {} > {})",
                self.current,
                self.requested.unwrap_or(0),
                self.limit
            ),
            RateLimitReason::UserCooldown => write!(
                f,
                "please wait {}s before submitting another batch",
                self.retry_after_seconds
            ),
        }
    }
}

/// Evaluates submission gates against live store counters
#[derive(Debug, Clone)]
pub struct RateLimiter {
    defaults: RateLimitDefaults,
}

impl RateLimiter {
    pub fn new(defaults: RateLimitDefaults) -> Self {
        Self { defaults }
    }

    pub fn defaults(&self) -> &RateLimitDefaults {
        &self.defaults
    }

    /// Check every gate in order; the first hit wins.
    ///
    /// 1. global pending parents
    /// 2. per-user pending parents (skipped when exempt)
    /// 3. global submission rate (applies to everyone)
    /// 4. per-user pending children (skipped when exempt)
    /// 5. per-user cooldown (skipped when exempt)
    pub async fn check_submission<C>(
        &self,
        conn: &C,
        actor_id: &str,
        item_count: u64,
    ) -> Result<EffectivePolicy>
    where
        C: ConnectionTrait,
    {
        let now = Utc::now();
        let policy = resolve_policy(conn, &self.defaults, actor_id).await?;
        let reject = |rejection: RateLimitRejection| {
            info!(
                "Rejecting batch submission from {}: {} ({})",
                actor_id,
                rejection.reason.as_str(),
                rejection
            );
            Err(GovernanceError::rate_limited(rejection))
        };

        let global_pending = count_pending_parents(conn, None).await?;
        if global_pending >= self.defaults.global_max_pending_parents {
            return reject(self.rejection(
                &policy,
                RateLimitReason::GlobalPending,
                global_pending,
                self.defaults.global_max_pending_parents,
                None,
                self.defaults.pending_retry_after_seconds,
            ));
        }

        if !policy.exempt {
            let user_pending = count_pending_parents(conn, Some(actor_id)).await?;
            if user_pending >= policy.max_pending_parents {
                return reject(self.rejection(
                    &policy,
                    RateLimitReason::UserPending,
                    user_pending,
                    policy.max_pending_parents,
                    None,
                    self.defaults.pending_retry_after_seconds,
                ));
            }
        }

        let window = Duration::seconds(self.defaults.global_window_seconds as i64);
        let window_start = now - window;
        let recent = domain_events::Entity::find()
            .filter(domain_events::Column::EventType.is_in(DomainEventType::BATCH_PARENTS))
            .filter(domain_events::Column::CreatedAt.gte(window_start));
        let recent_count = recent.clone().count(conn).await?;
        if recent_count >= self.defaults.global_max_submissions_per_window {
            let oldest = recent
                .order_by_asc(domain_events::Column::CreatedAt)
                .one(conn)
                .await?;
            let retry_after = oldest
                .map(|e| seconds_until(now, e.created_at + window))
                .unwrap_or(self.defaults.global_window_seconds);
            return reject(self.rejection(
                &policy,
                RateLimitReason::GlobalRate,
                recent_count,
                self.defaults.global_max_submissions_per_window,
                None,
                retry_after,
            ));
        }

        if policy.exempt {
            debug!("{} is exempt from per-user batch limits", actor_id);
            return Ok(policy);
        }

        let pending_children = approval_tickets::Entity::find()
            .filter(approval_tickets::Column::Requester.eq(actor_id))
            .filter(approval_tickets::Column::ParentTicketId.is_not_null())
            .filter(approval_tickets::Column::Status.is_in(TicketStatus::ACTIVE_CHILD))
            .count(conn)
            .await?;
        if pending_children + item_count > policy.max_pending_children {
            return reject(self.rejection(
                &policy,
                RateLimitReason::UserPendingChildren,
                pending_children,
                policy.max_pending_children,
                Some(item_count),
                self.defaults.pending_retry_after_seconds,
            ));
        }

        if policy.cooldown_seconds > 0 {
            let last = domain_events::Entity::find()
                .filter(domain_events::Column::EventType.is_in(DomainEventType::BATCH_PARENTS))
                .filter(domain_events::Column::CreatedBy.eq(actor_id))
                .order_by_desc(domain_events::Column::CreatedAt)
                .one(conn)
                .await?;
            if let Some(last) = last {
                let cooldown_ends =
                    last.created_at + Duration::seconds(policy.cooldown_seconds as i64);
                if cooldown_ends > now {
                    let elapsed = (now - last.created_at).num_seconds().max(0) as u64;
                    return reject(self.rejection(
                        &policy,
                        RateLimitReason::UserCooldown,
                        elapsed,
                        policy.cooldown_seconds,
                        None,
                        seconds_until(now, cooldown_ends),
                    ));
                }
            }
        }

        Ok(policy)
    }

    fn rejection(
        &self,
        policy: &EffectivePolicy,
        reason: RateLimitReason,
        current: u64,
        limit: u64,
        requested: Option<u64>,
        retry_after_seconds: u64,
    ) -> RateLimitRejection {
        RateLimitRejection {
            reason,
            current,
            limit,
            requested,
            retry_after_seconds: retry_after_seconds.max(1),
            contact_admin: reason.is_per_user() && policy.uses_default,
        }
    }
}

/// PENDING/PROCESSING batch parents, optionally for one user
async fn count_pending_parents<C>(conn: &C, created_by: Option<&str>) -> Result<u64>
where
    C: ConnectionTrait,
{
    let mut query = domain_events::Entity::find()
        .filter(domain_events::Column::EventType.is_in(DomainEventType::BATCH_PARENTS))
        .filter(domain_events::Column::Status.is_in([
            DomainEventStatus::Pending,
            DomainEventStatus::Processing,
        ]));
    if let Some(user) = created_by {
        query = query.filter(domain_events::Column::CreatedBy.eq(user));
    }
    Ok(query.count(conn).await?)
}

/// Whole seconds from `now` until `deadline`, rounded up
fn seconds_until(now: DateTime<Utc>, deadline: DateTime<Utc>) -> u64 {
    let millis = (deadline - now).num_milliseconds();
    if millis <= 0 {
        0
    } else {
        ((millis + 999) / 1000) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seconds_until_rounds_up() {
        let now = Utc::now();
        assert_eq!(seconds_until(now, now - Duration::seconds(5)), 0);
        assert_eq!(seconds_until(now, now + Duration::milliseconds(1)), 1);
        assert_eq!(seconds_until(now, now + Duration::milliseconds(119_001)), 120);
    }

    #[test]
    fn test_contact_admin_only_on_defaults_for_user_gates() {
        let limiter = RateLimiter::new(RateLimitDefaults::default());
        let policy = crate::rate_limit::merge_policy(limiter.defaults(), None, None, Utc::now());

        let r = limiter.rejection(&policy, RateLimitReason::UserPending, 3, 3, None, 30);
        assert!(r.contact_admin);
        let r = limiter.rejection(&policy, RateLimitReason::GlobalRate, 1000, 1000, None, 0);
        assert!(!r.contact_admin);
        assert_eq!(r.retry_after_seconds, 1);

        let mut custom = policy.clone();
        custom.uses_default = false;
        let r = limiter.rejection(&custom, RateLimitReason::UserCooldown, 10, 120, None, 110);
        assert!(!r.contact_admin);
    }

    #[test]
    fn test_params_shape() {
        let rejection = RateLimitRejection {
            reason: RateLimitReason::UserPendingChildren,
            current: 28,
            limit: 30,
            requested: Some(5),
            retry_after_seconds: 30,
            contact_admin: true,
        };
        let params = rejection.params();
        assert_eq!(params["reason"], "user_pending_children");
        assert_eq!(params["current"], 28);
        assert_eq!(params["requested"], 5);
        assert_eq!(params["limit"], 30);
        assert!(rejection.to_string().contains("28 + 5 > 30"));
    }
}
