//! Batch submission rate limiting
//!
//! - `policy`: merge defaults, per-user overrides and exemptions into the
//!   effective policy for one actor
//! - `limiter`: evaluate the five submission gates in order
//! - `admin`: manage exemptions and overrides

pub mod admin;
pub mod limiter;
pub mod policy;

pub use admin::{ExemptionView, OverrideUpdate, OverrideView, RateLimitAdmin, UserRateLimits};
pub use limiter::{RateLimitReason, RateLimitRejection, RateLimiter};
pub use policy::{merge_policy, resolve_policy, EffectivePolicy};
