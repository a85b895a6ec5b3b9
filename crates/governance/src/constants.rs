//! Centralized constants for the governance crate
//!
//! Defaults for batch sizes, rate limits and polling hints. Most of these
//! can be overridden through `GovernanceConfig`.

// =============================================================================
// Batch Limits
// =============================================================================

/// Maximum number of items a single batch may carry.
pub const MAX_BATCH_ITEMS: usize = 100;

/// Maximum length of an error message stored on a child ticket.
pub const MAX_CHILD_ERROR_LENGTH: usize = 512;

// =============================================================================
// Per-user Rate Limit Defaults
// =============================================================================

/// Batch parents a user may have PENDING/PROCESSING at once.
pub const DEFAULT_MAX_PENDING_PARENTS: u64 = 3;

/// Child tickets a user may have PENDING/APPROVED/EXECUTING at once.
pub const DEFAULT_MAX_PENDING_CHILDREN: u64 = 30;

/// Minimum time between two batch submissions of the same user.
pub const DEFAULT_COOLDOWN_SECONDS: u64 = 120;

// =============================================================================
// Global Rate Limits
// =============================================================================

/// Hard cap on PENDING/PROCESSING batch parents across all users.
pub const GLOBAL_MAX_PENDING_PARENTS: u64 = 100;

/// Batch submissions accepted across all users per rolling window.
pub const GLOBAL_MAX_SUBMISSIONS_PER_WINDOW: u64 = 1000;

/// Length of the rolling submission window.
pub const GLOBAL_SUBMISSION_WINDOW_SECONDS: u64 = 60;

/// Retry hint returned when a pending ceiling is hit.
/// Pending counts drain as approvers act, so there is no exact wait time.
pub const PENDING_LIMIT_RETRY_AFTER_SECONDS: u64 = 30;

// =============================================================================
// Polling
// =============================================================================

/// Polling cadence hint returned with every submission. Not a guarantee.
pub const STATUS_POLL_RETRY_AFTER_SECONDS: u64 = 2;

/// Path prefix used to build status URLs.
pub const BATCH_STATUS_URL_PREFIX: &str = "/api/v1/vms/batch";
