//! Governance core: batch approval workflow for VM lifecycle requests
//!
//! Batches group many VM create, delete or power requests under one parent
//! approval ticket. Submission is rate limited and idempotent per request
//! id, children can be retried or cancelled individually, and the batch
//! status is always derived from the live child tickets.

pub mod auth;
pub mod batch;
pub mod catalog;
pub mod config;
pub mod constants;
pub mod database;
pub mod entity;
pub mod error;
pub mod gateway;
pub mod http;
pub mod jobs;
pub mod payload;
pub mod rate_limit;
pub mod service;
pub mod store;

pub use auth::{AuthProvider, AuthProviderRegistry, HeaderAuthProvider};
pub use batch::{
    BatchAction, BatchActionResponse, BatchEngine, BatchSubmitRequest, BatchSubmitResponse,
    BatchView,
};
pub use config::GovernanceConfig;
pub use database::Database;
pub use error::{GovernanceError, Result};
pub use service::GovernanceService;
