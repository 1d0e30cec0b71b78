//! Daily usage quotas
//!
//! Free-tier users get a fixed number of translated words and explanations
//! per calendar day; the Plus tier is unlimited.

pub mod manager;
pub mod models;

pub use manager::QuotaManager;
pub use models::*;
