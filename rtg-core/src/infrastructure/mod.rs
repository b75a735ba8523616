//! Infrastructure shared by the report pipeline

pub mod cache;
pub mod metrics;
pub mod rate_limiter;
