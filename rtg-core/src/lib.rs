//! RTG Core - shared foundation for the report generation engine
//!
//! # Modules
//!
//! - [`config`] — Strongly-typed configuration with file and environment variable support
//! - [`infrastructure`] — Two-tier cache, metrics collector and sliding-window rate limiter
//! - [`logging`] — Structured logging with tracing
//! - [`tasks`] — Detached background tasks with their own error boundary
//!
//! Each infrastructure component is built from an explicit options struct and
//! shared by reference (`Arc`); nothing in this crate is a process-wide global.
//!
//! # Configuration
//!
//! ```rust,ignore
//! use rtg_core::Config;
//!
//! let config = Config::load()?;
//! ```
//!
//! Environment variables use the `RTG__` prefix with double underscore separators:
//!
//! ```bash
//! RTG__CACHE__MEMORY_MAX_SIZE=200
//! RTG__BATCH__MAX_CONCURRENT=4
//! ```

pub mod config;
pub mod infrastructure;
pub mod logging;
pub mod tasks;

pub use config::Config;
pub use infrastructure::cache::{CacheManager, CacheNamespace, CacheOptions};
pub use infrastructure::metrics::{MetricsCollector, MetricsOptions};
pub use infrastructure::rate_limiter::{RateLimiter, RateLimiterOptions};
pub use logging::init_tracing;
pub use tasks::{spawn_background, spawn_tracked};
