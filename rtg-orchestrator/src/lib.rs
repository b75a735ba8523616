//! RTG Orchestrator - report generation for threat-model data
//!
//! Turns a report template plus live project data into an LLM-authored
//! report, one target at a time, in bounded-concurrency batches, or on a
//! recurring schedule.
//!
//! # Architecture
//!
//! ```text
//! rtg-orchestrator/
//! ├── application/            # Use cases
//! │   ├── prompt/             # Token normalization, substitution, budgets
//! │   ├── report_runner.rs    # Single report pipeline
//! │   ├── batch.rs            # Multi-target generation
//! │   └── scheduler.rs        # Recurring runs and delivery
//! ├── infrastructure/         # PostgreSQL access, repositories, delivery
//! └── domain/                 # Entities, schedules, errors, service traits
//! ```
//!
//! # Pipeline
//!
//! 1. Resolve the template through managed, versioned, legacy and custom
//!    prompt sources
//! 2. Build the domain context, scoped to one project or global
//! 3. Normalize tokens, substitute general then type-specific values
//! 4. Pick the backend (override, template, setting, default) and complete

pub mod application;
pub mod domain;
pub mod infrastructure;

pub use application::{BatchGenerator, ReportRunner, ReportScheduler};
pub use domain::*;
