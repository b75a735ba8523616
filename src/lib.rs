//! RTG Engine - wires the report generation crates into one application
//!
//! The binary (`rtg`) builds an [`AppHandle`] with [`create_app`] and drives
//! it from the command line.

mod app;
pub mod cli;

pub use app::{AppHandle, create_app};
pub use rtg_core::{Config, init_tracing};

pub use rtg_core;
pub use rtg_llm;
pub use rtg_orchestrator;
