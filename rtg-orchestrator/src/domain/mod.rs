//! Domain layer for report generation

pub mod entities;
pub mod error;
pub mod schedule;
pub mod services;

pub use entities::*;
pub use error::{DatastoreError, ReportError};
pub use schedule::*;
pub use services::{Datastore, ReportGenerator, ReportOptions, SettingsStore};
