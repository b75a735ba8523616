//! Infrastructure adapters: PostgreSQL access, template and context
//! repositories, result delivery

pub mod context_repository;
pub mod datastore;
pub mod delivery;
pub mod settings;
pub mod template_repository;

pub use context_repository::ContextRepository;
pub use datastore::SqlxDatastore;
pub use delivery::{DeliveryError, DeliveryPayload, ReportDelivery};
pub use settings::{DatastoreSettingsStore, StaticSettingsStore};
pub use template_repository::TemplateRepository;
