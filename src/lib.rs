pub mod config;
pub mod database_ops;
pub mod error;
pub mod models;
pub mod notify;
pub mod orchestrator;
pub mod tracing;

pub mod util {
    pub mod env;
}

pub use config::SyncConfig;
pub use error::{DeliveryError, RepositoryError};
pub use orchestrator::{SyncOrchestrator, SyncOutcome};
