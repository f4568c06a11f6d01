pub mod provider;

pub use provider::{CatalogSink, PscProvider};
