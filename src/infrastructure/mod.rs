//! Infrastructure layer - stores, environment, and source adapters.
//!
//! This layer handles all I/O: the canonical store, the analytics store,
//! environment configuration and the platform dump readers.

pub mod analytics;
pub mod canonical;
pub mod config;
pub mod sources;

pub use analytics::AnalyticsStore;
pub use canonical::CanonicalStore;
pub use config::{load_environment, SourceAction, StoreConfig};
