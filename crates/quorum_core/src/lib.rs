//! Shared configuration and logging for the quorum workspace.

pub mod config;
pub mod logging;

pub use config::{ApiStyle, ClassifierMode, ModelEntry, ProviderEndpoint, QuorumConfig};
pub use logging::{init_logging, init_logging_to_dir};
