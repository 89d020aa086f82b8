pub mod config;
pub mod error;
pub mod file_config;
pub mod jobs;
pub mod types;

pub use config::AppConfig;
pub use error::{IdeaScoutError, ScanError};
pub use file_config::{PipelineConfig, ProviderConfig, ProviderKind};
pub use jobs::{Job, Queue};
pub use types::*;
