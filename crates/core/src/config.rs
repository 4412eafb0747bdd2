//! Flow-control configuration: TOML file plus `FLOWGATE_*` environment overrides.
//!
//! Sections:
//! - `[queue]`: backpressure queue limits
//! - `[artifacts]`: raw artifact-write tunables, consumed by the dispatch resolver
//! - `[scheduler]`: utilization alarm and queue-depth snapshot settings
//! - `[write_fs]`: filesystem-strategy decisions made outside this system

mod loading;
mod raw;
mod types;
mod validation;


pub use loading::load_dotenv;
pub use raw::ArtifactConfig;
pub use types::{FlowgateConfig, QueueConfig, SchedulerAlertConfig, WriteFsConfig};
