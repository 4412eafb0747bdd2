//! Shared plumbing for the flowgate write-path flow-control crates:
//! configuration, error type, numeric coercion and logging helpers.

pub mod coerce;
pub mod config;
pub mod error;
pub mod logging;

pub use config::{
    load_dotenv, ArtifactConfig, FlowgateConfig, QueueConfig, SchedulerAlertConfig,
    WriteFsConfig,
};
pub use error::FlowgateError;
pub use logging::{emit_line, init_tracing, LogSink, RateLimiter};
