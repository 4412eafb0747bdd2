use thiserror::Error;

/// Errors surfaced by configuration loading and pattern compilation.
///
/// Flow-control operations themselves never fail; they degrade to defaults.
#[derive(Debug, Error)]
pub enum FlowgateError {
    #[error("config I/O error: {0}")]
    ConfigIo(#[from] std::io::Error),

    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("config error: {0}")]
    Config(String),

    #[error("invalid write pattern '{pattern}': {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}
