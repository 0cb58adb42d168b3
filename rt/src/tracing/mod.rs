//! Tracing initializer
//!
//! The filter comes from `RUST_LOG` and falls back to `info`.

use std::str::FromStr;

use tracing_subscriber::filter::Directive;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::FmtSubscriber;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = TracingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" | "pretty" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(TracingError::UnknownFormat(other.to_string())),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TracingError {
    #[error("unknown log format '{0}'")]
    UnknownFormat(String),
    #[error("invalid default directive: {0}")]
    Directive(#[from] tracing_subscriber::filter::ParseError),
    #[error("a global subscriber is already installed")]
    AlreadyInstalled(#[from] tracing::subscriber::SetGlobalDefaultError),
}

fn env_filter() -> Result<EnvFilter, TracingError> {
    Ok(EnvFilter::builder()
        .with_default_directive(Directive::from_str("info")?)
        .from_env_lossy())
}

pub fn try_init_tracing(format: LogFormat) -> Result<(), TracingError> {
    let builder = FmtSubscriber::builder().with_env_filter(env_filter()?);
    match format {
        LogFormat::Text => tracing::subscriber::set_global_default(builder.finish())?,
        LogFormat::Json => tracing::subscriber::set_global_default(builder.json().finish())?,
    }
    Ok(())
}

/// Installs the global subscriber. A second call is a no-op.
pub fn init_tracing(format: LogFormat) {
    if let Err(err) = try_init_tracing(format) {
        tracing::debug!(%err, "tracing already initialized");
    }
}
