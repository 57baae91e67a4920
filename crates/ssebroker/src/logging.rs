//! Log subscriber setup

use serde::Deserialize;
use tracing_subscriber::EnvFilter;

/// Log output format
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// One line per event (default)
    #[default]
    Compact,
    /// Multi-line, human-readable, for development
    Pretty,
    /// Structured JSON, one object per line
    Json,
}

/// Install the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over `default_level`. Returns `false` if a
/// global subscriber was already installed (e.g. by a test harness).
pub fn init(format: LogFormat, default_level: &str) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let result = match format {
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    result.is_ok()
}
