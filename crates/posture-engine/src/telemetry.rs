//! Logging setup and metric names

use crate::error::EngineError;
use std::str::FromStr;
use tracing_subscriber::EnvFilter;

/// Evaluation cycles started
pub const CYCLES_TOTAL: &str = "posture_cycles_total";
/// Findings decoded
pub const FINDINGS_TOTAL: &str = "posture_findings_total";
/// Dispatch outcomes, labelled `outcome` = delivered | disabled | failed
pub const DISPATCH_TOTAL: &str = "posture_dispatch_total";
/// Checks abandoned for a cycle
pub const CHECK_FAILURES_TOTAL: &str = "posture_check_failures_total";
/// Cycle wall time
pub const CYCLE_DURATION_SECONDS: &str = "posture_cycle_duration_seconds";

/// Log line format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable
    #[default]
    Text,
    /// One JSON object per line
    Json,
}

impl FromStr for LogFormat {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(EngineError::ConfigurationError(format!(
                "unknown log format '{other}' (expected text or json)"
            ))),
        }
    }
}

/// Install the global subscriber; `RUST_LOG` overrides the `info` default
///
/// # Errors
/// `ConfigurationError` if a subscriber is already installed
pub fn init_tracing(format: LogFormat) -> Result<(), EngineError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    let installed = match format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().flatten_event(true).try_init(),
    };
    installed.map_err(|e| EngineError::ConfigurationError(format!("tracing subscriber: {e}")))
}
