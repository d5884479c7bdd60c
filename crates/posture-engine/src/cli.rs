//! Command line and environment parsing
//!
//! Every setting can come from a flag or from its environment variable;
//! the flag wins when both are present.

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::telemetry::LogFormat;
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use std::ffi::OsString;
use std::time::Duration;

/// Parsed invocation
#[derive(Debug, Clone)]
pub struct CliOptions {
    /// Engine settings
    pub config: EngineConfig,
    /// Run a single cycle, print its report and exit
    pub once: bool,
    /// Ensure collections exist and store the built-in checks before starting
    pub seed_defaults: bool,
    /// Log line format
    pub log_format: LogFormat,
}

/// Command definition
#[must_use]
pub fn command() -> Command {
    Command::new("posture-engine")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Evaluates graph-stored posture checks and dispatches findings for remediation")
        .arg(
            Arg::new("remediation-url")
                .long("remediation-url")
                .env("REMEDIATION_SERVICE_URL")
                .value_name("URL")
                .help("Remediation endpoint; findings are only logged when unset"),
        )
        .arg(
            Arg::new("store-url")
                .long("store-url")
                .env("GRAPH_STORE_URL")
                .value_name("URL")
                .default_value("http://arangodb:8529")
                .help("Graph store base URL"),
        )
        .arg(
            Arg::new("store-database")
                .long("store-database")
                .env("GRAPH_STORE_DATABASE")
                .default_value("_system")
                .help("Graph store database"),
        )
        .arg(
            Arg::new("store-username")
                .long("store-username")
                .env("GRAPH_STORE_USERNAME")
                .default_value("root")
                .help("Graph store user"),
        )
        .arg(
            Arg::new("store-password")
                .long("store-password")
                .env("GRAPH_STORE_PASSWORD")
                .hide_env_values(true)
                .default_value("")
                .help("Graph store password"),
        )
        .arg(
            Arg::new("checks-collection")
                .long("checks-collection")
                .env("CHECKS_COLLECTION")
                .default_value("Checks")
                .help("Collection holding check definitions"),
        )
        .arg(
            Arg::new("interval")
                .long("interval")
                .env("EVALUATION_INTERVAL_SECS")
                .value_name("SECS")
                .default_value("10")
                .value_parser(value_parser!(u64))
                .help("Seconds between evaluation cycles"),
        )
        .arg(
            Arg::new("store-timeout")
                .long("store-timeout")
                .env("STORE_TIMEOUT_SECS")
                .value_name("SECS")
                .default_value("30")
                .value_parser(value_parser!(u64))
                .help("Deadline for each graph store operation"),
        )
        .arg(
            Arg::new("dispatch-timeout")
                .long("dispatch-timeout")
                .env("DISPATCH_TIMEOUT_SECS")
                .value_name("SECS")
                .default_value("15")
                .value_parser(value_parser!(u64))
                .help("Deadline for each remediation attempt"),
        )
        .arg(
            Arg::new("dispatch-attempts")
                .long("dispatch-attempts")
                .env("DISPATCH_MAX_ATTEMPTS")
                .default_value("3")
                .value_parser(value_parser!(u32))
                .help("Remediation attempts per finding, including the first"),
        )
        .arg(
            Arg::new("dispatch-concurrency")
                .long("dispatch-concurrency")
                .env("DISPATCH_CONCURRENCY")
                .default_value("1")
                .value_parser(value_parser!(usize))
                .help("Findings of one check dispatched concurrently"),
        )
        .arg(
            Arg::new("max-findings")
                .long("max-findings")
                .env("MAX_FINDINGS_PER_CHECK")
                .value_parser(value_parser!(usize))
                .help("Result documents read per check per cycle"),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .env("LOG_FORMAT")
                .default_value("text")
                .value_parser(["text", "json"])
                .help("Log line format"),
        )
        .arg(
            Arg::new("once")
                .long("once")
                .action(ArgAction::SetTrue)
                .help("Run a single cycle, print its report as JSON and exit"),
        )
        .arg(
            Arg::new("seed-defaults")
                .long("seed-defaults")
                .action(ArgAction::SetTrue)
                .help("Create collections and store the built-in checks before starting"),
        )
}

impl CliOptions {
    /// Parse the process arguments, exiting on `--help` or a usage error
    ///
    /// # Errors
    /// `ConfigurationError` for values clap accepts but the engine cannot use
    pub fn parse() -> Result<Self, EngineError> {
        Self::from_matches(&command().get_matches())
    }

    /// Parse an explicit argument list
    ///
    /// # Errors
    /// `ConfigurationError` on a usage error
    pub fn try_parse_from<I, T>(args: I) -> Result<Self, EngineError>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let matches = command()
            .try_get_matches_from(args)
            .map_err(|e| EngineError::ConfigurationError(e.to_string()))?;
        Self::from_matches(&matches)
    }

    fn from_matches(matches: &ArgMatches) -> Result<Self, EngineError> {
        let text = |name: &str| matches.get_one::<String>(name).cloned().unwrap_or_default();
        let secs = |name: &str| Duration::from_secs(matches.get_one::<u64>(name).copied().unwrap_or_default());

        let config = EngineConfig {
            remediation_url: matches
                .get_one::<String>("remediation-url")
                .filter(|url| !url.trim().is_empty())
                .cloned(),
            store_endpoint: text("store-url"),
            store_database: text("store-database"),
            store_username: text("store-username"),
            store_password: text("store-password"),
            checks_collection: text("checks-collection"),
            interval: secs("interval"),
            store_timeout: secs("store-timeout"),
            dispatch_timeout: secs("dispatch-timeout"),
            dispatch_max_attempts: matches.get_one::<u32>("dispatch-attempts").copied().unwrap_or(1),
            dispatch_concurrency: matches.get_one::<usize>("dispatch-concurrency").copied().unwrap_or(1),
            max_findings_per_check: matches.get_one::<usize>("max-findings").copied(),
        };

        Ok(Self {
            config,
            once: matches.get_flag("once"),
            seed_defaults: matches.get_flag("seed-defaults"),
            log_format: text("log-format").parse()?,
        })
    }
}
