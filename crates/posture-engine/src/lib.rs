//! Posture Engine - policy evaluation and remediation dispatch
//!
//! Periodically loads every check from the graph store, runs each check's
//! query, streams the resulting findings and POSTs each one to the
//! remediation service.
//!
//! # Architecture
//!
//! ```text
//! EvaluationScheduler ── CheckRepository ──┐
//!         │            └─ QueryExecutor ───┴── GraphStore (posture-graph)
//!         │                    │
//!         │               FindingStream
//!         ▼                    │
//! RemediationDispatcher ◄──────┘
//!         │
//!  RemediationTransport (HTTP)
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use posture_engine::{EngineConfig, EvaluationScheduler};
//! use posture_graph::ArangoStore;
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! let config = EngineConfig::default().with_remediation_url("http://remediation:8080/remediate");
//! let store = Arc::new(ArangoStore::new(config.arango_config())?);
//! let scheduler = EvaluationScheduler::from_config(&config, store)?;
//! scheduler.run(CancellationToken::new()).await?;
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod cli;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod executor;
pub mod finding;
pub mod repository;
pub mod retry;
pub mod scheduler;
pub mod telemetry;

pub use cli::CliOptions;
pub use config::EngineConfig;
pub use dispatcher::{
    HttpTransport, RemediationDispatcher, RemediationOutcome, RemediationTransport, TransportResponse,
};
pub use error::{EngineError, TransportError};
pub use executor::{FindingStream, QueryExecutor};
pub use finding::Finding;
pub use repository::CheckRepository;
pub use retry::RetryPolicy;
pub use scheduler::{
    CycleReport, EvaluationScheduler, SchedulerConfig, SchedulerHandle, SchedulerState,
};
pub use telemetry::{init_tracing, LogFormat};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
