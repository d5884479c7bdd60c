//! Periodic evaluation loop
//!
//! One cycle loads every check, runs each in turn and hands every finding
//! to the dispatcher. Cycles never overlap: the next one starts `interval`
//! after the previous one finished.
//!
//! Failures are contained at the smallest possible scope. An unreadable
//! finding or a failed dispatch skips that finding; a failing query skips
//! that check; only a failure to load the checks skips the cycle. None of
//! them stop the loop.

mod state;

pub use state::{allowed_transitions, validate_transition, SchedulerState};

use crate::config::EngineConfig;
use crate::dispatcher::{RemediationDispatcher, RemediationOutcome};
use crate::error::EngineError;
use crate::executor::QueryExecutor;
use crate::finding::Finding;
use crate::repository::CheckRepository;
use crate::telemetry;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use posture_graph::{Check, GraphStore};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use ulid::Ulid;

/// Loop settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Pause between cycles
    pub interval: Duration,
    /// Findings of one check dispatched concurrently (minimum 1)
    pub dispatch_concurrency: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            dispatch_concurrency: 1,
        }
    }
}

/// Counters for one evaluation cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    /// Unique cycle identifier
    pub cycle_id: Ulid,
    /// Wall-clock start
    pub started_at: DateTime<Utc>,
    /// Checks loaded
    pub checks: usize,
    /// Checks whose query failed or whose stream broke
    pub checks_failed: usize,
    /// Findings decoded
    pub findings: usize,
    /// Result documents that could not be decoded
    pub findings_unreadable: usize,
    /// Findings acknowledged by the remediation service
    pub dispatched: usize,
    /// Findings whose dispatch failed
    pub dispatch_failed: usize,
    /// Findings logged without dispatch (no endpoint)
    pub dispatch_disabled: usize,
    /// Cycle cut short by shutdown
    pub cancelled: bool,
    /// Elapsed time in milliseconds
    pub duration_ms: u64,
}

impl CycleReport {
    fn begin() -> Self {
        Self {
            cycle_id: Ulid::new(),
            started_at: Utc::now(),
            checks: 0,
            checks_failed: 0,
            findings: 0,
            findings_unreadable: 0,
            dispatched: 0,
            dispatch_failed: 0,
            dispatch_disabled: 0,
            cancelled: false,
            duration_ms: 0,
        }
    }

    fn absorb(&mut self, tally: &CheckTally) {
        self.checks_failed += usize::from(tally.failed);
        self.findings += tally.findings;
        self.findings_unreadable += tally.unreadable;
        self.dispatched += tally.delivered;
        self.dispatch_failed += tally.dispatch_failed;
        self.dispatch_disabled += tally.disabled;
        self.cancelled |= tally.cancelled;
    }
}

/// Outcome of one stream item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ItemOutcome {
    Delivered,
    Disabled,
    DispatchFailed,
    Unreadable,
    StreamFailed,
    Cancelled,
}

#[derive(Debug, Default, Clone, Copy)]
struct CheckTally {
    findings: usize,
    unreadable: usize,
    delivered: usize,
    disabled: usize,
    dispatch_failed: usize,
    failed: bool,
    cancelled: bool,
}

impl CheckTally {
    fn record(&mut self, outcome: ItemOutcome) {
        match outcome {
            ItemOutcome::Delivered => {
                self.findings += 1;
                self.delivered += 1;
            }
            ItemOutcome::Disabled => {
                self.findings += 1;
                self.disabled += 1;
            }
            ItemOutcome::DispatchFailed => {
                self.findings += 1;
                self.dispatch_failed += 1;
            }
            ItemOutcome::Cancelled => {
                self.findings += 1;
                self.cancelled = true;
            }
            ItemOutcome::Unreadable => self.unreadable += 1,
            ItemOutcome::StreamFailed => self.failed = true,
        }
    }
}

/// Returns the scheduler to `Idle` if a cycle ends without doing so
struct CycleGuard<'a>(&'a watch::Sender<SchedulerState>);

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.0.send_if_modified(|state| {
            if *state == SchedulerState::Evaluating {
                *state = SchedulerState::Idle;
                true
            } else {
                false
            }
        });
    }
}

/// Drives evaluation cycles
pub struct EvaluationScheduler {
    repository: CheckRepository,
    executor: QueryExecutor,
    dispatcher: RemediationDispatcher,
    config: SchedulerConfig,
    state: watch::Sender<SchedulerState>,
}

impl std::fmt::Debug for EvaluationScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvaluationScheduler")
            .field("repository", &self.repository)
            .field("executor", &self.executor)
            .field("dispatcher", &self.dispatcher)
            .field("config", &self.config)
            .field("state", &self.state())
            .finish()
    }
}

impl EvaluationScheduler {
    /// Assemble a scheduler from its parts
    #[must_use]
    pub fn new(
        repository: CheckRepository,
        executor: QueryExecutor,
        dispatcher: RemediationDispatcher,
        config: SchedulerConfig,
    ) -> Self {
        let (state, _) = watch::channel(SchedulerState::Idle);
        Self {
            repository,
            executor,
            dispatcher,
            config,
            state,
        }
    }

    /// Assemble a scheduler over `store` posting through HTTP
    ///
    /// # Errors
    /// `ConfigurationError` if the configuration is invalid
    pub fn from_config(config: &EngineConfig, store: Arc<dyn GraphStore>) -> Result<Self, EngineError> {
        config.validate()?;

        let repository = CheckRepository::new(
            Arc::clone(&store),
            config.checks_collection.clone(),
            config.store_timeout,
        );
        let executor = QueryExecutor::new(store, config.store_timeout)
            .with_max_findings(config.max_findings_per_check);
        let dispatcher = RemediationDispatcher::http(config.remediation_endpoint()?, config.dispatch_timeout)?
            .with_retry(config.retry_policy());

        Ok(Self::new(repository, executor, dispatcher, config.scheduler_config()))
    }

    /// Current lifecycle state
    #[must_use]
    pub fn state(&self) -> SchedulerState {
        *self.state.borrow()
    }

    /// Observe lifecycle changes
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SchedulerState> {
        self.state.subscribe()
    }

    /// Dispatcher in use
    #[inline]
    #[must_use]
    pub fn dispatcher(&self) -> &RemediationDispatcher {
        &self.dispatcher
    }

    fn transition(&self, to: SchedulerState) -> Result<(), EngineError> {
        let mut result = Ok(());
        self.state.send_if_modified(|current| match validate_transition(*current, to) {
            Ok(()) => {
                *current = to;
                true
            }
            Err(e) => {
                result = Err(e);
                false
            }
        });
        result
    }

    /// Run cycles until `cancel` fires
    ///
    /// # Errors
    /// `IllegalTransition` if the scheduler was already stopped
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), EngineError> {
        tracing::info!(
            interval_secs = self.config.interval.as_secs_f64(),
            checks = self.repository.collection(),
            remediation = self.dispatcher.endpoint().map_or("disabled", reqwest::Url::as_str),
            "evaluation scheduler started"
        );

        loop {
            if cancel.is_cancelled() {
                break;
            }

            match self.run_cycle(&cancel).await {
                Ok(report) => log_heartbeat(&report),
                Err(EngineError::Cancelled) => break,
                Err(EngineError::IllegalTransition { from, to }) => {
                    return Err(EngineError::IllegalTransition { from, to });
                }
                Err(e) => {
                    tracing::error!(error = %e, retryable = e.is_retryable(), "evaluation cycle skipped");
                }
            }

            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(self.config.interval) => {}
            }
        }

        self.transition(SchedulerState::Stopped)?;
        tracing::info!("evaluation scheduler stopped");
        Ok(())
    }

    /// Run a single cycle now
    ///
    /// # Errors
    /// - `StoreUnavailable` if the checks could not be loaded
    /// - `Cancelled` if `cancel` fired while loading them
    /// - `IllegalTransition` if a cycle is already running or the
    ///   scheduler is stopped
    pub async fn run_cycle(&self, cancel: &CancellationToken) -> Result<CycleReport, EngineError> {
        self.transition(SchedulerState::Evaluating)?;
        let _guard = CycleGuard(&self.state);
        let started = Instant::now();
        metrics::counter!(telemetry::CYCLES_TOTAL).increment(1);

        let mut report = CycleReport::begin();
        let checks = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(EngineError::Cancelled),
            checks = self.repository.list_checks() => checks?,
        };
        report.checks = checks.len();

        for check in &checks {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }
            let tally = self.evaluate_check(check, cancel).await;
            report.absorb(&tally);
        }

        let elapsed = started.elapsed();
        report.duration_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        metrics::histogram!(telemetry::CYCLE_DURATION_SECONDS).record(elapsed.as_secs_f64());
        Ok(report)
    }

    #[tracing::instrument(level = "info", skip_all, fields(check = %check.key))]
    async fn evaluate_check(&self, check: &Check, cancel: &CancellationToken) -> CheckTally {
        tracing::info!(name = check.display_name(), "executing check");

        let stream = match self.executor.execute(check).await {
            Ok(stream) => stream,
            Err(e) => {
                tracing::warn!(error = %e, "check query failed; skipped for this cycle");
                metrics::counter!(telemetry::CHECK_FAILURES_TOTAL).increment(1);
                return CheckTally {
                    failed: true,
                    ..CheckTally::default()
                };
            }
        };

        let mut tally = stream
            .into_stream()
            .take_until(cancel.cancelled())
            .map(|item| self.process(item, cancel))
            .buffer_unordered(self.config.dispatch_concurrency.max(1))
            .fold(CheckTally::default(), |mut tally, outcome| async move {
                tally.record(outcome);
                tally
            })
            .await;

        if tally.failed {
            metrics::counter!(telemetry::CHECK_FAILURES_TOTAL).increment(1);
        }
        tally.cancelled |= cancel.is_cancelled();
        tally
    }

    async fn process(&self, item: Result<Finding, EngineError>, cancel: &CancellationToken) -> ItemOutcome {
        let finding = match item {
            Ok(finding) => finding,
            Err(e @ EngineError::FindingReadError { .. }) => {
                tracing::warn!(error = %e, "skipping unreadable finding");
                return ItemOutcome::Unreadable;
            }
            Err(e) => {
                tracing::warn!(error = %e, "result stream failed; remaining findings skipped");
                return ItemOutcome::StreamFailed;
            }
        };

        let resource = finding.resource_id().unwrap_or("<unknown>");
        tracing::info!(
            name = finding.check_name(),
            resource,
            message = finding.message().unwrap_or_default(),
            "finding"
        );
        metrics::counter!(telemetry::FINDINGS_TOTAL).increment(1);

        match self.dispatcher.dispatch(&finding, cancel).await {
            Ok(RemediationOutcome::Delivered { status, body, attempts }) => {
                tracing::info!(resource, status, response = %body, attempts, "remediation dispatched");
                metrics::counter!(telemetry::DISPATCH_TOTAL, "outcome" => "delivered").increment(1);
                ItemOutcome::Delivered
            }
            Ok(RemediationOutcome::Disabled) => {
                metrics::counter!(telemetry::DISPATCH_TOTAL, "outcome" => "disabled").increment(1);
                ItemOutcome::Disabled
            }
            Err(EngineError::Cancelled) => ItemOutcome::Cancelled,
            Err(e) => {
                tracing::error!(resource, error = %e, "remediation dispatch failed");
                metrics::counter!(telemetry::DISPATCH_TOTAL, "outcome" => "failed").increment(1);
                ItemOutcome::DispatchFailed
            }
        }
    }

    /// Run the loop on a background task
    #[must_use]
    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> SchedulerHandle {
        let token = cancel.clone();
        let task = tokio::spawn(async move { self.run(token).await });
        SchedulerHandle { cancel, task }
    }
}

fn log_heartbeat(report: &CycleReport) {
    tracing::info!(
        cycle = %report.cycle_id,
        checks = report.checks,
        checks_failed = report.checks_failed,
        findings = report.findings,
        unreadable = report.findings_unreadable,
        dispatched = report.dispatched,
        dispatch_failed = report.dispatch_failed,
        disabled = report.dispatch_disabled,
        duration_ms = report.duration_ms,
        "evaluation cycle complete"
    );
}

/// Handle to a scheduler running on a background task
#[derive(Debug)]
pub struct SchedulerHandle {
    cancel: CancellationToken,
    task: JoinHandle<Result<(), EngineError>>,
}

impl SchedulerHandle {
    /// Token that stops the loop when cancelled
    #[inline]
    #[must_use]
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Request shutdown and wait for the loop to finish
    ///
    /// # Errors
    /// Whatever the loop returned
    pub async fn stop(self) -> Result<(), EngineError> {
        self.cancel.cancel();
        self.join().await
    }

    /// Wait for the loop to finish on its own token
    ///
    /// # Errors
    /// Whatever the loop returned
    pub async fn join(self) -> Result<(), EngineError> {
        match self.task.await {
            Ok(result) => result,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(_) => Err(EngineError::Cancelled),
        }
    }
}
