use anyhow::Context;
use posture_engine::{init_tracing, CliOptions, EngineConfig, EvaluationScheduler};
use posture_graph::{default_checks, ArangoStore, GraphStore, Ingestor, Schema};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let options = CliOptions::parse()?;
    init_tracing(options.log_format)?;
    options.config.validate().context("invalid configuration")?;

    let config = &options.config;
    tracing::info!(version = posture_engine::VERSION, ?config, "starting posture engine");
    if config.remediation_endpoint()?.is_none() {
        tracing::warn!("REMEDIATION_SERVICE_URL is not set; findings will be logged but not dispatched");
    }

    let store: Arc<dyn GraphStore> =
        Arc::new(ArangoStore::new(config.arango_config()).context("graph store client")?);

    if options.seed_defaults {
        seed_defaults(Arc::clone(&store), config).await?;
    }

    let scheduler = Arc::new(EvaluationScheduler::from_config(config, store)?);
    let cancel = CancellationToken::new();
    tokio::spawn(shutdown_on_signal(cancel.clone()));

    if options.once {
        let report = scheduler.run_cycle(&cancel).await?;
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    scheduler.spawn(cancel).join().await?;
    Ok(())
}

async fn seed_defaults(store: Arc<dyn GraphStore>, config: &EngineConfig) -> anyhow::Result<()> {
    let schema = Schema::default().with_checks_collection(config.checks_collection.clone());
    let ingestor = Ingestor::with_schema(store, schema);

    ingestor.ensure_schema().await.context("creating collections")?;
    for check in default_checks(ingestor.schema()) {
        ingestor
            .upsert_check(&check)
            .await
            .with_context(|| format!("storing check '{}'", check.key))?;
    }
    Ok(())
}

async fn shutdown_on_signal(cancel: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = terminate.recv() => {}
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "SIGTERM handler unavailable; listening for ctrl-c only");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }

    tracing::info!("shutdown requested");
    cancel.cancel();
}
