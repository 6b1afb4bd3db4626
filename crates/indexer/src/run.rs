use {
    crate::{arguments::Arguments, ingestion::Ingestor, intake, notifier::Notifier},
    anyhow::Context,
    observe::metrics::LivenessChecking,
    std::sync::Arc,
    tokio::sync::{mpsc, watch},
};

/// The sidecar has no run-loop cadence of its own; as long as the process is
/// up it is considered live. Progress is visible through the ingestion
/// metrics instead.
struct Liveness;

#[async_trait::async_trait]
impl LivenessChecking for Liveness {
    async fn is_alive(&self) -> bool {
        true
    }
}

pub async fn run(args: Arguments) -> anyhow::Result<()> {
    let pool = database::connect(args.postgres())
        .await
        .context("connect database")?;

    if args.purge_database {
        anyhow::ensure!(
            args.node_env.allows_destructive_migrations(),
            "--purge-database is refused with NODE_ENV=production"
        );
        tracing::warn!("reverting all migrations, dropping indexed chain data");
        database::migrations::undo_all(&pool)
            .await
            .context("revert migrations")?;
    }
    database::migrations::run(&pool).await.context("run migrations")?;

    let notifier = Arc::new(Notifier::default());
    let (message_sender, message_receiver) = mpsc::channel(args.ingestion_queue_size);
    let (shutdown_sender, shutdown_receiver) = watch::channel(false);

    let ingestor = Ingestor::new(pool.clone(), notifier.clone(), args.network);
    let mut ingestion = tokio::spawn(ingestor.run(message_receiver, shutdown_receiver));
    let intake = tokio::spawn(intake::listen(args.event_listen_address, message_sender));
    let metrics = tokio::spawn(observe::metrics::serve(
        Arc::new(Liveness),
        args.metrics_address,
    ));

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
        }
        result = &mut ingestion => {
            result.context("ingestion task panicked")?;
            anyhow::bail!("ingestion stopped unexpectedly");
        }
    }

    // Stop taking input, let the in-flight batch finish, then tear down. The
    // notifier drains implicitly: the last notification round completes
    // before the ingestion task returns, and dropping the notifier closes
    // all subscriber channels.
    intake.abort();
    let _ = shutdown_sender.send(true);
    ingestion.await.context("ingestion shutdown")?;
    metrics.abort();
    drop(notifier);
    pool.close().await;
    tracing::info!("shutdown complete");
    Ok(())
}
