use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use editorial_core::SystemClock;
use editorial_server::config::Config;
use editorial_server::http::{router, AppState};
use editorial_server::notify::{JsonlOutbox, QueuedNotifier};
use editorial_server::scheduler::SweepScheduler;
use editorial_server::signed_link::LinkSigner;
use editorial_server::storage::LocalFileStorage;
use editorial_server::sweep::{SweepJob, Sweeper};
use editorial_server::workflow::{SqliteRepository, WorkflowService};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!(
        "Starting editorial server ({})",
        editorial_core::get_service_version()
    );

    let config = Config::from_env().context("Failed to load configuration")?;

    let db_path = config.state_dir.join("editorial-state.db");
    info!("Using state database: {}", db_path.display());
    let repo = Arc::new(SqliteRepository::new(&db_path).context("Failed to open database")?);

    info!("Storing files under {}", config.file_storage_dir.display());
    let storage = Arc::new(LocalFileStorage::new(config.file_storage_dir.clone()));

    info!("Writing notifications to {}", config.outbox_path.display());
    let notifier = Arc::new(QueuedNotifier::with_capacity(
        Arc::new(JsonlOutbox::new(config.outbox_path.clone())),
        config.notifications_per_minute,
        config.notification_queue_capacity,
    ));

    let signer = LinkSigner::new(
        config.signed_link_secret.as_bytes(),
        config.public_base_url.clone(),
        chrono::Duration::days(i64::from(config.signed_link_ttl_days)),
    )
    .context("Failed to set up invitation link signing")?;
    let clock = Arc::new(SystemClock);

    let service = Arc::new(WorkflowService::new(
        repo.clone(),
        repo.clone(),
        storage.clone(),
        notifier,
        signer,
        clock.clone(),
    ));

    let sweeper = Sweeper::new(
        repo,
        storage,
        service.interpreter().clone(),
        clock,
        config.sweeps,
    );
    let scheduler = Arc::new(SweepScheduler::new(sweeper));

    let sweep_every = Duration::from_secs(config.sweep_interval_secs);
    scheduler.spawn_periodic(SweepJob::Reinvite, sweep_every);
    scheduler.spawn_periodic(SweepJob::Remind, sweep_every);
    scheduler.spawn_periodic(
        SweepJob::Retention,
        Duration::from_secs(config.retention_interval_secs),
    );

    if config.admin_auth_token.is_none() {
        info!("ADMIN_AUTH_TOKEN not set; admin routes are disabled");
    }

    let app = router(Arc::new(AppState {
        service,
        scheduler,
        admin_auth_token: config.admin_auth_token,
    }));

    let listener = TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?;
    info!("Server listening on port {}", config.port);

    axum::serve(listener, app).await?;

    Ok(())
}
