use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use mailcast_core::MailcastConfig;
use mailcast_scheduler::{PoolConfig, SchedulerEngine, WorkerPool};
use mailcast_store::{DeliveryStore, SqliteStore};
use tracing::{info, warn};

mod app;
mod http;

/// Scheduled bulk-mail service: HTTP API, scheduler loop and delivery workers.
#[derive(Debug, Parser)]
#[command(name = "mailcast-gateway", version)]
struct Args {
    /// Config file (default: ~/.mailcast/mailcast.toml).
    #[arg(long, env = "MAILCAST_CONFIG")]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "mailcast_gateway=info,mailcast_scheduler=info,tower_http=debug".into()
            }),
        )
        .init();

    let args = Args::parse();
    let config = MailcastConfig::load(args.config.as_deref()).unwrap_or_else(|e| {
        warn!("Config load failed ({}), using defaults", e);
        MailcastConfig::default()
    });

    let db_path = config.database.path.clone();
    ensure_parent_dir(&db_path);
    info!(path = %db_path, "opening SQLite database");
    let store = Arc::new(SqliteStore::open(&db_path)?);
    let delivery: Arc<dyn DeliveryStore> = store.clone();

    let mailer = mailcast_mailer::build_mailer(config.smtp.as_ref())?;
    let pool = WorkerPool::start(
        PoolConfig::from(&config.workers),
        Arc::clone(&delivery),
        mailer,
    );

    let engine = SchedulerEngine::new(delivery, pool.queue(), &config.scheduler);
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let engine_task = tokio::spawn(engine.run(shutdown_rx));

    let addr: SocketAddr = format!("{}:{}", config.gateway.bind, config.gateway.port).parse()?;
    let state = Arc::new(app::AppState::new(config, store));
    let router = app::build_router(state);

    info!("Mailcast gateway listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Stop claiming, let in-flight jobs finish, then drain the workers.
    let _ = shutdown_tx.send(true);
    if let Err(e) = engine_task.await {
        warn!("scheduler task ended abnormally: {e}");
    }
    pool.shutdown().await;
    info!("Mailcast gateway stopped");
    Ok(())
}

/// Resolves on Ctrl-C, or on SIGTERM where the platform has it.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("failed to listen for ctrl-c: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(sigterm) => terminated(sigterm).await,
            Err(e) => {
                warn!("failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("ctrl-c received, shutting down"),
        _ = terminate => info!("SIGTERM received, shutting down"),
    }
}

#[cfg(unix)]
async fn terminated(mut sigterm: tokio::signal::unix::Signal) {
    sigterm.recv().await;
}

fn ensure_parent_dir(path: &str) {
    if let Some(parent) = std::path::Path::new(path).parent() {
        let _ = std::fs::create_dir_all(parent);
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::signal::unix::{signal, SignalKind};

    #[tokio::test]
    async fn sigterm_resolves_the_shutdown_wait() {
        let sigterm = signal(SignalKind::terminate()).unwrap();
        let status = std::process::Command::new("kill")
            .args(["-TERM", &std::process::id().to_string()])
            .status()
            .unwrap();
        assert!(status.success());

        tokio::time::timeout(Duration::from_secs(5), terminated(sigterm))
            .await
            .expect("SIGTERM should end the wait");
    }

    #[test]
    fn parent_dir_is_created() {
        let root = std::env::temp_dir().join(format!("mailcast-{}", std::process::id()));
        let db = root.join("nested").join("mailcast.db");
        ensure_parent_dir(db.to_str().unwrap());
        assert!(root.join("nested").is_dir());
        let _ = std::fs::remove_dir_all(root);
    }
}
