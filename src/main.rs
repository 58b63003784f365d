use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use sqlx::migrate::Migrator;
use sqlx::postgres::PgPoolOptions;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wallet_core::adapters::{PostgresAccountRepository, PostgresTransactionRepository};
use wallet_core::config::Config;
use wallet_core::messaging::RabbitBroker;
use wallet_core::ports::{AccountRepository, BrokerPort, TransactionRepository};
use wallet_core::use_cases::CreateTopUp;
use wallet_core::worker::TopUpWorker;
use wallet_core::{create_app, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;

    // Setup logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Database pool
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await
        .context("failed to connect to database")?;

    // Run migrations
    let migrator = Migrator::new(Path::new("./migrations")).await?;
    migrator.run(&pool).await?;
    tracing::info!("Database migrations completed");

    // Broker: one explicitly owned connection shared by initiator and worker
    let broker = Arc::new(RabbitBroker::new(
        config.broker_url.clone(),
        config.topology(),
    ));
    broker.connect().await.context("failed to connect broker")?;
    broker
        .declare_topology()
        .await
        .context("failed to declare broker topology")?;

    let accounts: Arc<dyn AccountRepository> =
        Arc::new(PostgresAccountRepository::new(pool.clone()));
    let transactions: Arc<dyn TransactionRepository> =
        Arc::new(PostgresTransactionRepository::new(pool.clone()));

    let create_topup = Arc::new(CreateTopUp::new(
        accounts.clone(),
        transactions.clone(),
        broker.clone(),
        config.topup_routing_key.clone(),
    ));

    // Worker task
    let worker = TopUpWorker::new(
        broker.clone(),
        transactions.clone(),
        accounts.clone(),
        config.topup_queue.clone(),
    );
    let shutdown = CancellationToken::new();
    let worker_token = shutdown.clone();
    let worker_handle = tokio::spawn(async move { worker.run(worker_token).await });

    // HTTP shell
    let app = create_app(AppState { create_topup });
    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    tracing::info!("listening on {}", addr);

    let listener = TcpListener::bind(addr).await?;
    let signal_token = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
            signal_token.cancel();
        })
        .await?;

    // Drain the worker, then release the broker connection.
    shutdown.cancel();
    match worker_handle.await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => tracing::error!(%err, "worker exited with error"),
        Err(err) => tracing::error!(%err, "worker task panicked"),
    }
    if let Err(err) = broker.close().await {
        tracing::warn!(%err, "broker close failed");
    }

    tracing::info!("stopped");
    Ok(())
}
