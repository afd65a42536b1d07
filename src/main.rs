use checkout_reconciler::api::{self, AppState};
use checkout_reconciler::config::Config;
use checkout_reconciler::database::{self, PoolConfig, TransactionRepository, TransactionStore};
use checkout_reconciler::payments::providers::NowPaymentsProvider;
use checkout_reconciler::payments::PaymentProcessor;
use checkout_reconciler::PaymentStatusReconciler;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,checkout_reconciler=debug"));

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
    tracing::info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    init_tracing();

    let config = Config::from_env()?;

    tracing::info!("Starting checkout reconciler");
    tracing::info!("Environment: {}", config.server.environment);
    tracing::info!("NOWPayments API: {}", config.nowpayments.base_url);
    tracing::info!(
        "Poll interval: {:?}, success delay: {:?}",
        config.reconciler.poll_interval,
        config.reconciler.success_delay
    );

    let pool = database::init_pool(
        &config.database.url,
        Some(PoolConfig {
            max_connections: config.database.max_connections,
            ..Default::default()
        }),
    )
    .await?;

    let store: Arc<dyn TransactionStore> = Arc::new(TransactionRepository::new(pool));
    let processor: Arc<dyn PaymentProcessor> =
        Arc::new(NowPaymentsProvider::new(config.nowpayments.clone())?);
    let reconciler = PaymentStatusReconciler::new(store, processor, config.reconciler.clone());

    let app = api::router(AppState::new(
        config.server.environment.clone(),
        reconciler,
        config.server.session_retention,
    ));

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    tracing::info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}
