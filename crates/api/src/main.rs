//! API server entry point.

use std::sync::Arc;

use api::config::Config;
use api::{AppState, routes};
use ledger::{InMemoryLedger, Ledger, PostgresLedger};
use saga::{
    HttpInventoryGateway, InMemoryBus, InMemoryInventoryGateway, InventoryGateway,
    RandomPaymentGateway,
};
use sqlx::postgres::PgPoolOptions;
use tokio::signal;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

async fn connect_ledger(config: &Config) -> Arc<dyn Ledger> {
    let Some(url) = config.database_url.as_deref() else {
        tracing::warn!("DATABASE_URL not set, using in-memory ledger");
        return Arc::new(InMemoryLedger::new());
    };

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(url)
        .await
        .expect("failed to connect to PostgreSQL");
    let ledger = PostgresLedger::new(pool);
    ledger
        .run_migrations()
        .await
        .expect("failed to run ledger migrations");
    tracing::info!("connected to PostgreSQL ledger");
    Arc::new(ledger)
}

fn inventory_gateway(config: &Config) -> Arc<dyn InventoryGateway> {
    match config.transits_api.as_deref() {
        Some(url) => {
            tracing::info!(%url, "using remote transit inventory");
            Arc::new(HttpInventoryGateway::new(url).expect("failed to build inventory client"))
        }
        None => {
            tracing::warn!("TRANSITS_API not set, serving transits from memory");
            Arc::new(InMemoryInventoryGateway::new())
        }
    }
}

#[tokio::main]
async fn main() {
    let config = Config::from_env();

    // 1. Initialize tracing
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_str())),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // 2. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");
    routes::metrics::describe();

    // 3. Wire the saga participants to their backends
    let ledger = connect_ledger(&config).await;
    let inventory = inventory_gateway(&config);
    let payment = Arc::new(RandomPaymentGateway::new(config.payment_approval_rate));
    let state = Arc::new(AppState::new(ledger, InMemoryBus::new(), inventory, payment));

    // 4. Start delivering bus messages to the step handlers
    let (stop, mut stopped) = watch::channel(false);
    let choreography = tokio::spawn(Arc::clone(&state.choreography).run(
        state.bus.clone(),
        async move {
            let _ = stopped.wait_for(|stop| *stop).await;
        },
    ));

    // 5. Build the application
    let app = api::create_app(state, metrics_handle);

    // 6. Start server
    let addr = config.addr();
    tracing::info!(%addr, "starting API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            let _ = stop.send(true);
        })
        .await
        .expect("server error");

    if let Err(e) = choreography.await {
        tracing::error!(error = %e, "choreography task failed");
    }
    tracing::info!("server shut down gracefully");
}
