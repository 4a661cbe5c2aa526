// Vectorgate server entry point: loads configuration, wires every
// subsystem together, and runs the axum listener until shutdown.

use std::sync::Arc;
use tracing::{error, info};
use vectorgate::admin::{build_admin_router, AdminState};
use vectorgate::common::Component;
use vectorgate::config::Config;
use vectorgate::events::EventBus;
use vectorgate::governor::ConcurrencyGovernor;
use vectorgate::health::HealthMonitor;
use vectorgate::ledger::TransactionLedger;
use vectorgate::mapping::MappingRegistry;
use vectorgate::metrics::Metrics;
use vectorgate::reconcile::ReconciliationWorkers;
use vectorgate::router::{build_router, AppState};
use vectorgate::store::StoreGateway;
use vectorgate::upstream::UpstreamClient;
use vectorgate::wal::WalEngine;
use vectorgate::{Result, VERSION};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_target(false)
        .init();

    print_banner();

    let config = Config::load()?;
    info!(version = VERSION, "loaded configuration");

    let store = Arc::new(StoreGateway::connect(&config.store).await?);
    store.migrate().await?;
    info!("metadata store migrations applied");

    let upstream = Arc::new(UpstreamClient::new(
        config.instances.primary_url.clone(),
        config.instances.replica_url.clone(),
        config.routing.request_timeout,
    )?);

    let events = EventBus::new();
    let health = Arc::new(HealthMonitor::new(config.health.clone(), Arc::clone(&upstream), events.clone()));
    let mapping = Arc::new(MappingRegistry::new(Arc::clone(&store), Arc::clone(&upstream)));
    let wal = Arc::new(WalEngine::new(
        Arc::clone(&store),
        Arc::clone(&upstream),
        Arc::clone(&mapping),
        config.wal.clone(),
        config.memory.clone(),
    ));
    let ledger = Arc::new(TransactionLedger::new(Arc::clone(&store), config.ledger.clone()));
    let governor = Arc::new(ConcurrencyGovernor::new(&config.concurrency));
    let metrics = Arc::new(Metrics::new(Arc::clone(&store)));

    health.start().await?;
    info!("health monitor started");

    let reconciliation = ReconciliationWorkers::new(
        Arc::clone(&store),
        Arc::clone(&wal),
        Arc::clone(&ledger),
        Arc::clone(&health),
        Arc::clone(&upstream),
        Arc::clone(&mapping),
        Arc::clone(&metrics),
        events.clone(),
        config.wal.clone(),
        config.ledger.clone(),
    );
    reconciliation.start().await?;
    info!("reconciliation workers started");

    let app_state = Arc::new(AppState {
        upstream: Arc::clone(&upstream),
        mapping: Arc::clone(&mapping),
        health: Arc::clone(&health),
        wal: Arc::clone(&wal),
        ledger: Arc::clone(&ledger),
        governor: Arc::clone(&governor),
        metrics: Arc::clone(&metrics),
        read_preference_ratio: config.routing.read_preference_ratio,
    });

    let admin_state = Arc::new(AdminState {
        store: Arc::clone(&store),
        mapping: Arc::clone(&mapping),
        health: Arc::clone(&health),
        metrics: Arc::clone(&metrics),
    });

    let router = build_router(app_state, config.routing.request_timeout)
        .merge(build_admin_router(admin_state));

    let listener = tokio::net::TcpListener::bind(&config.listen_address)
        .await
        .map_err(vectorgate::EngineError::Io)?;

    println!();
    println!("╭──────────────────────────────────────────────────────╮");
    println!("│  vectorgate is ready                                  │");
    println!("│  Listening on:  {:<38} │", config.listen_address);
    println!("│  Primary:       {:<38} │", config.instances.primary_url);
    println!("│  Replica:       {:<38} │", config.instances.replica_url);
    println!("╰──────────────────────────────────────────────────────╯");
    println!();

    let result = axum::serve(listener, router).await;

    if let Err(e) = result {
        error!(error = %e, "server stopped with error");
    } else {
        info!("server stopped gracefully");
    }

    health.stop().await?;
    reconciliation.stop().await?;

    Ok(())
}

fn print_banner() {
    println!("╔════════════════════════════════════════════════════════╗");
    println!("║  vectorgate — vector-database HA coordination engine    ║");
    println!("║  v{:<54}║", VERSION);
    println!("╚════════════════════════════════════════════════════════╝");
}
