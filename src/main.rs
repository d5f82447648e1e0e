// src/main.rs
use actix_web::{middleware, web, App, HttpServer};
use std::sync::Arc;
use tracing::{error, info};

use charon_charging_engine::api::routes;
use charon_charging_engine::balancer::RaterPool;
use charon_charging_engine::config::Config;
use charon_charging_engine::engine::StatsEngine;
use charon_charging_engine::rater::{JsonRpcRater, Rater};
use charon_charging_engine::rounding;
use charon_charging_engine::rpc::RpcServer;
use charon_charging_engine::services::CdrServer;
use charon_charging_engine::sessions::{SessionManager, SwitchListener};
use charon_charging_engine::storage::{CdrStorage, DataDb, MemoryCdrStorage, MemoryDataDb};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .json()
        .init();

    info!("🚀 Starting Charon charging engine");

    let config = Config::from_env().expect("Failed to load configuration");
    info!("Environment: {}", config.environment);
    rounding::set_rounding_decimals(config.rounding_decimals);

    // Storage initialization failure at startup is fatal.
    let data_db: Arc<dyn DataDb> = Arc::new(MemoryDataDb::new());
    data_db.init().await.expect("Failed to initialize data plane");
    let storage: Arc<dyn CdrStorage> = Arc::new(MemoryCdrStorage::new());
    info!("✅ Storage initialized");

    let stats = Arc::new(StatsEngine::new(config.default_queue_length));

    let pool = Arc::new(RaterPool::new());
    for url in &config.rater_urls {
        match JsonRpcRater::new(url, config.rater_timeout_ms) {
            Ok(client) => pool.add_client(url, Arc::new(client)),
            Err(e) => error!("Skipping rater {}: {}", url, e),
        }
    }
    info!("✅ Rater pool ready with {} back-ends", pool.len());
    let rater: Arc<dyn Rater> = pool;

    let cdr_server = Arc::new(CdrServer::new(
        storage.clone(),
        stats.clone(),
        Vec::new(),
        config.cdr_replication_url.clone(),
    ));

    let session_manager = SessionManager::new(
        rater,
        Some(cdr_server.clone()),
        storage.clone(),
        config.debit_interval,
    );

    let switch_listener = SwitchListener::new(session_manager.clone());
    let switch_addr = config.switch_listen.clone();
    tokio::spawn(async move {
        if let Err(e) = switch_listener.start(&switch_addr).await {
            error!("Switch listener error: {}", e);
        }
    });

    let rpc_server = Arc::new(RpcServer::new(
        stats.clone(),
        cdr_server.clone(),
        storage.clone(),
        data_db.clone(),
    ));
    let rpc_addr = config.rpc_listen.clone();
    tokio::spawn(async move {
        if let Err(e) = rpc_server.start(&rpc_addr).await {
            error!("RPC server error: {}", e);
        }
    });

    let bind_address = format!("{}:{}", config.http_host, config.http_port);
    info!("🌐 Starting HTTP server on {}", bind_address);

    let http_cdr_server = cdr_server.clone();
    HttpServer::new(move || {
        App::new()
            .wrap(middleware::Logger::default())
            .wrap(tracing_actix_web::TracingLogger::default())
            .app_data(web::Data::new(http_cdr_server.clone()))
            .configure(routes::configure)
    })
    .bind(&bind_address)?
    .run()
    .await?;

    session_manager.shutdown().await;
    Ok(())
}
