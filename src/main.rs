use actix_web::{App, HttpServer, web};
use log::{error, info};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use aether::api;
use aether::app_state::AppState;
use aether::config::AppConfig;
use aether::logging::init_logging;
use aether::service::deletion_worker::DeletionWorker;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    let config = AppConfig::load().map_err(std::io::Error::other)?;
    init_logging(&config.logging).map_err(std::io::Error::other)?;

    let state = AppState::from_config(config).map_err(|e| {
        error!("Failed to initialize application state: {}", e);
        std::io::Error::other(e)
    })?;

    let shutdown = CancellationToken::new();
    let worker = if state.config.deletion.enabled {
        let worker = DeletionWorker::new(Arc::clone(&state.stripe_service), &state.config.deletion);
        Some(worker.start_background(shutdown.clone()))
    } else {
        info!("Deletion worker disabled");
        None
    };

    let server_config = state.config.server.clone();
    info!("Starting server on {}:{}", server_config.host, server_config.port);

    let data = web::Data::new(state);
    let result = HttpServer::new(move || {
        App::new()
            .wrap(actix_web::middleware::Logger::default())
            .app_data(data.clone())
            .configure(api::configure)
    })
    .workers(server_config.workers)
    .bind((server_config.host.as_str(), server_config.port))?
    .run()
    .await;

    shutdown.cancel();
    if let Some(worker) = worker {
        if let Err(e) = worker.await {
            error!("Deletion worker panicked: {}", e);
        }
    }
    result
}
