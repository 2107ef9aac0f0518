use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sampler_api::config::ServerConfig;
use sampler_api::notifications::ProgressForwarder;
use sampler_api::router::build_app_router;
use sampler_api::state::AppState;
use sampler_api::ws;
use sampler_comfyui::generation::ComfyUIGenerationClient;
use sampler_events::EventBus;
use sampler_pipeline::publisher::ProgressPublisher;
use sampler_pipeline::runner::JobRunner;
use sampler_pipeline::service::JobService;
use sampler_pipeline::store::{PgSampleJobStore, SampleJobStore};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "sampler_api=debug,sampler_pipeline=debug,sampler_comfyui=info,tower_http=debug"
                    .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Both sqlx and the ComfyUI WebSocket use rustls; pin one provider.
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        tracing::debug!("rustls crypto provider already installed");
    }

    // --- Configuration ---
    let config = ServerConfig::from_env();
    tracing::info!(
        host = %config.host,
        port = %config.port,
        comfyui_url = %config.sampler.comfyui_url,
        checkpoint_dir = %config.sampler.checkpoint_dir.display(),
        output_dir = %config.sampler.output_dir.display(),
        "Loaded server configuration",
    );

    // --- Database ---
    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");

    let pool = sampler_db::create_pool(&database_url)
        .await
        .expect("Failed to connect to database");
    tracing::info!("Database connection pool created");

    sampler_db::health_check(&pool)
        .await
        .expect("Database health check failed");

    sampler_db::run_migrations(&pool)
        .await
        .expect("Failed to run database migrations");
    tracing::info!("Database migrations applied");

    // --- WebSocket manager ---
    let ws_manager = Arc::new(ws::WsManager::new());
    let heartbeat_handle = ws::start_heartbeat(Arc::clone(&ws_manager));

    // --- Event bus ---
    let event_bus = Arc::new(EventBus::default());
    let forwarder = ProgressForwarder::new(Arc::clone(&ws_manager));
    let forwarder_handle = tokio::spawn(forwarder.run(event_bus.subscribe()));

    // --- ComfyUI client ---
    let comfyui = ComfyUIGenerationClient::start(config.sampler.comfyui_config());
    tracing::info!("ComfyUI client started");

    // --- Sample job engine ---
    let store: Arc<dyn SampleJobStore> = Arc::new(PgSampleJobStore::new(pool.clone()));
    let publisher = ProgressPublisher::new(Arc::clone(&event_bus));
    let runner = Arc::new(JobRunner::new(
        Arc::clone(&store),
        comfyui.clone(),
        publisher.clone(),
        config.sampler.runner_config(),
    ));
    let jobs = Arc::new(JobService::new(
        store,
        comfyui.clone(),
        Arc::clone(&runner),
        publisher,
        config.sampler.service_config(),
    ));

    match jobs.log_orphaned_runs().await {
        Ok(orphaned) if !orphaned.is_empty() => {
            tracing::warn!(count = orphaned.len(), "Found sample jobs left running");
        }
        Ok(_) => {}
        Err(e) => tracing::error!(error = %e, "Failed to check for orphaned sample jobs"),
    }

    // --- App state ---
    let state = AppState {
        pool,
        config: Arc::new(config.clone()),
        ws_manager: Arc::clone(&ws_manager),
        jobs,
        event_bus: Arc::clone(&event_bus),
    };

    let app = build_app_router(state, &config);

    // --- Start server ---
    let addr = SocketAddr::new(
        config.host.parse().expect("Invalid HOST address"),
        config.port,
    );
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, cleaning up");

    // Let the in-flight sample finish before dropping the engine connection.
    runner
        .shutdown(Duration::from_secs(config.shutdown_timeout_secs))
        .await;
    tracing::info!("Job runner stopped");

    comfyui.shutdown().await;
    tracing::info!("ComfyUI client shut down");

    // Dropping the last sender closes the bus and ends the forwarder.
    drop(runner);
    drop(event_bus);
    let _ = tokio::time::timeout(Duration::from_secs(5), forwarder_handle).await;

    let ws_count = ws_manager.connection_count().await;
    tracing::info!(ws_count, "Closing remaining WebSocket connections");
    ws_manager.shutdown_all().await;

    heartbeat_handle.abort();
    tracing::info!("Graceful shutdown complete");
}

/// Wait for SIGINT (Ctrl-C) or, on Unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
