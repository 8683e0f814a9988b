use std::sync::Arc;

use analysis_worker::chess_com::ChessComClient;
use analysis_worker::jobs::JobController;
use analysis_worker::progress::ProgressRegistry;
use analysis_worker::stockfish::StockfishLauncher;
use analysis_worker::store::{PgStore, Store};
use axum::{routing::{get, post}, Extension, Router};
use server::config;
use server::db;
use server::routes;
use tower_http::cors::{Any, CorsLayer};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = config::Config::from_env()?;

    tracing::info!("Connecting to database...");
    let pool = db::pool::create_pool(&config.worker.database_url).await?;

    tracing::info!("Running migrations...");
    db::pool::run_migrations(&pool).await?;

    // No job survives a restart, so nothing can still hold a claim
    let store = PgStore::new(pool);
    let released = store.release_stale_claims().await?;
    if released > 0 {
        tracing::warn!(released, "Released games left in analysis by a previous run");
    }

    let retention = config.worker.progress_retention();
    let registry = Arc::new(ProgressRegistry::new(retention));
    registry.spawn_reaper(retention.max(std::time::Duration::from_secs(1)));

    let controller: routes::Controller = JobController::new(
        Arc::new(store),
        Arc::new(StockfishLauncher::new(config.worker.engine_options())),
        Arc::new(ChessComClient::new(&config.worker.archive_base_url)?),
        registry,
        config.worker.job_settings(),
    );
    tracing::info!(
        stockfish = %config.worker.stockfish_path,
        depth = config.worker.analysis_depth,
        "Analysis engine configured"
    );

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        // Health
        .route("/health", get(routes::health::health_check))
        // Jobs
        .route("/api/players/{player}/sync", post(routes::jobs::start_sync))
        .route("/api/players/{player}/analyze", post(routes::jobs::analyze_pending))
        .route(
            "/api/players/{player}/games/{game_id}/analyze",
            post(routes::jobs::analyze_game),
        )
        .route("/api/players/{player}/jobs", get(routes::jobs::active_jobs))
        .route("/api/players/{player}/jobs/{job_id}", get(routes::jobs::job_status))
        .route(
            "/api/players/{player}/jobs/{job_id}/events",
            get(routes::jobs::job_events),
        )
        // Games
        .route("/api/players/{player}/games", get(routes::games::list_games))
        .route("/api/players/{player}/sync-status", get(routes::games::sync_status))
        .route("/api/games/{game_id}", get(routes::games::get_game))
        .route("/api/games/{game_id}/moves", get(routes::games::get_game_moves))
        // Training
        .route(
            "/api/players/{player}/training/sessions",
            post(routes::training::start_session),
        )
        .route(
            "/api/players/{player}/training/positions",
            get(routes::training::list_positions),
        )
        .route("/api/players/{player}/training/next", get(routes::training::next_position))
        .route("/api/training/positions/{position_id}", get(routes::training::get_position))
        .route(
            "/api/training/positions/{position_id}/attempts",
            get(routes::training::list_attempts),
        )
        .route("/api/training/sessions/{session_id}", get(routes::training::get_session))
        .route("/api/training/attempts", post(routes::training::submit_attempt))
        // Shared state
        .layer(Extension(controller))
        .layer(cors);

    let addr = config.bind_addr();
    tracing::info!("Starting server on {addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
