//! Analysis worker CLI
//!
//! Runs a sync and analysis pass for one player, or analyses a single
//! stored game, against the configured Postgres database and Stockfish.
//!
//!   analysis-worker --player NAME [--full] [--months N]
//!   analysis-worker --game ID [--force]
//!   analysis-worker --release-stale

use std::sync::Arc;

use anyhow::{bail, Context};
use tracing::{info, warn};

use analysis_worker::analyzer::{self, AnalysisOutcome};
use analysis_worker::chess_com::ChessComClient;
use analysis_worker::config::WorkerConfig;
use analysis_worker::engine::{EngineAdapter, EngineLauncher};
use analysis_worker::progress::JobReporter;
use analysis_worker::stockfish::StockfishLauncher;
use analysis_worker::store::{self, PgStore, Store};
use analysis_worker::sync::{self, SyncOptions};

enum Command {
    Player {
        name: String,
        options: SyncOptions,
    },
    Game {
        id: i64,
        force: bool,
    },
    /// Reset games left `analyzing` by a process that died mid-job
    ReleaseStale,
}

/// Value following `flag` on the command line, if present.
fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .map(String::as_str)
}

fn parse_args(args: &[String]) -> anyhow::Result<Command> {
    let has = |flag: &str| args.iter().any(|a| a == flag);

    if let Some(name) = flag_value(args, "--player") {
        let months_limit = match flag_value(args, "--months") {
            Some(m) => Some(m.parse().with_context(|| format!("invalid --months {m}"))?),
            None => None,
        };
        return Ok(Command::Player {
            name: name.to_string(),
            options: SyncOptions {
                force_full: has("--full"),
                months_limit,
            },
        });
    }

    if let Some(id) = flag_value(args, "--game") {
        return Ok(Command::Game {
            id: id.parse().with_context(|| format!("invalid --game {id}"))?,
            force: has("--force"),
        });
    }

    if has("--release-stale") {
        return Ok(Command::ReleaseStale);
    }

    bail!(
        "usage: analysis-worker --player NAME [--full] [--months N] | --game ID [--force] \
         | --release-stale"
    )
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    // Load .env file for local dev
    let _ = dotenvy::dotenv();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = parse_args(&args)?;

    let config = WorkerConfig::load()?;
    info!(
        stockfish_path = %config.stockfish_path,
        depth = config.analysis_depth,
        "Worker config loaded"
    );

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(2)
        .connect(&config.database_url)
        .await?;
    store::postgres::run_migrations(&pool).await?;
    let store = PgStore::new(pool);

    let launcher = Arc::new(StockfishLauncher::new(config.engine_options()));
    let settings = config.analysis_settings();

    match command {
        Command::ReleaseStale => {
            let released = store.release_stale_claims().await?;
            if released > 0 {
                warn!(released, "Released games left in analysis");
            }
            println!("Released {released} games");
        }
        Command::Player { name, options } => {
            let mut reporter = JobReporter::detached(&name);
            let source = ChessComClient::new(&config.archive_base_url)?;
            let report = sync::sync_player(&store, &source, &name, &options, &mut reporter).await?;
            println!(
                "Sync: {} archives, {} fetched, {} new games",
                report.archives_scanned,
                report.fetched,
                report.new_games.len()
            );
            if let Some(reason) = &report.interrupted {
                println!("Sync interrupted: {reason}");
            }

            let pending = store.pending_games(&name).await?;
            if pending.is_empty() {
                println!("Nothing to analyze");
                return Ok(());
            }

            let mut adapter = EngineAdapter::new(launcher.launch().await?);
            let result = analyzer::analyze_batch(
                &store,
                &mut adapter,
                &settings,
                &pending,
                false,
                &mut reporter,
            )
            .await;
            adapter.quit().await;
            let batch = result?;

            println!("\n{}", "=".repeat(60));
            println!(
                "Analyzed {} games ({} unparsable, {} failed, {} skipped)",
                batch.analyzed, batch.unparsable, batch.failed, batch.skipped
            );
            println!(
                "{} errors found, {} training positions",
                batch.errors, batch.training_positions
            );
        }
        Command::Game { id, force } => {
            let game = store
                .get_game(id)
                .await?
                .with_context(|| format!("game {id} not found"))?;
            let mut reporter = JobReporter::detached(&game.info.player);

            let mut adapter = EngineAdapter::new(launcher.launch().await?);
            let result =
                analyzer::analyze_game(&store, &mut adapter, &settings, id, force, &mut reporter)
                    .await;
            adapter.quit().await;

            match result? {
                AnalysisOutcome::Analyzed {
                    summary,
                    training_positions,
                    ..
                } => {
                    println!(
                        "Game {id}: {} plies, accuracy {:.1}, \
                         {} inaccuracies, {} mistakes, {} blunders",
                        summary.plies_analyzed,
                        summary.average_accuracy,
                        summary.inaccuracies,
                        summary.mistakes,
                        summary.blunders
                    );
                    println!("{training_positions} training positions");
                }
                AnalysisOutcome::Unparsable { reason, .. } => {
                    println!("Game {id}: unparsable ({reason})")
                }
                AnalysisOutcome::Failed { summary, .. } => println!(
                    "Game {id}: failed, {} plies skipped",
                    summary.plies_skipped
                ),
                AnalysisOutcome::Skipped { reason, .. } => {
                    println!("Game {id}: skipped ({reason:?}), use --force to re-analyze")
                }
            }
        }
    }

    Ok(())
}
