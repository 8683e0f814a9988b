//! Incremental game sync against a monthly archive source.

use std::future::Future;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::error::WorkerError;
use crate::progress::JobReporter;
use crate::store::{NewGame, Store, SyncCursor};

/// Archives scanned by an incremental sync when no limit is given.
pub const INCREMENTAL_ARCHIVES: usize = 3;

/// A game record as the archive delivers it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveGame {
    pub uuid: String,
    pub url: String,
    pub white: String,
    pub black: String,
    pub white_result: String,
    pub black_result: String,
    pub time_control: String,
    pub rated: bool,
    pub rules: String,
    /// Epoch seconds, missing on some older records
    pub start_time: Option<i64>,
    pub end_time: i64,
    pub pgn: String,
}

/// A source of monthly game archives for a player.
pub trait ArchiveSource: Send + Sync + 'static {
    /// Archive locators, oldest month first.
    fn list_archives(
        &self,
        player: &str,
    ) -> impl Future<Output = Result<Vec<String>, WorkerError>> + Send;

    fn fetch_archive(
        &self,
        archive: &str,
    ) -> impl Future<Output = Result<Vec<ArchiveGame>, WorkerError>> + Send;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncOptions {
    /// Rescan ignoring the cursor
    pub force_full: bool,
    /// Most recent monthly archives to scan
    pub months_limit: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SyncReport {
    pub player: String,
    pub full: bool,
    pub archives_scanned: usize,
    /// Games returned by the archive, before filtering
    pub fetched: usize,
    /// Ids of the games stored by this sync, oldest first
    pub new_games: Vec<i64>,
    /// Set when the sync stopped early; the cursor is then left alone
    pub interrupted: Option<String>,
}

/// Fetch a player's new games and store them.
///
/// Network and lookup failures do not surface as errors: the report comes
/// back with `interrupted` set, the games stored so far are kept and the
/// cursor is untouched so the next call covers the rest. Only storage
/// errors propagate.
pub async fn sync_player<S: Store, A: ArchiveSource>(
    store: &S,
    source: &A,
    player: &str,
    options: &SyncOptions,
    reporter: &mut JobReporter,
) -> Result<SyncReport, WorkerError> {
    let cursor = store.get_cursor(player).await?;
    let full = options.force_full || cursor.is_none();
    let mut report = SyncReport {
        player: player.to_string(),
        full,
        ..SyncReport::default()
    };

    reporter.sync_start().await;

    let archives = match source.list_archives(player).await {
        Ok(archives) => archives,
        Err(e @ WorkerError::Database(_)) => return Err(e),
        Err(e) => {
            warn!(player = %player, error = %e, "Archive listing failed");
            report.interrupted = Some(e.to_string());
            return Ok(report);
        }
    };

    let limit = options
        .months_limit
        .or((!full).then_some(INCREMENTAL_ARCHIVES));
    let selected = match limit {
        Some(n) if n < archives.len() => &archives[archives.len() - n..],
        _ => &archives[..],
    };

    let threshold = if full {
        None
    } else {
        cursor.as_ref().and_then(|c| c.last_game_end_time)
    };

    info!(
        player = %player,
        full,
        archives = selected.len(),
        available = archives.len(),
        "Syncing games"
    );

    let mut latest_end: Option<DateTime<Utc>> = None;
    let total = selected.len() as u32;

    for (i, archive) in selected.iter().enumerate() {
        let games = match source.fetch_archive(archive).await {
            Ok(games) => games,
            Err(e @ WorkerError::Database(_)) => return Err(e),
            Err(e) => {
                warn!(player = %player, archive = %archive, error = %e, "Archive fetch failed");
                report.interrupted = Some(e.to_string());
                break;
            }
        };
        report.archives_scanned += 1;
        report.fetched += games.len();

        let mut games: Vec<NewGame> = games
            .iter()
            .filter_map(|g| to_new_game(player, g))
            .filter(|g| threshold.map_or(true, |t| g.end_time > t))
            .collect();
        games.sort_by_key(|g| g.end_time);

        for game in &games {
            if let Some(id) = store.insert_game(game).await? {
                report.new_games.push(id);
                latest_end = latest_end.max(Some(game.end_time));
            }
        }

        reporter
            .sync_progress(i as u32 + 1, total, report.new_games.len())
            .await;
    }

    if report.interrupted.is_some() {
        return Ok(report);
    }

    let mut cursor = cursor.unwrap_or_else(|| SyncCursor::new(&player.to_lowercase()));
    cursor.sync_count += 1;
    cursor.last_sync_time = Some(Utc::now());
    if latest_end.is_some() {
        cursor.last_game_end_time = cursor.last_game_end_time.max(latest_end);
        cursor.total_games = store.count_games(player).await?;
    }
    store.save_cursor(&cursor).await?;

    info!(
        player = %player,
        new_games = report.new_games.len(),
        fetched = report.fetched,
        sync_count = cursor.sync_count,
        "Sync complete"
    );
    reporter.sync_complete(report.new_games.len()).await;

    Ok(report)
}

/// Declared result from the per-side result codes.
pub fn declared_result(white_result: &str, black_result: &str) -> String {
    if white_result == "win" {
        "white_win".to_string()
    } else if black_result == "win" {
        "black_win".to_string()
    } else {
        white_result.to_string()
    }
}

fn external_id(game: &ArchiveGame) -> Option<String> {
    let from_url = game
        .url
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|s| !s.is_empty());
    match from_url {
        Some(id) => Some(id.to_string()),
        None if !game.uuid.is_empty() => Some(game.uuid.clone()),
        None => None,
    }
}

/// Convert an archive record, skipping variants and records without moves.
fn to_new_game(player: &str, game: &ArchiveGame) -> Option<NewGame> {
    if game.rules != "chess" || game.pgn.trim().is_empty() {
        return None;
    }
    let end_time = DateTime::from_timestamp(game.end_time, 0)?;
    let start_time = game
        .start_time
        .filter(|t| *t > 0)
        .and_then(|t| DateTime::from_timestamp(t, 0))
        .unwrap_or(end_time);

    Some(NewGame {
        external_id: external_id(game)?,
        player: player.to_string(),
        white: game.white.clone(),
        black: game.black.clone(),
        white_result: game.white_result.clone(),
        black_result: game.black_result.clone(),
        result: declared_result(&game.white_result, &game.black_result),
        time_control: game.time_control.clone(),
        rated: game.rated,
        start_time,
        end_time,
        pgn: game.pgn.clone(),
        url: game.url.clone(),
    })
}
