//! Chess.com public API client used as the archive source.

use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::debug;

use crate::error::WorkerError;
use crate::sync::{ArchiveGame, ArchiveSource};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
/// Pause before every request to stay under the public rate limit.
const RATE_LIMIT_DELAY: Duration = Duration::from_millis(100);

#[derive(Deserialize)]
struct ArchivesResponse {
    #[serde(default)]
    archives: Vec<String>,
}

#[derive(Deserialize)]
struct MonthResponse {
    #[serde(default)]
    games: Vec<ApiGame>,
}

#[derive(Deserialize, Default)]
struct ApiPlayer {
    #[serde(default)]
    username: String,
    #[serde(default)]
    result: String,
}

fn default_rules() -> String {
    "chess".to_string()
}

fn default_rated() -> bool {
    true
}

#[derive(Deserialize)]
struct ApiGame {
    #[serde(default)]
    url: String,
    #[serde(default)]
    uuid: String,
    #[serde(default)]
    pgn: String,
    #[serde(default)]
    time_control: String,
    #[serde(default = "default_rated")]
    rated: bool,
    #[serde(default = "default_rules")]
    rules: String,
    #[serde(default)]
    start_time: Option<i64>,
    #[serde(default)]
    end_time: i64,
    #[serde(default)]
    white: ApiPlayer,
    #[serde(default)]
    black: ApiPlayer,
}

impl From<ApiGame> for ArchiveGame {
    fn from(g: ApiGame) -> Self {
        ArchiveGame {
            uuid: g.uuid,
            url: g.url,
            white: g.white.username,
            black: g.black.username,
            white_result: g.white.result,
            black_result: g.black.result,
            time_control: g.time_control,
            rated: g.rated,
            rules: g.rules,
            start_time: g.start_time,
            end_time: g.end_time,
            pgn: g.pgn,
        }
    }
}

pub struct ChessComClient {
    client: Client,
    base_url: String,
}

impl ChessComClient {
    pub fn new(base_url: &str) -> Result<Self, WorkerError> {
        let client = Client::builder()
            .user_agent("ChessTrainer/1.0")
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| WorkerError::Archive(format!("HTTP client setup failed: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn get(&self, url: &str) -> Result<reqwest::Response, WorkerError> {
        tokio::time::sleep(RATE_LIMIT_DELAY).await;
        debug!(url, "GET");
        self.client.get(url).send().await.map_err(request_error)
    }
}

fn request_error(e: reqwest::Error) -> WorkerError {
    if e.is_timeout() || e.is_connect() {
        WorkerError::NetworkTimeout(e.to_string())
    } else {
        WorkerError::Archive(format!("Request error: {e}"))
    }
}

impl ArchiveSource for ChessComClient {
    async fn list_archives(&self, player: &str) -> Result<Vec<String>, WorkerError> {
        let url = format!(
            "{}/player/{}/games/archives",
            self.base_url,
            player.to_lowercase()
        );
        let resp = self.get(&url).await?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Err(WorkerError::PlayerNotFound(player.to_string()));
        }
        if !resp.status().is_success() {
            return Err(WorkerError::Archive(format!("Archives HTTP {}", resp.status())));
        }

        let data: ArchivesResponse = resp.json().await.map_err(request_error)?;
        // The API lists months oldest first
        Ok(data.archives)
    }

    async fn fetch_archive(&self, archive: &str) -> Result<Vec<ArchiveGame>, WorkerError> {
        let resp = self.get(archive).await?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(vec![]);
        }
        if !resp.status().is_success() {
            return Err(WorkerError::Archive(format!("Archive HTTP {}", resp.status())));
        }

        let data: MonthResponse = resp.json().await.map_err(request_error)?;
        Ok(data.games.into_iter().map(ArchiveGame::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_month_response_parsing() {
        let body = r#"{"games": [{
            "url": "https://www.chess.com/game/live/42",
            "pgn": "1. e4 e5 *",
            "time_control": "180+2",
            "end_time": 1700000000,
            "rated": false,
            "uuid": "abc",
            "time_class": "blitz",
            "rules": "chess",
            "white": {"rating": 1500, "result": "win", "username": "Alice"},
            "black": {"rating": 1490, "result": "resigned", "username": "bob"}
        }]}"#;
        let data: MonthResponse = serde_json::from_str(body).unwrap();
        let game = ArchiveGame::from(data.games.into_iter().next().unwrap());

        assert_eq!(game.white, "Alice");
        assert_eq!(game.black_result, "resigned");
        assert_eq!(game.start_time, None);
        assert!(!game.rated);
    }

    #[test]
    fn test_missing_fields_default() {
        let data: MonthResponse = serde_json::from_str(r#"{"games": [{}]}"#).unwrap();
        let game = ArchiveGame::from(data.games.into_iter().next().unwrap());
        assert_eq!(game.rules, "chess");
        assert!(game.rated);

        let empty: ArchivesResponse = serde_json::from_str("{}").unwrap();
        assert!(empty.archives.is_empty());
    }
}
