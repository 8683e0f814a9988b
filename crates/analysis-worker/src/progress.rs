//! Progress channel: a process-wide registry of in-flight job snapshots.
//!
//! Each job has exactly one writer (its [`JobReporter`]) which swaps in a
//! fresh immutable snapshot on every update. Readers clone the `Arc` under a
//! short read lock, so they never see a half-written entry and never hold
//! the writer up. Terminal entries are kept for a retention period so a
//! poller arriving at the moment of completion still sees the final state,
//! then a reaper task drops them.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::stream::{self, Stream};
use serde::Serialize;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Starting,
    Running,
    /// One game of the batch is done, more may follow
    Complete,
    Finished,
    Error,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Finished | JobState::Error)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Starting,
    SyncStart,
    SyncProgress,
    SyncComplete,
    AnalysisStart,
    AnalysisProgress,
    Complete,
    Finished,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobSnapshot {
    pub job_id: String,
    pub player: String,
    pub phase: Phase,
    pub state: JobState,
    /// Overall percentage, 0 to 100
    pub progress: u8,
    pub message: String,
    /// Plies done in the current game (or archives during sync)
    pub current: u32,
    pub total: u32,
    /// Inaccuracies, mistakes and blunders found so far in the batch
    pub errors: u32,
    /// 1-based index of the game being analysed within the batch
    pub game_index: u32,
    pub game_count: u32,
    pub game_id: Option<i64>,
    pub updated_at: DateTime<Utc>,
    /// Monotonic per registry, bumped on every publish
    pub seq: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobKey {
    player: String,
    job_id: String,
}

impl JobKey {
    pub fn new(player: &str, job_id: &str) -> Self {
        Self {
            player: player.to_lowercase(),
            job_id: job_id.to_string(),
        }
    }
}

struct Entry {
    snapshot: Arc<JobSnapshot>,
    terminal_since: Option<Instant>,
}

pub struct ProgressRegistry {
    jobs: RwLock<HashMap<JobKey, Entry>>,
    retention: Duration,
    seq: AtomicU64,
}

impl ProgressRegistry {
    pub fn new(retention: Duration) -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            retention,
            seq: AtomicU64::new(0),
        }
    }

    async fn publish(&self, key: &JobKey, mut snapshot: JobSnapshot) -> Arc<JobSnapshot> {
        snapshot.seq = self.seq.fetch_add(1, Ordering::Relaxed) + 1;
        snapshot.updated_at = Utc::now();
        let terminal_since = snapshot.state.is_terminal().then(Instant::now);
        let snapshot = Arc::new(snapshot);

        self.jobs.write().await.insert(
            key.clone(),
            Entry {
                snapshot: snapshot.clone(),
                terminal_since,
            },
        );
        snapshot
    }

    pub async fn get(&self, player: &str, job_id: &str) -> Option<Arc<JobSnapshot>> {
        self.get_key(&JobKey::new(player, job_id)).await
    }

    async fn get_key(&self, key: &JobKey) -> Option<Arc<JobSnapshot>> {
        self.jobs.read().await.get(key).map(|e| e.snapshot.clone())
    }

    /// Non-terminal jobs of a player, oldest update first.
    pub async fn active_for_player(&self, player: &str) -> Vec<Arc<JobSnapshot>> {
        let player = player.to_lowercase();
        let jobs = self.jobs.read().await;
        let mut active: Vec<Arc<JobSnapshot>> = jobs
            .iter()
            .filter(|(k, e)| k.player == player && !e.snapshot.state.is_terminal())
            .map(|(_, e)| e.snapshot.clone())
            .collect();
        active.sort_by_key(|s| s.seq);
        active
    }

    /// Drop terminal entries older than the retention period.
    pub async fn purge_expired(&self) -> usize {
        let retention = self.retention;
        let mut jobs = self.jobs.write().await;
        let before = jobs.len();
        jobs.retain(|_, e| e.terminal_since.map_or(true, |t| t.elapsed() < retention));
        before - jobs.len()
    }

    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }

    /// Background task purging expired entries every `every`.
    pub fn spawn_reaper(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let registry = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                ticker.tick().await;
                let Some(registry) = registry.upgrade() else {
                    break;
                };
                let purged = registry.purge_expired().await;
                if purged > 0 {
                    debug!(purged, "Expired job snapshots purged");
                }
            }
        })
    }
}

/// The single writer of one job's snapshot.
pub struct JobReporter {
    registry: Option<Arc<ProgressRegistry>>,
    key: JobKey,
    current: JobSnapshot,
    /// Errors of the games already finished in this batch
    errors_before: u32,
    /// Game this job holds in `analyzing`
    claimed: Option<i64>,
}

impl JobReporter {
    /// Register a job in `starting` state.
    pub async fn start(registry: Arc<ProgressRegistry>, player: &str, job_id: &str) -> Self {
        let mut reporter = Self::build(Some(registry), player, job_id);
        reporter.publish().await;
        reporter
    }

    /// A reporter that only logs. Used by the CLI and single-shot callers.
    pub fn detached(player: &str) -> Self {
        Self::build(None, player, "local")
    }

    fn build(registry: Option<Arc<ProgressRegistry>>, player: &str, job_id: &str) -> Self {
        Self {
            registry,
            key: JobKey::new(player, job_id),
            current: JobSnapshot {
                job_id: job_id.to_string(),
                player: player.to_string(),
                phase: Phase::Starting,
                state: JobState::Starting,
                progress: 0,
                message: "Starting".to_string(),
                current: 0,
                total: 0,
                errors: 0,
                game_index: 0,
                game_count: 0,
                game_id: None,
                updated_at: Utc::now(),
                seq: 0,
            },
            errors_before: 0,
            claimed: None,
        }
    }

    pub fn job_id(&self) -> &str {
        &self.current.job_id
    }

    pub fn snapshot(&self) -> &JobSnapshot {
        &self.current
    }

    pub fn is_terminal(&self) -> bool {
        self.current.state.is_terminal()
    }

    /// Record a successful claim, before any other work on the game.
    pub fn hold_claim(&mut self, game_id: i64) {
        self.claimed = Some(game_id);
    }

    /// The claim was settled, by a final status or a release.
    pub fn settle_claim(&mut self) {
        self.claimed = None;
    }

    pub fn claimed_game(&self) -> Option<i64> {
        self.claimed
    }

    async fn publish(&mut self) {
        debug!(
            job_id = %self.current.job_id,
            phase = ?self.current.phase,
            progress = self.current.progress,
            message = %self.current.message,
            "Job progress"
        );
        if let Some(registry) = &self.registry {
            let published = registry.publish(&self.key, self.current.clone()).await;
            self.current.seq = published.seq;
            self.current.updated_at = published.updated_at;
        }
    }

    async fn set(&mut self, phase: Phase, state: JobState, message: impl Into<String>) {
        self.current.phase = phase;
        self.current.state = state;
        self.current.message = message.into();
        self.publish().await;
    }

    pub async fn sync_start(&mut self) {
        self.current.current = 0;
        self.current.total = 0;
        let message = format!("Fetching games for {}", self.current.player);
        self.set(Phase::SyncStart, JobState::Running, message).await;
    }

    pub async fn sync_progress(&mut self, archives_done: u32, archives_total: u32, stored: usize) {
        self.current.current = archives_done;
        self.current.total = archives_total;
        let message =
            format!("Fetched {archives_done}/{archives_total} archives, {stored} new games");
        self.set(Phase::SyncProgress, JobState::Running, message).await;
    }

    pub async fn sync_complete(&mut self, new_games: usize) {
        let message = format!("Sync complete: {new_games} new games");
        self.set(Phase::SyncComplete, JobState::Running, message).await;
    }

    /// Announce the size of the analysis batch.
    pub fn set_batch(&mut self, game_count: u32) {
        self.current.game_count = game_count;
        self.current.game_index = 0;
    }

    pub async fn analysis_start(&mut self, game_id: i64, total_plies: u32) {
        self.current.game_index += 1;
        self.current.game_count = self.current.game_count.max(self.current.game_index);
        self.current.game_id = Some(game_id);
        self.current.current = 0;
        self.current.total = total_plies;
        self.current.progress = self.overall(0, total_plies);
        let message = format!(
            "Analyzing game {}/{} ({total_plies} moves)",
            self.current.game_index, self.current.game_count
        );
        self.set(Phase::AnalysisStart, JobState::Running, message).await;
    }

    pub async fn analysis_progress(&mut self, done: u32, total: u32, errors: u32) {
        self.current.current = done;
        self.current.total = total;
        self.current.progress = self.overall(done, total);
        let message = format!(
            "Game {}/{}: move {done}/{total}",
            self.current.game_index, self.current.game_count
        );
        self.current.errors = self.errors_before + errors;
        self.set(Phase::AnalysisProgress, JobState::Running, message).await;
    }

    /// One game of the batch is done.
    pub async fn game_complete(&mut self, errors: u32) {
        self.current.current = self.current.total;
        self.current.progress = self.overall(1, 1);
        self.current.errors = self.errors_before + errors;
        self.errors_before = self.current.errors;
        let message = format!(
            "Finished game {}/{}",
            self.current.game_index, self.current.game_count
        );
        self.set(Phase::Complete, JobState::Complete, message).await;
    }

    pub async fn finish(&mut self, message: impl Into<String>) {
        self.current.progress = 100;
        let message = message.into();
        info!(
            job_id = %self.current.job_id,
            player = %self.current.player,
            %message,
            "Job finished"
        );
        self.set(Phase::Finished, JobState::Finished, message).await;
    }

    pub async fn fail(&mut self, message: impl Into<String>) {
        let message = message.into();
        warn!(
            job_id = %self.current.job_id,
            player = %self.current.player,
            %message,
            "Job failed"
        );
        self.set(Phase::Error, JobState::Error, message).await;
    }

    /// Batch-wide percentage with the current game `done/total` through.
    fn overall(&self, done: u32, total: u32) -> u8 {
        let count = self.current.game_count.max(1) as f64;
        let index = self.current.game_index.max(1) as f64 - 1.0;
        let within = if total == 0 {
            0.0
        } else {
            done as f64 / total as f64
        };
        (((index + within) / count) * 100.0).floor().clamp(0.0, 100.0) as u8
    }
}

/// Decides which plies get a progress event: the first, the last, and
/// every ply that crosses into a new tenth of the game.
#[derive(Debug, Clone)]
pub struct ProgressThrottle {
    total: u32,
    last_decile: Option<u32>,
}

impl ProgressThrottle {
    pub fn new(total: u32) -> Self {
        Self {
            total,
            last_decile: None,
        }
    }

    pub fn should_emit(&mut self, done: u32) -> bool {
        if self.total == 0 {
            return false;
        }
        let decile = done.min(self.total) * 10 / self.total;
        let crossed = self.last_decile.map_or(true, |last| decile > last);
        if crossed {
            self.last_decile = Some(decile);
        }
        crossed || done == 1 || done >= self.total
    }
}

#[derive(Debug, Clone, Copy)]
pub struct WatchOptions {
    pub poll_interval: Duration,
    /// How long a stream waits for an unknown job to appear
    pub not_found_grace: Duration,
    pub heartbeat_interval: Duration,
    /// Absolute lifetime of one stream
    pub timeout: Duration,
}

/// Server-push events of a job stream.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// First snapshot seen by this stream
    Reconnected { job: JobSnapshot },
    Progress { job: JobSnapshot },
    Heartbeat { timestamp: DateTime<Utc> },
    SessionNotFound { job_id: String },
    Timeout { job_id: String },
}

impl StreamEvent {
    pub fn name(&self) -> &'static str {
        match self {
            StreamEvent::Reconnected { .. } => "reconnected",
            StreamEvent::Progress { .. } => "progress",
            StreamEvent::Heartbeat { .. } => "heartbeat",
            StreamEvent::SessionNotFound { .. } => "session_not_found",
            StreamEvent::Timeout { .. } => "timeout",
        }
    }

    /// Whether the stream ends after this event.
    pub fn is_terminal(&self) -> bool {
        match self {
            StreamEvent::Reconnected { job } | StreamEvent::Progress { job } => {
                job.state.is_terminal()
            }
            StreamEvent::Heartbeat { .. } => false,
            StreamEvent::SessionNotFound { .. } | StreamEvent::Timeout { .. } => true,
        }
    }
}

struct WatchState {
    registry: Arc<ProgressRegistry>,
    key: JobKey,
    job_id: String,
    options: WatchOptions,
    started: Instant,
    last_event: Instant,
    last_seq: Option<u64>,
    done: bool,
}

/// Poll a job's snapshot and turn changes into stream events. The stream
/// ends after a terminal snapshot, `session_not_found` or `timeout`.
pub fn watch(
    registry: Arc<ProgressRegistry>,
    player: &str,
    job_id: &str,
    options: WatchOptions,
) -> impl Stream<Item = StreamEvent> + Send + 'static {
    let now = Instant::now();
    let state = WatchState {
        registry,
        key: JobKey::new(player, job_id),
        job_id: job_id.to_string(),
        options,
        started: now,
        last_event: now,
        last_seq: None,
        done: false,
    };

    stream::unfold(state, |mut st| async move {
        if st.done {
            return None;
        }
        loop {
            let event = next_event(&mut st).await;
            if let Some(event) = event {
                st.done = event.is_terminal();
                st.last_event = Instant::now();
                return Some((event, st));
            }
            tokio::time::sleep(st.options.poll_interval).await;
        }
    })
}

async fn next_event(st: &mut WatchState) -> Option<StreamEvent> {
    let elapsed = st.started.elapsed();
    if elapsed >= st.options.timeout {
        return Some(StreamEvent::Timeout {
            job_id: st.job_id.clone(),
        });
    }

    match st.registry.get_key(&st.key).await {
        Some(snapshot) => {
            if st.last_seq == Some(snapshot.seq) {
                return (st.last_event.elapsed() >= st.options.heartbeat_interval)
                    .then(|| StreamEvent::Heartbeat {
                        timestamp: Utc::now(),
                    });
            }
            let first = st.last_seq.is_none();
            st.last_seq = Some(snapshot.seq);
            let job = (*snapshot).clone();
            Some(if first {
                StreamEvent::Reconnected { job }
            } else {
                StreamEvent::Progress { job }
            })
        }
        // Seen before and gone now, or never showed up
        None if st.last_seq.is_some() || elapsed >= st.options.not_found_grace => {
            Some(StreamEvent::SessionNotFound {
                job_id: st.job_id.clone(),
            })
        }
        None => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    fn options() -> WatchOptions {
        WatchOptions {
            poll_interval: Duration::from_millis(5),
            not_found_grace: Duration::from_millis(40),
            heartbeat_interval: Duration::from_secs(60),
            timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn test_throttle_emits_first_last_and_deciles() {
        let mut throttle = ProgressThrottle::new(40);
        let emitted: Vec<u32> = (1..=40).filter(|d| throttle.should_emit(*d)).collect();
        assert_eq!(emitted, vec![1, 4, 8, 12, 16, 20, 24, 28, 32, 36, 40]);
    }

    #[test]
    fn test_throttle_short_game() {
        let mut throttle = ProgressThrottle::new(1);
        assert!(throttle.should_emit(1));

        let mut throttle = ProgressThrottle::new(3);
        let emitted: Vec<u32> = (1..=3).filter(|d| throttle.should_emit(*d)).collect();
        assert_eq!(emitted, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_reporter_publishes_snapshots() {
        let registry = Arc::new(ProgressRegistry::new(Duration::from_secs(10)));
        let mut reporter = JobReporter::start(registry.clone(), "Alice", "job-1").await;

        let first = registry.get("alice", "job-1").await.unwrap();
        assert_eq!(first.state, JobState::Starting);

        reporter.set_batch(2);
        reporter.analysis_start(7, 10).await;
        reporter.analysis_progress(5, 10, 1).await;

        let snap = registry.get("ALICE", "job-1").await.unwrap();
        assert_eq!(snap.phase, Phase::AnalysisProgress);
        assert_eq!(snap.progress, 25);
        assert_eq!(snap.errors, 1);
        assert!(snap.seq > first.seq);
        assert_eq!(registry.active_for_player("alice").await.len(), 1);

        reporter.finish("done").await;
        assert!(registry.active_for_player("alice").await.is_empty());
        assert_eq!(registry.get("alice", "job-1").await.unwrap().progress, 100);
    }

    #[tokio::test]
    async fn test_purge_only_drops_expired_terminal_jobs() {
        let registry = Arc::new(ProgressRegistry::new(Duration::from_millis(10)));
        let mut done = JobReporter::start(registry.clone(), "a", "done").await;
        let _running = JobReporter::start(registry.clone(), "a", "running").await;
        done.fail("engine gone").await;

        assert_eq!(registry.purge_expired().await, 0);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(registry.purge_expired().await, 1);
        assert!(registry.get("a", "done").await.is_none());
        assert!(registry.get("a", "running").await.is_some());
    }

    #[tokio::test]
    async fn test_watch_unknown_job() {
        let registry = Arc::new(ProgressRegistry::new(Duration::from_secs(10)));
        let events: Vec<StreamEvent> = watch(registry, "a", "nope", options()).collect().await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].name(), "session_not_found");
    }

    #[tokio::test]
    async fn test_watch_finished_job_ends_stream() {
        let registry = Arc::new(ProgressRegistry::new(Duration::from_secs(10)));
        let mut reporter = JobReporter::start(registry.clone(), "a", "j").await;
        reporter.finish("all done").await;

        let events: Vec<StreamEvent> = watch(registry, "a", "j", options()).collect().await;
        assert_eq!(events.len(), 1);
        match &events[0] {
            StreamEvent::Reconnected { job } => assert_eq!(job.state, JobState::Finished),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_watch_follows_updates() {
        let registry = Arc::new(ProgressRegistry::new(Duration::from_secs(10)));
        let mut reporter = JobReporter::start(registry.clone(), "a", "j").await;

        let writer = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            reporter.sync_start().await;
            tokio::time::sleep(Duration::from_millis(20)).await;
            reporter.finish("ok").await;
        });

        let events: Vec<StreamEvent> = watch(registry, "a", "j", options()).collect().await;
        writer.await.unwrap();

        assert_eq!(events.first().map(|e| e.name()), Some("reconnected"));
        assert!(events.iter().any(|e| e.name() == "progress"));
        assert!(events.last().unwrap().is_terminal());
    }

    #[tokio::test]
    async fn test_watch_times_out() {
        let registry = Arc::new(ProgressRegistry::new(Duration::from_secs(10)));
        let _reporter = JobReporter::start(registry.clone(), "a", "j").await;
        let opts = WatchOptions {
            timeout: Duration::from_millis(30),
            heartbeat_interval: Duration::from_millis(10),
            ..options()
        };

        let events: Vec<StreamEvent> = watch(registry, "a", "j", opts).collect().await;
        assert_eq!(events.first().map(|e| e.name()), Some("reconnected"));
        assert!(events.iter().any(|e| e.name() == "heartbeat"));
        assert_eq!(events.last().map(|e| e.name()), Some("timeout"));
    }
}
