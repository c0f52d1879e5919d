//! Archival Scheduler
//!
//! A worker task that runs migration sweeps on an interval. It is driven
//! through a command channel and runs at most one sweep at a time; a sweep
//! is its own task so a panic is recorded instead of killing the worker.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{RwLock, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::manager::{HybridManager, MigrationReport};
use crate::config::SchedulerConfig;
use crate::{HmemError, HmemResult};

/// Operator-facing scheduler control
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerAction {
    Start,
    Stop,
    RunNow,
}

impl SchedulerAction {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "start" => Some(Self::Start),
            "stop" => Some(Self::Stop),
            "run_now" | "run-now" => Some(Self::RunNow),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Stop => "stop",
            Self::RunNow => "run_now",
        }
    }
}

/// Snapshot of the scheduler
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchedulerStatus {
    pub running: bool,
    pub in_flight: bool,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_count: usize,
    pub last_error: Option<String>,
    pub total_migrated: u64,
    pub interval_secs: u64,
    pub next_run_at: Option<DateTime<Utc>>,
}

/// Result of a run-now request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum RunNowOutcome {
    Completed { report: MigrationReport },
    /// A sweep was already running; no second one was started
    Coalesced,
    Failed { error: String },
}

enum Command {
    Start(oneshot::Sender<()>),
    Stop(oneshot::Sender<()>),
    RunNow(oneshot::Sender<RunNowOutcome>),
    Shutdown,
}

struct InFlight {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl InFlight {
    fn is_busy(&self) -> bool {
        !self.handle.is_finished()
    }
}

/// Handle to the scheduler worker
pub struct ArchivalScheduler {
    commands: mpsc::Sender<Command>,
    status: Arc<RwLock<SchedulerStatus>>,
    worker: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl ArchivalScheduler {
    /// Spawn the worker. It starts sweeping right away when
    /// `config.enabled` is set.
    pub fn spawn(manager: Arc<HybridManager>, config: SchedulerConfig) -> Self {
        let (tx, rx) = mpsc::channel(16);
        let status = Arc::new(RwLock::new(SchedulerStatus {
            interval_secs: config.interval_secs,
            ..Default::default()
        }));

        let worker = Worker {
            manager,
            config,
            status: status.clone(),
        };
        let handle = tokio::spawn(worker.run(rx));

        Self {
            commands: tx,
            status,
            worker: parking_lot::Mutex::new(Some(handle)),
        }
    }

    async fn send(&self, command: Command) -> HmemResult<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| HmemError::invalid_operation("scheduler is shut down"))
    }

    /// Begin periodic sweeps
    pub async fn start(&self) -> HmemResult<()> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Start(tx)).await?;
        rx.await
            .map_err(|_| HmemError::invalid_operation("scheduler stopped responding"))
    }

    /// Stop periodic sweeps and cancel one in flight
    pub async fn stop(&self) -> HmemResult<()> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Stop(tx)).await?;
        rx.await
            .map_err(|_| HmemError::invalid_operation("scheduler stopped responding"))
    }

    /// Run a sweep now and wait for it
    pub async fn run_now(&self) -> HmemResult<RunNowOutcome> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::RunNow(tx)).await?;
        rx.await
            .map_err(|_| HmemError::invalid_operation("scheduler stopped responding"))
    }

    pub async fn control(&self, action: SchedulerAction) -> HmemResult<Option<RunNowOutcome>> {
        match action {
            SchedulerAction::Start => self.start().await.map(|_| None),
            SchedulerAction::Stop => self.stop().await.map(|_| None),
            SchedulerAction::RunNow => self.run_now().await.map(Some),
        }
    }

    pub async fn status(&self) -> SchedulerStatus {
        self.status.read().await.clone()
    }

    /// Cancel any sweep and wait for the worker to exit
    pub async fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown).await;
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Scheduler worker ended abnormally");
            }
        }
    }
}

struct Worker {
    manager: Arc<HybridManager>,
    config: SchedulerConfig,
    status: Arc<RwLock<SchedulerStatus>>,
}

impl Worker {
    fn period(&self) -> Duration {
        Duration::from_secs(self.config.interval_secs.max(1))
    }

    fn next_run_at(&self) -> DateTime<Utc> {
        self.manager.clock().now()
            + chrono::Duration::seconds(self.config.interval_secs.max(1) as i64)
    }

    async fn set_running(&self, running: bool) {
        let mut status = self.status.write().await;
        status.running = running;
        status.next_run_at = running.then(|| self.next_run_at());
    }

    async fn run(self, mut commands: mpsc::Receiver<Command>) {
        let period = self.period();
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut running = self.config.enabled;
        let mut in_flight: Option<InFlight> = None;
        if running {
            self.set_running(true).await;
        }
        tracing::info!(
            enabled = running,
            interval_secs = self.config.interval_secs,
            "Archival scheduler started"
        );

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Start(ack)) => {
                        if !running {
                            running = true;
                            ticker.reset();
                            self.set_running(true).await;
                            tracing::info!("Periodic archival enabled");
                        }
                        let _ = ack.send(());
                    }
                    Some(Command::Stop(ack)) => {
                        running = false;
                        if let Some(sweep) = in_flight.as_ref().filter(|s| s.is_busy()) {
                            sweep.cancel.cancel();
                        }
                        self.set_running(false).await;
                        tracing::info!("Periodic archival disabled");
                        let _ = ack.send(());
                    }
                    Some(Command::RunNow(reply)) => {
                        if in_flight.as_ref().is_some_and(InFlight::is_busy) {
                            tracing::info!(reason = %HmemError::SchedulerBusy, "Run-now coalesced");
                            let _ = reply.send(RunNowOutcome::Coalesced);
                        } else {
                            in_flight = Some(self.begin_sweep(Some(reply)).await);
                        }
                    }
                    Some(Command::Shutdown) | None => break,
                },
                _ = ticker.tick(), if running => {
                    if in_flight.as_ref().is_some_and(InFlight::is_busy) {
                        tracing::debug!("Previous sweep still running; tick skipped");
                    } else {
                        in_flight = Some(self.begin_sweep(None).await);
                    }
                    self.status.write().await.next_run_at = Some(self.next_run_at());
                }
            }
        }

        if let Some(sweep) = in_flight {
            sweep.cancel.cancel();
            let _ = sweep.handle.await;
        }
        self.set_running(false).await;
        tracing::info!("Archival scheduler stopped");
    }

    async fn begin_sweep(&self, reply: Option<oneshot::Sender<RunNowOutcome>>) -> InFlight {
        self.status.write().await.in_flight = true;

        let cancel = CancellationToken::new();
        let manager = self.manager.clone();
        let status = self.status.clone();
        let age = chrono::Duration::days(self.config.age_days as i64);
        let min_salience = self.config.min_salience;
        let token = cancel.clone();

        let handle = tokio::spawn(async move {
            let sweep = tokio::spawn({
                let manager = manager.clone();
                async move {
                    manager
                        .migrate_eligible_with(age, min_salience, &token)
                        .await
                }
            });

            let outcome = match sweep.await {
                Ok(Ok(report)) => RunNowOutcome::Completed { report },
                Ok(Err(e)) => RunNowOutcome::Failed {
                    error: e.to_string(),
                },
                Err(e) => RunNowOutcome::Failed {
                    error: format!("sweep panicked: {}", e),
                },
            };

            {
                let mut status = status.write().await;
                status.in_flight = false;
                status.last_run_at = Some(manager.clock().now());
                match &outcome {
                    RunNowOutcome::Completed { report } => {
                        status.last_count = report.migrated;
                        status.total_migrated += report.migrated as u64;
                        status.last_error = report
                            .failures
                            .first()
                            .map(|f| format!("{} record(s) failed, first: {}", report.failed(), f.error));
                    }
                    RunNowOutcome::Failed { error } => {
                        tracing::error!(error = %error, "Archival sweep failed");
                        status.last_count = 0;
                        status.last_error = Some(error.clone());
                    }
                    RunNowOutcome::Coalesced => {}
                }
            }

            if let Some(reply) = reply {
                let _ = reply.send(outcome);
            }
        });

        InFlight { cancel, handle }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::memory::{Embedder, HashEmbedder};
    use crate::utils::{Clock, ManualClock, from_millis};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tempfile::TempDir;
    use tokio::sync::Notify;

    async fn manager_with(dir: &TempDir, embedder: Arc<dyn Embedder>) -> (Arc<HybridManager>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(from_millis(1_700_000_000_000)));
        let manager = HybridManager::open(EngineConfig::new(dir.path()), embedder, clock.clone())
            .await
            .unwrap();
        (Arc::new(manager), clock)
    }

    /// Fails until armed, then blocks each call until released
    #[derive(Default)]
    struct GatedEmbedder {
        armed: AtomicBool,
        release: Notify,
    }

    #[async_trait]
    impl Embedder for GatedEmbedder {
        async fn embed(&self, text: &str) -> HmemResult<Vec<f32>> {
            if !self.armed.load(Ordering::SeqCst) {
                return Err(HmemError::embedding("not armed"));
            }
            self.release.notified().await;
            Ok(HashEmbedder::default().embed_text(text))
        }

        fn dimensions(&self) -> usize {
            crate::memory::embeddings::HASH_DIMENSIONS
        }
    }

    #[tokio::test]
    async fn test_run_now_migrates_and_updates_status() {
        let dir = tempfile::tempdir().unwrap();
        let (manager, clock) = manager_with(&dir, Arc::new(HashEmbedder::default())).await;
        manager.add_memory("Q3 planning notes", "u1", None).await.unwrap();
        clock.advance(chrono::Duration::days(61));

        let scheduler = ArchivalScheduler::spawn(manager.clone(), SchedulerConfig::default());
        let outcome = tokio_test::assert_ok!(scheduler.run_now().await);
        match outcome {
            RunNowOutcome::Completed { report } => assert_eq!(report.migrated, 1),
            other => panic!("unexpected outcome {other:?}"),
        }

        let status = scheduler.status().await;
        assert!(!status.running);
        assert!(!status.in_flight);
        assert_eq!(status.last_count, 1);
        assert_eq!(status.total_migrated, 1);
        assert_eq!(status.last_run_at, Some(clock.now()));
        assert!(status.last_error.is_none());

        scheduler.shutdown().await;
        tokio_test::assert_err!(scheduler.run_now().await);
    }

    #[tokio::test]
    async fn test_start_and_stop_toggle_running() {
        let dir = tempfile::tempdir().unwrap();
        let (manager, _clock) = manager_with(&dir, Arc::new(HashEmbedder::default())).await;
        let scheduler = ArchivalScheduler::spawn(manager, SchedulerConfig::default());
        assert!(!scheduler.status().await.running);

        scheduler.control(SchedulerAction::Start).await.unwrap();
        let status = scheduler.status().await;
        assert!(status.running);
        assert!(status.next_run_at.is_some());

        scheduler.control(SchedulerAction::Stop).await.unwrap();
        let status = scheduler.status().await;
        assert!(!status.running);
        assert!(status.next_run_at.is_none());
        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn test_interval_tick_runs_sweep() {
        let dir = tempfile::tempdir().unwrap();
        let (manager, clock) = manager_with(&dir, Arc::new(HashEmbedder::default())).await;
        manager.add_memory("Q3 planning notes", "u1", None).await.unwrap();
        clock.advance(chrono::Duration::days(61));

        let scheduler = ArchivalScheduler::spawn(
            manager.clone(),
            SchedulerConfig {
                enabled: true,
                interval_secs: 1,
                ..Default::default()
            },
        );

        let mut waited = 0;
        while scheduler.status().await.total_migrated == 0 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            waited += 1;
            assert!(waited < 100, "periodic sweep never ran");
        }
        assert_eq!(manager.stats("u1").await.unwrap().archived_count, 1);
        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn test_run_now_while_busy_is_coalesced() {
        let dir = tempfile::tempdir().unwrap();
        let embedder = Arc::new(GatedEmbedder::default());
        let (manager, clock) = manager_with(&dir, embedder.clone()).await;
        // stored without a vector, so the sweep has to embed it
        manager.add_memory("Q3 planning notes", "u1", None).await.unwrap();
        clock.advance(chrono::Duration::days(61));
        embedder.armed.store(true, Ordering::SeqCst);

        let scheduler = Arc::new(ArchivalScheduler::spawn(manager, SchedulerConfig::default()));
        let first = {
            let scheduler = scheduler.clone();
            tokio::spawn(async move { scheduler.run_now().await })
        };
        while !scheduler.status().await.in_flight {
            tokio::task::yield_now().await;
        }

        assert_eq!(scheduler.run_now().await.unwrap(), RunNowOutcome::Coalesced);

        embedder.release.notify_one();
        match first.await.unwrap().unwrap() {
            RunNowOutcome::Completed { report } => assert_eq!(report.migrated, 1),
            other => panic!("unexpected outcome {other:?}"),
        }
        scheduler.shutdown().await;
    }
}
