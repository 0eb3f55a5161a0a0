//! Monitor orchestrator.
//!
//! A single actor task owns the cache, the per-file offsets and the
//! committed activity set.  Poll cycles run as a separate work unit that
//! borrows the cache by value and hands it back in its completion
//! message, so the cache always has exactly one writer.  At most one poll
//! is in flight; triggers that arrive meanwhile are skipped, not queued.
//!
//! The checkpoint restore is a work unit too: queries are answered from
//! the empty state until it reports back, and polling starts after.
//! Checkpoint saves go through one persistence task that only ever
//! writes the latest state.
//!
//! Talk to the actor through [`MonitorHandle`].

pub mod cache;
pub mod scan;
pub mod state;

pub use cache::ActivityCache;
pub use state::MonitorState;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::runtime::Handle;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Duration, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::activity::{sort_by_recency, ActivitySnapshot, AgentActivity};
use crate::config::MonitorConfig;
use crate::hooks::MonitorHooks;
use crate::parser::timestamp;
use scan::{ReadPolicy, ScanInput, ScanOutput};

const COMMAND_BUFFER: usize = 64;

/// Point-in-time counters, for the status endpoint and the CLI.
#[derive(Debug, Clone, Serialize)]
pub struct MonitorStats {
    pub name: String,
    pub sessions_dir: PathBuf,
    /// The checkpoint restore has not reported back yet.
    pub restoring: bool,
    /// A poll cycle is currently running.
    pub polling: bool,
    #[serde(with = "timestamp::option")]
    pub last_poll: Option<DateTime<Utc>>,
    pub agents: usize,
    pub cache_entries: usize,
    pub tracked_offsets: usize,
    pub polls_completed: u64,
    pub polls_skipped: u64,
    pub files_parsed: u64,
    pub cache_hits: u64,
}

type Reply = oneshot::Sender<Vec<AgentActivity>>;

enum Command {
    Activities(Reply),
    /// Start a poll now, or join the one in flight.  The reply, if any,
    /// fires when that poll completes.
    Poll(Option<Reply>),
    Stats(oneshot::Sender<MonitorStats>),
    Offsets(oneshot::Sender<HashMap<PathBuf, u64>>),
}

enum PollOutcome {
    Completed {
        scan: ScanOutput,
        processes: HashMap<String, AgentActivity>,
        elapsed: Duration,
    },
    /// The work unit panicked; its borrowed cache is gone.
    Failed,
}

/// Cheap, cloneable handle to a running monitor.
///
/// Queries never fail: once the monitor has stopped they return empty
/// results.
#[derive(Clone)]
pub struct MonitorHandle {
    tx: mpsc::Sender<Command>,
    cancel: CancellationToken,
    pubsub: Option<broadcast::Sender<ActivitySnapshot>>,
}

impl MonitorHandle {
    /// Committed activities, most recently active first.
    pub async fn activities(&self) -> Vec<AgentActivity> {
        let (tx, rx) = oneshot::channel();
        if self.tx.send(Command::Activities(tx)).await.is_err() {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }

    /// Trigger a poll (or join the one already running) and wait for it
    /// to complete.  Returns the activities committed by that poll.
    pub async fn poll(&self) -> Vec<AgentActivity> {
        let (tx, rx) = oneshot::channel();
        if self.tx.send(Command::Poll(Some(tx))).await.is_err() {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }

    /// Fire-and-forget poll trigger.
    pub fn trigger_poll(&self) {
        if let Err(e) = self.tx.try_send(Command::Poll(None)) {
            debug!(error = %e, "monitor: poll trigger dropped");
        }
    }

    /// `None` once the monitor has stopped.
    pub async fn stats(&self) -> Option<MonitorStats> {
        let (tx, rx) = oneshot::channel();
        self.tx.send(Command::Stats(tx)).await.ok()?;
        rx.await.ok()
    }

    /// Current per-file read offsets.
    pub async fn offsets(&self) -> HashMap<PathBuf, u64> {
        let (tx, rx) = oneshot::channel();
        if self.tx.send(Command::Offsets(tx)).await.is_err() {
            return HashMap::new();
        }
        rx.await.unwrap_or_default()
    }

    /// Subscribe to change snapshots, if the monitor was given a channel.
    pub fn subscribe(&self) -> Option<broadcast::Receiver<ActivitySnapshot>> {
        self.pubsub.as_ref().map(|tx| tx.subscribe())
    }

    pub fn is_running(&self) -> bool {
        !self.tx.is_closed()
    }

    /// Stop the monitor and wait until it has released its cache.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.tx.closed().await;
    }
}

/// Validate `config` and spawn the monitor actor.
///
/// Must be called inside a tokio runtime unless the config carries a
/// task runner.  The first poll starts as soon as the checkpoint restore
/// reports back, or once it times out after `read_timeout`.
pub fn start(config: MonitorConfig) -> anyhow::Result<MonitorHandle> {
    let config = config.validate()?;
    let runner = match &config.task_runner {
        Some(handle) => handle.clone(),
        None => Handle::try_current().context("monitor: no tokio runtime to run on")?,
    };
    let sessions_dir = config
        .sessions_dir
        .clone()
        .context("config: sessions_dir is required")?;

    let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
    let (done_tx, done_rx) = mpsc::channel(1);
    let (persist_tx, persist_rx) = watch::channel(None);
    let cancel = CancellationToken::new();

    info!(
        monitor = config.display_name(),
        dir = %sessions_dir.display(),
        poll_ms = config.poll_interval.as_millis() as u64,
        "monitor: starting"
    );

    let handle = MonitorHandle {
        tx,
        cancel: cancel.clone(),
        pubsub: config.pubsub.clone(),
    };
    let persister = runner.spawn(persist_checkpoints(
        config.hooks.clone(),
        config.persistence_file.clone(),
        persist_rx,
    ));
    let actor = MonitorActor {
        sessions_dir,
        runner: runner.clone(),
        agents: HashMap::new(),
        cache: Some(ActivityCache::new()),
        cache_entries: 0,
        offsets: HashMap::new(),
        last_poll: None,
        restoring: true,
        in_flight: false,
        waiters: Vec::new(),
        done_tx,
        persist_tx,
        persister: Some(persister),
        polls_completed: 0,
        polls_skipped: 0,
        files_parsed: 0,
        cache_hits: 0,
        config,
    };
    runner.spawn(actor.run(rx, done_rx, cancel));

    Ok(handle)
}

struct MonitorActor {
    config: MonitorConfig,
    sessions_dir: PathBuf,
    runner: Handle,
    /// Committed activity set, keyed by id.
    agents: HashMap<String, AgentActivity>,
    /// `None` while lent to the in-flight poll.
    cache: Option<ActivityCache>,
    /// Size of the cache as of its last return, reported by `stats`
    /// while the cache itself is out on loan.
    cache_entries: usize,
    offsets: HashMap<PathBuf, u64>,
    last_poll: Option<DateTime<Utc>>,
    restoring: bool,
    in_flight: bool,
    waiters: Vec<Reply>,
    done_tx: mpsc::Sender<PollOutcome>,
    /// Latest state for the persistence task.
    persist_tx: watch::Sender<Option<MonitorState>>,
    persister: Option<JoinHandle<()>>,
    polls_completed: u64,
    polls_skipped: u64,
    files_parsed: u64,
    cache_hits: u64,
}

impl MonitorActor {
    async fn run(
        mut self,
        mut rx: mpsc::Receiver<Command>,
        mut done_rx: mpsc::Receiver<PollOutcome>,
        cancel: CancellationToken,
    ) {
        let mut restored = self.begin_restore();

        let poll_every = self.config.poll_interval;
        let next_poll = tokio::time::sleep(Duration::ZERO);
        tokio::pin!(next_poll);

        let mut cleanup = periodic(self.config.cache_cleanup_interval);
        let mut gc = periodic(self.config.gc_interval);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                cmd = rx.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd),
                    None => break,
                },
                loaded = &mut restored, if self.restoring => {
                    let state = loaded.unwrap_or_else(|_| {
                        error!("monitor: checkpoint restore ended without a result, starting empty");
                        None
                    });
                    self.finish_restore(state);
                    next_poll.as_mut().reset(Instant::now());
                }
                Some(outcome) = done_rx.recv() => {
                    self.complete_poll(outcome);
                    next_poll.as_mut().reset(Instant::now() + poll_every);
                }
                () = &mut next_poll, if !self.restoring => {
                    self.start_poll();
                    next_poll.as_mut().reset(Instant::now() + poll_every);
                }
                _ = cleanup.tick() => self.cleanup_cache(),
                _ = gc.tick() => self.config.hooks.trigger_gc(self.config.display_name()),
            }
        }

        self.release();

        // Let the last checkpoint land before the command channel closes.
        let persister = self.persister.take();
        let limit = self.config.read_timeout;
        drop(self);
        if let Some(persister) = persister {
            if tokio::time::timeout(limit, persister).await.is_err() {
                warn!("monitor: final checkpoint save still running at shutdown");
            }
        }
    }

    fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Activities(reply) => {
                let _ = reply.send(self.sorted_agents());
            }
            Command::Poll(reply) => {
                if let Some(reply) = reply {
                    self.waiters.push(reply);
                }
                self.start_poll();
            }
            Command::Stats(reply) => {
                let _ = reply.send(self.stats());
            }
            Command::Offsets(reply) => {
                let _ = reply.send(self.offsets.clone());
            }
        }
    }

    /// Load the checkpoint off the actor, bounded by `read_timeout`.
    /// `None` means start empty.
    fn begin_restore(&self) -> oneshot::Receiver<Option<MonitorState>> {
        let (tx, rx) = oneshot::channel();
        let hooks = self.config.hooks.clone();
        let file = self.config.persistence_file.clone();
        let limit = self.config.read_timeout;
        self.runner.spawn(async move {
            let loaded = tokio::time::timeout(limit, hooks.load_state(&file, MonitorState::default()));
            let state = match loaded.await {
                Ok(Ok(state)) => Some(state),
                Ok(Err(e)) => {
                    warn!(error = %e, "monitor: checkpoint restore failed, starting empty");
                    None
                }
                Err(_) => {
                    warn!(
                        timeout_ms = limit.as_millis() as u64,
                        "monitor: checkpoint restore timed out, starting empty"
                    );
                    None
                }
            };
            let _ = tx.send(state);
        });
        rx
    }

    fn finish_restore(&mut self, state: Option<MonitorState>) {
        self.restoring = false;
        let Some(state) = state else {
            return;
        };

        let state = state.normalize(self.config.max_recent_actions);
        info!(
            agents = state.agents.len(),
            offsets = state.session_offsets.len(),
            "monitor: checkpoint restored"
        );
        self.agents = state.agents;
        self.offsets = state.session_offsets;
        self.last_poll = state.last_poll;
    }

    /// Start a poll unless one is already running.
    fn start_poll(&mut self) {
        if self.restoring {
            debug!("monitor: poll deferred until the checkpoint restore completes");
            return;
        }
        if self.in_flight {
            self.polls_skipped += 1;
            debug!("monitor: poll skipped, previous poll still running");
            return;
        }
        let Some(cache) = self.cache.take() else {
            warn!("monitor: cache missing outside a poll, rebuilding");
            self.cache = Some(ActivityCache::new());
            return;
        };
        self.in_flight = true;

        let input = ScanInput {
            dir: self.sessions_dir.clone(),
            cache,
            offsets: self.offsets.clone(),
            committed: self.agents.clone(),
            max_actions: self.config.max_recent_actions,
            policy: ReadPolicy {
                attempts: self.config.file_retry_attempts,
                delay: self.config.file_retry_delay,
                timeout: self.config.read_timeout,
            },
            now: SystemTime::now(),
        };
        let hooks = self.config.hooks.clone();
        let find_processes = self.config.process_monitoring;
        let timeout = self.config.read_timeout;
        let done = self.done_tx.clone();

        self.runner.spawn(async move {
            // A panic anywhere in the work unit must still produce a
            // completion, or the monitor would never poll again.
            let work = tokio::spawn(poll_work(input, hooks, find_processes, timeout));
            let outcome = match work.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!(error = %e, "monitor: poll work panicked");
                    PollOutcome::Failed
                }
            };
            let _ = done.send(outcome).await;
        });
    }

    fn complete_poll(&mut self, outcome: PollOutcome) {
        self.in_flight = false;
        self.polls_completed += 1;
        self.last_poll = Some(Utc::now());

        match outcome {
            PollOutcome::Completed {
                scan,
                processes,
                elapsed,
            } => {
                self.files_parsed += scan.files_parsed;
                self.cache_hits += scan.cache_hits;
                self.cache_entries = scan.cache.len();
                self.cache = Some(scan.cache);
                self.offsets = scan.offsets;

                let mut merged: HashMap<String, AgentActivity> = processes
                    .into_iter()
                    .map(|(id, mut a)| {
                        a.normalize(self.config.max_recent_actions);
                        (id, a)
                    })
                    .collect();
                merged.extend(scan.agents);

                debug!(
                    examined = scan.files_examined,
                    parsed = scan.files_parsed,
                    hits = scan.cache_hits,
                    agents = merged.len(),
                    elapsed_ms = elapsed.as_millis() as u64,
                    "monitor: poll complete"
                );

                if merged != self.agents {
                    self.agents = merged;
                    self.persist();
                    self.publish();
                }
            }
            PollOutcome::Failed => {
                self.cache = Some(ActivityCache::new());
                self.cache_entries = 0;
            }
        }

        if !self.waiters.is_empty() {
            let agents = self.sorted_agents();
            for waiter in self.waiters.drain(..) {
                let _ = waiter.send(agents.clone());
            }
        }
    }

    /// Hand the current state to the persistence task.  A state that has
    /// not been picked up yet is replaced.
    fn persist(&self) {
        let state = MonitorState {
            agents: self.agents.clone(),
            session_offsets: self.offsets.clone(),
            last_poll: self.last_poll,
        };
        self.persist_tx.send_replace(Some(state));
    }

    fn publish(&self) {
        let Some(tx) = &self.config.pubsub else {
            return;
        };
        let snapshot = ActivitySnapshot {
            monitor: self.config.name.clone(),
            agents: self.sorted_agents(),
            published_at: Utc::now(),
        };
        if tx.send(snapshot).is_err() {
            trace!("monitor: no snapshot subscribers");
        }
    }

    fn cleanup_cache(&mut self) {
        let Some(cache) = self.cache.as_mut() else {
            debug!("monitor: cache cleanup deferred, poll in flight");
            return;
        };

        let before = cache.len();
        let max = self.config.max_cache_entries;
        if before > max {
            let removed = cache.evict_oldest(max);
            info!(
                before,
                after = cache.len(),
                removed,
                "monitor: cache cleanup evicted oldest entries"
            );
        }

        let tracked = self.offsets.len();
        self.offsets.retain(|path, _| cache.contains(path));
        if self.offsets.len() < tracked {
            debug!(
                pruned = tracked - self.offsets.len(),
                "monitor: pruned offsets of uncached files"
            );
        }
        self.cache_entries = cache.len();
    }

    fn release(&mut self) {
        if let Some(mut cache) = self.cache.take() {
            cache.clear();
        }
        self.cache_entries = 0;
        let agents = self.sorted_agents();
        for waiter in self.waiters.drain(..) {
            let _ = waiter.send(agents.clone());
        }
        info!(monitor = self.config.display_name(), "monitor: stopped");
    }

    fn sorted_agents(&self) -> Vec<AgentActivity> {
        let mut agents: Vec<AgentActivity> = self.agents.values().cloned().collect();
        sort_by_recency(&mut agents);
        agents
    }

    fn stats(&self) -> MonitorStats {
        MonitorStats {
            name: self.config.display_name().to_string(),
            sessions_dir: self.sessions_dir.clone(),
            restoring: self.restoring,
            polling: self.in_flight,
            last_poll: self.last_poll,
            agents: self.agents.len(),
            cache_entries: self.cache.as_ref().map_or(self.cache_entries, |c| c.len()),
            tracked_offsets: self.offsets.len(),
            polls_completed: self.polls_completed,
            polls_skipped: self.polls_skipped,
            files_parsed: self.files_parsed,
            cache_hits: self.cache_hits,
        }
    }
}

/// First tick one period from now.
fn periodic(period: Duration) -> tokio::time::Interval {
    let mut tick = interval_at(Instant::now() + period, period);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tick
}

/// Save checkpoints one at a time, always the most recent one.  Ends once
/// the actor drops its sender and the last state has been written.
async fn persist_checkpoints(
    hooks: Arc<dyn MonitorHooks>,
    file: String,
    mut latest: watch::Receiver<Option<MonitorState>>,
) {
    while latest.changed().await.is_ok() {
        let state = latest.borrow_and_update().clone();
        let Some(state) = state else { continue };

        let hooks = hooks.clone();
        let target = file.clone();
        let save = tokio::spawn(async move { hooks.save_state(&target, &state).await });
        match save.await {
            Ok(Ok(())) => trace!(file = %file, "monitor: checkpoint saved"),
            Ok(Err(e)) => warn!(file = %file, error = %e, "monitor: checkpoint save failed"),
            Err(e) => error!(file = %file, error = %e, "monitor: checkpoint save panicked"),
        }
    }
}

async fn poll_work(
    input: ScanInput,
    hooks: Arc<dyn MonitorHooks>,
    find_processes: bool,
    timeout: Duration,
) -> PollOutcome {
    let started = Instant::now();

    let processes = if find_processes {
        match tokio::time::timeout(timeout, hooks.find_processes(timeout)).await {
            Ok(Ok(found)) => found,
            Ok(Err(e)) => {
                warn!(error = %e, "monitor: process lookup failed");
                HashMap::new()
            }
            Err(_) => {
                warn!(timeout_ms = timeout.as_millis() as u64, "monitor: process lookup timed out");
                HashMap::new()
            }
        }
    } else {
        HashMap::new()
    };

    match tokio::task::spawn_blocking(move || scan::run_scan(input)).await {
        Ok(scan) => PollOutcome::Completed {
            scan,
            processes,
            elapsed: started.elapsed(),
        },
        Err(e) => {
            error!(error = %e, "monitor: transcript scan panicked");
            PollOutcome::Failed
        }
    }
}
