//! Orchestrator (`spec.md` §4.6): owns the tick, sequences the collector
//! framework, decision engine, controller, and telemetry store, and handles
//! lifecycle (init/run/reload/shutdown).
//!
//! Grounded on `strata-bonding::runtime::BondingRuntime`: a background OS
//! thread owns all mutable state; callers talk to it only through a bounded
//! `crossbeam_channel` control plane and an `Arc<RwLock<Snapshot>>` read
//! view, never by reaching into the thread directly.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use uplinkd_types::config::ConfigError;
use uplinkd_types::{Config, Event, Member, MemberState, Metrics, Sample, Score};

use crate::collector::CollectorRegistry;
use crate::controller::mock::MockAdapter;
use crate::controller::mwan3::Mwan3Adapter;
use crate::controller::{ControllerAdapter, ControllerError, DryRunAdapter};
use crate::decision::{Engine, SwitchDecision};
use crate::discovery::{self, Registry};
use crate::store::Store;

/// Consecutive controller failures before `componentHealth.controller`
/// degrades (`spec.md` §8 scenario E: "if the condition persists for
/// configured attempts").
const CONTROLLER_DEGRADED_AFTER_FAILURES: u32 = 3;

/// Ticks between heartbeat log lines. Heartbeat is a liveness signal, not a
/// stored `Event` — `EventKind` (`spec.md` §3) is a closed domain-event
/// enumeration and has no heartbeat member.
const HEARTBEAT_EVERY_N_TICKS: u64 = 20;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("configuration invalid: {0}")]
    Config(#[from] ConfigError),
    #[error("controller adapter rejected at startup: {0}")]
    ControllerUnsupported(String),
    #[error("orchestrator has already shut down")]
    ShutDown,
}

/// Operator-initiated commands (`spec.md` §6: `Action(cmd, params)`).
#[derive(Debug, Clone)]
pub enum Action {
    /// Forces a switch to `target`, bypassing hysteresis (still goes through
    /// the controller's verify-or-rollback protocol).
    Failover(String),
    /// Re-runs ranking unconditionally on the next tick.
    Restore,
    /// Forces an out-of-band collection pass on the next tick.
    Recheck,
    /// Signals that configuration should be re-read from disk; the actual
    /// read is the daemon binary's job, which then sends `reload`.
    ReloadConfig,
    SetLogLevel(String),
}

enum ControlMessage {
    Reload(Config),
    Action(Action),
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DaemonState {
    Starting,
    Running,
    Degraded,
    ShuttingDown,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentStatus {
    Ok,
    Degraded,
}

#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
pub struct ComponentHealth {
    pub collectors: ComponentStatus,
    pub controller: ComponentStatus,
    pub store: ComponentStatus,
}

impl Default for ComponentHealth {
    fn default() -> Self {
        ComponentHealth {
            collectors: ComponentStatus::Ok,
            controller: ComponentStatus::Ok,
            store: ComponentStatus::Ok,
        }
    }
}

/// One member as exposed by the query interface (`spec.md` §6: `Members()`).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct MemberView {
    pub definition: Member,
    pub latest_metrics: Option<Metrics>,
    pub latest_score: Option<Score>,
    pub state: Option<MemberState>,
}

/// `spec.md` §6: `Status()` → `{daemonState, activeMemberName, members[],
/// uptime, componentHealth}`.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Snapshot {
    pub daemon_state: DaemonState,
    pub active_member: Option<String>,
    pub members: Vec<MemberView>,
    pub started_at: DateTime<Utc>,
    pub component_health: ComponentHealth,
}

impl Snapshot {
    pub fn uptime(&self) -> chrono::Duration {
        Utc::now() - self.started_at
    }
}

fn member_from_config(mc: &uplinkd_types::config::MemberConfig) -> Member {
    let now = Utc::now();
    Member {
        name: mc.name.clone(),
        interface: mc.interface.clone(),
        class: mc.class,
        weight: mc.weight,
        eligible: mc.eligible,
        class_config: mc.class_config.clone(),
        detect: mc.detect.clone(),
        policy: mc.policy.clone(),
        extra_config: mc.extra_config.clone(),
        created_at: now,
        last_seen: now,
    }
}

/// Lets `Action::SetLogLevel` (`spec.md` §6) reach back into whatever
/// tracing filter the process set up at startup, without `uplinkd-core`
/// itself depending on `tracing-subscriber`. `uplinkd-daemon` supplies the
/// real implementation, wrapping a `tracing_subscriber::reload::Handle`.
pub trait LogLevelController: Send + Sync {
    fn set_level(&self, level: &str);
}

fn build_controller(cfg: &Config) -> Box<dyn ControllerAdapter> {
    match (cfg.main.use_mwan3, cfg.main.dry_run) {
        (true, true) => Box::new(DryRunAdapter::new(Mwan3Adapter::default())),
        (true, false) => Box::new(Mwan3Adapter::default()),
        (false, true) => Box::new(DryRunAdapter::new(MockAdapter::new())),
        (false, false) => Box::new(MockAdapter::new()),
    }
}

/// Thread-safe handle to the orchestrator's background worker.
///
/// Dropping the handle triggers a graceful shutdown (`spec.md` §4.6:
/// "shutdown: cancel in-flight work, flush, return").
pub struct Orchestrator {
    control_tx: Sender<ControlMessage>,
    snapshot: Arc<RwLock<Snapshot>>,
    store: Arc<Store>,
    handle: Option<thread::JoinHandle<i32>>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator").finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Runs the full init lifecycle synchronously (`spec.md` §4.6: "load
    /// configuration → build store → build collectors → build decision
    /// engine → build controller → discover members"), then starts the tick
    /// loop on a background thread.
    pub fn spawn(config: Config) -> Result<Self, OrchestratorError> {
        Self::spawn_with_log_controller(config, None)
    }

    /// Same as [`Orchestrator::spawn`], but wires `log_controller` so
    /// `Action::SetLogLevel` actually reaches the process's tracing filter.
    pub fn spawn_with_log_controller(
        config: Config,
        log_controller: Option<Arc<dyn LogLevelController>>,
    ) -> Result<Self, OrchestratorError> {
        config.validate()?;

        let controller = build_controller(&config);
        if let Err(ControllerError::Unsupported(msg)) = controller.get_current_primary() {
            return Err(OrchestratorError::ControllerUnsupported(msg));
        }

        let store = Arc::new(Store::new(config.telemetry.max_ram_mb, 4096));
        let started_at = Utc::now();
        let snapshot = Arc::new(RwLock::new(Snapshot {
            daemon_state: DaemonState::Starting,
            active_member: None,
            members: Vec::new(),
            started_at,
            component_health: ComponentHealth::default(),
        }));

        let (control_tx, control_rx) = bounded(64);

        let thread_store = store.clone();
        let thread_snapshot = snapshot.clone();
        let handle = thread::Builder::new()
            .name("uplinkd-orchestrator".into())
            .spawn(move || run_loop(config, controller, thread_store, thread_snapshot, control_rx, log_controller))
            .expect("failed to spawn orchestrator thread");

        Ok(Orchestrator {
            control_tx,
            snapshot,
            store,
            handle: Some(handle),
        })
    }

    pub fn status(&self) -> Snapshot {
        self.snapshot.read().unwrap().clone()
    }

    pub fn members(&self) -> Vec<MemberView> {
        self.snapshot.read().unwrap().members.clone()
    }

    /// `spec.md` §6: `Metrics(memberName, since, limit)`.
    pub fn metrics(&self, member: &str, since: DateTime<Utc>, limit: usize) -> Vec<Sample> {
        let mut samples = self.store.get_samples(member, since);
        if samples.len() > limit {
            samples = samples.split_off(samples.len() - limit);
        }
        samples
    }

    /// `spec.md` §6: `Events(since, limit)`.
    pub fn events(&self, since: DateTime<Utc>, limit: usize) -> Vec<Event> {
        self.store.get_events(since, limit)
    }

    pub fn action(&self, action: Action) -> Result<(), OrchestratorError> {
        self.control_tx
            .send(ControlMessage::Action(action))
            .map_err(|_| OrchestratorError::ShutDown)
    }

    /// Hands a freshly-loaded configuration to the worker thread; applied
    /// atomically between ticks (`spec.md` §4.6).
    pub fn reload(&self, config: Config) -> Result<(), OrchestratorError> {
        config.validate()?;
        self.control_tx
            .send(ControlMessage::Reload(config))
            .map_err(|_| OrchestratorError::ShutDown)
    }

    /// Idempotent graceful shutdown; returns the process exit code
    /// (`spec.md` §6).
    pub fn shutdown(&mut self) -> i32 {
        let _ = self.control_tx.send(ControlMessage::Shutdown);
        match self.handle.take() {
            Some(handle) => handle.join().unwrap_or(2),
            None => 0,
        }
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn update_snapshot(
    snapshot: &RwLock<Snapshot>,
    state: DaemonState,
    engine: &Engine,
    registry: &Registry,
    store: &Store,
    health: ComponentHealth,
) {
    let members = registry
        .members()
        .into_iter()
        .map(|m| {
            let history = store.get_samples(&m.name, Utc::now() - chrono::Duration::hours(1));
            let latest = history.last();
            MemberView {
                latest_metrics: latest.map(|s| s.metrics.clone()),
                latest_score: latest.map(|s| s.score.clone()),
                state: engine.state_of(&m.name).cloned(),
                definition: m,
            }
        })
        .collect();

    let mut snap = snapshot.write().unwrap();
    snap.daemon_state = state;
    snap.active_member = engine.active().map(|s| s.to_string());
    snap.members = members;
    snap.component_health = health;
}

/// Builds the per-member history the decision engine scores over: the
/// store's retained samples plus a transient sample carrying this tick's
/// freshly collected metrics, scored but never itself persisted. Resolves
/// the chicken-and-egg problem of a `Sample` requiring both `Metrics` and a
/// `Score` computed from history that includes that very sample — the
/// engine scores this extended view, and the orchestrator persists exactly
/// one real `Sample` afterward using the resulting `Score`.
fn extend_histories(
    store: &Store,
    members: &[Member],
    collected: &HashMap<String, Metrics>,
    window_seconds: u64,
    now: DateTime<Utc>,
) -> HashMap<String, Vec<Sample>> {
    let since = now - chrono::Duration::seconds(window_seconds as i64);
    let mut histories = HashMap::new();
    for member in members {
        let mut history = store.get_samples(&member.name, since);
        if let Some(metrics) = collected.get(&member.name) {
            history.push(Sample {
                timestamp: now,
                member: member.name.clone(),
                class: member.class,
                metrics: metrics.clone(),
                score: Score::unobservable_at(now),
            });
        }
        histories.insert(member.name.clone(), history);
    }
    histories
}

/// Dispatches one collector call per eligible member, bounded to
/// `max_concurrent` in-flight calls at a time (`spec.md` §4.6 step 2), via
/// `std::thread::scope` rather than an async runtime (`spec.md` §5:
/// "parallel threads with a cooperative tick").
fn collect_all(
    collectors: &CollectorRegistry,
    members: &[Member],
    per_member_budget: Duration,
    max_concurrent: usize,
) -> HashMap<String, Metrics> {
    let mut results = HashMap::new();
    let eligible: Vec<&Member> = members.iter().filter(|m| m.eligible).collect();
    for chunk in eligible.chunks(max_concurrent.max(1)) {
        thread::scope(|scope| {
            let handles: Vec<_> = chunk
                .iter()
                .map(|member| {
                    let deadline = Instant::now() + per_member_budget;
                    scope.spawn(move || {
                        let metrics = match collectors.collect(deadline, member) {
                            Ok(metrics) => metrics,
                            Err(e) => {
                                warn!(member = %member.name, error = %e, "collection failed");
                                Metrics::degraded(Utc::now(), e.kind.to_string())
                            }
                        };
                        (member.name.clone(), metrics)
                    })
                })
                .collect();
            for handle in handles {
                if let Ok((name, metrics)) = handle.join() {
                    results.insert(name, metrics);
                }
            }
        });
    }
    results
}

#[allow(clippy::too_many_arguments)]
fn apply_switch(
    decision: SwitchDecision,
    now: DateTime<Utc>,
    dry_run: bool,
    controller_deadline_ms: u64,
    registry: &Registry,
    engine: &mut Engine,
    controller: &dyn ControllerAdapter,
    store: &Store,
    failure_streak: &mut u32,
) {
    let Some(target) = registry.get(&decision.to).cloned() else {
        error!(member = %decision.to, "switch target vanished from registry before controller call");
        return;
    };
    let deadline = Instant::now() + Duration::from_millis(controller_deadline_ms);
    match controller.set_primary(deadline, &target) {
        Ok(()) => {
            *failure_streak = 0;
            // Dry-run suppresses step 3 (command execution) but the adapter
            // still returns Ok; we must not move the active pointer on a
            // no-op (`spec.md` §8: "no switch occurs while dryRun=true, but
            // switch events are still emitted").
            if !dry_run {
                engine.confirm_switch(now, &decision);
            }
            let from = decision.from.clone().unwrap_or_default();
            let event = if decision.predictive {
                Event::predictive(now, from, decision.to.clone(), decision.reason.clone())
            } else if decision.failback {
                Event::failback(now, from, decision.to.clone(), decision.reason.clone())
            } else {
                Event::switch(now, from, decision.to.clone(), decision.reason.clone())
            };
            store.append_event(event);
        }
        Err(e) => {
            *failure_streak += 1;
            error!(error = %e, from = ?decision.from, to = %decision.to, "controller failed to apply switch");
            store.append_event(Event::critical_error(
                now,
                format!("controller error applying switch to {}: {e}", decision.to),
            ));
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn handle_action(
    action: Action,
    cfg: &Config,
    registry: &Registry,
    engine: &mut Engine,
    controller: &dyn ControllerAdapter,
    store: &Store,
    failure_streak: &mut u32,
    log_controller: Option<&Arc<dyn LogLevelController>>,
) {
    let now = Utc::now();
    match action {
        Action::Failover(target_name) => {
            let Some(target) = registry.get(&target_name) else {
                warn!(target = %target_name, "failover action: target not in registry");
                return;
            };
            if !target.eligible {
                warn!(target = %target_name, "failover action: target is not eligible");
                return;
            }
            let decision = SwitchDecision {
                from: engine.active().map(|s| s.to_string()),
                to: target_name,
                reason: "operator-requested failover".to_string(),
                predictive: false,
                failback: false,
            };
            apply_switch(
                decision,
                now,
                cfg.main.dry_run,
                cfg.main.per_member_collection_budget_ms,
                registry,
                engine,
                controller,
                store,
                failure_streak,
            );
        }
        Action::Restore => info!("restore requested; next tick re-ranks unconditionally"),
        Action::Recheck => info!("recheck requested; next tick runs on schedule"),
        Action::ReloadConfig => {
            warn!("reloadConfig action received — re-reading configuration from disk is the daemon's responsibility; call reload() with the result")
        }
        Action::SetLogLevel(level) => {
            info!(level = %level, "log level change requested");
            match log_controller {
                Some(ctrl) => ctrl.set_level(&level),
                None => warn!("no log level controller wired; ignoring"),
            }
        }
    }
}

fn reconcile_registry(registry: &mut Registry, engine: &mut Engine, old: &Config, new: &Config) {
    let old_names: HashSet<&str> = old.members.iter().map(|m| m.name.as_str()).collect();
    let new_names: HashSet<&str> = new.members.iter().map(|m| m.name.as_str()).collect();
    for removed in old_names.difference(&new_names) {
        registry.retire(removed);
        engine.retire(removed);
    }
    for mc in &new.members {
        registry.insert(member_from_config(mc));
    }
}

fn run_one_tick(
    now: DateTime<Utc>,
    cfg: &Config,
    collectors: &CollectorRegistry,
    store: &Store,
    registry: &Registry,
    engine: &mut Engine,
    controller: &dyn ControllerAdapter,
    failure_streak: &mut u32,
) {
    let members = registry.members();

    let per_member_budget = Duration::from_millis(cfg.main.per_member_collection_budget_ms);
    let collected = collect_all(collectors, &members, per_member_budget, cfg.main.max_concurrent_collections);

    let histories = extend_histories(store, &members, &collected, cfg.scoring.history_window_seconds, now);

    let output = engine.tick(now, &members, &histories, &cfg.scoring);

    for member in &members {
        let (Some(metrics), Some(score)) = (collected.get(&member.name), output.scores.get(&member.name)) else {
            continue;
        };
        store.append_sample(Sample {
            timestamp: now,
            member: member.name.clone(),
            class: member.class,
            metrics: metrics.clone(),
            score: score.clone(),
        });
    }

    for event in output.events {
        store.append_event(event);
    }

    let eligible_count = members.iter().filter(|m| m.eligible).count();
    if eligible_count == 0 && engine.active().is_some() {
        engine.clear_active();
        store.append_event(Event::critical_error(now, "zero eligible members; active cleared"));
    }

    if let Some(decision) = output.switch {
        apply_switch(
            decision,
            now,
            cfg.main.dry_run,
            cfg.main.per_member_collection_budget_ms,
            registry,
            engine,
            controller,
            store,
            failure_streak,
        );
    }
}

fn run_loop(
    mut cfg: Config,
    mut controller: Box<dyn ControllerAdapter>,
    store: Arc<Store>,
    snapshot: Arc<RwLock<Snapshot>>,
    control_rx: Receiver<ControlMessage>,
    log_controller: Option<Arc<dyn LogLevelController>>,
) -> i32 {
    let collectors = CollectorRegistry::with_builtins();
    let mut registry = Registry::new();
    for mc in &cfg.members {
        registry.insert(member_from_config(mc));
    }
    let discovered = discovery::enumerate_interfaces();
    registry.merge(&discovered, cfg.main.discovery_miss_retirement);

    let mut engine = Engine::new();
    if let Some(first) = registry
        .members()
        .iter()
        .filter(|m| m.eligible)
        .max_by_key(|m| m.weight)
    {
        // Adopts an initial primary without going through the switch
        // protocol — there is no "previous" primary to verify against on a
        // cold start (`spec.md` §8: "active always names a member that
        // exists in the registry OR is null during the first tick").
        engine.set_active_unconditionally(first.name.clone());
    }

    let mut failure_streak: u32 = 0;
    let mut tick_count: u64 = 0;
    let tick_interval = Duration::from_millis(cfg.main.decision_interval_ms.max(1));

    update_snapshot(&snapshot, DaemonState::Running, &engine, &registry, &store, ComponentHealth::default());

    loop {
        match control_rx.recv_timeout(tick_interval) {
            Ok(ControlMessage::Shutdown) => break,
            Ok(ControlMessage::Reload(new_cfg)) => {
                reconcile_registry(&mut registry, &mut engine, &cfg, &new_cfg);
                cfg = new_cfg;
                controller = build_controller(&cfg);
                info!("configuration reloaded");
                continue;
            }
            Ok(ControlMessage::Action(action)) => {
                handle_action(
                    action,
                    &cfg,
                    &registry,
                    &mut engine,
                    controller.as_ref(),
                    &store,
                    &mut failure_streak,
                    log_controller.as_ref(),
                );
                continue;
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }

        if !cfg.main.enable {
            continue;
        }

        tick_count += 1;
        let now = Utc::now();
        let tick_started = quanta::Instant::now();
        run_one_tick(
            now,
            &cfg,
            &collectors,
            &store,
            &registry,
            &mut engine,
            controller.as_ref(),
            &mut failure_streak,
        );
        debug!(tick = tick_count, elapsed_ms = tick_started.elapsed().as_secs_f64() * 1000.0, "tick completed");

        if tick_count % HEARTBEAT_EVERY_N_TICKS == 0 {
            info!(tick = tick_count, active = ?engine.active(), "heartbeat");
        }

        let health = ComponentHealth {
            collectors: ComponentStatus::Ok,
            controller: if failure_streak >= CONTROLLER_DEGRADED_AFTER_FAILURES {
                ComponentStatus::Degraded
            } else {
                ComponentStatus::Ok
            },
            store: ComponentStatus::Ok,
        };
        let state = if health.controller == ComponentStatus::Degraded {
            DaemonState::Degraded
        } else {
            DaemonState::Running
        };
        update_snapshot(&snapshot, state, &engine, &registry, &store, health);
    }

    update_snapshot(&snapshot, DaemonState::Stopped, &engine, &registry, &store, ComponentHealth::default());
    0
}
