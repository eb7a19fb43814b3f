//! Integration tests for the decision engine, controller adapters, and the
//! orchestrator wired together (`spec.md` §8: testable properties and
//! scenarios A-F).

use std::collections::HashMap;
use std::time::{Duration, Instant};

use chrono::Utc;

use uplinkd_core::decision::{score_member, Engine};
use uplinkd_core::orchestrator::Action;
use uplinkd_core::store::Store;
use uplinkd_core::{Orchestrator, Snapshot};
use uplinkd_types::config::{Config, MemberConfig, ScoringConfig};
use uplinkd_types::member::ClassConfig;
use uplinkd_types::{Event, EventKind, Member, MemberClass, Metrics, Sample, Score};

fn steady_history(member: &str, class: MemberClass, latency: f64, loss: f64, n: i64) -> Vec<Sample> {
    let now = Utc::now();
    (0..n)
        .map(|i| {
            let ts = now + chrono::Duration::seconds(i);
            let mut metrics = Metrics::new(ts);
            metrics.latency_ms = Some(latency);
            metrics.loss_percent = Some(loss);
            Sample {
                timestamp: ts,
                member: member.to_string(),
                class,
                metrics,
                score: Score::unobservable_at(ts),
            }
        })
        .collect()
}

fn wan_member(name: &str, weight: u8) -> Member {
    let mut m = Member::new(name, format!("{name}-if"), MemberClass::Lan);
    m.weight = weight;
    m
}

fn member_with_class(name: &str, weight: u8, class: MemberClass) -> Member {
    let mut m = Member::new(name, format!("{name}-if"), class);
    m.weight = weight;
    m
}

fn absent_sample(member: &str, class: MemberClass, ts: chrono::DateTime<Utc>) -> Sample {
    Sample {
        timestamp: ts,
        member: member.to_string(),
        class,
        metrics: Metrics::new(ts),
        score: Score::unobservable_at(ts),
    }
}

// `spec.md` §4.2 switch algorithm step 1 (hysteresis): a small score
// improvement under `switchMargin` must not produce a switch proposal.
#[test]
fn switch_margin_gates_small_improvement() {
    let cfg = ScoringConfig::default();
    let now = Utc::now();
    let active = wan_member("wan0", 50);
    let candidate = wan_member("wan1", 50);

    let mut histories = HashMap::new();
    histories.insert("wan0".to_string(), steady_history("wan0", MemberClass::Lan, 40.0, 0.5, 10));
    histories.insert("wan1".to_string(), steady_history("wan1", MemberClass::Lan, 38.0, 0.4, 10));

    let mut engine = Engine::new();
    engine.set_active_unconditionally("wan0");
    let members = vec![active, candidate];
    let out = engine.tick(now, &members, &histories, &cfg);
    assert!(out.switch.is_none(), "tiny improvement under switch_margin must not propose a switch");
}

// `spec.md` §8 universal invariant: a proposed switch never names the same
// member as both `from` and `to`.
#[test]
fn switch_proposal_never_has_equal_from_and_to() {
    let mut cfg = ScoringConfig::default();
    cfg.switch_margin = 5.0;
    cfg.stability_checks_required = 1;
    let now = Utc::now();
    let active = wan_member("wan0", 50);
    let candidate = wan_member("wan1", 50);

    let mut histories = HashMap::new();
    histories.insert("wan0".to_string(), steady_history("wan0", MemberClass::Lan, 300.0, 8.0, 10));
    histories.insert("wan1".to_string(), steady_history("wan1", MemberClass::Lan, 20.0, 0.1, 10));

    let mut engine = Engine::new();
    engine.set_active_unconditionally("wan0");
    let members = vec![active, candidate];
    let out = engine.tick(now, &members, &histories, &cfg);
    let decision = out.switch.expect("clear quality gap should propose a switch");
    assert_ne!(decision.from.as_deref(), Some(decision.to.as_str()));
    assert_eq!(decision.to, "wan1");
}

// `spec.md` §4.2: cooldown blocks a second switch immediately after
// `confirm_switch` lands, even when the ranking still favors a third member.
#[test]
fn cooldown_blocks_rapid_reswitch() {
    let mut cfg = ScoringConfig::default();
    cfg.switch_margin = 5.0;
    cfg.stability_checks_required = 1;
    cfg.cooldown_seconds = uplinkd_types::config::PerClass::uniform(600);
    cfg.min_uptime_seconds = uplinkd_types::config::PerClass::uniform(0);

    let now = Utc::now();
    let wan0 = wan_member("wan0", 50);
    let wan1 = wan_member("wan1", 50);
    let members = vec![wan0, wan1];

    let mut histories = HashMap::new();
    histories.insert("wan0".to_string(), steady_history("wan0", MemberClass::Lan, 300.0, 8.0, 10));
    histories.insert("wan1".to_string(), steady_history("wan1", MemberClass::Lan, 20.0, 0.1, 10));

    let mut engine = Engine::new();
    engine.set_active_unconditionally("wan0");
    let first = engine.tick(now, &members, &histories, &cfg).switch.unwrap();
    engine.confirm_switch(now, &first);
    assert_eq!(engine.active(), Some("wan1"));

    // wan0 recovers an instant later; cooldown should still block a flip
    // back within cfg.cooldown_seconds.
    let mut histories2 = HashMap::new();
    histories2.insert("wan0".to_string(), steady_history("wan0", MemberClass::Lan, 10.0, 0.0, 10));
    histories2.insert("wan1".to_string(), steady_history("wan1", MemberClass::Lan, 20.0, 0.1, 10));
    let soon = now + chrono::Duration::seconds(5);
    let out = engine.tick(soon, &members, &histories2, &cfg);
    assert!(out.switch.is_none(), "cooldown must block an immediate re-switch");
}

// `spec.md` §4.2: predictive failover fires on a monotonic degradation trend
// before the active member actually breaches the fail threshold.
#[test]
fn predictive_failover_triggers_on_degrading_trend() {
    let mut cfg = ScoringConfig::default();
    cfg.predictive_trend_samples = 4;
    cfg.predictive_threshold = 90.0;
    cfg.predictive_margin = 1.0;
    cfg.switch_margin = 99.0; // force the non-predictive path to never fire
    cfg.stability_checks_required = 0;

    let now = Utc::now();
    let active_name = "wan0";
    let candidate_name = "wan1";
    let members = vec![wan_member(active_name, 50), wan_member(candidate_name, 50)];

    // Rising latency each sample: a monotonic degradation trend.
    let base = now - chrono::Duration::seconds(9);
    let degrading: Vec<Sample> = (0..10)
        .map(|i| {
            let ts = base + chrono::Duration::seconds(i);
            let mut metrics = Metrics::new(ts);
            metrics.latency_ms = Some(20.0 + i as f64 * 15.0);
            metrics.loss_percent = Some(0.1);
            Sample {
                timestamp: ts,
                member: active_name.to_string(),
                class: MemberClass::Lan,
                metrics,
                score: Score::unobservable_at(ts),
            }
        })
        .collect();

    let mut histories = HashMap::new();
    histories.insert(active_name.to_string(), degrading);
    histories.insert(candidate_name.to_string(), steady_history(candidate_name, MemberClass::Lan, 15.0, 0.0, 10));

    let mut engine = Engine::new();
    engine.set_active_unconditionally(active_name);
    let out = engine.tick(now, &members, &histories, &cfg);
    let decision = out.switch.expect("degrading trend under threshold should arm predictive failover");
    assert!(decision.predictive);
    assert_eq!(decision.to, candidate_name);
}

// `spec.md` §8 boundary: zero eligible members clears the active pointer
// without touching the controller.
#[test]
fn clear_active_handles_zero_eligible_boundary() {
    let mut engine = Engine::new();
    engine.set_active_unconditionally("wan0");
    assert_eq!(engine.active(), Some("wan0"));
    engine.clear_active();
    assert_eq!(engine.active(), None);
}

// `spec.md` §8 boundary: a single eligible member never triggers a switch
// (there is nothing to switch to).
#[test]
fn single_eligible_member_never_switches() {
    let cfg = ScoringConfig::default();
    let now = Utc::now();
    let member = wan_member("wan0", 50);
    let mut histories = HashMap::new();
    histories.insert("wan0".to_string(), steady_history("wan0", MemberClass::Lan, 20.0, 0.1, 10));
    let mut engine = Engine::new();
    engine.set_active_unconditionally("wan0");
    let out = engine.tick(now, &[member], &histories, &cfg);
    assert!(out.switch.is_none());
}

// `score_member` must never return a value outside [0, 100] for the
// observable case (`spec.md` §8: "a score is always in range 0-100 or
// marked unobservable").
#[test]
fn scores_stay_within_bounds() {
    let cfg = ScoringConfig::default();
    let member = wan_member("wan0", 50);
    let now = Utc::now();
    let history = steady_history("wan0", MemberClass::Lan, 5_000.0, 100.0, 5);
    let score = score_member(&member, &history, &cfg, now);
    assert!(!score.unobservable);
    assert!(score.final_score >= 0.0 && score.final_score <= 100.0, "got {}", score.final_score);
}

// `spec.md` §4.2/§9 open question 2: `minUptime`/`cooldown` must key off the
// *active* member's class, looked up against the full registry rather than
// the observability-filtered candidate list — the active member is exactly
// the one that may be `unobservable` mid-outage, which is the scenario this
// gate exists to protect.
#[test]
fn cooldown_and_min_uptime_key_off_active_members_class_not_candidates() {
    let mut cfg = ScoringConfig::default();
    cfg.switch_margin = 5.0;
    cfg.stability_checks_required = 0;
    cfg.min_uptime_seconds = uplinkd_types::config::PerClass {
        starlink: 1_000,
        cellular: 0,
        wifi: 0,
        lan: 0,
        generic: 0,
    };
    cfg.cooldown_seconds = uplinkd_types::config::PerClass {
        starlink: 1_000,
        cellular: 0,
        wifi: 0,
        lan: 0,
        generic: 0,
    };

    let now = Utc::now();
    let sat = member_with_class("sat", 100, MemberClass::Starlink);
    let cell = member_with_class("cell", 50, MemberClass::Cellular);
    let members = vec![sat, cell];

    // `sat` is outaged (fully absent, so `unobservable` and excluded from
    // `candidates`); `cell` is healthy and clearly better.
    let mut histories = HashMap::new();
    histories.insert(
        "sat".to_string(),
        (0..10).map(|i| absent_sample("sat", MemberClass::Starlink, now + chrono::Duration::seconds(i))).collect(),
    );
    histories.insert("cell".to_string(), steady_history("cell", MemberClass::Cellular, 20.0, 0.1, 10));

    let mut engine = Engine::new();
    engine.set_active_unconditionally("sat");
    // `sat` became active, and a switch last landed, 200s ago — well inside
    // `minUptime`/`cooldown` for starlink (1000s) but well outside for every
    // other class (0s), so the gate's outcome pins down which class it used.
    let switched_in_at = now - chrono::Duration::seconds(200);
    engine.confirm_switch(
        switched_in_at,
        &uplinkd_core::decision::SwitchDecision {
            from: None,
            to: "sat".to_string(),
            reason: "test setup".to_string(),
            predictive: false,
            failback: false,
        },
    );

    let out = engine.tick(now, &members, &histories, &cfg);
    assert!(
        out.switch.is_none(),
        "switch away from an outaged starlink active member must still honor starlink's own \
         minUptime/cooldown, not cellular's (candidate) or generic's (observability-filtered fallback)"
    );
}

// `spec.md` §8 Scenarios B/C, end to end against the decision engine: a
// Starlink active member degrades to `failed` (emitting `memberDown`),
// recovers, and — after `stabilityChecksRequired` consecutive good samples —
// reclaims the active slot via a `failback` decision with `reason: recovery`,
// emitting `recovery` on the member's own state transition.
#[test]
fn starlink_active_member_outage_then_recovery_drives_state_events_and_failback() {
    let mut cfg = ScoringConfig::default();
    cfg.switch_margin = 5.0;
    cfg.outage_threshold = 2;
    cfg.stability_checks_required = 3;
    cfg.min_uptime_seconds = uplinkd_types::config::PerClass::uniform(0);
    cfg.cooldown_seconds = uplinkd_types::config::PerClass::uniform(0);

    let sat = member_with_class("sat", 100, MemberClass::Starlink);
    let cell = member_with_class("cell", 50, MemberClass::Cellular);
    let members = vec![sat, cell];
    let cell_history = |upto: i64| -> Vec<Sample> { steady_history("cell", MemberClass::Cellular, 90.0, 1.0, upto) };

    let mut engine = Engine::new();
    engine.set_active_unconditionally("sat");
    let base = Utc::now();

    // Tick 0: steady state, both healthy, sat clearly ahead.
    let mut histories = HashMap::new();
    histories.insert("sat".to_string(), steady_history("sat", MemberClass::Starlink, 40.0, 0.1, 5));
    histories.insert("cell".to_string(), cell_history(5));
    let out = engine.tick(base, &members, &histories, &cfg);
    assert!(out.switch.is_none());

    // Ticks 1-2: sat goes fully absent for `outage_threshold` (2) ticks,
    // transitioning healthy -> degrading -> failed. The second tick must
    // emit `memberDown`.
    let mut member_down_seen = false;
    for i in 1..=2 {
        let ts = base + chrono::Duration::seconds(i);
        let mut histories = HashMap::new();
        histories.insert("sat".to_string(), vec![absent_sample("sat", MemberClass::Starlink, ts)]);
        histories.insert("cell".to_string(), cell_history(1));
        let out = engine.tick(ts, &members, &histories, &cfg);
        if out.events.iter().any(|e| e.kind == EventKind::MemberDown && e.from.as_deref() == Some("sat")) {
            member_down_seen = true;
        }
        // Mirrors what the orchestrator's `apply_switch` does once the
        // controller confirms the command — `tick` itself never moves the
        // active pointer (`spec.md` §5).
        if let Some(decision) = out.switch {
            engine.confirm_switch(ts, &decision);
        }
    }
    assert!(member_down_seen, "sat reaching outageThreshold consecutive absences must emit memberDown");
    assert_eq!(engine.state_of("sat").unwrap().status, uplinkd_types::MemberStatus::Failed);
    // cell took over while sat was down (no cooldown/min-uptime configured).
    assert_eq!(engine.active(), Some("cell"));

    // Ticks 3-5: sat recovers with good samples. `stabilityChecksRequired`
    // (3) consecutive good samples are required before sat becomes `healthy`
    // again and reclaims active via a `failback`-tagged switch.
    let mut recovery_seen = false;
    let mut failback_decision = None;
    for i in 3..=5 {
        let ts = base + chrono::Duration::seconds(i);
        let mut histories = HashMap::new();
        histories.insert("sat".to_string(), vec![sample_with("sat", MemberClass::Starlink, 35.0, 0.0, ts)]);
        histories.insert("cell".to_string(), cell_history(1));
        let out = engine.tick(ts, &members, &histories, &cfg);
        if out.events.iter().any(|e| e.kind == EventKind::Recovery && e.to.as_deref() == Some("sat")) {
            recovery_seen = true;
        }
        if let Some(decision) = out.switch {
            failback_decision = Some(decision);
        }
    }
    assert!(recovery_seen, "completing stabilityChecksRequired good samples must emit recovery for sat");
    let decision = failback_decision.expect("sat's reclaiming the active slot should propose a switch");
    assert!(decision.failback, "switching back to the higher-weight recovered member must be tagged failback");
    assert_eq!(decision.to, "sat");
    assert_eq!(decision.reason, "recovery");
}

fn sample_with(member: &str, class: MemberClass, latency: f64, loss: f64, ts: chrono::DateTime<Utc>) -> Sample {
    let mut metrics = Metrics::new(ts);
    metrics.latency_ms = Some(latency);
    metrics.loss_percent = Some(loss);
    Sample {
        timestamp: ts,
        member: member.to_string(),
        class,
        metrics,
        score: Score::unobservable_at(ts),
    }
}

// `spec.md` §8 Scenario F: over sustained ingestion the store must stay
// within `maxRAMMB` (oldest samples evicted first), while events are
// preserved unless they alone exceed the ceiling.
#[test]
fn memory_ceiling_is_enforced_with_events_preserved() {
    let store = Store::new(1, 1024); // 1 MiB ceiling
    let now = Utc::now();

    for i in 0..20_000i64 {
        let member = if i % 2 == 0 { "sat" } else { "cell" };
        let ts = now + chrono::Duration::milliseconds(i);
        store.append_sample(sample_with(member, MemberClass::Starlink, 30.0, 0.2, ts));
    }
    for i in 0..50i64 {
        store.append_event(Event::member_up(now + chrono::Duration::seconds(i), "sat", "test"));
    }

    let stats = store.stats();
    assert!(
        stats.memory_bytes <= 1024 * 1024 + 4096,
        "store must stay within maxRAMMB plus at most one record's worth, got {}",
        stats.memory_bytes
    );
    assert_eq!(stats.event_count, 50, "events must be preserved while only samples are over budget");
    assert!(stats.sample_count < 20_000, "oldest samples must have been evicted to respect the ceiling");
}

fn lan_member_config(name: &str, weight: u8) -> MemberConfig {
    MemberConfig {
        name: name.to_string(),
        interface: format!("{name}-if"),
        class: MemberClass::Lan,
        weight,
        eligible: true,
        detect: None,
        policy: None,
        class_config: ClassConfig::Lan(Default::default()),
        extra_config: HashMap::new(),
    }
}

fn wait_until(mut check: impl FnMut() -> bool, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if check() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
}

// `spec.md` §6/§8: an operator-requested failover goes through the
// controller and lands as a `switch` event with the active pointer moved.
#[test]
fn operator_failover_action_moves_active_member() {
    let mut cfg = Config::default();
    cfg.main.use_mwan3 = false;
    cfg.main.dry_run = false;
    cfg.main.decision_interval_ms = 10_000; // keep the background tick from racing the action
    cfg.members.push(lan_member_config("wan0", 80));
    cfg.members.push(lan_member_config("wan1", 50));

    let mut orch = Orchestrator::spawn(cfg).unwrap();
    wait_until(|| orch.status().active_member.is_some(), Duration::from_secs(2));

    let since = Utc::now() - chrono::Duration::seconds(5);
    orch.action(Action::Failover("wan1".to_string())).unwrap();

    let moved = wait_until(|| orch.status().active_member.as_deref() == Some("wan1"), Duration::from_secs(2));
    assert!(moved, "operator failover should move the active member to wan1");

    let events = orch.events(since, 10);
    assert!(events.iter().any(|e| e.to.as_deref() == Some("wan1")), "expected a switch event naming wan1");

    orch.shutdown();
}

// `spec.md` §8 property 8: no switch occurs while dryRun=true, but the
// switch event is still emitted.
#[test]
fn dry_run_emits_event_without_moving_active() {
    let mut cfg = Config::default();
    cfg.main.use_mwan3 = false;
    cfg.main.dry_run = true;
    cfg.main.decision_interval_ms = 10_000;
    cfg.members.push(lan_member_config("wan0", 80));
    cfg.members.push(lan_member_config("wan1", 50));

    let mut orch = Orchestrator::spawn(cfg).unwrap();
    wait_until(|| orch.status().active_member.is_some(), Duration::from_secs(2));
    let initial_active = orch.status().active_member;

    let since = Utc::now() - chrono::Duration::seconds(5);
    orch.action(Action::Failover("wan1".to_string())).unwrap();

    let event_seen = wait_until(
        || orch.events(since, 10).iter().any(|e| e.to.as_deref() == Some("wan1")),
        Duration::from_secs(2),
    );
    assert!(event_seen, "dry-run should still emit a switch event");
    assert_eq!(orch.status().active_member, initial_active, "dry-run must not move the active pointer");

    orch.shutdown();
}

// Config reload round-trip (`spec.md` §4.6, §8): a no-op reload (same
// members) must not disturb the active member.
#[test]
fn config_reload_with_same_members_is_a_no_op() {
    let mut cfg = Config::default();
    cfg.main.use_mwan3 = false;
    cfg.main.decision_interval_ms = 10_000;
    cfg.members.push(lan_member_config("wan0", 80));

    let orch = Orchestrator::spawn(cfg.clone()).unwrap();
    wait_until(|| orch.status().active_member.is_some(), Duration::from_secs(2));
    let before: Snapshot = orch.status();

    orch.reload(cfg).unwrap();
    std::thread::sleep(Duration::from_millis(100));
    let after = orch.status();
    assert_eq!(before.active_member, after.active_member);
    assert_eq!(before.members.len(), after.members.len());
}
