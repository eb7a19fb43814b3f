//! Decision engine (`spec.md` §4.2): scoring, hysteresis-gated switching,
//! predictive failover, and the per-member health state machine.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use uplinkd_types::config::{ScoreWeights, ScoringConfig, SubscoreConfig};
use uplinkd_types::member::MemberClass;
use uplinkd_types::metrics::Metrics;
use uplinkd_types::sample::Sample;
use uplinkd_types::state::{MemberState, MemberStatus};
use uplinkd_types::{Event, Member, Score};

/// Everything the engine produced for one tick.
#[derive(Debug, Clone, Default)]
pub struct DecisionOutput {
    pub scores: HashMap<String, Score>,
    pub switch: Option<SwitchDecision>,
    pub events: Vec<Event>,
}

#[derive(Debug, Clone)]
pub struct SwitchDecision {
    pub from: Option<String>,
    pub to: String,
    pub reason: String,
    pub predictive: bool,
    /// `to` outranks `from` by weight — a return to a preferred member that
    /// an earlier outage displaced (`spec.md` §8 Scenario C), reported as a
    /// `failback` event rather than a plain `switch`.
    pub failback: bool,
}

/// Owns the per-member runtime state the scoring/state-machine steps
/// mutate tick over tick. Not `Send`-shared directly; the orchestrator
/// holds one `Engine` on its own thread (`spec.md` §5).
pub struct Engine {
    states: HashMap<String, MemberState>,
    active: Option<String>,
    last_switch_at: Option<DateTime<Utc>>,
}

impl Engine {
    pub fn new() -> Self {
        Engine {
            states: HashMap::new(),
            active: None,
            last_switch_at: None,
        }
    }

    pub fn active(&self) -> Option<&str> {
        self.active.as_deref()
    }

    /// Adopts `name` as active without going through the switch protocol —
    /// used once at startup after Discovery picks an initial primary.
    pub fn set_active_unconditionally(&mut self, name: impl Into<String>) {
        self.active = Some(name.into());
    }

    fn state_mut(&mut self, name: &str, first_sample_healthy: bool) -> &mut MemberState {
        self.states
            .entry(name.to_string())
            .or_insert_with(|| MemberState::initial(first_sample_healthy))
    }

    pub fn state_of(&self, name: &str) -> Option<&MemberState> {
        self.states.get(name)
    }

    /// Drops state for members no longer in the registry (`spec.md` §4.5:
    /// retirement after repeated discovery misses).
    pub fn retire(&mut self, name: &str) {
        self.states.remove(name);
        if self.active.as_deref() == Some(name) {
            self.active = None;
        }
    }

    /// Clears the active pointer without a switch protocol, for the
    /// zero-eligible-members boundary case (`spec.md` §8: "active becomes
    /// null, a criticalError event is emitted, and the controller is not
    /// called").
    pub fn clear_active(&mut self) {
        self.active = None;
    }

    /// Runs one full scoring + switch-decision tick.
    ///
    /// `histories` must be oldest-first per member, restricted to the
    /// configured history window (`spec.md` §4.4 query contract).
    pub fn tick(
        &mut self,
        now: DateTime<Utc>,
        members: &[Member],
        histories: &HashMap<String, Vec<Sample>>,
        cfg: &ScoringConfig,
    ) -> DecisionOutput {
        let mut out = DecisionOutput::default();

        for member in members {
            let empty = Vec::new();
            let history = histories.get(&member.name).unwrap_or(&empty);
            let score = score_member(member, history, cfg, now);
            if let Some(event) = self.advance_state_machine(now, member, history, &score, cfg) {
                out.events.push(event);
            }
            out.scores.insert(member.name.clone(), score);
        }

        let candidates: Vec<&Member> = members
            .iter()
            .filter(|m| m.eligible && !out.scores.get(&m.name).map(|s| s.unobservable).unwrap_or(true))
            .collect();

        let Some(best) = rank_best(&candidates, &out.scores) else {
            return out;
        };

        if self.active.as_deref() == Some(best.name.as_str()) {
            return out;
        }

        // A `SwitchDecision` here is only a proposal: the active pointer and
        // the switch/predictive/failback event are written by the caller,
        // and only after the controller confirms the command (`spec.md`
        // §5, §4.3 step 5), via `confirm_switch` +
        // `Event::switch`/`Event::predictive`/`Event::failback`.
        out.switch = self
            .evaluate_switch(now, members, best, &candidates, &out.scores, cfg)
            .or_else(|| self.evaluate_predictive(now, &candidates, &out.scores, cfg));

        out
    }

    fn evaluate_switch(
        &mut self,
        now: DateTime<Utc>,
        members: &[Member],
        best: &Member,
        candidates: &[&Member],
        scores: &HashMap<String, Score>,
        cfg: &ScoringConfig,
    ) -> Option<SwitchDecision> {
        let active_name = self.active.clone();
        let active_score = active_name.as_ref().and_then(|n| scores.get(n));
        let best_score = scores.get(&best.name)?;
        let active_member = active_name.as_ref().and_then(|n| member_by_name(members, n));

        if let (Some(active_name), Some(active_score)) = (active_name.as_ref(), active_score) {
            if best_score.final_score - active_score.final_score < cfg.switch_margin {
                return None;
            }
            // Both gates below key off the *active* member's class
            // (`spec.md` §9 scenario C), not the candidate's — the hysteresis
            // is meant to protect the link currently carrying traffic.
            let active_class = active_member.map(|m| m.class).unwrap_or(MemberClass::Generic);
            let active_state = self.states.get(active_name);
            if let Some(state) = active_state {
                if let Some(switch_in) = state.last_switch_in_at {
                    let uptime = (now - switch_in).num_seconds().max(0) as u64;
                    if uptime < cfg.min_uptime_seconds.get(active_class) {
                        return None;
                    }
                }
            }
            if let Some(last_switch) = self.last_switch_at {
                let since = (now - last_switch).num_seconds().max(0) as u64;
                if since < cfg.cooldown_seconds.get(active_class) {
                    return None;
                }
            }
        }

        let best_state = self.states.get(&best.name);
        let stable_ticks = best_state.map(|s| s.consecutive_eligible_ticks).unwrap_or(0);
        if stable_ticks < cfg.stability_checks_required {
            return None;
        }

        let failback = active_member.map(|m| best.weight > m.weight).unwrap_or(false);
        let reason = if failback {
            "recovery".to_string()
        } else {
            worst_metric_reason(best_score)
        };
        Some(SwitchDecision {
            from: active_name.clone(),
            to: best.name.clone(),
            reason,
            predictive: false,
            failback,
        })
    }

    /// Monotonic-trend predictive failover (`spec.md` §4.2): switches early,
    /// before hysteresis would otherwise allow it, when the active member's
    /// recent primary subscore is trending strictly downward.
    fn evaluate_predictive(
        &mut self,
        now: DateTime<Utc>,
        candidates: &[&Member],
        scores: &HashMap<String, Score>,
        cfg: &ScoringConfig,
    ) -> Option<SwitchDecision> {
        let active_name = self.active.clone()?;
        let active_score = scores.get(&active_name)?;
        if !active_score.trend_decreasing {
            return None;
        }
        if active_score.final_score > cfg.predictive_threshold {
            return None;
        }
        let best = candidates
            .iter()
            .filter(|m| m.name != active_name)
            .filter_map(|m| scores.get(&m.name).map(|s| (*m, s)))
            .max_by(|(a, sa), (b, sb)| {
                compare_scored(a, sa.final_score, b, sb.final_score)
            })?;
        if best.1.final_score - active_score.final_score < cfg.predictive_margin {
            return None;
        }
        Some(SwitchDecision {
            from: Some(active_name),
            to: best.0.name.clone(),
            reason: "predictive: monotonic degradation trend".to_string(),
            predictive: true,
            failback: false,
        })
    }

    /// Applies a switch decision to engine state (`last_switch_in_at`,
    /// `last_switch_out_at`, `active`, the cooldown clock). Must only be
    /// called by the caller after the controller has confirmed the switch
    /// (`spec.md` §5: "active member pointer: written only by the
    /// controller on successful verification").
    pub fn confirm_switch(&mut self, now: DateTime<Utc>, decision: &SwitchDecision) {
        if let Some(from) = &decision.from {
            if let Some(s) = self.states.get_mut(from) {
                s.last_switch_out_at = Some(now);
            }
        }
        let to_state = self
            .states
            .entry(decision.to.clone())
            .or_insert_with(|| MemberState::initial(true));
        to_state.last_switch_in_at = Some(now);
        self.active = Some(decision.to.clone());
        self.last_switch_at = Some(now);
    }

    /// Advances one member's health state machine and returns the `Event`
    /// for the transition, if the transition is one of the four the data
    /// model names (`spec.md` §3, §4.2): `memberDown` on reaching `failed`,
    /// `memberUp` on resolving straight out of `degrading`, `recovery` on
    /// completing the `recovering` -> `healthy` stability run. Internal
    /// transitions (`healthy` -> `degrading`, `failed` -> `recovering`,
    /// `recovering` -> `failed`) are state only, not observable events.
    fn advance_state_machine(
        &mut self,
        now: DateTime<Utc>,
        member: &Member,
        history: &[Sample],
        score: &Score,
        cfg: &ScoringConfig,
    ) -> Option<Event> {
        let latest_absent = history.last().map(|s| s.metrics.fully_absent()).unwrap_or(true);
        let bad = is_bad_sample(history.last().map(|s| &s.metrics), cfg) || score.unobservable;

        let state = self.state_mut(&member.name, !bad);

        if latest_absent {
            state.consecutive_fully_absent += 1;
        } else {
            state.consecutive_fully_absent = 0;
        }

        if bad {
            state.consecutive_bad_samples += 1;
            state.consecutive_good_samples = 0;
        } else {
            state.consecutive_good_samples += 1;
            state.consecutive_bad_samples = 0;
        }

        if member.eligible {
            state.consecutive_eligible_ticks += 1;
        } else {
            state.consecutive_eligible_ticks = 0;
        }

        let previous = state.status;
        state.status = match previous {
            MemberStatus::Healthy => {
                if bad {
                    MemberStatus::Degrading
                } else {
                    MemberStatus::Healthy
                }
            }
            MemberStatus::Degrading => {
                if !bad {
                    MemberStatus::Healthy
                } else if state.consecutive_bad_samples >= cfg.outage_threshold {
                    MemberStatus::Failed
                } else {
                    MemberStatus::Degrading
                }
            }
            MemberStatus::Failed => {
                if !bad {
                    MemberStatus::Recovering
                } else {
                    MemberStatus::Failed
                }
            }
            MemberStatus::Recovering => {
                if bad {
                    MemberStatus::Failed
                } else if state.consecutive_good_samples >= cfg.stability_checks_required {
                    MemberStatus::Healthy
                } else {
                    MemberStatus::Recovering
                }
            }
        };

        match (previous, state.status) {
            (MemberStatus::Degrading, MemberStatus::Failed) => Some(Event::member_down(
                now,
                &member.name,
                format!("{} consecutive bad samples", state.consecutive_bad_samples),
            )),
            (MemberStatus::Degrading, MemberStatus::Healthy) => {
                Some(Event::member_up(now, &member.name, "resolved without reaching failed"))
            }
            (MemberStatus::Recovering, MemberStatus::Healthy) => Some(Event::recovery(
                now,
                &member.name,
                format!("{} consecutive good samples", state.consecutive_good_samples),
            )),
            _ => None,
        }
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

/// Looks up a member by name in the full registry, not the
/// observability-filtered candidate list — the active member may be
/// `unobservable`/ineligible (that's exactly the hard-failover case this
/// gate protects) and would otherwise be invisible to `evaluate_switch`.
fn member_by_name<'a>(members: &'a [Member], name: &str) -> Option<&'a Member> {
    members.iter().find(|m| m.name == name)
}

fn compare_scored(a: &Member, a_score: f64, b: &Member, b_score: f64) -> std::cmp::Ordering {
    a_score
        .partial_cmp(&b_score)
        .unwrap_or(std::cmp::Ordering::Equal)
        .then_with(|| a.weight.cmp(&b.weight))
        .then_with(|| b.name.cmp(&a.name))
}

/// Ranks candidates by `(final desc, weight desc, name asc)` — a total,
/// deterministic order (`spec.md` §4.2).
fn rank_best<'a>(candidates: &[&'a Member], scores: &HashMap<String, Score>) -> Option<&'a Member> {
    candidates
        .iter()
        .copied()
        .max_by(|a, b| {
            let sa = scores.get(&a.name).map(|s| s.final_score).unwrap_or(0.0);
            let sb = scores.get(&b.name).map(|s| s.final_score).unwrap_or(0.0);
            compare_scored(a, sa, b, sb)
        })
}

fn worst_metric_reason(score: &Score) -> String {
    if let Some(p) = score.penalties.iter().max_by(|a, b| a.amount.partial_cmp(&b.amount).unwrap()) {
        format!("{:?} penalty of {:.1}", p.reason, p.amount)
    } else {
        "higher composite score".to_string()
    }
}

fn is_bad_sample(metrics: Option<&Metrics>, cfg: &ScoringConfig) -> bool {
    let Some(m) = metrics else { return true };
    if m.fully_absent() {
        return true;
    }
    if m.loss_percent.map(|l| l >= cfg.fail_threshold_loss).unwrap_or(false) {
        return true;
    }
    if m.latency_ms.map(|l| l >= cfg.fail_threshold_latency_ms).unwrap_or(false) {
        return true;
    }
    false
}

fn class_specific_value(m: &Metrics, class: MemberClass) -> Option<f64> {
    match class {
        MemberClass::Starlink => m.obstruction_pct,
        MemberClass::Cellular => m.rsrp,
        MemberClass::Wifi => m.signal_strength,
        MemberClass::Lan | MemberClass::Generic => None,
    }
}

/// Weighted composite of whichever subscores have at least one present
/// value, renormalized over present weights (absent fields are excluded
/// from the aggregate entirely, per `spec.md` §4.2 step 2).
fn composite(
    latency: Option<f64>,
    loss: Option<f64>,
    jitter: Option<f64>,
    class_specific: Option<f64>,
    subscores: &SubscoreConfig,
    weights: &ScoreWeights,
) -> f64 {
    let mut total = 0.0;
    let mut total_weight = 0.0;
    let mut add = |value: Option<f64>, weight: f64, threshold: uplinkd_types::config::PiecewiseThreshold| {
        if let Some(v) = value {
            if weight > 0.0 {
                total += weight * threshold.subscore(v);
                total_weight += weight;
            }
        }
    };
    add(latency, weights.latency, subscores.latency);
    add(loss, weights.loss, subscores.loss);
    add(jitter, weights.jitter, subscores.jitter);
    add(class_specific, weights.class_specific, subscores.class_specific);

    if total_weight > 0.0 {
        total / total_weight
    } else {
        0.0
    }
}

fn windowed_average(samples: &[Sample], extract: impl Fn(&Metrics) -> Option<f64>) -> Option<f64> {
    let (sum, count) = samples
        .iter()
        .filter_map(|s| extract(&s.metrics))
        .fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    if count == 0 {
        None
    } else {
        Some(sum / count as f64)
    }
}

/// Time-weighted EWMA with half-life `window/3` (`spec.md` §4.2 step 2),
/// walked chronologically over present values only.
fn ewma(samples: &[Sample], window_seconds: u64, extract: impl Fn(&Metrics) -> Option<f64>) -> Option<f64> {
    let half_life = (window_seconds as f64 / 3.0).max(1.0);
    let mut acc: Option<(f64, DateTime<Utc>)> = None;
    for sample in samples {
        let Some(v) = extract(&sample.metrics) else { continue };
        acc = Some(match acc {
            None => (v, sample.timestamp),
            Some((prev, prev_ts)) => {
                let dt = (sample.timestamp - prev_ts).num_milliseconds().max(0) as f64 / 1000.0;
                let alpha = 1.0 - (-std::f64::consts::LN_2 * dt / half_life).exp();
                (alpha * v + (1.0 - alpha) * prev, sample.timestamp)
            }
        });
    }
    acc.map(|(v, _)| v)
}

/// Scores one member from its recent sample history (`spec.md` §4.2 steps
/// 1-5). `history` must be oldest-first.
pub fn score_member(member: &Member, history: &[Sample], cfg: &ScoringConfig, now: DateTime<Utc>) -> Score {
    let class = member.class;
    if history.is_empty() {
        return Score::unobservable_at(now);
    }

    let presence_ratio =
        history.iter().filter(|s| !s.metrics.fully_absent()).count() as f64 / history.len() as f64;
    if presence_ratio < cfg.min_presence_ratio {
        return Score::unobservable_at(now);
    }

    let subscores = cfg.subscores.get(class);
    let weights = cfg.weights.get(class);

    let latest = &history.last().unwrap().metrics;
    let instant = composite(
        latest.latency_ms,
        latest.loss_percent,
        latest.jitter_ms,
        class_specific_value(latest, class),
        &subscores,
        &weights,
    );

    let window_avg = composite(
        windowed_average(history, |m| m.latency_ms),
        windowed_average(history, |m| m.loss_percent),
        windowed_average(history, |m| m.jitter_ms),
        windowed_average(history, |m| class_specific_value(m, class)),
        &subscores,
        &weights,
    );

    let ewma_value = composite(
        ewma(history, cfg.history_window_seconds, |m| m.latency_ms),
        ewma(history, cfg.history_window_seconds, |m| m.loss_percent),
        ewma(history, cfg.history_window_seconds, |m| m.jitter_ms),
        ewma(history, cfg.history_window_seconds, |m| class_specific_value(m, class)),
        &subscores,
        &weights,
    );

    let mut penalties = Vec::new();
    let consecutive_absent = consecutive_fully_absent(history);
    if consecutive_absent >= cfg.outage_threshold {
        let magnitude = (cfg.penalties.outage_penalty_per_sample
            * (consecutive_absent - cfg.outage_threshold + 1) as f64)
            .min(cfg.penalties.outage_penalty_cap);
        penalties.push(uplinkd_types::score::Penalty {
            reason: uplinkd_types::score::PenaltyReason::Outage,
            amount: magnitude,
        });
    }
    if latest.is_roaming() {
        let roaming_penalty = member
            .class_config
            .as_cellular()
            .map(|c| c.roaming_penalty)
            .unwrap_or(10.0);
        penalties.push(uplinkd_types::score::Penalty {
            reason: uplinkd_types::score::PenaltyReason::Roaming,
            amount: roaming_penalty,
        });
    }
    if class == MemberClass::Starlink {
        if latest
            .obstruction_pct
            .map(|o| o >= obstruction_threshold(&subscores))
            .unwrap_or(false)
        {
            penalties.push(uplinkd_types::score::Penalty {
                reason: uplinkd_types::score::PenaltyReason::Obstruction,
                amount: cfg.penalties.obstruction_penalty,
            });
        }
    }

    // `final` blends the three aggregates, favoring the EWMA for
    // responsiveness without instant's single-sample noise sensitivity,
    // then subtracts penalties.
    let mut final_score = 0.2 * instant + 0.5 * ewma_value + 0.3 * window_avg;
    for p in &penalties {
        final_score -= p.amount;
    }

    let trend_decreasing = is_monotonic_decreasing(history, cfg.predictive_trend_samples, |m| {
        m.latency_ms.or(m.loss_percent)
    });

    let mut score = Score {
        instant,
        ewma: ewma_value,
        window_avg,
        final_score,
        penalties,
        unobservable: false,
        trend_decreasing,
        timestamp: now,
    };
    score.clamp_final();
    score
}

fn obstruction_threshold(subscores: &SubscoreConfig) -> f64 {
    subscores.class_specific.good.max(subscores.class_specific.bad)
}

fn consecutive_fully_absent(history: &[Sample]) -> u32 {
    history
        .iter()
        .rev()
        .take_while(|s| s.metrics.fully_absent())
        .count() as u32
}

/// True when the last `n` present values of `extract` form a strictly
/// worsening (increasing raw value, e.g. rising loss/latency) run — used by
/// predictive failover (`spec.md` §4.2).
fn is_monotonic_decreasing(history: &[Sample], n: u32, extract: impl Fn(&Metrics) -> Option<f64>) -> bool {
    let values: Vec<f64> = history.iter().rev().filter_map(|s| extract(&s.metrics)).take(n as usize).collect();
    if values.len() < n as usize || n < 2 {
        return false;
    }
    // `values` is newest-first; worsening means increasing latency/loss as
    // we move toward the present, i.e. non-increasing walking backwards.
    values.windows(2).all(|w| w[0] >= w[1])
}

#[cfg(test)]
mod tests {
    use super::*;
    use uplinkd_types::config::ScoringConfig;
    use uplinkd_types::member::MemberClass;

    fn sample(member: &str, latency: Option<f64>, loss: Option<f64>, ts: DateTime<Utc>) -> Sample {
        let mut metrics = Metrics::new(ts);
        metrics.latency_ms = latency;
        metrics.loss_percent = loss;
        Sample {
            timestamp: ts,
            member: member.to_string(),
            class: MemberClass::Lan,
            metrics,
            score: Score::unobservable_at(ts),
        }
    }

    #[test]
    fn empty_history_is_unobservable() {
        let cfg = ScoringConfig::default();
        let member = Member::new("m", "eth0", MemberClass::Lan);
        let score = score_member(&member, &[], &cfg, Utc::now());
        assert!(score.unobservable);
    }

    #[test]
    fn below_presence_ratio_is_unobservable() {
        let cfg = ScoringConfig::default();
        let now = Utc::now();
        let member = Member::new("m", "eth0", MemberClass::Lan);
        let history = vec![
            sample("m", None, None, now),
            sample("m", None, None, now + chrono::Duration::seconds(1)),
            sample("m", Some(20.0), Some(0.1), now + chrono::Duration::seconds(2)),
        ];
        let score = score_member(&member, &history, &cfg, now);
        assert!(score.unobservable);
    }

    #[test]
    fn healthy_samples_score_near_100() {
        let cfg = ScoringConfig::default();
        let now = Utc::now();
        let member = Member::new("m", "eth0", MemberClass::Lan);
        let history: Vec<Sample> = (0..10)
            .map(|i| sample("m", Some(10.0), Some(0.0), now + chrono::Duration::seconds(i)))
            .collect();
        let score = score_member(&member, &history, &cfg, now);
        assert!(!score.unobservable);
        assert!(score.final_score > 90.0, "expected high score, got {}", score.final_score);
    }

    #[test]
    fn rank_best_breaks_ties_by_weight_then_name() {
        let mut a = Member::new("a", "eth0", MemberClass::Lan);
        a.weight = 50;
        let mut b = Member::new("b", "eth1", MemberClass::Lan);
        b.weight = 80;
        let members = vec![&a, &b];
        let mut scores = HashMap::new();
        let now = Utc::now();
        let mut sa = Score::unobservable_at(now);
        sa.unobservable = false;
        sa.final_score = 70.0;
        let mut sb = sa.clone();
        sb.final_score = 70.0;
        scores.insert("a".to_string(), sa);
        scores.insert("b".to_string(), sb);
        let best = rank_best(&members, &scores).unwrap();
        assert_eq!(best.name, "b");
    }
}
