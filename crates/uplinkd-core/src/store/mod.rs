//! Telemetry store (`spec.md` §4.4): bounded-memory retention of `Sample`s
//! and `Event`s with a hard RAM ceiling, grounded on
//! `strata-bonding::metrics`'s own fixed-capacity history buffers and
//! Prometheus-style renderer.

use std::collections::{HashMap, VecDeque};
use std::fmt::Write;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use uplinkd_types::{Event, Sample};

/// Snapshot returned by [`Store::stats`].
#[derive(Debug, Clone, Default)]
pub struct Stats {
    pub sample_count: usize,
    pub event_count: usize,
    pub memory_bytes: usize,
    pub oldest_sample_at: Option<DateTime<Utc>>,
}

struct MemberBuffer {
    samples: VecDeque<Sample>,
    bytes: usize,
}

impl MemberBuffer {
    fn new() -> Self {
        MemberBuffer {
            samples: VecDeque::new(),
            bytes: 0,
        }
    }

    fn push(&mut self, sample: Sample) {
        self.bytes += sample.estimated_bytes();
        self.samples.push_back(sample);
    }

    fn pop_oldest(&mut self) -> Option<Sample> {
        let s = self.samples.pop_front()?;
        self.bytes = self.bytes.saturating_sub(s.estimated_bytes());
        Some(s)
    }
}

const EVENT_BYTE_ESTIMATE: usize = 256;

/// Bounded-memory store for samples and events (`spec.md` §4.4).
///
/// Writers are serialized per-member (independent `RwLock`-protected
/// buffers) and a single global lock protects the event ring; reads take a
/// shared lock and clone, giving snapshot-consistent views that may lag
/// writers by at most one record (`spec.md` §5).
pub struct Store {
    members: RwLock<HashMap<String, MemberBuffer>>,
    events: RwLock<VecDeque<Event>>,
    max_ram_bytes: RwLock<usize>,
    max_events: usize,
}

impl Store {
    pub fn new(max_ram_mb: u64, max_events: usize) -> Self {
        Store {
            members: RwLock::new(HashMap::new()),
            events: RwLock::new(VecDeque::new()),
            max_ram_bytes: RwLock::new((max_ram_mb as usize) * 1024 * 1024),
            max_events,
        }
    }

    pub fn append_sample(&self, sample: Sample) {
        {
            let mut members = self.members.write().unwrap();
            let buf = members.entry(sample.member.clone()).or_insert_with(MemberBuffer::new);
            buf.push(sample);
        }
        self.enforce_ceiling();
    }

    pub fn append_event(&self, event: Event) {
        let mut events = self.events.write().unwrap();
        events.push_back(event);
        while events.len() > self.max_events {
            events.pop_front();
        }
    }

    /// Oldest-first, to match window-average semantics (`spec.md` §4.4).
    pub fn get_samples(&self, member: &str, since: DateTime<Utc>) -> Vec<Sample> {
        let members = self.members.read().unwrap();
        members
            .get(member)
            .map(|buf| buf.samples.iter().filter(|s| s.timestamp >= since).cloned().collect())
            .unwrap_or_default()
    }

    pub fn get_events(&self, since: DateTime<Utc>, limit: usize) -> Vec<Event> {
        let events = self.events.read().unwrap();
        events
            .iter()
            .filter(|e| e.timestamp >= since)
            .cloned()
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .take(limit)
            .rev()
            .collect()
    }

    pub fn stats(&self) -> Stats {
        let members = self.members.read().unwrap();
        let events = self.events.read().unwrap();
        let sample_count = members.values().map(|b| b.samples.len()).sum();
        let sample_bytes: usize = members.values().map(|b| b.bytes).sum();
        let oldest_sample_at = members
            .values()
            .filter_map(|b| b.samples.front().map(|s| s.timestamp))
            .min();
        Stats {
            sample_count,
            event_count: events.len(),
            memory_bytes: sample_bytes + events.len() * EVENT_BYTE_ESTIMATE,
            oldest_sample_at,
        }
    }

    /// Renders each member's latest sample as Prometheus text exposition
    /// format, grounded on `strata-bonding::metrics::render_prometheus`. The
    /// scrape endpoint itself is out of scope (`spec.md` §1) — this is only
    /// the renderer an external HTTP shim would mount.
    pub fn render_prometheus(&self) -> String {
        let members = self.members.read().unwrap();
        let mut out = String::with_capacity(1024);

        writeln!(out, "# HELP uplinkd_score_final Composite link quality score (0-100).").unwrap();
        writeln!(out, "# TYPE uplinkd_score_final gauge").unwrap();
        for (name, buf) in members.iter() {
            if let Some(sample) = buf.samples.back() {
                writeln!(out, "uplinkd_score_final{{member=\"{name}\"}} {:.3}", sample.score.final_score).unwrap();
            }
        }

        writeln!(out, "# HELP uplinkd_latency_ms Most recent measured latency in milliseconds.").unwrap();
        writeln!(out, "# TYPE uplinkd_latency_ms gauge").unwrap();
        for (name, buf) in members.iter() {
            if let Some(latency) = buf.samples.back().and_then(|s| s.metrics.latency_ms) {
                writeln!(out, "uplinkd_latency_ms{{member=\"{name}\"}} {latency:.3}").unwrap();
            }
        }

        writeln!(out, "# HELP uplinkd_loss_percent Most recent measured packet loss percentage.").unwrap();
        writeln!(out, "# TYPE uplinkd_loss_percent gauge").unwrap();
        for (name, buf) in members.iter() {
            if let Some(loss) = buf.samples.back().and_then(|s| s.metrics.loss_percent) {
                writeln!(out, "uplinkd_loss_percent{{member=\"{name}\"}} {loss:.3}").unwrap();
            }
        }

        out
    }

    /// Live-adjusts the RAM ceiling (`spec.md` §4.4). If the new ceiling is
    /// below current usage, prunes oldest samples first; events are
    /// preserved preferentially.
    pub fn set_max_ram_mb(&self, n: u64) {
        *self.max_ram_bytes.write().unwrap() = (n as usize) * 1024 * 1024;
        self.enforce_ceiling();
    }

    /// Evicts oldest samples across all members, proportionally to their
    /// current occupancy, until usage is back within `max_ram_bytes`
    /// (`spec.md` §4.4 invariant: never exceed the ceiling by more than one
    /// record's worth).
    fn enforce_ceiling(&self) {
        let ceiling = *self.max_ram_bytes.read().unwrap();
        let event_bytes = self.events.read().unwrap().len() * EVENT_BYTE_ESTIMATE;
        let mut members = self.members.write().unwrap();
        loop {
            let total: usize = members.values().map(|b| b.bytes).sum::<usize>() + event_bytes;
            if total <= ceiling {
                break;
            }
            // Evict one record from whichever member buffer currently holds
            // the most bytes, which approximates proportional eviction
            // without tracking per-member quotas explicitly.
            let Some((_, fattest)) = members
                .iter_mut()
                .filter(|(_, b)| !b.samples.is_empty())
                .max_by_key(|(_, b)| b.bytes)
            else {
                break;
            };
            if fattest.pop_oldest().is_none() {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uplinkd_types::{MemberClass, Metrics, Score};

    fn sample(member: &str, ts: DateTime<Utc>) -> Sample {
        Sample {
            timestamp: ts,
            member: member.to_string(),
            class: MemberClass::Lan,
            metrics: Metrics::new(ts),
            score: Score::unobservable_at(ts),
        }
    }

    #[test]
    fn append_and_query_round_trips() {
        let store = Store::new(16, 1024);
        let now = Utc::now();
        store.append_sample(sample("wan0", now));
        store.append_sample(sample("wan0", now + chrono::Duration::seconds(1)));
        let got = store.get_samples("wan0", now);
        assert_eq!(got.len(), 2);
        assert!(got[0].timestamp <= got[1].timestamp);
    }

    #[test]
    fn stats_reports_counts() {
        let store = Store::new(16, 1024);
        let now = Utc::now();
        store.append_sample(sample("wan0", now));
        store.append_event(Event::member_up(now, "wan0", "discovered"));
        let stats = store.stats();
        assert_eq!(stats.sample_count, 1);
        assert_eq!(stats.event_count, 1);
    }

    #[test]
    fn lowering_ceiling_prunes_oldest_samples() {
        let store = Store::new(16, 1024);
        let now = Utc::now();
        for i in 0..1000 {
            store.append_sample(sample("wan0", now + chrono::Duration::seconds(i)));
        }
        let before = store.stats().sample_count;
        store.set_max_ram_mb(0);
        let after = store.stats().sample_count;
        assert!(after < before);
    }

    #[test]
    fn render_prometheus_includes_latest_score_and_latency() {
        let store = Store::new(16, 1024);
        let now = Utc::now();
        let mut metrics = Metrics::new(now);
        metrics.latency_ms = Some(42.0);
        let mut score = Score::unobservable_at(now);
        score.unobservable = false;
        score.final_score = 87.5;
        store.append_sample(Sample {
            timestamp: now,
            member: "wan0".to_string(),
            class: MemberClass::Lan,
            metrics,
            score,
        });
        let rendered = store.render_prometheus();
        assert!(rendered.contains("uplinkd_score_final{member=\"wan0\"} 87.500"));
        assert!(rendered.contains("uplinkd_latency_ms{member=\"wan0\"} 42.000"));
    }

    #[test]
    fn event_ring_is_bounded() {
        let store = Store::new(16, 4);
        let now = Utc::now();
        for i in 0..10 {
            store.append_event(Event::member_up(now + chrono::Duration::seconds(i), "wan0", "x"));
        }
        assert_eq!(store.stats().event_count, 4);
    }
}
