//! Counter and timer emission for the proxy.
//!
//! The proxy core only depends on the [`Stats`] trait; the sinks here cover
//! the built-in needs: discard everything ([`NopStats`]), log every emission
//! ([`LogStats`]), or record in memory for inspection ([`MemoryStats`]).

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;

/// A sink for proxy metrics. Implementations must be safe for concurrent
/// emission from every serve task and pool worker.
pub trait Stats: Send + Sync + 'static {
    /// Increment the named counter by one.
    fn bump(&self, name: &'static str);

    /// Record one timed span for the named timer.
    fn timing(&self, name: &'static str, elapsed: Duration);
}

/// Measures a span and reports it to a [`Stats`] sink when stopped.
///
/// Dropping the timer without calling [`StatsTimer::stop`] reports the span
/// as well, so early returns inside a measured region still emit.
pub struct StatsTimer {
    stats: Arc<dyn Stats>,
    name: &'static str,
    started_at: Instant,
    stopped: bool,
}

impl StatsTimer {
    pub fn start(stats: Arc<dyn Stats>, name: &'static str) -> Self {
        Self {
            stats,
            name,
            started_at: Instant::now(),
            stopped: false,
        }
    }

    pub fn stop(mut self) {
        self.record();
    }

    fn record(&mut self) {
        if !self.stopped {
            self.stopped = true;
            self.stats.timing(self.name, self.started_at.elapsed());
        }
    }
}

impl Drop for StatsTimer {
    fn drop(&mut self) {
        self.record();
    }
}

/// Discards every emission.
#[derive(Debug, Default)]
pub struct NopStats;

impl Stats for NopStats {
    fn bump(&self, _name: &'static str) {}

    fn timing(&self, _name: &'static str, _elapsed: Duration) {}
}

/// Emits every counter bump and timing as a debug log line.
#[derive(Debug, Default)]
pub struct LogStats;

impl Stats for LogStats {
    fn bump(&self, name: &'static str) {
        tracing::debug!(target: "mongate::stats", counter = name, "bump");
    }

    fn timing(&self, name: &'static str, elapsed: Duration) {
        tracing::debug!(
            target: "mongate::stats",
            timer = name,
            elapsed_ms = elapsed.as_millis() as u64,
            "timing"
        );
    }
}

/// In-memory recorder; counters and timer aggregates are kept per name.
#[derive(Debug, Default)]
pub struct MemoryStats {
    counters: DashMap<&'static str, u64>,
    timers: DashMap<&'static str, TimerAggregate>,
}

#[derive(Debug, Default, Clone, Copy)]
struct TimerAggregate {
    count: u64,
    total: Duration,
}

impl MemoryStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value of a counter, zero if never bumped.
    pub fn counter(&self, name: &str) -> u64 {
        self.counters.get(name).map(|v| *v).unwrap_or(0)
    }

    /// Number of spans recorded for a timer.
    pub fn timer_count(&self, name: &str) -> u64 {
        self.timers.get(name).map(|v| v.count).unwrap_or(0)
    }

    /// Render all counters and timer totals as a JSON object.
    pub fn snapshot(&self) -> serde_json::Value {
        let mut counters = serde_json::Map::new();
        for entry in self.counters.iter() {
            counters.insert((*entry.key()).to_string(), (*entry.value()).into());
        }
        let mut timers = serde_json::Map::new();
        for entry in self.timers.iter() {
            timers.insert(
                (*entry.key()).to_string(),
                serde_json::json!({
                    "count": entry.value().count,
                    "total_ms": entry.value().total.as_millis() as u64,
                }),
            );
        }
        serde_json::json!({ "counters": counters, "timers": timers })
    }
}

impl Stats for MemoryStats {
    fn bump(&self, name: &'static str) {
        *self.counters.entry(name).or_insert(0) += 1;
    }

    fn timing(&self, name: &'static str, elapsed: Duration) {
        let mut agg = self.timers.entry(name).or_default();
        agg.count += 1;
        agg.total += elapsed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_stats_counts_bumps() {
        let stats = MemoryStats::new();
        stats.bump("client.connected");
        stats.bump("client.connected");
        stats.bump("message.proxy.success");
        assert_eq!(stats.counter("client.connected"), 2);
        assert_eq!(stats.counter("message.proxy.success"), 1);
        assert_eq!(stats.counter("never.bumped"), 0);
    }

    #[test]
    fn timer_guard_records_on_stop_and_on_drop() {
        let stats = Arc::new(MemoryStats::new());

        let timer = StatsTimer::start(stats.clone(), "message.proxy.time");
        timer.stop();
        assert_eq!(stats.timer_count("message.proxy.time"), 1);

        {
            let _timer = StatsTimer::start(stats.clone(), "message.proxy.time");
        }
        assert_eq!(stats.timer_count("message.proxy.time"), 2);
    }

    #[test]
    fn snapshot_includes_counters_and_timers() {
        let stats = MemoryStats::new();
        stats.bump("client.connected");
        stats.timing("server.conn.held.time", Duration::from_millis(5));

        let snap = stats.snapshot();
        assert_eq!(snap["counters"]["client.connected"], 1);
        assert_eq!(snap["timers"]["server.conn.held.time"]["count"], 1);
    }
}
