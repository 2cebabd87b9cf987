//! Run statistics for the watcher itself
//!
//! Counts what happened to traces and the log file over the lifetime of the
//! process. The summary is logged once on shutdown.

use log::info;
use std::time::{Duration, Instant};

/// Counters collected by the watcher loop
#[derive(Debug, Clone)]
pub struct RunStats {
    started_at: Instant,
    /// Traces emitted by the grouper
    pub traces_emitted: u64,
    /// Traces accepted by the collector
    pub traces_dispatched: u64,
    /// Traces not sent because forwarding was disabled
    pub traces_suppressed: u64,
    /// Outbound calls that failed
    pub dispatch_failures: u64,
    /// Individual enrichment fields that could not be resolved
    pub enrichment_failures: u64,
    /// Rotations and truncations observed on the log file
    pub rotations: u64,
    /// Successful config loads, the initial one included
    pub config_reloads: u64,
    /// Config loads that were rejected
    pub reload_failures: u64,
}

impl Default for RunStats {
    fn default() -> Self {
        Self::new()
    }
}

impl RunStats {
    pub fn new() -> Self {
        Self::started_at(Instant::now())
    }

    /// Stats whose uptime is measured from `started_at`
    pub fn started_at(started_at: Instant) -> Self {
        Self {
            started_at,
            traces_emitted: 0,
            traces_dispatched: 0,
            traces_suppressed: 0,
            dispatch_failures: 0,
            enrichment_failures: 0,
            rotations: 0,
            config_reloads: 0,
            reload_failures: 0,
        }
    }

    pub fn uptime_at(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.started_at)
    }

    /// Percentage of attempted dispatches that succeeded
    ///
    /// 100.0 when nothing has been attempted yet.
    pub fn dispatch_success_rate(&self) -> f64 {
        let attempted = self.traces_dispatched + self.dispatch_failures;
        if attempted == 0 {
            return 100.0;
        }
        self.traces_dispatched as f64 / attempted as f64 * 100.0
    }

    pub fn log_summary(&self) {
        info!(
            target: "logwatch::watcher",
            "Run summary uptime={}s traces={} dispatched={} suppressed={} \
             dispatch_failures={} dispatch_success={:.1}% enrichment_failures={} \
             rotations={} reloads={} reload_failures={}",
            self.uptime_at(Instant::now()).as_secs(),
            self.traces_emitted,
            self.traces_dispatched,
            self.traces_suppressed,
            self.dispatch_failures,
            self.dispatch_success_rate(),
            self.enrichment_failures,
            self.rotations,
            self.config_reloads,
            self.reload_failures
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_stats_are_zero() {
        let stats = RunStats::new();
        assert_eq!(stats.traces_emitted, 0);
        assert_eq!(stats.traces_dispatched, 0);
        assert_eq!(stats.dispatch_failures, 0);
        assert_eq!(stats.dispatch_success_rate(), 100.0);
    }

    #[test]
    fn test_dispatch_success_rate() {
        let mut stats = RunStats::new();
        stats.traces_dispatched = 3;
        stats.dispatch_failures = 1;
        assert!((stats.dispatch_success_rate() - 75.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_uptime() {
        let start = Instant::now();
        let stats = RunStats::started_at(start);
        assert_eq!(stats.uptime_at(start + Duration::from_secs(90)).as_secs(), 90);
        assert_eq!(stats.uptime_at(start), Duration::ZERO);
    }
}
