//! Metrics collection and reporting (§4.M, feature `metrics`).
//!
//! A single process-wide [`MetricsCollector`] follows the same
//! `Arc<Mutex<Inner>>` register-then-collect shape as the team and segment
//! registries, keyed per-team rather than per-pipeline-run: every RMA,
//! handle, flush, and collective entry point in this crate records into it
//! when this feature is enabled. With the feature off the module, its
//! types, and every call site are compiled out entirely.
//!
//! # Example
//!
//! ```no_run
//! use onesided::metrics;
//!
//! // After running some RMA/collective traffic:
//! metrics::global().print();
//! metrics::global().save_to_file("onesided_metrics.json").unwrap();
//! ```

use std::collections::HashMap;
use std::fs::File;
use std::io::Write;
use std::sync::{Arc, Mutex, OnceLock};

use serde::Serialize;

use crate::error::{Error, Result};
use crate::team::TeamId;

/// Kind of RMA operation tracked per team.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RmaOp {
    Get,
    Put,
    Accumulate,
    FetchAndOp,
    CompareAndSwap,
}

impl RmaOp {
    fn as_str(self) -> &'static str {
        match self {
            RmaOp::Get => "get",
            RmaOp::Put => "put",
            RmaOp::Accumulate => "accumulate",
            RmaOp::FetchAndOp => "fetch_and_op",
            RmaOp::CompareAndSwap => "compare_and_swap",
        }
    }
}

/// Kind of collective/P2P operation tracked per team.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CollectiveOp {
    Barrier,
    Bcast,
    Scatter,
    Gather,
    Allgather,
    Allgatherv,
    Reduce,
    Allreduce,
    Send,
    Recv,
    Sendrecv,
}

impl CollectiveOp {
    fn as_str(self) -> &'static str {
        match self {
            CollectiveOp::Barrier => "barrier",
            CollectiveOp::Bcast => "bcast",
            CollectiveOp::Scatter => "scatter",
            CollectiveOp::Gather => "gather",
            CollectiveOp::Allgather => "allgather",
            CollectiveOp::Allgatherv => "allgatherv",
            CollectiveOp::Reduce => "reduce",
            CollectiveOp::Allreduce => "allreduce",
            CollectiveOp::Send => "send",
            CollectiveOp::Recv => "recv",
            CollectiveOp::Sendrecv => "sendrecv",
        }
    }
}

/// Accumulated counters for a single team.
#[derive(Default, Clone, Debug, Serialize)]
pub struct TeamMetrics {
    pub rma_op_counts: HashMap<String, u64>,
    pub bytes_transferred: u64,
    pub outstanding_handles: u64,
    pub outstanding_handles_high_water: u64,
    pub flush_calls: u64,
    pub wait_calls: u64,
    pub collective_op_counts: HashMap<String, u64>,
}

/// A point-in-time copy of every team's counters, keyed by the team's raw
/// wire id (since [`TeamId`] itself is not a `serde` type).
#[derive(Clone, Debug, Serialize)]
pub struct Snapshot {
    pub teams: HashMap<u16, TeamMetrics>,
}

struct Inner {
    teams: HashMap<TeamId, TeamMetrics>,
}

/// Process-wide metrics sink. Cheap to clone (an `Arc` handle).
#[derive(Clone)]
pub struct MetricsCollector {
    inner: Arc<Mutex<Inner>>,
}

static GLOBAL: OnceLock<MetricsCollector> = OnceLock::new();

/// The process-wide collector, created lazily on first use.
pub fn global() -> &'static MetricsCollector {
    GLOBAL.get_or_init(MetricsCollector::new)
}

impl MetricsCollector {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                teams: HashMap::new(),
            })),
        }
    }

    fn with_team<R>(&self, team: TeamId, f: impl FnOnce(&mut TeamMetrics) -> R) -> R {
        let mut inner = self.inner.lock().unwrap();
        f(inner.teams.entry(team).or_default())
    }

    pub(crate) fn record_rma(&self, team: TeamId, op: RmaOp, bytes: u64) {
        self.with_team(team, |m| {
            *m.rma_op_counts.entry(op.as_str().to_string()).or_insert(0) += 1;
            m.bytes_transferred += bytes;
        });
    }

    pub(crate) fn record_handle_opened(&self, team: TeamId) {
        self.with_team(team, |m| {
            m.outstanding_handles += 1;
            m.outstanding_handles_high_water =
                m.outstanding_handles_high_water.max(m.outstanding_handles);
        });
    }

    pub(crate) fn record_handle_closed(&self, team: TeamId) {
        self.with_team(team, |m| {
            m.outstanding_handles = m.outstanding_handles.saturating_sub(1);
        });
    }

    pub(crate) fn record_flush(&self, team: TeamId) {
        self.with_team(team, |m| m.flush_calls += 1);
    }

    pub(crate) fn record_wait(&self, team: TeamId) {
        self.with_team(team, |m| m.wait_calls += 1);
    }

    pub(crate) fn record_collective(&self, team: TeamId, op: CollectiveOp) {
        self.with_team(team, |m| {
            *m.collective_op_counts
                .entry(op.as_str().to_string())
                .or_insert(0) += 1;
        });
    }

    /// A point-in-time copy of every team's counters.
    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        let inner = self.inner.lock().unwrap();
        Snapshot {
            teams: inner
                .teams
                .iter()
                .map(|(id, m)| (id.raw(), m.clone()))
                .collect(),
        }
    }

    /// Print every team's counters to stdout.
    pub fn print(&self) {
        let snapshot = self.snapshot();
        println!("\n========== onesided runtime metrics ==========");
        let mut teams: Vec<_> = snapshot.teams.iter().collect();
        teams.sort_by_key(|(id, _)| **id);
        for (team, m) in teams {
            println!("team {team}:");
            println!("  bytes transferred: {}", m.bytes_transferred);
            println!(
                "  outstanding handles: {} (high water {})",
                m.outstanding_handles, m.outstanding_handles_high_water
            );
            println!("  flush calls: {}, wait calls: {}", m.flush_calls, m.wait_calls);
            let mut rma: Vec<_> = m.rma_op_counts.iter().collect();
            rma.sort_by_key(|(k, _)| (*k).clone());
            for (op, count) in rma {
                println!("  rma[{op}]: {count}");
            }
            let mut coll: Vec<_> = m.collective_op_counts.iter().collect();
            coll.sort_by_key(|(k, _)| (*k).clone());
            for (op, count) in coll {
                println!("  collective[{op}]: {count}");
            }
        }
        println!("================================================\n");
    }

    /// Serialize every team's counters to `path` as pretty-printed JSON.
    pub fn save_to_file(&self, path: &str) -> Result<()> {
        let snapshot = self.snapshot();
        let json = serde_json::to_string_pretty(&snapshot)
            .map_err(|e| Error::transport(format!("metrics serialization failed: {e}")))?;
        let mut file = File::create(path)
            .map_err(|e| Error::transport(format!("could not create {path}: {e}")))?;
        file.write_all(json.as_bytes())
            .map_err(|e| Error::transport(format!("could not write {path}: {e}")))?;
        Ok(())
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_rma_ops_and_bytes() {
        let collector = MetricsCollector::new();
        let team = TeamId::from_raw(0);
        collector.record_rma(team, RmaOp::Put, 16);
        collector.record_rma(team, RmaOp::Put, 16);
        collector.record_rma(team, RmaOp::Get, 8);
        let snapshot = collector.snapshot();
        let m = &snapshot.teams[&0];
        assert_eq!(m.rma_op_counts["put"], 2);
        assert_eq!(m.rma_op_counts["get"], 1);
        assert_eq!(m.bytes_transferred, 40);
    }

    #[test]
    fn tracks_outstanding_handle_high_water_mark() {
        let collector = MetricsCollector::new();
        let team = TeamId::from_raw(1);
        collector.record_handle_opened(team);
        collector.record_handle_opened(team);
        collector.record_handle_closed(team);
        let snapshot = collector.snapshot();
        let m = &snapshot.teams[&1];
        assert_eq!(m.outstanding_handles, 1);
        assert_eq!(m.outstanding_handles_high_water, 2);
    }

    #[test]
    fn global_collector_is_a_stable_singleton() {
        let a = global() as *const MetricsCollector;
        let b = global() as *const MetricsCollector;
        assert_eq!(a, b);
    }
}
