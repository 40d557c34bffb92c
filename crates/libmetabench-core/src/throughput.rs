//! Events-per-second derived from the service's notification counter
//!
//! The counter delta counts every state change on the service, including
//! traffic from other clients during the run, so the rate is an upper bound
//! approximation of what the benchmark itself generated.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::client::MetastoreClient;
use crate::error::{Result as BenchResult, ServiceError};
use crate::harness::{MicroBenchmark, Workload};
use crate::stats::{serde_duration, Statistics};

/// A rate that cannot be computed from the sampled values
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ThroughputAnomaly {
    #[error("elapsed time must be positive")]
    NonPositiveElapsed,

    #[error("event counter went backwards ({before} -> {after})")]
    CounterRegressed { before: u64, after: u64 },
}

/// Point-in-time read of the notification counter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterSnapshot(pub u64);

impl CounterSnapshot {
    pub fn take(client: &dyn MetastoreClient) -> Result<Self, ServiceError> {
        client.current_notification_id().map(CounterSnapshot)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

/// `(after - before) / elapsed` in events per second
pub fn derive_throughput(
    before: u64,
    after: u64,
    elapsed: Duration,
) -> Result<f64, ThroughputAnomaly> {
    if elapsed.is_zero() {
        return Err(ThroughputAnomaly::NonPositiveElapsed);
    }
    if after < before {
        return Err(ThroughputAnomaly::CounterRegressed { before, after });
    }
    Ok((after - before) as f64 / (elapsed.as_nanos() as f64 / 1e9))
}

/// Throughput of one concurrent run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThroughputReport {
    pub before: CounterSnapshot,
    pub after: CounterSnapshot,
    pub events: u64,
    #[serde(with = "serde_duration")]
    pub elapsed: Duration,
    pub events_per_second: f64,
}

impl ThroughputReport {
    pub fn new(
        before: CounterSnapshot,
        after: CounterSnapshot,
        elapsed: Duration,
    ) -> Result<Self, ThroughputAnomaly> {
        let events_per_second = derive_throughput(before.0, after.0, elapsed)?;
        let report = Self {
            before,
            after,
            events: after.0 - before.0,
            elapsed,
            events_per_second,
        };
        debug!(
            events = report.events,
            elapsed_ms = elapsed.as_secs_f64() * 1000.0,
            events_per_second = report.events_per_second,
            "Derived throughput"
        );
        Ok(report)
    }
}

/// Statistics of a run together with the throughput derived from it
#[derive(Debug)]
pub struct ThroughputMeasurement {
    pub stats: Statistics,
    pub throughput: Result<ThroughputReport, ThroughputAnomaly>,
}

/// Run `workload` with `bench`, sampling the event counter through `client`
/// immediately before and after.
///
/// The delta is divided by the summed wall time of the measured iterations.
/// Events caused by setup and cleanup are counted but their time is not.
pub fn measure_throughput(
    bench: &MicroBenchmark,
    client: &dyn MetastoreClient,
    workload: Workload<'_>,
) -> BenchResult<ThroughputMeasurement> {
    let before = CounterSnapshot::take(client)?;
    let stats = bench.run(workload)?;
    let after = CounterSnapshot::take(client)?;

    let throughput = ThroughputReport::new(before, after, stats.sum());
    match throughput {
        Ok(ref report) => info!(
            events = report.events,
            events_per_second = report.events_per_second,
            "Measured throughput"
        ),
        Err(ref anomaly) => warn!(
            before = before.value(),
            after = after.value(),
            %anomaly,
            "Throughput not derivable"
        ),
    }
    Ok(ThroughputMeasurement { stats, throughput })
}
