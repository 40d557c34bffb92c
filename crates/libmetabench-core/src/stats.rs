//! Per-iteration timing samples and their descriptive statistics

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use hdrhistogram::Histogram;
use serde::{Deserialize, Serialize};

/// Unit used when rendering durations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeUnit {
    #[serde(alias = "ns")]
    Nanos,
    #[serde(alias = "us")]
    Micros,
    #[default]
    #[serde(alias = "ms")]
    Millis,
    #[serde(alias = "s")]
    Seconds,
}

impl TimeUnit {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeUnit::Nanos => "ns",
            TimeUnit::Micros => "us",
            TimeUnit::Millis => "ms",
            TimeUnit::Seconds => "s",
        }
    }

    /// Express a duration as a float in this unit
    pub fn scale(&self, d: Duration) -> f64 {
        let nanos = d.as_nanos() as f64;
        match self {
            TimeUnit::Nanos => nanos,
            TimeUnit::Micros => nanos / 1e3,
            TimeUnit::Millis => nanos / 1e6,
            TimeUnit::Seconds => nanos / 1e9,
        }
    }
}

impl fmt::Display for TimeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TimeUnit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ns" | "nanos" => Ok(TimeUnit::Nanos),
            "us" | "micros" => Ok(TimeUnit::Micros),
            "ms" | "millis" => Ok(TimeUnit::Millis),
            "s" | "seconds" => Ok(TimeUnit::Seconds),
            other => Err(format!("unknown time unit '{}'", other)),
        }
    }
}

/// Ordered elapsed-time samples, one per completed measured iteration.
///
/// Failed iterations are never recorded. A sample set returned from an
/// aborted run is marked incomplete.
#[derive(Debug, Clone, PartialEq)]
pub struct Statistics {
    samples: Vec<Duration>,
    complete: bool,
}

impl Default for Statistics {
    fn default() -> Self {
        Self::new()
    }
}

impl Statistics {
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            samples: Vec::with_capacity(capacity),
            complete: true,
        }
    }

    pub fn from_samples(samples: Vec<Duration>) -> Self {
        Self {
            samples,
            complete: true,
        }
    }

    pub fn record(&mut self, elapsed: Duration) {
        self.samples.push(elapsed);
    }

    /// Flag this sample set as cut short by a failure
    pub fn mark_incomplete(&mut self) {
        self.complete = false;
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn samples(&self) -> &[Duration] {
        &self.samples
    }

    pub fn count(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn sum(&self) -> Duration {
        self.samples.iter().sum()
    }

    pub fn min(&self) -> Option<Duration> {
        self.samples.iter().min().copied()
    }

    pub fn max(&self) -> Option<Duration> {
        self.samples.iter().max().copied()
    }

    pub fn mean(&self) -> Option<Duration> {
        if self.samples.is_empty() {
            return None;
        }
        Some(nanos_to_duration(self.total_nanos() / self.samples.len() as f64))
    }

    pub fn median(&self) -> Option<Duration> {
        self.percentile(50.0)
    }

    /// Percentile in `[0, 100]`, interpolating linearly between closest ranks
    pub fn percentile(&self, p: f64) -> Option<Duration> {
        if self.samples.is_empty() || !(0.0..=100.0).contains(&p) {
            return None;
        }
        let sorted = self.sorted_nanos();
        Some(nanos_to_duration(interpolate(&sorted, p)))
    }

    /// Sample standard deviation (n - 1 denominator); zero below two samples
    pub fn stddev(&self) -> Option<Duration> {
        let n = self.samples.len();
        if n == 0 {
            return None;
        }
        if n == 1 {
            return Some(Duration::ZERO);
        }
        let mean = self.total_nanos() / n as f64;
        let variance = self
            .samples
            .iter()
            .map(|d| {
                let delta = d.as_nanos() as f64 - mean;
                delta * delta
            })
            .sum::<f64>()
            / (n - 1) as f64;
        Some(nanos_to_duration(variance.sqrt()))
    }

    /// Median absolute deviation from the median
    pub fn mad(&self) -> Option<Duration> {
        let median = self.median()?.as_nanos() as f64;
        let mut deviations: Vec<f64> = self
            .samples
            .iter()
            .map(|d| (d.as_nanos() as f64 - median).abs())
            .collect();
        deviations.sort_by(f64::total_cmp);
        Some(nanos_to_duration(interpolate(&deviations, 50.0)))
    }

    /// HDR-histogram percentiles at microsecond resolution
    pub fn latency_percentiles(&self) -> LatencyPercentiles {
        // 1 microsecond to 1 hour, 3 significant figures
        let Ok(mut hist) = Histogram::<u64>::new_with_bounds(1, 3_600_000_000, 3) else {
            return LatencyPercentiles::default();
        };
        for sample in &self.samples {
            let micros = (sample.as_micros() as u64).max(1);
            let _ = hist.record(micros.min(hist.high()));
        }
        if hist.is_empty() {
            return LatencyPercentiles::default();
        }
        LatencyPercentiles {
            p50_us: hist.value_at_quantile(0.50),
            p95_us: hist.value_at_quantile(0.95),
            p99_us: hist.value_at_quantile(0.99),
            max_us: hist.max(),
        }
    }

    /// Render the descriptive statistics in `unit`
    pub fn summary(&self, unit: TimeUnit) -> Summary {
        let scale = |d: Option<Duration>| d.map(|d| unit.scale(d)).unwrap_or(0.0);
        Summary {
            unit,
            count: self.count(),
            complete: self.complete,
            mean: scale(self.mean()),
            median: scale(self.median()),
            min: scale(self.min()),
            max: scale(self.max()),
            p95: scale(self.percentile(95.0)),
            p99: scale(self.percentile(99.0)),
            stddev: scale(self.stddev()),
            mad: scale(self.mad()),
            sum: unit.scale(self.sum()),
        }
    }

    fn total_nanos(&self) -> f64 {
        self.samples.iter().map(|d| d.as_nanos() as f64).sum()
    }

    fn sorted_nanos(&self) -> Vec<f64> {
        let mut sorted: Vec<f64> = self.samples.iter().map(|d| d.as_nanos() as f64).collect();
        sorted.sort_by(f64::total_cmp);
        sorted
    }
}

fn interpolate(sorted: &[f64], p: f64) -> f64 {
    let rank = p / 100.0 * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let weight = rank - lower as f64;
    sorted[lower] + (sorted[upper] - sorted[lower]) * weight
}

fn nanos_to_duration(nanos: f64) -> Duration {
    Duration::from_nanos(nanos.round().max(0.0) as u64)
}

/// Descriptive statistics scaled to a time unit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Summary {
    pub unit: TimeUnit,
    pub count: usize,
    pub complete: bool,
    pub mean: f64,
    pub median: f64,
    pub min: f64,
    pub max: f64,
    pub p95: f64,
    pub p99: f64,
    pub stddev: f64,
    pub mad: f64,
    pub sum: f64,
}

/// Latency percentiles
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LatencyPercentiles {
    pub p50_us: u64,
    pub p95_us: u64,
    pub p99_us: u64,
    pub max_us: u64,
}

impl LatencyPercentiles {
    pub fn p50_ms(&self) -> f64 {
        self.p50_us as f64 / 1000.0
    }

    pub fn p95_ms(&self) -> f64 {
        self.p95_us as f64 / 1000.0
    }

    pub fn p99_ms(&self) -> f64 {
        self.p99_us as f64 / 1000.0
    }

    pub fn max_ms(&self) -> f64 {
        self.max_us as f64 / 1000.0
    }
}

pub(crate) mod serde_duration {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs_f64().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        Ok(Duration::from_secs_f64(secs))
    }
}
