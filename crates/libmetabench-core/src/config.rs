//! Benchmark configuration

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{BenchError, Result};
use crate::stats::TimeUnit;

/// Parameters shared by every scenario of a run.
///
/// Loaded from TOML; any missing key takes its default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchConfig {
    /// Measured iterations per scenario
    pub iterations: usize,
    /// Partitions created by partition-heavy scenarios
    pub partitions: usize,
    /// Entries in each partition's parameter map (0 = none)
    pub params: usize,
    /// Worker threads for concurrent scenarios
    pub threads: usize,
    /// Database the scenarios work in
    pub database: String,
    /// Base table name; concurrent workers append `_<index>`
    pub table: String,
    /// Unit used in reports
    pub unit: TimeUnit,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            iterations: 100,
            partitions: 100,
            params: 0,
            threads: 2,
            database: "bench_db".to_string(),
            table: "bench_table".to_string(),
            unit: TimeUnit::Millis,
        }
    }
}

impl BenchConfig {
    /// Reject values that would make a scenario silently do nothing
    pub fn validate(&self) -> Result<()> {
        if self.iterations == 0 {
            return Err(BenchError::Config("iterations must be positive".to_string()));
        }
        if self.partitions == 0 {
            return Err(BenchError::Config("partitions must be positive".to_string()));
        }
        if self.threads == 0 {
            return Err(BenchError::Config("threads must be positive".to_string()));
        }
        if self.database.trim().is_empty() {
            return Err(BenchError::Config("database name is empty".to_string()));
        }
        if self.table.trim().is_empty() {
            return Err(BenchError::Config("table name is empty".to_string()));
        }
        Ok(())
    }
}

/// Load a config file; the result is validated
pub fn load_config(path: &Path) -> Result<BenchConfig> {
    let content = std::fs::read_to_string(path)?;
    let config: BenchConfig = toml::from_str(&content)?;
    config.validate()?;
    Ok(config)
}
