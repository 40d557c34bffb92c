pub mod client;
pub mod config;
pub mod error;
pub mod harness;
pub mod memory;
pub mod model;
pub mod orchestrator;
pub mod scenarios;
pub mod stats;
pub mod throughput;

pub use client::{Connector, MetastoreClient, ServiceResult};
pub use config::{load_config, BenchConfig};
pub use error::{BenchError, Phase, Result, ServiceError, ServiceErrorKind, WorkerFailure};
pub use harness::{MicroBenchmark, Workload};
pub use memory::{MemoryConnection, MemoryMetastore};
pub use model::{Database, Partition, Table};
pub use orchestrator::{namespace_for, ConcurrentRunner, WorkerContext};
pub use scenarios::{
    run_scenario, BenchData, BenchSuite, ScenarioFailure, ScenarioFilter, ScenarioKind,
    ScenarioOutcome, ScenarioParams, SuiteReport,
};
pub use stats::{LatencyPercentiles, Statistics, Summary, TimeUnit};
pub use throughput::{measure_throughput, ThroughputAnomaly, ThroughputReport};
