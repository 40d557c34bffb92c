//! metabench - latency and throughput benchmarks for metadata services

mod report;

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use libmetabench_core::scenarios::{BenchSuite, ScenarioFilter};
use libmetabench_core::{
    load_config, BenchConfig, BenchData, BenchError, Connector, MemoryMetastore, Result, TimeUnit,
};

use report::RunReport;

#[derive(Parser)]
#[command(name = "metabench")]
#[command(about = "Latency and throughput benchmarks for metadata services")]
#[command(version)]
struct Cli {
    /// TOML file with run parameters (flags override it)
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// Measured iterations per scenario
    #[arg(short = 'i', long)]
    iterations: Option<usize>,

    /// Partitions (or tables) created by sized scenarios
    #[arg(short = 'N', long)]
    partitions: Option<usize>,

    /// Parameter-map entries per partition
    #[arg(long)]
    params: Option<usize>,

    /// Workers in concurrent scenarios
    #[arg(short = 'T', long)]
    threads: Option<usize>,

    /// Database to run in
    #[arg(short = 'd', long)]
    database: Option<String>,

    /// Base table name
    #[arg(short = 't', long)]
    table: Option<String>,

    /// Only run scenarios matching this regex (repeatable)
    #[arg(short = 'M', long = "match")]
    include: Vec<String>,

    /// Skip scenarios matching this regex (repeatable)
    #[arg(short = 'E', long)]
    exclude: Vec<String>,

    /// List selected scenarios and exit
    #[arg(long)]
    list: bool,

    /// Write a JSON report to this file
    #[arg(short = 'o', long)]
    json: Option<PathBuf>,

    /// Simulated per-call latency of the embedded metastore, in microseconds
    #[arg(long, default_value = "0")]
    latency_us: u64,

    /// Report unit: ns, us, ms or s
    #[arg(short = 'u', long)]
    unit: Option<TimeUnit>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    log_level: String,
}

impl Cli {
    /// File config (or defaults) with command-line overrides applied
    fn bench_config(&self) -> Result<BenchConfig> {
        let mut config = match self.config {
            Some(ref path) => load_config(path)?,
            None => BenchConfig::default(),
        };
        if let Some(iterations) = self.iterations {
            config.iterations = iterations;
        }
        if let Some(partitions) = self.partitions {
            config.partitions = partitions;
        }
        if let Some(params) = self.params {
            config.params = params;
        }
        if let Some(threads) = self.threads {
            config.threads = threads;
        }
        if let Some(ref database) = self.database {
            config.database = database.clone();
        }
        if let Some(ref table) = self.table {
            config.table = table.clone();
        }
        if let Some(unit) = self.unit {
            config.unit = unit;
        }
        config.validate()?;
        Ok(config)
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cli.log_level))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match run(&cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error[{}]: {}", e.error_code(), e);
            ExitCode::from(e.exit_code() as u8)
        }
    }
}

fn run(cli: &Cli) -> Result<ExitCode> {
    let config = cli.bench_config()?;
    let filter = ScenarioFilter::new(&cli.include, &cli.exclude)?;

    if cli.list {
        for kind in filter.select() {
            println!("{:<28} {}", kind.as_str(), kind.description());
        }
        return Ok(ExitCode::SUCCESS);
    }

    let store = MemoryMetastore::new().with_latency(Duration::from_micros(cli.latency_us));
    let endpoint = store.endpoint();
    let client = store.connect()?;
    debug!(endpoint = %endpoint, "Connected");

    let data = BenchData::new(client.as_ref(), &store, &config);
    let suite = BenchSuite::new(&config, data, &filter)?;
    if suite.scenarios().is_empty() {
        return Err(BenchError::Config(
            "no scenario matches the given patterns".to_string(),
        ));
    }
    info!(scenarios = suite.scenarios().len(), "Running benchmark suite");

    let outcome = suite.run()?;
    let report = RunReport::new(&config, endpoint, &outcome);

    if let Some(ref path) = cli.json {
        report.write_json(path)?;
        println!("Report saved to {}", path.display());
    }
    report::print_summary(&report);

    match outcome.failures.first() {
        None => Ok(ExitCode::SUCCESS),
        Some(failure) => Ok(ExitCode::from(failure.error.exit_code() as u8)),
    }
}
