//! Terminal tables and JSON export of suite results

use std::path::Path;

use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, Cell, Color, Table};
use serde::Serialize;

use libmetabench_core::scenarios::{ScenarioFailure, SuiteReport};
use libmetabench_core::{
    BenchConfig, BenchError, LatencyPercentiles, ScenarioOutcome, Summary, ThroughputReport,
    TimeUnit,
};

/// Serializable record of one `metabench` run
#[derive(Debug, Serialize)]
pub struct RunReport {
    pub timestamp: String,
    pub endpoint: String,
    pub config: BenchConfig,
    pub scenarios: Vec<ScenarioEntry>,
    pub failures: Vec<FailureEntry>,
}

#[derive(Debug, Serialize)]
pub struct ScenarioEntry {
    pub name: String,
    pub summary: Summary,
    pub latency: LatencyPercentiles,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub throughput: Option<ThroughputReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub throughput_anomaly: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct FailureEntry {
    pub name: String,
    pub code: String,
    pub message: String,
    /// Samples gathered before the scenario aborted
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partial: Option<Summary>,
}

impl RunReport {
    pub fn new(config: &BenchConfig, endpoint: String, suite: &SuiteReport) -> Self {
        let unit = config.unit;
        Self {
            timestamp: chrono::Utc::now().to_rfc3339(),
            endpoint,
            config: config.clone(),
            scenarios: suite.outcomes.iter().map(|o| scenario_entry(o, unit)).collect(),
            failures: suite.failures.iter().map(|f| failure_entry(f, unit)).collect(),
        }
    }

    pub fn write_json(&self, path: &Path) -> Result<(), BenchError> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

fn scenario_entry(outcome: &ScenarioOutcome, unit: TimeUnit) -> ScenarioEntry {
    ScenarioEntry {
        name: outcome.kind.to_string(),
        summary: outcome.stats.summary(unit),
        latency: outcome.stats.latency_percentiles(),
        throughput: outcome.throughput.clone(),
        throughput_anomaly: outcome.throughput_anomaly.clone(),
    }
}

fn failure_entry(failure: &ScenarioFailure, unit: TimeUnit) -> FailureEntry {
    FailureEntry {
        name: failure.kind.to_string(),
        code: failure.error.error_code().to_string(),
        message: failure.error.to_string(),
        partial: failure
            .error
            .partial_statistics()
            .filter(|s| !s.is_empty())
            .map(|s| s.summary(unit)),
    }
}

/// Per-scenario timing table
pub fn summary_table(report: &RunReport) -> Table {
    let unit = report.config.unit;
    let mut table = Table::new();
    table.load_preset(UTF8_FULL).apply_modifier(UTF8_ROUND_CORNERS);
    table.set_header(vec![
        "Scenario".to_string(),
        "Count".to_string(),
        format!("Mean ({})", unit),
        format!("Median ({})", unit),
        format!("Min ({})", unit),
        format!("Max ({})", unit),
        format!("p95 ({})", unit),
        format!("Stddev ({})", unit),
    ]);

    for entry in &report.scenarios {
        let s = &entry.summary;
        table.add_row(vec![
            Cell::new(&entry.name),
            Cell::new(s.count),
            Cell::new(format_value(s.mean)),
            Cell::new(format_value(s.median)),
            Cell::new(format_value(s.min)),
            Cell::new(format_value(s.max)),
            Cell::new(format_value(s.p95)),
            Cell::new(format_value(s.stddev)),
        ]);
    }
    for failure in &report.failures {
        table.add_row(vec![
            Cell::new(&failure.name).fg(Color::Red),
            Cell::new(failure.partial.as_ref().map_or(0, |p| p.count)),
            Cell::new(failure.code.as_str()).fg(Color::Red),
        ]);
    }
    table
}

/// Print the results table followed by throughput and failure lines
pub fn print_summary(report: &RunReport) {
    println!("\n=== METABENCH RESULTS ===\n");
    println!("Endpoint:     {}", report.endpoint);
    println!("Iterations:   {}", report.config.iterations);
    println!("Partitions:   {}", report.config.partitions);
    println!("Threads:      {}", report.config.threads);
    println!();
    println!("{}", summary_table(report));

    for entry in &report.scenarios {
        if let Some(ref tp) = entry.throughput {
            println!(
                "Throughput {}: {:.0} events/sec ({} events in {:.2}s)",
                entry.name,
                tp.events_per_second,
                tp.events,
                tp.elapsed.as_secs_f64()
            );
        }
        if let Some(ref anomaly) = entry.throughput_anomaly {
            println!("Throughput {}: not available ({})", entry.name, anomaly);
        }
    }

    if !report.failures.is_empty() {
        println!();
        for failure in &report.failures {
            eprintln!("FAILED {}: {}", failure.name, failure.message);
        }
    }
}

fn format_value(v: f64) -> String {
    if v >= 100.0 {
        format!("{:.0}", v)
    } else {
        format!("{:.3}", v)
    }
}
