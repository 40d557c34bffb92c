//! Scenario catalogue against the embedded metastore

use std::sync::atomic::{AtomicUsize, Ordering};

use libmetabench_core::scenarios::{
    benchmark_concurrent_caad, benchmark_concurrent_partition_ops, benchmark_get_partitions_by_names,
    benchmark_list_partitions,
};
use libmetabench_core::{
    run_scenario, BenchConfig, BenchData, BenchError, BenchSuite, MemoryConnection,
    MemoryMetastore, MetastoreClient, MicroBenchmark, Partition, Phase, ScenarioFilter,
    ScenarioKind, ScenarioParams, ServiceError, ServiceResult, Table,
};

const DB: &str = "bench_db";
const TABLE: &str = "bench_table";

fn config(iterations: usize) -> BenchConfig {
    BenchConfig {
        iterations,
        partitions: 4,
        params: 2,
        threads: 3,
        ..Default::default()
    }
}

fn store_with_db() -> (MemoryMetastore, MemoryConnection) {
    let store = MemoryMetastore::new();
    let client = store.open();
    client.create_database(DB).unwrap();
    (store, client)
}

#[test]
fn test_every_scenario_runs_and_cleans_up() {
    let (store, client) = store_with_db();
    let config = config(3);
    let bench = MicroBenchmark::new(config.iterations).unwrap();
    let data = BenchData::new(&client, &store, &config);
    let params = ScenarioParams::from(&config);

    for kind in ScenarioKind::ALL {
        let outcome = run_scenario(kind, &bench, &data, &params)
            .unwrap_or_else(|e| panic!("{} failed: {}", kind, e));
        assert_eq!(outcome.stats.count(), 3, "{}", kind);
        assert!(outcome.stats.is_complete());
        assert_eq!(outcome.throughput.is_some(), kind.is_concurrent(), "{}", kind);

        assert!(
            client.get_all_tables(DB, None).unwrap().is_empty(),
            "{} left tables behind",
            kind
        );
        assert_eq!(client.get_all_databases(None).unwrap(), vec![DB.to_string()]);
    }
}

#[test]
fn test_get_partitions_sees_every_partition() {
    let (store, client) = store_with_db();
    let config = config(2);
    let bench = MicroBenchmark::new(2).unwrap();
    let data = BenchData::new(&client, &store, &config);

    let counting = CountingClient::new(store.open());
    let counted = BenchData {
        client: &counting,
        ..BenchData::new(&client, &store, &config)
    };
    benchmark_list_partitions(&bench, &counted, 7).unwrap();
    assert_eq!(counting.last_partition_count.load(Ordering::SeqCst), 7);

    benchmark_get_partitions_by_names(&bench, &data, 5).unwrap();
    assert!(!client.table_exists(DB, TABLE).unwrap());
}

#[test]
fn test_concurrent_partition_ops_counts_events() {
    let (store, client) = store_with_db();
    let config = config(2);
    let bench = MicroBenchmark::new(2).unwrap();
    let data = BenchData::new(&client, &store, &config);

    let outcome = benchmark_concurrent_partition_ops(&bench, &data, 4, 3).unwrap();

    // create table + 2 iterations x 3 workers x (4 adds + 4 drops) + drop table
    let report = outcome.throughput.unwrap();
    assert_eq!(report.events, 1 + 2 * 3 * 8 + 1);
    assert_eq!(report.elapsed, outcome.stats.sum());
    assert!(report.events_per_second > 0.0);
    assert!(outcome.throughput_anomaly.is_none());
}

#[test]
fn test_concurrent_caad_uses_per_worker_tables() {
    let (store, client) = store_with_db();
    let config = config(2);
    let bench = MicroBenchmark::new(2).unwrap();
    let data = BenchData::new(&client, &store, &config);
    let opened_before = store.connections_opened();

    let outcome = benchmark_concurrent_caad(&bench, &data, 3, 0, 2).unwrap();

    // Per cycle: create + 3 adds + 3 batch alters + 3 single alters + drop
    assert_eq!(outcome.throughput.unwrap().events, 2 * 2 * (2 + 3 * 3));
    assert_eq!(store.connections_opened() - opened_before, 4);
    assert!(client.get_all_tables(DB, None).unwrap().is_empty());
}

#[test]
fn test_operation_failure_aborts_and_cleans_up() {
    let (store, client) = store_with_db();
    let config = config(5);
    let bench = MicroBenchmark::new(5).unwrap();
    let flaky = FlakyClient::new(store.open(), "list_partitions", 2);
    let data = BenchData {
        client: &flaky,
        ..BenchData::new(&client, &store, &config)
    };

    let err = benchmark_list_partitions(&bench, &data, 3).unwrap_err();
    let BenchError::Aborted(aborted) = err else {
        panic!("expected aborted run");
    };
    assert_eq!(aborted.phase, Phase::Operation);
    assert!(matches!(aborted.cause, BenchError::Service(_)));
    assert_eq!(aborted.partial.count(), 2);
    assert!(!aborted.partial.is_complete());
    assert!(aborted.cleanup_error.is_none());
    assert!(!client.table_exists(DB, TABLE).unwrap());
}

#[test]
fn test_setup_failure_records_no_samples() {
    let (store, client) = store_with_db();
    let config = config(5);
    let bench = MicroBenchmark::new(5).unwrap();
    let flaky = FlakyClient::new(store.open(), "create_table", 0);
    let data = BenchData {
        client: &flaky,
        ..BenchData::new(&client, &store, &config)
    };

    let err = run_scenario(ScenarioKind::GetTable, &bench, &data, &ScenarioParams::from(&config))
        .unwrap_err();
    let partial = err.partial_statistics().unwrap();
    assert!(partial.is_empty());
    assert!(matches!(err, BenchError::Aborted(ref a) if a.phase == Phase::Setup));
}

#[test]
fn test_invalid_params_rejected_before_any_call() {
    let (store, client) = store_with_db();
    let config = config(2);
    let bench = MicroBenchmark::new(2).unwrap();
    let data = BenchData::new(&client, &store, &config);
    let before = client.current_notification_id().unwrap();

    let params = ScenarioParams { partitions: 0, params: 0, threads: 1 };
    let err = run_scenario(ScenarioKind::AddPartitions, &bench, &data, &params).unwrap_err();
    assert!(matches!(err, BenchError::Config(_)));
    assert_eq!(client.current_notification_id().unwrap(), before);
}

#[test]
fn test_suite_continues_after_failure() {
    let store = MemoryMetastore::new();
    let client = store.open();
    let flaky = FlakyClient::new(store.open(), "get_table", 0);
    let config = config(2);
    let filter = ScenarioFilter::new(&["^(get_table|list_tables|list_databases)$".to_string()], &[])
        .unwrap();
    let suite = BenchSuite::new(&config, BenchData::new(&flaky, &store, &config), &filter).unwrap();
    assert_eq!(
        suite.scenarios(),
        &[ScenarioKind::ListDatabases, ScenarioKind::ListTables, ScenarioKind::GetTable]
    );

    let report = suite.run().unwrap();
    assert!(!report.is_success());
    assert_eq!(report.outcomes.len(), 2);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].kind, ScenarioKind::GetTable);
    // Database was created on demand
    assert!(client.database_exists(DB).unwrap());
}

/// Delegates to a real connection but fails one method after `ok_calls`
/// successful calls to it
struct FlakyClient {
    inner: MemoryConnection,
    method: &'static str,
    ok_calls: usize,
    calls: AtomicUsize,
}

impl FlakyClient {
    fn new(inner: MemoryConnection, method: &'static str, ok_calls: usize) -> Self {
        Self {
            inner,
            method,
            ok_calls,
            calls: AtomicUsize::new(0),
        }
    }

    fn check(&self, method: &str) -> ServiceResult<()> {
        if method == self.method && self.calls.fetch_add(1, Ordering::SeqCst) >= self.ok_calls {
            return Err(ServiceError::transport(format!("injected {} failure", method)));
        }
        Ok(())
    }
}

/// Delegates to a real connection and remembers partition list sizes
struct CountingClient {
    inner: MemoryConnection,
    last_partition_count: AtomicUsize,
}

impl CountingClient {
    fn new(inner: MemoryConnection) -> Self {
        Self {
            inner,
            last_partition_count: AtomicUsize::new(0),
        }
    }

    fn check(&self, _method: &str) -> ServiceResult<()> {
        Ok(())
    }
}

macro_rules! delegate_client {
    ($ty:ty, $on_list:expr) => {
        impl MetastoreClient for $ty {
            fn create_database(&self, name: &str) -> ServiceResult<()> {
                self.check("create_database")?;
                self.inner.create_database(name)
            }
            fn drop_database(&self, name: &str) -> ServiceResult<()> {
                self.check("drop_database")?;
                self.inner.drop_database(name)
            }
            fn get_all_databases(&self, filter: Option<&str>) -> ServiceResult<Vec<String>> {
                self.check("get_all_databases")?;
                self.inner.get_all_databases(filter)
            }
            fn get_all_tables(&self, db: &str, filter: Option<&str>) -> ServiceResult<Vec<String>> {
                self.check("get_all_tables")?;
                self.inner.get_all_tables(db, filter)
            }
            fn create_table(&self, table: &Table) -> ServiceResult<()> {
                self.check("create_table")?;
                self.inner.create_table(table)
            }
            fn get_table(&self, db: &str, name: &str) -> ServiceResult<Table> {
                self.check("get_table")?;
                self.inner.get_table(db, name)
            }
            fn alter_table(&self, db: &str, name: &str, table: &Table) -> ServiceResult<()> {
                self.check("alter_table")?;
                self.inner.alter_table(db, name, table)
            }
            fn drop_table(&self, db: &str, name: &str) -> ServiceResult<()> {
                self.check("drop_table")?;
                self.inner.drop_table(db, name)
            }
            fn add_partition(&self, partition: &Partition) -> ServiceResult<()> {
                self.check("add_partition")?;
                self.inner.add_partition(partition)
            }
            fn add_partitions(&self, partitions: &[Partition]) -> ServiceResult<()> {
                self.check("add_partitions")?;
                self.inner.add_partitions(partitions)
            }
            fn alter_partition(&self, db: &str, table: &str, partition: &Partition) -> ServiceResult<()> {
                self.check("alter_partition")?;
                self.inner.alter_partition(db, table, partition)
            }
            fn alter_partitions(&self, db: &str, table: &str, partitions: &[Partition]) -> ServiceResult<()> {
                self.check("alter_partitions")?;
                self.inner.alter_partitions(db, table, partitions)
            }
            fn drop_partition(&self, db: &str, table: &str, values: &[String]) -> ServiceResult<bool> {
                self.check("drop_partition")?;
                self.inner.drop_partition(db, table, values)
            }
            fn drop_partitions(&self, db: &str, table: &str, names: Option<&[String]>) -> ServiceResult<()> {
                self.check("drop_partitions")?;
                self.inner.drop_partitions(db, table, names)
            }
            fn list_partitions(&self, db: &str, table: &str) -> ServiceResult<Vec<Partition>> {
                self.check("list_partitions")?;
                let partitions = self.inner.list_partitions(db, table)?;
                let on_list: fn(&Self, usize) = $on_list;
                on_list(self, partitions.len());
                Ok(partitions)
            }
            fn get_partition_names(&self, db: &str, table: &str) -> ServiceResult<Vec<String>> {
                self.check("get_partition_names")?;
                self.inner.get_partition_names(db, table)
            }
            fn get_partitions_by_names(&self, db: &str, table: &str, names: &[String]) -> ServiceResult<Vec<Partition>> {
                self.check("get_partitions_by_names")?;
                self.inner.get_partitions_by_names(db, table, names)
            }
            fn current_notification_id(&self) -> ServiceResult<u64> {
                self.check("current_notification_id")?;
                self.inner.current_notification_id()
            }
        }
    };
}

delegate_client!(FlakyClient, |_, _| {});
delegate_client!(CountingClient, |client, count| {
    client.last_partition_count.store(count, Ordering::SeqCst)
});
