//! Benchmark scenario catalogue
//!
//! Every scenario builds a [`Workload`] around one metastore call (or a
//! small fixed sequence of calls) and runs it through the harness. State
//! created for a scenario is removed by its cleanup phase. Scenarios whose
//! measured call changes state restore it with a per-iteration hook, or
//! measure a pair of inverse operations.

use std::collections::BTreeMap;
use std::fmt;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::client::{Connector, MetastoreClient, ServiceResult};
use crate::config::BenchConfig;
use crate::error::{BenchError, Result};
use crate::harness::{MicroBenchmark, Workload};
use crate::model::{make_parameters, make_partitions, partition_names, Partition, Table};
use crate::orchestrator::{namespace_for, ConcurrentRunner};
use crate::stats::Statistics;
use crate::throughput::{measure_throughput, ThroughputReport};

const TMP_TABLE_PREFIX: &str = "tmp_table_";
const PARTITION_PREFIX: &str = "d";
const RELOCATED: &str = "newLocation";

/// Connections and names shared by the scenarios of one run
pub struct BenchData<'a> {
    /// Connection used by single-threaded scenarios and counter reads
    pub client: &'a dyn MetastoreClient,
    /// Source of per-worker connections for concurrent scenarios
    pub connector: &'a dyn Connector,
    pub db_name: String,
    pub table_name: String,
}

impl<'a> BenchData<'a> {
    pub fn new(
        client: &'a dyn MetastoreClient,
        connector: &'a dyn Connector,
        config: &BenchConfig,
    ) -> Self {
        Self {
            client,
            connector,
            db_name: config.database.clone(),
            table_name: config.table.clone(),
        }
    }
}

/// Numeric knobs of the sized scenarios
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScenarioParams {
    /// Partitions (or tables) created by sized scenarios
    pub partitions: usize,
    /// Parameter-map entries per partition
    pub params: usize,
    /// Workers in concurrent scenarios
    pub threads: usize,
}

impl ScenarioParams {
    pub fn validate(&self) -> Result<()> {
        if self.partitions == 0 {
            return Err(BenchError::Config("partition count must be positive".to_string()));
        }
        if self.threads == 0 {
            return Err(BenchError::Config("thread count must be positive".to_string()));
        }
        Ok(())
    }
}

impl From<&BenchConfig> for ScenarioParams {
    fn from(config: &BenchConfig) -> Self {
        Self {
            partitions: config.partitions,
            params: config.params,
            threads: config.threads,
        }
    }
}

/// Names of all available scenarios
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioKind {
    ListDatabases,
    ListTables,
    GetTable,
    CreateTable,
    DropTable,
    DropTableWithPartitions,
    ListManyTables,
    AddPartition,
    DropPartition,
    ListPartitions,
    GetPartitions,
    AddPartitions,
    DropPartitions,
    GetPartitionNames,
    GetPartitionsByNames,
    RenameTable,
    AlterPartitions,
    Caad,
    DropDatabase,
    GetNotificationId,
    ConcurrentPartitionOps,
    ConcurrentCaad,
}

impl ScenarioKind {
    pub const ALL: [ScenarioKind; 22] = [
        ScenarioKind::ListDatabases,
        ScenarioKind::ListTables,
        ScenarioKind::GetTable,
        ScenarioKind::CreateTable,
        ScenarioKind::DropTable,
        ScenarioKind::DropTableWithPartitions,
        ScenarioKind::ListManyTables,
        ScenarioKind::AddPartition,
        ScenarioKind::DropPartition,
        ScenarioKind::ListPartitions,
        ScenarioKind::GetPartitions,
        ScenarioKind::AddPartitions,
        ScenarioKind::DropPartitions,
        ScenarioKind::GetPartitionNames,
        ScenarioKind::GetPartitionsByNames,
        ScenarioKind::RenameTable,
        ScenarioKind::AlterPartitions,
        ScenarioKind::Caad,
        ScenarioKind::DropDatabase,
        ScenarioKind::GetNotificationId,
        ScenarioKind::ConcurrentPartitionOps,
        ScenarioKind::ConcurrentCaad,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ScenarioKind::ListDatabases => "list_databases",
            ScenarioKind::ListTables => "list_tables",
            ScenarioKind::GetTable => "get_table",
            ScenarioKind::CreateTable => "create_table",
            ScenarioKind::DropTable => "drop_table",
            ScenarioKind::DropTableWithPartitions => "drop_table_with_partitions",
            ScenarioKind::ListManyTables => "list_many_tables",
            ScenarioKind::AddPartition => "add_partition",
            ScenarioKind::DropPartition => "drop_partition",
            ScenarioKind::ListPartitions => "list_partitions",
            ScenarioKind::GetPartitions => "get_partitions",
            ScenarioKind::AddPartitions => "add_partitions",
            ScenarioKind::DropPartitions => "drop_partitions",
            ScenarioKind::GetPartitionNames => "get_partition_names",
            ScenarioKind::GetPartitionsByNames => "get_partitions_by_names",
            ScenarioKind::RenameTable => "rename_table",
            ScenarioKind::AlterPartitions => "alter_partitions",
            ScenarioKind::Caad => "caad",
            ScenarioKind::DropDatabase => "drop_database",
            ScenarioKind::GetNotificationId => "get_notification_id",
            ScenarioKind::ConcurrentPartitionOps => "concurrent_partition_ops",
            ScenarioKind::ConcurrentCaad => "concurrent_caad",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            ScenarioKind::ListDatabases => "List all databases",
            ScenarioKind::ListTables => "List all tables of the bench database",
            ScenarioKind::GetTable => "Fetch one partitioned table",
            ScenarioKind::CreateTable => "Create a table (dropped between iterations)",
            ScenarioKind::DropTable => "Drop a table (recreated between iterations)",
            ScenarioKind::DropTableWithPartitions => "Drop a table holding N partitions",
            ScenarioKind::ListManyTables => "List a database holding N tables",
            ScenarioKind::AddPartition => "Add one partition",
            ScenarioKind::DropPartition => "Drop one partition",
            ScenarioKind::ListPartitions => "List a table with a single partition",
            ScenarioKind::GetPartitions => "List a table with N partitions",
            ScenarioKind::AddPartitions => "Add N partitions in one call",
            ScenarioKind::DropPartitions => "Drop N partitions in one call",
            ScenarioKind::GetPartitionNames => "List partition names of a table with N partitions",
            ScenarioKind::GetPartitionsByNames => "Fetch N partitions by name",
            ScenarioKind::RenameTable => "Rename a table with N partitions and back",
            ScenarioKind::AlterPartitions => "Relocate N partitions and restore them",
            ScenarioKind::Caad => "Create table, add N partitions, alter them twice, drop",
            ScenarioKind::DropDatabase => "Drop a database holding N tables",
            ScenarioKind::GetNotificationId => "Read the notification event counter",
            ScenarioKind::ConcurrentPartitionOps => {
                "T workers each add and drop N partitions of a shared table"
            }
            ScenarioKind::ConcurrentCaad => "T workers each run the create/add/alter/drop cycle",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.to_lowercase().replace('-', "_");
        Self::ALL.into_iter().find(|k| k.as_str() == name)
    }

    /// Whether this scenario drives the service from several workers
    pub fn is_concurrent(&self) -> bool {
        matches!(
            self,
            ScenarioKind::ConcurrentPartitionOps | ScenarioKind::ConcurrentCaad
        )
    }
}

impl fmt::Display for ScenarioKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one successful scenario
#[derive(Debug, Clone)]
pub struct ScenarioOutcome {
    pub kind: ScenarioKind,
    pub stats: Statistics,
    /// Present for concurrent scenarios whose counter delta was usable
    pub throughput: Option<ThroughputReport>,
    /// Why throughput could not be derived, if it could not
    pub throughput_anomaly: Option<String>,
}

impl ScenarioOutcome {
    fn timing(kind: ScenarioKind, stats: Statistics) -> Self {
        Self {
            kind,
            stats,
            throughput: None,
            throughput_anomaly: None,
        }
    }
}

/// Validate `params` and run scenario `kind`
pub fn run_scenario(
    kind: ScenarioKind,
    bench: &MicroBenchmark,
    data: &BenchData<'_>,
    params: &ScenarioParams,
) -> Result<ScenarioOutcome> {
    params.validate()?;
    debug!(scenario = %kind, ?params, "Running scenario");

    let n = params.partitions;
    let stats = match kind {
        ScenarioKind::ListDatabases => benchmark_list_databases(bench, data)?,
        ScenarioKind::ListTables => benchmark_list_tables(bench, data)?,
        ScenarioKind::GetTable => benchmark_get_table(bench, data)?,
        ScenarioKind::CreateTable => benchmark_create_table(bench, data)?,
        ScenarioKind::DropTable => benchmark_drop_table(bench, data)?,
        ScenarioKind::DropTableWithPartitions => {
            benchmark_drop_table_with_partitions(bench, data, n, params.params)?
        }
        ScenarioKind::ListManyTables => benchmark_list_many_tables(bench, data, n)?,
        ScenarioKind::AddPartition => benchmark_add_partition(bench, data)?,
        ScenarioKind::DropPartition => benchmark_drop_partition(bench, data)?,
        ScenarioKind::ListPartitions => benchmark_list_partitions(bench, data, 1)?,
        ScenarioKind::GetPartitions => benchmark_list_partitions(bench, data, n)?,
        ScenarioKind::AddPartitions => benchmark_add_partitions(bench, data, n)?,
        ScenarioKind::DropPartitions => benchmark_drop_partitions(bench, data, n)?,
        ScenarioKind::GetPartitionNames => benchmark_get_partition_names(bench, data, n)?,
        ScenarioKind::GetPartitionsByNames => benchmark_get_partitions_by_names(bench, data, n)?,
        ScenarioKind::RenameTable => benchmark_rename_table(bench, data, n)?,
        ScenarioKind::AlterPartitions => {
            benchmark_alter_partitions(bench, data, n, params.params)?
        }
        ScenarioKind::Caad => benchmark_caad(bench, data, n, params.params)?,
        ScenarioKind::DropDatabase => benchmark_drop_database(bench, data, n)?,
        ScenarioKind::GetNotificationId => benchmark_get_notification_id(bench, data)?,
        ScenarioKind::ConcurrentPartitionOps => {
            return benchmark_concurrent_partition_ops(bench, data, n, params.threads);
        }
        ScenarioKind::ConcurrentCaad => {
            return benchmark_concurrent_caad(bench, data, n, params.params, params.threads);
        }
    };
    Ok(ScenarioOutcome::timing(kind, stats))
}

// --- Helpers --------------------------------------------------------------

/// Create the single-column table partitioned by `date`
fn create_partitioned_table(client: &dyn MetastoreClient, db: &str, name: &str) -> ServiceResult<Table> {
    let table = Table::partitioned(db, name);
    client.create_table(&table)?;
    Ok(table)
}

/// Add `count` partitions `<prefix>0..` to an existing table in one call
fn add_many_partitions(
    client: &dyn MetastoreClient,
    db: &str,
    table: &str,
    prefix: &str,
    count: usize,
    parameters: &BTreeMap<String, String>,
) -> ServiceResult<Vec<Partition>> {
    let table = client.get_table(db, table)?;
    let partitions = make_partitions(&table, prefix, count, parameters)?;
    client.add_partitions(&partitions)?;
    Ok(partitions)
}

fn create_many_tables(client: &dyn MetastoreClient, db: &str, count: usize) -> ServiceResult<()> {
    for i in 0..count {
        client.create_table(&Table::partitioned(db, format!("{}{}", TMP_TABLE_PREFIX, i)))?;
    }
    Ok(())
}

/// Drop whatever exists of the tables made by [`create_many_tables`]
fn drop_many_tables(client: &dyn MetastoreClient, db: &str, count: usize) -> ServiceResult<()> {
    let mut first_error = None;
    for i in 0..count {
        if let Err(e) = drop_table_if_exists(client, db, &format!("{}{}", TMP_TABLE_PREFIX, i)) {
            first_error.get_or_insert(e);
        }
    }
    first_error.map_or(Ok(()), Err)
}

fn drop_table_if_exists(client: &dyn MetastoreClient, db: &str, name: &str) -> ServiceResult<()> {
    if client.table_exists(db, name)? {
        client.drop_table(db, name)?;
    }
    Ok(())
}

fn drop_database_if_exists(client: &dyn MetastoreClient, name: &str) -> ServiceResult<()> {
    if client.database_exists(name)? {
        client.drop_database(name)?;
    }
    Ok(())
}

/// Copies of `partitions` moved under a new location
fn relocated(partitions: &[Partition]) -> Vec<Partition> {
    partitions.iter().map(|p| p.relocated(RELOCATED)).collect()
}

/// Create a table with `count` partitions, relocate them in one batch call,
/// restore them one at a time, and drop the table.
fn caad(
    client: &dyn MetastoreClient,
    db: &str,
    table: &str,
    count: usize,
    parameters: &BTreeMap<String, String>,
) -> ServiceResult<()> {
    create_partitioned_table(client, db, table)?;
    add_many_partitions(client, db, table, PARTITION_PREFIX, count, parameters)?;
    let old_partitions = client.list_partitions(db, table)?;
    client.alter_partitions(db, table, &relocated(&old_partitions))?;
    for partition in &old_partitions {
        client.alter_partition(db, table, partition)?;
    }
    client.drop_table(db, table)
}

// --- Read-only scenarios ----------------------------------------------------

pub fn benchmark_list_databases(bench: &MicroBenchmark, data: &BenchData<'_>) -> Result<Statistics> {
    let client = data.client;
    bench.measure(|| client.get_all_databases(None))
}

pub fn benchmark_list_tables(bench: &MicroBenchmark, data: &BenchData<'_>) -> Result<Statistics> {
    let client = data.client;
    let db = data.db_name.as_str();
    bench.measure(|| client.get_all_tables(db, None))
}

pub fn benchmark_get_notification_id(
    bench: &MicroBenchmark,
    data: &BenchData<'_>,
) -> Result<Statistics> {
    let client = data.client;
    bench.measure(|| client.current_notification_id())
}

pub fn benchmark_get_table(bench: &MicroBenchmark, data: &BenchData<'_>) -> Result<Statistics> {
    let (client, db, tbl) = (data.client, data.db_name.as_str(), data.table_name.as_str());
    bench.run(
        Workload::new(|| client.get_table(db, tbl))
            .setup(|| create_partitioned_table(client, db, tbl))
            .cleanup(|| drop_table_if_exists(client, db, tbl)),
    )
}

pub fn benchmark_list_many_tables(
    bench: &MicroBenchmark,
    data: &BenchData<'_>,
    count: usize,
) -> Result<Statistics> {
    let (client, db) = (data.client, data.db_name.as_str());
    bench.run(
        Workload::new(|| client.get_all_tables(db, None))
            .setup(|| create_many_tables(client, db, count))
            .cleanup(|| drop_many_tables(client, db, count)),
    )
}

pub fn benchmark_list_partitions(
    bench: &MicroBenchmark,
    data: &BenchData<'_>,
    count: usize,
) -> Result<Statistics> {
    let (client, db, tbl) = (data.client, data.db_name.as_str(), data.table_name.as_str());
    bench.run(
        Workload::new(|| client.list_partitions(db, tbl))
            .setup(|| {
                create_partitioned_table(client, db, tbl)?;
                add_many_partitions(client, db, tbl, PARTITION_PREFIX, count, &BTreeMap::new())?;
                debug!(count, "Created partitions");
                Ok::<_, BenchError>(())
            })
            .cleanup(|| drop_table_if_exists(client, db, tbl)),
    )
}

pub fn benchmark_get_partition_names(
    bench: &MicroBenchmark,
    data: &BenchData<'_>,
    count: usize,
) -> Result<Statistics> {
    let (client, db, tbl) = (data.client, data.db_name.as_str(), data.table_name.as_str());
    bench.run(
        Workload::new(|| client.get_partition_names(db, tbl))
            .setup(|| {
                create_partitioned_table(client, db, tbl)?;
                add_many_partitions(client, db, tbl, PARTITION_PREFIX, count, &BTreeMap::new())
            })
            .cleanup(|| drop_table_if_exists(client, db, tbl)),
    )
}

pub fn benchmark_get_partitions_by_names(
    bench: &MicroBenchmark,
    data: &BenchData<'_>,
    count: usize,
) -> Result<Statistics> {
    let (client, db, tbl) = (data.client, data.db_name.as_str(), data.table_name.as_str());
    let names = partition_names(PARTITION_PREFIX, count);
    bench.run(
        Workload::new(|| client.get_partitions_by_names(db, tbl, &names))
            .setup(|| {
                create_partitioned_table(client, db, tbl)?;
                add_many_partitions(client, db, tbl, PARTITION_PREFIX, count, &BTreeMap::new())
            })
            .cleanup(|| drop_table_if_exists(client, db, tbl)),
    )
}

// --- Table lifecycle --------------------------------------------------------

pub fn benchmark_create_table(bench: &MicroBenchmark, data: &BenchData<'_>) -> Result<Statistics> {
    let (client, db, tbl) = (data.client, data.db_name.as_str(), data.table_name.as_str());
    let table = Table::new(db, tbl);
    bench.run(
        Workload::new(|| client.create_table(&table))
            .after_each(|| client.drop_table(db, tbl))
            .cleanup(|| drop_table_if_exists(client, db, tbl)),
    )
}

pub fn benchmark_drop_table(bench: &MicroBenchmark, data: &BenchData<'_>) -> Result<Statistics> {
    let (client, db, tbl) = (data.client, data.db_name.as_str(), data.table_name.as_str());
    let table = Table::new(db, tbl);
    bench.run(
        Workload::new(|| client.drop_table(db, tbl))
            .before_each(|| client.create_table(&table))
            .cleanup(|| drop_table_if_exists(client, db, tbl)),
    )
}

pub fn benchmark_drop_table_with_partitions(
    bench: &MicroBenchmark,
    data: &BenchData<'_>,
    count: usize,
    nparams: usize,
) -> Result<Statistics> {
    let (client, db, tbl) = (data.client, data.db_name.as_str(), data.table_name.as_str());
    let parameters = make_parameters(nparams);
    bench.run(
        Workload::new(|| client.drop_table(db, tbl))
            .before_each(|| {
                create_partitioned_table(client, db, tbl)?;
                add_many_partitions(client, db, tbl, PARTITION_PREFIX, count, &parameters)
            })
            .cleanup(|| drop_table_if_exists(client, db, tbl)),
    )
}

pub fn benchmark_rename_table(
    bench: &MicroBenchmark,
    data: &BenchData<'_>,
    count: usize,
) -> Result<Statistics> {
    let (client, db, tbl) = (data.client, data.db_name.as_str(), data.table_name.as_str());
    let original = Table::partitioned(db, tbl);
    let renamed = original.renamed(format!("{}_renamed", tbl));
    bench.run(
        // Rename there and back so every iteration starts from the same state
        Workload::new(|| {
            client.alter_table(db, &original.name, &renamed)?;
            client.alter_table(db, &renamed.name, &original)
        })
        .setup(|| {
            client.create_table(&original)?;
            add_many_partitions(client, db, tbl, PARTITION_PREFIX, count, &BTreeMap::new())
        })
        .cleanup(|| {
            drop_table_if_exists(client, db, &renamed.name)?;
            drop_table_if_exists(client, db, tbl)
        }),
    )
}

pub fn benchmark_drop_database(
    bench: &MicroBenchmark,
    data: &BenchData<'_>,
    count: usize,
) -> Result<Statistics> {
    let client = data.client;
    let victim = format!("{}_drop", data.db_name);
    let db = victim.as_str();
    bench.run(
        Workload::new(|| client.drop_database(db))
            .setup(|| drop_database_if_exists(client, db))
            .before_each(|| {
                client.create_database(db)?;
                create_many_tables(client, db, count)
            })
            .cleanup(|| drop_database_if_exists(client, db)),
    )
}

// --- Partition lifecycle ----------------------------------------------------

pub fn benchmark_add_partition(bench: &MicroBenchmark, data: &BenchData<'_>) -> Result<Statistics> {
    let (client, db, tbl) = (data.client, data.db_name.as_str(), data.table_name.as_str());
    let values = vec![format!("{}1", PARTITION_PREFIX)];
    let partition = Partition::for_table(&Table::partitioned(db, tbl), values.clone())?;
    bench.run(
        Workload::new(|| client.add_partition(&partition))
            .setup(|| create_partitioned_table(client, db, tbl))
            .after_each(|| client.drop_partition(db, tbl, &values))
            .cleanup(|| drop_table_if_exists(client, db, tbl)),
    )
}

pub fn benchmark_drop_partition(bench: &MicroBenchmark, data: &BenchData<'_>) -> Result<Statistics> {
    let (client, db, tbl) = (data.client, data.db_name.as_str(), data.table_name.as_str());
    let values = vec![format!("{}1", PARTITION_PREFIX)];
    let partition = Partition::for_table(&Table::partitioned(db, tbl), values.clone())?;
    bench.run(
        Workload::new(|| client.drop_partition(db, tbl, &values))
            .setup(|| create_partitioned_table(client, db, tbl))
            .before_each(|| client.add_partition(&partition))
            .cleanup(|| drop_table_if_exists(client, db, tbl)),
    )
}

pub fn benchmark_add_partitions(
    bench: &MicroBenchmark,
    data: &BenchData<'_>,
    count: usize,
) -> Result<Statistics> {
    let (client, db, tbl) = (data.client, data.db_name.as_str(), data.table_name.as_str());
    let partitions = make_partitions(
        &Table::partitioned(db, tbl),
        PARTITION_PREFIX,
        count,
        &BTreeMap::new(),
    )?;
    bench.run(
        Workload::new(|| client.add_partitions(&partitions))
            .setup(|| create_partitioned_table(client, db, tbl))
            .after_each(|| client.drop_partitions(db, tbl, None))
            .cleanup(|| drop_table_if_exists(client, db, tbl)),
    )
}

pub fn benchmark_drop_partitions(
    bench: &MicroBenchmark,
    data: &BenchData<'_>,
    count: usize,
) -> Result<Statistics> {
    let (client, db, tbl) = (data.client, data.db_name.as_str(), data.table_name.as_str());
    let partitions = make_partitions(
        &Table::partitioned(db, tbl),
        PARTITION_PREFIX,
        count,
        &BTreeMap::new(),
    )?;
    bench.run(
        Workload::new(|| client.drop_partitions(db, tbl, None))
            .setup(|| create_partitioned_table(client, db, tbl))
            .before_each(|| client.add_partitions(&partitions))
            .cleanup(|| drop_table_if_exists(client, db, tbl)),
    )
}

pub fn benchmark_alter_partitions(
    bench: &MicroBenchmark,
    data: &BenchData<'_>,
    count: usize,
    nparams: usize,
) -> Result<Statistics> {
    let (client, db, tbl) = (data.client, data.db_name.as_str(), data.table_name.as_str());
    let parameters = make_parameters(nparams);
    let old_partitions = make_partitions(
        &Table::partitioned(db, tbl),
        PARTITION_PREFIX,
        count,
        &parameters,
    )?;
    let new_partitions = relocated(&old_partitions);
    bench.run(
        // Relocate in one batch, then restore one by one, so the state is idempotent
        Workload::new(|| {
            client.alter_partitions(db, tbl, &new_partitions)?;
            for partition in &old_partitions {
                client.alter_partition(db, tbl, partition)?;
            }
            Ok::<_, BenchError>(())
        })
        .setup(|| {
            create_partitioned_table(client, db, tbl)?;
            client.add_partitions(&old_partitions)
        })
        .cleanup(|| drop_table_if_exists(client, db, tbl)),
    )
}

pub fn benchmark_caad(
    bench: &MicroBenchmark,
    data: &BenchData<'_>,
    count: usize,
    nparams: usize,
) -> Result<Statistics> {
    let (client, db, tbl) = (data.client, data.db_name.as_str(), data.table_name.as_str());
    let parameters = make_parameters(nparams);
    bench.run(
        Workload::new(|| caad(client, db, tbl, count, &parameters))
            .cleanup(|| drop_table_if_exists(client, db, tbl)),
    )
}

// --- Concurrent scenarios ---------------------------------------------------

/// Workers share one table; worker `i` adds and then drops its own `count`
/// partitions, whose values carry the worker's namespace as prefix.
pub fn benchmark_concurrent_partition_ops(
    bench: &MicroBenchmark,
    data: &BenchData<'_>,
    count: usize,
    threads: usize,
) -> Result<ScenarioOutcome> {
    let runner = ConcurrentRunner::new(threads)?;
    let (client, db, tbl) = (data.client, data.db_name.as_str(), data.table_name.as_str());
    let table = Table::partitioned(db, tbl);

    let workload = Workload::new(|| {
        runner.run(data.connector, PARTITION_PREFIX, |ctx| {
            let prefix = format!("{}_", ctx.namespace);
            let partitions = make_partitions(&table, &prefix, count, &BTreeMap::new());
            let names = partition_names(&prefix, count);
            move |client: &dyn MetastoreClient| -> Result<()> {
                client.add_partitions(&partitions?)?;
                client.drop_partitions(db, tbl, Some(&names))?;
                Ok(())
            }
        })
    })
    .setup(|| client.create_table(&table))
    .cleanup(|| drop_table_if_exists(client, db, tbl));

    let measurement = measure_throughput(bench, client, workload)?;
    Ok(concurrent_outcome(
        ScenarioKind::ConcurrentPartitionOps,
        measurement,
    ))
}

/// Worker `i` runs the create/add/alter/drop cycle on its own table
/// `<table>_<i>`, using a connection of its own.
pub fn benchmark_concurrent_caad(
    bench: &MicroBenchmark,
    data: &BenchData<'_>,
    count: usize,
    nparams: usize,
    threads: usize,
) -> Result<ScenarioOutcome> {
    let runner = ConcurrentRunner::new(threads)?;
    let (client, db, tbl) = (data.client, data.db_name.as_str(), data.table_name.as_str());
    let parameters = make_parameters(nparams);

    let workload = Workload::new(|| {
        runner.run(data.connector, tbl, |ctx| {
            let table = ctx.namespace.clone();
            let parameters = &parameters;
            move |client: &dyn MetastoreClient| -> Result<()> {
                caad(client, db, &table, count, parameters)?;
                Ok(())
            }
        })
    })
    .cleanup(|| {
        // Tables survive only when a worker failed part-way
        let mut first_error = None;
        for index in 0..threads {
            if let Err(e) = drop_table_if_exists(client, db, &namespace_for(tbl, index)) {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    });

    let measurement = measure_throughput(bench, client, workload)?;
    Ok(concurrent_outcome(ScenarioKind::ConcurrentCaad, measurement))
}

fn concurrent_outcome(
    kind: ScenarioKind,
    measurement: crate::throughput::ThroughputMeasurement,
) -> ScenarioOutcome {
    let (throughput, throughput_anomaly) = match measurement.throughput {
        Ok(report) => (Some(report), None),
        Err(anomaly) => (None, Some(anomaly.to_string())),
    };
    ScenarioOutcome {
        kind,
        stats: measurement.stats,
        throughput,
        throughput_anomaly,
    }
}

// --- Suite ------------------------------------------------------------------

/// Include/exclude regular expressions over scenario names
#[derive(Debug, Clone, Default)]
pub struct ScenarioFilter {
    include: Vec<Regex>,
    exclude: Vec<Regex>,
}

impl ScenarioFilter {
    pub fn new(include: &[String], exclude: &[String]) -> Result<Self> {
        let compile = |patterns: &[String]| -> Result<Vec<Regex>> {
            patterns
                .iter()
                .map(|p| {
                    Regex::new(p).map_err(|e| {
                        BenchError::Config(format!("invalid scenario pattern '{}': {}", p, e))
                    })
                })
                .collect()
        };
        Ok(Self {
            include: compile(include)?,
            exclude: compile(exclude)?,
        })
    }

    /// A name is selected when some include pattern (or none given) matches
    /// it and no exclude pattern does
    pub fn matches(&self, name: &str) -> bool {
        let included = self.include.is_empty() || self.include.iter().any(|r| r.is_match(name));
        included && !self.exclude.iter().any(|r| r.is_match(name))
    }

    /// Selected scenarios in catalogue order
    pub fn select(&self) -> Vec<ScenarioKind> {
        ScenarioKind::ALL
            .into_iter()
            .filter(|k| self.matches(k.as_str()))
            .collect()
    }
}

/// A scenario that did not complete
#[derive(Debug)]
pub struct ScenarioFailure {
    pub kind: ScenarioKind,
    pub error: BenchError,
}

/// Everything a suite run produced, in execution order
#[derive(Debug, Default)]
pub struct SuiteReport {
    pub outcomes: Vec<ScenarioOutcome>,
    pub failures: Vec<ScenarioFailure>,
}

impl SuiteReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Runs a selection of scenarios one after another against one service
pub struct BenchSuite<'a> {
    bench: MicroBenchmark,
    params: ScenarioParams,
    data: BenchData<'a>,
    scenarios: Vec<ScenarioKind>,
}

impl<'a> BenchSuite<'a> {
    pub fn new(config: &BenchConfig, data: BenchData<'a>, filter: &ScenarioFilter) -> Result<Self> {
        config.validate()?;
        let params = ScenarioParams::from(config);
        params.validate()?;
        Ok(Self {
            bench: MicroBenchmark::new(config.iterations)?,
            params,
            data,
            scenarios: filter.select(),
        })
    }

    pub fn scenarios(&self) -> &[ScenarioKind] {
        &self.scenarios
    }

    /// Run every selected scenario.
    ///
    /// The bench database is created first when missing; failing to do so is
    /// returned as an error. A failing scenario is recorded and the suite
    /// moves on to the next one.
    pub fn run(&self) -> Result<SuiteReport> {
        let client = self.data.client;
        let db = self.data.db_name.as_str();
        if !client.database_exists(db)? {
            info!(database = db, "Creating bench database");
            client.create_database(db)?;
        }

        let mut report = SuiteReport::default();
        for &kind in &self.scenarios {
            info!(scenario = %kind, "Starting scenario");
            match run_scenario(kind, &self.bench, &self.data, &self.params) {
                Ok(outcome) => {
                    debug!(scenario = %kind, samples = outcome.stats.count(), "Scenario complete");
                    report.outcomes.push(outcome);
                }
                Err(error) => {
                    error!(scenario = %kind, error = %error, "Scenario failed");
                    report.failures.push(ScenarioFailure { kind, error });
                }
            }
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scenario_names_roundtrip() {
        for kind in ScenarioKind::ALL {
            assert_eq!(ScenarioKind::from_name(kind.as_str()), Some(kind));
        }
        assert_eq!(
            ScenarioKind::from_name("Concurrent-CAAD"),
            Some(ScenarioKind::ConcurrentCaad)
        );
        assert_eq!(ScenarioKind::from_name("nope"), None);
    }

    #[test]
    fn test_scenario_names_unique() {
        let mut names: Vec<&str> = ScenarioKind::ALL.iter().map(|k| k.as_str()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), ScenarioKind::ALL.len());
    }

    #[test]
    fn test_only_concurrent_scenarios_flagged() {
        let concurrent: Vec<_> = ScenarioKind::ALL
            .into_iter()
            .filter(|k| k.is_concurrent())
            .collect();
        assert_eq!(
            concurrent,
            vec![ScenarioKind::ConcurrentPartitionOps, ScenarioKind::ConcurrentCaad]
        );
    }

    #[test]
    fn test_params_validation() {
        let ok = ScenarioParams { partitions: 1, params: 0, threads: 1 };
        ok.validate().unwrap();
        assert!(ScenarioParams { partitions: 0, ..ok }.validate().is_err());
        assert!(ScenarioParams { threads: 0, ..ok }.validate().is_err());
    }

    #[test]
    fn test_filter_include_and_exclude() {
        let filter = ScenarioFilter::new(
            &["partition".to_string()],
            &["^concurrent".to_string(), "names$".to_string()],
        )
        .unwrap();
        let selected = filter.select();
        assert!(selected.contains(&ScenarioKind::AddPartition));
        assert!(selected.contains(&ScenarioKind::DropTableWithPartitions));
        assert!(!selected.contains(&ScenarioKind::ConcurrentPartitionOps));
        assert!(!selected.contains(&ScenarioKind::GetPartitionNames));
        assert!(!selected.contains(&ScenarioKind::GetTable));
    }

    #[test]
    fn test_empty_filter_selects_everything() {
        let filter = ScenarioFilter::default();
        assert_eq!(filter.select(), ScenarioKind::ALL.to_vec());
    }

    #[test]
    fn test_bad_pattern_is_config_error() {
        let err = ScenarioFilter::new(&["(".to_string()], &[]).unwrap_err();
        assert!(matches!(err, BenchError::Config(_)));
    }
}
