//! Embedded in-process metastore
//!
//! Serves as the built-in benchmark target and as the reference backend in
//! tests. Every `connect()` hands out a separate connection object; all of
//! them operate on one shared catalog guarded by a mutex, and every
//! state-changing call advances the notification counter by one per object
//! it touches.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use regex::Regex;
use tracing::debug;

use crate::client::{Connector, MetastoreClient, ServiceResult};
use crate::error::ServiceError;
use crate::model::{spec_name, Database, Partition, Table};

#[derive(Debug, Default)]
struct Catalog {
    databases: BTreeMap<String, DatabaseEntry>,
    notification_id: u64,
}

#[derive(Debug)]
struct DatabaseEntry {
    #[allow(dead_code)]
    database: Database,
    tables: BTreeMap<String, TableEntry>,
}

#[derive(Debug)]
struct TableEntry {
    table: Table,
    /// Keyed by partition name (`date=d0`)
    partitions: BTreeMap<String, Partition>,
}

impl Catalog {
    fn notify(&mut self, events: usize) {
        self.notification_id += events as u64;
    }

    fn database_mut(&mut self, db: &str) -> ServiceResult<&mut DatabaseEntry> {
        self.databases
            .get_mut(db)
            .ok_or_else(|| ServiceError::not_found(format!("database {}", db)))
    }

    fn table(&self, db: &str, name: &str) -> ServiceResult<&TableEntry> {
        self.databases
            .get(db)
            .ok_or_else(|| ServiceError::not_found(format!("database {}", db)))?
            .tables
            .get(name)
            .ok_or_else(|| ServiceError::not_found(format!("table {}.{}", db, name)))
    }

    fn table_mut(&mut self, db: &str, name: &str) -> ServiceResult<&mut TableEntry> {
        self.database_mut(db)?
            .tables
            .get_mut(name)
            .ok_or_else(|| ServiceError::not_found(format!("table {}.{}", db, name)))
    }
}

impl TableEntry {
    fn partition_name(&self, partition: &Partition) -> ServiceResult<String> {
        if partition.values.len() != self.table.partition_keys.len() {
            return Err(ServiceError::invalid(format!(
                "partition values {:?} do not match keys of {}.{}",
                partition.values, self.table.db_name, self.table.name
            )));
        }
        Ok(spec_name(&self.table.partition_keys, &partition.values))
    }
}

/// Shared in-memory metastore; hand it to the benchmarks as a [`Connector`]
#[derive(Debug, Clone)]
pub struct MemoryMetastore {
    catalog: Arc<Mutex<Catalog>>,
    latency: Duration,
    connections: Arc<AtomicUsize>,
}

impl Default for MemoryMetastore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryMetastore {
    pub fn new() -> Self {
        Self {
            catalog: Arc::new(Mutex::new(Catalog::default())),
            latency: Duration::ZERO,
            connections: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Add a fixed delay to every call, approximating a network round trip
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Number of connections opened so far
    pub fn connections_opened(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Open a connection with its concrete type
    pub fn open(&self) -> MemoryConnection {
        let id = self.connections.fetch_add(1, Ordering::SeqCst);
        debug!(connection = id, "Opened in-memory metastore connection");
        MemoryConnection {
            id,
            catalog: Arc::clone(&self.catalog),
            latency: self.latency,
        }
    }
}

impl Connector for MemoryMetastore {
    fn connect(&self) -> ServiceResult<Box<dyn MetastoreClient>> {
        Ok(Box::new(self.open()))
    }

    fn endpoint(&self) -> String {
        "memory://local".to_string()
    }
}

/// One connection to a [`MemoryMetastore`]
#[derive(Debug)]
pub struct MemoryConnection {
    id: usize,
    catalog: Arc<Mutex<Catalog>>,
    latency: Duration,
}

impl MemoryConnection {
    pub fn id(&self) -> usize {
        self.id
    }

    fn with_catalog<T>(&self, f: impl FnOnce(&mut Catalog) -> ServiceResult<T>) -> ServiceResult<T> {
        if !self.latency.is_zero() {
            thread::sleep(self.latency);
        }
        let mut catalog = self
            .catalog
            .lock()
            .map_err(|_| ServiceError::transport("metastore catalog lock poisoned"))?;
        f(&mut catalog)
    }
}

fn filter_names<'a>(
    names: impl Iterator<Item = &'a String>,
    filter: Option<&str>,
) -> ServiceResult<Vec<String>> {
    match filter.filter(|f| !f.is_empty()) {
        None => Ok(names.cloned().collect()),
        Some(pattern) => {
            let re = Regex::new(&format!("^(?:{})$", pattern))
                .map_err(|e| ServiceError::invalid(format!("bad filter '{}': {}", pattern, e)))?;
            Ok(names.filter(|n| re.is_match(n)).cloned().collect())
        }
    }
}

impl MetastoreClient for MemoryConnection {
    fn create_database(&self, name: &str) -> ServiceResult<()> {
        self.with_catalog(|c| {
            if c.databases.contains_key(name) {
                return Err(ServiceError::already_exists(format!("database {}", name)));
            }
            c.databases.insert(
                name.to_string(),
                DatabaseEntry {
                    database: Database::new(name),
                    tables: BTreeMap::new(),
                },
            );
            c.notify(1);
            Ok(())
        })
    }

    fn drop_database(&self, name: &str) -> ServiceResult<()> {
        self.with_catalog(|c| {
            let entry = c
                .databases
                .remove(name)
                .ok_or_else(|| ServiceError::not_found(format!("database {}", name)))?;
            c.notify(1 + entry.tables.len());
            Ok(())
        })
    }

    fn get_all_databases(&self, filter: Option<&str>) -> ServiceResult<Vec<String>> {
        self.with_catalog(|c| filter_names(c.databases.keys(), filter))
    }

    fn get_all_tables(&self, db: &str, filter: Option<&str>) -> ServiceResult<Vec<String>> {
        self.with_catalog(|c| filter_names(c.database_mut(db)?.tables.keys(), filter))
    }

    fn create_table(&self, table: &Table) -> ServiceResult<()> {
        self.with_catalog(|c| {
            let db = c.database_mut(&table.db_name)?;
            if db.tables.contains_key(&table.name) {
                return Err(ServiceError::already_exists(format!(
                    "table {}.{}",
                    table.db_name, table.name
                )));
            }
            db.tables.insert(
                table.name.clone(),
                TableEntry {
                    table: table.clone(),
                    partitions: BTreeMap::new(),
                },
            );
            c.notify(1);
            Ok(())
        })
    }

    fn get_table(&self, db: &str, name: &str) -> ServiceResult<Table> {
        self.with_catalog(|c| Ok(c.table(db, name)?.table.clone()))
    }

    fn alter_table(&self, db: &str, name: &str, table: &Table) -> ServiceResult<()> {
        self.with_catalog(|c| {
            let database = c.database_mut(db)?;
            if table.name != name && database.tables.contains_key(&table.name) {
                return Err(ServiceError::already_exists(format!(
                    "table {}.{}",
                    db, table.name
                )));
            }
            let mut entry = database
                .tables
                .remove(name)
                .ok_or_else(|| ServiceError::not_found(format!("table {}.{}", db, name)))?;
            entry.table = table.clone();
            entry.table.db_name = db.to_string();
            for partition in entry.partitions.values_mut() {
                partition.table_name = table.name.clone();
            }
            database.tables.insert(table.name.clone(), entry);
            c.notify(1);
            Ok(())
        })
    }

    fn drop_table(&self, db: &str, name: &str) -> ServiceResult<()> {
        self.with_catalog(|c| {
            c.database_mut(db)?
                .tables
                .remove(name)
                .ok_or_else(|| ServiceError::not_found(format!("table {}.{}", db, name)))?;
            c.notify(1);
            Ok(())
        })
    }

    fn add_partition(&self, partition: &Partition) -> ServiceResult<()> {
        self.add_partitions(std::slice::from_ref(partition))
    }

    fn add_partitions(&self, partitions: &[Partition]) -> ServiceResult<()> {
        self.with_catalog(|c| {
            // Validate the whole batch before touching the catalog
            let mut named = Vec::with_capacity(partitions.len());
            for p in partitions {
                let entry = c.table(&p.db_name, &p.table_name)?;
                let name = entry.partition_name(p)?;
                if entry.partitions.contains_key(&name) || named.iter().any(|(n, _)| *n == name) {
                    return Err(ServiceError::already_exists(format!(
                        "partition {} of {}.{}",
                        name, p.db_name, p.table_name
                    )));
                }
                named.push((name, p));
            }
            for (name, p) in named {
                c.table_mut(&p.db_name, &p.table_name)?
                    .partitions
                    .insert(name, p.clone());
            }
            c.notify(partitions.len());
            Ok(())
        })
    }

    fn alter_partition(&self, db: &str, table: &str, partition: &Partition) -> ServiceResult<()> {
        self.alter_partitions(db, table, std::slice::from_ref(partition))
    }

    fn alter_partitions(
        &self,
        db: &str,
        table: &str,
        partitions: &[Partition],
    ) -> ServiceResult<()> {
        self.with_catalog(|c| {
            let entry = c.table_mut(db, table)?;
            let mut names = Vec::with_capacity(partitions.len());
            for p in partitions {
                let name = entry.partition_name(p)?;
                if !entry.partitions.contains_key(&name) {
                    return Err(ServiceError::not_found(format!(
                        "partition {} of {}.{}",
                        name, db, table
                    )));
                }
                names.push(name);
            }
            for (name, p) in names.into_iter().zip(partitions) {
                entry.partitions.insert(name, p.clone());
            }
            c.notify(partitions.len());
            Ok(())
        })
    }

    fn drop_partition(&self, db: &str, table: &str, values: &[String]) -> ServiceResult<bool> {
        self.with_catalog(|c| {
            let entry = c.table_mut(db, table)?;
            if values.len() != entry.table.partition_keys.len() {
                return Err(ServiceError::invalid(format!(
                    "partition values {:?} do not match keys of {}.{}",
                    values, db, table
                )));
            }
            let name = spec_name(&entry.table.partition_keys, values);
            let existed = entry.partitions.remove(&name).is_some();
            if existed {
                c.notify(1);
            }
            Ok(existed)
        })
    }

    fn drop_partitions(
        &self,
        db: &str,
        table: &str,
        names: Option<&[String]>,
    ) -> ServiceResult<()> {
        self.with_catalog(|c| {
            let entry = c.table_mut(db, table)?;
            let dropped = match names {
                None => {
                    let count = entry.partitions.len();
                    entry.partitions.clear();
                    count
                }
                Some(names) => {
                    if let Some(missing) = names.iter().find(|n| !entry.partitions.contains_key(*n)) {
                        return Err(ServiceError::not_found(format!(
                            "partition {} of {}.{}",
                            missing, db, table
                        )));
                    }
                    for name in names {
                        entry.partitions.remove(name);
                    }
                    names.len()
                }
            };
            c.notify(dropped);
            Ok(())
        })
    }

    fn list_partitions(&self, db: &str, table: &str) -> ServiceResult<Vec<Partition>> {
        self.with_catalog(|c| Ok(c.table(db, table)?.partitions.values().cloned().collect()))
    }

    fn get_partition_names(&self, db: &str, table: &str) -> ServiceResult<Vec<String>> {
        self.with_catalog(|c| Ok(c.table(db, table)?.partitions.keys().cloned().collect()))
    }

    fn get_partitions_by_names(
        &self,
        db: &str,
        table: &str,
        names: &[String],
    ) -> ServiceResult<Vec<Partition>> {
        self.with_catalog(|c| {
            let entry = c.table(db, table)?;
            Ok(names
                .iter()
                .filter_map(|n| entry.partitions.get(n).cloned())
                .collect())
        })
    }

    fn current_notification_id(&self) -> ServiceResult<u64> {
        self.with_catalog(|c| Ok(c.notification_id))
    }
}
