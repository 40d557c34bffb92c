//! Capability surface the benchmarks drive against a metastore
//!
//! Every call is synchronous and fails with a [`ServiceError`]. A connection
//! is `Send` but deliberately not `Sync`: a worker thread owns its
//! connection outright, and fresh connections come from a [`Connector`].

use std::sync::Arc;

use crate::error::ServiceError;
use crate::model::{Partition, Table};

pub type ServiceResult<T> = std::result::Result<T, ServiceError>;

/// One open connection to a metastore
pub trait MetastoreClient: Send {
    fn create_database(&self, name: &str) -> ServiceResult<()>;

    /// Drop a database together with its tables
    fn drop_database(&self, name: &str) -> ServiceResult<()>;

    /// Database names, optionally filtered by a regular expression
    fn get_all_databases(&self, filter: Option<&str>) -> ServiceResult<Vec<String>>;

    /// Table names in `db`, optionally filtered by a regular expression
    fn get_all_tables(&self, db: &str, filter: Option<&str>) -> ServiceResult<Vec<String>>;

    fn create_table(&self, table: &Table) -> ServiceResult<()>;

    fn get_table(&self, db: &str, name: &str) -> ServiceResult<Table>;

    /// Replace table `db.name` with `table`, renaming it if the names differ
    fn alter_table(&self, db: &str, name: &str, table: &Table) -> ServiceResult<()>;

    /// Drop a table together with its partitions
    fn drop_table(&self, db: &str, name: &str) -> ServiceResult<()>;

    fn add_partition(&self, partition: &Partition) -> ServiceResult<()>;

    fn add_partitions(&self, partitions: &[Partition]) -> ServiceResult<()>;

    fn alter_partition(&self, db: &str, table: &str, partition: &Partition) -> ServiceResult<()>;

    fn alter_partitions(&self, db: &str, table: &str, partitions: &[Partition])
        -> ServiceResult<()>;

    /// Drop the partition with the given values; returns whether it existed
    fn drop_partition(&self, db: &str, table: &str, values: &[String]) -> ServiceResult<bool>;

    /// Drop partitions by name, or every partition when `names` is `None`
    fn drop_partitions(&self, db: &str, table: &str, names: Option<&[String]>)
        -> ServiceResult<()>;

    fn list_partitions(&self, db: &str, table: &str) -> ServiceResult<Vec<Partition>>;

    fn get_partition_names(&self, db: &str, table: &str) -> ServiceResult<Vec<String>>;

    fn get_partitions_by_names(
        &self,
        db: &str,
        table: &str,
        names: &[String],
    ) -> ServiceResult<Vec<Partition>>;

    /// Current value of the service's monotonic notification event counter
    fn current_notification_id(&self) -> ServiceResult<u64>;

    fn database_exists(&self, name: &str) -> ServiceResult<bool> {
        Ok(self.get_all_databases(None)?.iter().any(|db| db == name))
    }

    fn table_exists(&self, db: &str, name: &str) -> ServiceResult<bool> {
        Ok(self.get_all_tables(db, None)?.iter().any(|t| t == name))
    }
}

/// Opens independent connections to one metastore endpoint
pub trait Connector: Send + Sync {
    /// A new connection that shares no state with any other handle
    fn connect(&self) -> ServiceResult<Box<dyn MetastoreClient>>;

    /// Human-readable identity of the target service
    fn endpoint(&self) -> String;
}

impl<C: Connector + ?Sized> Connector for Arc<C> {
    fn connect(&self) -> ServiceResult<Box<dyn MetastoreClient>> {
        (**self).connect()
    }

    fn endpoint(&self) -> String {
        (**self).endpoint()
    }
}
