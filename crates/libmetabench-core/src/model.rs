//! Metadata objects exchanged with the metastore

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::ServiceError;

const PARAM_KEY: &str = "parameter_";
const PARAM_VALUE: &str = "value_";

/// Column or partition key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSchema {
    pub name: String,
    pub type_name: String,
}

impl FieldSchema {
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageDescriptor {
    pub location: String,
    pub columns: Vec<FieldSchema>,
    pub input_format: String,
    pub output_format: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Database {
    pub name: String,
    pub location: String,
}

impl Database {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let location = format!("/warehouse/{}.db", name);
        Self { name, location }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    pub db_name: String,
    pub name: String,
    pub sd: StorageDescriptor,
    pub partition_keys: Vec<FieldSchema>,
    pub parameters: BTreeMap<String, String>,
}

impl Table {
    /// Unpartitioned managed table with a single `name:string` column
    pub fn new(db_name: impl Into<String>, name: impl Into<String>) -> Self {
        let db_name = db_name.into();
        let name = name.into();
        let sd = StorageDescriptor {
            location: format!("/warehouse/{}.db/{}", db_name, name),
            columns: vec![FieldSchema::new("name", "string")],
            input_format: "text".to_string(),
            output_format: "text".to_string(),
        };
        Self {
            db_name,
            name,
            sd,
            partition_keys: Vec::new(),
            parameters: BTreeMap::new(),
        }
    }

    /// Table partitioned by a single `date` key
    pub fn partitioned(db_name: impl Into<String>, name: impl Into<String>) -> Self {
        let mut table = Self::new(db_name, name);
        table.partition_keys = vec![FieldSchema::new("date", "string")];
        table
    }

    pub fn renamed(&self, new_name: impl Into<String>) -> Self {
        let mut table = self.clone();
        table.name = new_name.into();
        table
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partition {
    pub db_name: String,
    pub table_name: String,
    pub values: Vec<String>,
    pub sd: StorageDescriptor,
    pub parameters: BTreeMap<String, String>,
}

impl Partition {
    /// Build a partition of `table` located under `<table location>/<key>=<value>/...`
    pub fn for_table(table: &Table, values: Vec<String>) -> Result<Self, ServiceError> {
        if table.partition_keys.len() != values.len() {
            return Err(ServiceError::invalid(format!(
                "partition values {:?} do not match keys of {}.{}",
                values, table.db_name, table.name
            )));
        }
        let mut sd = table.sd.clone();
        sd.location = format!("{}/{}", table.sd.location, spec_name(&table.partition_keys, &values));
        Ok(Self {
            db_name: table.db_name.clone(),
            table_name: table.name.clone(),
            values,
            sd,
            parameters: BTreeMap::new(),
        })
    }

    pub fn with_parameters(mut self, parameters: &BTreeMap<String, String>) -> Self {
        self.parameters = parameters.clone();
        self
    }

    /// Copy of this partition with its location moved under `suffix`
    pub fn relocated(&self, suffix: &str) -> Self {
        let mut moved = self.clone();
        moved.sd.location = format!("{}/{}", self.sd.location, suffix);
        moved
    }
}

/// `key1=v1/key2=v2` partition name
pub fn spec_name(keys: &[FieldSchema], values: &[String]) -> String {
    keys.iter()
        .zip(values)
        .map(|(k, v)| format!("{}={}", k.name, v))
        .collect::<Vec<_>>()
        .join("/")
}

/// `count` partitions of `table` with values `<prefix>0 .. <prefix>{count-1}`
pub fn make_partitions(
    table: &Table,
    prefix: &str,
    count: usize,
    parameters: &BTreeMap<String, String>,
) -> Result<Vec<Partition>, ServiceError> {
    (0..count)
        .map(|i| {
            Partition::for_table(table, vec![format!("{}{}", prefix, i)])
                .map(|p| p.with_parameters(parameters))
        })
        .collect()
}

/// Names matching [`make_partitions`] for a single `date` key
pub fn partition_names(prefix: &str, count: usize) -> Vec<String> {
    (0..count).map(|i| format!("date={}{}", prefix, i)).collect()
}

/// `parameter_i -> value_i` map of `count` entries
pub fn make_parameters(count: usize) -> BTreeMap<String, String> {
    (0..count)
        .map(|i| (format!("{}{}", PARAM_KEY, i), format!("{}{}", PARAM_VALUE, i)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition_location() {
        let table = Table::partitioned("db", "tbl");
        let p = Partition::for_table(&table, vec!["d1".to_string()]).unwrap();
        assert_eq!(p.sd.location, "/warehouse/db.db/tbl/date=d1");
        assert_eq!(p.table_name, "tbl");
    }

    #[test]
    fn test_partition_value_mismatch() {
        let table = Table::new("db", "flat");
        assert!(Partition::for_table(&table, vec!["d1".to_string()]).is_err());
    }

    #[test]
    fn test_partition_names_match_partitions() {
        let table = Table::partitioned("db", "tbl");
        let parts = make_partitions(&table, "d", 3, &BTreeMap::new()).unwrap();
        let names: Vec<String> = parts
            .iter()
            .map(|p| spec_name(&table.partition_keys, &p.values))
            .collect();
        assert_eq!(names, partition_names("d", 3));
    }

    #[test]
    fn test_make_parameters() {
        let params = make_parameters(2);
        assert_eq!(params.len(), 2);
        assert_eq!(params.get("parameter_1").map(String::as_str), Some("value_1"));
        assert!(make_parameters(0).is_empty());
    }
}
