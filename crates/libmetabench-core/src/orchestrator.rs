//! Concurrent load orchestration
//!
//! A run fans one task per worker out over a thread pool sized to the
//! worker count. Each worker opens its own connection and works inside its
//! own namespace, so no client-side locking is involved. Every spawned
//! worker is joined before [`ConcurrentRunner::run`] returns; failures are
//! collected from all of them and reported together.

use std::any::Any;
use std::thread;

use tracing::{debug, error, warn};

use crate::client::{Connector, MetastoreClient};
use crate::error::{BenchError, Result, WorkerFailure};

/// Resource namespace of worker `index`
pub fn namespace_for(base: &str, index: usize) -> String {
    format!("{}_{}", base, index)
}

/// Identity handed to the worker factory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerContext {
    pub index: usize,
    pub namespace: String,
}

/// Runs a fixed number of workers to completion
#[derive(Debug, Clone, Copy)]
pub struct ConcurrentRunner {
    worker_count: usize,
}

impl ConcurrentRunner {
    pub fn new(worker_count: usize) -> Result<Self> {
        if worker_count == 0 {
            return Err(BenchError::Config(
                "worker count must be positive".to_string(),
            ));
        }
        Ok(Self { worker_count })
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Run one task per worker and block until all of them finish.
    ///
    /// `factory` is called on the caller's thread for every index, in order,
    /// and returns the task for that worker. Tasks receive a connection
    /// opened on their own thread from `connector`; it is closed when the
    /// task returns. A failing or panicking worker does not stop its
    /// siblings.
    pub fn run<F, T>(&self, connector: &dyn Connector, base: &str, mut factory: F) -> Result<()>
    where
        F: FnMut(&WorkerContext) -> T,
        T: FnOnce(&dyn MetastoreClient) -> Result<()> + Send,
    {
        let tasks: Vec<(WorkerContext, T)> = (0..self.worker_count)
            .map(|index| {
                let ctx = WorkerContext {
                    index,
                    namespace: namespace_for(base, index),
                };
                let task = factory(&ctx);
                (ctx, task)
            })
            .collect();

        debug!(workers = self.worker_count, base, "Starting concurrent run");

        let mut failures = thread::scope(|scope| {
            let mut failures = Vec::new();
            let mut handles = Vec::with_capacity(tasks.len());

            for (ctx, task) in tasks {
                let worker_ctx = ctx.clone();
                let spawned = thread::Builder::new()
                    .name(format!("metabench-worker-{}", ctx.index))
                    .spawn_scoped(scope, move || run_worker(connector, &worker_ctx, task));
                match spawned {
                    Ok(handle) => handles.push((ctx, handle)),
                    Err(e) => {
                        error!(worker = ctx.index, error = %e, "Failed to spawn worker");
                        failures.push(WorkerFailure {
                            index: ctx.index,
                            namespace: ctx.namespace,
                            error: BenchError::Io(e),
                        });
                    }
                }
            }

            for (ctx, handle) in handles {
                let outcome = match handle.join() {
                    Ok(outcome) => outcome,
                    Err(payload) => Err(BenchError::Panicked(panic_message(payload))),
                };
                if let Err(error) = outcome {
                    failures.push(WorkerFailure {
                        index: ctx.index,
                        namespace: ctx.namespace,
                        error,
                    });
                }
            }
            failures
        });

        if failures.is_empty() {
            debug!(workers = self.worker_count, "Concurrent run complete");
            return Ok(());
        }

        failures.sort_by_key(|f| f.index);
        for failure in &failures {
            warn!(
                worker = failure.index,
                namespace = %failure.namespace,
                error = %failure.error,
                "Worker failed"
            );
        }
        Err(BenchError::Workers(failures))
    }
}

fn run_worker<T>(
    connector: &dyn Connector,
    ctx: &WorkerContext,
    task: T,
) -> Result<()>
where
    T: FnOnce(&dyn MetastoreClient) -> Result<()>,
{
    // Each worker opens its own connection (connections are not thread-safe)
    let client = connector.connect()?;
    debug!(worker = ctx.index, namespace = %ctx.namespace, "Worker started");
    let result = task(client.as_ref());
    drop(client);
    debug!(worker = ctx.index, ok = result.is_ok(), "Worker finished");
    result
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ServiceError;
    use crate::memory::MemoryMetastore;
    use crate::model::Table;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    fn metastore_with_db() -> MemoryMetastore {
        let store = MemoryMetastore::new();
        store.open().create_database("db").unwrap();
        store
    }

    #[test]
    fn test_namespaces_are_distinct() {
        let names: HashSet<String> = (0..64).map(|i| namespace_for("tbl", i)).collect();
        assert_eq!(names.len(), 64);
        assert_eq!(namespace_for("tbl", 3), "tbl_3");
    }

    #[test]
    fn test_zero_workers_rejected() {
        assert!(matches!(ConcurrentRunner::new(0), Err(BenchError::Config(_))));
    }

    #[test]
    fn test_each_worker_gets_own_connection_and_namespace() {
        let store = metastore_with_db();
        let opened_before = store.connections_opened();
        let runner = ConcurrentRunner::new(4).unwrap();
        let seen = Mutex::new(Vec::new());

        runner
            .run(&store, "t", |ctx| {
                let ns = ctx.namespace.clone();
                let seen = &seen;
                move |client: &dyn MetastoreClient| -> Result<()> {
                    client.create_table(&Table::new("db", ns.as_str()))?;
                    seen.lock().unwrap().push(ns);
                    Ok(())
                }
            })
            .unwrap();

        assert_eq!(store.connections_opened() - opened_before, 4);
        let mut seen = seen.into_inner().unwrap();
        seen.sort();
        assert_eq!(seen, vec!["t_0", "t_1", "t_2", "t_3"]);
        let tables = store.open().get_all_tables("db", Some("t_.*")).unwrap();
        assert_eq!(tables.len(), 4);
    }

    #[test]
    fn test_failure_waits_for_all_workers() {
        let store = metastore_with_db();
        let runner = ConcurrentRunner::new(4).unwrap();
        let completed = AtomicUsize::new(0);

        let err = runner
            .run(&store, "w", |ctx| {
                let index = ctx.index;
                let completed = &completed;
                move |_: &dyn MetastoreClient| -> Result<()> {
                    if index == 1 {
                        return Err(ServiceError::transport("worker 1 lost connection").into());
                    }
                    thread::sleep(Duration::from_millis(50));
                    completed.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .unwrap_err();

        assert_eq!(completed.load(Ordering::SeqCst), 3);
        match err {
            BenchError::Workers(failures) => {
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].index, 1);
                assert_eq!(failures[0].namespace, "w_1");
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_all_failures_are_aggregated() {
        let store = metastore_with_db();
        let runner = ConcurrentRunner::new(3).unwrap();
        let err = runner
            .run(&store, "x", |ctx| {
                let index = ctx.index;
                move |_: &dyn MetastoreClient| -> Result<()> {
                    if index == 2 {
                        panic!("worker exploded");
                    }
                    Err(BenchError::Config(format!("bad worker {}", index)))
                }
            })
            .unwrap_err();

        let BenchError::Workers(failures) = err else {
            panic!("expected worker failures");
        };
        let indices: Vec<usize> = failures.iter().map(|f| f.index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
        assert!(matches!(failures[2].error, BenchError::Panicked(ref m) if m.contains("exploded")));
    }

    struct BrokenConnector;

    impl Connector for BrokenConnector {
        fn connect(&self) -> crate::client::ServiceResult<Box<dyn MetastoreClient>> {
            Err(ServiceError::transport("connection refused"))
        }

        fn endpoint(&self) -> String {
            "broken://".to_string()
        }
    }

    #[test]
    fn test_connect_failure_is_worker_failure() {
        let runner = ConcurrentRunner::new(2).unwrap();
        let ran = AtomicUsize::new(0);
        let err = runner
            .run(&BrokenConnector, "b", |_| {
                let ran = &ran;
                move |_: &dyn MetastoreClient| -> Result<()> {
                    ran.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .unwrap_err();
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        assert!(matches!(err, BenchError::Workers(ref f) if f.len() == 2));
    }
}
