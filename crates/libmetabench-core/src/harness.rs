//! Measurement harness: untimed setup, timed iterations, untimed cleanup

use std::panic::{self, AssertUnwindSafe};
use std::time::Instant;

use tracing::{debug, warn};

use crate::error::{Aborted, BenchError, Phase, Result};
use crate::stats::Statistics;

type Step<'a> = Box<dyn FnMut() -> Result<()> + 'a>;

fn step<'a, T, E, F>(mut f: F) -> Step<'a>
where
    F: FnMut() -> std::result::Result<T, E> + 'a,
    E: Into<BenchError>,
{
    Box::new(move || f().map(|_| ()).map_err(Into::into))
}

/// The phases of one benchmark.
///
/// Only the measured operation is required. `setup` and `cleanup` run once
/// per run; `before_each` and `after_each` run around every iteration and
/// are never timed.
pub struct Workload<'a> {
    setup: Option<Step<'a>>,
    before_each: Option<Step<'a>>,
    operation: Step<'a>,
    after_each: Option<Step<'a>>,
    cleanup: Option<Step<'a>>,
}

impl<'a> Workload<'a> {
    pub fn new<T, E, F>(operation: F) -> Self
    where
        F: FnMut() -> std::result::Result<T, E> + 'a,
        E: Into<BenchError>,
    {
        Self {
            setup: None,
            before_each: None,
            operation: step(operation),
            after_each: None,
            cleanup: None,
        }
    }

    pub fn setup<T, E, F>(mut self, f: F) -> Self
    where
        F: FnMut() -> std::result::Result<T, E> + 'a,
        E: Into<BenchError>,
    {
        self.setup = Some(step(f));
        self
    }

    pub fn before_each<T, E, F>(mut self, f: F) -> Self
    where
        F: FnMut() -> std::result::Result<T, E> + 'a,
        E: Into<BenchError>,
    {
        self.before_each = Some(step(f));
        self
    }

    pub fn after_each<T, E, F>(mut self, f: F) -> Self
    where
        F: FnMut() -> std::result::Result<T, E> + 'a,
        E: Into<BenchError>,
    {
        self.after_each = Some(step(f));
        self
    }

    pub fn cleanup<T, E, F>(mut self, f: F) -> Self
    where
        F: FnMut() -> std::result::Result<T, E> + 'a,
        E: Into<BenchError>,
    {
        self.cleanup = Some(step(f));
        self
    }
}

/// Runs a [`Workload`] a fixed number of times and records each measured call
#[derive(Debug, Clone, Copy)]
pub struct MicroBenchmark {
    iterations: usize,
}

impl MicroBenchmark {
    pub const DEFAULT_ITERATIONS: usize = 100;

    /// Zero iterations is a configuration error
    pub fn new(iterations: usize) -> Result<Self> {
        if iterations == 0 {
            return Err(BenchError::Config(
                "iteration count must be positive".to_string(),
            ));
        }
        Ok(Self { iterations })
    }

    pub fn iterations(&self) -> usize {
        self.iterations
    }

    /// Time `operation` alone, for read-only or idempotent calls
    pub fn measure<T, E, F>(&self, operation: F) -> Result<Statistics>
    where
        F: FnMut() -> std::result::Result<T, E>,
        E: Into<BenchError>,
    {
        self.run(Workload::new(operation))
    }

    /// Run all phases of `workload`.
    ///
    /// Cleanup runs exactly once on every exit path, including a panic in
    /// another phase. On failure the error carries whatever samples were
    /// gathered, marked incomplete.
    pub fn run(&self, mut workload: Workload<'_>) -> Result<Statistics> {
        let mut stats = Statistics::with_capacity(self.iterations);

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            self.run_phases(&mut workload, &mut stats)
        }));

        let cleanup_error = match workload.cleanup.as_mut() {
            Some(cleanup) => {
                debug!("Running cleanup");
                cleanup().err()
            }
            None => None,
        };

        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(payload) => {
                if let Some(ref e) = cleanup_error {
                    warn!(error = %e, "Cleanup failed while unwinding");
                }
                panic::resume_unwind(payload);
            }
        };

        match (outcome, cleanup_error) {
            (Ok(()), None) => Ok(stats),
            (Ok(()), Some(cause)) => {
                warn!(error = %cause, "Cleanup failed");
                Err(BenchError::Aborted(Box::new(Aborted {
                    phase: Phase::Cleanup,
                    cause,
                    partial: stats,
                    cleanup_error: None,
                })))
            }
            (Err((phase, cause)), cleanup_error) => {
                stats.mark_incomplete();
                if let Some(ref e) = cleanup_error {
                    warn!(error = %e, %phase, "Cleanup failed after earlier failure");
                }
                debug!(%phase, samples = stats.count(), error = %cause, "Measurement aborted");
                Err(BenchError::Aborted(Box::new(Aborted {
                    phase,
                    cause,
                    partial: stats,
                    cleanup_error,
                })))
            }
        }
    }

    fn run_phases(
        &self,
        workload: &mut Workload<'_>,
        stats: &mut Statistics,
    ) -> std::result::Result<(), (Phase, BenchError)> {
        if let Some(setup) = workload.setup.as_mut() {
            debug!("Running setup");
            setup().map_err(|e| (Phase::Setup, e))?;
        }

        debug!(iterations = self.iterations, "Measuring");
        for _ in 0..self.iterations {
            if let Some(before) = workload.before_each.as_mut() {
                before().map_err(|e| (Phase::BeforeEach, e))?;
            }

            let start = Instant::now();
            (workload.operation)().map_err(|e| (Phase::Operation, e))?;
            stats.record(start.elapsed());

            if let Some(after) = workload.after_each.as_mut() {
                after().map_err(|e| (Phase::AfterEach, e))?;
            }
        }
        Ok(())
    }
}

impl Default for MicroBenchmark {
    fn default() -> Self {
        Self {
            iterations: Self::DEFAULT_ITERATIONS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ServiceError;
    use std::cell::Cell;
    use std::thread;
    use std::time::Duration;

    fn fail(message: &str) -> std::result::Result<(), ServiceError> {
        Err(ServiceError::transport(message))
    }

    fn unwrap_aborted(result: Result<Statistics>) -> Aborted {
        match result {
            Err(BenchError::Aborted(aborted)) => *aborted,
            other => panic!("expected aborted run, got {:?}", other),
        }
    }

    #[test]
    fn test_sample_count_matches_iterations() {
        let bench = MicroBenchmark::new(7).unwrap();
        let calls = Cell::new(0);
        let stats = bench
            .measure(|| {
                calls.set(calls.get() + 1);
                Ok::<_, BenchError>(())
            })
            .unwrap();
        assert_eq!(calls.get(), 7);
        assert_eq!(stats.count(), 7);
        assert!(stats.is_complete());
        assert!(stats.samples().iter().all(|d| *d >= Duration::ZERO));
    }

    #[test]
    fn test_zero_iterations_rejected_before_setup() {
        let setup_calls = Cell::new(0);
        let _workload = Workload::new(|| Ok::<_, BenchError>(())).setup(|| {
            setup_calls.set(setup_calls.get() + 1);
            Ok::<_, BenchError>(())
        });
        let err = MicroBenchmark::new(0).unwrap_err();
        assert!(matches!(err, BenchError::Config(_)));
        assert_eq!(setup_calls.get(), 0);
    }

    #[test]
    fn test_cleanup_runs_once_for_every_outcome() {
        for setup_fails in [false, true] {
            for op_fails in [false, true] {
                let bench = MicroBenchmark::new(5).unwrap();
                let cleanups = Cell::new(0);
                let ops = Cell::new(0);
                let workload = Workload::new(|| {
                    ops.set(ops.get() + 1);
                    if op_fails {
                        fail("operation")
                    } else {
                        Ok(())
                    }
                })
                .setup(|| if setup_fails { fail("setup") } else { Ok(()) })
                .cleanup(|| {
                    cleanups.set(cleanups.get() + 1);
                    Ok::<_, BenchError>(())
                });

                let result = bench.run(workload);
                assert_eq!(
                    cleanups.get(),
                    1,
                    "setup_fails={} op_fails={}",
                    setup_fails,
                    op_fails
                );
                assert_eq!(result.is_ok(), !setup_fails && !op_fails);
                if setup_fails {
                    assert_eq!(ops.get(), 0);
                }
            }
        }
    }

    #[test]
    fn test_setup_failure_records_nothing() {
        let bench = MicroBenchmark::new(3).unwrap();
        let workload = Workload::new(|| Ok::<_, BenchError>(())).setup(|| fail("no table"));
        let aborted = unwrap_aborted(bench.run(workload));
        assert_eq!(aborted.phase, Phase::Setup);
        assert_eq!(aborted.partial.count(), 0);
        assert!(!aborted.partial.is_complete());
        assert!(aborted.cleanup_error.is_none());
    }

    #[test]
    fn test_operation_failure_keeps_partial_samples() {
        let bench = MicroBenchmark::new(10).unwrap();
        let calls = Cell::new(0);
        let aborted = unwrap_aborted(bench.measure(|| {
            calls.set(calls.get() + 1);
            if calls.get() == 3 {
                fail("boom")
            } else {
                Ok(())
            }
        }));
        assert_eq!(calls.get(), 3);
        assert_eq!(aborted.phase, Phase::Operation);
        assert_eq!(aborted.partial.count(), 2);
        assert!(!aborted.partial.is_complete());
        assert!(matches!(aborted.cause, BenchError::Service(_)));
    }

    #[test]
    fn test_cleanup_failure_does_not_mask_operation_failure() {
        let bench = MicroBenchmark::new(2).unwrap();
        let workload = Workload::new(|| fail("operation")).cleanup(|| fail("cleanup"));
        let aborted = unwrap_aborted(bench.run(workload));
        assert_eq!(aborted.phase, Phase::Operation);
        assert!(aborted.cause.to_string().contains("operation"));
        let cleanup = aborted.cleanup_error.expect("cleanup error kept");
        assert!(cleanup.to_string().contains("cleanup"));
    }

    #[test]
    fn test_cleanup_failure_alone_is_surfaced() {
        let bench = MicroBenchmark::new(4).unwrap();
        let workload = Workload::new(|| Ok::<_, BenchError>(())).cleanup(|| fail("cleanup"));
        let aborted = unwrap_aborted(bench.run(workload));
        assert_eq!(aborted.phase, Phase::Cleanup);
        assert_eq!(aborted.partial.count(), 4);
        assert!(aborted.partial.is_complete());
    }

    #[test]
    fn test_hooks_run_per_iteration_untimed() {
        let bench = MicroBenchmark::new(3).unwrap();
        let order = std::cell::RefCell::new(Vec::new());
        let workload = Workload::new(|| {
            order.borrow_mut().push("op");
            Ok::<_, BenchError>(())
        })
        .setup(|| {
            order.borrow_mut().push("setup");
            Ok::<_, BenchError>(())
        })
        .before_each(|| {
            order.borrow_mut().push("before");
            thread::sleep(Duration::from_millis(30));
            Ok::<_, BenchError>(())
        })
        .after_each(|| {
            order.borrow_mut().push("after");
            thread::sleep(Duration::from_millis(30));
            Ok::<_, BenchError>(())
        })
        .cleanup(|| {
            order.borrow_mut().push("cleanup");
            Ok::<_, BenchError>(())
        });

        let stats = bench.run(workload).unwrap();
        assert_eq!(stats.count(), 3);
        assert!(stats.max().unwrap() < Duration::from_millis(30));

        let order = order.into_inner();
        assert_eq!(order.first(), Some(&"setup"));
        assert_eq!(order.last(), Some(&"cleanup"));
        assert_eq!(order.iter().filter(|s| **s == "before").count(), 3);
        assert_eq!(order.iter().filter(|s| **s == "after").count(), 3);
        assert_eq!(&order[1..4], &["before", "op", "after"]);
    }

    #[test]
    fn test_after_each_failure_aborts() {
        let bench = MicroBenchmark::new(5).unwrap();
        let workload = Workload::new(|| Ok::<_, BenchError>(())).after_each(|| fail("reset"));
        let aborted = unwrap_aborted(bench.run(workload));
        assert_eq!(aborted.phase, Phase::AfterEach);
        assert_eq!(aborted.partial.count(), 1);
    }

    #[test]
    fn test_cleanup_runs_when_operation_panics() {
        let bench = MicroBenchmark::new(2).unwrap();
        let cleanups = Cell::new(0);
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            let workload = Workload::new(|| -> std::result::Result<(), BenchError> {
                panic!("operation exploded")
            })
            .cleanup(|| {
                cleanups.set(cleanups.get() + 1);
                Ok::<_, BenchError>(())
            });
            bench.run(workload)
        }));
        assert!(result.is_err());
        assert_eq!(cleanups.get(), 1);
    }
}
