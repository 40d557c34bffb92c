//! Error types for metabench

use std::fmt;

use thiserror::Error;

use crate::stats::Statistics;
use crate::throughput::ThroughputAnomaly;

/// Coarse classification of a service failure, for diagnostics only
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceErrorKind {
    AlreadyExists,
    NotFound,
    InvalidObject,
    Transport,
}

impl ServiceErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceErrorKind::AlreadyExists => "already_exists",
            ServiceErrorKind::NotFound => "not_found",
            ServiceErrorKind::InvalidObject => "invalid_object",
            ServiceErrorKind::Transport => "transport",
        }
    }
}

/// Failure of a single metastore call
#[derive(Debug, Clone, Error)]
#[error("{} ({})", message, kind.as_str())]
pub struct ServiceError {
    pub kind: ServiceErrorKind,
    pub message: String,
}

impl ServiceError {
    pub fn new(kind: ServiceErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn already_exists(what: impl fmt::Display) -> Self {
        Self::new(ServiceErrorKind::AlreadyExists, format!("{} already exists", what))
    }

    pub fn not_found(what: impl fmt::Display) -> Self {
        Self::new(ServiceErrorKind::NotFound, format!("{} not found", what))
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::new(ServiceErrorKind::InvalidObject, message)
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(ServiceErrorKind::Transport, message)
    }
}

/// Harness phase in which a failure happened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Setup,
    BeforeEach,
    Operation,
    AfterEach,
    Cleanup,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Setup => "setup",
            Phase::BeforeEach => "before-each",
            Phase::Operation => "operation",
            Phase::AfterEach => "after-each",
            Phase::Cleanup => "cleanup",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A measurement run that did not finish cleanly.
///
/// `cause` is always the first failure. If cleanup failed after an earlier
/// failure, its error is kept in `cleanup_error` and never replaces `cause`.
#[derive(Debug)]
pub struct Aborted {
    pub phase: Phase,
    pub cause: BenchError,
    /// Samples gathered before the failure; `complete` is false unless only cleanup failed
    pub partial: Statistics,
    pub cleanup_error: Option<BenchError>,
}

impl fmt::Display for Aborted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} failed after {} samples: {}",
            self.phase,
            self.partial.count(),
            self.cause
        )?;
        if let Some(ref cleanup) = self.cleanup_error {
            write!(f, " (cleanup also failed: {})", cleanup)?;
        }
        Ok(())
    }
}

/// A failed worker of a concurrent run
#[derive(Debug)]
pub struct WorkerFailure {
    pub index: usize,
    pub namespace: String,
    pub error: BenchError,
}

impl fmt::Display for WorkerFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "worker #{} ({}): {}", self.index, self.namespace, self.error)
    }
}

#[derive(Error, Debug)]
pub enum BenchError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Service error: {0}")]
    Service(#[from] ServiceError),

    #[error("Benchmark aborted: {0}")]
    Aborted(Box<Aborted>),

    #[error("{} worker(s) failed: {}", .0.len(), format_failures(.0))]
    Workers(Vec<WorkerFailure>),

    #[error("Worker panicked: {0}")]
    Panicked(String),

    #[error("Throughput anomaly: {0}")]
    Throughput(#[from] ThroughputAnomaly),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),
}

fn format_failures(failures: &[WorkerFailure]) -> String {
    failures
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl BenchError {
    /// Error code for JSON reports
    pub fn error_code(&self) -> &'static str {
        match self {
            BenchError::Config(_) => "invalid_config",
            BenchError::Service(_) => "service_error",
            BenchError::Aborted(_) => "aborted",
            BenchError::Workers(_) => "worker_failed",
            BenchError::Panicked(_) => "worker_panicked",
            BenchError::Throughput(_) => "throughput_anomaly",
            BenchError::Io(_) => "io_error",
            BenchError::Json(_) => "internal_error",
            BenchError::TomlParse(_) => "invalid_config",
        }
    }

    /// Exit code for the CLI
    pub fn exit_code(&self) -> i32 {
        match self {
            BenchError::Config(_) | BenchError::TomlParse(_) => 2,
            BenchError::Service(_) => 3,
            BenchError::Aborted(_) | BenchError::Workers(_) | BenchError::Panicked(_) => 4,
            BenchError::Throughput(_) => 5,
            _ => 1,
        }
    }

    /// Partial statistics of an aborted run, if any were gathered
    pub fn partial_statistics(&self) -> Option<&Statistics> {
        match self {
            BenchError::Aborted(aborted) => Some(&aborted.partial),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, BenchError>;
