//! Executors for a single pairwise merge job.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

use super::engine::MergeEngine;
use crate::error::{GeodexError, Result};

/// Merge `left` and `right` on disk into `output`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MergeJob {
    pub left: PathBuf,
    pub right: PathBuf,
    pub output: PathBuf,
    /// Whether `output` is the destination of the whole merge tree
    pub is_final: bool,
}

impl MergeJob {
    pub fn label(&self) -> String {
        format!(
            "{} + {} -> {}",
            self.left.display(),
            self.right.display(),
            self.output.display()
        )
    }
}

/// Runs merge jobs. Implementations must leave `output` complete when they
/// return `Ok` and may leave it partial on error.
#[async_trait]
pub trait MergeWorker: Send + Sync {
    async fn run(&self, job: &MergeJob) -> Result<()>;
}

/// Runs each job on its own tokio task inside this process.
pub struct InProcessWorker {
    engine: Arc<MergeEngine>,
}

impl InProcessWorker {
    pub fn new(engine: Arc<MergeEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl MergeWorker for InProcessWorker {
    async fn run(&self, job: &MergeJob) -> Result<()> {
        let engine = self.engine.clone();
        let task = job.clone();
        let handle = tokio::spawn(async move {
            engine
                .merge_paths(&task.left, &task.right, &task.output)
                .await
        });
        match handle.await {
            Ok(result) => result.map(|_| ()),
            Err(e) => Err(GeodexError::WorkerFailure {
                job: job.label(),
                status: Some(if e.is_panic() {
                    "panicked".to_string()
                } else {
                    "cancelled".to_string()
                }),
            }),
        }
    }
}

/// Runs each job as a child process: `<program> merge --left L --right R
/// --output O`. The child is killed if the job is dropped.
pub struct ProcessWorker {
    program: PathBuf,
}

impl ProcessWorker {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Worker that re-invokes the running executable
    pub fn current_exe() -> Result<Self> {
        Ok(Self::new(std::env::current_exe()?))
    }
}

#[async_trait]
impl MergeWorker for ProcessWorker {
    async fn run(&self, job: &MergeJob) -> Result<()> {
        debug!(program = %self.program.display(), job = %job.label(), "spawning merge worker");
        let status = Command::new(&self.program)
            .arg("merge")
            .arg("--left")
            .arg(&job.left)
            .arg("--right")
            .arg(&job.right)
            .arg("--output")
            .arg(&job.output)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .status()
            .await?;

        if status.success() {
            Ok(())
        } else {
            warn!(job = %job.label(), %status, "merge worker exited with failure");
            Err(GeodexError::WorkerFailure {
                job: job.label(),
                status: Some(status.to_string()),
            })
        }
    }
}
