//! Multi-way merge of N indexes as a tree of pairwise merges.
//!
//! Inputs sit in a queue. While at least two are queued and a worker is
//! free, the two at the front are merged into a scratch index that joins
//! the back of the queue. The merge that leaves nothing queued and nothing
//! else running writes to the final output. Any failed job aborts the tree.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::task::JoinSet;
use tracing::{debug, error, info};

use super::worker::{MergeJob, MergeWorker};
use crate::config::MergeConfig;
use crate::error::{GeodexError, Result};

/// Outcome of a multi-way merge
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MultiMergeStats {
    /// Pairwise merges run, always `inputs - 1`
    pub merges: usize,
    /// Scratch directory used for intermediates; removed on success
    pub scratch_dir: PathBuf,
}

pub struct MultiMerge {
    config: MergeConfig,
    worker: Arc<dyn MergeWorker>,
}

impl MultiMerge {
    pub fn new(config: MergeConfig, worker: Arc<dyn MergeWorker>) -> Self {
        Self { config, worker }
    }

    /// Merge every index in `inputs` into `output`.
    ///
    /// On failure the remaining jobs are aborted and intermediates are left
    /// in the scratch directory; `output` must be treated as invalid.
    pub async fn run(&self, inputs: Vec<PathBuf>, output: PathBuf) -> Result<MultiMergeStats> {
        if inputs.len() < 2 {
            return Err(GeodexError::InvalidRequest(format!(
                "multi-way merge needs at least 2 inputs, got {}",
                inputs.len()
            )));
        }
        self.config.validate()?;
        if !is_empty_dir(&output)? {
            return Err(GeodexError::InvalidRequest(format!(
                "merge output {} already holds data",
                output.display()
            )));
        }

        let scratch = self.scratch_path();
        tokio::fs::create_dir_all(&scratch).await?;
        info!(
            inputs = inputs.len(),
            workers = self.config.workers,
            scratch = %scratch.display(),
            "starting multi-way merge"
        );

        let mut queue: VecDeque<PathBuf> = inputs.into();
        let mut running: JoinSet<(MergeJob, Result<()>)> = JoinSet::new();
        let mut next_scratch = 0usize;
        let mut merges = 0usize;
        let mut finished = false;

        loop {
            while queue.len() >= 2 && running.len() < self.config.workers {
                let (Some(left), Some(right)) = (queue.pop_front(), queue.pop_front()) else {
                    break;
                };
                let is_final = queue.is_empty() && running.is_empty();
                let target = if is_final {
                    output.clone()
                } else {
                    let path = scratch.join(format!("merge-{:04}", next_scratch));
                    next_scratch += 1;
                    path
                };
                let job = MergeJob {
                    left,
                    right,
                    output: target,
                    is_final,
                };
                debug!(job = %job.label(), is_final, "dispatching merge");
                let worker = self.worker.clone();
                running.spawn(async move {
                    let result = worker.run(&job).await;
                    (job, result)
                });
            }

            let Some(joined) = running.join_next().await else {
                break;
            };
            let (job, result) = match joined {
                Ok(done) => done,
                Err(e) => {
                    running.abort_all();
                    return Err(GeodexError::WorkerFailure {
                        job: "merge task".to_string(),
                        status: Some(e.to_string()),
                    });
                }
            };
            if let Err(e) = result {
                error!(job = %job.label(), error = %e, "merge failed, aborting merge tree");
                running.abort_all();
                return Err(e);
            }
            merges += 1;
            if job.is_final {
                finished = true;
            } else {
                queue.push_back(job.output);
            }
        }

        if !finished {
            return Err(GeodexError::Internal(
                "merge tree drained without producing the final output".to_string(),
            ));
        }
        tokio::fs::remove_dir_all(&scratch).await?;
        info!(merges, output = %output.display(), "multi-way merge complete");
        Ok(MultiMergeStats {
            merges,
            scratch_dir: scratch,
        })
    }

    fn scratch_path(&self) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        self.config
            .scratch_dir
            .join(format!("mrg-{}-{}", std::process::id(), nanos))
    }
}

fn is_empty_dir(path: &Path) -> Result<bool> {
    match std::fs::read_dir(path) {
        Ok(mut entries) => Ok(entries.next().is_none()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(true),
        Err(e) => Err(e.into()),
    }
}
