//! # Generator
//!
//! The producer side of a run. It takes a permit from the
//! [`ConcurrencyGate`], builds a [`SenderTask`] around it and spawns the task
//! onto the tokio runtime, over and over until the report sink stops issuing
//! measurement units. The gate is the only backpressure between production
//! and execution: once every permit is out, the generator waits for a task to
//! finish.
//!
//! Finished tasks are reaped as the run goes. A task that panics is logged
//! and counted as failed; its gate permit and transport were already handed
//! back while it unwound.

use crate::error::EngineResult;
use crate::gate::ConcurrencyGate;
use crate::task::{SenderTask, TaskContext, TaskOutcome};
use serde::{Deserialize, Serialize};
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info};

/// Counts of spawned tasks by outcome
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratorStats {
    pub spawned: u64,
    pub completed: u64,
    pub round_trips: u64,
    pub stopped: u64,
    pub failed: u64,
}

impl GeneratorStats {
    fn record(&mut self, joined: Result<TaskOutcome, JoinError>) -> bool {
        match joined {
            Ok(TaskOutcome::Completed { round_trips, .. }) => {
                self.completed += 1;
                self.round_trips += round_trips;
                false
            }
            Ok(TaskOutcome::Stopped) => {
                self.stopped += 1;
                true
            }
            Ok(TaskOutcome::Failed) => {
                self.failed += 1;
                false
            }
            Err(e) => {
                error!("Sender task aborted: {}", e);
                self.failed += 1;
                false
            }
        }
    }
}

/// Produces sender tasks under a concurrency gate
pub struct Generator {
    ctx: TaskContext,
    gate: ConcurrencyGate,
}

impl Generator {
    pub fn new(ctx: TaskContext, gate: ConcurrencyGate) -> Self {
        Self { ctx, gate }
    }

    pub fn gate(&self) -> &ConcurrencyGate {
        &self.gate
    }

    /// Run until the report sink stops issuing units and every task is done
    pub async fn run(&self) -> EngineResult<GeneratorStats> {
        let mut stats = GeneratorStats::default();
        let mut tasks: JoinSet<TaskOutcome> = JoinSet::new();
        let mut stop_seen = false;

        info!(
            "Generator started with {} concurrent task(s) over {} transport(s)",
            self.gate.capacity(),
            self.ctx.pool().capacity()
        );

        while !stop_seen && self.ctx.report().is_running() {
            tokio::select! {
                biased;

                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    stop_seen |= stats.record(joined);
                }

                permit = self.gate.acquire() => {
                    let permit = permit?;
                    if !self.ctx.report().is_running() {
                        break;
                    }
                    tasks.spawn(SenderTask::new(self.ctx.clone(), permit).run());
                    stats.spawned += 1;
                }
            }
        }

        debug!("Generator waiting for {} running task(s)", tasks.len());
        while let Some(joined) = tasks.join_next().await {
            stats.record(joined);
        }
        self.gate.drain().await?;

        info!(
            "Generator finished: {} spawned, {} completed, {} failed",
            stats.spawned, stats.completed, stats.failed
        );
        Ok(stats)
    }
}
