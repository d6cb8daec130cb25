use serde::Serialize;

use super::runner::{BuildOutcome, ResourceRunner};
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BatchProgress {
    pub current: usize,
    pub total: usize,
}

/// Steps through a built run one job at a time. The total grows when
/// page or cleanup jobs queue more work.
pub struct BatchRun<'a> {
    runner: &'a ResourceRunner,
    outcome: BuildOutcome,
    current: usize,
    total: usize,
}

impl<'a> BatchRun<'a> {
    pub(crate) async fn start(runner: &'a ResourceRunner, outcome: BuildOutcome) -> Result<Self> {
        let total = runner.queue().number_of_items().await?;
        Ok(Self {
            runner,
            outcome,
            current: 0,
            total,
        })
    }

    pub fn build_outcome(&self) -> &BuildOutcome {
        &self.outcome
    }

    pub fn progress(&self) -> BatchProgress {
        BatchProgress {
            current: self.current,
            total: self.total,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.current >= self.total
    }

    /// Runs the next job. `None` once the queue is drained.
    pub async fn step(&mut self) -> Result<Option<BatchProgress>> {
        if !self.runner.run_job().await? {
            self.total = self.current;
            return Ok(None);
        }
        self.current += 1;
        let remaining = self.runner.queue().number_of_items().await?;
        self.total = self.current + remaining;
        Ok(Some(self.progress()))
    }

    /// Drains the rest of the run, returning the final progress.
    pub async fn finish(mut self) -> Result<BatchProgress> {
        while self.step().await?.is_some() {}
        Ok(self.progress())
    }
}
