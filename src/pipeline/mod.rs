// Sync pipeline: queued jobs driving fetch, process, page, cleanup and end

pub mod batch;
pub mod job;
pub mod outcome;
pub mod runner;

pub use batch::{BatchProgress, BatchRun};
pub use job::{Job, JobOp, RunContext};
pub use outcome::{ItemReport, Outcome};
pub use runner::{
    BuildOutcome, DebugItem, DebugPreview, ResourceRunner, RunMode, RunnerSettings, Services,
};
