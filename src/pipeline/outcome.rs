use serde::Serialize;

use crate::error::SyncError;
use crate::state::ProcessKind;
use crate::storage::{Record, SaveStatus};

/// How a single item ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Ignore,
    Skip,
    Fail,
}

impl Outcome {
    /// Unclassified errors count as failures.
    pub fn of(error: &SyncError) -> Self {
        match error {
            SyncError::Ignore(_) => Outcome::Ignore,
            SyncError::Skip(_) => Outcome::Skip,
            _ => Outcome::Fail,
        }
    }

    /// Counter bumped for this outcome. Ignored items leave no trace in the tallies.
    pub fn counter(&self) -> Option<ProcessKind> {
        match self {
            Outcome::Success => Some(ProcessKind::Success),
            Outcome::Ignore => None,
            Outcome::Skip => Some(ProcessKind::Skip),
            Outcome::Fail => Some(ProcessKind::Fail),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::Ignore => "ignore",
            Outcome::Skip => "skip",
            Outcome::Fail => "fail",
        }
    }
}

/// Result of processing one item.
#[derive(Debug, Clone, Serialize)]
pub struct ItemReport {
    pub id: Option<String>,
    pub outcome: Outcome,
    pub status: Option<SaveStatus>,
    pub record: Option<Record>,
    pub message: Option<String>,
    /// Set when the failure was an unexpected error rather than a Skip/Ignore/Fail signal.
    pub unclassified: bool,
}

impl ItemReport {
    pub fn is_success(&self) -> bool {
        self.outcome == Outcome::Success
    }
}
