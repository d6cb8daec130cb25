use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Result;
use crate::item::{SyncItem, SyncItemCollection};
use crate::storage::StaleRow;

/// Caller supplied values carried by every job of one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunContext {
    #[serde(default)]
    pub run_id: String,
    #[serde(default)]
    pub as_batch: bool,
    #[serde(default)]
    pub values: Map<String, Value>,
}

impl RunContext {
    pub fn new() -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            ..Self::default()
        }
    }

    pub fn batch() -> Self {
        Self {
            as_batch: true,
            ..Self::new()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", content = "data", rename_all = "snake_case")]
pub enum JobOp {
    Start {
        context: RunContext,
    },
    Process {
        item: SyncItem,
        context: RunContext,
    },
    Page {
        items: SyncItemCollection,
        context: RunContext,
    },
    Cleanup {
        context: RunContext,
    },
    Clean {
        sync: StaleRow,
        context: RunContext,
    },
    End {
        context: RunContext,
    },
}

impl JobOp {
    pub fn name(&self) -> &'static str {
        match self {
            JobOp::Start { .. } => "start",
            JobOp::Process { .. } => "process",
            JobOp::Page { .. } => "page",
            JobOp::Cleanup { .. } => "cleanup",
            JobOp::Clean { .. } => "clean",
            JobOp::End { .. } => "end",
        }
    }
}

/// A queued unit of pipeline work for one resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub plugin_id: String,
    #[serde(flatten)]
    pub op: JobOp,
}

impl Job {
    pub fn new(plugin_id: impl Into<String>, op: JobOp) -> Self {
        Self {
            plugin_id: plugin_id.into(),
            op,
        }
    }

    pub fn to_value(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    pub fn from_value(value: Value) -> Result<Self> {
        Ok(serde_json::from_value(value)?)
    }
}
