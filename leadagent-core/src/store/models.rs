use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::browser::ErrorKind;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Success,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Success => "success",
            RunStatus::Failed => "failed",
        }
    }

    pub fn terminal(&self) -> bool {
        matches!(self, RunStatus::Success | RunStatus::Failed)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RunStatus::Pending),
            "running" => Ok(RunStatus::Running),
            "success" => Ok(RunStatus::Success),
            "failed" => Ok(RunStatus::Failed),
            other => Err(format!("unknown run status {other}")),
        }
    }
}

/// Counters accumulated over a run and stored with its final status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunMetrics {
    pub records_observed: u64,
    pub records_inserted: u64,
    pub duplicates_skipped: u64,
    pub work_units_total: u64,
    pub work_units_completed: u64,
    pub check_ins: u64,
    pub chunks: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRun {
    pub run_id: String,
    pub workflow: String,
    pub client_id: i64,
    pub site: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentRun {
    pub run_id: String,
    pub workflow: String,
    pub client_id: i64,
    pub site: String,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub metrics: Option<RunMetrics>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InsertOutcome {
    pub inserted: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RawRecord {
    pub id: i64,
    pub run_id: String,
    pub payload: Value,
    pub content_hash: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAgentError {
    pub run_id: String,
    pub step: String,
    pub kind: ErrorKind,
    pub message: String,
    pub url: Option<String>,
    pub locator: Option<String>,
    pub screenshot_path: Option<String>,
    pub trace_path: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentError {
    pub id: i64,
    pub run_id: String,
    pub step: String,
    pub kind: ErrorKind,
    pub message: String,
    pub url: Option<String>,
    pub locator: Option<String>,
    pub screenshot_path: Option<String>,
    pub trace_path: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl AgentError {
    pub(crate) fn from_new(id: i64, error: &NewAgentError, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            run_id: error.run_id.clone(),
            step: error.step.clone(),
            kind: error.kind,
            message: error.message.clone(),
            url: error.url.clone(),
            locator: error.locator.clone(),
            screenshot_path: error.screenshot_path.clone(),
            trace_path: error.trace_path.clone(),
            created_at,
        }
    }
}

/// Evidence that a target was processed, written even when it yielded nothing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckIn {
    pub run_id: String,
    pub client_id: i64,
    pub client_name: String,
    pub workspace: String,
    pub period: String,
    pub region: String,
    pub target: String,
    pub records_found: u64,
}
