use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;

use super::models::{
    AgentError, AgentRun, CheckIn, InsertOutcome, NewAgentError, NewRun, RawRecord, RunMetrics,
    RunStatus,
};
use super::{check_transition, RunStore, StoreError, StoreResult};

#[derive(Debug, Default)]
struct MemoryState {
    runs: HashMap<String, AgentRun>,
    records: Vec<RawRecord>,
    hashes: HashSet<String>,
    errors: Vec<AgentError>,
    check_ins: Vec<CheckIn>,
}

/// In-process [`RunStore`] with the same invariants as the SQLite store.
#[derive(Debug, Default)]
pub struct MemoryRunStore {
    state: Mutex<MemoryState>,
}

impl MemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn run(&self, run_id: &str) -> Option<AgentRun> {
        self.lock().runs.get(run_id).cloned()
    }

    pub fn runs(&self) -> Vec<AgentRun> {
        let mut runs: Vec<_> = self.lock().runs.values().cloned().collect();
        runs.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        runs
    }

    pub fn raw_records(&self) -> Vec<RawRecord> {
        self.lock().records.clone()
    }

    pub fn errors(&self) -> Vec<AgentError> {
        self.lock().errors.clone()
    }

    pub fn check_ins(&self) -> Vec<CheckIn> {
        self.lock().check_ins.clone()
    }
}

fn require_run(state: &MemoryState, run_id: &str) -> StoreResult<()> {
    if state.runs.contains_key(run_id) {
        Ok(())
    } else {
        Err(StoreError::RunNotFound {
            run_id: run_id.to_string(),
        })
    }
}

#[async_trait]
impl RunStore for MemoryRunStore {
    async fn create_run(&self, run: &NewRun) -> StoreResult<String> {
        let mut state = self.lock();
        if state.runs.contains_key(&run.run_id) {
            return Err(StoreError::DuplicateRun {
                run_id: run.run_id.clone(),
            });
        }
        state.runs.insert(
            run.run_id.clone(),
            AgentRun {
                run_id: run.run_id.clone(),
                workflow: run.workflow.clone(),
                client_id: run.client_id,
                site: run.site.clone(),
                status: RunStatus::Running,
                started_at: Utc::now(),
                finished_at: None,
                metrics: None,
                error: None,
            },
        );
        Ok(run.run_id.clone())
    }

    async fn update_run(
        &self,
        run_id: &str,
        status: RunStatus,
        metrics: Option<&RunMetrics>,
        error: Option<&str>,
    ) -> StoreResult<()> {
        let mut state = self.lock();
        let run = state
            .runs
            .get_mut(run_id)
            .ok_or_else(|| StoreError::RunNotFound {
                run_id: run_id.to_string(),
            })?;
        check_transition(run_id, run.status, status)?;
        run.status = status;
        if let Some(metrics) = metrics {
            run.metrics = Some(metrics.clone());
        }
        if let Some(error) = error {
            run.error = Some(error.to_string());
        }
        if status.terminal() {
            run.finished_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn insert_raw_record(
        &self,
        run_id: &str,
        payload: &Value,
        content_hash: &str,
    ) -> StoreResult<InsertOutcome> {
        let mut state = self.lock();
        require_run(&state, run_id)?;
        if !state.hashes.insert(content_hash.to_string()) {
            return Ok(InsertOutcome { inserted: false });
        }
        let id = state.records.len() as i64 + 1;
        state.records.push(RawRecord {
            id,
            run_id: run_id.to_string(),
            payload: payload.clone(),
            content_hash: content_hash.to_string(),
            created_at: Utc::now(),
        });
        Ok(InsertOutcome { inserted: true })
    }

    async fn insert_error(&self, error: &NewAgentError) -> StoreResult<()> {
        let mut state = self.lock();
        require_run(&state, &error.run_id)?;
        let id = state.errors.len() as i64 + 1;
        state.errors.push(AgentError::from_new(id, error, Utc::now()));
        Ok(())
    }

    async fn insert_check_in(&self, check_in: &CheckIn) -> StoreResult<()> {
        let mut state = self.lock();
        require_run(&state, &check_in.run_id)?;
        state.check_ins.push(check_in.clone());
        Ok(())
    }
}
