//! Append-only persistence for runs, raw records, errors and check-ins.

pub mod error;
pub mod memory;
pub mod models;
pub mod sqlite;

use async_trait::async_trait;
use serde_json::Value;

pub use error::{StoreError, StoreResult};
pub use memory::MemoryRunStore;
pub use models::{
    AgentError, AgentRun, CheckIn, InsertOutcome, NewAgentError, NewRun, RawRecord, RunMetrics,
    RunStatus,
};
pub use sqlite::{SqliteRunStore, SqliteRunStoreBuilder};

#[async_trait]
pub trait RunStore: Send + Sync {
    /// Persists a new run in `running` status and returns its id.
    async fn create_run(&self, run: &NewRun) -> StoreResult<String>;

    /// Moves a run to `status`. Runs in a terminal status are frozen.
    async fn update_run(
        &self,
        run_id: &str,
        status: RunStatus,
        metrics: Option<&RunMetrics>,
        error: Option<&str>,
    ) -> StoreResult<()>;

    /// Inserts the record unless its hash is already stored.
    async fn insert_raw_record(
        &self,
        run_id: &str,
        payload: &Value,
        content_hash: &str,
    ) -> StoreResult<InsertOutcome>;

    async fn insert_error(&self, error: &NewAgentError) -> StoreResult<()>;

    async fn insert_check_in(&self, check_in: &CheckIn) -> StoreResult<()>;
}

pub(crate) fn check_transition(run_id: &str, from: RunStatus, to: RunStatus) -> StoreResult<()> {
    if from.terminal() {
        return Err(StoreError::RunFrozen {
            run_id: run_id.to_string(),
            status: from.to_string(),
        });
    }
    if to == RunStatus::Pending {
        return Err(StoreError::InvalidTransition {
            run_id: run_id.to_string(),
            from: from.to_string(),
            to: to.to_string(),
        });
    }
    Ok(())
}
