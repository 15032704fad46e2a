use thiserror::Error;

use crate::browser::ErrorKind;
use crate::connector::ConnectorError;
use crate::error::ConfigError;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("run {run_id} failed at {step} ({kind}): {message}")]
    RunFailed {
        run_id: String,
        step: String,
        kind: ErrorKind,
        message: String,
    },
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("connector error: {0}")]
    Connector(#[from] ConnectorError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("validation failed: {0}")]
    Validation(String),
}

impl WorkflowError {
    pub fn run_id(&self) -> Option<&str> {
        match self {
            WorkflowError::RunFailed { run_id, .. } => Some(run_id),
            _ => None,
        }
    }
}

pub type WorkflowResult<T> = std::result::Result<T, WorkflowError>;
