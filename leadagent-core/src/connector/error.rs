use std::path::PathBuf;

use thiserror::Error;

use crate::browser::{BrowserError, CredentialError, ErrorKind, StepFailure};
use crate::error::ConfigError;
use crate::selectors::SelectorError;

#[derive(Debug, Error)]
pub enum ConnectorError {
    /// Already captured and persisted by the error handler.
    #[error(transparent)]
    Step(#[from] StepFailure),
    #[error(transparent)]
    Browser(#[from] BrowserError),
    #[error(transparent)]
    Selector(#[from] SelectorError),
    #[error(transparent)]
    Credentials(#[from] CredentialError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("validation failed: csv export {path} is malformed: {source}")]
    Csv { path: PathBuf, source: csv::Error },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("invalid state: {0}")]
    NotConnected(&'static str),
}

impl ConnectorError {
    /// The captured failure, when the error handler already recorded it.
    pub fn captured(&self) -> Option<&StepFailure> {
        match self {
            ConnectorError::Step(failure) => Some(failure),
            _ => None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ConnectorError::Step(failure) => failure.kind,
            other => ErrorKind::classify(&other.to_string()),
        }
    }

    pub fn step(&self) -> Option<&str> {
        self.captured().map(|failure| failure.step.as_str())
    }
}

pub type ConnectorResult<T> = std::result::Result<T, ConnectorError>;
