//! Site connectors: one automation driver per external data source.

mod bison;
mod cole;
mod error;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::browser::ErrorHandler;

pub use bison::{BisonCampaign, BisonConnector, BisonImport};
pub use cole::{chunk_targets, parse_result_count, ColeConnector, ColeSettings, COLE_DEFAULT_FIELDS};
pub use error::{ConnectorError, ConnectorResult};

/// Optional narrowing applied on top of region and targets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryFilters {
    pub home_value_max: Option<u64>,
    pub purchase_year_min: Option<u32>,
    pub years_at_address_min: Option<u32>,
}

impl QueryFilters {
    pub fn is_empty(&self) -> bool {
        self.home_value_max.is_none()
            && self.purchase_year_min.is_none()
            && self.years_at_address_min.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryParams {
    pub region: String,
    /// Geographic targets inside the region, ZIP codes for Cole.
    pub targets: Vec<String>,
    /// Requested output fields; empty means the connector's defaults.
    pub fields: Vec<String>,
    pub filters: Option<QueryFilters>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    pub records: Vec<Value>,
    pub total_count: u64,
    pub chunks: u64,
}

/// A data source driven through the browser controller.
///
/// `connect` runs once per work unit and `disconnect` must follow on every
/// exit path; it is idempotent.
#[async_trait]
pub trait Connector: Send {
    fn site(&self) -> &str;

    async fn connect(&mut self, region: &str, errors: &ErrorHandler) -> ConnectorResult<()>;

    async fn query_data(
        &mut self,
        params: &QueryParams,
        errors: &ErrorHandler,
    ) -> ConnectorResult<QueryResult>;

    async fn disconnect(&mut self) -> ConnectorResult<()>;
}
