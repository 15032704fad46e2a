use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::config::load_document;
use crate::connector::{QueryFilters, QueryParams};

use super::{WorkflowError, WorkflowResult};

fn default_workflow() -> String {
    "cole_pull".to_string()
}

/// One client's monthly pull: which regions to query and with what targets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobDescriptor {
    #[serde(default = "default_workflow")]
    pub workflow: String,
    pub client_id: i64,
    pub client_name: String,
    pub workspace: String,
    /// Reporting period, e.g. `2026-10`.
    pub period: String,
    pub regions: Vec<String>,
    pub parameter_sets: Vec<ParameterSet>,
    #[serde(default)]
    pub fields: Vec<String>,
    #[serde(default)]
    pub filters: Option<QueryFilters>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParameterSet {
    pub name: Option<String>,
    /// Restricts the set to one region; unscoped sets apply to every region.
    pub region: Option<String>,
    pub targets: Vec<String>,
    pub fields: Vec<String>,
    pub filters: Option<QueryFilters>,
}

impl ParameterSet {
    fn applies_to(&self, region: &str) -> bool {
        self.region
            .as_deref()
            .map_or(true, |scoped| scoped.eq_ignore_ascii_case(region))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkUnit {
    pub index: usize,
    pub label: String,
    pub params: QueryParams,
}

impl WorkUnit {
    pub fn region(&self) -> &str {
        &self.params.region
    }
}

impl JobDescriptor {
    pub fn from_path<P: AsRef<Path>>(path: P) -> WorkflowResult<Self> {
        let job: JobDescriptor = load_document(path)?;
        job.validate()?;
        Ok(job)
    }

    pub fn validate(&self) -> WorkflowResult<()> {
        let invalid = |message: String| Err(WorkflowError::Validation(message));
        if self.client_name.trim().is_empty() {
            return invalid("job has no client_name".to_string());
        }
        if self.period.trim().is_empty() {
            return invalid(format!("job for {} has no period", self.client_name));
        }
        if self.regions.is_empty() {
            return invalid(format!("job for {} lists no regions", self.client_name));
        }
        if let Some(region) = self.regions.iter().find(|r| r.trim().is_empty()) {
            return invalid(format!("job for {} has a blank region {region:?}", self.client_name));
        }
        if self.parameter_sets.is_empty() {
            return invalid(format!(
                "job for {} lists no parameter sets",
                self.client_name
            ));
        }
        for set in &self.parameter_sets {
            if let Some(scoped) = set.region.as_deref() {
                if !self.regions.iter().any(|r| r.eq_ignore_ascii_case(scoped)) {
                    return invalid(format!(
                        "parameter set {} is scoped to {scoped}, which is not a job region",
                        set.name.as_deref().unwrap_or("<unnamed>")
                    ));
                }
            }
        }
        Ok(())
    }

    /// Regions crossed with the parameter sets that apply to them, in job order.
    pub fn work_units(&self) -> Vec<WorkUnit> {
        let mut units = Vec::new();
        for region in &self.regions {
            for (position, set) in self.parameter_sets.iter().enumerate() {
                if !set.applies_to(region) {
                    continue;
                }
                let name = set
                    .name
                    .clone()
                    .unwrap_or_else(|| format!("set-{}", position + 1));
                let fields = if set.fields.is_empty() {
                    self.fields.clone()
                } else {
                    set.fields.clone()
                };
                units.push(WorkUnit {
                    index: units.len(),
                    label: format!("{region}/{name}"),
                    params: QueryParams {
                        region: region.clone(),
                        targets: set.targets.clone(),
                        fields,
                        filters: set.filters.clone().or_else(|| self.filters.clone()),
                    },
                });
            }
        }
        units
    }
}
