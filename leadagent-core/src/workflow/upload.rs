use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::browser::{ErrorContext, ErrorHandler, RetryOptions};
use crate::config::ArtifactsSection;
use crate::connector::{BisonCampaign, BisonConnector, BisonImport, ConnectorError};
use crate::store::{NewRun, RunMetrics, RunStatus, RunStore};

use super::{RunReport, WorkflowError, WorkflowResult};

/// Pushes one contact CSV into a Bison workspace, optionally attaching the
/// new list to a campaign and renaming that campaign.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadJob {
    pub client_id: i64,
    pub workspace: String,
    #[serde(flatten)]
    pub import: BisonImport,
    #[serde(default)]
    pub campaign: Option<String>,
    #[serde(default)]
    pub rename_to: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadReport {
    pub run: RunReport,
    pub imported: u64,
    pub campaign: Option<BisonCampaign>,
}

pub async fn upload_contacts(
    bison: &mut BisonConnector,
    store: Arc<dyn RunStore>,
    artifacts: &ArtifactsSection,
    retry: RetryOptions,
    job: &UploadJob,
) -> WorkflowResult<UploadReport> {
    if job.workspace.trim().is_empty() {
        return Err(WorkflowError::Validation(
            "upload job has no workspace".to_string(),
        ));
    }
    let run_id = Uuid::new_v4().to_string();
    let errors = ErrorHandler::new(run_id.clone(), Arc::clone(&store), artifacts, retry)?;
    store
        .create_run(&NewRun {
            run_id: run_id.clone(),
            workflow: "bison_upload".to_string(),
            client_id: job.client_id,
            site: "bison".to_string(),
        })
        .await?;
    info!(run_id = %run_id, workspace = %job.workspace, list = %job.import.list_name, "upload started");

    let mut metrics = RunMetrics {
        work_units_total: 1,
        ..RunMetrics::default()
    };
    let outcome = push(bison, job, &errors).await;
    if let Err(err) = bison.disconnect().await {
        warn!(run_id = %run_id, error = %err, "disconnect failed");
    }

    match outcome {
        Ok((imported, campaign)) => {
            metrics.records_observed = imported;
            metrics.records_inserted = imported;
            metrics.work_units_completed = 1;
            store
                .update_run(&run_id, RunStatus::Success, Some(&metrics), None)
                .await?;
            info!(run_id = %run_id, imported, "upload succeeded");
            Ok(UploadReport {
                run: RunReport {
                    run_id,
                    status: RunStatus::Success,
                    metrics,
                },
                imported,
                campaign,
            })
        }
        Err(err) => {
            let (step, kind, message) = match err.captured() {
                Some(failure) => (failure.step.clone(), failure.kind, failure.message.clone()),
                None => {
                    let context = ErrorContext::from_message("bison.upload", err.to_string());
                    let failure = errors.capture(None, context).await;
                    (failure.step, failure.kind, failure.message)
                }
            };
            if let Err(store_err) = store
                .update_run(&run_id, RunStatus::Failed, Some(&metrics), Some(&message))
                .await
            {
                error!(run_id = %run_id, error = %store_err, "failed to mark run as failed");
            }
            Err(WorkflowError::RunFailed {
                run_id,
                step,
                kind,
                message,
            })
        }
    }
}

async fn push(
    bison: &mut BisonConnector,
    job: &UploadJob,
    errors: &ErrorHandler,
) -> Result<(u64, Option<BisonCampaign>), ConnectorError> {
    bison.connect(&job.workspace, errors).await?;
    let imported = bison.import_contacts(&job.import, errors).await?;
    let Some(title) = job.campaign.as_deref() else {
        return Ok((imported, None));
    };
    let Some(campaign) = bison.find_campaign(title, errors).await? else {
        return Err(ConnectorError::Validation(format!(
            "campaign {title} not found in {}",
            job.workspace
        )));
    };
    bison
        .add_contacts_to_campaign(&campaign.id, &job.import.list_name, errors)
        .await?;
    if let Some(new_title) = job.rename_to.as_deref() {
        bison.rename_campaign(&campaign.id, new_title, errors).await?;
    }
    Ok((imported, Some(campaign)))
}
