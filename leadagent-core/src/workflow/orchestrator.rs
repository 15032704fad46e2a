use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::browser::{ErrorContext, ErrorHandler, ErrorKind, RetryOptions};
use crate::config::ArtifactsSection;
use crate::connector::{Connector, ConnectorError, QueryResult};
use crate::store::{CheckIn, NewRun, RunMetrics, RunStatus, RunStore, StoreError};

use super::hashing::content_hash;
use super::job::{JobDescriptor, WorkUnit};
use super::notify::{CompletionEvent, LogNotifier, Notifier};
use super::{WorkflowError, WorkflowResult};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub status: RunStatus,
    pub metrics: RunMetrics,
}

/// Why a work unit stopped, and whether the failure is already persisted.
#[derive(Debug)]
struct UnitFailure {
    step: String,
    kind: ErrorKind,
    message: String,
    captured: bool,
}

impl UnitFailure {
    fn connector(step: String, err: ConnectorError) -> Self {
        match err.captured() {
            Some(failure) => Self {
                step: failure.step.clone(),
                kind: failure.kind,
                message: failure.message.clone(),
                captured: true,
            },
            None => Self {
                kind: err.kind(),
                message: err.to_string(),
                step,
                captured: false,
            },
        }
    }

    fn store(step: String, err: StoreError) -> Self {
        let message = err.to_string();
        Self {
            step,
            kind: ErrorKind::classify(&message),
            message,
            captured: false,
        }
    }
}

/// Drives one connector through every work unit of a job, one unit at a time.
pub struct WorkflowOrchestrator<C: Connector> {
    connector: C,
    store: Arc<dyn RunStore>,
    notifier: Arc<dyn Notifier>,
    artifacts: ArtifactsSection,
    retry: RetryOptions,
}

impl<C: Connector> WorkflowOrchestrator<C> {
    pub fn new(connector: C, store: Arc<dyn RunStore>, artifacts: ArtifactsSection) -> Self {
        Self {
            connector,
            store,
            notifier: Arc::new(LogNotifier),
            artifacts,
            retry: RetryOptions::default(),
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_retry(mut self, retry: RetryOptions) -> Self {
        self.retry = retry;
        self
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    pub fn into_connector(self) -> C {
        self.connector
    }

    pub async fn execute(&mut self, job: &JobDescriptor) -> WorkflowResult<RunReport> {
        job.validate()?;
        let units = job.work_units();
        let run_id = Uuid::new_v4().to_string();
        let site = self.connector.site().to_string();
        let errors = ErrorHandler::new(
            run_id.clone(),
            Arc::clone(&self.store),
            &self.artifacts,
            self.retry,
        )?;

        self.store
            .create_run(&NewRun {
                run_id: run_id.clone(),
                workflow: job.workflow.clone(),
                client_id: job.client_id,
                site: site.clone(),
            })
            .await?;
        info!(
            run_id = %run_id,
            workflow = %job.workflow,
            client = %job.client_name,
            period = %job.period,
            units = units.len(),
            "run started"
        );

        let mut metrics = RunMetrics {
            work_units_total: units.len() as u64,
            ..RunMetrics::default()
        };

        for unit in &units {
            info!(run_id = %run_id, unit = %unit.label, "work unit started");
            let outcome = self.process_unit(&site, job, unit, &errors, &mut metrics).await;
            if let Err(err) = self.connector.disconnect().await {
                warn!(run_id = %run_id, unit = %unit.label, error = %err, "disconnect failed");
            }
            match outcome {
                Ok(found) => {
                    metrics.work_units_completed += 1;
                    info!(run_id = %run_id, unit = %unit.label, records = found, "work unit completed");
                }
                Err(failure) => return Err(self.fail_run(&run_id, &errors, failure, &metrics).await),
            }
        }

        if let Err(err) = self
            .store
            .update_run(&run_id, RunStatus::Success, Some(&metrics), None)
            .await
        {
            let failure = UnitFailure::store(format!("{site}.complete"), err);
            return Err(self.fail_run(&run_id, &errors, failure, &metrics).await);
        }
        info!(
            run_id = %run_id,
            observed = metrics.records_observed,
            inserted = metrics.records_inserted,
            duplicates = metrics.duplicates_skipped,
            "run succeeded"
        );

        let event = CompletionEvent {
            run_id: run_id.clone(),
            client: job.client_name.clone(),
            period: job.period.clone(),
            record_count: metrics.records_observed,
        };
        if let Err(err) = self.notifier.notify(&event).await {
            warn!(run_id = %run_id, error = %err, "completion notification failed");
        }

        Ok(RunReport {
            run_id,
            status: RunStatus::Success,
            metrics,
        })
    }

    async fn process_unit(
        &mut self,
        site: &str,
        job: &JobDescriptor,
        unit: &WorkUnit,
        errors: &ErrorHandler,
        metrics: &mut RunMetrics,
    ) -> Result<u64, UnitFailure> {
        self.connector
            .connect(unit.region(), errors)
            .await
            .map_err(|err| UnitFailure::connector(format!("{site}.connect"), err))?;
        let result = self
            .connector
            .query_data(&unit.params, errors)
            .await
            .map_err(|err| UnitFailure::connector(format!("{site}.query"), err))?;
        self.persist(site, job, unit, errors.run_id(), &result, metrics)
            .await
            .map_err(|err| UnitFailure::store(format!("{site}.persist"), err))?;
        Ok(result.records.len() as u64)
    }

    async fn persist(
        &self,
        site: &str,
        job: &JobDescriptor,
        unit: &WorkUnit,
        run_id: &str,
        result: &QueryResult,
        metrics: &mut RunMetrics,
    ) -> Result<(), StoreError> {
        for record in &result.records {
            let hash = content_hash(record);
            let outcome = self.store.insert_raw_record(run_id, record, &hash).await?;
            metrics.records_observed += 1;
            if outcome.inserted {
                metrics.records_inserted += 1;
            } else {
                metrics.duplicates_skipped += 1;
                debug!(site, hash = %hash, "duplicate record skipped");
            }
        }
        metrics.chunks += result.chunks;

        let found = result.records.len() as u64;
        let targets: Vec<&str> = if unit.params.targets.is_empty() {
            vec![unit.region()]
        } else {
            unit.params.targets.iter().map(String::as_str).collect()
        };
        for target in targets {
            self.store
                .insert_check_in(&CheckIn {
                    run_id: run_id.to_string(),
                    client_id: job.client_id,
                    client_name: job.client_name.clone(),
                    workspace: job.workspace.clone(),
                    period: job.period.clone(),
                    region: unit.region().to_string(),
                    target: target.to_string(),
                    records_found: found,
                })
                .await?;
            metrics.check_ins += 1;
        }
        Ok(())
    }

    async fn fail_run(
        &self,
        run_id: &str,
        errors: &ErrorHandler,
        failure: UnitFailure,
        metrics: &RunMetrics,
    ) -> WorkflowError {
        if !failure.captured {
            let context = ErrorContext {
                step: failure.step.clone(),
                kind: failure.kind,
                message: failure.message.clone(),
                url: None,
                locator: None,
                attempts: 1,
            };
            errors.capture(None, context).await;
        }
        if let Err(err) = self
            .store
            .update_run(run_id, RunStatus::Failed, Some(metrics), Some(&failure.message))
            .await
        {
            error!(run_id, error = %err, "failed to mark run as failed");
        }
        error!(
            run_id,
            step = %failure.step,
            kind = %failure.kind,
            error = %failure.message,
            "run failed"
        );
        WorkflowError::RunFailed {
            run_id: run_id.to_string(),
            step: failure.step,
            kind: failure.kind,
            message: failure.message,
        }
    }
}
