use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};

use leadagent_core::browser::{BrowserError, ErrorContext, ErrorHandler, ErrorKind, RetryOptions};
use leadagent_core::connector::{
    Connector, ConnectorError, ConnectorResult, QueryParams, QueryResult,
};
use leadagent_core::store::{
    CheckIn, InsertOutcome, NewAgentError, NewRun, RunMetrics, RunStore, StoreError, StoreResult,
};
use leadagent_core::workflow::{CompletionEvent, Notifier, NotifyError, NotifyResult};
use leadagent_core::{
    ArtifactsSection, JobDescriptor, MemoryRunStore, RunStatus, SqliteRunStore, WorkflowError,
    WorkflowOrchestrator,
};

enum Step {
    Records(Vec<Value>),
    ConnectFails(BrowserError),
    QueryFails(BrowserError),
    /// The query step exhausted its retries and was captured by the handler.
    QueryExhausted(String),
}

#[derive(Default)]
struct Calls {
    connects: Vec<String>,
    disconnects: usize,
}

/// Plays back one scripted outcome per region.
struct ScriptedConnector {
    script: HashMap<String, VecDeque<Step>>,
    calls: Arc<Mutex<Calls>>,
}

impl ScriptedConnector {
    fn new(script: Vec<(&str, Step)>) -> (Self, Arc<Mutex<Calls>>) {
        let calls = Arc::new(Mutex::new(Calls::default()));
        let mut map: HashMap<String, VecDeque<Step>> = HashMap::new();
        for (region, step) in script {
            map.entry(region.to_string()).or_default().push_back(step);
        }
        (
            Self {
                script: map,
                calls: Arc::clone(&calls),
            },
            calls,
        )
    }

    fn next(&mut self, region: &str) -> Option<Step> {
        self.script.get_mut(region).and_then(VecDeque::pop_front)
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    fn site(&self) -> &str {
        "scripted"
    }

    async fn connect(&mut self, region: &str, _errors: &ErrorHandler) -> ConnectorResult<()> {
        self.calls.lock().unwrap().connects.push(region.to_string());
        let fails = matches!(
            self.script.get(region).and_then(VecDeque::front),
            Some(Step::ConnectFails(_))
        );
        if fails {
            if let Some(Step::ConnectFails(err)) = self.next(region) {
                return Err(ConnectorError::Browser(err));
            }
        }
        Ok(())
    }

    async fn query_data(
        &mut self,
        params: &QueryParams,
        errors: &ErrorHandler,
    ) -> ConnectorResult<QueryResult> {
        match self.next(&params.region) {
            Some(Step::Records(records)) => Ok(QueryResult {
                total_count: records.len() as u64,
                records,
                chunks: 1,
            }),
            Some(Step::QueryFails(err)) => Err(ConnectorError::Browser(err)),
            Some(Step::QueryExhausted(message)) => {
                let mut context = ErrorContext::from_message("scripted.query.search", message);
                context.attempts = errors.retry_options().max_retries + 1;
                Err(ConnectorError::Step(errors.capture(None, context).await))
            }
            Some(Step::ConnectFails(_)) | None => Ok(QueryResult::default()),
        }
    }

    async fn disconnect(&mut self) -> ConnectorResult<()> {
        self.calls.lock().unwrap().disconnects += 1;
        Ok(())
    }
}

struct FailingNotifier;

#[async_trait]
impl Notifier for FailingNotifier {
    async fn notify(&self, _event: &CompletionEvent) -> NotifyResult<()> {
        Err(NotifyError::Rejected(503))
    }
}

fn artifacts(dir: &std::path::Path) -> ArtifactsSection {
    ArtifactsSection {
        screenshot_dir: dir.join("shots").display().to_string(),
        trace_dir: dir.join("traces").display().to_string(),
        download_dir: dir.join("downloads").display().to_string(),
        failure_log: dir.join("failures.jsonl").display().to_string(),
    }
}

fn job(regions: &[&str], targets: &[&str]) -> JobDescriptor {
    JobDescriptor {
        workflow: "cole_pull".to_string(),
        client_id: 42,
        client_name: "Acme Roofing".to_string(),
        workspace: "Acme".to_string(),
        period: "2026-10".to_string(),
        regions: regions.iter().map(|r| r.to_string()).collect(),
        parameter_sets: vec![leadagent_core::workflow::ParameterSet {
            name: Some("all".to_string()),
            targets: targets.iter().map(|t| t.to_string()).collect(),
            ..Default::default()
        }],
        fields: Vec::new(),
        filters: None,
    }
}

fn lead(region: &str, n: usize) -> Value {
    json!({"region": region, "first_name": format!("Lead {n}"), "zip": format!("{:05}", 70_000 + n)})
}

fn fast_retry() -> RetryOptions {
    RetryOptions::new(3, std::time::Duration::from_millis(100), 2.0)
}

#[tokio::test(start_paused = true)]
async fn test_duplicates_are_stored_once_across_regions() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryRunStore::new());

    let mut tx: Vec<Value> = (1..=5).map(|n| lead("TX", n)).collect();
    tx.push(json!({"zip": "70001", "first_name": " Lead 1 ", "region": "TX"}));
    tx.push(lead("TX", 2));
    let mut ok: Vec<Value> = (1..=5).map(|n| lead("OK", n)).collect();
    ok.push(lead("TX", 3));
    ok.push(lead("OK", 1));

    let (connector, calls) =
        ScriptedConnector::new(vec![("TX", Step::Records(tx)), ("OK", Step::Records(ok))]);
    let mut orchestrator = WorkflowOrchestrator::new(connector, store.clone(), artifacts(dir.path()))
        .with_retry(fast_retry());
    let report = orchestrator
        .execute(&job(&["TX", "OK"], &["70001"]))
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::Success);
    assert_eq!(store.raw_records().len(), 10);
    assert_eq!(report.metrics.records_observed, 14);
    assert_eq!(report.metrics.records_inserted, 10);
    assert_eq!(report.metrics.duplicates_skipped, 4);
    assert_eq!(report.metrics.work_units_completed, 2);

    let run = store.run(&report.run_id).unwrap();
    assert_eq!(run.status, RunStatus::Success);
    assert_eq!(run.metrics.unwrap().records_observed, 14);
    assert_eq!(calls.lock().unwrap().disconnects, 2);
}

#[tokio::test(start_paused = true)]
async fn test_selector_miss_fails_fast() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryRunStore::new());
    let (connector, calls) = ScriptedConnector::new(vec![
        (
            "A",
            Step::Records((1..=10).map(|n| lead("A", n)).collect()),
        ),
        (
            "B",
            Step::QueryFails(BrowserError::SelectorNotFound("select#state".to_string())),
        ),
        ("C", Step::Records(vec![lead("C", 1)])),
    ]);
    let mut orchestrator = WorkflowOrchestrator::new(connector, store.clone(), artifacts(dir.path()))
        .with_retry(fast_retry());
    let err = orchestrator
        .execute(&job(&["A", "B", "C"], &["10001"]))
        .await
        .unwrap_err();

    let (run_id, step, kind) = match err {
        WorkflowError::RunFailed {
            run_id, step, kind, ..
        } => (run_id, step, kind),
        other => panic!("expected a run failure, got {other:?}"),
    };
    assert_eq!(step, "scripted.query");
    assert_eq!(kind, ErrorKind::SelectorMiss);

    let run = store.run(&run_id).unwrap();
    assert_eq!(run.status, RunStatus::Failed);
    assert!(run.error.unwrap().contains("select#state"));
    assert_eq!(run.metrics.unwrap().records_inserted, 10);
    assert_eq!(store.raw_records().len(), 10);

    let errors = store.errors();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].step, "scripted.query");
    assert_eq!(errors[0].kind, ErrorKind::SelectorMiss);

    let calls = calls.lock().unwrap();
    assert_eq!(calls.connects, vec!["A", "B"]);
    assert_eq!(calls.disconnects, 2);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_follows_every_connect() {
    let outcomes: Vec<(Step, Option<(&str, ErrorKind)>)> = vec![
        (Step::Records(vec![lead("TX", 1)]), None),
        (
            Step::ConnectFails(BrowserError::Navigation {
                url: "https://cole.test".to_string(),
                reason: "net::ERR_CONNECTION_RESET".to_string(),
            }),
            Some(("scripted.connect", ErrorKind::Network)),
        ),
        (
            Step::ConnectFails(BrowserError::Authentication("login rejected".to_string())),
            Some(("scripted.connect", ErrorKind::Auth)),
        ),
        (
            Step::QueryFails(BrowserError::SelectorNotFound("select#state".to_string())),
            Some(("scripted.query", ErrorKind::SelectorMiss)),
        ),
        (
            Step::QueryExhausted("net::ERR_CONNECTION_RESET".to_string()),
            Some(("scripted.query.search", ErrorKind::Network)),
        ),
    ];
    for (step, expected) in outcomes {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryRunStore::new());
        let (connector, calls) = ScriptedConnector::new(vec![("TX", step)]);
        let mut orchestrator = WorkflowOrchestrator::new(connector, store.clone(), artifacts(dir.path()))
            .with_retry(fast_retry());
        let result = orchestrator.execute(&job(&["TX"], &[])).await;

        let calls = calls.lock().unwrap();
        assert_eq!(calls.connects.len(), 1);
        assert_eq!(calls.disconnects, 1);

        let errors = store.errors();
        match expected {
            None => {
                assert!(result.is_ok());
                assert!(errors.is_empty());
            }
            Some((step, kind)) => {
                match result {
                    Err(WorkflowError::RunFailed { step: failed, kind: k, .. }) => {
                        assert_eq!(failed, step);
                        assert_eq!(k, kind);
                    }
                    other => panic!("expected a run failure, got {other:?}"),
                }
                assert_eq!(errors.len(), 1, "failure at {step} persisted more than once");
                assert_eq!(errors[0].step, step);
                assert_eq!(errors[0].kind, kind);
            }
        }
    }
}

/// Refuses the success transition; every other call goes to memory.
struct SuccessRejectingStore {
    inner: Arc<MemoryRunStore>,
}

#[async_trait]
impl RunStore for SuccessRejectingStore {
    async fn create_run(&self, run: &NewRun) -> StoreResult<String> {
        self.inner.create_run(run).await
    }

    async fn update_run(
        &self,
        run_id: &str,
        status: RunStatus,
        metrics: Option<&RunMetrics>,
        error: Option<&str>,
    ) -> StoreResult<()> {
        if status == RunStatus::Success {
            return Err(StoreError::Corrupt {
                table: "agent_runs",
                detail: "disk I/O error".to_string(),
            });
        }
        self.inner.update_run(run_id, status, metrics, error).await
    }

    async fn insert_raw_record(
        &self,
        run_id: &str,
        payload: &Value,
        content_hash: &str,
    ) -> StoreResult<InsertOutcome> {
        self.inner.insert_raw_record(run_id, payload, content_hash).await
    }

    async fn insert_error(&self, error: &NewAgentError) -> StoreResult<()> {
        self.inner.insert_error(error).await
    }

    async fn insert_check_in(&self, check_in: &CheckIn) -> StoreResult<()> {
        self.inner.insert_check_in(check_in).await
    }
}

#[tokio::test(start_paused = true)]
async fn test_failed_completion_update_marks_the_run_failed() {
    let dir = tempfile::tempdir().unwrap();
    let memory = Arc::new(MemoryRunStore::new());
    let store = Arc::new(SuccessRejectingStore {
        inner: memory.clone(),
    });
    let (connector, calls) = ScriptedConnector::new(vec![("TX", Step::Records(vec![lead("TX", 1)]))]);
    let mut orchestrator = WorkflowOrchestrator::new(connector, store, artifacts(dir.path()));
    let err = orchestrator.execute(&job(&["TX"], &["75001"])).await.unwrap_err();

    let run_id = match err {
        WorkflowError::RunFailed { run_id, step, .. } => {
            assert_eq!(step, "scripted.complete");
            run_id
        }
        other => panic!("expected a run failure, got {other:?}"),
    };
    let run = memory.run(&run_id).unwrap();
    assert_eq!(run.status, RunStatus::Failed);
    assert!(run.error.unwrap().contains("disk I/O error"));
    assert_eq!(run.metrics.unwrap().records_inserted, 1);
    assert_eq!(memory.errors().len(), 1);
    assert_eq!(calls.lock().unwrap().disconnects, 1);
}

#[tokio::test(start_paused = true)]
async fn test_zero_result_units_still_check_in() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryRunStore::new());
    let (connector, _calls) = ScriptedConnector::new(vec![
        ("TX", Step::Records(Vec::new())),
        ("OK", Step::Records(vec![lead("OK", 1)])),
    ]);
    let mut orchestrator = WorkflowOrchestrator::new(connector, store.clone(), artifacts(dir.path()));
    let report = orchestrator
        .execute(&job(&["TX", "OK"], &["75001", "75002"]))
        .await
        .unwrap();

    let check_ins = store.check_ins();
    assert_eq!(check_ins.len(), 4);
    assert_eq!(report.metrics.check_ins, 4);
    let tx: Vec<_> = check_ins.iter().filter(|c| c.region == "TX").collect();
    assert_eq!(tx.len(), 2);
    assert!(tx.iter().all(|c| c.records_found == 0));
    assert!(check_ins
        .iter()
        .filter(|c| c.region == "OK")
        .all(|c| c.records_found == 1 && c.period == "2026-10" && c.workspace == "Acme"));
}

#[tokio::test(start_paused = true)]
async fn test_untargeted_unit_checks_in_its_region() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryRunStore::new());
    let (connector, _calls) = ScriptedConnector::new(vec![("TX", Step::Records(Vec::new()))]);
    let mut orchestrator = WorkflowOrchestrator::new(connector, store.clone(), artifacts(dir.path()));
    orchestrator.execute(&job(&["TX"], &[])).await.unwrap();

    let check_ins = store.check_ins();
    assert_eq!(check_ins.len(), 1);
    assert_eq!(check_ins[0].target, "TX");
}

#[tokio::test(start_paused = true)]
async fn test_notification_failure_does_not_fail_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryRunStore::new());
    let (connector, _calls) = ScriptedConnector::new(vec![("TX", Step::Records(vec![lead("TX", 1)]))]);
    let mut orchestrator = WorkflowOrchestrator::new(connector, store.clone(), artifacts(dir.path()))
        .with_notifier(Arc::new(FailingNotifier));
    let report = orchestrator.execute(&job(&["TX"], &["75001"])).await.unwrap();
    assert_eq!(store.run(&report.run_id).unwrap().status, RunStatus::Success);
}

#[tokio::test(start_paused = true)]
async fn test_invalid_job_creates_no_run() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryRunStore::new());
    let (connector, calls) = ScriptedConnector::new(Vec::new());
    let mut orchestrator = WorkflowOrchestrator::new(connector, store.clone(), artifacts(dir.path()));
    let err = orchestrator.execute(&job(&[], &["75001"])).await.unwrap_err();
    assert!(matches!(err, WorkflowError::Validation(_)));
    assert!(store.runs().is_empty());
    assert!(calls.lock().unwrap().connects.is_empty());
}

#[tokio::test]
async fn test_rerun_against_sqlite_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(SqliteRunStore::new(dir.path().join("agent.sqlite")).unwrap());
    store.initialize().unwrap();
    let records: Vec<Value> = (1..=5).map(|n| lead("TX", n)).collect();

    let mut run_ids = Vec::new();
    for _ in 0..2 {
        let (connector, _calls) =
            ScriptedConnector::new(vec![("TX", Step::Records(records.clone()))]);
        let mut orchestrator =
            WorkflowOrchestrator::new(connector, store.clone(), artifacts(dir.path()));
        let report = orchestrator.execute(&job(&["TX"], &["75001"])).await.unwrap();
        run_ids.push(report.run_id.clone());
        if run_ids.len() == 2 {
            assert_eq!(report.metrics.records_inserted, 0);
            assert_eq!(report.metrics.duplicates_skipped, 5);
        }
    }

    assert_eq!(store.count_raw_records(None).unwrap(), 5);
    assert_eq!(store.count_raw_records(Some(&run_ids[1])).unwrap(), 0);
    assert_eq!(store.list_check_ins(&run_ids[1]).unwrap().len(), 1);

    let err = store
        .update_run(&run_ids[0], RunStatus::Failed, None, Some("late"))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::RunFrozen { .. }));
    let run = store.fetch_run(&run_ids[0]).unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Success);
}

#[tokio::test]
async fn test_runs_cannot_be_created_twice() {
    let store = MemoryRunStore::new();
    let run = NewRun {
        run_id: "run-x".to_string(),
        workflow: "cole_pull".to_string(),
        client_id: 1,
        site: "cole".to_string(),
    };
    store.create_run(&run).await.unwrap();
    let err = store.create_run(&run).await.unwrap_err();
    assert!(matches!(err, StoreError::DuplicateRun { .. }));
}
