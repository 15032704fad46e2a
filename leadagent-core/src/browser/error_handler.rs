use std::fmt;
use std::fs::{create_dir_all, File, OpenOptions};
use std::future::Future;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, warn};

use crate::config::ArtifactsSection;
use crate::store::{NewAgentError, RunStore};

use super::controller::BrowserController;
use super::error::BrowserResult;
use super::retry::{retry_if, RetryOptions};

const CAPTCHA_KEYWORDS: &[&str] = &["captcha", "recaptcha", "bot detection", "hcaptcha"];
const SELECTOR_KEYWORDS: &[&str] = &[
    "selector",
    "locator not found",
    "element not found",
    "no such element",
    "could not find node",
];
const TIMEOUT_KEYWORDS: &[&str] = &["timeout", "timed out"];
const NETWORK_KEYWORDS: &[&str] = &[
    "net::err",
    "econnreset",
    "econnrefused",
    "connection",
    "dns",
    "socket",
    "network",
];
const AUTH_KEYWORDS: &[&str] = &[
    "authentication",
    "login",
    "credentials",
    "unauthorized",
    "401",
    "403",
];
const UPLOAD_KEYWORDS: &[&str] = &["upload"];
const VALIDATION_KEYWORDS: &[&str] = &["validation", "invalid"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    Auth,
    Captcha,
    SelectorMiss,
    Network,
    Timeout,
    Validation,
    Upload,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Auth => "AUTH",
            ErrorKind::Captcha => "CAPTCHA",
            ErrorKind::SelectorMiss => "SELECTOR_MISS",
            ErrorKind::Network => "NETWORK",
            ErrorKind::Timeout => "TIMEOUT",
            ErrorKind::Validation => "VALIDATION",
            ErrorKind::Upload => "UPLOAD",
        }
    }

    /// Classifies a failure from its message alone. Transport failures are
    /// checked before the auth/upload/validation keywords since their messages
    /// carry URLs such as `/login`. Anything unrecognised is treated as a
    /// network failure.
    pub fn classify(message: &str) -> Self {
        let lower = message.to_lowercase();
        let matches = |keywords: &[&str]| keywords.iter().any(|k| lower.contains(k));
        if matches(CAPTCHA_KEYWORDS) {
            ErrorKind::Captcha
        } else if matches(SELECTOR_KEYWORDS) {
            ErrorKind::SelectorMiss
        } else if matches(TIMEOUT_KEYWORDS) {
            ErrorKind::Timeout
        } else if matches(NETWORK_KEYWORDS) {
            ErrorKind::Network
        } else if matches(AUTH_KEYWORDS) {
            ErrorKind::Auth
        } else if matches(UPLOAD_KEYWORDS) {
            ErrorKind::Upload
        } else if matches(VALIDATION_KEYWORDS) {
            ErrorKind::Validation
        } else {
            ErrorKind::Network
        }
    }

    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorKind::Network | ErrorKind::Timeout)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("unknown error kind {0}")]
pub struct UnknownErrorKind(pub String);

impl FromStr for ErrorKind {
    type Err = UnknownErrorKind;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "AUTH" => Ok(ErrorKind::Auth),
            "CAPTCHA" => Ok(ErrorKind::Captcha),
            "SELECTOR_MISS" => Ok(ErrorKind::SelectorMiss),
            "NETWORK" => Ok(ErrorKind::Network),
            "TIMEOUT" => Ok(ErrorKind::Timeout),
            "VALIDATION" => Ok(ErrorKind::Validation),
            "UPLOAD" => Ok(ErrorKind::Upload),
            other => Err(UnknownErrorKind(other.to_string())),
        }
    }
}

pub fn is_captcha_error(message: &str) -> bool {
    let lower = message.to_lowercase();
    CAPTCHA_KEYWORDS.iter().any(|k| lower.contains(k))
}

pub fn is_auth_error(message: &str) -> bool {
    let lower = message.to_lowercase();
    AUTH_KEYWORDS.iter().any(|k| lower.contains(k))
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ArtifactPaths {
    pub screenshot: Option<PathBuf>,
    pub trace: Option<PathBuf>,
}

/// What is known about a failure before capture.
#[derive(Debug, Clone)]
pub struct ErrorContext {
    pub step: String,
    pub kind: ErrorKind,
    pub message: String,
    pub url: Option<String>,
    pub locator: Option<String>,
    pub attempts: u32,
}

impl ErrorContext {
    pub fn from_message(step: impl Into<String>, message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            step: step.into(),
            kind: ErrorKind::classify(&message),
            message,
            url: None,
            locator: None,
            attempts: 1,
        }
    }

    pub fn with_locator(mut self, locator: Option<&str>) -> Self {
        self.locator = locator.map(str::to_string);
        self
    }
}

/// A failure that has already been captured and persisted.
#[derive(Debug, Clone, Error, Serialize)]
#[error("{kind} at {step}: {message}")]
pub struct StepFailure {
    pub step: String,
    pub kind: ErrorKind,
    pub message: String,
    pub url: Option<String>,
    pub locator: Option<String>,
    pub artifacts: ArtifactPaths,
    pub attempts: u32,
}

#[derive(Serialize)]
struct FailureEntry<'a> {
    timestamp: DateTime<Utc>,
    run_id: &'a str,
    #[serde(flatten)]
    failure: &'a StepFailure,
}

/// Classifies, captures and persists failures for one run.
pub struct ErrorHandler {
    run_id: String,
    store: Arc<dyn RunStore>,
    screenshot_dir: PathBuf,
    trace_dir: PathBuf,
    retry: RetryOptions,
    failure_log: Mutex<File>,
}

impl fmt::Debug for ErrorHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorHandler")
            .field("run_id", &self.run_id)
            .field("screenshot_dir", &self.screenshot_dir)
            .field("trace_dir", &self.trace_dir)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl ErrorHandler {
    pub fn new(
        run_id: impl Into<String>,
        store: Arc<dyn RunStore>,
        artifacts: &ArtifactsSection,
        retry: RetryOptions,
    ) -> std::io::Result<Self> {
        let screenshot_dir = PathBuf::from(&artifacts.screenshot_dir);
        let trace_dir = PathBuf::from(&artifacts.trace_dir);
        create_dir_all(&screenshot_dir)?;
        create_dir_all(&trace_dir)?;
        let log_path = Path::new(&artifacts.failure_log);
        if let Some(parent) = log_path.parent() {
            create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path)?;
        Ok(Self {
            run_id: run_id.into(),
            store,
            screenshot_dir,
            trace_dir,
            retry,
            failure_log: Mutex::new(file),
        })
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn retry_options(&self) -> &RetryOptions {
        &self.retry
    }

    /// Runs one site action: network and timeout failures are retried with
    /// backoff, anything else (or the last retryable failure) is captured
    /// once and returned.
    pub async fn run_step<T, F, Fut>(
        &self,
        browser: &BrowserController,
        step: &str,
        locator: Option<&str>,
        operation: F,
    ) -> Result<T, StepFailure>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = BrowserResult<T>>,
    {
        let mut attempts = 1u32;
        let result = retry_if(
            &self.retry,
            |err| ErrorKind::classify(&err.to_string()).is_retryable(),
            |attempt, _| {
                attempts = attempt + 1;
                browser.record_retry();
            },
            operation,
        )
        .await;
        match result {
            Ok(value) => Ok(value),
            Err(err) => {
                let mut context = ErrorContext::from_message(step, err.to_string())
                    .with_locator(locator);
                context.attempts = attempts;
                Err(self.capture(Some(browser), context).await)
            }
        }
    }

    /// Captures a missing locator that the caller detected itself.
    pub async fn handle_selector_not_found(
        &self,
        browser: &BrowserController,
        step: &str,
        locator: &str,
    ) -> StepFailure {
        let context = ErrorContext {
            step: step.to_string(),
            kind: ErrorKind::SelectorMiss,
            message: format!("selector not found: {locator}"),
            url: None,
            locator: Some(locator.to_string()),
            attempts: 1,
        };
        self.capture(Some(browser), context).await
    }

    /// Takes best-effort artifacts, appends the failure log and persists an
    /// AgentError. Never fails: capture problems are logged and swallowed.
    pub async fn capture(
        &self,
        browser: Option<&BrowserController>,
        context: ErrorContext,
    ) -> StepFailure {
        let stem = format!(
            "{}-{}",
            sanitize(&context.step),
            Utc::now().format("%Y%m%dT%H%M%S%.3fZ")
        );
        let mut artifacts = ArtifactPaths::default();
        let mut url = context.url;
        if let Some(browser) = browser {
            artifacts.screenshot = browser
                .screenshot(&self.screenshot_dir.join(format!("{stem}.png")))
                .await;
            artifacts.trace = browser
                .snapshot_html(&self.trace_dir.join(format!("{stem}.html")))
                .await;
            if url.is_none() {
                url = browser.current_url().await.ok().flatten();
            }
        }

        let failure = StepFailure {
            step: context.step,
            kind: context.kind,
            message: context.message,
            url,
            locator: context.locator,
            artifacts,
            attempts: context.attempts,
        };
        error!(
            run_id = %self.run_id,
            step = %failure.step,
            kind = %failure.kind,
            attempts = failure.attempts,
            error = %failure.message,
            "step failed"
        );
        self.append_failure_log(&failure);

        let record = NewAgentError {
            run_id: self.run_id.clone(),
            step: failure.step.clone(),
            kind: failure.kind,
            message: failure.message.clone(),
            url: failure.url.clone(),
            locator: failure.locator.clone(),
            screenshot_path: failure.artifacts.screenshot.as_deref().map(path_string),
            trace_path: failure.artifacts.trace.as_deref().map(path_string),
        };
        if let Err(err) = self.store.insert_error(&record).await {
            warn!(error = %err, step = %failure.step, "failed to persist agent error");
        }
        failure
    }

    fn append_failure_log(&self, failure: &StepFailure) {
        let entry = FailureEntry {
            timestamp: Utc::now(),
            run_id: &self.run_id,
            failure,
        };
        let line = match serde_json::to_string(&entry) {
            Ok(line) => line,
            Err(err) => {
                warn!(error = %err, "failure log entry could not be serialized");
                return;
            }
        };
        let mut guard = self
            .failure_log
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Err(err) = writeln!(guard, "{line}").and_then(|_| guard.flush()) {
            warn!(error = %err, "failure log could not be written");
        }
    }
}

fn sanitize(step: &str) -> String {
    step.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect()
}

fn path_string(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::BrowserError;
    use crate::config::TimeoutSection;
    use crate::store::{MemoryRunStore, NewRun};
    use crate::testing::{FakeSessionFactory, ScriptedFailure};
    use std::time::Duration;
    use tempfile::TempDir;

    async fn store_with_run(run_id: &str) -> Arc<MemoryRunStore> {
        let store = Arc::new(MemoryRunStore::default());
        store
            .create_run(&NewRun {
                run_id: run_id.to_string(),
                workflow: "test".to_string(),
                client_id: 1,
                site: "fake".to_string(),
            })
            .await
            .unwrap();
        store
    }

    fn artifacts(dir: &TempDir) -> ArtifactsSection {
        ArtifactsSection {
            screenshot_dir: dir.path().join("shots").to_string_lossy().to_string(),
            trace_dir: dir.path().join("traces").to_string_lossy().to_string(),
            download_dir: dir.path().join("downloads").to_string_lossy().to_string(),
            failure_log: dir.path().join("failures.jsonl").to_string_lossy().to_string(),
        }
    }

    async fn fixture(
        dir: &TempDir,
    ) -> (FakeSessionFactory, BrowserController, Arc<MemoryRunStore>, ErrorHandler) {
        let factory = FakeSessionFactory::default();
        let browser =
            BrowserController::new(Arc::new(factory.clone()), TimeoutSection::default());
        browser.launch().await.unwrap();
        let store = store_with_run("run-1").await;
        let handler = ErrorHandler::new(
            "run-1",
            store.clone(),
            &artifacts(dir),
            RetryOptions::new(3, Duration::from_millis(100), 2.0),
        )
        .unwrap();
        (factory, browser, store, handler)
    }

    #[test]
    fn classification_predicates() {
        assert!(is_captcha_error("ReCAPTCHA verification required"));
        assert!(is_auth_error("401 Unauthorized"));
        assert!(!is_captcha_error("connection reset"));
        assert!(!is_auth_error("connection reset"));
    }

    #[test]
    fn classification_precedence() {
        assert_eq!(
            ErrorKind::classify("hCaptcha challenge after login"),
            ErrorKind::Captcha
        );
        assert_eq!(
            ErrorKind::classify("selector not found: input#login"),
            ErrorKind::SelectorMiss
        );
        assert_eq!(
            ErrorKind::classify("timeout waiting for form#login after 100ms"),
            ErrorKind::Timeout
        );
        assert_eq!(
            ErrorKind::classify("missing credentials for cole"),
            ErrorKind::Auth
        );
        assert_eq!(ErrorKind::classify("upload failed: 413"), ErrorKind::Upload);
        assert_eq!(
            ErrorKind::classify("invalid state: browser session already open"),
            ErrorKind::Validation
        );
        assert_eq!(ErrorKind::classify("connection reset"), ErrorKind::Network);
        assert_eq!(
            ErrorKind::classify(
                "navigation to https://emailbison.com/login failed: net::ERR_CONNECTION_RESET"
            ),
            ErrorKind::Network
        );
        assert_eq!(
            ErrorKind::classify("upload failed: socket hang up"),
            ErrorKind::Network
        );
        assert!(ErrorKind::Timeout.is_retryable());
        assert!(!ErrorKind::SelectorMiss.is_retryable());
        assert_eq!("SELECTOR_MISS".parse::<ErrorKind>().unwrap(), ErrorKind::SelectorMiss);
    }

    #[tokio::test(start_paused = true)]
    async fn selector_miss_is_captured_once_without_retry() {
        let dir = tempfile::tempdir().unwrap();
        let (factory, browser, store, handler) = fixture(&dir).await;
        factory.mark_missing("#search");

        let failure = handler
            .run_step(&browser, "query.search", Some("#search"), || {
                browser.click("#search")
            })
            .await
            .unwrap_err();

        assert_eq!(failure.kind, ErrorKind::SelectorMiss);
        assert_eq!(failure.attempts, 1);
        assert!(failure.artifacts.screenshot.as_ref().unwrap().exists());
        assert!(failure.artifacts.trace.as_ref().unwrap().exists());

        let errors = store.errors();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].step, "query.search");
        assert_eq!(errors[0].locator.as_deref(), Some("#search"));

        let log = std::fs::read_to_string(dir.path().join("failures.jsonl")).unwrap();
        assert!(log.contains("\"kind\":\"SELECTOR_MISS\""));
    }

    #[tokio::test(start_paused = true)]
    async fn network_failures_are_retried_transparently() {
        let dir = tempfile::tempdir().unwrap();
        let (factory, browser, store, handler) = fixture(&dir).await;
        factory.fail_next("#go", ScriptedFailure::Message("net::ERR_CONNECTION_RESET".into()));
        factory.fail_next("#go", ScriptedFailure::Timeout("#go".into()));

        handler
            .run_step(&browser, "query.go", Some("#go"), || browser.click("#go"))
            .await
            .unwrap();
        assert!(store.errors().is_empty());
        assert_eq!(browser.metrics().retries, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn login_page_navigation_blip_is_retried() {
        let dir = tempfile::tempdir().unwrap();
        let (_factory, browser, store, handler) = fixture(&dir).await;
        let mut calls = 0u32;

        let value = handler
            .run_step(&browser, "bison.connect.navigate", None, || {
                calls += 1;
                let attempt = calls;
                async move {
                    if attempt == 1 {
                        Err(BrowserError::Navigation {
                            url: "https://emailbison.com/login".to_string(),
                            reason: "net::ERR_CONNECTION_RESET".to_string(),
                        })
                    } else {
                        Ok(attempt)
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(value, 2);
        assert!(store.errors().is_empty());
        assert_eq!(browser.metrics().retries, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn captcha_aborts_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let (factory, browser, store, handler) = fixture(&dir).await;
        factory.fail_next(
            "#submit",
            ScriptedFailure::Message("recaptcha verification required".into()),
        );

        let failure = handler
            .run_step(&browser, "login.submit", Some("#submit"), || {
                browser.click("#submit")
            })
            .await
            .unwrap_err();
        assert_eq!(failure.kind, ErrorKind::Captcha);
        assert_eq!(failure.attempts, 1);
        assert_eq!(store.errors().len(), 1);
    }

    #[tokio::test]
    async fn capture_without_session_still_persists() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_with_run("run-2").await;
        let handler =
            ErrorHandler::new("run-2", store.clone(), &artifacts(&dir), RetryOptions::default())
                .unwrap();
        let failure = handler
            .capture(
                None,
                ErrorContext::from_message("cole.connect", BrowserError::NoSession.to_string()),
            )
            .await;
        assert_eq!(failure.kind, ErrorKind::Validation);
        assert_eq!(failure.artifacts, ArtifactPaths::default());
        assert_eq!(store.errors().len(), 1);
    }
}
