//! Scripted in-memory browser used by the test suites.
//!
//! Every locator is present unless marked missing or scheduled to appear
//! late. Failures are queued per locator (or per URL for navigation) and
//! consumed one call at a time.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::browser::{BrowserError, BrowserResult, BrowserSession, Locator, SessionFactory};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptedFailure {
    Timeout(String),
    NotFound,
    Message(String),
}

impl ScriptedFailure {
    fn into_error(self, key: &str) -> BrowserError {
        match self {
            ScriptedFailure::Timeout(what) => BrowserError::Timeout(what),
            ScriptedFailure::NotFound => BrowserError::SelectorNotFound(key.to_string()),
            ScriptedFailure::Message(message) => BrowserError::Unexpected(message),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FakeAction {
    Navigate(String),
    Click(String),
    Fill(String, String),
    Select(String, String),
    Check(String),
    Upload(String, PathBuf),
    Download(String, PathBuf),
    Close,
}

#[derive(Debug, Clone, Default)]
pub struct FakeState {
    pub missing: HashSet<String>,
    pub hidden_polls: HashMap<String, u32>,
    pub texts: HashMap<String, String>,
    pub attributes: HashMap<(String, String), String>,
    pub failures: HashMap<String, VecDeque<ScriptedFailure>>,
    pub launch_failures: VecDeque<ScriptedFailure>,
    pub downloads: VecDeque<String>,
    pub url: Option<String>,
    pub html: String,
    pub actions: Vec<FakeAction>,
    pub sessions_opened: usize,
    pub sessions_closed: usize,
}

impl FakeState {
    fn take_failure(&mut self, key: &str) -> BrowserResult<()> {
        match self.failures.get_mut(key).and_then(VecDeque::pop_front) {
            Some(failure) => Err(failure.into_error(key)),
            None => Ok(()),
        }
    }

    fn require(&mut self, locator: &Locator) -> BrowserResult<String> {
        let key = locator.to_string();
        self.take_failure(&key)?;
        if self.missing.contains(&key) {
            return Err(BrowserError::SelectorNotFound(key));
        }
        Ok(key)
    }
}

/// Hands out [`FakeSession`]s that share one scripted page state.
#[derive(Debug, Clone, Default)]
pub struct FakeSessionFactory {
    state: Arc<Mutex<FakeState>>,
}

impl FakeSessionFactory {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Snapshot of the scripted state and the recorded actions.
    pub fn state(&self) -> FakeState {
        self.lock().clone()
    }

    pub fn with_state<R>(&self, f: impl FnOnce(&mut FakeState) -> R) -> R {
        f(&mut self.lock())
    }

    pub fn mark_missing(&self, locator: &str) {
        self.lock().missing.insert(locator.to_string());
    }

    /// The locator reports absent for the next `polls` presence checks.
    pub fn appear_after(&self, locator: &str, polls: u32) {
        self.lock().hidden_polls.insert(locator.to_string(), polls);
    }

    pub fn set_text(&self, locator: &str, text: &str) {
        self.lock()
            .texts
            .insert(locator.to_string(), text.to_string());
    }

    pub fn fail_next(&self, key: &str, failure: ScriptedFailure) {
        self.lock()
            .failures
            .entry(key.to_string())
            .or_default()
            .push_back(failure);
    }

    pub fn fail_launch(&self, failure: ScriptedFailure) {
        self.lock().launch_failures.push_back(failure);
    }

    /// Queues the CSV body written by the next download.
    pub fn queue_download(&self, contents: &str) {
        self.lock().downloads.push_back(contents.to_string());
    }

    pub fn actions(&self) -> Vec<FakeAction> {
        self.lock().actions.clone()
    }

    pub fn clicks(&self, locator: &str) -> usize {
        self.lock()
            .actions
            .iter()
            .filter(|action| matches!(action, FakeAction::Click(l) if l == locator))
            .count()
    }

    pub fn fills(&self, locator: &str) -> Vec<String> {
        self.lock()
            .actions
            .iter()
            .filter_map(|action| match action {
                FakeAction::Fill(l, value) if l == locator => Some(value.clone()),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl SessionFactory for FakeSessionFactory {
    async fn open(&self) -> BrowserResult<Box<dyn BrowserSession>> {
        let mut state = self.lock();
        if let Some(failure) = state.launch_failures.pop_front() {
            return Err(failure.into_error("launch"));
        }
        state.sessions_opened += 1;
        Ok(Box::new(FakeSession {
            state: Arc::clone(&self.state),
            closed: false,
            downloads: 0,
        }))
    }
}

#[derive(Debug)]
pub struct FakeSession {
    state: Arc<Mutex<FakeState>>,
    closed: bool,
    downloads: usize,
}

impl FakeSession {
    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl BrowserSession for FakeSession {
    async fn navigate(&mut self, url: &str) -> BrowserResult<()> {
        let mut state = self.lock();
        state.take_failure(url)?;
        state.url = Some(url.to_string());
        state.actions.push(FakeAction::Navigate(url.to_string()));
        Ok(())
    }

    async fn click(&mut self, locator: &Locator) -> BrowserResult<()> {
        let mut state = self.lock();
        let key = state.require(locator)?;
        state.actions.push(FakeAction::Click(key));
        Ok(())
    }

    async fn fill(&mut self, locator: &Locator, value: &str) -> BrowserResult<()> {
        let mut state = self.lock();
        let key = state.require(locator)?;
        state.actions.push(FakeAction::Fill(key, value.to_string()));
        Ok(())
    }

    async fn select_option(&mut self, locator: &Locator, value: &str) -> BrowserResult<()> {
        let mut state = self.lock();
        let key = state.require(locator)?;
        state.actions.push(FakeAction::Select(key, value.to_string()));
        Ok(())
    }

    async fn check(&mut self, locator: &Locator) -> BrowserResult<()> {
        let mut state = self.lock();
        let key = state.require(locator)?;
        state.actions.push(FakeAction::Check(key));
        Ok(())
    }

    async fn is_present(&mut self, locator: &Locator) -> BrowserResult<bool> {
        let mut state = self.lock();
        let key = locator.to_string();
        state.take_failure(&key)?;
        if let Some(remaining) = state.hidden_polls.get_mut(&key) {
            if *remaining > 0 {
                *remaining -= 1;
                return Ok(false);
            }
        }
        Ok(!state.missing.contains(&key))
    }

    async fn text_content(&mut self, locator: &Locator) -> BrowserResult<Option<String>> {
        let mut state = self.lock();
        let key = locator.to_string();
        state.take_failure(&key)?;
        if state.missing.contains(&key) {
            return Ok(None);
        }
        Ok(Some(state.texts.get(&key).cloned().unwrap_or_default()))
    }

    async fn attribute(&mut self, locator: &Locator, name: &str) -> BrowserResult<Option<String>> {
        let mut state = self.lock();
        let key = locator.to_string();
        state.take_failure(&key)?;
        Ok(state.attributes.get(&(key, name.to_string())).cloned())
    }

    async fn upload_file(&mut self, locator: &Locator, file: &Path) -> BrowserResult<()> {
        let mut state = self.lock();
        let key = state.require(locator)?;
        state
            .actions
            .push(FakeAction::Upload(key, file.to_path_buf()));
        Ok(())
    }

    async fn download(
        &mut self,
        trigger: &Locator,
        dir: &Path,
        _timeout: Duration,
    ) -> BrowserResult<PathBuf> {
        let contents = {
            let mut state = self.lock();
            let key = state.require(trigger)?;
            let contents = state.downloads.pop_front().ok_or_else(|| {
                BrowserError::Timeout(format!("download via {key}: nothing queued"))
            })?;
            state.actions.push(FakeAction::Click(key));
            contents
        };
        self.downloads += 1;
        let path = dir.join(format!("export-{}.csv", self.downloads));
        tokio::fs::write(&path, contents).await?;
        self.lock()
            .actions
            .push(FakeAction::Download(trigger.to_string(), path.clone()));
        Ok(path)
    }

    async fn current_url(&mut self) -> BrowserResult<Option<String>> {
        Ok(self.lock().url.clone())
    }

    async fn content(&mut self) -> BrowserResult<String> {
        let state = self.lock();
        if state.html.is_empty() {
            Ok("<html><body></body></html>".to_string())
        } else {
            Ok(state.html.clone())
        }
    }

    async fn evaluate(&mut self, _script: &str) -> BrowserResult<Value> {
        Ok(Value::Null)
    }

    async fn screenshot(&mut self) -> BrowserResult<Vec<u8>> {
        Ok(b"\x89PNG\r\n\x1a\nfake".to_vec())
    }

    async fn close(&mut self) -> BrowserResult<()> {
        if !self.closed {
            self.closed = true;
            let mut state = self.lock();
            state.sessions_closed += 1;
            state.actions.push(FakeAction::Close);
        }
        Ok(())
    }
}
