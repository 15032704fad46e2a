use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, error, info, warn};

use crate::config::TimeoutSection;

use super::error::{BrowserError, BrowserResult};
use super::locator::Locator;
use super::metrics::BrowserMetrics;
use super::session::{BrowserSession, SessionFactory};

const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(250);

type SessionSlot = Option<Box<dyn BrowserSession>>;

/// Owns at most one browser session and bounds every interaction with the
/// configured timeouts. All methods take `&self`, so a controller can be
/// shared by reference across retried closures.
pub struct BrowserController {
    factory: Arc<dyn SessionFactory>,
    session: AsyncMutex<SessionSlot>,
    timeouts: TimeoutSection,
    metrics: Mutex<BrowserMetrics>,
}

impl fmt::Debug for BrowserController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrowserController")
            .field("timeouts", &self.timeouts)
            .field("metrics", &self.metrics())
            .finish_non_exhaustive()
    }
}

impl BrowserController {
    pub fn new(factory: Arc<dyn SessionFactory>, timeouts: TimeoutSection) -> Self {
        Self {
            factory,
            session: AsyncMutex::new(None),
            timeouts,
            metrics: Mutex::new(BrowserMetrics::default()),
        }
    }

    pub fn timeouts(&self) -> &TimeoutSection {
        &self.timeouts
    }

    pub fn metrics(&self) -> BrowserMetrics {
        self.metrics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn record_retry(&self) {
        self.with_metrics(BrowserMetrics::record_retry);
    }

    pub async fn is_active(&self) -> bool {
        self.session.lock().await.is_some()
    }

    /// Opens the single browser session. A second launch while one is open
    /// is rejected instead of leaking a process.
    pub async fn launch(&self) -> BrowserResult<()> {
        let mut guard = self.session.lock().await;
        if guard.is_some() {
            error!("browser launch rejected: a session is already open");
            self.with_metrics(BrowserMetrics::record_rejected_launch);
            return Err(BrowserError::SessionAlreadyOpen);
        }
        let opened = bounded(
            self.timeouts.navigation(),
            "browser launch".to_string(),
            self.factory.open(),
        )
        .await;
        match opened {
            Ok(session) => {
                *guard = Some(session);
                self.with_metrics(BrowserMetrics::record_session_open);
                info!("browser session opened");
                Ok(())
            }
            Err(err) => {
                self.with_metrics(BrowserMetrics::record_failure);
                Err(err)
            }
        }
    }

    /// Releases the session. Calling it with nothing open is a no-op.
    pub async fn close(&self) -> BrowserResult<()> {
        let taken = self.session.lock().await.take();
        let Some(mut session) = taken else {
            debug!("close requested with no active browser session");
            return Ok(());
        };
        self.with_metrics(BrowserMetrics::record_session_close);
        let result = bounded(
            self.timeouts.navigation(),
            "browser shutdown".to_string(),
            session.close(),
        )
        .await;
        match &result {
            Ok(()) => info!("browser session closed"),
            Err(err) => warn!(error = %err, "browser session did not close cleanly"),
        }
        result
    }

    pub async fn navigate(&self, url: &str) -> BrowserResult<()> {
        let mut guard = self.session.lock().await;
        let session = active(&mut guard)?;
        debug!(url, "navigating");
        let result = bounded(
            self.timeouts.navigation(),
            format!("navigation to {url}"),
            session.navigate(url),
        )
        .await;
        self.observe(&result, BrowserMetrics::record_navigation);
        result
    }

    pub async fn click(&self, locator: &str) -> BrowserResult<()> {
        let locator = Locator::parse(locator)?;
        self.ensure_actionable(&locator).await?;
        let mut guard = self.session.lock().await;
        let session = active(&mut guard)?;
        let result = bounded(
            self.timeouts.action(),
            format!("click on {locator}"),
            session.click(&locator),
        )
        .await;
        self.observe(&result, BrowserMetrics::record_action);
        result
    }

    pub async fn fill(&self, locator: &str, value: &str) -> BrowserResult<()> {
        let locator = Locator::parse(locator)?;
        self.ensure_actionable(&locator).await?;
        let mut guard = self.session.lock().await;
        let session = active(&mut guard)?;
        let result = bounded(
            self.timeouts.action(),
            format!("fill of {locator}"),
            session.fill(&locator, value),
        )
        .await;
        self.observe(&result, BrowserMetrics::record_action);
        result
    }

    pub async fn select_option(&self, locator: &str, value: &str) -> BrowserResult<()> {
        let locator = Locator::parse(locator)?;
        self.ensure_actionable(&locator).await?;
        let mut guard = self.session.lock().await;
        let session = active(&mut guard)?;
        let result = bounded(
            self.timeouts.action(),
            format!("select on {locator}"),
            session.select_option(&locator, value),
        )
        .await;
        self.observe(&result, BrowserMetrics::record_action);
        result
    }

    pub async fn check(&self, locator: &str) -> BrowserResult<()> {
        let locator = Locator::parse(locator)?;
        self.ensure_actionable(&locator).await?;
        let mut guard = self.session.lock().await;
        let session = active(&mut guard)?;
        let result = bounded(
            self.timeouts.action(),
            format!("check of {locator}"),
            session.check(&locator),
        )
        .await;
        self.observe(&result, BrowserMetrics::record_action);
        result
    }

    pub async fn is_present(&self, locator: &str) -> BrowserResult<bool> {
        let locator = Locator::parse(locator)?;
        self.lookup(&locator).await
    }

    /// Polls until `locator` is present or `limit` elapses.
    pub async fn wait_for(&self, locator: &str, limit: Duration) -> BrowserResult<()> {
        let parsed = Locator::parse(locator)?;
        if self.poll_until_present(&parsed, limit).await? {
            self.with_metrics(BrowserMetrics::record_wait);
            return Ok(());
        }
        self.with_metrics(BrowserMetrics::record_failure);
        Err(BrowserError::Timeout(format!(
            "{parsed} after {}ms",
            limit.as_millis()
        )))
    }

    /// Waits with the default selector timeout.
    pub async fn wait_for_default(&self, locator: &str) -> BrowserResult<()> {
        self.wait_for(locator, self.timeouts.selector_wait()).await
    }

    pub async fn text_content(&self, locator: &str) -> BrowserResult<Option<String>> {
        let locator = Locator::parse(locator)?;
        let mut guard = self.session.lock().await;
        let session = active(&mut guard)?;
        bounded(
            self.timeouts.action(),
            format!("text of {locator}"),
            session.text_content(&locator),
        )
        .await
    }

    pub async fn attribute(&self, locator: &str, name: &str) -> BrowserResult<Option<String>> {
        let locator = Locator::parse(locator)?;
        let mut guard = self.session.lock().await;
        let session = active(&mut guard)?;
        bounded(
            self.timeouts.action(),
            format!("attribute {name} of {locator}"),
            session.attribute(&locator, name),
        )
        .await
    }

    pub async fn upload_file(&self, locator: &str, file: &Path) -> BrowserResult<()> {
        if !file.is_file() {
            return Err(BrowserError::Upload(format!(
                "{} is not a readable file",
                file.display()
            )));
        }
        let locator = Locator::parse(locator)?;
        self.ensure_actionable(&locator).await?;
        let mut guard = self.session.lock().await;
        let session = active(&mut guard)?;
        let result = bounded(
            self.timeouts.action(),
            format!("upload into {locator}"),
            session.upload_file(&locator, file),
        )
        .await;
        self.observe(&result, BrowserMetrics::record_upload);
        result
    }

    /// Clicks `trigger` and waits for the resulting file in `dir`.
    pub async fn download(&self, trigger: &str, dir: &Path) -> BrowserResult<PathBuf> {
        let locator = Locator::parse(trigger)?;
        tokio::fs::create_dir_all(dir).await?;
        self.ensure_actionable(&locator).await?;
        let limit = self.timeouts.download();
        let mut guard = self.session.lock().await;
        let session = active(&mut guard)?;
        let result = bounded(
            limit,
            format!("download via {locator}"),
            session.download(&locator, dir, limit),
        )
        .await;
        self.observe(&result, BrowserMetrics::record_download);
        if let Ok(path) = &result {
            info!(path = %path.display(), "download completed");
        }
        result
    }

    pub async fn current_url(&self) -> BrowserResult<Option<String>> {
        let mut guard = self.session.lock().await;
        let session = active(&mut guard)?;
        session.current_url().await
    }

    pub async fn evaluate(&self, script: &str) -> BrowserResult<Value> {
        let mut guard = self.session.lock().await;
        let session = active(&mut guard)?;
        bounded(
            self.timeouts.action(),
            "script evaluation".to_string(),
            session.evaluate(script),
        )
        .await
    }

    /// Gives the page time to settle after an interaction.
    pub async fn pause(&self, duration: Duration) {
        sleep(duration).await;
    }

    /// Best-effort full page screenshot. Never fails; returns the written
    /// path when the capture succeeded.
    pub async fn screenshot(&self, path: &Path) -> Option<PathBuf> {
        let bytes = {
            let mut guard = self.session.lock().await;
            let Some(session) = guard.as_deref_mut() else {
                debug!("screenshot skipped: no active browser session");
                return None;
            };
            match bounded(
                self.timeouts.action(),
                "screenshot".to_string(),
                session.screenshot(),
            )
            .await
            {
                Ok(bytes) => bytes,
                Err(err) => {
                    warn!(error = %err, "screenshot capture failed");
                    return None;
                }
            }
        };
        match write_artifact(path, &bytes).await {
            Ok(()) => {
                self.with_metrics(BrowserMetrics::record_screenshot);
                Some(path.to_path_buf())
            }
            Err(err) => {
                warn!(error = %err, path = %path.display(), "screenshot could not be written");
                None
            }
        }
    }

    /// Best-effort HTML snapshot of the current page.
    pub async fn snapshot_html(&self, path: &Path) -> Option<PathBuf> {
        let html = {
            let mut guard = self.session.lock().await;
            let session = guard.as_deref_mut()?;
            match bounded(
                self.timeouts.action(),
                "page snapshot".to_string(),
                session.content(),
            )
            .await
            {
                Ok(html) => html,
                Err(err) => {
                    warn!(error = %err, "page snapshot failed");
                    return None;
                }
            }
        };
        match write_artifact(path, html.as_bytes()).await {
            Ok(()) => Some(path.to_path_buf()),
            Err(err) => {
                warn!(error = %err, path = %path.display(), "page snapshot could not be written");
                None
            }
        }
    }

    /// Interactions wait up to the action timeout for their target to
    /// render. A locator still absent after that is a selector miss.
    async fn ensure_actionable(&self, locator: &Locator) -> BrowserResult<()> {
        let limit = self.timeouts.action();
        match self.poll_until_present(locator, limit).await {
            Ok(true) => Ok(()),
            Ok(false) => {
                self.with_metrics(BrowserMetrics::record_failure);
                Err(BrowserError::SelectorNotFound(format!(
                    "{locator} after {}ms",
                    limit.as_millis()
                )))
            }
            Err(err) => {
                self.with_metrics(BrowserMetrics::record_failure);
                Err(err)
            }
        }
    }

    async fn poll_until_present(&self, locator: &Locator, limit: Duration) -> BrowserResult<bool> {
        let deadline = Instant::now() + limit;
        loop {
            if self.lookup(locator).await? {
                return Ok(true);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(false);
            }
            sleep(WAIT_POLL_INTERVAL.min(deadline - now)).await;
        }
    }

    async fn lookup(&self, locator: &Locator) -> BrowserResult<bool> {
        let mut guard = self.session.lock().await;
        let session = active(&mut guard)?;
        bounded(
            self.timeouts.action(),
            format!("lookup of {locator}"),
            session.is_present(locator),
        )
        .await
    }

    fn observe<T>(&self, result: &BrowserResult<T>, record: fn(&mut BrowserMetrics)) {
        match result {
            Ok(_) => self.with_metrics(record),
            Err(_) => self.with_metrics(BrowserMetrics::record_failure),
        }
    }

    fn with_metrics(&self, record: fn(&mut BrowserMetrics)) {
        let mut guard = self.metrics.lock().unwrap_or_else(PoisonError::into_inner);
        record(&mut guard);
    }
}

fn active(slot: &mut SessionSlot) -> BrowserResult<&mut (dyn BrowserSession + 'static)> {
    slot.as_deref_mut().ok_or(BrowserError::NoSession)
}

async fn bounded<T, F>(limit: Duration, what: String, future: F) -> BrowserResult<T>
where
    F: Future<Output = BrowserResult<T>>,
{
    match timeout(limit, future).await {
        Ok(result) => result,
        Err(_) => Err(BrowserError::Timeout(format!(
            "{what} after {}ms",
            limit.as_millis()
        ))),
    }
}

async fn write_artifact(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, bytes).await
}
