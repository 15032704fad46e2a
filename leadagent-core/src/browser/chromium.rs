use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig as ChromiumConfig};
use chromiumoxide::cdp::browser_protocol::browser::{
    SetDownloadBehaviorBehavior, SetDownloadBehaviorParams,
};
use chromiumoxide::cdp::browser_protocol::dom::SetFileInputFilesParams;
use chromiumoxide::cdp::browser_protocol::page::NavigateParams;
use chromiumoxide::page::{Page, ScreenshotParams};
use futures::StreamExt;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::config::BrowserSection;

use super::error::{BrowserError, BrowserResult};
use super::locator::{js_string, Locator};
use super::session::{BrowserSession, SessionFactory};

const DOWNLOAD_POLL_INTERVAL: Duration = Duration::from_millis(500);
const PARTIAL_DOWNLOAD_SUFFIX: &str = ".crdownload";

/// Launches headless Chromium over the DevTools protocol.
#[derive(Debug, Clone)]
pub struct ChromiumSessionFactory {
    config: Arc<BrowserSection>,
    download_dir: PathBuf,
}

impl ChromiumSessionFactory {
    pub fn new(config: BrowserSection, download_dir: impl Into<PathBuf>) -> Self {
        Self {
            config: Arc::new(config),
            download_dir: download_dir.into(),
        }
    }

    fn build_chromium_config(&self) -> BrowserResult<ChromiumConfig> {
        let [width, height] = self.config.window_size;
        let mut builder = ChromiumConfig::builder()
            .window_size(width, height)
            .request_timeout(self.config.timeouts.navigation());
        if let Some(executable) = &self.config.executable_path {
            builder = builder.chrome_executable(executable);
        }
        if !self.config.headless {
            builder = builder.with_head();
        }
        if !self.config.sandbox {
            builder = builder.no_sandbox();
        }

        let mut args = vec![format!("--window-size={width},{height}")];
        if self.config.disable_gpu {
            args.push("--disable-gpu".into());
        }
        if let Some(user_agent) = &self.config.user_agent {
            args.push(format!("--user-agent={user_agent}"));
        }
        if let Some(lang) = &self.config.lang {
            args.push(format!("--lang={lang}"));
        }
        args.push("--no-first-run".into());
        args.push("--password-store=basic".into());
        builder = builder.args(args);

        builder.build().map_err(BrowserError::Configuration)
    }
}

#[async_trait]
impl SessionFactory for ChromiumSessionFactory {
    async fn open(&self) -> BrowserResult<Box<dyn BrowserSession>> {
        let chromium_config = self.build_chromium_config()?;
        info!(
            headless = self.config.headless,
            download_dir = %self.download_dir.display(),
            "launching Chromium instance"
        );
        let (browser, mut handler) = Browser::launch(chromium_config)
            .await
            .map_err(|err| BrowserError::Launch(err.to_string()))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(err) = event {
                    debug!(error = %err, "Chromium handler reported error");
                }
            }
        });

        tokio::fs::create_dir_all(&self.download_dir).await?;
        let behavior = SetDownloadBehaviorParams::builder()
            .behavior(SetDownloadBehaviorBehavior::Allow)
            .download_path(self.download_dir.to_string_lossy().to_string())
            .build()
            .map_err(BrowserError::Configuration)?;
        browser.execute(behavior).await?;

        let page = browser.new_page("about:blank").await?;
        Ok(Box::new(ChromiumSession {
            browser,
            page,
            handler_task: Some(handler_task),
        }))
    }
}

pub struct ChromiumSession {
    browser: Browser,
    page: Page,
    handler_task: Option<JoinHandle<()>>,
}

impl ChromiumSession {
    /// Runs `body` against the located element; `el` is bound inside it.
    async fn element_action(&self, locator: &Locator, body: &str) -> BrowserResult<()> {
        let script = format!(
            "(() => {{ const el = {}; if (!el) return false; {body} return true; }})()",
            locator.js_query()
        );
        match self.eval_value(&script).await? {
            Value::Bool(true) => Ok(()),
            _ => Err(BrowserError::SelectorNotFound(locator.to_string())),
        }
    }

    async fn element_read(&self, locator: &Locator, expr: &str) -> BrowserResult<Option<String>> {
        let script = format!(
            "(() => {{ const el = {}; if (!el) return null; return {expr}; }})()",
            locator.js_query()
        );
        match self.eval_value(&script).await? {
            Value::String(value) => Ok(Some(value)),
            Value::Null => Ok(None),
            other => Ok(Some(other.to_string())),
        }
    }

    async fn eval_value(&self, script: &str) -> BrowserResult<Value> {
        let result = self
            .page
            .evaluate(script)
            .await
            .map_err(|err| BrowserError::Script(err.to_string()))?;
        Ok(result.value().cloned().unwrap_or(Value::Null))
    }
}

#[async_trait]
impl BrowserSession for ChromiumSession {
    async fn navigate(&mut self, url: &str) -> BrowserResult<()> {
        let params = NavigateParams::builder()
            .url(url)
            .build()
            .map_err(BrowserError::Configuration)?;
        self.page
            .goto(params)
            .await
            .map_err(|err| BrowserError::Navigation {
                url: url.to_string(),
                reason: err.to_string(),
            })?;
        self.page.wait_for_navigation().await?;
        Ok(())
    }

    async fn click(&mut self, locator: &Locator) -> BrowserResult<()> {
        match locator.css() {
            Some(selector) => {
                let element = self
                    .page
                    .find_element(selector)
                    .await
                    .map_err(|_| BrowserError::SelectorNotFound(locator.to_string()))?;
                element.click().await?;
                Ok(())
            }
            None => self.element_action(locator, "el.click();").await,
        }
    }

    async fn fill(&mut self, locator: &Locator, value: &str) -> BrowserResult<()> {
        let value = js_string(value);
        let body = format!(
            "el.focus(); \
             const desc = Object.getOwnPropertyDescriptor(Object.getPrototypeOf(el), 'value'); \
             if (desc && desc.set) {{ desc.set.call(el, {value}); }} else {{ el.value = {value}; }} \
             el.dispatchEvent(new Event('input', {{ bubbles: true }})); \
             el.dispatchEvent(new Event('change', {{ bubbles: true }}));"
        );
        self.element_action(locator, &body).await
    }

    async fn select_option(&mut self, locator: &Locator, value: &str) -> BrowserResult<()> {
        let value = js_string(value);
        let body = format!(
            "const opt = Array.from(el.options || []).find((o) => o.value === {value} || o.textContent.trim() === {value}); \
             if (!opt) return false; \
             el.value = opt.value; \
             el.dispatchEvent(new Event('change', {{ bubbles: true }}));"
        );
        self.element_action(locator, &body)
            .await
            .map_err(|_| BrowserError::SelectorNotFound(format!("{locator} option {value}")))
    }

    async fn check(&mut self, locator: &Locator) -> BrowserResult<()> {
        self.element_action(locator, "if (!el.checked) { el.click(); }")
            .await
    }

    async fn is_present(&mut self, locator: &Locator) -> BrowserResult<bool> {
        let script = format!("!!({})", locator.js_query());
        Ok(matches!(self.eval_value(&script).await?, Value::Bool(true)))
    }

    async fn text_content(&mut self, locator: &Locator) -> BrowserResult<Option<String>> {
        self.element_read(locator, "el.textContent").await
    }

    async fn attribute(&mut self, locator: &Locator, name: &str) -> BrowserResult<Option<String>> {
        let expr = format!("el.getAttribute({})", js_string(name));
        self.element_read(locator, &expr).await
    }

    async fn upload_file(&mut self, locator: &Locator, file: &Path) -> BrowserResult<()> {
        let selector = locator.css().ok_or_else(|| {
            BrowserError::Upload(format!("file inputs need a css locator, got {locator}"))
        })?;
        let element = self
            .page
            .find_element(selector)
            .await
            .map_err(|_| BrowserError::SelectorNotFound(locator.to_string()))?;
        let params = SetFileInputFilesParams::builder()
            .files(vec![file.to_string_lossy().to_string()])
            .backend_node_id(element.backend_node_id)
            .build()
            .map_err(BrowserError::Upload)?;
        self.page
            .execute(params)
            .await
            .map_err(|err| BrowserError::Upload(err.to_string()))?;
        Ok(())
    }

    async fn download(
        &mut self,
        trigger: &Locator,
        dir: &Path,
        timeout: Duration,
    ) -> BrowserResult<PathBuf> {
        let before = list_files(dir).await?;
        self.click(trigger).await?;
        let deadline = Instant::now() + timeout;
        loop {
            let landed = list_files(dir)
                .await?
                .into_iter()
                .find(|path| !before.contains(path) && !is_partial(path));
            if let Some(path) = landed {
                return Ok(path);
            }
            if Instant::now() >= deadline {
                return Err(BrowserError::Timeout(format!(
                    "download into {} after {}ms",
                    dir.display(),
                    timeout.as_millis()
                )));
            }
            sleep(DOWNLOAD_POLL_INTERVAL).await;
        }
    }

    async fn current_url(&mut self) -> BrowserResult<Option<String>> {
        Ok(self.page.url().await?)
    }

    async fn content(&mut self) -> BrowserResult<String> {
        Ok(self.page.content().await?)
    }

    async fn evaluate(&mut self, script: &str) -> BrowserResult<Value> {
        self.eval_value(script).await
    }

    async fn screenshot(&mut self) -> BrowserResult<Vec<u8>> {
        Ok(self
            .page
            .screenshot(ScreenshotParams::builder().build())
            .await?)
    }

    async fn close(&mut self) -> BrowserResult<()> {
        info!("shutting down Chromium instance");
        if let Err(err) = self.browser.close().await {
            warn!(error = %err, "failed to close browser gracefully");
        }
        if let Some(handle) = self.handler_task.take() {
            if let Err(err) = handle.await {
                warn!(error = %err, "browser handler join error");
            }
        }
        Ok(())
    }
}

impl Drop for ChromiumSession {
    fn drop(&mut self) {
        if let Some(handle) = &self.handler_task {
            if !handle.is_finished() {
                warn!("Chromium session dropped without explicit close");
            }
        }
    }
}

async fn list_files(dir: &Path) -> BrowserResult<HashSet<PathBuf>> {
    let mut files = HashSet::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_file() {
            files.insert(entry.path());
        }
    }
    Ok(files)
}

fn is_partial(path: &Path) -> bool {
    path.to_string_lossy().ends_with(PARTIAL_DOWNLOAD_SUFFIX)
}
