use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use super::error::BrowserResult;
use super::locator::Locator;

/// One live page in one browser process.
///
/// Implementations report a missing element as
/// [`BrowserError::SelectorNotFound`](super::BrowserError::SelectorNotFound)
/// and leave time bounds to the controller.
#[async_trait]
pub trait BrowserSession: Send {
    async fn navigate(&mut self, url: &str) -> BrowserResult<()>;
    async fn click(&mut self, locator: &Locator) -> BrowserResult<()>;
    async fn fill(&mut self, locator: &Locator, value: &str) -> BrowserResult<()>;
    async fn select_option(&mut self, locator: &Locator, value: &str) -> BrowserResult<()>;
    /// Checks a checkbox or radio; already checked inputs are left alone.
    async fn check(&mut self, locator: &Locator) -> BrowserResult<()>;
    async fn is_present(&mut self, locator: &Locator) -> BrowserResult<bool>;
    async fn text_content(&mut self, locator: &Locator) -> BrowserResult<Option<String>>;
    async fn attribute(&mut self, locator: &Locator, name: &str) -> BrowserResult<Option<String>>;
    async fn upload_file(&mut self, locator: &Locator, file: &Path) -> BrowserResult<()>;
    /// Clicks `trigger` and returns the file that lands in `dir`.
    async fn download(
        &mut self,
        trigger: &Locator,
        dir: &Path,
        timeout: Duration,
    ) -> BrowserResult<PathBuf>;
    async fn current_url(&mut self) -> BrowserResult<Option<String>>;
    async fn content(&mut self) -> BrowserResult<String>;
    async fn evaluate(&mut self, script: &str) -> BrowserResult<Value>;
    async fn screenshot(&mut self) -> BrowserResult<Vec<u8>>;
    async fn close(&mut self) -> BrowserResult<()>;
}

#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn open(&self) -> BrowserResult<Box<dyn BrowserSession>>;
}
