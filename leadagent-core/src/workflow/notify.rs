use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tracing::info;
use url::Url;

use crate::config::NotificationsSection;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("invalid webhook url {url}: {source}")]
    InvalidUrl {
        url: String,
        source: url::ParseError,
    },
    #[error("webhook rejected the event with status {0}")]
    Rejected(u16),
}

pub type NotifyResult<T> = std::result::Result<T, NotifyError>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompletionEvent {
    pub run_id: String,
    pub client: String,
    pub period: String,
    pub record_count: u64,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, event: &CompletionEvent) -> NotifyResult<()>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, event: &CompletionEvent) -> NotifyResult<()> {
        info!(
            run_id = %event.run_id,
            client = %event.client,
            period = %event.period,
            records = event.record_count,
            "run completed"
        );
        Ok(())
    }
}

/// Posts the completion event as JSON to a single webhook.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: Url,
}

impl WebhookNotifier {
    pub fn new(url: &str, timeout: Duration) -> NotifyResult<Self> {
        let url = Url::parse(url).map_err(|source| NotifyError::InvalidUrl {
            url: url.to_string(),
            source,
        })?;
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, url })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, event: &CompletionEvent) -> NotifyResult<()> {
        let response = self
            .client
            .post(self.url.clone())
            .json(event)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(NotifyError::Rejected(response.status().as_u16()));
        }
        Ok(())
    }
}

pub fn notifier_from_config(config: &NotificationsSection) -> NotifyResult<Arc<dyn Notifier>> {
    match config.webhook_url.as_deref().map(str::trim) {
        Some(url) if !url.is_empty() => Ok(Arc::new(WebhookNotifier::new(
            url,
            Duration::from_secs(config.timeout_seconds.max(1)),
        )?)),
        _ => Ok(Arc::new(LogNotifier)),
    }
}
