use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrowserMetrics {
    pub sessions_opened: u64,
    pub sessions_closed: u64,
    pub rejected_launches: u64,
    pub navigations: u64,
    pub actions: u64,
    pub waits: u64,
    pub downloads: u64,
    pub uploads: u64,
    pub screenshots: u64,
    pub failures: u64,
    pub retries: u64,
}

impl BrowserMetrics {
    pub fn record_session_open(&mut self) {
        self.sessions_opened = self.sessions_opened.saturating_add(1);
    }

    pub fn record_session_close(&mut self) {
        self.sessions_closed = self.sessions_closed.saturating_add(1);
    }

    pub fn record_rejected_launch(&mut self) {
        self.rejected_launches = self.rejected_launches.saturating_add(1);
    }

    pub fn record_navigation(&mut self) {
        self.navigations = self.navigations.saturating_add(1);
    }

    pub fn record_action(&mut self) {
        self.actions = self.actions.saturating_add(1);
    }

    pub fn record_wait(&mut self) {
        self.waits = self.waits.saturating_add(1);
    }

    pub fn record_download(&mut self) {
        self.downloads = self.downloads.saturating_add(1);
    }

    pub fn record_upload(&mut self) {
        self.uploads = self.uploads.saturating_add(1);
    }

    pub fn record_screenshot(&mut self) {
        self.screenshots = self.screenshots.saturating_add(1);
    }

    pub fn record_failure(&mut self) {
        self.failures = self.failures.saturating_add(1);
    }

    pub fn record_retry(&mut self) {
        self.retries = self.retries.saturating_add(1);
    }

    pub fn open_sessions(&self) -> u64 {
        self.sessions_opened.saturating_sub(self.sessions_closed)
    }
}
