use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::{ConfigError, Result};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct AgentConfig {
    #[serde(default)]
    pub browser: BrowserSection,
    #[serde(default)]
    pub retry: RetrySection,
    #[serde(default)]
    pub artifacts: ArtifactsSection,
    #[serde(default)]
    pub storage: StorageSection,
    #[serde(default)]
    pub notifications: NotificationsSection,
    #[serde(default)]
    pub connectors: ConnectorsSection,
}

impl AgentConfig {
    /// Resolves relative paths against `base_dir`, leaving absolute ones untouched.
    pub fn resolve_paths(&mut self, base_dir: &Path) {
        let resolve = |value: &mut String| {
            let path = Path::new(value.as_str());
            if !path.is_absolute() {
                *value = base_dir.join(path).to_string_lossy().to_string();
            }
        };
        resolve(&mut self.artifacts.screenshot_dir);
        resolve(&mut self.artifacts.trace_dir);
        resolve(&mut self.artifacts.download_dir);
        resolve(&mut self.artifacts.failure_log);
        resolve(&mut self.storage.database);
        if let Some(path) = self.connectors.cole.selectors_file.as_mut() {
            resolve(path);
        }
        if let Some(path) = self.connectors.bison.selectors_file.as_mut() {
            resolve(path);
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BrowserSection {
    pub executable_path: Option<String>,
    pub headless: bool,
    pub sandbox: bool,
    pub disable_gpu: bool,
    pub user_agent: Option<String>,
    pub lang: Option<String>,
    pub window_size: [u32; 2],
    pub timeouts: TimeoutSection,
}

impl Default for BrowserSection {
    fn default() -> Self {
        Self {
            executable_path: None,
            headless: true,
            sandbox: true,
            disable_gpu: true,
            user_agent: None,
            lang: Some("en-US".to_string()),
            window_size: [1366, 768],
            timeouts: TimeoutSection::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct TimeoutSection {
    pub navigation_ms: u64,
    pub action_ms: u64,
    pub selector_wait_ms: u64,
    pub login_ms: u64,
    pub success_indicator_ms: u64,
    pub result_count_ms: u64,
    pub import_complete_ms: u64,
    pub download_ms: u64,
}

impl Default for TimeoutSection {
    fn default() -> Self {
        Self {
            navigation_ms: 30_000,
            action_ms: 30_000,
            selector_wait_ms: 10_000,
            login_ms: 15_000,
            success_indicator_ms: 5_000,
            result_count_ms: 30_000,
            import_complete_ms: 60_000,
            download_ms: 120_000,
        }
    }
}

impl TimeoutSection {
    pub fn navigation(&self) -> Duration {
        Duration::from_millis(self.navigation_ms)
    }

    pub fn action(&self) -> Duration {
        Duration::from_millis(self.action_ms)
    }

    pub fn selector_wait(&self) -> Duration {
        Duration::from_millis(self.selector_wait_ms)
    }

    pub fn login(&self) -> Duration {
        Duration::from_millis(self.login_ms)
    }

    pub fn result_count(&self) -> Duration {
        Duration::from_millis(self.result_count_ms)
    }

    pub fn import_complete(&self) -> Duration {
        Duration::from_millis(self.import_complete_ms)
    }

    pub fn download(&self) -> Duration {
        Duration::from_millis(self.download_ms)
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct RetrySection {
    pub max_retries: u32,
    pub backoff_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_ms: 1_000,
            backoff_multiplier: 2.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ArtifactsSection {
    pub screenshot_dir: String,
    pub trace_dir: String,
    pub download_dir: String,
    pub failure_log: String,
}

impl Default for ArtifactsSection {
    fn default() -> Self {
        Self {
            screenshot_dir: "artifacts/screenshots".to_string(),
            trace_dir: "artifacts/traces".to_string(),
            download_dir: "downloads".to_string(),
            failure_log: "artifacts/failures.jsonl".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageSection {
    pub database: String,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            database: "data/agent.sqlite".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NotificationsSection {
    pub webhook_url: Option<String>,
    pub timeout_seconds: u64,
}

impl Default for NotificationsSection {
    fn default() -> Self {
        Self {
            webhook_url: None,
            timeout_seconds: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConnectorsSection {
    #[serde(default = "ConnectorSection::cole")]
    pub cole: ConnectorSection,
    #[serde(default = "ConnectorSection::bison")]
    pub bison: ConnectorSection,
}

impl Default for ConnectorsSection {
    fn default() -> Self {
        Self {
            cole: ConnectorSection::cole(),
            bison: ConnectorSection::bison(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConnectorSection {
    pub base_url: String,
    #[serde(default = "default_chunk_threshold")]
    pub chunk_threshold: u64,
    pub selectors_file: Option<String>,
}

impl ConnectorSection {
    fn cole() -> Self {
        Self {
            base_url: "https://coleinformation.com/products/cole-x-dates/".to_string(),
            chunk_threshold: default_chunk_threshold(),
            selectors_file: None,
        }
    }

    fn bison() -> Self {
        Self {
            base_url: "https://emailbison.com".to_string(),
            chunk_threshold: default_chunk_threshold(),
            selectors_file: None,
        }
    }
}

fn default_chunk_threshold() -> u64 {
    10_000
}

pub fn load_agent_config<P: AsRef<Path>>(path: P) -> Result<AgentConfig> {
    let path = path.as_ref();
    let mut config: AgentConfig = load_toml(path)?;
    if config.retry.backoff_multiplier < 1.0 {
        return Err(ConfigError::Invalid(format!(
            "retry.backoff_multiplier must be >= 1.0, got {}",
            config.retry.backoff_multiplier
        )));
    }
    if let Some(base) = path.parent() {
        config.resolve_paths(base);
    }
    Ok(config)
}

/// Loads a TOML or JSON document, picking the format from the file extension.
pub fn load_document<T, P>(path: P) -> Result<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("json") => {
            let content = read(path)?;
            serde_json::from_str(&content).map_err(|source| ConfigError::Json {
                source,
                path: path.to_path_buf(),
            })
        }
        _ => load_toml(path),
    }
}

pub(crate) fn load_toml<T, P>(path: P) -> Result<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let content = read(path)?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        source,
        path: path.to_path_buf(),
    })
}

fn read(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        source,
        path: PathBuf::from(path),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_fixture_config() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../configs/agent.toml");
        let config = load_agent_config(&path).expect("config should parse");
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.retry.backoff_ms, 1_000);
        assert_eq!(config.browser.timeouts.login_ms, 15_000);
        assert_eq!(config.connectors.cole.chunk_threshold, 10_000);
        assert!(Path::new(&config.storage.database).is_absolute());
        assert!(config
            .connectors
            .cole
            .selectors_file
            .as_deref()
            .is_some_and(|file| file.ends_with("cole.toml")));
    }

    #[test]
    fn missing_sections_fall_back_to_defaults() {
        let config: AgentConfig = toml::from_str("[retry]\nmax_retries = 5\nbackoff_ms = 10\nbackoff_multiplier = 3.0\n").unwrap();
        assert_eq!(config.retry.max_retries, 5);
        assert!(config.browser.headless);
        assert_eq!(config.browser.timeouts.selector_wait_ms, 10_000);
        assert_eq!(config.artifacts.screenshot_dir, "artifacts/screenshots");
        assert_eq!(config.connectors.bison.base_url, "https://emailbison.com");
    }

    #[test]
    fn rejects_shrinking_backoff() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent.toml");
        std::fs::write(
            &path,
            "[retry]\nmax_retries = 3\nbackoff_ms = 1000\nbackoff_multiplier = 0.5\n",
        )
        .unwrap();
        let err = load_agent_config(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }
}
