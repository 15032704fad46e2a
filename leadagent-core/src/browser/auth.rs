use std::fmt;

use thiserror::Error;
use tracing::info;

use crate::selectors::LoginLocators;

use super::controller::BrowserController;
use super::error::BrowserError;
use super::error_handler::{ErrorHandler, StepFailure};

#[derive(Debug, Error)]
#[error("missing credentials for {site}: set {variable}")]
pub struct CredentialError {
    pub site: String,
    pub variable: String,
}

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn password(&self) -> &str {
        &self.password
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

pub trait CredentialProvider: Send + Sync {
    fn resolve(&self, site: &str, region: Option<&str>) -> Result<Credentials, CredentialError>;
}

/// Reads `<SITE>_<REGION>_USERNAME` / `_PASSWORD`, falling back to
/// `<SITE>_USERNAME` / `<SITE>_PASSWORD`.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvCredentials;

impl EnvCredentials {
    fn lookup(site: &str, region: Option<&str>, field: &str) -> Result<String, CredentialError> {
        let site_key = env_key(site);
        let mut candidates = Vec::with_capacity(2);
        if let Some(region) = region {
            candidates.push(format!("{site_key}_{}_{field}", env_key(region)));
        }
        candidates.push(format!("{site_key}_{field}"));
        candidates
            .iter()
            .find_map(|name| std::env::var(name).ok().filter(|value| !value.is_empty()))
            .ok_or_else(|| CredentialError {
                site: site.to_string(),
                variable: candidates.join(" or "),
            })
    }
}

impl CredentialProvider for EnvCredentials {
    fn resolve(&self, site: &str, region: Option<&str>) -> Result<Credentials, CredentialError> {
        Ok(Credentials::new(
            Self::lookup(site, region, "USERNAME")?,
            Self::lookup(site, region, "PASSWORD")?,
        ))
    }
}

#[derive(Debug, Clone)]
pub struct StaticCredentials(pub Credentials);

impl CredentialProvider for StaticCredentials {
    fn resolve(&self, _site: &str, _region: Option<&str>) -> Result<Credentials, CredentialError> {
        Ok(self.0.clone())
    }
}

fn env_key(value: &str) -> String {
    value
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}

/// Fills the login form and waits for the post-login marker. A missing
/// marker after the login timeout is reported as an authentication failure.
pub async fn login(
    browser: &BrowserController,
    errors: &ErrorHandler,
    site: &str,
    credentials: &Credentials,
    locators: &LoginLocators,
) -> Result<(), StepFailure> {
    let username = credentials.username.as_str();
    let password = credentials.password();
    let username_input = locators.username_input.as_str();
    let password_input = locators.password_input.as_str();
    let submit = locators.submit_button.as_str();
    let indicator = locators.success_indicator.as_str();
    let limit = browser.timeouts().login();

    errors
        .run_step(
            browser,
            &format!("{site}.login.username"),
            Some(username_input),
            move || browser.fill(username_input, username),
        )
        .await?;
    errors
        .run_step(
            browser,
            &format!("{site}.login.password"),
            Some(password_input),
            move || browser.fill(password_input, password),
        )
        .await?;
    errors
        .run_step(
            browser,
            &format!("{site}.login.submit"),
            Some(submit),
            move || browser.click(submit),
        )
        .await?;
    errors
        .run_step(
            browser,
            &format!("{site}.login.verify"),
            Some(indicator),
            move || async move {
                match browser.wait_for(indicator, limit).await {
                    Err(BrowserError::Timeout(_)) => Err(BrowserError::Authentication(format!(
                        "{indicator} not visible {}ms after submit",
                        limit.as_millis()
                    ))),
                    other => other,
                }
            },
        )
        .await?;
    info!(site, user = %credentials.username, "login succeeded");
    Ok(())
}
