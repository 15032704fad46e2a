mod auth;
mod chromium;
mod controller;
mod error;
mod error_handler;
mod locator;
mod metrics;
mod retry;
mod session;

pub use auth::{
    login, CredentialError, CredentialProvider, Credentials, EnvCredentials, StaticCredentials,
};
pub use chromium::{ChromiumSession, ChromiumSessionFactory};
pub use controller::BrowserController;
pub use error::{BrowserError, BrowserResult};
pub use error_handler::{
    is_auth_error, is_captcha_error, ArtifactPaths, ErrorContext, ErrorHandler, ErrorKind,
    StepFailure, UnknownErrorKind,
};
pub use locator::Locator;
pub use metrics::BrowserMetrics;
pub use retry::{retry, retry_if, RetryOptions};
pub use session::{BrowserSession, SessionFactory};
