use std::fmt;

use super::error::{BrowserError, BrowserResult};

/// A parsed element locator.
///
/// Plain strings are CSS selectors. The `tag:has-text("label")` form matches
/// the first `tag` element whose trimmed text content contains `label`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Locator {
    Css(String),
    Text { tag: String, text: String },
}

impl Locator {
    pub fn parse(raw: &str) -> BrowserResult<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(BrowserError::InvalidLocator("empty locator".to_string()));
        }
        let Some((tag, rest)) = raw.split_once(":has-text(") else {
            return Ok(Locator::Css(raw.to_string()));
        };
        let inner = rest
            .strip_suffix(')')
            .ok_or_else(|| BrowserError::InvalidLocator(raw.to_string()))?;
        let text = strip_quotes(inner.trim())
            .ok_or_else(|| BrowserError::InvalidLocator(raw.to_string()))?;
        let tag = if tag.is_empty() { "*" } else { tag };
        if !tag
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '*')
        {
            return Err(BrowserError::InvalidLocator(raw.to_string()));
        }
        Ok(Locator::Text {
            tag: tag.to_string(),
            text: text.to_string(),
        })
    }

    pub fn css(&self) -> Option<&str> {
        match self {
            Locator::Css(selector) => Some(selector),
            Locator::Text { .. } => None,
        }
    }

    /// JavaScript expression evaluating to the matched element or `null`.
    pub fn js_query(&self) -> String {
        match self {
            Locator::Css(selector) => {
                format!("document.querySelector({})", js_string(selector))
            }
            Locator::Text { tag, text } => format!(
                "Array.from(document.querySelectorAll({})).find((el) => (el.textContent || '').trim().includes({})) || null",
                js_string(tag),
                js_string(text)
            ),
        }
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Locator::Css(selector) => f.write_str(selector),
            Locator::Text { tag, text } => write!(f, "{tag}:has-text(\"{text}\")"),
        }
    }
}

pub(crate) fn js_string(value: &str) -> String {
    serde_json::Value::String(value.to_string()).to_string()
}

fn strip_quotes(value: &str) -> Option<&str> {
    value
        .strip_prefix('"')
        .and_then(|rest| rest.strip_suffix('"'))
        .or_else(|| {
            value
                .strip_prefix('\'')
                .and_then(|rest| rest.strip_suffix('\''))
        })
}
