//! Declarative selector maps.
//!
//! Each connector owns one typed map from logical action name (for example
//! `login.emailInput`) to a locator string. Connectors never inline locators,
//! so a site layout change is an edit to the defaults here or to the
//! connector's TOML override file.

mod bison;
mod cole;

use std::collections::BTreeMap;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

pub use bison::{
    BisonCampaignSelectors, BisonContactSelectors, BisonLoginSelectors, BisonNavigationSelectors,
    BisonSelectors,
};
pub use cole::{ColeLoginSelectors, ColeQuerySelectors, ColeResultSelectors, ColeSelectors};

pub type SelectorResult<T> = Result<T, SelectorError>;

#[derive(Debug, Error)]
pub enum SelectorError {
    #[error("invalid selector template {template}: unresolved placeholder {{{name}}}")]
    UnresolvedPlaceholder { template: String, name: String },
    #[error("invalid selector template {template}: unterminated placeholder")]
    Unterminated { template: String },
    #[error("invalid selector map for {site}: {key} is empty")]
    Empty { site: String, key: String },
    #[error("selector map for {site} could not be loaded: {source}")]
    Load {
        site: String,
        source: crate::error::ConfigError,
    },
    #[error("selector map serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Login form locators shared by every connector that signs in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginLocators {
    pub username_input: String,
    pub password_input: String,
    pub submit_button: String,
    pub success_indicator: String,
}

pub trait SelectorMap: Serialize + DeserializeOwned + Default {
    const SITE: &'static str;

    /// Flattens the nested map into `area.logicalName -> locator`.
    fn flatten(&self) -> SelectorResult<BTreeMap<String, String>> {
        let value = serde_json::to_value(self)?;
        let mut entries = BTreeMap::new();
        flatten_into(&value, "", &mut entries);
        Ok(entries)
    }

    fn lookup(&self, key: &str) -> SelectorResult<Option<String>> {
        Ok(self.flatten()?.remove(key))
    }

    fn validate(&self) -> SelectorResult<()> {
        for (key, locator) in self.flatten()? {
            if locator.trim().is_empty() {
                return Err(SelectorError::Empty {
                    site: Self::SITE.to_string(),
                    key,
                });
            }
        }
        Ok(())
    }
}

/// Loads a selector map, overlaying the optional TOML override on the
/// built-in defaults. Entries missing from the override keep their default.
pub fn load_selectors<T: SelectorMap>(override_file: Option<&Path>) -> SelectorResult<T> {
    let map = match override_file {
        Some(path) => crate::config::load_toml::<T, _>(path).map_err(|source| {
            SelectorError::Load {
                site: T::SITE.to_string(),
                source,
            }
        })?,
        None => T::default(),
    };
    map.validate()?;
    Ok(map)
}

/// Substitutes `{name}` placeholders in a locator template.
pub fn render_template(template: &str, vars: &[(&str, &str)]) -> SelectorResult<String> {
    let mut rendered = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        rendered.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        let end = after.find('}').ok_or_else(|| SelectorError::Unterminated {
            template: template.to_string(),
        })?;
        let name = &after[..end];
        let value = vars
            .iter()
            .find(|(key, _)| *key == name)
            .map(|(_, value)| *value)
            .ok_or_else(|| SelectorError::UnresolvedPlaceholder {
                template: template.to_string(),
                name: name.to_string(),
            })?;
        rendered.push_str(value);
        rest = &after[end + 1..];
    }
    rendered.push_str(rest);
    Ok(rendered)
}

fn flatten_into(value: &Value, prefix: &str, entries: &mut BTreeMap<String, String>) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                let path = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{prefix}.{key}")
                };
                flatten_into(child, &path, entries);
            }
        }
        Value::String(locator) => {
            entries.insert(prefix.to_string(), locator.clone());
        }
        other => {
            entries.insert(prefix.to_string(), other.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_substitutes_every_placeholder() {
        let rendered = render_template(
            "a[data-workspace=\"{workspace}\"][data-id=\"{id}\"]",
            &[("workspace", "Acme"), ("id", "42")],
        )
        .unwrap();
        assert_eq!(rendered, "a[data-workspace=\"Acme\"][data-id=\"42\"]");
    }

    #[test]
    fn render_without_placeholders_is_identity() {
        assert_eq!(render_template("#username", &[]).unwrap(), "#username");
    }

    #[test]
    fn render_rejects_missing_values() {
        let err = render_template("input[name=\"{field}\"]", &[("other", "x")]).unwrap_err();
        assert!(matches!(
            err,
            SelectorError::UnresolvedPlaceholder { ref name, .. } if name == "field"
        ));
        assert!(err.to_string().starts_with("invalid selector template"));
    }

    #[test]
    fn render_rejects_unterminated_placeholder() {
        let err = render_template("input[name=\"{field\"]", &[("field", "x")]).unwrap_err();
        assert!(matches!(err, SelectorError::Unterminated { .. }));
    }

    #[test]
    fn override_file_keeps_unlisted_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cole.toml");
        std::fs::write(&path, "[login]\nusernameInput = \"#user-v2\"\n").unwrap();

        let selectors: ColeSelectors = load_selectors(Some(&path)).unwrap();
        assert_eq!(selectors.login.username_input, "#user-v2");
        assert_eq!(
            selectors.login.password_input,
            ColeSelectors::default().login.password_input
        );
    }

    #[test]
    fn empty_override_entry_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bison.toml");
        std::fs::write(&path, "[login]\nemailInput = \"  \"\n").unwrap();

        let err = load_selectors::<BisonSelectors>(Some(&path)).unwrap_err();
        assert!(matches!(err, SelectorError::Empty { ref key, .. } if key == "login.emailInput"));
    }
}
