use serde::{Deserialize, Serialize};

use super::{render_template, LoginLocators, SelectorMap, SelectorResult};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BisonSelectors {
    pub login: BisonLoginSelectors,
    pub navigation: BisonNavigationSelectors,
    pub contacts: BisonContactSelectors,
    pub campaigns: BisonCampaignSelectors,
}

impl SelectorMap for BisonSelectors {
    const SITE: &'static str = "bison";
}

impl BisonSelectors {
    pub fn login_locators(&self) -> LoginLocators {
        LoginLocators {
            username_input: self.login.email_input.clone(),
            password_input: self.login.password_input.clone(),
            submit_button: self.login.submit_button.clone(),
            success_indicator: self.login.success_indicator.clone(),
        }
    }

    pub fn workspace_link(&self, workspace: &str) -> SelectorResult<String> {
        render_template(&self.navigation.workspace_link, &[("workspace", workspace)])
    }

    pub fn csv_field_select(&self, field: &str) -> SelectorResult<String> {
        render_template(&self.contacts.field_mapping_select, &[("field", field)])
    }

    pub fn campaign_by_id(&self, id: &str) -> SelectorResult<String> {
        render_template(&self.campaigns.campaign_by_id, &[("id", id)])
    }

    pub fn list_checkbox(&self, list: &str) -> SelectorResult<String> {
        render_template(&self.campaigns.list_checkbox, &[("list", list)])
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BisonLoginSelectors {
    pub email_input: String,
    pub password_input: String,
    pub submit_button: String,
    pub success_indicator: String,
}

impl Default for BisonLoginSelectors {
    fn default() -> Self {
        Self {
            email_input: "input[name=\"email\"]".to_string(),
            password_input: "input[name=\"password\"]".to_string(),
            submit_button: "button[type=\"submit\"]".to_string(),
            success_indicator: "aside.workspace-switcher".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BisonNavigationSelectors {
    pub workspace_link: String,
    pub contacts_tab: String,
    pub campaigns_tab: String,
}

impl Default for BisonNavigationSelectors {
    fn default() -> Self {
        Self {
            workspace_link: "a:has-text(\"{workspace}\")".to_string(),
            contacts_tab: "a[href$=\"/contacts\"]".to_string(),
            campaigns_tab: "a[href$=\"/campaigns\"]".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BisonContactSelectors {
    pub import_button: String,
    pub file_input: String,
    pub list_name_input: String,
    pub field_mapping_select: String,
    pub import_submit_button: String,
    pub import_complete_indicator: String,
    pub contact_count: String,
}

impl Default for BisonContactSelectors {
    fn default() -> Self {
        Self {
            import_button: "button:has-text(\"Import Contacts\")".to_string(),
            file_input: "input[type=\"file\"]".to_string(),
            list_name_input: "input[name=\"list_name\"]".to_string(),
            field_mapping_select: "select[data-csv-field=\"{field}\"]".to_string(),
            import_submit_button: "button:has-text(\"Start Import\")".to_string(),
            import_complete_indicator: ".import-status.complete".to_string(),
            contact_count: ".import-status .contact-count".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BisonCampaignSelectors {
    pub search_input: String,
    pub campaign_link: String,
    pub campaign_by_id: String,
    pub actions_button: String,
    pub add_contacts_option: String,
    pub list_checkbox: String,
    pub add_button: String,
    pub rename_option: String,
    pub campaign_title: String,
    pub save_button: String,
}

impl Default for BisonCampaignSelectors {
    fn default() -> Self {
        Self {
            search_input: "input[placeholder=\"Search campaigns\"]".to_string(),
            campaign_link: "a.campaign-link".to_string(),
            campaign_by_id: "a[data-campaign-id=\"{id}\"]".to_string(),
            actions_button: "button:has-text(\"Actions\")".to_string(),
            add_contacts_option: "button:has-text(\"Add Contacts\")".to_string(),
            list_checkbox: "input[type=\"checkbox\"][data-list-name=\"{list}\"]".to_string(),
            add_button: "button:has-text(\"Add\")".to_string(),
            rename_option: "button:has-text(\"Rename\")".to_string(),
            campaign_title: "input[name=\"title\"]".to_string(),
            save_button: "button:has-text(\"Save\")".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dynamic_helpers_render_templates() {
        let selectors = BisonSelectors::default();
        assert_eq!(
            selectors.workspace_link("Acme Roofing").unwrap(),
            "a:has-text(\"Acme Roofing\")"
        );
        assert_eq!(
            selectors.campaign_by_id("c-19").unwrap(),
            "a[data-campaign-id=\"c-19\"]"
        );
        assert_eq!(
            selectors.list_checkbox("March").unwrap(),
            "input[type=\"checkbox\"][data-list-name=\"March\"]"
        );
        assert_eq!(
            selectors.csv_field_select("email").unwrap(),
            "select[data-csv-field=\"email\"]"
        );
    }

    #[test]
    fn lookup_resolves_flat_keys() {
        let selectors = BisonSelectors::default();
        assert_eq!(
            selectors.lookup("login.emailInput").unwrap().as_deref(),
            Some("input[name=\"email\"]")
        );
        assert!(selectors.lookup("login.missing").unwrap().is_none());
        selectors.validate().unwrap();
    }
}
