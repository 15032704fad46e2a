use serde::{Deserialize, Serialize};

use super::{render_template, LoginLocators, SelectorMap, SelectorResult};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColeSelectors {
    pub login: ColeLoginSelectors,
    pub query: ColeQuerySelectors,
    pub results: ColeResultSelectors,
}

impl SelectorMap for ColeSelectors {
    const SITE: &'static str = "cole";
}

impl ColeSelectors {
    pub fn login_locators(&self) -> LoginLocators {
        LoginLocators {
            username_input: self.login.username_input.clone(),
            password_input: self.login.password_input.clone(),
            submit_button: self.login.submit_button.clone(),
            success_indicator: self.login.success_indicator.clone(),
        }
    }

    pub fn field_checkbox(&self, field: &str) -> SelectorResult<String> {
        render_template(&self.query.field_checkbox, &[("field", field)])
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ColeLoginSelectors {
    pub username_input: String,
    pub password_input: String,
    pub submit_button: String,
    pub success_indicator: String,
}

impl Default for ColeLoginSelectors {
    fn default() -> Self {
        Self {
            username_input: "input#username".to_string(),
            password_input: "input#password".to_string(),
            submit_button: "button[type=\"submit\"]".to_string(),
            success_indicator: "nav .account-menu".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ColeQuerySelectors {
    pub new_query_button: String,
    pub state_dropdown: String,
    pub list_type_radio: String,
    pub zip_input: String,
    pub field_checkbox: String,
    pub home_value_max: String,
    pub purchase_year_min: String,
    pub years_at_address_min: String,
    pub search_button: String,
}

impl Default for ColeQuerySelectors {
    fn default() -> Self {
        Self {
            new_query_button: "button:has-text(\"New Query\")".to_string(),
            state_dropdown: "select#state".to_string(),
            list_type_radio: "input[type=\"radio\"][value=\"emailing\"]".to_string(),
            zip_input: "textarea#zip-codes".to_string(),
            field_checkbox: "input[name=\"{field}\"]".to_string(),
            home_value_max: "#home-value-max".to_string(),
            purchase_year_min: "#purchase-year-min".to_string(),
            years_at_address_min: "#years-at-address-min".to_string(),
            search_button: "button:has-text(\"Search\")".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ColeResultSelectors {
    pub result_count: String,
    pub select_all_checkbox: String,
    pub download_button: String,
    pub export_format_radio: String,
    pub export_button: String,
}

impl Default for ColeResultSelectors {
    fn default() -> Self {
        Self {
            result_count: ".results-summary .result-count".to_string(),
            select_all_checkbox: "input#select-all".to_string(),
            download_button: "button:has-text(\"Download to Computer\")".to_string(),
            export_format_radio: "input[type=\"radio\"][value=\"csv\"]".to_string(),
            export_button: "button:has-text(\"Export\")".to_string(),
        }
    }
}
