use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::browser::{
    login, BrowserController, CredentialProvider, EnvCredentials, ErrorHandler, SessionFactory,
};
use crate::config::AgentConfig;
use crate::selectors::{load_selectors, BisonSelectors};

use super::{ConnectorError, ConnectorResult};

const SITE: &str = "bison";
const UI_SETTLE: Duration = Duration::from_secs(1);

/// One CSV contact import into a named list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BisonImport {
    pub csv_path: PathBuf,
    pub list_name: String,
    /// CSV column -> Bison contact field.
    #[serde(default)]
    pub field_mapping: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BisonCampaign {
    pub id: String,
    pub title: String,
}

/// Email Bison: the upload target for collected contacts.
pub struct BisonConnector {
    browser: BrowserController,
    selectors: BisonSelectors,
    base_url: String,
    credentials: Arc<dyn CredentialProvider>,
    workspace: Option<String>,
}

impl BisonConnector {
    pub fn new(browser: BrowserController, selectors: BisonSelectors, base_url: impl Into<String>) -> Self {
        Self {
            browser,
            selectors,
            base_url: base_url.into(),
            credentials: Arc::new(EnvCredentials),
            workspace: None,
        }
    }

    pub fn from_config(
        config: &AgentConfig,
        factory: Arc<dyn SessionFactory>,
    ) -> ConnectorResult<Self> {
        let selectors = load_selectors::<BisonSelectors>(
            config.connectors.bison.selectors_file.as_deref().map(Path::new),
        )?;
        let browser = BrowserController::new(factory, config.browser.timeouts);
        Ok(Self::new(
            browser,
            selectors,
            config.connectors.bison.base_url.clone(),
        ))
    }

    pub fn with_credentials(mut self, credentials: Arc<dyn CredentialProvider>) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn browser(&self) -> &BrowserController {
        &self.browser
    }

    pub fn workspace(&self) -> Option<&str> {
        self.workspace.as_deref()
    }

    pub async fn connect(&mut self, workspace: &str, errors: &ErrorHandler) -> ConnectorResult<()> {
        info!(workspace, "connecting to Bison");
        let credentials = self.credentials.resolve(SITE, None)?;
        let browser = &self.browser;
        errors
            .run_step(browser, "bison.connect.launch", None, move || browser.launch())
            .await?;
        let url = format!("{}/login", self.base_url.trim_end_matches('/'));
        let url = url.as_str();
        errors
            .run_step(browser, "bison.connect.navigate", None, move || {
                browser.navigate(url)
            })
            .await?;
        login(
            browser,
            errors,
            SITE,
            &credentials,
            &self.selectors.login_locators(),
        )
        .await?;

        let link = self.selectors.workspace_link(workspace)?;
        let link = link.as_str();
        errors
            .run_step(browser, "bison.connect.workspace", Some(link), move || {
                browser.click(link)
            })
            .await?;
        browser.pause(UI_SETTLE).await;
        self.workspace = Some(workspace.to_string());
        info!(workspace, "connected to Bison");
        Ok(())
    }

    /// Uploads a CSV into a new contact list and returns the imported count.
    pub async fn import_contacts(
        &self,
        import: &BisonImport,
        errors: &ErrorHandler,
    ) -> ConnectorResult<u64> {
        self.require_workspace()?;
        if !import.csv_path.is_file() {
            return Err(ConnectorError::Validation(format!(
                "contact file {} does not exist",
                import.csv_path.display()
            )));
        }
        info!(
            file = %import.csv_path.display(),
            list = %import.list_name,
            "importing contacts"
        );
        let browser = &self.browser;
        let nav = &self.selectors.navigation;
        let contacts = &self.selectors.contacts;

        let tab = nav.contacts_tab.as_str();
        errors
            .run_step(browser, "bison.import.contacts_tab", Some(tab), move || {
                browser.click(tab)
            })
            .await?;
        let open = contacts.import_button.as_str();
        errors
            .run_step(browser, "bison.import.open", Some(open), move || {
                browser.click(open)
            })
            .await?;
        let file_input = contacts.file_input.as_str();
        let file = import.csv_path.as_path();
        errors
            .run_step(browser, "bison.import.file", Some(file_input), move || {
                browser.upload_file(file_input, file)
            })
            .await?;
        let list_input = contacts.list_name_input.as_str();
        let list_name = import.list_name.as_str();
        errors
            .run_step(browser, "bison.import.list_name", Some(list_input), move || {
                browser.fill(list_input, list_name)
            })
            .await?;

        for (column, field) in &import.field_mapping {
            let select = self.selectors.csv_field_select(column)?;
            let select = select.as_str();
            let field = field.as_str();
            errors
                .run_step(browser, "bison.import.mapping", Some(select), move || {
                    browser.select_option(select, field)
                })
                .await?;
        }

        let submit = contacts.import_submit_button.as_str();
        errors
            .run_step(browser, "bison.import.submit", Some(submit), move || {
                browser.click(submit)
            })
            .await?;
        let complete = contacts.import_complete_indicator.as_str();
        let limit = browser.timeouts().import_complete();
        errors
            .run_step(browser, "bison.import.complete", Some(complete), move || {
                browser.wait_for(complete, limit)
            })
            .await?;

        let count = contacts.contact_count.as_str();
        let text = errors
            .run_step(browser, "bison.import.count", Some(count), move || {
                browser.text_content(count)
            })
            .await?
            .unwrap_or_default();
        let imported = first_number(&text).unwrap_or_else(|| {
            warn!(text = %text, "imported contact count not recognised");
            0
        });
        info!(list = %import.list_name, imported, "contacts imported");
        Ok(imported)
    }

    pub async fn find_campaign(
        &self,
        title: &str,
        errors: &ErrorHandler,
    ) -> ConnectorResult<Option<BisonCampaign>> {
        self.require_workspace()?;
        let browser = &self.browser;
        let campaigns = &self.selectors.campaigns;

        let tab = self.selectors.navigation.campaigns_tab.as_str();
        errors
            .run_step(browser, "bison.campaign.tab", Some(tab), move || {
                browser.click(tab)
            })
            .await?;
        let search = campaigns.search_input.as_str();
        errors
            .run_step(browser, "bison.campaign.search", Some(search), move || {
                browser.fill(search, title)
            })
            .await?;
        browser.pause(UI_SETTLE).await;

        let link = campaigns.campaign_link.as_str();
        let present = errors
            .run_step(browser, "bison.campaign.lookup", Some(link), move || {
                browser.is_present(link)
            })
            .await?;
        if !present {
            info!(title, "campaign not found");
            return Ok(None);
        }
        let found_title = errors
            .run_step(browser, "bison.campaign.title", Some(link), move || {
                browser.text_content(link)
            })
            .await?
            .map(|text| text.trim().to_string())
            .unwrap_or_default();
        let id = errors
            .run_step(browser, "bison.campaign.id", Some(link), move || {
                browser.attribute(link, "data-campaign-id")
            })
            .await?;
        let Some(id) = id else {
            return Err(errors
                .handle_selector_not_found(browser, "bison.campaign.id", link)
                .await
                .into());
        };
        Ok(Some(BisonCampaign {
            id,
            title: found_title,
        }))
    }

    pub async fn add_contacts_to_campaign(
        &self,
        campaign_id: &str,
        list_name: &str,
        errors: &ErrorHandler,
    ) -> ConnectorResult<()> {
        self.open_campaign_actions(campaign_id, "bison.campaign.add", errors)
            .await?;
        let browser = &self.browser;
        let campaigns = &self.selectors.campaigns;

        let option = campaigns.add_contacts_option.as_str();
        errors
            .run_step(browser, "bison.campaign.add.option", Some(option), move || {
                browser.click(option)
            })
            .await?;
        let checkbox = self.selectors.list_checkbox(list_name)?;
        let checkbox = checkbox.as_str();
        errors
            .run_step(browser, "bison.campaign.add.list", Some(checkbox), move || {
                browser.check(checkbox)
            })
            .await?;
        let add = campaigns.add_button.as_str();
        errors
            .run_step(browser, "bison.campaign.add.confirm", Some(add), move || {
                browser.click(add)
            })
            .await?;
        info!(campaign = campaign_id, list = list_name, "contacts added to campaign");
        Ok(())
    }

    pub async fn rename_campaign(
        &self,
        campaign_id: &str,
        new_title: &str,
        errors: &ErrorHandler,
    ) -> ConnectorResult<()> {
        if new_title.trim().is_empty() {
            return Err(ConnectorError::Validation(
                "campaign title must not be empty".to_string(),
            ));
        }
        self.open_campaign_actions(campaign_id, "bison.campaign.rename", errors)
            .await?;
        let browser = &self.browser;
        let campaigns = &self.selectors.campaigns;

        let option = campaigns.rename_option.as_str();
        errors
            .run_step(browser, "bison.campaign.rename.option", Some(option), move || {
                browser.click(option)
            })
            .await?;
        let input = campaigns.campaign_title.as_str();
        errors
            .run_step(browser, "bison.campaign.rename.title", Some(input), move || {
                browser.fill(input, new_title)
            })
            .await?;
        let save = campaigns.save_button.as_str();
        errors
            .run_step(browser, "bison.campaign.rename.save", Some(save), move || {
                browser.click(save)
            })
            .await?;
        info!(campaign = campaign_id, title = new_title, "campaign renamed");
        Ok(())
    }

    pub async fn disconnect(&mut self) -> ConnectorResult<()> {
        self.workspace = None;
        self.browser.close().await?;
        info!("disconnected from Bison");
        Ok(())
    }

    async fn open_campaign_actions(
        &self,
        campaign_id: &str,
        step: &str,
        errors: &ErrorHandler,
    ) -> ConnectorResult<()> {
        self.require_workspace()?;
        let browser = &self.browser;
        let campaign = self.selectors.campaign_by_id(campaign_id)?;
        let campaign = campaign.as_str();
        errors
            .run_step(browser, &format!("{step}.open"), Some(campaign), move || {
                browser.click(campaign)
            })
            .await?;
        let actions = self.selectors.campaigns.actions_button.as_str();
        errors
            .run_step(browser, &format!("{step}.actions"), Some(actions), move || {
                browser.click(actions)
            })
            .await?;
        Ok(())
    }

    fn require_workspace(&self) -> ConnectorResult<&str> {
        self.workspace
            .as_deref()
            .ok_or(ConnectorError::NotConnected("bison action issued before connect"))
    }
}

fn first_number(text: &str) -> Option<u64> {
    let digits: String = text
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(|c| c.is_ascii_digit() || *c == ',')
        .filter(char::is_ascii_digit)
        .collect();
    digits.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::{Credentials, ErrorKind, RetryOptions, StaticCredentials};
    use crate::config::{ArtifactsSection, TimeoutSection};
    use crate::store::{MemoryRunStore, NewRun, RunStore};
    use crate::testing::{FakeAction, FakeSessionFactory};

    struct Harness {
        factory: FakeSessionFactory,
        store: Arc<MemoryRunStore>,
        errors: ErrorHandler,
        dir: tempfile::TempDir,
    }

    async fn harness() -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryRunStore::new());
        store
            .create_run(&NewRun {
                run_id: "run-b".to_string(),
                workflow: "bison-upload".to_string(),
                client_id: 7,
                site: SITE.to_string(),
            })
            .await
            .unwrap();
        let artifacts = ArtifactsSection {
            screenshot_dir: dir.path().join("shots").display().to_string(),
            trace_dir: dir.path().join("traces").display().to_string(),
            download_dir: dir.path().join("downloads").display().to_string(),
            failure_log: dir.path().join("failures.jsonl").display().to_string(),
        };
        let errors = ErrorHandler::new(
            "run-b",
            store.clone(),
            &artifacts,
            RetryOptions::new(1, Duration::from_millis(10), 2.0),
        )
        .unwrap();
        Harness {
            factory: FakeSessionFactory::new(),
            store,
            errors,
            dir,
        }
    }

    fn connector(factory: &FakeSessionFactory) -> BisonConnector {
        let browser = BrowserController::new(
            Arc::new(factory.clone()),
            TimeoutSection::default(),
        );
        BisonConnector::new(browser, BisonSelectors::default(), "https://bison.test/")
            .with_credentials(Arc::new(StaticCredentials(Credentials::new(
                "ops@example.com",
                "secret",
            ))))
    }

    #[test]
    fn first_number_reads_grouped_digits() {
        assert_eq!(first_number("1,250 contacts imported"), Some(1_250));
        assert_eq!(first_number("Imported: 42 of 50"), Some(42));
        assert_eq!(first_number("done"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn connect_selects_the_workspace() {
        let h = harness().await;
        let mut bison = connector(&h.factory);
        bison.connect("Acme Roofing", &h.errors).await.unwrap();

        assert_eq!(bison.workspace(), Some("Acme Roofing"));
        let actions = h.factory.actions();
        assert_eq!(
            actions[0],
            FakeAction::Navigate("https://bison.test/login".to_string())
        );
        assert_eq!(h.factory.clicks("a:has-text(\"Acme Roofing\")"), 1);
        assert_eq!(h.factory.fills("input[name=\"email\"]"), vec!["ops@example.com"]);

        bison.disconnect().await.unwrap();
        bison.disconnect().await.unwrap();
        assert_eq!(h.factory.state().sessions_closed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn import_maps_fields_and_reads_count() {
        let h = harness().await;
        let csv = h.dir.path().join("contacts.csv");
        std::fs::write(&csv, "email,first_name\nada@example.com,Ada\n").unwrap();
        h.factory
            .set_text(".import-status .contact-count", "1 contact imported");

        let mut bison = connector(&h.factory);
        bison.connect("Acme", &h.errors).await.unwrap();
        let import = BisonImport {
            csv_path: csv.clone(),
            list_name: "Acme - March".to_string(),
            field_mapping: BTreeMap::from([
                ("email".to_string(), "email".to_string()),
                ("first_name".to_string(), "first_name".to_string()),
            ]),
        };
        let imported = bison.import_contacts(&import, &h.errors).await.unwrap();

        assert_eq!(imported, 1);
        let actions = h.factory.actions();
        assert!(actions.contains(&FakeAction::Upload(
            "input[type=\"file\"]".to_string(),
            csv
        )));
        assert!(actions.contains(&FakeAction::Select(
            "select[data-csv-field=\"first_name\"]".to_string(),
            "first_name".to_string()
        )));
        assert_eq!(h.factory.fills("input[name=\"list_name\"]"), vec!["Acme - March"]);
    }

    #[tokio::test(start_paused = true)]
    async fn actions_before_connect_are_rejected() {
        let h = harness().await;
        let bison = connector(&h.factory);
        let err = bison.find_campaign("Spring", &h.errors).await.unwrap_err();
        assert!(matches!(err, ConnectorError::NotConnected(_)));
        assert!(h.store.errors().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn missing_campaign_is_none() {
        let h = harness().await;
        h.factory.mark_missing("a.campaign-link");
        let mut bison = connector(&h.factory);
        bison.connect("Acme", &h.errors).await.unwrap();
        assert!(bison
            .find_campaign("Spring", &h.errors)
            .await
            .unwrap()
            .is_none());
        assert_eq!(
            h.factory.fills("input[placeholder=\"Search campaigns\"]"),
            vec!["Spring"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn campaign_id_comes_from_the_link() {
        let h = harness().await;
        h.factory.set_text("a.campaign-link", "  Spring Promo ");
        h.factory.with_state(|state| {
            state.attributes.insert(
                ("a.campaign-link".to_string(), "data-campaign-id".to_string()),
                "c-19".to_string(),
            );
        });
        let mut bison = connector(&h.factory);
        bison.connect("Acme", &h.errors).await.unwrap();
        let campaign = bison
            .find_campaign("Spring", &h.errors)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            campaign,
            BisonCampaign {
                id: "c-19".to_string(),
                title: "Spring Promo".to_string()
            }
        );

        bison
            .add_contacts_to_campaign("c-19", "Acme - March", &h.errors)
            .await
            .unwrap();
        assert_eq!(
            h.factory
                .with_state(|state| state.actions.clone())
                .iter()
                .filter(|a| matches!(a, FakeAction::Check(l) if l.contains("Acme - March")))
                .count(),
            1
        );
    }

    #[tokio::test(start_paused = true)]
    async fn missing_rename_option_is_captured() {
        let h = harness().await;
        h.factory.mark_missing("button:has-text(\"Rename\")");
        let mut bison = connector(&h.factory);
        bison.connect("Acme", &h.errors).await.unwrap();
        let err = bison
            .rename_campaign("c-19", "Spring 2", &h.errors)
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::SelectorMiss);
        assert_eq!(err.step(), Some("bison.campaign.rename.option"));
        let errors = h.store.errors();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].locator.as_deref(), Some("button:has-text(\"Rename\")"));
    }
}
