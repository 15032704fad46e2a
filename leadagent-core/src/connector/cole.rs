use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::browser::{
    login, BrowserController, CredentialProvider, EnvCredentials, ErrorHandler, SessionFactory,
};
use crate::config::AgentConfig;
use crate::selectors::{load_selectors, ColeSelectors};

use super::{Connector, ConnectorError, ConnectorResult, QueryFilters, QueryParams, QueryResult};

pub const COLE_DEFAULT_FIELDS: &[&str] = &[
    "first_name",
    "last_name",
    "address",
    "city",
    "state",
    "zip",
    "home_value",
    "purchase_date",
    "year_built",
    "email",
    "phone",
];

const SITE: &str = "cole";
const UI_SETTLE: Duration = Duration::from_secs(1);

static RESULT_COUNT: OnceLock<Regex> = OnceLock::new();

fn result_count_regex() -> &'static Regex {
    RESULT_COUNT.get_or_init(|| Regex::new(r"(?i)(\d[\d,]*)\s+results?").expect("valid regex"))
}

#[derive(Debug, Clone)]
pub struct ColeSettings {
    pub base_url: String,
    /// Largest result set exported in one go.
    pub chunk_threshold: u64,
    pub download_dir: PathBuf,
}

impl ColeSettings {
    pub fn from_config(config: &AgentConfig) -> Self {
        Self {
            base_url: config.connectors.cole.base_url.clone(),
            chunk_threshold: config.connectors.cole.chunk_threshold.max(1),
            download_dir: PathBuf::from(&config.artifacts.download_dir),
        }
    }
}

/// Cole X Dates: homeowner records queried by state and ZIP list.
pub struct ColeConnector {
    browser: BrowserController,
    selectors: ColeSelectors,
    settings: ColeSettings,
    credentials: Arc<dyn CredentialProvider>,
    region: Option<String>,
}

impl ColeConnector {
    pub fn new(browser: BrowserController, selectors: ColeSelectors, settings: ColeSettings) -> Self {
        Self {
            browser,
            selectors,
            settings,
            credentials: Arc::new(EnvCredentials),
            region: None,
        }
    }

    pub fn from_config(
        config: &AgentConfig,
        factory: Arc<dyn SessionFactory>,
    ) -> ConnectorResult<Self> {
        let selectors = load_selectors::<ColeSelectors>(
            config.connectors.cole.selectors_file.as_deref().map(Path::new),
        )?;
        let browser = BrowserController::new(factory, config.browser.timeouts);
        Ok(Self::new(browser, selectors, ColeSettings::from_config(config)))
    }

    pub fn with_credentials(mut self, credentials: Arc<dyn CredentialProvider>) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn browser(&self) -> &BrowserController {
        &self.browser
    }

    async fn build_query(
        &self,
        region: &str,
        zips: &[String],
        fields: &[String],
        filters: Option<&QueryFilters>,
        errors: &ErrorHandler,
    ) -> ConnectorResult<()> {
        let browser = &self.browser;
        let query = &self.selectors.query;

        let new_query = query.new_query_button.as_str();
        errors
            .run_step(browser, "cole.query.new", Some(new_query), move || {
                browser.click(new_query)
            })
            .await?;
        browser.pause(UI_SETTLE).await;

        let state = query.state_dropdown.as_str();
        errors
            .run_step(browser, "cole.query.state", Some(state), move || {
                browser.select_option(state, region)
            })
            .await?;

        let list_type = query.list_type_radio.as_str();
        errors
            .run_step(browser, "cole.query.list_type", Some(list_type), move || {
                browser.click(list_type)
            })
            .await?;

        let zip_input = query.zip_input.as_str();
        let zip_list = zips.join(",");
        let zip_list = zip_list.as_str();
        errors
            .run_step(browser, "cole.query.zips", Some(zip_input), move || {
                browser.fill(zip_input, zip_list)
            })
            .await?;

        for field in fields {
            let checkbox = self.selectors.field_checkbox(field)?;
            let checkbox = checkbox.as_str();
            let present = errors
                .run_step(browser, "cole.query.field", Some(checkbox), move || {
                    browser.is_present(checkbox)
                })
                .await?;
            if !present {
                warn!(field = %field, "field checkbox not found; skipping");
                continue;
            }
            errors
                .run_step(browser, "cole.query.field", Some(checkbox), move || {
                    browser.check(checkbox)
                })
                .await?;
        }

        if let Some(filters) = filters {
            let inputs = [
                (
                    query.home_value_max.as_str(),
                    filters.home_value_max.map(|v| v.to_string()),
                ),
                (
                    query.purchase_year_min.as_str(),
                    filters.purchase_year_min.map(|v| v.to_string()),
                ),
                (
                    query.years_at_address_min.as_str(),
                    filters.years_at_address_min.map(|v| v.to_string()),
                ),
            ];
            for (input, value) in &inputs {
                let Some(value) = value.as_deref() else {
                    continue;
                };
                let input = *input;
                errors
                    .run_step(browser, "cole.query.filter", Some(input), move || {
                        browser.fill(input, value)
                    })
                    .await?;
            }
        }

        let search = query.search_button.as_str();
        errors
            .run_step(browser, "cole.query.search", Some(search), move || {
                browser.click(search)
            })
            .await?;

        let result_count = self.selectors.results.result_count.as_str();
        let limit = browser.timeouts().result_count();
        errors
            .run_step(browser, "cole.query.results", Some(result_count), move || {
                browser.wait_for(result_count, limit)
            })
            .await?;
        Ok(())
    }

    async fn read_result_count(&self, errors: &ErrorHandler) -> ConnectorResult<u64> {
        let browser = &self.browser;
        let locator = self.selectors.results.result_count.as_str();
        let text = errors
            .run_step(browser, "cole.query.count", Some(locator), move || {
                browser.text_content(locator)
            })
            .await?
            .unwrap_or_default();
        Ok(parse_result_count(&text).unwrap_or_else(|| {
            warn!(text = %text, "result count not recognised; assuming zero");
            0
        }))
    }

    async fn export(&self, errors: &ErrorHandler) -> ConnectorResult<Vec<Value>> {
        let browser = &self.browser;
        let results = &self.selectors.results;

        let select_all = results.select_all_checkbox.as_str();
        errors
            .run_step(browser, "cole.export.select_all", Some(select_all), move || {
                browser.click(select_all)
            })
            .await?;
        let download = results.download_button.as_str();
        errors
            .run_step(browser, "cole.export.download", Some(download), move || {
                browser.click(download)
            })
            .await?;
        let format = results.export_format_radio.as_str();
        errors
            .run_step(browser, "cole.export.format", Some(format), move || {
                browser.click(format)
            })
            .await?;
        let export = results.export_button.as_str();
        let dir = self.settings.download_dir.as_path();
        let path = errors
            .run_step(browser, "cole.export.file", Some(export), move || {
                browser.download(export, dir)
            })
            .await?;
        let records = parse_csv(&path)?;
        info!(path = %path.display(), records = records.len(), "csv parsed");
        Ok(records)
    }
}

#[async_trait]
impl Connector for ColeConnector {
    fn site(&self) -> &str {
        SITE
    }

    async fn connect(&mut self, region: &str, errors: &ErrorHandler) -> ConnectorResult<()> {
        info!(region, "connecting to Cole");
        let credentials = self.credentials.resolve(SITE, Some(region))?;
        let browser = &self.browser;
        errors
            .run_step(browser, "cole.connect.launch", None, move || browser.launch())
            .await?;
        let url = self.settings.base_url.as_str();
        errors
            .run_step(browser, "cole.connect.navigate", None, move || {
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
        self.region = Some(region.to_string());
        info!(region, "connected to Cole");
        Ok(())
    }

    async fn query_data(
        &mut self,
        params: &QueryParams,
        errors: &ErrorHandler,
    ) -> ConnectorResult<QueryResult> {
        if self.region.as_deref() != Some(params.region.as_str()) {
            return Err(ConnectorError::NotConnected(
                "cole query issued without a session for its region",
            ));
        }
        if params.targets.is_empty() {
            return Err(ConnectorError::Validation(format!(
                "cole query for {} has no ZIP codes",
                params.region
            )));
        }
        let fields: Vec<String> = if params.fields.is_empty() {
            COLE_DEFAULT_FIELDS.iter().map(|f| f.to_string()).collect()
        } else {
            params.fields.clone()
        };
        let filters = params.filters.as_ref();
        info!(
            region = %params.region,
            zips = params.targets.len(),
            "querying Cole"
        );

        self.build_query(&params.region, &params.targets, &fields, filters, errors)
            .await?;
        let estimate = self.read_result_count(errors).await?;
        if estimate == 0 {
            info!(region = %params.region, "Cole query returned no results");
            return Ok(QueryResult {
                records: Vec::new(),
                total_count: 0,
                chunks: 1,
            });
        }

        let threshold = self.settings.chunk_threshold;
        let (records, chunks) = if estimate > threshold {
            let zip_chunks = chunk_targets(&params.targets, estimate, threshold);
            warn!(
                estimate,
                threshold,
                chunks = zip_chunks.len(),
                "result estimate exceeds export limit; chunking ZIPs"
            );
            let mut records = Vec::new();
            for (index, chunk) in zip_chunks.iter().enumerate() {
                self.build_query(&params.region, chunk, &fields, filters, errors)
                    .await?;
                if self.read_result_count(errors).await? == 0 {
                    debug!(chunk = index, "chunk returned no results");
                    continue;
                }
                records.extend(self.export(errors).await?);
            }
            (records, zip_chunks.len() as u64)
        } else {
            (self.export(errors).await?, 1)
        };

        info!(
            region = %params.region,
            records = records.len(),
            chunks,
            "Cole query complete"
        );
        Ok(QueryResult {
            total_count: records.len() as u64,
            records,
            chunks,
        })
    }

    async fn disconnect(&mut self) -> ConnectorResult<()> {
        self.region = None;
        self.browser.close().await?;
        info!("disconnected from Cole");
        Ok(())
    }
}

/// Extracts `N` from text such as `"12,408 results"`.
pub fn parse_result_count(text: &str) -> Option<u64> {
    let digits: String = result_count_regex()
        .captures(text)?
        .get(1)?
        .as_str()
        .chars()
        .filter(char::is_ascii_digit)
        .collect();
    digits.parse().ok()
}

/// Splits ZIPs so each chunk's share of `estimate` stays near `threshold`.
pub fn chunk_targets(targets: &[String], estimate: u64, threshold: u64) -> Vec<Vec<String>> {
    if targets.is_empty() {
        return Vec::new();
    }
    let estimate = estimate.max(1) as u128;
    let scaled = targets.len() as u128 * threshold as u128;
    let per_chunk = scaled.div_ceil(estimate).max(1) as usize;
    targets.chunks(per_chunk).map(<[String]>::to_vec).collect()
}

fn parse_csv(path: &Path) -> ConnectorResult<Vec<Value>> {
    let csv_error = |source| ConnectorError::Csv {
        path: path.to_path_buf(),
        source,
    };
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_path(path)
        .map_err(csv_error)?;
    let headers = reader.headers().map_err(csv_error)?.clone();
    let mut records = Vec::new();
    for row in reader.records() {
        let row = row.map_err(csv_error)?;
        if row.iter().all(str::is_empty) {
            continue;
        }
        let object: Map<String, Value> = headers
            .iter()
            .zip(row.iter())
            .map(|(header, value)| (header.to_string(), Value::String(value.to_string())))
            .collect();
        records.push(Value::Object(object));
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zips(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("{:05}", 10_000 + i)).collect()
    }

    #[test]
    fn result_count_accepts_separators() {
        assert_eq!(parse_result_count("12,408 Results found"), Some(12_408));
        assert_eq!(parse_result_count("Showing 87 results"), Some(87));
        assert_eq!(parse_result_count("1 result"), Some(1));
        assert_eq!(parse_result_count("no matches"), None);
        assert!(std::ptr::eq(result_count_regex(), result_count_regex()));
    }

    #[test]
    fn chunks_keep_each_slice_under_threshold() {
        let chunks = chunk_targets(&zips(10), 25_000, 10_000);
        assert_eq!(chunks.iter().map(Vec::len).collect::<Vec<_>>(), vec![4, 4, 2]);
        assert_eq!(chunks.concat(), zips(10));
    }

    #[test]
    fn chunking_never_produces_empty_slices() {
        let chunks = chunk_targets(&zips(3), 1_000_000, 10_000);
        assert_eq!(chunks.len(), 3);
        assert!(chunk_targets(&[], 50_000, 10_000).is_empty());
    }

    #[test]
    fn csv_rows_become_objects() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("export.csv");
        std::fs::write(
            &path,
            "first_name, zip ,email\n Ada ,10001,ada@example.com\n\nGrace,10002,\n",
        )
        .unwrap();
        let records = parse_csv(&path).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["first_name"], "Ada");
        assert_eq!(records[0]["zip"], "10001");
        assert_eq!(records[1]["email"], "");
    }
}
