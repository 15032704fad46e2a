use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::SecondsFormat;
use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use serde::Serialize;
use thiserror::Error;
use tracing::info;

use leadagent_core::browser::{ChromiumSessionFactory, RetryOptions, SessionFactory};
use leadagent_core::connector::{BisonConnector, ColeConnector, ConnectorError};
use leadagent_core::selectors::{load_selectors, BisonSelectors, ColeSelectors, SelectorError, SelectorMap};
use leadagent_core::workflow::{notifier_from_config, upload_contacts, NotifyError, UploadReport};
use leadagent_core::{
    load_agent_config, load_document, AgentConfig, AgentError, AgentRun, CheckIn, JobDescriptor,
    RunReport, SqliteRunStore, StoreError, UploadJob, WorkflowError, WorkflowOrchestrator,
};

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] leadagent_core::ConfigError),
    #[error("{0}")]
    Workflow(#[from] WorkflowError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("connector error: {0}")]
    Connector(#[from] ConnectorError),
    #[error("selector error: {0}")]
    Selector(#[from] SelectorError),
    #[error("notification setup failed: {0}")]
    Notify(#[from] NotifyError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("not found: {0}")]
    NotFound(String),
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Lead collection agent control interface", long_about = None)]
pub struct Cli {
    /// Path to agent.toml
    #[arg(long, default_value = "configs/agent.toml")]
    pub config: PathBuf,
    /// Override for the run database
    #[arg(long)]
    pub database: Option<PathBuf>,
    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
    /// Debug-level logging
    #[arg(long, short, default_value_t = false)]
    pub verbose: bool,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Site {
    Cole,
    Bison,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Executes one Cole pull from a job file
    Run(RunArgs),
    /// Imports a contact CSV into Email Bison
    Upload(UploadArgs),
    /// Inspects recorded runs
    #[command(subcommand)]
    Runs(RunsCommands),
    /// Inspects captured failures
    #[command(subcommand)]
    Errors(ErrorsCommands),
    /// Prints the effective selector map for a site
    #[command(subcommand)]
    Selectors(SelectorsCommands),
    /// Generates shell completions
    Completions(CompletionsArgs),
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Job descriptor (TOML or JSON)
    #[arg(long)]
    pub job: PathBuf,
}

#[derive(Args, Debug)]
pub struct UploadArgs {
    /// Upload job descriptor (TOML or JSON)
    #[arg(long)]
    pub job: PathBuf,
}

#[derive(Subcommand, Debug)]
pub enum RunsCommands {
    /// Lists the most recent runs
    List(RunsListArgs),
    /// Shows one run with its errors and check-ins
    Show(RunShowArgs),
}

#[derive(Args, Debug)]
pub struct RunsListArgs {
    #[arg(long, default_value_t = 10)]
    pub limit: usize,
}

#[derive(Args, Debug)]
pub struct RunShowArgs {
    pub run_id: String,
}

#[derive(Subcommand, Debug)]
pub enum ErrorsCommands {
    /// Lists the failures captured for a run
    List(RunShowArgs),
}

#[derive(Subcommand, Debug)]
pub enum SelectorsCommands {
    Show(SelectorsShowArgs),
}

#[derive(Args, Debug)]
pub struct SelectorsShowArgs {
    #[arg(value_enum)]
    pub site: Site,
}

#[derive(Args, Debug)]
pub struct CompletionsArgs {
    #[arg(value_enum)]
    pub shell: Shell,
}

pub fn run(cli: Cli) -> Result<()> {
    if let Commands::Completions(args) = &cli.command {
        let mut command = Cli::command();
        clap_complete::generate(args.shell, &mut command, "leadagentctl", &mut std::io::stdout());
        return Ok(());
    }

    let context = AppContext::new(&cli)?;
    match &cli.command {
        Commands::Run(args) => {
            let report = context.run_job(&args.job)?;
            render(&report, cli.format)?;
        }
        Commands::Upload(args) => {
            let report = context.upload(&args.job)?;
            render(&report, cli.format)?;
        }
        Commands::Runs(RunsCommands::List(args)) => {
            let runs = context.runs_list(args.limit)?;
            render(&runs, cli.format)?;
        }
        Commands::Runs(RunsCommands::Show(args)) => {
            let detail = context.run_show(&args.run_id)?;
            render(&detail, cli.format)?;
        }
        Commands::Errors(ErrorsCommands::List(args)) => {
            let errors = context.errors_list(&args.run_id)?;
            render(&errors, cli.format)?;
        }
        Commands::Selectors(SelectorsCommands::Show(args)) => {
            let selectors = context.selectors_show(args.site)?;
            render(&selectors, cli.format)?;
        }
        Commands::Completions(_) => {}
    }
    Ok(())
}

fn render<T>(value: &T, format: OutputFormat) -> Result<()>
where
    T: Serialize + DisplayFallback,
{
    match format {
        OutputFormat::Text => {
            println!("{}", value.display());
            Ok(())
        }
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{}", json);
            Ok(())
        }
    }
}

trait DisplayFallback {
    fn display(&self) -> String;
}

#[derive(Debug)]
struct AppContext {
    config: AgentConfig,
    database: PathBuf,
}

impl AppContext {
    fn new(cli: &Cli) -> Result<Self> {
        let config = load_agent_config(&cli.config)?;
        let database = cli
            .database
            .clone()
            .unwrap_or_else(|| PathBuf::from(&config.storage.database));
        Ok(Self { config, database })
    }

    fn writable_store(&self) -> Result<SqliteRunStore> {
        let store = SqliteRunStore::new(&self.database)?;
        store.initialize()?;
        Ok(store)
    }

    fn readonly_store(&self) -> Result<SqliteRunStore> {
        if !self.database.exists() {
            return Err(AppError::NotFound(format!(
                "run database {}",
                self.database.display()
            )));
        }
        Ok(SqliteRunStore::builder()
            .path(&self.database)
            .read_only(true)
            .build()?)
    }

    fn session_factory(&self) -> Arc<dyn SessionFactory> {
        Arc::new(ChromiumSessionFactory::new(
            self.config.browser.clone(),
            &self.config.artifacts.download_dir,
        ))
    }

    fn runtime() -> Result<tokio::runtime::Runtime> {
        Ok(tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()?)
    }

    fn run_job(&self, job_path: &Path) -> Result<RunReport> {
        let job = JobDescriptor::from_path(job_path)?;
        let store = Arc::new(self.writable_store()?);
        let notifier = notifier_from_config(&self.config.notifications)?;
        let connector = ColeConnector::from_config(&self.config, self.session_factory())?;
        info!(job = %job_path.display(), client = %job.client_name, "starting run");

        let mut orchestrator =
            WorkflowOrchestrator::new(connector, store, self.config.artifacts.clone())
                .with_notifier(notifier)
                .with_retry(RetryOptions::from(self.config.retry));
        let report = Self::runtime()?.block_on(orchestrator.execute(&job))?;
        Ok(report)
    }

    fn upload(&self, job_path: &Path) -> Result<UploadReport> {
        let mut job: UploadJob = load_document(job_path)?;
        if job.import.csv_path.is_relative() {
            if let Some(dir) = job_path.parent() {
                job.import.csv_path = dir.join(&job.import.csv_path);
            }
        }
        let store = Arc::new(self.writable_store()?);
        let mut bison = BisonConnector::from_config(&self.config, self.session_factory())?;
        let report = Self::runtime()?.block_on(upload_contacts(
            &mut bison,
            store,
            &self.config.artifacts,
            RetryOptions::from(self.config.retry),
            &job,
        ))?;
        Ok(report)
    }

    fn runs_list(&self, limit: usize) -> Result<RunList> {
        let store = self.readonly_store()?;
        Ok(RunList {
            rows: store.list_runs(limit)?,
        })
    }

    fn run_show(&self, run_id: &str) -> Result<RunDetail> {
        let store = self.readonly_store()?;
        let run = store
            .fetch_run(run_id)?
            .ok_or_else(|| AppError::NotFound(format!("run {run_id}")))?;
        Ok(RunDetail {
            records_stored: store.count_raw_records(Some(run_id))?,
            check_ins: store.list_check_ins(run_id)?,
            errors: store.list_errors(run_id)?,
            run,
        })
    }

    fn errors_list(&self, run_id: &str) -> Result<ErrorList> {
        let store = self.readonly_store()?;
        Ok(ErrorList {
            rows: store.list_errors(run_id)?,
        })
    }

    fn selectors_show(&self, site: Site) -> Result<SelectorListing> {
        let connectors = &self.config.connectors;
        let entries = match site {
            Site::Cole => load_selectors::<ColeSelectors>(
                connectors.cole.selectors_file.as_deref().map(Path::new),
            )?
            .flatten()?,
            Site::Bison => load_selectors::<BisonSelectors>(
                connectors.bison.selectors_file.as_deref().map(Path::new),
            )?
            .flatten()?,
        };
        Ok(SelectorListing {
            site: match site {
                Site::Cole => ColeSelectors::SITE,
                Site::Bison => BisonSelectors::SITE,
            },
            entries,
        })
    }
}

#[derive(Debug, Serialize)]
pub struct RunList {
    pub rows: Vec<AgentRun>,
}

#[derive(Debug, Serialize)]
pub struct RunDetail {
    pub run: AgentRun,
    pub records_stored: u64,
    pub check_ins: Vec<CheckIn>,
    pub errors: Vec<AgentError>,
}

#[derive(Debug, Serialize)]
pub struct ErrorList {
    pub rows: Vec<AgentError>,
}

#[derive(Debug, Serialize)]
pub struct SelectorListing {
    pub site: &'static str,
    pub entries: BTreeMap<String, String>,
}

fn run_line(run: &AgentRun) -> String {
    let finished = run
        .finished_at
        .map(|at| at.to_rfc3339_opts(SecondsFormat::Secs, true))
        .unwrap_or_else(|| "-".to_string());
    format!(
        "{} | {} | site={} | client={} | status={} | started={} | finished={}",
        run.run_id,
        run.workflow,
        run.site,
        run.client_id,
        run.status,
        run.started_at.to_rfc3339_opts(SecondsFormat::Secs, true),
        finished
    )
}

fn error_line(error: &AgentError) -> String {
    let mut line = format!("[{}] {}: {}", error.kind, error.step, error.message);
    if let Some(locator) = &error.locator {
        line.push_str(&format!(" (locator {locator})"));
    }
    if let Some(screenshot) = &error.screenshot_path {
        line.push_str(&format!(" screenshot={screenshot}"));
    }
    line
}

impl DisplayFallback for RunReport {
    fn display(&self) -> String {
        let m = &self.metrics;
        format!(
            "run {} {}: {} observed, {} stored, {} duplicates, {}/{} units, {} check-ins",
            self.run_id,
            self.status,
            m.records_observed,
            m.records_inserted,
            m.duplicates_skipped,
            m.work_units_completed,
            m.work_units_total,
            m.check_ins
        )
    }
}

impl DisplayFallback for UploadReport {
    fn display(&self) -> String {
        let mut line = format!(
            "run {} {}: {} contacts imported",
            self.run.run_id, self.run.status, self.imported
        );
        if let Some(campaign) = &self.campaign {
            line.push_str(&format!(" into campaign {} ({})", campaign.title, campaign.id));
        }
        line
    }
}

impl DisplayFallback for RunList {
    fn display(&self) -> String {
        if self.rows.is_empty() {
            return "No runs recorded".to_string();
        }
        self.rows.iter().map(run_line).collect::<Vec<_>>().join("\n")
    }
}

impl DisplayFallback for RunDetail {
    fn display(&self) -> String {
        let mut lines = vec![run_line(&self.run)];
        if let Some(error) = &self.run.error {
            lines.push(format!("error: {error}"));
        }
        if let Some(metrics) = &self.run.metrics {
            lines.push(format!(
                "records: {} observed, {} new, {} duplicates",
                metrics.records_observed, metrics.records_inserted, metrics.duplicates_skipped
            ));
        }
        lines.push(format!("stored by this run: {}", self.records_stored));
        if !self.check_ins.is_empty() {
            lines.push("check-ins:".to_string());
            for check_in in &self.check_ins {
                lines.push(format!(
                    "  - {}/{}: {} records",
                    check_in.region, check_in.target, check_in.records_found
                ));
            }
        }
        if !self.errors.is_empty() {
            lines.push("errors:".to_string());
            for error in &self.errors {
                lines.push(format!("  - {}", error_line(error)));
            }
        }
        lines.join("\n")
    }
}

impl DisplayFallback for ErrorList {
    fn display(&self) -> String {
        if self.rows.is_empty() {
            return "No errors captured".to_string();
        }
        self.rows.iter().map(error_line).collect::<Vec<_>>().join("\n")
    }
}

impl DisplayFallback for SelectorListing {
    fn display(&self) -> String {
        let mut lines = vec![format!("{} selectors:", self.site)];
        for (key, locator) in &self.entries {
            lines.push(format!("  {key} = {locator}"));
        }
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use leadagent_core::browser::ErrorKind;
    use leadagent_core::store::{NewAgentError, NewRun, RunMetrics, RunStatus, RunStore};
    use std::fs;
    use tempfile::TempDir;

    fn prepare_test_context() -> (TempDir, AppContext) {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        let configs_dir = root.join("configs");
        fs::create_dir_all(configs_dir.join("selectors")).unwrap();
        fs::copy("../configs/agent.toml", configs_dir.join("agent.toml")).unwrap();
        for site in ["cole", "bison"] {
            fs::copy(
                format!("../configs/selectors/{site}.toml"),
                configs_dir.join(format!("selectors/{site}.toml")),
            )
            .unwrap();
        }

        let cli = Cli {
            config: configs_dir.join("agent.toml"),
            database: Some(root.join("data/agent.sqlite")),
            format: OutputFormat::Json,
            verbose: false,
            command: Commands::Runs(RunsCommands::List(RunsListArgs { limit: 5 })),
        };
        let context = AppContext::new(&cli).unwrap();
        (temp, context)
    }

    async fn seed(store: &SqliteRunStore) {
        store
            .create_run(&NewRun {
                run_id: "run-1".to_string(),
                workflow: "cole_pull".to_string(),
                client_id: 42,
                site: "cole".to_string(),
            })
            .await
            .unwrap();
        store
            .insert_error(&NewAgentError {
                run_id: "run-1".to_string(),
                step: "cole.query.state".to_string(),
                kind: ErrorKind::SelectorMiss,
                message: "selector not found: select#state".to_string(),
                url: Some("https://cole.test/query".to_string()),
                locator: Some("select#state".to_string()),
                screenshot_path: None,
                trace_path: None,
            })
            .await
            .unwrap();
        store
            .update_run(
                "run-1",
                RunStatus::Failed,
                Some(&RunMetrics::default()),
                Some("selector not found: select#state"),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn run_show_collects_errors() {
        let (_temp, context) = prepare_test_context();
        seed(&context.writable_store().unwrap()).await;

        let detail = context.run_show("run-1").unwrap();
        assert_eq!(detail.run.status, RunStatus::Failed);
        assert_eq!(detail.errors.len(), 1);
        assert_eq!(detail.records_stored, 0);
        assert!(detail.display().contains("[SELECTOR_MISS] cole.query.state"));

        let runs = context.runs_list(5).unwrap();
        assert_eq!(runs.rows.len(), 1);
        assert!(matches!(
            context.run_show("run-404"),
            Err(AppError::NotFound(_))
        ));
    }

    #[test]
    fn reads_require_an_existing_database() {
        let (_temp, context) = prepare_test_context();
        assert!(matches!(context.errors_list("run-1"), Err(AppError::NotFound(_))));
    }

    #[test]
    fn selector_listing_applies_overrides() {
        let (_temp, context) = prepare_test_context();
        let listing = context.selectors_show(Site::Bison).unwrap();
        assert_eq!(listing.site, "bison");
        assert_eq!(
            listing.entries.get("login.emailInput").map(String::as_str),
            Some("input[name=\"email\"]")
        );
        assert!(listing.display().starts_with("bison selectors:"));
    }

    #[test]
    fn cli_parses_run_command() {
        let cli = Cli::try_parse_from([
            "leadagentctl",
            "--format",
            "json",
            "run",
            "--job",
            "configs/jobs/sample.toml",
        ])
        .unwrap();
        assert!(matches!(cli.command, Commands::Run(ref args) if args.job.ends_with("sample.toml")));
        assert!(Cli::try_parse_from(["leadagentctl", "selectors", "show", "unknown"]).is_err());
    }
}
