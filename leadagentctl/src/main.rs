use clap::Parser;
use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "leadagent_core=info,leadagentctl=info";

fn main() {
    let cli = leadagentctl::Cli::parse();
    init_tracing(cli.verbose);
    if let Err(err) = leadagentctl::run(cli) {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("leadagent_core=debug,leadagentctl=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
