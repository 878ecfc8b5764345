//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use legisync_core::{ProgressReporter, RunMode, RunRequest, RunSummary};
use legisync_shared::{
    AppConfig, Jurisdiction, MAX_CHECKPOINT_INTERVAL_SECS, config_file_path, load_config,
    load_config_from, write_default_config,
};
use tracing::info;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// legisync: reconcile scraped legislative data and extract bill text.
#[derive(Parser)]
#[command(
    name = "legisync",
    version,
    about = "Reconcile scraped legislative data into a versioned tree and extract bill text.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file (defaults to ~/.legisync/legisync.toml).
    #[arg(long, global = true, env = "LEGISYNC_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Jurisdiction flags shared by both passes.
#[derive(clap::Args, Debug)]
pub(crate) struct JurisdictionArgs {
    /// State code (falls back to `[defaults] state`).
    #[arg(long)]
    pub state: Option<String>,

    /// Country code (falls back to `[defaults] country`).
    #[arg(long)]
    pub country: Option<String>,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Fold a directory of scraped objects into the output tree.
    Reconcile {
        /// Directory of raw scraped JSON objects.
        #[arg(short, long)]
        input: PathBuf,

        /// Root of the output tree.
        #[arg(short, long)]
        output: PathBuf,

        #[command(flatten)]
        jurisdiction: JurisdictionArgs,

        /// Skip objects already covered by the watermark.
        #[arg(long)]
        incremental: bool,

        /// Parallel work units.
        #[arg(short, long)]
        workers: Option<usize>,
    },

    /// Extract text for every bill version in the output tree.
    Extract {
        /// Root of the output tree.
        #[arg(short, long)]
        output: PathBuf,

        #[command(flatten)]
        jurisdiction: JurisdictionArgs,

        /// Skip bills whose text is already up to date.
        #[arg(long)]
        incremental: bool,

        /// Parallel downloads.
        #[arg(short, long)]
        workers: Option<usize>,

        /// Seconds between checkpoint commits (at most one week).
        #[arg(long, value_parser = clap::value_parser!(u64).range(1..=MAX_CHECKPOINT_INTERVAL_SECS))]
        checkpoint_secs: Option<u64>,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags. Logs always go to stderr.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "legisync=info",
        1 => "legisync=debug",
        _ => "legisync=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.as_deref();
    match cli.command {
        Command::Reconcile {
            input,
            output,
            jurisdiction,
            incremental,
            workers,
        } => {
            let config = resolve_config(config_path)?;
            let mut request = RunRequest::new(
                RunMode::Reconcile,
                output,
                jurisdiction.resolve(&config)?,
                &config,
            );
            request.input_dir = Some(input);
            request.incremental = incremental;
            if let Some(workers) = workers {
                request.reconcile.workers = workers.max(1);
            }
            cmd_run(request).await
        }
        Command::Extract {
            output,
            jurisdiction,
            incremental,
            workers,
            checkpoint_secs,
        } => {
            let config = resolve_config(config_path)?;
            let mut request = RunRequest::new(
                RunMode::Extract,
                output,
                jurisdiction.resolve(&config)?,
                &config,
            );
            request.incremental = incremental;
            if let Some(workers) = workers {
                request.extract.workers = workers.max(1);
            }
            if let Some(secs) = checkpoint_secs {
                request.extract.checkpoint_interval = std::time::Duration::from_secs(secs);
            }
            cmd_run(request).await
        }
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(config_path),
            ConfigAction::Show => cmd_config_show(config_path),
        },
    }
}

fn resolve_config(path: Option<&Path>) -> Result<AppConfig> {
    Ok(match path {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    })
}

impl JurisdictionArgs {
    /// Flags win over the config file.
    fn resolve(&self, config: &AppConfig) -> Result<Jurisdiction> {
        let state = self
            .state
            .clone()
            .or_else(|| config.defaults.state.clone())
            .ok_or_else(|| eyre!("no state given: pass --state or set [defaults] state"))?;
        let country = self
            .country
            .clone()
            .unwrap_or_else(|| config.defaults.country.clone());
        Ok(Jurisdiction::new(country, state))
    }
}

async fn cmd_run(request: RunRequest) -> Result<()> {
    info!(
        mode = %request.mode,
        jurisdiction = %request.jurisdiction,
        output = %request.output_dir.display(),
        "starting legisync run"
    );

    let reporter = CliProgress::new();
    let summary = legisync_core::run(&request, &reporter).await?;

    println!("{}", summary.to_json()?);
    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner on stderr.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
        );
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn advance(&self, phase: &str, done: usize, total: usize) {
        self.spinner.set_message(format!("{phase} [{done}/{total}]"));
    }

    fn done(&self, _summary: &RunSummary) {
        self.spinner.finish_and_clear();
    }
}

// ---------------------------------------------------------------------------
// Config commands
// ---------------------------------------------------------------------------

fn cmd_config_init(path: Option<&Path>) -> Result<()> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => config_file_path()?,
    };
    write_default_config(&path)?;
    eprintln!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show(path: Option<&Path>) -> Result<()> {
    let config = resolve_config(path)?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}
