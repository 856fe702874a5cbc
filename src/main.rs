use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use action_flow::{MacroLibrary, MacroResolver};
use action_primitives::PageFixture;
use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use command_lang::{expand_sequence, parse, redact, substitute_with_report, ScopedVariables};
use serde::Serialize;
use serde_json::json;
use sheetpilot_cli::{
    build_queue, load_config, macros_from_rows, parse_csv, parse_row_range, AppConfig,
    CachedSheetSource, CsvFileSource, LocalRun, QueueSpec, RunOutcome, SheetRef,
};
use sheetpilot_core_types::{parse_column_range, RowData};
use sheetpilot_scheduler::{FileStorage, MemoryStorage, StateStorage};
use tokio::fs;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// SheetPilot - spreadsheet-driven form filling
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Enable debug mode
    #[arg(short, long)]
    debug: bool,

    /// Output format
    #[arg(short, long, default_value = "human")]
    output: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
enum OutputFormat {
    Human,
    Json,
    Yaml,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse one header cell and print the command it holds
    Parse {
        /// Command text, e.g. "fill(//input[@id='q'])"
        command: String,
    },

    /// Expand a column range such as "A-C,F"
    Columns {
        range: String,
    },

    /// Substitute sequence placeholders and ${variables} in a text
    Substitute(SubstituteArgs),

    /// Run rows of a CSV sheet against a page fixture
    Run(RunArgs),

    /// Configuration management
    Config(ConfigArgs),

    /// Show build and storage information
    Info,
}

#[derive(Args)]
struct SubstituteArgs {
    text: String,

    /// Global variable, NAME=VALUE
    #[arg(long = "var", value_name = "NAME=VALUE")]
    vars: Vec<String>,

    /// Row cell, COLUMN=VALUE
    #[arg(long = "cell", value_name = "COLUMN=VALUE")]
    cells: Vec<String>,

    /// Batch sequence number ({n})
    #[arg(long, default_value_t = 1)]
    seq: u64,

    /// Sheet row number ({i})
    #[arg(long, default_value_t = 2)]
    row: u32,
}

#[derive(Args)]
struct RunArgs {
    /// CSV export of the sheet; row 1 holds the commands
    #[arg(long, value_name = "FILE")]
    sheet: PathBuf,

    /// Sheet tab id, used to key the cache
    #[arg(long, default_value = "0")]
    gid: String,

    /// Rows to run, e.g. "2-5, 8"
    #[arg(long)]
    rows: String,

    /// Page fixture (JSON) standing in for the target site
    #[arg(long, value_name = "FILE")]
    page: PathBuf,

    /// Macro library: a JSON object or a CSV macro sheet
    #[arg(long, value_name = "FILE")]
    macros: Option<PathBuf>,

    /// Only run these columns, e.g. "B-D"
    #[arg(long)]
    active_columns: Option<String>,

    /// Column naming each item
    #[arg(long)]
    id_column: Option<String>,

    /// Resume in-sheet pauses without asking
    #[arg(long)]
    auto_resume: bool,

    /// Keep state and caches in the storage directory
    #[arg(long)]
    persist: bool,

    /// Ignore the cached copy of the sheet
    #[arg(long)]
    refresh: bool,
}

#[derive(Args)]
struct ConfigArgs {
    #[command(subcommand)]
    action: ConfigAction,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show the effective configuration
    Show,
    /// Print the default config file location
    Path,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(&cli.log_level, cli.debug)?;
    info!("Starting SheetPilot v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config(cli.config.as_deref()).await?;

    let result = match cli.command {
        Commands::Parse { command } => cmd_parse(&command, cli.output),
        Commands::Columns { range } => cmd_columns(&range, cli.output),
        Commands::Substitute(args) => cmd_substitute(args, cli.output),
        Commands::Run(args) => cmd_run(args, &config, cli.output).await,
        Commands::Config(args) => cmd_config(args, &config, cli.output),
        Commands::Info => cmd_info(&config),
    };

    match result {
        Ok(()) => {
            info!("Command completed successfully");
            Ok(())
        }
        Err(e) => {
            error!("Command failed: {:#}", e);
            std::process::exit(1);
        }
    }
}

fn init_logging(level: &str, debug: bool) -> Result<()> {
    let level = if debug {
        tracing::Level::DEBUG
    } else {
        level.parse().context("Invalid log level")?
    };

    // stdout carries command output
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level.to_string())),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    Ok(())
}

fn emit<T: Serialize>(value: &T, output: OutputFormat, human: impl FnOnce()) -> Result<()> {
    match output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
        OutputFormat::Yaml => print!("{}", serde_yaml::to_string(value)?),
        OutputFormat::Human => human(),
    }
    Ok(())
}

fn split_pair(raw: &str) -> Result<(String, String)> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| anyhow!("expected NAME=VALUE, got '{}'", raw))?;
    Ok((name.trim().to_string(), value.to_string()))
}

fn cmd_parse(command: &str, output: OutputFormat) -> Result<()> {
    let parsed = parse(command);
    emit(&parsed, output, || println!("{:#?}", parsed))
}

fn cmd_columns(range: &str, output: OutputFormat) -> Result<()> {
    let columns = parse_column_range(range)?;
    emit(&columns, output, || println!("{}", columns.join(" ")))
}

fn cmd_substitute(args: SubstituteArgs, output: OutputFormat) -> Result<()> {
    let globals = args
        .vars
        .iter()
        .map(|raw| split_pair(raw))
        .collect::<Result<BTreeMap<_, _>>>()?;
    let row: RowData = args
        .cells
        .iter()
        .map(|raw| split_pair(raw).map(|(col, value)| (col.to_ascii_uppercase(), value)))
        .collect::<Result<_>>()?;

    let expanded = expand_sequence(&args.text, args.seq, args.row);
    let vars = ScopedVariables::new(&row, &globals, args.seq, args.row);
    let report = substitute_with_report(&expanded, &vars);
    for name in &report.replaced {
        let value = row
            .get(name)
            .or_else(|| globals.get(name))
            .map(String::as_str)
            .unwrap_or_default();
        info!("substituted {} = {}", name, redact(name, value));
    }

    let value = json!({
        "text": report.text,
        "replaced": report.replaced,
        "unresolved": report.unresolved,
        "stripped": report.stripped,
    });
    emit(&value, output, || {
        println!("{}", report.text);
        if !report.unresolved.is_empty() {
            eprintln!("unresolved: {}", report.unresolved.join(", "));
        }
    })
}

async fn load_macros(path: &Path) -> Result<MacroLibrary> {
    let raw = fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read macros {}", path.display()))?;
    let is_json = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    if is_json {
        Ok(MacroLibrary::from_json(&raw)?)
    } else {
        Ok(macros_from_rows(&parse_csv(&raw)?))
    }
}

async fn cmd_run(args: RunArgs, config: &AppConfig, output: OutputFormat) -> Result<()> {
    let storage: Arc<dyn StateStorage> = if args.persist {
        let dir = config
            .storage_dir()
            .ok_or_else(|| anyhow!("no storage directory; set storage_dir in the config"))?;
        info!("Persisting state under {}", dir.display());
        Arc::new(FileStorage::new(dir))
    } else {
        Arc::new(MemoryStorage::new())
    };

    let source = CachedSheetSource::new(CsvFileSource::new(), storage.clone(), config.cache.csv_ttl());
    let sheet = SheetRef::new(args.sheet.display().to_string(), args.gid.clone());
    let rows = source.load(&sheet, args.refresh).await?;

    let selected = parse_row_range(&args.rows)?;
    let spec = QueueSpec {
        active_columns: args.active_columns.clone(),
        identifier_column: args.id_column.clone(),
    };
    let queue = build_queue(&rows, &selected, &spec)?;
    info!("Queued {} rows from {}", queue.len(), args.sheet.display());

    let fixture: PageFixture = {
        let raw = fs::read_to_string(&args.page)
            .await
            .with_context(|| format!("Failed to read page fixture {}", args.page.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse page fixture {}", args.page.display()))?
    };
    let macros: Arc<dyn MacroResolver> = match &args.macros {
        Some(path) => Arc::new(load_macros(path).await?),
        None => Arc::new(MacroLibrary::new()),
    };

    let run = LocalRun::start(config, fixture, macros, storage);
    let outcome = run.run_queue(queue, args.auto_resume).await;
    run.shutdown().await?;
    let outcome = outcome?;

    emit(&outcome, output, || print_outcome(&outcome))
}

fn print_outcome(outcome: &RunOutcome) {
    println!("Status:    {}", outcome.status);
    println!("Progress:  {}/{}", outcome.completed, outcome.total);
    println!("Log:       {}", outcome.logs);
    println!("Final URL: {}", outcome.final_url);
    if !outcome.filled.is_empty() {
        println!("Filled fields:");
        for (xpath, value) in &outcome.filled {
            println!("  {} = {}", xpath, value);
        }
    }
    if !outcome.variables.is_empty() {
        println!("Variables:");
        for (name, value) in &outcome.variables {
            println!("  {} = {}", name, value);
        }
    }
    for err in &outcome.command_errors {
        println!("Command error: {}", err);
    }
}

fn cmd_config(args: ConfigArgs, config: &AppConfig, output: OutputFormat) -> Result<()> {
    match args.action {
        ConfigAction::Show => match output {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(config)?),
            _ => print!("{}", serde_yaml::to_string(config)?),
        },
        ConfigAction::Path => match AppConfig::default_path() {
            Some(path) => println!("{}", path.display()),
            None => println!("(no config directory on this platform)"),
        },
    }
    Ok(())
}

fn cmd_info(config: &AppConfig) -> Result<()> {
    println!("SheetPilot {}", env!("CARGO_PKG_VERSION"));
    println!("Build Date: {}", env!("BUILD_DATE"));
    println!("Git Commit: {}", env!("GIT_HASH"));
    match AppConfig::default_path() {
        Some(path) => println!("Config:     {}", path.display()),
        None => println!("Config:     (none)"),
    }
    match config.storage_dir() {
        Some(dir) => println!("Storage:    {}", dir.display()),
        None => println!("Storage:    (none)"),
    }
    Ok(())
}
