//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};

use regindex_core::metrics::{
    compute_global_metrics, load_global_metrics, load_title_metrics, refresh_title_metrics,
};
use regindex_core::changes::{change_report, compute_changes, load_changes, top_changes};
use regindex_core::versions::{import_versions, parse_version_date};
use regindex_core::{TitleError, TitleFilter, import, structure};
use regindex_shared::{
    AppConfig, EventSink, NodeKind, PATH_SEPARATOR, RegIndexError, RunnerConfig, StructureRecord,
    expand_home, init_config, load_config, load_config_from,
};
use regindex_storage::Storage;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// regindex: flatten bulk regulatory titles into queryable structures.
#[derive(Parser)]
#[command(
    name = "regindex",
    version,
    about = "Import bulk regulatory title XML, flatten its hierarchy, and compute metrics.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file to use instead of ~/.regindex/regindex.toml.
    #[arg(long, global = true, env = "REGINDEX_CONFIG")]
    pub config: Option<PathBuf>,

    /// Database file (overrides `defaults.database_path`).
    #[arg(long, global = true, env = "REGINDEX_DB")]
    pub db: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Import title-<N>.xml files from a directory.
    Import {
        /// Directory to scan (defaults to `defaults.data_dir`, or
        /// `defaults.versions_dir` with --date).
        dir: Option<PathBuf>,

        /// Only import these titles (comma-separated).
        #[arg(long, value_delimiter = ',')]
        titles: Vec<u32>,

        /// Import the dated snapshot in <DIR>/<DATE>/ as versions (YYYY-MM-DD).
        #[arg(long)]
        date: Option<String>,
    },

    /// Parse stored titles into structures and per-title metrics.
    Structure {
        /// Only process these titles (comma-separated).
        #[arg(long, value_delimiter = ',')]
        titles: Vec<u32>,

        /// Titles processed at once; 0 means unlimited.
        #[arg(long, allow_negative_numbers = true)]
        concurrency: Option<i64>,
    },

    /// Compute global metrics from stored per-title metrics.
    Metrics {
        /// Recompute per-title metrics from stored structures first.
        #[arg(long)]
        refresh: bool,
    },

    /// Compare word and section totals between two dated versions.
    Changes {
        /// Start version date (YYYY-MM-DD).
        start: String,

        /// End version date (YYYY-MM-DD).
        end: String,

        /// Only report the N titles with the largest word change.
        #[arg(long)]
        top: Option<usize>,

        /// Only compare these titles (comma-separated).
        #[arg(long, value_delimiter = ',')]
        titles: Vec<u32>,

        /// Report previously computed changes instead of recomputing.
        #[arg(long, conflicts_with = "titles")]
        cached: bool,
    },

    /// List imported titles.
    Titles,

    /// Show the stored structures of a title.
    Show {
        /// Title number.
        title: u32,

        /// Show the single structure at this path.
        #[arg(long, conflicts_with = "kind")]
        path: Option<String>,

        /// Only show structures of this kind (e.g. PART, SECTION).
        #[arg(long)]
        kind: Option<String>,
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

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "regindex=info",
        1 => "regindex=debug",
        _ => "regindex=trace",
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    if let Command::Config {
        action: ConfigAction::Init,
    } = cli.command
    {
        return cmd_config_init();
    }

    let config = match cli.config.as_deref() {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    };
    let db_path = match cli.db {
        Some(path) => path,
        None => config.database_path()?,
    };

    match cli.command {
        Command::Import {
            dir,
            titles,
            date: Some(date),
        } => cmd_import_versions(&config, &db_path, dir, &titles, &date).await,
        Command::Import {
            dir,
            titles,
            date: None,
        } => cmd_import(&config, &db_path, dir, &titles).await,
        Command::Structure {
            titles,
            concurrency,
        } => cmd_structure(&config, &db_path, &titles, concurrency).await,
        Command::Metrics { refresh } => cmd_metrics(&config, &db_path, refresh).await,
        Command::Changes {
            start,
            end,
            top,
            titles,
            cached,
        } => cmd_changes(&config, &db_path, &start, &end, top, &titles, cached).await,
        Command::Titles => cmd_titles(&db_path).await,
        Command::Show { title, path, kind } => {
            cmd_show(&db_path, title, path.as_deref(), kind.as_deref()).await
        }
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(),
            ConfigAction::Show => cmd_config_show(&config),
        },
    }
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_import(
    config: &AppConfig,
    db_path: &Path,
    dir: Option<PathBuf>,
    titles: &[u32],
) -> Result<()> {
    let dir = match dir {
        Some(dir) => dir,
        None => expand_home(&config.defaults.data_dir)?,
    };
    info!(dir = %dir.display(), db = %db_path.display(), "importing titles");

    let storage = Arc::new(Storage::open(db_path).await?);
    let progress = Arc::new(CliProgress::new());
    let summary = import::import_titles(
        storage,
        &dir,
        &TitleFilter::from_list(titles),
        config.import_runner()?,
        progress,
    )
    .await?;

    println!();
    println!("  Import finished");
    println!("  Imported:  {}", summary.imported.len());
    println!("  Unchanged: {}", summary.unchanged.len());
    println!("  Failed:    {}", summary.errors.len());
    print_failures(&summary.errors);
    println!();

    Ok(())
}

async fn cmd_import_versions(
    config: &AppConfig,
    db_path: &Path,
    dir: Option<PathBuf>,
    titles: &[u32],
    date: &str,
) -> Result<()> {
    let version_date = parse_version_date(date)?;
    let root = match dir {
        Some(dir) => dir,
        None => expand_home(&config.defaults.versions_dir)?,
    };
    info!(root = %root.display(), date, db = %db_path.display(), "importing title versions");

    let storage = Arc::new(Storage::open(db_path).await?);
    let progress = Arc::new(CliProgress::new());
    let summary = import_versions(
        storage,
        &root,
        version_date,
        &TitleFilter::from_list(titles),
        config.version_import_runner(date)?,
        progress,
    )
    .await?;

    println!();
    println!("  Version import finished ({})", summary.version_date);
    println!("  Imported:  {}", summary.imported.len());
    println!("  Unchanged: {}", summary.unchanged.len());
    println!("  Failed:    {}", summary.errors.len());
    print_failures(&summary.errors);
    println!();

    Ok(())
}

async fn cmd_structure(
    config: &AppConfig,
    db_path: &Path,
    titles: &[u32],
    concurrency: Option<i64>,
) -> Result<()> {
    let runner_config = match concurrency {
        Some(limit) => RunnerConfig::new(limit, "Structure Parser")?,
        None => config.structure_runner()?,
    };

    let storage = Arc::new(Storage::open(db_path).await?);
    let progress = Arc::new(CliProgress::new());
    let summary = structure::process_titles(
        storage,
        runner_config,
        &TitleFilter::from_list(titles),
        progress,
    )
    .await?;

    println!();
    println!("  Structure processing finished");
    println!("  Processed: {}", summary.processed.len());
    println!("  Words:     {}", summary.total_words());
    println!("  Failed:    {}", summary.errors.len());
    print_failures(&summary.errors);
    println!();

    Ok(())
}

async fn cmd_metrics(config: &AppConfig, db_path: &Path, refresh: bool) -> Result<()> {
    let storage = Arc::new(Storage::open(db_path).await?);

    if refresh {
        let progress = Arc::new(CliProgress::new());
        let summary =
            refresh_title_metrics(Arc::clone(&storage), config.metrics_runner()?, progress)
                .await?;
        println!(
            "  Refreshed {} title(s), skipped {}",
            summary.refreshed.len(),
            summary.skipped.len()
        );
        print_failures(&summary.errors);
    }

    let global = compute_global_metrics(&storage).await?;
    println!();
    println!("  Titles:   {}", global.titles);
    println!("  Words:    {}", global.word_count);
    println!("  Sections: {}", global.section_count);
    println!();

    Ok(())
}

async fn cmd_changes(
    config: &AppConfig,
    db_path: &Path,
    start: &str,
    end: &str,
    top: Option<usize>,
    titles: &[u32],
    cached: bool,
) -> Result<()> {
    let start = parse_version_date(start)?;
    let end = parse_version_date(end)?;

    let changes = if cached {
        let storage = Storage::open_readonly(db_path).await?;
        load_changes(&storage, start, end).await?.ok_or_else(|| {
            eyre!("no changes computed for {start} to {end}; run without --cached first")
        })?
    } else {
        let storage = Arc::new(Storage::open(db_path).await?);
        let progress = Arc::new(CliProgress::new());
        let summary = compute_changes(
            storage,
            start,
            end,
            &TitleFilter::from_list(titles),
            config.changes_runner()?,
            progress,
        )
        .await?;
        print_failures(&summary.errors);
        summary.changes
    };

    let shown = match top {
        Some(limit) => top_changes(&changes, limit),
        None => changes,
    };
    println!();
    print!("{}", change_report(start, end, &shown));
    Ok(())
}

async fn cmd_titles(db_path: &Path) -> Result<()> {
    let storage = Storage::open_readonly(db_path).await?;
    let titles = storage.list_titles().await?;

    if titles.is_empty() {
        println!("No titles imported.");
        return Ok(());
    }

    println!("{:>6}  {:>12}  {:>10}  {:>9}  IMPORTED", "TITLE", "BYTES", "WORDS", "SECTIONS");
    for title in &titles {
        let metrics = load_title_metrics(&storage, title.number).await?;
        let (words, sections) = match metrics {
            Some(m) => (m.word_count.to_string(), m.section_count.to_string()),
            None => ("-".to_string(), "-".to_string()),
        };
        println!(
            "{:>6}  {:>12}  {:>10}  {:>9}  {}",
            title.number, title.size_bytes, words, sections, title.imported_at
        );
    }

    if let Some(global) = load_global_metrics(&storage).await? {
        println!();
        println!(
            "  {} title(s), {} words, {} sections",
            global.titles, global.word_count, global.section_count
        );
    }
    Ok(())
}

async fn cmd_show(
    db_path: &Path,
    title: u32,
    path: Option<&str>,
    kind: Option<&str>,
) -> Result<()> {
    let storage = Storage::open_readonly(db_path).await?;

    if let Some(path) = path {
        let record = storage
            .find_structure_by_path(title, path)
            .await?
            .ok_or_else(|| eyre!("no structure at path '{path}' in title {title}"))?;
        println!("{}", serde_json::to_string_pretty(&record)?);
        return Ok(());
    }

    let records = match kind {
        Some(kind) => {
            storage
                .find_structures_by_kind(&NodeKind::from_attr(kind), Some(title))
                .await?
        }
        None => storage.list_structures(title).await?,
    };

    if records.is_empty() {
        return Err(RegIndexError::validation(format!(
            "no structures stored for title {title}; run `regindex structure` first"
        ))
        .into());
    }

    for record in &records {
        print_structure(record);
    }
    Ok(())
}

fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show(config: &AppConfig) -> Result<()> {
    let toml_str = toml::to_string_pretty(config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// Output helpers
// ---------------------------------------------------------------------------

fn print_structure(record: &StructureRecord) {
    let node = &record.node;
    let depth = node.path.matches(PATH_SEPARATOR).count();
    println!(
        "{:indent$}{} {}  [{} words]  {}",
        "",
        node.kind,
        node.identifier,
        node.word_count,
        node.heading.as_deref().unwrap_or(""),
        indent = depth * 2
    );
}

fn print_failures(errors: &[TitleError]) {
    for error in errors {
        println!("    ! {error}");
    }
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI event sink rendering runner progress on an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
    total: AtomicUsize,
    done: AtomicUsize,
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
        Self {
            spinner,
            total: AtomicUsize::new(0),
            done: AtomicUsize::new(0),
        }
    }

    /// `[done/total]` for the current run.
    fn position(&self) -> String {
        format!(
            "[{}/{}]",
            self.done.load(Ordering::Relaxed),
            self.total.load(Ordering::Relaxed)
        )
    }
}

// Runs with no items never emit `run_finished`.
impl Drop for CliProgress {
    fn drop(&mut self) {
        if !self.spinner.is_finished() {
            self.spinner.finish_and_clear();
        }
    }
}

impl EventSink for CliProgress {
    fn run_started(&self, prefix: &str, total: usize) {
        self.total.store(total, Ordering::Relaxed);
        self.done.store(0, Ordering::Relaxed);
        self.spinner.set_message(format!("{prefix}: starting {total} title(s)"));
    }

    fn run_message(&self, prefix: &str, message: &str) {
        self.spinner
            .set_message(format!("{prefix} {} {message}", self.position()));
    }

    fn item_finished(&self, prefix: &str, _succeeded: bool) {
        self.done.fetch_add(1, Ordering::Relaxed);
        self.spinner.set_message(format!("{prefix} {}", self.position()));
    }

    fn run_finished(&self, prefix: &str, succeeded: usize, failed: usize) {
        self.spinner.finish_and_clear();
        info!(runner = prefix, succeeded, failed, "run completed");
    }

    fn document_failed(&self, document: &str, error: &RegIndexError) {
        self.spinner.suspend(|| {
            warn!(document, error = %error, "document parse failed");
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_items_advance_the_counter() {
        let progress = CliProgress::new();
        progress.run_started("Structure Parser", 3);
        progress.run_message("Structure Parser", "Success: Title 1");
        progress.item_finished("Structure Parser", true);
        progress.item_finished("Structure Parser", false);
        assert_eq!(progress.position(), "[2/3]");

        progress.item_finished("Structure Parser", false);
        progress.run_finished("Structure Parser", 1, 2);
        assert_eq!(progress.position(), "[3/3]");
        assert!(progress.spinner.is_finished());
    }

    #[test]
    fn idle_spinner_is_finished_on_drop() {
        let progress = CliProgress::new();
        let spinner = progress.spinner.clone();
        assert!(!spinner.is_finished());
        drop(progress);
        assert!(spinner.is_finished());
    }

    #[test]
    fn changes_command_parses() {
        let cli = Cli::try_parse_from([
            "regindex", "changes", "2024-01-01", "2025-01-01", "--top", "5",
        ])
        .expect("parse");
        match cli.command {
            Command::Changes {
                start, end, top, cached, ..
            } => {
                assert_eq!(start, "2024-01-01");
                assert_eq!(end, "2025-01-01");
                assert_eq!(top, Some(5));
                assert!(!cached);
            }
            _ => panic!("expected changes command"),
        }
    }
}
