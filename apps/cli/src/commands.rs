//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use taxwatch_core::{
    ChatClient, OllamaClient, Pipeline, PipelineOptions, ProgressReporter, RunOutcome, RunReport,
    RunStage, ShutdownSignal, StatusReport, collect_status,
};
use taxwatch_scraper::ConceptScraper;
use taxwatch_shared::text::truncate_chars;
use taxwatch_shared::{
    AppConfig, Concept, ConceptFilter, EnrichmentConfig, ScraperConfig, SearchQuery,
    apply_env_overrides, init_config, load_config, load_config_from, validate_config,
};
use taxwatch_storage::{CsvRecordStore, RecordStore};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// taxwatch: keep a local, searchable copy of DIAN tax concepts.
#[derive(Parser)]
#[command(
    name = "taxwatch",
    version,
    about = "Scrape DIAN concepts from cijuf.org.co into a local CSV store and query them.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Config file (defaults to ~/.taxwatch/taxwatch.toml).
    #[arg(long, env = "TAXWATCH_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

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
    /// Scrape, enrich and store new concepts.
    Run {
        /// Skip summary and analysis generation.
        #[arg(long)]
        no_enrich: bool,

        /// Do not announce the new concepts.
        #[arg(long)]
        no_notify: bool,

        /// Report new concepts without enriching, saving or notifying.
        #[arg(long)]
        dry_run: bool,
    },

    /// List stored concepts.
    List {
        #[command(flatten)]
        filter: FilterArgs,

        #[arg(long, default_value_t = 50)]
        limit: usize,

        #[arg(long, default_value_t = 0)]
        offset: usize,
    },

    /// Show one concept by link.
    Show {
        link: String,

        /// Print as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Search titles, descriptors, themes and enrichment text.
    Search {
        query: String,

        #[command(flatten)]
        filter: FilterArgs,

        #[arg(long, default_value_t = 20)]
        limit: usize,

        #[arg(long, default_value_t = 0)]
        offset: usize,
    },

    /// List distinct themes.
    Themes,

    /// Most recent concepts by date.
    Latest {
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },

    /// Remove a concept by link.
    Delete { link: String },

    /// Copy the store to a timestamped backup file.
    Backup,

    /// Replace the store with a backup (the current store is backed up first).
    Restore { path: PathBuf },

    /// Store, lock and enrichment health.
    Status {
        /// Print as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Filters shared by `list` and `search`.
#[derive(Args, Debug, Default)]
pub(crate) struct FilterArgs {
    /// Theme substring (case-insensitive).
    #[arg(long)]
    pub theme: Option<String>,

    /// Earliest date, YYYY-MM-DD.
    #[arg(long)]
    pub from: Option<NaiveDate>,

    /// Latest date, YYYY-MM-DD.
    #[arg(long)]
    pub to: Option<NaiveDate>,
}

impl From<FilterArgs> for ConceptFilter {
    fn from(args: FilterArgs) -> Self {
        Self {
            theme: args.theme.filter(|t| !t.trim().is_empty()),
            date_from: args.from,
            date_to: args.to,
        }
    }
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
        0 => "taxwatch=info",
        1 => "taxwatch=debug",
        _ => "taxwatch=trace",
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
        Command::Run {
            no_enrich,
            no_notify,
            dry_run,
        } => cmd_run(config_path, no_enrich, no_notify, dry_run).await,
        Command::List {
            filter,
            limit,
            offset,
        } => cmd_list(config_path, filter.into(), limit, offset),
        Command::Show { link, json } => cmd_show(config_path, &link, json),
        Command::Search {
            query,
            filter,
            limit,
            offset,
        } => {
            let query = SearchQuery::new(query, limit, offset).with_filter(filter.into());
            cmd_search(config_path, query)
        }
        Command::Themes => cmd_themes(config_path),
        Command::Latest { limit } => cmd_latest(config_path, limit),
        Command::Delete { link } => cmd_delete(config_path, &link),
        Command::Backup => cmd_backup(config_path),
        Command::Restore { path } => cmd_restore(config_path, &path),
        Command::Status { json } => cmd_status(config_path, json).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(),
            ConfigAction::Show => cmd_config_show(config_path),
        },
    }
}

/// Load the config from `--config` when given, else from the default location.
fn resolve_config(path: Option<&Path>) -> Result<AppConfig> {
    let Some(path) = path else {
        return Ok(load_config()?);
    };
    let mut config = load_config_from(path)?;
    apply_env_overrides(&mut config, |key| std::env::var(key).ok())?;
    validate_config(&config)?;
    Ok(config)
}

fn open_store(config: &AppConfig) -> CsvRecordStore {
    CsvRecordStore::new(config.storage.store_path())
}

// ---------------------------------------------------------------------------
// run
// ---------------------------------------------------------------------------

async fn cmd_run(
    config_path: Option<&Path>,
    no_enrich: bool,
    no_notify: bool,
    dry_run: bool,
) -> Result<()> {
    let config = resolve_config(config_path)?;
    let scraper = ConceptScraper::new(&ScraperConfig::from(&config))?;
    let store = Arc::new(open_store(&config));

    let shutdown = ShutdownSignal::new();
    let listener = shutdown.listen_for_signals();

    let mut pipeline = Pipeline::new(Box::new(scraper), store, config.storage.run_lock_path())
        .with_shutdown(shutdown);

    let enrich = config.enrichment.enabled && !no_enrich;
    if enrich {
        let enrichment = EnrichmentConfig::from(&config);
        let client = OllamaClient::new(&enrichment)?;
        pipeline = pipeline.with_enrichment(Arc::new(client), enrichment.max_text_chars);
    }

    let options = PipelineOptions {
        enrich,
        notify: config.notify.enabled && !no_notify,
        dry_run,
    };

    info!(
        store = %config.storage.store_path().display(),
        enrich = options.enrich,
        notify = options.notify,
        dry_run,
        "starting run"
    );

    let reporter = CliProgress::new();
    let result = pipeline.run(&options, &reporter).await;
    listener.abort();
    reporter.clear();
    let report = result?;

    print_report(&report);

    if let RunOutcome::Aborted { at } = report.outcome {
        return Err(eyre!("run aborted by shutdown signal before {at}"));
    }
    Ok(())
}

fn print_report(report: &RunReport) {
    let outcome = match report.outcome {
        RunOutcome::Completed => "completed".to_string(),
        RunOutcome::NothingNew => "nothing new".to_string(),
        RunOutcome::DryRun => "dry run".to_string(),
        RunOutcome::Aborted { at } => format!("aborted before {at}"),
    };

    println!();
    println!("  Run {outcome}");
    println!("  ID:       {}", report.run_id);
    println!("  Scraped:  {}", report.scraped);
    println!("  New:      {}", report.new);
    println!("  Saved:    {}", report.saved);
    println!("  Enriched: {}", yes_no(report.enriched));
    println!("  Notified: {}", yes_no(report.notified));
    println!("  Time:     {:.1}s", report.elapsed.as_secs_f64());
    println!();
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")
                .expect("valid spinner template")
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
        );
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }

    fn clear(&self) {
        if !self.spinner.is_finished() {
            self.spinner.finish_and_clear();
        }
    }
}

impl ProgressReporter for CliProgress {
    fn stage(&self, stage: RunStage) {
        self.spinner.set_message(capitalize(&stage.to_string()));
    }

    fn concept_enriched(&self, current: usize, total: usize, title: &str) {
        self.spinner.set_message(format!(
            "Enriching [{current}/{total}] {}",
            truncate_chars(title, 60)
        ));
    }

    fn done(&self, _report: &RunReport) {
        self.spinner.finish_and_clear();
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

fn cmd_list(
    config_path: Option<&Path>,
    filter: ConceptFilter,
    limit: usize,
    offset: usize,
) -> Result<()> {
    let store = open_store(&resolve_config(config_path)?);
    let concepts = store.get_all(&filter, limit, offset)?;
    if concepts.is_empty() {
        println!("No concepts stored.");
        return Ok(());
    }
    print_table(&concepts);
    Ok(())
}

fn cmd_show(config_path: Option<&Path>, link: &str, json: bool) -> Result<()> {
    let store = open_store(&resolve_config(config_path)?);
    let concept = store
        .get_by_id(link)?
        .ok_or_else(|| eyre!("no concept stored with link '{link}'"))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&concept)?);
        return Ok(());
    }

    println!("{}", concept.title);
    println!("  Date:       {}", concept.date);
    println!("  Theme:      {}", concept.theme);
    println!("  Descriptor: {}", concept.descriptor);
    println!("  Link:       {}", concept.link);
    if let Some(summary) = &concept.summary {
        println!("\nSummary\n{summary}");
    }
    if let Some(analysis) = &concept.analysis {
        println!("\nAnalysis\n{analysis}");
    }
    Ok(())
}

fn cmd_search(config_path: Option<&Path>, query: SearchQuery) -> Result<()> {
    let store = open_store(&resolve_config(config_path)?);
    let page = store.search(&query)?;
    if page.concepts.is_empty() {
        println!("No matches for '{}'.", query.query);
        return Ok(());
    }

    print_table(&page.concepts);
    println!(
        "\n  Showing {}-{} of {}{}",
        page.offset + 1,
        page.offset + page.concepts.len(),
        page.total,
        if page.has_more {
            format!(" (next: --offset {})", page.offset + page.concepts.len())
        } else {
            String::new()
        }
    );
    Ok(())
}

fn cmd_themes(config_path: Option<&Path>) -> Result<()> {
    let store = open_store(&resolve_config(config_path)?);
    for theme in store.themes()? {
        println!("{theme}");
    }
    Ok(())
}

fn cmd_latest(config_path: Option<&Path>, limit: usize) -> Result<()> {
    let store = open_store(&resolve_config(config_path)?);
    let concepts = store.latest(limit)?;
    if concepts.is_empty() {
        println!("No concepts stored.");
        return Ok(());
    }
    print_table(&concepts);
    Ok(())
}

fn print_table(concepts: &[Concept]) {
    for c in concepts {
        println!(
            "{date}  {theme:<28}  {title}",
            date = c.date,
            theme = truncate_chars(&c.theme, 28),
            title = truncate_chars(&c.title, 80),
        );
        println!("            {}", c.link);
    }
}

// ---------------------------------------------------------------------------
// Mutations
// ---------------------------------------------------------------------------

fn cmd_delete(config_path: Option<&Path>, link: &str) -> Result<()> {
    let store = open_store(&resolve_config(config_path)?);
    if !store.delete(link)? {
        return Err(eyre!("no concept stored with link '{link}'"));
    }
    println!("Deleted {link}");
    Ok(())
}

fn cmd_backup(config_path: Option<&Path>) -> Result<()> {
    let store = open_store(&resolve_config(config_path)?);
    let path = store.backup()?;
    println!("Backup written to: {}", path.display());
    Ok(())
}

fn cmd_restore(config_path: Option<&Path>, path: &Path) -> Result<()> {
    let store = open_store(&resolve_config(config_path)?);
    let safety = store.restore(path)?;
    println!("Restored {} from {}", store.location().display(), path.display());
    println!("Previous state saved to: {}", safety.display());
    Ok(())
}

// ---------------------------------------------------------------------------
// status / config
// ---------------------------------------------------------------------------

async fn cmd_status(config_path: Option<&Path>, json: bool) -> Result<()> {
    let config = resolve_config(config_path)?;
    let store = open_store(&config);

    let client = if config.enrichment.enabled {
        Some(OllamaClient::new(&EnrichmentConfig::from(&config))?)
    } else {
        None
    };
    let report = collect_status(
        &store,
        &config.storage.run_lock_path(),
        client.as_ref().map(|c| c as &dyn ChatClient),
    )
    .await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_status(&report);
    }
    Ok(())
}

fn print_status(report: &StatusReport) {
    println!();
    println!("  Store:      {}", report.store_path.display());
    println!("  Concepts:   {}", report.concepts);
    println!("  Themes:     {}", report.themes);
    println!("  Store lock: {}", if report.store_locked { "held" } else { "free" });
    match (report.run_locked, report.run_lock_holder.as_deref()) {
        (true, Some(holder)) => println!("  Run lock:   held ({holder})"),
        (true, None) => println!("  Run lock:   held"),
        (false, _) => println!("  Run lock:   free"),
    }
    match &report.enrichment {
        None => println!("  Enrichment: disabled"),
        Some(e) if !e.available => println!("  Enrichment: unreachable ({})", e.model),
        Some(e) if !e.model_installed => {
            println!("  Enrichment: reachable, model '{}' not installed", e.model)
        }
        Some(e) => println!("  Enrichment: ready ({})", e.model),
    }
    println!();
}

fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show(config_path: Option<&Path>) -> Result<()> {
    let config = resolve_config(config_path)?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

fn yes_no(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn run_flags_parse() {
        let cli = Cli::try_parse_from(["taxwatch", "run", "--no-enrich", "--dry-run"]).unwrap();
        match cli.command {
            Command::Run {
                no_enrich,
                no_notify,
                dry_run,
            } => {
                assert!(no_enrich);
                assert!(!no_notify);
                assert!(dry_run);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn search_filters_become_concept_filter() {
        let cli = Cli::try_parse_from([
            "taxwatch", "search", "iva", "--theme", "Renta", "--from", "2025-01-01", "--limit", "5",
        ])
        .unwrap();
        let Command::Search {
            query,
            filter,
            limit,
            offset,
        } = cli.command
        else {
            panic!("expected search");
        };
        assert_eq!(query, "iva");
        assert_eq!((limit, offset), (5, 0));

        let filter = ConceptFilter::from(filter);
        assert_eq!(filter.theme.as_deref(), Some("Renta"));
        assert_eq!(filter.date_from, NaiveDate::from_ymd_opt(2025, 1, 1));
        assert_eq!(filter.date_to, None);
    }

    #[test]
    fn invalid_date_is_rejected() {
        assert!(Cli::try_parse_from(["taxwatch", "list", "--from", "15/01/2025"]).is_err());
    }

    #[test]
    fn blank_theme_filter_is_dropped() {
        let filter = ConceptFilter::from(FilterArgs {
            theme: Some("  ".into()),
            ..Default::default()
        });
        assert_eq!(filter, ConceptFilter::default());
    }
}
