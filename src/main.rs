use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;
use wiktlex::config::{CaptureOptions, ExtractionConfig, Limits};
use wiktlex::error::ConfigError;
use wiktlex::extract::{self, ExtractOptions};
use wiktlex::extractors::Registry;
use wiktlex::languages::LanguageTable;
use wiktlex::overrides::load_overrides;
use wiktlex::page::process_page;
use wiktlex::store::PageStore;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// Languages extracted when none are named.
const DEFAULT_LANGUAGES: &[&str] = &["English", "Translingual"];

#[derive(Parser)]
#[command(name = "wiktlex")]
#[command(about = "Expand Wiktionary templates and extract dictionary entries")]
struct Cli {
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract dictionary entries from a Wiktionary dump into JSON lines
    Extract(ExtractArgs),
    /// Process a single page and print its records
    Page(PageArgs),
    /// Print the template-expanded text of a single page
    Expand(PageArgs),
}

#[derive(Args)]
struct ExtractArgs {
    /// Path to the Wiktionary dump file (.xml or .xml.bz2)
    #[arg(short, long)]
    input: String,

    /// Output directory for generated files
    #[arg(short, long)]
    output: String,

    /// Language to extract, by name (repeatable)
    #[arg(long = "language")]
    languages: Vec<String>,

    /// Extract every language
    #[arg(long, conflicts_with = "languages")]
    all_languages: bool,

    #[command(flatten)]
    capture: CaptureArgs,

    /// Write indented JSON instead of one record per line
    #[arg(long)]
    pretty: bool,

    /// File of `TITLE:`-delimited pages that shadow pages in the dump
    #[arg(long = "override")]
    override_file: Option<PathBuf>,

    /// Write every page body under this directory
    #[arg(long)]
    capture_pages: Option<PathBuf>,

    /// Write collected diagnostics to this JSON file
    #[arg(long)]
    diagnostics: Option<PathBuf>,

    /// Limit number of pages to process (for testing)
    #[arg(long)]
    limit: Option<u64>,

    /// Force a reload of the page store from the dump
    #[arg(long)]
    no_cache: bool,

    /// JSON language table replacing the built-in one
    #[arg(long)]
    languages_file: Option<PathBuf>,

    /// Worker threads (default: one per core)
    #[arg(long)]
    threads: Option<usize>,
}

#[derive(Args)]
struct CaptureArgs {
    /// Capture translations
    #[arg(long)]
    translations: bool,

    /// Capture pronunciations
    #[arg(long)]
    pronunciations: bool,

    /// Capture synonyms, antonyms and other linkages
    #[arg(long)]
    linkages: bool,

    /// Capture compounds
    #[arg(long)]
    compounds: bool,

    /// Emit records for redirect pages
    #[arg(long)]
    redirects: bool,

    /// Capture usage examples and quotations
    #[arg(long)]
    examples: bool,

    /// Capture everything
    #[arg(long)]
    all: bool,
}

impl CaptureArgs {
    fn options(&self) -> CaptureOptions {
        if self.all {
            return CaptureOptions::all();
        }
        CaptureOptions {
            translations: self.translations,
            pronunciations: self.pronunciations,
            linkages: self.linkages,
            compounds: self.compounds,
            redirects: self.redirects,
            examples: self.examples,
        }
    }
}

#[derive(Args)]
struct PageArgs {
    /// Page title
    #[arg(long)]
    title: String,

    /// File of `TITLE:`-delimited pages that shadow pages in the dump
    #[arg(long = "override")]
    override_file: Option<PathBuf>,

    /// Wiktionary dump to read the page and its templates from
    #[arg(short, long)]
    input: Option<String>,

    /// JSON language table replacing the built-in one
    #[arg(long)]
    languages_file: Option<PathBuf>,
}

fn language_table(path: Option<&Path>) -> Result<Arc<LanguageTable>> {
    let table = match path {
        Some(path) => LanguageTable::from_json_file(path)?,
        None => LanguageTable::builtin(),
    };
    Ok(Arc::new(table))
}

fn run_extract(args: ExtractArgs) -> Result<()> {
    if !Path::new(&args.input).exists() {
        return Err(ConfigError::MissingInput(args.input.clone()).into());
    }
    let table = language_table(args.languages_file.as_deref())?;
    let names: Vec<String> = if args.all_languages {
        Vec::new()
    } else if args.languages.is_empty() {
        DEFAULT_LANGUAGES.iter().map(|s| s.to_string()).collect()
    } else {
        args.languages.clone()
    };
    let config = ExtractionConfig::new(&names, args.capture.options(), table)?;

    fs::create_dir_all(&args.output)
        .with_context(|| format!("Failed to create output directory: {}", args.output))?;

    let start_loading = Instant::now();
    let mut store = extract::prepare_store(&args.input, &args.output, args.no_cache)?;
    if let Some(path) = &args.override_file {
        load_overrides(&mut store, path)?;
    }
    let loading_duration = start_loading.elapsed();
    let (stored_pages, redirects) = store.stats();
    info!(
        duration_secs = loading_duration.as_secs_f64(),
        "Page store ready"
    );

    let options = ExtractOptions {
        input: args.input.clone(),
        output_dir: args.output.clone(),
        pretty: args.pretty,
        limit: args.limit,
        threads: args.threads,
        capture_dir: args.capture_pages.clone(),
    };
    let start_extracting = Instant::now();
    let summary = extract::run_extraction(&store, &config, &options)?;
    let extraction_duration = start_extracting.elapsed();
    info!(
        duration_secs = extraction_duration.as_secs_f64(),
        "Extraction complete"
    );

    if let Some(path) = &args.diagnostics {
        summary.diagnostics.export(path)?;
        info!(path = %path.display(), "Diagnostics written");
    }

    let stats = &summary.stats;
    println!();
    println!("=== Summary ===");
    println!("Loading time:       {:.2}s", loading_duration.as_secs_f64());
    println!("Extraction time:    {:.2}s", extraction_duration.as_secs_f64());
    println!(
        "Total time:         {:.2}s",
        (loading_duration + extraction_duration).as_secs_f64()
    );
    println!();
    println!("Stored pages:       {}", stored_pages);
    println!("Stored redirects:   {}", redirects);
    println!("Pages processed:    {}", stats.pages());
    println!("Records written:    {}", summary.records_written);
    println!("Redirect pages:     {}", stats.redirects);
    println!("Pages w/o records:  {}", stats.pages_without_records);
    println!("Degraded pages:     {}", stats.degraded());
    println!("Failed pages:       {}", stats.failed());
    println!("Errors:             {}", summary.diagnostics.errors.len());
    println!("Warnings:           {}", summary.diagnostics.warnings.len());
    let unknown = stats.top_unknown_sections(10);
    if !unknown.is_empty() {
        println!();
        println!("Unknown sections:");
        for (title, count) in unknown {
            println!("  {:<24} {}", title, count);
        }
    }
    if stats.failed() > 0 {
        warn!(failed = stats.failed(), "Some pages failed");
    }

    Ok(())
}

/// Store and body for the single-page commands.
fn load_single(args: &PageArgs) -> Result<(PageStore, String)> {
    let mut store = match &args.input {
        Some(input) => PageStore::load_dump(input)?,
        None => PageStore::new(),
    };
    if let Some(path) = &args.override_file {
        load_overrides(&mut store, path)?;
    }
    let body = extract::find_page(&store, args.input.as_deref(), &args.title)?
        .ok_or_else(|| anyhow!("Page not found: {}", args.title))?;
    Ok((store, body))
}

fn run_page(args: PageArgs) -> Result<()> {
    let table = language_table(args.languages_file.as_deref())?;
    let config = ExtractionConfig::new(&[], CaptureOptions::all(), table)?;
    let (store, body) = load_single(&args)?;
    let outcome = process_page(&store, &config, &Registry::standard(), &args.title, &body);

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    for entry in &outcome.entries {
        extract::write_record(&mut out, entry, true)?;
    }
    eprintln!(
        "{} record(s), {} diagnostic(s){}",
        outcome.entries.len(),
        outcome.diagnostics.entries().len(),
        if outcome.degraded { ", degraded" } else { "" }
    );
    for diagnostic in outcome.diagnostics.entries() {
        eprintln!("  [{}] {} ({})", diagnostic.kind.as_str(), diagnostic.message, diagnostic.context);
    }
    Ok(())
}

fn run_expand(args: PageArgs) -> Result<()> {
    let table = language_table(args.languages_file.as_deref())?;
    let (store, body) = load_single(&args)?;
    let expansion = wiktlex::expand::expand_page(&store, table, Limits::default(), &args.title, &body);
    println!("{}", expansion.text);
    if expansion.degraded {
        warn!(title = %args.title, "Expansion was cut short by a budget");
    }
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");

    let result = match cli.command {
        Commands::Extract(args) => run_extract(args),
        Commands::Page(args) => run_page(args),
        Commands::Expand(args) => run_expand(args),
    };

    match result {
        Ok(()) => {
            info!("Completed successfully");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Error: {:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
