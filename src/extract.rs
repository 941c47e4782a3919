//! Pass 2: stream main-namespace pages through the worker pool and write
//! records as they arrive.

use crate::cache;
use crate::capture::PageCapture;
use crate::config::{ExtractionConfig, PROGRESS_INTERVAL};
use crate::diagnostics::{DiagnosticKind, PageDiagnostics, RunDiagnostics};
use crate::extractors::Registry;
use crate::models::{normalize_title, Namespace, WikiPage};
use crate::page::process_page;
use crate::parser::WikiReader;
use crate::record::WordEntry;
use crate::stats::ExtractionStats;
use crate::store::{PageLookup, PageStore};
use anyhow::{anyhow, Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver};
use std::thread;
use tracing::{info, warn};

/// Deeply nested templates and module calls recurse on the worker's stack.
const WORKER_STACK_SIZE: usize = 64 * 1024 * 1024;

pub const OUTPUT_FILE: &str = "words.jsonl";

pub struct ExtractOptions {
    pub input: String,
    pub output_dir: String,
    pub pretty: bool,
    pub limit: Option<u64>,
    pub threads: Option<usize>,
    pub capture_dir: Option<PathBuf>,
}

#[derive(Debug, Default)]
pub struct RunSummary {
    pub stats: ExtractionStats,
    pub diagnostics: RunDiagnostics,
    pub records_written: u64,
}

/// Pass 1: builds the page store, reusing the snapshot next to the output
/// when it is still valid.
pub fn prepare_store(input: &str, output_dir: &str, no_cache: bool) -> Result<PageStore> {
    let cache_path = cache::cache_path(output_dir);
    if no_cache {
        info!("Cache disabled, loading page store from dump");
    } else if let Some(store) = cache::try_load_store(&cache_path, input)? {
        info!("Loaded page store from cache");
        return Ok(store);
    } else {
        info!("Loading page store (cache miss or invalid)");
    }
    let store = PageStore::load_dump(input)?;
    if let Err(e) = cache::save_store(&store, input, output_dir) {
        warn!(error = %e, "Failed to save page store cache");
    }
    Ok(store)
}

/// Runs the extraction pass and returns the merged counters and diagnostics.
pub fn run_extraction(
    store: &PageStore,
    config: &ExtractionConfig,
    options: &ExtractOptions,
) -> Result<RunSummary> {
    fs::create_dir_all(&options.output_dir)
        .with_context(|| format!("Failed to create output directory: {}", options.output_dir))?;
    let output_path = Path::new(&options.output_dir).join(OUTPUT_FILE);
    let file = File::create(&output_path)
        .with_context(|| format!("Failed to create output file: {}", output_path.display()))?;

    let capture = options
        .capture_dir
        .as_deref()
        .map(PageCapture::new)
        .transpose()?;
    let reader = WikiReader::new(&options.input, false)
        .with_context(|| format!("Failed to open wiki dump at: {}", options.input))?;

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(options.threads.unwrap_or(0))
        .stack_size(WORKER_STACK_SIZE)
        .thread_name(|i| format!("wiktlex-worker-{}", i))
        .build()
        .context("Failed to build worker pool")?;

    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.cyan} {pos} pages {msg}")
            .map_err(|e| anyhow!("Invalid progress template: {}", e))?,
    );

    let (tx, rx) = mpsc::channel::<Vec<WordEntry>>();
    let pretty = options.pretty;
    let writer = thread::Builder::new()
        .name("wiktlex-writer".to_string())
        .spawn(move || write_records(rx, BufWriter::with_capacity(256 * 1024, file), pretty))
        .context("Failed to spawn writer thread")?;

    let limit = options.limit.map_or(usize::MAX, |n| n as usize);
    let pages = reader
        .filter(|page| {
            if let (Some(capture), Some(text)) = (&capture, &page.text) {
                if let Err(e) = capture.write(page.namespace(), page.local_title(), text) {
                    warn!(title = %page.title, error = %e, "Failed to capture page");
                }
            }
            page.namespace() == Namespace::Main
        })
        .take(limit);

    let registry = Registry::standard();
    info!("Starting extraction pass");
    let (stats, diagnostics) = pool.install(|| {
        pages
            .par_bridge()
            .fold(
                || (ExtractionStats::new(), RunDiagnostics::new()),
                |(mut stats, mut diagnostics), page| {
                    let body = page_body(store, &page);
                    let title = page.local_title();
                    let result = catch_unwind(AssertUnwindSafe(|| {
                        process_page(store, config, &registry, title, &body)
                    }));
                    match result {
                        Ok(outcome) => {
                            stats.record(&outcome);
                            if !outcome.entries.is_empty() {
                                // A closed channel means the writer failed; its error surfaces on join.
                                let _ = tx.send(outcome.entries);
                            }
                            diagnostics.absorb(outcome.diagnostics);
                        }
                        Err(panic) => {
                            let message = panic_message(panic.as_ref());
                            stats.inc_pages();
                            stats.inc_failed();
                            let mut failed = PageDiagnostics::new(title);
                            failed.error(DiagnosticKind::PageFailed, message, title);
                            diagnostics.absorb(failed);
                        }
                    }
                    pb.inc(1);
                    if stats.pages() % PROGRESS_INTERVAL == 0 {
                        pb.set_message(format!("({} records)", stats.records()));
                    }
                    (stats, diagnostics)
                },
            )
            .reduce(
                || (ExtractionStats::new(), RunDiagnostics::new()),
                |(a, da), (b, db)| (a.merge(b), da.merge(db)),
            )
    });
    drop(tx);
    pb.finish_and_clear();

    let records_written = writer
        .join()
        .map_err(|_| anyhow!("Writer thread panicked"))??;
    info!(
        pages = stats.pages(),
        records = records_written,
        failed = stats.failed(),
        "Extraction pass finished"
    );

    Ok(RunSummary {
        stats,
        diagnostics,
        records_written,
    })
}

/// A transient main-namespace page shadows the dump's body.
fn page_body(store: &PageStore, page: &WikiPage) -> String {
    match store.get(Namespace::Main, page.local_title()) {
        Some(stored) if stored.is_transient => stored.body.clone(),
        _ => page.text.clone().unwrap_or_default(),
    }
}

fn write_records<W: Write>(rx: Receiver<Vec<WordEntry>>, mut out: W, pretty: bool) -> Result<u64> {
    let mut written = 0u64;
    for entries in rx {
        for entry in &entries {
            write_record(&mut out, entry, pretty)?;
            written += 1;
        }
    }
    out.flush().context("Failed to flush output")?;
    Ok(written)
}

pub fn write_record<W: Write>(out: &mut W, entry: &WordEntry, pretty: bool) -> Result<()> {
    if pretty {
        serde_json::to_writer_pretty(&mut *out, entry)
    } else {
        serde_json::to_writer(&mut *out, entry)
    }
    .context("Failed to serialize record")?;
    out.write_all(b"\n").context("Failed to write record")?;
    Ok(())
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Body of one main-namespace page: a transient override if present,
/// otherwise the page as found in the dump.
pub fn find_page(store: &PageStore, input: Option<&str>, title: &str) -> Result<Option<String>> {
    if let Some(page) = store.get(Namespace::Main, title) {
        if page.is_transient {
            return Ok(Some(page.body.clone()));
        }
    }
    let Some(input) = input else {
        return Ok(None);
    };
    let wanted = normalize_title(Namespace::Main, title);
    let reader = WikiReader::new(input, false)
        .with_context(|| format!("Failed to open wiki dump at: {}", input))?;
    for page in reader {
        if page.namespace() == Namespace::Main
            && normalize_title(Namespace::Main, page.local_title()) == wanted
        {
            return Ok(Some(page.text.unwrap_or_default()));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_are_one_per_line() {
        let mut out = Vec::new();
        write_record(&mut out, &WordEntry::new("cat"), false).unwrap();
        write_record(&mut out, &WordEntry::redirect("Cat", "cat"), false).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines, vec![r#"{"word":"cat"}"#, r#"{"word":"Cat","redirect":"cat"}"#]);
    }

    #[test]
    fn pretty_records_are_indented() {
        let mut out = Vec::new();
        write_record(&mut out, &WordEntry::new("cat"), true).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "{\n  \"word\": \"cat\"\n}\n");
    }

    #[test]
    fn writer_counts_records() {
        let (tx, rx) = mpsc::channel();
        tx.send(vec![WordEntry::new("a"), WordEntry::new("b")]).unwrap();
        tx.send(vec![WordEntry::new("c")]).unwrap();
        drop(tx);
        let mut out = Vec::new();
        assert_eq!(write_records(rx, &mut out, false).unwrap(), 3);
    }

    #[test]
    fn transient_main_page_shadows_dump_body() {
        let mut store = PageStore::new();
        store.put(Namespace::Main, "cat", "override", true);
        assert_eq!(find_page(&store, None, "cat").unwrap().as_deref(), Some("override"));
        assert_eq!(find_page(&store, None, "dog").unwrap(), None);
    }

    #[test]
    fn panic_messages_are_recovered() {
        let payload = catch_unwind(|| panic!("boom")).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "boom");
    }
}
