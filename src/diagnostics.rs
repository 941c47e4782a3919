//! Page-attributed warnings and errors.
//!
//! Each page collects its own [`PageDiagnostics`]; workers fold them into a
//! [`RunDiagnostics`] which is merged once at the end of the run and can be
//! exported as a single JSON object.

use anyhow::{Context, Result};
use rustc_hash::FxHashMap;
use serde::Serialize;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use tracing::{debug, error, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    TemplateNotFound,
    RecursionExceeded,
    SizeExceeded,
    UnsupportedHostCall,
    InterpreterRuntimeError,
    MalformedMarkup,
    ExtractorSkip,
    UnrecognizedLanguage,
    PageFailed,
    Debug,
}

impl DiagnosticKind {
    pub fn as_str(self) -> &'static str {
        match self {
            DiagnosticKind::TemplateNotFound => "template_not_found",
            DiagnosticKind::RecursionExceeded => "recursion_exceeded",
            DiagnosticKind::SizeExceeded => "size_exceeded",
            DiagnosticKind::UnsupportedHostCall => "unsupported_host_call",
            DiagnosticKind::InterpreterRuntimeError => "interpreter_runtime_error",
            DiagnosticKind::MalformedMarkup => "malformed_markup",
            DiagnosticKind::ExtractorSkip => "extractor_skip",
            DiagnosticKind::UnrecognizedLanguage => "unrecognized_language",
            DiagnosticKind::PageFailed => "page_failed",
            DiagnosticKind::Debug => "debug",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Error,
    Warning,
    Debug,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub severity: Severity,
    pub page: String,
    pub message: String,
    /// Where on the page: section path, template name, module function.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub context: String,
}

/// Diagnostics for one page. Every entry is also logged through `tracing`.
#[derive(Debug, Default, Clone)]
pub struct PageDiagnostics {
    page: String,
    entries: Vec<Diagnostic>,
}

impl PageDiagnostics {
    pub fn new(page: &str) -> Self {
        Self {
            page: page.to_string(),
            entries: Vec::new(),
        }
    }

    pub fn page(&self) -> &str {
        &self.page
    }

    pub fn warning(&mut self, kind: DiagnosticKind, message: impl Into<String>, context: &str) {
        self.push(kind, Severity::Warning, message.into(), context);
    }

    pub fn error(&mut self, kind: DiagnosticKind, message: impl Into<String>, context: &str) {
        self.push(kind, Severity::Error, message.into(), context);
    }

    pub fn debug(&mut self, message: impl Into<String>, context: &str) {
        self.push(DiagnosticKind::Debug, Severity::Debug, message.into(), context);
    }

    fn push(&mut self, kind: DiagnosticKind, severity: Severity, message: String, context: &str) {
        match severity {
            Severity::Error => {
                error!(page = %self.page, kind = kind.as_str(), context, "{}", message)
            }
            Severity::Warning => {
                warn!(page = %self.page, kind = kind.as_str(), context, "{}", message)
            }
            Severity::Debug => {
                debug!(page = %self.page, context, "{}", message)
            }
        }
        self.entries.push(Diagnostic {
            kind,
            severity,
            page: self.page.clone(),
            message,
            context: context.to_string(),
        });
    }

    pub fn extend(&mut self, other: PageDiagnostics) {
        self.entries.extend(other.entries);
    }

    pub fn entries(&self) -> &[Diagnostic] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<Diagnostic> {
        self.entries
    }

    pub fn has(&self, kind: DiagnosticKind) -> bool {
        self.entries.iter().any(|d| d.kind == kind)
    }

    pub fn count(&self, kind: DiagnosticKind) -> usize {
        self.entries.iter().filter(|d| d.kind == kind).count()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Run-wide diagnostics, accumulated per worker and merged by summation.
#[derive(Debug, Default, Serialize)]
pub struct RunDiagnostics {
    pub errors: Vec<Diagnostic>,
    pub warnings: Vec<Diagnostic>,
    pub debugs: Vec<Diagnostic>,
    pub counts: FxHashMap<&'static str, u64>,
}

impl RunDiagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn absorb(&mut self, page: PageDiagnostics) {
        for entry in page.into_entries() {
            *self.counts.entry(entry.kind.as_str()).or_insert(0) += 1;
            match entry.severity {
                Severity::Error => self.errors.push(entry),
                Severity::Warning => self.warnings.push(entry),
                Severity::Debug => self.debugs.push(entry),
            }
        }
    }

    pub fn merge(mut self, other: RunDiagnostics) -> Self {
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
        self.debugs.extend(other.debugs);
        for (kind, n) in other.counts {
            *self.counts.entry(kind).or_insert(0) += n;
        }
        self
    }

    pub fn total(&self) -> usize {
        self.errors.len() + self.warnings.len() + self.debugs.len()
    }

    pub fn export(&self, path: &Path) -> Result<()> {
        let file = File::create(path)
            .with_context(|| format!("Failed to create diagnostics file: {:?}", path))?;
        serde_json::to_writer_pretty(BufWriter::new(file), self)
            .context("Failed to write diagnostics")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_diagnostics_carry_page_title() {
        let mut diags = PageDiagnostics::new("dog");
        diags.warning(DiagnosticKind::TemplateNotFound, "missing", "Template:x");
        assert_eq!(diags.entries()[0].page, "dog");
        assert_eq!(diags.entries()[0].context, "Template:x");
        assert!(diags.has(DiagnosticKind::TemplateNotFound));
        assert!(!diags.has(DiagnosticKind::SizeExceeded));
    }

    #[test]
    fn run_diagnostics_partition_by_severity() {
        let mut page = PageDiagnostics::new("cat");
        page.error(DiagnosticKind::PageFailed, "boom", "");
        page.warning(DiagnosticKind::ExtractorSkip, "skip", "");
        page.debug("note", "");

        let mut run = RunDiagnostics::new();
        run.absorb(page);
        assert_eq!(run.errors.len(), 1);
        assert_eq!(run.warnings.len(), 1);
        assert_eq!(run.debugs.len(), 1);
        assert_eq!(run.counts.get("page_failed"), Some(&1));
    }

    #[test]
    fn merge_sums_counts() {
        let mut a = RunDiagnostics::new();
        let mut pa = PageDiagnostics::new("a");
        pa.warning(DiagnosticKind::TemplateNotFound, "x", "");
        a.absorb(pa);

        let mut b = RunDiagnostics::new();
        let mut pb = PageDiagnostics::new("b");
        pb.warning(DiagnosticKind::TemplateNotFound, "y", "");
        pb.warning(DiagnosticKind::SizeExceeded, "z", "");
        b.absorb(pb);

        let merged = a.merge(b);
        assert_eq!(merged.counts.get("template_not_found"), Some(&2));
        assert_eq!(merged.counts.get("size_exceeded"), Some(&1));
        assert_eq!(merged.total(), 3);
    }

    #[test]
    fn export_writes_single_json_object() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("diag.json");
        let mut run = RunDiagnostics::new();
        let mut page = PageDiagnostics::new("dog");
        page.warning(DiagnosticKind::MalformedMarkup, "unbalanced", "English/Noun");
        run.absorb(page);
        run.export(&path).unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["warnings"][0]["kind"], "malformed_markup");
        assert_eq!(value["warnings"][0]["page"], "dog");
        assert!(value["errors"].as_array().unwrap().is_empty());
    }
}
