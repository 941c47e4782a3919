//! The per-page pipeline: expand, parse, split by language, assemble.

use crate::assemble::{Assembler, LanguageSection};
use crate::config::ExtractionConfig;
use crate::diagnostics::{DiagnosticKind, PageDiagnostics};
use crate::expand::{expand_page, Expansion};
use crate::extractors::Registry;
use crate::record::WordEntry;
use crate::store::{redirect_target, PageLookup};
use crate::wikitext::parse_with_origins;
use tracing::{debug, trace};

/// State carried while one page is processed.
pub struct PageContext<'a> {
    pub title: &'a str,
    pub config: &'a ExtractionConfig,
    pub diagnostics: PageDiagnostics,
}

/// Everything one page produced.
#[derive(Debug)]
pub struct PageOutcome {
    pub title: String,
    pub entries: Vec<WordEntry>,
    pub diagnostics: PageDiagnostics,
    pub redirect: bool,
    pub degraded: bool,
    pub unknown_sections: Vec<String>,
}

impl PageOutcome {
    fn empty(title: &str) -> Self {
        Self {
            title: title.to_string(),
            entries: Vec::new(),
            diagnostics: PageDiagnostics::new(title),
            redirect: false,
            degraded: false,
            unknown_sections: Vec::new(),
        }
    }
}

impl<'a> PageContext<'a> {
    pub fn new(title: &'a str, config: &'a ExtractionConfig) -> Self {
        Self {
            title,
            config,
            diagnostics: PageDiagnostics::new(title),
        }
    }

    /// Runs the whole pipeline for one main-namespace page.
    pub fn process(mut self, store: &dyn PageLookup, registry: &Registry, body: &str) -> PageOutcome {
        if let Some(target) = redirect_target(body) {
            let mut outcome = PageOutcome::empty(self.title);
            outcome.redirect = true;
            if self.config.capture.redirects {
                outcome.entries.push(WordEntry::redirect(self.title, &target));
            }
            return outcome;
        }

        let Expansion {
            text,
            invocations,
            degraded,
            diagnostics,
        } = expand_page(
            store,
            self.config.language_table.clone(),
            self.config.limits,
            self.title,
            body,
        );
        self.diagnostics.extend(diagnostics);
        trace!(title = self.title, bytes = text.len(), "Page expanded");

        let parsed = parse_with_origins(&text, &invocations);
        for note in &parsed.malformed {
            self.diagnostics
                .warning(DiagnosticKind::MalformedMarkup, note.clone(), self.title);
        }

        let table = self.config.language_table.as_ref();
        let assembler = Assembler::new(registry, self.config.capture, table);
        let mut entries = Vec::new();
        let mut unknown_sections = Vec::new();

        for language in parsed.root.children.iter().filter(|n| n.heading_level() == Some(2)) {
            let name = language.heading_title().unwrap_or_default();
            let Some(code) = table.code_for(&name) else {
                self.diagnostics.warning(
                    DiagnosticKind::UnrecognizedLanguage,
                    format!("unrecognized language heading {:?}", name),
                    self.title,
                );
                continue;
            };
            if !self.config.wants_language(&name) {
                continue;
            }
            let section = LanguageSection {
                node: language,
                word: self.title,
                lang: &name,
                lang_code: code,
            };
            let assembled = assembler.assemble(&section, &mut self.diagnostics);
            debug!(
                title = self.title,
                lang = %name,
                records = assembled.entries.len(),
                "Language section assembled"
            );
            entries.extend(assembled.entries);
            unknown_sections.extend(assembled.unknown_sections);
        }

        PageOutcome {
            title: self.title.to_string(),
            entries,
            diagnostics: self.diagnostics,
            redirect: false,
            degraded,
            unknown_sections,
        }
    }
}

/// Convenience wrapper around [`PageContext::process`].
pub fn process_page(
    store: &dyn PageLookup,
    config: &ExtractionConfig,
    registry: &Registry,
    title: &str,
    body: &str,
) -> PageOutcome {
    PageContext::new(title, config).process(store, registry, body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CaptureOptions;
    use crate::languages::LanguageTable;
    use crate::models::Namespace;
    use crate::store::PageStore;
    use std::sync::Arc;

    fn config(languages: &[&str], capture: CaptureOptions) -> ExtractionConfig {
        let names: Vec<String> = languages.iter().map(|s| s.to_string()).collect();
        ExtractionConfig::new(&names, capture, Arc::new(LanguageTable::builtin())).unwrap()
    }

    fn run(store: &PageStore, config: &ExtractionConfig, body: &str) -> PageOutcome {
        process_page(store, config, &Registry::standard(), "cat", body)
    }

    #[test]
    fn minimal_page_yields_one_record() {
        let outcome = run(
            &PageStore::new(),
            &config(&[], CaptureOptions::none()),
            "==English==\n===Noun===\n# A small feline.\n",
        );
        assert_eq!(outcome.entries.len(), 1);
        let entry = &outcome.entries[0];
        assert_eq!(entry.word, "cat");
        assert_eq!(entry.lang_code, "en");
        assert_eq!(entry.pos, "noun");
        assert_eq!(entry.senses[0].glosses, vec!["A small feline."]);
        assert!(!outcome.degraded);
    }

    #[test]
    fn languages_are_filtered_and_checked() {
        let body = "==English==\n===Noun===\n# A feline.\n==Finnish==\n===Noun===\n# kissa\n==Elvish==\n===Noun===\n# x\n";
        let outcome = run(&PageStore::new(), &config(&["Finnish"], CaptureOptions::none()), body);
        assert_eq!(outcome.entries.len(), 1);
        assert_eq!(outcome.entries[0].lang, "Finnish");
        assert!(outcome.diagnostics.has(DiagnosticKind::UnrecognizedLanguage));

        let outcome = run(&PageStore::new(), &config(&[], CaptureOptions::none()), body);
        assert_eq!(outcome.entries.len(), 2);
    }

    #[test]
    fn failing_module_does_not_abort_page() {
        let mut store = PageStore::new();
        store.put(
            Namespace::Module,
            "bad",
            "return { f = function() return mw.site.siteName end }",
            false,
        );
        let body = "==English==\n===Etymology===\n{{#invoke:bad|f}} Unknown.\n===Noun===\n# A feline.\n";
        let outcome = run(&store, &config(&[], CaptureOptions::all()), body);
        assert!(outcome.diagnostics.has(DiagnosticKind::UnsupportedHostCall));
        assert_eq!(outcome.entries.len(), 1);
        assert_eq!(outcome.entries[0].etymology_text, "Unknown.");
    }

    #[test]
    fn redirects_follow_capture_option() {
        let body = "#REDIRECT [[Cat]]";
        let outcome = run(&PageStore::new(), &config(&[], CaptureOptions::none()), body);
        assert!(outcome.redirect);
        assert!(outcome.entries.is_empty());

        let capture = CaptureOptions {
            redirects: true,
            ..CaptureOptions::none()
        };
        let outcome = run(&PageStore::new(), &config(&[], capture), body);
        assert_eq!(outcome.entries, vec![WordEntry::redirect("cat", "Cat")]);
    }

    #[test]
    fn self_recursive_template_marks_page_degraded() {
        let mut store = PageStore::new();
        store.put(Namespace::Template, "loop", "{{loop}}", false);
        let body = "==English==\n===Noun===\n# A {{loop}} feline.\n";
        let outcome = run(&store, &config(&[], CaptureOptions::none()), body);
        assert!(outcome.degraded);
        assert!(outcome.diagnostics.has(DiagnosticKind::RecursionExceeded));
        assert_eq!(outcome.entries.len(), 1);
    }

    #[test]
    fn malformed_markup_is_reported() {
        let outcome = run(
            &PageStore::new(),
            &config(&[], CaptureOptions::none()),
            "==English==\n===Noun===\n# A feline.\n{|\n| a\n",
        );
        assert!(outcome.diagnostics.has(DiagnosticKind::MalformedMarkup));
        assert_eq!(outcome.entries.len(), 1);
    }
}
