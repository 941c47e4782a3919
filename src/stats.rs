use crate::page::PageOutcome;
use rustc_hash::FxHashMap;

/// Statistics collected during the extraction process. Each rayon worker
/// folds into its own copy; copies are merged once at the end.
#[derive(Debug, Default, Clone)]
pub struct ExtractionStats {
    pub pages_processed: u64,
    pub records_written: u64,
    pub redirects: u64,
    pub degraded_pages: u64,
    pub failed_pages: u64,
    pub pages_without_records: u64,
    pub unknown_sections: FxHashMap<String, u64>,
}

impl ExtractionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_pages(&mut self) {
        self.pages_processed += 1;
    }

    pub fn add_records(&mut self, count: u64) {
        self.records_written += count;
    }

    pub fn inc_redirects(&mut self) {
        self.redirects += 1;
    }

    pub fn inc_degraded(&mut self) {
        self.degraded_pages += 1;
    }

    pub fn inc_failed(&mut self) {
        self.failed_pages += 1;
    }

    pub fn inc_empty(&mut self) {
        self.pages_without_records += 1;
    }

    pub fn add_unknown_section(&mut self, title: &str) {
        *self.unknown_sections.entry(title.to_string()).or_insert(0) += 1;
    }

    /// Counts one processed page.
    pub fn record(&mut self, outcome: &PageOutcome) {
        self.inc_pages();
        self.add_records(outcome.entries.len() as u64);
        if outcome.redirect {
            self.inc_redirects();
        } else if outcome.entries.is_empty() {
            self.inc_empty();
        }
        if outcome.degraded {
            self.inc_degraded();
        }
        for title in &outcome.unknown_sections {
            self.add_unknown_section(title);
        }
    }

    pub fn merge(mut self, other: ExtractionStats) -> Self {
        self.pages_processed += other.pages_processed;
        self.records_written += other.records_written;
        self.redirects += other.redirects;
        self.degraded_pages += other.degraded_pages;
        self.failed_pages += other.failed_pages;
        self.pages_without_records += other.pages_without_records;
        for (title, count) in other.unknown_sections {
            *self.unknown_sections.entry(title).or_insert(0) += count;
        }
        self
    }

    pub fn pages(&self) -> u64 {
        self.pages_processed
    }

    pub fn records(&self) -> u64 {
        self.records_written
    }

    pub fn degraded(&self) -> u64 {
        self.degraded_pages
    }

    pub fn failed(&self) -> u64 {
        self.failed_pages
    }

    /// Unknown section titles, most frequent first.
    pub fn top_unknown_sections(&self, n: usize) -> Vec<(&str, u64)> {
        let mut sections: Vec<(&str, u64)> = self
            .unknown_sections
            .iter()
            .map(|(title, count)| (title.as_str(), *count))
            .collect();
        sections.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));
        sections.truncate(n);
        sections
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::PageDiagnostics;
    use crate::record::WordEntry;

    fn outcome(records: usize, redirect: bool, degraded: bool) -> PageOutcome {
        PageOutcome {
            title: "cat".to_string(),
            entries: (0..records).map(|_| WordEntry::new("cat")).collect(),
            diagnostics: PageDiagnostics::new("cat"),
            redirect,
            degraded,
            unknown_sections: vec!["Usage notes".to_string()],
        }
    }

    #[test]
    fn default_values_are_zero() {
        let stats = ExtractionStats::new();
        assert_eq!(stats.pages(), 0);
        assert_eq!(stats.records(), 0);
        assert_eq!(stats.degraded(), 0);
        assert_eq!(stats.failed(), 0);
        assert!(stats.unknown_sections.is_empty());
    }

    #[test]
    fn inc_pages() {
        let mut stats = ExtractionStats::new();
        stats.inc_pages();
        stats.inc_pages();
        stats.inc_pages();
        assert_eq!(stats.pages(), 3);
    }

    #[test]
    fn add_records() {
        let mut stats = ExtractionStats::new();
        stats.add_records(5);
        stats.add_records(3);
        assert_eq!(stats.records(), 8);
    }

    #[test]
    fn record_counts_outcome() {
        let mut stats = ExtractionStats::new();
        stats.record(&outcome(2, false, true));
        stats.record(&outcome(0, false, false));
        stats.record(&outcome(1, true, false));
        assert_eq!(stats.pages(), 3);
        assert_eq!(stats.records(), 3);
        assert_eq!(stats.redirects, 1);
        assert_eq!(stats.degraded(), 1);
        assert_eq!(stats.pages_without_records, 1);
        assert_eq!(stats.unknown_sections["Usage notes"], 3);
    }

    #[test]
    fn merge_sums_every_counter() {
        let mut a = ExtractionStats::new();
        a.record(&outcome(1, false, false));
        a.inc_failed();
        let mut b = ExtractionStats::new();
        b.record(&outcome(2, false, true));
        b.add_unknown_section("Trivia notes");

        let merged = a.merge(b);
        assert_eq!(merged.pages(), 2);
        assert_eq!(merged.records(), 3);
        assert_eq!(merged.degraded(), 1);
        assert_eq!(merged.failed(), 1);
        assert_eq!(merged.unknown_sections["Usage notes"], 2);
        assert_eq!(
            merged.top_unknown_sections(1),
            vec![("Usage notes", 2)]
        );
    }
}
