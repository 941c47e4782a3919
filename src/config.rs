use crate::error::ConfigError;
use crate::languages::LanguageTable;
use rustc_hash::FxHashSet;
use std::sync::Arc;

/// Maximum depth for following redirect chains
pub const REDIRECT_MAX_DEPTH: u32 = 5;

/// Maximum nesting of template invocations before a call is aborted
pub const MAX_EXPAND_DEPTH: usize = 40;

/// Cumulative bytes of template output allowed per page
pub const MAX_EXPANDED_SIZE: usize = 4 * 1024 * 1024;

/// Template, parser function and `#invoke` calls allowed per page
pub const MAX_TEMPLATE_CALLS: usize = 100_000;

/// Interpreter instructions allowed per module invocation
pub const MAX_SCRIPT_STEPS: u64 = 2_000_000;

/// Nested function calls allowed inside one module invocation
pub const MAX_SCRIPT_DEPTH: usize = 120;

/// Store snapshot format version; bump when `Page` layout changes
pub const CACHE_VERSION: u32 = 2;

/// Progress update interval (tick every N pages)
pub const PROGRESS_INTERVAL: u64 = 1000;

/// Titles longer than this are hashed when used as capture file names
pub const CAPTURE_TITLE_MAX: usize = 128;

/// Which dictionary field categories a run extracts and emits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaptureOptions {
    pub translations: bool,
    pub pronunciations: bool,
    pub linkages: bool,
    pub compounds: bool,
    pub redirects: bool,
    pub examples: bool,
}

impl CaptureOptions {
    pub fn all() -> Self {
        Self {
            translations: true,
            pronunciations: true,
            linkages: true,
            compounds: true,
            redirects: true,
            examples: true,
        }
    }

    pub fn none() -> Self {
        Self::default()
    }
}

/// Budgets applied to one page's expansion.
#[derive(Debug, Clone, Copy)]
pub struct Limits {
    pub max_depth: usize,
    pub max_expanded_size: usize,
    pub max_template_calls: usize,
    pub max_script_steps: u64,
    pub max_script_depth: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_depth: MAX_EXPAND_DEPTH,
            max_expanded_size: MAX_EXPANDED_SIZE,
            max_template_calls: MAX_TEMPLATE_CALLS,
            max_script_steps: MAX_SCRIPT_STEPS,
            max_script_depth: MAX_SCRIPT_DEPTH,
        }
    }
}

#[derive(Debug, Clone)]
pub enum LanguageSelection {
    All,
    Only(FxHashSet<String>),
}

/// Run-wide, read-only configuration shared by every worker.
#[derive(Debug, Clone)]
pub struct ExtractionConfig {
    pub languages: LanguageSelection,
    pub capture: CaptureOptions,
    pub limits: Limits,
    pub language_table: Arc<LanguageTable>,
}

impl ExtractionConfig {
    /// Validates the requested language names against the table before any page is touched.
    pub fn new(
        language_names: &[String],
        capture: CaptureOptions,
        language_table: Arc<LanguageTable>,
    ) -> Result<Self, ConfigError> {
        let languages = if language_names.is_empty() {
            LanguageSelection::All
        } else {
            let mut selected = FxHashSet::default();
            for name in language_names {
                if language_table.code_for(name).is_none() {
                    return Err(ConfigError::UnknownLanguage(name.clone()));
                }
                selected.insert(name.clone());
            }
            LanguageSelection::Only(selected)
        };

        Ok(Self {
            languages,
            capture,
            limits: Limits::default(),
            language_table,
        })
    }

    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    pub fn wants_language(&self, name: &str) -> bool {
        match &self.languages {
            LanguageSelection::All => true,
            LanguageSelection::Only(set) => set.contains(name),
        }
    }
}
