use crate::config::{PROGRESS_INTERVAL, REDIRECT_MAX_DEPTH};
use crate::models::{normalize_title, Namespace, Page, PageType};
use crate::parser::WikiReader;
use anyhow::{Context, Result};
use indicatif::ProgressBar;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

/// Read access to pages. The expander only ever talks to this trait, so the
/// backing store can be swapped without touching expansion code.
pub trait PageLookup {
    fn get(&self, namespace: Namespace, title: &str) -> Option<Arc<Page>>;

    fn exists(&self, namespace: Namespace, title: &str) -> bool {
        self.get(namespace, title).is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PageKey {
    pub namespace: Namespace,
    pub title: String,
}

impl PageKey {
    pub fn new(namespace: Namespace, title: &str) -> Self {
        Self {
            namespace,
            title: normalize_title(namespace, title),
        }
    }
}

/// In-memory keyed page storage with transient overrides.
#[derive(Debug, Default)]
pub struct PageStore {
    pages: FxHashMap<PageKey, Arc<Page>>,
    transient: FxHashMap<PageKey, Arc<Page>>,
}

impl PageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads every non-article page and every article redirect from a dump.
    /// Articles themselves are streamed later by the extraction pass.
    pub fn load_dump(path: &str) -> Result<Self> {
        let mut store = Self::new();
        let reader = WikiReader::new(path, false)
            .with_context(|| format!("Failed to open wiki dump at: {}", path))?;
        let pb = ProgressBar::new_spinner();

        info!("Loading page store from: {}", path);

        let mut seen: u64 = 0;
        for page in reader {
            seen += 1;
            let namespace = page.namespace();
            let keep = namespace != Namespace::Main || matches!(page.page_type, PageType::Redirect(_));
            if keep {
                let mut stored = Page::new(
                    namespace,
                    page.local_title(),
                    page.text.clone().unwrap_or_default(),
                );
                if let PageType::Redirect(target) = &page.page_type {
                    stored.redirect = Some(target.clone());
                }
                store.insert(stored);
            }
            if seen % PROGRESS_INTERVAL == 0 {
                pb.tick();
            }
        }

        pb.finish_and_clear();

        let (pages, redirects) = store.stats();
        info!(pages, redirects, scanned = seen, "Page store loaded");
        Ok(store)
    }

    pub fn insert(&mut self, page: Page) {
        let key = PageKey {
            namespace: page.namespace,
            title: page.title.clone(),
        };
        self.pages.insert(key, Arc::new(page));
    }

    pub fn put(&mut self, namespace: Namespace, title: &str, body: &str, transient: bool) {
        let mut page = Page::new(namespace, title, body);
        page.is_transient = transient;
        if let Some(target) = redirect_target(body) {
            page.redirect = Some(target);
        }
        let key = PageKey {
            namespace,
            title: page.title.clone(),
        };
        if transient {
            debug!(title = %page.full_title(), "Transient override installed");
            self.transient.insert(key, Arc::new(page));
        } else {
            self.pages.insert(key, Arc::new(page));
        }
    }

    /// Follows redirects from a main-namespace title, returning the final title.
    pub fn resolve_redirect(&self, title: &str) -> Option<String> {
        let mut current = normalize_title(Namespace::Main, title);
        let mut depth = 0;

        while depth < REDIRECT_MAX_DEPTH {
            match self.get(Namespace::Main, &current) {
                Some(page) => match &page.redirect {
                    Some(target) => {
                        debug!(from = %current, to = %target, "Following redirect");
                        current = normalize_title(Namespace::Main, target);
                        depth += 1;
                    }
                    None => return Some(current),
                },
                None if depth > 0 => return Some(current),
                None => return None,
            }
        }
        debug!(title = title, "Redirect chain too deep");
        None
    }

    pub fn stats(&self) -> (usize, usize) {
        let redirects = self.pages.values().filter(|p| p.redirect.is_some()).count();
        (self.pages.len(), redirects)
    }

    pub fn pages(&self) -> impl Iterator<Item = &Arc<Page>> {
        self.pages.values()
    }

    pub(crate) fn from_pages(pages: Vec<Page>) -> Self {
        let mut store = Self::new();
        for page in pages {
            store.insert(page);
        }
        store
    }
}

impl PageLookup for PageStore {
    fn get(&self, namespace: Namespace, title: &str) -> Option<Arc<Page>> {
        let key = PageKey::new(namespace, title);
        self.transient
            .get(&key)
            .or_else(|| self.pages.get(&key))
            .cloned()
    }
}

/// Recognises `#REDIRECT [[target]]` at the start of a body.
pub fn redirect_target(body: &str) -> Option<String> {
    let trimmed = body.trim_start();
    let head = trimmed.get(..9)?;
    if !head.eq_ignore_ascii_case("#redirect") {
        return None;
    }
    let rest = &trimmed[9..];
    let start = rest.find("[[")? + 2;
    let end = rest[start..].find("]]")? + start;
    let target = rest[start..end].split('|').next()?.trim();
    if target.is_empty() {
        None
    } else {
        Some(target.to_string())
    }
}
