use crate::models::Namespace;
use crate::store::PageStore;
use anyhow::{bail, Context, Result};
use std::fs;
use std::path::Path;
use tracing::info;

/// A page supplied through an override file.
#[derive(Debug, Clone, PartialEq)]
pub struct OverridePage {
    pub namespace: Namespace,
    pub title: String,
    pub body: String,
}

/// Parses `TITLE: <name>` delimited pages. Lines before the first header are
/// rejected so a mistyped file never silently overrides nothing.
pub fn parse_overrides(text: &str) -> Result<Vec<OverridePage>> {
    let mut pages = Vec::new();
    let mut current: Option<(String, Vec<&str>)> = None;

    for (lineno, line) in text.lines().enumerate() {
        if let Some(rest) = line.strip_prefix("TITLE:") {
            if let Some((title, body)) = current.take() {
                pages.push(finish(&title, &body));
            }
            let title = rest.trim();
            if title.is_empty() {
                bail!("Empty TITLE header on line {}", lineno + 1);
            }
            current = Some((title.to_string(), Vec::new()));
        } else if let Some((_, body)) = current.as_mut() {
            body.push(line);
        } else if !line.trim().is_empty() {
            bail!("Override text before first TITLE: header on line {}", lineno + 1);
        }
    }
    if let Some((title, body)) = current.take() {
        pages.push(finish(&title, &body));
    }
    Ok(pages)
}

fn finish(full_title: &str, body: &[&str]) -> OverridePage {
    let (namespace, title) = Namespace::split_title(full_title);
    let mut text = body.join("\n");
    while text.ends_with('\n') {
        text.pop();
    }
    OverridePage {
        namespace,
        title: title.to_string(),
        body: text,
    }
}

/// Installs every page from an override file into `store` as a transient page.
pub fn load_overrides(store: &mut PageStore, path: &Path) -> Result<Vec<OverridePage>> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read override file: {:?}", path))?;
    let pages = parse_overrides(&text)?;
    for page in &pages {
        store.put(page.namespace, &page.title, &page.body, true);
    }
    info!(count = pages.len(), path = ?path, "Override pages installed");
    Ok(pages)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::PageLookup;

    #[test]
    fn parses_multiple_pages() {
        let text = "TITLE: Template:greet\nHello {{{1}}}!\nTITLE: dog\n==English==\n\n";
        let pages = parse_overrides(text).unwrap();
        assert_eq!(pages.len(), 2);
        assert_eq!(pages[0].namespace, Namespace::Template);
        assert_eq!(pages[0].title, "greet");
        assert_eq!(pages[0].body, "Hello {{{1}}}!");
        assert_eq!(pages[1].namespace, Namespace::Main);
        assert_eq!(pages[1].body, "==English==");
    }

    #[test]
    fn rejects_text_before_header() {
        assert!(parse_overrides("stray\nTITLE: x\n").is_err());
    }

    #[test]
    fn rejects_empty_title() {
        assert!(parse_overrides("TITLE:   \nbody").is_err());
    }

    #[test]
    fn load_installs_transient_pages() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("fix.txt");
        fs::write(&path, "TITLE: Template:foo\nnew body\n").unwrap();

        let mut store = PageStore::new();
        store.put(Namespace::Template, "foo", "old body", false);
        load_overrides(&mut store, &path).unwrap();

        let page = store.get(Namespace::Template, "foo").unwrap();
        assert_eq!(page.body, "new body");
        assert!(page.is_transient);
    }
}
