use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Namespace {
    Main,
    Template,
    Module,
    Category,
    Appendix,
    Thesaurus,
    Wiktionary,
    Other(i32),
}

impl Namespace {
    /// Maps a dump `<ns>` number to a namespace.
    pub fn from_id(id: i32) -> Self {
        match id {
            0 => Namespace::Main,
            4 => Namespace::Wiktionary,
            10 => Namespace::Template,
            14 => Namespace::Category,
            100 => Namespace::Appendix,
            110 => Namespace::Thesaurus,
            828 => Namespace::Module,
            other => Namespace::Other(other),
        }
    }

    pub fn prefix(self) -> Option<&'static str> {
        match self {
            Namespace::Main | Namespace::Other(_) => None,
            Namespace::Template => Some("Template"),
            Namespace::Module => Some("Module"),
            Namespace::Category => Some("Category"),
            Namespace::Appendix => Some("Appendix"),
            Namespace::Thesaurus => Some("Thesaurus"),
            Namespace::Wiktionary => Some("Wiktionary"),
        }
    }

    fn from_prefix(prefix: &str) -> Option<Self> {
        let ns = match prefix.trim().to_ascii_lowercase().as_str() {
            "template" | "t" => Namespace::Template,
            "module" => Namespace::Module,
            "category" | "cat" => Namespace::Category,
            "appendix" => Namespace::Appendix,
            "thesaurus" => Namespace::Thesaurus,
            "wiktionary" | "wt" => Namespace::Wiktionary,
            _ => return None,
        };
        Some(ns)
    }

    /// Splits a full title such as `Template:en-noun` into namespace and local title.
    pub fn split_title(full: &str) -> (Namespace, &str) {
        if let Some((prefix, rest)) = full.split_once(':') {
            if let Some(ns) = Namespace::from_prefix(prefix) {
                return (ns, rest.trim());
            }
        }
        (Namespace::Main, full.trim())
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.prefix() {
            Some(p) => f.write_str(p),
            None => match self {
                Namespace::Other(id) => write!(f, "ns{}", id),
                _ => f.write_str("Main"),
            },
        }
    }
}

/// Normalises a local title the way the wiki does: underscores become spaces,
/// runs of whitespace collapse, and outside the main namespace the first
/// letter is upper-cased.
pub fn normalize_title(ns: Namespace, title: &str) -> String {
    let mut out = String::with_capacity(title.len());
    let mut last_space = true;
    for ch in title.chars() {
        let ch = if ch == '_' { ' ' } else { ch };
        if ch.is_whitespace() {
            if !last_space {
                out.push(' ');
            }
            last_space = true;
        } else {
            out.push(ch);
            last_space = false;
        }
    }
    while out.ends_with(' ') {
        out.pop();
    }
    if ns != Namespace::Main {
        if let Some(first) = out.chars().next() {
            if first.is_lowercase() {
                let upper: String = first.to_uppercase().collect();
                out.replace_range(..first.len_utf8(), &upper);
            }
        }
    }
    out
}

/// A stored page: article, template, module or any other namespace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page {
    pub namespace: Namespace,
    pub title: String,
    pub body: String,
    pub is_transient: bool,
    pub redirect: Option<String>,
}

impl Page {
    pub fn new(namespace: Namespace, title: &str, body: impl Into<String>) -> Self {
        Self {
            namespace,
            title: normalize_title(namespace, title),
            body: body.into(),
            is_transient: false,
            redirect: None,
        }
    }

    pub fn full_title(&self) -> String {
        match self.namespace.prefix() {
            Some(p) => format!("{}:{}", p, self.title),
            None => self.title.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub enum PageType {
    Article,
    Redirect(String),
    Special,
}

/// A page as read from the XML dump.
#[derive(Debug, Clone)]
pub struct WikiPage {
    pub id: u32,
    pub title: String,
    pub ns: Option<i32>,
    pub page_type: PageType,
    pub text: Option<String>,
    pub timestamp: Option<String>,
}

impl WikiPage {
    pub fn namespace(&self) -> Namespace {
        match self.ns {
            Some(id) => Namespace::from_id(id),
            None => Namespace::split_title(&self.title).0,
        }
    }

    /// Title without its namespace prefix.
    pub fn local_title(&self) -> &str {
        let ns = self.namespace();
        match ns.prefix() {
            Some(p) => self
                .title
                .strip_prefix(p)
                .and_then(|rest| rest.strip_prefix(':'))
                .unwrap_or(&self.title),
            None => &self.title,
        }
    }
}
