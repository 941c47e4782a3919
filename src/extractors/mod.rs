//! Section extractors and the registry that dispatches to them.
//!
//! Each extractor reads one section node and produces [`Partial`]s. Template
//! calls are recognised through the origin annotations on nodes, so an
//! extractor sees both the rendered text and the arguments of every
//! top-level call in its section.

pub mod etymology;
pub mod forms;
pub mod linkages;
pub mod pronunciation;
pub mod senses;
pub mod translations;

use crate::clean::clean_value;
use crate::config::CaptureOptions;
use crate::diagnostics::PageDiagnostics;
use crate::expand::TemplateOrigin;
use crate::languages::LanguageTable;
use crate::models::{normalize_title, Namespace};
use crate::node::{Node, Piece};
use crate::record::{Partial, TemplateData};
use crate::sections::{LinkageKind, SectionKind};
use rustc_hash::FxHashMap;

/// What an extractor knows about the section it is reading.
#[derive(Debug, Clone, Copy)]
pub struct SectionContext<'a> {
    pub word: &'a str,
    pub lang: &'a str,
    pub lang_code: &'a str,
    pub heading: &'a str,
    pub pos: Option<&'static str>,
    pub linkage: Option<LinkageKind>,
    pub capture: CaptureOptions,
    pub languages: &'a LanguageTable,
}

pub trait SectionExtractor: Send + Sync {
    fn kind(&self) -> SectionKind;

    /// Whether the capture options call for this extractor at all.
    fn enabled(&self, capture: &CaptureOptions, ctx: &SectionContext<'_>) -> bool;

    fn extract(
        &self,
        section: &Node,
        ctx: &SectionContext<'_>,
        out: &mut Vec<Partial>,
        diagnostics: &mut PageDiagnostics,
    );
}

/// Extractors keyed by the section kind they read.
pub struct Registry {
    extractors: FxHashMap<SectionKind, Box<dyn SectionExtractor>>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            extractors: FxHashMap::default(),
        }
    }

    pub fn standard() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(senses::SensesExtractor));
        registry.register(Box::new(pronunciation::PronunciationExtractor));
        registry.register(Box::new(translations::TranslationsExtractor));
        registry.register(Box::new(linkages::LinkagesExtractor));
        registry.register(Box::new(etymology::EtymologyExtractor));
        registry.register(Box::new(forms::FormsExtractor));
        registry
    }

    pub fn register(&mut self, extractor: Box<dyn SectionExtractor>) {
        self.extractors.insert(extractor.kind(), extractor);
    }

    /// Runs the extractor for `kind`, if one is registered and enabled.
    /// Returns whether it ran.
    pub fn run(
        &self,
        kind: SectionKind,
        section: &Node,
        ctx: &SectionContext<'_>,
        out: &mut Vec<Partial>,
        diagnostics: &mut PageDiagnostics,
    ) -> bool {
        match self.extractors.get(&kind) {
            Some(extractor) if extractor.enabled(&ctx.capture, ctx) => {
                extractor.extract(section, ctx, out, diagnostics);
                true
            }
            _ => false,
        }
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::standard()
    }
}

/// Section content without nested sub-sections.
pub fn body(section: &Node) -> impl Iterator<Item = &Node> {
    section.children.iter().filter(|c| c.heading_level().is_none())
}

/// Lower-cased template name with any `Template:` prefix removed.
pub fn template_name(origin: &TemplateOrigin) -> String {
    let name = origin.name.trim();
    let name = name
        .strip_prefix("Template:")
        .or_else(|| name.strip_prefix("template:"))
        .unwrap_or(name);
    name.replace('_', " ").to_lowercase()
}

/// A non-empty argument value.
pub fn arg<'o>(origin: &'o TemplateOrigin, key: &str) -> Option<&'o str> {
    origin
        .args
        .iter()
        .rev()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.trim())
        .filter(|v| !v.is_empty())
}

/// Non-empty numbered arguments at index `from` or above, in index order.
pub fn positional(origin: &TemplateOrigin, from: usize) -> Vec<String> {
    let mut indices: Vec<(u64, &str)> = origin
        .args
        .iter()
        .filter_map(|(k, _)| Some((k.parse::<u64>().ok()?, k.as_str())))
        .filter(|(i, key)| *i >= from as u64 && i.to_string() == *key)
        .collect();
    indices.sort_unstable_by_key(|(i, _)| *i);
    indices.dedup_by_key(|(i, _)| *i);
    indices
        .into_iter()
        .filter_map(|(_, key)| arg(origin, key))
        .map(str::to_string)
        .collect()
}

pub fn template_data(origin: &TemplateOrigin) -> TemplateData {
    TemplateData {
        name: origin.name.trim().to_string(),
        args: origin
            .args
            .iter()
            .map(|(k, v)| (k.clone(), clean_value(v)))
            .collect(),
    }
}

/// True when the piece text is the marker left for a template that does
/// not exist.
pub fn is_missing(origin: &TemplateOrigin, text: &str) -> bool {
    let name = origin.name.trim();
    let name = name.strip_prefix("Template:").unwrap_or(name);
    let expected = format!("Template:{}", normalize_title(Namespace::Template, name));
    text.trim() == expected
}

/// Text for a template call: the expanded output, or a rendering built from
/// the arguments when the template is missing.
pub fn template_text(origin: &TemplateOrigin, text: &str, ctx: &SectionContext<'_>) -> String {
    if is_missing(origin, text) {
        fallback_text(origin, ctx)
    } else {
        text.to_string()
    }
}

fn fallback_text(origin: &TemplateOrigin, ctx: &SectionContext<'_>) -> String {
    let name = template_name(origin);
    let lang_name = |code: Option<&str>| {
        code.and_then(|c| ctx.languages.name_for(c))
            .map(str::to_string)
            .unwrap_or_default()
    };
    match name.as_str() {
        "lb" | "lbl" | "label" | "term-label" => {
            let labels: Vec<String> = positional(origin, 2)
                .into_iter()
                .filter(|l| l != "_" && l != "and" && l != "or")
                .collect();
            parenthesized(&labels)
        }
        "q" | "qual" | "qualifier" | "i" | "qf" | "gloss" | "gl" | "sense" | "s" => {
            parenthesized(&positional(origin, 1))
        }
        "l" | "link" | "m" | "mention" | "l-self" | "ll" | "cog" | "cognate" | "noncog" | "ncog" => {
            let word = arg(origin, "3").or_else(|| arg(origin, "2")).unwrap_or_default();
            match name.as_str() {
                "cog" | "cognate" | "noncog" | "ncog" => {
                    join_nonempty(&[lang_name(arg(origin, "1")), word.to_string()])
                }
                _ => word.to_string(),
            }
        }
        "inh" | "inherited" | "der" | "derived" | "bor" | "borrowed" | "lbor" | "ubor" | "uder"
        | "uinh" | "calque" | "cal" | "slbor" => {
            let word = arg(origin, "4").or_else(|| arg(origin, "3")).unwrap_or_default();
            join_nonempty(&[lang_name(arg(origin, "2")), word.to_string()])
        }
        "compound" | "com" | "affix" | "af" | "prefix" | "pre" | "suffix" | "suf" | "confix"
        | "con" | "blend" => positional(origin, 2).join(" + "),
        "w" | "pedia" | "wikipedia" => arg(origin, "2")
            .or_else(|| arg(origin, "1"))
            .unwrap_or_default()
            .to_string(),
        "t" | "t+" | "tt" | "tt+" | "t-simple" | "t+check" | "t-check" => {
            arg(origin, "2").unwrap_or_default().to_string()
        }
        "ipa" => format!("IPA: {}", positional(origin, 2).join(", ")),
        "enpr" => format!("enPR: {}", positional(origin, 1).join(", ")),
        "rhymes" | "rhyme" => format!("Rhymes: -{}", positional(origin, 2).join(", -")),
        "hyphenation" | "hyph" => format!("Hyphenation: {}", positional(origin, 2).join("‧")),
        "g" | "gender" => positional(origin, 1).join(" "),
        "taxlink" | "vern" => arg(origin, "1").unwrap_or_default().to_string(),
        _ => String::new(),
    }
}

fn parenthesized(items: &[String]) -> String {
    if items.is_empty() {
        String::new()
    } else {
        format!("({})", items.join(", "))
    }
}

fn join_nonempty(parts: &[String]) -> String {
    parts
        .iter()
        .filter(|p| !p.is_empty())
        .cloned()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Renders pieces to cleaned text. Templates named in `skip` contribute
/// nothing.
pub fn render(pieces: &[Piece], ctx: &SectionContext<'_>, skip: &[&str]) -> String {
    let mut out = String::new();
    for piece in pieces {
        match piece {
            Piece::Text(t) => out.push_str(t),
            Piece::Link { text, .. } => out.push_str(text),
            Piece::Template { origin, text } => {
                if skip.contains(&template_name(origin).as_str()) {
                    continue;
                }
                out.push_str(&template_text(origin, text, ctx));
            }
        }
    }
    clean_value(&out)
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::config::CaptureOptions;

    #[test]
    fn missing_templates_fall_back_to_arguments() {
        let (_e, parsed) = parse("==x==\n{{lb|en|informal|_|dated}} a {{l|en|kitten}} {{unknown}}", &[]);
        let ctx = ctx(CaptureOptions::none());
        let pieces = crate::node::pieces_of(body(section(&parsed)));
        assert_eq!(render(&pieces, &ctx, &[]), "(informal, dated) a kitten");
    }

    #[test]
    fn existing_templates_use_expanded_text() {
        let (_e, parsed) = parse("==x==\n{{greet|you}}", &[("greet", "hello {{{1}}}")]);
        let ctx = ctx(CaptureOptions::none());
        let pieces = crate::node::pieces_of(body(section(&parsed)));
        assert_eq!(render(&pieces, &ctx, &[]), "hello you");
        assert_eq!(render(&pieces, &ctx, &["greet"]), "");
    }

    #[test]
    fn positional_skips_empty_and_named() {
        let origin = TemplateOrigin {
            name: "Template:Syn".to_string(),
            args: vec![
                ("1".to_string(), "en".to_string()),
                ("2".to_string(), "kitty".to_string()),
                ("3".to_string(), "".to_string()),
                ("4".to_string(), "puss".to_string()),
                ("q".to_string(), "x".to_string()),
            ],
            range: 0..1,
        };
        assert_eq!(template_name(&origin), "syn");
        assert_eq!(positional(&origin, 2), vec!["kitty", "puss"]);
        assert_eq!(arg(&origin, "3"), None);
    }

    #[test]
    fn positional_follows_present_indices_only() {
        let origin = TemplateOrigin {
            name: "lb".to_string(),
            args: vec![
                ("1".to_string(), "en".to_string()),
                ("2".to_string(), "informal".to_string()),
                ("18446744073709551615".to_string(), "last".to_string()),
                ("100000000".to_string(), "far".to_string()),
                ("99999999999999999999999".to_string(), "overflow".to_string()),
                ("+3".to_string(), "signed".to_string()),
            ],
            range: 0..1,
        };
        assert_eq!(positional(&origin, 2), vec!["informal", "far", "last"]);

        let (_e, parsed) = parse("==x==\n{{lb|en|informal|100000000=x}}", &[]);
        let pieces = crate::node::pieces_of(body(section(&parsed)));
        assert_eq!(render(&pieces, &ctx(CaptureOptions::none()), &[]), "(informal, x)");
    }

    #[test]
    fn registry_respects_capture_options() {
        let registry = Registry::standard();
        let (_e, parsed) = parse("===Pronunciation===\n* {{IPA|en|/kæt/}}\n", &[]);
        let mut out = Vec::new();
        let mut diagnostics = PageDiagnostics::new("cat");
        let ran = registry.run(
            SectionKind::Pronunciation,
            section(&parsed),
            &ctx(CaptureOptions::none()),
            &mut out,
            &mut diagnostics,
        );
        assert!(!ran);
        assert!(out.is_empty());
        let ran = registry.run(
            SectionKind::Pronunciation,
            section(&parsed),
            &ctx(CaptureOptions::all()),
            &mut out,
            &mut diagnostics,
        );
        assert!(ran);
        assert_eq!(out.len(), 1);
    }
}
