use super::{arg, body, positional, template_name, template_text, SectionContext, SectionExtractor};
use crate::clean::{clean_value, leading_qualifier, split_at_comma_semi, split_tags, trailing_qualifier};
use crate::config::CaptureOptions;
use crate::diagnostics::{DiagnosticKind, PageDiagnostics};
use crate::expand::TemplateOrigin;
use crate::node::{Node, Piece};
use crate::record::{Linkage, Partial};
use crate::sections::{LinkageKind, SectionKind};
use once_cell::sync::Lazy;
use regex::Regex;

static COLUMN_TEMPLATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:col|der|rel|hyp|syn|ant|desc)[1-5]?(?:-u)?$|^col-auto$").unwrap());
static SENSE_HEADER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\(([^()]+)\)\s*:\s*").unwrap());
static QUOTED: Lazy<Regex> = Lazy::new(|| Regex::new(r#"\s*[“"]([^”"]+)[”"]"#).unwrap());
static INLINE_MODIFIER: Lazy<Regex> = Lazy::new(|| Regex::new(r"<(\w+):([^<>]*)>").unwrap());

const LINK_TEMPLATES: &[&str] = &["l", "link", "l-self", "ll", "m", "mention"];
const NOT_WORDS: &[&str] = &["See also", "see also", "See ", "and "];

/// Synonyms, derived terms and the other word-list sections.
pub struct LinkagesExtractor;

impl SectionExtractor for LinkagesExtractor {
    fn kind(&self) -> SectionKind {
        SectionKind::Linkage
    }

    fn enabled(&self, capture: &CaptureOptions, ctx: &SectionContext<'_>) -> bool {
        match ctx.linkage {
            Some(LinkageKind::Compounds) => capture.compounds,
            Some(_) => capture.linkages,
            None => false,
        }
    }

    fn extract(
        &self,
        section: &Node,
        ctx: &SectionContext<'_>,
        out: &mut Vec<Partial>,
        diagnostics: &mut PageDiagnostics,
    ) {
        let Some(kind) = ctx.linkage else {
            return;
        };
        let mut collector = Collector {
            ctx,
            sense: String::new(),
            found: Vec::new(),
        };
        for node in body(section) {
            if node.is_list_item() {
                collector.item(node);
                continue;
            }
            let Some(origin) = node.origin() else {
                continue;
            };
            let name = template_name(&origin);
            if name.ends_with("-top") || name == "sense" || name == "s" {
                collector.sense = arg(&origin, "1").map(clean_value).unwrap_or_default();
            } else if name.ends_with("-bottom") {
                collector.sense.clear();
            } else if COLUMN_TEMPLATE.is_match(&name) {
                collector.columns(&origin);
            }
        }

        if collector.found.is_empty() {
            diagnostics.warning(
                DiagnosticKind::ExtractorSkip,
                format!("{}: no linkages found", ctx.heading),
                ctx.lang,
            );
            return;
        }
        out.push(Partial::Linkages(kind, collector.found));
    }
}

struct Collector<'c, 'a> {
    ctx: &'c SectionContext<'a>,
    sense: String,
    found: Vec<Linkage>,
}

#[derive(Default)]
struct Fragment {
    text: String,
    english: String,
}

impl Collector<'_, '_> {
    fn item(&mut self, item: &Node) {
        let outer_sense = self.sense.clone();
        let mut pieces = item.pieces();

        // `(sense):` header lines scope the sense to their nested items.
        let header = match pieces.first() {
            Some(Piece::Text(first)) => SENSE_HEADER.captures(first.trim_start()).map(|caps| {
                let rest = first.trim_start()[caps[0].len()..].to_string();
                (clean_value(&caps[1]), rest)
            }),
            _ => None,
        };
        if let Some((sense, rest)) = header {
            self.sense = sense;
            pieces[0] = Piece::Text(rest);
        }

        let mut fragment = Fragment::default();
        for piece in pieces {
            match piece {
                Piece::Text(text) => {
                    for (i, part) in split_at_comma_semi(&text).into_iter().enumerate() {
                        if i > 0 {
                            self.flush(&mut fragment);
                        }
                        fragment.text.push_str(part);
                    }
                }
                Piece::Link { target, text } => match target.strip_prefix("Thesaurus:") {
                    Some(local) => self.found.push(Linkage {
                        word: local.to_string(),
                        sense: self.sense.clone(),
                        source: target.clone(),
                        ..Linkage::default()
                    }),
                    None => fragment.text.push_str(&text),
                },
                Piece::Template { origin, text } => {
                    let name = template_name(&origin);
                    if name == "sense" || name == "s" {
                        self.sense = arg(&origin, "1").map(clean_value).unwrap_or_default();
                    } else if COLUMN_TEMPLATE.is_match(&name) {
                        self.columns(&origin);
                    } else if LINK_TEMPLATES.contains(&name.as_str()) {
                        let word = arg(&origin, "3").or_else(|| arg(&origin, "2")).unwrap_or_default();
                        fragment.text.push_str(word);
                        if let Some(gloss) = arg(&origin, "t").or_else(|| arg(&origin, "gloss")).or_else(|| arg(&origin, "4")) {
                            fragment.english = clean_value(gloss);
                        }
                    } else {
                        fragment.text.push_str(&template_text(&origin, &text, self.ctx));
                    }
                }
            }
        }
        self.flush(&mut fragment);

        for child in item.items() {
            self.item(child);
        }
        self.sense = outer_sense;
    }

    /// Words listed as arguments of a column template.
    fn columns(&mut self, origin: &TemplateOrigin) {
        for raw in positional(origin, 2) {
            let mut linkage = Linkage {
                sense: self.sense.clone(),
                ..Linkage::default()
            };
            for caps in INLINE_MODIFIER.captures_iter(&raw) {
                match &caps[1] {
                    "q" | "qq" => linkage.tags.extend(split_tags(&caps[2])),
                    "t" | "gloss" => linkage.english = clean_value(&caps[2]),
                    _ => {}
                }
            }
            linkage.word = clean_value(&INLINE_MODIFIER.replace_all(&raw, ""));
            if !linkage.word.is_empty() {
                self.found.push(linkage);
            }
        }
    }

    fn flush(&mut self, fragment: &mut Fragment) {
        let Fragment { text, english } = std::mem::take(fragment);
        let text = clean_value(&text);
        if text.is_empty() || NOT_WORDS.iter().any(|p| text.starts_with(p)) {
            return;
        }
        let mut linkage = Linkage {
            english,
            sense: self.sense.clone(),
            ..Linkage::default()
        };
        let quoted = QUOTED.captures(&text).map(|caps| (caps[0].to_string(), caps[1].to_string()));
        let mut rest = text.clone();
        if let Some((whole, gloss)) = quoted {
            linkage.english = gloss;
            rest = rest.replace(&whole, "");
        }
        let mut word = rest.as_str();
        if let Some((qualifier, after)) = leading_qualifier(word) {
            linkage.tags.extend(split_tags(qualifier));
            word = after;
        }
        while let Some((qualifier, before)) = trailing_qualifier(word) {
            linkage.tags.extend(split_tags(qualifier));
            word = before;
        }
        linkage.word = word.trim().to_string();
        if linkage.word.is_empty() {
            // A bare qualifier belongs to the word before it.
            if let Some(last) = self.found.last_mut() {
                last.tags.extend(linkage.tags);
            }
            return;
        }
        self.found.push(linkage);
    }
}
