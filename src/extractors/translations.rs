use super::{arg, body, positional, template_name, template_text, SectionContext, SectionExtractor};
use crate::clean::{clean_value, leading_qualifier, split_at_comma_semi, split_tags, trailing_qualifier};
use crate::config::CaptureOptions;
use crate::diagnostics::{DiagnosticKind, PageDiagnostics};
use crate::expand::TemplateOrigin;
use crate::node::{Node, Piece};
use crate::record::{Partial, Translation};
use crate::sections::SectionKind;
use once_cell::sync::Lazy;
use regex::Regex;

static LANGUAGE_PREFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*([-' \w]+?)\s*:\s*").unwrap());

const TRANSLATION_TEMPLATES: &[&str] = &["t", "t+", "tt", "tt+", "t-simple", "t+check", "t-check"];
const NOT_TRANSLATIONS: &[&str] = &["Use ", "use ", "suffix ", "prefix ", "please add this translation"];
const CHECK_SENSE: &str = "Translations to be checked";

/// Translation tables grouped by `trans-top` sense.
pub struct TranslationsExtractor;

impl SectionExtractor for TranslationsExtractor {
    fn kind(&self) -> SectionKind {
        SectionKind::Translations
    }

    fn enabled(&self, capture: &CaptureOptions, _ctx: &SectionContext<'_>) -> bool {
        capture.translations
    }

    fn extract(
        &self,
        section: &Node,
        ctx: &SectionContext<'_>,
        out: &mut Vec<Partial>,
        diagnostics: &mut PageDiagnostics,
    ) {
        let mut state = State {
            ctx,
            sense: String::new(),
            translations: Vec::new(),
        };
        for node in body(section) {
            state.node(node, diagnostics);
        }
        if !state.translations.is_empty() {
            out.push(Partial::Translations(state.translations));
        }
    }
}

struct State<'c, 'a> {
    ctx: &'c SectionContext<'a>,
    sense: String,
    translations: Vec<Translation>,
}

impl State<'_, '_> {
    fn node(&mut self, node: &Node, diagnostics: &mut PageDiagnostics) {
        if node.is_list_item() {
            self.item(node, None, diagnostics);
            return;
        }
        if let Some(origin) = node.origin() {
            let name = template_name(&origin);
            if name == "checktrans-top" {
                self.sense = CHECK_SENSE.to_string();
            } else if name.ends_with("-top") {
                self.sense = arg(&origin, "1").map(clean_value).unwrap_or_default();
            } else if name.ends_with("-bottom") {
                self.sense.clear();
            }
            return;
        }
        // Tables and wrappers produced by the grouping templates.
        for child in &node.children {
            self.node(child, diagnostics);
        }
    }

    /// `Language: word (tr), word`; nested items are sub-languages or
    /// scripts of `parent`.
    fn item(&mut self, item: &Node, parent: Option<&str>, diagnostics: &mut PageDiagnostics) {
        let pieces = item.pieces();
        let Some((language, rest)) = split_language(&pieces) else {
            if parent.is_none() {
                diagnostics.warning(
                    DiagnosticKind::ExtractorSkip,
                    "no language name in translation item",
                    &item.to_wikitext(),
                );
            }
            return;
        };
        let (lang, tags) = match parent {
            Some(parent) => (parent.to_string(), vec![language.clone()]),
            None => (language.clone(), Vec::new()),
        };
        let code = self
            .ctx
            .languages
            .code_for(&lang)
            .map(str::to_string)
            .unwrap_or_default();

        let mut fragment = Fragment::default();
        for piece in rest {
            match piece {
                Piece::Text(text) => {
                    let parts = split_at_comma_semi(&text);
                    for (i, part) in parts.iter().enumerate() {
                        if i > 0 {
                            self.flush(&mut fragment, &lang, &code, &tags);
                        }
                        fragment.text.push_str(part);
                    }
                }
                Piece::Link { text, .. } => fragment.text.push_str(&text),
                Piece::Template { origin, text } => {
                    let name = template_name(&origin);
                    if TRANSLATION_TEMPLATES.contains(&name.as_str()) {
                        self.flush(&mut fragment, &lang, &code, &tags);
                        if let Some(t) = self.from_template(&origin, &lang, &code, &tags) {
                            self.translations.push(t);
                            fragment.after_template = true;
                        }
                    } else if name == "t-needed" || name == "trreq" {
                        continue;
                    } else {
                        fragment.text.push_str(&template_text(&origin, &text, self.ctx));
                    }
                }
            }
        }
        self.flush(&mut fragment, &lang, &code, &tags);

        for child in item.items() {
            self.item(child, Some(&lang), diagnostics);
        }
    }

    fn from_template(
        &self,
        origin: &TemplateOrigin,
        lang: &str,
        code: &str,
        tags: &[String],
    ) -> Option<Translation> {
        let word = clean_value(arg(origin, "2")?);
        let mut translation = Translation {
            lang: lang.to_string(),
            code: arg(origin, "1").unwrap_or(code).to_string(),
            word,
            sense: self.sense.clone(),
            roman: arg(origin, "tr").map(clean_value).unwrap_or_default(),
            alt: arg(origin, "alt").map(clean_value).unwrap_or_default(),
            tags: tags.to_vec(),
        };
        translation.tags.extend(positional(origin, 3));
        Some(translation)
    }

    /// Turns accumulated free text into a translation, or into tags for the
    /// template translation just before it.
    fn flush(&mut self, fragment: &mut Fragment, lang: &str, code: &str, tags: &[String]) {
        let text = clean_value(&std::mem::take(&mut fragment.text));
        let after_template = std::mem::replace(&mut fragment.after_template, false);
        if text.is_empty() || NOT_TRANSLATIONS.iter().any(|p| text.starts_with(p)) {
            return;
        }
        let mut word = text.as_str();
        let mut qualifiers = Vec::new();
        if let Some((q, rest)) = leading_qualifier(word) {
            qualifiers.extend(split_tags(q));
            word = rest;
        }
        while let Some((q, rest)) = trailing_qualifier(word) {
            qualifiers.extend(split_tags(q));
            word = rest;
        }
        let word = word.trim();
        if word.is_empty() {
            if after_template {
                if let Some(last) = self.translations.last_mut() {
                    last.tags.extend(qualifiers);
                }
            }
            return;
        }
        let mut all_tags = tags.to_vec();
        all_tags.extend(qualifiers);
        self.translations.push(Translation {
            lang: lang.to_string(),
            code: code.to_string(),
            word: word.to_string(),
            sense: self.sense.clone(),
            tags: all_tags,
            ..Translation::default()
        });
    }
}

#[derive(Default)]
struct Fragment {
    text: String,
    after_template: bool,
}

/// Splits the leading `Language:` off an item's pieces.
fn split_language(pieces: &[Piece]) -> Option<(String, Vec<Piece>)> {
    let Some(Piece::Text(first)) = pieces.first() else {
        return None;
    };
    let caps = LANGUAGE_PREFIX.captures(first)?;
    let language = caps[1].trim().to_string();
    let after = first[caps.get(0)?.end()..].to_string();
    let mut rest = Vec::with_capacity(pieces.len());
    if !after.is_empty() {
        rest.push(Piece::Text(after));
    }
    rest.extend(pieces[1..].iter().cloned());
    Some((language, rest))
}

#[cfg(test)]
mod tests {
    use super::super::testing::{ctx, run};
    use super::*;

    fn translations(text: &str) -> (Vec<Translation>, PageDiagnostics) {
        let (partials, diagnostics) = run(&TranslationsExtractor, text, &[], &ctx(CaptureOptions::all()));
        let list = partials
            .into_iter()
            .find_map(|p| match p {
                Partial::Translations(t) => Some(t),
                _ => None,
            })
            .unwrap_or_default();
        (list, diagnostics)
    }

    #[test]
    fn grouped_by_sense() {
        let (list, diagnostics) = translations(
            "====Translations====
{{trans-top|domestic animal}}
* Finnish: {{t+|fi|kissa}}, {{t|fi|katti}} (colloquial)
* French: {{t+|fr|chat|m}}, {{t|fr|chatte|f}}
{{trans-bottom}}
{{trans-top|person}}
* German: [[Katze]]
{{trans-bottom}}
",
        );
        assert!(diagnostics.is_empty());
        let words: Vec<_> = list.iter().map(|t| (t.lang.as_str(), t.word.as_str(), t.sense.as_str())).collect();
        assert_eq!(
            words,
            vec![
                ("Finnish", "kissa", "domestic animal"),
                ("Finnish", "katti", "domestic animal"),
                ("French", "chat", "domestic animal"),
                ("French", "chatte", "domestic animal"),
                ("German", "Katze", "person"),
            ]
        );
        assert_eq!(list[1].tags, vec!["colloquial"]);
        assert_eq!(list[2].tags, vec!["m"]);
        assert_eq!(list[2].code, "fr");
        assert_eq!(list[4].code, "de");
    }

    #[test]
    fn nested_sub_languages() {
        let (list, _) = translations(
            "====Translations====
* Chinese:
*: Mandarin: {{t|cmn|貓|tr=māo}}
",
        );
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].lang, "Chinese");
        assert_eq!(list[0].code, "cmn");
        assert_eq!(list[0].tags, vec!["Mandarin"]);
        assert_eq!(list[0].roman, "māo");
    }

    #[test]
    fn non_translations_are_skipped() {
        let (list, diagnostics) = translations(
            "====Translations====
{{checktrans-top}}
* Spanish: please add this translation if you can
* Italian: gatto
* not a language item
",
        );
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].word, "gatto");
        assert_eq!(list[0].sense, CHECK_SENSE);
        assert!(diagnostics.has(DiagnosticKind::ExtractorSkip));
    }
}
