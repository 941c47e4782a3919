use super::{arg, body, positional, render, template_data, template_name, SectionContext, SectionExtractor};
use crate::clean::{clean_value, leading_qualifier, split_tags};
use crate::config::CaptureOptions;
use crate::diagnostics::{DiagnosticKind, PageDiagnostics};
use crate::node::{pieces_of, Node, Piece};
use crate::record::{Example, Linkage, Partial, Sense};
use crate::sections::SectionKind;
use once_cell::sync::Lazy;
use regex::Regex;

static HEAD_TEMPLATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(head|han char|[a-z]{2,3}(-[a-z]+)*-(plural noun|plural-noun|noun|verb|adj|adv|name|proper noun|proper-noun|prop|pron|phrase|prefix|suffix|infix|affix|combining form|num|number|ordinal|interj|intj|det|part|particle|prep|postp|conj|con|abbr|letter|cont|pos|gerund|converb|clitic)(-|$))",
    )
    .unwrap()
});

/// Templates that never contribute gloss text.
const GLOSS_SKIP: &[&str] = &[
    "syn", "synonyms", "ant", "antonyms", "hyper", "hypo", "ldl", "senseid", "defdate", "rfex",
    "rfquote", "rfdef",
];

const EXAMPLE_TEMPLATES: &[&str] = &["ux", "usex", "uxi", "ux-lite", "coi", "collocation"];

/// Glosses, examples and head templates of a part-of-speech section.
pub struct SensesExtractor;

impl SectionExtractor for SensesExtractor {
    fn kind(&self) -> SectionKind {
        SectionKind::PartOfSpeech
    }

    fn enabled(&self, _capture: &CaptureOptions, _ctx: &SectionContext<'_>) -> bool {
        true
    }

    fn extract(
        &self,
        section: &Node,
        ctx: &SectionContext<'_>,
        out: &mut Vec<Partial>,
        diagnostics: &mut PageDiagnostics,
    ) {
        let mut preamble = Vec::new();
        let mut senses = Vec::new();
        let mut seen_list = false;

        for node in body(section) {
            if node.is_list_item() {
                seen_list = true;
                let prefix = node.list_prefix().unwrap_or("");
                if prefix.starts_with('#') && !prefix.ends_with([':', '*']) {
                    parse_sense(node, ctx, &[], &mut senses, diagnostics);
                }
            } else if !seen_list {
                preamble.push(node);
            }
        }

        let heads: Vec<_> = pieces_of(preamble)
            .iter()
            .filter_map(|piece| match piece {
                Piece::Template { origin, .. } if HEAD_TEMPLATE.is_match(&template_name(origin)) => {
                    Some(template_data(origin))
                }
                _ => None,
            })
            .collect();

        if senses.is_empty() {
            diagnostics.warning(
                DiagnosticKind::ExtractorSkip,
                format!("{}: no sense list found", ctx.heading),
                ctx.lang,
            );
        }
        if !heads.is_empty() {
            out.push(Partial::Heads(heads));
        }
        if !senses.is_empty() {
            out.push(Partial::Senses(senses));
        }
    }
}

fn parse_sense(
    item: &Node,
    ctx: &SectionContext<'_>,
    parents: &[String],
    senses: &mut Vec<Sense>,
    diagnostics: &mut PageDiagnostics,
) {
    let pieces = item.pieces();
    let mut sense = Sense::default();

    for piece in &pieces {
        let Piece::Template { origin, .. } = piece else {
            continue;
        };
        if !ctx.capture.linkages {
            continue;
        }
        match template_name(origin).as_str() {
            "syn" | "synonyms" => sense.synonyms.extend(linkage_args(origin)),
            "ant" | "antonyms" => sense.antonyms.extend(linkage_args(origin)),
            _ => {}
        }
    }

    let rendered = render(&pieces, ctx, GLOSS_SKIP);
    let mut gloss = rendered.as_str();
    if let Some((qualifier, rest)) = leading_qualifier(gloss) {
        sense.tags = split_tags(qualifier);
        gloss = rest;
    }
    let gloss = gloss.strip_prefix(", ").unwrap_or(gloss).trim();

    sense.glosses = parents.to_vec();
    if !gloss.is_empty() {
        sense.glosses.push(gloss.to_string());
    }

    if ctx.capture.examples {
        for child in item.items() {
            match child.list_prefix().and_then(|p| p.chars().last()) {
                Some(':') => sense.examples.extend(example(child, ctx)),
                Some('*') => sense.examples.extend(quotation(child, ctx)),
                _ => {}
            }
        }
    }

    let glosses = sense.glosses.clone();
    if gloss.is_empty() {
        diagnostics.warning(
            DiagnosticKind::ExtractorSkip,
            format!("{}: empty gloss", ctx.heading),
            &item.to_wikitext(),
        );
        if !sense.examples.is_empty() {
            senses.push(sense);
        }
    } else {
        senses.push(sense);
    }

    for child in item.items() {
        if child.list_prefix().is_some_and(|p| p.ends_with('#')) {
            parse_sense(child, ctx, &glosses, senses, diagnostics);
        }
    }
}

fn linkage_args(origin: &crate::expand::TemplateOrigin) -> Vec<Linkage> {
    positional(origin, 2)
        .into_iter()
        .map(|word| match word.strip_prefix("Thesaurus:") {
            Some(local) => Linkage {
                word: local.to_string(),
                source: word.clone(),
                ..Linkage::default()
            },
            None => Linkage {
                word,
                ..Linkage::default()
            },
        })
        .collect()
}

/// `#:` line; a nested `#::` line carries its translation.
fn example(item: &Node, ctx: &SectionContext<'_>) -> Option<Example> {
    let pieces = item.pieces();
    let mut example = Example {
        kind: "example".to_string(),
        ..Example::default()
    };
    let template = pieces.iter().find_map(|p| match p {
        Piece::Template { origin, .. } if EXAMPLE_TEMPLATES.contains(&template_name(origin).as_str()) => {
            Some(origin)
        }
        _ => None,
    });
    match template {
        Some(origin) => {
            example.text = clean_value(arg(origin, "2").unwrap_or_default());
            example.english = clean_value(
                arg(origin, "3")
                    .or_else(|| arg(origin, "t"))
                    .or_else(|| arg(origin, "translation"))
                    .unwrap_or_default(),
            );
        }
        None => example.text = render(&pieces, ctx, &[]),
    }
    if example.english.is_empty() {
        if let Some(translation) = item.items().next() {
            example.english = render(&translation.pieces(), ctx, &[]);
        }
    }
    (!example.text.is_empty()).then_some(example)
}

/// `#*` citation line; the quoted passage follows as a `#*:` line.
fn quotation(item: &Node, ctx: &SectionContext<'_>) -> Option<Example> {
    let reference = render(&item.pieces(), ctx, &[]);
    let passages: Vec<String> = item
        .items()
        .filter(|c| c.list_prefix().is_some_and(|p| p.ends_with(':')))
        .map(|c| render(&c.pieces(), ctx, &[]))
        .filter(|t| !t.is_empty())
        .collect();
    let (text, reference) = if passages.is_empty() {
        (reference, String::new())
    } else {
        (passages.join(" "), reference)
    };
    (!text.is_empty()).then(|| Example {
        text,
        reference,
        kind: "quotation".to_string(),
        ..Example::default()
    })
}

#[cfg(test)]
mod tests {
    use super::super::testing::{ctx, run};
    use super::*;

    fn senses(partials: &[Partial]) -> Vec<Sense> {
        partials
            .iter()
            .find_map(|p| match p {
                Partial::Senses(s) => Some(s.clone()),
                _ => None,
            })
            .unwrap_or_default()
    }

    const PAGE: &str = "===Noun===
{{en-noun}}

# {{lb|en|zoology}} A small [[domesticated]] [[carnivore]]. {{syn|en|kitty|Thesaurus:cat}}
#: The '''cat''' sat on the mat.
#* 1905, Someone, ''A Book''
#*: The cat was grey.
## A wild cat.
# (informal) A person.
";

    #[test]
    fn glosses_tags_and_heads() {
        let (partials, diagnostics) = run(&SensesExtractor, PAGE, &[], &ctx(CaptureOptions::none()));
        assert!(diagnostics.is_empty());
        let heads = partials.iter().find_map(|p| match p {
            Partial::Heads(h) => Some(h.clone()),
            _ => None,
        });
        assert_eq!(heads.unwrap()[0].name, "en-noun");

        let senses = senses(&partials);
        assert_eq!(senses.len(), 3);
        assert_eq!(senses[0].glosses, vec!["A small domesticated carnivore."]);
        assert_eq!(senses[0].tags, vec!["zoology"]);
        assert!(senses[0].examples.is_empty());
        assert!(senses[0].synonyms.is_empty());
        assert_eq!(
            senses[1].glosses,
            vec!["A small domesticated carnivore.", "A wild cat."]
        );
        assert_eq!(senses[2].tags, vec!["informal"]);
        assert_eq!(senses[2].glosses, vec!["A person."]);
    }

    #[test]
    fn examples_and_sense_linkages_follow_capture() {
        let (partials, _) = run(&SensesExtractor, PAGE, &[], &ctx(CaptureOptions::all()));
        let senses = senses(&partials);
        let examples = &senses[0].examples;
        assert_eq!(examples.len(), 2);
        assert_eq!(examples[0].text, "The cat sat on the mat.");
        assert_eq!(examples[0].kind, "example");
        assert_eq!(examples[1].text, "The cat was grey.");
        assert_eq!(examples[1].reference, "1905, Someone, A Book");
        assert_eq!(senses[0].synonyms[0].word, "kitty");
        assert_eq!(senses[0].synonyms[1].word, "cat");
        assert_eq!(senses[0].synonyms[1].source, "Thesaurus:cat");
    }

    #[test]
    fn usage_example_template() {
        let page = "===Verb===\n# To purr.\n#: {{ux|en|The cat '''purrs'''.|Le chat ronronne.}}\n";
        let (partials, _) = run(&SensesExtractor, page, &[], &ctx(CaptureOptions::all()));
        let example = &senses(&partials)[0].examples[0];
        assert_eq!(example.text, "The cat purrs.");
        assert_eq!(example.english, "Le chat ronronne.");
    }

    #[test]
    fn missing_sense_list_is_reported() {
        let (partials, diagnostics) = run(&SensesExtractor, "===Noun===\n{{en-noun}}\n", &[], &ctx(CaptureOptions::none()));
        assert!(diagnostics.has(DiagnosticKind::ExtractorSkip));
        assert!(senses(&partials).is_empty());
    }
}
