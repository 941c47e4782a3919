use super::{arg, body, positional, template_name, template_text, SectionContext, SectionExtractor};
use crate::clean::{clean_value, leading_qualifier, split_tags};
use crate::config::CaptureOptions;
use crate::diagnostics::{DiagnosticKind, PageDiagnostics};
use crate::node::{pieces_of, Node, Piece};
use crate::record::{Partial, Sound};
use crate::sections::SectionKind;
use once_cell::sync::Lazy;
use regex::Regex;

static IPA: Lazy<Regex> = Lazy::new(|| Regex::new(r"/[^/,]+?/|\[[^\]0-9,/][^\],/]*?\]").unwrap());
static RHYMES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bRhymes: ([^\s,]+(?:,\s*[^\s,]+)*)").unwrap());
static HOMOPHONES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bHomophones?: ([^()]+)").unwrap());
static HYPHENATION: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bHyphenation: (\S+)").unwrap());
static ENPR: Lazy<Regex> = Lazy::new(|| Regex::new(r"\benPR: ([^\s,]+)").unwrap());

/// IPA, enPR, rhymes, audio, homophones and hyphenation.
pub struct PronunciationExtractor;

impl SectionExtractor for PronunciationExtractor {
    fn kind(&self) -> SectionKind {
        SectionKind::Pronunciation
    }

    fn enabled(&self, capture: &CaptureOptions, _ctx: &SectionContext<'_>) -> bool {
        capture.pronunciations
    }

    fn extract(
        &self,
        section: &Node,
        ctx: &SectionContext<'_>,
        out: &mut Vec<Partial>,
        diagnostics: &mut PageDiagnostics,
    ) {
        let mut found = Found::default();
        let loose: Vec<&Node> = body(section).filter(|n| !n.is_list_item()).collect();
        found.unit(&pieces_of(loose), ctx);
        for item in body(section).filter(|n| n.is_list_item()) {
            found.item(item, ctx);
        }

        if found.sounds.is_empty() && found.hyphenation.is_empty() {
            diagnostics.warning(
                DiagnosticKind::ExtractorSkip,
                "no pronunciations found in pronunciation section",
                ctx.lang,
            );
            return;
        }
        if !found.sounds.is_empty() {
            out.push(Partial::Sounds(found.sounds));
        }
        if !found.hyphenation.is_empty() {
            out.push(Partial::Hyphenation(found.hyphenation));
        }
    }
}

#[derive(Default)]
struct Found {
    sounds: Vec<Sound>,
    hyphenation: Vec<String>,
}

impl Found {
    fn item(&mut self, item: &Node, ctx: &SectionContext<'_>) {
        self.unit(&item.pieces(), ctx);
        for child in item.items() {
            self.item(child, ctx);
        }
    }

    /// One line's worth of pieces. Recognised templates are read from their
    /// arguments; everything else is scanned as text.
    fn unit(&mut self, pieces: &[Piece], ctx: &SectionContext<'_>) {
        let mut tags = Vec::new();
        let mut sounds = Vec::new();
        let mut text = String::new();

        for piece in pieces {
            match piece {
                Piece::Text(t) => text.push_str(t),
                Piece::Link { text: t, .. } => text.push_str(t),
                Piece::Template { origin, text: t } => match template_name(origin).as_str() {
                    "ipa" => sounds.extend(positional(origin, 2).into_iter().map(|ipa| Sound {
                        ipa,
                        ..Sound::default()
                    })),
                    "enpr" => sounds.extend(positional(origin, 1).into_iter().map(|enpr| Sound {
                        enpr,
                        ..Sound::default()
                    })),
                    "audio" => {
                        if let Some(file) = arg(origin, "2") {
                            sounds.push(Sound {
                                audio: file.to_string(),
                                text: clean_value(arg(origin, "3").unwrap_or_default()),
                                ..Sound::default()
                            });
                        }
                    }
                    "rhymes" | "rhyme" => {
                        sounds.extend(positional(origin, 2).into_iter().map(|rhymes| Sound {
                            rhymes,
                            ..Sound::default()
                        }))
                    }
                    "homophones" | "homophone" | "hmp" => {
                        sounds.extend(positional(origin, 2).into_iter().map(|homophone| Sound {
                            homophone,
                            ..Sound::default()
                        }))
                    }
                    "hyphenation" | "hyph" => {
                        let syllables = positional(origin, 2);
                        if !syllables.is_empty() {
                            push_unique(&mut self.hyphenation, syllables.join("-"));
                        }
                    }
                    "a" | "accent" | "q" | "qualifier" | "i" => tags.extend(positional(origin, 1)),
                    "lb" => tags.extend(positional(origin, 2)),
                    _ => text.push_str(&template_text(origin, t, ctx)),
                },
            }
        }

        let text = clean_value(&text);
        let mut rest = text.as_str();
        if let Some((qualifier, after)) = leading_qualifier(rest) {
            tags.extend(split_tags(qualifier));
            rest = after;
        }
        scan_text(rest, &mut sounds, &mut self.hyphenation);

        for mut sound in sounds {
            sound.tags = tags.clone();
            self.sounds.push(sound);
        }
    }
}

fn scan_text(text: &str, sounds: &mut Vec<Sound>, hyphenation: &mut Vec<String>) {
    let is_ipa = text.contains("IPA");
    let mut consumed = String::new();
    if let Some(caps) = RHYMES.captures(text) {
        for ending in caps[1].split(',').map(str::trim).filter(|e| !e.is_empty()) {
            sounds.push(Sound {
                rhymes: ending.to_string(),
                ..Sound::default()
            });
        }
        consumed.push_str(&caps[0]);
    }
    if let Some(caps) = HOMOPHONES.captures(text) {
        for word in caps[1].split(',').map(str::trim).filter(|w| !w.is_empty()) {
            sounds.push(Sound {
                homophone: word.to_string(),
                ..Sound::default()
            });
        }
        consumed.push_str(&caps[0]);
    }
    if let Some(caps) = ENPR.captures(text) {
        sounds.push(Sound {
            enpr: caps[1].to_string(),
            ..Sound::default()
        });
        consumed.push_str(&caps[0]);
    }
    if let Some(caps) = HYPHENATION.captures(text) {
        push_unique(hyphenation, caps[1].replace('‧', "-"));
        consumed.push_str(&caps[0]);
    }
    for m in IPA.find_iter(text) {
        if consumed.contains(m.as_str()) {
            continue;
        }
        let value = m.as_str().to_string();
        sounds.push(if is_ipa {
            Sound {
                ipa: value,
                ..Sound::default()
            }
        } else {
            Sound {
                other: value,
                ..Sound::default()
            }
        });
    }
}

fn push_unique(list: &mut Vec<String>, value: String) {
    if !list.contains(&value) {
        list.push(value);
    }
}
