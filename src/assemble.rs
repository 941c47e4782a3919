//! Builds word records from one language section.
//!
//! Data is collected at three levels. Pronunciation before any etymology
//! heading belongs to the language. Everything under an `Etymology N` heading
//! belongs to that etymology, and sections under a part-of-speech heading
//! belong to that part of speech. When a part of speech ends, its record is
//! completed from the etymology and language levels above it.

use crate::config::CaptureOptions;
use crate::diagnostics::PageDiagnostics;
use crate::extractors::{Registry, SectionContext};
use crate::languages::LanguageTable;
use crate::node::Node;
use crate::record::{WordEntry, ALL_LINKAGES};
use crate::sections::{classify, LinkageKind, SectionKind};

/// Parts of speech that may borrow each other's inflection tables.
const SHARED_INFLECTION: &[(&str, &str)] = &[
    ("noun", "adj"),
    ("noun", "name"),
    ("name", "noun"),
    ("name", "adj"),
    ("adj", "noun"),
    ("adj", "name"),
];

pub struct LanguageSection<'a> {
    pub node: &'a Node,
    pub word: &'a str,
    pub lang: &'a str,
    pub lang_code: &'a str,
}

#[derive(Debug, Default)]
pub struct Assembled {
    pub entries: Vec<WordEntry>,
    /// Headings no rule knows about, in page order.
    pub unknown_sections: Vec<String>,
}

pub struct Assembler<'r> {
    registry: &'r Registry,
    capture: CaptureOptions,
    languages: &'r LanguageTable,
}

impl<'r> Assembler<'r> {
    pub fn new(registry: &'r Registry, capture: CaptureOptions, languages: &'r LanguageTable) -> Self {
        Self {
            registry,
            capture,
            languages,
        }
    }

    pub fn assemble(&self, section: &LanguageSection<'_>, diagnostics: &mut PageDiagnostics) -> Assembled {
        let mut base = WordEntry::new(section.word);
        base.lang = section.lang.to_string();
        base.lang_code = section.lang_code.to_string();

        let mut walk = Walk {
            assembler: self,
            section,
            base,
            etymology: None,
            pos: None,
            pos_code: None,
            out: Assembled::default(),
        };
        walk.children(section.node, SectionKind::Unknown, diagnostics);
        walk.push_etymology(diagnostics);

        let mut assembled = walk.out;
        share_inflections(&mut assembled.entries);
        for entry in &mut assembled.entries {
            apply_capture(entry, &self.capture);
        }
        assembled
    }
}

struct Walk<'w, 'r> {
    assembler: &'w Assembler<'r>,
    section: &'w LanguageSection<'w>,
    base: WordEntry,
    etymology: Option<WordEntry>,
    pos: Option<WordEntry>,
    pos_code: Option<&'static str>,
    out: Assembled,
}

/// Which level a section's partials go to.
#[derive(Clone, Copy)]
enum Level {
    Base,
    Etymology,
    Pos,
}

impl Walk<'_, '_> {
    fn children(&mut self, node: &Node, parent: SectionKind, diagnostics: &mut PageDiagnostics) {
        for child in node.children.iter().filter(|c| c.heading_level().is_some()) {
            self.heading(child, parent, diagnostics);
        }
    }

    fn heading(&mut self, node: &Node, parent: SectionKind, diagnostics: &mut PageDiagnostics) {
        let title = node.heading_title().unwrap_or_default();
        let class = classify(&title);
        let level = match class.kind {
            SectionKind::Ignored => return,
            SectionKind::Unknown => {
                self.out.unknown_sections.push(title);
                self.children(node, parent, diagnostics);
                return;
            }
            SectionKind::Etymology => {
                self.push_etymology(diagnostics);
                self.etymology = Some(self.level_entry());
                Level::Etymology
            }
            SectionKind::PartOfSpeech => {
                self.push_pos(diagnostics);
                let mut entry = self.level_entry();
                entry.pos = class.pos.unwrap_or_default().to_string();
                self.pos = Some(entry);
                self.pos_code = class.pos;
                Level::Pos
            }
            SectionKind::Pronunciation => {
                if self.etymology.is_some() {
                    Level::Etymology
                } else {
                    Level::Base
                }
            }
            SectionKind::Translations | SectionKind::Linkage | SectionKind::Inflection => {
                if parent == SectionKind::PartOfSpeech && self.pos.is_some() {
                    Level::Pos
                } else if self.etymology.is_some() {
                    Level::Etymology
                } else {
                    Level::Base
                }
            }
        };

        let ctx = SectionContext {
            word: self.section.word,
            lang: self.section.lang,
            lang_code: self.section.lang_code,
            heading: &title,
            pos: class.pos.or(self.pos_code),
            linkage: class.linkage,
            capture: self.assembler.capture,
            languages: self.assembler.languages,
        };
        let mut partials = Vec::new();
        self.assembler
            .registry
            .run(class.kind, node, &ctx, &mut partials, diagnostics);
        let target = self.level(level);
        for partial in partials {
            target.apply(partial);
        }

        self.children(node, class.kind, diagnostics);
    }

    fn level_entry(&self) -> WordEntry {
        WordEntry::new(self.section.word)
    }

    fn level(&mut self, level: Level) -> &mut WordEntry {
        match level {
            Level::Pos => match self.pos {
                Some(ref mut entry) => entry,
                None => &mut self.base,
            },
            Level::Etymology => match self.etymology {
                Some(ref mut entry) => entry,
                None => &mut self.base,
            },
            Level::Base => &mut self.base,
        }
    }

    /// Completes the current part of speech from the levels above it.
    fn push_pos(&mut self, diagnostics: &mut PageDiagnostics) {
        self.pos_code = None;
        let Some(mut entry) = self.pos.take() else {
            return;
        };
        let mut conflicts = Vec::new();
        if let Some(etymology) = &self.etymology {
            conflicts.extend(entry.merge_base(etymology));
        }
        conflicts.extend(entry.merge_base(&self.base));
        for field in conflicts {
            diagnostics.debug(
                format!("conflicting {} while merging {} record", field, entry.pos),
                self.section.lang,
            );
        }
        if !entry.is_blank() {
            self.out.entries.push(entry);
        }
    }

    /// Ends the current etymology. Data collected there without a part of
    /// speech below it has no record to go to.
    fn push_etymology(&mut self, diagnostics: &mut PageDiagnostics) {
        self.push_pos(diagnostics);
        self.etymology = None;
    }
}

/// Lends conjugation and declension templates to records of a compatible
/// part of speech in the same language that have none.
pub fn share_inflections(entries: &mut [WordEntry]) {
    for i in 0..entries.len() {
        if !entries[i].conjugation.is_empty() {
            continue;
        }
        let donor = entries.iter().enumerate().find_map(|(j, donor)| {
            (j != i
                && donor.lang == entries[i].lang
                && !donor.conjugation.is_empty()
                && can_share(donor, &entries[i]))
            .then(|| donor.conjugation.clone())
        });
        if let Some(conjugation) = donor {
            entries[i].conjugation = conjugation;
        }
    }
}

fn can_share(donor: &WordEntry, recipient: &WordEntry) -> bool {
    if SHARED_INFLECTION
        .iter()
        .any(|(from, to)| donor.pos == *from && recipient.pos == *to)
    {
        return true;
    }
    donor.pos == "verb"
        && recipient.pos == "adj"
        && recipient
            .senses
            .iter()
            .any(|s| s.tags.iter().any(|t| t == "participle") || s.glosses.iter().any(|g| g.contains("participle")))
}

/// Clears fields the run was not asked to capture.
pub fn apply_capture(entry: &mut WordEntry, capture: &CaptureOptions) {
    if !capture.translations {
        entry.translations.clear();
    }
    if !capture.pronunciations {
        entry.sounds.clear();
        entry.hyphenation.clear();
    }
    if !capture.linkages {
        for kind in ALL_LINKAGES.into_iter().filter(|k| *k != LinkageKind::Compounds) {
            entry.linkages_mut(kind).clear();
        }
        for sense in &mut entry.senses {
            sense.synonyms.clear();
            sense.antonyms.clear();
        }
    }
    if !capture.compounds {
        entry.compounds.clear();
    }
    if !capture.examples {
        for sense in &mut entry.senses {
            sense.examples.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractors::testing::{parse, LANGUAGES};
    use crate::record::{Sense, TemplateData};

    fn assemble(text: &str, capture: CaptureOptions) -> (Assembled, PageDiagnostics) {
        let (_expansion, parsed) = parse(text, &[]);
        let language = parsed
            .root
            .children
            .iter()
            .find(|n| n.heading_level() == Some(2))
            .expect("language heading");
        let registry = Registry::standard();
        let assembler = Assembler::new(&registry, capture, &LANGUAGES);
        let mut diagnostics = PageDiagnostics::new("cat");
        let section = LanguageSection {
            node: language,
            word: "cat",
            lang: "English",
            lang_code: "en",
        };
        (assembler.assemble(&section, &mut diagnostics), diagnostics)
    }

    const PAGE: &str = "==English==
===Pronunciation===
* IPA: /kæt/

===Etymology 1===
From {{inh|en|enm|cat}}.

====Noun====
# A feline.

=====Translations=====
* French: [[chat]]

=====Synonyms=====
* [[moggy]]

====Verb====
# To vomit.

===Etymology 2===
Abbreviation.

====Noun====
# A catamaran.

===Usage notes===
Common.

===Anagrams===
* [[act]]
";

    #[test]
    fn levels_flow_into_records() {
        let (assembled, _) = assemble(PAGE, CaptureOptions::all());
        let entries = &assembled.entries;
        assert_eq!(entries.len(), 3);
        let pos: Vec<_> = entries.iter().map(|e| e.pos.as_str()).collect();
        assert_eq!(pos, vec!["noun", "verb", "noun"]);

        assert!(entries.iter().all(|e| e.sounds.len() == 1 && e.lang == "English"));
        assert_eq!(entries[0].etymology_text, "From Middle English cat.");
        assert_eq!(entries[1].etymology_text, "From Middle English cat.");
        assert_eq!(entries[2].etymology_text, "Abbreviation.");

        assert_eq!(entries[0].translations[0].word, "chat");
        assert_eq!(entries[0].synonyms[0].word, "moggy");
        assert!(entries[1].translations.is_empty());
        assert_eq!(entries[2].senses[0].glosses, vec!["A catamaran."]);
        assert_eq!(assembled.unknown_sections, vec!["Usage notes"]);
    }

    #[test]
    fn capture_options_clear_fields() {
        let (assembled, _) = assemble(PAGE, CaptureOptions::none());
        let first = &assembled.entries[0];
        assert!(first.sounds.is_empty());
        assert!(first.translations.is_empty());
        assert!(first.synonyms.is_empty());
        assert_eq!(first.senses.len(), 1);

        let only_translations = CaptureOptions {
            translations: true,
            ..CaptureOptions::none()
        };
        let (assembled, _) = assemble(PAGE, only_translations);
        let json = serde_json::to_value(&assembled.entries[0]).unwrap();
        assert!(json.get("translations").is_some());
        assert!(json.get("synonyms").is_none());
        assert!(json.get("sounds").is_none());
    }

    #[test]
    fn minimal_page_gives_one_record() {
        let (assembled, diagnostics) = assemble("==English==\n===Noun===\n# A cat.\n", CaptureOptions::all());
        assert_eq!(assembled.entries.len(), 1);
        assert!(diagnostics.is_empty());
    }

    #[test]
    fn inflections_are_shared_between_compatible_parts_of_speech() {
        let conj = TemplateData {
            name: "fi-decl".to_string(),
            ..TemplateData::default()
        };
        let mut noun = WordEntry::new("kissa");
        noun.lang = "Finnish".to_string();
        noun.pos = "noun".to_string();
        noun.conjugation.push(conj.clone());
        let mut adj = WordEntry::new("kissa");
        adj.lang = "Finnish".to_string();
        adj.pos = "adj".to_string();
        let mut verb = WordEntry::new("kissa");
        verb.lang = "Finnish".to_string();
        verb.pos = "verb".to_string();
        let mut entries = vec![noun, adj, verb];
        share_inflections(&mut entries);
        assert_eq!(entries[1].conjugation, vec![conj.clone()]);
        assert!(entries[2].conjugation.is_empty());

        let mut verb = WordEntry::new("running");
        verb.pos = "verb".to_string();
        verb.conjugation.push(conj.clone());
        let mut participle = WordEntry::new("running");
        participle.pos = "adj".to_string();
        participle.senses.push(Sense {
            glosses: vec!["present participle of run".to_string()],
            ..Sense::default()
        });
        let mut entries = vec![verb, participle];
        share_inflections(&mut entries);
        assert_eq!(entries[1].conjugation, vec![conj]);
    }
}
