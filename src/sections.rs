//! Section title classification.

use once_cell::sync::Lazy;
use rustc_hash::FxHashMap;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SectionKind {
    PartOfSpeech,
    Etymology,
    Pronunciation,
    Translations,
    Linkage,
    Inflection,
    Ignored,
    Unknown,
}

/// Which output list a linkage section fills.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum LinkageKind {
    Synonyms,
    Antonyms,
    Hypernyms,
    Hyponyms,
    Holonyms,
    Meronyms,
    Derived,
    Related,
    Coordinate,
    Troponyms,
    Abbreviations,
    Proverbs,
    Compounds,
}

impl LinkageKind {
    pub fn field(self) -> &'static str {
        match self {
            LinkageKind::Synonyms => "synonyms",
            LinkageKind::Antonyms => "antonyms",
            LinkageKind::Hypernyms => "hypernyms",
            LinkageKind::Hyponyms => "hyponyms",
            LinkageKind::Holonyms => "holonyms",
            LinkageKind::Meronyms => "meronyms",
            LinkageKind::Derived => "derived",
            LinkageKind::Related => "related",
            LinkageKind::Coordinate => "coordinate_terms",
            LinkageKind::Troponyms => "troponyms",
            LinkageKind::Abbreviations => "abbreviations",
            LinkageKind::Proverbs => "proverbs",
            LinkageKind::Compounds => "compounds",
        }
    }
}

/// A classified section heading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Section {
    pub kind: SectionKind,
    /// Short part-of-speech code, for `PartOfSpeech` sections.
    pub pos: Option<&'static str>,
    pub linkage: Option<LinkageKind>,
}

impl Section {
    const fn of(kind: SectionKind) -> Self {
        Self {
            kind,
            pos: None,
            linkage: None,
        }
    }

    const fn pos(code: &'static str) -> Self {
        Self {
            kind: SectionKind::PartOfSpeech,
            pos: Some(code),
            linkage: None,
        }
    }

    const fn linkage(kind: LinkageKind) -> Self {
        Self {
            kind: SectionKind::Linkage,
            pos: None,
            linkage: Some(kind),
        }
    }
}

const PARTS_OF_SPEECH: &[(&str, &str)] = &[
    ("noun", "noun"),
    ("proper noun", "name"),
    ("verb", "verb"),
    ("adjective", "adj"),
    ("adverb", "adv"),
    ("pronoun", "pron"),
    ("preposition", "prep"),
    ("postposition", "postp"),
    ("circumposition", "circumpos"),
    ("conjunction", "conj"),
    ("interjection", "intj"),
    ("determiner", "det"),
    ("article", "article"),
    ("numeral", "num"),
    ("number", "num"),
    ("particle", "particle"),
    ("participle", "verb"),
    ("phrase", "phrase"),
    ("prepositional phrase", "prep_phrase"),
    ("idiom", "phrase"),
    ("proverb", "proverb"),
    ("prefix", "prefix"),
    ("suffix", "suffix"),
    ("infix", "infix"),
    ("interfix", "interfix"),
    ("circumfix", "circumfix"),
    ("affix", "affix"),
    ("combining form", "affix"),
    ("letter", "character"),
    ("character", "character"),
    ("symbol", "symbol"),
    ("punctuation mark", "punct"),
    ("abbreviation", "abbrev"),
    ("acronym", "abbrev"),
    ("initialism", "abbrev"),
    ("contraction", "abbrev"),
    ("classifier", "classifier"),
    ("counter", "counter"),
    ("romanization", "romanization"),
    ("adjectival noun", "adj_noun"),
];

const LINKAGES: &[(&str, LinkageKind)] = &[
    ("synonyms", LinkageKind::Synonyms),
    ("antonyms", LinkageKind::Antonyms),
    ("hypernyms", LinkageKind::Hypernyms),
    ("hyponyms", LinkageKind::Hyponyms),
    ("holonyms", LinkageKind::Holonyms),
    ("meronyms", LinkageKind::Meronyms),
    ("derived terms", LinkageKind::Derived),
    ("related terms", LinkageKind::Related),
    ("related characters", LinkageKind::Related),
    ("coordinate terms", LinkageKind::Coordinate),
    ("troponyms", LinkageKind::Troponyms),
    ("abbreviations", LinkageKind::Abbreviations),
    ("proverbs", LinkageKind::Proverbs),
    ("compounds", LinkageKind::Compounds),
];

const IGNORED: &[&str] = &[
    "references",
    "anagrams",
    "further reading",
    "quotations",
    "descendants",
    "trivia",
    "gallery",
    "statistics",
];

static TITLES: Lazy<FxHashMap<&'static str, Section>> = Lazy::new(|| {
    let mut map = FxHashMap::default();
    for (title, code) in PARTS_OF_SPEECH {
        map.insert(*title, Section::pos(*code));
    }
    for (title, kind) in LINKAGES {
        map.insert(*title, Section::linkage(*kind));
    }
    for title in IGNORED {
        map.insert(*title, Section::of(SectionKind::Ignored));
    }
    map.insert("translations", Section::of(SectionKind::Translations));
    for title in ["declension", "conjugation", "inflection"] {
        map.insert(title, Section::of(SectionKind::Inflection));
    }
    map
});

/// Classifies a section heading. Numbered variants (`Etymology 2`,
/// `Pronunciation 1`) map like their base title.
pub fn classify(title: &str) -> Section {
    let lower = title.trim().to_lowercase();
    let base = strip_number(&lower);
    if base == "etymology" {
        return Section::of(SectionKind::Etymology);
    }
    if base == "pronunciation" {
        return Section::of(SectionKind::Pronunciation);
    }
    TITLES
        .get(base)
        .copied()
        .unwrap_or(Section::of(SectionKind::Unknown))
}

fn strip_number(title: &str) -> &str {
    let trimmed = title.trim_end_matches(|c: char| c.is_ascii_digit());
    if trimmed.len() < title.len() {
        trimmed.trim_end()
    } else {
        title
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parts_of_speech_carry_codes() {
        assert_eq!(classify("Noun"), Section::pos("noun"));
        assert_eq!(classify("Proper noun").pos, Some("name"));
        assert_eq!(classify(" Adjective ").pos, Some("adj"));
    }

    #[test]
    fn numbered_headings() {
        assert_eq!(classify("Etymology 2").kind, SectionKind::Etymology);
        assert_eq!(classify("Etymology").kind, SectionKind::Etymology);
        assert_eq!(classify("Pronunciation 1").kind, SectionKind::Pronunciation);
    }

    #[test]
    fn linkage_and_other_headings() {
        assert_eq!(classify("Derived terms").linkage, Some(LinkageKind::Derived));
        assert_eq!(classify("Coordinate terms").linkage.map(LinkageKind::field), Some("coordinate_terms"));
        assert_eq!(classify("Translations").kind, SectionKind::Translations);
        assert_eq!(classify("Conjugation").kind, SectionKind::Inflection);
        assert_eq!(classify("Anagrams").kind, SectionKind::Ignored);
        assert_eq!(classify("Usage notes").kind, SectionKind::Unknown);
    }
}
