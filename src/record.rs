//! Output records. Empty fields are left out of the JSON.

use crate::sections::LinkageKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A template call kept as data: its name and arguments.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TemplateData {
    pub name: String,
    pub args: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Example {
    pub text: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub english: String,
    #[serde(rename = "ref", skip_serializing_if = "String::is_empty")]
    pub reference: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub kind: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Linkage {
    pub word: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub english: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub sense: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub source: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Sense {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub glosses: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub examples: Vec<Example>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub synonyms: Vec<Linkage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub antonyms: Vec<Linkage>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Sound {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub ipa: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub enpr: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub rhymes: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub homophone: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub audio: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub text: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub other: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Translation {
    pub lang: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub code: String,
    pub word: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub sense: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub roman: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub alt: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Form {
    pub form: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

/// One record per (word, language, part of speech).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WordEntry {
    pub word: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub lang: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub lang_code: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub pos: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub senses: Vec<Sense>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub heads: Vec<TemplateData>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub forms: Vec<Form>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub conjugation: Vec<TemplateData>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub sounds: Vec<Sound>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub hyphenation: Vec<String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub etymology_text: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub etymology_templates: Vec<TemplateData>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub compounds: Vec<Linkage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub translations: Vec<Translation>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub synonyms: Vec<Linkage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub antonyms: Vec<Linkage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub hypernyms: Vec<Linkage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub hyponyms: Vec<Linkage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub holonyms: Vec<Linkage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub meronyms: Vec<Linkage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub derived: Vec<Linkage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub related: Vec<Linkage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub coordinate_terms: Vec<Linkage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub troponyms: Vec<Linkage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub abbreviations: Vec<Linkage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub proverbs: Vec<Linkage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect: Option<String>,
}

/// A contribution from one extractor, applied to whichever record level the
/// section belongs to.
#[derive(Debug, Clone, PartialEq)]
pub enum Partial {
    Senses(Vec<Sense>),
    Heads(Vec<TemplateData>),
    Tags(Vec<String>),
    Sounds(Vec<Sound>),
    Hyphenation(Vec<String>),
    Translations(Vec<Translation>),
    Linkages(LinkageKind, Vec<Linkage>),
    Etymology {
        text: String,
        templates: Vec<TemplateData>,
    },
    Conjugation(Vec<TemplateData>),
    Forms(Vec<Form>),
}

impl WordEntry {
    pub fn new(word: &str) -> Self {
        Self {
            word: word.to_string(),
            ..Self::default()
        }
    }

    pub fn redirect(word: &str, target: &str) -> Self {
        Self {
            word: word.to_string(),
            redirect: Some(target.to_string()),
            ..Self::default()
        }
    }

    pub fn linkages_mut(&mut self, kind: LinkageKind) -> &mut Vec<Linkage> {
        match kind {
            LinkageKind::Synonyms => &mut self.synonyms,
            LinkageKind::Antonyms => &mut self.antonyms,
            LinkageKind::Hypernyms => &mut self.hypernyms,
            LinkageKind::Hyponyms => &mut self.hyponyms,
            LinkageKind::Holonyms => &mut self.holonyms,
            LinkageKind::Meronyms => &mut self.meronyms,
            LinkageKind::Derived => &mut self.derived,
            LinkageKind::Related => &mut self.related,
            LinkageKind::Coordinate => &mut self.coordinate_terms,
            LinkageKind::Troponyms => &mut self.troponyms,
            LinkageKind::Abbreviations => &mut self.abbreviations,
            LinkageKind::Proverbs => &mut self.proverbs,
            LinkageKind::Compounds => &mut self.compounds,
        }
    }

    pub fn apply(&mut self, partial: Partial) {
        match partial {
            Partial::Senses(s) => self.senses.extend(s),
            Partial::Heads(h) => self.heads.extend(h),
            Partial::Tags(t) => extend_unique(&mut self.tags, t),
            Partial::Sounds(s) => self.sounds.extend(s),
            Partial::Hyphenation(h) => extend_unique(&mut self.hyphenation, h),
            Partial::Translations(t) => self.translations.extend(t),
            Partial::Linkages(kind, items) => self.linkages_mut(kind).extend(items),
            Partial::Etymology { text, templates } => {
                if self.etymology_text.is_empty() {
                    self.etymology_text = text;
                } else if !text.is_empty() {
                    self.etymology_text.push(' ');
                    self.etymology_text.push_str(&text);
                }
                self.etymology_templates.extend(templates);
            }
            Partial::Conjugation(c) => self.conjugation.extend(c),
            Partial::Forms(f) => self.forms.extend(f),
        }
    }

    /// Fills this record from a higher level: lists are extended and unset
    /// scalars copied. Returns the names of scalar fields that disagreed.
    pub fn merge_base(&mut self, base: &WordEntry) -> Vec<&'static str> {
        let mut conflicts = Vec::new();
        merge_scalar(&mut self.lang, &base.lang, "lang", &mut conflicts);
        merge_scalar(&mut self.lang_code, &base.lang_code, "lang_code", &mut conflicts);
        merge_scalar(&mut self.pos, &base.pos, "pos", &mut conflicts);
        merge_scalar(
            &mut self.etymology_text,
            &base.etymology_text,
            "etymology_text",
            &mut conflicts,
        );
        extend_unique(&mut self.tags, base.tags.iter().cloned());
        self.senses.extend(base.senses.iter().cloned());
        self.heads.extend(base.heads.iter().cloned());
        self.forms.extend(base.forms.iter().cloned());
        self.conjugation.extend(base.conjugation.iter().cloned());
        self.sounds.extend(base.sounds.iter().cloned());
        extend_unique(&mut self.hyphenation, base.hyphenation.iter().cloned());
        self.etymology_templates
            .extend(base.etymology_templates.iter().cloned());
        self.translations.extend(base.translations.iter().cloned());
        for kind in ALL_LINKAGES {
            let items = base.linkages(kind).to_vec();
            self.linkages_mut(kind).extend(items);
        }
        conflicts
    }

    pub fn linkages(&self, kind: LinkageKind) -> &[Linkage] {
        match kind {
            LinkageKind::Synonyms => &self.synonyms,
            LinkageKind::Antonyms => &self.antonyms,
            LinkageKind::Hypernyms => &self.hypernyms,
            LinkageKind::Hyponyms => &self.hyponyms,
            LinkageKind::Holonyms => &self.holonyms,
            LinkageKind::Meronyms => &self.meronyms,
            LinkageKind::Derived => &self.derived,
            LinkageKind::Related => &self.related,
            LinkageKind::Coordinate => &self.coordinate_terms,
            LinkageKind::Troponyms => &self.troponyms,
            LinkageKind::Abbreviations => &self.abbreviations,
            LinkageKind::Proverbs => &self.proverbs,
            LinkageKind::Compounds => &self.compounds,
        }
    }

    /// True when nothing beyond the word itself has been collected.
    pub fn is_blank(&self) -> bool {
        let bare = WordEntry::new(&self.word);
        *self == bare
    }
}

pub const ALL_LINKAGES: [LinkageKind; 13] = [
    LinkageKind::Synonyms,
    LinkageKind::Antonyms,
    LinkageKind::Hypernyms,
    LinkageKind::Hyponyms,
    LinkageKind::Holonyms,
    LinkageKind::Meronyms,
    LinkageKind::Derived,
    LinkageKind::Related,
    LinkageKind::Coordinate,
    LinkageKind::Troponyms,
    LinkageKind::Abbreviations,
    LinkageKind::Proverbs,
    LinkageKind::Compounds,
];

fn merge_scalar(
    field: &mut String,
    base: &str,
    name: &'static str,
    conflicts: &mut Vec<&'static str>,
) {
    if base.is_empty() {
        return;
    }
    if field.is_empty() {
        *field = base.to_string();
    } else if field != base {
        conflicts.push(name);
    }
}

fn extend_unique(list: &mut Vec<String>, items: impl IntoIterator<Item = String>) {
    for item in items {
        if !list.contains(&item) {
            list.push(item);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_fields_are_omitted() {
        let entry = WordEntry::new("cat");
        assert_eq!(serde_json::to_string(&entry).unwrap(), r#"{"word":"cat"}"#);
        let redirect = WordEntry::redirect("Cat", "cat");
        assert_eq!(
            serde_json::to_string(&redirect).unwrap(),
            r#"{"word":"Cat","redirect":"cat"}"#
        );
    }

    #[test]
    fn merge_base_extends_lists_and_fills_scalars() {
        let mut base = WordEntry::new("cat");
        base.lang = "English".to_string();
        base.sounds.push(Sound {
            ipa: "/kæt/".to_string(),
            ..Sound::default()
        });
        let mut pos = WordEntry::new("cat");
        pos.pos = "noun".to_string();
        pos.lang = "English".to_string();
        let conflicts = pos.merge_base(&base);
        assert!(conflicts.is_empty());
        assert_eq!(pos.sounds.len(), 1);
        assert_eq!(pos.pos, "noun");

        let mut other = WordEntry::new("cat");
        other.lang = "French".to_string();
        assert_eq!(other.merge_base(&base), vec!["lang"]);
    }

    #[test]
    fn apply_routes_linkages() {
        let mut entry = WordEntry::new("cat");
        entry.apply(Partial::Linkages(
            LinkageKind::Coordinate,
            vec![Linkage {
                word: "dog".to_string(),
                ..Linkage::default()
            }],
        ));
        assert_eq!(entry.coordinate_terms.len(), 1);
        assert!(!entry.is_blank());
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["coordinate_terms"][0]["word"], "dog");
    }
}
