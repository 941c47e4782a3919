use crate::error::ConfigError;
use anyhow::{Context, Result};
use rustc_hash::FxHashMap;
use serde::Deserialize;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct Language {
    pub code: String,
    pub name: String,
}

/// Bidirectional code/name lookup for the languages a run knows about.
#[derive(Debug, Clone, Default)]
pub struct LanguageTable {
    by_code: FxHashMap<String, String>,
    by_name: FxHashMap<String, String>,
}

const BUILTIN: &[(&str, &str)] = &[
    ("en", "English"),
    ("mul", "Translingual"),
    ("fi", "Finnish"),
    ("sv", "Swedish"),
    ("de", "German"),
    ("fr", "French"),
    ("es", "Spanish"),
    ("it", "Italian"),
    ("pt", "Portuguese"),
    ("nl", "Dutch"),
    ("da", "Danish"),
    ("nb", "Norwegian Bokmål"),
    ("no", "Norwegian"),
    ("is", "Icelandic"),
    ("et", "Estonian"),
    ("hu", "Hungarian"),
    ("pl", "Polish"),
    ("cs", "Czech"),
    ("sk", "Slovak"),
    ("ru", "Russian"),
    ("uk", "Ukrainian"),
    ("be", "Belarusian"),
    ("bg", "Bulgarian"),
    ("sh", "Serbo-Croatian"),
    ("sl", "Slovene"),
    ("lt", "Lithuanian"),
    ("lv", "Latvian"),
    ("el", "Greek"),
    ("grc", "Ancient Greek"),
    ("la", "Latin"),
    ("ga", "Irish"),
    ("cy", "Welsh"),
    ("tr", "Turkish"),
    ("az", "Azerbaijani"),
    ("ka", "Georgian"),
    ("hy", "Armenian"),
    ("ar", "Arabic"),
    ("he", "Hebrew"),
    ("fa", "Persian"),
    ("hi", "Hindi"),
    ("ur", "Urdu"),
    ("bn", "Bengali"),
    ("sa", "Sanskrit"),
    ("ta", "Tamil"),
    ("th", "Thai"),
    ("vi", "Vietnamese"),
    ("id", "Indonesian"),
    ("ms", "Malay"),
    ("tl", "Tagalog"),
    ("zh", "Chinese"),
    ("cmn", "Mandarin"),
    ("yue", "Cantonese"),
    ("ja", "Japanese"),
    ("ko", "Korean"),
    ("sw", "Swahili"),
    ("eo", "Esperanto"),
    ("enm", "Middle English"),
    ("ang", "Old English"),
    ("non", "Old Norse"),
    ("gem-pro", "Proto-Germanic"),
    ("ine-pro", "Proto-Indo-European"),
];

impl LanguageTable {
    pub fn builtin() -> Self {
        Self::from_pairs(BUILTIN.iter().map(|(c, n)| (c.to_string(), n.to_string())))
    }

    pub fn from_pairs(pairs: impl IntoIterator<Item = (String, String)>) -> Self {
        let mut table = Self::default();
        for (code, name) in pairs {
            table.by_name.insert(name.clone(), code.clone());
            table.by_code.insert(code, name);
        }
        table
    }

    /// Loads a JSON array of `{"code": .., "name": ..}` objects.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read language table: {:?}", path))?;
        let langs: Vec<Language> = serde_json::from_str(&raw)
            .map_err(|e| ConfigError::LanguageTable(e.to_string()))?;
        if langs.is_empty() {
            return Err(ConfigError::LanguageTable("table is empty".to_string()).into());
        }
        Ok(Self::from_pairs(langs.into_iter().map(|l| (l.code, l.name))))
    }

    pub fn name_for(&self, code: &str) -> Option<&str> {
        self.by_code.get(code).map(String::as_str)
    }

    pub fn code_for(&self, name: &str) -> Option<&str> {
        self.by_name.get(name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.by_code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_code.is_empty()
    }
}

/// Returns the ISO 15924 code of the dominant script in `text`.
///
/// Characters from the Common block (digits, punctuation, spaces) are ignored;
/// text with no letters at all reports `"None"`.
pub fn detect_script(text: &str) -> &'static str {
    let mut counts: FxHashMap<&'static str, usize> = FxHashMap::default();
    for ch in text.chars() {
        if let Some(script) = script_of(ch) {
            *counts.entry(script).or_insert(0) += 1;
        }
    }
    counts
        .into_iter()
        .max_by(|a, b| a.1.cmp(&b.1).then_with(|| b.0.cmp(a.0)))
        .map(|(script, _)| script)
        .unwrap_or("None")
}

fn script_of(ch: char) -> Option<&'static str> {
    let cp = ch as u32;
    let script = match cp {
        0x41..=0x5A | 0x61..=0x7A | 0xC0..=0x24F | 0x1E00..=0x1EFF => "Latn",
        0x370..=0x3FF | 0x1F00..=0x1FFF => "Grek",
        0x400..=0x52F => "Cyrl",
        0x530..=0x58F => "Armn",
        0x590..=0x5FF => "Hebr",
        0x600..=0x6FF | 0x750..=0x77F => "Arab",
        0x900..=0x97F => "Deva",
        0x980..=0x9FF => "Beng",
        0xB80..=0xBFF => "Taml",
        0xE00..=0xE7F => "Thai",
        0x10A0..=0x10FF => "Geor",
        0x3040..=0x309F => "Hira",
        0x30A0..=0x30FF => "Kana",
        0x3400..=0x4DBF | 0x4E00..=0x9FFF | 0x20000..=0x2A6DF => "Hani",
        0xAC00..=0xD7AF | 0x1100..=0x11FF => "Hang",
        _ => return None,
    };
    Some(script)
}
