//! Text cleanup for extracted values.

use once_cell::sync::Lazy;
use regex::Regex;
use std::borrow::Cow;

static ENTITY: Lazy<Regex> = Lazy::new(|| Regex::new(r"&(#[0-9]+|#[xX][0-9a-fA-F]+|[a-zA-Z]+);").unwrap());
static LEFTOVER_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"</?[a-zA-Z][^<>]*>").unwrap());
static SPACES: Lazy<Regex> = Lazy::new(|| Regex::new(r"[ \t\u{a0}]+").unwrap());
static WIKILINK: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[\[(?:[^\]|]*\|)?([^\]|]*)\]\]").unwrap());
static APOSTROPHES: Lazy<Regex> = Lazy::new(|| Regex::new(r"'{2,}").unwrap());
static EMPTY_PARENS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\(\s*\)").unwrap());

/// Decodes HTML character references. Unknown names are left as written.
pub fn decode_entities(text: &str) -> Cow<'_, str> {
    if memchr::memchr(b'&', text.as_bytes()).is_none() {
        return Cow::Borrowed(text);
    }
    ENTITY.replace_all(text, |caps: &regex::Captures| {
        let body = &caps[1];
        let decoded = if let Some(hex) = body.strip_prefix("#x").or_else(|| body.strip_prefix("#X")) {
            u32::from_str_radix(hex, 16).ok().and_then(char::from_u32)
        } else if let Some(dec) = body.strip_prefix('#') {
            dec.parse::<u32>().ok().and_then(char::from_u32)
        } else {
            named_entity(body)
        };
        match decoded {
            Some(c) => c.to_string(),
            None => caps[0].to_string(),
        }
    })
}

fn named_entity(name: &str) -> Option<char> {
    Some(match name {
        "amp" => '&',
        "lt" => '<',
        "gt" => '>',
        "quot" => '"',
        "apos" => '\'',
        "nbsp" => '\u{a0}',
        "ndash" => '–',
        "mdash" => '—',
        "hellip" => '…',
        "middot" => '·',
        "lrm" => '\u{200e}',
        "rlm" => '\u{200f}',
        "thinsp" => '\u{2009}',
        "zwj" => '\u{200d}',
        "zwnj" => '\u{200c}',
        _ => return None,
    })
}

/// Normalizes a value for output. Entities are decoded, leftover markup is
/// dropped and whitespace collapses to single spaces.
pub fn clean_value(text: &str) -> String {
    let decoded = decode_entities(text);
    let unlinked = WIKILINK.replace_all(&decoded, "$1");
    let unformatted = APOSTROPHES.replace_all(&unlinked, "");
    let untagged = LEFTOVER_TAG.replace_all(&unformatted, "");
    let no_parens = EMPTY_PARENS.replace_all(&untagged, "");
    let mut out = String::with_capacity(no_parens.len());
    for line in no_parens.lines() {
        let line = SPACES.replace_all(line.trim(), " ");
        if line.is_empty() {
            continue;
        }
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(&line);
    }
    out
}

/// Splits at top-level `,` and `;`, ignoring separators inside brackets.
pub fn split_at_comma_semi(text: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut start = 0;
    for (i, c) in text.char_indices() {
        match c {
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth -= 1,
            ',' | ';' if depth <= 0 => {
                parts.push(&text[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&text[start..]);
    parts
}

/// Splits a leading `(qualifier)` off `text`, with an optional colon after it.
pub fn leading_qualifier(text: &str) -> Option<(&str, &str)> {
    let rest = text.trim_start().strip_prefix('(')?;
    let close = matching_paren(rest)?;
    let qualifier = rest[..close].trim();
    let after = rest[close + 1..].trim_start();
    let after = after.strip_prefix(':').unwrap_or(after).trim_start();
    Some((qualifier, after))
}

/// Splits a trailing ` (qualifier)` off `text`.
pub fn trailing_qualifier(text: &str) -> Option<(&str, &str)> {
    let trimmed = text.trim_end();
    let inner = trimmed.strip_suffix(')')?;
    let open = inner.rfind('(')?;
    if open == 0 {
        return None;
    }
    Some((inner[open + 1..].trim(), trimmed[..open].trim_end()))
}

fn matching_paren(s: &str) -> Option<usize> {
    let mut depth = 0usize;
    for (i, c) in s.char_indices() {
        match c {
            '(' => depth += 1,
            ')' if depth == 0 => return Some(i),
            ')' => depth -= 1,
            _ => {}
        }
    }
    None
}

/// Qualifier text split into individual tags.
pub fn split_tags(qualifier: &str) -> Vec<String> {
    qualifier
        .split([',', ';'])
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}
