//! Integration tests for the wiktlex extraction pipeline.
//!
//! These tests drive the complete data flow from a BZ2-compressed XML dump
//! through the page store, template expansion and section extraction to the
//! `words.jsonl` output.
//!
//! - **Parser Tests** -- XML parsing, BZ2 decompression, namespaces
//! - **Store Tests** -- What the loading pass keeps, snapshot reuse
//! - **Extraction Tests** -- Records, capture filtering, language selection
//! - **Side Channels** -- Page capture and diagnostics export
//!
//! # Sample Data
//!
//! The fixture holds:
//! - 1 template: `Template:gloss-cat`, with a defaulted parameter
//! - 1 module: `Module:words`, called through `{{#invoke:}}`
//! - 2 articles: "cat" (English and Finnish sections), "dog"
//! - 1 redirect: "Cat" → "cat"

use bzip2::write::BzEncoder;
use bzip2::Compression;
use serde_json::Value;
use std::fs;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use tempfile::{NamedTempFile, TempDir};
use wiktlex::config::{CaptureOptions, ExtractionConfig};
use wiktlex::error::ConfigError;
use wiktlex::extract::{prepare_store, run_extraction, ExtractOptions, OUTPUT_FILE};
use wiktlex::languages::LanguageTable;
use wiktlex::models::Namespace;
use wiktlex::parser::WikiReader;
use wiktlex::store::{PageLookup, PageStore};

/// Helper: create a BZ2-compressed XML file from a string.
///
/// The returned NamedTempFile keeps the file alive until it goes out of scope.
fn create_bz2_xml(xml: &str) -> NamedTempFile {
    let mut encoder = BzEncoder::new(Vec::new(), Compression::fast());
    encoder.write_all(xml.as_bytes()).unwrap();
    let compressed = encoder.finish().unwrap();

    let mut tmp = tempfile::Builder::new().suffix(".xml.bz2").tempfile().unwrap();
    tmp.write_all(&compressed).unwrap();
    tmp.flush().unwrap();
    tmp
}

fn sample_xml() -> &'static str {
    r#"<mediawiki>
        <page>
            <title>Template:gloss-cat</title>
            <ns>10</ns>
            <id>1</id>
            <revision>
                <id>100</id>
                <timestamp>2024-01-15T10:30:00Z</timestamp>
                <text>A small {{{1|domesticated}}} carnivore.&lt;noinclude&gt;[[Category:Gloss templates]]&lt;/noinclude&gt;</text>
            </revision>
        </page>
        <page>
            <title>Module:words</title>
            <ns>828</ns>
            <id>2</id>
            <revision>
                <id>200</id>
                <timestamp>2024-01-15T10:30:00Z</timestamp>
                <text>local p = {}
function p.wild(frame)
  return "A wild " .. frame.args[1] .. "."
end
return p</text>
            </revision>
        </page>
        <page>
            <title>cat</title>
            <ns>0</ns>
            <id>3</id>
            <revision>
                <id>300</id>
                <timestamp>2024-02-20T14:00:00Z</timestamp>
                <text>==English==
===Etymology===
From Middle English cat.

===Noun===
{{en-noun}}
# {{gloss-cat}}
# {{#invoke:words|wild|feline}}

====Translations====
{{trans-top|domestic animal}}
* Finnish: {{t+|fi|kissa}}
{{trans-bottom}}

====Synonyms====
* [[kitty]]

==Finnish==
===Noun===
# [[cat]]
</text>
            </revision>
        </page>
        <page>
            <title>dog</title>
            <ns>0</ns>
            <id>4</id>
            <revision>
                <id>400</id>
                <timestamp>2024-02-20T14:00:00Z</timestamp>
                <text>==English==
===Noun===
# A domesticated canine.
</text>
            </revision>
        </page>
        <page>
            <title>Cat</title>
            <ns>0</ns>
            <id>5</id>
            <redirect title="cat" />
            <revision>
                <id>500</id>
                <timestamp>2024-01-01T00:00:00Z</timestamp>
                <text>#REDIRECT [[cat]]</text>
            </revision>
        </page>
    </mediawiki>"#
}

fn config(languages: &[&str], capture: CaptureOptions) -> ExtractionConfig {
    let names: Vec<String> = languages.iter().map(|s| s.to_string()).collect();
    ExtractionConfig::new(&names, capture, Arc::new(LanguageTable::builtin())).unwrap()
}

fn options(input: &Path, output: &Path) -> ExtractOptions {
    ExtractOptions {
        input: input.to_str().unwrap().to_string(),
        output_dir: output.to_str().unwrap().to_string(),
        pretty: false,
        limit: None,
        threads: Some(2),
        capture_dir: None,
    }
}

fn read_records(output: &Path) -> Vec<Value> {
    fs::read_to_string(output.join(OUTPUT_FILE))
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

fn find<'a>(records: &'a [Value], word: &str, lang: &str) -> &'a Value {
    records
        .iter()
        .find(|r| r["word"] == word && r["lang"] == lang)
        .unwrap_or_else(|| panic!("no record for {} ({})", word, lang))
}

// ============================================================================
// Parser Tests
// ============================================================================

#[test]
fn test_reader_parses_bz2_dump() {
    let tmp = create_bz2_xml(sample_xml());
    let pages: Vec<_> = WikiReader::new(tmp.path().to_str().unwrap(), false)
        .unwrap()
        .collect();

    assert_eq!(pages.len(), 5);
    assert_eq!(pages[0].namespace(), Namespace::Template);
    assert_eq!(pages[0].local_title(), "gloss-cat");
    assert_eq!(pages[1].namespace(), Namespace::Module);
    assert_eq!(pages[2].namespace(), Namespace::Main);
    assert!(pages[2].text.as_deref().unwrap().starts_with("==English=="));
}

// ============================================================================
// Store Tests
// ============================================================================

#[test]
fn test_store_keeps_templates_modules_and_redirects() {
    let tmp = create_bz2_xml(sample_xml());
    let store = PageStore::load_dump(tmp.path().to_str().unwrap()).unwrap();

    assert!(store.exists(Namespace::Template, "gloss-cat"));
    assert!(store.exists(Namespace::Module, "words"));
    assert!(store.exists(Namespace::Main, "Cat"));
    assert!(!store.exists(Namespace::Main, "cat"));
    assert!(!store.exists(Namespace::Main, "dog"));
    assert_eq!(store.resolve_redirect("Cat"), Some("cat".to_string()));
}

#[test]
fn test_store_snapshot_is_reused() {
    let tmp = create_bz2_xml(sample_xml());
    let output = TempDir::new().unwrap();
    let input = tmp.path().to_str().unwrap();
    let out = output.path().to_str().unwrap();

    let first = prepare_store(input, out, false).unwrap();
    assert!(wiktlex::cache::cache_path(out).exists());
    let second = prepare_store(input, out, false).unwrap();
    assert_eq!(first.stats(), second.stats());
    assert!(second.exists(Namespace::Template, "gloss-cat"));
}

// ============================================================================
// Extraction Tests
// ============================================================================

#[test]
fn test_end_to_end_extraction() {
    let tmp = create_bz2_xml(sample_xml());
    let output = TempDir::new().unwrap();
    let store = PageStore::load_dump(tmp.path().to_str().unwrap()).unwrap();

    let summary = run_extraction(
        &store,
        &config(&["English"], CaptureOptions::none()),
        &options(tmp.path(), output.path()),
    )
    .unwrap();

    assert_eq!(summary.stats.pages(), 3);
    assert_eq!(summary.stats.redirects, 1);
    assert_eq!(summary.records_written, 2);
    assert_eq!(summary.stats.failed(), 0);

    let records = read_records(output.path());
    assert_eq!(records.len(), 2);
    let cat = find(&records, "cat", "English");
    assert_eq!(cat["lang_code"], "en");
    assert_eq!(cat["pos"], "noun");
    assert_eq!(cat["etymology_text"], "From Middle English cat.");
    assert_eq!(cat["senses"][0]["glosses"][0], "A small domesticated carnivore.");
    assert_eq!(cat["senses"][1]["glosses"][0], "A wild feline.");
    assert!(cat.get("translations").is_none());
    assert!(cat.get("synonyms").is_none());

    let dog = find(&records, "dog", "English");
    assert_eq!(dog["senses"][0]["glosses"][0], "A domesticated canine.");
}

#[test]
fn test_capture_options_add_fields() {
    let tmp = create_bz2_xml(sample_xml());
    let output = TempDir::new().unwrap();
    let store = PageStore::load_dump(tmp.path().to_str().unwrap()).unwrap();
    let capture = CaptureOptions {
        translations: true,
        redirects: true,
        ..CaptureOptions::none()
    };

    run_extraction(&store, &config(&[], capture), &options(tmp.path(), output.path())).unwrap();

    let records = read_records(output.path());
    let cat = find(&records, "cat", "English");
    assert_eq!(cat["translations"][0]["word"], "kissa");
    assert_eq!(cat["translations"][0]["sense"], "domestic animal");
    assert!(cat.get("synonyms").is_none());
    assert!(cat.get("sounds").is_none());

    let finnish = find(&records, "cat", "Finnish");
    assert_eq!(finnish["lang_code"], "fi");

    let redirect = records.iter().find(|r| r["word"] == "Cat").unwrap();
    assert_eq!(redirect["redirect"], "cat");
}

#[test]
fn test_limit_stops_early() {
    let tmp = create_bz2_xml(sample_xml());
    let output = TempDir::new().unwrap();
    let store = PageStore::load_dump(tmp.path().to_str().unwrap()).unwrap();
    let mut opts = options(tmp.path(), output.path());
    opts.limit = Some(1);

    let summary = run_extraction(&store, &config(&[], CaptureOptions::none()), &opts).unwrap();
    assert_eq!(summary.stats.pages(), 1);
}

#[test]
fn test_unknown_language_is_a_configuration_error() {
    let names = vec!["English".to_string(), "Klingonese".to_string()];
    let err = ExtractionConfig::new(&names, CaptureOptions::none(), Arc::new(LanguageTable::builtin()))
        .unwrap_err();
    assert!(matches!(err, ConfigError::UnknownLanguage(ref name) if name == "Klingonese"));
}

#[test]
fn test_override_template_shadows_dump() {
    let tmp = create_bz2_xml(sample_xml());
    let output = TempDir::new().unwrap();
    let overrides = output.path().join("overrides.txt");
    fs::write(
        &overrides,
        "TITLE: Template:gloss-cat\nA {{{1|tame}}} feline.\nTITLE: dog\n==English==\n===Verb===\n# To follow.\n",
    )
    .unwrap();

    let mut store = PageStore::load_dump(tmp.path().to_str().unwrap()).unwrap();
    let installed = wiktlex::overrides::load_overrides(&mut store, &overrides).unwrap();
    assert_eq!(installed.len(), 2);

    run_extraction(
        &store,
        &config(&["English"], CaptureOptions::none()),
        &options(tmp.path(), output.path()),
    )
    .unwrap();

    let records = read_records(output.path());
    let cat = find(&records, "cat", "English");
    assert_eq!(cat["senses"][0]["glosses"][0], "A tame feline.");
    let dog = find(&records, "dog", "English");
    assert_eq!(dog["pos"], "verb");
    assert_eq!(dog["senses"][0]["glosses"][0], "To follow.");
}

// ============================================================================
// Side Channels
// ============================================================================

#[test]
fn test_capture_pages_writes_every_page() {
    let tmp = create_bz2_xml(sample_xml());
    let output = TempDir::new().unwrap();
    let pages_dir = output.path().join("pages");
    let store = PageStore::load_dump(tmp.path().to_str().unwrap()).unwrap();
    let mut opts = options(tmp.path(), output.path());
    opts.capture_dir = Some(pages_dir.clone());

    run_extraction(&store, &config(&[], CaptureOptions::none()), &opts).unwrap();

    assert!(pages_dir.join("Template").join("gloss-cat.txt").exists());
    assert!(pages_dir.join("Module").join("words.txt").exists());
    let cat = fs::read_to_string(pages_dir.join("Main").join("cat.txt")).unwrap();
    assert!(cat.contains("{{gloss-cat}}"));
}

#[test]
fn test_diagnostics_export() {
    let xml = r#"<mediawiki>
        <page>
            <title>bird</title>
            <ns>0</ns>
            <id>1</id>
            <revision>
                <id>1</id>
                <text>==English==
===Noun===
# A {{no-such-template}} animal.
==Elvish==
===Noun===
# x
</text>
            </revision>
        </page>
    </mediawiki>"#;
    let tmp = create_bz2_xml(xml);
    let output = TempDir::new().unwrap();
    let store = PageStore::load_dump(tmp.path().to_str().unwrap()).unwrap();

    let summary = run_extraction(
        &store,
        &config(&[], CaptureOptions::none()),
        &options(tmp.path(), output.path()),
    )
    .unwrap();
    assert_eq!(summary.records_written, 1);

    let path = output.path().join("diagnostics.json");
    summary.diagnostics.export(&path).unwrap();
    let value: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(value["counts"]["template_not_found"], 1);
    assert_eq!(value["counts"]["unrecognized_language"], 1);
    assert!(value["errors"].as_array().unwrap().is_empty());
    assert_eq!(value["warnings"][0]["page"], "bird");
}
