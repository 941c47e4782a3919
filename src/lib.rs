//! Wiktlex: Wiktionary dump expansion and dictionary extraction
//!
//! This crate turns a Wiktionary XML dump into one JSON record per word,
//! language and part of speech. It runs as a two-pass pipeline:
//!
//! 1. **Store Pass** -- Stream the dump once and keep every template, module
//!    and other non-article page (plus article redirects) in a page store
//! 2. **Extraction Pass** -- Stream the dump again and process article pages
//!    in parallel: expand templates and module calls, parse the result into a
//!    tree, run section extractors and assemble records
//!
//! # Architecture
//!
//! - **Streaming XML parsing** -- Never loads the full dump into memory
//! - **Template expansion** -- Parameter substitution, parser functions and
//!   magic words with recursion and output-size budgets
//! - **Module interpreter** -- A sandboxed Lua-subset interpreter for
//!   `{{#invoke:}}` with step and call-depth budgets
//! - **Parallel extraction** -- rayon workers fold per-page outcomes into
//!   per-worker counters that are merged once at the end
//! - **Failure isolation** -- A failing template, module or page produces a
//!   diagnostic and never aborts the run
//! - **Store caching** -- The page store is snapshotted next to the output and
//!   reused while the dump is unchanged
//!
//! # Key Modules
//!
//! - [`parser`] -- Streaming XML parser with BZ2 decompression
//! - [`store`] -- Page store with redirect resolution
//! - [`preprocess`] -- Template and argument scanning
//! - [`expand`] -- Template expansion driver
//! - [`parser_functions`] -- `#if`, `#switch`, `#expr` and friends
//! - [`script`] -- Lua-subset module interpreter and host library
//! - [`wikitext`] -- Expanded text to node tree
//! - [`extractors`] -- Per-section extractors
//! - [`assemble`] -- Record assembly across language, etymology and POS levels
//! - [`page`] -- The per-page pipeline
//! - [`extract`] -- Parallel extraction pass and JSON lines output
//! - [`diagnostics`] -- Per-page and run-level diagnostics
//! - [`cache`] -- Page store persistence
//! - [`config`] -- Constants, budgets and extraction options
//!
//! # Example Usage
//!
//! ```bash
//! # English and Translingual entries with translations
//! wiktlex extract -i enwiktionary-latest-pages-articles.xml.bz2 -o output/ --translations
//!
//! # Every language, every optional field
//! wiktlex extract -i enwiktionary-latest-pages-articles.xml.bz2 -o output/ --all-languages --all
//!
//! # One page, with a local override of a template
//! wiktlex page -i enwiktionary-latest-pages-articles.xml.bz2 --title cat --override fix.txt
//! ```

pub mod assemble;
pub mod cache;
pub mod capture;
pub mod clean;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod expand;
pub mod extract;
pub mod extractors;
pub mod languages;
pub mod models;
pub mod node;
pub mod overrides;
pub mod page;
pub mod parser;
pub mod parser_functions;
pub mod preprocess;
pub mod record;
pub mod script;
pub mod sections;
pub mod stats;
pub mod store;
pub mod wikitext;
