use super::{body, positional, render, template_data, template_name, SectionContext, SectionExtractor};
use crate::config::CaptureOptions;
use crate::diagnostics::PageDiagnostics;
use crate::node::{pieces_of, Node, Piece};
use crate::record::{Linkage, Partial};
use crate::sections::{LinkageKind, SectionKind};

/// Maintenance templates that say nothing about the word's origin.
const IGNORED: &[&str] = &[
    "rfe", "rfv-etym", "etystub", "root", "pie root", "pie word", "c", "cln", "top2", "top3",
    "defdate", "attention", "rfc",
];

const COMPOUND_TEMPLATES: &[&str] = &[
    "compound", "com", "affix", "af", "prefix", "pre", "suffix", "suf", "confix", "con", "blend",
];

pub struct EtymologyExtractor;

impl SectionExtractor for EtymologyExtractor {
    fn kind(&self) -> SectionKind {
        SectionKind::Etymology
    }

    fn enabled(&self, _capture: &CaptureOptions, _ctx: &SectionContext<'_>) -> bool {
        true
    }

    fn extract(
        &self,
        section: &Node,
        ctx: &SectionContext<'_>,
        out: &mut Vec<Partial>,
        _diagnostics: &mut PageDiagnostics,
    ) {
        let pieces = pieces_of(body(section));
        let text = render(&pieces, ctx, IGNORED);

        let mut templates = Vec::new();
        let mut compounds = Vec::new();
        for piece in &pieces {
            let Piece::Template { origin, .. } = piece else {
                continue;
            };
            let name = template_name(origin);
            if IGNORED.contains(&name.as_str()) {
                continue;
            }
            templates.push(template_data(origin));
            if ctx.capture.compounds && COMPOUND_TEMPLATES.contains(&name.as_str()) {
                let parts = positional(origin, 2);
                if parts.len() > 1 {
                    compounds.push(Linkage {
                        word: parts.join(" + "),
                        tags: vec![name],
                        ..Linkage::default()
                    });
                }
            }
        }

        if text.is_empty() && templates.is_empty() {
            return;
        }
        out.push(Partial::Etymology { text, templates });
        if !compounds.is_empty() {
            out.push(Partial::Linkages(LinkageKind::Compounds, compounds));
        }
    }
}
