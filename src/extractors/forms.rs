use super::{body, template_data, template_name, SectionContext, SectionExtractor};
use crate::clean::clean_value;
use crate::config::CaptureOptions;
use crate::diagnostics::{DiagnosticKind, PageDiagnostics};
use crate::node::{pieces_of, Node, NodeKind, Piece};
use crate::record::{Form, Partial};
use crate::sections::SectionKind;
use once_cell::sync::Lazy;
use regex::Regex;

static INFLECTION_TEMPLATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"-(?:conj|decl|ndecl|adecl|infl|conjugation|declension|inflection)(?:$|-)").unwrap()
});

/// Cells that mark a missing form.
const EMPTY_CELLS: &[&str] = &["—", "–", "-", "?"];

/// Conjugation and declension sections: the inflection templates used and
/// the forms laid out in their tables.
pub struct FormsExtractor;

impl SectionExtractor for FormsExtractor {
    fn kind(&self) -> SectionKind {
        SectionKind::Inflection
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
        let templates: Vec<_> = pieces_of(body(section))
            .iter()
            .filter_map(|piece| match piece {
                Piece::Template { origin, .. } if INFLECTION_TEMPLATE.is_match(&template_name(origin)) => {
                    Some(template_data(origin))
                }
                _ => None,
            })
            .collect();

        let mut forms = Vec::new();
        for node in body(section) {
            for table in std::iter::once(node)
                .chain(node.descendants())
                .filter(|n| n.kind == NodeKind::Table)
            {
                table_forms(table, ctx.word, &mut forms);
            }
        }

        if templates.is_empty() && forms.is_empty() {
            diagnostics.warning(
                DiagnosticKind::ExtractorSkip,
                format!("{}: no inflection template or table", ctx.heading),
                ctx.lang,
            );
            return;
        }
        if !templates.is_empty() {
            out.push(Partial::Conjugation(templates));
        }
        if !forms.is_empty() {
            out.push(Partial::Forms(forms));
        }
    }
}

/// Reads data cells tagged with the header of their row and column. A row
/// made only of header cells replaces the column headers.
fn table_forms(table: &Node, word: &str, forms: &mut Vec<Form>) {
    let mut columns: Vec<String> = Vec::new();
    for row in table.children.iter().filter(|n| n.kind == NodeKind::TableRow) {
        let cells: Vec<(bool, String)> = row
            .children
            .iter()
            .filter_map(|cell| match cell.kind {
                NodeKind::TableCell { header } => Some((header, clean_value(&cell.text()))),
                _ => None,
            })
            .collect();
        if cells.is_empty() {
            continue;
        }
        if cells.iter().all(|(header, _)| *header) {
            columns = cells.into_iter().map(|(_, text)| text).collect();
            continue;
        }

        let row_tags: Vec<String> = cells
            .iter()
            .filter(|(header, text)| *header && !text.is_empty())
            .map(|(_, text)| text.clone())
            .collect();
        for (index, (header, text)) in cells.iter().enumerate() {
            if *header || text.is_empty() || EMPTY_CELLS.contains(&text.as_str()) {
                continue;
            }
            let mut tags = row_tags.clone();
            if let Some(column) = columns.get(index).filter(|c| !c.is_empty()) {
                tags.push(column.clone());
            }
            for form in text.split(',').map(str::trim).filter(|f| !f.is_empty()) {
                if form == word {
                    continue;
                }
                forms.push(Form {
                    form: form.to_string(),
                    tags: tags.clone(),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::{ctx, run};
    use super::*;

    #[test]
    fn templates_and_table_cells() {
        let page = "====Declension====
{{fi-decl-valo|kis|s|a}}
{|
! !! singular !! plural
|-
! nominative
| cat || cats
|-
! genitive
| cat's || cats', catses
|-
! ablative
| — || —
|}
";
        let (partials, diagnostics) = run(&FormsExtractor, page, &[], &ctx(CaptureOptions::all()));
        assert!(diagnostics.is_empty());
        let Partial::Conjugation(templates) = &partials[0] else {
            panic!("expected conjugation first, got {:?}", partials);
        };
        assert_eq!(templates[0].name, "fi-decl-valo");

        let Partial::Forms(forms) = &partials[1] else {
            panic!("expected forms, got {:?}", partials);
        };
        let flat: Vec<_> = forms.iter().map(|f| (f.form.as_str(), f.tags.join(" "))).collect();
        assert_eq!(
            flat,
            vec![
                ("cats", "nominative plural".to_string()),
                ("cat's", "genitive singular".to_string()),
                ("cats'", "genitive plural".to_string()),
                ("catses", "genitive plural".to_string()),
            ]
        );
    }

    #[test]
    fn empty_section_is_reported() {
        let (partials, diagnostics) =
            run(&FormsExtractor, "====Conjugation====\nRegular.\n", &[], &ctx(CaptureOptions::all()));
        assert!(partials.is_empty());
        assert!(diagnostics.has(DiagnosticKind::ExtractorSkip));
    }
}
