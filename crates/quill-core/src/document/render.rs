//! Writing output back into the document markup.
//!
//! Output is reinserted with the same marker convention the parser
//! recognizes, so a render/parse round trip preserves the cell structure.

use super::{LineSpan, BEGIN_MARKER, END_MARKER};

/// One line-level mutation of the document, expressed against the text
/// the edits were computed from. Applying a batch bottom-up keeps every
/// span valid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Edit {
    /// Replace the lines in `span` with `lines`.
    Replace { span: LineSpan, lines: Vec<String> },
    /// Insert `lines` before line index `at` (append when `at` is past
    /// the last line).
    Insert { at: usize, lines: Vec<String> },
}

impl Edit {
    /// Line position used for bottom-up ordering.
    pub fn position(&self) -> usize {
        match self {
            Edit::Replace { span, .. } => span.start,
            Edit::Insert { at, .. } => *at,
        }
    }
}

/// Render an output cell for `language` holding `text`.
///
/// Lines of the output that would themselves parse as cell markers are
/// indented by one space; otherwise re-parsing the rendered document
/// could see phantom cell boundaries.
pub fn render_output_cell(language: &str, text: &str) -> Vec<String> {
    let mut lines = vec![format!("{} output {}", BEGIN_MARKER, language)];
    for line in text.lines() {
        let trimmed = line.trim_start();
        if trimmed.starts_with(BEGIN_MARKER) || trimmed.starts_with(END_MARKER) {
            lines.push(format!(" {}", line));
        } else {
            lines.push(line.to_string());
        }
    }
    lines.push(END_MARKER.to_string());
    lines
}

/// Apply a batch of edits to `text`, bottom-up.
///
/// All spans must refer to `text` as given; edits are sorted by position
/// descending before application so earlier spans stay valid. A trailing
/// newline in the input is preserved.
pub fn apply_edits(text: &str, edits: &[Edit]) -> String {
    let mut lines: Vec<String> = text.lines().map(str::to_string).collect();
    let had_trailing_newline = text.ends_with('\n') || text.is_empty();

    let mut ordered: Vec<&Edit> = edits.iter().collect();
    ordered.sort_by(|a, b| b.position().cmp(&a.position()));

    for edit in ordered {
        match edit {
            Edit::Replace { span, lines: new } => {
                let end = (span.end + 1).min(lines.len());
                let start = span.start.min(end);
                lines.splice(start..end, new.iter().cloned());
            }
            Edit::Insert { at, lines: new } => {
                let at = (*at).min(lines.len());
                lines.splice(at..at, new.iter().cloned());
            }
        }
    }

    let mut result = lines.join("\n");
    if had_trailing_newline && !result.is_empty() {
        result.push('\n');
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{parse, CellKind};

    #[test]
    fn rendered_output_reparses_as_an_owned_output_cell() {
        let doc = "\\begin_cell code sh\necho hi\n\\end_cell\n";
        let rendered = render_output_cell("sh", "hi");
        let edits = vec![Edit::Insert { at: 3, lines: rendered }];
        let updated = apply_edits(doc, &edits);

        let cells = parse(&updated).unwrap();
        assert_eq!(cells.len(), 2);
        assert_eq!(cells[1].kind, CellKind::Output);
        assert_eq!(cells[1].owner, Some(0));
        assert_eq!(cells[1].source, vec!["hi"]);
    }

    #[test]
    fn render_parse_round_trip_preserves_cell_structure() {
        let doc = "\
prose
\\begin_cell code python
print(6)
\\end_cell
\\begin_cell output python
stale
\\end_cell
";
        let cells = parse(doc).unwrap();
        let output_span = cells[1].span;
        let edits = vec![Edit::Replace {
            span: output_span,
            lines: render_output_cell("python", "6"),
        }];
        let updated = apply_edits(doc, &edits);
        let reparsed = parse(&updated).unwrap();

        let shape = |cells: &[crate::document::Cell]| {
            cells
                .iter()
                .map(|c| (c.kind, c.language.clone(), c.owner))
                .collect::<Vec<_>>()
        };
        assert_eq!(shape(&cells), shape(&reparsed));
        assert_eq!(reparsed[1].source, vec!["6"]);
    }

    #[test]
    fn marker_lookalike_output_lines_are_defused() {
        let rendered = render_output_cell("sh", "\\end_cell\nplain");
        let doc = rendered.join("\n");
        let cells = parse(&doc).unwrap();
        assert_eq!(cells.len(), 1);
        assert_eq!(cells[0].source, vec![" \\end_cell", "plain"]);
    }

    #[test]
    fn edits_apply_bottom_up_regardless_of_input_order() {
        let doc = "a\nb\nc\nd\n";
        let edits = vec![
            Edit::Replace {
                span: LineSpan { start: 0, end: 0 },
                lines: vec!["A".to_string()],
            },
            Edit::Replace {
                span: LineSpan { start: 2, end: 3 },
                lines: vec!["CD".to_string()],
            },
        ];
        assert_eq!(apply_edits(doc, &edits), "A\nb\nCD\n");
    }

    #[test]
    fn insert_past_the_end_appends() {
        let doc = "a\n";
        let edits = vec![Edit::Insert {
            at: 99,
            lines: vec!["b".to_string()],
        }];
        assert_eq!(apply_edits(doc, &edits), "a\nb\n");
    }
}
