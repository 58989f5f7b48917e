//! Cell extraction from raw document text.

use crate::error::{Error, Result};

use super::{Cell, CellKind, LineSpan, BEGIN_MARKER, END_MARKER};

/// Navigation direction for [`next_cell_of_kind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

/// Parse document text into an ordered cell sequence.
///
/// Text outside any marker pair is ignored. Malformed markup (an
/// unterminated open marker, a stray close marker, a nested open marker,
/// or an unknown kind token) yields a [`Error::Parse`] naming the
/// offending line (1-based) rather than a partial cell.
pub fn parse(text: &str) -> Result<Vec<Cell>> {
    let mut cells = Vec::new();
    let mut open: Option<(usize, CellKind, String, Vec<String>)> = None;
    // Whether only blank lines were seen since the previous cell closed;
    // prose between cells breaks output association.
    let mut blank_gap = true;

    for (lineno, line) in text.lines().enumerate() {
        // Markers are recognized at column 0 only; an indented lookalike
        // (e.g. interpreter output quoting a marker) is ordinary text.
        let trimmed = line.trim_end();

        let begin_rest = trimmed
            .strip_prefix(BEGIN_MARKER)
            .filter(|rest| rest.is_empty() || rest.starts_with(char::is_whitespace));
        if let Some(rest) = begin_rest {
            if open.is_some() {
                return Err(Error::Parse {
                    line: lineno + 1,
                    message: "cell marker opened inside another cell".to_string(),
                });
            }
            let tokens: Vec<&str> = rest.split_whitespace().collect();
            if tokens.len() != 2 {
                return Err(Error::Parse {
                    line: lineno + 1,
                    message: format!(
                        "expected `{} <kind> <language>`, found {} attribute(s)",
                        BEGIN_MARKER,
                        tokens.len()
                    ),
                });
            }
            let kind = CellKind::from_token(tokens[0]).ok_or_else(|| Error::Parse {
                line: lineno + 1,
                message: format!("unknown cell kind `{}`", tokens[0]),
            })?;
            open = Some((lineno, kind, tokens[1].to_string(), Vec::new()));
        } else if trimmed == END_MARKER {
            let (start, kind, language, source) = open.take().ok_or_else(|| Error::Parse {
                line: lineno + 1,
                message: format!("`{}` without a matching open marker", END_MARKER),
            })?;
            let index = cells.len();
            let owner = if kind == CellKind::Output && blank_gap {
                owner_of_output(&cells, index, &language)
            } else {
                None
            };
            cells.push(Cell {
                kind,
                language,
                source,
                span: LineSpan { start, end: lineno },
                index,
                owner,
            });
            blank_gap = true;
        } else if let Some((_, _, _, ref mut source)) = open {
            source.push(line.to_string());
        } else if !trimmed.is_empty() {
            blank_gap = false;
        }
    }

    if let Some((start, kind, language, _)) = open {
        return Err(Error::Parse {
            line: start + 1,
            message: format!("unterminated {} cell ({})", kind, language),
        });
    }

    Ok(cells)
}

/// An output cell belongs to the immediately preceding evaluable cell of
/// the same language. The caller has already checked that only blank
/// lines separate the two.
fn owner_of_output(cells: &[Cell], index: usize, language: &str) -> Option<usize> {
    if index == 0 {
        return None;
    }
    let previous = &cells[index - 1];
    if !previous.kind.is_evaluable() || previous.language != language {
        return None;
    }
    Some(previous.index)
}

/// The cell whose span contains `line`, if any.
pub fn find_cell_at(cells: &[Cell], line: usize) -> Option<&Cell> {
    cells.iter().find(|cell| cell.span.contains(line))
}

/// The evaluable cell targeted by the cursor at `line`.
///
/// A cursor inside an output cell targets the cell that owns the output,
/// so "evaluate current cell" re-runs the code the user is looking at.
pub fn target_cell_at(cells: &[Cell], line: usize) -> Option<&Cell> {
    let cell = find_cell_at(cells, line)?;
    match cell.kind {
        CellKind::Init | CellKind::Code => Some(cell),
        CellKind::Output => cell.owner.map(|owner| &cells[owner]),
    }
}

/// Nearest cell of `kind` after/before `line`, for navigation commands.
///
/// Returns `None` at the document edge rather than wrapping, unless
/// `wrap` is set.
pub fn next_cell_of_kind(
    cells: &[Cell],
    line: usize,
    kind: CellKind,
    direction: Direction,
    wrap: bool,
) -> Option<&Cell> {
    let mut matching = cells.iter().filter(|cell| cell.kind == kind);
    match direction {
        Direction::Forward => {
            let ahead = cells
                .iter()
                .find(|cell| cell.kind == kind && cell.span.start > line);
            if ahead.is_some() {
                ahead
            } else if wrap {
                matching.next()
            } else {
                None
            }
        }
        Direction::Backward => {
            let behind = cells
                .iter()
                .rev()
                .find(|cell| cell.kind == kind && cell.span.start < line);
            if behind.is_some() {
                behind
            } else if wrap {
                matching.next_back()
            } else {
                None
            }
        }
    }
}
