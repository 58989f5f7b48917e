//! Document cell model.
//!
//! Cells are demarcated regions of the document's native markup, tagged
//! with a role and a target language:
//!
//! ```text
//! \begin_cell code python
//! x = 2
//! print(x * 3)
//! \end_cell
//! \begin_cell output python
//! 6
//! \end_cell
//! ```
//!
//! Cells are derived views over the document text, recomputed on every
//! parse pass; no cell outlives the pass that produced it.

mod parser;
mod render;

pub use parser::{find_cell_at, next_cell_of_kind, parse, target_cell_at, Direction};
pub use render::{apply_edits, render_output_cell, Edit};

use std::fmt;

/// Marker opening a cell: `\begin_cell <kind> <language>`.
pub const BEGIN_MARKER: &str = "\\begin_cell";
/// Marker closing a cell.
pub const END_MARKER: &str = "\\end_cell";

/// Role of a cell within the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CellKind {
    /// Setup code, evaluated before the standard cells of its language.
    Init,
    /// A standard code cell.
    Code,
    /// Captured interpreter output, owned by the preceding code cell.
    Output,
}

impl CellKind {
    /// Marker token for this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            CellKind::Init => "init",
            CellKind::Code => "code",
            CellKind::Output => "output",
        }
    }

    /// Parse a marker token.
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "init" => Some(CellKind::Init),
            "code" => Some(CellKind::Code),
            "output" => Some(CellKind::Output),
            _ => None,
        }
    }

    /// Whether cells of this kind are sent to an interpreter.
    pub fn is_evaluable(&self) -> bool {
        matches!(self, CellKind::Init | CellKind::Code)
    }
}

impl fmt::Display for CellKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inclusive range of 0-based line indices, marker lines included.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineSpan {
    pub start: usize,
    pub end: usize,
}

impl LineSpan {
    /// Whether `line` falls inside this span.
    pub fn contains(&self, line: usize) -> bool {
        self.start <= line && line <= self.end
    }
}

/// One parsed cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cell {
    /// Role of this cell.
    pub kind: CellKind,
    /// Target language identifier.
    pub language: String,
    /// Source lines between the markers, verbatim.
    pub source: Vec<String>,
    /// Location within the document, used to reinsert output.
    pub span: LineSpan,
    /// Index within the document's cell sequence.
    pub index: usize,
    /// For output cells: index of the code/init cell this output belongs
    /// to, when one immediately precedes it in the same language.
    pub owner: Option<usize>,
}

impl Cell {
    /// Joined source text.
    pub fn source_text(&self) -> String {
        self.source.join("\n")
    }
}

/// Find the output cell owned by the cell at `owner_index`, if any.
pub fn output_of(cells: &[Cell], owner_index: usize) -> Option<&Cell> {
    cells
        .iter()
        .find(|cell| cell.kind == CellKind::Output && cell.owner == Some(owner_index))
}

/// Indices of evaluable cells of `kind`, in document order.
pub fn cells_of_kind(cells: &[Cell], kind: CellKind) -> Vec<usize> {
    cells
        .iter()
        .filter(|cell| cell.kind == kind)
        .map(|cell| cell.index)
        .collect()
}
