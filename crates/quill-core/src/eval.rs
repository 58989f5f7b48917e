//! Evaluation orchestration.
//!
//! Drives an [`EvalRequest`] to completion: parses the document, resolves
//! interpreter processes through the pool, feeds each requested cell to
//! its interpreter, and turns the captured output into line edits that
//! write the results back next to their cells.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::document::{
    self, cells_of_kind, output_of, parse, render_output_cell, Cell, CellKind, Edit,
};
use crate::error::{Error, Result};
use crate::pool::ProcessPool;

/// Policy knobs for evaluation.
#[derive(Debug, Clone)]
pub struct EvalConfig {
    /// Inactivity window for one cell's evaluation.
    pub eval_timeout: Duration,
    /// Abort the remainder of a request on the first interpreter error.
    pub stop_on_error: bool,
}

impl Default for EvalConfig {
    fn default() -> Self {
        Self {
            eval_timeout: Duration::from_secs(30),
            stop_on_error: false,
        }
    }
}

/// A queued unit of work: which cells to evaluate and how.
///
/// Created by the editor session on a user command, consumed entirely by
/// the orchestrator, discarded afterwards.
#[derive(Debug, Clone)]
pub struct EvalRequest {
    /// Indices into the parsed cell sequence, in document order.
    pub cells: Vec<usize>,
    /// Reinitialize each involved language before its first cell.
    pub reinit: bool,
    /// Keep prompts and echoed input in the captured output.
    pub echo_prompts: bool,
}

/// Outcome of one cell within a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellStatus {
    /// Evaluated; output written back.
    Done,
    /// Interpreter reported an error; the error text is the output.
    Error,
    /// No output within the window; interpreter killed.
    TimedOut,
    /// Not evaluated because its interpreter already failed this request.
    Skipped,
}

impl fmt::Display for CellStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            CellStatus::Done => "done",
            CellStatus::Error => "error",
            CellStatus::TimedOut => "timed out",
            CellStatus::Skipped => "skipped",
        };
        f.write_str(text)
    }
}

/// Per-cell record in an [`EvalReport`].
#[derive(Debug, Clone)]
pub struct CellReport {
    /// Index of the cell in the parsed sequence.
    pub cell: usize,
    /// The cell's language.
    pub language: String,
    pub status: CellStatus,
    /// Boundary-facing context for failures.
    pub note: Option<String>,
}

/// Result of a completed request: per-cell outcomes plus the line edits
/// that write the new output back, ready to apply bottom-up.
#[derive(Debug, Clone, Default)]
pub struct EvalReport {
    pub cells: Vec<CellReport>,
    pub edits: Vec<Edit>,
}

impl EvalReport {
    /// Whether every requested cell completed without error.
    pub fn all_done(&self) -> bool {
        self.cells.iter().all(|c| c.status == CellStatus::Done)
    }
}

/// The evaluation state machine.
///
/// Owns no processes itself; the pool passed in at construction is the
/// single shared resource, and the orchestrator borrows one interpreter
/// at a time for the duration of a single `send_and_collect`.
pub struct Orchestrator {
    pool: Arc<ProcessPool>,
    config: EvalConfig,
}

impl Orchestrator {
    pub fn new(pool: Arc<ProcessPool>, config: EvalConfig) -> Self {
        Self { pool, config }
    }

    /// The pool this orchestrator evaluates against.
    pub fn pool(&self) -> &Arc<ProcessPool> {
        &self.pool
    }

    /// Evaluate the requested cells of `text` in document order.
    ///
    /// A malformed document aborts the whole request before any process
    /// is touched and before any edit is produced, so a failed request
    /// never partially corrupts the document. Interpreter errors are
    /// per-cell: the captured error text becomes that cell's output and
    /// evaluation continues (unless `stop_on_error`). A timeout poisons
    /// its (document, language) pair for the rest of the request; cells
    /// sharing the killed interpreter are skipped and reported, while
    /// other languages continue.
    pub fn evaluate(&self, document: &str, text: &str, request: &EvalRequest) -> Result<EvalReport> {
        let cells = parse(text)?;

        let mut indices = request.cells.clone();
        indices.sort_unstable();
        indices.dedup();
        for &index in &indices {
            let cell = cells.get(index).ok_or_else(|| {
                Error::InterpreterError(format!("no cell with index {}", index))
            })?;
            if !cell.kind.is_evaluable() {
                return Err(Error::InterpreterError(format!(
                    "cell {} is an output cell, not evaluable",
                    index
                )));
            }
        }

        if request.reinit {
            let languages: HashSet<&str> = indices
                .iter()
                .map(|&i| cells[i].language.as_str())
                .collect();
            for language in languages {
                self.pool.reinitialize(document, language);
            }
        }

        let mut report = EvalReport::default();
        let mut poisoned: HashSet<String> = HashSet::new();
        let mut abort_rest = false;

        for &index in &indices {
            let cell = &cells[index];

            if abort_rest || poisoned.contains(&cell.language) {
                tracing::debug!(document, cell = index, language = %cell.language, "skipping cell");
                report.cells.push(CellReport {
                    cell: index,
                    language: cell.language.clone(),
                    status: CellStatus::Skipped,
                    note: Some(if abort_rest {
                        "skipped after earlier error".to_string()
                    } else {
                        format!("skipped: {} interpreter needs reinit", cell.language)
                    }),
                });
                continue;
            }

            match self.evaluate_one(document, cell, request.echo_prompts) {
                Ok(output) => {
                    report.edits.push(self.output_edit(&cells, cell, &output));
                    report.cells.push(CellReport {
                        cell: index,
                        language: cell.language.clone(),
                        status: CellStatus::Done,
                        note: None,
                    });
                }
                Err(Error::InterpreterTimeout { language, waited }) => {
                    poisoned.insert(language.clone());
                    let notice = format!(
                        "** evaluation timed out after {:.1}s; reinitialize the {} interpreter to continue **",
                        waited.as_secs_f64(),
                        language
                    );
                    report.edits.push(self.output_edit(&cells, cell, &notice));
                    report.cells.push(CellReport {
                        cell: index,
                        language,
                        status: CellStatus::TimedOut,
                        note: Some(notice),
                    });
                }
                Err(Error::InterpreterError(captured)) => {
                    report.edits.push(self.output_edit(&cells, cell, &captured));
                    report.cells.push(CellReport {
                        cell: index,
                        language: cell.language.clone(),
                        status: CellStatus::Error,
                        note: Some(first_line(&captured).to_string()),
                    });
                    if self.config.stop_on_error {
                        abort_rest = true;
                    }
                }
                Err(e @ Error::Spawn { .. }) | Err(e @ Error::UnknownLanguage(_)) => {
                    // Fatal for this language until corrected externally.
                    poisoned.insert(cell.language.clone());
                    report.cells.push(CellReport {
                        cell: index,
                        language: cell.language.clone(),
                        status: CellStatus::Skipped,
                        note: Some(e.to_string()),
                    });
                }
                Err(e) => {
                    poisoned.insert(cell.language.clone());
                    report.cells.push(CellReport {
                        cell: index,
                        language: cell.language.clone(),
                        status: CellStatus::Error,
                        note: Some(e.to_string()),
                    });
                }
            }
        }

        Ok(report)
    }

    /// Evaluate all cells of `kind` against an in-memory copy of `text`.
    ///
    /// Returns the updated text; the live document is the caller's to
    /// leave untouched until the whole batch has succeeded.
    pub fn evaluate_batch(
        &self,
        document: &str,
        text: &str,
        kind: CellKind,
        reinit: bool,
        echo_prompts: bool,
    ) -> Result<(String, EvalReport)> {
        let cells = parse(text)?;
        let request = EvalRequest {
            cells: cells_of_kind(&cells, kind),
            reinit,
            echo_prompts,
        };
        let report = self.evaluate(document, text, &request)?;
        let updated = document::apply_edits(text, &report.edits);
        Ok((updated, report))
    }

    fn evaluate_one(&self, document: &str, cell: &Cell, echo: bool) -> Result<String> {
        tracing::debug!(
            document,
            cell = cell.index,
            language = %cell.language,
            lines = cell.source.len(),
            "evaluating cell"
        );
        let process = self.pool.acquire(document, &cell.language)?;
        let mut guard = process.lock().unwrap_or_else(|e| e.into_inner());
        guard.send_and_collect(&cell.source, self.config.eval_timeout, echo)
    }

    /// Build the edit writing `output` back next to `cell`: replace the
    /// owned output cell when one exists, otherwise insert a fresh one
    /// right after the cell.
    fn output_edit(&self, cells: &[Cell], cell: &Cell, output: &str) -> Edit {
        let lines = render_output_cell(&cell.language, output);
        match output_of(cells, cell.index) {
            Some(existing) => Edit::Replace {
                span: existing.span,
                lines,
            },
            None => Edit::Insert {
                at: cell.span.end + 1,
                lines,
            },
        }
    }
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::SpecRegistry;

    fn orchestrator() -> Orchestrator {
        let pool = Arc::new(ProcessPool::new(SpecRegistry::builtin()));
        Orchestrator::new(pool, EvalConfig::default())
    }

    #[test]
    fn malformed_document_aborts_before_any_process_is_touched() {
        let orch = orchestrator();
        let text = "\\begin_cell code sh\necho hi\n"; // unterminated
        let request = EvalRequest {
            cells: vec![0],
            reinit: false,
            echo_prompts: false,
        };
        match orch.evaluate("doc", text, &request) {
            Err(Error::Parse { line, .. }) => assert_eq!(line, 1),
            other => panic!("expected Parse error, got {:?}", other),
        }
        assert_eq!(orch.pool().live_count(), 0);
    }

    #[test]
    fn unknown_language_is_reported_not_propagated() {
        let orch = orchestrator();
        let text = "\\begin_cell code klingon\nnuqneH\n\\end_cell\n";
        let request = EvalRequest {
            cells: vec![0],
            reinit: false,
            echo_prompts: false,
        };
        let report = orch.evaluate("doc", text, &request).unwrap();
        assert_eq!(report.cells.len(), 1);
        assert_eq!(report.cells[0].status, CellStatus::Skipped);
        assert!(report.cells[0].note.as_deref().unwrap().contains("klingon"));
        assert!(report.edits.is_empty());
    }

    #[test]
    fn output_cells_are_rejected_as_evaluation_targets() {
        let orch = orchestrator();
        let text = "\\begin_cell output sh\nstale\n\\end_cell\n";
        let request = EvalRequest {
            cells: vec![0],
            reinit: false,
            echo_prompts: false,
        };
        assert!(orch.evaluate("doc", text, &request).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn evaluates_shell_cells_and_writes_output_in_order() {
        let orch = orchestrator();
        let text = "\
\\begin_cell code sh
a=2
\\end_cell

\\begin_cell code sh
echo $((a * 3))
\\end_cell
";
        let cells = parse(text).unwrap();
        let request = EvalRequest {
            cells: cells_of_kind(&cells, CellKind::Code),
            reinit: false,
            echo_prompts: false,
        };
        let report = orch.evaluate("doc", text, &request).unwrap();
        assert!(report.all_done(), "report: {:?}", report.cells);

        let updated = document::apply_edits(text, &report.edits);
        let reparsed = parse(&updated).unwrap();

        // Both code cells now own an output cell, in document order.
        let first_output = output_of(&reparsed, 0).expect("first output");
        let second_output = reparsed
            .iter()
            .filter(|c| c.kind == CellKind::Output)
            .nth(1)
            .expect("second output");
        assert!(first_output.span.start < second_output.span.start);
        assert_eq!(second_output.source_text().trim(), "6");
    }

    #[cfg(unix)]
    #[test]
    fn reevaluation_overwrites_the_owned_output_cell() {
        let orch = orchestrator();
        let text = "\
\\begin_cell code sh
echo fresh
\\end_cell
\\begin_cell output sh
stale
\\end_cell
";
        let request = EvalRequest {
            cells: vec![0],
            reinit: false,
            echo_prompts: false,
        };
        let report = orch.evaluate("doc", text, &request).unwrap();
        let updated = document::apply_edits(text, &report.edits);
        let reparsed = parse(&updated).unwrap();

        assert_eq!(reparsed.len(), 2);
        assert_eq!(output_of(&reparsed, 0).unwrap().source_text().trim(), "fresh");
        assert!(!updated.contains("stale"));
    }

    #[cfg(unix)]
    #[test]
    fn timeout_poisons_the_language_and_skips_its_later_cells() {
        let pool = Arc::new(ProcessPool::new(SpecRegistry::builtin()));
        let orch = Orchestrator::new(
            pool,
            EvalConfig {
                eval_timeout: Duration::from_secs(2),
                ..EvalConfig::default()
            },
        );
        let text = "\
\\begin_cell code sh
sleep 600
\\end_cell
\\begin_cell code sh
echo never
\\end_cell
";
        let request = EvalRequest {
            cells: vec![0, 1],
            reinit: false,
            echo_prompts: false,
        };
        let report = orch.evaluate("doc", text, &request).unwrap();
        assert_eq!(report.cells[0].status, CellStatus::TimedOut);
        assert_eq!(report.cells[1].status, CellStatus::Skipped);

        // The timed-out interpreter was killed, not left hanging.
        let process = orch.pool().acquire("doc", "sh").unwrap();
        assert!(process.lock().unwrap().is_alive());
    }
}
