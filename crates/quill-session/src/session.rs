//! The editor session loop.
//!
//! Consumes editor events one at a time and drives the orchestrator and
//! pool; the only blocking work happens inside an evaluation, so the
//! rest of the loop is plain sequential logic.

use std::path::PathBuf;
use std::sync::Arc;

use quill_core::document::{self, cells_of_kind, next_cell_of_kind, parse, target_cell_at};
use quill_core::{
    CellKind, CellStatus, Edit, EvalConfig, EvalReport, EvalRequest, Orchestrator, ProcessPool,
};

use crate::commands::{Action, Keymap};
use crate::error::{SessionError, SessionResult};
use crate::link::EditorLink;
use crate::protocol::EditorEvent;

/// Session-level configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Identifier of the document this session serves; doubles as the
    /// base for the batch backup path when it is a file path.
    pub document_id: String,
    /// Where batch evaluation writes its copy. Defaults to
    /// `<document_id>.eval`.
    pub backup_path: Option<PathBuf>,
    /// Whether cell navigation wraps around the document edges.
    pub wrap_navigation: bool,
}

impl SessionConfig {
    pub fn new(document_id: impl Into<String>) -> Self {
        Self {
            document_id: document_id.into(),
            backup_path: None,
            wrap_navigation: true,
        }
    }

    fn backup_path(&self) -> PathBuf {
        self.backup_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(format!("{}.eval", self.document_id)))
    }
}

/// One editor session: an event loop over an [`EditorLink`].
pub struct EditorSession<L> {
    link: L,
    orchestrator: Orchestrator,
    keymap: Keymap,
    config: SessionConfig,
    echo_prompts: bool,
}

impl<L: EditorLink> EditorSession<L> {
    pub fn new(link: L, pool: Arc<ProcessPool>, eval: EvalConfig, config: SessionConfig) -> Self {
        Self {
            link,
            orchestrator: Orchestrator::new(pool, eval),
            keymap: Keymap::default(),
            config,
            echo_prompts: false,
        }
    }

    /// Replace the default key map.
    pub fn with_keymap(mut self, keymap: Keymap) -> Self {
        self.keymap = keymap;
        self
    }

    /// Run until the editor closes the document or the channel.
    ///
    /// Interpreters belonging to this document are torn down on every
    /// exit path so no subprocess outlives the session.
    pub fn run(&mut self) -> SessionResult<()> {
        let result = self.event_loop();
        self.orchestrator
            .pool()
            .shutdown(&self.config.document_id);
        tracing::info!(document = %self.config.document_id, "session ended");
        result
    }

    fn event_loop(&mut self) -> SessionResult<()> {
        loop {
            match self.link.next_event()? {
                None | Some(EditorEvent::DocumentClosed) | Some(EditorEvent::Shutdown) => {
                    return Ok(());
                }
                Some(EditorEvent::KeyPressed(key)) => match self.keymap.lookup(&key) {
                    None => tracing::debug!(%key, "unbound key"),
                    Some(action) => self.dispatch(action)?,
                },
            }
        }
    }

    /// Run one action; failures become status messages rather than
    /// ending the session, except when the editor channel itself broke.
    fn dispatch(&mut self, action: Action) -> SessionResult<()> {
        tracing::debug!(?action, document = %self.config.document_id, "dispatch");
        match self.perform(action) {
            Ok(()) => Ok(()),
            Err(SessionError::Core(e)) => {
                let text = format!("{}: {}", self.config.document_id, e);
                tracing::warn!(%text, "action failed");
                self.link.show_message(&text)
            }
            Err(other) => Err(other),
        }
    }

    fn perform(&mut self, action: Action) -> SessionResult<()> {
        match action {
            Action::EvalCurrent { reinit } => self.eval_current(reinit),
            Action::EvalAll {
                kind,
                reinit,
                backup,
            } => {
                if backup {
                    self.eval_all_backup(kind, reinit)
                } else {
                    self.eval_all(kind, reinit)
                }
            }
            Action::Goto { kind, direction } => self.goto(kind, direction),
            Action::ReinitLanguage => self.reinit_language(),
            Action::ReinitDocument => {
                self.orchestrator
                    .pool()
                    .reinitialize_document(&self.config.document_id);
                self.link.show_message("all interpreters reinitialized")
            }
            Action::ReinitAll => {
                self.orchestrator.pool().reinitialize_all();
                self.link
                    .show_message("interpreters of every document reinitialized")
            }
            Action::ToggleEcho => {
                self.echo_prompts = !self.echo_prompts;
                self.link.show_message(if self.echo_prompts {
                    "output echo on"
                } else {
                    "output echo off"
                })
            }
            Action::SetCellsOpen { open } => self.link.set_cells_open(open),
        }
    }

    fn eval_current(&mut self, reinit: bool) -> SessionResult<()> {
        let text = self.link.document_text()?;
        let cursor = self.link.cursor_line()?;
        let cells = parse(&text).map_err(SessionError::Core)?;

        let target = match target_cell_at(&cells, cursor) {
            Some(cell) => cell.index,
            None => return self.link.show_message("cursor is not inside a cell"),
        };
        let request = EvalRequest {
            cells: vec![target],
            reinit,
            echo_prompts: self.echo_prompts,
        };
        let report = self
            .orchestrator
            .evaluate(&self.config.document_id, &text, &request)
            .map_err(SessionError::Core)?;
        self.apply_edits(&report)?;
        self.report_summary(&report)
    }

    fn eval_all(&mut self, kind: CellKind, reinit: bool) -> SessionResult<()> {
        let text = self.link.document_text()?;
        let cells = parse(&text).map_err(SessionError::Core)?;
        let indices = cells_of_kind(&cells, kind);
        if indices.is_empty() {
            return self
                .link
                .show_message(&format!("no {} cells in this document", kind));
        }
        let request = EvalRequest {
            cells: indices,
            reinit,
            echo_prompts: self.echo_prompts,
        };
        let report = self
            .orchestrator
            .evaluate(&self.config.document_id, &text, &request)
            .map_err(SessionError::Core)?;
        self.apply_edits(&report)?;
        self.report_summary(&report)
    }

    /// Batch evaluation into a backup copy: the live document is never
    /// touched, whatever happens mid-batch.
    fn eval_all_backup(&mut self, kind: CellKind, reinit: bool) -> SessionResult<()> {
        let text = self.link.document_text()?;
        let (updated, report) = self
            .orchestrator
            .evaluate_batch(
                &self.config.document_id,
                &text,
                kind,
                reinit,
                self.echo_prompts,
            )
            .map_err(SessionError::Core)?;

        let path = self.config.backup_path();
        if let Err(e) = std::fs::write(&path, updated) {
            return self
                .link
                .show_message(&format!("cannot write {}: {}", path.display(), e));
        }
        let done = report
            .cells
            .iter()
            .filter(|c| c.status == CellStatus::Done)
            .count();
        self.link.show_message(&format!(
            "batch: {}/{} cells evaluated into {}",
            done,
            report.cells.len(),
            path.display()
        ))
    }

    fn goto(&mut self, kind: CellKind, direction: quill_core::Direction) -> SessionResult<()> {
        let text = self.link.document_text()?;
        let cursor = self.link.cursor_line()?;
        let cells = parse(&text).map_err(SessionError::Core)?;
        match next_cell_of_kind(&cells, cursor, kind, direction, self.config.wrap_navigation) {
            Some(cell) => self.link.goto_line(cell.span.start),
            None => self
                .link
                .show_message(&format!("no {} cell in that direction", kind)),
        }
    }

    fn reinit_language(&mut self) -> SessionResult<()> {
        let text = self.link.document_text()?;
        let cursor = self.link.cursor_line()?;
        let cells = parse(&text).map_err(SessionError::Core)?;
        match document::find_cell_at(&cells, cursor) {
            Some(cell) => {
                let language = cell.language.clone();
                self.orchestrator
                    .pool()
                    .reinitialize(&self.config.document_id, &language);
                self.link
                    .show_message(&format!("{} interpreter reinitialized", language))
            }
            None => self.link.show_message("cursor is not inside a cell"),
        }
    }

    /// Apply the report's edits through the editor, bottom-up so every
    /// span stays valid against the text the edits were computed from.
    fn apply_edits(&mut self, report: &EvalReport) -> SessionResult<()> {
        let mut ordered: Vec<&Edit> = report.edits.iter().collect();
        ordered.sort_by(|a, b| b.position().cmp(&a.position()));
        for edit in ordered {
            match edit {
                Edit::Replace { span, lines } => {
                    self.link
                        .replace_lines(span.start, span.end, &lines.join("\n"))?
                }
                Edit::Insert { at, lines } => self.link.insert_lines(*at, &lines.join("\n"))?,
            }
        }
        Ok(())
    }

    /// One actionable status line: successes summarized, every failure
    /// named with its cell, language and document.
    fn report_summary(&mut self, report: &EvalReport) -> SessionResult<()> {
        if report.all_done() {
            return self.link.show_message(&format!(
                "{}: {} cell(s) evaluated",
                self.config.document_id,
                report.cells.len()
            ));
        }
        let mut parts = Vec::new();
        for cell in &report.cells {
            if cell.status != CellStatus::Done {
                parts.push(format!(
                    "cell {} ({}) {}{}",
                    cell.cell,
                    cell.language,
                    cell.status,
                    cell.note
                        .as_deref()
                        .map(|n| format!(": {}", n))
                        .unwrap_or_default()
                ));
            }
        }
        self.link.show_message(&format!(
            "{}: {}",
            self.config.document_id,
            parts.join("; ")
        ))
    }
}
