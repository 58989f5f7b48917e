//! The abstract channel to the editor and its pipe transport.

use std::collections::VecDeque;
use std::io::{BufRead, Write};

use crate::error::{SessionError, SessionResult};
use crate::protocol::{ControllerRequest, EditorEvent, EditorMessage};

/// Abstract request/response channel to the editor.
///
/// Line arguments and results are 0-based; transports convert to the
/// wire's 1-based convention. The actual transport (stdio, named pipe,
/// socket) is the implementor's concern.
pub trait EditorLink {
    /// Next asynchronous event; `None` when the editor closed the
    /// channel.
    fn next_event(&mut self) -> SessionResult<Option<EditorEvent>>;

    /// Full text of the current document.
    fn document_text(&mut self) -> SessionResult<String>;

    /// 0-based line the cursor is on.
    fn cursor_line(&mut self) -> SessionResult<usize>;

    /// Replace lines `first..=last` (0-based, inclusive) with `text`,
    /// applied atomically by the editor.
    fn replace_lines(&mut self, first: usize, last: usize, text: &str) -> SessionResult<()>;

    /// Insert `text` before 0-based line `at`.
    fn insert_lines(&mut self, at: usize, text: &str) -> SessionResult<()>;

    /// Move the cursor to a 0-based line.
    fn goto_line(&mut self, line: usize) -> SessionResult<()>;

    /// Fold or unfold all cells.
    fn set_cells_open(&mut self, open: bool) -> SessionResult<()>;

    /// Show a status message to the user.
    fn show_message(&mut self, text: &str) -> SessionResult<()>;
}

/// [`EditorLink`] over a pair of byte streams carrying JSON lines.
///
/// Events that arrive while a reply is awaited are queued and delivered
/// by subsequent `next_event` calls, so a key pressed during a long
/// evaluation is not lost.
pub struct PipeLink<R, W> {
    reader: R,
    writer: W,
    pending: VecDeque<EditorEvent>,
}

impl<R: BufRead, W: Write> PipeLink<R, W> {
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader,
            writer,
            pending: VecDeque::new(),
        }
    }

    fn send(&mut self, request: &ControllerRequest) -> SessionResult<()> {
        let line = serde_json::to_string(request)?;
        tracing::trace!(request = %line, "-> editor");
        self.writer.write_all(line.as_bytes())?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        Ok(())
    }

    /// Read one message; `None` on a cleanly closed stream.
    fn read_message(&mut self) -> SessionResult<Option<EditorMessage>> {
        let mut line = String::new();
        loop {
            line.clear();
            let n = self.reader.read_line(&mut line)?;
            if n == 0 {
                return Ok(None);
            }
            if line.trim().is_empty() {
                continue;
            }
            tracing::trace!(message = %line.trim(), "<- editor");
            return Ok(Some(serde_json::from_str(line.trim())?));
        }
    }

    /// Send a request and block until its reply arrives, queueing any
    /// events received in the meantime.
    fn roundtrip(&mut self, request: &ControllerRequest) -> SessionResult<EditorMessage> {
        self.send(request)?;
        loop {
            match self.read_message()? {
                None => {
                    return Err(SessionError::Link(
                        "editor closed the channel mid-request".to_string(),
                    ))
                }
                Some(message) => match EditorEvent::from_message(message.clone()) {
                    Some(event) => self.pending.push_back(event),
                    None => return Ok(message),
                },
            }
        }
    }

    fn expect_ack(&mut self, request: &ControllerRequest) -> SessionResult<()> {
        match self.roundtrip(request)? {
            EditorMessage::Ack => Ok(()),
            EditorMessage::Failed { message } => Err(SessionError::EditorRejected(message)),
            other => Err(SessionError::Protocol(format!(
                "expected ack, got {:?}",
                other
            ))),
        }
    }
}

impl<R: BufRead, W: Write> EditorLink for PipeLink<R, W> {
    fn next_event(&mut self) -> SessionResult<Option<EditorEvent>> {
        if let Some(event) = self.pending.pop_front() {
            return Ok(Some(event));
        }
        loop {
            match self.read_message()? {
                None => return Ok(None),
                Some(message) => {
                    if let Some(event) = EditorEvent::from_message(message) {
                        return Ok(Some(event));
                    }
                    // A reply with no request in flight; ignore it.
                    tracing::warn!("dropping unsolicited editor reply");
                }
            }
        }
    }

    fn document_text(&mut self) -> SessionResult<String> {
        match self.roundtrip(&ControllerRequest::GetDocument)? {
            EditorMessage::Document { text } => Ok(text),
            EditorMessage::Failed { message } => Err(SessionError::EditorRejected(message)),
            other => Err(SessionError::Protocol(format!(
                "expected document, got {:?}",
                other
            ))),
        }
    }

    fn cursor_line(&mut self) -> SessionResult<usize> {
        match self.roundtrip(&ControllerRequest::GetCursor)? {
            EditorMessage::Cursor { line } => Ok(line.saturating_sub(1)),
            EditorMessage::Failed { message } => Err(SessionError::EditorRejected(message)),
            other => Err(SessionError::Protocol(format!(
                "expected cursor, got {:?}",
                other
            ))),
        }
    }

    fn replace_lines(&mut self, first: usize, last: usize, text: &str) -> SessionResult<()> {
        self.expect_ack(&ControllerRequest::ReplaceLines {
            first: first + 1,
            last: last + 1,
            text: text.to_string(),
        })
    }

    fn insert_lines(&mut self, at: usize, text: &str) -> SessionResult<()> {
        self.expect_ack(&ControllerRequest::InsertLines {
            first: at + 1,
            text: text.to_string(),
        })
    }

    fn goto_line(&mut self, line: usize) -> SessionResult<()> {
        self.expect_ack(&ControllerRequest::GotoLine { line: line + 1 })
    }

    fn set_cells_open(&mut self, open: bool) -> SessionResult<()> {
        self.expect_ack(&ControllerRequest::SetCellsOpen { open })
    }

    fn show_message(&mut self, text: &str) -> SessionResult<()> {
        self.expect_ack(&ControllerRequest::ShowMessage {
            text: text.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn link_from(lines: &str) -> PipeLink<Cursor<Vec<u8>>, Vec<u8>> {
        PipeLink::new(Cursor::new(lines.as_bytes().to_vec()), Vec::new())
    }

    #[test]
    fn events_arriving_during_a_roundtrip_are_queued() {
        let input = concat!(
            r#"{"type":"key_pressed","key":"F1"}"#,
            "\n",
            r#"{"type":"document","text":"body"}"#,
            "\n",
        );
        let mut link = link_from(input);

        let text = link.document_text().unwrap();
        assert_eq!(text, "body");

        let event = link.next_event().unwrap();
        assert_eq!(event, Some(EditorEvent::KeyPressed("F1".to_string())));
    }

    #[test]
    fn cursor_line_converts_to_zero_based() {
        let mut link = link_from("{\"type\":\"cursor\",\"line\":1}\n");
        assert_eq!(link.cursor_line().unwrap(), 0);
    }

    #[test]
    fn replace_sends_one_based_span_and_expects_ack() {
        let mut link = link_from("{\"type\":\"ack\"}\n");
        link.replace_lines(2, 4, "new text").unwrap();

        let written = String::from_utf8(link.writer.clone()).unwrap();
        assert!(written.contains("\"type\":\"replace_lines\""));
        assert!(written.contains("\"first\":3"));
        assert!(written.contains("\"last\":5"));
    }

    #[test]
    fn editor_failure_surfaces_as_rejected() {
        let mut link = link_from("{\"type\":\"failed\",\"message\":\"read only\"}\n");
        match link.goto_line(7) {
            Err(SessionError::EditorRejected(message)) => assert_eq!(message, "read only"),
            other => panic!("expected EditorRejected, got {:?}", other),
        }
    }

    #[test]
    fn closed_stream_yields_no_event() {
        let mut link = link_from("");
        assert_eq!(link.next_event().unwrap(), None);
    }
}
