//! Wire protocol between the controller and the editor.
//!
//! One JSON object per line in each direction. The editor pushes
//! notifications (key presses, document lifecycle) and answers the
//! controller's requests; the controller reads the document, moves the
//! cursor, and submits text replacements that the editor applies
//! atomically. Line numbers on the wire are 1-based, the convention
//! editors report; the session converts to 0-based internally.

use serde::{Deserialize, Serialize};

/// Requests sent from the controller to the editor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControllerRequest {
    /// Read the current document's full text.
    GetDocument,

    /// Read the cursor's current line (1-based).
    GetCursor,

    /// Replace lines `first..=last` (1-based) with `text`.
    ReplaceLines { first: usize, last: usize, text: String },

    /// Insert `text` before line `first` (1-based; one past the last
    /// line appends).
    InsertLines { first: usize, text: String },

    /// Move the cursor to a line (1-based).
    GotoLine { line: usize },

    /// Fold or unfold every cell in the document.
    SetCellsOpen { open: bool },

    /// Display a status message to the user.
    ShowMessage { text: String },
}

/// Messages received from the editor: asynchronous events and replies to
/// controller requests share the stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EditorMessage {
    /// A bound key was pressed.
    KeyPressed { key: String },

    /// The document is being closed; the session must tear down its
    /// interpreters.
    DocumentClosed,

    /// The editor is shutting the controller down.
    Shutdown,

    /// Reply to `GetDocument`.
    Document { text: String },

    /// Reply to `GetCursor` (1-based line).
    Cursor { line: usize },

    /// Positive reply to a mutating request.
    Ack,

    /// The editor could not perform a request.
    Failed { message: String },
}

impl EditorMessage {
    /// Whether this message is an asynchronous event rather than a reply.
    pub fn is_event(&self) -> bool {
        matches!(
            self,
            EditorMessage::KeyPressed { .. }
                | EditorMessage::DocumentClosed
                | EditorMessage::Shutdown
        )
    }
}

/// The event subset of [`EditorMessage`], as consumed by the session loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditorEvent {
    KeyPressed(String),
    DocumentClosed,
    Shutdown,
}

impl EditorEvent {
    /// Classify a wire message; `None` for replies.
    pub fn from_message(message: EditorMessage) -> Option<Self> {
        match message {
            EditorMessage::KeyPressed { key } => Some(EditorEvent::KeyPressed(key)),
            EditorMessage::DocumentClosed => Some(EditorEvent::DocumentClosed),
            EditorMessage::Shutdown => Some(EditorEvent::Shutdown),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requests_serialize_with_snake_case_tags() {
        let request = ControllerRequest::ReplaceLines {
            first: 3,
            last: 5,
            text: "x".to_string(),
        };
        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains("\"type\":\"replace_lines\""));
        assert!(json.contains("\"first\":3"));
    }

    #[test]
    fn key_press_round_trips() {
        let json = r#"{"type":"key_pressed","key":"F1"}"#;
        let message: EditorMessage = serde_json::from_str(json).unwrap();
        assert!(message.is_event());
        assert_eq!(
            EditorEvent::from_message(message),
            Some(EditorEvent::KeyPressed("F1".to_string()))
        );
    }

    #[test]
    fn replies_are_not_events() {
        let json = r#"{"type":"document","text":"hello"}"#;
        let message: EditorMessage = serde_json::from_str(json).unwrap();
        assert!(!message.is_event());
        assert!(EditorEvent::from_message(message).is_none());
    }
}
