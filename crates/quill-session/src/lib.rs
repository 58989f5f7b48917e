//! Editor-facing session layer.
//!
//! Speaks a line-delimited JSON protocol with a host editor, maps key
//! events to notebook actions, and drives the interpreter pool on the
//! editor's behalf.

pub mod commands;
pub mod error;
pub mod link;
pub mod protocol;
pub mod session;

pub use commands::{Action, Keymap};
pub use error::{SessionError, SessionResult};
pub use link::{EditorLink, PipeLink};
pub use protocol::{ControllerRequest, EditorEvent, EditorMessage};
pub use session::{EditorSession, SessionConfig};
