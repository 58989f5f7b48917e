//! Interpreter process controller for Quill notebooks.
//!
//! This crate provides:
//! - A registry of per-language interpreter descriptors
//! - PTY-backed interpreter processes with sentinel completion detection
//! - A per-document process pool with explicit lifecycle
//! - A cell parser/renderer for the document markup
//! - The evaluation orchestrator tying them together

pub mod document;
pub mod error;
pub mod eval;
pub mod pool;
pub mod process;
pub mod registry;

pub use document::{Cell, CellKind, Direction, Edit, LineSpan};
pub use error::{Error, Result};
pub use eval::{CellReport, CellStatus, EvalConfig, EvalReport, EvalRequest, Orchestrator};
pub use pool::{DocumentId, PooledProcess, ProcessPool};
pub use process::{InterpreterProcess, KillHandle, ProcessState};
pub use registry::{EchoRule, InterpreterSpec, SpecRegistry};
