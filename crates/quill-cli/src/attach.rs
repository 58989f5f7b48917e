//! Attach command implementation for Quill CLI.
//!
//! Serves one document over stdin/stdout: the editor writes events,
//! the controller answers with document requests. Logging goes to
//! stderr so the protocol owns both standard streams cleanly.

use std::sync::Arc;
use std::time::Duration;

use quill_core::{EvalConfig, ProcessPool, SpecRegistry};
use quill_session::{EditorSession, PipeLink, SessionConfig};

/// Serve an editor session until the document closes.
pub fn execute(document: &str, timeout_secs: u64, stop_on_error: bool) -> anyhow::Result<()> {
    tracing::info!(%document, "attaching");

    let link = PipeLink::new(std::io::stdin().lock(), std::io::stdout().lock());
    let pool = Arc::new(ProcessPool::new(SpecRegistry::builtin()));
    let eval = EvalConfig {
        eval_timeout: Duration::from_secs(timeout_secs),
        stop_on_error,
    };

    let mut session = EditorSession::new(link, pool, eval, SessionConfig::new(document));
    session.run()?;
    Ok(())
}
