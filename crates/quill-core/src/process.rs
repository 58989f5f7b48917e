//! One live interactive interpreter over a PTY.
//!
//! Provides [`InterpreterProcess`]: spawn an interpreter attached to a
//! pseudo-terminal (interactive interpreters change buffering and prompt
//! behavior when not on a tty), feed it cell source, and collect the
//! output with sentinel-based completion detection.
//!
//! Completion is never inferred from the interpreter's native prompt:
//! prompts can legitimately appear inside printed output. Instead every
//! evaluation is followed by a sentinel command that echoes a fresh nonce
//! on a line of its own; collection ends when that line is observed.

use std::io::Write;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, TryRecvError};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use portable_pty::{Child, ChildKiller, CommandBuilder, MasterPty, NativePtySystem, PtySize, PtySystem};

use crate::error::{Error, Result};
use crate::registry::{EchoRule, InterpreterSpec};

/// Lifecycle state of an interpreter process.
///
/// Normal cycle is `Starting -> Idle -> Busy -> Idle`; any state can fall
/// to `Dead` on crash, timeout-induced kill, or explicit kill, and nothing
/// leaves `Dead`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Starting,
    Idle,
    Busy,
    Dead,
}

/// Thread-safe handle for killing an interpreter from another thread.
///
/// A user "kill" command can fire while `send_and_collect` is blocked on
/// the reader channel; the read observes the death (channel disconnect)
/// and returns an error instead of hanging.
#[derive(Clone)]
pub struct KillHandle {
    killer: Arc<Mutex<Box<dyn ChildKiller + Send + Sync>>>,
}

impl KillHandle {
    /// Kill the interpreter process. Safe to call from any thread; a
    /// process that already exited is a no-op.
    pub fn kill(&self) {
        if let Ok(mut killer) = self.killer.lock() {
            let _ = killer.kill();
        }
    }
}

/// A spawned interactive interpreter with its PTY channel.
pub struct InterpreterProcess {
    spec: Arc<InterpreterSpec>,
    state: ProcessState,
    child: Box<dyn Child + Send + Sync>,
    writer: Box<dyn Write + Send>,
    output: Receiver<Vec<u8>>,
    // Dropping the master closes the PTY, so it is held for the process
    // lifetime even though only the writer and reader thread touch it.
    _master: Box<dyn MasterPty + Send>,
    buffer: String,
    last_activity: Instant,
}

impl InterpreterProcess {
    /// Spawn the interpreter described by `spec`.
    ///
    /// After spawning, a sentinel readiness probe is sent and awaited for
    /// at most `spawn_timeout`. The probe both verifies that the
    /// interpreter answers and swallows any startup banner, so the first
    /// real evaluation starts from a clean transcript.
    pub fn start(spec: Arc<InterpreterSpec>, spawn_timeout: Duration) -> Result<Self> {
        // Reject a missing executable before touching the PTY.
        which::which(&spec.command).map_err(|e| Error::Spawn {
            language: spec.language.clone(),
            message: format!("{}: {}", spec.command, e),
        })?;

        let pty_system = NativePtySystem::default();
        let pair = pty_system
            .openpty(PtySize {
                rows: 40,
                cols: 120,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| Error::Pty(e.to_string()))?;

        let mut cmd = CommandBuilder::new(&spec.command);
        for arg in &spec.args {
            cmd.arg(arg);
        }

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| Error::Spawn {
                language: spec.language.clone(),
                message: e.to_string(),
            })?;

        let mut reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| Error::Pty(e.to_string()))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| Error::Pty(e.to_string()))?;

        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let mut buf = [0u8; 4096];
            loop {
                match reader.read(&mut buf) {
                    Ok(n) if n > 0 => {
                        if tx.send(buf[..n].to_vec()).is_err() {
                            break;
                        }
                    }
                    // EOF or read error: the interpreter exited.
                    _ => break,
                }
            }
        });

        let mut process = Self {
            state: ProcessState::Starting,
            child,
            writer,
            output: rx,
            _master: pair.master,
            buffer: String::new(),
            last_activity: Instant::now(),
            spec,
        };

        process.readiness_probe(spawn_timeout)?;
        process.state = ProcessState::Idle;
        tracing::debug!(
            language = %process.spec.language,
            pid = ?process.child.process_id(),
            "interpreter started"
        );
        Ok(process)
    }

    /// Send the spec's init commands and a sentinel, wait for the
    /// sentinel's echo, and discard the transcript (startup banner and
    /// init echo included).
    ///
    /// Bytes written before the interpreter finishes setting up its side
    /// of the terminal can be flushed away by that setup, so the probe
    /// re-sends its input (same nonce) every poll slice until the echo
    /// arrives. The init commands must be idempotent for this reason.
    fn readiness_probe(&mut self, timeout: Duration) -> Result<()> {
        let init: Vec<String> = self.spec.init_commands.clone();
        let nonce = new_nonce();
        let command = self.spec.sentinel_command(&nonce);

        let deadline = Instant::now() + timeout;
        let poll = Duration::from_millis(100).min(timeout);
        let mut transcript = String::new();
        loop {
            if Instant::now() >= deadline {
                self.kill();
                return Err(Error::Spawn {
                    language: self.spec.language.clone(),
                    message: "interpreter did not answer readiness probe".to_string(),
                });
            }
            for line in &init {
                self.write_line(line)?;
            }
            self.write_line(&command)?;

            match self.output.recv_timeout(poll) {
                Ok(chunk) => {
                    transcript.push_str(&String::from_utf8_lossy(&chunk));
                    // Keep reading without re-sending while bytes flow.
                    loop {
                        if contains_nonce_line(&transcript, &nonce) {
                            return self.settle_probe(poll);
                        }
                        if Instant::now() >= deadline {
                            self.kill();
                            return Err(Error::Spawn {
                                language: self.spec.language.clone(),
                                message: "interpreter did not answer readiness probe"
                                    .to_string(),
                            });
                        }
                        match self.output.recv_timeout(poll) {
                            Ok(chunk) => {
                                transcript.push_str(&String::from_utf8_lossy(&chunk));
                            }
                            Err(RecvTimeoutError::Timeout) => break,
                            Err(RecvTimeoutError::Disconnected) => {
                                self.state = ProcessState::Dead;
                                return Err(Error::Spawn {
                                    language: self.spec.language.clone(),
                                    message: "interpreter exited immediately".to_string(),
                                });
                            }
                        }
                    }
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    self.state = ProcessState::Dead;
                    return Err(Error::Spawn {
                        language: self.spec.language.clone(),
                        message: "interpreter exited immediately".to_string(),
                    });
                }
            }
        }
    }

    /// Discard echoes of any extra accepted probe copies: wait for one
    /// quiet poll slice so late probe output cannot leak into the first
    /// evaluation's transcript.
    fn settle_probe(&mut self, poll: Duration) -> Result<()> {
        loop {
            match self.output.recv_timeout(poll) {
                Ok(_) => continue,
                Err(RecvTimeoutError::Timeout) => return Ok(()),
                Err(RecvTimeoutError::Disconnected) => {
                    self.state = ProcessState::Dead;
                    return Err(Error::Spawn {
                        language: self.spec.language.clone(),
                        message: "interpreter exited immediately".to_string(),
                    });
                }
            }
        }
    }

    /// Evaluate `source_lines` and return the cleaned output.
    ///
    /// The source is written followed by a sentinel command; collection
    /// ends when the sentinel's nonce echoes back on a line of its own.
    /// `timeout` is an inactivity window, reset whenever the interpreter
    /// produces bytes, so a slow but live evaluation is not cut short.
    ///
    /// Failure modes:
    /// - an error pattern from the spec appears in the transcript:
    ///   [`Error::InterpreterError`] carrying the captured text;
    /// - the window elapses with no new bytes: the process is killed and
    ///   [`Error::InterpreterTimeout`] returned;
    /// - the process dies mid-read: [`Error::InterpreterError`], never a
    ///   hang.
    pub fn send_and_collect(
        &mut self,
        source_lines: &[String],
        timeout: Duration,
        keep_echo: bool,
    ) -> Result<String> {
        if self.state == ProcessState::Dead {
            return Err(Error::InterpreterError(format!(
                "{} interpreter is dead; reinitialize it first",
                self.spec.language
            )));
        }

        // Stale bytes from a previous evaluation (late prompt redraws,
        // output after a timeout) must not leak into this one.
        self.drain_pending();
        self.buffer.clear();
        self.state = ProcessState::Busy;

        for line in source_lines {
            self.write_line(line)?;
        }
        if self.spec.needs_blank_line {
            self.write_line("")?;
        }
        let nonce = new_nonce();
        let sentinel = self.spec.sentinel_command(&nonce);
        self.write_line(&sentinel)?;

        let started = Instant::now();
        let mut last_bytes = Instant::now();
        // Short poll slices so a killed or crashed interpreter is
        // observed promptly even when a grandchild keeps the PTY slave
        // open (no EOF on the reader in that case).
        let poll = Duration::from_millis(100).min(timeout);
        loop {
            match self.output.recv_timeout(poll) {
                Ok(chunk) => {
                    self.last_activity = Instant::now();
                    last_bytes = self.last_activity;
                    self.buffer.push_str(&String::from_utf8_lossy(&chunk));
                    if contains_nonce_line(&self.buffer, &nonce) {
                        break;
                    }
                }
                Err(RecvTimeoutError::Timeout) => {
                    if !matches!(self.child.try_wait(), Ok(None)) {
                        // Crashed or killed out from under us.
                        self.state = ProcessState::Dead;
                        let _ = self.child.wait();
                        let captured = self.take_cleaned(source_lines, &nonce, keep_echo);
                        return Err(Error::InterpreterError(if captured.is_empty() {
                            format!("{} interpreter exited unexpectedly", self.spec.language)
                        } else {
                            captured
                        }));
                    }
                    if last_bytes.elapsed() < timeout {
                        continue;
                    }
                    if self.error_observed() {
                        // The interpreter reported an error and went quiet
                        // without echoing the sentinel.
                        let captured = self.take_cleaned(source_lines, &nonce, keep_echo);
                        self.state = ProcessState::Idle;
                        return Err(Error::InterpreterError(captured));
                    }
                    tracing::warn!(
                        language = %self.spec.language,
                        waited = ?started.elapsed(),
                        "no interpreter output within window, killing"
                    );
                    self.kill();
                    return Err(Error::InterpreterTimeout {
                        language: self.spec.language.clone(),
                        waited: started.elapsed(),
                    });
                }
                Err(RecvTimeoutError::Disconnected) => {
                    self.state = ProcessState::Dead;
                    let _ = self.child.wait();
                    let captured = self.take_cleaned(source_lines, &nonce, keep_echo);
                    return Err(Error::InterpreterError(if captured.is_empty() {
                        format!("{} interpreter exited unexpectedly", self.spec.language)
                    } else {
                        captured
                    }));
                }
            }
        }

        let error = self.error_observed();
        let captured = self.take_cleaned(source_lines, &nonce, keep_echo);
        self.state = ProcessState::Idle;
        if error {
            Err(Error::InterpreterError(captured))
        } else {
            Ok(captured)
        }
    }

    /// Non-blocking liveness check.
    pub fn is_alive(&mut self) -> bool {
        if self.state == ProcessState::Dead {
            return false;
        }
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Terminate the OS process. Idempotent; the state becomes `Dead`.
    pub fn kill(&mut self) {
        if self.state == ProcessState::Dead {
            return;
        }
        self.state = ProcessState::Dead;
        if let Err(e) = self.child.kill() {
            tracing::debug!(language = %self.spec.language, "kill: {}", e);
        }
        // Reap the zombie.
        let _ = self.child.wait();
    }

    /// Thread-safe kill handle for interrupting an in-flight evaluation.
    pub fn kill_handle(&self) -> KillHandle {
        KillHandle {
            killer: Arc::new(Mutex::new(self.child.clone_killer())),
        }
    }

    /// Language this process interprets.
    pub fn language(&self) -> &str {
        &self.spec.language
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ProcessState {
        self.state
    }

    /// Instant of the last received output chunk.
    pub fn last_activity(&self) -> Instant {
        self.last_activity
    }

    /// OS process id, if the process has one.
    pub fn pid(&self) -> Option<u32> {
        self.child.process_id()
    }

    fn write_line(&mut self, line: &str) -> Result<()> {
        self.writer.write_all(line.as_bytes())?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        Ok(())
    }

    fn drain_pending(&mut self) {
        loop {
            match self.output.try_recv() {
                Ok(_) => continue,
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
    }

    fn error_observed(&self) -> bool {
        self.spec
            .error_patterns
            .iter()
            .any(|pattern| self.buffer.contains(pattern))
    }

    /// Clean and take the accumulated transcript, clearing the buffer.
    fn take_cleaned(&mut self, source_lines: &[String], nonce: &str, keep_echo: bool) -> String {
        let raw = std::mem::take(&mut self.buffer);
        clean_transcript(&self.spec, source_lines, &raw, nonce, keep_echo)
    }
}

impl Drop for InterpreterProcess {
    fn drop(&mut self) {
        self.kill();
    }
}

/// Fresh nonce for one sentinel round trip.
fn new_nonce() -> String {
    format!("quill-{}", uuid::Uuid::new_v4().simple())
}

/// Whether `text` contains a complete line that is exactly `nonce`.
///
/// The echoed sentinel *command* also contains the nonce, but wrapped in
/// quotes and call syntax; only the sentinel's *output* is the bare nonce
/// on its own line. Incomplete trailing lines are not considered.
fn contains_nonce_line(text: &str, nonce: &str) -> bool {
    let complete = match text.rfind('\n') {
        Some(end) => &text[..end],
        None => return false,
    };
    complete
        .lines()
        .any(|line| strip_prompts(line).trim() == nonce)
}

/// Strip leading prompt tokens (possibly repeated) from a line.
fn strip_prompts(line: &str) -> &str {
    let mut rest = line;
    loop {
        let trimmed = rest.trim_start_matches('\r');
        let next = trimmed
            .strip_prefix(">>> ")
            .or_else(|| trimmed.strip_prefix("... "))
            .or_else(|| trimmed.strip_prefix(">>>"))
            .or_else(|| trimmed.strip_prefix("..."));
        match next {
            Some(n) if n != rest => rest = n,
            _ => return trimmed,
        }
    }
}

/// Clean a raw PTY transcript into presentable cell output.
///
/// Removes sentinel artifacts (the echoed sentinel command and the nonce
/// line) and, unless `keep_echo` is set, echoed input lines and prompt
/// prefixes. Echoed input is matched against the sent lines in order so a
/// legitimate output line that happens to equal an earlier input line is
/// not dropped twice.
pub fn clean_transcript(
    spec: &InterpreterSpec,
    source_lines: &[String],
    raw: &str,
    nonce: &str,
    keep_echo: bool,
) -> String {
    let normalized = raw.replace("\r\n", "\n").replace('\r', "");
    let mut kept: Vec<&str> = Vec::new();
    let mut next_echo = 0usize;

    for line in normalized.lines() {
        if line.contains(nonce) {
            continue;
        }
        if keep_echo || spec.echo == EchoRule::Keep {
            kept.push(line);
            continue;
        }
        let stripped = strip_spec_prompts(spec, line);
        if next_echo < source_lines.len()
            && stripped.trim_end() == source_lines[next_echo].trim_end()
        {
            next_echo += 1;
            continue;
        }
        // The blank line appended to close indented blocks echoes too.
        if spec.needs_blank_line && stripped.trim().is_empty() && next_echo >= source_lines.len() {
            continue;
        }
        kept.push(stripped);
    }

    while kept.last().is_some_and(|line| line.trim().is_empty()) {
        kept.pop();
    }
    while kept.first().is_some_and(|line| line.trim().is_empty()) {
        kept.remove(0);
    }
    kept.join("\n")
}

/// Strip this spec's prompt tokens (possibly stacked) from a line start.
fn strip_spec_prompts<'a>(spec: &InterpreterSpec, line: &'a str) -> &'a str {
    let mut rest = line;
    loop {
        let mut advanced = false;
        for prompt in [spec.prompt.as_str(), spec.continuation_prompt.as_str()] {
            if prompt.is_empty() {
                continue;
            }
            if let Some(next) = rest.strip_prefix(prompt) {
                rest = next;
                advanced = true;
            }
        }
        if !advanced {
            return rest;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::SpecRegistry;

    fn python_spec() -> Arc<InterpreterSpec> {
        SpecRegistry::builtin().get("python").unwrap()
    }

    #[cfg(unix)]
    fn sh_spec() -> Arc<InterpreterSpec> {
        SpecRegistry::builtin().get("sh").unwrap()
    }

    // A freshly spawned interpreter may flush its terminal input while
    // setting up, discarding handshake bytes written too early; starting
    // several interpreters back to back must still always succeed.
    #[cfg(unix)]
    #[test]
    fn consecutive_spawns_all_become_ready() {
        let spec = sh_spec();
        for _ in 0..4 {
            let mut process = InterpreterProcess::start(Arc::clone(&spec), Duration::from_secs(10))
                .expect("handshake must survive interpreter terminal setup");
            assert_eq!(process.state(), ProcessState::Idle);
            let out = process
                .send_and_collect(&["echo ready".to_string()], Duration::from_secs(10), false)
                .unwrap();
            assert_eq!(out.trim(), "ready");
        }
    }

    #[cfg(unix)]
    #[test]
    fn error_pattern_in_output_fails_the_cell_but_not_the_process() {
        let mut spec = (*sh_spec()).clone();
        spec.error_patterns = vec!["ERR:".to_string()];
        let mut process =
            InterpreterProcess::start(Arc::new(spec), Duration::from_secs(10)).unwrap();

        let result = process.send_and_collect(
            &["echo 'ERR: boom'".to_string()],
            Duration::from_secs(10),
            false,
        );
        match result {
            Err(Error::InterpreterError(captured)) => assert!(captured.contains("ERR: boom")),
            other => panic!("expected InterpreterError, got {:?}", other),
        }
        // A reported error leaves the interpreter usable.
        assert!(process.is_alive());
        assert_eq!(process.state(), ProcessState::Idle);

        let out = process
            .send_and_collect(&["echo still up".to_string()], Duration::from_secs(10), false)
            .unwrap();
        assert_eq!(out.trim(), "still up");
    }

    #[test]
    fn nonce_line_detection_ignores_echoed_command() {
        // The echoed sentinel command contains the nonce but is not a
        // bare nonce line.
        let text = ">>> print(\"quill-aaaa\")\n";
        assert!(!contains_nonce_line(text, "quill-aaaa"));

        let text = ">>> print(\"quill-aaaa\")\nquill-aaaa\n";
        assert!(contains_nonce_line(text, "quill-aaaa"));
    }

    #[test]
    fn nonce_line_detection_ignores_incomplete_trailing_line() {
        let text = "output\nquill-aaaa";
        assert!(!contains_nonce_line(text, "quill-aaaa"));
    }

    #[test]
    fn prompt_like_output_does_not_terminate_collection() {
        // Printed strings containing the interpreter's own prompt must not
        // look like completion; only the nonce line ends collection.
        let text = ">>> print('>>> fake prompt')\n>>> fake prompt\n>>> \n";
        assert!(!contains_nonce_line(text, "quill-bbbb"));
    }

    #[test]
    fn clean_strips_echo_prompts_and_sentinel() {
        let spec = python_spec();
        let sent = vec!["x = 2".to_string(), "print(x * 3)".to_string()];
        let raw = ">>> x = 2\r\n>>> print(x * 3)\r\n6\r\n>>> print(\"quill-cccc\")\r\nquill-cccc\r\n>>> ";
        let cleaned = clean_transcript(&spec, &sent, raw, "quill-cccc", false);
        assert_eq!(cleaned, "6");
    }

    #[test]
    fn clean_keeps_transcript_when_echo_requested() {
        let spec = python_spec();
        let sent = vec!["print(1)".to_string()];
        let raw = ">>> print(1)\n1\n>>> print(\"quill-dddd\")\nquill-dddd\n";
        let cleaned = clean_transcript(&spec, &sent, raw, "quill-dddd", true);
        assert_eq!(cleaned, ">>> print(1)\n1");
    }

    #[test]
    fn clean_does_not_drop_output_equal_to_later_input() {
        let spec = python_spec();
        // Output "x = 2" appears after both echoes were consumed; it must
        // survive cleaning.
        let sent = vec!["x = 2".to_string(), "print('x = 2')".to_string()];
        let raw = ">>> x = 2\n>>> print('x = 2')\nx = 2\n>>> quill-eeee\n";
        let cleaned = clean_transcript(&spec, &sent, raw, "quill-eeee", false);
        assert_eq!(cleaned, "x = 2");
    }

    #[test]
    fn clean_preserves_traceback_lines() {
        let spec = python_spec();
        let sent = vec!["print(undefined)".to_string()];
        let raw = ">>> print(undefined)\nTraceback (most recent call last):\n  File \"<stdin>\", line 1, in <module>\nNameError: name 'undefined' is not defined\n>>> quill-ffff\n";
        let cleaned = clean_transcript(&spec, &sent, raw, "quill-ffff", false);
        assert!(cleaned.starts_with("Traceback"));
        assert!(cleaned.contains("NameError"));
    }
}
