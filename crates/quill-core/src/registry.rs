//! Static interpreter descriptors and their registry.
//!
//! Each supported language gets one [`InterpreterSpec`]: how to spawn the
//! interpreter, what its prompts look like, which output marks an error,
//! and how to build a sentinel command whose echo terminates collection.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::{Error, Result};

/// How echoed input lines are handled when cleaning captured output.
///
/// Interpreters attached to a terminal echo the lines written to them;
/// most of the time that echo is noise, but the user can toggle it on to
/// see prompts and input interleaved with results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EchoRule {
    /// Strip echoed input lines and prompt prefixes from the output.
    StripInput,
    /// Keep the raw transcript as captured.
    Keep,
}

/// Immutable per-language descriptor.
///
/// Identity is the `language` field; specs are created once at startup and
/// never mutated.
#[derive(Debug, Clone)]
pub struct InterpreterSpec {
    /// Language identifier, e.g. `"python"`.
    pub language: String,
    /// Executable to spawn.
    pub command: String,
    /// Arguments passed to the executable.
    pub args: Vec<String>,
    /// Primary prompt, e.g. `">>> "`. Used only as a trimming heuristic,
    /// never as the completion signal.
    pub prompt: String,
    /// Continuation prompt, e.g. `"... "`.
    pub continuation_prompt: String,
    /// Literal substrings that mark interpreter-reported errors.
    pub error_patterns: Vec<String>,
    /// Commands sent once right after spawn, before the readiness probe,
    /// e.g. to silence the shell's prompt. Their echo is swallowed by
    /// the probe.
    pub init_commands: Vec<String>,
    /// Command template producing a recognizable echo of the nonce;
    /// `{}` is replaced by the nonce.
    pub sentinel_template: String,
    /// Echo handling for captured output.
    pub echo: EchoRule,
    /// Whether a blank line must precede the sentinel so that an open
    /// indented block is closed first.
    pub needs_blank_line: bool,
}

impl InterpreterSpec {
    /// Render the sentinel command for a given nonce.
    pub fn sentinel_command(&self, nonce: &str) -> String {
        self.sentinel_template.replace("{}", nonce)
    }
}

/// Registry of interpreter specs, keyed by language identifier.
///
/// Built once at startup; `register` makes it pluggable for languages the
/// builtin table does not cover.
#[derive(Debug, Clone, Default)]
pub struct SpecRegistry {
    specs: BTreeMap<String, Arc<InterpreterSpec>>,
}

impl SpecRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the builtin language set.
    pub fn builtin() -> Self {
        let mut registry = Self::new();

        registry.register(InterpreterSpec {
            language: "python".to_string(),
            command: "python3".to_string(),
            args: vec!["-i".to_string(), "-u".to_string()],
            prompt: ">>> ".to_string(),
            continuation_prompt: "... ".to_string(),
            error_patterns: vec![
                "Traceback (most recent call last):".to_string(),
                "SyntaxError:".to_string(),
            ],
            init_commands: Vec::new(),
            sentinel_template: "print(\"{}\")".to_string(),
            echo: EchoRule::StripInput,
            needs_blank_line: true,
        });

        registry.register(InterpreterSpec {
            language: "sh".to_string(),
            command: "sh".to_string(),
            args: Vec::new(),
            prompt: "$ ".to_string(),
            continuation_prompt: "> ".to_string(),
            // An interactive shell on a PTY prints its prompt; silence
            // it so transcripts stay clean.
            init_commands: vec!["PS1=; PS2=".to_string()],
            error_patterns: Vec::new(),
            sentinel_template: "printf '%s\\n' '{}'".to_string(),
            echo: EchoRule::StripInput,
            needs_blank_line: false,
        });

        registry.register(InterpreterSpec {
            language: "r".to_string(),
            command: "R".to_string(),
            args: vec!["--no-save".to_string(), "--quiet".to_string()],
            prompt: "> ".to_string(),
            continuation_prompt: "+ ".to_string(),
            error_patterns: vec!["Error in ".to_string(), "Error: ".to_string()],
            init_commands: Vec::new(),
            sentinel_template: "cat(\"{}\\n\")".to_string(),
            echo: EchoRule::StripInput,
            needs_blank_line: false,
        });

        registry
    }

    /// Register a spec, replacing any previous entry for the same language.
    pub fn register(&mut self, spec: InterpreterSpec) {
        self.specs.insert(spec.language.clone(), Arc::new(spec));
    }

    /// Look up the spec for a language.
    pub fn get(&self, language: &str) -> Result<Arc<InterpreterSpec>> {
        self.specs
            .get(language)
            .cloned()
            .ok_or_else(|| Error::UnknownLanguage(language.to_string()))
    }

    /// Registered language identifiers, sorted.
    pub fn languages(&self) -> Vec<&str> {
        self.specs.keys().map(String::as_str).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_registry_has_python_and_shell() {
        let registry = SpecRegistry::builtin();
        assert!(registry.get("python").is_ok());
        assert!(registry.get("sh").is_ok());
        assert_eq!(registry.languages(), vec!["python", "r", "sh"]);
    }

    #[test]
    fn unknown_language_is_rejected() {
        let registry = SpecRegistry::builtin();
        match registry.get("fortran") {
            Err(Error::UnknownLanguage(lang)) => assert_eq!(lang, "fortran"),
            other => panic!("expected UnknownLanguage, got {:?}", other),
        }
    }

    #[test]
    fn sentinel_command_substitutes_nonce() {
        let registry = SpecRegistry::builtin();
        let spec = registry.get("python").unwrap();
        assert_eq!(spec.sentinel_command("abc123"), "print(\"abc123\")");
    }

    #[test]
    fn register_overrides_existing_spec() {
        let mut registry = SpecRegistry::builtin();
        let mut spec = (*registry.get("sh").unwrap()).clone();
        spec.command = "dash".to_string();
        registry.register(spec);
        assert_eq!(registry.get("sh").unwrap().command, "dash");
    }
}
