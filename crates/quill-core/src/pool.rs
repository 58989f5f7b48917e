//! Per-document interpreter process pool.
//!
//! Maps `(document id, language)` to a live [`InterpreterProcess`],
//! creating entries lazily and tearing them down on reinit or session
//! close. The map lives behind the pool's own lock, so concurrent
//! `acquire`/`reinitialize` calls for one key can never race into two
//! live processes for that key.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::Result;
use crate::process::{InterpreterProcess, ProcessState};
use crate::registry::SpecRegistry;

/// Identifier of one open document session.
pub type DocumentId = String;

/// Pool key: one interpreter per document and language.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct PoolKey {
    document: DocumentId,
    language: String,
}

/// Shared handle to a pooled interpreter.
///
/// The orchestrator locks the inner mutex for the duration of one
/// evaluation step, which is what makes evaluations for one
/// (document, language) pair strictly sequential.
pub type PooledProcess = Arc<Mutex<InterpreterProcess>>;

/// Default window for the spawn readiness probe.
pub const DEFAULT_SPAWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Pool of interpreter processes, keyed by (document, language).
pub struct ProcessPool {
    registry: SpecRegistry,
    spawn_timeout: Duration,
    entries: Mutex<HashMap<PoolKey, PooledProcess>>,
}

impl ProcessPool {
    /// Create a pool over the given spec registry.
    pub fn new(registry: SpecRegistry) -> Self {
        Self::with_spawn_timeout(registry, DEFAULT_SPAWN_TIMEOUT)
    }

    /// Create a pool with a custom spawn probe window.
    pub fn with_spawn_timeout(registry: SpecRegistry, spawn_timeout: Duration) -> Self {
        Self {
            registry,
            spawn_timeout,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// The spec registry backing this pool.
    pub fn registry(&self) -> &SpecRegistry {
        &self.registry
    }

    /// Return the interpreter for (document, language), spawning lazily.
    ///
    /// An existing entry is returned as long as its process is alive,
    /// whether idle or busy; a dead entry is replaced. Fails with
    /// `UnknownLanguage` before any process is touched if no spec is
    /// registered for `language`.
    pub fn acquire(&self, document: &str, language: &str) -> Result<PooledProcess> {
        let spec = self.registry.get(language)?;
        let key = PoolKey {
            document: document.to_string(),
            language: language.to_string(),
        };

        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(existing) = entries.get(&key) {
            let alive = match existing.try_lock() {
                Ok(mut process) => process.is_alive(),
                // Locked means an evaluation is in flight, so the
                // process is busy and necessarily alive enough to reuse.
                Err(_) => true,
            };
            if alive {
                return Ok(Arc::clone(existing));
            }
            tracing::info!(%document, %language, "replacing dead interpreter");
            entries.remove(&key);
        }

        // Spawn happens under the map lock: two concurrent acquires for
        // the same key serialize here, preserving the single-entry
        // invariant.
        let process = InterpreterProcess::start(spec, self.spawn_timeout)?;
        let shared = Arc::new(Mutex::new(process));
        entries.insert(key, Arc::clone(&shared));
        Ok(shared)
    }

    /// Kill and remove the entry for (document, language), if any.
    ///
    /// The next `acquire` for this key spawns a fresh interpreter.
    pub fn reinitialize(&self, document: &str, language: &str) {
        let key = PoolKey {
            document: document.to_string(),
            language: language.to_string(),
        };
        let removed = {
            let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
            entries.remove(&key)
        };
        if let Some(process) = removed {
            tracing::info!(%document, %language, "reinitializing interpreter");
            kill_entry(&process);
        }
    }

    /// Kill and remove every entry belonging to `document`.
    pub fn reinitialize_document(&self, document: &str) {
        let removed: Vec<PooledProcess> = {
            let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
            let keys: Vec<PoolKey> = entries
                .keys()
                .filter(|key| key.document == document)
                .cloned()
                .collect();
            keys.into_iter().filter_map(|key| entries.remove(&key)).collect()
        };
        for process in removed {
            kill_entry(&process);
        }
    }

    /// Kill and remove every entry for every document.
    pub fn reinitialize_all(&self) {
        let removed: Vec<PooledProcess> = {
            let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
            entries.drain().map(|(_, process)| process).collect()
        };
        for process in removed {
            kill_entry(&process);
        }
    }

    /// Tear down a closing document session.
    ///
    /// Must be called on editor-session teardown so subprocesses are not
    /// leaked past the document's lifetime.
    pub fn shutdown(&self, document: &str) {
        self.reinitialize_document(document);
    }

    /// Tear down everything. Also runs on drop.
    pub fn shutdown_all(&self) {
        self.reinitialize_all();
    }

    /// Number of live entries, for diagnostics and tests.
    pub fn live_count(&self) -> usize {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.len()
    }
}

impl Drop for ProcessPool {
    fn drop(&mut self) {
        self.shutdown_all();
    }
}

fn kill_entry(process: &PooledProcess) {
    let mut guard = process.lock().unwrap_or_else(|e| e.into_inner());
    if guard.state() != ProcessState::Dead {
        guard.kill();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn acquire_unknown_language_is_rejected_without_spawning() {
        let pool = ProcessPool::new(SpecRegistry::builtin());
        match pool.acquire("doc-1", "fortran") {
            Err(Error::UnknownLanguage(lang)) => assert_eq!(lang, "fortran"),
            other => panic!("expected UnknownLanguage, got {:?}", other.map(|_| ())),
        }
        assert_eq!(pool.live_count(), 0);
    }

    #[test]
    fn acquire_missing_executable_is_spawn_error() {
        let mut registry = SpecRegistry::builtin();
        let mut spec = (*registry.get("sh").unwrap()).clone();
        spec.language = "ghost".to_string();
        spec.command = "quill-no-such-interpreter".to_string();
        registry.register(spec);

        let pool = ProcessPool::new(registry);
        match pool.acquire("doc-1", "ghost") {
            Err(Error::Spawn { language, .. }) => assert_eq!(language, "ghost"),
            other => panic!("expected Spawn, got {:?}", other.map(|_| ())),
        }
        assert_eq!(pool.live_count(), 0);
    }

    #[cfg(unix)]
    #[test]
    fn at_most_one_process_per_key_under_concurrent_acquire() {
        let pool = std::sync::Arc::new(ProcessPool::new(SpecRegistry::builtin()));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let pool = std::sync::Arc::clone(&pool);
            handles.push(std::thread::spawn(move || {
                pool.acquire("doc-1", "sh").unwrap()
            }));
        }
        let acquired: Vec<PooledProcess> =
            handles.into_iter().map(|h| h.join().unwrap()).collect();

        let pid = acquired[0].lock().unwrap().pid();
        for process in &acquired {
            assert_eq!(process.lock().unwrap().pid(), pid);
        }
        assert_eq!(pool.live_count(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn reinitialize_spawns_a_fresh_process() {
        let pool = ProcessPool::new(SpecRegistry::builtin());

        let first = pool.acquire("doc-1", "sh").unwrap();
        let first_pid = first.lock().unwrap().pid();

        pool.reinitialize("doc-1", "sh");
        assert_eq!(pool.live_count(), 0);
        assert_eq!(first.lock().unwrap().state(), ProcessState::Dead);

        let second = pool.acquire("doc-1", "sh").unwrap();
        assert_ne!(second.lock().unwrap().pid(), first_pid);
    }

    #[cfg(unix)]
    #[test]
    fn shutdown_removes_only_the_closing_document() {
        let pool = ProcessPool::new(SpecRegistry::builtin());
        pool.acquire("doc-1", "sh").unwrap();
        pool.acquire("doc-2", "sh").unwrap();
        assert_eq!(pool.live_count(), 2);

        pool.shutdown("doc-1");
        assert_eq!(pool.live_count(), 1);

        pool.shutdown_all();
        assert_eq!(pool.live_count(), 0);
    }
}
