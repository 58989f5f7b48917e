//! Named actions and the key map that triggers them.
//!
//! Each action maps to exactly one orchestrator or pool operation; the
//! editor only ever reports opaque key names.

use std::collections::HashMap;

use quill_core::{CellKind, Direction};

/// One user-visible command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Evaluate the cell under the cursor.
    EvalCurrent { reinit: bool },
    /// Evaluate every cell of `kind` in the document.
    EvalAll {
        kind: CellKind,
        reinit: bool,
        /// Redirect results into a backup copy, leaving the live
        /// document untouched.
        backup: bool,
    },
    /// Move the cursor to the next/previous cell of `kind`.
    Goto { kind: CellKind, direction: Direction },
    /// Reinitialize the interpreter of the language under the cursor.
    ReinitLanguage,
    /// Reinitialize every interpreter of this document.
    ReinitDocument,
    /// Reinitialize every interpreter of every document.
    ReinitAll,
    /// Toggle prompts/echo in captured output.
    ToggleEcho,
    /// Fold or unfold all cells.
    SetCellsOpen { open: bool },
}

/// Key-name to action table.
#[derive(Debug, Clone)]
pub struct Keymap {
    bindings: HashMap<String, Action>,
}

impl Keymap {
    /// Empty key map.
    pub fn empty() -> Self {
        Self {
            bindings: HashMap::new(),
        }
    }

    /// Bind a key name to an action, replacing any previous binding.
    pub fn bind(&mut self, key: impl Into<String>, action: Action) {
        self.bindings.insert(key.into(), action);
    }

    /// Look up the action bound to a key name.
    pub fn lookup(&self, key: &str) -> Option<Action> {
        self.bindings.get(key).copied()
    }
}

impl Default for Keymap {
    /// The default function-key layout:
    ///
    /// | key  | action                                  |
    /// |------|-----------------------------------------|
    /// | F1   | evaluate current cell                   |
    /// | F2   | evaluate current cell after reinit      |
    /// | F3   | evaluate all code cells                 |
    /// | F4   | evaluate all code cells after reinit    |
    /// | F5   | evaluate all init cells                 |
    /// | F6   | evaluate all code cells into a backup   |
    /// | F7   | go to next code cell                    |
    /// | F8   | go to previous code cell                |
    /// | F9   | reinit current language                 |
    /// | F10  | reinit all interpreters of the document |
    /// | F11  | reinit every interpreter everywhere     |
    /// | F12  | toggle output echo                      |
    /// | S-F1 | open all cells                          |
    /// | S-F2 | close all cells                         |
    fn default() -> Self {
        let mut keymap = Self::empty();
        keymap.bind("F1", Action::EvalCurrent { reinit: false });
        keymap.bind("F2", Action::EvalCurrent { reinit: true });
        keymap.bind(
            "F3",
            Action::EvalAll {
                kind: CellKind::Code,
                reinit: false,
                backup: false,
            },
        );
        keymap.bind(
            "F4",
            Action::EvalAll {
                kind: CellKind::Code,
                reinit: true,
                backup: false,
            },
        );
        keymap.bind(
            "F5",
            Action::EvalAll {
                kind: CellKind::Init,
                reinit: false,
                backup: false,
            },
        );
        keymap.bind(
            "F6",
            Action::EvalAll {
                kind: CellKind::Code,
                reinit: false,
                backup: true,
            },
        );
        keymap.bind(
            "F7",
            Action::Goto {
                kind: CellKind::Code,
                direction: Direction::Forward,
            },
        );
        keymap.bind(
            "F8",
            Action::Goto {
                kind: CellKind::Code,
                direction: Direction::Backward,
            },
        );
        keymap.bind("F9", Action::ReinitLanguage);
        keymap.bind("F10", Action::ReinitDocument);
        keymap.bind("F11", Action::ReinitAll);
        keymap.bind("F12", Action::ToggleEcho);
        keymap.bind("S-F1", Action::SetCellsOpen { open: true });
        keymap.bind("S-F2", Action::SetCellsOpen { open: false });
        keymap
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_keymap_covers_the_function_row() {
        let keymap = Keymap::default();
        assert_eq!(
            keymap.lookup("F1"),
            Some(Action::EvalCurrent { reinit: false })
        );
        assert_eq!(keymap.lookup("F12"), Some(Action::ToggleEcho));
        assert_eq!(keymap.lookup("F13"), None);
    }

    #[test]
    fn bindings_can_be_overridden() {
        let mut keymap = Keymap::default();
        keymap.bind("F1", Action::ReinitAll);
        assert_eq!(keymap.lookup("F1"), Some(Action::ReinitAll));
    }
}
