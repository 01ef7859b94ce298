//! Editor buffers attached to Code and Explain nodes.
//!
//! A node starts with its rendered content only. The editor is attached the
//! first time the node is materialized (read, edited or focused) and detached
//! again when the node is deleted.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EditorMode {
    Python,
    Markdown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditorConfig {
    pub mode: EditorMode,
    pub min_lines: usize,
    pub max_lines: usize,
    pub read_only: bool,
    pub wrap: bool,
}

impl EditorConfig {
    pub fn python(read_only: bool) -> Self {
        Self {
            mode: EditorMode::Python,
            min_lines: 1,
            max_lines: 25,
            read_only,
            wrap: false,
        }
    }

    pub fn markdown() -> Self {
        Self {
            mode: EditorMode::Markdown,
            min_lines: 5,
            max_lines: 40,
            read_only: false,
            wrap: true,
        }
    }

    /// Visible height for a buffer: clamped to `[min_lines, max_lines]`.
    pub fn visible_lines(&self, buffer: &str) -> usize {
        let lines = buffer.lines().count().max(1);
        lines.clamp(self.min_lines, self.max_lines)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Editor {
    config: EditorConfig,
    buffer: String,
    focused: bool,
}

impl Editor {
    fn new(config: EditorConfig, buffer: String) -> Self {
        Self {
            config,
            buffer,
            focused: false,
        }
    }

    pub fn config(&self) -> &EditorConfig {
        &self.config
    }

    pub fn value(&self) -> &str {
        &self.buffer
    }

    /// Replace the buffer. Read-only editors still accept programmatic values.
    pub fn set_value(&mut self, value: impl Into<String>) {
        self.buffer = value.into();
    }

    /// Insert at the end of the buffer, unless the editor is read-only.
    pub fn insert(&mut self, text: &str) -> bool {
        if self.config.read_only {
            return false;
        }
        self.buffer.push_str(text);
        true
    }

    pub fn focus(&mut self) {
        self.focused = true;
    }

    pub fn blur(&mut self) {
        self.focused = false;
    }

    pub fn is_focused(&self) -> bool {
        self.focused
    }
}

/// Content plus a lazily attached editor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditorSlot {
    config: EditorConfig,
    content: String,
    editor: Option<Editor>,
}

impl EditorSlot {
    pub fn new(config: EditorConfig, content: impl Into<String>) -> Self {
        Self {
            config,
            content: content.into(),
            editor: None,
        }
    }

    pub fn is_attached(&self) -> bool {
        self.editor.is_some()
    }

    /// Attach the editor on first use and return it.
    pub fn editor(&mut self) -> &mut Editor {
        let Self {
            config,
            content,
            editor,
        } = self;
        editor.get_or_insert_with(|| Editor::new(config.clone(), std::mem::take(content)))
    }

    pub fn value(&self) -> &str {
        match &self.editor {
            Some(editor) => editor.value(),
            None => &self.content,
        }
    }

    pub fn set_value(&mut self, value: impl Into<String>) {
        self.editor().set_value(value);
    }

    pub fn read_only(&self) -> bool {
        self.config.read_only
    }

    /// Drop the editor, keeping its last value as plain content.
    pub fn detach(&mut self) -> bool {
        match self.editor.take() {
            Some(editor) => {
                self.content = editor.buffer;
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_editor_is_attached_lazily() {
        let mut slot = EditorSlot::new(EditorConfig::python(false), "x = 1");
        assert!(!slot.is_attached());
        assert_eq!(slot.value(), "x = 1");

        slot.editor().focus();
        assert!(slot.is_attached());
        assert_eq!(slot.value(), "x = 1");
    }

    #[test]
    fn test_set_value_attaches_editor() {
        let mut slot = EditorSlot::new(EditorConfig::markdown(), "# title");
        slot.set_value("# other");
        assert!(slot.is_attached());
        assert_eq!(slot.value(), "# other");
    }

    #[test]
    fn test_detach_keeps_last_value() {
        let mut slot = EditorSlot::new(EditorConfig::python(false), "a");
        slot.set_value("b");
        assert!(slot.detach());
        assert!(!slot.is_attached());
        assert_eq!(slot.value(), "b");
        assert!(!slot.detach());
    }

    #[test]
    fn test_read_only_editor_rejects_insert() {
        let mut slot = EditorSlot::new(EditorConfig::python(true), "fixed");
        assert!(!slot.editor().insert("more"));
        assert_eq!(slot.value(), "fixed");
    }

    #[test]
    fn test_visible_lines_clamped() {
        let config = EditorConfig::markdown();
        assert_eq!(config.visible_lines("one"), 5);
        assert_eq!(config.visible_lines(&"x\n".repeat(100)), 40);
    }
}
