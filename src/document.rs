// The document capability generated text is written into

use std::sync::{Mutex, MutexGuard, PoisonError};

/// The editing surface generated text lands in.
///
/// Implementors own document consistency; the render queue only ever calls
/// `insert_text_at_cursor` from one drain step at a time.
pub trait DocumentSink: Send + Sync {
    fn insert_text_at_cursor(&self, text: &str);
    fn scroll_cursor_into_view(&self);
    fn move_cursor_to_end(&self);
    fn can_undo(&self) -> bool;
    fn can_redo(&self) -> bool;
    fn clear(&self);
    /// Snapshot of the full document text.
    fn text(&self) -> String;
}

#[derive(Debug, Clone)]
enum Edit {
    Insert { at: usize, text: String },
    Replace { before: String, before_cursor: usize },
}

#[derive(Debug, Default)]
struct DocumentState {
    chars: Vec<char>,
    cursor: usize,
    undo: Vec<Edit>,
    redo: Vec<Edit>,
    scroll_requests: usize,
}

/// Plain-text document kept in memory, with one undo step per edit.
#[derive(Debug, Default)]
pub struct MemoryDocument {
    state: Mutex<DocumentState>,
}

impl MemoryDocument {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_text(text: &str) -> Self {
        let chars: Vec<char> = text.chars().collect();
        let cursor = chars.len();
        Self {
            state: Mutex::new(DocumentState {
                chars,
                cursor,
                ..DocumentState::default()
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, DocumentState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Cursor position in characters.
    pub fn cursor(&self) -> usize {
        self.lock().cursor
    }

    /// Move the cursor, clamped to the end of the document.
    pub fn set_cursor(&self, position: usize) {
        let mut state = self.lock();
        state.cursor = position.min(state.chars.len());
    }

    pub fn scroll_requests(&self) -> usize {
        self.lock().scroll_requests
    }

    /// Revert the most recent edit. Returns false when there is nothing to undo.
    pub fn undo(&self) -> bool {
        let mut state = self.lock();
        let Some(edit) = state.undo.pop() else {
            return false;
        };
        let inverse = match edit {
            Edit::Insert { at, text } => {
                let len = text.chars().count();
                state.chars.drain(at..at + len);
                state.cursor = at;
                Edit::Insert { at, text }
            }
            Edit::Replace {
                before,
                before_cursor,
            } => {
                let current: String = state.chars.iter().collect();
                let current_cursor = state.cursor;
                state.chars = before.chars().collect();
                state.cursor = before_cursor;
                Edit::Replace {
                    before: current,
                    before_cursor: current_cursor,
                }
            }
        };
        state.redo.push(inverse);
        true
    }

    /// Re-apply the most recently undone edit.
    pub fn redo(&self) -> bool {
        let mut state = self.lock();
        let Some(edit) = state.redo.pop() else {
            return false;
        };
        let inverse = match edit {
            Edit::Insert { at, text } => {
                let len = text.chars().count();
                state.chars.splice(at..at, text.chars());
                state.cursor = at + len;
                Edit::Insert { at, text }
            }
            Edit::Replace {
                before,
                before_cursor,
            } => {
                let current: String = state.chars.iter().collect();
                let current_cursor = state.cursor;
                state.chars = before.chars().collect();
                state.cursor = before_cursor;
                Edit::Replace {
                    before: current,
                    before_cursor: current_cursor,
                }
            }
        };
        state.undo.push(inverse);
        true
    }
}

impl DocumentSink for MemoryDocument {
    fn insert_text_at_cursor(&self, text: &str) {
        if text.is_empty() {
            return;
        }
        let mut state = self.lock();
        let at = state.cursor;
        state.chars.splice(at..at, text.chars());
        state.cursor = at + text.chars().count();
        state.undo.push(Edit::Insert {
            at,
            text: text.to_string(),
        });
        state.redo.clear();
    }

    fn scroll_cursor_into_view(&self) {
        self.lock().scroll_requests += 1;
    }

    fn move_cursor_to_end(&self) {
        let mut state = self.lock();
        state.cursor = state.chars.len();
    }

    fn can_undo(&self) -> bool {
        !self.lock().undo.is_empty()
    }

    fn can_redo(&self) -> bool {
        !self.lock().redo.is_empty()
    }

    fn clear(&self) {
        let mut state = self.lock();
        if state.chars.is_empty() {
            return;
        }
        let before: String = state.chars.drain(..).collect();
        let before_cursor = state.cursor;
        state.cursor = 0;
        state.undo.push(Edit::Replace {
            before,
            before_cursor,
        });
        state.redo.clear();
    }

    fn text(&self) -> String {
        self.lock().chars.iter().collect()
    }
}
