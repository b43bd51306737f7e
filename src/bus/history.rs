//! Command history with up/down recall for the command console

use std::collections::VecDeque;

/// Default number of commands remembered by the console
pub const DEFAULT_HISTORY_CAPACITY: usize = 100;

/// Bounded list of sent commands with a recall cursor
///
/// The cursor sits *between* entries, like a list iterator. The slot after
/// the newest command holds whatever the user was typing when recall
/// started, so walking forward past the newest command gives it back.
#[derive(Debug, Clone)]
pub struct CommandHistory {
    /// Stored commands, oldest first, followed by the in-progress slot
    entries: VecDeque<String>,
    capacity: usize,
    /// Cursor position while recalling; `None` when not recalling
    cursor: Option<usize>,
    /// Direction of the last move (true = forward)
    ascending: bool,
}

impl Default for CommandHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

impl CommandHistory {
    /// Create a history that keeps at most `capacity` commands
    pub fn new(capacity: usize) -> Self {
        let mut entries = VecDeque::with_capacity(capacity + 1);
        entries.push_back(String::new());
        Self {
            entries,
            capacity,
            cursor: None,
            ascending: false,
        }
    }

    /// Number of stored commands
    pub fn len(&self) -> usize {
        self.entries.len() - 1
    }

    /// Whether no command has been stored
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of stored commands
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Stored commands, oldest first
    pub fn commands(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().take(self.len()).map(String::as_str)
    }

    /// Whether a recall session is in progress
    pub fn is_recalling(&self) -> bool {
        self.cursor.is_some()
    }

    /// Commit a command and end any recall session
    pub fn add_command(&mut self, command: impl Into<String>) {
        if self.capacity == 0 {
            return;
        }
        if let Some(slot) = self.entries.back_mut() {
            *slot = command.into();
        }
        self.entries.push_back(String::new());
        while self.len() > self.capacity {
            self.entries.pop_front();
        }
        self.cursor = None;
        self.ascending = false;
    }

    /// Whether an older command can be recalled
    ///
    /// After a forward move this first steps back over the command that is
    /// currently shown, so the next [`get_previous`](Self::get_previous)
    /// returns the one before it.
    pub fn has_previous(&mut self) -> bool {
        match self.cursor {
            None => !self.is_empty(),
            Some(mut position) => {
                if self.ascending {
                    position = position.saturating_sub(1);
                    self.cursor = Some(position);
                    self.ascending = false;
                }
                position > 0
            }
        }
    }

    /// Recall the command before the cursor
    ///
    /// `current` is the text being edited; the first call of a recall
    /// session keeps it so it can be restored later.
    pub fn get_previous(&mut self, current: &str) -> Option<String> {
        let position = match self.cursor {
            Some(position) => position,
            None => {
                if self.is_empty() {
                    return None;
                }
                let slot = self.entries.len() - 1;
                self.entries[slot] = current.to_string();
                slot
            }
        };
        if position == 0 {
            self.cursor = Some(position);
            return None;
        }
        self.ascending = false;
        self.cursor = Some(position - 1);
        self.entries.get(position - 1).cloned()
    }

    /// Whether a newer command (or the saved in-progress text) can be
    /// recalled
    pub fn has_next(&mut self) -> bool {
        match self.cursor {
            None => false,
            Some(mut position) => {
                if !self.ascending {
                    position += 1;
                    self.cursor = Some(position);
                    self.ascending = true;
                }
                position < self.entries.len()
            }
        }
    }

    /// Recall the command after the cursor
    pub fn get_next(&mut self) -> Option<String> {
        let position = self.cursor?;
        let entry = self.entries.get(position).cloned()?;
        self.ascending = true;
        self.cursor = Some(position + 1);
        Some(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn history_abc() -> CommandHistory {
        let mut history = CommandHistory::new(100);
        history.add_command("A");
        history.add_command("B");
        history.add_command("C");
        history
    }

    #[test]
    fn test_previous_previous_next() {
        let mut history = history_abc();
        assert_eq!(history.get_previous("").as_deref(), Some("C"));
        assert_eq!(history.get_previous("").as_deref(), Some("B"));
        assert_eq!(history.get_next().as_deref(), Some("B"));
        assert_eq!(history.len(), 3);
    }

    #[test]
    fn test_console_key_sequence_restores_draft() {
        let mut history = history_abc();

        assert!(history.has_previous());
        assert_eq!(history.get_previous("dra").as_deref(), Some("C"));
        assert!(history.has_previous());
        assert_eq!(history.get_previous("C").as_deref(), Some("B"));

        assert!(history.has_next());
        assert_eq!(history.get_next().as_deref(), Some("C"));
        assert!(history.has_next());
        assert_eq!(history.get_next().as_deref(), Some("dra"));
        assert!(!history.has_next());

        assert!(history.has_previous());
        assert_eq!(history.get_previous("dra").as_deref(), Some("C"));
        assert_eq!(history.commands().collect::<Vec<_>>(), vec!["A", "B", "C"]);
    }

    #[test]
    fn test_oldest_entry_stops_recall() {
        let mut history = history_abc();
        history.get_previous("");
        history.get_previous("");
        assert_eq!(history.get_previous("").as_deref(), Some("A"));
        assert!(!history.has_previous());
        assert_eq!(history.get_previous(""), None);
    }

    #[test]
    fn test_empty_history() {
        let mut history = CommandHistory::default();
        assert!(history.is_empty());
        assert!(!history.has_previous());
        assert!(!history.has_next());
        assert_eq!(history.get_previous("x"), None);
        assert_eq!(history.get_next(), None);
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let mut history = CommandHistory::new(2);
        history.add_command("A");
        history.add_command("B");
        history.add_command("C");
        assert_eq!(history.commands().collect::<Vec<_>>(), vec!["B", "C"]);
    }

    #[test]
    fn test_add_resets_cursor() {
        let mut history = history_abc();
        history.get_previous("");
        assert!(history.is_recalling());
        history.add_command("D");
        assert!(!history.is_recalling());
        assert_eq!(history.get_previous("").as_deref(), Some("D"));
    }

    #[test]
    fn test_zero_capacity_stores_nothing() {
        let mut history = CommandHistory::new(0);
        history.add_command("A");
        assert!(history.is_empty());
    }
}
