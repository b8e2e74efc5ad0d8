//! [`CommandMailbox`] – the operator's most recent instruction.
//!
//! A single slot with last-write-wins semantics.  Writers replace the held
//! text; readers copy it without consuming it, so the same command keeps
//! steering the oracle every cycle until the operator types something new.

use std::sync::Arc;

use tokio::sync::watch;

/// Command held before the operator has typed anything.
pub const DEFAULT_COMMAND: &str = "Start mission";

/// Shared single-slot command buffer.  Clones refer to the same slot.
#[derive(Debug, Clone)]
pub struct CommandMailbox {
    slot: Arc<watch::Sender<String>>,
}

impl CommandMailbox {
    pub fn new(initial: impl Into<String>) -> Self {
        let (tx, _) = watch::channel(initial.into());
        Self { slot: Arc::new(tx) }
    }

    /// Replace the held command with `text`, trimmed.
    ///
    /// Blank input is ignored and leaves the previous command in place.
    /// Returns `true` when the slot was updated.
    pub fn post(&self, text: &str) -> bool {
        let text = text.trim();
        if text.is_empty() {
            return false;
        }
        self.slot.send_replace(text.to_string());
        true
    }

    /// Copy of the latest command.
    pub fn read(&self) -> String {
        self.slot.borrow().clone()
    }
}

impl Default for CommandMailbox {
    fn default() -> Self {
        Self::new(DEFAULT_COMMAND)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_with_default_command() {
        assert_eq!(CommandMailbox::default().read(), DEFAULT_COMMAND);
    }

    #[test]
    fn last_write_wins() {
        let mailbox = CommandMailbox::default();
        assert!(mailbox.post("Take off to 10m"));
        assert!(mailbox.post("Land now"));
        assert_eq!(mailbox.read(), "Land now");
    }

    #[test]
    fn read_does_not_consume() {
        let mailbox = CommandMailbox::new("Hover");
        assert_eq!(mailbox.read(), "Hover");
        assert_eq!(mailbox.read(), "Hover");
    }

    #[test]
    fn blank_input_is_ignored_and_text_is_trimmed() {
        let mailbox = CommandMailbox::default();
        assert!(mailbox.post("  go to the pier \n"));
        assert!(!mailbox.post("   \t\n"));
        assert!(!mailbox.post(""));
        assert_eq!(mailbox.read(), "go to the pier");
    }

    #[test]
    fn clones_share_the_slot() {
        let mailbox = CommandMailbox::default();
        let writer = mailbox.clone();
        writer.post("RTL");
        assert_eq!(mailbox.read(), "RTL");
    }

    #[test]
    fn concurrent_writers_leave_one_complete_value() {
        let mailbox = CommandMailbox::default();
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let m = mailbox.clone();
                std::thread::spawn(move || {
                    for j in 0..100 {
                        m.post(&format!("writer {i} message {j}"));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let last = mailbox.read();
        assert!(last.starts_with("writer ") && last.ends_with("message 99"), "{last}");
    }
}
