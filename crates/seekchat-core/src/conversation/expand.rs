//! Per-message expand/collapse flags for the content and reasoning panes.

use std::collections::HashMap;

use super::message::{Message, Role};
use crate::keys::MessageKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Content,
    Reasoning,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExpandState {
    flags: HashMap<(MessageKey, Channel), bool>,
}

impl ExpandState {
    pub fn is_expanded(&self, key: MessageKey, channel: Channel) -> bool {
        self.flags.get(&(key, channel)).copied().unwrap_or(false)
    }

    pub fn set(&mut self, key: MessageKey, channel: Channel, expanded: bool) {
        self.flags.insert((key, channel), expanded);
    }

    /// Sets or toggles the content pane of `key`.
    ///
    /// Collapsing the content also collapses the reasoning pane.
    /// Returns the resulting content state.
    pub fn expand(&mut self, key: MessageKey, expanded: Option<bool>) -> bool {
        let value = expanded.unwrap_or_else(|| !self.is_expanded(key, Channel::Content));
        self.set(key, Channel::Content, value);
        if !value {
            self.set(key, Channel::Reasoning, false);
        }
        value
    }

    /// Expands every non-system message of `messages`.
    pub fn expand_path<'a>(&mut self, messages: impl IntoIterator<Item = &'a Message>) {
        for message in messages {
            if message.role != Role::System {
                self.set(message.key, Channel::Content, true);
            }
        }
    }

    pub fn collapse_all(&mut self) {
        self.flags.clear();
    }

    pub fn forget(&mut self, key: MessageKey) {
        self.flags.remove(&(key, Channel::Content));
        self.flags.remove(&(key, Channel::Reasoning));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_toggle_and_collapse_cascades() {
        let mut state = ExpandState::default();
        assert!(state.expand(1, None));
        state.set(1, Channel::Reasoning, true);
        assert!(state.is_expanded(1, Channel::Reasoning));

        assert!(!state.expand(1, None));
        assert!(!state.is_expanded(1, Channel::Content));
        assert!(!state.is_expanded(1, Channel::Reasoning));
    }

    #[test]
    fn test_expand_path_skips_system() {
        let messages = [
            Message::new(1, 1, Role::System, "rules"),
            Message::new(2, 2, Role::User, "hi"),
        ];
        let mut state = ExpandState::default();
        state.expand_path(messages.iter());
        assert!(!state.is_expanded(1, Channel::Content));
        assert!(state.is_expanded(2, Channel::Content));

        state.collapse_all();
        assert!(!state.is_expanded(2, Channel::Content));
    }
}
