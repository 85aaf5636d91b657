//! The branching message graph of one conversation.
//!
//! Messages are stored unordered, keyed by [`MessageKey`]. The displayed
//! conversation (the *active path*) is rebuilt by following `next_key` from
//! `first_key`; alternates for one turn are siblings sharing a `group_key`.
//! Every derived view is computed on demand from the message map, so there is
//! nothing to invalidate after a mutation.

use std::collections::{BTreeMap, HashMap, HashSet};

use super::message::{Message, Role};
use crate::keys::MessageKey;

/// Result of [`MessageGraph::remove`].
#[derive(Debug, Clone, PartialEq)]
pub struct Removal {
    pub removed: Message,
    /// Sibling that became active because the branch point was left empty.
    pub fallback: Option<MessageKey>,
}

/// Result of [`MessageGraph::prepare_regenerate`].
#[derive(Debug, Clone, PartialEq)]
pub struct Regeneration {
    /// Group the replacement must join.
    pub group_key: MessageKey,
    /// The empty trailing placeholder that was dropped, if any.
    pub removed: Option<Removal>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageGraph {
    first_key: Option<MessageKey>,
    messages: BTreeMap<MessageKey, Message>,
}

impl MessageGraph {
    pub fn new(first_key: Option<MessageKey>, messages: BTreeMap<MessageKey, Message>) -> Self {
        Self {
            first_key,
            messages,
        }
    }

    pub fn first_key(&self) -> Option<MessageKey> {
        self.first_key
    }

    pub fn set_first_key(&mut self, key: Option<MessageKey>) {
        self.first_key = key;
    }

    pub fn messages(&self) -> &BTreeMap<MessageKey, Message> {
        &self.messages
    }

    pub fn get(&self, key: MessageKey) -> Option<&Message> {
        self.messages.get(&key)
    }

    pub fn get_mut(&mut self, key: MessageKey) -> Option<&mut Message> {
        self.messages.get_mut(&key)
    }

    pub fn contains(&self, key: MessageKey) -> bool {
        self.messages.contains_key(&key)
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn insert(&mut self, message: Message) {
        self.messages.insert(message.key, message);
    }

    // ------------------------------------------------------------------
    // Derived views
    // ------------------------------------------------------------------

    /// All messages in ascending key order.
    pub fn all_messages(&self) -> impl Iterator<Item = &Message> {
        self.messages.values()
    }

    /// Sibling sets keyed by group, each ordered newest first.
    ///
    /// Messages without a group (`group_key == 0`) belong to no set.
    pub fn group_map(&self) -> HashMap<MessageKey, Vec<MessageKey>> {
        let mut groups: HashMap<MessageKey, Vec<MessageKey>> = HashMap::new();
        for message in self.messages.values().rev() {
            if message.group_key != 0 {
                groups.entry(message.group_key).or_default().push(message.key);
            }
        }
        groups
    }

    /// Keys of every message sharing `key`'s group (including `key`), newest first.
    pub fn siblings(&self, key: MessageKey) -> Vec<MessageKey> {
        match self.messages.get(&key) {
            Some(message) if message.group_key != 0 => self.group_members(message.group_key),
            Some(message) => vec![message.key],
            None => Vec::new(),
        }
    }

    fn group_members(&self, group_key: MessageKey) -> Vec<MessageKey> {
        self.messages
            .values()
            .rev()
            .filter(|m| m.group_key == group_key)
            .map(|m| m.key)
            .collect()
    }

    /// Keys of the active path.
    ///
    /// Starts at `first_key`, or at the lowest key when `first_key` is unset
    /// or dangling, and follows `next_key`. A message is never visited twice
    /// and the walk never exceeds the number of stored messages, so corrupt
    /// cyclic links terminate.
    pub fn active_path(&self) -> Vec<MessageKey> {
        let start = self
            .first_key
            .and_then(|key| self.messages.get(&key))
            .or_else(|| self.messages.values().next());
        let Some(mut message) = start else {
            return Vec::new();
        };

        let max_count = self.messages.len();
        let mut visited = HashSet::from([message.key]);
        let mut path = vec![message.key];
        while let Some(next) = message.next_key.and_then(|key| self.messages.get(&key)) {
            if path.len() >= max_count || !visited.insert(next.key) {
                break;
            }
            path.push(next.key);
            message = next;
        }
        path
    }

    /// Messages of the active path, in order.
    pub fn active_messages(&self) -> Vec<&Message> {
        self.active_path()
            .into_iter()
            .filter_map(|key| self.messages.get(&key))
            .collect()
    }

    /// For every message, the key of the message whose `next_key` leads into
    /// its group.
    ///
    /// Inactive siblings resolve to the same predecessor as the active one.
    /// When several messages point into one group, the highest key wins.
    pub fn prev_key_map(&self) -> HashMap<MessageKey, MessageKey> {
        let groups = self.group_map();
        let mut map = HashMap::new();
        for message in self.messages.values() {
            let Some(next) = message.next_key.and_then(|key| self.messages.get(&key)) else {
                continue;
            };
            match groups.get(&next.group_key) {
                Some(members) if next.group_key != 0 => {
                    for member in members {
                        map.insert(*member, message.key);
                    }
                }
                _ => {
                    map.insert(next.key, message.key);
                }
            }
        }
        map
    }

    /// Active-path messages without a resolvable predecessor.
    pub fn root_messages(&self) -> Vec<MessageKey> {
        let prev = self.prev_key_map();
        self.active_path()
            .into_iter()
            .filter(|key| {
                prev.get(key)
                    .map_or(true, |prev_key| !self.messages.contains_key(prev_key))
            })
            .collect()
    }

    /// The active-path message whose `next_key` is `key`.
    fn predecessor_on_path(&self, path: &[MessageKey], key: MessageKey) -> Option<MessageKey> {
        path.iter().copied().find(|candidate| {
            self.messages
                .get(candidate)
                .is_some_and(|m| m.next_key == Some(key))
        })
    }

    fn set_next(&mut self, key: MessageKey, next: Option<MessageKey>) {
        if let Some(message) = self.messages.get_mut(&key) {
            message.next_key = next;
        }
    }

    // ------------------------------------------------------------------
    // Mutations
    // ------------------------------------------------------------------

    /// Inserts a user message at the end of the active path, or before the
    /// path entry at `index`.
    ///
    /// Returns `true` when this was the first message of the path.
    pub fn insert_user(&mut self, mut message: Message, index: Option<usize>) -> bool {
        let path = self.active_path();
        let is_first = path.is_empty();
        let key = message.key;

        let (prev, next) = match index {
            Some(index) => (
                index.checked_sub(1).and_then(|i| path.get(i).copied()),
                path.get(index).copied(),
            ),
            None => (path.last().copied(), None),
        };

        match prev {
            Some(prev) => self.set_next(prev, Some(key)),
            None => self.first_key = Some(key),
        }
        if next.is_some() {
            message.next_key = next;
        }
        self.messages.insert(key, message);
        is_first
    }

    /// Appends an empty assistant placeholder after the active path's tail.
    pub fn attach_placeholder(&mut self, key: MessageKey, group_key: MessageKey) {
        match self.active_path().last().copied() {
            Some(tail) => self.set_next(tail, Some(key)),
            None => self.first_key = Some(key),
        }
        self.messages.insert(key, Message::placeholder(key, group_key));
    }

    /// Detaches `key` from the active path and deletes it.
    ///
    /// With `is_slice` the predecessor is relinked to the removed message's
    /// successor; otherwise the predecessor becomes a leaf. A predecessor left
    /// without successor falls back to a remaining sibling of the removed
    /// message. Messages off the active path are left untouched (`None`).
    pub fn remove(&mut self, key: MessageKey, is_slice: bool) -> Option<Removal> {
        let path = self.active_path();
        let index = path.iter().position(|k| *k == key)?;
        let (removed_next, group_key) = {
            let current = self.messages.get(&key)?;
            (current.next_key, current.group_key)
        };
        let sibling = if group_key != 0 {
            self.group_members(group_key).into_iter().find(|k| *k != key)
        } else {
            None
        };

        let relinked = if is_slice { removed_next } else { None };
        let target = relinked.or(sibling);
        let fallback = if relinked.is_some() { None } else { sibling };
        match index {
            0 => self.first_key = target,
            _ => self.set_next(path[index - 1], target),
        }

        let removed = self.messages.remove(&key)?;
        Some(Removal { removed, fallback })
    }

    /// Prepares regenerating `key` as a new sibling stored under `new_key`.
    ///
    /// The predecessor is re-pointed at `new_key`; an empty trailing
    /// placeholder at `key` is removed first.
    pub fn prepare_regenerate(
        &mut self,
        key: MessageKey,
        new_key: MessageKey,
    ) -> Option<Regeneration> {
        let path = self.active_path();
        if !path.contains(&key) {
            return None;
        }
        let message = self.messages.get(&key)?;
        let group_key = message.group_key;
        let is_blank = message.is_blank();
        let prev = self.predecessor_on_path(&path, key);
        let is_last = path.last() == Some(&key);

        let removed = if is_last && is_blank {
            self.remove(key, false)
        } else {
            None
        };
        if let Some(prev) = prev {
            self.set_next(prev, Some(new_key));
        }
        Some(Regeneration { group_key, removed })
    }

    /// Makes `target` the active sibling in place of `current`.
    pub fn group_change(&mut self, current: MessageKey, target: MessageKey) -> bool {
        if !self.messages.contains_key(&target) {
            return false;
        }
        let path = self.active_path();
        match self.predecessor_on_path(&path, current) {
            Some(prev) => self.set_next(prev, Some(target)),
            None => self.first_key = Some(target),
        }
        true
    }

    /// Rewires predecessors from `target` back to the root so that `target`
    /// lies on the active path.
    pub fn switch_to(&mut self, target: MessageKey) -> bool {
        if !self.messages.contains_key(&target) {
            return false;
        }
        let prev_map = self.prev_key_map();
        let mut key = target;
        let mut visited = HashSet::new();
        while visited.insert(key) {
            let prev = prev_map
                .get(&key)
                .copied()
                .filter(|prev| self.messages.contains_key(prev));
            match prev {
                Some(prev) => {
                    self.set_next(prev, Some(key));
                    key = prev;
                }
                None => {
                    self.first_key = Some(key);
                    break;
                }
            }
        }
        true
    }

    /// Edits an active-path message.
    ///
    /// Without `branch_key` the content is replaced in place. With it, a new
    /// sibling (same role and group) holding `content` is created under
    /// `branch_key` and made active; it starts without successor.
    /// Returns the key now holding the edited content.
    pub fn edit(
        &mut self,
        edit_key: MessageKey,
        content: String,
        branch_key: Option<MessageKey>,
    ) -> Option<MessageKey> {
        let path = self.active_path();
        if !path.contains(&edit_key) {
            return None;
        }
        let Some(new_key) = branch_key else {
            let message = self.messages.get_mut(&edit_key)?;
            message.content = content;
            return Some(edit_key);
        };

        let (group_key, role) = {
            let message = self.messages.get(&edit_key)?;
            (message.group_key, message.role)
        };
        match self.predecessor_on_path(&path, edit_key) {
            Some(prev) => self.set_next(prev, Some(new_key)),
            None => self.first_key = Some(new_key),
        }
        self.messages
            .insert(new_key, Message::new(new_key, group_key, role, content));
        Some(new_key)
    }

    /// Deletes every message and resets the root. Returns the removed keys.
    pub fn clear(&mut self) -> Vec<MessageKey> {
        let keys = self.messages.keys().copied().collect();
        self.messages.clear();
        self.first_key = None;
        keys
    }

    /// Merges imported messages.
    ///
    /// Messages for which `is_deleted` holds are skipped. An imported message
    /// replaces the local one when `overwrite` is set or no local copy
    /// exists. Returns whether any content differed from the local copy.
    pub fn merge(
        &mut self,
        incoming: &BTreeMap<MessageKey, Message>,
        overwrite: bool,
        is_deleted: impl Fn(MessageKey) -> bool,
    ) -> bool {
        let mut changed = false;
        for (key, message) in incoming {
            if is_deleted(*key) {
                continue;
            }
            let local = self.messages.get(key);
            if local.map(|m| &m.content) != Some(&message.content) {
                changed = true;
            }
            if overwrite || local.is_none() {
                self.messages.insert(*key, message.clone());
            }
        }
        changed
    }

    /// Role/content of the active path, as request context.
    pub fn context(&self) -> Vec<(Role, String)> {
        self.active_messages()
            .into_iter()
            .map(|m| (m.role, m.content.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(key: MessageKey, group: MessageKey, role: Role, next: Option<MessageKey>) -> Message {
        let mut message = Message::new(key, group, role, format!("m{key}"));
        message.next_key = next;
        message
    }

    /// 1(user) -> 2(assistant) -> 3(user) -> 4(assistant), with 5 an inactive
    /// sibling of 2 (group 2) that continues to 6.
    fn branched() -> MessageGraph {
        let mut messages = BTreeMap::new();
        for m in [
            msg(1, 1, Role::User, Some(2)),
            msg(2, 2, Role::Assistant, Some(3)),
            msg(3, 3, Role::User, Some(4)),
            msg(4, 4, Role::Assistant, None),
            msg(5, 2, Role::Assistant, Some(6)),
            msg(6, 6, Role::User, None),
        ] {
            messages.insert(m.key, m);
        }
        MessageGraph::new(Some(1), messages)
    }

    #[test]
    fn test_active_path_follows_next_keys() {
        let graph = branched();
        assert_eq!(graph.active_path(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_active_path_starts_at_lowest_key_without_root() {
        let mut graph = branched();
        graph.set_first_key(None);
        assert_eq!(graph.active_path(), vec![1, 2, 3, 4]);
        graph.set_first_key(Some(999));
        assert_eq!(graph.active_path(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_active_path_terminates_on_cycle() {
        let mut graph = branched();
        graph.get_mut(4).unwrap().next_key = Some(1);
        let path = graph.active_path();
        assert_eq!(path, vec![1, 2, 3, 4]);
        assert!(path.len() <= graph.len());
    }

    #[test]
    fn test_active_path_self_loop() {
        let mut messages = BTreeMap::new();
        messages.insert(1, msg(1, 1, Role::User, Some(1)));
        let graph = MessageGraph::new(Some(1), messages);
        assert_eq!(graph.active_path(), vec![1]);
    }

    #[test]
    fn test_group_map_newest_first() {
        let graph = branched();
        let groups = graph.group_map();
        assert_eq!(groups[&2], vec![5, 2]);
        assert_eq!(graph.siblings(2), vec![5, 2]);
        assert_eq!(graph.siblings(3), vec![3]);
    }

    #[test]
    fn test_prev_key_map_covers_inactive_siblings() {
        let graph = branched();
        let prev = graph.prev_key_map();
        assert_eq!(prev[&2], 1);
        assert_eq!(prev[&5], 1);
        assert_eq!(prev[&3], 2);
        assert_eq!(prev[&6], 5);
        assert!(!prev.contains_key(&1));
    }

    #[test]
    fn test_root_messages() {
        let graph = branched();
        assert_eq!(graph.root_messages(), vec![1]);
    }

    #[test]
    fn test_insert_user_on_empty_graph_sets_root() {
        let mut graph = MessageGraph::default();
        let is_first = graph.insert_user(Message::new(10, 11, Role::User, "hello"), None);
        assert!(is_first);
        assert_eq!(graph.first_key(), Some(10));
        assert_eq!(graph.active_path(), vec![10]);
    }

    #[test]
    fn test_insert_user_at_index_splices() {
        let mut graph = branched();
        graph.insert_user(Message::new(20, 20, Role::User, "spliced"), Some(2));
        assert_eq!(graph.active_path(), vec![1, 2, 20, 3, 4]);

        graph.insert_user(Message::new(21, 21, Role::User, "front"), Some(0));
        assert_eq!(graph.first_key(), Some(21));
        assert_eq!(graph.active_path(), vec![21, 1, 2, 20, 3, 4]);
    }

    #[test]
    fn test_remove_slice_preserves_connectivity() {
        let mut graph = branched();
        let prior_next = graph.get(3).unwrap().next_key;
        let removal = graph.remove(3, true).unwrap();
        assert_eq!(removal.removed.key, 3);
        assert_eq!(graph.get(2).unwrap().next_key, prior_next);
        assert_eq!(graph.active_path(), vec![1, 2, 4]);
    }

    #[test]
    fn test_remove_without_slice_falls_back_to_sibling() {
        let mut graph = branched();
        let removal = graph.remove(2, false).unwrap();
        assert_eq!(removal.fallback, Some(5));
        assert_eq!(graph.active_path(), vec![1, 5, 6]);
    }

    #[test]
    fn test_remove_without_slice_leaves_leaf() {
        let mut graph = branched();
        let removal = graph.remove(3, false).unwrap();
        assert_eq!(removal.fallback, None);
        assert_eq!(graph.active_path(), vec![1, 2]);
        assert!(!graph.contains(3));
    }

    #[test]
    fn test_remove_off_path_is_ignored() {
        let mut graph = branched();
        assert!(graph.remove(6, false).is_none());
        assert!(graph.contains(6));
    }

    #[test]
    fn test_remove_root_with_slice_moves_root() {
        let mut graph = branched();
        graph.remove(1, true).unwrap();
        assert_eq!(graph.first_key(), Some(2));
        assert_eq!(graph.active_path(), vec![2, 3, 4]);
    }

    #[test]
    fn test_prepare_regenerate_keeps_group() {
        let mut graph = branched();
        let regeneration = graph.prepare_regenerate(4, 40).unwrap();
        assert_eq!(regeneration.group_key, 4);
        assert!(regeneration.removed.is_none());
        assert_eq!(graph.get(3).unwrap().next_key, Some(40));

        graph.attach_placeholder(40, regeneration.group_key);
        assert_eq!(graph.active_path(), vec![1, 2, 3, 40]);
        assert_eq!(graph.siblings(40), vec![40, 4]);
    }

    #[test]
    fn test_prepare_regenerate_drops_blank_tail() {
        let mut graph = branched();
        graph.attach_placeholder(7, 7);
        let regeneration = graph.prepare_regenerate(7, 8).unwrap();
        assert_eq!(regeneration.removed.as_ref().map(|r| r.removed.key), Some(7));
        assert!(!graph.contains(7));
        assert_eq!(graph.get(4).unwrap().next_key, Some(8));
    }

    #[test]
    fn test_group_change_keeps_one_sibling_active() {
        let mut graph = branched();
        assert!(graph.group_change(2, 5));
        let path = graph.active_path();
        assert_eq!(path, vec![1, 5, 6]);

        let siblings = graph.siblings(5);
        let active = path.iter().filter(|k| siblings.contains(k)).count();
        assert_eq!(active, 1);

        assert!(graph.group_change(5, 2));
        assert_eq!(graph.active_path(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_group_change_at_root() {
        let mut messages = BTreeMap::new();
        messages.insert(1, msg(1, 1, Role::User, None));
        messages.insert(2, msg(2, 1, Role::User, None));
        let mut graph = MessageGraph::new(Some(1), messages);
        assert!(graph.group_change(1, 2));
        assert_eq!(graph.first_key(), Some(2));
        assert!(!graph.group_change(2, 99));
    }

    #[test]
    fn test_switch_to_message_rewires_chain() {
        let mut graph = branched();
        assert!(graph.switch_to(6));
        assert_eq!(graph.active_path(), vec![1, 5, 6]);
        assert_eq!(graph.first_key(), Some(1));

        assert!(graph.switch_to(4));
        assert_eq!(graph.active_path(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_switch_to_terminates_on_cycle() {
        let mut graph = branched();
        graph.get_mut(4).unwrap().next_key = Some(1);
        assert!(graph.switch_to(3));
        assert!(graph.active_path().contains(&3));
    }

    #[test]
    fn test_edit_in_place_and_branch() {
        let mut graph = branched();
        assert_eq!(graph.edit(3, "changed".into(), None), Some(3));
        assert_eq!(graph.get(3).unwrap().content, "changed");

        assert_eq!(graph.edit(3, "branched".into(), Some(30)), Some(30));
        assert_eq!(graph.active_path(), vec![1, 2, 30]);
        let branch = graph.get(30).unwrap();
        assert_eq!(branch.group_key, 3);
        assert_eq!(branch.role, Role::User);
        assert_eq!(graph.siblings(30), vec![30, 3]);

        assert_eq!(graph.edit(6, "off path".into(), None), None);
    }

    #[test]
    fn test_clear() {
        let mut graph = branched();
        let removed = graph.clear();
        assert_eq!(removed, vec![1, 2, 3, 4, 5, 6]);
        assert!(graph.is_empty());
        assert_eq!(graph.first_key(), None);
    }

    #[test]
    fn test_merge_without_overwrite_keeps_local_content() {
        let mut graph = branched();
        let mut incoming = BTreeMap::new();
        let mut edited = graph.get(2).unwrap().clone();
        edited.content = "remote".into();
        incoming.insert(2, edited);
        incoming.insert(9, msg(9, 9, Role::User, None));

        let changed = graph.merge(&incoming, false, |_| false);
        assert!(changed);
        assert_eq!(graph.get(2).unwrap().content, "m2");
        assert!(graph.contains(9));
    }

    #[test]
    fn test_merge_with_overwrite_respects_tombstones() {
        let mut graph = branched();
        let mut incoming = BTreeMap::new();
        let mut edited = graph.get(2).unwrap().clone();
        edited.content = "remote".into();
        incoming.insert(2, edited);
        incoming.insert(9, msg(9, 9, Role::User, None));

        let changed = graph.merge(&incoming, true, |key| key == 9);
        assert!(changed);
        assert_eq!(graph.get(2).unwrap().content, "remote");
        assert!(!graph.contains(9));
    }

    #[test]
    fn test_merge_identical_reports_no_change() {
        let mut graph = branched();
        let incoming = graph.messages().clone();
        assert!(!graph.merge(&incoming, true, |_| false));
    }
}
