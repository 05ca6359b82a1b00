// ── Pilot Engine: Conversation History ─────────────────────────────────────
//
// Bounded per-conversation log of prior turns. Feeds the language model's
// context window and nothing else.
//
// Key properties:
//   - Pure in-memory: lost on restart
//   - Append-only with FIFO eviction once a conversation exceeds its cap
//   - Per-conversation isolation: each conversation id gets its own deque

use crate::atoms::types::ConversationTurn;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};

pub struct ConversationHistory {
    conversations: Mutex<HashMap<String, VecDeque<ConversationTurn>>>,
    max_turns: usize,
}

impl ConversationHistory {
    pub fn new(max_turns: usize) -> Self {
        Self {
            conversations: Mutex::new(HashMap::new()),
            max_turns: max_turns.max(1),
        }
    }

    /// Append turns to a conversation, trimming the oldest beyond the cap.
    pub fn append(&self, conversation_id: &str, turns: impl IntoIterator<Item = ConversationTurn>) {
        let mut map = self.conversations.lock();
        let log = map.entry(conversation_id.to_string()).or_default();
        for turn in turns {
            log.push_back(turn);
        }
        while log.len() > self.max_turns {
            log.pop_front();
        }
    }

    /// The most recent `n` turns, oldest first.
    pub fn recent(&self, conversation_id: &str, n: usize) -> Vec<ConversationTurn> {
        let map = self.conversations.lock();
        match map.get(conversation_id) {
            Some(log) => {
                let skip = log.len().saturating_sub(n);
                log.iter().skip(skip).cloned().collect()
            }
            None => Vec::new(),
        }
    }

    pub fn len(&self, conversation_id: &str) -> usize {
        self.conversations.lock().get(conversation_id).map_or(0, VecDeque::len)
    }

    pub fn clear(&self, conversation_id: &str) {
        self.conversations.lock().remove(conversation_id);
    }

    /// Number of conversations with at least one turn.
    pub fn conversation_count(&self) -> usize {
        self.conversations.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_and_recent() {
        let h = ConversationHistory::new(20);
        h.append("c1", [ConversationTurn::user("hi"), ConversationTurn::assistant("{}")]);
        h.append("c1", [ConversationTurn::user("again")]);
        let recent = h.recent("c1", 2);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].content, "{}");
        assert_eq!(recent[1].content, "again");
    }

    #[test]
    fn oldest_trimmed_past_cap() {
        let h = ConversationHistory::new(3);
        for i in 0..5 {
            h.append("c1", [ConversationTurn::user(format!("m{i}"))]);
        }
        assert_eq!(h.len("c1"), 3);
        let all = h.recent("c1", 10);
        assert_eq!(all[0].content, "m2");
        assert_eq!(all[2].content, "m4");
    }

    #[test]
    fn conversations_are_isolated_and_clearable() {
        let h = ConversationHistory::new(20);
        h.append("a", [ConversationTurn::user("x")]);
        h.append("b", [ConversationTurn::user("y")]);
        assert_eq!(h.conversation_count(), 2);
        h.clear("a");
        assert!(h.recent("a", 5).is_empty());
        assert_eq!(h.recent("b", 5).len(), 1);
        assert_eq!(h.conversation_count(), 1);
    }
}
