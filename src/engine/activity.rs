// ── Pilot Engine: Recent Activity Buffer ───────────────────────────────────
//
// Bounded, process-wide ring buffer of recently observed platform messages.
// Used to resolve "the last person who spoke", "the last message" and
// "the current channel".
//
// Key properties:
//   - Single writer (the gateway event feed), many readers (the resolver)
//   - O(1) push with index-based eviction of the oldest record
//   - Records are never edited in place
//   - Also tracks the last channel the account observed send permission in

use crate::atoms::types::{ActivityRecord, ChannelRef};
use parking_lot::RwLock;
use std::collections::VecDeque;

pub struct RecentActivityBuffer {
    records: RwLock<VecDeque<ActivityRecord>>,
    capacity: usize,
    last_used_channel: RwLock<Option<ChannelRef>>,
}

impl RecentActivityBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            records: RwLock::new(VecDeque::with_capacity(capacity)),
            capacity,
            last_used_channel: RwLock::new(None),
        }
    }

    /// Append a record, evicting the oldest when full.
    pub fn push(&self, record: ActivityRecord) {
        let mut records = self.records.write();
        if records.len() >= self.capacity {
            records.pop_front();
        }
        records.push_back(record);
    }

    /// Most recent first.
    pub fn recent(&self, limit: usize) -> Vec<ActivityRecord> {
        self.records.read().iter().rev().take(limit).cloned().collect()
    }

    pub fn latest(&self) -> Option<ActivityRecord> {
        self.records.read().back().cloned()
    }

    /// Scan most-recent-first for the first record matching `pred`.
    pub fn find_latest(&self, pred: impl Fn(&ActivityRecord) -> bool) -> Option<ActivityRecord> {
        self.records.read().iter().rev().find(|r| pred(r)).cloned()
    }

    /// Distinct author handles, most recent first.
    pub fn recent_authors(&self, limit: usize) -> Vec<String> {
        let mut seen: Vec<String> = Vec::new();
        for record in self.records.read().iter().rev() {
            let handle = record.bare_handle();
            if !seen.contains(&handle) {
                seen.push(handle);
                if seen.len() >= limit {
                    break;
                }
            }
        }
        seen
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Remember a channel the account can post in (tier 1 of "current channel").
    pub fn note_sendable_channel(&self, channel: ChannelRef) {
        *self.last_used_channel.write() = Some(channel);
    }

    pub fn last_used_channel(&self) -> Option<ChannelRef> {
        self.last_used_channel.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, author: &str, channel: &str) -> ActivityRecord {
        ActivityRecord {
            message_id: id.into(),
            author_id: format!("{author}-id"),
            author_handle: format!("{author}#0001"),
            channel_id: channel.into(),
            channel_name: Some(format!("chan-{channel}")),
            guild_id: Some("g1".into()),
            content: format!("hello from {author}"),
            timestamp_ms: 0,
        }
    }

    #[test]
    fn eviction_on_overflow() {
        let buf = RecentActivityBuffer::new(2);
        buf.push(record("1", "a", "c"));
        buf.push(record("2", "b", "c"));
        buf.push(record("3", "c", "c"));
        assert_eq!(buf.len(), 2);
        let recent = buf.recent(10);
        assert_eq!(recent[0].message_id, "3");
        assert_eq!(recent[1].message_id, "2");
    }

    #[test]
    fn find_latest_scans_newest_first() {
        let buf = RecentActivityBuffer::new(10);
        buf.push(record("1", "alice", "c"));
        buf.push(record("2", "me", "c"));
        let hit = buf.find_latest(|r| r.bare_handle() != "me").unwrap();
        assert_eq!(hit.message_id, "1");
    }

    #[test]
    fn recent_authors_are_distinct() {
        let buf = RecentActivityBuffer::new(10);
        buf.push(record("1", "alice", "c"));
        buf.push(record("2", "bob", "c"));
        buf.push(record("3", "alice", "c"));
        assert_eq!(buf.recent_authors(5), vec!["alice".to_string(), "bob".to_string()]);
    }

    #[test]
    fn last_used_channel_roundtrip() {
        let buf = RecentActivityBuffer::new(10);
        assert!(buf.last_used_channel().is_none());
        buf.note_sendable_channel(record("1", "a", "c9").channel_ref());
        assert_eq!(buf.last_used_channel().unwrap().id, "c9");
    }
}
