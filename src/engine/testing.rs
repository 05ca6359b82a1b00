// In-memory gateway used by the engine's unit tests.

use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::traits::MessagingGateway;
use crate::atoms::types::{
    ActivityRecord, ChannelRef, MessageRef, PresenceStatus, ServerInfo, UserRef,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

pub struct FakeGateway {
    pub me: UserRef,
    pub users: Vec<UserRef>,
    pub channels: Vec<ChannelRef>,
    pub connected: AtomicBool,
    /// Every platform call, in order.
    pub calls: Mutex<Vec<String>>,
    /// Sends whose content contains this string fail.
    pub fail_on: Mutex<Option<String>>,
    next_id: AtomicUsize,
}

pub fn channel(id: &str, name: &str) -> ChannelRef {
    ChannelRef { id: id.into(), name: name.into(), guild_id: Some("g1".into()), guild_name: None }
}

pub fn user(id: &str, handle: &str) -> UserRef {
    UserRef { id: id.into(), handle: handle.into(), display_name: None }
}

pub fn record(id: &str, author: &UserRef, channel: &ChannelRef, content: &str) -> ActivityRecord {
    ActivityRecord {
        message_id: id.into(),
        author_id: author.id.clone(),
        author_handle: author.handle.clone(),
        channel_id: channel.id.clone(),
        channel_name: Some(channel.name.clone()),
        guild_id: channel.guild_id.clone(),
        content: content.into(),
        timestamp_ms: 0,
    }
}

impl FakeGateway {
    pub fn new() -> Self {
        Self {
            me: user("0", "operator"),
            users: vec![user("1", "alice"), user("2", "bob")],
            channels: vec![channel("c1", "general"), channel("c2", "random"), channel("c3", "gaming-talk")],
            connected: AtomicBool::new(true),
            calls: Mutex::new(Vec::new()),
            fail_on: Mutex::new(None),
            next_id: AtomicUsize::new(100),
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    fn record_call(&self, call: String) {
        self.calls.lock().push(call);
    }

    fn message_ref(&self, channel_id: &str) -> MessageRef {
        MessageRef {
            channel_id: channel_id.into(),
            message_id: self.next_id.fetch_add(1, Ordering::SeqCst).to_string(),
        }
    }

    fn check_fail(&self, content: &str) -> EngineResult<()> {
        match self.fail_on.lock().as_deref() {
            Some(needle) if content.contains(needle) => {
                Err(EngineError::gateway("fake", "Missing Permissions"))
            }
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl MessagingGateway for FakeGateway {
    fn name(&self) -> &str {
        "fake"
    }

    fn connection_state(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn current_user(&self) -> Option<UserRef> {
        Some(self.me.clone())
    }

    async fn send_message(&self, channel: &ChannelRef, content: &str) -> EngineResult<MessageRef> {
        self.record_call(format!("send:{}:{}", channel.id, content));
        self.check_fail(content)?;
        Ok(self.message_ref(&channel.id))
    }

    async fn send_direct_message(&self, user: &UserRef, content: &str) -> EngineResult<MessageRef> {
        self.record_call(format!("dm:{}:{}", user.handle, content));
        self.check_fail(content)?;
        Ok(self.message_ref(&format!("dm-{}", user.id)))
    }

    async fn direct_channel(&self, user: &UserRef) -> EngineResult<ChannelRef> {
        Ok(ChannelRef {
            id: format!("dm-{}", user.id),
            name: user.handle.clone(),
            guild_id: None,
            guild_name: None,
        })
    }

    async fn react_to_message(&self, message: &MessageRef, emoji: &str) -> EngineResult<()> {
        self.record_call(format!("react:{}:{}", message.message_id, emoji));
        Ok(())
    }

    async fn set_typing_indicator(&self, channel: &ChannelRef, on: bool) -> EngineResult<()> {
        self.record_call(format!("typing:{}:{}", channel.id, on));
        Ok(())
    }

    async fn find_user_by_handle(&self, handle: &str) -> EngineResult<Option<UserRef>> {
        let needle = handle.to_lowercase();
        Ok(self.users.iter().find(|u| u.handle.to_lowercase() == needle).cloned())
    }

    async fn list_recent_messages(&self, _limit: usize) -> EngineResult<Vec<ActivityRecord>> {
        Ok(Vec::new())
    }

    async fn list_accessible_channels(&self) -> EngineResult<Vec<ChannelRef>> {
        Ok(self.channels.clone())
    }

    async fn set_presence(&self, status: PresenceStatus, activity: Option<&str>) -> EngineResult<()> {
        self.record_call(format!("presence:{}:{}", status.as_str(), activity.unwrap_or("")));
        Ok(())
    }

    async fn list_servers(&self) -> EngineResult<Vec<ServerInfo>> {
        Ok(vec![ServerInfo {
            id: "g1".into(),
            name: "Pawz HQ".into(),
            member_count: Some(42),
            channels: self.channels.clone(),
        }])
    }

    async fn fetch_channel_messages(
        &self,
        channel: &ChannelRef,
        limit: usize,
    ) -> EngineResult<Vec<ActivityRecord>> {
        self.record_call(format!("fetch:{}:{}", channel.id, limit));
        Ok(Vec::new())
    }
}
