// ── Pilot Engine: Reference Resolver ───────────────────────────────────────
//
// Turns symbolic intent params into concrete platform identifiers.
//
//   username = "last_conversation" → newest activity author that is not the
//                                    operator's own account
//   target   = "current_channel"   → last channel with observed send
//                                    permission, else newest sendable guild
//                                    activity channel, else first accessible
//   target   = "#name"             → case-insensitive match on accessible channels
//   target   = "last_message"      → newest observed message
//   username = "<handle>"          → gateway lookup, then activity authors
//
// Resolved values are written as structured params (`channel`, `user`,
// `message_ref`) and the symbolic keys are dropped, so a ResolvedAction never
// carries a placeholder. Any failure aborts the whole batch before dispatch.

use crate::atoms::constants::{REF_CURRENT_CHANNEL, REF_LAST_CONVERSATION, REF_LAST_MESSAGE};
use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::traits::MessagingGateway;
use crate::atoms::types::{
    bare_handle, ActionType, ActivityRecord, ChannelRef, Intent, MessageRef, ResolvedAction,
    UserRef,
};
use crate::engine::activity::RecentActivityBuffer;
use log::{debug, info};
use serde_json::{Map, Value};

/// How many alternatives a resolution diagnostic lists.
const MAX_ALTERNATIVES: usize = 3;
const MAX_CHANNEL_ALTERNATIVES: usize = 10;

pub struct ReferenceResolver<'a> {
    gateway: &'a dyn MessagingGateway,
    activity: &'a RecentActivityBuffer,
}

impl<'a> ReferenceResolver<'a> {
    pub fn new(gateway: &'a dyn MessagingGateway, activity: &'a RecentActivityBuffer) -> Self {
        Self { gateway, activity }
    }

    /// Resolve a whole batch, failing fast on the first unresolvable reference.
    pub async fn resolve_all(&self, intents: &[Intent]) -> EngineResult<Vec<ResolvedAction>> {
        let mut resolved = Vec::with_capacity(intents.len());
        for (position, intent) in intents.iter().enumerate() {
            resolved.push(self.resolve(intent, position).await?);
        }
        Ok(resolved)
    }

    pub async fn resolve(&self, intent: &Intent, position: usize) -> EngineResult<ResolvedAction> {
        let mut params = intent.params.clone();

        match intent.action {
            ActionType::SendMessage | ActionType::SetTyping => {
                let target = take_str(&mut params, "target");
                let channel = self.resolve_channel(target.as_deref().unwrap_or(REF_CURRENT_CHANNEL)).await?;
                put(&mut params, "channel", &channel)?;
            }
            ActionType::GetMessages => {
                if let Some(target) = take_str(&mut params, "target") {
                    let channel = self.resolve_channel(&target).await?;
                    put(&mut params, "channel", &channel)?;
                }
            }
            ActionType::SendDm => {
                let username = take_str(&mut params, "username")
                    .or_else(|| take_str(&mut params, "user"))
                    .or_else(|| take_str(&mut params, "target"))
                    .ok_or_else(|| EngineError::resolution("username", "no recipient given", vec![]))?;
                let user = self.resolve_user(&username).await?;
                put(&mut params, "user", &user)?;
            }
            ActionType::React => {
                let target = params.remove("target").unwrap_or(Value::String(REF_LAST_MESSAGE.into()));
                let message = self.resolve_message(&target)?;
                put(&mut params, "message_ref", &message)?;
            }
            _ => {}
        }

        debug!("[resolver] {} #{} resolved", intent.action, position);
        Ok(ResolvedAction {
            action: intent.action.clone(),
            params,
            order: intent.order,
            position,
        })
    }

    // ── Channels ───────────────────────────────────────────────────────────

    pub async fn resolve_channel(&self, reference: &str) -> EngineResult<ChannelRef> {
        let reference = reference.trim();
        if reference.is_empty() || reference.eq_ignore_ascii_case(REF_CURRENT_CHANNEL) {
            return self.current_channel().await;
        }

        let channels = self.gateway.list_accessible_channels().await?;

        // Raw snowflake ids pass through (replayed verbatim from cache too).
        if reference.chars().all(|c| c.is_ascii_digit()) {
            return Ok(channels
                .iter()
                .find(|c| c.id == reference)
                .cloned()
                .unwrap_or_else(|| ChannelRef {
                    id: reference.to_string(),
                    name: reference.to_string(),
                    guild_id: None,
                    guild_name: None,
                }));
        }

        let needle = reference.trim_start_matches('#').to_lowercase();
        let exact = channels.iter().find(|c| c.name.to_lowercase() == needle);
        let found = exact.or_else(|| channels.iter().find(|c| c.name.to_lowercase().contains(&needle)));
        match found {
            Some(channel) => Ok(channel.clone()),
            None => {
                let alternatives = channels
                    .iter()
                    .take(MAX_CHANNEL_ALTERNATIVES)
                    .map(ChannelRef::display)
                    .collect();
                info!("[resolver] No channel matches '{}'", reference);
                Err(EngineError::resolution(
                    reference,
                    format!("no accessible channel matches '#{needle}'"),
                    alternatives,
                ))
            }
        }
    }

    /// Three tiers: last channel with send permission, newest activity in a
    /// guild channel we can post in, first accessible channel.
    async fn current_channel(&self) -> EngineResult<ChannelRef> {
        if let Some(channel) = self.activity.last_used_channel() {
            debug!("[resolver] current_channel → last used {}", channel.display());
            return Ok(channel);
        }
        let channels = self.gateway.list_accessible_channels().await?;
        let newest_sendable = self.activity.find_latest(|r| {
            r.guild_id.is_some() && channels.iter().any(|c| c.id == r.channel_id)
        });
        if let Some(record) = newest_sendable {
            debug!("[resolver] current_channel → newest activity in {}", record.channel_id);
            return Ok(record.channel_ref());
        }
        match channels.into_iter().next() {
            Some(channel) => {
                debug!("[resolver] current_channel → first accessible {}", channel.display());
                Ok(channel)
            }
            None => Err(EngineError::resolution(
                REF_CURRENT_CHANNEL,
                "no channel has been used yet and none is accessible",
                vec![],
            )),
        }
    }

    pub async fn resolve_user(&self, reference: &str) -> EngineResult<UserRef> {
        let reference = reference.trim();
        if reference.eq_ignore_ascii_case(REF_LAST_CONVERSATION) {
            return self.last_conversation_partner();
        }

        let handle = bare_handle(reference);
        if let Some(user) = self.gateway.find_user_by_handle(&handle).await? {
            return Ok(user);
        }

        let lowered = handle.to_lowercase();
        if let Some(record) = self
            .activity
            .find_latest(|r| r.bare_handle().to_lowercase() == lowered)
        {
            return Ok(author_of(&record));
        }

        info!("[resolver] User '{}' not found", handle);
        Err(EngineError::resolution(
            reference,
            format!("user '{handle}' not found"),
            self.other_authors(),
        ))
    }

    fn last_conversation_partner(&self) -> EngineResult<UserRef> {
        let me = self.gateway.current_user();
        let is_me = |r: &ActivityRecord| match &me {
            Some(me) => {
                r.author_id == me.id || r.bare_handle().eq_ignore_ascii_case(&bare_handle(&me.handle))
            }
            None => false,
        };

        match self.activity.find_latest(|r| !is_me(r)) {
            Some(record) => {
                debug!("[resolver] last_conversation → {}", record.bare_handle());
                Ok(author_of(&record))
            }
            None => Err(EngineError::resolution(
                REF_LAST_CONVERSATION,
                "nobody has written to you recently",
                self.other_authors(),
            )),
        }
    }

    fn other_authors(&self) -> Vec<String> {
        let me = self.gateway.current_user().map(|u| bare_handle(&u.handle));
        self.activity
            .recent_authors(MAX_ALTERNATIVES + 1)
            .into_iter()
            .filter(|h| me.as_deref() != Some(h.as_str()))
            .take(MAX_ALTERNATIVES)
            .collect()
    }

    // ── Messages ───────────────────────────────────────────────────────────

    pub fn resolve_message(&self, reference: &Value) -> EngineResult<MessageRef> {
        match reference {
            Value::String(s) if s.eq_ignore_ascii_case(REF_LAST_MESSAGE) || s.is_empty() => self
                .activity
                .latest()
                .map(|r| r.message_ref())
                .ok_or_else(|| {
                    EngineError::resolution(REF_LAST_MESSAGE, "no message observed yet", vec![])
                }),
            Value::Object(_) => serde_json::from_value(reference.clone()).map_err(|_| {
                EngineError::resolution("message", "expected channel_id and message_id", vec![])
            }),
            other => Err(EngineError::resolution(
                other.to_string(),
                "only the last observed message can be targeted",
                vec![REF_LAST_MESSAGE.to_string()],
            )),
        }
    }
}

fn author_of(record: &ActivityRecord) -> UserRef {
    UserRef {
        id: record.author_id.clone(),
        handle: record.bare_handle(),
        display_name: None,
    }
}

fn take_str(params: &mut Map<String, Value>, key: &str) -> Option<String> {
    match params.remove(key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::String(_) | Value::Null => None,
        other => Some(other.to_string()),
    }
}

fn put<T: serde::Serialize>(params: &mut Map<String, Value>, key: &str, value: &T) -> EngineResult<()> {
    params.insert(key.to_string(), serde_json::to_value(value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::{channel, record, user, FakeGateway};

    fn send_to(target: &str) -> Intent {
        Intent::new(ActionType::SendMessage).with("target", target).with("message", "yo")
    }

    #[tokio::test]
    async fn test_last_conversation_skips_operator() {
        let gw = FakeGateway::new();
        let buf = RecentActivityBuffer::new(10);
        let general = channel("c1", "general");
        buf.push(record("m1", &user("1", "alice#0420"), &general, "salut"));
        buf.push(record("m2", &gw.me.clone(), &general, "yo"));
        let r = ReferenceResolver::new(&gw, &buf);
        let dm = Intent::new(ActionType::SendDm)
            .with("username", REF_LAST_CONVERSATION)
            .with("message", "merci");
        let action = r.resolve(&dm, 0).await.unwrap();
        let target: UserRef = action.object_param("user").unwrap();
        assert_eq!(target.handle, "alice");
        assert!(action.params.get("username").is_none());
    }

    #[tokio::test]
    async fn test_last_conversation_never_picks_operator() {
        let gw = FakeGateway::new();
        let buf = RecentActivityBuffer::new(10);
        buf.push(record("m1", &gw.me.clone(), &channel("c1", "general"), "only me"));
        let r = ReferenceResolver::new(&gw, &buf);
        let err = r.resolve_user(REF_LAST_CONVERSATION).await.unwrap_err();
        assert!(err.is_resolution());
        assert!(err.to_string().ends_with("Available: none"));
    }

    #[tokio::test]
    async fn test_current_channel_tiers() {
        let gw = FakeGateway::new();
        let buf = RecentActivityBuffer::new(10);
        let r = ReferenceResolver::new(&gw, &buf);

        // Tier 3: first accessible.
        assert_eq!(r.resolve_channel(REF_CURRENT_CHANNEL).await.unwrap().id, "c1");

        // Tier 2: newest activity beats first accessible.
        buf.push(record("m1", &user("1", "alice"), &channel("c3", "gaming-talk"), "hey"));
        assert_eq!(r.resolve_channel(REF_CURRENT_CHANNEL).await.unwrap().id, "c3");

        // Activity in a DM or a channel we cannot post in is skipped.
        let mut dm = record("m2", &user("2", "bob"), &channel("dm7", "DM"), "psst");
        dm.guild_id = None;
        buf.push(dm);
        buf.push(record("m3", &user("1", "alice"), &channel("c9", "read-only"), "news"));
        assert_eq!(r.resolve_channel(REF_CURRENT_CHANNEL).await.unwrap().id, "c3");

        // Tier 1: last used beats activity.
        buf.note_sendable_channel(channel("c2", "random"));
        assert_eq!(r.resolve_channel(REF_CURRENT_CHANNEL).await.unwrap().id, "c2");
    }

    #[tokio::test]
    async fn test_channel_name_substring_match() {
        let gw = FakeGateway::new();
        let buf = RecentActivityBuffer::new(10);
        let r = ReferenceResolver::new(&gw, &buf);
        assert_eq!(r.resolve_channel("#GAMING").await.unwrap().id, "c3");
        assert_eq!(r.resolve_channel("#general").await.unwrap().id, "c1");
        assert_eq!(r.resolve_channel("123456").await.unwrap().id, "123456");
    }

    #[tokio::test]
    async fn test_unknown_channel_lists_alternatives() {
        let gw = FakeGateway::new();
        let buf = RecentActivityBuffer::new(10);
        let r = ReferenceResolver::new(&gw, &buf);
        let err = r.resolve(&send_to("#memes"), 0).await.unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("#general"));
        assert!(msg.contains("#gaming-talk"));
    }

    #[tokio::test]
    async fn test_literal_handle_falls_back_to_activity() {
        let gw = FakeGateway::new();
        let buf = RecentActivityBuffer::new(10);
        buf.push(record("m1", &user("77", "zoe#1111"), &channel("c1", "general"), "hi"));
        let r = ReferenceResolver::new(&gw, &buf);
        assert_eq!(r.resolve_user("@bob").await.unwrap().id, "2");
        assert_eq!(r.resolve_user("Zoe").await.unwrap().id, "77");
        let err = r.resolve_user("nobody").await.unwrap_err();
        assert!(err.to_string().contains("zoe"));
    }

    #[tokio::test]
    async fn test_last_message_reference() {
        let gw = FakeGateway::new();
        let buf = RecentActivityBuffer::new(10);
        let r = ReferenceResolver::new(&gw, &buf);
        assert!(r.resolve_message(&Value::String(REF_LAST_MESSAGE.into())).is_err());
        buf.push(record("m5", &user("1", "alice"), &channel("c1", "general"), "gg"));
        let react = Intent::new(ActionType::React).with("emoji", "👍").with("target", REF_LAST_MESSAGE);
        let action = r.resolve(&react, 0).await.unwrap();
        let msg: MessageRef = action.object_param("message_ref").unwrap();
        assert_eq!(msg.message_id, "m5");
        assert_eq!(msg.channel_id, "c1");
    }

    #[tokio::test]
    async fn test_batch_fails_fast() {
        let gw = FakeGateway::new();
        let buf = RecentActivityBuffer::new(10);
        let r = ReferenceResolver::new(&gw, &buf);
        let intents = vec![send_to("#general"), send_to("#nope"), send_to("#random")];
        assert!(r.resolve_all(&intents).await.is_err());
        let ok = r.resolve_all(&[send_to("#general"), send_to("#random")]).await.unwrap();
        assert_eq!(ok[1].position, 1);
        assert!(ok.iter().all(|a| a.str_param("target").is_none()));
    }
}
