// ── Pilot Engine: Discord REST Gateway ─────────────────────────────────────
//
// `MessagingGateway` over the Discord REST API v10. Reads (accessible
// channels, servers, recent activity) are answered from the session and the
// activity buffer the feed maintains; writes go over HTTP.
//
// Typing: Discord only exposes "start typing" (it lapses after ~10s or on the
// next message), so "off" just forgets the channel locally.

use super::export::MessagePager;
use super::{DiscordSession, WireUser, DISCORD_API};
use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::traits::MessagingGateway;
use crate::atoms::types::{
    bare_handle, ActivityRecord, ChannelRef, MessageRef, PresenceStatus, ServerInfo, UserRef,
};
use crate::engine::activity::RecentActivityBuffer;
use crate::engine::http::build_client;
use crate::engine::text::truncate_str;
use async_trait::async_trait;
use log::{info, warn};
use reqwest::{Client, Method};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

pub struct DiscordGateway {
    client: Client,
    auth: String,
    session: Arc<DiscordSession>,
    activity: Arc<RecentActivityBuffer>,
}

impl DiscordGateway {
    pub fn new(
        token: &str,
        session: Arc<DiscordSession>,
        activity: Arc<RecentActivityBuffer>,
    ) -> EngineResult<Self> {
        if token.trim().is_empty() {
            return Err(EngineError::Config("Discord token is empty".into()));
        }
        Ok(Self {
            client: build_client(Duration::from_secs(30))?,
            auth: format!("Bot {}", token.trim()),
            session,
            activity,
        })
    }

    pub fn session(&self) -> &Arc<DiscordSession> {
        &self.session
    }

    async fn request(&self, method: Method, path: &str, body: Option<&Value>) -> EngineResult<Value> {
        discord_request(&self.client, method, &format!("{}{}", DISCORD_API, path), &self.auth, body).await
    }

    async fn search_guild_members(&self, guild_id: &str, handle: &str) -> EngineResult<Option<UserRef>> {
        let path = format!(
            "/guilds/{}/members/search?query={}&limit=5",
            guild_id,
            urlencoding::encode(handle)
        );
        let members: Vec<Value> = match self.request(Method::GET, &path, None).await? {
            Value::Array(items) => items,
            _ => return Ok(None),
        };
        let users: Vec<UserRef> = members
            .iter()
            .filter_map(|m| serde_json::from_value::<WireUser>(m["user"].clone()).ok())
            .map(|u| u.to_user_ref())
            .collect();
        for u in &users {
            self.session.remember_user(u.clone());
        }
        let exact = users.iter().find(|u| u.handle.eq_ignore_ascii_case(handle)).cloned();
        Ok(exact.or_else(|| users.into_iter().next()))
    }
}

#[async_trait]
impl MessagingGateway for DiscordGateway {
    fn name(&self) -> &str {
        "discord"
    }

    fn connection_state(&self) -> bool {
        self.session.is_connected()
    }

    fn current_user(&self) -> Option<UserRef> {
        self.session.me()
    }

    async fn send_message(&self, channel: &ChannelRef, content: &str) -> EngineResult<MessageRef> {
        let path = format!("/channels/{}/messages", channel.id);
        let sent = self.request(Method::POST, &path, Some(&json!({ "content": content }))).await?;
        self.session.mark_typing(&channel.id, false);
        info!("[discord] Sent {} chars to {}", content.chars().count(), channel.display());
        Ok(MessageRef {
            channel_id: channel.id.clone(),
            message_id: sent["id"].as_str().unwrap_or_default().to_string(),
        })
    }

    async fn send_direct_message(&self, user: &UserRef, content: &str) -> EngineResult<MessageRef> {
        let channel = self.direct_channel(user).await?;
        self.send_message(&channel, content).await
    }

    async fn direct_channel(&self, user: &UserRef) -> EngineResult<ChannelRef> {
        if let Some(channel) = self.session.dm_channel(&user.id) {
            return Ok(channel);
        }
        let opened = self
            .request(Method::POST, "/users/@me/channels", Some(&json!({ "recipient_id": user.id })))
            .await?;
        let id = opened["id"]
            .as_str()
            .ok_or_else(|| EngineError::gateway("discord", "DM channel response had no id"))?;
        let channel = ChannelRef {
            id: id.to_string(),
            name: format!("@{}", user.handle),
            guild_id: None,
            guild_name: None,
        };
        self.session.remember_dm_channel(&user.id, channel.clone());
        Ok(channel)
    }

    async fn react_to_message(&self, message: &MessageRef, emoji: &str) -> EngineResult<()> {
        let path = format!(
            "/channels/{}/messages/{}/reactions/{}/@me",
            message.channel_id,
            message.message_id,
            urlencoding::encode(emoji.trim())
        );
        self.request(Method::PUT, &path, None).await?;
        Ok(())
    }

    async fn set_typing_indicator(&self, channel: &ChannelRef, on: bool) -> EngineResult<()> {
        if on {
            self.request(Method::POST, &format!("/channels/{}/typing", channel.id), None)
                .await?;
        }
        self.session.mark_typing(&channel.id, on);
        Ok(())
    }

    async fn find_user_by_handle(&self, handle: &str) -> EngineResult<Option<UserRef>> {
        let handle = bare_handle(handle);
        if handle.is_empty() {
            return Ok(None);
        }
        if let Some(user) = self.session.user_by_handle(&handle) {
            return Ok(Some(user));
        }
        for guild_id in self.session.guild_ids() {
            match self.search_guild_members(&guild_id, &handle).await {
                Ok(Some(user)) => return Ok(Some(user)),
                Ok(None) => {}
                Err(e) => warn!("[discord] Member search in {} failed: {}", guild_id, e),
            }
        }
        Ok(None)
    }

    async fn list_recent_messages(&self, limit: usize) -> EngineResult<Vec<ActivityRecord>> {
        Ok(self.activity.recent(limit))
    }

    async fn list_accessible_channels(&self) -> EngineResult<Vec<ChannelRef>> {
        Ok(self.session.accessible_channels())
    }

    async fn set_presence(&self, status: PresenceStatus, activity: Option<&str>) -> EngineResult<()> {
        self.session.send_op(presence_payload(status, activity))
    }

    async fn list_servers(&self) -> EngineResult<Vec<ServerInfo>> {
        Ok(self.session.servers())
    }

    async fn fetch_channel_messages(
        &self,
        channel: &ChannelRef,
        limit: usize,
    ) -> EngineResult<Vec<ActivityRecord>> {
        self.fetch_page(channel, limit, None).await
    }
}

#[async_trait]
impl MessagePager for DiscordGateway {
    /// Newest first; `before` pages backwards from a message id.
    async fn fetch_page(
        &self,
        channel: &ChannelRef,
        limit: usize,
        before: Option<&str>,
    ) -> EngineResult<Vec<ActivityRecord>> {
        let mut path = format!("/channels/{}/messages?limit={}", channel.id, limit.clamp(1, 100));
        if let Some(before) = before {
            path.push_str(&format!("&before={}", before));
        }
        let raw = self.request(Method::GET, &path, None).await?;
        let items = match raw {
            Value::Array(items) => items,
            other => {
                return Err(EngineError::gateway(
                    "discord",
                    format!("unexpected message list: {}", truncate_str(&other.to_string(), 120)),
                ))
            }
        };
        Ok(items
            .into_iter()
            .filter_map(|v| serde_json::from_value::<WireMessage>(v).ok())
            .map(|m| m.into_record_in(channel))
            .collect())
    }
}

// ── Wire message ───────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub(crate) struct WireMessage {
    pub id: String,
    pub channel_id: String,
    pub author: WireUser,
    #[serde(default)]
    pub content: String,
    pub guild_id: Option<String>,
    pub timestamp: Option<String>,
}

impl WireMessage {
    /// REST message objects omit `guild_id`; take it from the channel they were read from.
    pub fn into_record_in(self, channel: &ChannelRef) -> ActivityRecord {
        let mut record = self.into_record(channel.name.clone());
        if record.guild_id.is_none() {
            record.guild_id = channel.guild_id.clone();
        }
        record
    }

    pub fn into_record(self, channel_name: impl Into<Option<String>>) -> ActivityRecord {
        ActivityRecord {
            timestamp_ms: self
                .timestamp
                .as_deref()
                .and_then(|t| chrono::DateTime::parse_from_rfc3339(t).ok())
                .map(|t| t.timestamp_millis())
                .unwrap_or_else(|| chrono::Utc::now().timestamp_millis()),
            message_id: self.id,
            author_id: self.author.id.clone(),
            author_handle: self.author.tag(),
            channel_id: self.channel_id,
            channel_name: channel_name.into(),
            guild_id: self.guild_id,
            content: self.content,
        }
    }
}

/// Gateway op 3 (Presence Update).
pub(crate) fn presence_payload(status: PresenceStatus, activity: Option<&str>) -> Value {
    let activities: Vec<Value> = activity
        .map(str::trim)
        .filter(|a| !a.is_empty())
        .map(|name| json!({ "name": name, "type": 0 }))
        .into_iter()
        .collect();
    json!({
        "op": 3,
        "d": {
            "since": null,
            "activities": activities,
            "status": status.as_str(),
            "afk": false,
        }
    })
}

// ── HTTP helper ────────────────────────────────────────────────────────────

/// Make a Discord API request with automatic rate-limit retry (once).
pub(crate) async fn discord_request(
    client: &Client,
    method: Method,
    url: &str,
    auth: &str,
    body: Option<&Value>,
) -> EngineResult<Value> {
    let (status, text) = send_once(client, method.clone(), url, auth, body).await?;

    if status == 429 {
        let retry_after = serde_json::from_str::<Value>(&text)
            .ok()
            .and_then(|v| v["retry_after"].as_f64())
            .unwrap_or(1.0);
        warn!("[discord] Rate limited, waiting {:.1}s", retry_after);
        tokio::time::sleep(Duration::from_secs_f64(retry_after.clamp(0.0, 60.0) + 0.1)).await;

        let (status2, text2) = send_once(client, method, url, auth, body).await?;
        return interpret(status2, text2, " (after retry)");
    }

    interpret(status, text, "")
}

async fn send_once(
    client: &Client,
    method: Method,
    url: &str,
    auth: &str,
    body: Option<&Value>,
) -> EngineResult<(u16, String)> {
    let mut req = client
        .request(method, url)
        .header("Authorization", auth)
        .header("Content-Type", "application/json");
    if let Some(b) = body {
        req = req.json(b);
    }
    let resp = req
        .send()
        .await
        .map_err(|e| EngineError::gateway("discord", format!("HTTP error: {}", e)))?;
    let status = resp.status().as_u16();
    let text = resp.text().await.unwrap_or_default();
    Ok((status, text))
}

fn interpret(status: u16, text: String, suffix: &str) -> EngineResult<Value> {
    if status == 204 {
        return Ok(json!({ "ok": true }));
    }
    if !(200..300).contains(&status) {
        let detail = serde_json::from_str::<Value>(&text)
            .ok()
            .and_then(|v| v["message"].as_str().map(str::to_string))
            .unwrap_or_else(|| truncate_str(&text, 300).to_string());
        return Err(EngineError::gateway(
            "discord",
            format!("API {}{}: {}", status, suffix, detail),
        ));
    }
    Ok(serde_json::from_str(&text).unwrap_or(Value::String(text)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presence_with_and_without_activity() {
        let p = presence_payload(PresenceStatus::Dnd, Some("  chess "));
        assert_eq!(p["op"], 3);
        assert_eq!(p["d"]["status"], "dnd");
        assert_eq!(p["d"]["activities"][0]["name"], "chess");
        let bare = presence_payload(PresenceStatus::Online, Some(""));
        assert_eq!(bare["d"]["activities"], json!([]));
    }

    #[test]
    fn interpret_statuses() {
        assert_eq!(interpret(204, String::new(), "").unwrap(), json!({"ok": true}));
        assert_eq!(interpret(200, "{\"id\":\"5\"}".into(), "").unwrap()["id"], "5");
        let err = interpret(403, "{\"message\":\"Missing Permissions\",\"code\":50013}".into(), "")
            .unwrap_err()
            .to_string();
        assert!(err.contains("403"));
        assert!(err.contains("Missing Permissions"));
    }

    #[test]
    fn wire_message_to_record() {
        let m: WireMessage = serde_json::from_value(json!({
            "id": "m1",
            "channel_id": "c1",
            "guild_id": "g1",
            "content": "salut",
            "timestamp": "2024-05-01T12:00:00.000000+00:00",
            "author": {"id": "11", "username": "alice", "discriminator": "0"}
        }))
        .unwrap();
        let r = m.into_record(Some("general".to_string()));
        assert_eq!(r.author_handle, "alice");
        assert_eq!(r.channel_name.as_deref(), Some("general"));
        assert_eq!(r.timestamp_ms, 1_714_564_800_000);
    }

    #[test]
    fn fetched_guild_messages_keep_their_guild() {
        let raw = json!({
            "id": "m2",
            "channel_id": "c1",
            "content": "gg",
            "author": {"id": "11", "username": "alice"}
        });
        let general = ChannelRef {
            id: "c1".into(),
            name: "general".into(),
            guild_id: Some("g1".into()),
            guild_name: Some("Pawz HQ".into()),
        };
        let r = serde_json::from_value::<WireMessage>(raw.clone()).unwrap().into_record_in(&general);
        assert_eq!(r.guild_id.as_deref(), Some("g1"));
        assert_eq!(r.channel_ref().name, "general");

        let dm = ChannelRef { id: "dm1".into(), name: "@alice".into(), guild_id: None, guild_name: None };
        let r = serde_json::from_value::<WireMessage>(raw).unwrap().into_record_in(&dm);
        assert!(r.guild_id.is_none());
    }

    #[tokio::test]
    async fn reads_come_from_local_state() {
        let session = Arc::new(DiscordSession::new());
        let activity = Arc::new(RecentActivityBuffer::new(5));
        let gw = DiscordGateway::new("token", session.clone(), activity).unwrap();
        assert!(!gw.connection_state());
        assert!(gw.current_user().is_none());
        assert!(gw.list_accessible_channels().await.unwrap().is_empty());
        assert!(gw.list_recent_messages(10).await.unwrap().is_empty());
        assert!(gw.set_presence(PresenceStatus::Idle, None).await.is_err());

        let dm = ChannelRef { id: "dm1".into(), name: "@bob".into(), guild_id: None, guild_name: None };
        session.remember_dm_channel("2", dm.clone());
        let bob = UserRef { id: "2".into(), handle: "bob".into(), display_name: None };
        assert_eq!(gw.direct_channel(&bob).await.unwrap(), dm);
        gw.set_typing_indicator(&dm, false).await.unwrap();
        assert!(!session.is_typing("dm1"));
    }

    #[test]
    fn empty_token_rejected() {
        let session = Arc::new(DiscordSession::new());
        let activity = Arc::new(RecentActivityBuffer::new(5));
        assert!(DiscordGateway::new("  ", session, activity).is_err());
    }
}
