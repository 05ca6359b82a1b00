// ── Pilot Engine: Discord Account ──────────────────────────────────────────
//
// The concrete MessagingGateway for Discord, split by direction:
//
//   feed       : inbound gateway WebSocket; fills the session and the
//                 activity buffer (single writer)
//   rest       : outbound REST v10 calls (send, react, typing, lookups)
//   permissions: effective channel permission bits
//   export     : DM history dump to JSON
//
// `DiscordSession` is the state the two halves share: who we are, the
// guilds/channels/roles we can see, DM channels already opened, users
// seen on the wire, and the outbound op channel of the live socket.

pub mod export;
pub mod feed;
pub mod permissions;
pub mod rest;

pub use feed::DiscordFeed;
pub use rest::DiscordGateway;

use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::types::{bare_handle, ChannelRef, ServerInfo, UserRef};
use lru::LruCache;
use parking_lot::{Mutex, RwLock};
use permissions::{Overwrite, PermissionScope, RoleBits};
use serde::Deserialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;

pub(crate) const DISCORD_API: &str = "https://discord.com/api/v10";
pub(crate) const DISCORD_GATEWAY_URL: &str = "wss://gateway.discord.gg/?v=10&encoding=json";

/// GUILD_TEXT and GUILD_ANNOUNCEMENT accept plain messages.
const TEXT_CHANNEL_KINDS: [u8; 2] = [0, 5];

// ── Wire types ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct WireUser {
    pub id: String,
    pub username: String,
    pub discriminator: Option<String>,
    pub global_name: Option<String>,
    pub bot: Option<bool>,
}

impl WireUser {
    /// Legacy accounts keep a `#1234` tag; migrated ones report "0".
    pub fn tag(&self) -> String {
        match self.discriminator.as_deref() {
            Some(d) if !d.is_empty() && d != "0" => format!("{}#{}", self.username, d),
            _ => self.username.clone(),
        }
    }

    pub fn to_user_ref(&self) -> UserRef {
        UserRef {
            id: self.id.clone(),
            handle: self.username.clone(),
            display_name: self.global_name.clone(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WireMember {
    pub user: Option<WireUser>,
    #[serde(default)]
    pub roles: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GuildChannel {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type")]
    pub kind: u8,
    #[serde(default)]
    pub position: i64,
    pub guild_id: Option<String>,
    #[serde(default)]
    pub permission_overwrites: Vec<Overwrite>,
}

impl GuildChannel {
    pub fn is_text(&self) -> bool {
        TEXT_CHANNEL_KINDS.contains(&self.kind)
    }
}

#[derive(Debug, Clone, Deserialize)]
struct WireGuild {
    id: String,
    #[serde(default)]
    name: String,
    owner_id: Option<String>,
    member_count: Option<u64>,
    #[serde(default)]
    roles: Vec<RoleBits>,
    #[serde(default)]
    channels: Vec<GuildChannel>,
    #[serde(default)]
    members: Vec<WireMember>,
    #[serde(default)]
    unavailable: bool,
}

#[derive(Debug, Clone)]
pub struct GuildState {
    pub id: String,
    pub name: String,
    pub owner_id: Option<String>,
    pub member_count: Option<u64>,
    pub roles: Vec<RoleBits>,
    pub channels: Vec<GuildChannel>,
    /// Role ids the account holds here.
    pub my_roles: Vec<String>,
}

// ── Session ────────────────────────────────────────────────────────────────

/// Users remembered by handle; the least recently seen are forgotten first.
const SEEN_USERS_CAPACITY: usize = 2_000;

pub struct DiscordSession {
    me: RwLock<Option<UserRef>>,
    guilds: RwLock<BTreeMap<String, GuildState>>,
    /// Recipient user id → opened DM channel.
    dm_channels: RwLock<HashMap<String, ChannelRef>>,
    /// Lowercased bare handle → user, from every payload that carried one.
    users: Mutex<LruCache<String, UserRef>>,
    connected: AtomicBool,
    outbound: Mutex<Option<mpsc::UnboundedSender<Value>>>,
    typing: Mutex<HashSet<String>>,
}

impl Default for DiscordSession {
    fn default() -> Self {
        Self::with_user_capacity(SEEN_USERS_CAPACITY)
    }
}

impl DiscordSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user_capacity(capacity: usize) -> Self {
        Self {
            me: RwLock::new(None),
            guilds: RwLock::new(BTreeMap::new()),
            dm_channels: RwLock::new(HashMap::new()),
            users: Mutex::new(LruCache::new(NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN))),
            connected: AtomicBool::new(false),
            outbound: Mutex::new(None),
            typing: Mutex::new(HashSet::new()),
        }
    }

    pub fn me(&self) -> Option<UserRef> {
        self.me.read().clone()
    }

    pub fn set_me(&self, user: UserRef) {
        *self.me.write() = Some(user);
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    pub fn set_connected(&self, on: bool) {
        self.connected.store(on, Ordering::Relaxed);
    }

    /// Attach (or detach, with `None`) the live socket's op channel.
    pub fn set_outbound(&self, tx: Option<mpsc::UnboundedSender<Value>>) {
        *self.outbound.lock() = tx;
    }

    /// Queue a raw gateway op on the live socket.
    pub fn send_op(&self, payload: Value) -> EngineResult<()> {
        let guard = self.outbound.lock();
        let tx = guard
            .as_ref()
            .ok_or_else(|| EngineError::gateway("discord", "gateway socket is not connected"))?;
        tx.send(payload)
            .map_err(|_| EngineError::gateway("discord", "gateway socket closed"))
    }

    // ── Guild state ────────────────────────────────────────────────────

    /// Ingest a GUILD_CREATE payload. Returns the guild name when accepted.
    pub fn ingest_guild(&self, d: &Value) -> EngineResult<Option<String>> {
        let raw: WireGuild = serde_json::from_value(d.clone())?;
        if raw.unavailable {
            return Ok(None);
        }
        let me_id = self.me().map(|u| u.id);
        let mut my_roles = Vec::new();
        for member in &raw.members {
            let Some(user) = &member.user else { continue };
            self.remember_user(user.to_user_ref());
            if me_id.as_deref() == Some(user.id.as_str()) {
                my_roles = member.roles.clone();
            }
        }
        let name = raw.name.clone();
        let state = GuildState {
            id: raw.id.clone(),
            name: raw.name,
            owner_id: raw.owner_id,
            member_count: raw.member_count,
            roles: raw.roles,
            channels: raw.channels,
            my_roles,
        };
        self.guilds.write().insert(raw.id, state);
        Ok(Some(name))
    }

    pub fn remove_guild(&self, guild_id: &str) {
        self.guilds.write().remove(guild_id);
    }

    /// CHANNEL_CREATE / CHANNEL_UPDATE. DM channels carry no guild and are skipped.
    pub fn upsert_channel(&self, channel: GuildChannel) {
        let Some(guild_id) = channel.guild_id.clone() else { return };
        let mut guilds = self.guilds.write();
        let Some(guild) = guilds.get_mut(&guild_id) else { return };
        match guild.channels.iter_mut().find(|c| c.id == channel.id) {
            Some(slot) => *slot = channel,
            None => guild.channels.push(channel),
        }
    }

    pub fn remove_channel(&self, guild_id: &str, channel_id: &str) {
        if let Some(guild) = self.guilds.write().get_mut(guild_id) {
            guild.channels.retain(|c| c.id != channel_id);
        }
    }

    pub fn upsert_role(&self, guild_id: &str, role: RoleBits) {
        let mut guilds = self.guilds.write();
        let Some(guild) = guilds.get_mut(guild_id) else { return };
        match guild.roles.iter_mut().find(|r| r.id == role.id) {
            Some(slot) => *slot = role,
            None => guild.roles.push(role),
        }
    }

    pub fn remove_role(&self, guild_id: &str, role_id: &str) {
        if let Some(guild) = self.guilds.write().get_mut(guild_id) {
            guild.roles.retain(|r| r.id != role_id);
            guild.my_roles.retain(|r| r != role_id);
        }
    }

    /// GUILD_MEMBER_UPDATE for our own account.
    pub fn set_my_roles(&self, guild_id: &str, roles: Vec<String>) {
        if let Some(guild) = self.guilds.write().get_mut(guild_id) {
            guild.my_roles = roles;
        }
    }

    pub fn guild_ids(&self) -> Vec<String> {
        self.guilds.read().keys().cloned().collect()
    }

    pub fn guild_name(&self, guild_id: &str) -> Option<String> {
        self.guilds.read().get(guild_id).map(|g| g.name.clone())
    }

    // ── Channels & permissions ─────────────────────────────────────────

    pub fn channel_ref(&self, channel_id: &str) -> Option<ChannelRef> {
        let guilds = self.guilds.read();
        guilds.values().find_map(|g| {
            g.channels
                .iter()
                .find(|c| c.id == channel_id)
                .map(|c| to_channel_ref(g, c))
        })
    }

    /// Whether the account holds view + send in a guild channel.
    /// Unknown channels and DMs answer `false`.
    pub fn can_send(&self, channel_id: &str) -> bool {
        let Some(me) = self.me() else { return false };
        let guilds = self.guilds.read();
        guilds.values().any(|g| {
            g.channels
                .iter()
                .find(|c| c.id == channel_id)
                .is_some_and(|c| c.is_text() && scope(g, &me.id).can_send(&c.permission_overwrites))
        })
    }

    /// Text channels with view + send, guild by guild in position order.
    pub fn accessible_channels(&self) -> Vec<ChannelRef> {
        let Some(me) = self.me() else { return Vec::new() };
        let guilds = self.guilds.read();
        guilds
            .values()
            .flat_map(|g| accessible_in(g, &me.id))
            .collect()
    }

    pub fn servers(&self) -> Vec<ServerInfo> {
        let me_id = self.me().map(|u| u.id).unwrap_or_default();
        self.guilds
            .read()
            .values()
            .map(|g| ServerInfo {
                id: g.id.clone(),
                name: g.name.clone(),
                member_count: g.member_count,
                channels: accessible_in(g, &me_id),
            })
            .collect()
    }

    // ── DMs & users ────────────────────────────────────────────────────

    pub fn dm_channel(&self, user_id: &str) -> Option<ChannelRef> {
        self.dm_channels.read().get(user_id).cloned()
    }

    pub fn remember_dm_channel(&self, user_id: &str, channel: ChannelRef) {
        self.dm_channels.write().insert(user_id.to_string(), channel);
    }

    pub fn remember_user(&self, user: UserRef) {
        self.users.lock().put(bare_handle(&user.handle).to_lowercase(), user);
    }

    pub fn user_by_handle(&self, handle: &str) -> Option<UserRef> {
        let key = bare_handle(handle).to_lowercase();
        let mut users = self.users.lock();
        if let Some(user) = users.get(&key) {
            return Some(user.clone());
        }
        users
            .iter()
            .map(|(_, u)| u)
            .find(|u| u.display_name.as_deref().is_some_and(|d| d.eq_ignore_ascii_case(&key)))
            .cloned()
    }

    pub fn known_user_count(&self) -> usize {
        self.users.lock().len()
    }

    /// Every DM channel opened or observed so far.
    pub fn dm_channels(&self) -> Vec<(String, ChannelRef)> {
        let mut out: Vec<(String, ChannelRef)> =
            self.dm_channels.read().iter().map(|(u, c)| (u.clone(), c.clone())).collect();
        out.sort_by(|a, b| a.1.id.cmp(&b.1.id));
        out
    }

    // ── Typing ─────────────────────────────────────────────────────────

    pub fn mark_typing(&self, channel_id: &str, on: bool) {
        let mut typing = self.typing.lock();
        if on {
            typing.insert(channel_id.to_string());
        } else {
            typing.remove(channel_id);
        }
    }

    pub fn is_typing(&self, channel_id: &str) -> bool {
        self.typing.lock().contains(channel_id)
    }
}

fn scope<'a>(g: &'a GuildState, member_id: &'a str) -> PermissionScope<'a> {
    PermissionScope {
        guild_id: &g.id,
        owner_id: g.owner_id.as_deref(),
        member_id,
        member_roles: &g.my_roles,
        roles: &g.roles,
    }
}

fn accessible_in(g: &GuildState, member_id: &str) -> Vec<ChannelRef> {
    let scope = scope(g, member_id);
    let mut channels: Vec<&GuildChannel> = g
        .channels
        .iter()
        .filter(|c| c.is_text() && scope.can_send(&c.permission_overwrites))
        .collect();
    channels.sort_by_key(|c| c.position);
    channels.into_iter().map(|c| to_channel_ref(g, c)).collect()
}

fn to_channel_ref(g: &GuildState, c: &GuildChannel) -> ChannelRef {
    ChannelRef {
        id: c.id.clone(),
        name: c.name.clone(),
        guild_id: Some(g.id.clone()),
        guild_name: Some(g.name.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn guild_payload() -> Value {
        json!({
            "id": "g1",
            "name": "Pawz HQ",
            "owner_id": "99",
            "member_count": 3,
            "roles": [
                {"id": "g1", "permissions": "3072"},
                {"id": "r-quiet", "permissions": "0"}
            ],
            "channels": [
                {"id": "c-rules", "name": "rules", "type": 0, "position": 0,
                 "permission_overwrites": [{"id": "g1", "type": 0, "allow": "0", "deny": "2048"}]},
                {"id": "c-general", "name": "general", "type": 0, "position": 2, "permission_overwrites": []},
                {"id": "c-news", "name": "news", "type": 5, "position": 1, "permission_overwrites": []},
                {"id": "c-voice", "name": "Lounge", "type": 2, "position": 3, "permission_overwrites": []}
            ],
            "members": [
                {"user": {"id": "10", "username": "pilot", "discriminator": "0"}, "roles": []},
                {"user": {"id": "11", "username": "alice", "global_name": "Alice A."}, "roles": []}
            ]
        })
    }

    fn session() -> DiscordSession {
        let s = DiscordSession::new();
        s.set_me(UserRef { id: "10".into(), handle: "pilot".into(), display_name: None });
        s.ingest_guild(&guild_payload()).unwrap();
        s
    }

    #[test]
    fn accessible_channels_respect_overwrites_and_position() {
        let s = session();
        let names: Vec<String> = s.accessible_channels().into_iter().map(|c| c.name).collect();
        assert_eq!(names, vec!["news", "general"]);
        assert!(s.can_send("c-general"));
        assert!(!s.can_send("c-rules"));
        assert!(!s.can_send("c-voice"));
        assert!(!s.can_send("unknown"));
    }

    #[test]
    fn channel_updates_change_access() {
        let s = session();
        s.upsert_channel(
            serde_json::from_value(json!({
                "id": "c-general", "name": "general", "type": 0, "guild_id": "g1",
                "permission_overwrites": [{"id": "10", "type": 1, "allow": "0", "deny": "1024"}]
            }))
            .unwrap(),
        );
        assert!(!s.can_send("c-general"));
        s.remove_channel("g1", "c-news");
        assert!(s.accessible_channels().is_empty());
    }

    #[test]
    fn members_are_remembered() {
        let s = session();
        assert_eq!(s.user_by_handle("@Alice").unwrap().id, "11");
        assert_eq!(s.user_by_handle("alice a.").unwrap().id, "11");
        assert!(s.user_by_handle("mallory").is_none());
    }

    #[test]
    fn seen_users_are_bounded() {
        let s = DiscordSession::with_user_capacity(2);
        for (id, handle) in [("1", "ann"), ("2", "ben"), ("3", "cat")] {
            s.remember_user(UserRef { id: id.into(), handle: handle.into(), display_name: None });
        }
        assert_eq!(s.known_user_count(), 2);
        assert!(s.user_by_handle("ann").is_none());
        assert_eq!(s.user_by_handle("cat").unwrap().id, "3");
    }

    #[test]
    fn servers_list_accessible_channels() {
        let s = session();
        let servers = s.servers();
        assert_eq!(servers.len(), 1);
        assert_eq!(servers[0].name, "Pawz HQ");
        assert_eq!(servers[0].member_count, Some(3));
        assert_eq!(servers[0].channels.len(), 2);
        assert_eq!(s.channel_ref("c-news").unwrap().guild_name.as_deref(), Some("Pawz HQ"));
    }

    #[test]
    fn unavailable_guild_ignored() {
        let s = DiscordSession::new();
        assert_eq!(s.ingest_guild(&json!({"id": "g2", "unavailable": true})).unwrap(), None);
        assert!(s.guild_ids().is_empty());
    }

    #[test]
    fn ops_need_a_socket() {
        let s = DiscordSession::new();
        assert!(s.send_op(json!({"op": 3})).is_err());
        let (tx, mut rx) = mpsc::unbounded_channel();
        s.set_outbound(Some(tx));
        s.send_op(json!({"op": 3})).unwrap();
        assert_eq!(rx.try_recv().unwrap()["op"], 3);
    }

    #[test]
    fn legacy_tags() {
        let u = WireUser {
            id: "1".into(),
            username: "old".into(),
            discriminator: Some("1234".into()),
            global_name: None,
            bot: None,
        };
        assert_eq!(u.tag(), "old#1234");
    }
}
