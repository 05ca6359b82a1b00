// ── Pilot Atoms: Pure Data Types ──────────────────────────────────────────────
// All plain struct/enum definitions shared across the pipeline.
// Atoms layer rule: no I/O, no side effects, no imports from engine/.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

// ── Conversation ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One prior exchange line, as fed back to the language model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
}

impl ConversationTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }
}

// ── Platform references ────────────────────────────────────────────────────

/// A message observed on the platform, captured passively by the event feed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActivityRecord {
    pub message_id: String,
    pub author_id: String,
    /// Full author tag as the platform renders it (may carry `#discriminator`).
    pub author_handle: String,
    pub channel_id: String,
    pub channel_name: Option<String>,
    /// `None` for direct messages.
    pub guild_id: Option<String>,
    pub content: String,
    pub timestamp_ms: i64,
}

impl ActivityRecord {
    /// Author handle with any `#discriminator` suffix and `@` prefix removed.
    pub fn bare_handle(&self) -> String {
        bare_handle(&self.author_handle)
    }

    pub fn message_ref(&self) -> MessageRef {
        MessageRef {
            channel_id: self.channel_id.clone(),
            message_id: self.message_id.clone(),
        }
    }

    pub fn channel_ref(&self) -> ChannelRef {
        ChannelRef {
            id: self.channel_id.clone(),
            name: self.channel_name.clone().unwrap_or_else(|| "DM".into()),
            guild_id: self.guild_id.clone(),
            guild_name: None,
        }
    }
}

/// Strip `@` and `#1234` decorations from a user tag.
pub fn bare_handle(tag: &str) -> String {
    let trimmed = tag.trim().trim_start_matches('@');
    trimmed.split('#').next().unwrap_or(trimmed).to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct MessageRef {
    pub channel_id: String,
    pub message_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChannelRef {
    pub id: String,
    pub name: String,
    pub guild_id: Option<String>,
    pub guild_name: Option<String>,
}

impl ChannelRef {
    pub fn display(&self) -> String {
        format!("#{}", self.name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserRef {
    pub id: String,
    pub handle: String,
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerInfo {
    pub id: String,
    pub name: String,
    pub member_count: Option<u64>,
    pub channels: Vec<ChannelRef>,
}

/// Presence states accepted by `set_status`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Online,
    Idle,
    Dnd,
    Invisible,
}

impl PresenceStatus {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "online" | "en ligne" | "connecté" | "connecte" => Some(Self::Online),
            "idle" | "away" | "absent" | "inactif" => Some(Self::Idle),
            "dnd" | "busy" | "do not disturb" | "occupé" | "occupe" | "ne pas déranger" => {
                Some(Self::Dnd)
            }
            "invisible" | "offline" | "hors ligne" => Some(Self::Invisible),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Idle => "idle",
            Self::Dnd => "dnd",
            Self::Invisible => "invisible",
        }
    }
}

// ── Intents ────────────────────────────────────────────────────────────────

/// Every action the dispatcher knows how to run.
/// Names that match nothing land in `Unknown` and fail at dispatch time.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ActionType {
    SendMessage,
    SendDm,
    React,
    SetTyping,
    SetStatus,
    SearchUser,
    GetMessages,
    ListServers,
    ListChannels,
    Clarify,
    /// Recognized so it can be refused by name: bot accounts have no
    /// friend list and cannot accept invites.
    AddFriend,
    JoinServer,
    Unknown(String),
}

impl ActionType {
    /// Parse an action name in any case / separator style
    /// (`SEND_DM`, `send-dm`, `sendDm`, `dm`).
    pub fn from_name(raw: &str) -> Self {
        let key: String = raw
            .chars()
            .filter(|c| c.is_alphanumeric())
            .flat_map(|c| c.to_lowercase())
            .collect();
        match key.as_str() {
            "sendmessage" | "message" | "send" | "post" | "say" => Self::SendMessage,
            "senddm" | "dm" | "senddirectmessage" | "directmessage" | "reply" => Self::SendDm,
            "react" | "reaction" | "addreaction" => Self::React,
            "settyping" | "typing" | "toggletyping" => Self::SetTyping,
            "setstatus" | "status" | "setpresence" | "presence" => Self::SetStatus,
            "searchuser" | "finduser" | "lookupuser" => Self::SearchUser,
            "getmessages" | "showrecent" | "recentmessages" | "listmessages" => Self::GetMessages,
            "listservers" | "servers" | "getservers" | "listguilds" => Self::ListServers,
            "listchannels" | "channels" | "getchannels" => Self::ListChannels,
            "clarify" | "askclarification" | "none" | "chat" => Self::Clarify,
            "addfriend" | "friend" | "sendfriendrequest" => Self::AddFriend,
            "joinserver" | "joinguild" | "acceptinvite" => Self::JoinServer,
            _ => Self::Unknown(raw.to_string()),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::SendMessage => "send_message",
            Self::SendDm => "send_dm",
            Self::React => "react",
            Self::SetTyping => "set_typing",
            Self::SetStatus => "set_status",
            Self::SearchUser => "search_user",
            Self::GetMessages => "get_messages",
            Self::ListServers => "list_servers",
            Self::ListChannels => "list_channels",
            Self::Clarify => "clarify",
            Self::AddFriend => "add_friend",
            Self::JoinServer => "join_server",
            Self::Unknown(raw) => raw,
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Serialize for ActionType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

impl<'de> Deserialize<'de> for ActionType {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(ActionType::from_name(&raw))
    }
}

/// A single requested action in canonical form.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Intent {
    pub action: ActionType,
    #[serde(default)]
    pub params: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
}

impl Intent {
    pub fn new(action: ActionType) -> Self {
        Self { action, params: Map::new(), order: None, reasoning: None }
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.params.insert(key.to_string(), value.into());
        self
    }

    pub fn str_param(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(Value::as_str)
    }
}

/// Where a classification came from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IntentSource {
    Pattern,
    Model,
    Heuristic,
    Cache,
}

/// The canonical outcome of classifying one operator request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Classification {
    pub intents: Vec<Intent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub human_response: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    pub source: IntentSource,
}

impl Classification {
    pub fn single(intent: Intent, source: IntentSource) -> Self {
        Self { intents: vec![intent], human_response: None, reasoning: None, source }
    }
}

/// An intent whose parameters carry only concrete identifiers.
/// Built once by the resolver, consumed once by the dispatcher.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedAction {
    pub action: ActionType,
    pub params: Map<String, Value>,
    pub order: Option<i64>,
    /// Index in the classifier's output, used as the sort tie-break.
    pub position: usize,
}

impl ResolvedAction {
    pub fn str_param(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(Value::as_str)
    }

    pub fn bool_param(&self, key: &str) -> Option<bool> {
        self.params.get(key).and_then(Value::as_bool)
    }

    pub fn u64_param(&self, key: &str) -> Option<u64> {
        self.params.get(key).and_then(|v| {
            v.as_u64().or_else(|| v.as_str().and_then(|s| s.trim().parse().ok()))
        })
    }

    /// Typed view of a structured param written by the resolver
    /// (`channel`, `user`, `message_ref`).
    pub fn object_param<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.params.get(key).and_then(|v| serde_json::from_value(v.clone()).ok())
    }
}

fn default_true() -> bool {
    true
}

/// Outcome of one executed action. Never mutated after creation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActionResult {
    pub action: ActionType,
    /// Absent in serialized form means success.
    #[serde(default = "default_true")]
    pub success: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl ActionResult {
    pub fn ok(action: ActionType, message: impl Into<String>) -> Self {
        Self { action, success: true, message: message.into(), error: None, payload: None }
    }

    pub fn failed(action: ActionType, error: impl Into<String>) -> Self {
        let error = error.into();
        Self {
            action,
            success: false,
            message: error.clone(),
            error: Some(error),
            payload: None,
        }
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }
}

// ── Pipeline surface ───────────────────────────────────────────────────────

/// Which classifier gets the first look at a request.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ClassificationOrder {
    /// Deterministic rules first; the model only sees what they miss.
    #[default]
    PatternsFirst,
    /// The model first; rules when no model is configured or the call fails.
    ClassifierFirst,
}

/// Per-command lifecycle. Terminal on `Replied`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CommandStage {
    Received,
    Classifying,
    Resolving,
    Dispatching,
    Aggregated,
    Replied,
}

/// What `process_command` hands back to the front-end.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommandResponse {
    pub success: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub results: Vec<ActionResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    /// Stages visited, in order.
    #[serde(default)]
    pub stages: Vec<CommandStage>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PipelineStats {
    pub requests_used: u64,
    pub requests_remaining: u64,
    pub cache_size: usize,
    pub estimated_cost: String,
    pub conversations: usize,
}
