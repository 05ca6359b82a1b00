// ── Pilot Engine: Action Handlers ──────────────────────────────────────────
//
// One handler per ActionType. Each takes a ResolvedAction (concrete ids only)
// and talks to the gateway. Handlers return `Err` freely; the dispatcher turns
// every error into a failed ActionResult.
//
// Talking handlers (send_message, send_dm) follow the same shape:
//   typing on → realistic pause → send → typing off
// and the indicator is cleared on every exit path.

use crate::atoms::constants::{DEFAULT_RECENT_LIMIT, DISCORD_MESSAGE_MAX_CHARS, MAX_RECENT_LIMIT};
use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::traits::MessagingGateway;
use crate::atoms::types::{
    ActionResult, ActionType, ActivityRecord, ChannelRef, MessageRef, PresenceStatus,
    ResolvedAction, UserRef,
};
use crate::engine::activity::RecentActivityBuffer;
use crate::engine::pacing::Pacer;
use crate::engine::text::{split_message, truncate_str};
use log::{info, warn};
use serde_json::json;
use std::future::Future;

/// Everything a handler may touch.
#[derive(Clone, Copy)]
pub struct ActionContext<'a> {
    pub gateway: &'a dyn MessagingGateway,
    pub activity: &'a RecentActivityBuffer,
    pub pacer: &'a Pacer,
}

/// Run the handler registered for `action.action`.
pub async fn execute(ctx: ActionContext<'_>, action: &ResolvedAction) -> EngineResult<ActionResult> {
    match &action.action {
        ActionType::Clarify => clarify(action),
        ActionType::Unknown(name) => Err(EngineError::UnknownAction(name.clone())),
        ActionType::AddFriend => Err(EngineError::action(
            ActionType::AddFriend.name(),
            "bot accounts cannot send friend requests",
        )),
        ActionType::JoinServer => Err(EngineError::action(
            ActionType::JoinServer.name(),
            "bot accounts cannot accept invites; use the server's OAuth2 install link",
        )),
        _ if !ctx.gateway.connection_state() => Err(EngineError::gateway(
            ctx.gateway.name(),
            "not connected to the messaging platform",
        )),
        ActionType::SendMessage => send_message(ctx, action).await,
        ActionType::SendDm => send_dm(ctx, action).await,
        ActionType::React => react(ctx, action).await,
        ActionType::SetTyping => set_typing(ctx, action).await,
        ActionType::SetStatus => set_status(ctx, action).await,
        ActionType::SearchUser => search_user(ctx, action).await,
        ActionType::GetMessages => get_messages(ctx, action).await,
        ActionType::ListServers => list_servers(ctx).await,
        ActionType::ListChannels => list_channels(ctx, action).await,
    }
}

// ── Talking handlers ───────────────────────────────────────────────────────

async fn send_message(ctx: ActionContext<'_>, action: &ResolvedAction) -> EngineResult<ActionResult> {
    let channel: ChannelRef = required_object(action, "channel")?;
    let content = required_str(action, "message")?;
    let typing = action.bool_param("typing").unwrap_or(true);

    let sent = with_typing(ctx, &channel, typing, false, async {
        let mut last = None;
        for chunk in split_message(content, DISCORD_MESSAGE_MAX_CHARS) {
            last = Some(ctx.gateway.send_message(&channel, &chunk).await?);
        }
        last.ok_or_else(|| EngineError::action("send_message", "nothing to send"))
    })
    .await?;

    ctx.activity.note_sendable_channel(channel.clone());
    info!("[handlers] Sent to {}: {}", channel.display(), truncate_str(content, 80));
    Ok(ActionResult::ok(
        ActionType::SendMessage,
        format!("Message sent to {}", channel.display()),
    )
    .with_payload(json!(sent)))
}

async fn send_dm(ctx: ActionContext<'_>, action: &ResolvedAction) -> EngineResult<ActionResult> {
    let user: UserRef = required_object(action, "user")?;
    let content = required_str(action, "message")?;
    let typing = action.bool_param("typing").unwrap_or(true);

    // Typing in a DM needs the DM channel; skip the indicator if it can't be opened.
    let dm_channel = if typing {
        match ctx.gateway.direct_channel(&user).await {
            Ok(channel) => Some(channel),
            Err(e) => {
                warn!("[handlers] No DM channel for typing with {}: {}", user.handle, e);
                None
            }
        }
    } else {
        None
    };

    let send = async {
        let mut last = None;
        for chunk in split_message(content, DISCORD_MESSAGE_MAX_CHARS) {
            last = Some(ctx.gateway.send_direct_message(&user, &chunk).await?);
        }
        last.ok_or_else(|| EngineError::action("send_dm", "nothing to send"))
    };
    let sent: MessageRef = match &dm_channel {
        Some(channel) => with_typing(ctx, channel, true, true, send).await?,
        None => send.await?,
    };

    info!("[handlers] DM to {}: {}", user.handle, truncate_str(content, 80));
    Ok(ActionResult::ok(ActionType::SendDm, format!("DM sent to {}", user.handle))
        .with_payload(json!(sent)))
}

/// Show the typing indicator for a realistic interval, run `send`, then clear
/// the indicator whatever `send` returned.
async fn with_typing<T, F>(
    ctx: ActionContext<'_>,
    channel: &ChannelRef,
    typing: bool,
    direct: bool,
    send: F,
) -> EngineResult<T>
where
    F: Future<Output = EngineResult<T>>,
{
    if !typing {
        return send.await;
    }

    let outcome = async {
        ctx.gateway.set_typing_indicator(channel, true).await?;
        ctx.pacer.typing(direct).await;
        send.await
    }
    .await;

    if let Err(e) = ctx.gateway.set_typing_indicator(channel, false).await {
        warn!("[handlers] Failed to clear typing in {}: {}", channel.display(), e);
    }
    outcome
}

// ── Silent handlers ────────────────────────────────────────────────────────

async fn react(ctx: ActionContext<'_>, action: &ResolvedAction) -> EngineResult<ActionResult> {
    let message: MessageRef = required_object(action, "message_ref")?;
    let emoji = required_str(action, "emoji")?;
    ctx.gateway.react_to_message(&message, emoji).await?;
    Ok(ActionResult::ok(ActionType::React, format!("Reacted with {emoji}")))
}

async fn set_typing(ctx: ActionContext<'_>, action: &ResolvedAction) -> EngineResult<ActionResult> {
    let channel: ChannelRef = required_object(action, "channel")?;
    let on = action.bool_param("on").unwrap_or(true);
    ctx.gateway.set_typing_indicator(&channel, on).await?;
    let state = if on { "started" } else { "stopped" };
    Ok(ActionResult::ok(
        ActionType::SetTyping,
        format!("Typing {state} in {}", channel.display()),
    ))
}

async fn set_status(ctx: ActionContext<'_>, action: &ResolvedAction) -> EngineResult<ActionResult> {
    let raw = required_str(action, "status")?;
    let status = PresenceStatus::parse(raw).ok_or_else(|| {
        EngineError::action("set_status", format!("unknown status '{raw}' (online, idle, dnd, invisible)"))
    })?;
    let activity = action.str_param("activity").filter(|s| !s.trim().is_empty());
    ctx.gateway.set_presence(status, activity).await?;
    let message = match activity {
        Some(a) => format!("Status set to {} ({a})", status.as_str()),
        None => format!("Status set to {}", status.as_str()),
    };
    Ok(ActionResult::ok(ActionType::SetStatus, message))
}

async fn search_user(ctx: ActionContext<'_>, action: &ResolvedAction) -> EngineResult<ActionResult> {
    let handle = required_str(action, "username")?;
    match ctx.gateway.find_user_by_handle(handle).await? {
        Some(user) => Ok(ActionResult::ok(
            ActionType::SearchUser,
            format!("Found {} (id {})", user.handle, user.id),
        )
        .with_payload(json!(user))),
        None => Err(EngineError::action("search_user", format!("no user named '{handle}'"))),
    }
}

async fn get_messages(ctx: ActionContext<'_>, action: &ResolvedAction) -> EngineResult<ActionResult> {
    let limit = action
        .u64_param("limit")
        .map_or(DEFAULT_RECENT_LIMIT, |n| n as usize)
        .clamp(1, MAX_RECENT_LIMIT);

    let records = match action.object_param::<ChannelRef>("channel") {
        Some(channel) => ctx.gateway.fetch_channel_messages(&channel, limit).await?,
        None => ctx.gateway.list_recent_messages(limit).await?,
    };

    if records.is_empty() {
        return Ok(ActionResult::ok(ActionType::GetMessages, "No recent messages"));
    }
    let lines: Vec<String> = records.iter().map(format_record).collect();
    Ok(ActionResult::ok(ActionType::GetMessages, lines.join("\n")).with_payload(json!(records)))
}

async fn list_servers(ctx: ActionContext<'_>) -> EngineResult<ActionResult> {
    let servers = ctx.gateway.list_servers().await?;
    if servers.is_empty() {
        return Ok(ActionResult::ok(ActionType::ListServers, "Not in any server"));
    }
    let lines: Vec<String> = servers
        .iter()
        .map(|s| match s.member_count {
            Some(n) => format!("• {} ({n} members)", s.name),
            None => format!("• {}", s.name),
        })
        .collect();
    Ok(ActionResult::ok(ActionType::ListServers, lines.join("\n")).with_payload(json!(servers)))
}

async fn list_channels(ctx: ActionContext<'_>, action: &ResolvedAction) -> EngineResult<ActionResult> {
    let channels = match action.str_param("server").filter(|s| !s.trim().is_empty()) {
        Some(server) => {
            let needle = server.to_lowercase();
            let servers = ctx.gateway.list_servers().await?;
            let found = servers
                .into_iter()
                .find(|s| s.name.to_lowercase().contains(&needle))
                .ok_or_else(|| EngineError::action("list_channels", format!("no server matches '{server}'")))?;
            found.channels
        }
        None => ctx.gateway.list_accessible_channels().await?,
    };
    if channels.is_empty() {
        return Ok(ActionResult::ok(ActionType::ListChannels, "No accessible channels"));
    }
    let lines: Vec<String> = channels.iter().map(|c| format!("• {}", c.display())).collect();
    Ok(ActionResult::ok(ActionType::ListChannels, lines.join("\n")).with_payload(json!(channels)))
}

fn clarify(action: &ResolvedAction) -> EngineResult<ActionResult> {
    let question = action
        .str_param("question")
        .unwrap_or("Could you say that differently?");
    Ok(ActionResult::ok(ActionType::Clarify, question))
}

// ── Param helpers ──────────────────────────────────────────────────────────

fn required_str<'a>(action: &'a ResolvedAction, key: &str) -> EngineResult<&'a str> {
    action
        .str_param(key)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| EngineError::action(action.action.name(), format!("missing '{key}'")))
}

fn required_object<T: serde::de::DeserializeOwned>(action: &ResolvedAction, key: &str) -> EngineResult<T> {
    action
        .object_param(key)
        .ok_or_else(|| EngineError::action(action.action.name(), format!("unresolved '{key}'")))
}

fn format_record(r: &ActivityRecord) -> String {
    let place = match &r.channel_name {
        Some(name) if r.guild_id.is_some() => format!("#{name}"),
        _ => "DM".to_string(),
    };
    format!("{} ({place}): {}", r.bare_handle(), truncate_str(&r.content, 200))
}
