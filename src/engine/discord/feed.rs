// ── Pilot Engine: Discord Gateway Feed ─────────────────────────────────────
//
// Inbound half of the Discord account. Keeps a persistent WebSocket to the
// gateway, reconnecting with escalating backoff, and turns dispatch events
// into session state and activity records.
//
//   READY / GUILD_* / CHANNEL_* / GUILD_ROLE_*  → DiscordSession
//   MESSAGE_CREATE                              → RecentActivityBuffer
//
// The feed is the buffer's only writer. Outbound ops (presence) queued on the
// session are forwarded onto the same socket as the heartbeat.

use super::permissions::RoleBits;
use super::rest::WireMessage;
use super::{DiscordSession, GuildChannel, WireUser, DISCORD_GATEWAY_URL};
use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::types::ChannelRef;
use crate::engine::activity::RecentActivityBuffer;
use crate::engine::http::reconnect_delay;
use crate::engine::text::truncate_str;
use futures::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};

/// Maximum consecutive reconnect attempts before giving up entirely.
const MAX_RECONNECT_ATTEMPTS: u32 = 8;

/// GUILDS | GUILD_MESSAGES | DIRECT_MESSAGES | MESSAGE_CONTENT.
/// MESSAGE_CONTENT is privileged; without it Discord closes with 4014.
const GATEWAY_INTENTS: u64 = (1 << 0) | (1 << 9) | (1 << 12) | (1 << 15);

#[derive(Debug, Deserialize)]
struct GatewayPayload {
    op: u8,
    d: Option<Value>,
    s: Option<u64>,
    t: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ReadyEvent {
    user: WireUser,
}

pub struct DiscordFeed {
    token: String,
    session: Arc<DiscordSession>,
    activity: Arc<RecentActivityBuffer>,
    stop: Arc<AtomicBool>,
}

impl DiscordFeed {
    pub fn new(
        token: impl Into<String>,
        session: Arc<DiscordSession>,
        activity: Arc<RecentActivityBuffer>,
    ) -> Self {
        Self {
            token: token.into(),
            session,
            activity,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Set to `true` to end the feed after the current event.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move { self.run().await })
    }

    /// Connect, and keep reconnecting until stopped or a fatal close.
    pub async fn run(self) {
        let mut reconnect_attempt: u32 = 0;
        loop {
            let outcome = self.run_once().await;
            self.session.set_connected(false);
            self.session.set_outbound(None);
            if self.stop.load(Ordering::Relaxed) {
                break;
            }

            match outcome {
                Ok(()) => {
                    info!("[discord] Gateway session ended, reconnecting");
                    reconnect_attempt = 0;
                    reconnect_delay(0).await;
                }
                Err(e) => {
                    // 4004 and 4014 are non-recoverable without operator action.
                    let msg = e.to_string();
                    if msg.contains("4004") || msg.contains("4014") {
                        error!("[discord] Fatal: {}, stopping feed", msg);
                        break;
                    }

                    reconnect_attempt += 1;
                    if reconnect_attempt > MAX_RECONNECT_ATTEMPTS {
                        error!("[discord] Max reconnect attempts ({}) reached, giving up", MAX_RECONNECT_ATTEMPTS);
                        break;
                    }
                    error!("[discord] Feed error: {}", e);
                    let delay = reconnect_delay(reconnect_attempt - 1).await;
                    warn!("[discord] Reconnected after {}ms (attempt {})", delay.as_millis(), reconnect_attempt);
                }
            }
            if self.stop.load(Ordering::Relaxed) {
                break;
            }
        }
        info!("[discord] Feed stopped");
    }

    async fn run_once(&self) -> EngineResult<()> {
        let ws_err = |e: tokio_tungstenite::tungstenite::Error| EngineError::gateway("discord", e.to_string());

        let (ws_stream, _) = connect_async(DISCORD_GATEWAY_URL).await.map_err(ws_err)?;
        let (mut write, mut read) = ws_stream.split();

        // Hello (op 10) carries the heartbeat interval.
        let hello = read
            .next()
            .await
            .ok_or_else(|| EngineError::gateway("discord", "Gateway closed before Hello"))?
            .map_err(ws_err)?;
        let hello_payload: GatewayPayload = serde_json::from_str(hello.to_text().map_err(ws_err)?)?;
        if hello_payload.op != 10 {
            return Err(EngineError::gateway(
                "discord",
                format!("Expected Hello (op 10), got op {}", hello_payload.op),
            ));
        }
        let heartbeat_interval = hello_payload
            .d
            .as_ref()
            .and_then(|d| d["heartbeat_interval"].as_u64())
            .unwrap_or(41_250);
        info!("[discord] Connected to gateway, heartbeat_interval={}ms", heartbeat_interval);

        write
            .send(WsMessage::Text(identify_payload(&self.token).to_string()))
            .await
            .map_err(ws_err)?;

        let writer = Arc::new(tokio::sync::Mutex::new(write));
        // -1 = no sequence yet (heartbeat sends null).
        let sequence = Arc::new(AtomicI64::new(-1));

        let hb_writer = writer.clone();
        let hb_sequence = sequence.clone();
        let heartbeat_task = tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_millis(heartbeat_interval)).await;
                let hb = heartbeat_payload(hb_sequence.load(Ordering::Relaxed));
                let mut w = hb_writer.lock().await;
                if let Err(e) = w.send(WsMessage::Text(hb.to_string())).await {
                    warn!("[discord] Heartbeat send failed: {}", e);
                    break;
                }
            }
        });

        let (op_tx, mut op_rx) = mpsc::unbounded_channel::<Value>();
        self.session.set_outbound(Some(op_tx.clone()));
        let op_writer = writer.clone();
        let forward_task = tokio::spawn(async move {
            while let Some(op) = op_rx.recv().await {
                let mut w = op_writer.lock().await;
                if let Err(e) = w.send(WsMessage::Text(op.to_string())).await {
                    warn!("[discord] Outbound op failed: {}", e);
                    break;
                }
            }
        });

        let result = self.event_loop(&mut read, &sequence, &op_tx).await;

        heartbeat_task.abort();
        forward_task.abort();
        result
    }

    /// `ops` feeds the socket writer; early heartbeats go out through it.
    async fn event_loop<S>(
        &self,
        read: &mut S,
        sequence: &AtomicI64,
        ops: &mpsc::UnboundedSender<Value>,
    ) -> EngineResult<()>
    where
        S: futures::Stream<Item = Result<WsMessage, tokio_tungstenite::tungstenite::Error>> + Unpin,
    {
        while let Some(msg_result) = read.next().await {
            if self.stop.load(Ordering::Relaxed) {
                break;
            }

            let msg = match msg_result {
                Ok(m) => m,
                Err(e) => {
                    warn!("[discord] WS read error: {}", e);
                    return Err(EngineError::gateway("discord", e.to_string()));
                }
            };

            let text = match msg {
                WsMessage::Text(t) => t,
                WsMessage::Close(frame) => {
                    let (code, reason) = frame
                        .map(|f| (f.code.into(), f.reason.to_string()))
                        .unwrap_or((0u16, String::new()));
                    return close_outcome(code, &reason);
                }
                _ => continue,
            };

            let payload: GatewayPayload = match serde_json::from_str(&text) {
                Ok(p) => p,
                Err(_) => continue,
            };
            if let Some(s) = payload.s {
                sequence.store(s as i64, Ordering::Relaxed);
            }

            match payload.op {
                0 => {
                    let event = payload.t.as_deref().unwrap_or("");
                    if let Some(d) = payload.d {
                        if let Err(e) = self.handle_dispatch(event, d) {
                            warn!("[discord] Bad {} payload: {}", event, e);
                        }
                    }
                }
                // Heartbeat ACK
                11 => {}
                // Heartbeat request
                1 => {
                    debug!("[discord] Gateway requested an early heartbeat");
                    if ops.send(heartbeat_payload(sequence.load(Ordering::Relaxed))).is_err() {
                        return Err(EngineError::gateway("discord", "socket writer gone"));
                    }
                }
                // Reconnect
                7 => {
                    info!("[discord] Gateway requested reconnect");
                    return Ok(());
                }
                // Invalid Session
                9 => {
                    let resumable = payload.d.as_ref().and_then(|d| d.as_bool()).unwrap_or(false);
                    warn!("[discord] Invalid session (resumable={})", resumable);
                    return Err(EngineError::gateway(
                        "discord",
                        "Invalid session, Discord rejected the connection",
                    ));
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Apply one dispatch event to the session / activity buffer.
    pub(crate) fn handle_dispatch(&self, event: &str, d: Value) -> EngineResult<()> {
        match event {
            "READY" => {
                let ready: ReadyEvent = serde_json::from_value(d)?;
                info!("[discord] Ready as {} ({})", ready.user.tag(), ready.user.id);
                self.session.set_me(ready.user.to_user_ref());
                self.session.set_connected(true);
            }
            "GUILD_CREATE" => {
                if let Some(name) = self.session.ingest_guild(&d)? {
                    info!(
                        "[discord] Guild ready: {} ({} accessible channels)",
                        name,
                        self.session.accessible_channels().len()
                    );
                }
            }
            "GUILD_DELETE" => {
                if let Some(id) = d["id"].as_str() {
                    self.session.remove_guild(id);
                }
            }
            "CHANNEL_CREATE" | "CHANNEL_UPDATE" => {
                let channel: GuildChannel = serde_json::from_value(d)?;
                self.session.upsert_channel(channel);
            }
            "CHANNEL_DELETE" => {
                if let (Some(guild), Some(id)) = (d["guild_id"].as_str(), d["id"].as_str()) {
                    self.session.remove_channel(guild, id);
                }
            }
            "GUILD_ROLE_CREATE" | "GUILD_ROLE_UPDATE" => {
                let role: RoleBits = serde_json::from_value(d["role"].clone())?;
                if let Some(guild) = d["guild_id"].as_str() {
                    self.session.upsert_role(guild, role);
                }
            }
            "GUILD_ROLE_DELETE" => {
                if let (Some(guild), Some(id)) = (d["guild_id"].as_str(), d["role_id"].as_str()) {
                    self.session.remove_role(guild, id);
                }
            }
            "GUILD_MEMBER_UPDATE" => {
                let me = self.session.me().map(|u| u.id);
                if me.is_some() && d["user"]["id"].as_str() == me.as_deref() {
                    if let Some(guild) = d["guild_id"].as_str() {
                        let roles: Vec<String> = serde_json::from_value(d["roles"].clone())?;
                        self.session.set_my_roles(guild, roles);
                    }
                }
            }
            "MESSAGE_CREATE" => self.record_message(d)?,
            _ => {}
        }
        Ok(())
    }

    fn record_message(&self, d: Value) -> EngineResult<()> {
        let msg: WireMessage = serde_json::from_value(d)?;
        let author = msg.author.to_user_ref();
        self.session.remember_user(author.clone());
        let from_me = self.session.me().is_some_and(|me| me.id == author.id);
        if msg.guild_id.is_none() && !from_me {
            self.session.remember_dm_channel(
                &author.id,
                ChannelRef {
                    id: msg.channel_id.clone(),
                    name: format!("@{}", author.handle),
                    guild_id: None,
                    guild_name: None,
                },
            );
        }

        let channel = self.session.channel_ref(&msg.channel_id);
        let sendable = msg.guild_id.is_some() && self.session.can_send(&msg.channel_id);
        let record = msg.into_record(channel.as_ref().map(|c| c.name.clone()));
        debug!(
            "[discord] {} in {}: {}",
            record.author_handle,
            record.channel_name.as_deref().unwrap_or("DM"),
            truncate_str(&record.content, 80)
        );
        self.activity.push(record);

        if sendable {
            if let Some(channel) = channel {
                self.activity.note_sendable_channel(channel);
            }
        }
        Ok(())
    }
}

/// Op 1 with the last sequence number, `null` before the first dispatch.
fn heartbeat_payload(seq: i64) -> Value {
    json!({ "op": 1, "d": if seq < 0 { Value::Null } else { json!(seq) } })
}

fn identify_payload(token: &str) -> Value {
    json!({
        "op": 2,
        "d": {
            "token": token,
            "intents": GATEWAY_INTENTS,
            "properties": {
                "os": std::env::consts::OS,
                "browser": "pawz-pilot",
                "device": "pawz-pilot"
            }
        }
    })
}

/// Map a close frame onto the reconnect policy.
/// Close codes: https://discord.com/developers/docs/topics/opcodes-and-status-codes
fn close_outcome(code: u16, reason: &str) -> EngineResult<()> {
    match code {
        4004 => {
            error!("[discord] Authentication failed (4004), invalid token");
            Err(EngineError::gateway("discord", "4004: invalid token"))
        }
        4014 => {
            error!("[discord] Disallowed intents (4014), enable the Message Content intent");
            Err(EngineError::gateway(
                "discord",
                "4014: disallowed intents. Enable 'Message Content Intent' in the Developer Portal",
            ))
        }
        1000 | 0 => {
            info!("[discord] Gateway closed normally (code={})", code);
            Ok(())
        }
        _ => {
            warn!("[discord] Gateway closed: code={} reason={}", code, reason);
            Err(EngineError::gateway("discord", format!("Gateway closed: code={} {}", code, reason)))
        }
    }
}
