// ── Pilot Engine: DM Export ────────────────────────────────────────────────
//
// Dumps direct-message history to a dated JSON file. A bot only sees DM
// channels it has opened or received a message in, so the export covers the
// session's known DM channels plus any users named explicitly.
//
// Each channel is paged backwards (100 per request, paced) until it runs dry
// or hits `max_per_channel`. A failing channel is logged and skipped.

use crate::atoms::error::EngineResult;
use crate::atoms::types::{ActivityRecord, ChannelRef};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Discord's page cap for GET /channels/{id}/messages.
pub const PAGE_SIZE: usize = 100;

/// Backward pagination over one channel's history.
#[async_trait]
pub trait MessagePager: Send + Sync {
    /// Up to `limit` messages older than `before` (newest first).
    async fn fetch_page(
        &self,
        channel: &ChannelRef,
        limit: usize,
        before: Option<&str>,
    ) -> EngineResult<Vec<ActivityRecord>>;
}

#[derive(Debug, Clone)]
pub struct DmExportOptions {
    pub max_per_channel: usize,
    pub page_pause: Duration,
}

impl Default for DmExportOptions {
    fn default() -> Self {
        DmExportOptions { max_per_channel: 1000, page_pause: Duration::from_secs(1) }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DmChannelExport {
    pub id: String,
    pub name: String,
    pub recipient_id: String,
    /// Oldest first.
    pub messages: Vec<ActivityRecord>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DmExportStats {
    pub total_channels: usize,
    pub messages_by_channel: BTreeMap<String, usize>,
    pub oldest_message: Option<String>,
    pub newest_message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DmExport {
    pub export_date: String,
    pub total_messages: usize,
    pub channels: Vec<DmChannelExport>,
    pub stats: DmExportStats,
}

/// Export every `(recipient_id, channel)` pair. Channels that fail are skipped.
pub async fn export_direct_messages(
    pager: &dyn MessagePager,
    channels: Vec<(String, ChannelRef)>,
    opts: &DmExportOptions,
) -> DmExport {
    let mut exported = Vec::with_capacity(channels.len());
    for (recipient_id, channel) in channels {
        match export_channel(pager, &channel, opts).await {
            Ok(messages) => {
                info!("[export] {}: {} messages", channel.name, messages.len());
                exported.push(DmChannelExport {
                    id: channel.id,
                    name: channel.name,
                    recipient_id,
                    messages,
                });
            }
            Err(e) => warn!("[export] Skipping {}: {}", channel.name, e),
        }
    }
    build_export(exported)
}

async fn export_channel(
    pager: &dyn MessagePager,
    channel: &ChannelRef,
    opts: &DmExportOptions,
) -> EngineResult<Vec<ActivityRecord>> {
    let mut messages: Vec<ActivityRecord> = Vec::new();
    let mut before: Option<String> = None;
    while messages.len() < opts.max_per_channel {
        let want = (opts.max_per_channel - messages.len()).min(PAGE_SIZE);
        let page = pager.fetch_page(channel, want, before.as_deref()).await?;
        let exhausted = page.len() < want;
        let Some(last) = page.last() else { break };
        before = Some(last.message_id.clone());
        messages.extend(page.into_iter().take(want));
        if exhausted {
            break;
        }
        if !opts.page_pause.is_zero() {
            tokio::time::sleep(opts.page_pause).await;
        }
    }
    messages.sort_by_key(|m| m.timestamp_ms);
    Ok(messages)
}

fn build_export(channels: Vec<DmChannelExport>) -> DmExport {
    let mut stats = DmExportStats { total_channels: channels.len(), ..Default::default() };
    let mut oldest: Option<i64> = None;
    let mut newest: Option<i64> = None;
    for channel in &channels {
        stats.messages_by_channel.insert(channel.name.clone(), channel.messages.len());
        for m in &channel.messages {
            oldest = Some(oldest.map_or(m.timestamp_ms, |o| o.min(m.timestamp_ms)));
            newest = Some(newest.map_or(m.timestamp_ms, |n| n.max(m.timestamp_ms)));
        }
    }
    stats.oldest_message = oldest.and_then(rfc3339);
    stats.newest_message = newest.and_then(rfc3339);
    DmExport {
        export_date: Utc::now().to_rfc3339(),
        total_messages: channels.iter().map(|c| c.messages.len()).sum(),
        channels,
        stats,
    }
}

fn rfc3339(ms: i64) -> Option<String> {
    Utc.timestamp_millis_opt(ms).single().map(|t| t.to_rfc3339())
}

/// Write `discord_dms_<date>.json` into `dir` and return its path.
pub fn write_export(export: &DmExport, dir: &Path) -> EngineResult<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(format!("discord_dms_{}.json", Utc::now().format("%Y-%m-%d")));
    std::fs::write(&path, serde_json::to_string_pretty(export)?)?;
    info!("[export] Wrote {} messages to {}", export.total_messages, path.display());
    Ok(path)
}
