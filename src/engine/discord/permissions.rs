// ── Pilot Engine: Discord Permission Computation ───────────────────────────
//
// Resolves the account's effective permission bits in a guild channel, in
// the order Discord documents:
//
//   1. OR of @everyone + every role the member holds
//   2. ADMINISTRATOR (or guild ownership) grants everything
//   3. @everyone channel overwrite
//   4. role overwrites (denies folded, then allows folded)
//   5. member overwrite
//
// Bits arrive from the API as decimal strings; they are parsed once on
// deserialization.

use serde::{Deserialize, Deserializer};

pub const ADMINISTRATOR: u64 = 1 << 3;
pub const VIEW_CHANNEL: u64 = 1 << 10;
pub const SEND_MESSAGES: u64 = 1 << 11;
pub const ALL: u64 = u64::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverwriteKind {
    Role,
    Member,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Overwrite {
    pub id: String,
    #[serde(rename = "type", deserialize_with = "de_overwrite_kind")]
    pub kind: OverwriteKind,
    #[serde(deserialize_with = "de_bits")]
    pub allow: u64,
    #[serde(deserialize_with = "de_bits")]
    pub deny: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RoleBits {
    pub id: String,
    #[serde(deserialize_with = "de_bits")]
    pub permissions: u64,
}

/// Everything needed to answer "what may this member do in this channel".
pub struct PermissionScope<'a> {
    pub guild_id: &'a str,
    pub owner_id: Option<&'a str>,
    pub member_id: &'a str,
    pub member_roles: &'a [String],
    pub roles: &'a [RoleBits],
}

impl PermissionScope<'_> {
    /// Guild-level permissions before any channel overwrite.
    pub fn base(&self) -> u64 {
        if self.owner_id == Some(self.member_id) {
            return ALL;
        }
        // The @everyone role shares the guild's id.
        let mut bits = self
            .roles
            .iter()
            .find(|r| r.id == self.guild_id)
            .map(|r| r.permissions)
            .unwrap_or(0);
        for role in self.roles.iter().filter(|r| self.member_roles.contains(&r.id)) {
            bits |= role.permissions;
        }
        if bits & ADMINISTRATOR != 0 {
            return ALL;
        }
        bits
    }

    /// Effective permissions in a channel with the given overwrites.
    pub fn in_channel(&self, overwrites: &[Overwrite]) -> u64 {
        let base = self.base();
        if base == ALL {
            return ALL;
        }
        let mut bits = base;

        if let Some(everyone) = overwrites
            .iter()
            .find(|o| o.kind == OverwriteKind::Role && o.id == self.guild_id)
        {
            bits &= !everyone.deny;
            bits |= everyone.allow;
        }

        let (mut allow, mut deny) = (0u64, 0u64);
        for o in overwrites.iter().filter(|o| {
            o.kind == OverwriteKind::Role && o.id != self.guild_id && self.member_roles.contains(&o.id)
        }) {
            allow |= o.allow;
            deny |= o.deny;
        }
        bits &= !deny;
        bits |= allow;

        if let Some(member) = overwrites
            .iter()
            .find(|o| o.kind == OverwriteKind::Member && o.id == self.member_id)
        {
            bits &= !member.deny;
            bits |= member.allow;
        }
        bits
    }

    /// Both VIEW_CHANNEL and SEND_MESSAGES are held.
    pub fn can_send(&self, overwrites: &[Overwrite]) -> bool {
        has_all(self.in_channel(overwrites), VIEW_CHANNEL | SEND_MESSAGES)
    }
}

pub fn has_all(bits: u64, wanted: u64) -> bool {
    bits & wanted == wanted
}

fn de_bits<'de, D: Deserializer<'de>>(d: D) -> Result<u64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Str(String),
        Num(u64),
    }
    match Raw::deserialize(d)? {
        Raw::Num(n) => Ok(n),
        Raw::Str(s) => s.parse().map_err(serde::de::Error::custom),
    }
}

fn de_overwrite_kind<'de, D: Deserializer<'de>>(d: D) -> Result<OverwriteKind, D::Error> {
    match u8::deserialize(d)? {
        0 => Ok(OverwriteKind::Role),
        1 => Ok(OverwriteKind::Member),
        other => Err(serde::de::Error::custom(format!("unknown overwrite type {}", other))),
    }
}
