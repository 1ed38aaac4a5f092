//! Guild aggregate and membership types.
//!
//! A [`Guild`] is mutated only on the global authority; everything here is
//! plain data plus pure predicates so it can be read from any thread as a
//! snapshot.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::GuildSettings;
use crate::ids::{ActorId, GuildId, Location};

/// Monetary amount in minor units (hundredths).
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Money(pub u64);

impl Money {
    pub const ZERO: Money = Money(0);

    pub fn checked_add(self, other: Money) -> Option<Money> {
        self.0.checked_add(other.0).map(Money)
    }

    pub fn checked_sub(self, other: Money) -> Option<Money> {
        self.0.checked_sub(other.0).map(Money)
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.0 / 100, self.0 % 100)
    }
}

/// Role of a member within a guild.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuildRole {
    Leader,
    Officer,
    Member,
}

impl GuildRole {
    pub fn code(self) -> &'static str {
        match self {
            GuildRole::Leader => "leader",
            GuildRole::Officer => "officer",
            GuildRole::Member => "member",
        }
    }

    fn rank(self) -> u8 {
        match self {
            GuildRole::Leader => 2,
            GuildRole::Officer => 1,
            GuildRole::Member => 0,
        }
    }

    /// Strictly higher rank than `other`.
    pub fn outranks(self, other: GuildRole) -> bool {
        self.rank() > other.rank()
    }

    pub fn can_invite(self) -> bool {
        matches!(self, GuildRole::Leader | GuildRole::Officer)
    }

    pub fn can_kick(self) -> bool {
        matches!(self, GuildRole::Leader | GuildRole::Officer)
    }

    /// Promote and demote.
    pub fn can_manage_roles(self) -> bool {
        matches!(self, GuildRole::Leader)
    }

    pub fn can_delete_guild(self) -> bool {
        matches!(self, GuildRole::Leader)
    }

    pub fn can_manage_relations(self) -> bool {
        matches!(self, GuildRole::Leader | GuildRole::Officer)
    }

    /// Withdrawals, level purchases and the home anchor.
    pub fn can_manage_bank(self) -> bool {
        matches!(self, GuildRole::Leader | GuildRole::Officer)
    }
}

impl fmt::Display for GuildRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// The guild aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Guild {
    pub id: GuildId,
    pub name: String,
    pub tag: Option<String>,
    pub description: Option<String>,
    pub leader: ActorId,
    /// 1..=max_level
    pub level: u8,
    pub balance: Money,
    pub frozen: bool,
    pub home: Option<Location>,
    pub created_at: DateTime<Utc>,
    /// Optimistic concurrency token, bumped by the store on every write.
    pub revision: u64,
}

impl Guild {
    pub fn new(name: String, tag: Option<String>, leader: ActorId, now: DateTime<Utc>) -> Self {
        Self {
            id: GuildId::new(),
            name,
            tag,
            description: None,
            leader,
            level: 1,
            balance: Money::ZERO,
            frozen: false,
            home: None,
            created_at: now,
            revision: 0,
        }
    }

    pub fn member_capacity(&self, settings: &GuildSettings) -> usize {
        settings.member_capacity(self.level)
    }
}

/// A membership row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuildMember {
    pub guild: GuildId,
    pub actor: ActorId,
    pub name: String,
    pub role: GuildRole,
    pub joined_at: DateTime<Utc>,
}

impl GuildMember {
    pub fn new(
        guild: GuildId,
        actor: ActorId,
        name: impl Into<String>,
        role: GuildRole,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            guild,
            actor,
            name: name.into(),
            role,
            joined_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_capabilities() {
        assert!(GuildRole::Leader.can_delete_guild());
        assert!(!GuildRole::Officer.can_delete_guild());
        assert!(GuildRole::Officer.can_invite());
        assert!(!GuildRole::Member.can_invite());
        assert!(GuildRole::Officer.can_kick());
        assert!(!GuildRole::Officer.can_manage_roles());
        assert!(!GuildRole::Member.can_manage_relations());
    }

    #[test]
    fn test_role_ordering() {
        assert!(GuildRole::Leader.outranks(GuildRole::Officer));
        assert!(GuildRole::Officer.outranks(GuildRole::Member));
        assert!(!GuildRole::Officer.outranks(GuildRole::Officer));
    }

    #[test]
    fn test_money_display_and_arithmetic() {
        assert_eq!(Money(12_345).to_string(), "123.45");
        assert_eq!(Money(5).checked_sub(Money(6)), None);
        assert_eq!(Money(5).checked_add(Money(6)), Some(Money(11)));
    }
}
