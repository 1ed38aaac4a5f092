//! Inter-guild relation model and transition rules.
//!
//! ```text
//! PENDING ──accept──▶ ACTIVE ──delete──▶ (removed)
//!    │                  │
//!    ├─reject/cancel─▶ CANCELLED
//!    │                  └─propose truce / end truce──▶ replaced atomically
//!    │
//!  any ──now > expires_at──▶ EXPIRED   (derived at read time)
//! ```
//!
//! Everything in this module is pure: the rules take the relation, the
//! acting member and the current time, and answer yes or which error.
//! Persistence and routing live in [`service`].

pub mod service;

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{GuildError, GuildResult};
use crate::guild::{Guild, GuildMember};
use crate::ids::{ActorId, GuildId, RelationId};

pub use service::RelationService;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationType {
    Ally,
    Enemy,
    War,
    Truce,
    Neutral,
}

impl RelationType {
    pub fn code(self) -> &'static str {
        match self {
            RelationType::Ally => "ally",
            RelationType::Enemy => "enemy",
            RelationType::War => "war",
            RelationType::Truce => "truce",
            RelationType::Neutral => "neutral",
        }
    }

    /// Types a guild may open directly. Truce and neutral only arise from
    /// the war and truce flows.
    pub fn is_proposable(self) -> bool {
        matches!(self, RelationType::Ally | RelationType::Enemy | RelationType::War)
    }
}

impl fmt::Display for RelationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationStatus {
    Pending,
    Active,
    Cancelled,
    Expired,
}

impl RelationStatus {
    pub fn code(self) -> &'static str {
        match self {
            RelationStatus::Pending => "pending",
            RelationStatus::Active => "active",
            RelationStatus::Cancelled => "cancelled",
            RelationStatus::Expired => "expired",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RelationStatus::Cancelled | RelationStatus::Expired)
    }
}

impl fmt::Display for RelationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Unordered guild pair, normalised so `(a, b)` and `(b, a)` compare equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PairKey(GuildId, GuildId);

impl PairKey {
    pub fn new(a: GuildId, b: GuildId) -> Self {
        if a <= b {
            PairKey(a, b)
        } else {
            PairKey(b, a)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuildRelation {
    pub id: RelationId,
    pub guild1: GuildId,
    pub guild2: GuildId,
    pub kind: RelationType,
    /// Stored status; read through [`GuildRelation::effective_status`]
    pub status: RelationStatus,
    pub initiator_guild: GuildId,
    pub initiated_by: ActorId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl GuildRelation {
    /// New `PENDING` relation opened by `initiator_guild`.
    pub fn propose(
        initiator_guild: GuildId,
        target_guild: GuildId,
        kind: RelationType,
        initiated_by: ActorId,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Self {
        Self {
            id: RelationId::new(),
            guild1: initiator_guild,
            guild2: target_guild,
            kind,
            status: RelationStatus::Pending,
            initiator_guild,
            initiated_by,
            created_at: now,
            updated_at: now,
            expires_at: now + ttl,
        }
    }

    pub fn pair(&self) -> PairKey {
        PairKey::new(self.guild1, self.guild2)
    }

    pub fn involves(&self, guild: GuildId) -> bool {
        self.guild1 == guild || self.guild2 == guild
    }

    pub fn counterpart_of(&self, guild: GuildId) -> Option<GuildId> {
        if guild == self.guild1 {
            Some(self.guild2)
        } else if guild == self.guild2 {
            Some(self.guild1)
        } else {
            None
        }
    }

    /// The guild that did not open this relation.
    pub fn counterpart_guild(&self) -> GuildId {
        self.counterpart_of(self.initiator_guild).unwrap_or(self.guild2)
    }

    /// Status as every reader must see it: expired once `now` passes
    /// `expires_at`, whatever is stored.
    pub fn effective_status(&self, now: DateTime<Utc>) -> RelationStatus {
        if now > self.expires_at {
            RelationStatus::Expired
        } else {
            self.status
        }
    }

    /// `PENDING` or `ACTIVE` at `now`.
    pub fn is_open(&self, now: DateTime<Utc>) -> bool {
        !self.effective_status(now).is_terminal()
    }

    /// Copy with the effective status written into `status`.
    pub fn as_seen_at(&self, now: DateTime<Utc>) -> Self {
        let mut seen = self.clone();
        seen.status = self.effective_status(now);
        seen
    }
}

/// Member-initiated actions on an existing relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationAction {
    Accept,
    Reject,
    Cancel,
    ProposeTruce,
    EndTruce,
    Delete,
}

impl RelationAction {
    pub fn code(self) -> &'static str {
        match self {
            RelationAction::Accept => "accept",
            RelationAction::Reject => "reject",
            RelationAction::Cancel => "cancel",
            RelationAction::ProposeTruce => "propose_truce",
            RelationAction::EndTruce => "end_truce",
            RelationAction::Delete => "delete",
        }
    }
}

fn invalid(action: RelationAction, from: RelationStatus) -> GuildError {
    GuildError::InvalidTransition {
        action: action.code(),
        from: from.code(),
    }
}

/// Decide whether `member` may perform `action` on `relation` at `now`.
pub fn authorize(
    action: RelationAction,
    relation: &GuildRelation,
    member: &GuildMember,
    now: DateTime<Utc>,
) -> GuildResult<()> {
    if !relation.involves(member.guild) {
        return Err(GuildError::PermissionDenied("not a party to this relation"));
    }
    if !member.role.can_manage_relations() {
        return Err(GuildError::PermissionDenied("role cannot manage relations"));
    }

    let status = relation.effective_status(now);
    let own_side = member.guild == relation.initiator_guild;

    match action {
        RelationAction::Accept | RelationAction::Reject => {
            if status != RelationStatus::Pending {
                return Err(invalid(action, status));
            }
            if own_side {
                return Err(GuildError::PermissionDenied("initiator cannot answer own proposal"));
            }
        }
        RelationAction::Cancel => {
            if status != RelationStatus::Pending {
                return Err(invalid(action, status));
            }
            if !own_side {
                return Err(GuildError::PermissionDenied("only the initiator may withdraw"));
            }
        }
        RelationAction::ProposeTruce => {
            if status != RelationStatus::Active || relation.kind != RelationType::War {
                return Err(invalid(action, status));
            }
        }
        RelationAction::EndTruce => {
            if status != RelationStatus::Active || relation.kind != RelationType::Truce {
                return Err(invalid(action, status));
            }
        }
        RelationAction::Delete => {
            if status != RelationStatus::Active {
                return Err(invalid(action, status));
            }
            if matches!(relation.kind, RelationType::War | RelationType::Truce) {
                return Err(GuildError::InvalidTransition {
                    action: action.code(),
                    from: relation.kind.code(),
                });
            }
        }
    }
    Ok(())
}

/// Rules for opening a relation from `from` towards `to`.
pub fn validate_proposal(
    from: &Guild,
    to: &Guild,
    kind: RelationType,
    member: &GuildMember,
) -> GuildResult<()> {
    if member.guild != from.id {
        return Err(GuildError::PermissionDenied("not a member of the proposing guild"));
    }
    if !member.role.can_manage_relations() {
        return Err(GuildError::PermissionDenied("role cannot manage relations"));
    }
    if from.id == to.id {
        return Err(GuildError::SelfRelation);
    }
    if !kind.is_proposable() {
        return Err(GuildError::InvalidTransition {
            action: "propose",
            from: kind.code(),
        });
    }
    if from.frozen || to.frozen {
        return Err(GuildError::GuildFrozen);
    }
    Ok(())
}
