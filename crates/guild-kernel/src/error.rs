//! Error taxonomy surfaced by guild operations.
//!
//! Every variant maps to a stable machine-readable code through
//! [`GuildError::code`]. Presentation layers translate codes into text; the
//! kernel never formats user-facing strings itself.

use std::fmt;

use thiserror::Error;

use crate::guild::Money;

/// Kinds of records an operation can refer to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Entity {
    Guild,
    Member,
    Relation,
    Actor,
    Invite,
    Confirmation,
}

impl Entity {
    pub fn code(self) -> &'static str {
        match self {
            Entity::Guild => "guild",
            Entity::Member => "member",
            Entity::Relation => "relation",
            Entity::Actor => "actor",
            Entity::Invite => "invite",
            Entity::Confirmation => "confirmation",
        }
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Errors produced by guild and relation operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GuildError {
    #[error("{0} not found")]
    NotFound(Entity),

    #[error("cannot {action} while {from}")]
    InvalidTransition {
        action: &'static str,
        from: &'static str,
    },

    #[error("{0} already exists")]
    AlreadyExists(Entity),

    #[error("permission denied: {0}")]
    PermissionDenied(&'static str),

    #[error("write lost a race against a concurrent update")]
    ConcurrencyConflict,

    #[error("scheduler unavailable for {affinity}: {reason}")]
    SchedulerUnavailable {
        affinity: &'static str,
        reason: String,
    },

    #[error("a guild cannot hold a relation with itself")]
    SelfRelation,

    #[error("actor already belongs to a guild")]
    AlreadyInGuild,

    #[error("actor does not belong to a guild")]
    NotInGuild,

    #[error("guild is at member capacity ({capacity})")]
    GuildFull { capacity: usize },

    #[error("guild is frozen")]
    GuildFrozen,

    #[error("insufficient funds: need {needed}, have {available}")]
    InsufficientFunds { needed: Money, available: Money },

    #[error("guild is already at maximum level {0}")]
    MaxLevel(u8),

    #[error("invalid name: {0}")]
    InvalidName(&'static str),

    #[error("internal failure: {0}")]
    Internal(String),
}

impl GuildError {
    /// Stable code for presentation lookup.
    pub fn code(&self) -> &'static str {
        match self {
            GuildError::NotFound(_) => "error.not_found",
            GuildError::InvalidTransition { .. } => "error.invalid_transition",
            GuildError::AlreadyExists(_) => "error.already_exists",
            GuildError::PermissionDenied(_) => "error.permission_denied",
            GuildError::ConcurrencyConflict => "error.concurrency_conflict",
            GuildError::SchedulerUnavailable { .. } => "error.scheduler_unavailable",
            GuildError::SelfRelation => "error.self_relation",
            GuildError::AlreadyInGuild => "error.already_in_guild",
            GuildError::NotInGuild => "error.not_in_guild",
            GuildError::GuildFull { .. } => "error.guild_full",
            GuildError::GuildFrozen => "error.guild_frozen",
            GuildError::InsufficientFunds { .. } => "error.insufficient_funds",
            GuildError::MaxLevel(_) => "error.max_level",
            GuildError::InvalidName(_) => "error.invalid_name",
            GuildError::Internal(_) => "error.internal",
        }
    }

    pub fn internal(reason: impl Into<String>) -> Self {
        GuildError::Internal(reason.into())
    }
}

/// Result alias for guild operations.
pub type GuildResult<T> = Result<T, GuildError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_messages() {
        assert_eq!(
            GuildError::NotFound(Entity::Relation).to_string(),
            "relation not found"
        );
        assert_eq!(
            GuildError::InvalidTransition {
                action: "accept",
                from: "active"
            }
            .to_string(),
            "cannot accept while active"
        );
        assert_eq!(
            GuildError::AlreadyExists(Entity::Relation).to_string(),
            "relation already exists"
        );
    }

    #[test]
    fn test_codes_are_distinct_per_kind() {
        let errors = [
            GuildError::NotFound(Entity::Guild),
            GuildError::AlreadyExists(Entity::Guild),
            GuildError::PermissionDenied("role"),
            GuildError::ConcurrencyConflict,
            GuildError::SelfRelation,
            GuildError::Internal("boom".into()),
        ];
        let mut codes: Vec<_> = errors.iter().map(GuildError::code).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<GuildError>();
    }
}
