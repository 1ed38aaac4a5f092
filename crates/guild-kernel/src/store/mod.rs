//! Persistence collaborator.
//!
//! Every call returns a boxed `'static` future; completions run on whatever
//! thread polls them, never assumed to be an owner. The store is the
//! authority for two invariants this layer cannot check atomically itself:
//! unique guild names and at most one open relation per guild pair.

mod memory;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use thiserror::Error;

use crate::error::{Entity, GuildError};
use crate::guild::{Guild, GuildMember, GuildRole};
use crate::ids::{ActorId, GuildId, RelationId};
use crate::relation::{GuildRelation, RelationStatus};

pub use memory::MemoryStore;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("unique constraint violated for {0}")]
    UniqueViolation(Entity),

    #[error("{0} missing")]
    Missing(Entity),

    #[error("stale revision: expected {expected}, found {found}")]
    StaleRevision { expected: u64, found: u64 },

    #[error("status changed: expected {expected}, found {found}")]
    StatusChanged {
        expected: RelationStatus,
        found: RelationStatus,
    },

    #[error("capacity of {0} reached")]
    CapacityReached(usize),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl From<StoreError> for GuildError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::UniqueViolation(entity) => GuildError::AlreadyExists(entity),
            StoreError::Missing(entity) => GuildError::NotFound(entity),
            StoreError::StaleRevision { .. } | StoreError::StatusChanged { .. } => {
                GuildError::ConcurrencyConflict
            }
            StoreError::CapacityReached(capacity) => GuildError::GuildFull { capacity },
            StoreError::Unavailable(reason) => GuildError::Internal(reason),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
pub type StoreFuture<T> = BoxFuture<'static, StoreResult<T>>;

/// Asynchronous guild, membership and relation persistence.
pub trait GuildStore: Send + Sync {
    /// Insert a guild with its leader. Names are unique, case-insensitively.
    fn create_guild(&self, guild: Guild, leader: GuildMember) -> StoreFuture<Guild>;
    fn load_guild(&self, id: GuildId) -> StoreFuture<Guild>;
    fn find_guild_by_name(&self, name: String) -> StoreFuture<Option<Guild>>;
    /// Write `guild` if its revision matches the stored one; bumps the revision.
    fn update_guild(&self, guild: Guild) -> StoreFuture<Guild>;
    /// Remove a guild with its memberships and relations.
    fn delete_guild(&self, id: GuildId) -> StoreFuture<()>;

    /// Add a member unless the actor already belongs to a guild or the
    /// guild already holds `capacity` members.
    fn add_member(&self, member: GuildMember, capacity: usize) -> StoreFuture<GuildMember>;
    fn remove_member(&self, guild: GuildId, actor: ActorId) -> StoreFuture<()>;
    fn update_member_role(
        &self,
        guild: GuildId,
        actor: ActorId,
        role: GuildRole,
    ) -> StoreFuture<GuildMember>;
    fn membership(&self, actor: ActorId) -> StoreFuture<Option<GuildMember>>;
    fn members(&self, guild: GuildId) -> StoreFuture<Vec<GuildMember>>;

    /// Insert a relation unless the pair already has one open at `now`.
    fn create_relation(&self, relation: GuildRelation, now: DateTime<Utc>) -> StoreFuture<GuildRelation>;
    fn load_relation(&self, id: RelationId) -> StoreFuture<GuildRelation>;
    /// The pair's open relation at `now`, if any.
    fn relation_between(
        &self,
        a: GuildId,
        b: GuildId,
        now: DateTime<Utc>,
    ) -> StoreFuture<Option<GuildRelation>>;
    fn relations_of(&self, guild: GuildId) -> StoreFuture<Vec<GuildRelation>>;
    /// Compare-and-set on the stored status.
    fn transition_relation(
        &self,
        id: RelationId,
        expected: RelationStatus,
        next: RelationStatus,
        at: DateTime<Utc>,
    ) -> StoreFuture<GuildRelation>;
    /// Atomically remove `old` (which must still be `expected`) and insert
    /// `replacement` for the same pair.
    fn replace_relation(
        &self,
        old: RelationId,
        expected: RelationStatus,
        replacement: GuildRelation,
    ) -> StoreFuture<GuildRelation>;
    fn delete_relation(&self, id: RelationId) -> StoreFuture<GuildRelation>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_errors_map_to_taxonomy() {
        assert_eq!(
            GuildError::from(StoreError::UniqueViolation(Entity::Relation)),
            GuildError::AlreadyExists(Entity::Relation)
        );
        assert_eq!(
            GuildError::from(StoreError::StaleRevision {
                expected: 1,
                found: 2
            }),
            GuildError::ConcurrencyConflict
        );
        assert_eq!(
            GuildError::from(StoreError::StatusChanged {
                expected: RelationStatus::Pending,
                found: RelationStatus::Active
            }),
            GuildError::ConcurrencyConflict
        );
        assert!(matches!(
            GuildError::from(StoreError::Unavailable("down".into())),
            GuildError::Internal(_)
        ));
    }
}
