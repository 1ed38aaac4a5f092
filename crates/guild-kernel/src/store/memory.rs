//! In-memory store.
//!
//! All tables sit behind one mutex, so each call is atomic with respect to
//! every other. Calls run as tokio tasks after an optional artificial
//! latency, which lets tests widen race windows on purpose.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::trace;

use super::{GuildStore, StoreError, StoreFuture, StoreResult};
use crate::error::Entity;
use crate::guild::{Guild, GuildMember, GuildRole};
use crate::ids::{ActorId, GuildId, RelationId};
use crate::relation::{GuildRelation, PairKey, RelationStatus};

#[derive(Debug, Default)]
struct Tables {
    guilds: HashMap<GuildId, Guild>,
    names: HashMap<String, GuildId>,
    members: HashMap<ActorId, GuildMember>,
    relations: HashMap<RelationId, GuildRelation>,
    /// Latest non-terminal relation per pair
    open_pairs: HashMap<PairKey, RelationId>,
}

impl Tables {
    fn unlink_pair(&mut self, relation: &GuildRelation) {
        let pair = relation.pair();
        if self.open_pairs.get(&pair) == Some(&relation.id) {
            self.open_pairs.remove(&pair);
        }
    }

    fn open_relation(&self, pair: PairKey, now: DateTime<Utc>) -> Option<&GuildRelation> {
        self.open_pairs
            .get(&pair)
            .and_then(|id| self.relations.get(id))
            .filter(|relation| relation.is_open(now))
    }
}

#[derive(Debug)]
struct Inner {
    tables: Mutex<Tables>,
    latency: Mutex<Duration>,
    available: AtomicBool,
}

#[derive(Debug, Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn name_key(name: &str) -> String {
    name.trim().to_lowercase()
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                tables: Mutex::new(Tables::default()),
                latency: Mutex::new(Duration::ZERO),
                available: AtomicBool::new(true),
            }),
        }
    }

    /// Delay applied before every call.
    pub fn with_latency(self, latency: Duration) -> Self {
        self.set_latency(latency);
        self
    }

    pub fn set_latency(&self, latency: Duration) {
        *self
            .inner
            .latency
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = latency;
    }

    /// When false every call fails with `Unavailable`.
    pub fn set_available(&self, available: bool) {
        self.inner.available.store(available, Ordering::SeqCst);
    }

    /// Relations currently stored (any status).
    pub fn relation_snapshot(&self) -> Vec<GuildRelation> {
        let tables = self.lock();
        let mut relations: Vec<_> = tables.relations.values().cloned().collect();
        relations.sort_by_key(|r| r.created_at);
        relations
    }

    pub fn guild_count(&self) -> usize {
        self.lock().guilds.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Tables> {
        self.inner
            .tables
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn call<T, F>(&self, name: &'static str, f: F) -> StoreFuture<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Tables) -> StoreResult<T> + Send + 'static,
    {
        let inner = self.inner.clone();
        Box::pin(async move {
            let latency = *inner
                .latency
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if !latency.is_zero() {
                tokio::time::sleep(latency).await;
            }
            if !inner.available.load(Ordering::SeqCst) {
                return Err(StoreError::Unavailable(format!("{} refused", name)));
            }
            trace!(call = name, "Store call");
            let mut tables = inner
                .tables
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            f(&mut *tables)
        })
    }
}

impl GuildStore for MemoryStore {
    fn create_guild(&self, guild: Guild, leader: GuildMember) -> StoreFuture<Guild> {
        self.call("create_guild", move |t| {
            let key = name_key(&guild.name);
            if t.names.contains_key(&key) {
                return Err(StoreError::UniqueViolation(Entity::Guild));
            }
            if t.members.contains_key(&leader.actor) {
                return Err(StoreError::UniqueViolation(Entity::Member));
            }
            let mut guild = guild;
            guild.revision = 1;
            t.names.insert(key, guild.id);
            t.members.insert(leader.actor, leader);
            t.guilds.insert(guild.id, guild.clone());
            Ok(guild)
        })
    }

    fn load_guild(&self, id: GuildId) -> StoreFuture<Guild> {
        self.call("load_guild", move |t| {
            t.guilds.get(&id).cloned().ok_or(StoreError::Missing(Entity::Guild))
        })
    }

    fn find_guild_by_name(&self, name: String) -> StoreFuture<Option<Guild>> {
        self.call("find_guild_by_name", move |t| {
            Ok(t.names
                .get(&name_key(&name))
                .and_then(|id| t.guilds.get(id))
                .cloned())
        })
    }

    fn update_guild(&self, guild: Guild) -> StoreFuture<Guild> {
        self.call("update_guild", move |t| {
            let stored = t.guilds.get(&guild.id).ok_or(StoreError::Missing(Entity::Guild))?;
            if stored.revision != guild.revision {
                return Err(StoreError::StaleRevision {
                    expected: guild.revision,
                    found: stored.revision,
                });
            }
            let old_key = name_key(&stored.name);
            let new_key = name_key(&guild.name);
            if old_key != new_key {
                if t.names.contains_key(&new_key) {
                    return Err(StoreError::UniqueViolation(Entity::Guild));
                }
                t.names.remove(&old_key);
                t.names.insert(new_key, guild.id);
            }
            let mut guild = guild;
            guild.revision += 1;
            t.guilds.insert(guild.id, guild.clone());
            Ok(guild)
        })
    }

    fn delete_guild(&self, id: GuildId) -> StoreFuture<()> {
        self.call("delete_guild", move |t| {
            let guild = t.guilds.remove(&id).ok_or(StoreError::Missing(Entity::Guild))?;
            t.names.remove(&name_key(&guild.name));
            t.members.retain(|_, member| member.guild != id);
            let doomed: Vec<GuildRelation> = t
                .relations
                .values()
                .filter(|relation| relation.involves(id))
                .cloned()
                .collect();
            for relation in doomed {
                t.relations.remove(&relation.id);
                t.unlink_pair(&relation);
            }
            Ok(())
        })
    }

    fn add_member(&self, member: GuildMember, capacity: usize) -> StoreFuture<GuildMember> {
        self.call("add_member", move |t| {
            if !t.guilds.contains_key(&member.guild) {
                return Err(StoreError::Missing(Entity::Guild));
            }
            if t.members.contains_key(&member.actor) {
                return Err(StoreError::UniqueViolation(Entity::Member));
            }
            let size = t.members.values().filter(|m| m.guild == member.guild).count();
            if size >= capacity {
                return Err(StoreError::CapacityReached(capacity));
            }
            t.members.insert(member.actor, member.clone());
            Ok(member)
        })
    }

    fn remove_member(&self, guild: GuildId, actor: ActorId) -> StoreFuture<()> {
        self.call("remove_member", move |t| {
            let belongs = t.members.get(&actor).is_some_and(|m| m.guild == guild);
            if !belongs {
                return Err(StoreError::Missing(Entity::Member));
            }
            t.members.remove(&actor);
            Ok(())
        })
    }

    fn update_member_role(
        &self,
        guild: GuildId,
        actor: ActorId,
        role: GuildRole,
    ) -> StoreFuture<GuildMember> {
        self.call("update_member_role", move |t| match t.members.get_mut(&actor) {
            Some(member) if member.guild == guild => {
                member.role = role;
                Ok(member.clone())
            }
            _ => Err(StoreError::Missing(Entity::Member)),
        })
    }

    fn membership(&self, actor: ActorId) -> StoreFuture<Option<GuildMember>> {
        self.call("membership", move |t| Ok(t.members.get(&actor).cloned()))
    }

    fn members(&self, guild: GuildId) -> StoreFuture<Vec<GuildMember>> {
        self.call("members", move |t| {
            let mut members: Vec<_> = t
                .members
                .values()
                .filter(|m| m.guild == guild)
                .cloned()
                .collect();
            members.sort_by_key(|m| m.joined_at);
            Ok(members)
        })
    }

    fn create_relation(&self, relation: GuildRelation, now: DateTime<Utc>) -> StoreFuture<GuildRelation> {
        self.call("create_relation", move |t| {
            if !t.guilds.contains_key(&relation.guild1) || !t.guilds.contains_key(&relation.guild2) {
                return Err(StoreError::Missing(Entity::Guild));
            }
            let pair = relation.pair();
            if t.open_relation(pair, now).is_some() {
                return Err(StoreError::UniqueViolation(Entity::Relation));
            }
            t.open_pairs.insert(pair, relation.id);
            t.relations.insert(relation.id, relation.clone());
            Ok(relation)
        })
    }

    fn load_relation(&self, id: RelationId) -> StoreFuture<GuildRelation> {
        self.call("load_relation", move |t| {
            t.relations
                .get(&id)
                .cloned()
                .ok_or(StoreError::Missing(Entity::Relation))
        })
    }

    fn relation_between(
        &self,
        a: GuildId,
        b: GuildId,
        now: DateTime<Utc>,
    ) -> StoreFuture<Option<GuildRelation>> {
        self.call("relation_between", move |t| {
            Ok(t.open_relation(PairKey::new(a, b), now).cloned())
        })
    }

    fn relations_of(&self, guild: GuildId) -> StoreFuture<Vec<GuildRelation>> {
        self.call("relations_of", move |t| {
            let mut relations: Vec<_> = t
                .relations
                .values()
                .filter(|r| r.involves(guild))
                .cloned()
                .collect();
            relations.sort_by_key(|r| r.created_at);
            Ok(relations)
        })
    }

    fn transition_relation(
        &self,
        id: RelationId,
        expected: RelationStatus,
        next: RelationStatus,
        at: DateTime<Utc>,
    ) -> StoreFuture<GuildRelation> {
        self.call("transition_relation", move |t| {
            let relation = t
                .relations
                .get_mut(&id)
                .ok_or(StoreError::Missing(Entity::Relation))?;
            if relation.status != expected {
                return Err(StoreError::StatusChanged {
                    expected,
                    found: relation.status,
                });
            }
            relation.status = next;
            relation.updated_at = at;
            let updated = relation.clone();
            if next.is_terminal() {
                t.unlink_pair(&updated);
            }
            Ok(updated)
        })
    }

    fn replace_relation(
        &self,
        old: RelationId,
        expected: RelationStatus,
        replacement: GuildRelation,
    ) -> StoreFuture<GuildRelation> {
        self.call("replace_relation", move |t| {
            let current = t
                .relations
                .get(&old)
                .ok_or(StoreError::Missing(Entity::Relation))?;
            if current.status != expected {
                return Err(StoreError::StatusChanged {
                    expected,
                    found: current.status,
                });
            }
            if let Some(removed) = t.relations.remove(&old) {
                t.unlink_pair(&removed);
            }
            t.open_pairs.insert(replacement.pair(), replacement.id);
            t.relations.insert(replacement.id, replacement.clone());
            Ok(replacement)
        })
    }

    fn delete_relation(&self, id: RelationId) -> StoreFuture<GuildRelation> {
        self.call("delete_relation", move |t| {
            let removed = t
                .relations
                .remove(&id)
                .ok_or(StoreError::Missing(Entity::Relation))?;
            t.unlink_pair(&removed);
            Ok(removed)
        })
    }
}
