//! Owner-bound view of guilds, memberships and relations.
//!
//! The directory is the in-memory state the routing layer protects. It is
//! written only from pipeline continuations running on the global
//! authority, and every accessor asserts that.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::affinity::AuthorityCell;
use crate::guild::{Guild, GuildMember, GuildRole};
use crate::ids::{ActorId, GuildId, RelationId};
use crate::relation::GuildRelation;

#[derive(Debug, Default)]
struct Tables {
    guilds: HashMap<GuildId, Guild>,
    members: HashMap<ActorId, GuildMember>,
    relations: HashMap<RelationId, GuildRelation>,
}

#[derive(Debug)]
pub struct GuildDirectory {
    tables: AuthorityCell<Tables>,
}

impl Default for GuildDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl GuildDirectory {
    pub fn new() -> Self {
        Self {
            tables: AuthorityCell::new("guild directory", Tables::default()),
        }
    }

    pub fn guild(&self, id: GuildId) -> Option<Guild> {
        self.tables.with(|t| t.guilds.get(&id).cloned())
    }

    pub fn guild_by_name(&self, name: &str) -> Option<Guild> {
        let wanted = name.trim().to_lowercase();
        self.tables.with(|t| {
            t.guilds
                .values()
                .find(|g| g.name.to_lowercase() == wanted)
                .cloned()
        })
    }

    pub fn guilds(&self) -> Vec<Guild> {
        self.tables.with(|t| {
            let mut guilds: Vec<_> = t.guilds.values().cloned().collect();
            guilds.sort_by(|a, b| a.name.cmp(&b.name));
            guilds
        })
    }

    pub fn upsert_guild(&self, guild: Guild) {
        self.tables.with(|t| {
            t.guilds.insert(guild.id, guild);
        });
    }

    /// Drop a guild with its memberships and relations.
    pub fn remove_guild(&self, id: GuildId) -> Vec<ActorId> {
        self.tables.with(|t| {
            t.guilds.remove(&id);
            let former: Vec<ActorId> = t
                .members
                .values()
                .filter(|m| m.guild == id)
                .map(|m| m.actor)
                .collect();
            for actor in &former {
                t.members.remove(actor);
            }
            t.relations.retain(|_, r| !r.involves(id));
            former
        })
    }

    pub fn membership(&self, actor: ActorId) -> Option<GuildMember> {
        self.tables.with(|t| t.members.get(&actor).cloned())
    }

    pub fn members(&self, guild: GuildId) -> Vec<GuildMember> {
        self.tables.with(|t| {
            let mut members: Vec<_> = t
                .members
                .values()
                .filter(|m| m.guild == guild)
                .cloned()
                .collect();
            members.sort_by_key(|m| m.joined_at);
            members
        })
    }

    pub fn member_count(&self, guild: GuildId) -> usize {
        self.tables
            .with(|t| t.members.values().filter(|m| m.guild == guild).count())
    }

    pub fn upsert_member(&self, member: GuildMember) {
        self.tables.with(|t| {
            t.members.insert(member.actor, member);
        });
    }

    pub fn remove_member(&self, actor: ActorId) -> Option<GuildMember> {
        self.tables.with(|t| t.members.remove(&actor))
    }

    pub fn set_role(&self, actor: ActorId, role: GuildRole) {
        self.tables.with(|t| {
            if let Some(member) = t.members.get_mut(&actor) {
                member.role = role;
            }
        });
    }

    pub fn relation(&self, id: RelationId) -> Option<GuildRelation> {
        self.tables.with(|t| t.relations.get(&id).cloned())
    }

    pub fn relations_of(&self, guild: GuildId) -> Vec<GuildRelation> {
        self.tables.with(|t| {
            let mut relations: Vec<_> = t
                .relations
                .values()
                .filter(|r| r.involves(guild))
                .cloned()
                .collect();
            relations.sort_by_key(|r| r.created_at);
            relations
        })
    }

    pub fn upsert_relation(&self, relation: GuildRelation) {
        self.tables.with(|t| {
            t.relations.insert(relation.id, relation);
        });
    }

    pub fn remove_relation(&self, id: RelationId) -> Option<GuildRelation> {
        self.tables.with(|t| t.relations.remove(&id))
    }

    /// Remove and return every cached relation that reads as expired at `now`.
    pub fn take_expired(&self, now: DateTime<Utc>) -> Vec<GuildRelation> {
        self.tables.with(|t| {
            let expired: Vec<RelationId> = t
                .relations
                .values()
                .filter(|r| !r.is_open(now) && r.expires_at < now)
                .map(|r| r.id)
                .collect();
            expired
                .iter()
                .filter_map(|id| t.relations.remove(id))
                .collect()
        })
    }

    pub fn clear(&self) {
        self.tables.with(|t| {
            t.guilds.clear();
            t.members.clear();
            t.relations.clear();
        });
    }
}
