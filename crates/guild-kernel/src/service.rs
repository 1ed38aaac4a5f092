//! Guild lifecycle, membership, bank and progression.
//!
//! Same shape as the relation flows: rules are checked on the global
//! authority against the cached aggregate, one store write is issued, and
//! the confirmed result is applied back on the authority. Economy calls are
//! owner-affine, so they happen inside owner steps too; when a write loses a
//! race the economy side is compensated in the continuation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use futures::TryFutureExt;
use regex::Regex;
use tokio::sync::oneshot;
use tracing::{debug, error, info};

use crate::affinity::AuthorityCell;
use crate::config::GuildSettings;
use crate::confirm::{ConfirmOutcome, ConfirmTarget};
use crate::context::ServiceContext;
use crate::error::{Entity, GuildError, GuildResult};
use crate::guild::{Guild, GuildMember, GuildRole, Money};
use crate::ids::{ActorId, GuildId, Location};
use crate::pipeline::OpContext;
use crate::presenter::Notice;
use crate::scheduler::TaskHandle;

fn name_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^[\p{L}\p{N}_-]+(?: [\p{L}\p{N}_-]+)*$").ok())
        .as_ref()
}

fn tag_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^[\p{L}\p{N}]+$").ok())
        .as_ref()
}

/// Check a guild name and optional tag against the configured limits.
///
/// Names are words of letters, digits, `_` or `-` separated by single
/// spaces. Tags are letters and digits only.
pub fn validate_name(settings: &GuildSettings, name: &str, tag: Option<&str>) -> GuildResult<()> {
    let name = name.trim();
    let length = name.chars().count();
    if length < settings.name_min_len {
        return Err(GuildError::InvalidName("name too short"));
    }
    if length > settings.name_max_len {
        return Err(GuildError::InvalidName("name too long"));
    }
    if !name_pattern().is_some_and(|re| re.is_match(name)) {
        return Err(GuildError::InvalidName("name has illegal characters"));
    }
    if let Some(tag) = tag {
        if tag.is_empty() || tag.chars().count() > settings.tag_max_len {
            return Err(GuildError::InvalidName("tag length"));
        }
        if !tag_pattern().is_some_and(|re| re.is_match(tag)) {
            return Err(GuildError::InvalidName("tag has illegal characters"));
        }
    }
    Ok(())
}

#[derive(Debug)]
struct Invite {
    inviter: ActorId,
    generation: u64,
    timer: TaskHandle,
}

/// Outstanding invites keyed by (invitee, guild). Owner only.
#[derive(Debug)]
struct InviteBook {
    entries: AuthorityCell<HashMap<(ActorId, GuildId), Invite>>,
    generation: AtomicU64,
}

impl InviteBook {
    fn new() -> Self {
        Self {
            entries: AuthorityCell::new("invite book", HashMap::new()),
            generation: AtomicU64::new(0),
        }
    }

    fn contains(&self, invitee: ActorId, guild: GuildId) -> bool {
        self.entries.with(|e| e.contains_key(&(invitee, guild)))
    }

    fn insert(&self, invitee: ActorId, guild: GuildId, inviter: ActorId, timer: TaskHandle, generation: u64) {
        self.entries.with(|e| {
            e.insert(
                (invitee, guild),
                Invite {
                    inviter,
                    generation,
                    timer,
                },
            );
        });
    }

    fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn take(&self, invitee: ActorId, guild: GuildId) -> Option<Invite> {
        let invite = self.entries.with(|e| e.remove(&(invitee, guild)))?;
        invite.timer.cancel();
        Some(invite)
    }

    fn expire(&self, invitee: ActorId, guild: GuildId, generation: u64) -> bool {
        self.entries.with(|e| {
            let current = e.get(&(invitee, guild)).map(|i| i.generation);
            current == Some(generation) && e.remove(&(invitee, guild)).is_some()
        })
    }

    /// Drop invites sent to or by `actor`, and invites into `guild` if given.
    fn purge(&self, actor: Option<ActorId>, guild: Option<GuildId>) -> usize {
        self.entries.with(|e| {
            let before = e.len();
            e.retain(|(invitee, invited_to), invite| {
                let doomed = Some(*invitee) == actor
                    || Some(invite.inviter) == actor
                    || Some(*invited_to) == guild;
                if doomed {
                    invite.timer.cancel();
                }
                !doomed
            });
            before - e.len()
        })
    }
}

#[derive(Debug, Clone)]
pub struct GuildService {
    cx: Arc<ServiceContext>,
    invites: Arc<InviteBook>,
}

impl GuildService {
    pub fn new(cx: Arc<ServiceContext>) -> Self {
        Self {
            cx,
            invites: Arc::new(InviteBook::new()),
        }
    }

    pub async fn create_guild(
        &self,
        actor: ActorId,
        name: &str,
        tag: Option<&str>,
    ) -> GuildResult<Guild> {
        let ctx = OpContext::new("guild.create").by(actor).on(name);
        let result = self.create_inner(&ctx, actor, name, tag).await;
        self.cx.surface(&ctx, result)
    }

    async fn create_inner(
        &self,
        ctx: &OpContext,
        actor: ActorId,
        name: &str,
        tag: Option<&str>,
    ) -> GuildResult<Guild> {
        validate_name(&self.cx.settings, name, tag)?;
        let name = name.trim().to_string();
        let tag = tag.map(str::to_uppercase);
        let cost = self.cx.settings.creation_cost;
        let now = self.cx.clock.now();

        let cx = self.cx.clone();
        let lookup = name.clone();
        self.cx
            .pipeline
            .on_owner(ctx, move || {
                if cx.directory.membership(actor).is_some() {
                    return Err(GuildError::AlreadyInGuild);
                }
                if cx.directory.guild_by_name(&lookup).is_some() {
                    return Err(GuildError::AlreadyExists(Entity::Guild));
                }
                if !cost.is_zero() {
                    cx.economy.withdraw(actor, cost)?;
                }
                Ok(())
            })
            .await?;

        let display = self
            .cx
            .locator
            .name_of(actor)
            .unwrap_or_else(|| actor.to_string());
        let guild = Guild::new(name, tag, actor, now);
        let leader = GuildMember::new(guild.id, actor, display, GuildRole::Leader, now);

        let cx = self.cx.clone();
        self.cx
            .pipeline
            .run(
                ctx.clone(),
                self.cx.store.create_guild(guild, leader.clone()).map_err(GuildError::from),
                move |outcome| match outcome {
                    Ok(guild) => {
                        cx.directory.upsert_guild(guild.clone());
                        cx.directory.upsert_member(leader);
                        cx.presenter.notify(
                            actor,
                            Notice::new("guild.created")
                                .arg("guild", &guild.name)
                                .arg("cost", cx.economy.format(cost)),
                        );
                        cx.presenter.refresh(guild.id);
                        info!(guild = %guild.id, name = %guild.name, leader = %actor, "Guild created");
                        Ok(guild)
                    }
                    Err(e) => {
                        if !cost.is_zero() {
                            if let Err(refund) = cx.economy.deposit(actor, cost) {
                                error!(actor = %actor, error = %refund, "Creation refund failed");
                            }
                        }
                        Err(e)
                    }
                },
            )
            .await
    }

    /// Leader disband, guarded by the confirmation protocol.
    pub async fn disband_guild(&self, actor: ActorId) -> GuildResult<ConfirmOutcome> {
        let ctx = OpContext::new("guild.disband").by(actor);
        let result = self.disband_inner(&ctx, actor).await;
        self.cx.surface(&ctx, result)
    }

    async fn disband_inner(&self, ctx: &OpContext, actor: ActorId) -> GuildResult<ConfirmOutcome> {
        let cx = self.cx.clone();
        let (guild, outcome) = self
            .cx
            .pipeline
            .on_owner(ctx, move || {
                let member = cx.member_of(actor)?;
                if !member.role.can_delete_guild() {
                    return Err(GuildError::PermissionDenied("only the leader may disband"));
                }
                let outcome = cx
                    .confirmations
                    .request(actor, ConfirmTarget::DisbandGuild(member.guild));
                Ok((member.guild, outcome))
            })
            .await?;

        if outcome == ConfirmOutcome::Confirmed {
            self.disband_now(ctx, guild).await?;
        }
        Ok(outcome)
    }

    /// Administrative disband with no role check or confirmation.
    pub async fn admin_disband(&self, guild: GuildId) -> GuildResult<()> {
        let ctx = OpContext::new("guild.admin_disband").on(guild);
        let result = self.disband_now(&ctx, guild).await;
        self.cx.surface(&ctx, result)
    }

    pub(crate) async fn disband_now(&self, ctx: &OpContext, guild: GuildId) -> GuildResult<()> {
        let cx = self.cx.clone();
        let invites = self.invites.clone();
        self.cx
            .pipeline
            .run(
                ctx.clone(),
                self.cx.store.delete_guild(guild).map_err(GuildError::from),
                move |outcome| {
                    outcome?;
                    let snapshot = cx.directory.guild(guild);
                    let former = cx.directory.remove_guild(guild);
                    invites.purge(None, Some(guild));

                    if let Some(snapshot) = &snapshot {
                        if !snapshot.balance.is_zero() {
                            if let Err(e) = cx.economy.deposit(snapshot.leader, snapshot.balance) {
                                error!(guild = %guild, error = %e, "Bank payout on disband failed");
                            }
                        }
                    }
                    let name = snapshot.map(|g| g.name).unwrap_or_default();
                    for actor in &former {
                        cx.presenter
                            .notify(*actor, Notice::new("guild.disbanded").arg("guild", &name));
                    }
                    cx.presenter.refresh(guild);
                    info!(guild = %guild, members = former.len(), "Guild disbanded");
                    Ok(())
                },
            )
            .await
    }

    pub async fn invite(&self, actor: ActorId, invitee: ActorId) -> GuildResult<()> {
        let ctx = OpContext::new("guild.invite").by(actor).on(invitee);
        let cx = self.cx.clone();
        let invites = self.invites.clone();
        let timeout = self.cx.settings.invite_timeout_ticks;
        let settings = self.cx.settings.clone();

        let result = self
            .cx
            .pipeline
            .on_owner(&ctx, move || {
                let member = cx.member_of(actor)?;
                if !member.role.can_invite() {
                    return Err(GuildError::PermissionDenied("role cannot invite"));
                }
                if cx.locator.name_of(invitee).is_none() {
                    return Err(GuildError::NotFound(Entity::Actor));
                }
                if cx.directory.membership(invitee).is_some() {
                    return Err(GuildError::AlreadyInGuild);
                }
                let guild = cx.guild_of(member.guild)?;
                let capacity = guild.member_capacity(&settings);
                if cx.directory.member_count(guild.id) >= capacity {
                    return Err(GuildError::GuildFull { capacity });
                }
                if invites.contains(invitee, guild.id) {
                    return Err(GuildError::AlreadyExists(Entity::Invite));
                }

                let generation = invites.next_generation();
                let book = invites.clone();
                let expiry_cx = cx.clone();
                let guild_id = guild.id;
                let timer = cx.router().run_later(
                    move || {
                        if book.expire(invitee, guild_id, generation) {
                            debug!(invitee = %invitee, guild = %guild_id, "Invite expired");
                            expiry_cx
                                .presenter
                                .notify(invitee, Notice::new("guild.invite_expired"));
                        }
                    },
                    timeout,
                );
                invites.insert(invitee, guild.id, actor, timer, generation);

                cx.presenter
                    .notify(invitee, Notice::new("guild.invited").arg("guild", &guild.name));
                cx.presenter
                    .notify(actor, Notice::new("guild.invite_sent").arg("guild", &guild.name));
                Ok(())
            })
            .await;
        self.cx.surface(&ctx, result)
    }

    /// Accept an outstanding invite.
    pub async fn join(&self, actor: ActorId, guild: GuildId) -> GuildResult<GuildMember> {
        let ctx = OpContext::new("guild.join").by(actor).on(guild);
        let result = self.join_inner(&ctx, actor, guild).await;
        self.cx.surface(&ctx, result)
    }

    async fn join_inner(&self, ctx: &OpContext, actor: ActorId, guild: GuildId) -> GuildResult<GuildMember> {
        let now = self.cx.clock.now();
        let display = self
            .cx
            .locator
            .name_of(actor)
            .unwrap_or_else(|| actor.to_string());

        let cx = self.cx.clone();
        let invites = self.invites.clone();
        let settings = self.cx.settings.clone();
        let capacity = self
            .cx
            .pipeline
            .on_owner(ctx, move || {
                if cx.directory.membership(actor).is_some() {
                    return Err(GuildError::AlreadyInGuild);
                }
                invites
                    .take(actor, guild)
                    .ok_or(GuildError::NotFound(Entity::Invite))?;
                // The guild may have been disbanded or shrunk since the invite
                let target = cx.guild_of(guild)?;
                let capacity = target.member_capacity(&settings);
                if cx.directory.member_count(guild) >= capacity {
                    return Err(GuildError::GuildFull { capacity });
                }
                Ok(capacity)
            })
            .await?;

        let member = GuildMember::new(guild, actor, display, GuildRole::Member, now);
        let cx = self.cx.clone();
        self.cx
            .pipeline
            .run(
                ctx.clone(),
                self.cx.store.add_member(member, capacity).map_err(GuildError::from),
                move |outcome| {
                    let member = outcome?;
                    cx.directory.upsert_member(member.clone());
                    cx.presenter.broadcast(
                        guild,
                        Notice::new("guild.member_joined").arg("member", &member.name),
                    );
                    cx.presenter.refresh(guild);
                    Ok(member)
                },
            )
            .await
    }

    pub async fn leave(&self, actor: ActorId) -> GuildResult<()> {
        let ctx = OpContext::new("guild.leave").by(actor);
        let result = self.leave_inner(&ctx, actor).await;
        self.cx.surface(&ctx, result)
    }

    async fn leave_inner(&self, ctx: &OpContext, actor: ActorId) -> GuildResult<()> {
        let cx = self.cx.clone();
        let member = self
            .cx
            .pipeline
            .on_owner(ctx, move || {
                let member = cx.member_of(actor)?;
                if member.role == GuildRole::Leader {
                    return Err(GuildError::PermissionDenied("leader cannot leave; disband instead"));
                }
                Ok(member)
            })
            .await?;

        let cx = self.cx.clone();
        self.cx
            .pipeline
            .run(
                ctx.clone(),
                self.cx
                    .store
                    .remove_member(member.guild, actor)
                    .map_err(GuildError::from),
                move |outcome| {
                    outcome?;
                    cx.directory.remove_member(actor);
                    cx.presenter.notify(actor, Notice::new("guild.left"));
                    cx.presenter.broadcast(
                        member.guild,
                        Notice::new("guild.member_left").arg("member", &member.name),
                    );
                    cx.presenter.refresh(member.guild);
                    Ok(())
                },
            )
            .await
    }

    pub async fn kick(&self, actor: ActorId, target: ActorId) -> GuildResult<()> {
        let ctx = OpContext::new("guild.kick").by(actor).on(target);
        let result = self.kick_inner(&ctx, actor, target).await;
        self.cx.surface(&ctx, result)
    }

    async fn kick_inner(&self, ctx: &OpContext, actor: ActorId, target: ActorId) -> GuildResult<()> {
        let cx = self.cx.clone();
        let victim = self
            .cx
            .pipeline
            .on_owner(ctx, move || {
                let member = cx.member_of(actor)?;
                if !member.role.can_kick() {
                    return Err(GuildError::PermissionDenied("role cannot kick"));
                }
                let victim = cx
                    .directory
                    .membership(target)
                    .filter(|m| m.guild == member.guild)
                    .ok_or(GuildError::NotFound(Entity::Member))?;
                if !member.role.outranks(victim.role) {
                    return Err(GuildError::PermissionDenied("target outranks or equals actor"));
                }
                Ok(victim)
            })
            .await?;

        let cx = self.cx.clone();
        let invites = self.invites.clone();
        self.cx
            .pipeline
            .run(
                ctx.clone(),
                self.cx
                    .store
                    .remove_member(victim.guild, target)
                    .map_err(GuildError::from),
                move |outcome| {
                    outcome?;
                    cx.directory.remove_member(target);
                    invites.purge(Some(target), None);
                    cx.presenter.notify(target, Notice::new("guild.kicked"));
                    cx.presenter.broadcast(
                        victim.guild,
                        Notice::new("guild.member_kicked").arg("member", &victim.name),
                    );
                    cx.presenter.refresh(victim.guild);
                    Ok(())
                },
            )
            .await
    }

    pub async fn promote(&self, actor: ActorId, target: ActorId) -> GuildResult<GuildMember> {
        self.change_role(actor, target, true).await
    }

    pub async fn demote(&self, actor: ActorId, target: ActorId) -> GuildResult<GuildMember> {
        self.change_role(actor, target, false).await
    }

    async fn change_role(&self, actor: ActorId, target: ActorId, promote: bool) -> GuildResult<GuildMember> {
        let name = if promote { "guild.promote" } else { "guild.demote" };
        let ctx = OpContext::new(name).by(actor).on(target);
        let result = self.change_role_inner(&ctx, actor, target, promote).await;
        self.cx.surface(&ctx, result)
    }

    async fn change_role_inner(
        &self,
        ctx: &OpContext,
        actor: ActorId,
        target: ActorId,
        promote: bool,
    ) -> GuildResult<GuildMember> {
        let action = if promote { "promote" } else { "demote" };
        let cx = self.cx.clone();
        let (guild, role) = self
            .cx
            .pipeline
            .on_owner(ctx, move || {
                let member = cx.member_of(actor)?;
                if !member.role.can_manage_roles() {
                    return Err(GuildError::PermissionDenied("only the leader manages roles"));
                }
                let subject = cx
                    .directory
                    .membership(target)
                    .filter(|m| m.guild == member.guild)
                    .ok_or(GuildError::NotFound(Entity::Member))?;
                let next = match (promote, subject.role) {
                    (true, GuildRole::Member) => GuildRole::Officer,
                    (false, GuildRole::Officer) => GuildRole::Member,
                    (_, from) => {
                        return Err(GuildError::InvalidTransition {
                            action,
                            from: from.code(),
                        })
                    }
                };
                Ok((member.guild, next))
            })
            .await?;

        let cx = self.cx.clone();
        self.cx
            .pipeline
            .run(
                ctx.clone(),
                self.cx
                    .store
                    .update_member_role(guild, target, role)
                    .map_err(GuildError::from),
                move |outcome| {
                    let updated = outcome?;
                    cx.directory.set_role(target, role);
                    cx.presenter.notify(
                        target,
                        Notice::new("guild.role_changed").arg("role", role),
                    );
                    cx.presenter.refresh(guild);
                    Ok(updated)
                },
            )
            .await
    }

    /// Move money from the actor's account into the guild bank.
    pub async fn deposit(&self, actor: ActorId, amount: Money) -> GuildResult<Guild> {
        let ctx = OpContext::new("bank.deposit").by(actor).on(amount);
        let result = self.deposit_inner(&ctx, actor, amount).await;
        self.cx.surface(&ctx, result)
    }

    async fn deposit_inner(&self, ctx: &OpContext, actor: ActorId, amount: Money) -> GuildResult<Guild> {
        let cx = self.cx.clone();
        let updated = self
            .cx
            .pipeline
            .on_owner(ctx, move || {
                let member = cx.member_of(actor)?;
                let mut guild = cx.guild_of(member.guild)?;
                if guild.frozen {
                    return Err(GuildError::GuildFrozen);
                }
                guild.balance = guild
                    .balance
                    .checked_add(amount)
                    .ok_or_else(|| GuildError::internal("guild balance overflow"))?;
                cx.economy.withdraw(actor, amount)?;
                Ok(guild)
            })
            .await?;

        let cx = self.cx.clone();
        self.cx
            .pipeline
            .run(
                ctx.clone(),
                self.cx.store.update_guild(updated).map_err(GuildError::from),
                move |outcome| match outcome {
                    Ok(guild) => {
                        cx.directory.upsert_guild(guild.clone());
                        cx.presenter.notify(
                            actor,
                            Notice::new("bank.deposited").arg("amount", cx.economy.format(amount)),
                        );
                        cx.presenter.refresh(guild.id);
                        Ok(guild)
                    }
                    Err(e) => {
                        if let Err(refund) = cx.economy.deposit(actor, amount) {
                            error!(actor = %actor, error = %refund, "Deposit compensation failed");
                        }
                        Err(e)
                    }
                },
            )
            .await
    }

    /// Move money from the guild bank to the actor's account.
    pub async fn withdraw(&self, actor: ActorId, amount: Money) -> GuildResult<Guild> {
        let ctx = OpContext::new("bank.withdraw").by(actor).on(amount);
        let result = self.withdraw_inner(&ctx, actor, amount).await;
        self.cx.surface(&ctx, result)
    }

    async fn withdraw_inner(&self, ctx: &OpContext, actor: ActorId, amount: Money) -> GuildResult<Guild> {
        let cx = self.cx.clone();
        let updated = self
            .cx
            .pipeline
            .on_owner(ctx, move || {
                let member = cx.member_of(actor)?;
                if !member.role.can_manage_bank() {
                    return Err(GuildError::PermissionDenied("role cannot withdraw"));
                }
                let mut guild = cx.guild_of(member.guild)?;
                if guild.frozen {
                    return Err(GuildError::GuildFrozen);
                }
                guild.balance = guild.balance.checked_sub(amount).ok_or(GuildError::InsufficientFunds {
                    needed: amount,
                    available: guild.balance,
                })?;
                Ok(guild)
            })
            .await?;

        let cx = self.cx.clone();
        self.cx
            .pipeline
            .run(
                ctx.clone(),
                self.cx.store.update_guild(updated).map_err(GuildError::from),
                move |outcome| {
                    let guild = outcome?;
                    cx.directory.upsert_guild(guild.clone());
                    cx.economy.deposit(actor, amount)?;
                    cx.presenter.notify(
                        actor,
                        Notice::new("bank.withdrew").arg("amount", cx.economy.format(amount)),
                    );
                    cx.presenter.refresh(guild.id);
                    Ok(guild)
                },
            )
            .await
    }

    /// Buy the next level from the guild bank.
    pub async fn level_up(&self, actor: ActorId) -> GuildResult<Guild> {
        let ctx = OpContext::new("guild.level_up").by(actor);
        let result = self.level_up_inner(&ctx, actor).await;
        self.cx.surface(&ctx, result)
    }

    async fn level_up_inner(&self, ctx: &OpContext, actor: ActorId) -> GuildResult<Guild> {
        let cx = self.cx.clone();
        let settings = self.cx.settings.clone();
        let updated = self
            .cx
            .pipeline
            .on_owner(ctx, move || {
                let member = cx.member_of(actor)?;
                if !member.role.can_manage_bank() {
                    return Err(GuildError::PermissionDenied("role cannot spend the bank"));
                }
                let mut guild = cx.guild_of(member.guild)?;
                let cost = settings
                    .level_cost(guild.level)
                    .ok_or(GuildError::MaxLevel(settings.max_level))?;
                guild.balance = guild.balance.checked_sub(cost).ok_or(GuildError::InsufficientFunds {
                    needed: cost,
                    available: guild.balance,
                })?;
                guild.level += 1;
                Ok(guild)
            })
            .await?;

        let cx = self.cx.clone();
        self.cx
            .pipeline
            .run(
                ctx.clone(),
                self.cx.store.update_guild(updated).map_err(GuildError::from),
                move |outcome| {
                    let guild = outcome?;
                    cx.directory.upsert_guild(guild.clone());
                    cx.presenter.broadcast(
                        guild.id,
                        Notice::new("guild.level_up").arg("level", guild.level),
                    );
                    cx.presenter.refresh(guild.id);
                    info!(guild = %guild.id, level = guild.level, "Guild levelled up");
                    Ok(guild)
                },
            )
            .await
    }

    /// Anchor the guild home at the actor's current position.
    ///
    /// The position is read on the actor's own owner; if the actor leaves
    /// before that happens the operation gives up with `NotFound(Actor)`.
    pub async fn set_home(&self, actor: ActorId) -> GuildResult<Guild> {
        let ctx = OpContext::new("guild.set_home").by(actor);
        let result = self.set_home_inner(&ctx, actor).await;
        self.cx.surface(&ctx, result)
    }

    async fn set_home_inner(&self, ctx: &OpContext, actor: ActorId) -> GuildResult<Guild> {
        let cx = self.cx.clone();
        let guild = self
            .cx
            .pipeline
            .on_owner(ctx, move || {
                let member = cx.member_of(actor)?;
                if !member.role.can_manage_bank() {
                    return Err(GuildError::PermissionDenied("role cannot move the home"));
                }
                cx.guild_of(member.guild)
            })
            .await?;

        let location = self.locate(actor).await?;
        debug!(actor = %actor, location = %location, "Home location read");

        let mut updated = guild;
        updated.home = Some(location);
        let cx = self.cx.clone();
        self.cx
            .pipeline
            .run(
                ctx.clone(),
                self.cx.store.update_guild(updated).map_err(GuildError::from),
                move |outcome| {
                    let guild = outcome?;
                    cx.directory.upsert_guild(guild.clone());
                    cx.presenter.broadcast(guild.id, Notice::new("guild.home_set"));
                    cx.presenter.refresh(guild.id);
                    Ok(guild)
                },
            )
            .await
    }

    async fn locate(&self, actor: ActorId) -> GuildResult<Location> {
        let (tx, rx) = oneshot::channel::<GuildResult<Location>>();
        let slot = Arc::new(Mutex::new(Some(tx)));
        let on_actor = slot.clone();
        let locator = self.cx.locator.clone();

        let deliver = |slot: &Mutex<Option<oneshot::Sender<GuildResult<Location>>>>,
                       value: GuildResult<Location>| {
            let sender = slot
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .take();
            if let Some(sender) = sender {
                let _ = sender.send(value);
            }
        };

        self.cx.router().run_for_actor(
            actor,
            move || {
                let location = locator
                    .location_of(actor)
                    .ok_or(GuildError::NotFound(Entity::Actor));
                deliver(&on_actor, location);
            },
            move || deliver(&slot, Err(GuildError::NotFound(Entity::Actor))),
        );

        rx.await
            .unwrap_or_else(|_| Err(GuildError::internal("actor lookup dropped")))
    }

    /// Administrative freeze. Frozen guilds cannot move money or open relations.
    pub async fn set_frozen(&self, guild: GuildId, frozen: bool) -> GuildResult<Guild> {
        let ctx = OpContext::new("guild.set_frozen").on(guild);
        let result = self.set_frozen_inner(&ctx, guild, frozen).await;
        self.cx.surface(&ctx, result)
    }

    async fn set_frozen_inner(&self, ctx: &OpContext, guild: GuildId, frozen: bool) -> GuildResult<Guild> {
        let cx = self.cx.clone();
        let mut updated = self
            .cx
            .pipeline
            .on_owner(ctx, move || cx.guild_of(guild))
            .await?;
        updated.frozen = frozen;

        let cx = self.cx.clone();
        self.cx
            .pipeline
            .run(
                ctx.clone(),
                self.cx.store.update_guild(updated).map_err(GuildError::from),
                move |outcome| {
                    let guild = outcome?;
                    cx.directory.upsert_guild(guild.clone());
                    let key = if frozen { "guild.frozen" } else { "guild.unfrozen" };
                    cx.presenter.broadcast(guild.id, Notice::new(key));
                    cx.presenter.refresh(guild.id);
                    Ok(guild)
                },
            )
            .await
    }

    /// Cached guild, read on the owner.
    pub async fn guild(&self, id: GuildId) -> GuildResult<Guild> {
        let cx = self.cx.clone();
        self.cx
            .pipeline
            .on_owner(&OpContext::new("guild.read").on(id), move || cx.guild_of(id))
            .await
    }

    /// Cached membership, read on the owner.
    pub async fn membership(&self, actor: ActorId) -> GuildResult<Option<GuildMember>> {
        let cx = self.cx.clone();
        self.cx
            .pipeline
            .on_owner(&OpContext::new("guild.membership").by(actor), move || {
                Ok(cx.directory.membership(actor))
            })
            .await
    }

    /// Stored roster of `guild`, oldest member first.
    pub async fn members(&self, guild: GuildId) -> GuildResult<Vec<GuildMember>> {
        let mut members = self.cx.store.members(guild).map_err(GuildError::from).await?;
        members.sort_by_key(|m| m.joined_at);
        Ok(members)
    }

    /// Drop the actor's outstanding invites. Owner only.
    pub(crate) fn forget_actor(&self, actor: ActorId) -> usize {
        self.invites.purge(Some(actor), None)
    }

    /// Drop every outstanding invite. Owner only.
    pub(crate) fn forget_all(&self) -> usize {
        self.invites.entries.with(|e| {
            for invite in e.values() {
                invite.timer.cancel();
            }
            let n = e.len();
            e.clear();
            n
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_rules() {
        let settings = GuildSettings::default();
        assert!(validate_name(&settings, "Knights", Some("KN")).is_ok());
        assert_eq!(
            validate_name(&settings, "ab", None),
            Err(GuildError::InvalidName("name too short"))
        );
        assert_eq!(
            validate_name(&settings, &"x".repeat(40), None),
            Err(GuildError::InvalidName("name too long"))
        );
        assert_eq!(
            validate_name(&settings, "Bad$Name", None),
            Err(GuildError::InvalidName("name has illegal characters"))
        );
        assert_eq!(
            validate_name(&settings, "Knights", Some("TOOLONG")),
            Err(GuildError::InvalidName("tag length"))
        );
        assert_eq!(
            validate_name(&settings, "Two  Spaces", None),
            Err(GuildError::InvalidName("name has illegal characters"))
        );
        assert_eq!(
            validate_name(&settings, "Knights", Some("K-N")),
            Err(GuildError::InvalidName("tag has illegal characters"))
        );
        assert!(validate_name(&settings, "Ordre du Lys-3", Some("Lys3")).is_ok());
    }
}
