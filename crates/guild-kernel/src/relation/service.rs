//! Relation flows on top of the pipeline.
//!
//! Each flow reads what it needs, checks the rules on the global authority
//! against the cached membership, issues one persistence write and applies
//! the confirmed result back on the authority. Nothing in the cache or the
//! presenter changes until the store has accepted the write.

use std::sync::Arc;

use futures::TryFutureExt;
use tracing::{debug, info};

use super::{authorize, validate_proposal, GuildRelation, RelationAction, RelationStatus, RelationType};
use crate::confirm::{ConfirmOutcome, ConfirmTarget};
use crate::context::ServiceContext;
use crate::error::{Entity, GuildError, GuildResult};
use crate::ids::{ActorId, GuildId, RelationId};
use crate::pipeline::OpContext;
use crate::presenter::Notice;
use crate::scheduler::TaskHandle;

#[derive(Debug, Clone)]
pub struct RelationService {
    cx: Arc<ServiceContext>,
}

impl RelationService {
    pub fn new(cx: Arc<ServiceContext>) -> Self {
        Self { cx }
    }

    /// Open a `PENDING` relation from the actor's guild towards `target`.
    pub async fn propose(
        &self,
        actor: ActorId,
        target: GuildId,
        kind: RelationType,
    ) -> GuildResult<GuildRelation> {
        let ctx = OpContext::new("relation.propose").by(actor).on(target);
        let result = self.propose_inner(&ctx, actor, target, kind).await;
        self.cx.surface(&ctx, result)
    }

    async fn propose_inner(
        &self,
        ctx: &OpContext,
        actor: ActorId,
        target: GuildId,
        kind: RelationType,
    ) -> GuildResult<GuildRelation> {
        let cx = self.cx.clone();
        let (from, to) = self
            .cx
            .pipeline
            .on_owner(ctx, move || {
                let member = cx.member_of(actor)?;
                let from = cx.guild_of(member.guild)?;
                let to = cx.guild_of(target)?;
                validate_proposal(&from, &to, kind, &member)?;
                Ok((from, to))
            })
            .await?;

        let now = self.cx.clock.now();
        let existing = self
            .cx
            .store
            .relation_between(from.id, to.id, now)
            .map_err(GuildError::from)
            .await?;
        if let Some(existing) = existing {
            debug!(relation = %existing.id, status = %existing.status, "Pair already related");
            return Err(GuildError::AlreadyExists(Entity::Relation));
        }

        // The store rejects a concurrent proposal that won the race since the read above
        let relation = GuildRelation::propose(from.id, to.id, kind, actor, now, self.cx.relation_ttl);
        let cx = self.cx.clone();
        self.cx
            .pipeline
            .run(
                ctx.clone(),
                self.cx.store.create_relation(relation, now).map_err(GuildError::from),
                move |outcome| {
                    let created = outcome?;
                    cx.directory.upsert_relation(created.clone());
                    cx.presenter.broadcast(
                        from.id,
                        Notice::new("relation.proposed")
                            .arg("kind", kind)
                            .arg("guild", &to.name),
                    );
                    cx.presenter.broadcast(
                        to.id,
                        Notice::new("relation.received")
                            .arg("kind", kind)
                            .arg("guild", &from.name),
                    );
                    cx.presenter.refresh(from.id);
                    cx.presenter.refresh(to.id);
                    info!(relation = %created.id, kind = %kind, from = %from.name, to = %to.name, "Relation proposed");
                    Ok(created)
                },
            )
            .await
    }

    /// Counterpart accepts a pending relation.
    pub async fn accept(&self, actor: ActorId, relation: RelationId) -> GuildResult<GuildRelation> {
        self.answer(
            actor,
            relation,
            RelationAction::Accept,
            RelationStatus::Active,
            "relation.accepted",
        )
        .await
    }

    /// Counterpart declines a pending relation.
    pub async fn reject(&self, actor: ActorId, relation: RelationId) -> GuildResult<GuildRelation> {
        self.answer(
            actor,
            relation,
            RelationAction::Reject,
            RelationStatus::Cancelled,
            "relation.rejected",
        )
        .await
    }

    /// Initiator withdraws a pending relation.
    pub async fn cancel(&self, actor: ActorId, relation: RelationId) -> GuildResult<GuildRelation> {
        self.answer(
            actor,
            relation,
            RelationAction::Cancel,
            RelationStatus::Cancelled,
            "relation.cancelled",
        )
        .await
    }

    async fn answer(
        &self,
        actor: ActorId,
        id: RelationId,
        action: RelationAction,
        next: RelationStatus,
        key: &'static str,
    ) -> GuildResult<GuildRelation> {
        let ctx = OpContext::new(match action {
            RelationAction::Accept => "relation.accept",
            RelationAction::Reject => "relation.reject",
            _ => "relation.cancel",
        })
        .by(actor)
        .on(id);
        let result = self.answer_inner(&ctx, actor, id, action, next, key).await;
        self.cx.surface(&ctx, result)
    }

    async fn answer_inner(
        &self,
        ctx: &OpContext,
        actor: ActorId,
        id: RelationId,
        action: RelationAction,
        next: RelationStatus,
        key: &'static str,
    ) -> GuildResult<GuildRelation> {
        let relation = self.cx.store.load_relation(id).map_err(GuildError::from).await?;
        let now = self.cx.clock.now();

        let cx = self.cx.clone();
        let checked = relation.clone();
        self.cx
            .pipeline
            .on_owner(ctx, move || {
                let member = cx.member_of(actor)?;
                authorize(action, &checked, &member, now)
            })
            .await?;

        let cx = self.cx.clone();
        self.cx
            .pipeline
            .run(
                ctx.clone(),
                self.cx
                    .store
                    .transition_relation(id, RelationStatus::Pending, next, now)
                    .map_err(GuildError::from),
                move |outcome| {
                    let updated = outcome?;
                    if next.is_terminal() {
                        cx.directory.remove_relation(id);
                    } else {
                        cx.directory.upsert_relation(updated.clone());
                    }
                    for guild in [updated.guild1, updated.guild2] {
                        cx.presenter
                            .broadcast(guild, Notice::new(key).arg("kind", updated.kind));
                        cx.presenter.refresh(guild);
                    }
                    info!(relation = %id, action = action.code(), status = %next, "Relation answered");
                    Ok(updated)
                },
            )
            .await
    }

    /// Either side of an active war offers a truce. The war record is
    /// replaced by a pending truce in one store call.
    pub async fn propose_truce(&self, actor: ActorId, war: RelationId) -> GuildResult<GuildRelation> {
        let ctx = OpContext::new("relation.propose_truce").by(actor).on(war);
        let result = self
            .replace_inner(&ctx, actor, war, RelationAction::ProposeTruce)
            .await;
        self.cx.surface(&ctx, result)
    }

    /// Either side of an active truce ends it; the pair becomes neutral.
    pub async fn end_truce(&self, actor: ActorId, truce: RelationId) -> GuildResult<GuildRelation> {
        let ctx = OpContext::new("relation.end_truce").by(actor).on(truce);
        let result = self
            .replace_inner(&ctx, actor, truce, RelationAction::EndTruce)
            .await;
        self.cx.surface(&ctx, result)
    }

    async fn replace_inner(
        &self,
        ctx: &OpContext,
        actor: ActorId,
        id: RelationId,
        action: RelationAction,
    ) -> GuildResult<GuildRelation> {
        let current = self.cx.store.load_relation(id).map_err(GuildError::from).await?;
        let now = self.cx.clock.now();
        let ttl = self.cx.relation_ttl;

        let cx = self.cx.clone();
        let checked = current.clone();
        let replacement = self
            .cx
            .pipeline
            .on_owner(ctx, move || {
                let member = cx.member_of(actor)?;
                authorize(action, &checked, &member, now)?;
                let counterpart = checked
                    .counterpart_of(member.guild)
                    .ok_or(GuildError::PermissionDenied("not a party to this relation"))?;
                let replacement = match action {
                    RelationAction::ProposeTruce => {
                        GuildRelation::propose(member.guild, counterpart, RelationType::Truce, actor, now, ttl)
                    }
                    _ => {
                        let mut neutral = GuildRelation::propose(
                            member.guild,
                            counterpart,
                            RelationType::Neutral,
                            actor,
                            now,
                            ttl,
                        );
                        neutral.status = RelationStatus::Active;
                        neutral
                    }
                };
                Ok(replacement)
            })
            .await?;

        let key = match action {
            RelationAction::ProposeTruce => "relation.truce_proposed",
            _ => "relation.truce_ended",
        };
        let cx = self.cx.clone();
        self.cx
            .pipeline
            .run(
                ctx.clone(),
                self.cx
                    .store
                    .replace_relation(id, RelationStatus::Active, replacement)
                    .map_err(GuildError::from),
                move |outcome| {
                    let created = outcome?;
                    cx.directory.remove_relation(id);
                    cx.directory.upsert_relation(created.clone());
                    for guild in [created.guild1, created.guild2] {
                        cx.presenter.broadcast(guild, Notice::new(key));
                        cx.presenter.refresh(guild);
                    }
                    info!(old = %id, new = %created.id, kind = %created.kind, "Relation replaced");
                    Ok(created)
                },
            )
            .await
    }

    /// Member-initiated delete, guarded by the confirmation protocol.
    ///
    /// The first call arms a confirmation; a second call for the same
    /// relation within the window deletes it.
    pub async fn request_delete(&self, actor: ActorId, id: RelationId) -> GuildResult<ConfirmOutcome> {
        let ctx = OpContext::new("relation.delete").by(actor).on(id);
        let result = self.request_delete_inner(&ctx, actor, id, false).await;
        self.cx.surface(&ctx, result)
    }

    /// Administrative delete behind the same confirmation window, no role checks.
    pub async fn request_admin_delete(
        &self,
        admin: ActorId,
        id: RelationId,
    ) -> GuildResult<ConfirmOutcome> {
        let ctx = OpContext::new("relation.admin_delete").by(admin).on(id);
        let result = self.request_delete_inner(&ctx, admin, id, true).await;
        self.cx.surface(&ctx, result)
    }

    async fn request_delete_inner(
        &self,
        ctx: &OpContext,
        actor: ActorId,
        id: RelationId,
        admin: bool,
    ) -> GuildResult<ConfirmOutcome> {
        let relation = self.cx.store.load_relation(id).map_err(GuildError::from).await?;
        let now = self.cx.clock.now();

        let cx = self.cx.clone();
        let outcome = self
            .cx
            .pipeline
            .on_owner(ctx, move || {
                if !admin {
                    let member = cx.member_of(actor)?;
                    authorize(RelationAction::Delete, &relation, &member, now)?;
                }
                Ok(cx.confirmations.request(actor, ConfirmTarget::DeleteRelation(id)))
            })
            .await?;

        if outcome == ConfirmOutcome::Confirmed {
            self.delete_now(ctx, id).await?;
        }
        Ok(outcome)
    }

    /// Administrative delete with no confirmation window.
    pub async fn admin_delete(&self, id: RelationId) -> GuildResult<GuildRelation> {
        let ctx = OpContext::new("relation.admin_delete").on(id);
        let result = self.delete_now(&ctx, id).await;
        self.cx.surface(&ctx, result)
    }

    pub(crate) async fn delete_now(&self, ctx: &OpContext, id: RelationId) -> GuildResult<GuildRelation> {
        let cx = self.cx.clone();
        self.cx
            .pipeline
            .run(
                ctx.clone(),
                self.cx.store.delete_relation(id).map_err(GuildError::from),
                move |outcome| {
                    let removed = outcome?;
                    cx.directory.remove_relation(id);
                    for guild in [removed.guild1, removed.guild2] {
                        cx.presenter.broadcast(
                            guild,
                            Notice::new("relation.deleted").arg("kind", removed.kind),
                        );
                        cx.presenter.refresh(guild);
                    }
                    info!(relation = %id, kind = %removed.kind, "Relation deleted");
                    Ok(removed)
                },
            )
            .await
    }

    /// Every stored relation of `guild`, each reported with its effective status.
    pub async fn relations_of(&self, guild: GuildId) -> GuildResult<Vec<GuildRelation>> {
        let now = self.cx.clock.now();
        let relations = self
            .cx
            .store
            .relations_of(guild)
            .map_err(GuildError::from)
            .await?;
        Ok(relations.iter().map(|r| r.as_seen_at(now)).collect())
    }

    /// The pair's open relation, if any.
    pub async fn between(&self, a: GuildId, b: GuildId) -> GuildResult<Option<GuildRelation>> {
        let now = self.cx.clock.now();
        self.cx
            .store
            .relation_between(a, b, now)
            .map_err(GuildError::from)
            .await
    }

    /// Periodically evict relations that have passed their expiry from the
    /// cache and tell both guilds.
    pub fn start_expiry_sweep(&self, period_ticks: u64) -> TaskHandle {
        let cx = self.cx.clone();
        self.cx.router().run_periodically(
            move || {
                let now = cx.clock.now();
                for relation in cx.directory.take_expired(now) {
                    debug!(relation = %relation.id, "Relation expired");
                    for guild in [relation.guild1, relation.guild2] {
                        cx.presenter.broadcast(
                            guild,
                            Notice::new("relation.expired").arg("kind", relation.kind),
                        );
                        cx.presenter.refresh(guild);
                    }
                }
            },
            period_ticks,
            period_ticks,
        )
    }
}
