//! Collaborators shared by the relation and guild services.

use std::sync::Arc;

use chrono::Duration;
use tracing::{error, warn};

use crate::clock::Clock;
use crate::config::GuildSettings;
use crate::confirm::ConfirmationManager;
use crate::directory::GuildDirectory;
use crate::economy::Economy;
use crate::error::{Entity, GuildError, GuildResult};
use crate::guild::{Guild, GuildMember};
use crate::ids::{ActorId, GuildId};
use crate::pipeline::{OpContext, Pipeline};
use crate::presenter::{Notice, Presenter};
use crate::router::TaskRouter;
use crate::scheduler::ActorLocator;
use crate::store::GuildStore;

pub struct ServiceContext {
    pub pipeline: Pipeline,
    pub store: Arc<dyn GuildStore>,
    pub economy: Arc<dyn Economy>,
    pub presenter: Arc<dyn Presenter>,
    pub clock: Arc<dyn Clock>,
    pub directory: Arc<GuildDirectory>,
    pub confirmations: Arc<ConfirmationManager>,
    pub locator: Arc<dyn ActorLocator>,
    pub settings: GuildSettings,
    pub relation_ttl: Duration,
}

impl std::fmt::Debug for ServiceContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceContext")
            .field("router", self.pipeline.router())
            .field("relation_ttl_days", &self.relation_ttl.num_days())
            .finish()
    }
}

impl ServiceContext {
    pub fn router(&self) -> &TaskRouter {
        self.pipeline.router()
    }

    /// Membership of `actor`. Owner only.
    pub fn member_of(&self, actor: ActorId) -> GuildResult<GuildMember> {
        self.directory.membership(actor).ok_or(GuildError::NotInGuild)
    }

    /// Cached guild. Owner only.
    pub fn guild_of(&self, id: GuildId) -> GuildResult<Guild> {
        self.directory.guild(id).ok_or(GuildError::NotFound(Entity::Guild))
    }

    /// Show a failed outcome to the acting actor, then hand it back.
    ///
    /// Delivery is routed to the global authority, so this may be called
    /// from any thread.
    pub fn surface<T>(&self, ctx: &OpContext, result: GuildResult<T>) -> GuildResult<T> {
        if let Err(e) = &result {
            match e {
                GuildError::Internal(_) => error!(
                    op = ctx.name,
                    actor = ?ctx.actor,
                    target = ?ctx.target,
                    correlation_id = %ctx.correlation_id,
                    error = %e,
                    "Operation failed"
                ),
                _ => warn!(
                    op = ctx.name,
                    actor = ?ctx.actor,
                    target = ?ctx.target,
                    correlation_id = %ctx.correlation_id,
                    code = e.code(),
                    "Operation refused"
                ),
            }
            if let Some(actor) = ctx.actor {
                let presenter = self.presenter.clone();
                let notice = Notice::failure(e);
                self.router()
                    .run_on_global_authority(move || presenter.notify(actor, notice));
            }
        }
        result
    }
}
