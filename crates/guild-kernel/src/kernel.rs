//! The guild kernel: scheduler host, router and services wired together.
//!
//! ## Usage
//!
//! ```ignore
//! use guild_kernel::{GuildKernelBuilder, KernelConfig};
//! use acton_reactive::prelude::*;
//!
//! let mut runtime = ActonApp::launch_async().await;
//!
//! let kernel = GuildKernelBuilder::new(KernelConfig::default())
//!     .economy(economy.clone())
//!     .presenter(presenter.clone())
//!     .spawn(&mut runtime)
//!     .await?;
//!
//! kernel.connect_actor(alice, "Alice", Location::new("world", 0.0, 64.0, 0.0));
//! let guild = kernel.guilds().create_guild(alice, "Alpha", Some("ALP")).await?;
//!
//! kernel.shutdown().await;
//! runtime.shutdown_all().await?;
//! ```

use std::sync::Arc;

use acton_reactive::prelude::*;
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::KernelConfig;
use crate::confirm::{ConfirmTarget, ConfirmationManager};
use crate::context::ServiceContext;
use crate::directory::GuildDirectory;
use crate::economy::{Economy, MemoryEconomy};
use crate::error::GuildResult;
use crate::host::{HostLayout, SchedulerHost};
use crate::ids::{ActorId, Location};
use crate::pipeline::{OpContext, Pipeline};
use crate::presenter::{NullPresenter, Presenter};
use crate::relation::RelationService;
use crate::router::TaskRouter;
use crate::scheduler::TaskHandle;
use crate::service::GuildService;
use crate::store::{GuildStore, MemoryStore};
use crate::topology::{Topology, TopologyDetector};

/// Builder for a [`GuildKernel`].
///
/// Anything not supplied falls back to an in-memory default: a
/// [`MemoryStore`], an empty [`MemoryEconomy`], a [`NullPresenter`] and the
/// wall clock.
pub struct GuildKernelBuilder {
    config: KernelConfig,
    layout: Option<HostLayout>,
    detector: Option<TopologyDetector>,
    store: Option<Arc<dyn GuildStore>>,
    economy: Option<Arc<dyn Economy>>,
    presenter: Option<Arc<dyn Presenter>>,
    clock: Option<Arc<dyn Clock>>,
}

impl GuildKernelBuilder {
    pub fn new(config: KernelConfig) -> Self {
        Self {
            config,
            layout: None,
            detector: None,
            store: None,
            economy: None,
            presenter: None,
            clock: None,
        }
    }

    /// Override the layout named in the config.
    pub fn layout(mut self, layout: HostLayout) -> Self {
        self.layout = Some(layout);
        self
    }

    /// Use a pre-resolved detector instead of probing the host.
    pub fn detector(mut self, detector: TopologyDetector) -> Self {
        self.detector = Some(detector);
        self
    }

    pub fn store(mut self, store: Arc<dyn GuildStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn economy(mut self, economy: Arc<dyn Economy>) -> Self {
        self.economy = Some(economy);
        self
    }

    pub fn presenter(mut self, presenter: Arc<dyn Presenter>) -> Self {
        self.presenter = Some(presenter);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Spawn the owner actors and start the background timers.
    pub async fn spawn(self, runtime: &mut ActorRuntime) -> GuildResult<GuildKernel> {
        let layout = self
            .layout
            .unwrap_or_else(|| HostLayout::from_config(&self.config.scheduler));
        let host = SchedulerHost::spawn(runtime, layout).await;

        let detector = self
            .detector
            .unwrap_or_else(|| TopologyDetector::new(host.clone()));
        let router = TaskRouter::new(&detector, host.clone());
        let topology = router.topology();

        if matches!(layout, HostLayout::Partitioned { .. }) && !topology.is_partitioned() {
            warn!(topology = %topology, "Partitioned host resolved without regions; routing everything globally");
        }

        let presenter = self
            .presenter
            .unwrap_or_else(|| Arc::new(NullPresenter));
        let confirmations = ConfirmationManager::new(
            router.clone(),
            presenter.clone(),
            self.config.confirmations.timeout_ticks,
        );

        let cx = Arc::new(ServiceContext {
            pipeline: Pipeline::new(router.clone()),
            store: self.store.unwrap_or_else(|| Arc::new(MemoryStore::new())),
            economy: self
                .economy
                .unwrap_or_else(|| Arc::new(MemoryEconomy::new("coins"))),
            presenter,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            directory: Arc::new(GuildDirectory::new()),
            confirmations,
            locator: host.clone(),
            settings: self.config.guilds.clone(),
            relation_ttl: self.config.relations.ttl(),
        });

        let relations = RelationService::new(cx.clone());
        let guilds = GuildService::new(cx.clone());
        let sweep = relations.start_expiry_sweep(self.config.relations.sweep_interval_ticks.max(1));

        if self.config.scheduler.auto_tick {
            host.start_ticker(self.config.scheduler.tick_interval());
        }

        info!(
            topology = %topology,
            auto_tick = self.config.scheduler.auto_tick,
            "Guild kernel started"
        );

        Ok(GuildKernel {
            config: self.config,
            host,
            router,
            topology,
            cx,
            relations,
            guilds,
            sweep,
        })
    }
}

/// A running guild kernel.
pub struct GuildKernel {
    config: KernelConfig,
    host: Arc<SchedulerHost>,
    router: TaskRouter,
    topology: Topology,
    cx: Arc<ServiceContext>,
    relations: RelationService,
    guilds: GuildService,
    sweep: TaskHandle,
}

impl std::fmt::Debug for GuildKernel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuildKernel")
            .field("topology", &self.topology)
            .field("host", &self.host)
            .finish()
    }
}

impl GuildKernel {
    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    pub fn topology(&self) -> Topology {
        self.topology
    }

    pub fn router(&self) -> &TaskRouter {
        &self.router
    }

    pub fn host(&self) -> &Arc<SchedulerHost> {
        &self.host
    }

    pub fn relations(&self) -> &RelationService {
        &self.relations
    }

    pub fn guilds(&self) -> &GuildService {
        &self.guilds
    }

    /// Step the tick clock by hand. Meant for hosts running without `auto_tick`.
    pub async fn advance_ticks(&self, ticks: u64) {
        self.host.advance(ticks).await;
    }

    pub fn connect_actor(&self, actor: ActorId, name: impl Into<String>, location: Location) {
        self.host.register_actor(actor, name, location);
    }

    pub fn relocate_actor(&self, actor: ActorId, location: Location) -> bool {
        self.host.relocate_actor(actor, location)
    }

    /// Retire the actor and drop its pending confirmation and invites.
    pub async fn disconnect_actor(&self, actor: ActorId) -> GuildResult<()> {
        let was_live = self.host.retire_actor(actor);
        let cx = self.cx.clone();
        let guilds = self.guilds.clone();
        let dropped = self
            .router
            .call(move || {
                cx.confirmations.clear_actor(actor);
                guilds.forget_actor(actor)
            })
            .await?;
        debug!(actor = %actor, was_live, invites = dropped, "Actor disconnected");
        Ok(())
    }

    /// Confirm whatever the actor has pending and run it.
    ///
    /// Returns the confirmed target, or `None` when nothing was pending.
    pub async fn confirm(&self, actor: ActorId) -> GuildResult<Option<ConfirmTarget>> {
        let ctx = OpContext::new("confirm").by(actor);
        let cx = self.cx.clone();
        let target = self
            .cx
            .pipeline
            .on_owner(&ctx, move || Ok(cx.confirmations.confirm(actor)))
            .await?;

        let result = match target {
            Some(ConfirmTarget::DeleteRelation(id)) => {
                let op = ctx.clone().on(id);
                self.relations.delete_now(&op, id).await.map(|_| target)
            }
            Some(ConfirmTarget::DisbandGuild(guild)) => {
                let op = ctx.clone().on(guild);
                self.guilds.disband_now(&op, guild).await.map(|_| target)
            }
            None => Ok(None),
        };
        self.cx.surface(&ctx, result)
    }

    pub async fn cancel_confirmation(&self, actor: ActorId) -> GuildResult<Option<ConfirmTarget>> {
        let cx = self.cx.clone();
        self.router.call(move || cx.confirmations.cancel(actor)).await
    }

    pub async fn pending_confirmation(&self, actor: ActorId) -> GuildResult<Option<ConfirmTarget>> {
        let cx = self.cx.clone();
        self.router.call(move || cx.confirmations.pending(actor)).await
    }

    /// Stop timers, drop transient state and let queued owner work finish.
    ///
    /// The acton runtime itself is left running; shut it down afterwards.
    pub async fn shutdown(&self) {
        self.host.stop_ticker();
        self.sweep.cancel();

        let cx = self.cx.clone();
        let guilds = self.guilds.clone();
        let cleared = self
            .router
            .call(move || {
                let confirmations = cx.confirmations.clear_all();
                let invites = guilds.forget_all();
                cx.directory.clear();
                (confirmations, invites)
            })
            .await;

        self.host.drain_timers().await;
        match cleared {
            Ok((confirmations, invites)) => {
                info!(confirmations, invites, "Guild kernel stopped")
            }
            Err(e) => info!(error = %e, "Guild kernel stopped without clearing owner state"),
        }
    }
}
